// Copyright (c) 2022, Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use clap::{Parser, Subcommand};
use std::time::Duration;
use tracing::subscriber::set_global_default;
use tracing_subscriber::EnvFilter;
use warden::config::{ClientConfig, Config};
use warden_core::client::LockClient;
use warden_network::network::NetworkClient;
use warden_types::base_types::LockKey;

#[derive(Parser)]
#[clap(
    name = "Warden Client",
    about = "Command line client of the lock authority",
    rename_all = "kebab-case"
)]
struct ClientOpt {
    /// Sets the file storing the client configuration (an empty one will be created if missing)
    #[clap(long, default_value = "./client.conf")]
    config: String,
    #[clap(subcommand)]
    cmd: ClientCommands,
}

#[derive(Subcommand)]
#[clap(rename_all = "kebab-case")]
enum ClientCommands {
    /// Print the locker id assigned to this session
    Identity,
    /// Acquire a lock, optionally waiting for it to become free
    Lock {
        key: String,
        /// Wait up to this many milliseconds before giving up
        #[clap(long)]
        wait_ms: Option<u64>,
    },
    /// Release a lock held by this session
    Unlock { key: String },
    /// Release every lock held by this session
    UnlockAll,
    /// Print the authority's client/lock/watch counts
    Stats,
    /// Administrative full-state reset of the authority
    Reset,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber_builder =
        tracing_subscriber::fmt::Subscriber::builder().with_env_filter(env_filter);
    let subscriber = subscriber_builder.with_writer(std::io::stderr).finish();
    set_global_default(subscriber).expect("Failed to set subscriber");

    let options = ClientOpt::parse();
    let config = ClientConfig::read_or_create(&options.config)?;
    let network = NetworkClient::new(
        config.host,
        config.port,
        config.buffer_size,
        config.send_timeout,
        config.recv_timeout,
    );
    let mut client = LockClient::connect(&network).await?;

    match options.cmd {
        ClientCommands::Identity => {
            let locker = client.identity().await?;
            println!("{locker}");
        }
        ClientCommands::Lock { key, wait_ms } => {
            let key = LockKey::new(key);
            let outcome = match wait_ms {
                None => client.lock(key).await?,
                Some(wait_ms) => {
                    client
                        .lock_wait(key, Duration::from_millis(wait_ms))
                        .await?
                }
            };
            println!("{outcome:?}");
        }
        ClientCommands::Unlock { key } => {
            let outcome = client.unlock(LockKey::new(key)).await?;
            println!("{outcome:?}");
        }
        ClientCommands::UnlockAll => {
            client.unlock_all().await?;
            println!("Requested");
        }
        ClientCommands::Stats => {
            let stats = client.stats().await?;
            println!(
                "clients: {}, locks: {}, watches: {}",
                stats.clients, stats.locks, stats.watches
            );
        }
        ClientCommands::Reset => {
            client.reset().await?;
            println!("Requested");
        }
    }
    Ok(())
}
