// Copyright (c) 2022, Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use tracing::subscriber::set_global_default;
use tracing_subscriber::EnvFilter;
use warden::{
    config::{AuthorityServerConfig, Config},
    server_lib::Server,
};
use warden_core::authority::AuthorityState;

#[derive(Parser)]
#[clap(
    name = "Warden Server",
    about = "The authority of a centralized advisory lock service",
    rename_all = "kebab-case"
)]
struct ServerOpt {
    /// Sets the file storing the server configuration (an empty one will be created if missing)
    #[clap(long, default_value = "./server.conf")]
    config: String,
    /// Specify host:port to listen on, overriding the config
    #[clap(long)]
    listen_address: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber_builder =
        tracing_subscriber::fmt::Subscriber::builder().with_env_filter(env_filter);
    let subscriber = subscriber_builder.with_writer(std::io::stderr).finish();
    set_global_default(subscriber).expect("Failed to set subscriber");

    let options = ServerOpt::parse();
    let mut config = AuthorityServerConfig::read_or_create(&options.config)?;
    if let Some(listen_address) = options.listen_address {
        let (host, port) = listen_address
            .rsplit_once(':')
            .ok_or_else(|| anyhow::anyhow!("Invalid listen address: {listen_address}"))?;
        config.host = host.to_string();
        config.port = port.parse()?;
    }

    let state = AuthorityState::new(config.grace_period());
    let server = Server::new(config.host.clone(), config.port, state, config.buffer_size);
    server.spawn().await?.join().await?;
    Ok(())
}
