// Copyright (c) 2022, Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use std::{
    fmt::{Display, Formatter},
    fs::{self, File},
    io::BufReader,
    path::PathBuf,
};
use tracing::trace;
use warden_core::authority::DEFAULT_GRACE_PERIOD;
use warden_network::transport;

pub trait Config
where
    Self: DeserializeOwned + Serialize,
{
    fn read_or_create(path: &str) -> Result<Self, anyhow::Error> {
        let path_buf = PathBuf::from(path);
        Ok(if path_buf.exists() {
            trace!("Reading config from '{}'", path);
            let reader = BufReader::new(File::open(path_buf)?);
            let mut config: Self = serde_json::from_reader(reader)?;
            config.set_config_path(path);
            config
        } else {
            trace!("Config file not found, creating new config '{}'", path);
            let new_config = Self::create(path)?;
            new_config.write(path)?;
            new_config
        })
    }

    fn write(&self, path: &str) -> Result<(), anyhow::Error> {
        trace!("Writing config to '{}'", path);
        let config = serde_json::to_string_pretty(self)?;
        fs::write(path, config)?;
        Ok(())
    }

    fn save(&self) -> Result<(), anyhow::Error> {
        self.write(self.config_path())
    }

    fn create(path: &str) -> Result<Self, anyhow::Error>;

    fn set_config_path(&mut self, path: &str);

    fn config_path(&self) -> &str;
}

#[derive(Serialize, Deserialize)]
pub struct AuthorityServerConfig {
    pub host: String,
    pub port: u16,
    pub buffer_size: usize,
    /// How long the authority waits for an offered waiter to claim a key,
    /// in milliseconds.
    pub grace_millis: u64,

    #[serde(skip)]
    config_path: String,
}

impl AuthorityServerConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_millis)
    }
}

impl Config for AuthorityServerConfig {
    fn create(path: &str) -> Result<Self, anyhow::Error> {
        Ok(Self {
            host: "127.0.0.1".to_string(),
            port: 9500,
            buffer_size: transport::DEFAULT_MAX_DATAGRAM_SIZE.parse()?,
            grace_millis: DEFAULT_GRACE_PERIOD.as_millis() as u64,
            config_path: path.to_string(),
        })
    }

    fn set_config_path(&mut self, path: &str) {
        self.config_path = path.to_string();
    }

    fn config_path(&self) -> &str {
        &self.config_path
    }
}

impl Display for AuthorityServerConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Config path : {}\nListen address : {}:{}\nGrace period : {}ms",
            self.config_path, self.host, self.port, self.grace_millis
        )
    }
}

#[derive(Serialize, Deserialize)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub buffer_size: usize,
    pub send_timeout: Duration,
    pub recv_timeout: Duration,

    #[serde(skip)]
    config_path: String,
}

impl Config for ClientConfig {
    fn create(path: &str) -> Result<Self, anyhow::Error> {
        Ok(Self {
            host: "127.0.0.1".to_string(),
            port: 9500,
            buffer_size: transport::DEFAULT_MAX_DATAGRAM_SIZE.parse()?,
            send_timeout: Duration::from_secs(4),
            recv_timeout: Duration::from_secs(4),
            config_path: path.to_string(),
        })
    }

    fn set_config_path(&mut self, path: &str) {
        self.config_path = path.to_string();
    }

    fn config_path(&self) -> &str {
        &self.config_path
    }
}
