// Copyright (c) 2022, Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::transport::*;
use std::{
    net::TcpListener,
    sync::atomic::{AtomicUsize, Ordering},
};
use warden_types::{error::*, serialize::*};

use std::io;

use tokio::time;

#[derive(Clone, Debug)]
pub struct NetworkClient {
    base_address: String,
    base_port: u16,
    buffer_size: usize,
    send_timeout: std::time::Duration,
    recv_timeout: std::time::Duration,
}

impl NetworkClient {
    pub fn new(
        base_address: String,
        base_port: u16,
        buffer_size: usize,
        send_timeout: std::time::Duration,
        recv_timeout: std::time::Duration,
    ) -> Self {
        NetworkClient {
            base_address,
            base_port,
            buffer_size,
            send_timeout,
            recv_timeout,
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.base_address, self.base_port)
    }

    pub fn send_timeout(&self) -> std::time::Duration {
        self.send_timeout
    }

    pub fn recv_timeout(&self) -> std::time::Duration {
        self.recv_timeout
    }

    /// Open a fresh connection. The stream stays alive for the lifetime of
    /// the session it carries.
    pub async fn connect_for_stream(&self) -> Result<TcpDataStream, io::Error> {
        connect(self.address(), self.buffer_size).await
    }

    async fn send_recv_bytes_internal(&self, buf: Vec<u8>) -> Result<Option<Vec<u8>>, io::Error> {
        let mut stream = connect(self.address(), self.buffer_size).await?;
        // Send message
        time::timeout(self.send_timeout, stream.write_data(&buf)).await??;
        // Wait for reply
        time::timeout(self.recv_timeout, async {
            stream.read_data().await.transpose()
        })
        .await?
    }

    /// One-shot request over a throwaway connection. Lock traffic must use a
    /// persistent session stream instead; this is for stateless queries.
    pub async fn send_recv_bytes(&self, buf: Vec<u8>) -> Result<SerializedMessage, WardenError> {
        parse_recv_bytes(self.send_recv_bytes_internal(buf).await)
    }
}

pub struct NetworkServer {
    pub base_address: String,
    pub base_port: u16,
    pub buffer_size: usize,
    // Stats
    packets_processed: AtomicUsize,
    user_errors: AtomicUsize,
}

impl NetworkServer {
    pub fn new(base_address: String, base_port: u16, buffer_size: usize) -> Self {
        Self {
            base_address,
            base_port,
            buffer_size,
            packets_processed: AtomicUsize::new(0),
            user_errors: AtomicUsize::new(0),
        }
    }

    pub fn packets_processed(&self) -> usize {
        self.packets_processed.load(Ordering::Relaxed)
    }

    pub fn increment_packets_processed(&self) {
        self.packets_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn user_errors(&self) -> usize {
        self.user_errors.load(Ordering::Relaxed)
    }

    pub fn increment_user_errors(&self) {
        self.user_errors.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct PortAllocator {
    next_port: u16,
}

impl PortAllocator {
    pub fn new(starting_port: u16) -> Self {
        Self {
            next_port: starting_port,
        }
    }
    pub fn next_port(&mut self) -> Option<u16> {
        for port in self.next_port..65535 {
            if TcpListener::bind(("127.0.0.1", port)).is_ok() {
                self.next_port = port + 1;
                return Some(port);
            }
        }
        None
    }
}

pub fn parse_recv_bytes(
    response: Result<Option<Vec<u8>>, io::Error>,
) -> Result<SerializedMessage, WardenError> {
    match response {
        Err(error) => Err(WardenError::ClientIoError {
            error: format!("{error}"),
        }),
        Ok(Some(response)) => {
            // Parse reply
            match deserialize_message(&response[..]) {
                Ok(SerializedMessage::Error(error)) => Err(*error),
                Ok(message) => Ok(message),
                Err(_) => Err(WardenError::InvalidDecoding),
            }
        }
        Ok(None) => Err(WardenError::ClientIoError {
            error: "Empty response from authority.".to_string(),
        }),
    }
}
