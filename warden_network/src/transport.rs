// Copyright (c) 2022, Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use std::{io, sync::Arc};
use tokio::net::{
    tcp::{OwnedReadHalf, OwnedWriteHalf},
    TcpListener, TcpStream,
};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tracing::*;

#[cfg(test)]
#[path = "unit_tests/transport_tests.rs"]
mod transport_tests;

/// Suggested buffer size
pub const DEFAULT_MAX_DATAGRAM_SIZE: &str = "65507";

/// The handler required to create a service. It is given one channel per
/// accepted connection and owns it until the connection drops.
#[async_trait]
pub trait MessageHandler<A> {
    async fn handle_messages(&self, channel: A);
}

/// The pair of framed halves a handler reads requests from and writes
/// replies (or server-initiated messages) to.
pub trait RwChannel<'a> {
    type R: 'a + Stream<Item = Result<BytesMut, io::Error>> + Unpin + Send;
    type W: 'a + Sink<Bytes, Error = io::Error> + Unpin + Send;

    fn sink(&mut self) -> &mut Self::W;
    fn stream(&mut self) -> &mut Self::R;
}

/// The result of spawning a server is oneshot channel to kill it and a handle to track completion.
pub struct SpawnedServer {
    complete: futures::channel::oneshot::Sender<()>,
    handle: tokio::task::JoinHandle<Result<(), std::io::Error>>,
}

impl SpawnedServer {
    pub async fn join(self) -> Result<(), std::io::Error> {
        // Note that dropping `self.complete` would terminate the server.
        self.handle.await??;
        Ok(())
    }

    pub async fn kill(self) -> Result<(), std::io::Error> {
        self.complete.send(()).unwrap();
        self.handle.await??;
        Ok(())
    }
}

/// Create a DataStream for this protocol.
pub async fn connect(
    address: String,
    max_data_size: usize,
) -> Result<TcpDataStream, std::io::Error> {
    TcpDataStream::connect(address, max_data_size).await
}

/// Run a server for this protocol and the given message handler.
pub async fn spawn_server<S>(
    address: &str,
    state: S,
    buffer_size: usize,
) -> Result<SpawnedServer, std::io::Error>
where
    S: MessageHandler<TcpDataStream> + Send + Sync + 'static,
{
    let (complete, receiver) = futures::channel::oneshot::channel();
    let handle = {
        // see https://fly.io/blog/the-tokio-1-x-upgrade/#tcplistener-from_std-needs-to-be-set-to-nonblocking
        let std_listener = std::net::TcpListener::bind(address)?;
        std_listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(std_listener)?;

        tokio::spawn(run_tcp_server(listener, state, receiver, buffer_size))
    };
    Ok(SpawnedServer { complete, handle })
}

/// An implementation of DataStream based on TCP.
pub struct TcpDataStream {
    pub framed_read: FramedRead<OwnedReadHalf, LengthDelimitedCodec>,
    pub framed_write: FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>,
}

impl TcpDataStream {
    async fn connect(address: String, max_data_size: usize) -> Result<Self, std::io::Error> {
        let stream = TcpStream::connect(address).await?;
        Ok(Self::from_tcp_stream(stream, max_data_size))
    }

    fn from_tcp_stream(stream: TcpStream, max_data_size: usize) -> Self {
        let (read_half, write_half) = stream.into_split();
        let mut codec = LengthDelimitedCodec::new();
        codec.set_max_frame_length(max_data_size);
        Self {
            framed_read: FramedRead::new(read_half, codec.clone()),
            framed_write: FramedWrite::new(write_half, codec),
        }
    }

    pub async fn write_data<'a>(&'a mut self, buffer: &'a [u8]) -> Result<(), std::io::Error> {
        self.framed_write.send(Bytes::copy_from_slice(buffer)).await
    }

    pub async fn read_data(&mut self) -> Option<Result<Vec<u8>, std::io::Error>> {
        self.framed_read
            .next()
            .await
            .map(|result| result.map(|buffer| buffer.to_vec()))
    }
}

impl<'a> RwChannel<'a> for TcpDataStream {
    type R = FramedRead<OwnedReadHalf, LengthDelimitedCodec>;
    type W = FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>;

    fn sink(&mut self) -> &mut Self::W {
        &mut self.framed_write
    }

    fn stream(&mut self) -> &mut Self::R {
        &mut self.framed_read
    }
}

// Server implementation for TCP.
async fn run_tcp_server<S>(
    listener: TcpListener,
    state: S,
    mut exit_future: futures::channel::oneshot::Receiver<()>,
    buffer_size: usize,
) -> Result<(), std::io::Error>
where
    S: MessageHandler<TcpDataStream> + Send + Sync + 'static,
{
    let guarded_state = Arc::new(state);
    loop {
        let (stream, _) = match future::select(exit_future, Box::pin(listener.accept())).await {
            future::Either::Left(_) => break,
            future::Either::Right((value, new_exit_future)) => {
                exit_future = new_exit_future;
                value?
            }
        };

        let guarded_state = guarded_state.clone();
        tokio::spawn(async move {
            let channel = TcpDataStream::from_tcp_stream(stream, buffer_size);
            guarded_state.handle_messages(channel).await;
            debug!("Connection task terminated");
        });
    }
    Ok(())
}
