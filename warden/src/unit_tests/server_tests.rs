// Copyright (c) 2022, Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use super::*;
use bytes::BytesMut;
use std::sync::Arc;
use std::time::Duration;
use warden_types::base_types::{dbg_key, LockerId};

// Some infra to feed the server messages and receive responses.

use futures::channel::mpsc::{channel, Receiver, Sender};
use futures::sink::SinkMapErr;
use futures::{Sink, SinkExt};

type SinkSenderErr =
    SinkMapErr<Sender<Bytes>, fn(<Sender<Bytes> as Sink<Bytes>>::Error) -> std::io::Error>;

struct TestChannel {
    reader: Receiver<Result<BytesMut, std::io::Error>>,
    writer: SinkSenderErr,
}

#[allow(clippy::type_complexity)] // appease clippy, in the tests!
impl TestChannel {
    pub fn new() -> (
        TestChannel,
        (Sender<Result<BytesMut, std::io::Error>>, Receiver<Bytes>),
    ) {
        let (outer_tx, inner_rx) = channel(1000);
        let (inner_tx, outer_rx) = channel(1000);

        let test_channel = TestChannel {
            reader: inner_rx,
            writer: inner_tx
                .sink_map_err(|_| std::io::Error::new(std::io::ErrorKind::Other, "channel gone")),
        };

        (test_channel, (outer_tx, outer_rx))
    }
}

impl<'a> RwChannel<'a> for TestChannel {
    type R = Receiver<Result<BytesMut, std::io::Error>>;
    type W = SinkSenderErr;

    fn sink(&mut self) -> &mut Self::W {
        &mut self.writer
    }
    fn stream(&mut self) -> &mut Self::R {
        &mut self.reader
    }
}

fn init_server() -> Arc<RunningServerState> {
    let state = AuthorityState::new(Duration::from_millis(100));
    Arc::new(RunningServerState {
        network: NetworkServer::new("127.0.0.1".to_string(), 999, 65_000),
        authority: AuthorityCore::spawn(state),
    })
}

async fn send(tx: &mut Sender<Result<BytesMut, std::io::Error>>, frame: Vec<u8>) {
    tx.send(Ok(BytesMut::from(&frame[..])))
        .await
        .expect("Problem sending");
}

async fn recv(rx: &mut Receiver<Bytes>) -> SerializedMessage {
    let data = rx.next().await.expect("Connection closed");
    deserialize_message(&data[..]).expect("Bad response")
}

// This is the most basic example of how to test the server logic.

#[tokio::test]
async fn test_channel_infra() {
    let server = init_server();
    let (channel, (mut tx, mut rx)) = TestChannel::new();

    let inner = server.clone();
    let handle = tokio::spawn(async move {
        inner.handle_messages(channel).await;
    });

    send(&mut tx, serialize_identity_request(&IdentityRequest)).await;
    match recv(&mut rx).await {
        SerializedMessage::IdentityResp(response) => {
            assert_eq!(response.locker, LockerId::new(0));
        }
        _ => panic!("Bad response"),
    }

    drop(tx);
    handle.await.expect("Problem closing task");
}

#[tokio::test]
async fn test_garbage_frame_gets_error_reply() {
    let server = init_server();
    let (channel, (mut tx, mut rx)) = TestChannel::new();

    let inner = server.clone();
    let _handle = tokio::spawn(async move {
        inner.handle_messages(channel).await;
    });

    tx.send(Ok(BytesMut::from(&b"not a message"[..])))
        .await
        .expect("Problem sending");
    match recv(&mut rx).await {
        SerializedMessage::Error(error) => assert_eq!(*error, WardenError::InvalidDecoding),
        _ => panic!("Bad response"),
    }
    assert_eq!(server.network.user_errors(), 1);
}

#[tokio::test]
async fn test_handoff_handshake_between_channels() {
    let server = init_server();
    let key = dbg_key("r1");

    let (channel_a, (mut tx_a, mut rx_a)) = TestChannel::new();
    let (channel_b, (mut tx_b, mut rx_b)) = TestChannel::new();
    for channel in [channel_a, channel_b] {
        let inner = server.clone();
        tokio::spawn(async move {
            inner.handle_messages(channel).await;
        });
    }

    // A acquires the key.
    send(&mut tx_a, serialize_lock_request(&LockRequest::immediate(key.clone()))).await;
    match recv(&mut rx_a).await {
        SerializedMessage::LockResp(response) => {
            assert_eq!(response.outcome, LockOutcome::Granted);
        }
        _ => panic!("Bad response"),
    }

    // B queues behind it.
    send(
        &mut tx_b,
        serialize_lock_request(&LockRequest::waiting(key.clone(), 1_000)),
    )
    .await;
    match recv(&mut rx_b).await {
        SerializedMessage::LockResp(response) => {
            assert_eq!(response.outcome, LockOutcome::Pending);
        }
        _ => panic!("Bad response"),
    }

    // A releases: the authority runs the handshake with B inline, so A's
    // reply arrives only after B has been served (or discarded).
    send(&mut tx_a, serialize_unlock_request(&UnlockRequest { key: key.clone() })).await;

    match recv(&mut rx_b).await {
        SerializedMessage::Offer(offer) => assert_eq!(offer.key, key),
        _ => panic!("Bad response"),
    }
    send(&mut tx_b, serialize_accept(&OfferAccept { key: key.clone() })).await;
    match recv(&mut rx_b).await {
        SerializedMessage::Confirmed(confirmed) => assert_eq!(confirmed.key, key),
        _ => panic!("Bad response"),
    }

    match recv(&mut rx_a).await {
        SerializedMessage::UnlockResp(response) => {
            assert_eq!(response.outcome, UnlockOutcome::Released);
        }
        _ => panic!("Bad response"),
    }

    // The key changed hands.
    send(&mut tx_b, serialize_stats_request(&StatsRequest)).await;
    match recv(&mut rx_b).await {
        SerializedMessage::StatsResp(stats) => {
            assert_eq!(stats.locks, 1);
            assert_eq!(stats.clients, 2);
            assert_eq!(stats.watches, 2);
        }
        _ => panic!("Bad response"),
    }
}

#[tokio::test]
async fn test_fire_and_forget_requests_send_no_reply() {
    let server = init_server();
    let key = dbg_key("r1");

    let (channel, (mut tx, mut rx)) = TestChannel::new();
    let inner = server.clone();
    tokio::spawn(async move {
        inner.handle_messages(channel).await;
    });

    send(&mut tx, serialize_lock_request(&LockRequest::immediate(key.clone()))).await;
    match recv(&mut rx).await {
        SerializedMessage::LockResp(response) => {
            assert_eq!(response.outcome, LockOutcome::Granted);
        }
        _ => panic!("Bad response"),
    }

    // Neither of these produces a reply frame; the next frame we read must
    // be the stats response.
    send(&mut tx, serialize_unlock_all_request(&UnlockAllRequest)).await;
    send(&mut tx, serialize_reset_request(&ResetRequest)).await;
    send(&mut tx, serialize_stats_request(&StatsRequest)).await;
    match recv(&mut rx).await {
        SerializedMessage::StatsResp(stats) => {
            assert_eq!(stats.locks, 0);
            assert_eq!(stats.clients, 1);
        }
        _ => panic!("Bad response"),
    }
}
