// Copyright (c) 2022, Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use warden_core::authority::*;
use warden_network::network::NetworkServer;
use warden_network::transport::*;
use warden_types::{base_types::*, error::*, messages::*, serialize::*};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::io;
use tokio::sync::{mpsc, oneshot};
use tracing::*;

#[cfg(test)]
#[path = "unit_tests/server_tests.rs"]
mod server_tests;

pub struct Server {
    network: NetworkServer,
    state: AuthorityState,
}

impl Server {
    pub fn new(
        base_address: String,
        base_port: u16,
        state: AuthorityState,
        buffer_size: usize,
    ) -> Self {
        Self {
            network: NetworkServer::new(base_address, base_port, buffer_size),
            state,
        }
    }

    pub async fn spawn(self) -> Result<SpawnedServer, io::Error> {
        info!(
            "Listening to TCP traffic on {}:{}",
            self.network.base_address, self.network.base_port
        );
        let address = format!("{}:{}", self.network.base_address, self.network.base_port);
        let buffer_size = self.network.buffer_size;

        // Launch the authority loop, then the network front end.
        let authority = AuthorityCore::spawn(self.state);
        let state = RunningServerState {
            network: self.network,
            authority,
        };
        spawn_server(&address, state, buffer_size).await
    }
}

struct RunningServerState {
    network: NetworkServer,
    authority: AuthorityHandle,
}

/// An offer forwarded to the client and not yet claimed: the key and the
/// authority's reply address for that handoff attempt.
type PendingOffer = Option<(LockKey, oneshot::Sender<()>)>;

#[async_trait]
impl<'a, Stream> MessageHandler<Stream> for RunningServerState
where
    Stream: 'static + RwChannel<'a> + Unpin + Send,
{
    async fn handle_messages(&self, mut channel: Stream) {
        // The connection is the session: everything read from this channel
        // carries the session id below, and the push channel is where the
        // authority delivers handoff messages for it.
        let (tx_push, mut rx_push) = mpsc::unbounded_channel();
        let session = match self
            .authority
            .open_session(SessionHandle::new(tx_push))
            .await
        {
            Ok(session) => session,
            Err(_) => return,
        };

        let mut pending_offer: PendingOffer = None;
        loop {
            tokio::select! {
                frame = channel.stream().next() => {
                    let buffer = match frame {
                        Some(Ok(buffer)) => buffer,
                        Some(Err(error)) => {
                            warn!("Error while reading TCP stream: {}", error);
                            break;
                        }
                        None => {
                            debug!("Connection dropped by the client");
                            break;
                        }
                    };
                    let reply = match self
                        .handle_one_message(session, &buffer, &mut pending_offer)
                        .await
                    {
                        Ok(reply) => reply,
                        Err(error) => {
                            error!("Authority unavailable: {}", error);
                            break;
                        }
                    };
                    if let Some(reply) = reply {
                        if let Err(error) = channel.sink().send(Bytes::from(reply)).await {
                            error!("Failed to send query response: {}", error);
                            break;
                        }
                    }
                }
                Some(push) = rx_push.recv() => {
                    let frame = Self::forward_push(push, &mut pending_offer);
                    if channel.sink().send(Bytes::from(frame)).await.is_err() {
                        debug!("Failed to push handoff message to client");
                        break;
                    }
                }
            }
        }

        // Liveness watch trigger: the connection is gone, tell the authority
        // so it can reclaim this session's locks and identity.
        let _ = self.authority.session_closed(session).await;
    }
}

impl RunningServerState {
    async fn handle_one_message(
        &self,
        session: SessionId,
        buffer: &[u8],
        pending_offer: &mut PendingOffer,
    ) -> WardenResult<Option<Vec<u8>>> {
        let reply = match deserialize_message(buffer) {
            Err(_) => {
                self.network.increment_user_errors();
                Some(serialize_error(&WardenError::InvalidDecoding))
            }
            Ok(message) => self.dispatch(session, message, pending_offer).await?,
        };

        self.network.increment_packets_processed();
        if self.network.packets_processed() % 5000 == 0 {
            info!(
                "{}:{} has processed {} packets",
                self.network.base_address,
                self.network.base_port,
                self.network.packets_processed()
            );
        }
        Ok(reply)
    }

    async fn dispatch(
        &self,
        session: SessionId,
        message: SerializedMessage,
        pending_offer: &mut PendingOffer,
    ) -> WardenResult<Option<Vec<u8>>> {
        match message {
            SerializedMessage::IdentityReq(_) => {
                let response = self.authority.identity(session).await?;
                Ok(Some(serialize_identity_response(&response)))
            }
            SerializedMessage::LockReq(request) => {
                let response = self.authority.lock(session, *request).await?;
                Ok(Some(serialize_lock_response(&response)))
            }
            SerializedMessage::UnlockReq(request) => {
                let response = self.authority.unlock(session, *request).await?;
                Ok(Some(serialize_unlock_response(&response)))
            }
            SerializedMessage::UnlockAll(_) => {
                self.authority.unlock_all(session).await?;
                Ok(None)
            }
            SerializedMessage::StatsReq(_) => {
                let response = self.authority.stats(session).await?;
                Ok(Some(serialize_stats_response(&response)))
            }
            SerializedMessage::Reset(_) => {
                self.authority.reset().await?;
                Ok(None)
            }
            // The accept leg of the handoff handshake bypasses the request
            // queue: the authority is blocked inside the handshake, and its
            // reply address travels on the pending offer.
            SerializedMessage::Accept(accept) => {
                match pending_offer.take() {
                    Some((key, accept_tx)) if key == accept.key => {
                        let _ = accept_tx.send(());
                    }
                    other => {
                        debug!(key = %accept.key, "Accept without a matching offer");
                        *pending_offer = other;
                    }
                }
                Ok(None)
            }
            _ => {
                self.network.increment_user_errors();
                Ok(Some(serialize_error(&WardenError::UnexpectedMessage)))
            }
        }
    }

    fn forward_push(push: SessionPush, pending_offer: &mut PendingOffer) -> Vec<u8> {
        match push {
            SessionPush::Offer { key, accept } => {
                let frame = serialize_offer(&LockOffer { key: key.clone() });
                // A newer offer supersedes any unclaimed one; the authority
                // already gave up on the old attempt.
                *pending_offer = Some((key, accept));
                frame
            }
            SessionPush::Confirmed { key } => serialize_confirmed(&OfferConfirmed { key }),
        }
    }
}
