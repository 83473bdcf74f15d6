// Copyright (c) 2022, Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::debug;
use warden_network::network::NetworkClient;
use warden_network::transport::TcpDataStream;
use warden_types::{base_types::*, error::*, messages::*, serialize::*, wd_ensure};

/// Client of the lock authority. Holds one persistent connection: the
/// connection IS the session, so dropping the client releases every lock it
/// holds once the authority notices the close.
pub struct LockClient {
    stream: TcpDataStream,
}

impl LockClient {
    pub async fn connect(network: &NetworkClient) -> WardenResult<Self> {
        let stream = network
            .connect_for_stream()
            .await
            .map_err(|error| WardenError::ClientIoError {
                error: format!("{error}"),
            })?;
        Ok(Self { stream })
    }

    async fn write(&mut self, buf: &[u8]) -> WardenResult {
        self.stream
            .write_data(buf)
            .await
            .map_err(|error| WardenError::ClientIoError {
                error: format!("{error}"),
            })
    }

    async fn read_message(&mut self) -> WardenResult<SerializedMessage> {
        match self.stream.read_data().await {
            None => Err(WardenError::ClientIoError {
                error: "Connection closed by authority.".to_string(),
            }),
            Some(Err(error)) => Err(WardenError::ClientIoError {
                error: format!("{error}"),
            }),
            Some(Ok(data)) => deserialize_message(&data).map_err(|_| WardenError::InvalidDecoding),
        }
    }

    /// Send one request and wait for its reply. Handoff side-channel frames
    /// may interleave with replies; outside a wait leg they are stale (for
    /// example an offer for a key whose wait already timed out) and are
    /// deliberately ignored rather than accepted.
    async fn request(&mut self, buf: Vec<u8>) -> WardenResult<SerializedMessage> {
        self.write(&buf).await?;
        loop {
            match self.read_message().await? {
                SerializedMessage::Offer(offer) => {
                    debug!(key = %offer.key, "Ignoring stale offer");
                }
                SerializedMessage::Confirmed(confirmed) => {
                    debug!(key = %confirmed.key, "Ignoring stale confirmation");
                }
                SerializedMessage::Error(error) => return Err(*error),
                message => return Ok(message),
            }
        }
    }

    pub async fn identity(&mut self) -> WardenResult<LockerId> {
        match self
            .request(serialize_identity_request(&IdentityRequest))
            .await?
        {
            SerializedMessage::IdentityResp(response) => Ok(response.locker),
            _ => Err(WardenError::UnexpectedMessage),
        }
    }

    /// Immediate attempt: `Granted` or `HeldByOther`, never a wait.
    pub async fn lock(&mut self, key: LockKey) -> WardenResult<LockOutcome> {
        let request = LockRequest::immediate(key.clone());
        let response = self.lock_request(&request).await?;
        wd_ensure!(response.key == key, WardenError::UnexpectedMessage);
        Ok(response.outcome)
    }

    /// Acquire with a deadline. On contention the authority queues us and
    /// replies `Pending`; we then wait on our own connection for the handoff
    /// handshake. The final outcome is `Granted` or `TimedOut`.
    pub async fn lock_wait(&mut self, key: LockKey, wait: Duration) -> WardenResult<LockOutcome> {
        let wait_millis = u64::try_from(wait.as_millis())
            .unwrap_or(MAX_WAIT_MILLIS)
            .min(MAX_WAIT_MILLIS);
        let deadline = Instant::now() + Duration::from_millis(wait_millis);

        let request = LockRequest::waiting(key.clone(), wait_millis);
        let response = self.lock_request(&request).await?;
        wd_ensure!(response.key == key, WardenError::UnexpectedMessage);
        match response.outcome {
            LockOutcome::Pending => self.wait_for_handoff(key, deadline).await,
            outcome => Ok(outcome),
        }
    }

    async fn lock_request(&mut self, request: &LockRequest) -> WardenResult<LockResponse> {
        match self.request(serialize_lock_request(request)).await? {
            SerializedMessage::LockResp(response) => Ok(*response),
            _ => Err(WardenError::UnexpectedMessage),
        }
    }

    /// The wait leg: watch for an offer of `key`, claim it, then wait for
    /// the confirmation, all bounded by the caller's deadline. Timing out
    /// does NOT dequeue us on the authority side; if an offer arrives much
    /// later it will find nobody listening and the authority discards us
    /// after its grace period.
    async fn wait_for_handoff(
        &mut self,
        key: LockKey,
        deadline: Instant,
    ) -> WardenResult<LockOutcome> {
        loop {
            let message = match timeout_at(deadline, self.read_message()).await {
                Err(_elapsed) => {
                    debug!(%key, "Wait exhausted; reporting timeout");
                    return Ok(LockOutcome::TimedOut);
                }
                Ok(result) => result?,
            };
            match message {
                SerializedMessage::Offer(offer) if offer.key == key => {
                    self.write(&serialize_accept(&OfferAccept { key: key.clone() }))
                        .await?;
                }
                SerializedMessage::Confirmed(confirmed) if confirmed.key == key => {
                    return Ok(LockOutcome::Granted);
                }
                other => {
                    debug!(?other, "Skipping frame while waiting for handoff");
                }
            }
        }
    }

    pub async fn unlock(&mut self, key: LockKey) -> WardenResult<UnlockOutcome> {
        let request = UnlockRequest { key: key.clone() };
        match self.request(serialize_unlock_request(&request)).await? {
            SerializedMessage::UnlockResp(response) => {
                wd_ensure!(response.key == key, WardenError::UnexpectedMessage);
                Ok(response.outcome)
            }
            _ => Err(WardenError::UnexpectedMessage),
        }
    }

    /// Fire and forget: the authority releases everything we hold and sends
    /// no reply.
    pub async fn unlock_all(&mut self) -> WardenResult {
        self.write(&serialize_unlock_all_request(&UnlockAllRequest))
            .await
    }

    pub async fn stats(&mut self) -> WardenResult<StatsResponse> {
        match self.request(serialize_stats_request(&StatsRequest)).await? {
            SerializedMessage::StatsResp(response) => Ok(*response),
            _ => Err(WardenError::UnexpectedMessage),
        }
    }

    /// Administrative full-state reset. Fire and forget.
    pub async fn reset(&mut self) -> WardenResult {
        self.write(&serialize_reset_request(&ResetRequest)).await
    }
}
