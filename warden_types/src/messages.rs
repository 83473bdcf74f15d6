// Copyright (c) 2022, Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::base_types::*;

use serde::{Deserialize, Serialize};

#[cfg(test)]
#[path = "unit_tests/messages_tests.rs"]
mod messages_tests;

/// Wait deadlines are bounded by what a timer can represent; anything larger
/// is clamped down to this.
pub const MAX_WAIT_MILLIS: u64 = u32::MAX as u64;

/// Ask the authority for the caller's locker id, allocating one on first
/// contact.
#[derive(Eq, PartialEq, Clone, Debug, Serialize, Deserialize)]
pub struct IdentityRequest;

#[derive(Eq, PartialEq, Clone, Debug, Serialize, Deserialize)]
pub struct IdentityResponse {
    pub locker: LockerId,
}

/// Try to acquire `key`. Without `wait` the attempt is immediate; with
/// `wait` the caller is queued on contention and gets a `Pending` reply,
/// then drives the wait leg on its own connection.
#[derive(Eq, PartialEq, Clone, Debug, Serialize, Deserialize)]
pub struct LockRequest {
    pub key: LockKey,
    pub wait: Option<u64>,
}

impl LockRequest {
    pub fn immediate(key: LockKey) -> Self {
        Self { key, wait: None }
    }

    pub fn waiting(key: LockKey, wait_millis: u64) -> Self {
        Self {
            key,
            wait: Some(wait_millis.min(MAX_WAIT_MILLIS)),
        }
    }
}

/// Outcome of a lock attempt. The authority replies `Granted`, `HeldByOther`
/// or `Pending`; `TimedOut` is produced by the client driver when its wait
/// leg exhausts the caller's deadline.
#[derive(Eq, PartialEq, Copy, Clone, Debug, Hash, Serialize, Deserialize)]
pub enum LockOutcome {
    Granted,
    HeldByOther,
    Pending,
    TimedOut,
}

#[derive(Eq, PartialEq, Clone, Debug, Serialize, Deserialize)]
pub struct LockResponse {
    pub key: LockKey,
    pub outcome: LockOutcome,
}

#[derive(Eq, PartialEq, Clone, Debug, Serialize, Deserialize)]
pub struct UnlockRequest {
    pub key: LockKey,
}

#[derive(Eq, PartialEq, Copy, Clone, Debug, Hash, Serialize, Deserialize)]
pub enum UnlockOutcome {
    Released,
    /// The key is held, but not by the caller. State is left unchanged.
    NotYours,
    /// The key is not held at all.
    NotLocked,
}

#[derive(Eq, PartialEq, Clone, Debug, Serialize, Deserialize)]
pub struct UnlockResponse {
    pub key: LockKey,
    pub outcome: UnlockOutcome,
}

/// Release every key held by the caller's session. Fire and forget: the
/// authority sends no reply.
#[derive(Eq, PartialEq, Clone, Debug, Serialize, Deserialize)]
pub struct UnlockAllRequest;

#[derive(Eq, PartialEq, Clone, Debug, Serialize, Deserialize)]
pub struct StatsRequest;

#[derive(Eq, PartialEq, Copy, Clone, Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    pub clients: usize,
    pub locks: usize,
    pub watches: usize,
}

/// Administrative full-state reset. Fire and forget; used for recovery and
/// testing.
#[derive(Eq, PartialEq, Clone, Debug, Serialize, Deserialize)]
pub struct ResetRequest;

// Side-channel handoff handshake, exchanged directly between the authority
// and one waiting session outside the request/reply surface.

/// The authority offers a released key to the next queued waiter.
#[derive(Eq, PartialEq, Clone, Debug, Serialize, Deserialize)]
pub struct LockOffer {
    pub key: LockKey,
}

/// The waiter claims an offered key. Must arrive within the authority's
/// grace period or the waiter is discarded as dead.
#[derive(Eq, PartialEq, Clone, Debug, Serialize, Deserialize)]
pub struct OfferAccept {
    pub key: LockKey,
}

/// The authority confirms the transfer; the key is now held by the waiter.
#[derive(Eq, PartialEq, Clone, Debug, Serialize, Deserialize)]
pub struct OfferConfirmed {
    pub key: LockKey,
}
