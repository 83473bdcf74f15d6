// Copyright (c) 2022, Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use warden_types::{base_types::*, error::*, messages::*};

#[cfg(test)]
#[path = "unit_tests/authority_tests.rs"]
pub mod authority_tests;

/// How long the authority waits for an offered waiter to claim a key before
/// discarding it as dead. Deliberately short: each dead waiter encountered
/// during a release costs one grace period.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(50);

/// Messages the authority pushes to one session outside the request/reply
/// surface: the handoff side channel.
#[derive(Debug)]
pub enum SessionPush {
    /// A released key is offered to this session. The accept channel is the
    /// reply address for this handoff attempt.
    Offer {
        key: LockKey,
        accept: oneshot::Sender<()>,
    },
    /// The offered key is now held by this session.
    Confirmed { key: LockKey },
}

/// The authority's handle on one connected session: where side-channel
/// messages for that session are delivered. The connection task holds the
/// receiving end; a closed channel means the session is gone.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    push: mpsc::UnboundedSender<SessionPush>,
}

impl SessionHandle {
    pub fn new(push: mpsc::UnboundedSender<SessionPush>) -> Self {
        Self { push }
    }

    fn send(&self, message: SessionPush) -> Result<(), mpsc::error::SendError<SessionPush>> {
        self.push.send(message)
    }
}

/// Requests processed by the authority loop, one at a time.
#[derive(Debug)]
pub enum AuthorityRequest {
    OpenSession {
        handle: SessionHandle,
        reply: oneshot::Sender<SessionId>,
    },
    Identity {
        session: SessionId,
        reply: oneshot::Sender<IdentityResponse>,
    },
    Lock {
        session: SessionId,
        request: LockRequest,
        reply: oneshot::Sender<LockResponse>,
    },
    Unlock {
        session: SessionId,
        request: UnlockRequest,
        reply: oneshot::Sender<UnlockResponse>,
    },
    UnlockAll {
        session: SessionId,
    },
    Stats {
        session: SessionId,
        reply: oneshot::Sender<StatsResponse>,
    },
    Reset,
    SessionClosed {
        session: SessionId,
    },
}

/// The authority state encapsulates all lock coordination state. All access
/// goes through `AuthorityCore`, which owns the only instance; handlers take
/// `&mut self` and are serialized by construction.
pub struct AuthorityState {
    /// Next session id handed to an opening connection.
    next_session: SessionId,
    /// Next locker id the registry will allocate.
    next_locker: LockerId,
    /// Push channel of every open connection, registered or not.
    sessions: HashMap<SessionId, SessionHandle>,
    /// Registry, forward direction: session -> locker id.
    lockers: HashMap<SessionId, LockerId>,
    /// Registry, reverse direction: locker id -> session.
    owners: HashMap<LockerId, SessionId>,
    /// Sessions under liveness watch; exactly the registered ones.
    watches: HashSet<SessionId>,
    /// Key -> current holder. At most one holder per key.
    lock_table: HashMap<LockKey, LockerId>,
    /// Holder -> held keys, in acquisition order. No empty entries.
    holdings: HashMap<LockerId, Vec<LockKey>>,
    /// Key -> sessions waiting for it, FIFO. Drained queues are pruned.
    waiters: HashMap<LockKey, VecDeque<SessionId>>,
    grace_period: Duration,
}

impl AuthorityState {
    pub fn new(grace_period: Duration) -> Self {
        Self {
            next_session: SessionId::default(),
            next_locker: LockerId::default(),
            sessions: HashMap::new(),
            lockers: HashMap::new(),
            owners: HashMap::new(),
            watches: HashSet::new(),
            lock_table: HashMap::new(),
            holdings: HashMap::new(),
            waiters: HashMap::new(),
            grace_period,
        }
    }

    pub async fn handle_request(&mut self, request: AuthorityRequest) {
        match request {
            AuthorityRequest::OpenSession { handle, reply } => {
                let _ = reply.send(self.open_session(handle));
            }
            AuthorityRequest::Identity { session, reply } => {
                let _ = reply.send(self.handle_identity(session));
            }
            AuthorityRequest::Lock {
                session,
                request,
                reply,
            } => {
                let _ = reply.send(self.handle_lock(session, request));
            }
            AuthorityRequest::Unlock {
                session,
                request,
                reply,
            } => {
                let response = self.handle_unlock(session, request).await;
                let _ = reply.send(response);
            }
            AuthorityRequest::UnlockAll { session } => {
                self.handle_unlock_all(session).await;
            }
            AuthorityRequest::Stats { session, reply } => {
                let _ = reply.send(self.handle_stats(session));
            }
            AuthorityRequest::Reset => self.handle_reset(),
            AuthorityRequest::SessionClosed { session } => {
                self.handle_session_closed(session).await;
            }
        }
    }

    /// Register a new connection and hand it a session id. Ids count up and
    /// are never reused.
    pub fn open_session(&mut self, handle: SessionHandle) -> SessionId {
        let session = self.next_session;
        self.next_session = self.next_session.increment();
        self.sessions.insert(session, handle);
        debug!(%session, "Session opened");
        session
    }

    /// Look up the locker id of a session, allocating one and establishing
    /// the liveness watch on first sight. Total: never fails.
    fn resolve(&mut self, session: SessionId) -> LockerId {
        if let Some(locker) = self.lockers.get(&session) {
            return *locker;
        }
        let locker = self.next_locker;
        self.next_locker = self.next_locker.increment();
        self.lockers.insert(session, locker);
        self.owners.insert(locker, session);
        self.watches.insert(session);
        debug!(%session, %locker, "Registered new locker");
        locker
    }

    /// Drop both registry directions and the watch record of a session.
    /// Only called from session-termination handling; calling it for an
    /// unregistered session is a defect, not a user error.
    fn deregister(&mut self, session: SessionId) {
        let locker = self
            .lockers
            .remove(&session)
            .expect("deregister called for an unregistered session");
        let owner = self.owners.remove(&locker);
        assert_eq!(owner, Some(session), "registry maps diverged");
        self.watches.remove(&session);
        debug!(%session, %locker, "Deregistered");
    }

    pub fn handle_identity(&mut self, session: SessionId) -> IdentityResponse {
        IdentityResponse {
            locker: self.resolve(session),
        }
    }

    pub fn handle_lock(&mut self, session: SessionId, request: LockRequest) -> LockResponse {
        let locker = self.resolve(session);
        let LockRequest { key, wait } = request;
        let outcome = match self.lock_table.get(&key) {
            // Idempotent re-acquisition by the current holder.
            Some(holder) if *holder == locker => LockOutcome::Granted,
            Some(_) => {
                if wait.is_none() {
                    LockOutcome::HeldByOther
                } else {
                    // Queue the session; its own deadline governs the wait.
                    // No timer is armed here.
                    self.waiters
                        .entry(key.clone())
                        .or_default()
                        .push_back(session);
                    debug!(%key, %session, "Queued waiter");
                    LockOutcome::Pending
                }
            }
            None => {
                self.grant(key.clone(), locker);
                LockOutcome::Granted
            }
        };
        LockResponse { key, outcome }
    }

    pub async fn handle_unlock(
        &mut self,
        session: SessionId,
        request: UnlockRequest,
    ) -> UnlockResponse {
        let locker = self.resolve(session);
        let UnlockRequest { key } = request;
        let outcome = match self.lock_table.get(&key) {
            None => UnlockOutcome::NotLocked,
            Some(holder) if *holder != locker => UnlockOutcome::NotYours,
            Some(_) => {
                self.hand_off(key.clone(), locker).await;
                UnlockOutcome::Released
            }
        };
        UnlockResponse { key, outcome }
    }

    /// Release every key held by the session, in acquisition order, running
    /// the handoff for each. A session with no holdings is a no-op.
    pub async fn handle_unlock_all(&mut self, session: SessionId) {
        let locker = self.resolve(session);
        let held = self.holdings.remove(&locker).unwrap_or_default();
        for key in held {
            self.hand_off(key, locker).await;
        }
    }

    pub fn handle_stats(&mut self, session: SessionId) -> StatsResponse {
        // Stats calls register their caller like any other request.
        self.resolve(session);
        assert_eq!(
            self.lockers.len(),
            self.owners.len(),
            "registry forward/reverse maps diverged"
        );
        StatsResponse {
            clients: self.lockers.len(),
            locks: self.lock_table.len(),
            watches: self.watches.len(),
        }
    }

    /// Administrative full-state reset. Open connections survive and the id
    /// counters are not rewound: ids are never reused.
    pub fn handle_reset(&mut self) {
        info!("Administrative reset: clearing all lock state");
        self.lockers.clear();
        self.owners.clear();
        self.watches.clear();
        self.lock_table.clear();
        self.holdings.clear();
        self.waiters.clear();
    }

    /// The session's connection is gone. For a registered session this is
    /// equivalent to an unlock-all followed by deregistration, as a single
    /// serialized step; a session that never talked to the registry only
    /// loses its push handle.
    pub async fn handle_session_closed(&mut self, session: SessionId) {
        // Drop the handle first so the handoff below does not offer keys
        // back to the dying session.
        self.sessions.remove(&session);
        if self.watches.contains(&session) {
            debug!(%session, "Watched session terminated; reclaiming its locks");
            self.handle_unlock_all(session).await;
            self.deregister(session);
        }
        // Waiter-queue entries of this session are left in place; the
        // handoff discard path cleans them up lazily.
    }

    /// Record a key as held: the single grant path shared by fresh
    /// acquisition and handoff.
    fn grant(&mut self, key: LockKey, locker: LockerId) {
        let previous = self.lock_table.insert(key.clone(), locker);
        debug_assert!(previous.is_none(), "grant of a held key");
        debug!(%key, %locker, "Granted");
        self.holdings.entry(locker).or_default().push(key);
    }

    fn clear_holding(&mut self, locker: LockerId, key: &LockKey) {
        if let Some(held) = self.holdings.get_mut(&locker) {
            held.retain(|k| k != key);
            if held.is_empty() {
                self.holdings.remove(&locker);
            }
        }
    }

    fn pop_waiter(&mut self, key: &LockKey) -> Option<SessionId> {
        let waiter = self.waiters.get_mut(key)?.pop_front();
        if self.waiters.get(key).map_or(false, VecDeque::is_empty) {
            self.waiters.remove(key);
        }
        waiter
    }

    /// Transfer a relinquished key to the next live waiter, or leave it
    /// unheld. Runs inline: the authority serves no other request while the
    /// handshake is in flight, and every silent waiter encountered costs one
    /// grace period before being discarded. No retry limit; in the worst
    /// case the whole queue drains this way.
    async fn hand_off(&mut self, key: LockKey, holder: LockerId) {
        self.lock_table.remove(&key);
        self.clear_holding(holder, &key);

        loop {
            let waiter = match self.pop_waiter(&key) {
                Some(waiter) => waiter,
                None => {
                    debug!(%key, "No waiters; key now unheld");
                    return;
                }
            };

            let (accept_tx, accept_rx) = oneshot::channel();
            let offered = match self.sessions.get(&waiter) {
                // A session with no connection left is known dead: skip it
                // without burning a grace period.
                None => Err(()),
                Some(handle) => handle
                    .send(SessionPush::Offer {
                        key: key.clone(),
                        accept: accept_tx,
                    })
                    .map_err(|_| ()),
            };
            if offered.is_err() {
                debug!(%key, %waiter, "Waiter is gone; discarding");
                continue;
            }

            match timeout(self.grace_period, accept_rx).await {
                Ok(Ok(())) => {
                    let locker = self.resolve(waiter);
                    self.grant(key.clone(), locker);
                    if let Some(handle) = self.sessions.get(&waiter) {
                        let _ = handle.send(SessionPush::Confirmed { key: key.clone() });
                    }
                    debug!(%key, %waiter, "Handoff complete");
                    return;
                }
                _ => {
                    // Grace expired, or the accept channel was dropped
                    // unfired. Either way the waiter is treated as dead.
                    debug!(%key, %waiter, "Offer not claimed in time; discarding waiter");
                }
            }
        }
    }

    #[cfg(test)]
    pub fn waiter_queue_len(&self, key: &LockKey) -> Option<usize> {
        self.waiters.get(key).map(VecDeque::len)
    }

    #[cfg(test)]
    pub fn holdings_of(&self, locker: LockerId) -> Vec<LockKey> {
        self.holdings.get(&locker).cloned().unwrap_or_default()
    }

    #[cfg(test)]
    pub fn holder_of(&self, key: &LockKey) -> Option<LockerId> {
        self.lock_table.get(key).copied()
    }

    /// Check every documented invariant of the state machine.
    #[cfg(test)]
    pub fn assert_invariants(&self) {
        for (key, locker) in &self.lock_table {
            let held = self.holdings.get(locker);
            assert!(
                held.map_or(false, |keys| keys.contains(key)),
                "{key} held by {locker} but missing from its holdings"
            );
        }
        for (locker, held) in &self.holdings {
            assert!(!held.is_empty(), "empty holdings entry for {locker}");
            for key in held {
                assert_eq!(self.lock_table.get(key), Some(locker));
            }
        }
        assert_eq!(self.lockers.len(), self.owners.len());
        for (session, locker) in &self.lockers {
            assert_eq!(self.owners.get(locker), Some(session));
            assert!(self.watches.contains(session), "{session} has no watch");
        }
        assert_eq!(self.watches.len(), self.lockers.len());
        for (key, queue) in &self.waiters {
            assert!(!queue.is_empty(), "empty waiter queue kept for {key}");
        }
    }
}

/// The single serialization point: owns the state and drains one request
/// channel. Exactly one request (or session event, or nested handoff step)
/// runs at a time.
pub struct AuthorityCore {
    state: AuthorityState,
    rx_request: mpsc::Receiver<AuthorityRequest>,
}

impl AuthorityCore {
    pub fn new(state: AuthorityState, rx_request: mpsc::Receiver<AuthorityRequest>) -> Self {
        Self { state, rx_request }
    }

    /// Spawn the authority loop and return the handle used to talk to it.
    pub fn spawn(state: AuthorityState) -> AuthorityHandle {
        let (tx_request, rx_request) = mpsc::channel(1_000);
        let core = Self::new(state, rx_request);
        tokio::spawn(core.run());
        AuthorityHandle { tx_request }
    }

    /// Main loop serializing all requests against the state.
    pub async fn run(mut self) {
        while let Some(request) = self.rx_request.recv().await {
            self.state.handle_request(request).await;
        }
        debug!("Authority loop terminated");
    }
}

/// Cheaply clonable client of the authority loop. One per connection task.
#[derive(Clone)]
pub struct AuthorityHandle {
    tx_request: mpsc::Sender<AuthorityRequest>,
}

impl AuthorityHandle {
    async fn send(&self, request: AuthorityRequest) -> WardenResult {
        self.tx_request
            .send(request)
            .await
            .map_err(|_| WardenError::AuthorityShutdown)
    }

    async fn ask<T>(
        &self,
        request: AuthorityRequest,
        reply: oneshot::Receiver<T>,
    ) -> WardenResult<T> {
        self.send(request).await?;
        reply.await.map_err(|_| WardenError::AuthorityShutdown)
    }

    pub async fn open_session(&self, handle: SessionHandle) -> WardenResult<SessionId> {
        let (reply, rx) = oneshot::channel();
        self.ask(AuthorityRequest::OpenSession { handle, reply }, rx)
            .await
    }

    pub async fn identity(&self, session: SessionId) -> WardenResult<IdentityResponse> {
        let (reply, rx) = oneshot::channel();
        self.ask(AuthorityRequest::Identity { session, reply }, rx)
            .await
    }

    pub async fn lock(&self, session: SessionId, request: LockRequest) -> WardenResult<LockResponse> {
        let (reply, rx) = oneshot::channel();
        self.ask(
            AuthorityRequest::Lock {
                session,
                request,
                reply,
            },
            rx,
        )
        .await
    }

    pub async fn unlock(
        &self,
        session: SessionId,
        request: UnlockRequest,
    ) -> WardenResult<UnlockResponse> {
        let (reply, rx) = oneshot::channel();
        self.ask(
            AuthorityRequest::Unlock {
                session,
                request,
                reply,
            },
            rx,
        )
        .await
    }

    pub async fn unlock_all(&self, session: SessionId) -> WardenResult {
        self.send(AuthorityRequest::UnlockAll { session }).await
    }

    pub async fn stats(&self, session: SessionId) -> WardenResult<StatsResponse> {
        let (reply, rx) = oneshot::channel();
        self.ask(AuthorityRequest::Stats { session, reply }, rx)
            .await
    }

    pub async fn reset(&self) -> WardenResult {
        self.send(AuthorityRequest::Reset).await
    }

    pub async fn session_closed(&self, session: SessionId) -> WardenResult {
        if let Err(error) = self.send(AuthorityRequest::SessionClosed { session }).await {
            warn!("Could not deliver session-closed event: {}", error);
            return Err(error);
        }
        Ok(())
    }
}
