// Copyright (c) 2022, Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;
use tokio::time::sleep;
use warden::server_lib::Server;
use warden_core::authority::AuthorityState;
use warden_core::client::LockClient;
use warden_network::network::{NetworkClient, PortAllocator};
use warden_types::base_types::LockKey;
use warden_types::messages::{LockOutcome, UnlockOutcome};

const GRACE: Duration = Duration::from_millis(50);
const BUFFER_SIZE: usize = 65_000;

async fn spawn_test_authority(base_port: u16) -> (NetworkClient, warden_network::transport::SpawnedServer) {
    let port = PortAllocator::new(base_port)
        .next_port()
        .expect("no free port");
    let state = AuthorityState::new(GRACE);
    let server = Server::new("127.0.0.1".to_string(), port, state, BUFFER_SIZE);
    let spawned = server.spawn().await.unwrap();
    let network = NetworkClient::new(
        "127.0.0.1".to_string(),
        port,
        BUFFER_SIZE,
        Duration::from_secs(4),
        Duration::from_secs(4),
    );
    (network, spawned)
}

#[tokio::test]
async fn test_contention_then_handoff() {
    let (network, _server) = spawn_test_authority(9600).await;
    let key = LockKey::from("r1");

    let mut a = LockClient::connect(&network).await.unwrap();
    assert_eq!(a.lock(key.clone()).await.unwrap(), LockOutcome::Granted);

    // B asks with a wait budget and blocks in its wait leg.
    let mut b = LockClient::connect(&network).await.unwrap();
    let waited_key = key.clone();
    let waiter = tokio::spawn(async move {
        let outcome = b
            .lock_wait(waited_key, Duration::from_millis(1_000))
            .await
            .unwrap();
        (b, outcome)
    });

    // Give B time to enqueue, then release.
    sleep(Duration::from_millis(100)).await;
    assert_eq!(a.unlock(key.clone()).await.unwrap(), UnlockOutcome::Released);

    let (mut b, outcome) = waiter.await.unwrap();
    assert_eq!(outcome, LockOutcome::Granted);

    // The key moved, not vanished: one lock, two known clients.
    let stats = b.stats().await.unwrap();
    assert_eq!(stats.locks, 1);
    assert_eq!(stats.clients, 2);
    assert_eq!(stats.watches, 2);
}

#[tokio::test]
async fn test_dead_waiter_is_discarded() {
    let (network, _server) = spawn_test_authority(9620).await;
    let key = LockKey::from("r1");

    let mut a = LockClient::connect(&network).await.unwrap();
    assert_eq!(a.lock(key.clone()).await.unwrap(), LockOutcome::Granted);

    // B queues, then its connection dies before any offer arrives.
    let mut b = LockClient::connect(&network).await.unwrap();
    let waited_key = key.clone();
    let waiter = tokio::spawn(async move {
        let _ = b.lock_wait(waited_key, Duration::from_secs(5)).await;
    });
    sleep(Duration::from_millis(100)).await;
    waiter.abort();
    let _ = waiter.await;
    // Let the authority observe the close.
    sleep(Duration::from_millis(100)).await;

    // The release discards the dead waiter and the key becomes unheld.
    assert_eq!(a.unlock(key.clone()).await.unwrap(), UnlockOutcome::Released);

    // A latecomer acquires immediately.
    let mut c = LockClient::connect(&network).await.unwrap();
    assert_eq!(c.lock(key.clone()).await.unwrap(), LockOutcome::Granted);

    let stats = c.stats().await.unwrap();
    assert_eq!(stats.locks, 1);
    // B's identity is gone; only A and C remain.
    assert_eq!(stats.clients, 2);
}

#[tokio::test]
async fn test_session_death_reclaims_held_keys() {
    let (network, _server) = spawn_test_authority(9640).await;
    let r1 = LockKey::from("r1");
    let r2 = LockKey::from("r2");

    let mut a = LockClient::connect(&network).await.unwrap();
    assert_eq!(a.lock(r1.clone()).await.unwrap(), LockOutcome::Granted);
    assert_eq!(a.lock(r2.clone()).await.unwrap(), LockOutcome::Granted);

    let mut observer = LockClient::connect(&network).await.unwrap();
    let stats = observer.stats().await.unwrap();
    assert_eq!(stats.locks, 2);
    assert_eq!(stats.clients, 2);

    // A dies with both keys held.
    drop(a);
    sleep(Duration::from_millis(200)).await;

    let stats = observer.stats().await.unwrap();
    assert_eq!(stats.locks, 0);
    assert_eq!(stats.clients, 1);

    // Both keys are acquirable again.
    assert_eq!(observer.lock(r1).await.unwrap(), LockOutcome::Granted);
    assert_eq!(observer.lock(r2).await.unwrap(), LockOutcome::Granted);
}

#[tokio::test]
async fn test_wait_timeout_leaves_ghost_waiter() {
    let (network, _server) = spawn_test_authority(9660).await;
    let key = LockKey::from("r1");

    let mut a = LockClient::connect(&network).await.unwrap();
    assert_eq!(a.lock(key.clone()).await.unwrap(), LockOutcome::Granted);

    // B gives up before A releases, but stays connected.
    let mut b = LockClient::connect(&network).await.unwrap();
    assert_eq!(
        b.lock_wait(key.clone(), Duration::from_millis(200))
            .await
            .unwrap(),
        LockOutcome::TimedOut
    );

    // B is still queued; the release offers it the key, B ignores the
    // stale offer, and after the grace period the key becomes unheld.
    assert_eq!(a.unlock(key.clone()).await.unwrap(), UnlockOutcome::Released);

    // B's next request skips the stale offer frame and succeeds.
    assert_eq!(b.lock(key.clone()).await.unwrap(), LockOutcome::Granted);
}

#[tokio::test]
async fn test_unlock_misuse_over_the_wire() {
    let (network, _server) = spawn_test_authority(9680).await;
    let key = LockKey::from("r1");

    let mut a = LockClient::connect(&network).await.unwrap();
    let mut b = LockClient::connect(&network).await.unwrap();

    assert_eq!(b.unlock(key.clone()).await.unwrap(), UnlockOutcome::NotLocked);

    assert_eq!(a.lock(key.clone()).await.unwrap(), LockOutcome::Granted);
    assert_eq!(b.unlock(key.clone()).await.unwrap(), UnlockOutcome::NotYours);

    // Still held by A.
    assert_eq!(b.lock(key.clone()).await.unwrap(), LockOutcome::HeldByOther);
}

#[tokio::test]
async fn test_identity_is_per_session() {
    let (network, _server) = spawn_test_authority(9700).await;

    let mut a = LockClient::connect(&network).await.unwrap();
    let mut b = LockClient::connect(&network).await.unwrap();

    let id_a = a.identity().await.unwrap();
    let id_b = b.identity().await.unwrap();
    assert_ne!(id_a, id_b);
    // Stable across calls on the same session.
    assert_eq!(a.identity().await.unwrap(), id_a);
}

#[tokio::test]
async fn test_unlock_all_and_reset() {
    let (network, _server) = spawn_test_authority(9720).await;
    let r1 = LockKey::from("r1");
    let r2 = LockKey::from("r2");

    let mut a = LockClient::connect(&network).await.unwrap();
    assert_eq!(a.lock(r1.clone()).await.unwrap(), LockOutcome::Granted);
    assert_eq!(a.lock(r2.clone()).await.unwrap(), LockOutcome::Granted);

    // Fire and forget; give the authority a moment to process.
    a.unlock_all().await.unwrap();
    sleep(Duration::from_millis(100)).await;
    let stats = a.stats().await.unwrap();
    assert_eq!(stats.locks, 0);

    // Idempotent on a session with nothing held.
    a.unlock_all().await.unwrap();

    assert_eq!(a.lock(r1.clone()).await.unwrap(), LockOutcome::Granted);
    a.reset().await.unwrap();
    sleep(Duration::from_millis(100)).await;
    let stats = a.stats().await.unwrap();
    assert_eq!(stats.locks, 0);
    assert_eq!(stats.clients, 1);
}
