// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(missing_docs)]
#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use vireo_dry_tests::{CounterView, RecordingTransport};
use vireo_session::{
    spawn_sweeper, MemoryTtlStore, Registry, RegistryError, Session, SessionConfig, Transport,
    TransportError, TtlStore,
};

fn session(id: &str) -> Arc<Session> {
    Session::new(id, CounterView::default(), SessionConfig::default())
}

#[test]
fn stealing_a_connection_unbinds_the_previous_session() {
    let reg = Registry::with_memory_ttl(Duration::from_secs(60));
    reg.put(session("a"));
    reg.put(session("b"));
    let ta = Arc::new(RecordingTransport::live());
    let tb = Arc::new(RecordingTransport::live());

    reg.attach("a", "conn", ta.clone()).unwrap();
    reg.attach("b", "conn", tb.clone()).unwrap();

    assert!(ta.is_closed());
    assert!(!tb.is_closed());
    assert!(reg.get("a").unwrap().transport().is_none());
    let (owner, _) = reg.lookup_by_connection("conn").unwrap();
    assert_eq!(owner.id(), "b");
}

#[test]
fn detach_keeps_the_session_for_a_reconnect() {
    let reg = Registry::with_memory_ttl(Duration::from_secs(60));
    reg.put(session("s"));
    let first = Arc::new(RecordingTransport::live());
    reg.attach("s", "c1", first.clone()).unwrap();
    reg.detach("c1").unwrap();
    assert_eq!(first.close_count(), 1);

    let second = Arc::new(RecordingTransport::live());
    let s = reg.attach("s", "c2", second.clone()).unwrap();
    s.navigate("/again").unwrap();
    assert_eq!(second.sends().len(), 1);
    assert!(first.sends().is_empty());
}

#[test]
fn failing_close_does_not_block_a_rebind() {
    let reg = Registry::with_memory_ttl(Duration::from_secs(60));
    reg.put(session("s"));
    let stubborn = Arc::new(RecordingTransport::live());
    stubborn.set_close_failure(Some(TransportError::Backpressure));
    reg.attach("s", "c1", stubborn.clone()).unwrap();

    let next = Arc::new(RecordingTransport::live());
    let s = reg.attach("s", "c2", next.clone()).unwrap();
    assert_eq!(stubborn.close_count(), 1);
    s.navigate("/next").unwrap();
    assert_eq!(next.sends().len(), 1);
    assert!(stubborn.sends().is_empty());
}

#[test]
fn connection_binding_outlives_a_session_side_unbind() {
    let reg = Registry::with_memory_ttl(Duration::from_secs(60));
    reg.put(session("s"));
    let t = Arc::new(RecordingTransport::live());
    reg.attach("s", "c1", t).unwrap();
    // Unbinding through the session leaves the registry entry intact.
    reg.get("s").unwrap().set_transport(None);
    assert!(reg.lookup_by_connection("c1").is_ok());

    reg.detach("c1").unwrap();
    assert_eq!(
        reg.lookup_by_connection("c1").err(),
        Some(RegistryError::MissingConnection("c1".into()))
    );
}

#[test]
fn idle_sessions_are_swept_with_their_transports() {
    let reg = Registry::with_memory_ttl(Duration::from_secs(3600));
    let idle = Session::new(
        "idle",
        CounterView::default(),
        SessionConfig {
            idle_timeout: Some(Duration::from_secs(10)),
            ..SessionConfig::default()
        },
    );
    reg.put(idle.clone());
    reg.put(session("busy"));
    let t = Arc::new(RecordingTransport::live());
    reg.attach("idle", "c1", t.clone()).unwrap();

    let swept = reg.sweep_expired(Instant::now() + Duration::from_secs(11));
    assert_eq!(swept, vec!["idle".to_string()]);
    assert!(idle.is_closed());
    assert!(t.is_closed());
    assert!(t.send("frame", "patch", &Value::Null).is_err());
    assert!(reg.get("busy").is_some());
}

#[test]
fn activity_keeps_a_session_alive() {
    let store = Arc::new(MemoryTtlStore::new());
    let reg = Registry::new(store.clone(), Duration::from_secs(30));
    let s = session("s");
    reg.put(s.clone());
    reg.attach("s", "c1", Arc::new(RecordingTransport::live())).unwrap();

    // A zero refresh clears the record, so only touch() can bring it back.
    store.touch("s", Duration::ZERO);
    assert!(store.expires_at("s").is_none());
    s.touch();
    let deadline = store.expires_at("s").unwrap();
    assert!(reg.sweep_expired(deadline - Duration::from_millis(1)).is_empty());
    assert_eq!(reg.sweep_expired(deadline), vec!["s".to_string()]);
    assert!(reg.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sweeper_evicts_expired_sessions_until_shut_down() {
    let reg = Arc::new(Registry::with_memory_ttl(Duration::from_millis(20)));
    reg.put(session("short"));
    let handle = spawn_sweeper(Arc::clone(&reg), Duration::from_millis(10));

    let deadline = Instant::now() + Duration::from_secs(5);
    while !reg.is_empty() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(reg.is_empty());

    assert!(!handle.is_finished());
    handle.shutdown().await;
    reg.put(session("after"));
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(reg.len(), 1);
}
