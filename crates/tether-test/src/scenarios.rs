//! Protocol scenarios
//!
//! Each test drives two real parties (or one party and a [`RawPeer`]) and
//! checks a property that only shows up across the process boundary.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tether_bridge::{DataBridge, FlatMap};
use tether_core::{RequestId, TetherError, WireValue, WireWriter};
use tether_model::{Call, Member, Model, Origin, Property};
use tether_runtime::{
    Dispatcher, EditorActions, EditorEndpoint, EditorInfo, LinkState, OpenFileArgs, Session,
    TetherConfig, ToolController, WatchMode,
};
use tether_wire::{Frame, OperationKind};

use crate::harness::{entity_id, eventually, LinkedPair, RawPeer};

const WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// MODELS
// ============================================================================

#[derive(Default)]
struct Counter {
    value: Property<u32>,
}

impl Model for Counter {
    fn members(&self) -> Vec<(&'static str, Member<'_>)> {
        vec![("value", Member::Entity(self.value.entity()))]
    }
}

#[derive(Default)]
struct Calls {
    slow: Call<u32, u32>,
    fast: Call<u32, u32>,
}

impl Model for Calls {
    fn members(&self) -> Vec<(&'static str, Member<'_>)> {
        vec![
            ("slow", Member::Entity(self.slow.entity())),
            ("fast", Member::Entity(self.fast.entity())),
        ]
    }
}

#[derive(Default)]
struct Switch {
    play: Property<bool>,
}

impl Model for Switch {
    fn members(&self) -> Vec<(&'static str, Member<'_>)> {
        vec![("play", Member::Entity(self.play.entity()))]
    }
}

fn ok_reply<T: WireValue>(value: &T) -> Bytes {
    let mut w = WireWriter::new();
    w.write_u8(0);
    value.write(&mut w);
    w.finish()
}

fn change_counter<T: WireValue>(property: &Property<T>) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    property.advise_changes(move |_| {
        c.fetch_add(1, Ordering::SeqCst);
    });
    count
}

// ============================================================================
// PROPERTY
// ============================================================================

#[tokio::test]
async fn property_last_write_wins_across_link() {
    let left = Arc::new(Counter::default());
    let right = Arc::new(Counter::default());
    let seen = change_counter(&right.value);
    let pair = LinkedPair::establish("counter", left.clone(), right.clone())
        .await
        .unwrap();

    for v in [1, 2, 3] {
        left.value.set(v).unwrap();
    }

    assert!(eventually(WAIT, || right.value.get() == Some(3)).await);
    // Give stragglers a chance to show up
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(right.value.get(), Some(3));
    assert!(seen.load(Ordering::SeqCst) <= 3);
    // Received values are not echoed back
    assert_eq!(left.value.version(), 3);

    pair.teardown().await;
}

#[tokio::test]
async fn inbound_frames_last_write_wins() {
    let model = Arc::new(Counter::default());
    let seen = change_counter(&model.value);
    let (session, _dispatcher, mut peer) =
        RawPeer::attach("counter", model.clone()).await.unwrap();
    let id = entity_id("counter", &["value"]);

    for v in [1u32, 2, 3] {
        peer.send(&Frame::property_set(id, v.encode())).unwrap();
    }

    assert!(eventually(WAIT, || model.value.get() == Some(3)).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(model.value.get(), Some(3));
    assert!(seen.load(Ordering::SeqCst) <= 3);
    assert_eq!(model.value.origin(), Origin::Remote);
    // Nothing is echoed to the writer
    assert!(peer.recv(Duration::from_millis(50)).await.unwrap().is_none());
    assert_eq!(session.stats().frames_in, 3);
}

#[tokio::test]
async fn local_and_inbound_writes_interleave() {
    let model = Arc::new(Counter::default());
    let (_session, _dispatcher, mut peer) =
        RawPeer::attach("counter", model.clone()).await.unwrap();
    let id = entity_id("counter", &["value"]);

    model.value.set(1).unwrap();
    let out = peer
        .recv_kind(OperationKind::PropertySet, WAIT)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(u32::decode(&out.payload).unwrap(), 1);

    peer.send(&Frame::property_set(id, 2u32.encode())).unwrap();
    assert!(eventually(WAIT, || model.value.get() == Some(2)).await);

    // Writing back what the peer just sent is not a change
    model.value.set(2).unwrap();
    model.value.set(3).unwrap();
    let out = peer
        .recv_kind(OperationKind::PropertySet, WAIT)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(u32::decode(&out.payload).unwrap(), 3);
    assert_eq!(model.value.get(), Some(3));
    assert_eq!(model.value.version(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_writers_converge_across_link() {
    let left = Arc::new(Counter::default());
    let right = Arc::new(Counter::default());
    left.value.advise_changes(|_| std::thread::yield_now());
    let pair = LinkedPair::establish("counter", left.clone(), right.clone())
        .await
        .unwrap();

    let writers: Vec<_> = (0..2u32)
        .map(|t| {
            let value = left.value.clone();
            tokio::task::spawn_blocking(move || {
                for i in 0..200u32 {
                    value.set(i * 2 + t).unwrap();
                }
            })
        })
        .collect();
    for writer in writers {
        writer.await.unwrap();
    }

    let stored = left.value.get();
    assert!(stored.is_some());
    assert!(eventually(WAIT, || right.value.get() == stored).await);
    pair.right_dispatcher.flush().await.unwrap();
    assert_eq!(right.value.get(), stored);

    pair.teardown().await;
}

// ============================================================================
// CALL
// ============================================================================

#[tokio::test]
async fn call_responses_matched_by_request_id() {
    let model = Arc::new(Calls::default());
    let (_session, _dispatcher, mut peer) = RawPeer::attach("calls", model.clone()).await.unwrap();

    let first = model.fast.clone();
    let first = tokio::spawn(async move { first.start(10, WAIT).await });
    let req_a = peer
        .recv_kind(OperationKind::CallRequest, WAIT)
        .await
        .unwrap()
        .unwrap();

    let second = model.fast.clone();
    let second = tokio::spawn(async move { second.start(20, WAIT).await });
    let req_b = peer
        .recv_kind(OperationKind::CallRequest, WAIT)
        .await
        .unwrap()
        .unwrap();

    assert_ne!(req_a.op().request_id(), req_b.op().request_id());

    // Answer in reverse order
    for req in [&req_b, &req_a] {
        let n = u32::decode(&req.payload).unwrap();
        peer.send(&Frame::call_response(
            req.entity(),
            req.op().request_id(),
            ok_reply(&(n * 2)),
        ))
        .unwrap();
    }

    assert_eq!(first.await.unwrap().unwrap(), 20);
    assert_eq!(second.await.unwrap().unwrap(), 40);
    assert_eq!(model.fast.pending(), 0);
}

#[tokio::test]
async fn call_timeout_leaves_other_calls_alone() {
    let model = Arc::new(Calls::default());
    let (session, _dispatcher, mut peer) = RawPeer::attach("calls", model.clone()).await.unwrap();

    let slow = model.slow.clone();
    let started = Instant::now();
    let slow = tokio::spawn(async move {
        let outcome = slow.start(1, Duration::from_millis(50)).await;
        (outcome, started.elapsed())
    });
    let fast = model.fast.clone();
    let fast = tokio::spawn(async move { fast.start(2, WAIT).await });

    let mut requests = Vec::new();
    while requests.len() < 2 {
        let frame = peer
            .recv_kind(OperationKind::CallRequest, WAIT)
            .await
            .unwrap()
            .unwrap();
        requests.push(frame);
    }

    let (outcome, elapsed) = slow.await.unwrap();
    assert!(matches!(outcome, Err(TetherError::Timeout { .. })));
    assert!(elapsed >= Duration::from_millis(50));
    assert_eq!(model.slow.pending(), 0);

    let fast_id = entity_id("calls", &["fast"]);
    for req in &requests {
        // The late answer to the timed out request is dropped quietly
        peer.send(&Frame::call_response(
            req.entity(),
            req.op().request_id(),
            ok_reply(&7u32),
        ))
        .unwrap();
    }
    assert_eq!(fast.await.unwrap().unwrap(), 7);
    assert!(requests.iter().any(|r| r.entity() == fast_id));
    assert_eq!(session.stats().decode_failures, 0);
}

#[tokio::test]
async fn call_without_handler_fails_fast() {
    let left = Arc::new(Calls::default());
    let right = Arc::new(Calls::default());
    right.fast.set_handler(|n| n + 1);
    let pair = LinkedPair::establish("calls", left.clone(), right.clone())
        .await
        .unwrap();

    assert_eq!(left.fast.start(41, WAIT).await.unwrap(), 42);
    let err = left.slow.start(1, WAIT).await.unwrap_err();
    assert!(matches!(err, TetherError::RemoteFailure(_)));

    pair.teardown().await;
    assert_eq!(
        left.fast.start(1, WAIT).await.unwrap_err(),
        TetherError::NotBound
    );
}

// ============================================================================
// SESSION EXCLUSIVITY
// ============================================================================

#[tokio::test]
async fn stale_frames_never_reach_the_new_session() {
    let model = Arc::new(Counter::default());
    let (dispatcher, _task) = Dispatcher::spawn();
    let id = entity_id("counter", &["value"]);

    let (a1, b1) = tether_transport::pair();
    let old = Session::establish(1, a1, &dispatcher, "counter", model.clone(), Vec::new())
        .await
        .unwrap();
    let old_peer = RawPeer::new(b1);

    old.teardown(&dispatcher, Vec::new()).await;
    assert_eq!(old.entity_count(), 0);
    assert!(!model.value.is_bound());

    let (a2, b2) = tether_transport::pair();
    let new = Session::establish(2, a2, &dispatcher, "counter", model.clone(), Vec::new())
        .await
        .unwrap();
    let new_peer = RawPeer::new(b2);
    assert!(new.is_bound(id));

    let stale = Frame::property_set(id, 99u32.encode());
    assert_eq!(
        old.handle_frame(stale.serialize().unwrap()),
        Err(TetherError::TransportClosed)
    );
    let _ = old_peer.send(&stale);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(model.value.get(), None);

    new_peer
        .send(&Frame::property_set(id, 7u32.encode()))
        .unwrap();
    assert!(eventually(WAIT, || model.value.get() == Some(7)).await);
    assert!(old.stats().unrouted >= 1);
}

// ============================================================================
// BRIDGE
// ============================================================================

#[tokio::test]
async fn bridge_does_not_ping_pong() {
    let left = Arc::new(Switch::default());
    let right = Arc::new(Switch::default());
    let pair = LinkedPair::establish("switch", left.clone(), right.clone())
        .await
        .unwrap();

    let map = FlatMap::new();
    let bridge = DataBridge::new(map.clone());
    bridge.bind_property("UNITY_Play", &right.play);
    let notified = change_counter(&right.play);
    let upserts = Arc::new(Mutex::new(Vec::new()));
    let u = upserts.clone();
    map.watch(move |change| u.lock().push((change.key.clone(), change.new.clone())));

    left.play.set(true).unwrap();
    assert!(eventually(WAIT, || map.get("UNITY_Play").as_deref() == Some("true")).await);

    // Re-observing the same value is not a change
    assert!(!bridge.on_external_change("UNITY_Play", "true"));
    assert!(!map.set("UNITY_Play", "true"));
    assert_eq!(notified.load(Ordering::SeqCst), 1);
    assert_eq!(
        *upserts.lock(),
        vec![("UNITY_Play".to_string(), "true".to_string())]
    );

    // And the other direction, through the right side's dispatcher
    let m = map.clone();
    pair.right_dispatcher
        .invoke(move || m.set("UNITY_Play", "false"))
        .await
        .unwrap();
    assert!(eventually(WAIT, || left.play.get() == Some(false)).await);
    assert_eq!(notified.load(Ordering::SeqCst), 2);

    pair.teardown().await;
}

// ============================================================================
// END TO END
// ============================================================================

#[derive(Default)]
struct OpenAnything {
    opened: Mutex<Vec<String>>,
}

impl EditorActions for OpenAnything {
    fn open_file(&self, args: &OpenFileArgs) -> bool {
        self.opened.lock().push(args.path.clone());
        true
    }
}

fn editor_info(version: &str) -> EditorInfo {
    EditorInfo {
        plugin_version: env!("CARGO_PKG_VERSION").to_string(),
        application_path: "/opt/editor".to_string(),
        application_version: version.to_string(),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn discovery_drives_reconnect_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = TetherConfig::for_project(dir.path());
    config.watch_mode = WatchMode::Poll;
    config.debounce = Duration::from_millis(30);
    config.poll_interval = Duration::from_millis(25);

    let (tool_dispatcher, _task) = Dispatcher::spawn();
    let map = FlatMap::new();
    let actions = Arc::new(OpenAnything::default());
    let tool = ToolController::new(config.clone(), map.clone(), tool_dispatcher, actions.clone())
        .unwrap();
    let link = tool.start().unwrap();
    let mut transitions = link.link.transitions();

    // No discovery file yet: nothing happens
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(link.watcher.events().borrow().is_none());
    assert_eq!(link.link.state(), LinkState::Idle);

    let (editor_dispatcher, _task) = Dispatcher::spawn();
    let first = EditorEndpoint::start(&config, editor_dispatcher.clone(), editor_info("2022.3"))
        .await
        .unwrap();

    let active = tokio::time::timeout(WAIT, link.link.wait_for(|s| s.is_active()))
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(active, LinkState::Active { port, .. } if port == first.port()));
    assert_eq!(
        transitions.recv().await.unwrap().to,
        LinkState::Connecting { port: first.port() }
    );
    assert!(transitions.recv().await.unwrap().to.is_active());

    let pid = std::process::id() as i32;
    assert!(eventually(WAIT, || first.model().tool_process_id.get() == Some(pid)).await);
    assert_eq!(map.get("UNITY_SessionInitialized").as_deref(), Some("true"));
    assert!(
        eventually(WAIT, || tool.model().application_version.get().as_deref()
            == Some("2022.3"))
        .await
    );

    // A second editor takes over the discovery file
    let second = EditorEndpoint::start(&config, editor_dispatcher, editor_info("2023.1"))
        .await
        .unwrap();
    let second_port = second.port();
    tokio::time::timeout(
        WAIT,
        link.link
            .wait_for(|s| matches!(s, LinkState::Active { port, .. } if *port == second_port)),
    )
    .await
    .unwrap()
    .unwrap();

    assert!(eventually(WAIT, || first.current_session().is_none()).await);
    assert!(!first.model().open_file_line_col.is_bound());
    assert!(eventually(WAIT, || second.model().tool_process_id.get() == Some(pid)).await);
    assert!(
        eventually(WAIT, || tool.model().application_version.get().as_deref()
            == Some("2023.1"))
        .await
    );

    let opened = second
        .open_file(OpenFileArgs {
            path: "Assets/Scripts/Player.cs".into(),
            line: 3,
            col: 0,
        })
        .await
        .unwrap();
    assert!(opened);
    assert_eq!(*actions.opened.lock(), vec!["Assets/Scripts/Player.cs".to_string()]);
    assert!(eventually(WAIT, || map.get("UNITY_ActivateRider").as_deref() == Some("true")).await);

    link.shutdown().await;
    second.shutdown().await;
    first.shutdown().await;
}

#[tokio::test]
async fn request_ids_are_session_unique() {
    let model = Arc::new(Calls::default());
    let (_session, _dispatcher, mut peer) = RawPeer::attach("calls", model.clone()).await.unwrap();

    let mut seen = Vec::<RequestId>::new();
    for call in [&model.fast, &model.slow, &model.fast] {
        let call = call.clone();
        tokio::spawn(async move { call.start(0, Duration::from_millis(100)).await });
        let frame = peer
            .recv_kind(OperationKind::CallRequest, WAIT)
            .await
            .unwrap()
            .unwrap();
        assert!(!seen.contains(&frame.op().request_id()));
        seen.push(frame.op().request_id());
    }
}
