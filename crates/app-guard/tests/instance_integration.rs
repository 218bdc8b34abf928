//! Integration tests for AppGuard.
//!
//! Every test runs several engines inside one process. The lock is taken
//! per open file description, so two engines in one process contend
//! exactly like two processes would.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use app_guard::{
    AppGuard, Frame, GuardConfig, GuardError, InstanceRole, ListenerState, NoopFocuser, Platform,
    SystemProcessIdentity,
};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(2);

// ============================================================================
// Test Helpers
// ============================================================================

/// A runtime directory plus a factory for engines sharing it.
struct TestBus {
    _temp_dir: TempDir,
    config: GuardConfig,
}

impl TestBus {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let mut config = GuardConfig::with_runtime_dir(temp_dir.path());
        config.notify_primary = false;
        Self {
            _temp_dir: temp_dir,
            config,
        }
    }

    fn with_notifications(mut self) -> Self {
        self.config.notify_primary = true;
        self
    }

    fn engine(&self) -> AppGuard {
        let platform = Platform::new(Arc::new(NoopFocuser), Arc::new(SystemProcessIdentity));
        AppGuard::with_platform(self.config.clone(), platform)
    }

    async fn primary(&self, handle: &str) -> AppGuard {
        let guard = self.engine();
        let role = guard.init(handle, || {}, false).await.expect("init primary");
        assert_eq!(role, InstanceRole::Primary);
        guard
    }

    async fn secondary(&self, handle: &str) -> AppGuard {
        let guard = self.engine();
        let role = guard.init(handle, || {}, false).await.expect("init secondary");
        assert_eq!(role, InstanceRole::Secondary);
        guard
    }
}

/// Registers a callback that forwards every frame into a channel.
async fn collect(guard: &AppGuard, handle: &str) -> mpsc::UnboundedReceiver<Frame> {
    let (tx, rx) = mpsc::unbounded_channel();
    guard
        .register_msg(handle, move |frame| {
            let _ = tx.send(frame.clone());
        })
        .await
        .expect("register");
    rx
}

async fn next_frame(rx: &mut mpsc::UnboundedReceiver<Frame>) -> Frame {
    timeout(WAIT, rx.recv())
        .await
        .expect("frame not delivered in time")
        .expect("callback channel closed")
}

// ============================================================================
// Arbitration Tests
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_init_yields_exactly_one_primary() {
    let bus = TestBus::new();
    let engines: Vec<AppGuard> = (0..8).map(|_| bus.engine()).collect();

    let mut tasks = Vec::new();
    for guard in engines.clone() {
        tasks.push(tokio::spawn(async move {
            guard.init("race", || {}, false).await.unwrap()
        }));
    }

    let mut roles = Vec::new();
    for task in tasks {
        roles.push(task.await.unwrap());
    }

    let primaries = roles.iter().filter(|r| r.is_primary()).count();
    let secondaries = roles.iter().filter(|r| r.is_secondary()).count();
    assert_eq!(primaries, 1);
    assert_eq!(secondaries, 7);

    for guard in engines {
        guard.release().await;
    }
}

#[tokio::test]
async fn test_dropped_primary_lets_next_instance_win() {
    let bus = TestBus::new();

    {
        let crashed = bus.primary("editor").await;
        bus.secondary("editor").await.release().await;
        drop(crashed);
    }

    let next = bus.primary("editor").await;
    assert!(next.is_primary_instance().await.unwrap());
    next.release().await;
}

#[tokio::test]
async fn test_released_primary_lets_next_instance_win() {
    let bus = TestBus::new();

    let first = bus.primary("editor").await;
    first.release().await;

    let second = bus.primary("editor").await;
    second.release().await;
}

#[tokio::test]
async fn test_independent_handles_each_get_a_primary() {
    let bus = TestBus::new();

    let a = bus.primary("app-a").await;
    let b = bus.primary("app-b").await;

    a.release().await;
    b.release().await;
}

#[tokio::test]
async fn test_primary_pid_is_recorded() {
    let bus = TestBus::new();
    let primary = bus.primary("pid").await;
    let secondary = bus.secondary("pid").await;

    assert_eq!(secondary.primary_pid().await.unwrap(), Some(std::process::id()));

    primary.release().await;
    secondary.release().await;
}

// ============================================================================
// Lifecycle Tests
// ============================================================================

#[tokio::test]
async fn test_guarded_operations_before_init() {
    let bus = TestBus::new();
    let guard = bus.engine();

    assert!(!guard.is_loaded().await);
    assert!(matches!(guard.is_primary_instance().await, Err(GuardError::NotLoaded)));
    assert!(matches!(
        guard.register_msg("open", |_| {}).await,
        Err(GuardError::NotLoaded)
    ));
    assert!(matches!(
        guard.unregister_msg(app_guard::MessageId::FIRST).await,
        Err(GuardError::NotLoaded)
    ));
    assert!(matches!(
        guard.send_msg_request("open", None).await,
        Err(GuardError::NotLoaded)
    ));
    assert!(matches!(guard.focus_window("x").await, Err(GuardError::NotLoaded)));
    assert!(matches!(guard.get_process_id().await, Err(GuardError::NotLoaded)));
    assert!(matches!(guard.subscribe().await, Err(GuardError::NotLoaded)));
}

#[tokio::test]
async fn test_double_init_fails() {
    let bus = TestBus::new();
    let guard = bus.primary("twice").await;

    let err = guard.init("twice", || {}, false).await.unwrap_err();
    assert!(matches!(err, GuardError::AlreadyInitialized));
    assert!(guard.is_primary_instance().await.unwrap());

    guard.release().await;
}

#[tokio::test]
async fn test_release_is_idempotent() {
    let bus = TestBus::new();
    let guard = bus.engine();

    // Not loaded yet
    guard.release().await;

    guard.init("idem", || {}, false).await.unwrap();
    guard.release().await;
    guard.release().await;

    assert!(!guard.is_loaded().await);
    assert!(matches!(guard.is_primary_instance().await, Err(GuardError::NotLoaded)));
}

#[tokio::test]
async fn test_reinit_after_release() {
    let bus = TestBus::new();
    let guard = bus.primary("again").await;
    guard.release().await;

    let role = guard.init("again", || {}, false).await.unwrap();
    assert_eq!(role, InstanceRole::Primary);
    guard.release().await;
}

#[tokio::test]
async fn test_release_stops_listener_and_removes_socket() {
    let bus = TestBus::new();
    let guard = bus.primary("sock").await;
    let socket = bus.config.socket_path(&guard.handle().await.unwrap());

    assert!(socket.exists());
    assert_eq!(
        guard.listener_state().await.unwrap(),
        Some(ListenerState::Listening)
    );

    let mut state = guard.watch_listener_state().await.unwrap().unwrap();
    guard.release().await;
    assert!(!socket.exists());
    assert_eq!(*state.borrow_and_update(), ListenerState::Stopped);
}

#[tokio::test]
async fn test_release_with_stalled_client_is_prompt() {
    let bus = TestBus::new();
    let guard = bus.primary("stalled").await;
    let socket = bus.config.socket_path(&guard.handle().await.unwrap());

    // A local client that connects and never writes
    let _stalled = tokio::net::UnixStream::connect(&socket).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = std::time::Instant::now();
    guard.release().await;

    assert!(
        started.elapsed() < bus.config.drain_timeout(),
        "release waited for the stalled client"
    );
    assert!(!socket.exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_release_from_another_task_during_dispatch() {
    let bus = TestBus::new();
    let primary = bus.primary("cross").await;
    let socket = bus.config.socket_path(&primary.handle().await.unwrap());
    let mut state = primary.watch_listener_state().await.unwrap().unwrap();

    let (entered_tx, mut entered_rx) = mpsc::unbounded_channel();
    let finished = Arc::new(AtomicUsize::new(0));
    let done = Arc::clone(&finished);
    primary
        .register_msg("work", move |_| {
            let _ = entered_tx.send(());
            std::thread::sleep(Duration::from_millis(200));
            done.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .unwrap();

    let secondary = bus.secondary("cross").await;
    secondary.send_msg_request("work", None).await.unwrap();
    timeout(WAIT, entered_rx.recv()).await.unwrap().unwrap();

    // The callback is still running while another task releases
    let releaser = primary.clone();
    tokio::spawn(async move { releaser.release().await })
        .await
        .unwrap();

    assert_eq!(finished.load(Ordering::SeqCst), 1, "in-flight frame was not drained");
    assert_eq!(*state.borrow_and_update(), ListenerState::Stopped);
    assert!(!socket.exists());
    assert!(!primary.is_loaded().await);

    secondary.release().await;
}

#[tokio::test]
async fn test_quit_immediate_invokes_on_quit_for_secondary_only() {
    let bus = TestBus::new();
    let quits = Arc::new(AtomicUsize::new(0));

    let primary = bus.engine();
    let q = Arc::clone(&quits);
    let role = primary
        .init("quit", move || { q.fetch_add(1, Ordering::SeqCst); }, true)
        .await
        .unwrap();
    assert_eq!(role, InstanceRole::Primary);
    assert_eq!(quits.load(Ordering::SeqCst), 0);

    let secondary = bus.engine();
    let q = Arc::clone(&quits);
    let role = secondary
        .init("quit", move || { q.fetch_add(1, Ordering::SeqCst); }, true)
        .await
        .unwrap();
    assert_eq!(role, InstanceRole::Secondary);
    assert_eq!(quits.load(Ordering::SeqCst), 1);
    assert!(secondary.is_loaded().await);

    secondary.release().await;
    primary.release().await;
}

#[tokio::test]
async fn test_quit_immediate_without_reachable_primary() {
    let bus = TestBus::new().with_notifications();

    // Hold the claim without a listener so the notification cannot land.
    let handle = app_guard::ApplicationHandle::new("orphan").unwrap();
    let _claim = app_guard::claim::ExclusiveClaim::acquire(&bus.config.runtime_dir, &handle).unwrap();

    let quits = Arc::new(AtomicUsize::new(0));
    let q = Arc::clone(&quits);
    let guard = bus.engine();
    let role = guard
        .init("orphan", move || { q.fetch_add(1, Ordering::SeqCst); }, true)
        .await
        .unwrap();

    assert_eq!(role, InstanceRole::Secondary);
    assert_eq!(quits.load(Ordering::SeqCst), 1);
    guard.release().await;
}

// ============================================================================
// Messaging Tests
// ============================================================================

#[tokio::test]
async fn test_message_delivered_exactly_once() {
    let bus = TestBus::new();
    let primary = bus.primary("msg").await;
    let mut rx = collect(&primary, "open").await;

    let secondary = bus.secondary("msg").await;
    secondary.send_msg_request("open", Some("X")).await.unwrap();

    let frame = next_frame(&mut rx).await;
    assert_eq!(frame.handle, "open");
    assert_eq!(frame.payload.as_deref(), Some("X"));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rx.try_recv().is_err(), "callback fired more than once");

    secondary.release().await;
    primary.release().await;
}

#[tokio::test]
async fn test_same_handle_registrations_fire_in_order() {
    let bus = TestBus::new();
    let primary = bus.primary("order").await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    for label in ["first", "second"] {
        let tx = tx.clone();
        primary
            .register_msg("open", move |_| {
                let _ = tx.send(label);
            })
            .await
            .unwrap();
    }

    let secondary = bus.secondary("order").await;
    secondary.send_msg_request("open", None).await.unwrap();

    assert_eq!(timeout(WAIT, rx.recv()).await.unwrap(), Some("first"));
    assert_eq!(timeout(WAIT, rx.recv()).await.unwrap(), Some("second"));

    secondary.release().await;
    primary.release().await;
}

#[tokio::test]
async fn test_unregistered_callback_does_not_fire() {
    let bus = TestBus::new();
    let primary = bus.primary("unreg").await;

    let removed = Arc::new(AtomicUsize::new(0));
    let r = Arc::clone(&removed);
    let id = primary
        .register_msg("open", move |_| {
            r.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .unwrap();
    let mut witness = collect(&primary, "open").await;

    assert!(primary.unregister_msg(id).await.unwrap());
    assert!(!primary.unregister_msg(id).await.unwrap());

    let secondary = bus.secondary("unreg").await;
    secondary.send_msg_request("open", Some("p")).await.unwrap();

    next_frame(&mut witness).await;
    assert_eq!(removed.load(Ordering::SeqCst), 0);

    secondary.release().await;
    primary.release().await;
}

#[tokio::test]
async fn test_send_without_primary_is_channel_unavailable() {
    let bus = TestBus::new();
    let handle = app_guard::ApplicationHandle::new("nobody").unwrap();
    let _claim = app_guard::claim::ExclusiveClaim::acquire(&bus.config.runtime_dir, &handle).unwrap();

    let secondary = bus.secondary("nobody").await;
    let err = secondary.send_msg_request("open", Some("x")).await.unwrap_err();
    assert!(matches!(err, GuardError::ChannelUnavailable { .. }));

    // The sender's own state is untouched.
    assert!(secondary.is_loaded().await);
    secondary.release().await;
}

#[tokio::test]
async fn test_payload_with_delimiters_round_trips() {
    let bus = TestBus::new();
    let primary = bus.primary("payload").await;
    let mut rx = collect(&primary, "open").await;
    let secondary = bus.secondary("payload").await;

    let payload = "a\0b\nc\r\n\u{0}\u{0}\u{0}\u{4}|\"}{ünï©ødé";
    secondary.send_msg_request("open", Some(payload)).await.unwrap();
    assert_eq!(next_frame(&mut rx).await.payload.as_deref(), Some(payload));

    secondary.send_msg_request("open", Some("")).await.unwrap();
    assert_eq!(next_frame(&mut rx).await.payload.as_deref(), Some(""));

    secondary.send_msg_request("open", None).await.unwrap();
    assert_eq!(next_frame(&mut rx).await.payload, None);

    secondary.release().await;
    primary.release().await;
}

#[tokio::test]
async fn test_primary_can_message_itself() {
    let bus = TestBus::new();
    let primary = bus.primary("self").await;
    let mut rx = collect(&primary, "ping").await;

    primary.send_msg_request("ping", Some("me")).await.unwrap();
    assert_eq!(next_frame(&mut rx).await.payload.as_deref(), Some("me"));

    primary.release().await;
}

#[tokio::test]
async fn test_panicking_callback_does_not_block_the_next() {
    let bus = TestBus::new();
    let primary = bus.primary("panic").await;
    primary
        .register_msg("open", |_| panic!("callback failure"))
        .await
        .unwrap();
    let mut rx = collect(&primary, "open").await;

    let secondary = bus.secondary("panic").await;
    secondary.send_msg_request("open", Some("1")).await.unwrap();
    secondary.send_msg_request("open", Some("2")).await.unwrap();

    assert_eq!(next_frame(&mut rx).await.payload.as_deref(), Some("1"));
    assert_eq!(next_frame(&mut rx).await.payload.as_deref(), Some("2"));

    secondary.release().await;
    primary.release().await;
}

#[tokio::test]
async fn test_malformed_frame_does_not_stop_listener() {
    use tokio::io::AsyncWriteExt;

    let bus = TestBus::new();
    let primary = bus.primary("garbage").await;
    let mut rx = collect(&primary, "open").await;
    let socket = bus.config.socket_path(&primary.handle().await.unwrap());

    let mut raw = tokio::net::UnixStream::connect(&socket).await.unwrap();
    raw.write_all(&[0, 0, 0, 3, b'{', b'{', b'{']).await.unwrap();
    raw.shutdown().await.unwrap();
    drop(raw);

    let secondary = bus.secondary("garbage").await;
    secondary.send_msg_request("open", Some("ok")).await.unwrap();
    assert_eq!(next_frame(&mut rx).await.payload.as_deref(), Some("ok"));

    secondary.release().await;
    primary.release().await;
}

#[tokio::test]
async fn test_message_handle_validation() {
    let bus = TestBus::new();
    let primary = bus.primary("names").await;

    assert!(matches!(
        primary.register_msg("", |_| {}).await,
        Err(GuardError::InvalidMessageHandle)
    ));
    assert!(matches!(
        primary.register_msg("app-guard.secondary-started", |_| {}).await,
        Err(GuardError::ReservedHandle(_))
    ));
    assert!(matches!(
        primary.send_msg_request("app-guard.anything", None).await,
        Err(GuardError::ReservedHandle(_))
    ));

    primary.release().await;
}

#[tokio::test]
async fn test_subscribe_receives_every_frame() {
    let bus = TestBus::new();
    let primary = bus.primary("sub").await;
    let mut frames = primary.subscribe().await.unwrap();

    let secondary = bus.secondary("sub").await;
    secondary.send_msg_request("unrouted", Some("1")).await.unwrap();

    let frame = timeout(WAIT, frames.recv()).await.unwrap().unwrap();
    assert_eq!(frame.handle, "unrouted");
    assert_eq!(frame.payload.as_deref(), Some("1"));

    secondary.release().await;
    primary.release().await;
}

#[tokio::test]
async fn test_secondary_announces_itself() {
    let bus = TestBus::new().with_notifications();
    let primary = bus.primary("announce").await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    primary
        .on_secondary_started(move |pid| {
            let _ = tx.send(pid);
        })
        .await
        .unwrap();

    let secondary = bus.secondary("announce").await;
    let pid = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(pid, std::process::id());

    secondary.release().await;
    primary.release().await;
}

#[tokio::test]
async fn test_release_clears_registrations() {
    let bus = TestBus::new();
    let guard = bus.primary("clear").await;

    let fired = Arc::new(AtomicUsize::new(0));
    let f = Arc::clone(&fired);
    guard
        .register_msg("open", move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .unwrap();
    guard.release().await;

    guard.init("clear", || {}, false).await.unwrap();
    let mut witness = collect(&guard, "open").await;
    guard.send_msg_request("open", None).await.unwrap();

    next_frame(&mut witness).await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    guard.release().await;
}

#[tokio::test]
async fn test_process_id_and_focus_delegate_to_platform() {
    let bus = TestBus::new();
    let guard = bus.primary("platform").await;

    assert_eq!(guard.get_process_id().await.unwrap(), std::process::id());
    guard.focus_window("Editor").await.unwrap();
    guard.focus_window("").await.unwrap();

    guard.release().await;
}
