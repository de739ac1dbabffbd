//! End-to-end session lifecycle tests against mock platform and engine

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tunlink_session::adapter::mock::MockEngine;
use tunlink_session::{
    ControllerConfig, EngineHandle, PermissionPrompt, SessionEvent, SessionHandle, SessionState,
    StaticPrompt,
};
use tunlink_tun::mock::MockPlatform;
use tunlink_tun::DeviceConfig;

struct CountingPrompt {
    requests: AtomicUsize,
}

impl CountingPrompt {
    fn new() -> Self {
        Self {
            requests: AtomicUsize::new(0),
        }
    }

    fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PermissionPrompt for CountingPrompt {
    async fn request(&self) -> bool {
        self.requests.fetch_add(1, Ordering::SeqCst);
        true
    }
}

fn device_config() -> DeviceConfig {
    DeviceConfig::mobile_default("test", "com.example.app")
}

fn build_session(
    platform: Arc<MockPlatform>,
    engine: Option<Arc<MockEngine>>,
    config: ControllerConfig,
) -> SessionHandle {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut builder = SessionHandle::builder()
        .config(config)
        .device_config(device_config())
        .platform(platform);
    if let Some(engine) = engine {
        builder = builder.engine(EngineHandle::new(engine));
    }
    builder.spawn().unwrap()
}

#[tokio::test]
async fn connect_reaches_connected_and_hands_off_descriptor() {
    let platform = Arc::new(MockPlatform::new());
    let engine = Arc::new(MockEngine::new());
    let session = build_session(platform.clone(), Some(engine.clone()), Default::default());

    assert!(session.connect("server=10.0.0.1").await);
    assert_eq!(session.state().await, SessionState::Connected);
    assert_eq!(session.status().await, "connected");
    assert!(engine.holds_descriptor());
    assert_eq!(platform.establish_count(), 1);

    let calls = engine.calls();
    assert_eq!(calls[0], "connect");
    assert_eq!(calls[1], "start_tun");
}

#[tokio::test]
async fn disconnect_is_always_true() {
    let platform = Arc::new(MockPlatform::new());
    let engine = Arc::new(MockEngine::new());
    let session = build_session(platform, Some(engine.clone()), Default::default());

    // never connected; disconnect still succeeds
    assert!(session.disconnect().await);
    assert_eq!(session.state().await, SessionState::Disconnected);

    assert!(session.connect("server=10.0.0.1").await);
    assert!(session.disconnect().await);
    assert_eq!(session.state().await, SessionState::Disconnected);
    assert!(!engine.holds_descriptor());

    // and again, already disconnected
    assert!(session.disconnect().await);
}

#[tokio::test]
async fn reconnect_reuses_established_device() {
    let platform = Arc::new(MockPlatform::new());
    let engine = Arc::new(MockEngine::new());
    let session = build_session(platform.clone(), Some(engine), Default::default());

    assert!(session.connect("server=10.0.0.1").await);
    assert!(session.disconnect().await);
    assert!(session.connect("server=10.0.0.1").await);

    // the device survived the disconnect; established exactly once
    assert_eq!(platform.establish_count(), 1);
    assert_eq!(session.state().await, SessionState::Connected);
}

#[tokio::test]
async fn full_teardown_releases_device_on_disconnect() {
    let platform = Arc::new(MockPlatform::new());
    let engine = Arc::new(MockEngine::new());
    let config = ControllerConfig {
        full_teardown_on_disconnect: true,
        ..Default::default()
    };
    let session = build_session(platform.clone(), Some(engine), config);

    assert!(session.connect("server=10.0.0.1").await);
    assert!(session.disconnect().await);
    assert!(session.connect("server=10.0.0.1").await);

    assert_eq!(platform.establish_count(), 2);
}

#[tokio::test]
async fn descriptor_timeout_converges_to_disconnected() {
    let platform = Arc::new(MockPlatform::new());
    platform.set_delay(Duration::from_millis(500));
    let engine = Arc::new(MockEngine::new());
    let config = ControllerConfig {
        descriptor_wait_attempts: 2,
        descriptor_wait_interval_ms: 30,
        ..Default::default()
    };
    let session = build_session(platform, Some(engine.clone()), config);

    assert!(!session.connect("server=10.0.0.1").await);
    assert_eq!(session.state().await, SessionState::Disconnected);
    // the engine was never touched
    assert!(engine.calls().is_empty());
}

#[tokio::test]
async fn slow_establish_within_budget_still_connects() {
    let platform = Arc::new(MockPlatform::new());
    platform.set_delay(Duration::from_millis(90));
    let engine = Arc::new(MockEngine::new());
    let session = build_session(platform, Some(engine), Default::default());

    assert!(session.connect("server=10.0.0.1").await);
    assert_eq!(session.state().await, SessionState::Connected);
}

#[tokio::test]
async fn permission_denied_yields_false_without_device() {
    let platform = Arc::new(MockPlatform::new());
    let engine = Arc::new(MockEngine::new());
    let session = SessionHandle::builder()
        .device_config(device_config())
        .platform(platform.clone())
        .engine(EngineHandle::new(engine))
        .prompt(Arc::new(StaticPrompt::denying()))
        .spawn()
        .unwrap();

    assert!(!session.connect("server=10.0.0.1").await);
    assert_eq!(session.state().await, SessionState::Disconnected);
    assert_eq!(platform.establish_count(), 0);
}

#[tokio::test]
async fn missing_engine_refuses_connect() {
    let platform = Arc::new(MockPlatform::new());
    let session = build_session(platform.clone(), None, Default::default());

    let mut events = session.subscribe();
    assert!(!session.connect("server=10.0.0.1").await);
    assert_eq!(session.state().await, SessionState::Disconnected);
    assert_eq!(platform.establish_count(), 0);
    assert_eq!(session.status().await, "disconnected");
    assert_eq!(session.stats().await, "{}");

    // the refusal reason reaches the event stream
    let mut reasons = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::Log(line) = event {
            reasons.push(line);
        }
    }
    assert!(reasons.iter().any(|l| l.contains("no engine available")));
}

#[tokio::test]
async fn establish_failure_resolves_connect_false() {
    let platform = Arc::new(MockPlatform::new());
    platform.refuse_next();
    let engine = Arc::new(MockEngine::new());
    let session = build_session(platform.clone(), Some(engine.clone()), Default::default());

    assert!(!session.connect("server=10.0.0.1").await);
    assert_eq!(session.state().await, SessionState::Disconnected);
    assert_eq!(session.stats().await, "{}");
    assert_eq!(platform.establish_count(), 1);
    // the engine was never touched
    assert!(engine.calls().is_empty());
}

#[tokio::test]
async fn engine_refusal_converges_to_disconnected() {
    let platform = Arc::new(MockPlatform::new());
    let engine = Arc::new(MockEngine::new());
    engine.set_connect_result(false);
    let session = build_session(platform, Some(engine), Default::default());

    assert!(!session.connect("server=10.0.0.1").await);
    assert_eq!(session.state().await, SessionState::Disconnected);
}

#[tokio::test]
async fn activation_failure_converges_to_disconnected() {
    let platform = Arc::new(MockPlatform::new());
    let engine = Arc::new(MockEngine::new());
    engine.fail_start_tun();
    let session = build_session(platform, Some(engine.clone()), Default::default());

    assert!(!session.connect("server=10.0.0.1").await);
    assert_eq!(session.state().await, SessionState::Disconnected);
    // the session was ended on the engine after the failed hand-off
    assert!(engine.calls().contains(&"disconnect".to_string()));
}

#[tokio::test]
async fn empty_engine_config_is_rejected() {
    let platform = Arc::new(MockPlatform::new());
    let engine = Arc::new(MockEngine::new());
    let session = build_session(platform.clone(), Some(engine), Default::default());

    assert!(!session.connect("   ").await);
    assert_eq!(platform.establish_count(), 0);
    assert_eq!(session.state().await, SessionState::Disconnected);
}

#[tokio::test]
async fn connect_while_connected_with_same_config_is_true() {
    let platform = Arc::new(MockPlatform::new());
    let engine = Arc::new(MockEngine::new());
    let session = build_session(platform, Some(engine.clone()), Default::default());

    assert!(session.connect("server=10.0.0.1").await);
    assert!(session.connect("server=10.0.0.1").await);
    assert!(!session.connect("server=10.0.0.2").await);

    let connects = engine.calls().iter().filter(|c| *c == "connect").count();
    assert_eq!(connects, 1);
    assert_eq!(session.state().await, SessionState::Connected);
}

#[tokio::test]
async fn revoke_tears_down_and_forgets_grant() {
    let platform = Arc::new(MockPlatform::new());
    let engine = Arc::new(MockEngine::new());
    let prompt = Arc::new(CountingPrompt::new());
    let session = SessionHandle::builder()
        .device_config(device_config())
        .platform(platform.clone())
        .engine(EngineHandle::new(engine.clone()))
        .prompt(prompt.clone())
        .spawn()
        .unwrap();

    assert!(session.connect("server=10.0.0.1").await);
    assert_eq!(prompt.requests(), 1);

    session.revoke();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(session.state().await, SessionState::Disconnected);
    assert!(!engine.holds_descriptor());

    // the device was released and the grant forgotten
    assert!(session.connect("server=10.0.0.1").await);
    assert_eq!(prompt.requests(), 2);
    assert_eq!(platform.establish_count(), 2);
}

#[tokio::test]
async fn revoke_preempts_in_flight_connect() {
    let platform = Arc::new(MockPlatform::new());
    platform.set_delay(Duration::from_millis(200));
    let engine = Arc::new(MockEngine::new());
    let session = build_session(platform, Some(engine.clone()), Default::default());

    let connect = {
        let session = session.clone();
        tokio::spawn(async move { session.connect("server=10.0.0.1").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    session.revoke();

    assert!(!connect.await.unwrap());
    assert_eq!(session.state().await, SessionState::Disconnected);
    assert!(!engine.holds_descriptor());
}

#[tokio::test]
async fn revoke_during_engine_activation_stops_engine() {
    let platform = Arc::new(MockPlatform::new());
    let engine = Arc::new(MockEngine::new());
    engine.delay_start_tun(Duration::from_millis(300));
    let session = build_session(platform, Some(engine.clone()), Default::default());

    let connect = {
        let session = session.clone();
        tokio::spawn(async move { session.connect("server=10.0.0.1").await })
    };
    // wait until the engine has accepted the session and holds the hand-off
    tokio::time::sleep(Duration::from_millis(100)).await;
    session.revoke();

    assert!(!connect.await.unwrap());
    assert_eq!(session.state().await, SessionState::Disconnected);
    assert!(!engine.holds_descriptor());

    // the engine session was stopped, not abandoned
    let calls = engine.calls();
    assert!(calls.contains(&"connect".to_string()));
    assert!(calls.contains(&"stop_tun".to_string()));
    assert!(calls.contains(&"disconnect".to_string()));
}

#[tokio::test]
async fn log_lines_reach_subscribers() {
    let platform = Arc::new(MockPlatform::new());
    let engine = Arc::new(MockEngine::new());
    let session = build_session(platform, Some(engine), Default::default());

    let mut events = session.subscribe();
    assert!(session.connect("server=10.0.0.1").await);
    assert!(session.disconnect().await);

    let mut lines = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::Log(line) = event {
            lines.push(line);
        }
    }
    assert!(lines.iter().any(|l| l.contains("session connected")));
    assert!(lines.iter().any(|l| l.contains("session disconnected")));
}

#[tokio::test]
async fn concurrent_connect_is_rejected() {
    let platform = Arc::new(MockPlatform::new());
    platform.set_delay(Duration::from_millis(200));
    let engine = Arc::new(MockEngine::new());
    let session = build_session(platform, Some(engine), Default::default());

    let first = {
        let session = session.clone();
        tokio::spawn(async move { session.connect("server=10.0.0.1").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    // second connect while the first is still establishing
    assert!(!session.connect("server=10.0.0.1").await);

    assert!(first.await.unwrap());
    assert_eq!(session.state().await, SessionState::Connected);
}

#[tokio::test]
async fn state_events_are_published_in_order() {
    let platform = Arc::new(MockPlatform::new());
    let engine = Arc::new(MockEngine::new());
    let session = build_session(platform, Some(engine), Default::default());

    let mut events = session.subscribe();
    assert!(session.connect("server=10.0.0.1").await);

    let mut states = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::StateChanged { to, .. } = event {
            states.push(to);
        }
    }

    assert_eq!(
        states,
        vec![
            SessionState::AwaitingPermission,
            SessionState::EstablishingDevice,
            SessionState::WaitingForDescriptor,
            SessionState::ActivatingEngine,
            SessionState::Connected,
        ]
    );
}

#[tokio::test]
async fn stats_are_reported_while_connected() {
    let platform = Arc::new(MockPlatform::new());
    let engine = Arc::new(MockEngine::new());
    engine.set_stats(r#"{"rx":10,"tx":4}"#);
    let config = ControllerConfig {
        stats_interval_secs: 1,
        ..Default::default()
    };
    let session = build_session(platform, Some(engine), config);

    let mut events = session.subscribe();
    assert!(session.connect("server=10.0.0.1").await);
    assert_eq!(session.stats().await, r#"{"rx":10,"tx":4}"#);

    let stats = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            if let Ok(SessionEvent::Stats(stats)) = events.recv().await {
                return stats;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(stats, r#"{"rx":10,"tx":4}"#);
}
