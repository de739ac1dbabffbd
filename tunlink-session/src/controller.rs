//! Session lifecycle controller
//!
//! All session state lives in a single worker task. Callers interact through
//! [`SessionHandle`], which funnels connect and disconnect requests into the
//! worker over a command channel; a revoke broadcast preempts whatever the
//! worker is doing. Because the worker is the only writer, state transitions
//! are serial and every path converges back to
//! [`SessionState::Disconnected`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tunlink_tun::{DeviceConfig, DeviceInfo, DeviceManager, DevicePlatform, TunnelDescriptor};

use crate::adapter::EngineHandle;
use crate::config::ControllerConfig;
use crate::error::{Error, Result};
use crate::event::{EventHandler, SessionEvent, SessionState};
use crate::logsink::{FileLogSink, LogSink, NullLogSink};
use crate::permission::{PermissionBroker, PermissionPrompt, StaticPrompt};
use crate::service::{DeviceService, DeviceServiceHandle, EstablishedTunnel};

const COMMAND_BUFFER: usize = 16;
const EVENT_BUFFER: usize = 64;

enum Command {
    Connect {
        engine_config: String,
        reply: oneshot::Sender<bool>,
    },
    Disconnect {
        reply: oneshot::Sender<bool>,
    },
}

/// Device state the worker keeps across engine hand-offs
///
/// The descriptor slot is `None` exactly while the engine owns the
/// descriptor. A disconnect that keeps the device puts it back, so the next
/// connect skips the establish step.
struct ActiveTunnel {
    info: DeviceInfo,
    descriptor: Option<TunnelDescriptor>,
    socks_port: u16,
}

/// Builder for a session controller
pub struct SessionControllerBuilder {
    config: ControllerConfig,
    device_config: Option<DeviceConfig>,
    platform: Option<Arc<dyn DevicePlatform>>,
    engine: Option<EngineHandle>,
    prompt: Arc<dyn PermissionPrompt>,
    handlers: Vec<Arc<dyn EventHandler>>,
    sink: Option<Arc<dyn LogSink>>,
}

impl SessionControllerBuilder {
    fn new() -> Self {
        Self {
            config: ControllerConfig::default(),
            device_config: None,
            platform: None,
            engine: None,
            prompt: Arc::new(StaticPrompt::granting()),
            handlers: Vec::new(),
            sink: None,
        }
    }

    /// Set the controller configuration
    pub fn config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the tunnel device configuration
    pub fn device_config(mut self, config: DeviceConfig) -> Self {
        self.device_config = Some(config);
        self
    }

    /// Set the platform backend used to establish devices
    pub fn platform(mut self, platform: Arc<dyn DevicePlatform>) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Attach the packet-processing engine
    ///
    /// Without an engine every connect resolves to `false` and status reports
    /// `disconnected`.
    pub fn engine(mut self, engine: EngineHandle) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Set the permission prompt (defaults to always granting)
    pub fn prompt(mut self, prompt: Arc<dyn PermissionPrompt>) -> Self {
        self.prompt = prompt;
        self
    }

    /// Add an event handler
    pub fn event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Set the session log sink
    pub fn log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Validate the configuration and spawn the controller worker
    pub fn spawn(self) -> Result<SessionHandle> {
        self.config.validate()?;
        let device_config = self
            .device_config
            .ok_or_else(|| Error::Config("device configuration is required".into()))?;
        device_config.validate().map_err(Error::Tun)?;
        let platform = self
            .platform
            .ok_or_else(|| Error::Config("device platform is required".into()))?;

        let sink: Arc<dyn LogSink> = match self.sink {
            Some(sink) => sink,
            None => match &self.config.log_dir {
                Some(dir) => match FileLogSink::open(dir) {
                    Ok(sink) => Arc::new(sink),
                    Err(e) => {
                        log::warn!("session log unavailable: {}", e);
                        Arc::new(NullLogSink)
                    }
                },
                None => Arc::new(NullLogSink),
            },
        };

        let service = DeviceService::spawn(DeviceManager::new(platform), device_config);
        let broker = Arc::new(PermissionBroker::new(self.prompt));
        let state = Arc::new(RwLock::new(SessionState::Disconnected));
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let (revoke_tx, revoke_rx) = broadcast::channel(4);
        let (events_tx, _) = broadcast::channel(EVENT_BUFFER);

        let worker = Worker {
            config: self.config,
            service,
            engine: self.engine.clone(),
            broker: broker.clone(),
            state: state.clone(),
            events_tx: events_tx.clone(),
            handlers: self.handlers,
            sink,
            revoke_tx: revoke_tx.clone(),
            active: None,
            engine_config: None,
            engine_active: false,
            stats_task: None,
        };
        tokio::spawn(worker.run(cmd_rx, revoke_rx));

        Ok(SessionHandle {
            cmd_tx,
            revoke_tx,
            events_tx,
            state,
            engine: self.engine,
            broker,
            in_flight: Arc::new(AtomicBool::new(false)),
        })
    }
}

/// Handle to a running session controller
///
/// Cheap to clone. The worker exits and tears the session down once every
/// handle has been dropped.
#[derive(Clone)]
pub struct SessionHandle {
    cmd_tx: mpsc::Sender<Command>,
    revoke_tx: broadcast::Sender<()>,
    events_tx: broadcast::Sender<SessionEvent>,
    state: Arc<RwLock<SessionState>>,
    engine: Option<EngineHandle>,
    broker: Arc<PermissionBroker>,
    in_flight: Arc<AtomicBool>,
}

impl SessionHandle {
    /// Create a controller builder
    pub fn builder() -> SessionControllerBuilder {
        SessionControllerBuilder::new()
    }

    /// Start a session with the given engine configuration
    ///
    /// Returns `true` once traffic is flowing. Returns `false` on any
    /// refusal or failure; the controller is back in `Disconnected` (or still
    /// `Connected` with the same configuration) when this resolves. A second
    /// connect while one is in progress is rejected immediately.
    pub async fn connect(&self, engine_config: &str) -> bool {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            log::warn!("connect rejected: another connect is in progress");
            return false;
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let command = Command::Connect {
            engine_config: engine_config.to_string(),
            reply: reply_tx,
        };
        let result = if self.cmd_tx.send(command).await.is_ok() {
            reply_rx.await.unwrap_or(false)
        } else {
            log::error!("session worker is gone");
            false
        };

        self.in_flight.store(false, Ordering::SeqCst);
        result
    }

    /// End the session
    ///
    /// Always returns `true`: whatever state the session was in, it is
    /// `Disconnected` when this resolves.
    pub async fn disconnect(&self) -> bool {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Disconnect { reply: reply_tx }).await.is_ok() {
            let _ = reply_rx.await;
        }
        true
    }

    /// Signal that the platform revoked the tunnel permission
    ///
    /// Preempts an in-flight connect and tears the whole session down,
    /// including the device; the next connect prompts for permission again.
    pub fn revoke(&self) {
        let _ = self.revoke_tx.send(());
    }

    /// Ask for the tunnel permission ahead of a connect
    pub async fn request_permission(&self) -> Result<()> {
        self.broker.request().await
    }

    /// Current lifecycle state
    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    /// Coarse status string
    ///
    /// Delegates to the engine when one is attached; without an engine this
    /// is always `disconnected`.
    pub async fn status(&self) -> String {
        match &self.engine {
            Some(engine) => engine.status().await,
            None => "disconnected".to_string(),
        }
    }

    /// Traffic statistics, JSON-encoded; `{}` when no engine can answer
    pub async fn stats(&self) -> String {
        match &self.engine {
            Some(engine) => engine.stats().await,
            None => "{}".to_string(),
        }
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }
}

struct Worker {
    config: ControllerConfig,
    service: DeviceServiceHandle,
    engine: Option<EngineHandle>,
    broker: Arc<PermissionBroker>,
    state: Arc<RwLock<SessionState>>,
    events_tx: broadcast::Sender<SessionEvent>,
    handlers: Vec<Arc<dyn EventHandler>>,
    sink: Arc<dyn LogSink>,
    revoke_tx: broadcast::Sender<()>,
    active: Option<ActiveTunnel>,
    engine_config: Option<String>,
    /// True from the moment the engine is asked to start a session until it
    /// has been told to stop; survives cancellation of an in-flight connect
    engine_active: bool,
    stats_task: Option<JoinHandle<()>>,
}

impl Worker {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<Command>,
        mut revoke_rx: broadcast::Receiver<()>,
    ) {
        log::debug!("session worker started");
        loop {
            tokio::select! {
                biased;

                revoked = revoke_rx.recv() => {
                    if revoked.is_ok() {
                        self.handle_revoke().await;
                    }
                }
                command = cmd_rx.recv() => {
                    match command {
                        Some(Command::Connect { engine_config, reply }) => {
                            let connected = self.handle_connect(&engine_config).await;
                            let _ = reply.send(connected);
                        }
                        Some(Command::Disconnect { reply }) => {
                            self.teardown(self.config.full_teardown_on_disconnect).await;
                            let _ = reply.send(true);
                        }
                        None => break,
                    }
                }
            }
        }

        // all handles dropped; release everything
        self.teardown(true).await;
        self.service.stop().await;
        log::debug!("session worker stopped");
    }

    async fn handle_connect(&mut self, engine_config: &str) -> bool {
        // a revoke arriving mid-connect wins over the connect itself
        let mut revoke = self.revoke_tx.subscribe();
        let outcome = tokio::select! {
            biased;

            _ = revoke.recv() => None,
            result = self.connect_sequence(engine_config) => Some(result),
        };

        match outcome {
            None => {
                self.handle_revoke().await;
                false
            }
            Some(Ok(connected)) => connected,
            Some(Err(e)) => {
                self.fail(e).await;
                false
            }
        }
    }

    async fn connect_sequence(&mut self, engine_config: &str) -> Result<bool> {
        if engine_config.trim().is_empty() {
            self.log("connect rejected: empty engine configuration").await;
            return Ok(false);
        }

        if self.current_state().await.is_connected() {
            if self.engine_config.as_deref() == Some(engine_config) {
                self.log("connect: already connected with this configuration")
                    .await;
                return Ok(true);
            }
            self.log("connect rejected: already connected with a different configuration")
                .await;
            return Ok(false);
        }

        let Some(engine) = self.engine.clone() else {
            self.log(&format!("connect stopped: {}", Error::EngineUnavailable))
                .await;
            return Ok(false);
        };

        if !self.broker.is_granted() {
            self.set_state(SessionState::AwaitingPermission).await;
            match self.broker.request().await {
                Ok(()) => {}
                Err(e) if e.is_refusal() => {
                    self.log(&format!("connect stopped: {}", e)).await;
                    self.set_state(SessionState::Disconnected).await;
                    return Ok(false);
                }
                Err(e) => return Err(e),
            }
        }

        let reusable = self
            .active
            .as_ref()
            .map(|a| a.descriptor.is_some() && a.socks_port == self.config.socks_port)
            .unwrap_or(false);
        if reusable {
            if let Some(active) = self.active.as_ref() {
                let line = format!("reusing established tunnel device {}", active.info.name);
                self.log(&line).await;
            }
        } else {
            self.active = None;
            let tunnel = self.establish_device().await?;
            self.active = Some(ActiveTunnel {
                info: tunnel.info,
                descriptor: Some(tunnel.descriptor),
                socks_port: tunnel.socks_port,
            });
        }

        self.set_state(SessionState::ActivatingEngine).await;

        // from here on the engine may hold session state (and soon the
        // descriptor); every exit, including cancellation by a revoke, must
        // run release_engine
        self.engine_active = true;
        if !engine.connect(engine_config).await? {
            return Err(Error::EngineConnectFailed);
        }

        let (descriptor, socks_port) = match self.active.as_mut() {
            Some(active) => match active.descriptor.take() {
                Some(descriptor) => (descriptor, active.socks_port),
                None => {
                    return Err(Error::EngineActivationFailed(
                        "tunnel descriptor is missing".into(),
                    ));
                }
            },
            None => {
                return Err(Error::EngineActivationFailed(
                    "no tunnel device established".into(),
                ));
            }
        };

        engine.start_tun(descriptor, socks_port).await?;

        self.engine_config = Some(engine_config.to_string());
        self.set_state(SessionState::Connected).await;
        self.log("session connected").await;
        self.spawn_stats_task(engine);
        Ok(true)
    }

    async fn establish_device(&mut self) -> Result<EstablishedTunnel> {
        self.set_state(SessionState::EstablishingDevice).await;
        let ready = self.service.start(self.config.socks_port).await;

        self.set_state(SessionState::WaitingForDescriptor).await;
        match tokio::time::timeout(self.config.descriptor_wait(), ready).await {
            Err(_) => Err(Error::DescriptorTimeout),
            Ok(Err(_)) => Err(Error::DeviceEstablishFailed(
                "device service dropped the request".into(),
            )),
            Ok(Ok(result)) => result,
        }
    }

    async fn handle_revoke(&mut self) {
        self.log("tunnel permission revoked").await;
        self.broker.clear_grant();
        self.teardown(true).await;
    }

    async fn fail(&mut self, error: Error) {
        self.log(&format!("session failed: {}", error)).await;
        self.set_state(SessionState::Failed).await;
        self.release_engine().await;
        self.set_state(SessionState::Disconnected).await;
    }

    /// Tear the session down; with `full` the device is released as well
    async fn teardown(&mut self, full: bool) {
        let idle = !self.current_state().await.is_active() && !self.engine_active;
        if idle && (!full || self.active.is_none()) {
            return;
        }

        self.stop_stats_task();
        self.set_state(SessionState::Disconnecting).await;
        self.release_engine().await;

        if full && self.active.take().is_some() {
            self.log("released tunnel device").await;
        }

        self.set_state(SessionState::Disconnected).await;
        self.log("session disconnected").await;
    }

    /// Stop the engine session if one may have started
    ///
    /// Best effort on every call: reclaims the descriptor when the engine
    /// yields it back and re-attaches it to the held device. Safe to call
    /// when the connect that started the session was cancelled mid-flight.
    async fn release_engine(&mut self) {
        if !self.engine_active {
            return;
        }
        self.engine_active = false;
        self.engine_config = None;

        if let Some(engine) = self.engine.clone() {
            if let Some(descriptor) = engine.stop_tun().await {
                match self.active.as_mut() {
                    Some(active) => active.descriptor = Some(descriptor),
                    None => log::warn!("reclaimed descriptor with no device record"),
                }
            }
            engine.disconnect().await;
        }
    }

    fn spawn_stats_task(&mut self, engine: EngineHandle) {
        self.stop_stats_task();
        let events_tx = self.events_tx.clone();
        let handlers = self.handlers.clone();
        let mut interval = tokio::time::interval(self.config.stats_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        self.stats_task = Some(tokio::spawn(async move {
            interval.tick().await;
            loop {
                interval.tick().await;
                let stats = engine.stats().await;
                let event = SessionEvent::Stats(stats);
                for handler in &handlers {
                    handler.on_event(event.clone()).await;
                }
                let _ = events_tx.send(event);
            }
        }));
    }

    fn stop_stats_task(&mut self) {
        if let Some(task) = self.stats_task.take() {
            task.abort();
        }
    }

    async fn current_state(&self) -> SessionState {
        *self.state.read().await
    }

    async fn set_state(&mut self, to: SessionState) {
        let from = {
            let mut guard = self.state.write().await;
            std::mem::replace(&mut *guard, to)
        };
        if from == to {
            return;
        }
        log::info!("session state: {:?} -> {:?}", from, to);
        self.emit(SessionEvent::StateChanged { from, to }).await;
    }

    async fn emit(&self, event: SessionEvent) {
        for handler in &self.handlers {
            handler.on_event(event.clone()).await;
        }
        let _ = self.events_tx.send(event);
    }

    async fn log(&self, line: &str) {
        log::info!("{}", line);
        self.sink.write_line(line);
        self.emit(SessionEvent::Log(line.to_string())).await;
    }
}
