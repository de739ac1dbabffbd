//! Mock engine adapter for testing

use std::sync::Mutex;

use async_trait::async_trait;
use tunlink_tun::TunnelDescriptor;

use super::{AdapterError, EngineAdapter};

#[derive(Default)]
struct Inner {
    connect_result: Option<bool>,
    fail_connect: bool,
    fail_start_tun: bool,
    start_tun_delay: Option<std::time::Duration>,
    held: Option<TunnelDescriptor>,
    status: Option<String>,
    stats: Option<String>,
    calls: Vec<String>,
}

/// Mock implementation of [`EngineAdapter`]
///
/// Records every call, holds the descriptor it is given, and yields it back
/// on `stop_tun`, the way a cooperating engine would.
pub struct MockEngine {
    inner: Mutex<Inner>,
}

impl MockEngine {
    /// Create a mock engine that accepts everything
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Make `connect` return the given result
    pub fn set_connect_result(&self, accepted: bool) {
        self.lock().connect_result = Some(accepted);
    }

    /// Make `connect` fail at the adapter boundary
    pub fn fail_connect(&self) {
        self.lock().fail_connect = true;
    }

    /// Make `start_tun` fail after taking the descriptor
    pub fn fail_start_tun(&self) {
        self.lock().fail_start_tun = true;
    }

    /// Make `start_tun` take the given time before completing
    pub fn delay_start_tun(&self, delay: std::time::Duration) {
        self.lock().start_tun_delay = Some(delay);
    }

    /// Set the status string the engine reports
    pub fn set_status(&self, status: impl Into<String>) {
        self.lock().status = Some(status.into());
    }

    /// Set the statistics payload the engine reports
    pub fn set_stats(&self, stats: impl Into<String>) {
        self.lock().stats = Some(stats.into());
    }

    /// Whether the engine currently holds a descriptor
    pub fn holds_descriptor(&self) -> bool {
        self.lock().held.is_some()
    }

    /// Names of all calls made so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EngineAdapter for MockEngine {
    async fn connect(&self, _config: &str) -> Result<bool, AdapterError> {
        let mut inner = self.lock();
        inner.calls.push("connect".into());
        if inner.fail_connect {
            return Err(AdapterError::Call("connect failed by mock".into()));
        }
        Ok(inner.connect_result.unwrap_or(true))
    }

    async fn start_tun(
        &self,
        descriptor: TunnelDescriptor,
        _socks_port: u16,
    ) -> Result<(), AdapterError> {
        let delay = {
            let mut inner = self.lock();
            inner.calls.push("start_tun".into());
            if inner.fail_start_tun {
                // descriptor dropped here, as a faulting engine would
                return Err(AdapterError::Rejected("start_tun failed by mock".into()));
            }
            inner.start_tun_delay
        };
        if let Some(delay) = delay {
            // cancellation during this window drops the descriptor unheld
            tokio::time::sleep(delay).await;
        }
        self.lock().held = Some(descriptor);
        Ok(())
    }

    async fn stop_tun(&self) -> Result<Option<TunnelDescriptor>, AdapterError> {
        let mut inner = self.lock();
        inner.calls.push("stop_tun".into());
        Ok(inner.held.take())
    }

    async fn disconnect(&self) -> Result<(), AdapterError> {
        let mut inner = self.lock();
        inner.calls.push("disconnect".into());
        inner.held = None;
        Ok(())
    }

    async fn status(&self) -> Result<String, AdapterError> {
        let inner = self.lock();
        let connected = inner.held.is_some();
        Ok(inner
            .status
            .clone()
            .unwrap_or_else(|| {
                if connected {
                    "connected".to_string()
                } else {
                    "disconnected".to_string()
                }
            }))
    }

    async fn stats(&self) -> Result<String, AdapterError> {
        Ok(self.lock().stats.clone().unwrap_or_else(|| "{}".to_string()))
    }
}
