//! Mock platform backend for testing
//!
//! Backs each descriptor with a real file descriptor (an anonymous UDP
//! socket) so that ownership and close semantics behave as they do against a
//! real platform.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::DeviceConfig;
use crate::device::TunnelDescriptor;
use crate::error::{Error, Result};

/// Mock implementation of [`DevicePlatform`](crate::DevicePlatform)
pub struct MockPlatform {
    establish_count: AtomicUsize,
    refuse_next: AtomicBool,
    deny_permission: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl MockPlatform {
    /// Create a new mock platform
    pub fn new() -> Self {
        Self {
            establish_count: AtomicUsize::new(0),
            refuse_next: AtomicBool::new(false),
            deny_permission: AtomicBool::new(false),
            delay: Mutex::new(None),
        }
    }

    /// Refuse the next establish attempt
    pub fn refuse_next(&self) {
        self.refuse_next.store(true, Ordering::SeqCst);
    }

    /// Fail every establish attempt with a permission error
    pub fn deny_permission(&self) {
        self.deny_permission.store(true, Ordering::SeqCst);
    }

    /// Delay every establish attempt by the given duration
    pub fn set_delay(&self, delay: Duration) {
        if let Ok(mut guard) = self.delay.lock() {
            *guard = Some(delay);
        }
    }

    /// Number of establish attempts made so far
    pub fn establish_count(&self) -> usize {
        self.establish_count.load(Ordering::SeqCst)
    }

    fn make_descriptor(&self) -> Result<TunnelDescriptor> {
        #[cfg(unix)]
        {
            let socket = std::net::UdpSocket::bind("127.0.0.1:0")?;
            Ok(TunnelDescriptor::from_owned(socket.into()))
        }
        #[cfg(not(unix))]
        {
            Err(Error::NotSupported("mock descriptors require unix".into()))
        }
    }
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl crate::platform::DevicePlatform for MockPlatform {
    async fn open(&self, _config: &DeviceConfig) -> Result<(String, TunnelDescriptor)> {
        let attempt = self.establish_count.fetch_add(1, Ordering::SeqCst);

        let delay = self.delay.lock().ok().and_then(|guard| *guard);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.deny_permission.load(Ordering::SeqCst) {
            return Err(Error::PermissionDenied("denied by mock".into()));
        }

        if self.refuse_next.swap(false, Ordering::SeqCst) {
            return Err(Error::EstablishRefused("refused by mock".into()));
        }

        let descriptor = self.make_descriptor()?;
        Ok((format!("mock{}", attempt), descriptor))
    }
}
