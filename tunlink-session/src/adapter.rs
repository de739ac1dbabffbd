//! Engine adapter boundary
//!
//! The packet-processing engine lives behind [`EngineAdapter`]. The
//! controller never calls an adapter directly; it goes through
//! [`EngineHandle`], which applies the defaults the session API promises
//! (status `disconnected`, stats `{}`) when no engine is reachable or a call
//! fails at the boundary.

pub mod mock;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tunlink_tun::TunnelDescriptor;

use crate::error::{Error, Result};

/// Errors raised at the engine adapter boundary
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The call into the engine failed
    #[error("adapter call failed: {0}")]
    Call(String),

    /// The engine rejected the request
    #[error("engine rejected request: {0}")]
    Rejected(String),
}

/// Interface to a packet-processing engine
///
/// `start_tun` takes the descriptor by value: once the engine accepts it, the
/// engine is its owner until `stop_tun` yields it back (or the engine closes
/// it and yields `None`).
#[async_trait]
pub trait EngineAdapter: Send + Sync {
    /// Start an engine session with the given configuration
    ///
    /// Returns `false` when the engine refuses the configuration.
    async fn connect(&self, config: &str) -> std::result::Result<bool, AdapterError>;

    /// Hand the tunnel descriptor to the engine and begin forwarding
    async fn start_tun(
        &self,
        descriptor: TunnelDescriptor,
        socks_port: u16,
    ) -> std::result::Result<(), AdapterError>;

    /// Stop forwarding and yield the descriptor back, if the engine still
    /// holds it
    async fn stop_tun(&self) -> std::result::Result<Option<TunnelDescriptor>, AdapterError>;

    /// End the engine session
    async fn disconnect(&self) -> std::result::Result<(), AdapterError>;

    /// Engine-reported status string
    async fn status(&self) -> std::result::Result<String, AdapterError>;

    /// Engine-reported statistics, JSON-encoded
    async fn stats(&self) -> std::result::Result<String, AdapterError>;
}

/// Cloneable, guarded handle to an engine adapter
#[derive(Clone)]
pub struct EngineHandle {
    inner: Arc<dyn EngineAdapter>,
}

impl EngineHandle {
    /// Wrap an adapter
    pub fn new(adapter: Arc<dyn EngineAdapter>) -> Self {
        Self { inner: adapter }
    }

    /// Start an engine session
    pub async fn connect(&self, config: &str) -> Result<bool> {
        self.inner
            .connect(config)
            .await
            .map_err(|e| Error::AdapterCall(e.to_string()))
    }

    /// Hand the descriptor to the engine
    pub async fn start_tun(&self, descriptor: TunnelDescriptor, socks_port: u16) -> Result<()> {
        self.inner
            .start_tun(descriptor, socks_port)
            .await
            .map_err(|e| Error::EngineActivationFailed(e.to_string()))
    }

    /// Reclaim the descriptor from the engine, best effort
    ///
    /// A failing adapter call is logged and treated as the engine having
    /// closed the descriptor.
    pub async fn stop_tun(&self) -> Option<TunnelDescriptor> {
        match self.inner.stop_tun().await {
            Ok(descriptor) => descriptor,
            Err(e) => {
                log::warn!("stop_tun failed: {}", e);
                None
            }
        }
    }

    /// End the engine session, best effort
    pub async fn disconnect(&self) {
        if let Err(e) = self.inner.disconnect().await {
            log::warn!("engine disconnect failed: {}", e);
        }
    }

    /// Engine status, `disconnected` when the engine cannot answer
    pub async fn status(&self) -> String {
        match self.inner.status().await {
            Ok(status) => status,
            Err(e) => {
                log::debug!("engine status unavailable: {}", e);
                "disconnected".to_string()
            }
        }
    }

    /// Engine statistics, `{}` when the engine cannot answer
    pub async fn stats(&self) -> String {
        match self.inner.stats().await {
            Ok(stats) => stats,
            Err(e) => {
                log::debug!("engine stats unavailable: {}", e);
                "{}".to_string()
            }
        }
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle").finish()
    }
}
