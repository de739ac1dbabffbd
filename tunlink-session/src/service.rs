//! Device service task
//!
//! Establishing the tunnel device happens in a dedicated task, mirroring the
//! way mobile shells run the tunnel inside a platform service that is started
//! and stopped with intent-style messages. The controller talks to the task
//! through [`DeviceServiceHandle`] and receives the established device over a
//! one-shot channel.

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tunlink_tun::{DeviceConfig, DeviceInfo, DeviceManager, TunnelDescriptor};

use crate::error::{Error, Result};

/// Default local SOCKS port offered to the engine
pub const DEFAULT_SOCKS_PORT: u16 = 1080;

/// Wire form of the messages a platform shell sends the device service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServiceMessage {
    /// Start the tunnel with the given local SOCKS port
    #[serde(rename = "START")]
    Start {
        /// Local SOCKS port the engine should listen on
        #[serde(rename = "socksPort")]
        socks_port: u16,
    },
    /// Stop the tunnel
    #[serde(rename = "STOP")]
    Stop,
}

impl ServiceMessage {
    /// Parse a wire message
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Config(format!("bad service message: {}", e)))
    }

    /// Serialize to the wire form
    pub fn to_json(&self) -> String {
        // the message shape cannot fail to serialize
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// A tunnel device whose descriptor has been detached for hand-off
pub struct EstablishedTunnel {
    /// Device summary, kept for status reporting after hand-off
    pub info: DeviceInfo,
    /// The detached descriptor, owned by the holder of this value
    pub descriptor: TunnelDescriptor,
    /// SOCKS port the tunnel was started with
    pub socks_port: u16,
}

impl std::fmt::Debug for EstablishedTunnel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EstablishedTunnel")
            .field("info", &self.info)
            .field("socks_port", &self.socks_port)
            .finish()
    }
}

enum ServiceCommand {
    Start {
        socks_port: u16,
        ready: oneshot::Sender<Result<EstablishedTunnel>>,
    },
    Stop,
}

/// Handle to a running device service task
#[derive(Clone)]
pub struct DeviceServiceHandle {
    tx: mpsc::Sender<ServiceCommand>,
}

impl DeviceServiceHandle {
    /// Ask the service to establish the tunnel device
    ///
    /// Resolves once the descriptor is ready. The caller bounds the wait; the
    /// service itself never gives up on an establish in progress.
    pub async fn start(&self, socks_port: u16) -> oneshot::Receiver<Result<EstablishedTunnel>> {
        let (ready_tx, ready_rx) = oneshot::channel();
        let command = ServiceCommand::Start {
            socks_port,
            ready: ready_tx,
        };
        if self.tx.send(command).await.is_err() {
            log::error!("device service is gone");
        }
        ready_rx
    }

    /// Shut the service task down
    pub async fn stop(&self) {
        let _ = self.tx.send(ServiceCommand::Stop).await;
    }
}

/// Task that owns the device manager and services establish requests
pub struct DeviceService {
    manager: DeviceManager,
    config: DeviceConfig,
    rx: mpsc::Receiver<ServiceCommand>,
}

impl DeviceService {
    /// Spawn the service task over the given manager and device configuration
    pub fn spawn(manager: DeviceManager, config: DeviceConfig) -> DeviceServiceHandle {
        let (tx, rx) = mpsc::channel(16);
        let service = Self {
            manager,
            config,
            rx,
        };
        tokio::spawn(service.run());
        DeviceServiceHandle { tx }
    }

    async fn run(mut self) {
        log::debug!("device service started");
        while let Some(command) = self.rx.recv().await {
            match command {
                ServiceCommand::Start { socks_port, ready } => {
                    let message = ServiceMessage::Start { socks_port };
                    log::info!("device service: {}", message.to_json());
                    let result = self.establish(socks_port).await;
                    if ready.send(result).is_err() {
                        // caller stopped waiting; the tunnel it asked for is
                        // dropped and its descriptor closed here
                        log::warn!("establish finished after caller gave up");
                    }
                }
                ServiceCommand::Stop => {
                    log::info!("device service: {}", ServiceMessage::Stop.to_json());
                    break;
                }
            }
        }
        log::debug!("device service stopped");
    }

    async fn establish(&self, socks_port: u16) -> Result<EstablishedTunnel> {
        let device = self
            .manager
            .establish(&self.config)
            .await
            .map_err(|e| Error::DeviceEstablishFailed(e.to_string()))?;

        let info = device.info().clone();
        Ok(EstablishedTunnel {
            info,
            descriptor: device.detach(),
            socks_port,
        })
    }
}
