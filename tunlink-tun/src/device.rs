//! Tunnel device and descriptor ownership

use std::net::Ipv4Addr;
use std::sync::Arc;

#[cfg(unix)]
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use crate::config::DeviceConfig;
use crate::error::Result;
use crate::platform::DevicePlatform;

/// Summary information about an established tunnel device
///
/// This is the part of the device that survives descriptor hand-off: the
/// session controller keeps a copy for status reporting and fast reconnects
/// after the descriptor itself has moved to the engine.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Interface name reported by the platform
    pub name: String,
    /// Local address assigned to the interface
    pub local: Ipv4Addr,
    /// Prefix length for the local address
    pub prefix_len: u8,
    /// MTU
    pub mtu: u16,
}

/// Exclusively-owned handle to the tunnel device's data channel
///
/// Dropping the descriptor closes the underlying handle. Ownership moves by
/// value: from the device manager to the session controller on detach, from
/// the controller to the engine on activation, and back again when the engine
/// stops forwarding.
pub struct TunnelDescriptor {
    #[cfg(unix)]
    fd: OwnedFd,
}

#[cfg(unix)]
impl TunnelDescriptor {
    /// Wrap an already-owned file descriptor
    pub fn from_owned(fd: OwnedFd) -> Self {
        Self { fd }
    }

    /// Wrap a raw file descriptor
    ///
    /// # Safety
    ///
    /// `fd` must be a valid, open descriptor that is not owned elsewhere;
    /// the returned value becomes its sole owner and closes it on drop.
    pub unsafe fn from_raw(fd: RawFd) -> Self {
        Self {
            fd: OwnedFd::from_raw_fd(fd),
        }
    }

    /// The raw descriptor value, for passing across an FFI boundary
    ///
    /// Ownership is not transferred; the descriptor still closes on drop.
    pub fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    /// Unwrap into the owned file descriptor
    pub fn into_owned(self) -> OwnedFd {
        self.fd
    }
}

impl std::fmt::Debug for TunnelDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("TunnelDescriptor");
        #[cfg(unix)]
        s.field("fd", &self.fd.as_raw_fd());
        s.finish()
    }
}

/// An established virtual network interface
///
/// At most one live `TunnelDevice` exists per session. The descriptor is
/// owned by this value until [`detach`](Self::detach) consumes it; afterwards
/// the device cannot be closed or reused.
pub struct TunnelDevice {
    info: DeviceInfo,
    descriptor: TunnelDescriptor,
}

impl TunnelDevice {
    pub(crate) fn new(info: DeviceInfo, descriptor: TunnelDescriptor) -> Self {
        Self { info, descriptor }
    }

    /// Interface name
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// MTU
    pub fn mtu(&self) -> u16 {
        self.info.mtu
    }

    /// Device information
    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Transfer ownership of the descriptor out of the device
    ///
    /// Consumes the device: after this call no code path can close the
    /// descriptor through the device manager, and a second detach cannot be
    /// expressed. The caller becomes the descriptor's sole owner.
    pub fn detach(self) -> TunnelDescriptor {
        log::info!("detached descriptor from tunnel device {}", self.info.name);
        self.descriptor
    }
}

impl std::fmt::Debug for TunnelDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelDevice")
            .field("info", &self.info)
            .finish()
    }
}

/// Establishes tunnel devices through a platform backend
///
/// The manager owns no device state itself; each successful
/// [`establish`](Self::establish) yields a [`TunnelDevice`] whose descriptor
/// the caller owns from that point on.
pub struct DeviceManager {
    platform: Arc<dyn DevicePlatform>,
}

impl DeviceManager {
    /// Create a manager over the given platform backend
    pub fn new(platform: Arc<dyn DevicePlatform>) -> Self {
        Self { platform }
    }

    /// Create a manager over the native platform backend
    #[cfg(target_os = "linux")]
    pub fn native() -> Self {
        Self::new(Arc::new(crate::platform::NativePlatform))
    }

    /// Establish a tunnel device with the given configuration
    ///
    /// A platform refusal is surfaced as an error; it is terminal for the
    /// current session attempt but never fatal to the process.
    pub async fn establish(&self, config: &DeviceConfig) -> Result<TunnelDevice> {
        config.validate()?;

        let (name, descriptor) = self.platform.open(config).await?;

        log::info!(
            "established tunnel device {} ({}/{}, MTU {})",
            name,
            config.local,
            config.prefix_len,
            config.mtu
        );

        Ok(TunnelDevice::new(
            DeviceInfo {
                name,
                local: config.local,
                prefix_len: config.prefix_len,
                mtu: config.mtu,
            },
            descriptor,
        ))
    }
}

impl std::fmt::Debug for DeviceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceManager").finish()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::mock::MockPlatform;

    #[tokio::test]
    async fn test_establish_and_detach() {
        let platform = Arc::new(MockPlatform::new());
        let manager = DeviceManager::new(platform.clone());
        let config = DeviceConfig::mobile_default("test", "com.example.app");

        let device = manager.establish(&config).await.unwrap();
        assert_eq!(device.mtu(), 1500);
        assert_eq!(platform.establish_count(), 1);

        let descriptor = device.detach();
        assert!(descriptor.as_raw_fd() >= 0);
        // `device` is consumed: close-after-detach cannot be written
    }

    #[tokio::test]
    async fn test_establish_refused() {
        let platform = Arc::new(MockPlatform::new());
        platform.refuse_next();
        let manager = DeviceManager::new(platform);
        let config = DeviceConfig::mobile_default("test", "com.example.app");

        let result = manager.establish(&config).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_establish_rejects_invalid_config() {
        let platform = Arc::new(MockPlatform::new());
        let manager = DeviceManager::new(platform.clone());
        let config = DeviceConfig {
            session_name: String::new(),
            ..DeviceConfig::mobile_default("x", "y")
        };

        assert!(manager.establish(&config).await.is_err());
        // platform never consulted for an invalid config
        assert_eq!(platform.establish_count(), 0);
    }
}
