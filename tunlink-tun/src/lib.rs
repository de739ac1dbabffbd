//! Tunnel device management for mobile-style VPN sessions
//!
//! This crate owns the lifecycle of the virtual network interface used by a
//! tunnel session: building and validating the device configuration,
//! establishing the interface through a pluggable platform backend, and
//! tracking ownership of the device descriptor until it is handed off to a
//! packet-processing engine.
//!
//! # Descriptor Ownership
//!
//! The descriptor backing a [`TunnelDevice`] has exactly one owner at any
//! instant. [`TunnelDevice::detach`] consumes the device value and yields the
//! [`TunnelDescriptor`]; after that the device manager can neither close nor
//! reuse the device. Double-detach and close-after-detach are therefore
//! unrepresentable rather than merely discouraged.
//!
//! # Example
//!
//! ```ignore
//! use tunlink_tun::{DeviceConfig, DeviceManager};
//!
//! let config = DeviceConfig::builder()
//!     .session_name("tunlink")
//!     .local("10.10.10.2".parse()?, 32)
//!     .mtu(1500)
//!     .build()?;
//!
//! let manager = DeviceManager::native();
//! let device = manager.establish(&config).await?;
//! let descriptor = device.detach();
//! // hand `descriptor` to the engine; the device value is gone
//! ```

pub mod config;
pub mod device;
pub mod error;
pub mod mock;
pub mod platform;

pub use config::{DeviceConfig, DeviceConfigBuilder, TunnelRoute};
pub use device::{DeviceInfo, DeviceManager, TunnelDescriptor, TunnelDevice};
pub use error::{Error, Result};
pub use platform::DevicePlatform;

#[cfg(target_os = "linux")]
pub use platform::NativePlatform;

/// Default MTU for tunnel devices
pub const DEFAULT_MTU: u16 = 1500;

/// Smallest MTU accepted for a tunnel device (IPv4 minimum)
pub const MIN_MTU: u16 = 68;
