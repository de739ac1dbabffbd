//! Platform backends for establishing tunnel devices

use async_trait::async_trait;

use crate::config::DeviceConfig;
use crate::device::TunnelDescriptor;
use crate::error::Result;

/// A platform capable of creating tunnel devices
///
/// Implementations return the interface name chosen by the platform together
/// with the exclusively-owned descriptor. Mobile shells implement this over
/// their system tunnel API; servers and tests use the native or mock backends.
#[async_trait]
pub trait DevicePlatform: Send + Sync {
    /// Create a tunnel device for the given configuration
    async fn open(&self, config: &DeviceConfig) -> Result<(String, TunnelDescriptor)>;
}

#[cfg(target_os = "linux")]
pub use linux::NativePlatform;

#[cfg(target_os = "linux")]
mod linux {
    use std::ffi::CString;
    use std::io;
    use std::os::unix::io::{FromRawFd, OwnedFd};

    use async_trait::async_trait;

    use super::DevicePlatform;
    use crate::config::DeviceConfig;
    use crate::device::TunnelDescriptor;
    use crate::error::{Error, Result};

    const TUNSETIFF: libc::c_ulong = 0x4004_54ca;
    const IFNAMSIZ: usize = 16;

    #[repr(C)]
    struct IfReq {
        ifr_name: [libc::c_char; IFNAMSIZ],
        ifr_flags: libc::c_short,
        _pad: [u8; 22],
    }

    /// Linux TUN backend over `/dev/net/tun`
    ///
    /// Creates an `IFF_TUN | IFF_NO_PI` interface. Address, route and DNS
    /// assignment are left to the surrounding deployment; this backend only
    /// produces the device and its descriptor.
    pub struct NativePlatform;

    #[async_trait]
    impl DevicePlatform for NativePlatform {
        async fn open(&self, config: &DeviceConfig) -> Result<(String, TunnelDescriptor)> {
            let fd = unsafe {
                libc::open(
                    b"/dev/net/tun\0".as_ptr() as *const libc::c_char,
                    libc::O_RDWR,
                )
            };
            if fd < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::PermissionDenied {
                    return Err(Error::PermissionDenied(
                        "opening /dev/net/tun requires CAP_NET_ADMIN".into(),
                    ));
                }
                return Err(err.into());
            }
            // Owned from here on; closed on any early return below.
            let owned = unsafe { OwnedFd::from_raw_fd(fd) };

            let name = CString::new(config.session_name.as_bytes())
                .map_err(|_| Error::Config("session name contains NUL".into()))?;
            if name.as_bytes_with_nul().len() > IFNAMSIZ {
                return Err(Error::Config(format!(
                    "session name {:?} exceeds interface name limit",
                    config.session_name
                )));
            }

            let mut req = IfReq {
                ifr_name: [0; IFNAMSIZ],
                ifr_flags: (libc::IFF_TUN | libc::IFF_NO_PI) as libc::c_short,
                _pad: [0; 22],
            };
            for (dst, src) in req.ifr_name.iter_mut().zip(name.as_bytes_with_nul()) {
                *dst = *src as libc::c_char;
            }

            let ret = unsafe { libc::ioctl(fd, TUNSETIFF, &mut req) };
            if ret < 0 {
                return Err(Error::EstablishRefused(format!(
                    "TUNSETIFF failed: {}",
                    io::Error::last_os_error()
                )));
            }

            if !config.blocking {
                let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
                if flags < 0 {
                    return Err(io::Error::last_os_error().into());
                }
                let ret = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
                if ret < 0 {
                    return Err(io::Error::last_os_error().into());
                }
            }

            let assigned = req
                .ifr_name
                .iter()
                .take_while(|&&c| c != 0)
                .map(|&c| c as u8 as char)
                .collect::<String>();

            log::debug!("opened TUN device {}", assigned);

            Ok((assigned, TunnelDescriptor::from_owned(owned)))
        }
    }
}
