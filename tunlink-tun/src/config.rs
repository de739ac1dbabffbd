//! Tunnel device configuration

use std::net::{IpAddr, Ipv4Addr};

use crate::error::{Error, Result};
use crate::{DEFAULT_MTU, MIN_MTU};

/// A route installed on the tunnel device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelRoute {
    /// Destination network address
    pub network: Ipv4Addr,
    /// Network prefix length (0 = default route)
    pub prefix_len: u8,
}

impl TunnelRoute {
    /// Create a new route
    pub fn new(network: Ipv4Addr, prefix_len: u8) -> Self {
        Self {
            network,
            prefix_len,
        }
    }

    /// The catch-all default route (`0.0.0.0/0`)
    pub fn default_route() -> Self {
        Self::new(Ipv4Addr::UNSPECIFIED, 0)
    }
}

impl std::fmt::Display for TunnelRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

/// Configuration for establishing a tunnel device
///
/// The mobile profile applied by the session controller is a fixed shape:
/// a single local address, a default route, two DNS servers, MTU 1500, the
/// owning application excluded from routing, and a non-blocking descriptor.
/// [`DeviceConfig::mobile_default`] produces exactly that; the builder allows
/// overrides for other deployments.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Human-readable session name attached to the interface
    pub session_name: String,
    /// Local address assigned to the interface
    pub local: Ipv4Addr,
    /// Prefix length for the local address
    pub prefix_len: u8,
    /// Routes directed into the tunnel
    pub routes: Vec<TunnelRoute>,
    /// DNS servers pushed to the host
    pub dns: Vec<IpAddr>,
    /// Maximum transmission unit
    pub mtu: u16,
    /// Applications excluded from tunnel routing (self-exclusion)
    pub excluded_apps: Vec<String>,
    /// Whether the descriptor operates in blocking mode
    pub blocking: bool,
}

impl DeviceConfig {
    /// Create a new configuration builder
    pub fn builder() -> DeviceConfigBuilder {
        DeviceConfigBuilder::new()
    }

    /// The fixed mobile tunnel profile: `10.10.10.2/32`, default route,
    /// Google and Cloudflare DNS, MTU 1500, non-blocking, with the owning
    /// application excluded from routing.
    pub fn mobile_default(session_name: impl Into<String>, own_app: impl Into<String>) -> Self {
        Self {
            session_name: session_name.into(),
            local: Ipv4Addr::new(10, 10, 10, 2),
            prefix_len: 32,
            routes: vec![TunnelRoute::default_route()],
            dns: vec![
                IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)),
                IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1)),
            ],
            mtu: DEFAULT_MTU,
            excluded_apps: vec![own_app.into()],
            blocking: false,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.session_name.is_empty() {
            return Err(Error::Config("session name is required".into()));
        }

        if self.prefix_len > 32 {
            return Err(Error::InvalidPrefix(format!(
                "prefix length {} is invalid (max 32)",
                self.prefix_len
            )));
        }

        for route in &self.routes {
            if route.prefix_len > 32 {
                return Err(Error::InvalidPrefix(format!(
                    "route {} has invalid prefix (max 32)",
                    route
                )));
            }
        }

        if self.mtu < MIN_MTU {
            return Err(Error::Config(format!(
                "MTU {} is too small (minimum {})",
                self.mtu, MIN_MTU
            )));
        }

        Ok(())
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            session_name: String::new(),
            local: Ipv4Addr::new(10, 10, 10, 2),
            prefix_len: 32,
            routes: Vec::new(),
            dns: Vec::new(),
            mtu: DEFAULT_MTU,
            excluded_apps: Vec::new(),
            blocking: false,
        }
    }
}

/// Builder for [`DeviceConfig`]
#[derive(Debug, Default)]
pub struct DeviceConfigBuilder {
    config: DeviceConfig,
}

impl DeviceConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the session name attached to the interface
    pub fn session_name(mut self, name: impl Into<String>) -> Self {
        self.config.session_name = name.into();
        self
    }

    /// Set the local address and prefix length
    pub fn local(mut self, address: Ipv4Addr, prefix_len: u8) -> Self {
        self.config.local = address;
        self.config.prefix_len = prefix_len;
        self
    }

    /// Set the local address from a string (e.g. "10.10.10.2")
    pub fn local_str(self, address: &str, prefix_len: u8) -> Result<Self> {
        let addr: Ipv4Addr = address
            .parse()
            .map_err(|_| Error::InvalidAddress(address.to_string()))?;
        Ok(self.local(addr, prefix_len))
    }

    /// Add a route directed into the tunnel
    pub fn route(mut self, network: Ipv4Addr, prefix_len: u8) -> Self {
        self.config.routes.push(TunnelRoute::new(network, prefix_len));
        self
    }

    /// Route all traffic into the tunnel
    pub fn default_route(mut self) -> Self {
        self.config.routes.push(TunnelRoute::default_route());
        self
    }

    /// Add a DNS server
    pub fn dns(mut self, server: IpAddr) -> Self {
        self.config.dns.push(server);
        self
    }

    /// Set the MTU
    pub fn mtu(mut self, mtu: u16) -> Self {
        self.config.mtu = mtu;
        self
    }

    /// Exclude an application from tunnel routing
    pub fn exclude_app(mut self, app: impl Into<String>) -> Self {
        self.config.excluded_apps.push(app.into());
        self
    }

    /// Set blocking mode for the descriptor
    pub fn blocking(mut self, blocking: bool) -> Self {
        self.config.blocking = blocking;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<DeviceConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
