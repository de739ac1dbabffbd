//! Session lifecycle controller for tunlink tunnel sessions
//!
//! Sequences a mobile-style VPN session from permission prompt to traffic
//! flow and back: acquire the tunnel permission, establish the tunnel device,
//! hand its descriptor to a packet-processing engine, and activate the
//! engine. Every failure and every revoke converges the session back to
//! `Disconnected`.
//!
//! # Architecture
//!
//! ```text
//!                  +-----------------+
//!   connect /      |  SessionHandle  |  status / stats / events
//!   disconnect --->|   (cloneable)   |--------------------------> UI shell
//!                  +--------+--------+
//!              commands |       | revoke (broadcast, preempts)
//!                       v       v
//!                  +-----------------+
//!                  |     Worker      |  single writer of SessionState
//!                  +--+-----------+--+
//!                     |           |
//!            establish|           |connect / start_tun / stop_tun
//!                     v           v
//!           +---------------+  +---------------+
//!           | DeviceService |  | EngineAdapter |
//!           | (tunlink-tun) |  |   (engine)    |
//!           +---------------+  +---------------+
//! ```
//!
//! The tunnel descriptor has exactly one owner at any instant: the device,
//! then the worker, then the engine, then (on disconnect) the worker again.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tunlink_session::{EngineHandle, SessionHandle};
//! use tunlink_tun::DeviceConfig;
//!
//! let session = SessionHandle::builder()
//!     .device_config(DeviceConfig::mobile_default("tunlink", "com.example.app"))
//!     .platform(my_platform)
//!     .engine(EngineHandle::new(my_engine))
//!     .spawn()?;
//!
//! if session.connect(&engine_config).await {
//!     println!("status: {}", session.status().await);
//! }
//! session.disconnect().await;
//! ```

pub mod adapter;
pub mod config;
pub mod controller;
pub mod error;
pub mod event;
pub mod logsink;
pub mod permission;
pub mod service;

pub use adapter::{AdapterError, EngineAdapter, EngineHandle};
pub use config::ControllerConfig;
pub use controller::{SessionControllerBuilder, SessionHandle};
pub use error::{Error, Result};
pub use event::{EventHandler, LoggingEventHandler, SessionEvent, SessionState, UiMessage};
pub use logsink::{FileLogSink, LogSink, NullLogSink};
pub use permission::{PermissionBroker, PermissionPrompt, StaticPrompt};
pub use service::{DeviceServiceHandle, EstablishedTunnel, ServiceMessage, DEFAULT_SOCKS_PORT};
