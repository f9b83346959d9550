//! IoT Starter - device-side MQTT client
//!
//! A device keeps one long-lived session with an IoT Foundation broker,
//! publishes its own events, and reacts to commands the broker sends it.
//!
//! # Overview
//!
//! - [`profiles`]: named connection profiles persisted as string-set records
//! - [`session`]: the connection state machine, operation outcomes and view
//!   notifications, all owned by one service task
//! - [`routing`]: topic-substring dispatch of inbound commands
//! - [`protocol`]: topic strings and `{"d": {...}}` payloads
//! - [`transport`]: the transport capability and its rumqttc implementation
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use iotstarter::capabilities::DeviceCapabilities;
//! use iotstarter::config::AppConfig;
//! use iotstarter::profiles::ConnectionProfile;
//! use iotstarter::session::{SessionService, ViewKind};
//! use iotstarter::transport::mqtt::MqttTransportFactory;
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), iotstarter::error::SessionError> {
//! let (session, _task) = SessionService::start(
//!     AppConfig::default(),
//!     Arc::new(MqttTransportFactory),
//!     DeviceCapabilities::default(),
//! );
//!
//! session.set_active_view(Some(ViewKind::Login)).await?;
//! let mut login = session.subscribe_notifications(ViewKind::Login).await?;
//! session
//!     .connect(ConnectionProfile::new("demo", "quickstart", "a1b2c3d4e5f6", ""))
//!     .await?;
//!
//! if let Some(notification) = login.recv().await {
//!     println!("{:?}", notification.event);
//! }
//! # Ok(())
//! # }
//! ```

pub mod capabilities;
pub mod config;
pub mod error;
pub mod observability;
pub mod profiles;
pub mod protocol;
pub mod routing;
pub mod session;
pub mod testing;
pub mod transport;

pub use config::AppConfig;
pub use error::{IotError, IotResult, SessionError};
pub use profiles::{ConnectionProfile, ProfileStore};
pub use session::{SessionHandle, SessionService};
