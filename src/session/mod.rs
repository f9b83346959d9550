//! Broker session: connection lifecycle, operation outcomes, shared state
//! and view notifications
//!
//! [`SessionService::start`] spawns the task that owns all of it and hands
//! back a [`SessionHandle`] for issuing commands.
//!
//! ```rust
//! use iotstarter::capabilities::DeviceCapabilities;
//! use iotstarter::config::AppConfig;
//! use iotstarter::profiles::ConnectionProfile;
//! use iotstarter::session::{NotificationEvent, SessionService, ViewKind};
//! use iotstarter::testing::mocks::MockTransportFactory;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let (session, _task) = SessionService::start(
//!     AppConfig::default(),
//!     Arc::new(MockTransportFactory::new()),
//!     DeviceCapabilities::default(),
//! );
//! session.set_active_view(Some(ViewKind::Login)).await.unwrap();
//! let mut login = session.subscribe_notifications(ViewKind::Login).await.unwrap();
//!
//! session
//!     .connect(ConnectionProfile::new("demo", "quickstart", "dev1", ""))
//!     .await
//!     .unwrap();
//! assert_eq!(login.recv().await.unwrap().event, NotificationEvent::Connected);
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod notify;
pub mod outcome;
pub mod service;
pub mod state;

pub use client::SessionClient;
pub use connection::{ConnectionConfig, ConnectionConfigError, ConnectionKind};
pub use notify::{Notification, NotificationBus, NotificationEvent};
pub use outcome::{OperationKind, OperationOutcome, OperationOutcomeHandler};
pub use service::{SessionHandle, SessionService};
pub use state::{AppState, Counters, SessionSnapshot, SessionState, ViewKind};
