//! The session service task and its handle
//!
//! One task owns the session state, the client and the notification bus.
//! Commands from handles, operation outcomes and transport events all
//! arrive on a single channel and are applied one at a time, in arrival
//! order.

use crate::capabilities::DeviceCapabilities;
use crate::config::AppConfig;
use crate::error::SessionError;
use crate::profiles::ConnectionProfile;
use crate::protocol::OutboundEvent;
use crate::session::client::SessionClient;
use crate::session::notify::{Notification, NotificationBus};
use crate::session::outcome::OperationOutcome;
use crate::session::state::{AppState, SessionSnapshot, ViewKind};
use crate::transport::{QoS, TransportEvent, TransportFactory};
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, Instrument};

type Reply<T> = oneshot::Sender<T>;

/// Everything the service task consumes
#[derive(Debug)]
pub(crate) enum SessionInput {
    Command(SessionCommand),
    Outcome(OperationOutcome),
    Transport { generation: u64, event: TransportEvent },
}

#[derive(Debug)]
pub(crate) enum SessionCommand {
    Connect {
        profile: ConnectionProfile,
        reply: Reply<Result<(), SessionError>>,
    },
    Disconnect {
        reply: Reply<Result<(), SessionError>>,
    },
    Subscribe {
        topic: String,
        qos: QoS,
        reply: Reply<Result<(), SessionError>>,
    },
    Unsubscribe {
        topic: String,
        reply: Reply<Result<(), SessionError>>,
    },
    Publish {
        topic: String,
        payload: Bytes,
        qos: QoS,
        retained: bool,
        reply: Reply<Result<(), SessionError>>,
    },
    PublishEvent {
        event: OutboundEvent,
        reply: Reply<Result<(), SessionError>>,
    },
    SetActiveView {
        view: Option<ViewKind>,
        reply: Reply<()>,
    },
    ToggleAccel {
        reply: Reply<bool>,
    },
    Snapshot {
        reply: Reply<SessionSnapshot>,
    },
    MessageLog {
        reply: Reply<Vec<String>>,
    },
    TakeMessageLog {
        reply: Reply<Vec<String>>,
    },
    SubscribeNotifications {
        view: ViewKind,
        reply: Reply<mpsc::UnboundedReceiver<Notification>>,
    },
    Shutdown {
        reply: Reply<()>,
    },
}

pub struct SessionService {
    state: AppState,
    bus: NotificationBus,
    client: SessionClient,
    inputs: mpsc::UnboundedReceiver<SessionInput>,
}

impl SessionService {
    /// Spawn the service task
    ///
    /// The task stops on [`SessionHandle::shutdown`] or once every handle
    /// has been dropped.
    pub fn start(
        config: AppConfig,
        factory: Arc<dyn TransportFactory>,
        capabilities: DeviceCapabilities,
    ) -> (SessionHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let device_type = config.device.device_type.clone();
        let service = Self {
            state: AppState::new(),
            bus: NotificationBus::new(),
            client: SessionClient::new(config, factory, capabilities, tx.downgrade()),
            inputs: rx,
        };

        let span = crate::session_span!(device_type = %device_type);
        let task = tokio::spawn(service.run().instrument(span));
        (SessionHandle { tx }, task)
    }

    async fn run(mut self) {
        info!("Session service started");
        while let Some(input) = self.inputs.recv().await {
            match input {
                SessionInput::Command(SessionCommand::Shutdown { reply }) => {
                    self.client.release();
                    let _ = reply.send(());
                    break;
                }
                SessionInput::Command(command) => self.handle_command(command),
                SessionInput::Outcome(outcome) => {
                    self.client.complete(outcome, &mut self.state, &mut self.bus)
                }
                SessionInput::Transport { generation, event } => self.client.handle_transport_event(
                    generation,
                    event,
                    &mut self.state,
                    &mut self.bus,
                ),
            }
        }
        self.client.release();
        info!("Session service stopped");
    }

    fn handle_command(&mut self, command: SessionCommand) {
        let state = &mut self.state;
        let bus = &mut self.bus;

        match command {
            SessionCommand::Connect { profile, reply } => {
                let _ = reply.send(self.client.connect(&profile, state));
            }
            SessionCommand::Disconnect { reply } => {
                let _ = reply.send(self.client.disconnect(state));
            }
            SessionCommand::Subscribe { topic, qos, reply } => {
                let _ = reply.send(self.client.subscribe(&topic, qos, state, bus));
            }
            SessionCommand::Unsubscribe { topic, reply } => {
                let _ = reply.send(self.client.unsubscribe(&topic, state, bus));
            }
            SessionCommand::Publish {
                topic,
                payload,
                qos,
                retained,
                reply,
            } => {
                let _ = reply.send(
                    self.client
                        .publish(&topic, payload, qos, retained, state, bus),
                );
            }
            SessionCommand::PublishEvent { event, reply } => {
                let _ = reply.send(self.client.publish_event(&event, state, bus));
            }
            SessionCommand::SetActiveView { view, reply } => {
                debug!(?view, "Active view changed");
                state.set_active_view(view);
                let _ = reply.send(());
            }
            SessionCommand::ToggleAccel { reply } => {
                let _ = reply.send(self.client.toggle_accel(state));
            }
            SessionCommand::Snapshot { reply } => {
                let mut snapshot = state.snapshot();
                snapshot.pending_operations = self.client.pending_operations();
                let _ = reply.send(snapshot);
            }
            SessionCommand::MessageLog { reply } => {
                let _ = reply.send(state.log.entries().to_vec());
            }
            SessionCommand::TakeMessageLog { reply } => {
                let _ = reply.send(state.take_message_log());
            }
            SessionCommand::SubscribeNotifications { view, reply } => {
                let _ = reply.send(bus.subscribe(view));
            }
            SessionCommand::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }
}

/// Cloneable handle to a running session service
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<SessionInput>,
}

impl SessionHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> SessionCommand,
    ) -> Result<T, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SessionInput::Command(build(reply)))
            .map_err(|_| SessionError::ServiceStopped)?;
        rx.await.map_err(|_| SessionError::ServiceStopped)
    }

    /// Start connecting with `profile`; the result arrives as a notification
    pub async fn connect(&self, profile: ConnectionProfile) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::Connect { profile, reply })
            .await?
    }

    pub async fn disconnect(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::Disconnect { reply })
            .await?
    }

    pub async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), SessionError> {
        let topic = topic.to_string();
        self.request(|reply| SessionCommand::Subscribe { topic, qos, reply })
            .await?
    }

    pub async fn unsubscribe(&self, topic: &str) -> Result<(), SessionError> {
        let topic = topic.to_string();
        self.request(|reply| SessionCommand::Unsubscribe { topic, reply })
            .await?
    }

    pub async fn publish(
        &self,
        topic: &str,
        payload: impl Into<Bytes>,
        qos: QoS,
        retained: bool,
    ) -> Result<(), SessionError> {
        let topic = topic.to_string();
        let payload = payload.into();
        self.request(|reply| SessionCommand::Publish {
            topic,
            payload,
            qos,
            retained,
            reply,
        })
        .await?
    }

    /// Publish a device event on its event topic
    pub async fn publish_event(&self, event: OutboundEvent) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::PublishEvent { event, reply })
            .await?
    }

    pub async fn set_active_view(&self, view: Option<ViewKind>) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::SetActiveView { view, reply })
            .await
    }

    /// Returns whether accelerometer publishing is now enabled
    pub async fn toggle_accel(&self) -> Result<bool, SessionError> {
        self.request(|reply| SessionCommand::ToggleAccel { reply })
            .await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        self.request(|reply| SessionCommand::Snapshot { reply })
            .await
    }

    pub async fn message_log(&self) -> Result<Vec<String>, SessionError> {
        self.request(|reply| SessionCommand::MessageLog { reply })
            .await
    }

    /// Return the log and clear it, resetting the unread count
    pub async fn take_message_log(&self) -> Result<Vec<String>, SessionError> {
        self.request(|reply| SessionCommand::TakeMessageLog { reply })
            .await
    }

    pub async fn subscribe_notifications(
        &self,
        view: ViewKind,
    ) -> Result<mpsc::UnboundedReceiver<Notification>, SessionError> {
        self.request(|reply| SessionCommand::SubscribeNotifications { view, reply })
            .await
    }

    /// Release the transport and stop the service task
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::Shutdown { reply })
            .await
    }

    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::SoftIndicator;
    use crate::session::notify::NotificationEvent;
    use crate::session::state::SessionState;
    use crate::testing::mocks::{wait_until, ConnectBehavior, MockTransportFactory, RecordingSensor};
    use crate::transport::Transport;
    use std::time::Duration;

    fn start(factory: Arc<MockTransportFactory>) -> (SessionHandle, JoinHandle<()>) {
        let capabilities = DeviceCapabilities::new(
            Arc::new(SoftIndicator::new()),
            Arc::new(RecordingSensor::default()),
        );
        SessionService::start(AppConfig::test_config(), factory, capabilities)
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<Notification>) -> NotificationEvent {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for notification")
            .expect("notification channel closed")
            .event
    }

    #[tokio::test]
    async fn test_connect_notifies_login() {
        let factory = Arc::new(MockTransportFactory::new());
        let (handle, _task) = start(factory.clone());
        handle.set_active_view(Some(ViewKind::Login)).await.unwrap();
        let mut login = handle.subscribe_notifications(ViewKind::Login).await.unwrap();

        handle
            .connect(ConnectionProfile::new("p", "acme", "dev2", "tok"))
            .await
            .unwrap();
        assert_eq!(recv(&mut login).await, NotificationEvent::Connected);

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.state, SessionState::Connected);
    }

    #[tokio::test]
    async fn test_disconnect_while_connecting_rejected() {
        let factory = Arc::new(MockTransportFactory::with_script([ConnectBehavior::Hang]));
        let (handle, _task) = start(factory);

        handle
            .connect(ConnectionProfile::new("p", "quickstart", "dev1", ""))
            .await
            .unwrap();
        assert!(matches!(
            handle.disconnect().await,
            Err(SessionError::OperationInFlight(_))
        ));
        assert_eq!(
            handle.snapshot().await.unwrap().state,
            SessionState::Connecting
        );
    }

    #[tokio::test]
    async fn test_shutdown_stops_service() {
        let factory = Arc::new(MockTransportFactory::new());
        let (handle, task) = start(factory.clone());
        handle
            .connect(ConnectionProfile::new("p", "quickstart", "dev1", ""))
            .await
            .unwrap();

        let transport = factory.last_transport().unwrap();
        assert!(wait_until(Duration::from_secs(1), || transport.is_connected()).await);

        handle.shutdown().await.unwrap();
        task.await.unwrap();

        assert!(transport.is_released());
        assert!(matches!(
            handle.snapshot().await,
            Err(SessionError::ServiceStopped)
        ));
    }

    #[tokio::test]
    async fn test_dropping_handles_stops_service() {
        let factory = Arc::new(MockTransportFactory::new());
        let (handle, task) = start(factory);
        drop(handle);

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("service did not stop")
            .unwrap();
    }
}
