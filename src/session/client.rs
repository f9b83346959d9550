//! Session client: owns the transport handle and issues operations
//!
//! Every transport call runs on its own task and reports back through the
//! session input channel as an [`OperationOutcome`]. The client never awaits
//! the transport itself, so the service loop stays responsive while a
//! connect or publish is in flight.

use crate::capabilities::DeviceCapabilities;
use crate::config::AppConfig;
use crate::error::SessionError;
use crate::profiles::ConnectionProfile;
use crate::protocol::{command_wildcard_topic, OutboundEvent};
use crate::routing::MessageRouter;
use crate::session::connection::ConnectionConfig;
use crate::session::notify::{NotificationBus, NotificationEvent};
use crate::session::outcome::{
    self, FollowUp, OperationKind, OperationOutcome, OperationOutcomeHandler, PendingOperation,
};
use crate::session::service::SessionInput;
use crate::session::state::{AppState, SessionState, ViewKind};
use crate::transport::{QoS, Transport, TransportError, TransportEvent, TransportFactory};
use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub struct SessionClient {
    config: AppConfig,
    factory: Arc<dyn TransportFactory>,
    transport: Option<Arc<dyn Transport>>,
    /// Bumped for every new transport handle
    generation: u64,
    /// Loss reported before the connect outcome arrived
    lost_while_connecting: Option<Option<String>>,
    outcomes: OperationOutcomeHandler,
    router: MessageRouter,
    capabilities: DeviceCapabilities,
    inputs: mpsc::WeakUnboundedSender<SessionInput>,
}

impl SessionClient {
    pub(crate) fn new(
        config: AppConfig,
        factory: Arc<dyn TransportFactory>,
        capabilities: DeviceCapabilities,
        inputs: mpsc::WeakUnboundedSender<SessionInput>,
    ) -> Self {
        let router = MessageRouter::new(capabilities.indicator.clone());
        Self {
            config,
            factory,
            transport: None,
            generation: 0,
            lost_while_connecting: None,
            outcomes: OperationOutcomeHandler::new(),
            router,
            capabilities,
            inputs,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn pending_operations(&self) -> usize {
        self.outcomes.pending_count()
    }

    /// Start connecting with `profile`. Returns once the attempt is issued.
    pub fn connect(
        &mut self,
        profile: &ConnectionProfile,
        state: &mut AppState,
    ) -> Result<(), SessionError> {
        if state.session == SessionState::Connecting {
            return Err(SessionError::OperationInFlight(OperationKind::Connecting));
        }
        if state.session != SessionState::Disconnected
            && self.transport.as_ref().is_some_and(|t| t.is_connected())
        {
            debug!(profile = %profile.name, "Already connected, ignoring connect");
            return Ok(());
        }

        let resolved =
            ConnectionConfig::resolve(profile, &self.config.broker, &self.config.device)?;
        let options = resolved.broker_options(&self.config.broker);

        self.release_transport();
        self.generation += 1;
        self.outcomes.discard_before(self.generation);
        self.lost_while_connecting = None;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let transport = self.factory.create(&options, events_tx)?;
        self.spawn_event_forwarder(events_rx);
        self.transport = Some(transport.clone());

        state.session = SessionState::Connecting;
        state.connection_kind = Some(resolved.kind);
        info!(
            profile = %profile.name,
            kind = %resolved.kind,
            broker = %options.server_uri(),
            client_id = %options.client_id,
            "Connecting"
        );

        let operation =
            self.outcomes
                .begin(OperationKind::Connecting, self.generation, options.server_uri());
        self.spawn_operation(&operation, transport, |t| async move { t.connect().await });
        Ok(())
    }

    /// Start a graceful disconnect. No-op when not connected.
    pub fn disconnect(&mut self, state: &mut AppState) -> Result<(), SessionError> {
        match state.session {
            SessionState::Connecting => {
                return Err(SessionError::OperationInFlight(OperationKind::Connecting))
            }
            SessionState::Disconnecting => {
                return Err(SessionError::OperationInFlight(OperationKind::Disconnecting))
            }
            SessionState::Disconnected => {
                debug!("Not connected, ignoring disconnect");
                return Ok(());
            }
            SessionState::Connected => {}
        }
        let Some(transport) = self.transport.clone() else {
            state.mark_disconnected();
            return Ok(());
        };

        state.session = SessionState::Disconnecting;
        info!("Disconnecting");
        let operation = self
            .outcomes
            .begin(OperationKind::Disconnecting, self.generation, "");
        self.spawn_operation(&operation, transport, |t| async move { t.disconnect().await });
        Ok(())
    }

    pub fn subscribe(
        &mut self,
        topic: &str,
        qos: QoS,
        state: &mut AppState,
        bus: &mut NotificationBus,
    ) -> Result<(), SessionError> {
        let transport = self.require_connected(state, bus)?;
        let operation = self
            .outcomes
            .begin(OperationKind::Subscribe, self.generation, topic);
        let topic = topic.to_string();
        self.spawn_operation(&operation, transport, move |t| async move {
            t.subscribe(&topic, qos).await
        });
        Ok(())
    }

    pub fn unsubscribe(
        &mut self,
        topic: &str,
        state: &mut AppState,
        bus: &mut NotificationBus,
    ) -> Result<(), SessionError> {
        let transport = self.require_connected(state, bus)?;
        let operation = self
            .outcomes
            .begin(OperationKind::Unsubscribe, self.generation, topic);
        let topic = topic.to_string();
        self.spawn_operation(&operation, transport, move |t| async move {
            t.unsubscribe(&topic).await
        });
        Ok(())
    }

    /// Publish and count it immediately, whatever the eventual outcome
    pub fn publish(
        &mut self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retained: bool,
        state: &mut AppState,
        bus: &mut NotificationBus,
    ) -> Result<(), SessionError> {
        let transport = self.require_connected(state, bus)?;

        state.counters.publish_count += 1;
        bus.emit_if_active(
            state.active_view,
            ViewKind::Messaging,
            NotificationEvent::Published,
        );

        let operation = self
            .outcomes
            .begin(OperationKind::Publish, self.generation, topic);
        let topic = topic.to_string();
        self.spawn_operation(&operation, transport, move |t| async move {
            t.publish(&topic, payload, qos, retained).await
        });
        Ok(())
    }

    /// Encode a device event and publish it at QoS 0, not retained
    pub fn publish_event(
        &mut self,
        event: &OutboundEvent,
        state: &mut AppState,
        bus: &mut NotificationBus,
    ) -> Result<(), SessionError> {
        if matches!(event, OutboundEvent::Text(_))
            && state.connection_kind.is_some_and(|kind| !kind.allows_text())
        {
            return Err(SessionError::NotPermitted(
                "text messages cannot be sent on a quickstart connection".to_string(),
            ));
        }
        let (topic, body) = event.encode()?;
        self.publish(&topic, Bytes::from(body), QoS::AtMostOnce, false, state, bus)
    }

    /// Flip accelerometer publishing; the sensor follows only while connected
    pub fn toggle_accel(&self, state: &mut AppState) -> bool {
        state.accel_enabled = !state.accel_enabled;
        if state.is_connected() {
            if state.accel_enabled {
                self.capabilities.sensor.enable();
            } else {
                self.capabilities.sensor.disable();
            }
        }
        debug!(enabled = state.accel_enabled, "Accelerometer toggled");
        state.accel_enabled
    }

    /// Apply an event from the transport with the given generation
    pub fn handle_transport_event(
        &mut self,
        generation: u64,
        event: TransportEvent,
        state: &mut AppState,
        bus: &mut NotificationBus,
    ) {
        if generation != self.generation {
            debug!(generation, current = self.generation, "Ignoring event from released transport");
            return;
        }
        match event {
            TransportEvent::Message { topic, payload } => {
                self.on_message(&topic, &payload, state, bus)
            }
            TransportEvent::ConnectionLost { reason } => match state.session {
                SessionState::Connected | SessionState::Disconnecting => {
                    self.on_connection_lost(reason.as_deref(), state, bus)
                }
                SessionState::Connecting => {
                    debug!(?reason, "Connection lost before connect completed");
                    self.lost_while_connecting = Some(reason);
                }
                SessionState::Disconnected => {
                    debug!(?reason, "Connection lost while not connected")
                }
            },
        }
    }

    /// Count, notify, then route an inbound message
    pub fn on_message(
        &self,
        topic: &str,
        payload: &[u8],
        state: &mut AppState,
        bus: &mut NotificationBus,
    ) {
        state.counters.receive_count += 1;
        bus.emit_if_active(
            state.active_view,
            ViewKind::Messaging,
            NotificationEvent::Received,
        );

        if let Err(e) = self.router.route(topic, payload, state, bus) {
            warn!(topic = %topic, error = %e, "Dropping malformed message");
        }
    }

    pub fn on_connection_lost(
        &self,
        reason: Option<&str>,
        state: &mut AppState,
        bus: &mut NotificationBus,
    ) {
        warn!(reason = reason.unwrap_or("unknown"), "Connection lost");
        outcome::mark_disconnected(state, bus, &self.capabilities);
    }

    /// Resolve an operation and issue whatever it asks for next
    pub fn complete(
        &mut self,
        outcome: OperationOutcome,
        state: &mut AppState,
        bus: &mut NotificationBus,
    ) {
        if outcome.generation != self.generation {
            debug!(
                id = %outcome.id,
                generation = outcome.generation,
                "Ignoring outcome from released transport"
            );
            return;
        }

        let completes_connect = outcome.kind == OperationKind::Connecting;
        let follow_ups = self.outcomes.handle(outcome, state, bus, &self.capabilities);

        if completes_connect {
            if let Some(reason) = self.lost_while_connecting.take() {
                if state.is_connected() {
                    self.on_connection_lost(reason.as_deref(), state, bus);
                    return;
                }
            }
        }

        for follow_up in follow_ups {
            match follow_up {
                FollowUp::SubscribeCommands => {
                    let topic = command_wildcard_topic();
                    if let Err(e) = self.subscribe(&topic, QoS::AtMostOnce, state, bus) {
                        warn!(topic = %topic, error = %e, "Command subscription not issued");
                    }
                }
            }
        }
    }

    /// Drop the transport handle and stop its background work
    pub fn release(&mut self) {
        self.release_transport();
        self.generation += 1;
        self.outcomes.discard_before(self.generation);
        self.lost_while_connecting = None;
    }

    fn release_transport(&mut self) {
        if let Some(transport) = self.transport.take() {
            debug!(generation = self.generation, "Releasing transport");
            transport.release();
        }
    }

    /// The live transport, or connection-loss handling and `NotConnected`
    fn require_connected(
        &self,
        state: &mut AppState,
        bus: &mut NotificationBus,
    ) -> Result<Arc<dyn Transport>, SessionError> {
        match state.session {
            SessionState::Connecting => {
                return Err(SessionError::OperationInFlight(OperationKind::Connecting))
            }
            SessionState::Disconnecting => {
                return Err(SessionError::OperationInFlight(OperationKind::Disconnecting))
            }
            _ => {}
        }

        match &self.transport {
            Some(transport) if state.is_connected() && transport.is_connected() => {
                Ok(transport.clone())
            }
            _ => {
                self.on_connection_lost(Some("operation issued while not connected"), state, bus);
                Err(SessionError::NotConnected)
            }
        }
    }

    fn spawn_operation<F, Fut>(
        &self,
        operation: &PendingOperation,
        transport: Arc<dyn Transport>,
        call: F,
    ) where
        F: FnOnce(Arc<dyn Transport>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), TransportError>> + Send + 'static,
    {
        let inputs = self.inputs.clone();
        let id = operation.id;
        let kind = operation.kind;
        let generation = operation.generation;

        tokio::spawn(async move {
            let result = call(transport).await;
            let outcome = OperationOutcome {
                id,
                kind,
                generation,
                result,
            };
            match inputs.upgrade() {
                Some(tx) => {
                    let _ = tx.send(SessionInput::Outcome(outcome));
                }
                None => debug!(%id, ?kind, "Session gone, dropping outcome"),
            }
        });
    }

    fn spawn_event_forwarder(&self, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
        let inputs = self.inputs.clone();
        let generation = self.generation;

        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(tx) = inputs.upgrade() else {
                    break;
                };
                if tx.send(SessionInput::Transport { generation, event }).is_err() {
                    break;
                }
            }
            debug!(generation, "Transport event forwarder finished");
        });
    }
}
