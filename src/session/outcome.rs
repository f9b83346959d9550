//! Correlation of asynchronous operation results
//!
//! Every transport call the session issues is registered here as a
//! [`PendingOperation`] and resolved later by its [`OperationOutcome`]. The
//! handler applies the state transition and notifications for the outcome
//! and tells the caller which follow-up operations to issue. Nothing is
//! retried.

use crate::capabilities::DeviceCapabilities;
use crate::session::notify::{NotificationBus, NotificationEvent};
use crate::session::state::{AppState, SessionState, ViewKind};
use crate::transport::TransportError;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Tag of an in-flight operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Connecting,
    Subscribe,
    Unsubscribe,
    Publish,
    Disconnecting,
}

/// An issued operation awaiting its result
#[derive(Debug, Clone)]
pub struct PendingOperation {
    pub id: Uuid,
    pub kind: OperationKind,
    /// Transport generation the operation was issued on
    pub generation: u64,
    /// Topic or broker URI, for logging
    pub detail: String,
    pub issued_at: DateTime<Utc>,
}

/// Result of an operation, posted back by the task that awaited it
#[derive(Debug)]
pub struct OperationOutcome {
    pub id: Uuid,
    pub kind: OperationKind,
    pub generation: u64,
    pub result: Result<(), TransportError>,
}

/// Operations the session must issue after handling an outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowUp {
    /// Subscribe to the wildcard command topic
    SubscribeCommands,
}

/// Tracks pending operations and applies their outcomes
#[derive(Debug, Default)]
pub struct OperationOutcomeHandler {
    pending: HashMap<Uuid, PendingOperation>,
}

impl OperationOutcomeHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new operation
    pub fn begin(
        &mut self,
        kind: OperationKind,
        generation: u64,
        detail: impl Into<String>,
    ) -> PendingOperation {
        let operation = PendingOperation {
            id: Uuid::new_v4(),
            kind,
            generation,
            detail: detail.into(),
            issued_at: Utc::now(),
        };
        debug!(id = %operation.id, ?kind, detail = %operation.detail, "Operation issued");
        self.pending.insert(operation.id, operation.clone());
        operation
    }

    #[cfg(test)]
    pub(crate) fn is_in_flight(&self, kind: OperationKind) -> bool {
        self.pending.values().any(|op| op.kind == kind)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Forget operations issued on transports older than `generation`
    pub fn discard_before(&mut self, generation: u64) {
        self.pending.retain(|_, op| op.generation >= generation);
    }

    /// Apply an outcome. Unknown or stale outcomes are ignored.
    pub fn handle(
        &mut self,
        outcome: OperationOutcome,
        state: &mut AppState,
        bus: &mut NotificationBus,
        capabilities: &DeviceCapabilities,
    ) -> Vec<FollowUp> {
        let Some(operation) = self.pending.remove(&outcome.id) else {
            debug!(id = %outcome.id, kind = ?outcome.kind, "Ignoring outcome for unknown operation");
            return Vec::new();
        };
        let elapsed = (Utc::now() - operation.issued_at)
            .to_std()
            .unwrap_or(Duration::ZERO);

        match outcome.result {
            Ok(()) => Self::on_success(&operation, elapsed, state, bus, capabilities),
            Err(e) => {
                Self::on_failure(&operation, &e, state, bus);
                Vec::new()
            }
        }
    }

    fn on_success(
        operation: &PendingOperation,
        elapsed: Duration,
        state: &mut AppState,
        bus: &mut NotificationBus,
        capabilities: &DeviceCapabilities,
    ) -> Vec<FollowUp> {
        match operation.kind {
            OperationKind::Connecting => {
                state.mark_connected();
                info!(broker = %operation.detail, ?elapsed, "Connected");

                if state.accel_enabled {
                    capabilities.sensor.enable();
                }
                bus.emit_if_active(
                    state.active_view,
                    ViewKind::Login,
                    NotificationEvent::Connected,
                );

                match state.connection_kind {
                    Some(kind) if kind.subscribes_to_commands() => vec![FollowUp::SubscribeCommands],
                    _ => Vec::new(),
                }
            }
            OperationKind::Disconnecting => {
                if state.session == SessionState::Disconnected {
                    debug!(?elapsed, "Disconnect finished after the link was already lost");
                } else {
                    mark_disconnected(state, bus, capabilities);
                    info!(?elapsed, "Disconnected");
                }
                Vec::new()
            }
            OperationKind::Subscribe | OperationKind::Unsubscribe | OperationKind::Publish => {
                debug!(kind = ?operation.kind, detail = %operation.detail, ?elapsed, "Operation succeeded");
                Vec::new()
            }
        }
    }

    fn on_failure(
        operation: &PendingOperation,
        error: &TransportError,
        state: &mut AppState,
        bus: &mut NotificationBus,
    ) {
        match operation.kind {
            OperationKind::Connecting => {
                error!(broker = %operation.detail, error = %error, "Connect failed");
                state.mark_disconnected();
                bus.emit_if_active(
                    state.active_view,
                    ViewKind::Login,
                    NotificationEvent::Disconnected,
                );
                if error.is_broker_unavailable() {
                    bus.emit_to_active(state.active_view, NotificationEvent::BrokerUnavailable);
                }
            }
            OperationKind::Disconnecting => {
                error!(error = %error, "Disconnect failed");
                if state.session == SessionState::Disconnecting {
                    state.session = SessionState::Connected;
                }
            }
            OperationKind::Subscribe | OperationKind::Unsubscribe | OperationKind::Publish => {
                warn!(kind = ?operation.kind, detail = %operation.detail, error = %error, "Operation failed");
            }
        }
    }
}

/// Flip to Disconnected, stop the sensor, and tell the login view
pub fn mark_disconnected(
    state: &mut AppState,
    bus: &mut NotificationBus,
    capabilities: &DeviceCapabilities,
) {
    state.mark_disconnected();
    capabilities.sensor.disable();
    bus.emit_if_active(
        state.active_view,
        ViewKind::Login,
        NotificationEvent::Disconnected,
    );
}
