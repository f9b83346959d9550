//! Mock implementations for testing
//!
//! Provides a scripted [`Transport`] and factory plus recording device
//! capabilities, so the session can be exercised without a broker.

use crate::capabilities::{Indicator, SensorSwitch};
use crate::transport::{
    BrokerOptions, QoS, Transport, TransportError, TransportEvent, TransportEventSender,
    TransportFactory,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// How a mock transport answers `connect`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectBehavior {
    #[default]
    Succeed,
    /// Generic refusal
    Fail,
    /// Refusal with the broker-unavailable code
    BrokerUnavailable,
    /// Never resolves
    Hang,
    /// Times out, but the link comes up anyway
    LateAck,
}

/// A call recorded by [`MockTransport`]
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    Connect,
    Disconnect,
    Subscribe {
        topic: String,
        qos: QoS,
    },
    Unsubscribe {
        topic: String,
    },
    Publish {
        topic: String,
        payload: Bytes,
        qos: QoS,
        retained: bool,
    },
}

/// Mock transport for testing
#[derive(Debug)]
pub struct MockTransport {
    pub options: BrokerOptions,
    connect_behavior: ConnectBehavior,
    events: TransportEventSender,
    connected: AtomicBool,
    released: AtomicBool,
    fail_publish: AtomicBool,
    fail_disconnect: AtomicBool,
    calls: Mutex<Vec<TransportCall>>,
}

impl MockTransport {
    pub fn new(
        options: BrokerOptions,
        events: TransportEventSender,
        connect_behavior: ConnectBehavior,
    ) -> Self {
        Self {
            options,
            connect_behavior,
            events,
            connected: AtomicBool::new(false),
            released: AtomicBool::new(false),
            fail_publish: AtomicBool::new(false),
            fail_disconnect: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        lock(&self.calls).clone()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::Subscribe { topic, .. } => Some(topic),
                _ => None,
            })
            .collect()
    }

    /// Published `(topic, payload)` pairs, payload as UTF-8
    pub fn published(&self) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::Publish { topic, payload, .. } => {
                    Some((topic, String::from_utf8_lossy(&payload).into_owned()))
                }
                _ => None,
            })
            .collect()
    }

    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_disconnect(&self, fail: bool) {
        self.fail_disconnect.store(fail, Ordering::SeqCst);
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Deliver an inbound message as if the broker sent it
    pub fn inject_message(&self, topic: &str, payload: impl Into<Bytes>) {
        let _ = self.events.send(TransportEvent::Message {
            topic: topic.to_string(),
            payload: payload.into(),
        });
    }

    /// Simulate the link dropping
    pub fn drop_connection(&self, reason: &str) {
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.events.send(TransportEvent::ConnectionLost {
            reason: Some(reason.to_string()),
        });
    }

    fn record(&self, call: TransportCall) {
        lock(&self.calls).push(call);
    }

    fn require_connected(&self) -> Result<(), TransportError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        self.record(TransportCall::Connect);
        match self.connect_behavior {
            ConnectBehavior::Succeed => {
                self.connected.store(true, Ordering::SeqCst);
                Ok(())
            }
            ConnectBehavior::Fail => Err(TransportError::ConnectionRefused(
                "mock refused".to_string(),
            )),
            ConnectBehavior::BrokerUnavailable => Err(TransportError::BrokerUnavailable),
            ConnectBehavior::Hang => std::future::pending().await,
            ConnectBehavior::LateAck => {
                self.connected.store(true, Ordering::SeqCst);
                Err(TransportError::Timeout(self.options.connect_timeout))
            }
        }
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.record(TransportCall::Disconnect);
        if self.fail_disconnect.load(Ordering::SeqCst) {
            return Err(TransportError::DisconnectFailed(
                "mock disconnect failure".into(),
            ));
        }
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        self.record(TransportCall::Subscribe {
            topic: topic.to_string(),
            qos,
        });
        self.require_connected()
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.record(TransportCall::Unsubscribe {
            topic: topic.to_string(),
        });
        self.require_connected()
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retained: bool,
    ) -> Result<(), TransportError> {
        self.record(TransportCall::Publish {
            topic: topic.to_string(),
            payload,
            qos,
            retained,
        });
        self.require_connected()?;
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(TransportError::PublishFailed("mock publish failure".into()));
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn release(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.released.store(true, Ordering::SeqCst);
    }
}

/// Factory handing out [`MockTransport`]s with scripted connect behavior
///
/// Scripted behaviors are consumed one per created transport; once the
/// script is empty every transport connects successfully.
#[derive(Debug, Default)]
pub struct MockTransportFactory {
    script: Mutex<VecDeque<ConnectBehavior>>,
    created: Mutex<Vec<Arc<MockTransport>>>,
}

impl MockTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(behaviors: impl IntoIterator<Item = ConnectBehavior>) -> Self {
        Self {
            script: Mutex::new(behaviors.into_iter().collect()),
            created: Mutex::new(Vec::new()),
        }
    }

    pub fn push_behavior(&self, behavior: ConnectBehavior) {
        lock(&self.script).push_back(behavior);
    }

    pub fn created(&self) -> Vec<Arc<MockTransport>> {
        lock(&self.created).clone()
    }

    pub fn created_options(&self) -> Vec<BrokerOptions> {
        self.created().iter().map(|t| t.options.clone()).collect()
    }

    pub fn last_transport(&self) -> Option<Arc<MockTransport>> {
        lock(&self.created).last().cloned()
    }
}

impl TransportFactory for MockTransportFactory {
    fn create(
        &self,
        options: &BrokerOptions,
        events: TransportEventSender,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        let behavior = lock(&self.script).pop_front().unwrap_or_default();
        let transport = Arc::new(MockTransport::new(options.clone(), events, behavior));
        lock(&self.created).push(transport.clone());
        Ok(transport)
    }
}

/// Sensor switch that counts its calls
#[derive(Debug, Default)]
pub struct RecordingSensor {
    enabled: AtomicBool,
    enables: AtomicUsize,
    disables: AtomicUsize,
}

impl RecordingSensor {
    pub fn enable_calls(&self) -> usize {
        self.enables.load(Ordering::SeqCst)
    }

    pub fn disable_calls(&self) -> usize {
        self.disables.load(Ordering::SeqCst)
    }
}

impl SensorSwitch for RecordingSensor {
    fn enable(&self) {
        self.enables.fetch_add(1, Ordering::SeqCst);
        self.enabled.store(true, Ordering::SeqCst);
    }

    fn disable(&self) {
        self.disables.fetch_add(1, Ordering::SeqCst);
        self.enabled.store(false, Ordering::SeqCst);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}

/// Indicator that counts state changes
#[derive(Debug)]
pub struct RecordingIndicator {
    available: bool,
    on: AtomicBool,
    switches: AtomicUsize,
}

impl RecordingIndicator {
    pub fn new(available: bool) -> Self {
        Self {
            available,
            on: AtomicBool::new(false),
            switches: AtomicUsize::new(0),
        }
    }

    pub fn switch_count(&self) -> usize {
        self.switches.load(Ordering::SeqCst)
    }
}

impl Default for RecordingIndicator {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Indicator for RecordingIndicator {
    fn is_available(&self) -> bool {
        self.available
    }

    fn is_on(&self) -> bool {
        self.on.load(Ordering::SeqCst)
    }

    fn set(&self, on: bool) {
        self.switches.fetch_add(1, Ordering::SeqCst);
        self.on.store(on, Ordering::SeqCst);
    }
}

/// Poll `condition` until it holds or `timeout` passes
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
