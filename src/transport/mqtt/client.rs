//! rumqttc-backed [`Transport`]
//!
//! Each [`MqttTransport`] is good for one connection. The event loop runs on
//! its own task, completes `connect()` when the CONNACK arrives, forwards
//! inbound publishes, and reports an unsolicited drop once. It never
//! reconnects on its own.

use super::connection::{configure_mqtt_options, map_connection_error};
use super::message_handler::{route_mqtt_event, EventRoute};
use crate::transport::{
    BrokerOptions, QoS, Transport, TransportError, TransportEvent, TransportEventSender,
    TransportFactory,
};
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{AsyncClient, EventLoop};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

const REQUEST_CAPACITY: usize = 10;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

type ConnAckSender = oneshot::Sender<Result<(), TransportError>>;

/// One broker connection over rumqttc
pub struct MqttTransport {
    client_id: String,
    client: AsyncClient,
    event_loop: Mutex<Option<EventLoop>>,
    events: TransportEventSender,
    connected: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
    event_loop_handle: Mutex<Option<JoinHandle<()>>>,
    connect_timeout: Duration,
}

impl MqttTransport {
    pub fn new(options: &BrokerOptions, events: TransportEventSender) -> Result<Self, TransportError> {
        let mqtt_options = configure_mqtt_options(options)?;
        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CAPACITY);
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            client_id: options.client_id.clone(),
            client,
            event_loop: Mutex::new(Some(event_loop)),
            events,
            connected: Arc::new(AtomicBool::new(false)),
            closing: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            event_loop_handle: Mutex::new(None),
            connect_timeout: options.connect_timeout,
        })
    }

    /// Wait for the event loop to report the CONNACK outcome
    async fn wait_for_connection_confirmation(
        ack_rx: oneshot::Receiver<Result<(), TransportError>>,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        match tokio::time::timeout(timeout, ack_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::ConnectionFailed(
                "event loop stopped before CONNACK".into(),
            )),
            Err(_) => Err(TransportError::Timeout(timeout)),
        }
    }

    async fn run_event_loop(
        mut event_loop: EventLoop,
        ack_tx: ConnAckSender,
        events: TransportEventSender,
        connected: Arc<AtomicBool>,
        closing: Arc<AtomicBool>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut ack_tx = Some(ack_tx);

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        debug!("Shutdown signal received, stopping event loop");
                        break;
                    }
                }

                polled = event_loop.poll() => match polled {
                    Ok(event) => {
                        if !Self::process_event_route(
                            route_mqtt_event(&event),
                            &mut ack_tx,
                            &events,
                            &connected,
                            &closing,
                        ) {
                            break;
                        }
                    }
                    Err(e) => {
                        connected.store(false, Ordering::SeqCst);
                        let mapped = map_connection_error(&e);
                        if let Some(tx) = ack_tx.take() {
                            warn!(error = %e, "Connection attempt failed");
                            let _ = tx.send(Err(mapped));
                        } else if !closing.load(Ordering::SeqCst) {
                            error!(error = %e, "Connection lost");
                            let _ = events.send(TransportEvent::ConnectionLost {
                                reason: Some(mapped.to_string()),
                            });
                        }
                        break;
                    }
                }
            }
        }

        connected.store(false, Ordering::SeqCst);
        debug!("MQTT event loop stopped");
    }

    /// Returns false when the loop should stop
    fn process_event_route(
        route: EventRoute,
        ack_tx: &mut Option<ConnAckSender>,
        events: &TransportEventSender,
        connected: &AtomicBool,
        closing: &AtomicBool,
    ) -> bool {
        match route {
            EventRoute::ConnectionAcknowledged => {
                connected.store(true, Ordering::SeqCst);
                if let Some(tx) = ack_tx.take() {
                    if tx.send(Ok(())).is_err() {
                        warn!("CONNACK arrived after connect gave up, dropping connection");
                        connected.store(false, Ordering::SeqCst);
                        return false;
                    }
                }
                true
            }
            EventRoute::MessageReceived { topic, payload } => {
                debug!(topic = %topic, bytes = payload.len(), "Message received");
                let _ = events.send(TransportEvent::Message { topic, payload });
                true
            }
            EventRoute::Disconnected => {
                connected.store(false, Ordering::SeqCst);
                if !closing.load(Ordering::SeqCst) {
                    warn!("Broker closed the connection");
                    let _ = events.send(TransportEvent::ConnectionLost {
                        reason: Some("broker sent DISCONNECT".to_string()),
                    });
                }
                false
            }
            EventRoute::DisconnectSent => {
                connected.store(false, Ordering::SeqCst);
                false
            }
            EventRoute::SubscriptionRejected { packet_id } => {
                warn!(packet_id, "Broker rejected subscription");
                true
            }
            EventRoute::InfrastructureEvent(event) => {
                tracing::trace!(target: "mqtt_transport", "MQTT event: {}", event);
                true
            }
            EventRoute::OutgoingEvent => true,
        }
    }

    /// Abort the event loop task without sending DISCONNECT
    fn stop_event_loop(&self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.take_handle() {
            handle.abort();
        }
        self.connected.store(false, Ordering::SeqCst);
    }

    fn take_handle(&self) -> Option<JoinHandle<()>> {
        self.event_loop_handle.lock().ok().and_then(|mut h| h.take())
    }

    fn check_connected(&self) -> Result<(), TransportError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let event_loop = self
            .event_loop
            .lock()
            .ok()
            .and_then(|mut slot| slot.take())
            .ok_or_else(|| TransportError::ConnectionFailed("event loop already started".into()))?;

        let (ack_tx, ack_rx) = oneshot::channel();
        let span = crate::mqtt_span!(client_id = %self.client_id);
        let handle = tokio::spawn(
            Self::run_event_loop(
                event_loop,
                ack_tx,
                self.events.clone(),
                self.connected.clone(),
                self.closing.clone(),
                self.shutdown_tx.subscribe(),
            )
            .instrument(span),
        );

        if let Ok(mut slot) = self.event_loop_handle.lock() {
            *slot = Some(handle);
        }

        info!(client_id = %self.client_id, "Connecting to broker");
        if let Err(e) = Self::wait_for_connection_confirmation(ack_rx, self.connect_timeout).await {
            self.stop_event_loop();
            return Err(e);
        }
        info!(client_id = %self.client_id, "Broker acknowledged connection");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.closing.store(true, Ordering::SeqCst);

        if let Err(e) = self.client.disconnect().await {
            self.closing.store(false, Ordering::SeqCst);
            return Err(TransportError::DisconnectFailed(Box::new(e)));
        }

        if let Some(handle) = self.take_handle() {
            match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
                Ok(Ok(())) => debug!("Event loop task shut down gracefully"),
                Ok(Err(e)) if !e.is_cancelled() => warn!("Event loop task ended with error: {}", e),
                Err(_) => {
                    warn!("Event loop task didn't shut down gracefully, forcing stop");
                    let _ = self.shutdown_tx.send(true);
                }
                _ => {}
            }
        }

        self.connected.store(false, Ordering::SeqCst);
        info!(client_id = %self.client_id, "Disconnected from broker");
        Ok(())
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        self.check_connected()?;
        self.client
            .subscribe(topic, qos.into())
            .await
            .map_err(|e| TransportError::SubscriptionFailed(Box::new(e)))
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.check_connected()?;
        self.client
            .unsubscribe(topic)
            .await
            .map_err(|e| TransportError::UnsubscribeFailed(Box::new(e)))
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retained: bool,
    ) -> Result<(), TransportError> {
        self.check_connected()?;
        self.client
            .publish_bytes(topic, qos.into(), retained, payload)
            .await
            .map_err(|e| TransportError::PublishFailed(Box::new(e)))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn release(&self) {
        self.closing.store(true, Ordering::SeqCst);
        self.stop_event_loop();
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        // Background task only; no graceful DISCONNECT is possible here.
        self.release();
    }
}

/// Creates [`MqttTransport`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct MqttTransportFactory;

impl TransportFactory for MqttTransportFactory {
    fn create(
        &self,
        options: &BrokerOptions,
        events: TransportEventSender,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        Ok(Arc::new(MqttTransport::new(options, events)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn options(port: u16, timeout: Duration) -> BrokerOptions {
        BrokerOptions {
            host: "127.0.0.1".to_string(),
            port,
            client_id: "d:quickstart:TestDevice:dev1".to_string(),
            credentials: None,
            clean_session: true,
            keep_alive: Duration::from_secs(60),
            connect_timeout: timeout,
        }
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_success() {
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = tx.send(Ok(()));
        });

        let result =
            MqttTransport::wait_for_connection_confirmation(rx, Duration::from_millis(200)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_timeout() {
        let (_tx, rx) = oneshot::channel();
        let result =
            MqttTransport::wait_for_connection_confirmation(rx, Duration::from_millis(20)).await;
        assert!(matches!(result, Err(TransportError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_dropped_sender() {
        let (tx, rx) = oneshot::channel::<Result<(), TransportError>>();
        drop(tx);
        let result =
            MqttTransport::wait_for_connection_confirmation(rx, Duration::from_millis(200)).await;
        assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
    }

    #[test]
    fn test_process_event_route_connack_completes_connect() {
        let (events, _rx) = mpsc::unbounded_channel();
        let (ack_tx, mut ack_rx) = oneshot::channel();
        let mut ack_tx = Some(ack_tx);
        let connected = AtomicBool::new(false);
        let closing = AtomicBool::new(false);

        let keep_going = MqttTransport::process_event_route(
            EventRoute::ConnectionAcknowledged,
            &mut ack_tx,
            &events,
            &connected,
            &closing,
        );

        assert!(keep_going);
        assert!(connected.load(Ordering::SeqCst));
        assert!(ack_tx.is_none());
        assert!(matches!(ack_rx.try_recv(), Ok(Ok(()))));
    }

    #[test]
    fn test_connack_after_connect_gave_up_stops_loop() {
        let (events, _rx) = mpsc::unbounded_channel();
        let (ack_tx, ack_rx) = oneshot::channel();
        drop(ack_rx);
        let connected = AtomicBool::new(false);
        let closing = AtomicBool::new(false);

        let keep_going = MqttTransport::process_event_route(
            EventRoute::ConnectionAcknowledged,
            &mut Some(ack_tx),
            &events,
            &connected,
            &closing,
        );

        assert!(!keep_going);
        assert!(!connected.load(Ordering::SeqCst));
    }

    #[test]
    fn test_process_event_route_forwards_messages() {
        let (events, mut rx) = mpsc::unbounded_channel();
        let connected = AtomicBool::new(true);
        let closing = AtomicBool::new(false);

        MqttTransport::process_event_route(
            EventRoute::MessageReceived {
                topic: "iot-2/cmd/light/fmt/json".to_string(),
                payload: Bytes::from_static(b"{}"),
            },
            &mut None,
            &events,
            &connected,
            &closing,
        );

        assert_eq!(
            rx.try_recv().unwrap(),
            TransportEvent::Message {
                topic: "iot-2/cmd/light/fmt/json".to_string(),
                payload: Bytes::from_static(b"{}"),
            }
        );
    }

    #[test]
    fn test_broker_disconnect_reports_loss_unless_closing() {
        let (events, mut rx) = mpsc::unbounded_channel();
        let connected = AtomicBool::new(true);
        let closing = AtomicBool::new(false);

        let keep_going = MqttTransport::process_event_route(
            EventRoute::Disconnected,
            &mut None,
            &events,
            &connected,
            &closing,
        );
        assert!(!keep_going);
        assert!(!connected.load(Ordering::SeqCst));
        assert!(matches!(
            rx.try_recv(),
            Ok(TransportEvent::ConnectionLost { .. })
        ));

        closing.store(true, Ordering::SeqCst);
        MqttTransport::process_event_route(
            EventRoute::Disconnected,
            &mut None,
            &events,
            &connected,
            &closing,
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_operations_require_connection() {
        let (events, _rx) = mpsc::unbounded_channel();
        let transport = MqttTransport::new(&options(1883, Duration::from_secs(1)), events).unwrap();

        assert!(!transport.is_connected());
        assert!(matches!(
            transport.subscribe("iot-2/cmd/+/fmt/json", QoS::AtMostOnce).await,
            Err(TransportError::NotConnected)
        ));
        assert!(matches!(
            transport
                .publish("iot-2/evt/text/fmt/json", Bytes::new(), QoS::AtMostOnce, false)
                .await,
            Err(TransportError::NotConnected)
        ));
        transport.release();
        transport.release();
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_fails() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (events, mut rx) = mpsc::unbounded_channel();
        let transport = MqttTransport::new(&options(port, Duration::from_secs(2)), events).unwrap();

        let result = transport.connect().await;
        assert!(result.is_err());
        assert!(!transport.is_connected());
        // Failed connects are reported through the result, not as a lost connection.
        assert!(rx.try_recv().is_err());

        let second = transport.connect().await;
        assert!(matches!(second, Err(TransportError::ConnectionFailed(_))));
    }

    #[tokio::test]
    async fn test_late_connack_after_timeout_leaves_transport_disconnected() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let broker = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut connect = [0u8; 256];
            let _ = socket.read(&mut connect).await;
            tokio::time::sleep(Duration::from_millis(400)).await;
            // CONNACK, session not present, accepted
            let _ = socket.write_all(&[0x20, 0x02, 0x00, 0x00]).await;
            tokio::time::sleep(Duration::from_secs(2)).await;
        });

        let (events, mut rx) = mpsc::unbounded_channel();
        let transport =
            MqttTransport::new(&options(port, Duration::from_millis(100)), events).unwrap();

        let result = transport.connect().await;
        assert!(matches!(result, Err(TransportError::Timeout(_))));

        tokio::time::sleep(Duration::from_millis(800)).await;
        assert!(!transport.is_connected());
        assert!(rx.try_recv().is_err());

        broker.abort();
    }

    #[test]
    fn test_factory_rejects_invalid_client_id() {
        let (events, _rx) = mpsc::unbounded_channel();
        let mut bad = options(1883, Duration::from_secs(1));
        bad.client_id = String::new();
        assert!(matches!(
            MqttTransportFactory.create(&bad, events),
            Err(TransportError::InvalidClientId(_))
        ));
    }
}
