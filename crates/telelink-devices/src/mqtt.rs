//! MQTT transport built on `rumqttc`.
//!
//! The connector opens one session, subscribes to the configured root
//! wildcard and hands every PUBLISH to a [`MessageDelivery`]. Connection loss
//! is reported once and ends delivery; there is no automatic reconnection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, Publish, QoS,
    SubscribeReasonCode, Transport,
};
use telelink_core::{connection_err, lifecycle_err, Error, MqttConfig, Qos, Result};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::transport::{MessageDelivery, TransportConnector};

/// Maximum incoming/outgoing packet size.
const MAX_PACKET_SIZE: usize = 10 * 1024 * 1024;

/// Map the configured QoS onto the client's.
pub fn to_qos(qos: Qos) -> QoS {
    match qos {
        Qos::AtMostOnce => QoS::AtMostOnce,
        Qos::AtLeastOnce => QoS::AtLeastOnce,
        Qos::ExactlyOnce => QoS::ExactlyOnce,
    }
}

struct Session {
    client: AsyncClient,
    task: JoinHandle<()>,
}

/// [`TransportConnector`] for an MQTT broker.
pub struct MqttConnector {
    config: MqttConfig,
    connected: Arc<AtomicBool>,
    session: Mutex<Option<Session>>,
}

impl MqttConnector {
    pub fn new(config: MqttConfig) -> Self {
        Self {
            config,
            connected: Arc::new(AtomicBool::new(false)),
            session: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &MqttConfig {
        &self.config
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(
            self.config.client_id_or_default(),
            self.config.broker.clone(),
            self.config.port(),
        );
        options.set_keep_alive(Duration::from_secs(self.config.keep_alive_secs));
        options.set_clean_session(self.config.clean_session);
        options.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);

        if let (Some(user), Some(pass)) = (&self.config.username, &self.config.password) {
            options.set_credentials(user, pass);
        }
        if self.config.tls {
            options.set_transport(Transport::tls_with_default_config());
        }
        options
    }

    fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.config.connect_timeout_secs)
    }
}

#[async_trait]
impl TransportConnector for MqttConnector {
    async fn start(&self, delivery: Arc<dyn MessageDelivery>) -> Result<()> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            return Err(lifecycle_err!("MQTT connector is already started"));
        }

        let broker = self.config.broker_addr();
        let secs = self.config.connect_timeout_secs;
        let (client, mut eventloop) = AsyncClient::new(self.options(), self.config.channel_capacity);

        tokio::time::timeout(self.connect_timeout(), wait_for_connack(&mut eventloop))
            .await
            .map_err(|_| Error::Timeout(format!("no CONNACK from {} within {}s", broker, secs)))??;
        debug!("Connected to MQTT broker {}", broker);

        client
            .subscribe(self.config.root_topic.as_str(), to_qos(self.config.qos))
            .await
            .map_err(|e| connection_err!("Failed to subscribe to {}: {}", self.config.root_topic, e))?;
        let pending = tokio::time::timeout(self.connect_timeout(), wait_for_suback(&mut eventloop))
            .await
            .map_err(|_| {
                Error::Timeout(format!(
                    "no SUBACK for {} within {}s",
                    self.config.root_topic, secs
                ))
            })??;

        self.connected.store(true, Ordering::Release);
        let task = tokio::spawn(deliver(
            eventloop,
            pending,
            delivery,
            self.connected.clone(),
            broker.clone(),
        ));
        *session = Some(Session { client, task });

        info!(
            "Subscribed to {} on MQTT broker {}",
            self.config.root_topic, broker
        );
        Ok(())
    }

    async fn stop(&self) {
        let Some(session) = self.session.lock().await.take() else {
            return;
        };
        // Errors from here on are the result of stopping, not a lost session
        self.connected.store(false, Ordering::Release);

        if let Err(e) = session.client.try_unsubscribe(self.config.root_topic.as_str()) {
            warn!("Failed to unsubscribe from {}: {}", self.config.root_topic, e);
        }
        if let Err(e) = session.client.try_disconnect() {
            warn!("Failed to disconnect from {}: {}", self.config.broker_addr(), e);
        }

        let mut task = session.task;
        let wait = Duration::from_secs(self.config.disconnect_timeout_secs);
        match tokio::time::timeout(wait, &mut task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("MQTT delivery task failed: {}", e),
            Err(_) => {
                warn!(
                    "MQTT delivery task did not stop within {}s, aborting it",
                    self.config.disconnect_timeout_secs
                );
                task.abort();
            }
        }
        info!("Disconnected from MQTT broker {}", self.config.broker_addr());
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<()> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return match ack.code {
                    ConnectReturnCode::Success => Ok(()),
                    code => Err(connection_err!("broker refused connection: {:?}", code)),
                };
            }
            Ok(_) => {}
            Err(e) => return Err(connection_err!("{}", e)),
        }
    }
}

/// Wait for the root subscription to be acknowledged.
///
/// Messages published before the SUBACK is seen are returned for delivery.
async fn wait_for_suback(eventloop: &mut EventLoop) -> Result<Vec<Publish>> {
    let mut pending = Vec::new();
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                if ack
                    .return_codes
                    .iter()
                    .any(|code| matches!(code, SubscribeReasonCode::Failure))
                {
                    return Err(connection_err!("broker rejected the subscription"));
                }
                return Ok(pending);
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => pending.push(publish),
            Ok(_) => {}
            Err(e) => return Err(connection_err!("{}", e)),
        }
    }
}

async fn deliver(
    mut eventloop: EventLoop,
    pending: Vec<Publish>,
    delivery: Arc<dyn MessageDelivery>,
    connected: Arc<AtomicBool>,
    broker: String,
) {
    for publish in pending {
        delivery.on_message(&publish.topic, &publish.payload).await;
    }

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                delivery.on_message(&publish.topic, &publish.payload).await;
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                if connected.swap(false, Ordering::AcqRel) {
                    delivery.on_connection_lost("broker closed the session").await;
                }
                break;
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
            Ok(_) => {}
            Err(e) => {
                if connected.swap(false, Ordering::AcqRel) {
                    delivery.on_connection_lost(&e.to_string()).await;
                }
                break;
            }
        }
    }
    debug!("MQTT delivery from {} ended", broker);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    struct Discard;

    #[async_trait]
    impl MessageDelivery for Discard {
        async fn on_message(&self, _topic: &str, _payload: &[u8]) {}
        async fn on_connection_lost(&self, _cause: &str) {}
    }

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn test_qos_mapping() {
        assert_eq!(to_qos(Qos::AtMostOnce), QoS::AtMostOnce);
        assert_eq!(to_qos(Qos::AtLeastOnce), QoS::AtLeastOnce);
        assert_eq!(to_qos(Qos::ExactlyOnce), QoS::ExactlyOnce);
    }

    #[tokio::test]
    async fn test_start_fails_without_broker() {
        let port = closed_port().await;
        let connector = MqttConnector::new(
            MqttConfig::new("127.0.0.1")
                .with_port(port)
                .with_connect_timeout(2),
        );

        let err = connector.start(Arc::new(Discard)).await.unwrap_err();
        assert!(err.is_fatal(), "unexpected error: {err:?}");
        assert!(!connector.is_connected());
    }

    #[tokio::test]
    async fn test_start_times_out_on_silent_broker() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        // Accept and hold the connection without ever answering
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
            drop(socket);
        });

        let connector = MqttConnector::new(
            MqttConfig::new("127.0.0.1")
                .with_port(port)
                .with_connect_timeout(1),
        );
        let err = connector.start(Arc::new(Discard)).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)), "unexpected error: {err:?}");
        assert!(!connector.is_connected());
        server.abort();
    }

    #[tokio::test]
    async fn test_stop_without_start() {
        let connector = MqttConnector::new(MqttConfig::new("localhost"));
        connector.stop().await;
        assert!(!connector.is_connected());
    }
}
