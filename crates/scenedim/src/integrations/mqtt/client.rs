use std::error::Error;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::AsyncClient;
use rumqttc::Event;
use rumqttc::MqttOptions;
use rumqttc::Packet;
use rumqttc::QoS;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub type ClientError = Box<dyn Error + Send + Sync>;

/// Receiver for messages on subscribed topics
pub type MessageReceiver = mpsc::UnboundedReceiver<MqttMessage>;

/// MQTT message received from a subscription
#[derive(Debug, Clone)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Trait for MQTT client operations
///
/// This trait allows for mocking the MQTT client for testing purposes
#[async_trait]
pub trait MqttClient: Send + Sync {
    /// Connect to the MQTT broker
    ///
    /// Messages on every topic subscribed afterwards arrive on the returned receiver.
    async fn connect(&mut self) -> Result<MessageReceiver, ClientError>;

    /// Subscribe to an MQTT topic
    async fn subscribe(&self, topic: &str) -> Result<(), ClientError>;

    /// Publish a message to an MQTT topic
    async fn publish(&self, topic: &str, payload: &[u8], retain: bool) -> Result<(), ClientError>;
}

fn not_connected() -> ClientError {
    Box::new(std::io::Error::new(
        std::io::ErrorKind::NotConnected,
        "MQTT client not connected. Call connect() first.",
    ))
}

/// Mock MQTT client for testing
///
/// Clones share state, so a test can keep one handle while the integration owns another.
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct MockMqttClient {
    state: std::sync::Arc<std::sync::Mutex<MockState>>,
}

#[cfg(test)]
#[derive(Debug, Default)]
struct MockState {
    incoming: Option<mpsc::UnboundedSender<MqttMessage>>,
    subscriptions: Vec<String>,
    published: Vec<(String, Vec<u8>, bool)>,
    fail_publish: bool,
}

#[cfg(test)]
impl MockMqttClient {
    /// Create a new mock MQTT client
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a message as if the broker had sent it
    pub fn add_message(&self, topic: &str, payload: &[u8]) {
        let state = self.state.lock().unwrap();
        let tx = state.incoming.as_ref().expect("mock not connected");
        tx.send(MqttMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        })
        .unwrap();
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.state.lock().unwrap().subscriptions.clone()
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>, bool)> {
        self.state.lock().unwrap().published.clone()
    }

    pub fn fail_publish(&self) {
        self.state.lock().unwrap().fail_publish = true;
    }

    /// Drop the sender side, as a broker disconnect would
    pub fn disconnect(&self) {
        self.state.lock().unwrap().incoming = None;
    }
}

#[cfg(test)]
#[async_trait]
impl MqttClient for MockMqttClient {
    async fn connect(&mut self) -> Result<MessageReceiver, ClientError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().unwrap().incoming = Some(tx);
        Ok(rx)
    }

    async fn subscribe(&self, topic: &str) -> Result<(), ClientError> {
        let mut state = self.state.lock().unwrap();
        if state.incoming.is_none() {
            return Err(not_connected());
        }
        state.subscriptions.push(topic.to_string());
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &[u8], retain: bool) -> Result<(), ClientError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_publish {
            return Err("publish rejected".into());
        }
        state
            .published
            .push((topic.to_string(), payload.to_vec(), retain));
        Ok(())
    }
}

/// Topics subscribed so far, replayed when the broker connection is re-established
///
/// The session is clean, so the broker forgets subscriptions on every reconnect.
#[derive(Debug, Default)]
struct SubscriptionSet {
    topics: Vec<String>,
    seen_connack: bool,
}

impl SubscriptionSet {
    fn insert(&mut self, topic: &str) {
        if !self.topics.iter().any(|t| t == topic) {
            self.topics.push(topic.to_string());
        }
    }

    /// Topics to re-subscribe after a ConnAck
    ///
    /// Empty for the first ConnAck: subscriptions made before it are still queued.
    fn on_connack(&mut self) -> Vec<String> {
        if !self.seen_connack {
            self.seen_connack = true;
            return Vec::new();
        }
        self.topics.clone()
    }
}

/// Real MQTT client implementation using rumqttc
pub struct RumqttcClient {
    /// MQTT connection options (stored for lazy initialization)
    mqtt_options: MqttOptions,

    /// AsyncClient (created in connect())
    client: Option<AsyncClient>,

    /// Background event loop task handle
    event_loop_task: Option<JoinHandle<()>>,

    /// Shared with the event loop task for resubscription
    subscriptions: Arc<Mutex<SubscriptionSet>>,
}

impl RumqttcClient {
    /// Create a new RumqttcClient from configuration
    pub fn new(config: &super::MqttConfig) -> anyhow::Result<Self> {
        let mut mqtt_options =
            MqttOptions::new(config.client_id.clone(), config.broker.clone(), config.port);

        mqtt_options.set_keep_alive(Duration::from_secs(30));

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            mqtt_options.set_credentials(username, password);
        }

        Ok(Self {
            mqtt_options,
            client: None,
            event_loop_task: None,
            subscriptions: Arc::default(),
        })
    }
}

#[async_trait]
impl MqttClient for RumqttcClient {
    async fn connect(&mut self) -> Result<MessageReceiver, ClientError> {
        let (client, mut event_loop) = AsyncClient::new(self.mqtt_options.clone(), 10);
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let resubscriber = client.clone();
        let subscriptions = Arc::clone(&self.subscriptions);

        // Spawn background task to poll event loop
        let task = tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let msg = MqttMessage {
                            topic: publish.topic.to_string(),
                            payload: publish.payload.to_vec(),
                        };

                        // Send to channel; if receiver dropped, exit
                        if message_tx.send(msg).is_err() {
                            break;
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        let topics = match subscriptions.lock() {
                            Ok(mut set) => set.on_connack(),
                            Err(_) => Vec::new(),
                        };
                        for topic in topics {
                            tracing::info!("Re-subscribing to {} after reconnect", topic);
                            // Awaiting here would block the loop that drains requests
                            if let Err(e) =
                                resubscriber.try_subscribe(topic.as_str(), QoS::AtMostOnce)
                            {
                                tracing::warn!("Failed to re-subscribe to {}: {}", topic, e);
                            }
                        }
                    }
                    Ok(_) => {
                        // Ignore other events (puback, pingresp, etc.)
                    }
                    Err(e) => {
                        tracing::warn!("MQTT event loop error: {}", e);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
            tracing::info!("MQTT event loop task exiting");
        });

        self.client = Some(client);
        self.event_loop_task = Some(task);

        Ok(message_rx)
    }

    async fn subscribe(&self, topic: &str) -> Result<(), ClientError> {
        let client = self.client.as_ref().ok_or_else(not_connected)?;

        client
            .subscribe(topic, QoS::AtMostOnce)
            .await
            .map_err(|e| Box::new(e) as ClientError)?;

        if let Ok(mut set) = self.subscriptions.lock() {
            set.insert(topic);
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &[u8], retain: bool) -> Result<(), ClientError> {
        let client = self.client.as_ref().ok_or_else(not_connected)?;

        client
            .publish(topic, QoS::AtLeastOnce, retain, payload)
            .await
            .map_err(|e| Box::new(e) as ClientError)
    }
}

impl Drop for RumqttcClient {
    fn drop(&mut self) {
        if let Some(task) = self.event_loop_task.take() {
            task.abort();
        }
    }
}
