use std::sync::Mutex;
use std::sync::PoisonError;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::MqttConfig;
use super::client::ClientError;
use super::client::MessageReceiver;
use super::client::MqttClient;
use super::client::MqttMessage;
use crate::engine::ActuationError;
use crate::engine::Actuator;
use crate::engine::SceneBus;
use crate::engine::SceneEvent;

/// MQTT host for scenedim
///
/// Turns JSON scene events on `scene_topic` into bus events, and carries
/// brightness adjustments out as `{"brightness_step": n}` commands.
pub struct MqttIntegration<C: MqttClient> {
    client: C,
    config: MqttConfig,
    /// Handle to the background message processing task
    message_task: Mutex<Option<JoinHandle<()>>>,
}

impl<C: MqttClient> MqttIntegration<C> {
    /// Connect, subscribe to scene events and start forwarding them onto `bus`
    pub async fn setup(
        mut client: C,
        config: &MqttConfig,
        bus: SceneBus,
    ) -> Result<Self, ClientError> {
        info!(
            "Connecting to MQTT broker at {}:{}",
            config.broker, config.port
        );
        let rx = client.connect().await?;
        info!("Connected to MQTT broker");

        info!("Subscribing to scene topic: {}", config.scene_topic);
        client.subscribe(&config.scene_topic).await?;

        let task = tokio::spawn(process_messages_task(rx, bus));

        info!("MQTT integration ready to handle commands");
        Ok(Self {
            client,
            config: config.clone(),
            message_task: Mutex::new(Some(task)),
        })
    }

    pub fn shutdown(&self) {
        info!("MQTT integration shutting down");
        self.stop_message_task();
    }

    fn stop_message_task(&self) {
        let task = self
            .message_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

/// Forward incoming scene messages to the bus until the client goes away
async fn process_messages_task(mut rx: MessageReceiver, bus: SceneBus) {
    while let Some(msg) = rx.recv().await {
        let event = match parse_scene_event(&msg) {
            Ok(event) => event,
            Err(e) => {
                warn!("Ignoring malformed scene event on {}: {}", msg.topic, e);
                continue;
            }
        };

        debug!(
            "Scene event from {}: ({}, {:?})",
            event.entity_id, event.scene_id, event.scene_data
        );
        if bus.send(event).is_err() {
            debug!("No listeners on the scene bus, dropping event");
        }
    }
    info!("MQTT message task exiting");
}

fn parse_scene_event(msg: &MqttMessage) -> Result<SceneEvent, serde_json::Error> {
    serde_json::from_slice(&msg.payload)
}

fn command_payload(step: i64) -> Vec<u8> {
    serde_json::json!({ "brightness_step": step }).to_string().into_bytes()
}

#[async_trait]
impl<C: MqttClient> Actuator for MqttIntegration<C> {
    async fn adjust_brightness(&self, light_id: &str, step: i64) -> Result<(), ActuationError> {
        let topic = self.config.command_topic_for(light_id);
        self.client
            .publish(&topic, &command_payload(step), false)
            .await
            .map_err(ActuationError::Transport)?;

        debug!("Sent brightness_step {} to {}", step, topic);
        Ok(())
    }
}

impl<C: MqttClient> Drop for MqttIntegration<C> {
    fn drop(&mut self) {
        self.stop_message_task();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::broadcast;

    use super::*;
    use crate::integrations::mqtt::client::MockMqttClient;

    fn config() -> MqttConfig {
        MqttConfig {
            broker: "localhost".to_string(),
            port: 1883,
            client_id: "test".to_string(),
            username: None,
            password: None,
            scene_topic: "zwave/scene_activated".to_string(),
            command_topic: "z2m/{light_id}/set".to_string(),
        }
    }

    #[tokio::test]
    async fn test_setup_subscribes_to_scene_topic() {
        let client = MockMqttClient::new();
        let (bus, _rx) = broadcast::channel(16);

        let _integration = MqttIntegration::setup(client.clone(), &config(), bus)
            .await
            .unwrap();

        assert_eq!(client.subscriptions(), vec!["zwave/scene_activated"]);
    }

    #[tokio::test]
    async fn test_scene_messages_reach_bus() {
        let client = MockMqttClient::new();
        let (bus, mut rx) = broadcast::channel(16);
        let _integration = MqttIntegration::setup(client.clone(), &config(), bus)
            .await
            .unwrap();

        client.add_message("zwave/scene_activated", b"not json");
        client.add_message(
            "zwave/scene_activated",
            br#"{"entity_id": "zwave.hall", "scene_id": 1, "scene_data": 2}"#,
        );

        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, SceneEvent::new("zwave.hall", 1, Some(2)));
    }

    #[tokio::test]
    async fn test_adjust_brightness_publishes_step() {
        let client = MockMqttClient::new();
        let (bus, _rx) = broadcast::channel(16);
        let integration = MqttIntegration::setup(client.clone(), &config(), bus)
            .await
            .unwrap();

        integration
            .adjust_brightness("light.hall", -7)
            .await
            .unwrap();

        let published = client.published();
        assert_eq!(published.len(), 1);
        let (topic, payload, retain) = &published[0];
        assert_eq!(topic, "z2m/light.hall/set");
        assert!(!retain);

        let json: serde_json::Value = serde_json::from_slice(payload).unwrap();
        assert_eq!(json, serde_json::json!({ "brightness_step": -7 }));
    }

    #[tokio::test]
    async fn test_publish_failure_is_transport_error() {
        let client = MockMqttClient::new();
        let (bus, _rx) = broadcast::channel(16);
        let integration = MqttIntegration::setup(client.clone(), &config(), bus)
            .await
            .unwrap();

        client.fail_publish();
        let result = integration.adjust_brightness("light.hall", 5).await;
        assert!(matches!(result, Err(ActuationError::Transport(_))));
    }

    #[tokio::test]
    async fn test_message_task_exits_on_disconnect() {
        let client = MockMqttClient::new();
        let (bus, _rx) = broadcast::channel(16);
        let integration = MqttIntegration::setup(client.clone(), &config(), bus)
            .await
            .unwrap();

        client.disconnect();

        let task = integration.message_task.lock().unwrap().take().unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_press_ramps_light_over_mqtt() {
        use std::sync::Arc;

        use tokio::sync::oneshot;

        use crate::dimmer::Dimmer;
        use crate::dimmer::DimmerConfig;
        use crate::dimmer::SceneKey;
        use crate::dimmer::ScenePair;
        use crate::engine::Engine;

        let client = MockMqttClient::new();
        let mut engine = Engine::new();
        let integration = Arc::new(
            MqttIntegration::setup(client.clone(), &config(), engine.bus())
                .await
                .unwrap(),
        );

        engine.add_dimmer(Dimmer::new(
            DimmerConfig {
                switch_id: "zwave.hall".to_string(),
                light_id: "hall".to_string(),
                bright: ScenePair {
                    start: SceneKey::new(1, Some(2)),
                    stop: SceneKey::new(1, Some(1)),
                },
                dim: ScenePair {
                    start: SceneKey::new(2, Some(2)),
                    stop: SceneKey::new(2, Some(1)),
                },
                step: 8,
                delay: Duration::from_millis(100),
            },
            integration.clone(),
        ));

        let engine = Arc::new(engine);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let runner = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.run(shutdown_rx).await })
        };

        client.add_message(
            "zwave/scene_activated",
            br#"{"entity_id": "zwave.hall", "scene_id": 1, "scene_data": 2}"#,
        );
        tokio::time::sleep(Duration::from_millis(250)).await;
        client.add_message(
            "zwave/scene_activated",
            br#"{"entity_id": "zwave.hall", "scene_id": 1, "scene_data": 1}"#,
        );
        tokio::time::sleep(Duration::from_millis(200)).await;

        shutdown_tx.send(()).unwrap();
        runner.await.unwrap();
        assert!(engine.shutdown(Duration::from_secs(5)).await);

        let published = client.published();
        assert_eq!(published.len(), 3);
        for (topic, payload, _) in &published {
            assert_eq!(topic, "z2m/hall/set");
            let json: serde_json::Value = serde_json::from_slice(payload).unwrap();
            assert_eq!(json["brightness_step"], 8);
        }
    }
}
