use serde::Deserialize;

fn default_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "scenedim".to_string()
}

fn default_scene_topic() -> String {
    "zwave/scene_activated".to_string()
}

fn default_command_topic() -> String {
    "zigbee2mqtt/{light_id}/set".to_string()
}

/// Configuration for the MQTT integration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// MQTT broker hostname or IP address
    pub broker: String,

    /// MQTT broker port
    #[serde(default = "default_port")]
    pub port: u16,

    /// MQTT client ID
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Optional username for authentication
    #[serde(default)]
    pub username: Option<String>,

    /// Optional password for authentication
    #[serde(default)]
    pub password: Option<String>,

    /// Topic (filter) carrying JSON scene events
    #[serde(default = "default_scene_topic")]
    pub scene_topic: String,

    /// Topic brightness commands are published to; `{light_id}` is replaced
    /// with the target light
    #[serde(default = "default_command_topic")]
    pub command_topic: String,
}

impl Config {
    pub fn command_topic_for(&self, light_id: &str) -> String {
        self.command_topic.replace("{light_id}", light_id)
    }
}
