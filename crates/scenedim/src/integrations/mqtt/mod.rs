#[cfg(feature = "integration_mqtt")]
mod client;
mod config;
#[cfg(feature = "integration_mqtt")]
#[allow(clippy::module_inception)]
mod mqtt;

#[cfg(feature = "integration_mqtt")]
pub use client::MqttClient;
#[cfg(feature = "integration_mqtt")]
pub use client::RumqttcClient;
pub use config::Config as MqttConfig;
#[cfg(feature = "integration_mqtt")]
pub use mqtt::MqttIntegration;
