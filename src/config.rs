use std::collections::HashMap;
use std::time::Duration;

use serde_derive::Deserialize;

pub const DEFAULT_MESSAGE_TIMER_SECONDS: u64 = 60;
pub const DEFAULT_MAX_DISTANCE: f64 = 16.0;
pub const DEFAULT_ENTITY_PREFIX: &str = "espresense";
pub const DEFAULT_BASE_TOPIC: &str = "espresense/devices/";
pub const DEFAULT_RESET_TOPIC: &str = "espresense/reset";

#[derive(Deserialize, Debug, Clone)]
pub struct AppConfig {
    pub mqtt: MqttConfig,
    pub devices: Option<Vec<DeviceConfig>>,
    pub rooms: Option<Vec<RoomConfig>>,
    pub presence: Option<PresenceConfig>,
    pub debug: Option<bool>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub publisher_id: Option<String>,
    /// Root under which computed room state is published
    pub topic_path: Option<String>,
    /// Root under which base stations report device distances
    pub base_topic: Option<String>,
    pub reset_topic: Option<String>,
    pub keep_alive_seconds: Option<u64>,
}

impl MqttConfig {
    pub fn base_topic(&self) -> String {
        let mut topic = self
            .base_topic
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_TOPIC.to_string());
        if !topic.ends_with('/') {
            topic.push('/');
        }
        topic
    }

    pub fn reset_topic(&self) -> String {
        self.reset_topic
            .clone()
            .unwrap_or_else(|| DEFAULT_RESET_TOPIC.to_string())
    }
}

/// A tracked device, as listed under `[[devices]]`
#[derive(Deserialize, Debug, Clone)]
pub struct DeviceConfig {
    pub device_id: String,
    pub entity_name: String,
}

/// A room profile: the room id plus the reference distance from each
/// listed base station to the room, written as flat keys.
///
/// ```toml
/// [[rooms]]
/// room = "kitchen"
/// kitchen_bs = 2.0
/// hallway_bs = 4.5
/// ```
#[derive(Deserialize, Debug, Clone)]
pub struct RoomConfig {
    pub room: String,
    #[serde(flatten)]
    pub base_stations: HashMap<String, f64>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct PresenceConfig {
    pub message_timer_seconds: Option<u64>,
    pub max_distance: Option<f64>,
    pub entity_prefix: Option<String>,
}

impl PresenceConfig {
    pub fn message_timer(&self) -> Duration {
        Duration::from_secs(
            self.message_timer_seconds
                .unwrap_or(DEFAULT_MESSAGE_TIMER_SECONDS),
        )
    }

    pub fn max_distance(&self) -> f64 {
        self.max_distance.unwrap_or(DEFAULT_MAX_DISTANCE)
    }

    pub fn entity_prefix(&self) -> &str {
        self.entity_prefix
            .as_deref()
            .unwrap_or(DEFAULT_ENTITY_PREFIX)
    }
}

impl AppConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        use anyhow::Context as _;

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {path}"))?;
        let config: AppConfig = toml::de::from_str(&contents)
            .with_context(|| format!("parsing config file {path}"))?;
        Ok(config)
    }

    pub fn presence(&self) -> PresenceConfig {
        self.presence.clone().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config() {
        let config_str = r#"
            debug = true

            [mqtt]
            host = "localhost"
            port = 1883
            username = "user"
            password = "pass"

            [[devices]]
            device_id = "irk:1234"
            entity_name = "alice_phone"

            [[devices]]
            device_id = "apple:1005:9-26"
            entity_name = "bob_watch"

            [[rooms]]
            room = "kitchen"
            kitchen_bs = 2.0
            hallway_bs = 4

            [presence]
            message_timer_seconds = 30
            entity_prefix = "rooms"
        "#;
        let config: AppConfig = toml::de::from_str(config_str).unwrap();
        assert_eq!(config.mqtt.host, "localhost");
        assert_eq!(config.debug, Some(true));

        let devices = config.devices.as_ref().unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].device_id, "irk:1234");
        assert_eq!(devices[1].entity_name, "bob_watch");

        let rooms = config.rooms.as_ref().unwrap();
        assert_eq!(rooms[0].room, "kitchen");
        assert_eq!(rooms[0].base_stations.len(), 2);
        assert_eq!(rooms[0].base_stations["kitchen_bs"], 2.0);
        assert_eq!(rooms[0].base_stations["hallway_bs"], 4.0);

        let presence = config.presence();
        assert_eq!(presence.message_timer(), Duration::from_secs(30));
        assert_eq!(presence.max_distance(), DEFAULT_MAX_DISTANCE);
        assert_eq!(presence.entity_prefix(), "rooms");
    }

    #[test]
    fn test_defaults() {
        let config_str = r#"
            [mqtt]
            host = "broker"
            base_topic = "espresense/devices"
        "#;
        let config: AppConfig = toml::de::from_str(config_str).unwrap();
        assert!(config.devices.is_none());
        assert!(config.rooms.is_none());
        assert_eq!(config.mqtt.base_topic(), "espresense/devices/");
        assert_eq!(config.mqtt.reset_topic(), DEFAULT_RESET_TOPIC);

        let presence = config.presence();
        assert_eq!(
            presence.message_timer(),
            Duration::from_secs(DEFAULT_MESSAGE_TIMER_SECONDS)
        );
        assert_eq!(presence.entity_prefix(), DEFAULT_ENTITY_PREFIX);
    }
}
