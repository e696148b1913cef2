use std::time::Duration;

use log::{debug, error, info};
use rumqttc::{MqttOptions, QoS, SubscribeFilter};
use tokio::sync::mpsc;

use crate::{config, engine::PresenceUpdate, messages::EngineEvent};

#[derive(Debug, Clone)]
pub struct MqttClient {
    client: rumqttc::AsyncClient,
    topic_path: String,
    base_topic: String,
    reset_topic: String,
}

impl MqttClient {
    pub fn new(config: &config::MqttConfig) -> (Self, rumqttc::EventLoop) {
        let publisher_id = config
            .publisher_id
            .as_ref()
            .unwrap_or(&"presence-rs".to_string())
            .to_string();

        let mut mqttoptions = MqttOptions::new(
            publisher_id,
            config.host.clone(),
            config.port.unwrap_or(1883),
        );

        mqttoptions.set_keep_alive(Duration::from_secs(config.keep_alive_seconds.unwrap_or(5)));

        if let (Some(username), Some(password)) =
            (config.username.as_ref(), config.password.as_ref())
        {
            mqttoptions.set_credentials(username.clone(), password.clone());
        }

        let (client, eventloop) = rumqttc::AsyncClient::new(mqttoptions, 100);

        (
            MqttClient {
                client,
                topic_path: config
                    .topic_path
                    .clone()
                    .unwrap_or("espresense/rooms".to_string()),
                base_topic: config.base_topic(),
                reset_topic: config.reset_topic(),
            },
            eventloop,
        )
    }

    pub async fn subscribe(&self) -> Result<(), rumqttc::ClientError> {
        self.client
            .subscribe_many(vec![
                SubscribeFilter::new(format!("{}#", self.base_topic), QoS::AtMostOnce),
                SubscribeFilter::new(self.reset_topic.clone(), QoS::AtMostOnce),
            ])
            .await?;

        Ok(())
    }

    /// Forward base station reports and reset requests to the engine until
    /// the engine side hangs up.
    pub async fn event_loop(
        &self,
        eventloop: &mut rumqttc::EventLoop,
        tx: mpsc::Sender<EngineEvent>,
    ) {
        loop {
            match eventloop.poll().await {
                Ok(notification) => match notification {
                    rumqttc::Event::Incoming(rumqttc::Packet::Publish(p)) => {
                        debug!("Received MQTT message on topic {}: {:?}", p.topic, p.payload);

                        let event = if p.topic == self.reset_topic {
                            EngineEvent::Reset
                        } else {
                            EngineEvent::Observation {
                                topic: p.topic,
                                payload: p.payload.to_vec(),
                            }
                        };

                        if tx.send(event).await.is_err() {
                            debug!("Engine stopped, leaving MQTT event loop");
                            break;
                        }
                    }
                    rumqttc::Event::Incoming(rumqttc::Packet::SubAck(_)) => {
                        debug!("Subscription acknowledged");
                    }
                    rumqttc::Event::Incoming(rumqttc::Packet::ConnAck(_)) => {
                        debug!("Connection acknowledged");
                        if let Err(err) = self.subscribe().await {
                            error!("Error subscribing to MQTT topics: {:?}", err);
                        }
                    }
                    _ => {}
                },
                Err(e) => {
                    error!("Error polling MQTT event loop: {:?}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    /// Publish the full state of one entity, replacing the retained one
    pub async fn publish_presence(&self, update: &PresenceUpdate) -> anyhow::Result<()> {
        info!(
            "Publishing {} in {} ({} rooms)",
            update.entity_id,
            update.state,
            update.attributes.len()
        );
        let payload = serde_json::to_string(update)?;
        // Never wait on the request queue: only the event loop drains it, and
        // the event loop may itself be waiting for the engine to take a message
        self.client.try_publish(
            state_topic(&self.topic_path, &update.entity_id),
            QoS::AtLeastOnce,
            true,
            payload,
        )?;
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<(), rumqttc::ClientError> {
        debug!("Disconnecting MQTT client");
        self.client.disconnect().await
    }
}

fn state_topic(topic_path: &str, entity_id: &str) -> String {
    format!("{}/{}", topic_path, sanitize_name(entity_id))
}

fn sanitize_name(name: &str) -> String {
    // Remove any non-alphanumeric characters and replace spaces with underscores
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect::<String>()
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_sanitize_name() {
        let name = "Test's Device 123";
        let sanitized = super::sanitize_name(name);
        assert_eq!(sanitized, "test_s_device_123");
    }

    #[test]
    fn test_state_topic() {
        assert_eq!(
            super::state_topic("espresense/rooms", "espresense.Alice Phone"),
            "espresense/rooms/espresense_alice_phone"
        );
    }
}
