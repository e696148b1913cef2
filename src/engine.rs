//! Room presence engine: owns every device's live readings and liveness
//! timers, and recomputes the device's room on each inbound event.
//!
//! Handlers run to completion one at a time; the caller serializes
//! observations, resets and timer expiries into a single stream.

use log::{debug, info};
use serde_derive::Serialize;
use tokio::time::Instant;

use crate::config::{AppConfig, DeviceConfig, PresenceConfig, RoomConfig};
use crate::error::PresenceError;
use crate::estimator::{self, Room, RoomDistances};
use crate::messages::parse_distance;
use crate::scheduler::{LivenessScheduler, TimerKey};
use crate::selector::{UNAVAILABLE, select_room};
use crate::store::{DeviceIndex, ObservationStore};

#[derive(Debug, Clone)]
pub struct Device {
    pub id: String,
    pub entity_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceStatus {
    Unavailable,
    Tracked,
}

/// Last computed presence of one device
#[derive(Debug, Clone)]
pub struct PresenceState {
    pub status: PresenceStatus,
    pub room: String,
    pub distances: RoomDistances,
}

impl PresenceState {
    fn unavailable() -> Self {
        PresenceState {
            status: PresenceStatus::Unavailable,
            room: UNAVAILABLE.to_string(),
            distances: RoomDistances::default(),
        }
    }
}

/// State to publish for one entity; replaces whatever was published before
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PresenceUpdate {
    #[serde(skip)]
    pub entity_id: String,
    pub state: String,
    pub attributes: RoomDistances,
}

/// Inbound side of the engine, independent of any transport
pub trait InboundEvents {
    /// Handle one distance report. `Ok(None)` when the topic belongs to no
    /// tracked device.
    fn on_observation(
        &mut self,
        topic: &str,
        payload: &[u8],
        now: Instant,
    ) -> Result<Option<PresenceUpdate>, PresenceError>;

    /// Forget every reading and timer; every device becomes unavailable
    fn on_reset(&mut self) -> Vec<PresenceUpdate>;
}

pub struct PresenceEngine {
    devices: Vec<Device>,
    presence: Vec<PresenceState>,
    rooms: Vec<Room>,
    base_topic: String,
    max_distance: f64,
    store: ObservationStore,
    scheduler: LivenessScheduler,
}

impl PresenceEngine {
    pub fn new(
        devices: &[DeviceConfig],
        rooms: &[RoomConfig],
        base_topic: String,
        presence: &PresenceConfig,
    ) -> Result<Self, PresenceError> {
        if devices.is_empty() {
            return Err(PresenceError::NoDevices);
        }

        let prefix = presence.entity_prefix();
        let devices: Vec<Device> = devices
            .iter()
            .map(|device| Device {
                id: device.device_id.clone(),
                entity_id: format!("{}.{}", prefix, device.entity_name),
            })
            .collect();

        info!(
            "Tracking {} devices across {} rooms",
            devices.len(),
            rooms.len()
        );

        Ok(PresenceEngine {
            presence: vec![PresenceState::unavailable(); devices.len()],
            store: ObservationStore::new(devices.len()),
            scheduler: LivenessScheduler::new(presence.message_timer()),
            rooms: rooms.iter().map(Room::from).collect(),
            max_distance: presence.max_distance(),
            base_topic,
            devices,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, PresenceError> {
        PresenceEngine::new(
            config.devices.as_deref().unwrap_or_default(),
            config.rooms.as_deref().unwrap_or_default(),
            config.mqtt.base_topic(),
            &config.presence(),
        )
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    #[cfg(test)]
    fn presence(&self, entity_id: &str) -> Option<&PresenceState> {
        self.devices
            .iter()
            .position(|device| device.entity_id == entity_id)
            .map(|index| &self.presence[index])
    }

    /// When the next liveness timer is due, if any is armed
    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.scheduler.next_deadline()
    }

    /// Evict every reading whose liveness timer is due at `now`,
    /// recomputing the affected devices.
    pub fn on_expiry(&mut self, now: Instant) -> Vec<PresenceUpdate> {
        self.scheduler
            .expire(now)
            .into_iter()
            .map(|key| {
                debug!(
                    "Reading from {} for {} timed out",
                    key.base_station, self.devices[key.device.0].id
                );
                self.store.remove(key.device, &key.base_station);
                self.recompute(key.device, &key.base_station)
            })
            .collect()
    }

    // First configured device whose id prefixes the topic below the base
    // topic; returns the rest of the topic.
    fn resolve<'t>(&self, topic: &'t str) -> Option<(DeviceIndex, &'t str)> {
        let rest = topic.strip_prefix(self.base_topic.as_str())?;
        self.devices.iter().enumerate().find_map(|(index, device)| {
            rest.strip_prefix(device.id.as_str())
                .map(|tail| (DeviceIndex(index), tail))
        })
    }

    fn recompute(&mut self, device: DeviceIndex, fallback: &str) -> PresenceUpdate {
        let distances =
            estimator::estimate(self.store.snapshot(device), &self.rooms, self.max_distance);
        let state = PresenceState {
            status: if distances.is_empty() {
                PresenceStatus::Unavailable
            } else {
                PresenceStatus::Tracked
            },
            room: select_room(&distances, Some(fallback)),
            distances,
        };

        let entity_id = &self.devices[device.0].entity_id;
        let previous = std::mem::replace(&mut self.presence[device.0], state);
        let state = &self.presence[device.0];
        match (previous.status, state.status) {
            (PresenceStatus::Unavailable, PresenceStatus::Tracked) => {
                info!("{} detected in {}", entity_id, state.room)
            }
            (PresenceStatus::Tracked, PresenceStatus::Unavailable) => {
                info!("{} is no longer detected", entity_id)
            }
            _ if previous.room != state.room => {
                info!("{} moved from {} to {}", entity_id, previous.room, state.room)
            }
            _ => {}
        }

        let update = PresenceUpdate {
            entity_id: entity_id.clone(),
            state: state.room.clone(),
            attributes: state.distances.clone(),
        };
        debug!(
            "entity_id: {}, state: {}, attributes: {:?}",
            update.entity_id, update.state, update.attributes
        );
        update
    }
}

impl InboundEvents for PresenceEngine {
    fn on_observation(
        &mut self,
        topic: &str,
        payload: &[u8],
        now: Instant,
    ) -> Result<Option<PresenceUpdate>, PresenceError> {
        let Some((device, tail)) = self.resolve(topic) else {
            return Ok(None);
        };

        let base_station = match tail.rsplit_once('/') {
            Some((_, base_station)) if !base_station.is_empty() => base_station,
            _ => return Err(PresenceError::malformed(topic, "no base station in topic")),
        };
        let distance = parse_distance(topic, payload)?;

        self.store.put(device, base_station, distance);
        self.scheduler.restart(
            TimerKey {
                device,
                base_station: base_station.to_string(),
            },
            now,
        );
        Ok(Some(self.recompute(device, base_station)))
    }

    fn on_reset(&mut self) -> Vec<PresenceUpdate> {
        info!("Resetting state and removing attributes for all devices");
        self.store.clear();
        self.scheduler.cancel_all();

        self.presence
            .iter_mut()
            .zip(&self.devices)
            .map(|(state, device)| {
                *state = PresenceState::unavailable();
                PresenceUpdate {
                    entity_id: device.entity_id.clone(),
                    state: UNAVAILABLE.to_string(),
                    attributes: RoomDistances::default(),
                }
            })
            .collect()
    }
}
