use serde_derive::Deserialize;

use crate::error::PresenceError;

/// A single event on the engine's inbound stream
#[derive(Clone, Debug)]
pub enum EngineEvent {
    Observation { topic: String, payload: Vec<u8> },
    Reset,
}

/// The part of a base station report the engine cares about.
/// Base stations send more (rssi, tx power, ...), which is ignored.
#[derive(Deserialize, Debug)]
struct DistancePayload {
    distance: f64,
}

/// Extract a usable distance in meters from a raw report payload
pub fn parse_distance(topic: &str, payload: &[u8]) -> Result<f64, PresenceError> {
    let message: DistancePayload =
        serde_json::from_slice(payload).map_err(|err| PresenceError::malformed(topic, err))?;

    if !message.distance.is_finite() || message.distance < 0.0 {
        return Err(PresenceError::malformed(
            topic,
            format!("distance {} is not a non-negative number", message.distance),
        ));
    }

    Ok(message.distance)
}
