//! Converts live base station distances into per-room distance estimates.
//!
//! A distance-only reading says nothing about direction, so for a base station
//! at distance `d` from the device and `r` from the room, the device-to-room
//! distance is bounded by two law-of-cosines evaluations at the angular
//! extremes. Each room collapses the tightest of those bounds across every
//! audible base station into one scalar.

use std::collections::HashMap;

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::config::RoomConfig;
use crate::store::Readings;

/// Offset from the aligned position, keeping the near bound off an exact tie
const ALIGNED_ANGLE_DEGREES: f64 = 1.0;

/// Static room profile: reference distance from each base station to the room
#[derive(Debug, Clone)]
pub struct Room {
    pub id: String,
    pub base_stations: HashMap<String, f64>,
}

impl From<&RoomConfig> for Room {
    fn from(config: &RoomConfig) -> Self {
        Room {
            id: config.room.clone(),
            base_stations: config.base_stations.clone(),
        }
    }
}

/// Room id → estimated distance, in a deterministic order
/// (configured room order, or base station id order without rooms).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoomDistances(Vec<(String, f64)>);

impl RoomDistances {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, room: &str) -> Option<f64> {
        self.0
            .iter()
            .find(|(id, _)| id == room)
            .map(|(_, distance)| *distance)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(id, distance)| (id.as_str(), *distance))
    }
}

impl FromIterator<(String, f64)> for RoomDistances {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        RoomDistances(iter.into_iter().collect())
    }
}

// Published as a JSON object, keeping entry order
impl Serialize for RoomDistances {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (room, distance) in &self.0 {
            map.serialize_entry(room, distance)?;
        }
        map.end()
    }
}

/// Bound with the device and room on nearly the same line through the
/// base station, on opposite sides: just short of `d + r`.
///
/// The `+` sign is deliberate: the angle is taken between device→station and
/// station→room, so at 1° this ties closely with `lower_bound` rather than
/// collapsing towards `|d - r|`.
pub fn upper_bound(d: f64, r: f64) -> f64 {
    let cos = ALIGNED_ANGLE_DEGREES.to_radians().cos();
    (d * d + r * r + 2.0 * d * r * cos).sqrt()
}

/// Law of cosines at 180°: `sqrt(d² + r² + 2dr)`, which is exactly `d + r`.
pub fn lower_bound(d: f64, r: f64) -> f64 {
    d + r
}

/// Collapse the bound interval to one value: the conservative bound when
/// the bounds do not overlap, otherwise the midpoint.
pub fn combine(max1: f64, min180: f64) -> f64 {
    if max1 > min180 {
        min180
    } else {
        min180 - (min180 - max1) / 2.0
    }
}

fn round_distance(distance: f64) -> f64 {
    (distance * 100.0).round() / 100.0
}

/// Estimate the distance from a device to one room. `None` when no base
/// station can be considered.
pub fn estimate_room(readings: &Readings, room: &Room, max_distance: f64) -> Option<f64> {
    let mut bounds = readings.iter().map(|(base_station, &d)| {
        let r = room
            .base_stations
            .get(base_station)
            .copied()
            .unwrap_or(max_distance);
        (upper_bound(d, r), lower_bound(d, r))
    });

    let (mut max1, mut min180) = bounds.next()?;
    for (upper, lower) in bounds {
        max1 = max1.max(upper);
        min180 = min180.min(lower);
    }
    Some(combine(max1, min180))
}

/// Per-room distance estimates for a device's live readings.
///
/// Without rooms every base station is its own room and readings pass
/// through unchanged.
pub fn estimate(readings: &Readings, rooms: &[Room], max_distance: f64) -> RoomDistances {
    if rooms.is_empty() {
        return readings
            .iter()
            .map(|(base_station, &distance)| (base_station.clone(), distance))
            .collect();
    }

    rooms
        .iter()
        .filter_map(|room| {
            estimate_room(readings, room, max_distance)
                .map(|distance| (room.id.clone(), round_distance(distance)))
        })
        .collect()
}
