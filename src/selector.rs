use crate::estimator::RoomDistances;

pub const UNAVAILABLE: &str = "unavailable";

/// Pick the room with the smallest estimated distance.
///
/// Ties go to the room seen first. With no estimates, fall back to the base
/// station behind the current event, or `unavailable` when there is none.
pub fn select_room(distances: &RoomDistances, fallback: Option<&str>) -> String {
    let mut nearest: Option<(&str, f64)> = None;
    for (room, distance) in distances.iter() {
        match nearest {
            Some((_, best)) if distance >= best => {}
            _ => nearest = Some((room, distance)),
        }
    }

    nearest
        .map(|(room, _)| room)
        .or(fallback)
        .unwrap_or(UNAVAILABLE)
        .to_string()
}
