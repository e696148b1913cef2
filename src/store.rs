use std::collections::BTreeMap;

/// Index of a device in the engine's device arena
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceIndex(pub usize);

/// Live base station distances for one device, keyed by base station id.
/// Ordered so that iteration (and therefore tie-breaking) is deterministic.
pub type Readings = BTreeMap<String, f64>;

/// Per-device map of base station → last reported distance.
///
/// Presence of a reading is exactly "this base station currently hears the
/// device"; expiry is driven from outside by the liveness scheduler.
#[derive(Debug, Default)]
pub struct ObservationStore {
    devices: Vec<Readings>,
}

impl ObservationStore {
    pub fn new(device_count: usize) -> Self {
        ObservationStore {
            devices: vec![Readings::new(); device_count],
        }
    }

    /// Insert or overwrite a reading, returning the device's full reading set
    pub fn put(&mut self, device: DeviceIndex, base_station: &str, distance: f64) -> &Readings {
        let readings = &mut self.devices[device.0];
        match readings.get_mut(base_station) {
            Some(existing) => *existing = distance,
            None => {
                readings.insert(base_station.to_string(), distance);
            }
        }
        readings
    }

    /// Remove a reading; absent readings are a no-op
    pub fn remove(&mut self, device: DeviceIndex, base_station: &str) -> Option<f64> {
        self.devices[device.0].remove(base_station)
    }

    pub fn snapshot(&self, device: DeviceIndex) -> &Readings {
        &self.devices[device.0]
    }

    pub fn clear(&mut self) {
        self.devices.iter_mut().for_each(Readings::clear);
    }
}
