//! Latest fused reading and the single-slot buffer that holds it

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

/// Fused distance / elevation / azimuth reading
///
/// Serializes to the stream wire format
/// `{"distance":..,"elevation_angle":..,"azimuth_angle":..}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TelemetryRecord {
    pub distance: f64,
    pub elevation_angle: f64,
    pub azimuth_angle: f64,
}

#[derive(Debug)]
struct SlotState {
    latest: TelemetryRecord,
    pending: bool,
    generation: u64,
}

/// Last-value-wins slot shared by the sensor side and the publisher
///
/// Each update overwrites the relevant fields of the latest record and
/// marks it pending. The publisher drains the pending record once per tick;
/// older unsent values are never queued.
#[derive(Debug, Clone)]
pub struct TelemetrySlot {
    inner: Arc<Mutex<SlotState>>,
}

/// A record taken from the slot, tagged with the update it came from
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Taken {
    pub record: TelemetryRecord,
    generation: u64,
}

impl TelemetrySlot {
    /// Create a slot seeded with the reported defaults
    ///
    /// The seed is not pending; nothing is published until a sensor update.
    pub fn new(initial_elevation: f64, initial_azimuth: f64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SlotState {
                latest: TelemetryRecord {
                    distance: 0.0,
                    elevation_angle: initial_elevation,
                    azimuth_angle: initial_azimuth,
                },
                pending: false,
                generation: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        // A panic while holding the lock cannot leave the plain-data state torn
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn update(&self, apply: impl FnOnce(&mut TelemetryRecord)) {
        let mut state = self.lock();
        apply(&mut state.latest);
        state.pending = true;
        state.generation += 1;
    }

    /// Record a new distance in meters
    pub fn update_distance(&self, distance: f64) {
        self.update(|r| r.distance = distance);
    }

    /// Record new turret angles in degrees
    pub fn update_angles(&self, elevation: f64, azimuth: f64) {
        self.update(|r| {
            r.elevation_angle = elevation;
            r.azimuth_angle = azimuth;
        });
    }

    /// Take the pending record, if any
    pub fn take(&self) -> Option<Taken> {
        let mut state = self.lock();
        if !state.pending {
            return None;
        }
        state.pending = false;
        Some(Taken {
            record: state.latest,
            generation: state.generation,
        })
    }

    /// Put a record that failed to publish back for the next tick
    ///
    /// Does nothing if a newer update arrived meanwhile.
    ///
    /// # Returns
    ///
    /// `true` if the record is pending again
    pub fn restore(&self, taken: Taken) -> bool {
        let mut state = self.lock();
        if state.generation != taken.generation {
            return false;
        }
        state.pending = true;
        true
    }

    /// Current fused values, pending or not
    pub fn snapshot(&self) -> TelemetryRecord {
        self.lock().latest
    }

    pub fn is_pending(&self) -> bool {
        self.lock().pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_is_not_pending() {
        let slot = TelemetrySlot::new(45.0, 39.0);
        assert!(slot.take().is_none());
        assert_eq!(
            slot.snapshot(),
            TelemetryRecord {
                distance: 0.0,
                elevation_angle: 45.0,
                azimuth_angle: 39.0
            }
        );
    }

    #[test]
    fn test_last_value_wins() {
        let slot = TelemetrySlot::new(45.0, 39.0);
        slot.update_distance(100.0);
        slot.update_distance(250.5);

        let taken = slot.take().unwrap();
        assert_eq!(taken.record.distance, 250.5);
        assert_eq!(taken.record.elevation_angle, 45.0);
        assert!(slot.take().is_none());
    }

    #[test]
    fn test_updates_fuse_fields() {
        let slot = TelemetrySlot::new(45.0, 39.0);
        slot.update_distance(12.0);
        slot.update_angles(10.0, 20.0);
        let record = slot.take().unwrap().record;
        assert_eq!(record.distance, 12.0);
        assert_eq!(record.elevation_angle, 10.0);
        assert_eq!(record.azimuth_angle, 20.0);
    }

    #[test]
    fn test_restore_only_when_not_superseded() {
        let slot = TelemetrySlot::new(0.0, 0.0);
        slot.update_distance(1.0);
        let taken = slot.take().unwrap();
        assert!(slot.restore(taken));
        assert!(slot.is_pending());

        let taken = slot.take().unwrap();
        slot.update_distance(2.0);
        assert!(!slot.restore(taken));
        assert_eq!(slot.take().unwrap().record.distance, 2.0);
    }

    #[test]
    fn test_wire_format() {
        let record = TelemetryRecord {
            distance: 100.0,
            elevation_angle: 45.0,
            azimuth_angle: 39.5,
        };
        assert_eq!(
            serde_json::to_string(&record).unwrap(),
            r#"{"distance":100.0,"elevation_angle":45.0,"azimuth_angle":39.5}"#
        );
    }
}
