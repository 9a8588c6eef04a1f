//! The fixed roster of simulated sensors.

#[cfg(feature = "serde")]
use serde::Serialize;

/// Static description of a sensor node.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct SensorDescriptor {
    /// Numeric id reported by the field device.
    pub slave_id: u32,
    /// Stable sensor id, also used as its display name (e.g. `KP-002`).
    pub id: &'static str,
    /// Street or area the sensor is mounted in.
    pub location: &'static str,
    pub latitude: f64,
    pub longitude: f64,
}

/// Maximum number of sensors the simulator can drive.
pub const MAX_ACTIVE_SENSORS: usize = ROSTER.len();

/// Sensors in the order they are brought online by the simulator.
///
/// Setting the active sensor count to `n` simulates `ROSTER[..n]`.
pub const ROSTER: [SensorDescriptor; 10] = [
    SensorDescriptor {
        slave_id: 1,
        id: "KP-002",
        location: "Ormes Road",
        latitude: 13.0818,
        longitude: 80.2460,
    },
    SensorDescriptor {
        slave_id: 2,
        id: "KP-003",
        location: "Flowers Road",
        latitude: 13.0782,
        longitude: 80.2468,
    },
    SensorDescriptor {
        slave_id: 3,
        id: "KP-005",
        location: "Halls Road",
        latitude: 13.0746,
        longitude: 80.2513,
    },
    SensorDescriptor {
        slave_id: 4,
        id: "EG-001",
        location: "Casa Major Road",
        latitude: 13.0718,
        longitude: 80.2548,
    },
    SensorDescriptor {
        slave_id: 5,
        id: "KP-004",
        location: "Pantheon Road",
        latitude: 13.0728,
        longitude: 80.2574,
    },
    SensorDescriptor {
        slave_id: 6,
        id: "EG-004",
        location: "Ethiraj Salai",
        latitude: 13.0731,
        longitude: 80.2622,
    },
    SensorDescriptor {
        slave_id: 7,
        id: "EG-005",
        location: "College Road (Egmore)",
        latitude: 13.0766,
        longitude: 80.2625,
    },
    SensorDescriptor {
        slave_id: 8,
        id: "KP-001",
        location: "Kilpauk Garden Road",
        latitude: 13.0845,
        longitude: 80.2390,
    },
    SensorDescriptor {
        slave_id: 9,
        id: "EG-002",
        location: "Kellys Road",
        latitude: 13.0882,
        longitude: 80.2470,
    },
    SensorDescriptor {
        slave_id: 10,
        id: "EG-003",
        location: "Commander-in-Chief Road",
        latitude: 13.0910,
        longitude: 80.2498,
    },
];

/// The first `count` sensors of the roster, with `count` clamped to `1..=10`.
#[must_use]
pub fn active_roster(count: usize) -> &'static [SensorDescriptor] {
    &ROSTER[..clamp_sensor_count(count)]
}

/// Clamp a requested sensor count into the supported range.
#[must_use]
pub fn clamp_sensor_count(count: usize) -> usize {
    count.clamp(1, MAX_ACTIVE_SENSORS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roster_ids_are_unique() {
        let mut ids: Vec<_> = ROSTER.iter().map(|s| s.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), ROSTER.len());
    }

    #[test]
    fn test_slave_ids_are_sequential() {
        for (i, sensor) in ROSTER.iter().enumerate() {
            assert_eq!(sensor.slave_id as usize, i + 1);
        }
    }

    #[test]
    fn test_active_roster_clamps() {
        assert_eq!(active_roster(0).len(), 1);
        assert_eq!(active_roster(3).len(), 3);
        assert_eq!(active_roster(3)[2].id, "KP-005");
        assert_eq!(active_roster(42).len(), 10);
    }
}
