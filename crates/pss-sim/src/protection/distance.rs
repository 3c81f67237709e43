use super::FaultInfo;
use crate::registry::Entity;

/// Sentinel trip delay for a fault outside every zone.
pub const NO_TRIP_DELAY_MS: i32 = 99_999;

/// A three-zone distance protection element. `z_set` is non-decreasing
/// (zone 1 is the smallest/fastest reach, zone 3 the largest/slowest
/// backup reach).
#[derive(Clone, Debug)]
pub struct DistanceProtection {
    pub z_set: [f64; 3],
    pub t_ms: [i32; 3],
}

impl DistanceProtection {
    pub fn new(z_set: [f64; 3], t_ms: [i32; 3]) -> Self {
        Self { z_set, t_ms }
    }

    /// For a fault on a different entity, only the backup zone (zone 3) can
    /// pick up. For a fault on this entity, "within any zone" and the
    /// backup-only check both reduce to the same zone-3 threshold since the
    /// zones are nested (z1 <= z2 <= z3) -- so there is in fact a single
    /// pick-up condition regardless of which entity the fault is on.
    pub fn pick_up(&self, fault: &FaultInfo, _self_id: Entity) -> bool {
        fault.impedance_ohm <= self.z_set[2]
    }

    /// The delay of the smallest zone the fault falls into, or
    /// [`NO_TRIP_DELAY_MS`] if it falls outside every zone.
    pub fn trip_delay_ms(&self, fault: &FaultInfo) -> i32 {
        let z = fault.impedance_ohm;
        if z <= self.z_set[0] {
            self.t_ms[0]
        } else if z <= self.z_set[1] {
            self.t_ms[1]
        } else if z <= self.z_set[2] {
            self.t_ms[2]
        } else {
            NO_TRIP_DELAY_MS
        }
    }

    pub fn name(&self) -> &str {
        "distance"
    }
}
