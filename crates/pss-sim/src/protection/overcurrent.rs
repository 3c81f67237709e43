use super::FaultInfo;

/// A single overcurrent stage. Multiple stages (e.g. a fast stage and a main
/// stage) may coexist on the same entity.
#[derive(Clone, Debug)]
pub struct OverCurrentProtection {
    pub pickup_ka: f64,
    pub delay_ms: i32,
    pub stage_name: String,
}

impl OverCurrentProtection {
    pub fn new(stage_name: impl Into<String>, pickup_ka: f64, delay_ms: i32) -> Self {
        Self {
            pickup_ka,
            delay_ms,
            stage_name: stage_name.into(),
        }
    }

    pub fn pick_up(&self, fault: &FaultInfo) -> bool {
        fault.current_ka >= self.pickup_ka
    }

    pub fn trip_delay_ms(&self, _fault: &FaultInfo) -> i32 {
        self.delay_ms
    }

    pub fn name(&self) -> &str {
        &self.stage_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;

    fn fault(current_ka: f64) -> FaultInfo {
        let mut registry = Registry::new();
        let entity = registry.create();
        FaultInfo::new(current_ka, entity)
    }

    #[test]
    fn picks_up_at_or_above_the_pickup_threshold() {
        let stage = OverCurrentProtection::new("OC-L1P-Fast", 5.0, 200);
        assert!(stage.pick_up(&fault(5.0)));
        assert!(stage.pick_up(&fault(15.0)));
        assert!(!stage.pick_up(&fault(4.99)));
    }

    #[test]
    fn trip_delay_is_fixed_regardless_of_fault_magnitude() {
        let stage = OverCurrentProtection::new("OC-T1P-Main", 2.5, 300);
        assert_eq!(stage.trip_delay_ms(&fault(3.0)), 300);
        assert_eq!(stage.trip_delay_ms(&fault(30.0)), 300);
    }
}
