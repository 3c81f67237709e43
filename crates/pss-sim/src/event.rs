//! Well-known event ids and their payload types.

use crate::scheduler::EventId;

pub const GENERATOR_READY: EventId = 1;
pub const LOAD_CHANGE: EventId = 2;
pub const BREAKER_OPENED: EventId = 6;
pub const STABILITY_CONCERN: EventId = 7;
pub const LOAD_SHED_REQUEST: EventId = 8;
pub const POWER_ADJUST_REQUEST: EventId = 9;
pub const FAULT_INFO: EventId = 100;
pub const ENTITY_TRIP: EventId = 101;
pub const FREQUENCY_UPDATE: EventId = 200;

/// A frequency-deviation sample published periodically by the frequency
/// oracle (C7).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrequencyInfo {
    pub sim_time_seconds: f64,
    pub freq_deviation_hz: f64,
}
