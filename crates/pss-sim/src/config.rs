//! Tunable thresholds and timings.
//!
//! Plain public fields with a `Default` impl reproducing the reference run's
//! initial conditions, in the style of `durable_runtime::Config`.

/// Tunable thresholds and timings for a simulation run.
#[derive(Copy, Clone, Debug)]
pub struct SimConfig {
    /// Period between frequency-oracle samples, in milliseconds.
    ///
    /// Default: 20ms.
    pub simulation_step_ms: u64,

    /// Virtual-time offset, in seconds, at which the disturbance used by the
    /// frequency-deviation formula begins.
    ///
    /// Default: 5.0s.
    pub disturbance_start_s: f64,

    /// Fixed delay between a breaker agent observing a trip addressed to it
    /// and emitting `BreakerOpened`.
    ///
    /// Default: 100ms.
    pub breaker_operating_delay_ms: u64,

    /// Minimum frequency-deviation change, in Hz, that forces a full VPP
    /// update even before the time-based gate fires.
    ///
    /// Default: 0.01Hz.
    pub freq_change_threshold_hz: f64,

    /// Maximum time, in seconds, between full VPP updates regardless of how
    /// little the frequency deviation has changed.
    ///
    /// Default: 1.0s.
    pub freq_full_update_max_s: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            simulation_step_ms: 20,
            disturbance_start_s: 5.0,
            breaker_operating_delay_ms: 100,
            freq_change_threshold_hz: 0.01,
            freq_full_update_max_s: 1.0,
        }
    }
}
