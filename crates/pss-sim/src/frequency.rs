//! Frequency oracle (C7).
//!
//! Periodically evaluates the analytic frequency-deviation formula, publishes
//! a `FrequencyUpdate` sample, and logs the aggregate VPP power trace.

use std::cell::RefCell;
use std::rc::Rc;

use crate::event::{FrequencyInfo, FREQUENCY_UPDATE};
use crate::registry::{Entity, Registry};
use crate::scheduler::{delay, Scheduler};
use crate::sink::CsvSink;
use crate::vpp::PhysicalState;

const P: f64 = 0.0862;
const M: f64 = 0.1404;
const M1: f64 = 0.1577;
const M2: f64 = 0.0397;
const N: f64 = 0.125;

/// Evaluate the reference frequency-deviation formula at `t_rel` seconds
/// since the disturbance start. Verbatim per the spec, for bit-identical
/// reproducibility; `t_rel < 0` is defined as zero deviation.
pub fn frequency_deviation_hz(t_rel: f64) -> f64 {
    if t_rel < 0.0 {
        return 0.0;
    }
    -((M + (M1 * (M * t_rel).sin() - M * (M * t_rel).cos())) / M2) * (-N * t_rel).exp() * P
}

/// Spawn the frequency oracle as a detached, long-lived task.
///
/// `managed_entities` is the fixed set of entities whose `PhysicalState`
/// power is summed into the CSV trace's `TotalVppPower_kW` column; it is the
/// union of every VPP population's managed devices.
pub fn spawn_frequency_oracle(
    scheduler: &Scheduler,
    registry: Rc<RefCell<Registry>>,
    managed_entities: Vec<Entity>,
    simulation_step_ms: u64,
    disturbance_start_s: f64,
    mut csv_sink: impl CsvSink + 'static,
) {
    let engine_scheduler = scheduler.clone();

    scheduler
        .spawn(async move {
            // A sink failure is reported once, then suppressed for the
            // rest of the run.
            let mut sink_failed = false;

            if let Err(err) = csv_sink.write_header() {
                tracing::warn!(%err, "csv sink header write failed");
                sink_failed = true;
            }

            loop {
                delay(&engine_scheduler, simulation_step_ms).await;

                let sim_time_ms = engine_scheduler.now();
                let sim_time_s = sim_time_ms as f64 / 1000.0;
                let t_rel = sim_time_s - disturbance_start_s;
                let freq_deviation_hz = frequency_deviation_hz(t_rel);

                let info = FrequencyInfo {
                    sim_time_seconds: sim_time_s,
                    freq_deviation_hz,
                };
                tracing::trace!(
                    sim_time_s,
                    freq_deviation_hz,
                    "frequency oracle sample"
                );
                engine_scheduler.trigger(FREQUENCY_UPDATE, &info);

                let total_power_kw: f64 = {
                    let registry = registry.borrow();
                    managed_entities
                        .iter()
                        .filter_map(|&e| registry.get::<PhysicalState>(e))
                        .map(|state| state.current_power_kw)
                        .sum()
                };

                if !sink_failed {
                    if let Err(err) =
                        csv_sink.write_record(sim_time_ms, sim_time_s, t_rel, freq_deviation_hz, total_power_kw)
                    {
                        tracing::warn!(%err, "csv sink record write failed");
                        sink_failed = true;
                    }
                }
            }
        })
        .detach();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_relative_time_is_zero_deviation() {
        assert_eq!(frequency_deviation_hz(-1.0), 0.0);
        assert_eq!(frequency_deviation_hz(0.0), 0.0);
    }

    #[test]
    fn deviation_is_negative_and_small_shortly_after_the_disturbance_starts() {
        let dev = frequency_deviation_hz(0.1);
        assert!(dev < 0.0);
        assert!(dev.abs() < 0.03, "expected a small deviation near t=0, got {dev}");
    }

    #[test]
    fn deviation_reaches_roughly_the_sustained_dip_magnitude_around_five_seconds() {
        // Scenario 5 characterizes the sustained dip as freq_dev ~= -0.2 Hz;
        // the analytic curve passes through a comparable magnitude a few
        // seconds after the disturbance starts.
        let dev = frequency_deviation_hz(5.0);
        assert!(dev < -0.1 && dev > -0.3, "expected a deviation around -0.1..-0.3 Hz, got {dev}");
    }
}
