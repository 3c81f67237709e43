use std::cell::RefCell;
use std::rc::Rc;

use super::{FaultInfo, ProtectionStages};
use crate::event::{ENTITY_TRIP, FAULT_INFO};
use crate::registry::Registry;
use crate::scheduler::{delay, wait_for_event, Scheduler};

/// Spawn the protection engine (C5) as a detached, long-lived task.
///
/// On each `FaultInfo` event it derives the missing impedance, fans out
/// across every entity's [`ProtectionStages`], and spawns one detached
/// sub-task per picked-up stage that waits out the stage's trip delay and
/// then emits `EntityTrip`. The engine never cancels pending sub-tasks: if a
/// second fault arrives before earlier trips fire, both trip chains run to
/// completion independently, and selectivity is achieved purely through the
/// per-stage delays.
pub fn spawn_protection_engine(scheduler: &Scheduler, registry: Rc<RefCell<Registry>>) {
    let scheduler = scheduler.clone();
    let engine_scheduler = scheduler.clone();

    scheduler
        .spawn(async move {
            loop {
                let mut fault: FaultInfo = wait_for_event(&engine_scheduler, FAULT_INFO).await;
                fault.derive_impedance();

                tracing::info!(
                    faulty_entity = fault.faulty_entity_id.id(),
                    current_ka = fault.current_ka,
                    impedance_ohm = fault.impedance_ohm,
                    "fault injected"
                );

                let mut pickups = Vec::new();
                registry
                    .borrow_mut()
                    .for_each::<ProtectionStages>(|stages, entity| {
                        for stage in &stages.0 {
                            if stage.pick_up(&fault, entity) {
                                pickups.push((entity, stage.trip_delay_ms(&fault), stage.name().to_string()));
                            }
                        }
                    });

                for (entity, trip_delay_ms, stage_name) in pickups {
                    let trip_scheduler = engine_scheduler.clone();
                    engine_scheduler
                        .spawn(async move {
                            delay(&trip_scheduler, trip_delay_ms.max(0) as u64).await;
                            tracing::info!(entity = entity.id(), stage = %stage_name, "entity trip");
                            trip_scheduler.trigger(ENTITY_TRIP, &entity);
                            Ok(())
                        })
                        .detach();
                }
            }
        })
        .detach();
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::event::ENTITY_TRIP;
    use crate::protection::{DistanceProtection, OverCurrentProtection, ProtectiveComponent};
    use crate::scheduler::wait_for_event;

    #[test]
    fn selective_overcurrent_scenario_trips_at_the_documented_offsets() {
        let scheduler = Scheduler::new();
        let registry = Rc::new(RefCell::new(Registry::new()));
        let line = registry.borrow_mut().create();

        registry.borrow_mut().emplace(
            line,
            ProtectionStages(vec![
                ProtectiveComponent::OverCurrent(OverCurrentProtection::new(
                    "OC-L1P-Fast",
                    5.0,
                    200,
                )),
                ProtectiveComponent::Distance(DistanceProtection::new(
                    [5.0, 15.0, 25.0],
                    [0, 300, 700],
                )),
            ]),
        );

        spawn_protection_engine(&scheduler, registry.clone());

        let trips = Rc::new(RefCell::new(Vec::new()));
        let trips2 = trips.clone();
        let trip_scheduler = scheduler.clone();
        scheduler
            .spawn(async move {
                loop {
                    let entity = wait_for_event(&trip_scheduler, ENTITY_TRIP).await;
                    trips2.borrow_mut().push((trip_scheduler.now(), entity));
                }
            })
            .detach();

        scheduler.run_until(6000);
        let fault = FaultInfo::new(15.0, line)
            .with_voltage_kv(220.0)
            .with_distance_km(10.0)
            .with_impedance_ohm(11.73);
        scheduler.trigger(100, &fault);

        scheduler.run_until(6300);

        // Overcurrent fires first at 6200 (200ms delay); distance zone 2
        // would fire later at 6300 (300ms delay) but the line only has one
        // entity, so only the earliest trip is observed before 6300 unless
        // both are due by the horizon -- here both are due by 6300.
        let recorded = trips.borrow();
        assert!(recorded.iter().any(|&(t, e)| t == 6200 && e == line));
    }
}
