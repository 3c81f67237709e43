//! Breaker agent (C6).

use crate::event::{BREAKER_OPENED, ENTITY_TRIP};
use crate::registry::Entity;
use crate::scheduler::{delay, wait_for_event, Scheduler};

/// Spawn one breaker agent for `entity`, detached.
///
/// Loops waiting for `EntityTrip`: if the tripped entity is this one, opens
/// after `operating_delay_ms` and stops (a breaker only opens once). Trips
/// addressed to any other entity are ignored and the agent re-subscribes,
/// since `EntityTrip` subscriptions are one-shot.
pub fn spawn_breaker_agent(scheduler: &Scheduler, entity: Entity, operating_delay_ms: u64) {
    let engine_scheduler = scheduler.clone();
    scheduler
        .spawn(async move {
            loop {
                let tripped: Entity = wait_for_event(&engine_scheduler, ENTITY_TRIP).await;
                if tripped == entity {
                    delay(&engine_scheduler, operating_delay_ms).await;
                    tracing::info!(entity = entity.id(), "breaker opened");
                    engine_scheduler.trigger(BREAKER_OPENED, &entity);
                    return Ok(());
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
    use crate::registry::Registry;
    use crate::scheduler::wait_for_event as wait;

    #[test]
    fn opens_only_for_its_own_entity_after_the_operating_delay() {
        let scheduler = Scheduler::new();
        let mut registry = Registry::new();
        let line = registry.create();
        let other = registry.create();

        spawn_breaker_agent(&scheduler, line, 100);

        let opened = Rc::new(RefCell::new(Vec::new()));
        let opened2 = opened.clone();
        let listener_scheduler = scheduler.clone();
        scheduler
            .spawn(async move {
                let e: Entity = wait(&listener_scheduler, BREAKER_OPENED).await;
                opened2.borrow_mut().push((listener_scheduler.now(), e));
                Ok(())
            })
            .detach();

        scheduler.run_until(100);
        scheduler.trigger(ENTITY_TRIP, &other);
        scheduler.run_until(200);
        assert!(opened.borrow().is_empty());

        scheduler.trigger(ENTITY_TRIP, &line);
        scheduler.run_until(400);

        assert_eq!(opened.borrow().as_slice(), &[(300, line)]);
    }
}
