use std::cell::RefCell;
use std::fs::File;
use std::rc::Rc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

use pss_sim::breaker::spawn_breaker_agent;
use pss_sim::frequency::spawn_frequency_oracle;
use pss_sim::protection::{
    spawn_protection_engine, DistanceProtection, FaultInfo, OverCurrentProtection,
    ProtectionStages, ProtectiveComponent,
};
use pss_sim::sink::WriterCsvSink;
use pss_sim::vpp::{spawn_vpp_controller, DeviceKind, FrequencyControlConfig, PhysicalState, VppPopulation};
use pss_sim::{Registry, SimConfig};

/// Runs the reference scenario from the end-to-end test description: a
/// protected line and transformer, selective overcurrent and distance
/// faults, and two frequency-responsive VPP populations.
#[derive(Debug, Parser)]
struct Args {
    /// Frequency-oracle sampling period, in milliseconds.
    #[arg(long, env = "PSS_SIM_STEP_MS")]
    step_ms: Option<u64>,

    /// Virtual-time offset, in seconds, at which the frequency disturbance
    /// begins.
    #[arg(long, env = "PSS_SIM_DISTURBANCE_START_S")]
    disturbance_start_s: Option<f64>,

    /// Virtual-time horizon to run the simulation to, in milliseconds.
    #[arg(long, env = "PSS_SIM_HORIZON_MS", default_value_t = 70_000)]
    horizon_ms: u64,

    /// Path the frequency oracle's CSV power trace is written to.
    #[arg(long, env = "PSS_SIM_CSV_PATH", default_value = "vpp_power_trace.csv")]
    csv_path: String,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_filter(tracing_subscriber::EnvFilter::from_default_env()),
        )
        .init();

    let args = Args::parse();

    let mut config = SimConfig::default();
    if let Some(step_ms) = args.step_ms {
        config.simulation_step_ms = step_ms;
    }
    if let Some(disturbance_start_s) = args.disturbance_start_s {
        config.disturbance_start_s = disturbance_start_s;
    }

    let scheduler = pss_sim::Scheduler::new();
    let registry = Rc::new(RefCell::new(Registry::new()));

    let (line, transformer, remote_fault_source, ev_piles, ess_units) =
        register_entities(&mut registry.borrow_mut());

    spawn_protection_engine(&scheduler, registry.clone());
    spawn_breaker_agent(&scheduler, line, config.breaker_operating_delay_ms);
    spawn_breaker_agent(&scheduler, transformer, config.breaker_operating_delay_ms);

    let ev_population = VppPopulation::new("EV_VPP", ev_piles.clone());
    let ess_population = VppPopulation::new("ESS_VPP", ess_units.clone());
    spawn_vpp_controller(&scheduler, registry.clone(), ev_population, config);
    spawn_vpp_controller(&scheduler, registry.clone(), ess_population, config);

    let managed_entities: Vec<_> = ev_piles.into_iter().chain(ess_units).collect();
    let csv_file = File::create(&args.csv_path)
        .with_context(|| format!("failed to create csv trace file at {}", args.csv_path))?;
    spawn_frequency_oracle(
        &scheduler,
        registry.clone(),
        managed_entities,
        config.simulation_step_ms,
        config.disturbance_start_s,
        WriterCsvSink::new(csv_file),
    );

    tracing::info!(horizon_ms = args.horizon_ms, "simulation starting");

    // Scenario 1: selective overcurrent on the line at t=6000ms.
    scheduler.run_until(6_000);
    let fault = FaultInfo::new(15.0, line)
        .with_voltage_kv(220.0)
        .with_distance_km(10.0)
        .with_impedance_ohm(11.73);
    scheduler.trigger(pss_sim::event::FAULT_INFO, &fault);

    // Scenario 3: transformer overcurrent at t=13000ms, impedance derived.
    scheduler.run_until(13_000);
    let fault = FaultInfo::new(3.0, transformer).with_voltage_kv(220.0);
    scheduler.trigger(pss_sim::event::FAULT_INFO, &fault);

    // Scenario 2: backup-zone-only pickup on the line from a fault on
    // another entity, current held below the overcurrent pickup threshold.
    scheduler.run_until(20_000);
    let fault = FaultInfo::new(3.0, remote_fault_source)
        .with_voltage_kv(220.0)
        .with_impedance_ohm(20.0);
    scheduler.trigger(pss_sim::event::FAULT_INFO, &fault);

    scheduler.run_until(args.horizon_ms);

    tracing::info!("simulation complete");
    Ok(())
}

/// Register the reference-run entities: a protected transmission line, a
/// protected transformer, a bystander entity used only as the "faulty" id
/// for the backup-zone scenario, and two VPP populations (EV piles tuned to
/// scenario 6's SOC floor, ESS units tuned to scenario 5's sustained dip).
fn register_entities(
    registry: &mut Registry,
) -> (
    pss_sim::Entity,
    pss_sim::Entity,
    pss_sim::Entity,
    Vec<pss_sim::Entity>,
    Vec<pss_sim::Entity>,
) {
    let line = registry.create();
    registry.emplace(
        line,
        ProtectionStages(vec![
            ProtectiveComponent::OverCurrent(OverCurrentProtection::new("OC-L1P-Fast", 5.0, 200)),
            ProtectiveComponent::Distance(DistanceProtection::new([5.0, 15.0, 25.0], [0, 300, 700])),
        ]),
    );

    let transformer = registry.create();
    registry.emplace(
        transformer,
        ProtectionStages(vec![ProtectiveComponent::OverCurrent(
            OverCurrentProtection::new("OC-T1P-Main", 2.5, 300),
        )]),
    );

    let remote_fault_source = registry.create();

    let ev_pile = registry.create();
    registry.emplace(
        ev_pile,
        FrequencyControlConfig {
            kind: DeviceKind::EvPile,
            base_power_kw: -5.0,
            gain_kw_per_hz: 50.0,
            deadband_hz: 0.03,
            max_output_kw: 11.0,
            min_output_kw: -11.0,
            soc_min_threshold: 0.10,
            soc_max_threshold: 0.95,
        },
    );
    registry.emplace(ev_pile, PhysicalState::new(-5.0, 0.09));

    let ess_unit = registry.create();
    registry.emplace(
        ess_unit,
        FrequencyControlConfig {
            kind: DeviceKind::EssUnit,
            base_power_kw: 0.0,
            gain_kw_per_hz: 666.67,
            deadband_hz: 0.03,
            max_output_kw: 1000.0,
            min_output_kw: -1000.0,
            soc_min_threshold: 0.1,
            soc_max_threshold: 0.9,
        },
    );
    registry.emplace(ess_unit, PhysicalState::new(0.0, 0.5));

    (line, transformer, remote_fault_source, vec![ev_pile], vec![ess_unit])
}
