//! autoreason-worker — runs the analysis engine against a seeded in-memory
//! host and reports what was applied.
//!
//! A smoke runner for the pass semantics: seeds a small timeline (activity,
//! operations) for a couple of machines, drives every rule for a number of
//! ticks and prints the reasons that were committed. The production service
//! wires the same engine to the persistence-backed host instead.

use std::sync::Arc;

use clap::Parser;
use tracing::info;

use autoreason_core::{
    load_dotenv, EngineConfig, MachineId, OperationId, ReasonId, TimeRange,
};
use autoreason_engine::rules::{BetweenOperations, LongIdle};
use autoreason_engine::{AnalysisEngine, AutoReasonRule, MemoryHost};

// ── CLI ─────────────────────────────────────────────────────────────

/// Auto-reason analysis worker — assigns reasons to machine timelines.
#[derive(Parser, Debug)]
#[command(name = "autoreason-worker", version, about)]
struct Cli {
    /// Number of analysis ticks to run before exiting.
    #[arg(long, env = "AUTOREASON_TICKS", default_value_t = 5)]
    ticks: u64,

    /// Number of demo machines to seed.
    #[arg(long, env = "AUTOREASON_DEMO_MACHINES", default_value_t = 2)]
    machines: u64,
}

/// Seed a demo timeline: an operation, a long idle stretch, then another
/// operation.
fn seed_machine(host: &MemoryHost, machine: MachineId) {
    let base = chrono::Utc::now() - chrono::Duration::hours(2);
    let min = |m: i64| base + chrono::Duration::minutes(m);

    host.seed_operation(
        machine,
        TimeRange::between(min(0), min(30)),
        OperationId(100),
    );
    host.seed_activity(machine, TimeRange::between(min(0), min(30)), true);
    host.seed_activity(machine, TimeRange::between(min(30), min(55)), false);
    host.seed_activity(machine, TimeRange::between(min(55), min(90)), true);
    host.seed_operation(
        machine,
        TimeRange::between(min(55), min(90)),
        OperationId(101),
    );
}

fn rules() -> Vec<Box<dyn AutoReasonRule>> {
    vec![
        Box::new(BetweenOperations::new(ReasonId(10), 90.0)),
        Box::new(LongIdle::new(
            ReasonId(20),
            80.0,
            chrono::Duration::minutes(15),
        )),
    ]
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    load_dotenv();
    let cli = Cli::parse();
    let config = EngineConfig::from_env();
    config.log_summary();

    let host = Arc::new(MemoryHost::new());
    let mut engine = AnalysisEngine::new(config.clone(), host.clone());

    for id in 1..=cli.machines as i64 {
        let machine = MachineId(id);
        seed_machine(&host, machine);
        engine.add_machine(machine, rules())?;
    }

    info!(ticks = cli.ticks, "worker starting");
    for tick in 0..cli.ticks {
        let summary = engine.run_tick(chrono::Utc::now())?;
        info!(
            tick,
            passes = summary.passes,
            committed = summary.committed,
            rolled_back = summary.rolled_back,
            "tick complete"
        );
        std::thread::sleep(config.tick());
    }

    let reasons = host.applied_reasons();
    info!(applied = reasons.len(), "worker finished");
    for applied in &reasons {
        info!(
            machine = %applied.machine,
            reason = %applied.reason,
            range = %applied.range,
            details = applied.details.as_deref().unwrap_or(""),
            "reason applied"
        );
    }
    Ok(())
}
