//! The per-machine analysis engine loop.
//!
//! Each tick runs every configured rule once per monitored machine, with
//! bounded parallelism across machines. One rule instance processes one
//! machine's timeline; commits are serialized through the per-pass
//! transaction. Transient failures are logged and retried next tick; fatal
//! errors abort the engine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use autoreason_core::{EngineConfig, Liveness, LivenessRelay, MachineId, TimePoint};
use rayon::prelude::*;
use tracing::{info, warn};

use crate::driver::{PassOutcome, RuleDriver};
use crate::error::EngineError;
use crate::host::Host;
use crate::rule::AutoReasonRule;

/// All rule drivers for one monitored machine.
struct MachineAnalysis {
    machine: MachineId,
    drivers: Vec<RuleDriver>,
}

/// Aggregated result of one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub passes: usize,
    pub initialized: usize,
    pub committed: usize,
    pub no_action: usize,
    pub rolled_back: usize,
    pub cancelled: usize,
}

impl TickSummary {
    fn record(&mut self, outcome: &PassOutcome) {
        self.passes += 1;
        match outcome {
            PassOutcome::Initialized => self.initialized += 1,
            PassOutcome::Committed { .. } => self.committed += 1,
            PassOutcome::NoAction => self.no_action += 1,
            PassOutcome::RolledBack { .. } => self.rolled_back += 1,
            PassOutcome::Cancelled => self.cancelled += 1,
        }
    }

    fn merge(&mut self, other: TickSummary) {
        self.passes += other.passes;
        self.initialized += other.initialized;
        self.committed += other.committed;
        self.no_action += other.no_action;
        self.rolled_back += other.rolled_back;
        self.cancelled += other.cancelled;
    }
}

/// Drives every (machine, rule) pair on a fixed tick cadence.
pub struct AnalysisEngine {
    config: EngineConfig,
    host: Arc<dyn Host>,
    machines: Vec<MachineAnalysis>,
    relay: Arc<LivenessRelay>,
    shutdown: Arc<AtomicBool>,
}

impl AnalysisEngine {
    pub fn new(config: EngineConfig, host: Arc<dyn Host>) -> Self {
        Self {
            config,
            host,
            machines: Vec::new(),
            relay: Arc::new(LivenessRelay::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Register a machine with its rules. Returns `false` when the machine
    /// is excluded by the configured filter. Rule initialization failures
    /// are fatal.
    pub fn add_machine(
        &mut self,
        machine: MachineId,
        rules: Vec<Box<dyn AutoReasonRule>>,
    ) -> Result<bool, EngineError> {
        if !self.config.accepts_machine(machine) {
            info!(%machine, "machine excluded by filter");
            return Ok(false);
        }
        let mut drivers = Vec::with_capacity(rules.len());
        for rule in rules {
            let mut driver = RuleDriver::new(rule, machine, &self.config, self.relay.handle());
            driver.initialize(self.host.as_ref())?;
            drivers.push(driver);
        }
        info!(%machine, rules = drivers.len(), "machine registered");
        self.machines.push(MachineAnalysis { machine, drivers });
        Ok(true)
    }

    pub fn machine_count(&self) -> usize {
        self.machines.len()
    }

    /// The relay the watchdog registers its per-pass monitors on.
    pub fn relay(&self) -> Arc<LivenessRelay> {
        Arc::clone(&self.relay)
    }

    /// Flag observed between slice iterations; setting it unwinds running
    /// passes and stops [`run`](AnalysisEngine::run).
    pub fn shutdown_signal(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Run every rule once per machine, machines in parallel. Only fatal
    /// errors propagate; transient pass failures land in the summary.
    pub fn run_tick(&mut self, now: TimePoint) -> Result<TickSummary, EngineError> {
        let host = Arc::clone(&self.host);
        let shutdown = Arc::clone(&self.shutdown);

        let results: Vec<Result<TickSummary, EngineError>> = self
            .machines
            .par_iter_mut()
            .map(|analysis| {
                let mut summary = TickSummary::default();
                for driver in &mut analysis.drivers {
                    if shutdown.load(Ordering::Relaxed) {
                        break;
                    }
                    let outcome = driver.run_pass(host.as_ref(), now, shutdown.as_ref())?;
                    if let PassOutcome::RolledBack { error } = &outcome {
                        warn!(
                            machine = %analysis.machine,
                            rule = driver.rule_name(),
                            error = %error,
                            "pass rolled back"
                        );
                    }
                    summary.record(&outcome);
                }
                Ok(summary)
            })
            .collect();

        let mut total = TickSummary::default();
        for result in results {
            total.merge(result?);
        }
        Ok(total)
    }

    /// Tick until shutdown is signalled, sleeping the remainder of each
    /// tick period.
    pub fn run(&mut self) -> Result<(), EngineError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.max_machine_workers)
            .build()
            .map_err(|e| EngineError::Config(format!("worker pool: {}", e)))?;

        info!(
            machines = self.machines.len(),
            workers = self.config.max_machine_workers,
            "analysis engine starting"
        );

        while !self.shutdown.load(Ordering::Relaxed) {
            let started = Instant::now();
            self.relay.set_active();

            let summary = pool.install(|| self.run_tick(chrono::Utc::now()))?;
            if summary.rolled_back > 0 {
                warn!(?summary, "tick finished with rolled back passes");
            } else {
                tracing::debug!(?summary, "tick finished");
            }

            let elapsed = started.elapsed();
            if let Some(remaining) = self.config.tick().checked_sub(elapsed) {
                std::thread::sleep(remaining);
            }
        }

        info!("analysis engine stopped");
        Ok(())
    }
}
