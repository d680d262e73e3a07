//! SimWorld - the authoritative engine state owner.
//!
//! Every external command and query goes through here. The scheduler
//! wraps a world in a task; scenarios and tests drive one directly.

use archsim_core::{
    plan_fix, propagate, validation, ArchitectureGraph, ChaosEvent, ChaosId, ChaosInjector,
    ChaosKind, ChaosStatus, ChaosTarget, ComponentId, CoreError, DetectorPolicy, FailureDetector,
    FailureEvent, FixKind, FixPlan, GraphMutation, GraphOwner, MetricsSnapshot, MetricsStore,
    Problem, PropagationPolicy, TickInput, TickSummary, ValidationResult,
};
use archsim_core::metrics::DEFAULT_HISTORY_LEN;
use archsim_env::{Speed, TickCadence};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Configuration for a simulation run.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Wall-clock tick interval and speed multiplier
    pub cadence: TickCadence,

    /// Fraction of peak demand offered at start
    pub traffic_level: f64,

    /// Number of tick summaries kept
    pub history_len: usize,

    /// Stop the clock as soon as a critical failure appears
    pub halt_on_failure: bool,

    pub propagation: PropagationPolicy,

    pub detector: DetectorPolicy,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            cadence: TickCadence::default(),
            traffic_level: 1.0,
            history_len: DEFAULT_HISTORY_LEN,
            halt_on_failure: false,
            propagation: PropagationPolicy::default(),
            detector: DetectorPolicy::default(),
        }
    }
}

/// The SimWorld - graph, problem, chaos, metrics and failures together.
pub struct SimWorld {
    config: SimConfig,
    owner: GraphOwner,
    problem: Problem,
    chaos: ChaosInjector,
    metrics: MetricsStore,
    detector: FailureDetector,

    /// Simulated clock since the last reset
    time: Duration,

    /// Current tick count
    tick_count: u64,

    running: bool,
}

impl SimWorld {
    /// Creates a stopped world around `graph`.
    pub fn new(config: SimConfig, graph: ArchitectureGraph, problem: Problem) -> Result<Self, CoreError> {
        Self::with_owner(config, GraphOwner::new(graph), problem)
    }

    /// Creates a stopped world around an existing graph owner.
    ///
    /// The configured traffic level replaces the owner's.
    pub fn with_owner(config: SimConfig, mut owner: GraphOwner, problem: Problem) -> Result<Self, CoreError> {
        owner.set_traffic_level(config.traffic_level)?;
        Ok(Self {
            metrics: MetricsStore::new(config.history_len),
            detector: FailureDetector::new(config.detector.clone()),
            config,
            owner,
            problem,
            chaos: ChaosInjector::new(),
            time: Duration::ZERO,
            tick_count: 0,
            running: false,
        })
    }

    // =========================================================================
    // CLOCK
    // =========================================================================

    /// Runs one propagation step covering `sim_elapsed` of simulated time.
    ///
    /// Ticks regardless of the running flag; `advance` is the gated entry.
    pub fn tick(&mut self, sim_elapsed: Duration) -> Arc<MetricsSnapshot> {
        self.time += sim_elapsed;
        self.tick_count += 1;

        for event in self.chaos.expire(self.time) {
            info!("Chaos {} ({}) on {} ended", event.id, event.kind.tag().name(), event.target);
        }

        let snapshot = propagate(
            &TickInput {
                graph: self.owner.graph(),
                problem: &self.problem,
                traffic_level: self.owner.traffic_level(),
                chaos: &self.chaos,
                now: self.time,
                tick: self.tick_count,
            },
            &self.config.propagation,
        );
        let published = self.metrics.publish(snapshot);

        let diff = self
            .detector
            .evaluate(self.owner.graph(), &self.problem, &published);
        if !diff.raised.is_empty() || !diff.cleared.is_empty() {
            debug!(
                "Tick {}: {} failures raised, {} cleared",
                self.tick_count,
                diff.raised.len(),
                diff.cleared.len()
            );
        }

        if self.config.halt_on_failure && self.running && self.detector.is_failed() {
            warn!("Critical failure at tick {}, halting", self.tick_count);
            self.running = false;
        }

        published
    }

    /// Advances by one wall-clock interval, scaled by the speed.
    ///
    /// Returns `None` without touching any state when stopped or paused.
    pub fn advance(&mut self, wall_elapsed: Duration) -> Option<Arc<MetricsSnapshot>> {
        let speed = self.config.cadence.speed;
        if !self.running || speed.is_paused() {
            return None;
        }
        Some(self.tick(speed.scale(wall_elapsed)))
    }

    /// Starts the clock. An empty canvas has nothing to simulate.
    pub fn start(&mut self) -> Result<(), CoreError> {
        if self.owner.graph().is_empty() {
            return Err(CoreError::EmptyGraph);
        }
        if !self.running {
            info!("Simulation started at {:?} ({})", self.time, self.config.cadence.speed);
        }
        self.running = true;
        Ok(())
    }

    /// Freezes the clock, keeping the last snapshot and failures.
    pub fn stop(&mut self) {
        if self.running {
            info!("Simulation stopped at tick {}", self.tick_count);
        }
        self.running = false;
    }

    /// Stops and rewinds to time zero, dropping chaos, metrics and failures.
    ///
    /// The graph and traffic level are kept.
    pub fn reset(&mut self) {
        self.running = false;
        self.time = Duration::ZERO;
        self.tick_count = 0;
        self.chaos.clear();
        self.metrics.clear();
        self.detector.clear();
        info!("Simulation reset");
    }

    pub fn set_speed(&mut self, multiplier: f64) -> Result<(), CoreError> {
        self.config.cadence.speed = Speed::new(multiplier)?;
        Ok(())
    }

    pub fn set_traffic_level(&mut self, level: f64) -> Result<(), CoreError> {
        self.owner.set_traffic_level(level)?;
        Ok(())
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// Immutable view of the last tick.
    pub fn metrics_snapshot(&self) -> Arc<MetricsSnapshot> {
        self.metrics.snapshot()
    }

    pub fn history(&self) -> impl Iterator<Item = &TickSummary> {
        self.metrics.history()
    }

    /// Active failures, most severe first.
    pub fn failures(&self) -> Vec<FailureEvent> {
        self.detector.failures()
    }

    pub fn is_failed(&self) -> bool {
        self.detector.is_failed()
    }

    pub fn chaos_events(&self) -> Vec<ChaosStatus> {
        self.chaos.statuses(self.time)
    }

    /// Static score of the current graph against the problem.
    pub fn validate(&self) -> ValidationResult {
        validation::validate(self.owner.graph(), &self.problem)
    }

    pub fn graph(&self) -> &ArchitectureGraph {
        self.owner.graph()
    }

    pub fn owner(&self) -> &GraphOwner {
        &self.owner
    }

    pub fn problem(&self) -> &Problem {
        &self.problem
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn speed(&self) -> Speed {
        self.config.cadence.speed
    }

    pub fn traffic_level(&self) -> f64 {
        self.owner.traffic_level()
    }

    /// Simulated time since the last reset.
    pub fn time(&self) -> Duration {
        self.time
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    // =========================================================================
    // COMMANDS
    // =========================================================================

    /// Injects chaos starting now. Targets must exist in the graph.
    pub fn add_chaos_event(
        &mut self,
        kind: ChaosKind,
        target: ChaosTarget,
        duration: Option<Duration>,
    ) -> Result<ChaosId, CoreError> {
        match &target {
            ChaosTarget::Component(id) if !self.owner.graph().contains(id) => {
                return Err(CoreError::UnknownComponent(id.clone()));
            }
            ChaosTarget::Connection(id) if self.owner.graph().connection(id).is_none() => {
                return Err(CoreError::UnknownConnection(id.clone()));
            }
            _ => {}
        }
        let id = self.chaos.add(kind, target.clone(), duration, self.time)?;
        info!("Chaos {} ({}) injected on {} at {:?}", id, kind.tag().name(), target, self.time);
        Ok(id)
    }

    /// Ends a chaos event early.
    pub fn cancel_chaos_event(&mut self, id: ChaosId) -> Option<ChaosEvent> {
        self.chaos.remove(id)
    }

    /// Clears a crash on `component`; the outage clears on the next tick.
    pub fn recover(&mut self, component: &ComponentId) -> Result<usize, CoreError> {
        if !self.owner.graph().contains(component) {
            return Err(CoreError::UnknownComponent(component.clone()));
        }
        let removed = self.chaos.recover(component);
        self.detector.confirm_fix(component);
        if removed > 0 {
            info!("Recovered {} ({} crash events removed)", component, removed);
        }
        Ok(removed)
    }

    /// Plans and applies a remedial action.
    ///
    /// A rejected plan or mutation leaves the world unchanged.
    pub fn apply_fix(&mut self, kind: FixKind, component: &ComponentId) -> Result<(), CoreError> {
        let plan = plan_fix(kind, component, self.owner.graph(), &self.detector)?;
        match plan {
            FixPlan::Mutate(mutation) => {
                let label = mutation.label();
                let revision = self.owner.apply(mutation)?;
                info!("Fix {} on {}: {} (revision {})", kind, component, label, revision);
            }
            FixPlan::Recover(id) => {
                self.chaos.recover(&id);
                info!("Fix {} on {}", kind, component);
            }
        }
        self.detector.confirm_fix(component);
        Ok(())
    }

    /// Applies a canvas edit; the next tick sees the new graph.
    pub fn mutate(&mut self, mutation: GraphMutation) -> Result<u64, CoreError> {
        let label = mutation.label();
        let revision = self.owner.apply(mutation)?;
        debug!("Graph revision {}: {}", revision, label);
        Ok(revision)
    }

    /// Swaps the whole canvas, e.g. after loading a saved design.
    pub fn load_graph(&mut self, graph: ArchitectureGraph) -> u64 {
        self.owner.replace_graph(graph)
    }
}

impl std::fmt::Debug for SimWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimWorld")
            .field("problem", &self.problem.id)
            .field("time", &self.time)
            .field("tick_count", &self.tick_count)
            .field("running", &self.running)
            .field("components", &self.owner.graph().component_count())
            .field("chaos", &self.chaos.len())
            .field("failures", &self.detector.len())
            .finish()
    }
}
