//! Scenario catalogue: canned designs plus the perturbation each one runs.

use archsim_core::model::ReplicationMode;
use archsim_core::problem::{self, Problem};
use archsim_core::{ArchitectureGraph, Component, ComponentKind};

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioId {
    /// SAN-001: Uncached database behind two app servers at full traffic
    Overload,

    /// SAN-002: Zero traffic with chaos configured
    Idle,

    /// SAN-003: Sole app server crashes and stays down until recovered
    Crash,

    /// SAN-004: Reference URL shortener validates and runs healthy
    Reference,

    /// SAN-005: Remediate an overloaded design with suggested fixes
    FixLoop,

    // ═══════════════════════════════════════════════════
    // CHAOS SCENARIOS - one perturbation at a time
    // ═══════════════════════════════════════════════════

    /// SAN-006: 3x demand for ten seconds
    TrafficSpike,

    /// SAN-007: Link to the database severed
    Partition,

    /// SAN-008: Cache hit rate collapses
    MissStorm,

    /// SAN-009: Database latency multiplied
    Slowdown,

    /// SAN-010: Seeded random chaos with crashes, replayed twice
    ChaosStorm,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        let mut all = Self::standard();
        all.extend(Self::chaos());
        all
    }

    /// Returns the baseline scenarios.
    pub fn standard() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Overload,
            ScenarioId::Idle,
            ScenarioId::Crash,
            ScenarioId::Reference,
            ScenarioId::FixLoop,
        ]
    }

    /// Returns the chaos scenarios only.
    pub fn chaos() -> Vec<ScenarioId> {
        vec![
            ScenarioId::TrafficSpike,
            ScenarioId::Partition,
            ScenarioId::MissStorm,
            ScenarioId::Slowdown,
            ScenarioId::ChaosStorm,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Overload => "overload",
            ScenarioId::Idle => "idle",
            ScenarioId::Crash => "crash",
            ScenarioId::Reference => "reference",
            ScenarioId::FixLoop => "fix_loop",
            ScenarioId::TrafficSpike => "traffic_spike",
            ScenarioId::Partition => "partition",
            ScenarioId::MissStorm => "miss_storm",
            ScenarioId::Slowdown => "slowdown",
            ScenarioId::ChaosStorm => "chaos_storm",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Overload => "App (2 x 500 rps) -> database at 10M DAU, expect database overload on tick 1",
            ScenarioId::Idle => "Same design at zero traffic under spike + slowdown, expect silence",
            ScenarioId::Crash => "Crash the only app server, outage must outlive every chaos window",
            ScenarioId::Reference => "LB + app + cache + replicated DB, expect a passing score and no critical failure",
            ScenarioId::FixLoop => "Apply suggested fixes until the overloaded design is healthy",
            ScenarioId::TrafficSpike => "3x demand for 10s, overload must appear and then clear",
            ScenarioId::Partition => "Partition app -> db for 15s, connection broken then healed",
            ScenarioId::MissStorm => "Cache hit rate drops by 0.6, database absorbs the misses",
            ScenarioId::Slowdown => "Database 5x slower, entry latency rises then recovers",
            ScenarioId::ChaosStorm => "Poisson chaos with crashes, two runs must match tick for tick",
        }
    }

    /// Returns true if this scenario injects chaos while running.
    pub fn is_chaos(&self) -> bool {
        matches!(
            self,
            ScenarioId::TrafficSpike
                | ScenarioId::Partition
                | ScenarioId::MissStorm
                | ScenarioId::Slowdown
                | ScenarioId::ChaosStorm
        )
    }

    /// The problem the scenario is judged against.
    pub fn problem(&self) -> Problem {
        problem::url_shortener()
    }

    /// The design the scenario starts from.
    pub fn graph(&self) -> ArchitectureGraph {
        match self {
            ScenarioId::Overload | ScenarioId::Idle | ScenarioId::FixLoop => two_tier(),
            ScenarioId::Crash => single_app(),
            _ => reference_design(),
        }
    }

    /// Traffic level the scenario runs at.
    pub fn traffic_level(&self) -> f64 {
        match self {
            ScenarioId::Idle => 0.0,
            ScenarioId::Crash => 0.2,
            ScenarioId::Overload | ScenarioId::Reference | ScenarioId::FixLoop => 1.0,
            _ => 0.5,
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "overload" | "san-001" => Ok(ScenarioId::Overload),
            "idle" | "san-002" => Ok(ScenarioId::Idle),
            "crash" | "san-003" => Ok(ScenarioId::Crash),
            "reference" | "san-004" => Ok(ScenarioId::Reference),
            "fix_loop" | "fixloop" | "san-005" => Ok(ScenarioId::FixLoop),
            "traffic_spike" | "trafficspike" | "san-006" => Ok(ScenarioId::TrafficSpike),
            "partition" | "san-007" => Ok(ScenarioId::Partition),
            "miss_storm" | "missstorm" | "san-008" => Ok(ScenarioId::MissStorm),
            "slowdown" | "san-009" => Ok(ScenarioId::Slowdown),
            "chaos_storm" | "chaosstorm" | "san-010" => Ok(ScenarioId::ChaosStorm),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

// =============================================================================
// DESIGNS
// =============================================================================

/// app (2 x 500 rps) -> database, no cache.
pub fn two_tier() -> ArchitectureGraph {
    ArchitectureGraph::new()
        .with_component(
            Component::new("app", ComponentKind::AppServer)
                .with_instances(2)
                .with_max_rps(500.0)
                .at(0.0, 0.0),
        )
        .with_component(Component::new("db", ComponentKind::Database).at(200.0, 0.0))
        .connect("app", "db")
}

/// Users -> one app server -> database.
pub fn single_app() -> ArchitectureGraph {
    ArchitectureGraph::new()
        .with_component(Component::new("users", ComponentKind::Client).at(-200.0, 0.0))
        .with_component(Component::new("app", ComponentKind::AppServer).at(0.0, 0.0))
        .with_component(Component::new("db", ComponentKind::Database).at(200.0, 0.0))
        .connect("users", "app")
        .connect("app", "db")
}

/// The canonical URL shortener: LB x2, app x4, cache x2, replicated DB.
pub fn reference_design() -> ArchitectureGraph {
    ArchitectureGraph::new()
        .with_component(
            Component::new("lb", ComponentKind::LoadBalancer)
                .with_instances(2)
                .at(0.0, 0.0),
        )
        .with_component(
            Component::new("app", ComponentKind::AppServer)
                .with_instances(4)
                .at(200.0, 0.0),
        )
        .with_component(
            Component::new("cache", ComponentKind::Cache)
                .with_instances(2)
                .at(400.0, -100.0),
        )
        .with_component(
            Component::new("db", ComponentKind::Database)
                .with_replication(2, ReplicationMode::LeaderFollower)
                .at(400.0, 100.0),
        )
        .connect("lb", "app")
        .connect("app", "cache")
        .connect("app", "db")
}

#[cfg(test)]
mod tests {
    use super::*;
    use archsim_core::validate;

    #[test]
    fn test_names_round_trip() {
        for id in ScenarioId::all() {
            assert_eq!(id.name().parse::<ScenarioId>(), Ok(id));
        }
        assert_eq!("SAN-003".parse::<ScenarioId>(), Ok(ScenarioId::Crash));
        assert!("split_brain".parse::<ScenarioId>().is_err());
    }

    #[test]
    fn test_groups_partition_catalogue() {
        let all = ScenarioId::all();
        assert_eq!(all.len(), 10);
        assert!(all.iter().filter(|s| s.is_chaos()).count() == ScenarioId::chaos().len());
    }

    #[test]
    fn test_reference_design_is_valid() {
        let result = validate(&reference_design(), &problem::url_shortener());
        assert!(result.is_valid);
        assert!(result.score >= 70);
    }
}
