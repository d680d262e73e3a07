//! Design Validator - static scoring of a graph against a problem
//! ===============================================================
//!
//! Independent of any simulated traffic: the same (graph, problem) pair
//! always yields the same result.
//!
//! Weighted checks:
//! - **Components**: every required kind present (database family members
//!   stand in for each other)
//! - **Connections**: every required kind → kind link present
//! - **Capacity**: compute and data tiers against peak demand
//! - **Cost**: monthly cost against budget. The penalty is capped at half
//!   of what one required kind earns, so completing a design never lowers
//!   its score
//! - **Redundancy**: copies per required kind against the availability target
//!
//! Advisory checks (issues only): quorum overlap, region coverage, slowest
//! path latency, dangling connections.
//!
//! Usage:
//! ```ignore
//! use archsim_core::{validate, problem};
//!
//! let result = validate(&graph, &problem::url_shortener());
//! if !result.is_valid {
//!     result.print();
//! }
//! ```

use crate::model::{ArchitectureGraph, ComponentId, ComponentKind};
use crate::problem::{Difficulty, Problem};
use crate::propagation::topological_order;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// RESULT TYPES
// =============================================================================

/// Severity tier of a structural issue. Declared most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Critical,
    Warning,
    Info,
}

impl std::fmt::Display for IssueSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            IssueSeverity::Critical => "critical",
            IssueSeverity::Warning => "warning",
            IssueSeverity::Info => "info",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: IssueSeverity,
    pub title: String,
    pub description: String,
}

impl ValidationIssue {
    fn new(severity: IssueSeverity, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            severity,
            title: title.into(),
            description: description.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckName {
    Components,
    Connections,
    Capacity,
    Cost,
    Redundancy,
}

/// One weighted check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: CheckName,
    pub weight: f64,
    /// In [0, 1]
    pub pass_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    /// 0..=100
    pub score: u8,
    pub checks: Vec<CheckResult>,
    /// Most severe first
    pub issues: Vec<ValidationIssue>,
    pub monthly_cost: f64,
}

impl ValidationResult {
    pub fn has_critical(&self) -> bool {
        self.issues.iter().any(|i| i.severity == IssueSeverity::Critical)
    }

    pub fn check(&self, name: CheckName) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.name == name)
    }

    /// Print formatted result to console
    pub fn print(&self) {
        let verdict = if self.is_valid { "PASS" } else { "FAIL" };
        println!();
        println!("╔══════════════════════════════════════════════════════════════╗");
        println!("║               DESIGN VALIDATION                              ║");
        println!("╠══════════════════════════════════════════════════════════════╣");
        println!("║ Score:                 {:>10}                            ║", self.score);
        println!("║ Verdict:               {:>10}                            ║", verdict);
        println!("║ Monthly Cost:          {:>10.2} $                          ║", self.monthly_cost);
        println!("╠══════════════════════════════════════════════════════════════╣");
        for check in &self.checks {
            println!(
                "║ {:<22} {:>9.1}%  (weight {:.2})                ║",
                format!("{:?}", check.name),
                check.pass_rate * 100.0,
                check.weight
            );
        }
        println!("╚══════════════════════════════════════════════════════════════╝");

        if !self.issues.is_empty() {
            println!();
            println!("Issues:");
            println!("─────────────────────────────────────────────────────────");
            for issue in &self.issues {
                println!("  [{:<8}] {}: {}", issue.severity, issue.title, issue.description);
            }
        }
    }
}

// =============================================================================
// POLICY
// =============================================================================

/// Relative weight of each check. Should sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CheckWeights {
    pub components: f64,
    pub connections: f64,
    pub capacity: f64,
    pub cost: f64,
    pub redundancy: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorPolicy {
    /// Minimum score for a valid design
    pub pass_threshold: u8,
    pub easy: CheckWeights,
    pub medium: CheckWeights,
    pub hard: CheckWeights,
}

impl Default for ValidatorPolicy {
    fn default() -> Self {
        Self {
            pass_threshold: 70,
            easy: CheckWeights {
                components: 0.40,
                connections: 0.20,
                capacity: 0.15,
                cost: 0.10,
                redundancy: 0.15,
            },
            medium: CheckWeights {
                components: 0.35,
                connections: 0.20,
                capacity: 0.20,
                cost: 0.10,
                redundancy: 0.15,
            },
            hard: CheckWeights {
                components: 0.30,
                connections: 0.20,
                capacity: 0.20,
                cost: 0.10,
                redundancy: 0.20,
            },
        }
    }
}

impl ValidatorPolicy {
    pub fn weights(&self, difficulty: Difficulty) -> CheckWeights {
        match difficulty {
            Difficulty::Easy => self.easy,
            Difficulty::Medium => self.medium,
            Difficulty::Hard => self.hard,
        }
    }
}

/// Copies of each required kind the availability target calls for.
pub fn required_redundancy(availability: f64) -> u32 {
    if availability >= 0.9999 {
        3
    } else if availability >= 0.999 {
        2
    } else {
        1
    }
}

// =============================================================================
// VALIDATION
// =============================================================================

/// Scores `graph` against `problem` with the default policy.
pub fn validate(graph: &ArchitectureGraph, problem: &Problem) -> ValidationResult {
    validate_with(graph, problem, &ValidatorPolicy::default())
}

pub fn validate_with(
    graph: &ArchitectureGraph,
    problem: &Problem,
    policy: &ValidatorPolicy,
) -> ValidationResult {
    let mut issues = Vec::new();
    let weights = policy.weights(problem.difficulty);
    let required = problem.required_kinds();

    if graph.is_empty() {
        issues.push(ValidationIssue::new(
            IssueSeverity::Critical,
            "Empty design",
            "Add components to the canvas before validating",
        ));
    }

    let monthly_cost: f64 = graph.components().map(|c| c.monthly_cost()).sum();
    let checks = vec![
        CheckResult {
            name: CheckName::Components,
            weight: weights.components,
            pass_rate: check_components(graph, &required, &mut issues),
        },
        CheckResult {
            name: CheckName::Connections,
            weight: weights.connections,
            pass_rate: check_connections(graph, problem, &mut issues),
        },
        CheckResult {
            name: CheckName::Capacity,
            weight: weights.capacity,
            pass_rate: check_capacity(graph, problem, &required, &mut issues),
        },
        CheckResult {
            name: CheckName::Cost,
            weight: weights.cost,
            pass_rate: check_cost(monthly_cost, problem, cost_floor(&weights, required.len()), &mut issues),
        },
        CheckResult {
            name: CheckName::Redundancy,
            weight: weights.redundancy,
            pass_rate: check_redundancy(graph, problem, &required, &mut issues),
        },
    ];

    check_quorums(graph, &mut issues);
    check_regions(graph, problem, &mut issues);
    check_latency(graph, problem, &mut issues);
    check_dangling(graph, &mut issues);

    let weighted: f64 = checks.iter().map(|c| c.weight * c.pass_rate).sum();
    let score = (100.0 * weighted).round().clamp(0.0, 100.0) as u8;

    // Stable: keeps discovery order within a tier
    issues.sort_by_key(|i| i.severity);
    let has_critical = issues.iter().any(|i| i.severity == IssueSeverity::Critical);

    ValidationResult {
        is_valid: score >= policy.pass_threshold && !has_critical,
        score,
        checks,
        issues,
        monthly_cost,
    }
}

fn present(graph: &ArchitectureGraph, required: ComponentKind) -> Vec<ComponentKind> {
    graph
        .components()
        .map(|c| c.kind)
        .filter(|k| k.satisfies(required))
        .collect()
}

fn check_components(
    graph: &ArchitectureGraph,
    required: &[ComponentKind],
    issues: &mut Vec<ValidationIssue>,
) -> f64 {
    if required.is_empty() {
        return 1.0;
    }
    let mut satisfied = 0usize;
    for kind in required {
        let kinds = present(graph, *kind);
        if kinds.contains(kind) {
            satisfied += 1;
        } else if let Some(substitute) = kinds.first() {
            satisfied += 1;
            issues.push(ValidationIssue::new(
                IssueSeverity::Info,
                format!("{} used as {}", substitute, kind),
                format!("A {} fills the {} role; make sure its data model fits", substitute, kind),
            ));
        } else {
            issues.push(ValidationIssue::new(
                IssueSeverity::Critical,
                format!("Missing {}", kind),
                format!("The design needs at least one {}", kind),
            ));
        }
    }
    satisfied as f64 / required.len() as f64
}

/// Kinds a required link may pass through without breaking it.
fn is_transparent(kind: ComponentKind) -> bool {
    matches!(kind, ComponentKind::Cache | ComponentKind::LoadBalancer)
}

fn has_link(graph: &ArchitectureGraph, from: ComponentKind, to: ComponentKind) -> bool {
    let kind_of = |id: &ComponentId| graph.component(id).map(|c| c.kind);
    graph
        .connections()
        .filter(|c| !graph.is_dangling(c))
        .filter(|c| kind_of(&c.source).map_or(false, |k| k.satisfies(from)))
        .any(|c| match kind_of(&c.target) {
            Some(k) if k.satisfies(to) => true,
            Some(k) if is_transparent(k) => graph
                .outgoing(&c.target)
                .any(|next| kind_of(&next.target).map_or(false, |k| k.satisfies(to))),
            _ => false,
        })
}

fn check_connections(
    graph: &ArchitectureGraph,
    problem: &Problem,
    issues: &mut Vec<ValidationIssue>,
) -> f64 {
    let hints = &problem.optimal_connections;
    if hints.is_empty() {
        return 1.0;
    }
    let mut satisfied = 0usize;
    for hint in hints {
        if has_link(graph, hint.from, hint.to) {
            satisfied += 1;
        } else {
            issues.push(ValidationIssue::new(
                IssueSeverity::Warning,
                format!("No {} → {} connection", hint.from, hint.to),
                format!("Traffic is expected to flow from a {} to a {}", hint.from, hint.to),
            ));
        }
    }
    satisfied as f64 / hints.len() as f64
}

fn check_capacity(
    graph: &ArchitectureGraph,
    problem: &Problem,
    required: &[ComponentKind],
    issues: &mut Vec<ValidationIssue>,
) -> f64 {
    let demand = problem.peak_rps();
    if demand <= 0.0 {
        return 1.0;
    }

    let mut tiers = Vec::new();

    if required.iter().any(|k| k.is_compute()) {
        let capacity: f64 = graph
            .components()
            .filter(|c| c.kind.is_compute())
            .map(|c| c.total_capacity_rps())
            .sum();
        tiers.push(("Compute", capacity, demand));
    }

    if required.iter().any(|k| k.is_database()) {
        let best_hit = graph
            .components_of_kind(ComponentKind::Cache)
            .filter_map(|c| c.cache_hit_rate())
            .fold(0.0, f64::max);
        let reads = problem.read_fraction();
        let data_demand = demand * ((1.0 - reads) + reads * (1.0 - best_hit));
        let capacity: f64 = graph
            .components()
            .filter(|c| c.kind.is_database())
            .map(|c| c.total_capacity_rps())
            .sum();
        tiers.push(("Data", capacity, data_demand));
    }

    if tiers.is_empty() {
        return 1.0;
    }

    let mut total = 0.0;
    for (tier, capacity, needed) in &tiers {
        let rate = if *needed <= 0.0 {
            1.0
        } else {
            (capacity / needed).min(1.0)
        };
        if rate < 1.0 {
            issues.push(ValidationIssue::new(
                IssueSeverity::Warning,
                format!("{} tier under capacity", tier),
                format!("{:.0} rps available for {:.0} rps at peak", capacity, needed),
            ));
        }
        total += rate;
    }
    total / tiers.len() as f64
}

/// Lowest cost pass rate: the weighted penalty stays below half the
/// component-check credit of one required kind.
fn cost_floor(weights: &CheckWeights, required_kinds: usize) -> f64 {
    if weights.cost <= 0.0 {
        return 0.0;
    }
    let per_kind = weights.components / required_kinds.max(1) as f64;
    (1.0 - 0.5 * per_kind / weights.cost).clamp(0.0, 1.0)
}

fn check_cost(
    monthly_cost: f64,
    problem: &Problem,
    floor: f64,
    issues: &mut Vec<ValidationIssue>,
) -> f64 {
    let budget = problem.constraints.monthly_budget;
    if monthly_cost <= budget {
        return 1.0;
    }
    let severity = if monthly_cost > 2.0 * budget {
        IssueSeverity::Critical
    } else {
        IssueSeverity::Warning
    };
    issues.push(ValidationIssue::new(
        severity,
        "Over budget",
        format!("${:.2}/month against a ${:.2} budget", monthly_cost, budget),
    ));
    let rate = if budget > 0.0 {
        (budget / monthly_cost).clamp(0.0, 1.0)
    } else {
        0.0
    };
    rate.max(floor)
}

fn check_redundancy(
    graph: &ArchitectureGraph,
    problem: &Problem,
    required: &[ComponentKind],
    issues: &mut Vec<ValidationIssue>,
) -> f64 {
    if required.is_empty() {
        return 1.0;
    }
    let needed = required_redundancy(problem.constraints.availability);

    let mut total = 0.0;
    for kind in required {
        let matching: Vec<_> = graph.components().filter(|c| c.kind.satisfies(*kind)).collect();
        if matching.is_empty() {
            // Reported by the component check
            continue;
        }
        let copies: u32 = if matching.iter().any(|c| c.kind.is_managed()) {
            needed
        } else {
            matching.iter().map(|c| c.redundancy()).sum()
        };
        let rate = (copies as f64 / needed as f64).min(1.0);
        if rate < 1.0 {
            issues.push(ValidationIssue::new(
                IssueSeverity::Warning,
                format!("{} lacks redundancy", kind),
                format!(
                    "{} cop{} for a {:.2}% availability target that needs {}",
                    copies,
                    if copies == 1 { "y" } else { "ies" },
                    problem.constraints.availability * 100.0,
                    needed
                ),
            ));
        }
        total += rate;
    }
    total / required.len() as f64
}

fn check_quorums(graph: &ArchitectureGraph, issues: &mut Vec<ValidationIssue>) {
    for component in graph.components() {
        let (Some(quorum), replication) = (component.reliability.quorum, &component.reliability.replication)
        else {
            continue;
        };
        let n = if replication.enabled { replication.factor } else { 1 };
        if quorum.read > n || quorum.write > n {
            issues.push(ValidationIssue::new(
                IssueSeverity::Warning,
                format!("Unreachable quorum on {}", component.id),
                format!("R={} W={} with only {} replicas", quorum.read, quorum.write, n),
            ));
        } else if quorum.read + quorum.write <= n {
            issues.push(ValidationIssue::new(
                IssueSeverity::Warning,
                format!("Stale reads possible on {}", component.id),
                format!("R + W = {} does not exceed N = {}", quorum.read + quorum.write, n),
            ));
        }
    }
}

fn check_regions(graph: &ArchitectureGraph, problem: &Problem, issues: &mut Vec<ValidationIssue>) {
    let wanted = &problem.constraints.regions;
    if wanted.len() < 2 {
        return;
    }
    let covered: BTreeSet<&String> = graph
        .components()
        .flat_map(|c| c.reliability.regions.iter())
        .collect();
    for region in wanted {
        if !covered.contains(region) {
            issues.push(ValidationIssue::new(
                IssueSeverity::Warning,
                format!("No presence in {}", region),
                "Users in this region are served from far away",
            ));
        }
    }
}

/// Sum of latency floors and hop latencies along the slowest path from an
/// entry point, with no load.
pub fn slowest_path_ms(graph: &ArchitectureGraph) -> f64 {
    let order = topological_order(graph);
    let position: BTreeMap<&ComponentId, usize> =
        order.iter().enumerate().map(|(i, id)| (id, i)).collect();

    let mut best: BTreeMap<&ComponentId, f64> = BTreeMap::new();
    for (i, id) in order.iter().enumerate().rev() {
        let Some(component) = graph.component(id) else {
            continue;
        };
        let downstream = graph
            .outgoing(id)
            .filter(|c| position.get(&c.target).map_or(false, |p| *p > i))
            .map(|c| c.protocol.hop_latency_ms() + best.get(&c.target).copied().unwrap_or(0.0))
            .fold(0.0, f64::max);
        best.insert(id, component.kind.defaults().base_latency_ms + downstream);
    }

    graph
        .entry_points()
        .iter()
        .filter_map(|id| best.get(id).copied())
        .fold(0.0, f64::max)
}

fn check_latency(graph: &ArchitectureGraph, problem: &Problem, issues: &mut Vec<ValidationIssue>) {
    let p50 = problem.constraints.p50_latency_ms;
    let estimate = slowest_path_ms(graph);
    if p50 > 0.0 && estimate > p50 {
        issues.push(ValidationIssue::new(
            IssueSeverity::Warning,
            "Slow request path",
            format!("Slowest path takes {:.1} ms unloaded, above the {:.0} ms p50 target", estimate, p50),
        ));
    }
}

fn check_dangling(graph: &ArchitectureGraph, issues: &mut Vec<ValidationIssue>) {
    for conn in graph.connections().filter(|c| graph.is_dangling(c)) {
        issues.push(ValidationIssue::new(
            IssueSeverity::Warning,
            format!("Dangling connection {}", conn.id),
            format!("{} → {} references a missing component", conn.source, conn.target),
        ));
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Component, ReplicationMode};
    use crate::problem::url_shortener;

    /// LB x2 → app x4 → (cache x2, db with 2 replicas)
    fn reference_design() -> ArchitectureGraph {
        ArchitectureGraph::new()
            .with_component(Component::new("lb", ComponentKind::LoadBalancer).with_instances(2))
            .with_component(Component::new("app", ComponentKind::AppServer).with_instances(4))
            .with_component(Component::new("cache", ComponentKind::Cache).with_instances(2))
            .with_component(
                Component::new("db", ComponentKind::Database)
                    .with_replication(2, ReplicationMode::LeaderFollower),
            )
            .connect("lb", "app")
            .connect("app", "cache")
            .connect("app", "db")
    }

    #[test]
    fn test_reference_design_passes() {
        let result = validate(&reference_design(), &url_shortener());

        assert!(result.is_valid, "{:?}", result.issues);
        assert!(result.score >= 70);
        assert!(!result.has_critical());
        assert_eq!(result.check(CheckName::Components).unwrap().pass_rate, 1.0);
        assert_eq!(result.check(CheckName::Connections).unwrap().pass_rate, 1.0);
    }

    #[test]
    fn test_idempotent() {
        let graph = reference_design();
        let problem = url_shortener();
        assert_eq!(validate(&graph, &problem), validate(&graph, &problem));
    }

    #[test]
    fn test_missing_component_is_critical() {
        let mut graph = reference_design();
        graph.remove_component(&ComponentId::new("cache")).unwrap();
        let result = validate(&graph, &url_shortener());

        assert!(!result.is_valid);
        assert_eq!(result.issues[0].severity, IssueSeverity::Critical);
        assert_eq!(result.issues[0].title, "Missing cache");
    }

    #[test]
    fn test_adding_required_component_never_lowers_score() {
        let full = reference_design();
        let mut partial = full.clone();
        partial.remove_component(&ComponentId::new("cache")).unwrap();

        let problem = url_shortener();
        assert!(validate(&full, &problem).score >= validate(&partial, &problem).score);
    }

    #[test]
    fn test_expensive_missing_kind_still_raises_hard_score() {
        use crate::problem::video_streaming;

        let problem = video_streaming();
        let mut graph = ArchitectureGraph::new();
        for kind in problem.required_kinds() {
            if kind != ComponentKind::Worker {
                graph = graph.with_component(Component::new(kind.to_string().as_str(), kind).with_instances(3));
            }
        }
        let before = validate(&graph, &problem);

        let graph = graph.with_component(
            Component::new("worker", ComponentKind::Worker)
                .with_instances(3)
                .with_cost_per_hour(200.0),
        );
        let after = validate(&graph, &problem);

        assert!(after.monthly_cost > 2.0 * problem.constraints.monthly_budget);
        assert!(after.has_critical());
        assert!(
            after.score >= before.score,
            "{} -> {}",
            before.score,
            after.score
        );
    }

    #[test]
    fn test_document_store_stands_in_for_database() {
        let graph = reference_design()
            .with_component(
                Component::new("db", ComponentKind::DocumentStore)
                    .with_replication(2, ReplicationMode::LeaderFollower),
            );
        let result = validate(&graph, &url_shortener());

        assert_eq!(result.check(CheckName::Components).unwrap().pass_rate, 1.0);
        assert!(result.issues.iter().any(|i| i.severity == IssueSeverity::Info));
    }

    #[test]
    fn test_cost_over_double_budget_is_critical() {
        let graph = reference_design().with_component(
            Component::new("app", ComponentKind::AppServer)
                .with_instances(4)
                .with_cost_per_hour(10.0),
        );
        let result = validate(&graph, &url_shortener());

        assert!(result.monthly_cost > 10_000.0);
        assert!(result.check(CheckName::Cost).unwrap().pass_rate < 1.0);
        assert!(result.has_critical());
        assert!(!result.is_valid);
    }

    #[test]
    fn test_read_through_cache_keeps_link() {
        // app → cache → db still counts as app → db
        let graph = ArchitectureGraph::new()
            .with_component(Component::new("app", ComponentKind::AppServer))
            .with_component(Component::new("cache", ComponentKind::Cache))
            .with_component(Component::new("db", ComponentKind::Database))
            .connect("app", "cache")
            .connect("cache", "db");
        assert!(has_link(&graph, ComponentKind::AppServer, ComponentKind::Database));
    }

    #[test]
    fn test_weak_quorum_flagged() {
        let graph = reference_design().with_component(
            Component::new("db", ComponentKind::Database)
                .with_replication(3, ReplicationMode::Leaderless)
                .with_quorum(1, 1),
        );
        let result = validate(&graph, &url_shortener());
        assert!(result.issues.iter().any(|i| i.title.starts_with("Stale reads")));
    }

    #[test]
    fn test_redundancy_targets() {
        assert_eq!(required_redundancy(0.99), 1);
        assert_eq!(required_redundancy(0.999), 2);
        assert_eq!(required_redundancy(0.99999), 3);
    }

    #[test]
    fn test_empty_graph_is_invalid() {
        let result = validate(&ArchitectureGraph::new(), &url_shortener());
        assert!(!result.is_valid);
        assert!(result.has_critical());
    }

    #[test]
    fn test_slowest_path() {
        // lb 1 + hop 1 + app 20 + hop 1 + db 10
        assert_eq!(slowest_path_ms(&reference_design()), 33.0);
    }
}
