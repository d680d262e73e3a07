//! Failure Detector - runtime conditions evaluated against each snapshot.
//!
//! Each (subject, kind) pair is a tiny state machine:
//!
//! ```text
//! absent ──raise──▶ active ──condition gone──▶ absent
//!
//! outage: absent ──▶ active ──next tick──▶ awaiting fix ──confirm + gone──▶ absent
//! ```
//!
//! The detector never panics on a malformed graph: dangling connections are
//! reported once as a low-severity issue and otherwise ignored.

use crate::fix::FixKind;
use crate::metrics::MetricsSnapshot;
use crate::model::{ArchitectureGraph, ComponentId, ConnectionId};
use crate::problem::Problem;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Utilization above 1
    Overload,
    /// Entry-point latency above the p95 target
    SlaBreach,
    HighErrorRate,
    /// Single copy carrying a large share of the traffic
    MissingRedundancy,
    /// Broken or dangling connection, or an isolated component
    Disconnected,
    /// Component down while traffic is addressed to it
    ChaosOutage,
}

impl FailureKind {
    pub fn name(&self) -> &'static str {
        match self {
            FailureKind::Overload => "overload",
            FailureKind::SlaBreach => "sla_breach",
            FailureKind::HighErrorRate => "high_error_rate",
            FailureKind::MissingRedundancy => "missing_redundancy",
            FailureKind::Disconnected => "disconnected",
            FailureKind::ChaosOutage => "chaos_outage",
        }
    }

    /// Persistent failures stay until a fix is confirmed.
    pub fn is_persistent(&self) -> bool {
        matches!(self, FailureKind::ChaosOutage)
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// `<subject>:<kind>`, stable across ticks so conditions de-duplicate.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FailureId(pub String);

impl FailureId {
    pub fn new(subject: &str, kind: FailureKind) -> Self {
        Self(format!("{}:{}", subject, kind.name()))
    }
}

impl std::fmt::Display for FailureId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureState {
    Active,
    /// Persistent failure waiting for an explicit fix
    AwaitingFix,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureEvent {
    pub id: FailureId,
    pub kind: FailureKind,
    /// In [0, 1]
    pub severity: f64,
    pub state: FailureState,
    pub message: String,
    pub recommendation: String,
    pub suggested_fix: Option<FixKind>,
    pub component: Option<ComponentId>,
    pub connection: Option<ConnectionId>,
    /// Simulated time the condition was first seen
    pub first_seen: Duration,
}

/// Thresholds for the runtime checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorPolicy {
    /// `is_failed` is true once any failure reaches this severity
    pub critical_severity: f64,
    pub error_rate_threshold: f64,
    /// Share of total demand above which a single instance is a liability
    pub redundancy_load_share: f64,
}

impl Default for DetectorPolicy {
    fn default() -> Self {
        Self {
            critical_severity: 0.8,
            error_rate_threshold: 0.05,
            redundancy_load_share: 0.3,
        }
    }
}

/// What changed in one evaluation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FailureDiff {
    pub raised: Vec<FailureId>,
    pub cleared: Vec<FailureId>,
}

/// A condition found in the current snapshot.
struct Condition {
    kind: FailureKind,
    subject: String,
    severity: f64,
    message: String,
    recommendation: String,
    suggested_fix: Option<FixKind>,
    component: Option<ComponentId>,
    connection: Option<ConnectionId>,
}

impl Condition {
    fn on_component(id: &ComponentId, kind: FailureKind, severity: f64) -> Self {
        Self {
            kind,
            subject: id.to_string(),
            severity: severity.clamp(0.0, 1.0),
            message: String::new(),
            recommendation: String::new(),
            suggested_fix: None,
            component: Some(id.clone()),
            connection: None,
        }
    }

    fn on_connection(
        id: &ConnectionId,
        owner: Option<ComponentId>,
        kind: FailureKind,
        severity: f64,
    ) -> Self {
        Self {
            kind,
            subject: id.to_string(),
            severity: severity.clamp(0.0, 1.0),
            message: String::new(),
            recommendation: String::new(),
            suggested_fix: None,
            component: owner,
            connection: Some(id.clone()),
        }
    }

    fn text(mut self, message: String, recommendation: &str) -> Self {
        self.message = message;
        self.recommendation = recommendation.to_string();
        self
    }

    fn fix(mut self, fix: FixKind) -> Self {
        self.suggested_fix = Some(fix);
        self
    }
}

/// Deduplicated set of active failures.
#[derive(Debug, Clone, Default)]
pub struct FailureDetector {
    policy: DetectorPolicy,
    active: BTreeMap<FailureId, FailureEvent>,
    confirmed: BTreeSet<FailureId>,
}

impl FailureDetector {
    pub fn new(policy: DetectorPolicy) -> Self {
        Self {
            policy,
            active: BTreeMap::new(),
            confirmed: BTreeSet::new(),
        }
    }

    pub fn policy(&self) -> &DetectorPolicy {
        &self.policy
    }

    /// Recomputes conditions from `snapshot` and diffs them against the
    /// active set.
    pub fn evaluate(
        &mut self,
        graph: &ArchitectureGraph,
        problem: &Problem,
        snapshot: &MetricsSnapshot,
    ) -> FailureDiff {
        let conditions: BTreeMap<FailureId, Condition> = self
            .conditions(graph, problem, snapshot)
            .into_iter()
            .map(|c| (FailureId::new(&c.subject, c.kind), c))
            .collect();

        let mut diff = FailureDiff::default();

        // Vanished conditions
        let stale: Vec<FailureId> = self
            .active
            .iter()
            .filter(|(id, event)| {
                let orphaned = event
                    .component
                    .as_ref()
                    .map_or(false, |c| !graph.contains(c))
                    && event.connection.as_ref().map_or(true, |c| graph.connection(c).is_none());
                if orphaned {
                    return true;
                }
                if conditions.contains_key(*id) {
                    return false;
                }
                !event.kind.is_persistent() || self.confirmed.contains(*id)
            })
            .map(|(id, _)| id.clone())
            .collect();
        for id in stale {
            self.active.remove(&id);
            self.confirmed.remove(&id);
            info!("Failure cleared: {}", id);
            diff.cleared.push(id);
        }

        // Persistent failures that survived a tick now wait for a fix
        for event in self.active.values_mut() {
            if event.kind.is_persistent() {
                event.state = FailureState::AwaitingFix;
            }
        }

        for (id, condition) in conditions {
            match self.active.get_mut(&id) {
                Some(event) => {
                    event.severity = condition.severity;
                    event.message = condition.message;
                    event.suggested_fix = condition.suggested_fix;
                }
                None => {
                    if condition.severity >= self.policy.critical_severity {
                        warn!("Failure raised: {} ({:.2}) {}", id, condition.severity, condition.message);
                    } else {
                        info!("Failure raised: {} ({:.2}) {}", id, condition.severity, condition.message);
                    }
                    self.active.insert(
                        id.clone(),
                        FailureEvent {
                            id: id.clone(),
                            kind: condition.kind,
                            severity: condition.severity,
                            state: FailureState::Active,
                            message: condition.message,
                            recommendation: condition.recommendation,
                            suggested_fix: condition.suggested_fix,
                            component: condition.component,
                            connection: condition.connection,
                            first_seen: snapshot.time,
                        },
                    );
                    diff.raised.push(id);
                }
            }
        }

        diff
    }

    fn conditions(
        &self,
        graph: &ArchitectureGraph,
        problem: &Problem,
        snapshot: &MetricsSnapshot,
    ) -> Vec<Condition> {
        let mut found = Vec::new();
        let p95 = problem.constraints.p95_latency_ms;
        let read_heavy = problem.read_fraction() > 0.5;

        for (id, m) in &snapshot.components {
            let Some(component) = graph.component(id) else {
                continue;
            };

            if m.crashed && m.rps > 0.0 {
                found.push(
                    Condition::on_component(id, FailureKind::ChaosOutage, 1.0)
                        .text(
                            format!("{} is down while receiving {:.0} rps", id, m.rps),
                            "Recover the component, then add redundancy so one loss is survivable",
                        )
                        .fix(FixKind::Recover),
                );
            } else if m.down && m.rps > 0.0 {
                // No instances: an editing problem, cleared by the edit
                found.push(
                    Condition::on_component(id, FailureKind::Overload, 1.0)
                        .text(
                            format!("{} has no capacity but receives {:.0} rps", id, m.rps),
                            "Give the component at least one instance",
                        )
                        .fix(FixKind::AddRedundancy),
                );
            } else if m.utilization > 1.0 {
                let fix = if component.kind.is_database() && read_heavy && !graph.is_fronted_by_cache(id) {
                    FixKind::AddCache
                } else {
                    FixKind::AddRedundancy
                };
                found.push(
                    Condition::on_component(
                        id,
                        FailureKind::Overload,
                        0.5 + 0.25 * (m.utilization - 1.0),
                    )
                    .text(
                        format!(
                            "{} at {:.0}% utilization ({:.0} of {:.0} rps)",
                            id,
                            m.utilization * 100.0,
                            m.rps,
                            m.capacity_rps
                        ),
                        "Add capacity or take load off this component",
                    )
                    .fix(fix),
                );
            }

            if m.error_rate > self.policy.error_rate_threshold {
                found.push(
                    Condition::on_component(id, FailureKind::HighErrorRate, 0.3 + 0.7 * m.error_rate)
                        .text(
                            format!("{} failing {:.1}% of requests", id, m.error_rate * 100.0),
                            "Scale up so the component runs below its knee",
                        )
                        .fix(FixKind::ScaleUp),
                );
            }

            let share = if snapshot.total_demand_rps > 0.0 {
                m.rps / snapshot.total_demand_rps
            } else {
                0.0
            };
            if component.redundancy() == 1
                && !component.kind.is_managed()
                && !component.kind.is_entry_point()
                && share > self.policy.redundancy_load_share
            {
                let fix = if component.kind.is_database() {
                    FixKind::EnableReplication
                } else {
                    FixKind::AddRedundancy
                };
                found.push(
                    Condition::on_component(id, FailureKind::MissingRedundancy, 0.4)
                        .text(
                            format!("{} is a single point of failure for {:.0}% of traffic", id, share * 100.0),
                            "Run more than one copy of this component",
                        )
                        .fix(fix),
                );
            }

            if p95 > 0.0 && m.rps > 0.0 && m.latency_ms > p95 && snapshot.entry_points.contains(id) {
                found.push(
                    Condition::on_component(
                        id,
                        FailureKind::SlaBreach,
                        0.5 + 0.5 * (m.latency_ms / p95 - 1.0),
                    )
                    .text(
                        format!("{:.0} ms at {} exceeds the {:.0} ms p95 target", m.latency_ms, id, p95),
                        "Cache hot reads or relieve the slowest component on the path",
                    ),
                );
            }

            let connected =
                graph.incoming(id).next().is_some() || graph.outgoing(id).next().is_some();
            if !connected && graph.component_count() > 1 {
                found.push(
                    Condition::on_component(id, FailureKind::Disconnected, 0.2).text(
                        format!("{} has no connections", id),
                        "Connect the component or remove it",
                    ),
                );
            }
        }

        for conn in graph.connections() {
            let Some(link) = snapshot.connections.get(&conn.id) else {
                continue;
            };
            if link.dangling {
                let owner = graph.contains(&conn.source).then(|| conn.source.clone());
                found.push(
                    Condition::on_connection(&conn.id, owner, FailureKind::Disconnected, 0.2).text(
                        format!("{} references a missing component", conn.id),
                        "Remove the connection or restore its endpoint",
                    ),
                );
            } else if link.broken && link.blocked_rps > 0.0 {
                found.push(
                    Condition::on_connection(
                        &conn.id,
                        Some(conn.target.clone()),
                        FailureKind::Disconnected,
                        0.5,
                    )
                    .text(
                        format!("{} is partitioned, {:.0} rps cannot reach {}", conn.id, link.blocked_rps, conn.target),
                        "Add a redundant path to the target",
                    ),
                );
            }
        }

        found
    }

    /// Lets persistent failures on `component` clear once their condition
    /// is gone.
    pub fn confirm_fix(&mut self, component: &ComponentId) -> usize {
        let ids: Vec<FailureId> = self
            .active
            .values()
            .filter(|e| e.kind.is_persistent() && e.component.as_ref() == Some(component))
            .map(|e| e.id.clone())
            .collect();
        let count = ids.len();
        self.confirmed.extend(ids);
        count
    }

    /// Active failures, most severe first.
    pub fn failures(&self) -> Vec<FailureEvent> {
        let mut failures: Vec<FailureEvent> = self.active.values().cloned().collect();
        failures.sort_by(|a, b| {
            b.severity
                .partial_cmp(&a.severity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        failures
    }

    pub fn get(&self, id: &FailureId) -> Option<&FailureEvent> {
        self.active.get(id)
    }

    /// True if `component` has an active failure of `kind`.
    pub fn has_active(&self, component: &ComponentId, kind: FailureKind) -> bool {
        self.active
            .contains_key(&FailureId::new(component.as_str(), kind))
    }

    pub fn is_failed(&self) -> bool {
        self.active
            .values()
            .any(|e| e.severity >= self.policy.critical_severity)
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn clear(&mut self) {
        self.active.clear();
        self.confirmed.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{ComponentMetrics, ConnectionMetrics};
    use crate::model::{Component, ComponentKind};
    use crate::problem::url_shortener;

    fn graph() -> ArchitectureGraph {
        ArchitectureGraph::new()
            .with_component(Component::new("app", ComponentKind::AppServer).with_instances(2))
            .with_component(Component::new("db", ComponentKind::Database))
            .connect("app", "db")
    }

    fn snapshot(app: ComponentMetrics, db: ComponentMetrics) -> MetricsSnapshot {
        let mut s = MetricsSnapshot {
            total_demand_rps: app.rps,
            entry_points: vec![ComponentId::new("app")],
            ..Default::default()
        };
        s.components.insert(ComponentId::new("app"), app);
        s.components.insert(ComponentId::new("db"), db);
        s.connections
            .insert(ConnectionId::new("app->db"), ConnectionMetrics::default());
        s
    }

    fn healthy(rps: f64) -> ComponentMetrics {
        ComponentMetrics {
            rps,
            capacity_rps: 1000.0,
            utilization: rps / 1000.0,
            latency_ms: 20.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_overload_raised_and_cleared() {
        let mut detector = FailureDetector::default();
        let problem = url_shortener();
        let overloaded = ComponentMetrics {
            utilization: 3.5,
            ..healthy(3500.0)
        };

        let diff = detector.evaluate(&graph(), &problem, &snapshot(healthy(3500.0), overloaded));
        let db = ComponentId::new("db");
        assert!(diff.raised.contains(&FailureId::new("db", FailureKind::Overload)));
        assert!(detector.has_active(&db, FailureKind::Overload));
        assert!(detector.is_failed());

        // Read-heavy database without a cache: suggest one
        let event = detector.get(&FailureId::new("db", FailureKind::Overload)).unwrap();
        assert_eq!(event.suggested_fix, Some(FixKind::AddCache));

        let diff = detector.evaluate(&graph(), &problem, &snapshot(healthy(100.0), healthy(100.0)));
        assert!(diff.cleared.contains(&FailureId::new("db", FailureKind::Overload)));
        assert!(!detector.has_active(&db, FailureKind::Overload));
    }

    #[test]
    fn test_idle_snapshot_raises_nothing() {
        let mut detector = FailureDetector::default();
        let diff = detector.evaluate(
            &graph(),
            &url_shortener(),
            &snapshot(ComponentMetrics::default(), ComponentMetrics::default()),
        );
        assert!(diff.raised.is_empty());
        assert!(!detector.is_failed());
    }

    #[test]
    fn test_outage_waits_for_fix() {
        let mut detector = FailureDetector::default();
        let problem = url_shortener();
        let app = ComponentId::new("app");
        let outage_id = FailureId::new("app", FailureKind::ChaosOutage);
        let crashed = ComponentMetrics {
            rps: 500.0,
            utilization: f64::INFINITY,
            error_rate: 1.0,
            down: true,
            crashed: true,
            ..Default::default()
        };

        detector.evaluate(&graph(), &problem, &snapshot(crashed.clone(), ComponentMetrics::default()));
        assert_eq!(detector.get(&outage_id).unwrap().state, FailureState::Active);
        assert_eq!(detector.get(&outage_id).unwrap().suggested_fix, Some(FixKind::Recover));

        detector.evaluate(&graph(), &problem, &snapshot(crashed, ComponentMetrics::default()));
        assert_eq!(detector.get(&outage_id).unwrap().state, FailureState::AwaitingFix);

        // Condition gone but nobody confirmed a fix
        detector.evaluate(&graph(), &problem, &snapshot(healthy(100.0), healthy(100.0)));
        assert!(detector.has_active(&app, FailureKind::ChaosOutage));

        assert_eq!(detector.confirm_fix(&app), 1);
        let diff = detector.evaluate(&graph(), &problem, &snapshot(healthy(100.0), healthy(100.0)));
        assert!(diff.cleared.contains(&outage_id));
    }

    #[test]
    fn test_zero_instances_is_transient_overload() {
        let mut detector = FailureDetector::default();
        let problem = url_shortener();
        let db = ComponentId::new("db");
        let empty = ComponentMetrics {
            rps: 100.0,
            utilization: f64::INFINITY,
            error_rate: 1.0,
            down: true,
            ..Default::default()
        };

        detector.evaluate(&graph(), &problem, &snapshot(healthy(100.0), empty.clone()));
        detector.evaluate(&graph(), &problem, &snapshot(healthy(100.0), empty));
        assert!(!detector.has_active(&db, FailureKind::ChaosOutage));
        let event = detector.get(&FailureId::new("db", FailureKind::Overload)).unwrap();
        assert_eq!(event.state, FailureState::Active);
        assert_eq!(event.suggested_fix, Some(FixKind::AddRedundancy));
        assert!(detector.is_failed());

        // No confirm_fix needed once capacity is back
        detector.evaluate(&graph(), &problem, &snapshot(healthy(100.0), healthy(100.0)));
        assert!(!detector.has_active(&db, FailureKind::Overload));
        assert!(!detector.is_failed());
    }

    #[test]
    fn test_single_instance_database_flagged() {
        let mut detector = FailureDetector::default();
        detector.evaluate(&graph(), &url_shortener(), &snapshot(healthy(500.0), healthy(500.0)));

        let event = detector
            .get(&FailureId::new("db", FailureKind::MissingRedundancy))
            .unwrap();
        assert_eq!(event.suggested_fix, Some(FixKind::EnableReplication));
        assert!(!detector.is_failed());
        // Two app instances are redundant already
        assert!(!detector.has_active(&ComponentId::new("app"), FailureKind::MissingRedundancy));
    }

    #[test]
    fn test_dangling_reported_once_at_low_severity() {
        let graph = graph().connect("db", "ghost");
        let mut s = snapshot(healthy(10.0), healthy(10.0));
        s.connections.insert(
            ConnectionId::new("db->ghost"),
            ConnectionMetrics {
                dangling: true,
                ..Default::default()
            },
        );

        let mut detector = FailureDetector::default();
        let diff = detector.evaluate(&graph, &url_shortener(), &s);
        let dangling = FailureId::new("db->ghost", FailureKind::Disconnected);
        assert_eq!(diff.raised.iter().filter(|id| **id == dangling).count(), 1);
        assert_eq!(detector.get(&dangling).unwrap().severity, 0.2);
    }

    #[test]
    fn test_removed_component_drops_its_failures() {
        let mut detector = FailureDetector::default();
        let problem = url_shortener();
        let crashed = ComponentMetrics {
            rps: 500.0,
            down: true,
            crashed: true,
            ..Default::default()
        };
        detector.evaluate(&graph(), &problem, &snapshot(healthy(500.0), crashed));
        assert!(detector.has_active(&ComponentId::new("db"), FailureKind::ChaosOutage));

        let mut smaller = graph();
        smaller.remove_component(&ComponentId::new("db")).unwrap();
        let mut s = MetricsSnapshot::default();
        s.components.insert(ComponentId::new("app"), healthy(10.0));
        detector.evaluate(&smaller, &problem, &s);
        assert!(!detector.has_active(&ComponentId::new("db"), FailureKind::ChaosOutage));
    }
}
