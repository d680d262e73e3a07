//! Traffic Propagation Engine - the tick function.
//!
//! Given the graph, the problem, a traffic level and the chaos state, one
//! call to [`propagate`] computes every component's load, utilization,
//! latency and error rate and every connection's flow. The step is pure:
//! identical inputs always produce identical snapshots.
//!
//! # Routing
//!
//! - Demand enters at entry points, split into reads and writes.
//! - Components are visited in topological order. A cycle is broken at its
//!   smallest id; edges back into an already visited component carry flow
//!   but feed nothing.
//! - A down component serves nothing and forwards nothing.
//! - Load balancers, gateways, DNS and queues split traffic evenly; every
//!   other kind calls each of its targets.
//! - A cache with targets of its own is read-through and passes on misses
//!   plus writes. A cache without targets called next to other targets is
//!   cache-aside: the caller sends reads to it and only misses plus writes
//!   to its siblings.

use crate::capacity::{capacity, Capacity, ChaosModifiers};
use crate::chaos::ChaosInjector;
use crate::metrics::{ComponentMetrics, ConnectionMetrics, MetricsSnapshot};
use crate::model::{ArchitectureGraph, Component, ComponentId, ComponentKind, Connection};
use crate::problem::Problem;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::{Add, AddAssign};
use std::time::Duration;

// =============================================================================
// POLICY
// =============================================================================

/// Shape of the congestion and error curves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropagationPolicy {
    /// Utilization at which errors start appearing
    pub knee: f64,
    /// Utilization at which every request fails
    pub saturation: f64,
    /// Convex queueing term, relative to the latency floor
    pub congestion_coefficient: f64,
    /// Linear queueing term per unit of overload
    pub queue_penalty_ms: f64,
    /// Upper bound for any latency (request timeout)
    pub timeout_ms: f64,
}

impl Default for PropagationPolicy {
    fn default() -> Self {
        Self {
            knee: 0.85,
            saturation: 3.0,
            congestion_coefficient: 4.0,
            queue_penalty_ms: 50.0,
            timeout_ms: 30_000.0,
        }
    }
}

impl PropagationPolicy {
    /// Latency spent inside one component.
    ///
    /// Floor below saturation, plus a penalty growing with the square of the
    /// overload once utilization exceeds 1.
    pub fn own_latency(&self, floor_ms: f64, utilization: f64, rps: f64, down: bool) -> f64 {
        if down {
            return if rps > 0.0 { self.timeout_ms } else { 0.0 };
        }
        let mut latency = floor_ms;
        if utilization > 1.0 {
            let over = utilization - 1.0;
            latency += floor_ms * self.congestion_coefficient * over * over + self.queue_penalty_ms * over;
        }
        latency.min(self.timeout_ms)
    }

    /// 0 below the knee, linear up to 1 at saturation, plus the base rate.
    pub fn error_rate(&self, base: f64, utilization: f64, rps: f64) -> f64 {
        if rps <= 0.0 {
            return 0.0;
        }
        let span = (self.saturation - self.knee).max(f64::EPSILON);
        let overload = ((utilization - self.knee) / span).clamp(0.0, 1.0);
        (base + overload).min(1.0)
    }
}

/// load / capacity. Infinite when a down component is offered load; zero for
/// unbounded sources and idle components.
pub fn utilization(load: f64, capacity: f64) -> f64 {
    if load <= 0.0 {
        0.0
    } else if capacity <= 0.0 {
        f64::INFINITY
    } else if capacity.is_infinite() {
        0.0
    } else {
        load / capacity
    }
}

// =============================================================================
// FLOW
// =============================================================================

/// Requests per second, split by type.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Flow {
    pub reads: f64,
    pub writes: f64,
}

impl Flow {
    pub const ZERO: Flow = Flow { reads: 0.0, writes: 0.0 };

    /// Splits `total` by the share of reads.
    pub fn split(total: f64, read_fraction: f64) -> Self {
        Self {
            reads: total * read_fraction,
            writes: total * (1.0 - read_fraction),
        }
    }

    pub fn total(&self) -> f64 {
        self.reads + self.writes
    }

    pub fn scaled(self, factor: f64) -> Self {
        Self {
            reads: self.reads * factor,
            writes: self.writes * factor,
        }
    }

    /// What gets past a cache with hit rate `hit_rate`.
    pub fn misses(self, hit_rate: f64) -> Self {
        Self {
            reads: self.reads * (1.0 - hit_rate.clamp(0.0, 1.0)),
            writes: self.writes,
        }
    }
}

impl Add for Flow {
    type Output = Flow;

    fn add(self, rhs: Flow) -> Flow {
        Flow {
            reads: self.reads + rhs.reads,
            writes: self.writes + rhs.writes,
        }
    }
}

impl AddAssign for Flow {
    fn add_assign(&mut self, rhs: Flow) {
        *self = *self + rhs;
    }
}

// =============================================================================
// TICK
// =============================================================================

/// Everything one propagation step reads.
#[derive(Debug, Clone, Copy)]
pub struct TickInput<'a> {
    pub graph: &'a ArchitectureGraph,
    pub problem: &'a Problem,
    /// Fraction of peak demand, 0..1
    pub traffic_level: f64,
    pub chaos: &'a ChaosInjector,
    /// Simulated clock
    pub now: Duration,
    pub tick: u64,
}

/// Visiting order: Kahn's algorithm with ties broken by id. When only
/// cycles remain, the smallest remaining id is visited next.
pub fn topological_order(graph: &ArchitectureGraph) -> Vec<ComponentId> {
    let mut in_degree: BTreeMap<&ComponentId, usize> =
        graph.components().map(|c| (&c.id, 0)).collect();
    for conn in graph.connections().filter(|c| !graph.is_dangling(c)) {
        if let Some(degree) = in_degree.get_mut(&conn.target) {
            *degree += 1;
        }
    }

    let mut ready: BTreeSet<&ComponentId> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut done: BTreeSet<&ComponentId> = BTreeSet::new();
    let mut order = Vec::with_capacity(in_degree.len());

    while order.len() < in_degree.len() {
        let next = match ready.pop_first() {
            Some(id) => id,
            // cycle: force the smallest unvisited id
            None => match in_degree.keys().find(|id| !done.contains(*id)) {
                Some(id) => *id,
                None => break,
            },
        };
        if !done.insert(next) {
            continue;
        }
        order.push(next.clone());

        for conn in graph.outgoing(next) {
            if let Some(degree) = in_degree.get_mut(&conn.target) {
                *degree = degree.saturating_sub(1);
                if *degree == 0 && !done.contains(&conn.target) {
                    ready.insert(&conn.target);
                }
            }
        }
    }
    order
}

/// One synchronous propagation step.
pub fn propagate(input: &TickInput<'_>, policy: &PropagationPolicy) -> MetricsSnapshot {
    let graph = input.graph;
    let order = topological_order(graph);
    let position: BTreeMap<&ComponentId, usize> =
        order.iter().enumerate().map(|(i, id)| (id, i)).collect();

    let mut modifiers: BTreeMap<ComponentId, ChaosModifiers> = BTreeMap::new();
    let mut capacities: BTreeMap<ComponentId, Capacity> = BTreeMap::new();
    for component in graph.components() {
        let m = input.chaos.modifiers_for(component, input.now);
        capacities.insert(component.id.clone(), capacity(component, &m));
        modifiers.insert(component.id.clone(), m);
    }

    let mut connections: BTreeMap<_, ConnectionMetrics> = graph
        .connections()
        .map(|conn| {
            let metrics = if graph.is_dangling(conn) {
                ConnectionMetrics {
                    dangling: true,
                    ..Default::default()
                }
            } else {
                let m = input.chaos.connection_modifiers(conn, input.now);
                ConnectionMetrics {
                    latency_ms: conn.protocol.hop_latency_ms() + m.added_latency_ms,
                    broken: m.partitioned,
                    ..Default::default()
                }
            };
            (conn.id.clone(), metrics)
        })
        .collect();

    // 1. Entry demand
    let entry_points = graph.entry_points();
    let read_fraction = input.problem.read_fraction();
    let baseline = input.problem.peak_rps() * input.traffic_level.max(0.0);
    let per_entry = if entry_points.is_empty() {
        0.0
    } else {
        baseline / entry_points.len() as f64
    };

    let mut inbound: BTreeMap<ComponentId, Flow> = BTreeMap::new();
    let mut total_demand_rps = 0.0;
    for id in &entry_points {
        let spike = modifiers
            .get(id)
            .map_or(1.0, |m| m.traffic_multiplier.max(0.0));
        let demand = per_entry * spike;
        total_demand_rps += demand;
        *inbound.entry(id.clone()).or_default() += Flow::split(demand, read_fraction);
    }

    // 2-3. Forward pass: load, utilization, own latency, errors, edge flow
    let mut components: BTreeMap<ComponentId, ComponentMetrics> = BTreeMap::new();
    for (i, id) in order.iter().enumerate() {
        let (Some(component), Some(cap)) = (graph.component(id), capacities.get(id)) else {
            continue;
        };
        let load = inbound.get(id).copied().unwrap_or_default();
        let rps = load.total();
        let down = cap.is_down();
        let util = utilization(rps, cap.max_throughput);

        components.insert(
            id.clone(),
            ComponentMetrics {
                rps,
                capacity_rps: cap.max_throughput,
                utilization: util,
                latency_ms: 0.0,
                own_latency_ms: policy.own_latency(cap.latency_floor_ms, util, rps, down),
                error_rate: policy.error_rate(cap.base_error_rate, util, rps),
                hourly_cost: component.hourly_cost(),
                down,
                crashed: modifiers.get(id).map_or(false, |m| m.crashed),
            },
        );

        if down {
            continue;
        }

        for (conn, offered) in route(graph, component, cap, load, &capacities) {
            let Some(link) = connections.get_mut(&conn.id) else {
                continue;
            };
            let mut flow = offered.scaled(conn.protocol.pass_through());
            if !conn.protocol.carries_reads() {
                flow.reads = 0.0;
            }
            if link.broken {
                link.blocked_rps += flow.total();
                continue;
            }
            link.flow_rps += flow.total();

            let downstream = position.get(&conn.target).map_or(false, |p| *p > i);
            if downstream {
                *inbound.entry(conn.target.clone()).or_default() += flow;
            }
        }
    }

    // 6. Reverse pass: response latency
    let mut latency: BTreeMap<&ComponentId, f64> = BTreeMap::new();
    for (i, id) in order.iter().enumerate().rev() {
        let Some(metrics) = components.get(id) else {
            continue;
        };
        let own = metrics.own_latency_ms;
        let mut weighted = 0.0;
        let mut weight = 0.0;
        if !metrics.down {
            for conn in graph.outgoing(id) {
                let Some(link) = connections.get(&conn.id) else {
                    continue;
                };
                if link.broken || link.flow_rps <= 0.0 {
                    continue;
                }
                let downstream = position.get(&conn.target).map_or(false, |p| *p > i);
                let target_latency = if downstream {
                    latency.get(&conn.target).copied()
                } else {
                    components.get(&conn.target).map(|m| m.own_latency_ms)
                };
                weighted += link.flow_rps * (link.latency_ms + target_latency.unwrap_or(0.0));
                weight += link.flow_rps;
            }
        }
        let total = if weight > 0.0 { own + weighted / weight } else { own };
        latency.insert(id, total.min(policy.timeout_ms));
    }
    for (id, metrics) in components.iter_mut() {
        metrics.latency_ms = latency.get(id).copied().unwrap_or(metrics.own_latency_ms);
    }

    MetricsSnapshot {
        tick: input.tick,
        time: input.now,
        total_demand_rps,
        components,
        connections,
        entry_points,
    }
}

/// A cache with no targets of its own, looked up beside the real store.
fn is_cache_aside(graph: &ArchitectureGraph, conn: &Connection) -> bool {
    graph
        .component(&conn.target)
        .map_or(false, |t| t.kind == ComponentKind::Cache)
        && graph.outgoing(&conn.target).next().is_none()
}

/// Splits what `component` forwards across its outgoing connections.
fn route<'g>(
    graph: &'g ArchitectureGraph,
    component: &'g Component,
    cap: &Capacity,
    load: Flow,
    capacities: &BTreeMap<ComponentId, Capacity>,
) -> Vec<(&'g Connection, Flow)> {
    let outgoing: Vec<&Connection> = graph.outgoing(&component.id).collect();
    if outgoing.is_empty() {
        return Vec::new();
    }

    // Read-through caching kinds only pass misses on
    let forwarded = match cap.cache_hit_rate {
        Some(hit_rate) => load.misses(hit_rate),
        None => load,
    };

    let distributes = component.kind.distributes_load();
    let (aside, others): (Vec<&Connection>, Vec<&Connection>) = outgoing
        .iter()
        .partition(|conn| !distributes && is_cache_aside(graph, conn));

    let mut routed = Vec::with_capacity(outgoing.len());
    let (rest, targets) = if !aside.is_empty() && !others.is_empty() {
        // A down cache hits nothing
        let hit_rate = aside
            .iter()
            .map(|conn| match capacities.get(&conn.target) {
                Some(c) if !c.is_down() => c.cache_hit_rate.unwrap_or(0.0),
                _ => 0.0,
            })
            .sum::<f64>()
            / aside.len() as f64;
        let lookup = Flow {
            reads: forwarded.reads / aside.len() as f64,
            writes: 0.0,
        };
        routed.extend(aside.iter().map(|conn| (*conn, lookup)));
        (forwarded.misses(hit_rate), others)
    } else {
        (forwarded, outgoing)
    };

    let per_target = if distributes {
        rest.scaled(1.0 / targets.len() as f64)
    } else {
        rest
    };
    routed.extend(targets.into_iter().map(|conn| (conn, per_target)));
    routed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chaos::{ChaosKind, ChaosTarget};
    use crate::model::{ConnectionId, Protocol, ReplicationMode};
    use crate::problem::url_shortener;
    use approx::assert_relative_eq;

    fn id(s: &str) -> ComponentId {
        ComponentId::new(s)
    }

    fn run(graph: &ArchitectureGraph, traffic_level: f64, chaos: &ChaosInjector) -> MetricsSnapshot {
        let problem = url_shortener();
        propagate(
            &TickInput {
                graph,
                problem: &problem,
                traffic_level,
                chaos,
                now: Duration::from_secs(1),
                tick: 1,
            },
            &PropagationPolicy::default(),
        )
    }

    /// app (2 × 500 rps) → database, no cache
    fn two_tier() -> ArchitectureGraph {
        ArchitectureGraph::new()
            .with_component(
                Component::new("app", ComponentKind::AppServer)
                    .with_instances(2)
                    .with_max_rps(500.0),
            )
            .with_component(Component::new("db", ComponentKind::Database))
            .connect("app", "db")
    }

    fn three_tier_with_cache() -> ArchitectureGraph {
        ArchitectureGraph::new()
            .with_component(Component::new("lb", ComponentKind::LoadBalancer))
            .with_component(Component::new("app", ComponentKind::AppServer).with_instances(4))
            .with_component(Component::new("cache", ComponentKind::Cache))
            .with_component(Component::new("db", ComponentKind::Database))
            .connect("lb", "app")
            .connect("app", "cache")
            .connect("app", "db")
    }

    #[test]
    fn test_two_tier_overloads_database() {
        let snapshot = run(&two_tier(), 1.0, &ChaosInjector::new());

        let db = snapshot.component(&id("db")).unwrap();
        assert!(db.utilization > 1.0);
        assert_relative_eq!(db.rps, 3472.222, epsilon = 0.01);
        assert!(db.latency_ms > 10.0);
        assert!(db.error_rate > 0.0);
        assert_eq!(snapshot.entry_points, vec![id("app")]);
    }

    #[test]
    fn test_zero_traffic_is_idle() {
        let mut chaos = ChaosInjector::new();
        chaos
            .add(
                ChaosKind::TrafficSpike { multiplier: 10.0 },
                ChaosTarget::Everywhere,
                None,
                Duration::ZERO,
            )
            .unwrap();
        let snapshot = run(&two_tier(), 0.0, &chaos);

        assert_eq!(snapshot.total_demand_rps, 0.0);
        for metrics in snapshot.components.values() {
            assert_eq!(metrics.rps, 0.0);
            assert_eq!(metrics.utilization, 0.0);
            assert_eq!(metrics.error_rate, 0.0);
        }
    }

    #[test]
    fn test_cache_aside_shields_database() {
        let snapshot = run(&three_tier_with_cache(), 1.0, &ChaosInjector::new());
        let peak = url_shortener().peak_rps();
        let reads = peak * 100.0 / 101.0;
        let writes = peak - reads;

        let cache = snapshot.component(&id("cache")).unwrap();
        let db = snapshot.component(&id("db")).unwrap();
        assert_relative_eq!(cache.rps, reads, epsilon = 1e-6);
        assert_relative_eq!(db.rps, reads * 0.2 + writes, epsilon = 1e-6);
        assert!(db.utilization < 1.0);
    }

    #[test]
    fn test_miss_storm_pushes_reads_through() {
        let graph = three_tier_with_cache();
        let calm = run(&graph, 1.0, &ChaosInjector::new());

        let mut chaos = ChaosInjector::new();
        chaos
            .add(
                ChaosKind::CacheMissStorm { hit_rate_drop: 0.5 },
                ChaosTarget::Component(id("cache")),
                None,
                Duration::ZERO,
            )
            .unwrap();
        let storm = run(&graph, 1.0, &chaos);

        assert!(storm.component(&id("db")).unwrap().rps > calm.component(&id("db")).unwrap().rps);
    }

    #[test]
    fn test_load_balancer_splits_evenly() {
        let graph = ArchitectureGraph::new()
            .with_component(Component::new("users", ComponentKind::Client))
            .with_component(Component::new("lb", ComponentKind::LoadBalancer))
            .with_component(Component::new("a", ComponentKind::AppServer))
            .with_component(Component::new("b", ComponentKind::AppServer))
            .connect("users", "lb")
            .connect("lb", "a")
            .connect("lb", "b");
        let snapshot = run(&graph, 1.0, &ChaosInjector::new());

        let a = snapshot.component(&id("a")).unwrap().rps;
        let b = snapshot.component(&id("b")).unwrap().rps;
        assert_relative_eq!(a, b);
        assert_relative_eq!(a + b, snapshot.total_demand_rps, epsilon = 1e-9);
        assert!(snapshot.component(&id("users")).unwrap().utilization == 0.0);
    }

    #[test]
    fn test_partition_breaks_connection() {
        let mut chaos = ChaosInjector::new();
        chaos
            .add(
                ChaosKind::NetworkPartition,
                ChaosTarget::Connection(ConnectionId::new("app->db")),
                None,
                Duration::ZERO,
            )
            .unwrap();
        let snapshot = run(&two_tier(), 1.0, &chaos);

        let link = snapshot.connection(&ConnectionId::new("app->db")).unwrap();
        assert!(link.broken);
        assert_eq!(link.flow_rps, 0.0);
        assert!(link.blocked_rps > 0.0);
        assert_eq!(snapshot.component(&id("db")).unwrap().rps, 0.0);
    }

    #[test]
    fn test_crashed_component_forwards_nothing() {
        let mut chaos = ChaosInjector::new();
        chaos
            .add(
                ChaosKind::ComponentCrash,
                ChaosTarget::Component(id("app")),
                None,
                Duration::ZERO,
            )
            .unwrap();
        let snapshot = run(&two_tier(), 1.0, &chaos);

        let app = snapshot.component(&id("app")).unwrap();
        assert!(app.down && app.crashed);
        assert_eq!(app.capacity_rps, 0.0);
        assert_eq!(app.error_rate, 1.0);
        assert_eq!(app.latency_ms, PropagationPolicy::default().timeout_ms);
        assert_eq!(snapshot.component(&id("db")).unwrap().rps, 0.0);
    }

    #[test]
    fn test_replication_link_carries_writes_only() {
        let graph = two_tier()
            .with_component(
                Component::new("replica", ComponentKind::Database)
                    .with_replication(2, ReplicationMode::LeaderFollower),
            )
            .with_connection(
                Connection::new("db->replica", "db", "replica").with_protocol(Protocol::Replication),
            );
        let snapshot = run(&graph, 1.0, &ChaosInjector::new());

        let writes = url_shortener().peak_rps() / 101.0;
        assert_relative_eq!(
            snapshot.component(&id("replica")).unwrap().rps,
            writes,
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_added_latency_reaches_entry() {
        let calm = run(&two_tier(), 0.1, &ChaosInjector::new());

        let mut chaos = ChaosInjector::new();
        chaos
            .add(
                ChaosKind::AddedLatency { latency_ms: 300.0 },
                ChaosTarget::Component(id("db")),
                None,
                Duration::ZERO,
            )
            .unwrap();
        let slow = run(&two_tier(), 0.1, &chaos);

        let delta = slow.entry_latency_ms() - calm.entry_latency_ms();
        assert_relative_eq!(delta, 300.0, epsilon = 1e-9);
    }

    #[test]
    fn test_dangling_connection_is_ignored() {
        let graph = two_tier().connect("db", "ghost");
        let snapshot = run(&graph, 0.5, &ChaosInjector::new());

        assert!(snapshot.connection(&ConnectionId::new("db->ghost")).unwrap().dangling);
        assert!(!snapshot.components.contains_key(&id("ghost")));
    }

    #[test]
    fn test_cycle_terminates() {
        let graph = ArchitectureGraph::new()
            .with_component(Component::new("a", ComponentKind::AppServer))
            .with_component(Component::new("b", ComponentKind::AppServer))
            .connect("a", "b")
            .connect("b", "a");

        assert_eq!(topological_order(&graph), vec![id("a"), id("b")]);
        let snapshot = run(&graph, 1.0, &ChaosInjector::new());
        assert_eq!(snapshot.components.len(), 2);
    }

    #[test]
    fn test_deterministic() {
        let graph = three_tier_with_cache();
        let first = run(&graph, 0.7, &ChaosInjector::new());
        let second = run(&graph, 0.7, &ChaosInjector::new());
        assert_eq!(first, second);
    }

    #[test]
    fn test_error_curve() {
        let policy = PropagationPolicy::default();
        assert_eq!(policy.error_rate(0.0, 0.5, 10.0), 0.0);
        assert_eq!(policy.error_rate(0.0, 0.85, 10.0), 0.0);
        assert!(policy.error_rate(0.0, 1.5, 10.0) > 0.0);
        assert_eq!(policy.error_rate(0.0, 5.0, 10.0), 1.0);
        assert_eq!(policy.error_rate(0.0, f64::INFINITY, 10.0), 1.0);
        assert_eq!(policy.error_rate(0.5, 5.0, 0.0), 0.0);
    }
}
