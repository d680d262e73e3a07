//! Property tests over the engine as driven by the harness.

use archsim_core::model::ReplicationMode;
use archsim_core::problem::{url_shortener, video_streaming};
use archsim_core::{
    validate, ArchitectureGraph, CanvasSnapshot, ChaosInjector, ChaosKind, ChaosTarget, Component,
    ComponentKind, ConnectionId, ViewState,
};
use archsim_sim::scenarios::{reference_design, two_tier};
use archsim_sim::{SimConfig, SimWorld};
use proptest::prelude::*;
use std::time::Duration;

const STEP: Duration = Duration::from_millis(100);

fn world(graph: ArchitectureGraph, traffic_level: f64) -> SimWorld {
    let config = SimConfig {
        traffic_level,
        ..Default::default()
    };
    SimWorld::new(config, graph, url_shortener()).unwrap()
}

/// Reference design restricted to the components selected by `mask`
/// (bit 0 lb, 1 app, 2 cache, 3 db). Links need both ends present.
fn partial_design(mask: u8) -> ArchitectureGraph {
    let mut graph = ArchitectureGraph::new();
    if mask & 1 != 0 {
        graph = graph.with_component(Component::new("lb", ComponentKind::LoadBalancer).with_instances(2));
    }
    if mask & 2 != 0 {
        graph = graph.with_component(Component::new("app", ComponentKind::AppServer).with_instances(4));
    }
    if mask & 4 != 0 {
        graph = graph.with_component(Component::new("cache", ComponentKind::Cache).with_instances(2));
    }
    if mask & 8 != 0 {
        graph = graph.with_component(
            Component::new("db", ComponentKind::Database)
                .with_replication(2, ReplicationMode::LeaderFollower),
        );
    }
    if mask & 0b0011 == 0b0011 {
        graph = graph.connect("lb", "app");
    }
    if mask & 0b0110 == 0b0110 {
        graph = graph.connect("app", "cache");
    }
    if mask & 0b1010 == 0b1010 {
        graph = graph.connect("app", "db");
    }
    graph
}

#[derive(Debug, Clone)]
enum Perturbation {
    Spike(f64),
    Latency(f64),
    Partition,
    Slowdown(f64),
    MissStorm(f64),
}

impl Perturbation {
    fn resolve(&self) -> (ChaosKind, ChaosTarget) {
        let db_link = || ChaosTarget::Connection(ConnectionId::new("app->db"));
        match *self {
            Perturbation::Spike(multiplier) => (ChaosKind::TrafficSpike { multiplier }, ChaosTarget::Everywhere),
            Perturbation::Latency(latency_ms) => (ChaosKind::AddedLatency { latency_ms }, db_link()),
            Perturbation::Partition => (ChaosKind::NetworkPartition, db_link()),
            Perturbation::Slowdown(factor) => (
                ChaosKind::BackingStoreSlowdown { factor },
                ChaosTarget::Component("db".into()),
            ),
            Perturbation::MissStorm(hit_rate_drop) => {
                (ChaosKind::CacheMissStorm { hit_rate_drop }, ChaosTarget::Everywhere)
            }
        }
    }
}

fn perturbation() -> impl Strategy<Value = Perturbation> {
    prop_oneof![
        (1.0f64..5.0).prop_map(Perturbation::Spike),
        (0.0f64..800.0).prop_map(Perturbation::Latency),
        Just(Perturbation::Partition),
        (1.0f64..8.0).prop_map(Perturbation::Slowdown),
        (0.0f64..1.0).prop_map(Perturbation::MissStorm),
    ]
}

/// Runs `ticks` ticks, injecting each perturbation at its tick, and
/// returns the history rendered for comparison.
fn replay(plan: &[(u32, Perturbation, u64)], ticks: u32) -> Vec<String> {
    let mut world = world(reference_design(), 0.6);
    for tick in 0..ticks {
        for (at, p, secs) in plan {
            if *at == tick {
                let (kind, target) = p.resolve();
                world
                    .add_chaos_event(kind, target, Some(Duration::from_secs(*secs)))
                    .unwrap();
            }
        }
        world.tick(STEP);
    }
    // Debug keeps NaN and infinities comparable
    world.history().map(|s| format!("{:?}", s)).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn utilization_never_falls_as_traffic_rises(
        low in 0.0f64..0.5,
        extra in 0.0f64..0.5,
        reference in any::<bool>(),
    ) {
        let graph = if reference { reference_design() } else { two_tier() };
        let mut quiet = world(graph.clone(), low);
        let mut busy = world(graph, low + extra);
        let before = quiet.tick(STEP);
        let after = busy.tick(STEP);

        for (id, m) in &before.components {
            let hotter = after.component(id).unwrap();
            prop_assert!(
                hotter.utilization >= m.utilization - 1e-9,
                "{} went from {} to {}", id, m.utilization, hotter.utilization
            );
        }
    }

    #[test]
    fn same_inputs_replay_identically(
        plan in prop::collection::vec((0u32..40, perturbation(), 1u64..6), 0..6),
    ) {
        let first = replay(&plan, 60);
        let second = replay(&plan, 60);
        prop_assert_eq!(first.len(), 60);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn chaos_holds_exactly_for_its_window(
        start_ms in 0u64..60_000,
        duration_ms in 1u64..30_000,
        offsets in prop::collection::vec(0.0f64..1.0, 1..20),
    ) {
        let start = Duration::from_millis(start_ms);
        let duration = Duration::from_millis(duration_ms);
        let end = start + duration;
        let mut injector = ChaosInjector::new();
        let id = injector
            .add(ChaosKind::TrafficSpike { multiplier: 2.0 }, ChaosTarget::Everywhere, Some(duration), start)
            .unwrap();
        let event = injector.get(id).unwrap().clone();

        let mut offsets: Vec<Duration> = offsets.iter().map(|f| duration.mul_f64(*f)).collect();
        offsets.sort();
        let mut last_progress = 0.0;
        for offset in offsets {
            let now = start + offset;
            prop_assert!(event.is_active_at(now));
            let progress = event.progress(now);
            prop_assert!(progress >= last_progress);
            prop_assert!((0.0..=1.0).contains(&progress));
            last_progress = progress;
        }

        prop_assert!(!event.is_active_at(end));
        prop_assert!(injector.expire(end - Duration::from_nanos(1)).is_empty());
        prop_assert_eq!(injector.expire(end).len(), 1);
        prop_assert!(injector.is_empty());
    }

    #[test]
    fn validation_is_idempotent(mask in 0u8..16) {
        let graph = partial_design(mask);
        let problem = url_shortener();
        prop_assert_eq!(validate(&graph, &problem), validate(&graph, &problem));
    }

    #[test]
    fn adding_a_missing_part_never_lowers_the_score(mask in 0u8..16, bit in 0u8..4) {
        let added = 1u8 << bit;
        prop_assume!(mask & added == 0);
        let problem = url_shortener();
        let before = validate(&partial_design(mask), &problem);
        let after = validate(&partial_design(mask | added), &problem);
        prop_assert!(
            after.score >= before.score,
            "mask {:04b} + {:04b}: {} -> {}", mask, added, before.score, after.score
        );
    }

    #[test]
    fn adding_a_missing_kind_never_lowers_a_hard_score(
        mask in 0u16..1024,
        pick in 0usize..10,
        cost_per_hour in 0.0f64..500.0,
    ) {
        let problem = video_streaming();
        let kinds = problem.required_kinds();
        prop_assume!(mask & (1 << pick) == 0);

        let mut graph = ArchitectureGraph::new();
        for (i, kind) in kinds.iter().enumerate() {
            if mask & (1 << i) != 0 {
                graph = graph.with_component(Component::new(kind.to_string().as_str(), *kind).with_instances(3));
            }
        }
        let before = validate(&graph, &problem);
        let missing = kinds[pick];
        prop_assume!(before.issues.iter().any(|i| i.title == format!("Missing {}", missing)));

        let graph = graph.with_component(
            Component::new(missing.to_string().as_str(), missing)
                .with_instances(3)
                .with_cost_per_hour(cost_per_hour),
        );
        let after = validate(&graph, &problem);
        prop_assert!(
            after.score >= before.score,
            "adding {} at ${}/h: {} -> {}", missing, cost_per_hour, before.score, after.score
        );
    }

    #[test]
    fn canvas_snapshot_round_trips(
        mask in 1u8..16,
        pan in (-5000i32..5000, -5000i32..5000),
        zoom_steps in 1u32..16,
        level_steps in 0u32..5,
    ) {
        let snapshot = CanvasSnapshot {
            graph: partial_design(mask),
            view: ViewState {
                pan_x: f64::from(pan.0),
                pan_y: f64::from(pan.1),
                zoom: f64::from(zoom_steps) * 0.25,
            },
            traffic_level: f64::from(level_steps) * 0.25,
        };
        let json = snapshot.to_json().unwrap();
        prop_assert_eq!(CanvasSnapshot::from_json(&json).unwrap(), snapshot);
    }
}
