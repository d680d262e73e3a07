//! Chaos Injector - time-bounded perturbations of the architecture.
//!
//! Events live on the simulated clock: slowing the simulation down slows
//! their expiry down by the same factor. Component crashes never expire on
//! their own; they are removed by an explicit recovery.

use crate::capacity::{ChaosModifiers, ConnectionModifiers};
use crate::error::CoreError;
use crate::model::{Component, ComponentId, Connection, ConnectionId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Unique identifier for a chaos event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChaosId(pub Uuid);

impl ChaosId {
    /// Creates a deterministic id from a sequence number.
    pub fn from_seed(seed: u64) -> Self {
        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&seed.to_be_bytes());
        bytes[8..16].copy_from_slice(&seed.wrapping_mul(0x517cc1b727220a95).to_le_bytes());
        Self(Uuid::from_bytes(bytes))
    }
}

impl std::fmt::Display for ChaosId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Show first 8 chars for readability
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// What a chaos event hits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "scope", content = "id")]
pub enum ChaosTarget {
    Component(ComponentId),
    Connection(ConnectionId),
    /// Every matching component or connection
    Everywhere,
}

impl std::fmt::Display for ChaosTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChaosTarget::Component(id) => write!(f, "component {}", id),
            ChaosTarget::Connection(id) => write!(f, "connection {}", id),
            ChaosTarget::Everywhere => write!(f, "everywhere"),
        }
    }
}

/// Perturbation with its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ChaosKind {
    /// Multiplies entry-point demand
    TrafficSpike { multiplier: f64 },
    /// Adds a fixed delay to a connection
    AddedLatency { latency_ms: f64 },
    /// Severs connections
    NetworkPartition,
    /// Multiplies the latency floor of databases / object stores
    BackingStoreSlowdown { factor: f64 },
    /// Lowers cache hit rate by `hit_rate_drop`
    CacheMissStorm { hit_rate_drop: f64 },
    /// Takes a component down until recovered
    ComponentCrash,
}

/// Parameter-free discriminant, used for de-duplication and display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChaosTag {
    TrafficSpike,
    AddedLatency,
    NetworkPartition,
    BackingStoreSlowdown,
    CacheMissStorm,
    ComponentCrash,
}

impl ChaosTag {
    pub fn name(&self) -> &'static str {
        match self {
            ChaosTag::TrafficSpike => "traffic_spike",
            ChaosTag::AddedLatency => "added_latency",
            ChaosTag::NetworkPartition => "network_partition",
            ChaosTag::BackingStoreSlowdown => "backing_store_slowdown",
            ChaosTag::CacheMissStorm => "cache_miss_storm",
            ChaosTag::ComponentCrash => "component_crash",
        }
    }
}

impl ChaosKind {
    pub fn tag(&self) -> ChaosTag {
        match self {
            ChaosKind::TrafficSpike { .. } => ChaosTag::TrafficSpike,
            ChaosKind::AddedLatency { .. } => ChaosTag::AddedLatency,
            ChaosKind::NetworkPartition => ChaosTag::NetworkPartition,
            ChaosKind::BackingStoreSlowdown { .. } => ChaosTag::BackingStoreSlowdown,
            ChaosKind::CacheMissStorm { .. } => ChaosTag::CacheMissStorm,
            ChaosKind::ComponentCrash => ChaosTag::ComponentCrash,
        }
    }

    /// Duration used when the trigger doesn't specify one.
    /// `None` means "until recovered".
    pub fn default_duration(&self) -> Option<Duration> {
        let secs = match self {
            ChaosKind::TrafficSpike { .. } => 30,
            ChaosKind::AddedLatency { .. } => 20,
            ChaosKind::NetworkPartition => 15,
            ChaosKind::BackingStoreSlowdown { .. } => 30,
            ChaosKind::CacheMissStorm { .. } => 20,
            ChaosKind::ComponentCrash => return None,
        };
        Some(Duration::from_secs(secs))
    }

    fn validate(&self, target: &ChaosTarget) -> Result<(), CoreError> {
        let ok = match self {
            ChaosKind::TrafficSpike { multiplier } => multiplier.is_finite() && *multiplier >= 0.0,
            ChaosKind::AddedLatency { latency_ms } => latency_ms.is_finite() && *latency_ms >= 0.0,
            ChaosKind::BackingStoreSlowdown { factor } => factor.is_finite() && *factor >= 0.0,
            ChaosKind::CacheMissStorm { hit_rate_drop } => (0.0..=1.0).contains(hit_rate_drop),
            ChaosKind::NetworkPartition | ChaosKind::ComponentCrash => true,
        };
        if !ok {
            return Err(CoreError::invalid_chaos(format!("bad parameters for {:?}", self)));
        }
        if *self == ChaosKind::ComponentCrash && !matches!(target, ChaosTarget::Component(_)) {
            return Err(CoreError::invalid_chaos("a crash must target a single component"));
        }
        Ok(())
    }
}

/// An injected perturbation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChaosEvent {
    pub id: ChaosId,
    pub kind: ChaosKind,
    pub target: ChaosTarget,
    /// Simulated time the event was added
    pub started_at: Duration,
    /// `None` for crashes (manual recovery only)
    pub duration: Option<Duration>,
}

impl ChaosEvent {
    pub fn elapsed(&self, now: Duration) -> Duration {
        now.saturating_sub(self.started_at)
    }

    /// Active on `[started_at, started_at + duration)`.
    pub fn is_active_at(&self, now: Duration) -> bool {
        if now < self.started_at {
            return false;
        }
        match self.duration {
            Some(duration) => self.elapsed(now) < duration,
            None => true,
        }
    }

    /// elapsed / duration in `[0, 1]`; always 0 for unbounded events.
    pub fn progress(&self, now: Duration) -> f64 {
        match self.duration {
            Some(duration) if !duration.is_zero() => {
                (self.elapsed(now).as_secs_f64() / duration.as_secs_f64()).clamp(0.0, 1.0)
            }
            Some(_) => 1.0,
            None => 0.0,
        }
    }

    pub fn remaining(&self, now: Duration) -> Option<Duration> {
        self.duration
            .map(|duration| duration.saturating_sub(self.elapsed(now)))
    }

    pub fn is_crash(&self) -> bool {
        self.kind.tag() == ChaosTag::ComponentCrash
    }

    fn hits_component(&self, id: &ComponentId) -> bool {
        match &self.target {
            ChaosTarget::Component(target) => target == id,
            ChaosTarget::Everywhere => true,
            ChaosTarget::Connection(_) => false,
        }
    }
}

/// Event plus its derived progress, for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChaosStatus {
    pub event: ChaosEvent,
    pub active: bool,
    pub progress: f64,
    pub remaining: Option<Duration>,
}

/// Collection of chaos events, indexed by id.
#[derive(Debug, Clone, Default)]
pub struct ChaosInjector {
    events: BTreeMap<ChaosId, ChaosEvent>,
    next_seq: u64,
}

impl ChaosInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an event starting at `now`.
    ///
    /// An existing event of the same kind on the same target is replaced:
    /// the most recently added one wins. Crashes ignore `duration`.
    pub fn add(
        &mut self,
        kind: ChaosKind,
        target: ChaosTarget,
        duration: Option<Duration>,
        now: Duration,
    ) -> Result<ChaosId, CoreError> {
        kind.validate(&target)?;

        let duplicates: Vec<ChaosId> = self
            .events
            .values()
            .filter(|e| e.kind.tag() == kind.tag() && e.target == target)
            .map(|e| e.id)
            .collect();
        for id in duplicates {
            debug!("Replacing chaos event {} ({} on {})", id, kind.tag().name(), target);
            self.events.remove(&id);
        }

        let id = ChaosId::from_seed(self.next_seq);
        self.next_seq += 1;

        let duration = match kind {
            ChaosKind::ComponentCrash => None,
            _ => duration.or_else(|| kind.default_duration()),
        };

        self.events.insert(
            id,
            ChaosEvent {
                id,
                kind,
                target,
                started_at: now,
                duration,
            },
        );
        Ok(id)
    }

    /// Removes events whose window has closed. Crashes are kept.
    pub fn expire(&mut self, now: Duration) -> Vec<ChaosEvent> {
        let expired: Vec<ChaosId> = self
            .events
            .values()
            .filter(|e| match e.duration {
                Some(duration) => e.elapsed(now) >= duration,
                None => false,
            })
            .map(|e| e.id)
            .collect();

        expired
            .into_iter()
            .filter_map(|id| self.events.remove(&id))
            .collect()
    }

    /// Removes crash events on `component`; returns how many were removed.
    pub fn recover(&mut self, component: &ComponentId) -> usize {
        let before = self.events.len();
        self.events.retain(|_, e| {
            !(e.is_crash() && matches!(&e.target, ChaosTarget::Component(id) if id == component))
        });
        before - self.events.len()
    }

    /// Cancels an event early.
    pub fn remove(&mut self, id: ChaosId) -> Option<ChaosEvent> {
        self.events.remove(&id)
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> impl Iterator<Item = &ChaosEvent> {
        self.events.values()
    }

    pub fn get(&self, id: ChaosId) -> Option<&ChaosEvent> {
        self.events.get(&id)
    }

    /// True while an active crash targets `component`.
    pub fn is_crashed(&self, component: &ComponentId, now: Duration) -> bool {
        self.active(now)
            .any(|e| e.is_crash() && e.hits_component(component))
    }

    fn active(&self, now: Duration) -> impl Iterator<Item = &ChaosEvent> {
        self.events.values().filter(move |e| e.is_active_at(now))
    }

    /// Combined modifiers of every active event affecting `component`.
    ///
    /// Multipliers multiply, drops add, crash flags OR.
    pub fn modifiers_for(&self, component: &Component, now: Duration) -> ChaosModifiers {
        let mut modifiers = ChaosModifiers::NEUTRAL;
        for event in self.active(now).filter(|e| e.hits_component(&component.id)) {
            match event.kind {
                ChaosKind::TrafficSpike { multiplier } => {
                    modifiers.traffic_multiplier *= multiplier;
                }
                ChaosKind::BackingStoreSlowdown { factor } => {
                    if component.kind.is_backing_store() {
                        modifiers.latency_multiplier *= factor;
                    }
                }
                ChaosKind::CacheMissStorm { hit_rate_drop } => {
                    if component.cache_hit_rate().is_some() {
                        modifiers.hit_rate_drop += hit_rate_drop;
                    }
                }
                ChaosKind::ComponentCrash => modifiers.crashed = true,
                ChaosKind::AddedLatency { .. } | ChaosKind::NetworkPartition => {}
            }
        }
        modifiers
    }

    /// Combined modifiers of every active event affecting `connection`.
    ///
    /// A component-targeted partition severs every connection touching the
    /// component; component-targeted latency delays its incoming links.
    pub fn connection_modifiers(&self, connection: &Connection, now: Duration) -> ConnectionModifiers {
        let mut modifiers = ConnectionModifiers::default();
        for event in self.active(now) {
            let (direct, touches, inbound) = match &event.target {
                ChaosTarget::Connection(id) => (id == &connection.id, false, false),
                ChaosTarget::Component(id) => (
                    false,
                    id == &connection.source || id == &connection.target,
                    id == &connection.target,
                ),
                ChaosTarget::Everywhere => (true, true, true),
            };
            match event.kind {
                ChaosKind::NetworkPartition if direct || touches => modifiers.partitioned = true,
                ChaosKind::AddedLatency { latency_ms } if direct || inbound => {
                    modifiers.added_latency_ms += latency_ms;
                }
                _ => {}
            }
        }
        modifiers
    }

    /// Every event with progress and time remaining, in id order.
    pub fn statuses(&self, now: Duration) -> Vec<ChaosStatus> {
        self.events
            .values()
            .map(|e| ChaosStatus {
                event: e.clone(),
                active: e.is_active_at(now),
                progress: e.progress(now),
                remaining: e.remaining(now),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ComponentKind;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_event_window_and_progress() {
        let mut chaos = ChaosInjector::new();
        let db = Component::new("db", ComponentKind::Database);
        let id = chaos
            .add(
                ChaosKind::BackingStoreSlowdown { factor: 3.0 },
                ChaosTarget::Component(db.id.clone()),
                Some(secs(10)),
                secs(5),
            )
            .unwrap();

        // Before, inside, at the edge of the window
        assert!(chaos.modifiers_for(&db, secs(4)).is_neutral());
        assert_eq!(chaos.modifiers_for(&db, secs(5)).latency_multiplier, 3.0);
        assert_eq!(chaos.modifiers_for(&db, secs(14)).latency_multiplier, 3.0);
        assert!(chaos.modifiers_for(&db, secs(15)).is_neutral());

        let event = chaos.get(id).unwrap();
        assert_eq!(event.progress(secs(5)), 0.0);
        assert_eq!(event.progress(secs(10)), 0.5);
        assert_eq!(event.progress(secs(30)), 1.0);
        assert_eq!(event.remaining(secs(7)), Some(secs(8)));

        assert_eq!(chaos.expire(secs(14)).len(), 0);
        assert_eq!(chaos.expire(secs(15)).len(), 1);
        assert!(chaos.is_empty());
    }

    #[test]
    fn test_crash_never_expires() {
        let mut chaos = ChaosInjector::new();
        let app = ComponentId::new("app");
        chaos
            .add(
                ChaosKind::ComponentCrash,
                ChaosTarget::Component(app.clone()),
                Some(secs(1)),
                secs(0),
            )
            .unwrap();

        assert!(chaos.expire(secs(100_000)).is_empty());
        assert!(chaos.is_crashed(&app, secs(100_000)));
        assert_eq!(chaos.statuses(secs(50))[0].progress, 0.0);
        assert_eq!(chaos.statuses(secs(50))[0].remaining, None);

        assert_eq!(chaos.recover(&app), 1);
        assert!(!chaos.is_crashed(&app, secs(100_000)));
    }

    #[test]
    fn test_crash_requires_component_target() {
        let mut chaos = ChaosInjector::new();
        let err = chaos
            .add(ChaosKind::ComponentCrash, ChaosTarget::Everywhere, None, secs(0))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidChaos(_)));
        assert!(chaos.is_empty());
    }

    #[test]
    fn test_same_kind_same_target_replaces() {
        let mut chaos = ChaosInjector::new();
        let lb = Component::new("lb", ComponentKind::LoadBalancer);
        let target = ChaosTarget::Component(lb.id.clone());

        chaos
            .add(ChaosKind::TrafficSpike { multiplier: 2.0 }, target.clone(), None, secs(0))
            .unwrap();
        let newest = chaos
            .add(ChaosKind::TrafficSpike { multiplier: 5.0 }, target, None, secs(3))
            .unwrap();

        assert_eq!(chaos.len(), 1);
        assert!(chaos.get(newest).is_some());
        assert_eq!(chaos.modifiers_for(&lb, secs(4)).traffic_multiplier, 5.0);
    }

    #[test]
    fn test_same_kind_different_targets_stack() {
        let mut chaos = ChaosInjector::new();
        let lb = Component::new("lb", ComponentKind::LoadBalancer);

        chaos
            .add(ChaosKind::TrafficSpike { multiplier: 2.0 }, ChaosTarget::Everywhere, None, secs(0))
            .unwrap();
        chaos
            .add(
                ChaosKind::TrafficSpike { multiplier: 3.0 },
                ChaosTarget::Component(lb.id.clone()),
                None,
                secs(0),
            )
            .unwrap();

        // Different targets: both apply
        assert_eq!(chaos.modifiers_for(&lb, secs(1)).traffic_multiplier, 6.0);
    }

    #[test]
    fn test_different_kinds_same_target_stack() {
        let mut chaos = ChaosInjector::new();
        let db = Component::new("db", ComponentKind::Database);
        let target = || ChaosTarget::Component(db.id.clone());

        chaos
            .add(ChaosKind::BackingStoreSlowdown { factor: 4.0 }, target(), None, secs(0))
            .unwrap();
        chaos.add(ChaosKind::ComponentCrash, target(), None, secs(0)).unwrap();

        let modifiers = chaos.modifiers_for(&db, secs(1));
        assert!(modifiers.crashed);
        assert_eq!(modifiers.latency_multiplier, 4.0);
        assert_eq!(modifiers.traffic_multiplier, 1.0);
    }

    #[test]
    fn test_component_partition_severs_all_links() {
        let mut chaos = ChaosInjector::new();
        chaos
            .add(
                ChaosKind::NetworkPartition,
                ChaosTarget::Component(ComponentId::new("app")),
                None,
                secs(0),
            )
            .unwrap();

        let inbound = Connection::new("lb->app", "lb", "app");
        let outbound = Connection::new("app->db", "app", "db");
        let unrelated = Connection::new("lb->web", "lb", "web");

        assert!(chaos.connection_modifiers(&inbound, secs(1)).partitioned);
        assert!(chaos.connection_modifiers(&outbound, secs(1)).partitioned);
        assert!(!chaos.connection_modifiers(&unrelated, secs(1)).partitioned);
    }

    #[test]
    fn test_added_latency_on_connection() {
        let mut chaos = ChaosInjector::new();
        let link = Connection::new("app->db", "app", "db");
        chaos
            .add(
                ChaosKind::AddedLatency { latency_ms: 250.0 },
                ChaosTarget::Connection(link.id.clone()),
                None,
                secs(0),
            )
            .unwrap();

        let modifiers = chaos.connection_modifiers(&link, secs(1));
        assert_eq!(modifiers.added_latency_ms, 250.0);
        assert!(!modifiers.partitioned);
    }
}
