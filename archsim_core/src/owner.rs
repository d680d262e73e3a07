//! Graph Owner - the single authority that mutates the architecture graph.
//!
//! Mutations are validated against the current graph before anything
//! changes, so each one either applies completely or not at all. After a
//! successful mutation the owner persists a [`CanvasSnapshot`] through its
//! [`SnapshotSync`] strategy. A failed persist is logged and does not roll
//! the mutation back.

use crate::error::CoreError;
use crate::model::{
    ArchitectureGraph, CapacityConfig, Component, ComponentId, Connection, ConnectionId, Position,
    Protocol, ReliabilityConfig,
};
use archsim_env::{NullSync, SnapshotSync};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Canvas pan and zoom.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewState {
    pub pan_x: f64,
    pub pan_y: f64,
    pub zoom: f64,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            pan_x: 0.0,
            pan_y: 0.0,
            zoom: 1.0,
        }
    }
}

/// What gets persisted. Runtime state (metrics, failures, chaos) never is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanvasSnapshot {
    pub graph: ArchitectureGraph,
    #[serde(default)]
    pub view: ViewState,
    #[serde(default)]
    pub traffic_level: f64,
}

impl CanvasSnapshot {
    pub fn to_json(&self) -> Result<String, CoreError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        Ok(serde_json::from_str(json)?)
    }
}

// =============================================================================
// MUTATIONS
// =============================================================================

/// A single atomic edit of the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op")]
pub enum GraphMutation {
    AddComponent(Component),
    /// Also removes every attached connection
    RemoveComponent(ComponentId),
    MoveComponent {
        component: ComponentId,
        position: Position,
    },
    SetCapacity {
        component: ComponentId,
        capacity: CapacityConfig,
    },
    SetReliability {
        component: ComponentId,
        reliability: ReliabilityConfig,
    },
    AddConnection(Connection),
    RemoveConnection(ConnectionId),
    /// Places `component` between `target` and the sources of `rewire`.
    ///
    /// Each rewired connection is retargeted to the new component, which
    /// gets one connection of its own to `target`.
    InsertInFront {
        component: Component,
        target: ComponentId,
        rewire: Vec<ConnectionId>,
        protocol: Protocol,
    },
}

impl GraphMutation {
    /// Short label for logs.
    pub fn label(&self) -> String {
        match self {
            GraphMutation::AddComponent(c) => format!("add {} ({})", c.id, c.kind),
            GraphMutation::RemoveComponent(id) => format!("remove {}", id),
            GraphMutation::MoveComponent { component, .. } => format!("move {}", component),
            GraphMutation::SetCapacity { component, capacity } => format!(
                "set capacity of {} to {} x {:.0} rps",
                component, capacity.instances, capacity.max_rps_per_instance
            ),
            GraphMutation::SetReliability { component, .. } => {
                format!("set reliability of {}", component)
            }
            GraphMutation::AddConnection(c) => format!("connect {} -> {}", c.source, c.target),
            GraphMutation::RemoveConnection(id) => format!("disconnect {}", id),
            GraphMutation::InsertInFront {
                component, target, ..
            } => format!("insert {} in front of {}", component.id, target),
        }
    }

    /// Checks every precondition without touching the graph.
    pub fn validate(&self, graph: &ArchitectureGraph) -> Result<(), CoreError> {
        match self {
            GraphMutation::AddComponent(component) => check_new_component(graph, component),
            GraphMutation::RemoveComponent(id) | GraphMutation::MoveComponent { component: id, .. } => {
                require_component(graph, id)
            }
            GraphMutation::SetCapacity {
                component,
                capacity,
            } => {
                require_component(graph, component)?;
                check_capacity(component, capacity)
            }
            GraphMutation::SetReliability { component, .. } => require_component(graph, component),
            GraphMutation::AddConnection(connection) => graph.check_connection(connection),
            GraphMutation::RemoveConnection(id) => graph
                .connection(id)
                .map(|_| ())
                .ok_or_else(|| CoreError::UnknownConnection(id.clone())),
            GraphMutation::InsertInFront {
                component,
                target,
                rewire,
                ..
            } => {
                check_new_component(graph, component)?;
                require_component(graph, target)?;
                let mut seen = BTreeSet::new();
                for id in rewire {
                    let conn = graph
                        .connection(id)
                        .ok_or_else(|| CoreError::UnknownConnection(id.clone()))?;
                    if &conn.target != target {
                        return Err(CoreError::invalid_connection(
                            id,
                            format!("does not point at {}", target),
                        ));
                    }
                    if !seen.insert(id) {
                        return Err(CoreError::DuplicateConnection(id.clone()));
                    }
                }
                Ok(())
            }
        }
    }

    /// Validates, then applies. On error the graph is unchanged.
    pub fn apply(self, graph: &mut ArchitectureGraph) -> Result<(), CoreError> {
        self.validate(graph)?;
        match self {
            GraphMutation::AddComponent(component) => graph.insert_component(component),
            GraphMutation::RemoveComponent(id) => graph.remove_component(&id).map(|_| ()),
            GraphMutation::MoveComponent {
                component,
                position,
            } => {
                let c = graph
                    .component_mut(&component)
                    .ok_or(CoreError::UnknownComponent(component))?;
                c.position = position;
                Ok(())
            }
            GraphMutation::SetCapacity {
                component,
                capacity,
            } => {
                let c = graph
                    .component_mut(&component)
                    .ok_or(CoreError::UnknownComponent(component))?;
                c.capacity = capacity;
                Ok(())
            }
            GraphMutation::SetReliability {
                component,
                reliability,
            } => {
                let c = graph
                    .component_mut(&component)
                    .ok_or(CoreError::UnknownComponent(component))?;
                c.reliability = reliability;
                Ok(())
            }
            GraphMutation::AddConnection(connection) => graph.insert_connection(connection),
            GraphMutation::RemoveConnection(id) => graph.remove_connection(&id).map(|_| ()),
            GraphMutation::InsertInFront {
                component,
                target,
                rewire,
                protocol,
            } => {
                let inserted = component.id.clone();
                graph.insert_component(component)?;
                for id in &rewire {
                    if let Some(conn) = graph.connection_mut(id) {
                        conn.target = inserted.clone();
                    }
                }
                let link_id = graph.unique_connection_id(&format!("{}->{}", inserted, target));
                graph.insert_connection(
                    Connection::new(link_id, inserted, target).with_protocol(protocol),
                )
            }
        }
    }
}

fn require_component(graph: &ArchitectureGraph, id: &ComponentId) -> Result<(), CoreError> {
    if graph.contains(id) {
        Ok(())
    } else {
        Err(CoreError::UnknownComponent(id.clone()))
    }
}

fn check_new_component(graph: &ArchitectureGraph, component: &Component) -> Result<(), CoreError> {
    if graph.contains(&component.id) {
        return Err(CoreError::DuplicateComponent(component.id.clone()));
    }
    check_capacity(&component.id, &component.capacity)
}

fn check_capacity(id: &ComponentId, capacity: &CapacityConfig) -> Result<(), CoreError> {
    let valid = |v: f64| v.is_finite() && v >= 0.0;
    if valid(capacity.max_rps_per_instance) && valid(capacity.cost_per_hour) {
        Ok(())
    } else {
        Err(CoreError::InvalidCapacity(id.clone()))
    }
}

// =============================================================================
// OWNER
// =============================================================================

/// Owns the editable canvas: graph, view and traffic level.
pub struct GraphOwner {
    graph: ArchitectureGraph,
    view: ViewState,
    traffic_level: f64,
    revision: u64,
    sync: Box<dyn SnapshotSync<CanvasSnapshot>>,
}

impl std::fmt::Debug for GraphOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphOwner")
            .field("components", &self.graph.component_count())
            .field("connections", &self.graph.connection_count())
            .field("traffic_level", &self.traffic_level)
            .field("revision", &self.revision)
            .field("sync", &self.sync.name())
            .finish()
    }
}

impl GraphOwner {
    /// Owner without persistence.
    pub fn new(graph: ArchitectureGraph) -> Self {
        Self::with_sync(graph, Box::new(NullSync))
    }

    pub fn with_sync(graph: ArchitectureGraph, sync: Box<dyn SnapshotSync<CanvasSnapshot>>) -> Self {
        Self {
            graph,
            view: ViewState::default(),
            traffic_level: 1.0,
            revision: 0,
            sync,
        }
    }

    /// Restores the last persisted snapshot, or starts empty.
    ///
    /// Dangling connections in the stored graph are kept.
    pub fn restore(sync: Box<dyn SnapshotSync<CanvasSnapshot>>) -> Result<Self, CoreError> {
        let stored = sync.load()?;
        let mut owner = Self::with_sync(ArchitectureGraph::new(), sync);
        if let Some(snapshot) = stored {
            debug!(
                "Restored canvas from {} ({} components)",
                owner.sync.name(),
                snapshot.graph.component_count()
            );
            owner.graph = snapshot.graph;
            owner.view = snapshot.view;
            owner.traffic_level = snapshot.traffic_level.clamp(0.0, 1.0);
        }
        Ok(owner)
    }

    pub fn graph(&self) -> &ArchitectureGraph {
        &self.graph
    }

    pub fn view(&self) -> ViewState {
        self.view
    }

    pub fn traffic_level(&self) -> f64 {
        self.traffic_level
    }

    /// Incremented on every successful change.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Applies one mutation; returns the new revision.
    pub fn apply(&mut self, mutation: GraphMutation) -> Result<u64, CoreError> {
        let label = mutation.label();
        mutation.apply(&mut self.graph)?;
        debug!("Graph mutation: {}", label);
        Ok(self.bump())
    }

    /// Swaps the whole graph (loading a design).
    pub fn replace_graph(&mut self, graph: ArchitectureGraph) -> u64 {
        self.graph = graph;
        self.bump()
    }

    pub fn set_traffic_level(&mut self, level: f64) -> Result<u64, CoreError> {
        if !(0.0..=1.0).contains(&level) {
            return Err(CoreError::InvalidTrafficLevel(level));
        }
        self.traffic_level = level;
        Ok(self.bump())
    }

    pub fn set_view(&mut self, view: ViewState) -> u64 {
        self.view = view;
        self.bump()
    }

    pub fn snapshot(&self) -> CanvasSnapshot {
        CanvasSnapshot {
            graph: self.graph.clone(),
            view: self.view,
            traffic_level: self.traffic_level,
        }
    }

    fn bump(&mut self) -> u64 {
        self.revision += 1;
        if let Err(e) = self.sync.persist(&self.snapshot()) {
            warn!("Failed to persist canvas via {}: {}", self.sync.name(), e);
        }
        self.revision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ComponentKind, ReplicationMode};
    use archsim_env::{EnvError, InMemorySync};
    use std::sync::Arc;

    fn graph() -> ArchitectureGraph {
        ArchitectureGraph::new()
            .with_component(Component::new("app", ComponentKind::AppServer))
            .with_component(Component::new("db", ComponentKind::Database))
            .connect("app", "db")
    }

    #[test]
    fn test_insert_in_front_rewires() {
        let mut g = graph();
        GraphMutation::InsertInFront {
            component: Component::new("cache", ComponentKind::Cache),
            target: ComponentId::new("db"),
            rewire: vec![ConnectionId::new("app->db")],
            protocol: Protocol::Tcp,
        }
        .apply(&mut g)
        .unwrap();

        let rewired = g.connection(&ConnectionId::new("app->db")).unwrap();
        assert_eq!(rewired.target, ComponentId::new("cache"));
        let link = g.connection(&ConnectionId::new("cache->db")).unwrap();
        assert_eq!(link.protocol, Protocol::Tcp);
        assert_eq!(g.connection_count(), 2);
    }

    #[test]
    fn test_failed_mutation_leaves_graph_unchanged() {
        let mut g = graph();
        let before = g.clone();
        let err = GraphMutation::InsertInFront {
            component: Component::new("lb", ComponentKind::LoadBalancer),
            target: ComponentId::new("app"),
            // points at db, not app
            rewire: vec![ConnectionId::new("app->db")],
            protocol: Protocol::Http,
        }
        .apply(&mut g)
        .unwrap_err();

        assert!(matches!(err, CoreError::InvalidConnection { .. }));
        assert_eq!(g, before);
    }

    #[test]
    fn test_owner_persists_each_revision() {
        let sync = Arc::new(InMemorySync::<CanvasSnapshot>::new());
        let mut owner = GraphOwner::with_sync(graph(), Box::new(Arc::clone(&sync)));

        owner
            .apply(GraphMutation::MoveComponent {
                component: ComponentId::new("app"),
                position: Position { x: 10.0, y: 20.0 },
            })
            .unwrap();
        owner.set_traffic_level(0.25).unwrap();

        assert_eq!(owner.revision(), 2);
        assert_eq!(sync.write_count(), 2);

        let restored = GraphOwner::restore(Box::new(Arc::clone(&sync))).unwrap();
        assert_eq!(restored.graph(), owner.graph());
        assert_eq!(restored.traffic_level(), 0.25);
    }

    #[test]
    fn test_rejected_traffic_level() {
        let mut owner = GraphOwner::new(graph());
        assert!(owner.set_traffic_level(1.5).is_err());
        assert_eq!(owner.revision(), 0);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut owner = GraphOwner::new(
            graph().with_component(
                Component::new("replica", ComponentKind::Database)
                    .with_replication(3, ReplicationMode::Leaderless)
                    .with_quorum(2, 2)
                    .with_regions(&["us-east", "eu-west"])
                    .at(100.0, 50.0),
            ),
        );
        owner.set_view(ViewState {
            pan_x: -40.0,
            pan_y: 12.5,
            zoom: 1.75,
        });

        let snapshot = owner.snapshot();
        let json = snapshot.to_json().unwrap();
        assert_eq!(CanvasSnapshot::from_json(&json).unwrap(), snapshot);
    }

    struct FailingSync;

    impl SnapshotSync<CanvasSnapshot> for FailingSync {
        fn persist(&self, _: &CanvasSnapshot) -> Result<(), EnvError> {
            Err(EnvError::sync("disk full"))
        }

        fn load(&self) -> Result<Option<CanvasSnapshot>, EnvError> {
            Ok(None)
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    #[test]
    fn test_sync_failure_does_not_roll_back() {
        let mut owner = GraphOwner::with_sync(graph(), Box::new(FailingSync));
        owner
            .apply(GraphMutation::RemoveComponent(ComponentId::new("db")))
            .unwrap();
        assert_eq!(owner.graph().component_count(), 1);
    }
}
