//! The Architecture Graph - components, connections and their configuration.
//!
//! The graph is owned by the editor (see `owner`). The engine only ever
//! reads a snapshot of it during a tick.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Hours used to turn hourly cost into a monthly figure.
pub const HOURS_PER_MONTH: f64 = 730.0;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Stable, user-visible component identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentId(pub String);

impl ComponentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ComponentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ComponentId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Stable connection identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

// =============================================================================
// COMPONENT KINDS
// =============================================================================

/// Closed set of infrastructure building blocks.
///
/// Engine-relevant only: labels and icons belong to the UI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    Client,
    LoadBalancer,
    ApiGateway,
    AppServer,
    Cache,
    /// Relational database
    Database,
    KeyValueStore,
    DocumentStore,
    WideColumnStore,
    GraphDatabase,
    TimeSeriesDatabase,
    SearchIndex,
    Queue,
    PubSub,
    Stream,
    ObjectStore,
    Cdn,
    Dns,
    Serverless,
    Worker,
}

/// Coarse grouping used for family-compatible matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KindFamily {
    EntryPoint,
    Edge,
    Compute,
    Cache,
    Database,
    Messaging,
    Storage,
}

/// Per-kind defaults applied when a component is created.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KindDefaults {
    pub max_rps_per_instance: f64,
    pub base_latency_ms: f64,
    pub cost_per_hour: f64,
    pub cache_hit_rate: Option<f64>,
    pub base_error_rate: f64,
}

impl ComponentKind {
    /// Every kind, in declaration order.
    pub fn all() -> &'static [ComponentKind] {
        use ComponentKind::*;
        &[
            Client, LoadBalancer, ApiGateway, AppServer, Cache, Database,
            KeyValueStore, DocumentStore, WideColumnStore, GraphDatabase,
            TimeSeriesDatabase, SearchIndex, Queue, PubSub, Stream,
            ObjectStore, Cdn, Dns, Serverless, Worker,
        ]
    }

    /// Snake-case identifier (matches the serde representation).
    pub fn name(&self) -> &'static str {
        match self {
            ComponentKind::Client => "client",
            ComponentKind::LoadBalancer => "load_balancer",
            ComponentKind::ApiGateway => "api_gateway",
            ComponentKind::AppServer => "app_server",
            ComponentKind::Cache => "cache",
            ComponentKind::Database => "database",
            ComponentKind::KeyValueStore => "key_value_store",
            ComponentKind::DocumentStore => "document_store",
            ComponentKind::WideColumnStore => "wide_column_store",
            ComponentKind::GraphDatabase => "graph_database",
            ComponentKind::TimeSeriesDatabase => "time_series_database",
            ComponentKind::SearchIndex => "search_index",
            ComponentKind::Queue => "queue",
            ComponentKind::PubSub => "pub_sub",
            ComponentKind::Stream => "stream",
            ComponentKind::ObjectStore => "object_store",
            ComponentKind::Cdn => "cdn",
            ComponentKind::Dns => "dns",
            ComponentKind::Serverless => "serverless",
            ComponentKind::Worker => "worker",
        }
    }

    pub fn family(&self) -> KindFamily {
        use ComponentKind::*;
        match self {
            Client => KindFamily::EntryPoint,
            LoadBalancer | ApiGateway | Cdn | Dns => KindFamily::Edge,
            AppServer | Serverless | Worker => KindFamily::Compute,
            Cache => KindFamily::Cache,
            Database | KeyValueStore | DocumentStore | WideColumnStore
            | GraphDatabase | TimeSeriesDatabase | SearchIndex => KindFamily::Database,
            Queue | PubSub | Stream => KindFamily::Messaging,
            ObjectStore => KindFamily::Storage,
        }
    }

    pub fn is_entry_point(&self) -> bool {
        matches!(self, ComponentKind::Client)
    }

    pub fn is_database(&self) -> bool {
        self.family() == KindFamily::Database
    }

    /// Kinds affected by a backing-store slowdown.
    pub fn is_backing_store(&self) -> bool {
        self.is_database() || matches!(self, ComponentKind::ObjectStore)
    }

    /// Request-serving compute tier.
    pub fn is_compute(&self) -> bool {
        matches!(self, ComponentKind::AppServer | ComponentKind::Serverless)
    }

    /// Kinds that split their traffic across targets instead of calling
    /// every target.
    pub fn distributes_load(&self) -> bool {
        matches!(
            self,
            ComponentKind::LoadBalancer
                | ComponentKind::ApiGateway
                | ComponentKind::Dns
                | ComponentKind::Queue
        )
    }

    /// Provider-managed kinds that are redundant without user action.
    pub fn is_managed(&self) -> bool {
        matches!(
            self,
            ComponentKind::Dns
                | ComponentKind::Cdn
                | ComponentKind::ObjectStore
                | ComponentKind::Serverless
        )
    }

    /// True if `self` can stand in for `required`: same kind, or both in
    /// the database family.
    pub fn satisfies(&self, required: ComponentKind) -> bool {
        *self == required || (self.is_database() && required.is_database())
    }

    pub fn defaults(&self) -> KindDefaults {
        use ComponentKind::*;
        let (rps, latency, cost, hit, err) = match self {
            Client => (0.0, 0.0, 0.0, None, 0.0),
            LoadBalancer => (50_000.0, 1.0, 0.025, None, 0.0),
            ApiGateway => (10_000.0, 5.0, 0.05, None, 0.0),
            AppServer => (1_000.0, 20.0, 0.10, None, 0.0),
            Cache => (100_000.0, 1.0, 0.07, Some(0.8), 0.0),
            Database => (1_000.0, 10.0, 0.25, None, 0.0),
            KeyValueStore => (20_000.0, 2.0, 0.20, None, 0.0),
            DocumentStore => (5_000.0, 8.0, 0.22, None, 0.0),
            WideColumnStore => (15_000.0, 6.0, 0.30, None, 0.0),
            GraphDatabase => (2_000.0, 15.0, 0.35, None, 0.0),
            TimeSeriesDatabase => (10_000.0, 5.0, 0.25, None, 0.0),
            SearchIndex => (2_000.0, 25.0, 0.30, None, 0.0),
            Queue => (20_000.0, 5.0, 0.05, None, 0.0),
            PubSub => (30_000.0, 5.0, 0.06, None, 0.0),
            Stream => (50_000.0, 10.0, 0.15, None, 0.0),
            ObjectStore => (5_000.0, 50.0, 0.023, None, 0.0),
            Cdn => (100_000.0, 5.0, 0.08, Some(0.6), 0.0),
            Dns => (100_000.0, 1.0, 0.01, None, 0.0),
            // cold starts
            Serverless => (1_000.0, 50.0, 0.02, None, 0.001),
            Worker => (500.0, 30.0, 0.08, None, 0.0),
        };
        KindDefaults {
            max_rps_per_instance: rps,
            base_latency_ms: latency,
            cost_per_hour: cost,
            cache_hit_rate: hit,
            base_error_rate: err,
        }
    }
}

impl std::fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// COMPONENT CONFIGURATION
// =============================================================================

/// Horizontal capacity of a component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacityConfig {
    pub instances: u32,
    pub max_rps_per_instance: f64,
    pub cost_per_hour: f64,
}

impl CapacityConfig {
    /// One instance with the kind's defaults.
    pub fn for_kind(kind: ComponentKind) -> Self {
        let defaults = kind.defaults();
        Self {
            instances: 1,
            max_rps_per_instance: defaults.max_rps_per_instance,
            cost_per_hour: defaults.cost_per_hour,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationMode {
    #[default]
    LeaderFollower,
    MultiLeader,
    Leaderless,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replication {
    pub enabled: bool,
    pub factor: u32,
    pub mode: ReplicationMode,
}

impl Default for Replication {
    fn default() -> Self {
        Self {
            enabled: false,
            factor: 1,
            mode: ReplicationMode::LeaderFollower,
        }
    }
}

/// Replica acknowledgements required per read / write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quorum {
    pub read: u32,
    pub write: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReliabilityConfig {
    #[serde(default)]
    pub replication: Replication,
    #[serde(default)]
    pub quorum: Option<Quorum>,
    #[serde(default = "default_partitions")]
    pub partitions: u32,
    #[serde(default)]
    pub regions: Vec<String>,
}

fn default_partitions() -> u32 {
    1
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            replication: Replication::default(),
            quorum: None,
            partitions: 1,
            regions: Vec::new(),
        }
    }
}

/// Canvas position (editor data, persisted with the graph).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// A node of the architecture graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub id: ComponentId,
    pub kind: ComponentKind,
    pub capacity: CapacityConfig,
    #[serde(default)]
    pub reliability: ReliabilityConfig,
    /// Overrides the kind's default hit rate (caches, CDNs)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_hit_rate: Option<f64>,
    #[serde(default)]
    pub position: Position,
}

impl Component {
    /// Creates a single-instance component with the kind's defaults.
    pub fn new(id: impl Into<ComponentId>, kind: ComponentKind) -> Self {
        Self {
            id: id.into(),
            kind,
            capacity: CapacityConfig::for_kind(kind),
            reliability: ReliabilityConfig::default(),
            cache_hit_rate: None,
            position: Position::default(),
        }
    }

    pub fn with_instances(mut self, instances: u32) -> Self {
        self.capacity.instances = instances;
        self
    }

    pub fn with_max_rps(mut self, max_rps_per_instance: f64) -> Self {
        self.capacity.max_rps_per_instance = max_rps_per_instance;
        self
    }

    pub fn with_cost_per_hour(mut self, cost_per_hour: f64) -> Self {
        self.capacity.cost_per_hour = cost_per_hour;
        self
    }

    pub fn with_replication(mut self, factor: u32, mode: ReplicationMode) -> Self {
        self.reliability.replication = Replication {
            enabled: true,
            factor,
            mode,
        };
        self
    }

    pub fn with_quorum(mut self, read: u32, write: u32) -> Self {
        self.reliability.quorum = Some(Quorum { read, write });
        self
    }

    pub fn with_regions(mut self, regions: &[&str]) -> Self {
        self.reliability.regions = regions.iter().map(|r| r.to_string()).collect();
        self
    }

    pub fn with_cache_hit_rate(mut self, hit_rate: f64) -> Self {
        self.cache_hit_rate = Some(hit_rate);
        self
    }

    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.position = Position { x, y };
        self
    }

    /// instances × per-instance throughput
    pub fn total_capacity_rps(&self) -> f64 {
        self.capacity.instances as f64 * self.capacity.max_rps_per_instance
    }

    pub fn hourly_cost(&self) -> f64 {
        self.capacity.instances as f64 * self.capacity.cost_per_hour
    }

    pub fn monthly_cost(&self) -> f64 {
        self.hourly_cost() * HOURS_PER_MONTH
    }

    /// Configured hit rate, falling back to the kind default.
    pub fn cache_hit_rate(&self) -> Option<f64> {
        self.cache_hit_rate
            .or(self.kind.defaults().cache_hit_rate)
            .map(|h| h.clamp(0.0, 1.0))
    }

    /// Number of copies serving this component: instances, or the
    /// replication factor when replication is on.
    pub fn redundancy(&self) -> u32 {
        let replicas = if self.reliability.replication.enabled {
            self.reliability.replication.factor
        } else {
            1
        };
        self.capacity.instances.max(replicas)
    }
}

// =============================================================================
// CONNECTIONS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    #[default]
    Http,
    Https,
    Grpc,
    WebSocket,
    Tcp,
    Udp,
    /// Asynchronous messaging (fire and forget)
    Async,
    /// Replication stream between data stores
    Replication,
}

impl Protocol {
    /// Fraction of offered traffic that makes it across the link.
    pub fn pass_through(&self) -> f64 {
        match self {
            Protocol::Udp => 0.99,
            _ => 1.0,
        }
    }

    /// Latency added by one hop over this protocol.
    pub fn hop_latency_ms(&self) -> f64 {
        match self {
            Protocol::Http => 1.0,
            Protocol::Https => 2.0,
            Protocol::Grpc | Protocol::WebSocket => 0.5,
            Protocol::Tcp => 0.2,
            Protocol::Udp => 0.1,
            Protocol::Async | Protocol::Replication => 0.0,
        }
    }

    /// Replication links only carry writes.
    pub fn carries_reads(&self) -> bool {
        !matches!(self, Protocol::Replication)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    OneWay,
    Bidirectional,
}

/// A directed edge. Traffic always flows source → target; `direction` is
/// editor metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub id: ConnectionId,
    pub source: ComponentId,
    pub target: ComponentId,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default)]
    pub direction: Direction,
}

impl Connection {
    pub fn new(
        id: impl Into<ConnectionId>,
        source: impl Into<ComponentId>,
        target: impl Into<ComponentId>,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            protocol: Protocol::default(),
            direction: Direction::default(),
        }
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn bidirectional(mut self) -> Self {
        self.direction = Direction::Bidirectional;
        self
    }
}

// =============================================================================
// GRAPH
// =============================================================================

/// Components and connections, keyed by id.
///
/// Ordered maps keep every traversal deterministic.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "GraphRepr", into = "GraphRepr")]
pub struct ArchitectureGraph {
    components: BTreeMap<ComponentId, Component>,
    connections: BTreeMap<ConnectionId, Connection>,
}

/// Wire form: plain lists, as the editor stores them.
#[derive(Serialize, Deserialize)]
struct GraphRepr {
    #[serde(default)]
    components: Vec<Component>,
    #[serde(default)]
    connections: Vec<Connection>,
}

impl From<GraphRepr> for ArchitectureGraph {
    // Dangling references survive loading; they are reported, not rejected.
    fn from(repr: GraphRepr) -> Self {
        Self {
            components: repr.components.into_iter().map(|c| (c.id.clone(), c)).collect(),
            connections: repr.connections.into_iter().map(|c| (c.id.clone(), c)).collect(),
        }
    }
}

impl From<ArchitectureGraph> for GraphRepr {
    fn from(graph: ArchitectureGraph) -> Self {
        Self {
            components: graph.components.into_values().collect(),
            connections: graph.connections.into_values().collect(),
        }
    }
}

impl ArchitectureGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: adds (or replaces) a component.
    pub fn with_component(mut self, component: Component) -> Self {
        self.components.insert(component.id.clone(), component);
        self
    }

    /// Builder: adds (or replaces) a connection without endpoint checks.
    pub fn with_connection(mut self, connection: Connection) -> Self {
        self.connections.insert(connection.id.clone(), connection);
        self
    }

    /// Builder: connects two components with an HTTP link named `a->b`.
    pub fn connect(self, source: &str, target: &str) -> Self {
        let id = format!("{}->{}", source, target);
        self.with_connection(Connection::new(id.as_str(), source, target))
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn component(&self, id: &ComponentId) -> Option<&Component> {
        self.components.get(id)
    }

    pub fn component_mut(&mut self, id: &ComponentId) -> Option<&mut Component> {
        self.components.get_mut(id)
    }

    pub fn connection(&self, id: &ConnectionId) -> Option<&Connection> {
        self.connections.get(id)
    }

    pub fn connection_mut(&mut self, id: &ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(id)
    }

    pub fn contains(&self, id: &ComponentId) -> bool {
        self.components.contains_key(id)
    }

    pub fn components(&self) -> impl Iterator<Item = &Component> {
        self.components.values()
    }

    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    /// Components of exactly `kind`.
    pub fn components_of_kind(&self, kind: ComponentKind) -> impl Iterator<Item = &Component> {
        self.components.values().filter(move |c| c.kind == kind)
    }

    /// True if either endpoint is missing from the graph.
    pub fn is_dangling(&self, connection: &Connection) -> bool {
        !self.contains(&connection.source) || !self.contains(&connection.target)
    }

    /// Non-dangling connections leaving `id`.
    pub fn outgoing<'a>(&'a self, id: &'a ComponentId) -> impl Iterator<Item = &'a Connection> + 'a {
        self.connections
            .values()
            .filter(move |c| &c.source == id && !self.is_dangling(c))
    }

    /// Non-dangling connections arriving at `id`.
    pub fn incoming<'a>(&'a self, id: &'a ComponentId) -> impl Iterator<Item = &'a Connection> + 'a {
        self.connections
            .values()
            .filter(move |c| &c.target == id && !self.is_dangling(c))
    }

    /// Where demand enters the system.
    ///
    /// Client components when the graph has any; otherwise every component
    /// without an incoming connection.
    pub fn entry_points(&self) -> Vec<ComponentId> {
        let clients: Vec<ComponentId> = self
            .components
            .values()
            .filter(|c| c.kind.is_entry_point())
            .map(|c| c.id.clone())
            .collect();
        if !clients.is_empty() {
            return clients;
        }

        self.components
            .keys()
            .filter(|id| self.incoming(id).next().is_none())
            .cloned()
            .collect()
    }

    /// True if a cache sits directly in front of `id`.
    pub fn is_fronted_by_cache(&self, id: &ComponentId) -> bool {
        let direct = self.incoming(id).any(|c| {
            self.component(&c.source)
                .map_or(false, |s| s.kind == ComponentKind::Cache)
        });
        // cache-aside: a caller talks to both a cache and `id`
        let aside = self.incoming(id).any(|c| {
            self.outgoing(&c.source).any(|sibling| {
                self.component(&sibling.target)
                    .map_or(false, |t| t.kind == ComponentKind::Cache)
            })
        });
        direct || aside
    }

    /// Returns `base`, or `base-2`, `base-3`... whichever is free.
    pub fn unique_component_id(&self, base: &str) -> ComponentId {
        let mut candidate = ComponentId::new(base);
        let mut n = 2;
        while self.contains(&candidate) {
            candidate = ComponentId::new(format!("{}-{}", base, n));
            n += 1;
        }
        candidate
    }

    /// Same as `unique_component_id` for connections.
    pub fn unique_connection_id(&self, base: &str) -> ConnectionId {
        let mut candidate = ConnectionId::new(base);
        let mut n = 2;
        while self.connections.contains_key(&candidate) {
            candidate = ConnectionId::new(format!("{}-{}", base, n));
            n += 1;
        }
        candidate
    }

    // -------------------------------------------------------------------------
    // Checked mutation (used by the graph owner)
    // -------------------------------------------------------------------------

    pub fn insert_component(&mut self, component: Component) -> Result<(), CoreError> {
        if self.contains(&component.id) {
            return Err(CoreError::DuplicateComponent(component.id));
        }
        self.components.insert(component.id.clone(), component);
        Ok(())
    }

    /// Removes a component and every connection touching it.
    pub fn remove_component(&mut self, id: &ComponentId) -> Result<Component, CoreError> {
        let removed = self
            .components
            .remove(id)
            .ok_or_else(|| CoreError::UnknownComponent(id.clone()))?;
        self.connections
            .retain(|_, c| &c.source != id && &c.target != id);
        Ok(removed)
    }

    pub fn insert_connection(&mut self, connection: Connection) -> Result<(), CoreError> {
        self.check_connection(&connection)?;
        self.connections.insert(connection.id.clone(), connection);
        Ok(())
    }

    /// Validates a prospective connection without inserting it.
    pub fn check_connection(&self, connection: &Connection) -> Result<(), CoreError> {
        if self.connections.contains_key(&connection.id) {
            return Err(CoreError::DuplicateConnection(connection.id.clone()));
        }
        for endpoint in [&connection.source, &connection.target] {
            if !self.contains(endpoint) {
                return Err(CoreError::invalid_connection(
                    &connection.id,
                    format!("unknown endpoint {}", endpoint),
                ));
            }
        }
        if connection.source == connection.target {
            return Err(CoreError::invalid_connection(
                &connection.id,
                "source and target are the same component",
            ));
        }
        Ok(())
    }

    pub fn remove_connection(&mut self, id: &ConnectionId) -> Result<Connection, CoreError> {
        self.connections
            .remove(id)
            .ok_or_else(|| CoreError::UnknownConnection(id.clone()))
    }
}
