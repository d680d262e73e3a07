//! Metrics Aggregator
//! ==================
//!
//! Per-tick component and connection metrics, plus the store that holds the
//! latest snapshot. The propagation step is the single writer; the failure
//! detector and any observer only ever see a complete, immutable snapshot.

use crate::model::{ComponentId, ConnectionId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// Default number of tick summaries kept for trend display.
pub const DEFAULT_HISTORY_LEN: usize = 600;

/// Metrics calculated for each component during a tick
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ComponentMetrics {
    /// Inbound requests per second
    pub rps: f64,
    /// Effective capacity (may be infinite for clients)
    pub capacity_rps: f64,
    /// rps / capacity, unbounded above 1 to signal overload
    pub utilization: f64,
    /// Response latency seen by a caller, including downstream calls
    pub latency_ms: f64,
    /// Latency spent in this component alone
    pub own_latency_ms: f64,
    /// Fraction of requests failing, in [0, 1]
    pub error_rate: f64,
    pub hourly_cost: f64,
    /// Capacity is zero (crashed or no instances)
    pub down: bool,
    /// Down because of an injected crash
    #[serde(default)]
    pub crashed: bool,
}

impl ComponentMetrics {
    pub fn is_overloaded(&self) -> bool {
        self.utilization > 1.0
    }
}

/// Metrics for one connection during a tick
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    /// Requests per second crossing the link
    pub flow_rps: f64,
    /// Hop latency including chaos-added delay
    pub latency_ms: f64,
    /// Severed by a partition
    pub broken: bool,
    /// Traffic that would have crossed the link had it not been broken
    pub blocked_rps: f64,
    /// An endpoint is missing from the graph
    pub dangling: bool,
}

/// Complete result of one propagation step.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Tick counter since the last reset
    pub tick: u64,
    /// Simulated time at which the snapshot was taken
    pub time: Duration,
    /// Demand injected at entry points, chaos included
    pub total_demand_rps: f64,
    pub components: BTreeMap<ComponentId, ComponentMetrics>,
    pub connections: BTreeMap<ConnectionId, ConnectionMetrics>,
    pub entry_points: Vec<ComponentId>,
}

impl MetricsSnapshot {
    pub fn component(&self, id: &ComponentId) -> Option<&ComponentMetrics> {
        self.components.get(id)
    }

    pub fn connection(&self, id: &ConnectionId) -> Option<&ConnectionMetrics> {
        self.connections.get(id)
    }

    /// Highest finite utilization; infinite if a down component has load.
    pub fn peak_utilization(&self) -> f64 {
        self.components
            .values()
            .map(|m| m.utilization)
            .fold(0.0, f64::max)
    }

    /// Error rate averaged over components that carry traffic.
    pub fn mean_error_rate(&self) -> f64 {
        let loaded: Vec<f64> = self
            .components
            .values()
            .filter(|m| m.rps > 0.0)
            .map(|m| m.error_rate)
            .collect();
        if loaded.is_empty() {
            0.0
        } else {
            loaded.iter().sum::<f64>() / loaded.len() as f64
        }
    }

    pub fn hourly_cost(&self) -> f64 {
        self.components.values().map(|m| m.hourly_cost).sum()
    }

    /// Worst latency seen at an entry point.
    pub fn entry_latency_ms(&self) -> f64 {
        self.entry_points
            .iter()
            .filter_map(|id| self.components.get(id))
            .map(|m| m.latency_ms)
            .fold(0.0, f64::max)
    }

    pub fn summary(&self) -> TickSummary {
        TickSummary {
            tick: self.tick,
            time: self.time,
            total_demand_rps: self.total_demand_rps,
            peak_utilization: self.peak_utilization(),
            mean_error_rate: self.mean_error_rate(),
            entry_latency_ms: self.entry_latency_ms(),
            hourly_cost: self.hourly_cost(),
        }
    }
}

/// Compact per-tick record kept in the history ring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickSummary {
    pub tick: u64,
    pub time: Duration,
    pub total_demand_rps: f64,
    pub peak_utilization: f64,
    pub mean_error_rate: f64,
    pub entry_latency_ms: f64,
    pub hourly_cost: f64,
}

/// Latest snapshot plus a bounded history of summaries.
#[derive(Debug, Clone)]
pub struct MetricsStore {
    latest: Arc<MetricsSnapshot>,
    history: VecDeque<TickSummary>,
    capacity: usize,
}

impl Default for MetricsStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LEN)
    }
}

impl MetricsStore {
    pub fn new(history_len: usize) -> Self {
        Self {
            latest: Arc::new(MetricsSnapshot::default()),
            history: VecDeque::with_capacity(history_len.min(4096)),
            capacity: history_len,
        }
    }

    /// Replaces the latest snapshot wholesale.
    pub fn publish(&mut self, snapshot: MetricsSnapshot) -> Arc<MetricsSnapshot> {
        if self.capacity > 0 {
            if self.history.len() == self.capacity {
                self.history.pop_front();
            }
            self.history.push_back(snapshot.summary());
        }
        self.latest = Arc::new(snapshot);
        Arc::clone(&self.latest)
    }

    /// Immutable view of the last published tick.
    pub fn snapshot(&self) -> Arc<MetricsSnapshot> {
        Arc::clone(&self.latest)
    }

    pub fn history(&self) -> impl Iterator<Item = &TickSummary> {
        self.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Drops the snapshot and the history.
    pub fn clear(&mut self) {
        self.latest = Arc::new(MetricsSnapshot::default());
        self.history.clear();
    }
}
