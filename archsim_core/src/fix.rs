//! Fix Applier - maps a remedial action onto one graph mutation.
//!
//! The applier only plans. The graph owner applies the mutation; crash
//! recovery is carried out by whoever owns the chaos state.

use crate::error::CoreError;
use crate::failure::{FailureDetector, FailureKind};
use crate::model::{ArchitectureGraph, Component, ComponentId, ComponentKind, Protocol, Replication};
use crate::owner::GraphMutation;
use serde::{Deserialize, Serialize};

/// Remedial actions a user can pick from a failure card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixKind {
    /// One more instance
    AddRedundancy,
    /// Doubles per-instance throughput (and cost)
    ScaleUp,
    /// Cache in front of a data store
    AddCache,
    /// Load balancer in front of a component
    AddLoadBalancer,
    EnableReplication,
    /// Clears a crash
    Recover,
}

impl FixKind {
    pub fn all() -> &'static [FixKind] {
        &[
            FixKind::AddRedundancy,
            FixKind::ScaleUp,
            FixKind::AddCache,
            FixKind::AddLoadBalancer,
            FixKind::EnableReplication,
            FixKind::Recover,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            FixKind::AddRedundancy => "add_redundancy",
            FixKind::ScaleUp => "scale_up",
            FixKind::AddCache => "add_cache",
            FixKind::AddLoadBalancer => "add_load_balancer",
            FixKind::EnableReplication => "enable_replication",
            FixKind::Recover => "recover",
        }
    }
}

impl std::fmt::Display for FixKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for FixKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FixKind::all()
            .iter()
            .find(|k| k.name() == s)
            .copied()
            .ok_or_else(|| format!("unknown fix '{}'", s))
    }
}

/// The planned effect of a fix.
#[derive(Debug, Clone, PartialEq)]
pub enum FixPlan {
    Mutate(GraphMutation),
    /// Remove the crash on this component
    Recover(ComponentId),
}

/// Horizontal offset of inserted components on the canvas.
const INSERT_OFFSET_X: f64 = 160.0;

/// Plans `kind` for `component`, checking its preconditions against the
/// current graph and failure set.
pub fn plan_fix(
    kind: FixKind,
    component: &ComponentId,
    graph: &ArchitectureGraph,
    failures: &FailureDetector,
) -> Result<FixPlan, CoreError> {
    let target = graph
        .component(component)
        .ok_or_else(|| CoreError::UnknownComponent(component.clone()))?;
    let not_applicable = |reason: &str| CoreError::fix_not_applicable(kind, component, reason);

    if kind != FixKind::Recover && target.kind.is_entry_point() {
        return Err(not_applicable("clients are demand sources"));
    }

    match kind {
        FixKind::AddRedundancy => {
            let mut capacity = target.capacity.clone();
            capacity.instances = capacity.instances.saturating_add(1);
            Ok(FixPlan::Mutate(GraphMutation::SetCapacity {
                component: component.clone(),
                capacity,
            }))
        }
        FixKind::ScaleUp => {
            let mut capacity = target.capacity.clone();
            capacity.max_rps_per_instance *= 2.0;
            capacity.cost_per_hour *= 2.0;
            Ok(FixPlan::Mutate(GraphMutation::SetCapacity {
                component: component.clone(),
                capacity,
            }))
        }
        FixKind::AddCache => {
            if !target.kind.is_backing_store() {
                return Err(not_applicable("caches go in front of data stores"));
            }
            if graph.is_fronted_by_cache(component) {
                return Err(not_applicable("already behind a cache"));
            }
            // Only the first caller (by connection id) is rewired
            let Some(first) = graph.incoming(component).next() else {
                return Err(not_applicable("nothing calls this component"));
            };
            let cache = Component::new(graph.unique_component_id("cache"), ComponentKind::Cache)
                .at(target.position.x - INSERT_OFFSET_X, target.position.y);
            Ok(FixPlan::Mutate(GraphMutation::InsertInFront {
                component: cache,
                target: component.clone(),
                rewire: vec![first.id.clone()],
                protocol: Protocol::Tcp,
            }))
        }
        FixKind::AddLoadBalancer => {
            if target.kind == ComponentKind::LoadBalancer {
                return Err(not_applicable("already a load balancer"));
            }
            let rewire: Vec<_> = graph.incoming(component).map(|c| c.id.clone()).collect();
            if rewire.is_empty() {
                return Err(not_applicable("nothing calls this component"));
            }
            let lb = Component::new(graph.unique_component_id("lb"), ComponentKind::LoadBalancer)
                .at(target.position.x - INSERT_OFFSET_X, target.position.y);
            Ok(FixPlan::Mutate(GraphMutation::InsertInFront {
                component: lb,
                target: component.clone(),
                rewire,
                protocol: Protocol::Http,
            }))
        }
        FixKind::EnableReplication => {
            if !target.kind.is_database() {
                return Err(not_applicable("only databases replicate"));
            }
            let current = &target.reliability.replication;
            if current.enabled && current.factor >= 2 {
                return Err(not_applicable("replication already enabled"));
            }
            let mut reliability = target.reliability.clone();
            reliability.replication = Replication {
                enabled: true,
                factor: current.factor.max(2),
                mode: current.mode,
            };
            Ok(FixPlan::Mutate(GraphMutation::SetReliability {
                component: component.clone(),
                reliability,
            }))
        }
        FixKind::Recover => {
            if !failures.has_active(component, FailureKind::ChaosOutage) {
                return Err(not_applicable("no active outage"));
            }
            Ok(FixPlan::Recover(component.clone()))
        }
    }
}
