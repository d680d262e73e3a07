//! Architecture Sandbox Core - simulation and validation of system designs
//!
//! Takes a user-built architecture graph and answers two questions:
//! 1. **What happens under load?** Traffic propagation per tick, with chaos
//!    events perturbing capacity and connectivity, and a failure detector
//!    watching the resulting metrics
//! 2. **Does the design meet the brief?** A static validator scoring the
//!    graph against a problem's capacity, cost and availability targets
//!
//! Everything here is synchronous and deterministic. Time is passed in by
//! the caller; the scheduler lives in `archsim_sim`.

pub mod capacity;
pub mod chaos;
pub mod error;
pub mod failure;
pub mod fix;
pub mod metrics;
pub mod model;
pub mod owner;
pub mod problem;
pub mod propagation;
pub mod validation;

// Re-export key types for convenience
pub use capacity::{capacity, Capacity, ChaosModifiers, ConnectionModifiers};
pub use chaos::{ChaosEvent, ChaosId, ChaosInjector, ChaosKind, ChaosStatus, ChaosTag, ChaosTarget};
pub use error::CoreError;
pub use failure::{DetectorPolicy, FailureDetector, FailureEvent, FailureId, FailureKind, FailureState};
pub use fix::{plan_fix, FixKind, FixPlan};
pub use metrics::{ComponentMetrics, ConnectionMetrics, MetricsSnapshot, MetricsStore, TickSummary};
pub use model::{
    ArchitectureGraph, Component, ComponentId, ComponentKind, Connection, ConnectionId, Protocol,
};
pub use owner::{CanvasSnapshot, GraphMutation, GraphOwner, ViewState};
pub use problem::Problem;
pub use propagation::{propagate, Flow, PropagationPolicy, TickInput};
pub use validation::{validate, IssueSeverity, ValidationIssue, ValidationResult, ValidatorPolicy};
