//! Architecture Sandbox Simulation Harness
//!
//! Drives the `archsim_core` engine through time: a clock that ticks the
//! world at a fixed cadence, a command channel for everything the editor
//! asks of a running simulation, seeded chaos scripts, and the canned
//! scenarios used as the acceptance suite.
//!
//! # Core Principle: One Owner
//!
//! All simulation state lives in a single [`SimWorld`]. Nothing else holds
//! a reference into it:
//! - **Time**: the world's clock advances only inside `tick`/`advance`
//! - **Commands**: queued on a channel and applied between ticks
//! - **Randomness**: chaos scripts draw from one seeded RNG per run
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Scheduler task                        │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │ EngineContext (wall clock or virtual clock)          │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! │       │ sleep(16ms)              ▲ Command (mpsc)           │
//! │  ┌────▼──────────────────────────┴────┐                     │
//! │  │              SimWorld              │                     │
//! │  │ chaos ─► propagate ─► metrics ─►   │                     │
//! │  │           failure detector         │                     │
//! │  └────────────────┬───────────────────┘                     │
//! │                   │ Arc<MetricsSnapshot> (watch)            │
//! │                   ▼                                         │
//! │            SchedulerHandle readers                          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use archsim_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let runner = ScenarioRunner::new(42).with_duration(30.0)?;
//! let result = runner.run(ScenarioId::Overload);
//! assert!(result.passed);
//! ```

mod context;
pub mod exporter;
pub mod runner;
pub mod scenarios;
pub mod scheduler;
pub mod trigger;
mod world;

pub use context::SimContext;
pub use exporter::{ComponentFrame, FailureFrame, SimEvent, SimExport, SimFrame};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use scheduler::{spawn_scheduler, Command, SchedulerHandle};
pub use trigger::{ChaosScript, ChaosScriptConfig};
pub use world::{SimConfig, SimWorld};
