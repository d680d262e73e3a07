//! Architecture Sandbox Environment Abstraction Layer
//!
//! This crate lets the simulation engine run against a **wall clock**
//! (tokio) in production and a **virtual clock** in tests and scripted
//! scenario runs.
//!
//! # Core Concept
//!
//! The engine itself never reads the time or draws random numbers. The
//! scheduler asks an `EngineContext` for:
//! - Time (`now()`, `sleep()`)
//! - Randomness (`derive_rng()`), used only by scripted chaos triggers
//!
//! Editor-owned state is persisted through a `SnapshotSync` strategy so the
//! graph owner stays independent of any storage backend.
//!
//! # Example
//!
//! ```ignore
//! use archsim_env::{EngineContext, TickCadence};
//!
//! async fn drive<Ctx: EngineContext>(ctx: &Ctx, cadence: TickCadence) {
//!     loop {
//!         ctx.sleep(cadence.wall_interval).await;
//!         world.advance(cadence.wall_interval);
//!     }
//! }
//! ```

mod context;
mod error;
mod sync;
mod tokio_impl;
mod types;

pub use context::EngineContext;
pub use error::EnvError;
pub use sync::{InMemorySync, NullSync, SnapshotSync};
pub use tokio_impl::TokioContext;
pub use types::{Speed, TickCadence, DEFAULT_TICK_INTERVAL, MAX_SPEED};
