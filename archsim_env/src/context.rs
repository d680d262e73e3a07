//! Core environment context trait for the simulation engine.

use async_trait::async_trait;
use rand::rngs::StdRng;
use std::future::Future;
use std::time::Duration;

/// The central interface for environment interaction.
///
/// This trait abstracts the "real world" so that the scheduler can drive
/// the engine from a wall clock in production and from a virtual clock
/// in tests and scripted scenario runs.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time`, OS entropy
/// - **Simulation**: `SimContext` - virtual clock, seeded RNG
///
/// # Determinism
///
/// All methods that would normally introduce non-determinism
/// (time, randomness) are controlled by the implementation.
#[async_trait]
pub trait EngineContext: Send + Sync + 'static {
    /// Returns the monotonic time since context creation.
    ///
    /// This is wall time. The simulated clock of the engine is derived
    /// from it by the speed multiplier.
    fn now(&self) -> Duration;
    
    /// Suspends execution for the given duration.
    ///
    /// In production: wraps `tokio::time::sleep`
    /// In simulation: advances the virtual clock
    async fn sleep(&self, duration: Duration);
    
    /// Spawns a background task.
    fn spawn<F>(&self, name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static;
    
    /// Derives an RNG for a named stream.
    ///
    /// The implementation combines the global seed with `stream` so that
    /// unrelated consumers (e.g. two chaos scripts) don't share entropy.
    fn derive_rng(&self, stream: u64) -> StdRng;
    
    /// Returns the context's seed (for logging/debugging).
    ///
    /// In production, returns 0 (not seeded).
    fn seed(&self) -> u64;
}
