//! Pluggable persistence/sync strategy for editor-owned snapshots.

use crate::error::EnvError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Strategy used by a state owner to persist and restore its snapshot.
///
/// The graph owner is composed with one of these instead of being
/// specialised per backend. Implementations must not block for long:
/// `persist` is called between ticks.
///
/// # Implementations
///
/// - `InMemorySync`: keeps the latest snapshot (tests, embedded editors)
/// - `NullSync`: discards everything
pub trait SnapshotSync<S>: Send + Sync {
    /// Stores the latest snapshot.
    fn persist(&self, snapshot: &S) -> Result<(), EnvError>;
    
    /// Returns the last stored snapshot, if any.
    fn load(&self) -> Result<Option<S>, EnvError>;
    
    /// Short name for logs.
    fn name(&self) -> &'static str;
}

impl<S, T> SnapshotSync<S> for Arc<T>
where
    T: SnapshotSync<S> + ?Sized,
{
    fn persist(&self, snapshot: &S) -> Result<(), EnvError> {
        (**self).persist(snapshot)
    }
    
    fn load(&self) -> Result<Option<S>, EnvError> {
        (**self).load()
    }
    
    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// Keeps the most recent snapshot in memory.
pub struct InMemorySync<S> {
    slot: Mutex<Option<S>>,
    writes: AtomicU64,
}

impl<S> InMemorySync<S> {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            writes: AtomicU64::new(0),
        }
    }
    
    /// Number of successful `persist` calls.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

impl<S> Default for InMemorySync<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Clone + Send> SnapshotSync<S> for InMemorySync<S> {
    fn persist(&self, snapshot: &S) -> Result<(), EnvError> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| EnvError::sync("in-memory slot poisoned"))?;
        *slot = Some(snapshot.clone());
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
    
    fn load(&self) -> Result<Option<S>, EnvError> {
        let slot = self
            .slot
            .lock()
            .map_err(|_| EnvError::sync("in-memory slot poisoned"))?;
        Ok(slot.clone())
    }
    
    fn name(&self) -> &'static str {
        "in-memory"
    }
}

/// Discards snapshots.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSync;

impl<S> SnapshotSync<S> for NullSync {
    fn persist(&self, _snapshot: &S) -> Result<(), EnvError> {
        Ok(())
    }
    
    fn load(&self) -> Result<Option<S>, EnvError> {
        Ok(None)
    }
    
    fn name(&self) -> &'static str {
        "null"
    }
}
