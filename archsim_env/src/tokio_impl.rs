//! Wall-clock `EngineContext` for the interactive editor.

use crate::EngineContext;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Real time from a monotonic `Instant`, OS entropy for randomness.
#[derive(Debug)]
pub struct TokioContext {
    epoch: Instant,
}

impl TokioContext {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for TokioContext {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EngineContext for TokioContext {
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }
    
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
    
    fn spawn<F>(&self, _name: &str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(future);
    }
    
    fn derive_rng(&self, _stream: u64) -> StdRng {
        StdRng::from_entropy()
    }
    
    /// Wall-clock runs are not replayable.
    fn seed(&self) -> u64 {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    
    #[tokio::test]
    async fn test_sleep_covers_one_tick() {
        let ctx = TokioContext::shared();
        let before = ctx.now();
        ctx.sleep(crate::DEFAULT_TICK_INTERVAL).await;
        assert!(ctx.now() - before >= crate::DEFAULT_TICK_INTERVAL);
    }
    
    #[test]
    fn test_tokio_context_rng_is_unseeded() {
        let ctx = TokioContext::new();
        let a: u64 = ctx.derive_rng(1).gen();
        let b: u64 = ctx.derive_rng(1).gen();
        
        // Two entropy draws colliding on 64 bits would be a broken OS RNG
        assert_ne!(a, b);
        assert_eq!(ctx.seed(), 0);
    }
}
