//! Virtual-clock context for scenario runs and scheduler tests.

use archsim_env::EngineContext;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Mixes the master seed before the stream id is folded in.
const STREAM_MIX: u64 = 0x517c_c1b7_2722_0a95;

/// Engine context whose clock moves only when told to.
///
/// Clones share the clock, so a scheduler task and the test driving it
/// agree on the simulated time.
#[derive(Debug, Clone)]
pub struct SimContext {
    seed: u64,

    /// Nanoseconds since the run began
    clock_ns: Arc<AtomicU64>,
}

impl SimContext {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            clock_ns: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn shared(seed: u64) -> Arc<Self> {
        Arc::new(Self::new(seed))
    }

    /// Moves the clock forward; saturates instead of wrapping.
    pub fn advance_time(&self, by: Duration) {
        let nanos = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
        let _ = self
            .clock_ns
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |t| Some(t.saturating_add(nanos)));
    }

    /// Rewinds or jumps the clock.
    pub fn set_time(&self, time_ns: u64) {
        self.clock_ns.store(time_ns, Ordering::SeqCst);
    }

    pub fn time_ns(&self) -> u64 {
        self.clock_ns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EngineContext for SimContext {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.time_ns())
    }

    async fn sleep(&self, duration: Duration) {
        self.advance_time(duration);
        // let queued commands reach the scheduler before its next tick
        tokio::task::yield_now().await;
    }

    fn spawn<F>(&self, _name: &str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(future);
    }

    fn derive_rng(&self, stream: u64) -> StdRng {
        StdRng::seed_from_u64(self.seed.wrapping_mul(STREAM_MIX) ^ stream)
    }

    fn seed(&self) -> u64 {
        self.seed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_clock_moves_only_when_advanced() {
        let ctx = SimContext::new(42);
        assert_eq!(ctx.now(), Duration::ZERO);

        ctx.advance_time(Duration::from_millis(16));
        ctx.advance_time(Duration::from_millis(16));
        assert_eq!(ctx.now(), Duration::from_millis(32));

        ctx.set_time(0);
        assert_eq!(ctx.time_ns(), 0);

        ctx.set_time(u64::MAX - 1);
        ctx.advance_time(Duration::from_secs(1));
        assert_eq!(ctx.time_ns(), u64::MAX);
    }

    #[test]
    fn test_rng_streams_follow_the_seed() {
        let draw = |seed: u64, stream: u64| -> u64 { SimContext::new(seed).derive_rng(stream).gen() };

        assert_eq!(draw(42, 7), draw(42, 7));
        assert_ne!(draw(42, 7), draw(42, 8));
        assert_ne!(draw(42, 7), draw(43, 7));
    }

    #[test]
    fn test_clones_share_the_clock() {
        let driver = SimContext::new(9);
        let scheduler = driver.clone();

        driver.advance_time(Duration::from_secs(5));

        assert_eq!(scheduler.now(), Duration::from_secs(5));
        assert_eq!(scheduler.seed(), 9);
    }

    #[tokio::test]
    async fn test_sleep_advances_virtual_time() {
        let ctx = SimContext::new(1);
        ctx.sleep(Duration::from_millis(16)).await;
        ctx.sleep(Duration::from_millis(16)).await;
        assert_eq!(ctx.now(), Duration::from_millis(32));
    }
}
