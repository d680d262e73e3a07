//! Tick scheduler - owns a `SimWorld` inside a task.
//!
//! Commands arrive over an mpsc channel and are drained between ticks, so
//! no tick ever observes a half-applied command. Each tick publishes the
//! new snapshot on a watch channel.
//!
//! ```text
//! SchedulerHandle ──Command──▶ [drain] ─▶ sleep(cadence) ─▶ world.advance ─▶ watch
//!        ▲                                                                    │
//!        └──────────────────────── Arc<MetricsSnapshot> ◀─────────────────────┘
//! ```

use crate::world::SimWorld;
use archsim_core::{
    ChaosId, ChaosKind, ChaosStatus, ChaosTarget, ComponentId, CoreError, FailureEvent, FixKind,
    GraphMutation, MetricsSnapshot, ValidationResult,
};
use archsim_env::{EngineContext, EnvError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info};

/// Pending commands before senders start waiting.
const COMMAND_BUFFER: usize = 64;

type Reply<T> = oneshot::Sender<T>;

/// Messages accepted by the scheduler task.
#[derive(Debug)]
pub enum Command {
    Start(Reply<Result<(), CoreError>>),
    Stop(Reply<()>),
    Reset(Reply<()>),
    SetSpeed(f64, Reply<Result<(), CoreError>>),
    SetTrafficLevel(f64, Reply<Result<(), CoreError>>),
    AddChaos {
        kind: ChaosKind,
        target: ChaosTarget,
        duration: Option<Duration>,
        reply: Reply<Result<ChaosId, CoreError>>,
    },
    ApplyFix {
        kind: FixKind,
        component: ComponentId,
        reply: Reply<Result<(), CoreError>>,
    },
    Mutate(GraphMutation, Reply<Result<u64, CoreError>>),
    Failures(Reply<Vec<FailureEvent>>),
    IsFailed(Reply<bool>),
    ChaosEvents(Reply<Vec<ChaosStatus>>),
    Validate(Reply<ValidationResult>),
    /// Ends the task and hands the world back
    Shutdown(Reply<SimWorld>),
}

/// Spawns the scheduler on `ctx` and returns a handle to it.
///
/// The task ends on `Shutdown` or once every handle is dropped.
pub fn spawn_scheduler<Ctx: EngineContext>(ctx: Arc<Ctx>, world: SimWorld) -> SchedulerHandle {
    let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
    let (snapshot_tx, snapshot_rx) = watch::channel(world.metrics_snapshot());

    let task_ctx = Arc::clone(&ctx);
    ctx.spawn("scheduler", async move {
        run(task_ctx, world, command_rx, snapshot_tx).await;
    });

    SchedulerHandle {
        commands: command_tx,
        snapshots: snapshot_rx,
    }
}

async fn run<Ctx: EngineContext>(
    ctx: Arc<Ctx>,
    mut world: SimWorld,
    mut commands: mpsc::Receiver<Command>,
    snapshots: watch::Sender<Arc<MetricsSnapshot>>,
) {
    let interval = world.config().cadence.wall_interval;
    info!("Scheduler running every {:?}", interval);

    loop {
        // Commands only land between ticks
        loop {
            match commands.try_recv() {
                Ok(command) => {
                    if let Some(reply) = handle(&mut world, command, &snapshots) {
                        info!("Scheduler shut down after {} ticks", world.tick_count());
                        let _ = reply.send(world);
                        return;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    debug!("All scheduler handles dropped");
                    return;
                }
            }
        }

        ctx.sleep(interval).await;

        if let Some(snapshot) = world.advance(interval) {
            snapshots.send_replace(snapshot);
        }
    }
}

/// Applies one command; returns the reply channel on `Shutdown`.
fn handle(
    world: &mut SimWorld,
    command: Command,
    snapshots: &watch::Sender<Arc<MetricsSnapshot>>,
) -> Option<Reply<SimWorld>> {
    // Dropped reply receivers are fine: the caller stopped waiting
    match command {
        Command::Start(reply) => {
            let _ = reply.send(world.start());
        }
        Command::Stop(reply) => {
            world.stop();
            let _ = reply.send(());
        }
        Command::Reset(reply) => {
            world.reset();
            snapshots.send_replace(world.metrics_snapshot());
            let _ = reply.send(());
        }
        Command::SetSpeed(multiplier, reply) => {
            let _ = reply.send(world.set_speed(multiplier));
        }
        Command::SetTrafficLevel(level, reply) => {
            let _ = reply.send(world.set_traffic_level(level));
        }
        Command::AddChaos {
            kind,
            target,
            duration,
            reply,
        } => {
            let _ = reply.send(world.add_chaos_event(kind, target, duration));
        }
        Command::ApplyFix {
            kind,
            component,
            reply,
        } => {
            let _ = reply.send(world.apply_fix(kind, &component));
        }
        Command::Mutate(mutation, reply) => {
            let _ = reply.send(world.mutate(mutation));
        }
        Command::Failures(reply) => {
            let _ = reply.send(world.failures());
        }
        Command::ChaosEvents(reply) => {
            let _ = reply.send(world.chaos_events());
        }
        Command::Validate(reply) => {
            let _ = reply.send(world.validate());
        }
        Command::IsFailed(reply) => {
            let _ = reply.send(world.is_failed());
        }
        Command::Shutdown(reply) => return Some(reply),
    }
    None
}

/// Cloneable client of a running scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<Arc<MetricsSnapshot>>,
}

impl SchedulerHandle {
    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T, CoreError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| EnvError::closed("scheduler"))?;
        Ok(response.await.map_err(|_| EnvError::closed("scheduler reply"))?)
    }

    /// Latest published snapshot.
    pub fn metrics_snapshot(&self) -> Arc<MetricsSnapshot> {
        self.snapshots.borrow().clone()
    }

    /// Receiver notified after every tick.
    pub fn subscribe(&self) -> watch::Receiver<Arc<MetricsSnapshot>> {
        self.snapshots.clone()
    }

    pub async fn start(&self) -> Result<(), CoreError> {
        self.request(Command::Start).await?
    }

    pub async fn stop(&self) -> Result<(), CoreError> {
        self.request(Command::Stop).await
    }

    pub async fn reset(&self) -> Result<(), CoreError> {
        self.request(Command::Reset).await
    }

    pub async fn set_speed(&self, multiplier: f64) -> Result<(), CoreError> {
        self.request(|reply| Command::SetSpeed(multiplier, reply)).await?
    }

    pub async fn set_traffic_level(&self, level: f64) -> Result<(), CoreError> {
        self.request(|reply| Command::SetTrafficLevel(level, reply)).await?
    }

    pub async fn add_chaos_event(
        &self,
        kind: ChaosKind,
        target: ChaosTarget,
        duration: Option<Duration>,
    ) -> Result<ChaosId, CoreError> {
        self.request(|reply| Command::AddChaos {
            kind,
            target,
            duration,
            reply,
        })
        .await?
    }

    pub async fn apply_fix(&self, kind: FixKind, component: ComponentId) -> Result<(), CoreError> {
        self.request(|reply| Command::ApplyFix {
            kind,
            component,
            reply,
        })
        .await?
    }

    pub async fn mutate(&self, mutation: GraphMutation) -> Result<u64, CoreError> {
        self.request(|reply| Command::Mutate(mutation, reply)).await?
    }

    pub async fn failures(&self) -> Result<Vec<FailureEvent>, CoreError> {
        self.request(Command::Failures).await
    }

    pub async fn is_failed(&self) -> Result<bool, CoreError> {
        self.request(Command::IsFailed).await
    }

    pub async fn chaos_events(&self) -> Result<Vec<ChaosStatus>, CoreError> {
        self.request(Command::ChaosEvents).await
    }

    pub async fn validate(&self) -> Result<ValidationResult, CoreError> {
        self.request(Command::Validate).await
    }

    /// Stops the task and returns the world it owned.
    pub async fn shutdown(self) -> Result<SimWorld, CoreError> {
        self.request(Command::Shutdown).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SimContext;
    use crate::world::SimConfig;
    use archsim_core::problem::url_shortener;
    use archsim_core::{ArchitectureGraph, Component, ComponentKind};

    fn world(traffic_level: f64) -> SimWorld {
        let graph = ArchitectureGraph::new()
            .with_component(Component::new("app", ComponentKind::AppServer).with_instances(2))
            .with_component(Component::new("db", ComponentKind::Database))
            .connect("app", "db");
        let config = SimConfig {
            traffic_level,
            ..Default::default()
        };
        SimWorld::new(config, graph, url_shortener()).unwrap()
    }

    #[tokio::test]
    async fn test_scheduler_ticks_and_publishes() {
        let ctx = SimContext::shared(7);
        let handle = spawn_scheduler(Arc::clone(&ctx), world(0.1));
        let mut updates = handle.subscribe();

        handle.start().await.unwrap();
        updates.changed().await.unwrap();
        assert!(updates.borrow().tick >= 1);
        assert!(handle.metrics_snapshot().total_demand_rps > 0.0);

        let world = handle.shutdown().await.unwrap();
        assert!(world.tick_count() >= 1);
        assert!(ctx.now() >= Duration::from_millis(16));
    }

    #[tokio::test]
    async fn test_stopped_scheduler_does_not_tick() {
        let ctx = SimContext::shared(7);
        let handle = spawn_scheduler(ctx, world(0.1));

        // Round trips let the task loop a few times
        for _ in 0..5 {
            handle.failures().await.unwrap();
        }
        let world = handle.shutdown().await.unwrap();
        assert_eq!(world.tick_count(), 0);
    }

    #[tokio::test]
    async fn test_commands_return_errors() {
        let handle = spawn_scheduler(SimContext::shared(1), world(0.5));

        assert!(handle.set_traffic_level(2.0).await.is_err());
        assert!(handle.set_speed(f64::NAN).await.is_err());
        let err = handle
            .apply_fix(FixKind::Recover, ComponentId::new("app"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::FixNotApplicable { .. }));

        let chaos = handle
            .add_chaos_event(ChaosKind::NetworkPartition, ChaosTarget::Everywhere, None)
            .await
            .unwrap();
        let events = handle.chaos_events().await.unwrap();
        assert_eq!(events[0].event.id, chaos);

        assert!(handle.validate().await.unwrap().score < 100);
    }

    #[tokio::test]
    async fn test_reset_republishes_empty_snapshot() {
        let handle = spawn_scheduler(SimContext::shared(3), world(1.0));
        let mut updates = handle.subscribe();
        handle.start().await.unwrap();
        updates.changed().await.unwrap();
        assert!(handle.is_failed().await.unwrap());

        handle.stop().await.unwrap();
        handle.reset().await.unwrap();
        assert_eq!(handle.metrics_snapshot().tick, 0);
        assert!(handle.failures().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_handle_ends_task() {
        let ctx = SimContext::shared(9);
        let handle = spawn_scheduler(Arc::clone(&ctx), world(0.1));
        let updates = handle.subscribe();
        drop(handle);

        // Sender side goes away once the task returns
        let mut updates = updates;
        while updates.changed().await.is_ok() {}
    }
}
