// extensions/scheduler.rs
//
// Coroutine executor, cancellation handles and frame-paced awaits.
//
// Usage:
//   engine.spawn(async move {
//       next_frame(&bus).await?;
//       sleep(&timers, 0.5).await;
//   })?;

use std::future::Future;

use futures::executor::{LocalPool, LocalSpawner};
use futures::future::{abortable, AbortHandle, Aborted};
use futures::task::{LocalSpawnExt, SpawnError};
use futures::FutureExt;

use crate::api::host::BusHandle;
use crate::core::engine::{CLOCK_OBJECT, PHYSICS_FRAME, PROCESS_FRAME};
use crate::error::{AwaitError, HostError};

/// Cancels one task, or every task of a group.
///
/// A cancelled task is dropped at its next poll: it does not resume, and
/// any signal registration it was waiting on is disconnected.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    handles: Vec<AbortHandle>,
}

impl CancelHandle {
    pub(crate) fn single(handle: AbortHandle) -> Self {
        Self {
            handles: vec![handle],
        }
    }

    pub(crate) fn many(handles: Vec<AbortHandle>) -> Self {
        Self { handles }
    }

    pub fn cancel(&self) {
        for handle in &self.handles {
            handle.abort();
        }
    }

    /// True once every covered task has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.handles.iter().all(AbortHandle::is_aborted)
    }
}

/// Wrap `future` so it can be cancelled from outside. The wrapped future
/// yields `Err(AwaitError::Cancelled)` instead of resuming once cancelled.
pub fn cancellable<F: Future>(future: F) -> (impl Future<Output = Result<F::Output, AwaitError>>, CancelHandle) {
    let (future, handle) = abortable(future);
    let future = future.map(|result| result.map_err(|Aborted| AwaitError::Cancelled));
    (future, CancelHandle::single(handle))
}

/// Single-threaded executor driven by the host loop.
pub struct Coroutines {
    pool: LocalPool,
    spawner: LocalSpawner,
}

impl Coroutines {
    pub fn new() -> Self {
        let pool = LocalPool::new();
        let spawner = pool.spawner();
        Self { pool, spawner }
    }

    pub fn spawner(&self) -> &LocalSpawner {
        &self.spawner
    }

    pub fn spawn<F>(&self, future: F) -> Result<(), SpawnError>
    where
        F: Future<Output = ()> + 'static,
    {
        self.spawner.spawn_local(future)
    }

    /// Spawn a task that can be cancelled through the returned handle.
    pub fn spawn_cancellable<F>(&self, future: F) -> Result<CancelHandle, SpawnError>
    where
        F: Future<Output = ()> + 'static,
    {
        let (future, handle) = abortable(future);
        self.spawner.spawn_local(future.map(|_| ()))?;
        Ok(CancelHandle::single(handle))
    }

    /// Poll every task until none can make progress.
    pub fn run_until_stalled(&mut self) {
        self.pool.run_until_stalled();
    }
}

impl Default for Coroutines {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves at the next process frame with its delta.
pub async fn next_frame(bus: &BusHandle) -> Result<f64, HostError> {
    let (delta,) = PROCESS_FRAME.wait(bus, CLOCK_OBJECT)?.await;
    Ok(delta)
}

/// Resolves at the next physics step with the fixed delta.
pub async fn next_physics_frame(bus: &BusHandle) -> Result<f64, HostError> {
    let (delta,) = PHYSICS_FRAME.wait(bus, CLOCK_OBJECT)?.await;
    Ok(delta)
}

/// Wait `count` process frames, returning the total delta.
pub async fn frames(bus: &BusHandle, count: u32) -> Result<f64, HostError> {
    let mut total = 0.0;
    for _ in 0..count {
        total += next_frame(bus).await?;
    }
    Ok(total)
}
