// extensions/group.rs
//
// Structured concurrency over awaitables: run a set of child tasks to
// completion, or race them and keep the first.
//
// Usage:
//   let mut group = TaskGroup::new();
//   group.add(DIED.wait(&bus, boss)?);
//   let stop = group.add(sleep(&timers, 3.0));
//   for outcome in group.join().await { ... }

use std::future::Future;

use futures::future::{abortable, join_all, select_all, AbortHandle, Abortable, LocalBoxFuture};
use futures::FutureExt;

use crate::extensions::scheduler::CancelHandle;

/// How one child of a [`TaskGroup`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome<T> {
    Completed(T),
    Cancelled,
}

impl<T> TaskOutcome<T> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskOutcome::Cancelled)
    }

    pub fn completed(self) -> Option<T> {
        match self {
            TaskOutcome::Completed(value) => Some(value),
            TaskOutcome::Cancelled => None,
        }
    }
}

/// A set of child tasks awaited together.
///
/// Children run concurrently once the group is awaited. Each child can be
/// cancelled on its own; [`TaskGroup::cancel_all`] cancels every child, and
/// dropping the group drops (and so disconnects) them all.
pub struct TaskGroup<T> {
    tasks: Vec<Abortable<LocalBoxFuture<'static, T>>>,
    handles: Vec<AbortHandle>,
}

impl<T: 'static> TaskGroup<T> {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            handles: Vec::new(),
        }
    }

    /// Add a child and return a handle that cancels just that child.
    pub fn add<F>(&mut self, future: F) -> CancelHandle
    where
        F: Future<Output = T> + 'static,
    {
        let (task, handle) = abortable(future.boxed_local());
        self.tasks.push(task);
        self.handles.push(handle.clone());
        CancelHandle::single(handle)
    }

    /// Handle cancelling every child added so far.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle::many(self.handles.clone())
    }

    pub fn cancel_all(&self) {
        for handle in &self.handles {
            handle.abort();
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for every child. Outcomes keep insertion order; cancelled
    /// children are reported as [`TaskOutcome::Cancelled`].
    pub async fn join(self) -> Vec<TaskOutcome<T>> {
        join_all(self.tasks)
            .await
            .into_iter()
            .map(|result| match result {
                Ok(value) => TaskOutcome::Completed(value),
                Err(_) => TaskOutcome::Cancelled,
            })
            .collect()
    }

    /// Wait for every child, keeping only the values of those that
    /// completed.
    pub async fn completed(self) -> Vec<T> {
        self.join().await.into_iter().filter_map(TaskOutcome::completed).collect()
    }
}

impl<T: 'static> Default for TaskGroup<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve with the first of `futures` to complete and its index. The
/// others are dropped, which disconnects any registration they held.
/// Returns `None` for an empty set.
pub async fn wait_any<F>(futures: impl IntoIterator<Item = F>) -> Option<(F::Output, usize)>
where
    F: Future + Unpin,
{
    let futures: Vec<F> = futures.into_iter().collect();
    if futures.is_empty() {
        return None;
    }
    let (output, index, _rest) = select_all(futures).await;
    Some((output, index))
}
