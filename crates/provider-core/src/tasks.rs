//! Background-task bookkeeping seam
//!
//! Hosts that suspend idle processes expose keep-alive handles; a request
//! carrying a task name acquires one for the duration of its exchange.
//! Requests without a task name skip this entirely.

use std::fmt;

/// Opaque handle returned by [`BackgroundTaskManager::begin`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Keeps the host process alive while network exchanges are in flight.
pub trait BackgroundTaskManager: Send + Sync {
    fn begin(&self, name: &str) -> TaskId;

    fn end(&self, id: TaskId);
}
