//! Per-Bearer Task Execution
//!
//! Provides the execution context used to defer upper-layer
//! notifications off the thread that holds the entity's state lock.

use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A deferred unit of work
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Capability to run tasks on a separate execution context.
///
/// The only guarantee is that a task runs after `execute` returns,
/// without any of the caller's locks held.
pub trait TaskExecutor: Send + Sync {
    /// Queue a task for execution; returns false if the executor is gone
    fn execute(&self, task: Task) -> bool;
}

/// Serial executor backed by a tokio task draining an unbounded channel.
///
/// One instance is associated with each UE, so notifications for the
/// UE's bearers are delivered in submission order.
pub struct UeExecutor {
    queue: mpsc::UnboundedSender<Task>,
}

impl UeExecutor {
    /// Spawn the drain task on the given runtime handle
    pub fn spawn(handle: &tokio::runtime::Handle) -> Self {
        let (queue, mut rx) = mpsc::unbounded_channel::<Task>();
        handle.spawn(async move {
            while let Some(task) = rx.recv().await {
                task();
            }
            debug!("UE executor queue closed, draining task exits");
        });
        Self { queue }
    }
}

impl TaskExecutor for UeExecutor {
    fn execute(&self, task: Task) -> bool {
        if self.queue.send(task).is_err() {
            warn!("UE executor is gone, dropping task");
            return false;
        }
        true
    }
}
