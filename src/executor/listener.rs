//! Completion listeners and the primary-context hand-off.

use crate::core::{DaoError, Result};
use crate::operation::AsyncOperation;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Called once per completed operation, successful or not
pub trait AsyncOperationListener: Send + Sync {
    fn on_async_operation_completed(&self, operation: &Arc<AsyncOperation>);
}

impl<F> AsyncOperationListener for F
where
    F: Fn(&Arc<AsyncOperation>) + Send + Sync,
{
    fn on_async_operation_completed(&self, operation: &Arc<AsyncOperation>) {
        self(operation)
    }
}

/// A unit of work handed to the primary context
pub type MainTask = Box<dyn FnOnce() + Send + 'static>;

/// A designated thread or loop that runs posted tasks in order
pub trait MainContext: Send + Sync {
    fn post(&self, task: MainTask) -> Result<()>;
}

/// [`MainContext`] backed by a channel drained through a [`MainLoop`]
#[derive(Clone)]
pub struct ChannelMainContext {
    sender: mpsc::UnboundedSender<MainTask>,
}

impl ChannelMainContext {
    pub fn new() -> (Self, MainLoop) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, MainLoop { receiver })
    }
}

impl MainContext for ChannelMainContext {
    fn post(&self, task: MainTask) -> Result<()> {
        self.sender
            .send(task)
            .map_err(|_| DaoError::ExecutionError("main loop has been dropped".into()))
    }
}

/// Receiving end of a [`ChannelMainContext`], pumped by the designated thread
pub struct MainLoop {
    receiver: mpsc::UnboundedReceiver<MainTask>,
}

impl MainLoop {
    /// Run every task posted so far without waiting; returns how many ran
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.receiver.try_recv() {
            task();
            ran += 1;
        }
        ran
    }

    /// Wait for the next task and run it; `false` once every context is dropped
    pub async fn run_next(&mut self) -> bool {
        match self.receiver.recv().await {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }
}
