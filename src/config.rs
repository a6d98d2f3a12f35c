use crate::operation::OperationFlags;
use std::time::Duration;

/// Asynchronous session configuration
///
/// Built in code; the library does not load configuration from anywhere.
#[derive(Debug, Clone)]
pub struct AsyncSessionConfig {
    /// Upper bound on operations sharing one merged transaction
    pub max_operation_count_to_merge: usize,

    /// How long the worker waits for a second operation to merge with
    ///
    /// A merged batch keeps growing while the queue head stays mergeable, so
    /// under sustained load the first member may wait on up to
    /// `max_operation_count_to_merge - 1` others before it completes.
    pub wait_for_merge: Duration,

    /// Idle time after which the worker exits
    pub drain_poll_interval: Duration,

    /// Flags added to every operation created by the session
    pub session_flags: OperationFlags,

    /// Name given to worker threads
    pub worker_name: String,
}

impl AsyncSessionConfig {
    /// Create a configuration with default settings
    pub fn new() -> Self {
        Self {
            max_operation_count_to_merge: 50,
            wait_for_merge: Duration::from_millis(50),
            drain_poll_interval: Duration::from_secs(1),
            session_flags: OperationFlags::NONE,
            worker_name: "rustmemodao-async".to_string(),
        }
    }

    /// Set the merged batch size cap
    pub fn max_operation_count_to_merge(mut self, max: usize) -> Self {
        self.max_operation_count_to_merge = max;
        self
    }

    /// Set the merge window
    pub fn wait_for_merge(mut self, wait: Duration) -> Self {
        self.wait_for_merge = wait;
        self
    }

    /// Set the worker idle timeout
    pub fn drain_poll_interval(mut self, interval: Duration) -> Self {
        self.drain_poll_interval = interval;
        self
    }

    pub fn session_flags(mut self, flags: OperationFlags) -> Self {
        self.session_flags = flags;
        self
    }

    pub fn worker_name(mut self, name: &str) -> Self {
        self.worker_name = name.to_string();
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_operation_count_to_merge < 2 {
            return Err("max_operation_count_to_merge must be >= 2".to_string());
        }

        if self.worker_name.is_empty() {
            return Err("worker_name cannot be empty".to_string());
        }

        Ok(())
    }
}

impl Default for AsyncSessionConfig {
    fn default() -> Self {
        Self::new()
    }
}
