//! Per-server options

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DispatchError, DispatchResult};

/// Default bound of a server's message queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;

/// Options recognized when creating a server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerOptions {
    /// Maximum number of queued messages before senders wait
    #[serde(rename = "queue-capacity", default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Keep only the latest queued message; forces a single worker
    #[serde(default)]
    pub coalesce: bool,
}

fn default_queue_capacity() -> usize {
    debug!("default_queue_capacity: called");
    DEFAULT_QUEUE_CAPACITY
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            coalesce: false,
        }
    }
}

impl ServerOptions {
    /// Switch on last-value-wins delivery
    pub fn with_coalesce(mut self) -> Self {
        self.coalesce = true;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub(crate) fn validate(&self) -> DispatchResult<()> {
        if self.queue_capacity == 0 {
            return Err(DispatchError::InvalidOptions("queue-capacity must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Number of message workers for a server with these options
    pub(crate) fn worker_count(&self, has_handler: bool, workers_per_cpu: usize) -> usize {
        if !has_handler {
            return 0;
        }
        if self.coalesce {
            return 1;
        }
        let cpus = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        (cpus * workers_per_cpu).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let opts = ServerOptions::default();
        assert_eq!(opts.queue_capacity, 4096);
        assert!(!opts.coalesce);
    }

    #[test]
    fn test_worker_count_rules() {
        let opts = ServerOptions::default();
        assert_eq!(opts.worker_count(false, 2), 0);
        assert!(opts.worker_count(true, 2) >= 2);
        assert_eq!(opts.with_coalesce().worker_count(true, 2), 1);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let opts = ServerOptions::default().with_queue_capacity(0);
        assert!(matches!(opts.validate(), Err(DispatchError::InvalidOptions(_))));
    }

    #[test]
    fn test_yaml_defaults_fill_in() {
        let opts: ServerOptions = serde_yaml::from_str("coalesce: true").unwrap();
        assert_eq!(opts.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert!(opts.coalesce);
    }
}
