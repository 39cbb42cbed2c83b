//! The capability-style hooks the packet engine is configured with at
//! Start. Absent hooks are no-ops. All four must be safe to call
//! concurrently, since per-query tasks invoke them in parallel.

use std::sync::Arc;

/// Immutable set of callbacks captured at Start.
#[derive(Clone)]
pub struct Callbacks {
    pub on_state_change: Arc<dyn Fn(bool) + Send + Sync>,
    pub query_log: Arc<dyn Fn(u16, &str) + Send + Sync>,
    pub info_log: Arc<dyn Fn(&str) + Send + Sync>,
    pub error_log: Arc<dyn Fn(&str) + Send + Sync>,
}

impl Default for Callbacks {
    fn default() -> Self {
        Self {
            on_state_change: Arc::new(|_| {}),
            query_log: Arc::new(|_, _| {}),
            info_log: Arc::new(|_| {}),
            error_log: Arc::new(|_| {}),
        }
    }
}

impl Callbacks {
    pub fn state_change(&self, running: bool) {
        (self.on_state_change)(running);
    }

    pub fn query(&self, msg_id: u16, qname: &str) {
        (self.query_log)(msg_id, qname);
    }

    pub fn info(&self, message: &str) {
        (self.info_log)(message);
    }

    pub fn error(&self, message: &str) {
        (self.error_log)(message);
    }
}
