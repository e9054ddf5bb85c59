//! Per-run log delivery. A run owns one sink and pushes lines through it from
//! its own control flow, so line order matches processing order. The default
//! sink forwards to `tracing`; a service wrapper can substitute its own
//! (e.g. a channel feeding a live log stream).
use tracing::info;

pub trait ProgressSink: Send + Sync {
    fn emit(&self, line: &str);
}

/// Forwards run output to the process-wide tracing subscriber.
#[derive(Debug, Default)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn emit(&self, line: &str) {
        info!("{line}");
    }
}
