//! Telemetry and logging infrastructure
//!
//! Provides structured logging with tracing and inference latency statistics.

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, init_logging_default, LogConfig, LogGuard};
pub use metrics::{LatencyProfiler, LatencyStats, SchedulerStats};
