// Ambient infrastructure: configuration, logging, metrics
pub mod config;
pub mod logging;
pub mod metrics;

// Re-exports
pub use config::{OrchestrationConfig, CONFIG_FILE_NAME};
pub use logging::{init_dev_logging, init_logging, init_prod_logging, LogConfig, LogFormat, LogOutput};
pub use metrics::{global_metrics, names, MetricsSummary, OrchestrationMetrics, Timer, TimingStats};
