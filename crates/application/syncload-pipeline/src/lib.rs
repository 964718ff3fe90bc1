pub mod metrics;
pub mod pool;
pub mod tracker;

// Re-export core pipeline components
pub use metrics::{
    ChannelSink, FanoutSink, JsonLinesSink, MetricsEmitter, MetricsSink, SinkError, TracingSink,
};
pub use pool::{PoolOptions, SessionHandle, SessionPool};
pub use tracker::{RunSnapshot, RunTracker, TaskSummary};

// Re-export infra types often needed by consumers
pub use syncload_infra::{ProcessSession, SessionError, SessionRunner};
