use std::sync::Arc;

use syncload_core::{MetricsEvent, ResourceRequest, SyncOutcome};
use tracing::warn;

pub mod sinks;

pub use sinks::{ChannelSink, FanoutSink, JsonLinesSink, TracingSink};

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("sink is closed")]
    Closed,
    #[error("sink lock poisoned")]
    Poisoned,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Receiver of normalized events. Publishing must return promptly.
pub trait MetricsSink: Send + Sync {
    fn publish(&self, event: MetricsEvent) -> Result<(), SinkError>;
}

/// Turns finished sessions into events. Exactly one event per call, whatever
/// the outcome; a failing sink never changes what the caller sees.
#[derive(Clone)]
pub struct MetricsEmitter {
    sink: Arc<dyn MetricsSink>,
}

impl MetricsEmitter {
    pub fn new(sink: Arc<dyn MetricsSink>) -> Self {
        Self { sink }
    }

    pub fn emit(&self, request: &ResourceRequest, outcome: &SyncOutcome) -> MetricsEvent {
        let event = MetricsEvent::from_outcome(request, outcome);
        if let Err(e) = self.sink.publish(event.clone()) {
            warn!("Dropping metrics event for {}: {}", event.name, e);
        }
        event
    }
}
