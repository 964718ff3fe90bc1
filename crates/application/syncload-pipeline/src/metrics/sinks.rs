use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::{Arc, Mutex};

use camino::Utf8Path;
use syncload_core::MetricsEvent;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

use super::{MetricsSink, SinkError};

/// Logs each event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl MetricsSink for TracingSink {
    fn publish(&self, event: MetricsEvent) -> Result<(), SinkError> {
        match &event.error {
            None => info!(
                target: "syncload::metrics",
                request_type = %event.request_type,
                name = %event.name,
                response_length = event.response_length,
                response_time_ms = event.response_time_ms,
                "request ok"
            ),
            Some(error) => warn!(
                target: "syncload::metrics",
                request_type = %event.request_type,
                name = %event.name,
                response_length = event.response_length,
                response_time_ms = event.response_time_ms,
                %error,
                "request failed"
            ),
        }
        Ok(())
    }
}

/// One JSON document per line. Writes are serialized behind a mutex.
pub struct JsonLinesSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl JsonLinesSink<BufWriter<File>> {
    pub fn create(path: &Utf8Path) -> std::io::Result<Self> {
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> Result<W, SinkError> {
        self.writer.into_inner().map_err(|_| SinkError::Poisoned)
    }
}

impl<W: Write + Send> MetricsSink for JsonLinesSink<W> {
    fn publish(&self, event: MetricsEvent) -> Result<(), SinkError> {
        let line = serde_json::to_string(&event)?;
        let mut w = self.writer.lock().map_err(|_| SinkError::Poisoned)?;
        writeln!(w, "{line}")?;
        w.flush()?;
        Ok(())
    }
}

/// Forwards events to an async consumer without waiting on it.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: UnboundedSender<MetricsEvent>,
}

impl ChannelSink {
    pub fn new(tx: UnboundedSender<MetricsEvent>) -> Self {
        Self { tx }
    }
}

impl MetricsSink for ChannelSink {
    fn publish(&self, event: MetricsEvent) -> Result<(), SinkError> {
        self.tx.send(event).map_err(|_| SinkError::Closed)
    }
}

/// Publishes to every inner sink; reports the first failure after trying all.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn MetricsSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl MetricsSink for FanoutSink {
    fn publish(&self, event: MetricsEvent) -> Result<(), SinkError> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(e) = sink.publish(event.clone()) {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
