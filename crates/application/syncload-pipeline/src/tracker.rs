use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;
use syncload_core::MetricsEvent;

use crate::metrics::{MetricsSink, SinkError};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TaskSummary {
    pub name: String,
    pub requests: u64,
    pub failures: u64,
    pub bytes: u64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub mean_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSnapshot {
    pub total_requests: u64,
    pub total_failures: u64,
    pub total_bytes: u64,
    pub elapsed: Duration,
    pub requests_per_sec: f64,
    pub tasks: Vec<TaskSummary>,
    /// Most recent error text per resource name.
    pub last_errors: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct TaskStats {
    requests: u64,
    failures: u64,
    bytes: u64,
    total_ms: f64,
    min_ms: Option<f64>,
    max_ms: f64,
}

#[derive(Debug, Default)]
struct TrackerState {
    per_name: BTreeMap<String, TaskStats>,
    last_errors: BTreeMap<String, String>,
}

/// Sink that keeps running totals for an end-of-run summary.
pub struct RunTracker {
    started: Instant,
    state: Mutex<TrackerState>,
}

impl RunTracker {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            state: Mutex::new(TrackerState::default()),
        }
    }

    pub fn record(&self, event: &MetricsEvent) -> Result<(), SinkError> {
        let mut state = self.state.lock().map_err(|_| SinkError::Poisoned)?;
        let stats = state.per_name.entry(event.name.clone()).or_default();
        stats.requests += 1;
        stats.bytes += event.response_length;
        stats.total_ms += event.response_time_ms;
        stats.max_ms = stats.max_ms.max(event.response_time_ms);
        stats.min_ms = Some(match stats.min_ms {
            Some(m) => m.min(event.response_time_ms),
            None => event.response_time_ms,
        });
        if let Some(err) = &event.error {
            stats.failures += 1;
            state.last_errors.insert(event.name.clone(), err.clone());
        }
        Ok(())
    }

    pub fn snapshot(&self) -> Result<RunSnapshot, SinkError> {
        let state = self.state.lock().map_err(|_| SinkError::Poisoned)?;
        let elapsed = self.started.elapsed();

        let tasks: Vec<TaskSummary> = state
            .per_name
            .iter()
            .map(|(name, s)| TaskSummary {
                name: name.clone(),
                requests: s.requests,
                failures: s.failures,
                bytes: s.bytes,
                min_ms: s.min_ms.unwrap_or(0.0),
                max_ms: s.max_ms,
                mean_ms: if s.requests == 0 {
                    0.0
                } else {
                    s.total_ms / s.requests as f64
                },
            })
            .collect();

        let total_requests = tasks.iter().map(|t| t.requests).sum();
        let secs = elapsed.as_secs_f64();

        Ok(RunSnapshot {
            total_requests,
            total_failures: tasks.iter().map(|t| t.failures).sum(),
            total_bytes: tasks.iter().map(|t| t.bytes).sum(),
            elapsed,
            requests_per_sec: if secs > 0.0 {
                total_requests as f64 / secs
            } else {
                0.0
            },
            tasks,
            last_errors: state.last_errors.clone(),
        })
    }
}

impl Default for RunTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSink for RunTracker {
    fn publish(&self, event: MetricsEvent) -> Result<(), SinkError> {
        self.record(&event)
    }
}
