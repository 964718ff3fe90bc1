//! Task sets and scenario files.
//!
//! A scenario names the host under test and the tasks a simulated user picks
//! from. Each task fetches one resource; its weight sets how often it is picked
//! relative to the others.

use std::time::Duration;

use camino::Utf8Path;
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use serde::{Deserialize, Serialize};
use syncload_core::{PathResolver, PathTraversalError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("failed to read scenario {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse scenario: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("scenario defines no tasks")]
    NoTasks,
    #[error("task weights must not all be zero")]
    ZeroWeights,
    #[error("task {task:?} has an unusable resource: {source}")]
    Resource {
        task: String,
        #[source]
        source: PathTraversalError,
    },
    #[error("invalid task spec {0:?}, expected NAME=RESOURCE or RESOURCE")]
    TaskSpec(String),
    #[error("wait range is inverted: min {min_ms}ms > max {max_ms}ms")]
    WaitRange { min_ms: u64, max_ms: u64 },
}

fn default_weight() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub name: String,
    pub resource: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

impl TaskSpec {
    pub fn new(name: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resource: resource.into(),
            weight: default_weight(),
        }
    }

    /// `get_ta_cert=ta/RIPE-NCC-TA-TEST.cer`, or a bare resource named after itself.
    pub fn parse(spec: &str) -> Result<Self, ScenarioError> {
        let (name, resource) = match spec.split_once('=') {
            Some((name, resource)) => (name.trim(), resource.trim()),
            None => (spec.trim(), spec.trim()),
        };
        if name.is_empty() || resource.is_empty() {
            return Err(ScenarioError::TaskSpec(spec.to_string()));
        }
        Ok(Self::new(name, resource))
    }
}

/// Validated, non-empty list of tasks with weighted selection.
#[derive(Debug, Clone)]
pub struct TaskSet {
    tasks: Vec<TaskSpec>,
    index: WeightedIndex<u32>,
}

impl TaskSet {
    pub fn new(tasks: Vec<TaskSpec>) -> Result<Self, ScenarioError> {
        if tasks.is_empty() {
            return Err(ScenarioError::NoTasks);
        }
        // Reject bad resources before any user starts.
        for task in &tasks {
            PathResolver::validate_name(&task.resource).map_err(|source| {
                ScenarioError::Resource {
                    task: task.name.clone(),
                    source,
                }
            })?;
        }
        let index = WeightedIndex::new(tasks.iter().map(|t| t.weight))
            .map_err(|_| ScenarioError::ZeroWeights)?;
        Ok(Self { tasks, index })
    }

    pub fn pick(&self) -> &TaskSpec {
        let mut rng = rand::thread_rng();
        &self.tasks[self.index.sample(&mut rng)]
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaskSpec> {
        self.tasks.iter()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn find(&self, name: &str) -> Option<&TaskSpec> {
        self.tasks.iter().find(|t| t.name == name)
    }
}

/// Pause between two tasks of one user, drawn uniformly from `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitTime {
    min_ms: u64,
    max_ms: u64,
}

impl WaitTime {
    pub fn between(min_ms: u64, max_ms: u64) -> Result<Self, ScenarioError> {
        if min_ms > max_ms {
            return Err(ScenarioError::WaitRange { min_ms, max_ms });
        }
        Ok(Self { min_ms, max_ms })
    }

    pub fn constant(ms: u64) -> Self {
        Self {
            min_ms: ms,
            max_ms: ms,
        }
    }

    pub fn sample(&self) -> Duration {
        if self.min_ms == self.max_ms {
            return Duration::from_millis(self.min_ms);
        }
        Duration::from_millis(rand::thread_rng().gen_range(self.min_ms..=self.max_ms))
    }
}

impl Default for WaitTime {
    fn default() -> Self {
        Self {
            min_ms: syncload_config::DEFAULT_WAIT_MIN_MS,
            max_ms: syncload_config::DEFAULT_WAIT_MAX_MS,
        }
    }
}

/// On-disk scenario description (JSON).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Scenario {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub tasks: Vec<TaskSpec>,
    #[serde(default)]
    pub binary: Option<String>,
    #[serde(default)]
    pub flags: Option<Vec<String>>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_in_flight: Option<usize>,
    #[serde(default)]
    pub rate_per_sec: Option<u32>,
    #[serde(default)]
    pub wait_min_ms: Option<u64>,
    #[serde(default)]
    pub wait_max_ms: Option<u64>,
}

impl Scenario {
    pub fn load(path: &Utf8Path) -> Result<Self, ScenarioError> {
        let content = std::fs::read_to_string(path).map_err(|source| ScenarioError::Io {
            path: path.to_string(),
            source,
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> Result<Self, ScenarioError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn wait_time(&self) -> Result<WaitTime, ScenarioError> {
        let default = WaitTime::default();
        WaitTime::between(
            self.wait_min_ms.unwrap_or(default.min_ms),
            self.wait_max_ms.unwrap_or(default.max_ms),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_task_spec_forms() {
        assert_eq!(
            TaskSpec::parse("get_ta_cert=ta/RIPE-NCC-TA-TEST.cer").unwrap(),
            TaskSpec::new("get_ta_cert", "ta/RIPE-NCC-TA-TEST.cer")
        );
        assert_eq!(
            TaskSpec::parse("repository").unwrap(),
            TaskSpec::new("repository", "repository")
        );
        assert!(TaskSpec::parse("name=").is_err());
        assert!(TaskSpec::parse("").is_err());
    }

    #[test]
    fn task_set_rejects_traversal_resources() {
        let err = TaskSet::new(vec![TaskSpec::new("bad", "../../etc/passwd")]).unwrap_err();
        assert!(matches!(err, ScenarioError::Resource { .. }));
    }

    #[test]
    fn task_set_rejects_empty_and_zero_weights() {
        assert!(matches!(TaskSet::new(vec![]), Err(ScenarioError::NoTasks)));
        let mut t = TaskSpec::new("a", "a");
        t.weight = 0;
        assert!(matches!(TaskSet::new(vec![t]), Err(ScenarioError::ZeroWeights)));
    }

    #[test]
    fn pick_never_returns_zero_weight_task() {
        let mut never = TaskSpec::new("never", "never");
        never.weight = 0;
        let set = TaskSet::new(vec![never, TaskSpec::new("always", "always")]).unwrap();
        for _ in 0..200 {
            assert_eq!(set.pick().name, "always");
        }
    }

    #[test]
    fn wait_time_samples_within_bounds() {
        let wait = WaitTime::between(10, 20).unwrap();
        for _ in 0..100 {
            let d = wait.sample();
            assert!(d >= Duration::from_millis(10) && d <= Duration::from_millis(20));
        }
        assert!(WaitTime::between(5, 1).is_err());
        assert_eq!(WaitTime::constant(7).sample(), Duration::from_millis(7));
    }

    #[test]
    fn scenario_from_json() {
        let scenario = Scenario::from_json(
            r#"{
                "host": "rpki.ripe.net",
                "tasks": [
                    { "name": "get_ta_cert", "resource": "ta/RIPE-NCC-TA-TEST.cer" },
                    { "name": "get_repo", "resource": "repository", "weight": 3 }
                ],
                "timeout_secs": 60,
                "wait_min_ms": 0,
                "wait_max_ms": 10
            }"#,
        )
        .unwrap();

        assert_eq!(scenario.host.as_deref(), Some("rpki.ripe.net"));
        assert_eq!(scenario.tasks.len(), 2);
        assert_eq!(scenario.tasks[0].weight, 1);
        assert_eq!(scenario.tasks[1].weight, 3);
        assert_eq!(scenario.timeout_secs, Some(60));
        assert_eq!(scenario.flags, None);
        assert_eq!(scenario.wait_time().unwrap(), WaitTime::between(0, 10).unwrap());
    }
}
