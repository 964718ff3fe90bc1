use std::sync::Arc;
use std::time::Duration;

use syncload_core::MetricsEvent;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::scenario::{TaskSet, WaitTime};
use crate::user::{LoadDriver, UserError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserReport {
    pub user: Uuid,
    pub operations: u64,
    pub failures: u64,
}

/// Loop one user over randomly picked tasks until `shutdown` fires.
///
/// Shutdown is only observed between tasks, so a session already running is
/// always allowed to finish or time out and still produces its event.
pub async fn drive_user<D: LoadDriver>(
    mut user: D,
    tasks: Arc<TaskSet>,
    wait: WaitTime,
    shutdown: CancellationToken,
) -> Result<UserReport, UserError> {
    user.start()?;
    let mut report = UserReport {
        user: user.id(),
        operations: 0,
        failures: 0,
    };

    while !shutdown.is_cancelled() {
        let task = tasks.pick();
        debug!(user = %report.user, task = %task.name, "running task");
        match user.run_operation(&task.resource).await {
            Ok(event) => {
                report.operations += 1;
                if !event.is_success() {
                    report.failures += 1;
                }
            }
            Err(e) => {
                user.stop();
                return Err(e);
            }
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(wait.sample()) => {}
        }
    }

    user.stop();
    Ok(report)
}

/// Run every user concurrently until `duration` elapses (if set) or `shutdown`
/// is cancelled, then wait for all of them to wind down.
pub async fn run_users<D: LoadDriver + 'static>(
    users: Vec<D>,
    tasks: Arc<TaskSet>,
    wait: WaitTime,
    duration: Option<Duration>,
    shutdown: CancellationToken,
) -> Vec<UserReport> {
    let mut set = JoinSet::new();
    for user in users {
        set.spawn(drive_user(user, tasks.clone(), wait, shutdown.child_token()));
    }

    if let Some(limit) = duration {
        let token = shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(limit) => token.cancel(),
            }
        });
    }

    let mut reports = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(Ok(report)) => reports.push(report),
            Ok(Err(e)) => error!("User stopped with error: {e}"),
            Err(e) => warn!("User task did not complete: {e}"),
        }
    }
    reports
}

/// Run every task once, in definition order, on a single configured user.
pub async fn run_each_once<D: LoadDriver + ?Sized>(
    user: &mut D,
    tasks: &TaskSet,
) -> Result<Vec<MetricsEvent>, UserError> {
    user.start()?;
    let mut events = Vec::with_capacity(tasks.len());
    for task in tasks.iter() {
        match user.run_operation(&task.resource).await {
            Ok(event) => events.push(event),
            Err(e) => {
                user.stop();
                return Err(e);
            }
        }
    }
    user.stop();
    Ok(events)
}
