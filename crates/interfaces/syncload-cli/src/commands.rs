use crate::scenario::{Scenario, TaskSet, TaskSpec, WaitTime};
use crate::scheduler::{run_each_once, run_users};
use crate::user::{LoadUser, UserConfig};
use crate::{TargetArgs, WaitArgs};
use anyhow::{anyhow, bail, Context, Result};
use camino::Utf8Path;
use humansize::{format_size, DECIMAL};
use indicatif::{ProgressBar, ProgressStyle};
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use syncload_core::MetricsEvent;
use syncload_pipeline::{
    FanoutSink, JsonLinesSink, MetricsSink, PoolOptions, RunSnapshot, RunTracker, TracingSink,
};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Everything needed to build users, after merging the scenario file and flags.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub user: UserConfig,
    pub tasks: TaskSet,
    pub wait: WaitTime,
}

pub fn resolve_plan(target: &TargetArgs, wait: &WaitArgs) -> Result<RunPlan> {
    let mut scenario = match &target.scenario {
        Some(path) => Scenario::load(path)?,
        None => Scenario::default(),
    };

    let host = target
        .host
        .clone()
        .or_else(|| scenario.host.take())
        .context("No host given: pass --host or set `host` in the scenario")?;

    let tasks = if target.tasks.is_empty() {
        std::mem::take(&mut scenario.tasks)
    } else {
        target
            .tasks
            .iter()
            .map(|spec| TaskSpec::parse(spec))
            .collect::<Result<Vec<_>, _>>()?
    };
    let tasks = TaskSet::new(tasks)?;

    let flags = match &target.flags {
        Some(raw) => Some(shlex::split(raw).ok_or_else(|| anyhow!("Could not parse --flags {raw:?}"))?),
        None => scenario.flags.take(),
    };

    let rate_per_sec = match target.rate.or(scenario.rate_per_sec) {
        Some(0) => bail!("Rate must be at least 1 session per second"),
        Some(n) => NonZeroU32::new(n),
        None => None,
    };

    let mut user = UserConfig::new(host);
    user.staging_root = target.staging.clone();
    user.binary = target.binary.clone().or_else(|| scenario.binary.take());
    user.flags = flags;
    user.timeout = target
        .timeout_secs
        .or(scenario.timeout_secs)
        .map(Duration::from_secs);
    user.pool = PoolOptions {
        max_in_flight: target.max_in_flight.or(scenario.max_in_flight),
        rate_per_sec,
    };
    // Surface endpoint and session errors before any user is built.
    user.session_config()?;

    scenario.wait_min_ms = wait.wait_min_ms.or(scenario.wait_min_ms);
    scenario.wait_max_ms = wait.wait_max_ms.or(scenario.wait_max_ms);
    let wait = scenario.wait_time()?;

    Ok(RunPlan { user, tasks, wait })
}

fn build_sink(events: Option<&Utf8Path>, tracker: Option<Arc<RunTracker>>) -> Result<Arc<dyn MetricsSink>> {
    let mut fanout = FanoutSink::new().with(Arc::new(TracingSink));
    if let Some(tracker) = tracker {
        fanout = fanout.with(tracker);
    }
    if let Some(path) = events {
        let sink = JsonLinesSink::create(path)
            .with_context(|| format!("Failed to create events file {}", path))?;
        fanout = fanout.with(Arc::new(sink));
    }
    Ok(Arc::new(fanout))
}

/// Run every task once on a single user and print each event as JSON.
pub async fn cmd_once(target: TargetArgs) -> Result<Vec<MetricsEvent>> {
    let plan = resolve_plan(&target, &WaitArgs::default())?;
    let sink = build_sink(target.events.as_deref(), None)?;

    let mut user = LoadUser::new(plan.user, sink);
    user.configure()?;
    println!(":: Fetching {} resource(s) from {}", plan.tasks.len(), user.host());

    let events = run_each_once(&mut user, &plan.tasks).await?;
    for event in &events {
        println!("{}", serde_json::to_string(event)?);
    }
    Ok(events)
}

/// Run `users` simulated users until `duration` elapses or Ctrl-C.
pub async fn cmd_run(
    target: TargetArgs,
    wait: WaitArgs,
    users: usize,
    duration: Option<Duration>,
) -> Result<RunSnapshot> {
    let plan = resolve_plan(&target, &wait)?;
    let users = syncload_config::clamp_users(users);
    if duration.is_none() {
        println!(":: No --duration-secs given, press Ctrl-C to stop");
    }
    println!(":: Starting {} user(s) against {}", users, plan.user.host);

    let tracker = Arc::new(RunTracker::new());
    let sink = build_sink(target.events.as_deref(), Some(tracker.clone()))?;

    let mut load_users = Vec::with_capacity(users);
    for i in 0..users {
        let mut config = plan.user.clone();
        // Users never share a staging directory.
        config.staging_root = plan
            .user
            .staging_root
            .as_ref()
            .map(|root| root.join(format!("user-{i}")));
        let mut user = LoadUser::new(config, sink.clone());
        user.configure()
            .with_context(|| format!("Failed to configure user {i}"))?;
        load_users.push(user);
    }

    let shutdown = CancellationToken::new();
    let (interrupt, interrupts) = forward_interrupts();

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.enable_steady_tick(Duration::from_millis(100));
    let ticker = {
        let pb = pb.clone();
        let tracker = tracker.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(500));
            loop {
                interval.tick().await;
                if let Ok(s) = tracker.snapshot() {
                    pb.set_message(format!(
                        "{} requests, {} failed, {} transferred",
                        s.total_requests,
                        s.total_failures,
                        format_size(s.total_bytes, DECIMAL)
                    ));
                }
            }
        })
    };

    let run = run_users(
        load_users,
        Arc::new(plan.tasks),
        plan.wait,
        duration,
        shutdown.clone(),
    );
    let finished = run_interruptible(run, shutdown, interrupts).await;
    ticker.abort();
    interrupt.abort();

    let Some(reports) = finished else {
        pb.abandon_with_message("Aborted.");
        print_summary(&tracker.snapshot()?);
        bail!("Aborted before in-flight sessions finished");
    };
    pb.finish_with_message("Run complete.");

    for report in &reports {
        info!(
            user = %report.user,
            operations = report.operations,
            failures = report.failures,
            "user finished"
        );
    }

    let snapshot = tracker.snapshot()?;
    print_summary(&snapshot);
    Ok(snapshot)
}

/// Forward every Ctrl-C into a channel. The default handler is gone once this runs.
fn forward_interrupts() -> (JoinHandle<()>, UnboundedReceiver<()>) {
    let (tx, rx) = unbounded_channel();
    let handle = tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if tx.send(()).is_err() {
                break;
            }
        }
    });
    (handle, rx)
}

/// Drive `run` to completion. The first interrupt cancels `shutdown` so users
/// stop after their current session; a second one abandons `run` and returns `None`.
pub async fn run_interruptible<F: Future>(
    run: F,
    shutdown: CancellationToken,
    mut interrupts: UnboundedReceiver<()>,
) -> Option<F::Output> {
    tokio::pin!(run);
    let mut seen = 0u32;
    loop {
        tokio::select! {
            out = &mut run => return Some(out),
            Some(()) = interrupts.recv() => {
                seen += 1;
                if seen > 1 {
                    warn!("Interrupted again, abandoning in-flight sessions");
                    return None;
                }
                warn!("Interrupted, letting in-flight sessions finish");
                eprintln!(":: Stopping after in-flight sessions finish (Ctrl-C again to quit now)");
                shutdown.cancel();
            }
        }
    }
}

pub fn print_summary(snapshot: &RunSnapshot) {
    println!("\n:: Run Summary");
    println!(
        "   Requests:    {} ({} failed)",
        snapshot.total_requests, snapshot.total_failures
    );
    println!(
        "   Transferred: {}",
        format_size(snapshot.total_bytes, DECIMAL)
    );
    println!(
        "   Elapsed:     {:.1}s ({:.2} req/s)",
        snapshot.elapsed.as_secs_f64(),
        snapshot.requests_per_sec
    );

    if snapshot.tasks.is_empty() {
        return;
    }
    println!(
        "\n   {:<32} {:>8} {:>8} {:>10} {:>10} {:>10} {:>10}",
        "Name", "Reqs", "Fails", "Min ms", "Mean ms", "Max ms", "Size"
    );
    for task in &snapshot.tasks {
        println!(
            "   {:<32} {:>8} {:>8} {:>10.0} {:>10.0} {:>10.0} {:>10}",
            task.name,
            task.requests,
            task.failures,
            task.min_ms,
            task.mean_ms,
            task.max_ms,
            format_size(task.bytes, DECIMAL)
        );
    }

    if !snapshot.last_errors.is_empty() {
        println!("\n   Last errors:");
        for (name, error) in &snapshot.last_errors {
            println!("   {:<32} {}", name, error);
        }
    }
}
