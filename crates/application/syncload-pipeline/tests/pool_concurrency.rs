use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use nonzero_ext::nonzero;
use syncload_core::{
    Endpoint, OutcomeStatus, ResourceRequest, SessionConfig, StagingDirectory, SyncOutcome,
};
use syncload_pipeline::{PoolOptions, SessionError, SessionPool, SessionRunner};

/// Sleeps for the number of milliseconds named by the last path segment.
#[derive(Default)]
struct SleepyRunner {
    running: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl SessionRunner for SleepyRunner {
    async fn run(
        &self,
        _config: &SessionConfig,
        staging: &StagingDirectory,
        request: &ResourceRequest,
    ) -> Result<SyncOutcome, SessionError> {
        staging.resolve(request.name()).map_err(|e| match e {
            syncload_core::ResolveError::Traversal(t) => SessionError::Traversal(t),
            other => SessionError::Aborted(other.to_string()),
        })?;
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let ms: u64 = request
            .name()
            .rsplit('/')
            .next()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let started = Instant::now();
        tokio::time::sleep(Duration::from_millis(ms)).await;

        self.running.fetch_sub(1, Ordering::SeqCst);
        let status = if request.name().starts_with("fail") {
            OutcomeStatus::NonZeroExit(10)
        } else {
            OutcomeStatus::Success
        };
        Ok(SyncOutcome {
            status,
            output: Vec::new(),
            elapsed: started.elapsed(),
        })
    }
}

fn pool(runner: Arc<SleepyRunner>, options: PoolOptions) -> SessionPool {
    let config = SessionConfig::new(Endpoint::parse("example.org").unwrap());
    let staging = StagingDirectory::temporary("syncload-pool-").unwrap();
    SessionPool::new(runner, Arc::new(config), Arc::new(staging), options)
}

#[tokio::test]
async fn concurrent_sessions_take_max_not_sum() {
    let runner = Arc::new(SleepyRunner::default());
    let pool = pool(runner.clone(), PoolOptions::default());

    let started = Instant::now();
    let handles: Vec<_> = (0..8)
        .map(|i| pool.submit(ResourceRequest::new(format!("mod{i}/300"))))
        .collect();
    for h in handles {
        assert_eq!(h.await.unwrap().status, OutcomeStatus::Success);
    }
    let took = started.elapsed();

    // Sum would be 2.4s.
    assert!(took < Duration::from_millis(1200), "took {took:?}");
    assert_eq!(runner.peak.load(Ordering::SeqCst), 8);
}

#[tokio::test]
async fn slow_session_does_not_block_fast_one() {
    let runner = Arc::new(SleepyRunner::default());
    let pool = pool(runner, PoolOptions::default());

    let slow = pool.submit(ResourceRequest::new("slow/2000"));
    let started = Instant::now();
    let fast = pool.submit(ResourceRequest::new("fast/10"));

    fast.await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(1000));
    assert_eq!(pool.in_flight(), 1);
    slow.await.unwrap();
    assert_eq!(pool.in_flight(), 0);
}

#[tokio::test]
async fn max_in_flight_bounds_concurrency() {
    let runner = Arc::new(SleepyRunner::default());
    let pool = pool(
        runner.clone(),
        PoolOptions {
            max_in_flight: Some(2),
            rate_per_sec: None,
        },
    );

    let requests = (0..6)
        .map(|i| ResourceRequest::new(format!("mod{i}/50")))
        .collect();
    let results = pool.run_batch(requests).await;

    assert_eq!(results.len(), 6);
    assert!(results.iter().all(|(_, r)| r.is_ok()));
    assert_eq!(runner.peak.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn failures_do_not_affect_siblings_and_are_not_retried() {
    let runner = Arc::new(SleepyRunner::default());
    let pool = pool(runner.clone(), PoolOptions::default());

    let requests = vec![
        ResourceRequest::new("fail/20"),
        ResourceRequest::new("ok/20"),
        ResourceRequest::new("../escape/20"),
    ];
    let results = pool.run_batch(requests).await;
    assert_eq!(results.len(), 3);

    for (req, res) in results {
        match req.name() {
            "fail/20" => assert_eq!(res.unwrap().status, OutcomeStatus::NonZeroExit(10)),
            "ok/20" => assert_eq!(res.unwrap().status, OutcomeStatus::Success),
            _ => assert!(matches!(res, Err(SessionError::Traversal(_)))),
        }
    }
    assert_eq!(runner.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn rate_limit_spaces_session_starts() {
    let runner = Arc::new(SleepyRunner::default());
    let pool = pool(
        runner,
        PoolOptions {
            max_in_flight: None,
            rate_per_sec: Some(nonzero!(10u32)),
        },
    );

    let started = Instant::now();
    let requests = (0..3)
        .map(|i| ResourceRequest::new(format!("mod{i}/0")))
        .collect();
    pool.run_batch(requests).await;

    // The first start is free; the next two wait ~100ms each.
    assert!(started.elapsed() >= Duration::from_millis(150), "{:?}", started.elapsed());
}
