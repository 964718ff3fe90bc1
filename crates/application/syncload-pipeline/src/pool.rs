use std::future::Future;
use std::num::NonZeroU32;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::stream::{self, StreamExt};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use syncload_core::{ResourceRequest, SessionConfig, StagingDirectory, SyncOutcome};
use syncload_infra::{SessionError, SessionRunner};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::error;

#[derive(Debug, Clone, Copy, Default)]
pub struct PoolOptions {
    /// Sessions allowed to run at once. `None` leaves it to the runtime.
    pub max_in_flight: Option<usize>,
    /// Sessions started per second across the pool.
    pub rate_per_sec: Option<NonZeroU32>,
}

/// Completion of one submitted session.
pub struct SessionHandle {
    inner: JoinHandle<Result<SyncOutcome, SessionError>>,
}

impl Future for SessionHandle {
    type Output = Result<SyncOutcome, SessionError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner).poll(cx).map(|joined| match joined {
            Ok(res) => res,
            Err(e) => {
                error!("Session task did not complete: {e}");
                Err(SessionError::Aborted(e.to_string()))
            }
        })
    }
}

struct InFlightGuard(Arc<AtomicUsize>);

impl InFlightGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Runs every submitted request as its own task so a slow or hung session
/// never holds up its siblings. Each request is attempted exactly once.
#[derive(Clone)]
pub struct SessionPool {
    runner: Arc<dyn SessionRunner>,
    config: Arc<SessionConfig>,
    staging: Arc<StagingDirectory>,
    permits: Option<Arc<Semaphore>>,
    limiter: Option<Arc<DefaultDirectRateLimiter>>,
    max_in_flight: Option<usize>,
    in_flight: Arc<AtomicUsize>,
}

impl SessionPool {
    pub fn new(
        runner: Arc<dyn SessionRunner>,
        config: Arc<SessionConfig>,
        staging: Arc<StagingDirectory>,
        options: PoolOptions,
    ) -> Self {
        let max_in_flight = options.max_in_flight.map(|n| n.max(1));
        Self {
            runner,
            config,
            staging,
            permits: max_in_flight.map(|n| Arc::new(Semaphore::new(n))),
            limiter: options
                .rate_per_sec
                .map(|rps| {
                    // No burst: starts are spread evenly across each second.
                    let quota = Quota::per_second(rps).allow_burst(NonZeroU32::MIN);
                    Arc::new(RateLimiter::direct(quota))
                }),
            max_in_flight,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn staging(&self) -> &StagingDirectory {
        &self.staging
    }

    /// Sessions currently past admission and running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Enqueue a request and return immediately. Must be called from within a
    /// tokio runtime.
    pub fn submit(&self, request: ResourceRequest) -> SessionHandle {
        let runner = self.runner.clone();
        let config = self.config.clone();
        let staging = self.staging.clone();
        let permits = self.permits.clone();
        let limiter = self.limiter.clone();
        let in_flight = self.in_flight.clone();

        let inner = tokio::spawn(async move {
            let _permit = match permits {
                Some(sem) => Some(
                    sem.acquire_owned()
                        .await
                        .map_err(|e| SessionError::Aborted(e.to_string()))?,
                ),
                None => None,
            };
            if let Some(lim) = &limiter {
                lim.until_ready().await;
            }
            let _guard = InFlightGuard::enter(&in_flight);
            runner.run(&config, &staging, &request).await
        });

        SessionHandle { inner }
    }

    /// Submit a batch and wait for all of it. Results come back in completion order.
    pub async fn run_batch(
        &self,
        requests: Vec<ResourceRequest>,
    ) -> Vec<(ResourceRequest, Result<SyncOutcome, SessionError>)> {
        let width = self.max_in_flight.unwrap_or(requests.len()).max(1);
        stream::iter(requests)
            .map(|request| {
                let handle = self.submit(request.clone());
                async move { (request, handle.await) }
            })
            .buffer_unordered(width)
            .collect()
            .await
    }
}
