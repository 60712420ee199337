//! Scheduled task pool
//!
//! A small, fixed number of worker tasks draining one FIFO queue. Subsystems
//! share the pool and must not assume dedicated capacity: when every worker is
//! busy, submitted jobs wait in the queue.
//!
//! Delayed and periodic jobs are driven by lightweight timer tasks that push
//! each run onto the same queue, so all work runs on the pool workers.

use crate::error::GatewayError;

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

/// Default worker count
pub const DEFAULT_WORKERS: usize = 3;

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Shared handle to the pool. Clones submit to the same workers.
#[derive(Clone)]
pub struct TaskPool {
    inner: Arc<Inner>,
}

struct Inner {
    job_tx: mpsc::UnboundedSender<Job>,
    shutdown_tx: broadcast::Sender<()>,
    closed: AtomicBool,
    workers: usize,
}

impl TaskPool {
    /// Start `workers` worker tasks. Must be called inside a Tokio runtime.
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        let (job_tx, job_rx) = mpsc::unbounded_channel::<Job>();
        let job_rx = Arc::new(Mutex::new(job_rx));
        let (shutdown_tx, _) = broadcast::channel(1);

        for worker_id in 0..workers {
            let job_rx = Arc::clone(&job_rx);
            tokio::spawn(worker_task(worker_id, job_rx));
        }

        info!(workers, "Scheduled task pool started");

        Self {
            inner: Arc::new(Inner {
                job_tx,
                shutdown_tx,
                closed: AtomicBool::new(false),
                workers,
            }),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.inner.workers
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Queue a job to run as soon as a worker is free
    pub fn submit<F>(&self, job: F) -> Result<(), GatewayError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_shut_down() {
            return Err(GatewayError::TaskPoolClosed);
        }
        self.inner
            .job_tx
            .send(Box::pin(job))
            .map_err(|_| GatewayError::TaskPoolClosed)
    }

    /// Queue a job after `delay`
    pub fn schedule<F>(&self, delay: Duration, job: F) -> Result<(), GatewayError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_shut_down() {
            return Err(GatewayError::TaskPoolClosed);
        }

        let pool = self.clone();
        let mut shutdown_rx = self.inner.shutdown_tx.subscribe();

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    if let Err(e) = pool.submit(job) {
                        debug!(error = %e, "Delayed job dropped");
                    }
                }
                _ = shutdown_rx.recv() => {}
            }
        });

        Ok(())
    }

    /// Queue `task()` every `period`, first after `initial_delay`.
    ///
    /// At most one run of `task` is queued or running at a time. The next tick
    /// waits for the previous run; ticks missed meanwhile are delayed, not burst.
    pub fn schedule_at_fixed_rate<F, Fut>(
        &self,
        name: &'static str,
        initial_delay: Duration,
        period: Duration,
        task: F,
    ) -> Result<(), GatewayError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.is_shut_down() {
            return Err(GatewayError::TaskPoolClosed);
        }
        if period.is_zero() {
            return Err(GatewayError::Config(format!(
                "periodic task '{name}' needs a non-zero period"
            )));
        }

        let pool = self.clone();
        let mut shutdown_rx = self.inner.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + initial_delay, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown_rx.recv() => break,
                }

                let (done_tx, done_rx) = oneshot::channel::<()>();
                let run = task();
                let queued = pool.submit(async move {
                    run.await;
                    let _ = done_tx.send(());
                });
                if queued.is_err() {
                    break;
                }

                // A panicking run drops `done_tx`, which also ends the wait
                tokio::select! {
                    _ = done_rx => {}
                    _ = shutdown_rx.recv() => break,
                }
            }
            debug!(task = name, "Periodic task stopped");
        });

        info!(task = name, period_secs = period.as_secs_f64(), "Periodic task scheduled");
        Ok(())
    }

    /// Stop timers and refuse new jobs. Already queued jobs still run.
    pub fn shutdown(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            let _ = self.inner.shutdown_tx.send(());
            info!("Scheduled task pool shut down");
        }
    }
}

async fn worker_task(worker_id: usize, job_rx: Arc<Mutex<mpsc::UnboundedReceiver<Job>>>) {
    loop {
        let job = {
            let mut rx = job_rx.lock().await;
            rx.recv().await
        };

        let Some(job) = job else {
            debug!(worker_id, "Task pool worker exiting");
            return;
        };

        // Run on its own task so a panicking job does not take the worker down
        if let Err(e) = tokio::spawn(job).await {
            error!(worker_id, error = %e, "Scheduled job panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_single_worker_runs_in_submission_order() {
        let pool = TaskPool::new(1);
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));

        for i in 0..5 {
            let seen = Arc::clone(&seen);
            pool.submit(async move {
                seen.lock().unwrap().push(i);
            })
            .unwrap();
        }

        let (done_tx, done_rx) = oneshot::channel();
        pool.submit(async move {
            let _ = done_tx.send(());
        })
        .unwrap();
        done_rx.await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_jobs_queue_when_saturated() {
        let pool = TaskPool::new(2);
        let (release_tx, _) = broadcast::channel::<()>(1);
        let finished = Arc::new(AtomicUsize::new(0));

        for _ in 0..4 {
            let mut release = release_tx.subscribe();
            let finished = Arc::clone(&finished);
            pool.submit(async move {
                let _ = release.recv().await;
                finished.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 0);

        // Two blocked workers, two queued jobs; keep releasing until all ran
        for _ in 0..50 {
            let _ = release_tx.send(());
            if finished.load(Ordering::SeqCst) == 4 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(finished.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_worker_survives_panicking_job() {
        let pool = TaskPool::new(1);
        pool.submit(async {
            panic!("boom");
        })
        .unwrap();

        let (tx, rx) = oneshot::channel();
        pool.submit(async move {
            let _ = tx.send(7);
        })
        .unwrap();
        assert_eq!(rx.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_delayed_job_runs() {
        let pool = TaskPool::new(1);
        let (tx, rx) = oneshot::channel();
        pool.schedule(Duration::from_millis(20), async move {
            let _ = tx.send(());
        })
        .unwrap();
        tokio::time::timeout(Duration::from_secs(2), rx).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_periodic_job_repeats_until_shutdown() {
        let pool = TaskPool::new(1);
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);

        pool.schedule_at_fixed_rate("counter", Duration::ZERO, Duration::from_millis(10), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        pool.shutdown();
        let after_shutdown = runs.load(Ordering::SeqCst);
        assert!(after_shutdown >= 2, "expected repeated runs, got {after_shutdown}");

        tokio::time::sleep(Duration::from_millis(100)).await;
        // At most one tick may have been in flight at shutdown
        assert!(runs.load(Ordering::SeqCst) <= after_shutdown + 1);
    }

    #[tokio::test]
    async fn test_slow_periodic_job_never_overlaps_or_piles_up() {
        let pool = TaskPool::new(2);
        let runs = Arc::new(AtomicUsize::new(0));
        let running = Arc::new(AtomicUsize::new(0));
        let max_running = Arc::new(AtomicUsize::new(0));

        let (r, c, m) = (Arc::clone(&runs), Arc::clone(&running), Arc::clone(&max_running));
        pool.schedule_at_fixed_rate("slow", Duration::ZERO, Duration::from_millis(10), move || {
            let (runs, running, max_running) = (Arc::clone(&r), Arc::clone(&c), Arc::clone(&m));
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                max_running.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                runs.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        pool.shutdown();
        let at_shutdown = runs.load(Ordering::SeqCst);

        // 300ms of 50ms runs back to back, not one per 10ms tick
        assert!(at_shutdown >= 2, "expected repeated runs, got {at_shutdown}");
        assert!(at_shutdown <= 7, "runs piled up: {at_shutdown}");
        assert_eq!(max_running.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        // Only the run in flight at shutdown may still finish
        assert!(runs.load(Ordering::SeqCst) <= at_shutdown + 1);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_fails() {
        let pool = TaskPool::new(DEFAULT_WORKERS);
        assert_eq!(pool.worker_count(), 3);
        pool.shutdown();
        assert!(matches!(pool.submit(async {}), Err(GatewayError::TaskPoolClosed)));
        assert!(pool.schedule(Duration::ZERO, async {}).is_err());
    }

    #[tokio::test]
    async fn test_zero_period_is_rejected() {
        let pool = TaskPool::new(1);
        let result = pool.schedule_at_fixed_rate("bad", Duration::ZERO, Duration::ZERO, || async {});
        assert!(matches!(result, Err(GatewayError::Config(_))));
    }
}
