//! Fixed-size async worker pool.
//!
//! N worker tasks pull jobs from one shared queue. Every job is delivered
//! exactly once: either with the work function's result, with a timeout or
//! panic error, or (if the pool stops before the job starts) with a
//! `Shutdown` error.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{PrwatchError, Result};
use crate::pool::result::BatchResult;

/// Default per-job timeout
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(10);

/// Work function run for every job
pub type WorkFn<I, O> = Arc<dyn Fn(I) -> BoxFuture<'static, Result<O>> + Send + Sync>;

type Completion<O> = Box<dyn FnOnce(BatchResult<O>) + Send>;

/// Pool sizing and limits
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub workers: usize,
    pub job_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            job_timeout: DEFAULT_JOB_TIMEOUT,
        }
    }
}

struct Job<I, O> {
    index: usize,
    input: Option<I>,
    complete: Option<Completion<O>>,
}

impl<I, O> Job<I, O> {
    fn deliver(&mut self, result: Result<O>) {
        if let Some(complete) = self.complete.take() {
            complete(BatchResult::new(self.index, result));
        }
    }
}

impl<I, O> Drop for Job<I, O> {
    fn drop(&mut self) {
        // Never started: the pool stopped with this job still queued.
        self.deliver(Err(PrwatchError::Shutdown("job discarded before it started".to_string())));
    }
}

struct PoolState<I, O> {
    sender: Option<mpsc::UnboundedSender<Job<I, O>>>,
    receiver: Option<Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Job<I, O>>>>>,
    stop: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

/// Bounded-concurrency pool running `work` over submitted inputs
pub struct WorkerPool<I, O> {
    config: PoolConfig,
    work: WorkFn<I, O>,
    state: Mutex<PoolState<I, O>>,
}

impl<I, O> WorkerPool<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Create a stopped pool with `workers` workers (at least one)
    pub fn new<F, Fut>(workers: usize, work: F) -> Self
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<O>> + Send + 'static,
    {
        Self::with_config(
            PoolConfig {
                workers,
                ..Default::default()
            },
            work,
        )
    }

    /// Create a stopped pool from a full config
    pub fn with_config<F, Fut>(config: PoolConfig, work: F) -> Self
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<O>> + Send + 'static,
    {
        let config = PoolConfig {
            workers: config.workers.max(1),
            ..config
        };
        let work: WorkFn<I, O> = Arc::new(move |input| work(input).boxed());
        Self {
            config,
            work,
            state: Mutex::new(PoolState {
                sender: None,
                receiver: None,
                stop: CancellationToken::new(),
                workers: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState<I, O>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn worker_count(&self) -> usize {
        self.config.workers
    }

    pub fn is_running(&self) -> bool {
        self.lock().sender.is_some()
    }

    /// Spawn the workers. No-op if already running.
    pub fn start(&self) {
        let mut state = self.lock();
        if state.sender.is_some() {
            return;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let stop = CancellationToken::new();

        state.workers = (0..self.config.workers)
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    Arc::clone(&rx),
                    Arc::clone(&self.work),
                    stop.clone(),
                    self.config.job_timeout,
                ))
            })
            .collect();
        state.sender = Some(tx);
        state.receiver = Some(rx);
        state.stop = stop;

        tracing::debug!(workers = self.config.workers, "Worker pool started");
    }

    /// Stop the pool. In-flight jobs finish; queued jobs are discarded.
    /// No-op if already stopped.
    pub async fn stop(&self) {
        let (workers, receiver) = {
            let mut state = self.lock();
            if state.sender.take().is_none() {
                return;
            }
            state.stop.cancel();
            (std::mem::take(&mut state.workers), state.receiver.take())
        };

        for handle in workers {
            if let Err(e) = handle.await {
                tracing::error!(error = ?e, "Pool worker panicked");
            }
        }

        if let Some(receiver) = receiver {
            let mut rx = receiver.lock().await;
            rx.close();
            let mut discarded = 0usize;
            while rx.try_recv().is_ok() {
                discarded += 1;
            }
            if discarded > 0 {
                tracing::debug!(discarded, "Discarded queued jobs on stop");
            }
        }

        tracing::debug!("Worker pool stopped");
    }

    fn enqueue(&self, index: usize, input: I, complete: Completion<O>) {
        let job = Job {
            index,
            input: Some(input),
            complete: Some(complete),
        };
        let sender = self.lock().sender.clone();
        match sender {
            // A failed send hands the job back; dropping it delivers Shutdown.
            Some(sender) => {
                let _ = sender.send(job);
            }
            None => drop(job),
        }
    }

    /// Submit one job; the receiver yields its result.
    pub fn submit(&self, input: I) -> oneshot::Receiver<BatchResult<O>> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(
            0,
            input,
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        );
        rx
    }

    /// Run every input through the pool and wait for all of them.
    ///
    /// `result[i]` always belongs to `inputs[i]`, whatever the completion order.
    pub async fn process_batch(&self, inputs: Vec<I>) -> Vec<BatchResult<O>> {
        let receivers: Vec<_> = inputs
            .into_iter()
            .enumerate()
            .map(|(index, input)| {
                let (tx, rx) = oneshot::channel();
                self.enqueue(
                    index,
                    input,
                    Box::new(move |result| {
                        let _ = tx.send(result);
                    }),
                );
                rx
            })
            .collect();

        let mut results = Vec::with_capacity(receivers.len());
        for (index, rx) in receivers.into_iter().enumerate() {
            let result = rx.await.unwrap_or_else(|_| {
                BatchResult::new(index, Err(PrwatchError::Shutdown("result channel closed".to_string())))
            });
            results.push(result);
        }
        results
    }

    /// Streaming variant of `process_batch`.
    ///
    /// `callback(index, result)` runs on the worker that finished the job, as
    /// soon as it finishes; calls may overlap, so the callback must do its own
    /// synchronization. Returns once every input has been reported.
    pub async fn process_batch_with_callback<F>(&self, inputs: Vec<I>, callback: F) -> usize
    where
        F: Fn(usize, BatchResult<O>) + Send + Sync + 'static,
    {
        let callback = Arc::new(callback);
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<()>();
        let total = inputs.len();

        for (index, input) in inputs.into_iter().enumerate() {
            let callback = Arc::clone(&callback);
            let done_tx = done_tx.clone();
            self.enqueue(
                index,
                input,
                Box::new(move |result| {
                    callback(result.index, result);
                    let _ = done_tx.send(());
                }),
            );
        }
        drop(done_tx);

        let mut reported = 0;
        while reported < total && done_rx.recv().await.is_some() {
            reported += 1;
        }
        reported
    }
}

impl<I, O> Drop for WorkerPool<I, O> {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(|e| e.into_inner());
        state.sender = None;
        state.stop.cancel();
    }
}

async fn worker_loop<I, O>(
    worker_id: usize,
    receiver: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Job<I, O>>>>,
    work: WorkFn<I, O>,
    stop: CancellationToken,
    job_timeout: Duration,
) where
    I: Send + 'static,
    O: Send + 'static,
{
    loop {
        let next = {
            let mut rx = receiver.lock().await;
            tokio::select! {
                biased;
                _ = stop.cancelled() => None,
                job = rx.recv() => job,
            }
        };
        let Some(mut job) = next else {
            break;
        };
        if stop.is_cancelled() {
            // Dropping delivers the discard error.
            break;
        }

        let Some(input) = job.input.take() else {
            continue;
        };
        let outcome = tokio::time::timeout(job_timeout, AssertUnwindSafe(work(input)).catch_unwind()).await;
        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => {
                tracing::error!(worker = worker_id, index = job.index, "Pool job panicked");
                Err(PrwatchError::Degraded(format!("job {} panicked", job.index)))
            }
            Err(_) => Err(PrwatchError::Timeout(job_timeout)),
        };
        job.deliver(result);
    }
    tracing::trace!(worker = worker_id, "Pool worker exiting");
}
