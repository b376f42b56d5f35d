//! Concurrent fan-out with per-task timeouts and an aggregate report.
//!
//! Every submitted task produces exactly one [`TaskOutcome`]: success,
//! application error, timeout, cancellation, or panic. A failing or stalled
//! task never aborts its siblings.

use crate::{Error, ErrorContext, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// One unit of work submitted to a [`FanOut`].
pub struct FanOutTask<T> {
    id: String,
    timeout: Option<Duration>,
    fut: BoxFuture<'static, Result<T>>,
}

impl<T> FanOutTask<T> {
    pub fn new<Fut>(id: impl Into<String>, fut: Fut) -> Self
    where
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            id: id.into(),
            timeout: None,
            fut: Box::pin(fut),
        }
    }

    /// Task identified by a generated UUID.
    pub fn anonymous<Fut>(fut: Fut) -> Self
    where
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self::new(Uuid::new_v4().to_string(), fut)
    }

    /// Override the fan-out's default timeout for this task only.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl<T> std::fmt::Debug for FanOutTask<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanOutTask")
            .field("id", &self.id)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct TaskOutcome<T> {
    pub id: String,
    pub result: Result<T>,
    pub elapsed: Duration,
}

impl<T> TaskOutcome<T> {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn error(&self) -> Option<&Error> {
        self.result.as_ref().err()
    }
}

/// Aggregate of every task's terminal outcome, in completion order.
#[derive(Debug)]
pub struct FanOutReport<T> {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub outcomes: Vec<TaskOutcome<T>>,
    pub elapsed: Duration,
}

impl<T> FanOutReport<T> {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.succeeded as f64 / self.total as f64
        }
    }

    /// Failed tasks as `(id, error)`.
    pub fn errors(&self) -> impl Iterator<Item = (&str, &Error)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.error().map(|e| (o.id.as_str(), e)))
    }

    pub fn outcome(&self, id: &str) -> Option<&TaskOutcome<T>> {
        self.outcomes.iter().find(|o| o.id == id)
    }
}

/// Runs independent tasks concurrently, each bounded by its own timeout.
///
/// Concurrency is unbounded (one spawned unit per task) unless
/// [`with_max_concurrency`](Self::with_max_concurrency) is set.
#[derive(Debug, Clone)]
pub struct FanOut {
    task_timeout: Duration,
    max_concurrency: Option<usize>,
    cancel: Option<CancellationToken>,
}

impl FanOut {
    pub fn new(task_timeout: Duration) -> Self {
        Self {
            task_timeout,
            max_concurrency: None,
            cancel: None,
        }
    }

    /// Cap simultaneously running tasks. A task's timeout starts once it holds a slot.
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit.max(1));
        self
    }

    /// Tasks still pending or running when `token` is cancelled report [`Error::Cancelled`].
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn task_timeout(&self) -> Duration {
        self.task_timeout
    }

    pub fn max_concurrency(&self) -> Option<usize> {
        self.max_concurrency
    }

    pub async fn run<T>(&self, tasks: Vec<FanOutTask<T>>) -> FanOutReport<T>
    where
        T: Send + 'static,
    {
        let start = Instant::now();
        let total = tasks.len();
        // One slot per task so no unit ever blocks on send.
        let (tx, mut rx) = mpsc::channel::<TaskOutcome<T>>(total.max(1));
        let slots = self.max_concurrency.map(|n| Arc::new(Semaphore::new(n)));

        for task in tasks {
            let tx = tx.clone();
            let slots = slots.clone();
            let cancel = self.cancel.clone();
            let default_timeout = self.task_timeout;

            tokio::spawn(async move {
                let FanOutTask { id, timeout, fut } = task;
                let timeout = timeout.unwrap_or(default_timeout);
                let started = Instant::now();

                let body = async {
                    let _permit = match slots {
                        Some(sem) => match sem.acquire_owned().await {
                            Ok(permit) => Some(permit),
                            Err(_) => {
                                return Err(Error::Permanent {
                                    message: format!("task '{}' lost its concurrency slot", id),
                                    context: ErrorContext::new().with_source("fan_out"),
                                })
                            }
                        },
                        None => None,
                    };
                    run_bounded(&id, fut, timeout).await
                };

                let result = match cancel {
                    Some(token) => tokio::select! {
                        biased;
                        _ = token.cancelled() => Err(Error::cancelled(format!("task '{}' cancelled", id))),
                        r = body => r,
                    },
                    None => body.await,
                };

                // Capacity equals the task count, so this never waits.
                let _ = tx
                    .send(TaskOutcome {
                        id,
                        result,
                        elapsed: started.elapsed(),
                    })
                    .await;
            });
        }
        drop(tx);

        // The channel closes once every unit has reported and dropped its sender.
        let mut outcomes = Vec::with_capacity(total);
        while let Some(outcome) = rx.recv().await {
            outcomes.push(outcome);
        }

        let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
        let failed = outcomes.len() - succeeded;
        let elapsed = start.elapsed();
        info!(
            total,
            succeeded,
            failed,
            elapsed_ms = elapsed.as_millis() as u64,
            "fan-out complete"
        );

        FanOutReport {
            total,
            succeeded,
            failed,
            outcomes,
            elapsed,
        }
    }
}

/// Run `tasks` concurrently, each bounded by `per_task_timeout`.
pub async fn fan_out<T>(tasks: Vec<FanOutTask<T>>, per_task_timeout: Duration) -> FanOutReport<T>
where
    T: Send + 'static,
{
    FanOut::new(per_task_timeout).run(tasks).await
}

async fn run_bounded<T>(
    id: &str,
    fut: BoxFuture<'static, Result<T>>,
    timeout: Duration,
) -> Result<T> {
    match tokio::time::timeout(timeout, AssertUnwindSafe(fut).catch_unwind()).await {
        Ok(Ok(result)) => result,
        Ok(Err(panic)) => Err(Error::Permanent {
            message: format!("task '{}' panicked: {}", id, panic_message(panic.as_ref())),
            context: ErrorContext::new().with_source("fan_out"),
        }),
        Err(_) => {
            debug!(
                task = id,
                timeout_ms = timeout.as_millis() as u64,
                "fan-out task timed out"
            );
            Err(Error::FanOutTimeout {
                task: id.to_string(),
                timeout,
            })
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
