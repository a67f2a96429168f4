//! Single-worker cooperative executor. Submitted work runs one unit at a
//! time in FIFO order; every unit gets its own child cancellation token
//! and reports back through a single-shot future.

use std::panic::AssertUnwindSafe;
use std::sync::Mutex;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::WorkError;

/// Queued submissions beyond the running unit. Submissions never block;
/// a full backlog rejects the work.
const BACKLOG: usize = 128;

struct Job {
    cancel: CancellationToken,
    run: Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, ()> + Send>,
}

/// Handle to one scheduled unit's eventual result. Yields exactly one
/// value; dropping the scheduler side resolves it with
/// [`WorkError::SchedulerClosed`].
pub struct WorkFuture<T> {
    rx: oneshot::Receiver<Result<T, WorkError>>,
    cancel: CancellationToken,
}

impl<T> WorkFuture<T> {
    /// Await the unit's result.
    pub async fn recv(&mut self) -> Result<T, WorkError> {
        match (&mut self.rx).await {
            Ok(result) => result,
            Err(_) => Err(WorkError::SchedulerClosed),
        }
    }

    /// Cancel the unit. The worker observes the token and resolves the
    /// future with [`WorkError::Canceled`].
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

/// Single-worker scheduler. Clone-free; share it behind an `Arc`.
pub struct Scheduler {
    tx: mpsc::Sender<Job>,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Spawn the worker task and return the handle used to submit work.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(BACKLOG);
        let shutdown = CancellationToken::new();
        let worker = tokio::spawn(worker_loop(rx, shutdown.clone()));
        Self {
            tx,
            shutdown,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Enqueue a unit of work. Returns immediately with the future; the
    /// closure runs on the worker with a child cancellation token.
    pub fn add_work<T, F>(&self, work: F) -> WorkFuture<T>
    where
        T: Send + 'static,
        F: FnOnce(CancellationToken) -> BoxFuture<'static, Result<T, WorkError>> + Send + 'static,
    {
        let cancel = self.shutdown.child_token();
        let (result_tx, result_rx) = oneshot::channel();
        let future = WorkFuture {
            rx: result_rx,
            cancel: cancel.clone(),
        };

        if self.shutdown.is_cancelled() {
            // result_tx drops here; recv resolves with SchedulerClosed.
            return future;
        }

        let job = Job {
            cancel,
            run: Box::new(move |token: CancellationToken| {
                Box::pin(async move {
                    let result = if token.is_cancelled() {
                        Err(WorkError::Canceled)
                    } else {
                        let unit = AssertUnwindSafe(work(token.clone())).catch_unwind();
                        tokio::select! {
                            () = token.cancelled() => Err(WorkError::Canceled),
                            caught = unit => match caught {
                                Ok(result) => result,
                                Err(payload) => Err(WorkError::Panic(panic_message(&payload))),
                            },
                        }
                    };
                    let _ = result_tx.send(result);
                })
            }),
        };

        if let Err(err) = self.tx.try_send(job) {
            // Rejected job drops its sender; the future resolves with
            // SchedulerClosed without the work ever running.
            warn!("scheduler rejected work: {}", rejection_reason(&err));
        }
        future
    }

    /// Stop accepting work, cancel the running unit, and wait for the
    /// worker to drain. Outstanding futures resolve with
    /// [`WorkError::SchedulerClosed`] (or [`WorkError::Canceled`] for the
    /// unit that was running).
    pub async fn close(&self) {
        self.shutdown.cancel();
        let handle = self.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

async fn worker_loop(mut rx: mpsc::Receiver<Job>, shutdown: CancellationToken) {
    loop {
        let job = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            job = rx.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };
        let token = job.cancel.clone();
        (job.run)(token).await;
    }
    debug!("scheduler worker stopped");
    // Remaining queued jobs drop with the receiver, resolving their
    // futures with SchedulerClosed.
}

fn rejection_reason<T>(err: &mpsc::error::TrySendError<T>) -> &'static str {
    match err {
        mpsc::error::TrySendError::Full(_) => "backlog full",
        mpsc::error::TrySendError::Closed(_) => "shutting down",
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn work_returns_result() {
        let scheduler = Scheduler::new();
        let mut future = scheduler.add_work(|_token| async { Ok(21 * 2) }.boxed());
        assert_eq!(future.recv().await.unwrap(), 42);
        scheduler.close().await;
    }

    #[tokio::test]
    async fn submissions_complete_in_fifo_order() {
        let scheduler = Scheduler::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut futures = Vec::new();
        for name in ["a", "b", "c"] {
            let order = Arc::clone(&order);
            futures.push(scheduler.add_work(move |_token| {
                async move {
                    order.lock().unwrap().push(name);
                    Ok(name)
                }
                .boxed()
            }));
        }

        for future in &mut futures {
            future.recv().await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c"]);
        scheduler.close().await;
    }

    #[tokio::test]
    async fn at_most_one_unit_runs_at_a_time() {
        let scheduler = Scheduler::new();
        let running = Arc::new(Mutex::new((0usize, 0usize))); // (current, max)

        let mut futures = Vec::new();
        for _ in 0..5 {
            let running = Arc::clone(&running);
            futures.push(scheduler.add_work(move |_token| {
                async move {
                    {
                        let mut guard = running.lock().unwrap();
                        guard.0 += 1;
                        guard.1 = guard.1.max(guard.0);
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    running.lock().unwrap().0 -= 1;
                    Ok(())
                }
                .boxed()
            }));
        }
        for future in &mut futures {
            future.recv().await.unwrap();
        }
        assert_eq!(running.lock().unwrap().1, 1);
        scheduler.close().await;
    }

    #[tokio::test]
    async fn stop_cancels_running_unit() {
        let scheduler = Scheduler::new();
        let started = Arc::new(Notify::new());

        let started_signal = Arc::clone(&started);
        let mut future = scheduler.add_work(move |token| {
            async move {
                started_signal.notify_one();
                token.cancelled().await;
                // The select in the worker resolves first; this value is
                // never delivered.
                Ok(())
            }
            .boxed()
        });

        started.notified().await;
        future.stop();
        assert!(matches!(future.recv().await, Err(WorkError::Canceled)));
        scheduler.close().await;
    }

    #[tokio::test]
    async fn stop_before_run_skips_the_work() {
        let scheduler = Scheduler::new();
        let gate = Arc::new(Notify::new());

        // Occupy the worker so the second submission stays queued.
        let gate_wait = Arc::clone(&gate);
        let mut first = scheduler.add_work(move |_token| {
            async move {
                gate_wait.notified().await;
                Ok(())
            }
            .boxed()
        });

        let ran = Arc::new(Mutex::new(false));
        let ran_flag = Arc::clone(&ran);
        let mut second = scheduler.add_work(move |_token| {
            async move {
                *ran_flag.lock().unwrap() = true;
                Ok(())
            }
            .boxed()
        });

        second.stop();
        gate.notify_one();
        first.recv().await.unwrap();
        assert!(matches!(second.recv().await, Err(WorkError::Canceled)));
        assert!(!*ran.lock().unwrap());
        scheduler.close().await;
    }

    #[tokio::test]
    async fn panic_is_recovered_as_error() {
        let scheduler = Scheduler::new();
        let mut future = scheduler.add_work(|_token| {
            async {
                if true {
                    panic!("inventory exploded");
                }
                Ok(())
            }
            .boxed()
        });
        match future.recv().await {
            Err(WorkError::Panic(msg)) => assert!(msg.contains("inventory exploded")),
            other => panic!("expected panic error, got {other:?}"),
        }

        // The worker survives and keeps serving.
        let mut next = scheduler.add_work(|_token| async { Ok(1) }.boxed());
        assert_eq!(next.recv().await.unwrap(), 1);
        scheduler.close().await;
    }

    #[tokio::test]
    async fn add_work_after_close_is_rejected() {
        let scheduler = Scheduler::new();
        scheduler.close().await;

        let mut future = scheduler.add_work(|_token| async { Ok(()) }.boxed());
        assert!(matches!(future.recv().await, Err(WorkError::SchedulerClosed)));
    }

    #[tokio::test]
    async fn close_cancels_running_and_drains_queued() {
        let scheduler = Scheduler::new();
        let started = Arc::new(Notify::new());

        let started_signal = Arc::clone(&started);
        let mut running = scheduler.add_work(move |token| {
            async move {
                started_signal.notify_one();
                token.cancelled().await;
                Ok(())
            }
            .boxed()
        });
        let mut queued = scheduler.add_work(|_token| async { Ok(()) }.boxed());

        started.notified().await;
        scheduler.close().await;

        assert!(matches!(running.recv().await, Err(WorkError::Canceled)));
        assert!(matches!(queued.recv().await, Err(WorkError::SchedulerClosed)));
    }
}
