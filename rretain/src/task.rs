//! Pending results and the shared worker pool the store runs on.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use rust_box::task_exec_queue::{Builder, SpawnExt, TaskExecQueue};
use tokio::sync::oneshot;

use crate::error::{RetainError, RetainResult};

/// Handle to the outcome of a submitted store operation.
///
/// Completes exactly once. If the worker goes away without delivering,
/// the outcome is `StoreUnavailable`.
#[must_use = "a pending result does nothing unless awaited"]
pub struct PendingResult<T> {
    rx: oneshot::Receiver<RetainResult<T>>,
}

impl<T> PendingResult<T> {
    #[inline]
    fn channel() -> (oneshot::Sender<RetainResult<T>>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    /// Already completed, used for calls rejected before reaching the pool
    #[inline]
    pub fn ready(res: RetainResult<T>) -> Self {
        let (tx, p) = Self::channel();
        let _ = tx.send(res);
        p
    }

    /// Stop waiting. A mutation that was already applied is not rolled back.
    #[inline]
    pub fn cancel(mut self) {
        self.rx.close();
    }

    /// Outcome if it is already there.
    #[inline]
    pub fn try_take(&mut self) -> Option<RetainResult<T>> {
        match self.rx.try_recv() {
            Ok(res) => Some(res),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(dropped())),
        }
    }
}

impl<T> Future for PendingResult<T> {
    type Output = RetainResult<T>;

    #[inline]
    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(res)) => Poll::Ready(res),
            Poll::Ready(Err(_)) => Poll::Ready(Err(dropped())),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[inline]
fn dropped() -> RetainError {
    log::warn!("store task ended without a result");
    RetainError::StoreUnavailable("worker dropped the result".into())
}

/// Shared worker pool, separate from the tasks doing network I/O.
#[derive(Clone)]
pub struct Executor {
    exec: TaskExecQueue,
}

impl Executor {
    pub fn new(workers: usize, queue_max: usize) -> Self {
        let (exec, task_runner) = Builder::default().workers(workers).queue_max(queue_max).build();

        tokio::spawn(async move {
            task_runner.await;
        });

        Self { exec }
    }

    /// Queue `fut` on the pool, the caller gets the pending result right away.
    pub fn submit<F, T>(&self, fut: F) -> PendingResult<T>
    where
        F: Future<Output = RetainResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, pending) = PendingResult::channel();
        let exec = self.exec.clone();
        tokio::spawn(async move {
            let res = match fut.spawn(&exec).result().await {
                Ok(res) => res,
                Err(e) => {
                    log::warn!("execute store task failed, {}", e.to_string());
                    Err(RetainError::StoreUnavailable(e.to_string()))
                }
            };
            if tx.send(res).is_err() {
                log::debug!("pending result cancelled by the caller");
            }
        });
        pending
    }

    #[inline]
    pub fn active_count(&self) -> isize {
        self.exec.active_count()
    }

    #[inline]
    pub fn waiting_count(&self) -> isize {
        self.exec.waiting_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn submit_and_await() {
        let exec = Executor::new(4, 100);
        let p = exec.submit(async { Ok(1 + 1) });
        assert_eq!(p.await, Ok(2));

        let p: PendingResult<()> = exec.submit(async { Err(RetainError::QuotaExceeded("full".into())) });
        assert_eq!(p.await, Err(RetainError::QuotaExceeded("full".into())));
    }

    #[tokio::test]
    async fn ready_and_try_take() {
        let mut p = PendingResult::ready(Ok("x"));
        assert_eq!(p.try_take(), Some(Ok("x")));

        let exec = Executor::new(1, 10);
        let mut p = exec.submit(async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(())
        });
        assert_eq!(p.try_take(), None);
    }

    #[tokio::test]
    async fn dropped_sender() {
        let (tx, p) = PendingResult::<()>::channel();
        drop(tx);
        assert!(matches!(p.await, Err(RetainError::StoreUnavailable(_))));
    }

    #[tokio::test]
    async fn cancel_does_not_roll_back() {
        let exec = Executor::new(2, 10);
        let applied = Arc::new(AtomicBool::new(false));
        let a = applied.clone();
        let p = exec.submit(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            a.store(true, Ordering::SeqCst);
            Ok(())
        });
        p.cancel();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(applied.load(Ordering::SeqCst));
    }
}
