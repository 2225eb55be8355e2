//! Execution of controller requests
//!
//! [`TaskQueue`] runs one task at a time, in submission order, on a single
//! tokio task. [`DownloadPool`] runs downloads and revocations concurrently
//! up to a fixed limit. Both hand back a [`Pending`] result immediately.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::FutureExt;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tracing::error;

type Task = Pin<Box<dyn Future<Output = ()> + Send>>;

/// The request was dropped before it produced a result
///
/// Happens when the controller shuts down with the request still queued,
/// or when the request panicked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("The controller stopped before the request completed")]
pub struct ControllerStopped;

/// Result of a controller request that may still be running
///
/// Dropping it does not cancel the request.
#[must_use = "dropping a Pending ignores the result but the request still runs"]
#[derive(Debug)]
pub struct Pending<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> Pending<T> {
    fn channel() -> (oneshot::Sender<T>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    /// An already completed request
    pub fn ready(value: T) -> Self {
        let (tx, pending) = Self::channel();
        let _ = tx.send(value);
        pending
    }
}

impl<T> Future for Pending<T> {
    type Output = Result<T, ControllerStopped>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.map_err(|_| ControllerStopped))
    }
}

/// Wrap `future` so it reports its output to a new [`Pending`]
fn deliver<T, F>(future: F) -> (Task, Pending<T>)
where
    T: Send + 'static,
    F: Future<Output = T> + Send + 'static,
{
    let (tx, pending) = Pending::channel();
    let task = Box::pin(async move {
        match AssertUnwindSafe(future).catch_unwind().await {
            Ok(value) => {
                let _ = tx.send(value);
            }
            Err(_) => error!("controller task panicked"),
        }
    });
    (task, pending)
}

/// Serialized background queue
#[derive(Debug, Clone)]
pub struct TaskQueue {
    tx: mpsc::UnboundedSender<Task>,
}

impl TaskQueue {
    /// Start the worker. Must be called inside a tokio runtime.
    pub fn start() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Task>();
        tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                task.await;
            }
        });
        Self { tx }
    }

    /// Queue `future` behind every previously submitted task
    pub fn submit<T, F>(&self, future: F) -> Pending<T>
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
    {
        let (task, pending) = deliver(future);
        if self.tx.send(task).is_err() {
            error!("controller queue is closed; request dropped");
        }
        pending
    }
}

/// Bounded pool for long-running book transfers
#[derive(Debug, Clone)]
pub struct DownloadPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl DownloadPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Run `future` once a slot is free
    pub fn submit<T, F>(&self, future: F) -> Pending<T>
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        let (task, pending) = deliver(async move {
            let _permit = permits.acquire_owned().await;
            future.await
        });
        tokio::spawn(task);
        pending
    }
}
