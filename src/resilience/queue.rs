//! Global FIFO request queue.
//!
//! One worker task drains the queue in submission order, waits on the shared
//! [`RateLimiter`] before each dispatch and runs one request at a time. Each
//! submission carries a cancellation token: a request cancelled before it is
//! dispatched never reaches the network, while a dispatched request always
//! runs to completion.

use super::rate_limiter::RateLimiter;
use crate::{Error, ErrorContext, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

struct QueuedJob {
    run: Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>,
    cancel: CancellationToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub pending: usize,
    pub dispatched: usize,
}

pub struct RequestQueue {
    tx: mpsc::UnboundedSender<QueuedJob>,
    pending: Arc<AtomicUsize>,
    dispatched: Arc<AtomicUsize>,
}

impl RequestQueue {
    /// Start the worker. Must be called from within a Tokio runtime.
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let dispatched = Arc::new(AtomicUsize::new(0));
        tokio::spawn(worker(rx, limiter, Arc::clone(&pending), Arc::clone(&dispatched)));
        Self {
            tx,
            pending,
            dispatched,
        }
    }

    pub fn submit<F, Fut, T>(&self, make: F) -> QueuedRequest<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.submit_with_cancel(CancellationToken::new(), make)
    }

    pub fn submit_with_cancel<F, Fut, T>(&self, cancel: CancellationToken, make: F) -> QueuedRequest<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let run: Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send> = Box::new(move || {
            async move {
                let out = make().await;
                let _ = tx.send(out);
            }
            .boxed()
        });
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self
            .tx
            .send(QueuedJob {
                run,
                cancel: cancel.clone(),
            })
            .is_err()
        {
            // Worker gone; the dropped sender resolves the handle with an error.
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
        QueuedRequest { rx, cancel }
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            pending: self.pending.load(Ordering::SeqCst),
            dispatched: self.dispatched.load(Ordering::SeqCst),
        }
    }
}

async fn worker(
    mut rx: mpsc::UnboundedReceiver<QueuedJob>,
    limiter: Arc<RateLimiter>,
    pending: Arc<AtomicUsize>,
    dispatched: Arc<AtomicUsize>,
) {
    while let Some(job) = rx.recv().await {
        if !job.cancel.is_cancelled() {
            tokio::select! {
                biased;
                _ = job.cancel.cancelled() => {}
                _ = limiter.acquire() => {}
            }
        }
        pending.fetch_sub(1, Ordering::SeqCst);
        if job.cancel.is_cancelled() {
            debug!("skipping cancelled queued request");
            continue;
        }
        dispatched.fetch_add(1, Ordering::SeqCst);
        (job.run)().await;
    }
}

/// Handle to a queued request; await it for the result.
pub struct QueuedRequest<T> {
    rx: oneshot::Receiver<Result<T>>,
    cancel: CancellationToken,
}

impl<T> QueuedRequest<T> {
    /// Withdraw the request if it has not been dispatched yet.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl<T> Future for QueuedRequest<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let polled = Pin::new(&mut self.rx).poll(cx);
        match polled {
            Poll::Ready(Ok(out)) => Poll::Ready(out),
            Poll::Ready(Err(_)) if self.cancel.is_cancelled() => Poll::Ready(Err(Error::Cancelled)),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::runtime_with_context(
                "request queue closed",
                ErrorContext::new().with_source("request_queue"),
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}
