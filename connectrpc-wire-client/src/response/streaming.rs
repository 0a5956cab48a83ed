//! Streaming response wrapper.
//!
//! Dropping a [`Streaming`] drops the response body, which lets the
//! transport reset the underlying stream. A call deadline keeps running
//! while the stream is read; when it passes, the stream yields
//! `DeadlineExceeded` and ends.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use connectrpc_wire_core::ConnectError;
use futures::{Stream, StreamExt};
use http::HeaderMap;
use tokio::time::{Instant, Sleep};

use super::{FrameDecoder, Metadata};

type CancelFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A stream of response messages.
///
/// # Example
///
/// ```ignore
/// let response = client.call_server_stream::<Req, Res>("pkg.Service/Method", &req).await?;
/// let mut stream = response.into_inner();
///
/// while let Some(result) = stream.next().await {
///     match result {
///         Ok(msg) => println!("Got message: {msg:?}"),
///         Err(e) => eprintln!("Error: {e}"),
///     }
/// }
///
/// if let Some(trailers) = stream.trailers() {
///     println!("Trailers: {trailers:?}");
/// }
/// ```
pub struct Streaming<T> {
    decoder: FrameDecoder<T>,
    deadline: Option<Pin<Box<Sleep>>>,
    cancel: Option<CancelFuture>,
    done: bool,
}

impl<T> Streaming<T> {
    pub fn new(decoder: FrameDecoder<T>) -> Self {
        Self {
            decoder,
            deadline: None,
            cancel: None,
            done: false,
        }
    }

    /// Fail the stream with `DeadlineExceeded` at `deadline`.
    pub(crate) fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline.map(|d| Box::pin(tokio::time::sleep_until(d)));
        self
    }

    /// Fail the stream with `Canceled` once `cancel` resolves.
    pub(crate) fn with_cancel<F>(mut self, cancel: Option<F>) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel = cancel.map(|f| Box::pin(f) as CancelFuture);
        self
    }

    /// Trailers received at the end of the stream.
    ///
    /// `None` until the stream has been fully consumed.
    pub fn trailers(&self) -> Option<&Metadata> {
        self.decoder.trailers()
    }

    pub fn take_trailers(&mut self) -> Option<Metadata> {
        self.decoder.take_trailers()
    }

    /// Response headers.
    pub fn headers(&self) -> &HeaderMap {
        self.decoder.headers()
    }

    pub fn is_finished(&self) -> bool {
        self.done || self.decoder.is_finished()
    }

    /// Read and discard the remaining messages.
    ///
    /// Returns how many messages were discarded. Trailers are available
    /// afterwards.
    pub async fn drain(&mut self) -> usize {
        let mut count = 0;
        while let Some(result) = self.next().await {
            if result.is_ok() {
                count += 1;
            }
        }
        count
    }

    /// Like [`drain`](Self::drain), giving up after `timeout`.
    ///
    /// `Err(count)` means the timeout expired after `count` messages.
    pub async fn drain_timeout(&mut self, timeout: Duration) -> Result<usize, usize> {
        let mut count = 0;
        let deadline = Instant::now() + timeout;

        loop {
            tokio::select! {
                biased;

                _ = tokio::time::sleep_until(deadline) => {
                    return Err(count);
                }

                item = self.next() => {
                    match item {
                        Some(Ok(_)) => count += 1,
                        Some(Err(_)) => {}
                        None => return Ok(count),
                    }
                }
            }
        }
    }

    fn stop(&mut self, error: ConnectError) -> Poll<Option<Result<T, ConnectError>>> {
        self.done = true;
        self.deadline = None;
        self.cancel = None;
        Poll::Ready(Some(Err(error)))
    }
}

impl<T> Unpin for Streaming<T> {}

impl<T> Stream for Streaming<T> {
    type Item = Result<T, ConnectError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        if let Some(cancel) = this.cancel.as_mut() {
            if cancel.as_mut().poll(cx).is_ready() {
                return this.stop(ConnectError::canceled("call canceled"));
            }
        }
        if let Some(deadline) = this.deadline.as_mut() {
            if deadline.as_mut().poll(cx).is_ready() {
                return this.stop(ConnectError::deadline_exceeded("deadline exceeded"));
            }
        }

        match Pin::new(&mut this.decoder).poll_next(cx) {
            Poll::Ready(None) => {
                this.done = true;
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

impl<T> std::fmt::Debug for Streaming<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Streaming")
            .field("finished", &self.is_finished())
            .field("has_deadline", &self.deadline.is_some())
            .finish()
    }
}
