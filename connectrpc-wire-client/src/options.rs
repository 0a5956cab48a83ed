//! Per-call options and cancellation.

use std::future::Future;
use std::time::Duration;

use http::{HeaderMap, HeaderName, HeaderValue};
use tokio::sync::watch;

/// Options for configuring individual RPC calls.
///
/// # Example
///
/// ```ignore
/// use connectrpc_wire_client::{CallOptions, cancel_pair};
/// use std::time::Duration;
///
/// let (handle, signal) = cancel_pair();
/// let options = CallOptions::new()
///     .timeout(Duration::from_secs(5))
///     .header("authorization", "Bearer token123")
///     .cancel_signal(signal);
/// ```
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Overrides the client's default timeout.
    pub(crate) timeout: Option<Duration>,
    pub(crate) headers: HeaderMap,
    pub(crate) cancel: Option<CancelSignal>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the timeout for this call.
    ///
    /// The deadline is enforced locally and propagated to the server in the
    /// protocol's timeout header.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn get_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Add a custom header for this call.
    ///
    /// Headers beginning with "Connect-" and "Grpc-" are reserved and are
    /// dropped when the request is built. Invalid names or values are
    /// ignored; use [`try_header`](Self::try_header) to detect them.
    pub fn header<K, V>(mut self, name: K, value: V) -> Self
    where
        K: TryInto<HeaderName>,
        V: TryInto<HeaderValue>,
    {
        match (name.try_into(), value.try_into()) {
            (Ok(name), Ok(value)) => {
                self.headers.append(name, value);
            }
            _ => tracing::debug!("ignoring invalid call option header"),
        }
        self
    }

    /// Add a custom header, or `None` if the name or value is invalid.
    pub fn try_header<K, V>(mut self, name: K, value: V) -> Option<Self>
    where
        K: TryInto<HeaderName>,
        V: TryInto<HeaderValue>,
    {
        let name = name.try_into().ok()?;
        let value = value.try_into().ok()?;
        self.headers.append(name, value);
        Some(self)
    }

    /// Replace all custom headers.
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn get_headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Abort the call with `Canceled` once `signal` fires.
    pub fn cancel_signal(mut self, signal: CancelSignal) -> Self {
        self.cancel = Some(signal);
        self
    }
}

/// Fires a [`CancelSignal`].
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Cancel every call observing the paired signal.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Observes cancellation requested through a [`CancelHandle`].
///
/// Dropping the handle without cancelling leaves the signal unfired.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested.
    pub fn cancelled(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.rx.clone();
        async move {
            if rx.wait_for(|cancelled| *cancelled).await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// A connected cancellation handle and signal.
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_options_default() {
        let options = CallOptions::new();
        assert!(options.timeout.is_none());
        assert!(options.headers.is_empty());
        assert!(options.cancel.is_none());
    }

    #[test]
    fn test_call_options_header() {
        let options = CallOptions::new()
            .timeout(Duration::from_secs(30))
            .header("authorization", "Bearer token123")
            .header("x-request-id", "abc-123");
        assert_eq!(options.get_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(
            options.get_headers().get("authorization").unwrap(),
            "Bearer token123"
        );
        assert_eq!(options.get_headers().get("x-request-id").unwrap(), "abc-123");
    }

    #[test]
    fn test_call_options_invalid_header_is_ignored() {
        assert!(CallOptions::new().try_header("invalid\0name", "value").is_none());
        let options = CallOptions::new()
            .header("x-ok", "1")
            .header("invalid\0name", "value");
        assert_eq!(options.get_headers().len(), 1);
    }

    #[test]
    fn test_call_options_headers_mut() {
        let mut options = CallOptions::new();
        options
            .headers_mut()
            .insert("x-custom", HeaderValue::from_static("value"));
        assert_eq!(options.get_headers().get("x-custom").unwrap(), "value");
    }

    #[tokio::test]
    async fn test_cancel_pair() {
        let (handle, signal) = cancel_pair();
        assert!(!signal.is_cancelled());
        let waiter = tokio::spawn(signal.cancelled());
        handle.cancel();
        waiter.await.unwrap();
        assert!(signal.is_cancelled());
        assert!(handle.is_cancelled());
    }

    #[tokio::test]
    async fn test_dropped_handle_never_fires() {
        let (handle, signal) = cancel_pair();
        drop(handle);
        let fired = tokio::time::timeout(Duration::from_millis(20), signal.cancelled()).await;
        assert!(fired.is_err());
        assert!(!signal.is_cancelled());
    }
}
