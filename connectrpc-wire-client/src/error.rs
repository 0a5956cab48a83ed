//! Client construction errors.
//!
//! Call failures are always [`ConnectError`](connectrpc_wire_core::ConnectError);
//! [`BuildError`] only covers configuration rejected by
//! [`ClientBuilder::build`](crate::ClientBuilder::build).

/// Invalid client configuration.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    /// The base URL is not an absolute `http` or `https` URL.
    #[error("invalid base url {url:?}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    /// The send compression names a codec missing from the registry.
    #[error("unknown send compression {0:?}")]
    UnknownCompression(String),

    /// A default header name or value is not valid HTTP.
    #[error("invalid default header {0:?}")]
    InvalidHeader(String),
}
