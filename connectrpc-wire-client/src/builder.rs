//! Client builder.
//!
//! Provides a fluent API for configuring and building a [`ConnectClient`].

use std::time::Duration;

use connectrpc_wire_core::{
    CompressionConfig, CompressionRegistry, IDENTITY, MessageLimits, ProtocolKind,
};
use http::{HeaderMap, HeaderName, HeaderValue, Uri};

use crate::client::ConnectClient;
use crate::error::BuildError;
use crate::transport::Transport;

/// Builder for creating a [`ConnectClient`].
///
/// # Example
///
/// ```ignore
/// use connectrpc_wire_client::ClientBuilder;
///
/// let client = ClientBuilder::new("http://localhost:3000", transport)
///     .grpc()
///     .use_proto()
///     .send_compression("gzip")
///     .timeout(Duration::from_secs(5))
///     .build()?;
/// ```
pub struct ClientBuilder<T> {
    base_url: String,
    transport: T,
    protocol: ProtocolKind,
    /// Protobuf (true) or JSON (false) payloads.
    use_proto: bool,
    send_compression: Option<String>,
    registry: Option<CompressionRegistry>,
    compression: CompressionConfig,
    limits: MessageLimits,
    default_timeout: Option<Duration>,
    headers: HeaderMap,
    invalid_header: Option<String>,
}

impl<T> std::fmt::Debug for ClientBuilder<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("base_url", &self.base_url)
            .field("protocol", &self.protocol)
            .field("use_proto", &self.use_proto)
            .field("send_compression", &self.send_compression)
            .field("registry", &self.registry)
            .field("compression", &self.compression)
            .field("limits", &self.limits)
            .field("default_timeout", &self.default_timeout)
            .field("headers", &self.headers)
            .finish()
    }
}

impl<T: Transport> ClientBuilder<T> {
    /// Start a builder for the service at `base_url`, e.g.
    /// `http://localhost:3000`.
    pub fn new<S: Into<String>>(base_url: S, transport: T) -> Self {
        Self {
            base_url: base_url.into(),
            transport,
            protocol: ProtocolKind::Connect,
            use_proto: false,
            send_compression: None,
            registry: None,
            compression: CompressionConfig::default(),
            limits: MessageLimits::default(),
            default_timeout: None,
            headers: HeaderMap::new(),
            invalid_header: None,
        }
    }

    pub fn protocol(mut self, protocol: ProtocolKind) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn connect(self) -> Self {
        self.protocol(ProtocolKind::Connect)
    }

    pub fn grpc(self) -> Self {
        self.protocol(ProtocolKind::Grpc)
    }

    pub fn grpc_web(self) -> Self {
        self.protocol(ProtocolKind::GrpcWeb)
    }

    /// Use JSON payloads (the default).
    pub fn use_json(mut self) -> Self {
        self.use_proto = false;
        self
    }

    pub fn use_proto(mut self) -> Self {
        self.use_proto = true;
        self
    }

    /// Compress outgoing messages with the registry codec named `name`.
    ///
    /// `"identity"` turns request compression off.
    pub fn send_compression<S: Into<String>>(mut self, name: S) -> Self {
        self.send_compression = Some(name.into());
        self
    }

    /// Codecs offered for responses and available for requests.
    ///
    /// Defaults to every codec enabled through cargo features, at the level
    /// of the [`CompressionConfig`].
    pub fn registry(mut self, registry: CompressionRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn compression(mut self, config: CompressionConfig) -> Self {
        self.compression = config;
        self
    }

    pub fn limits(mut self, limits: MessageLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Reject response messages larger than `max` bytes.
    pub fn read_max_bytes(mut self, max: usize) -> Self {
        self.limits = self.limits.read_max_bytes(max);
        self
    }

    /// Refuse to send messages larger than `max` bytes.
    pub fn write_max_bytes(mut self, max: usize) -> Self {
        self.limits = self.limits.write_max_bytes(max);
        self
    }

    /// Default timeout for calls that do not set one.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// A header sent with every call.
    pub fn header<K, V>(mut self, name: K, value: V) -> Self
    where
        K: TryInto<HeaderName> + std::fmt::Display,
        V: TryInto<HeaderValue>,
    {
        let label = name.to_string();
        match (name.try_into(), value.try_into()) {
            (Ok(name), Ok(value)) => {
                self.headers.append(name, value);
            }
            _ => {
                self.invalid_header.get_or_insert(label);
            }
        }
        self
    }

    pub fn build(self) -> Result<ConnectClient<T>, BuildError> {
        if let Some(name) = self.invalid_header {
            return Err(BuildError::InvalidHeader(name));
        }
        let base_url = normalize_base_url(&self.base_url)?;
        let registry = self
            .registry
            .unwrap_or_else(|| CompressionRegistry::builtin(self.compression.level));
        let send_compression = match self.send_compression.as_deref() {
            None | Some(IDENTITY) => None,
            Some(name) => Some(
                registry
                    .get(name)
                    .cloned()
                    .ok_or_else(|| BuildError::UnknownCompression(name.to_string()))?,
            ),
        };

        Ok(ConnectClient::new(
            self.transport,
            base_url,
            self.protocol,
            self.use_proto,
            send_compression,
            registry,
            self.compression,
            self.limits,
            self.default_timeout,
            self.headers,
        ))
    }
}

fn normalize_base_url(url: &str) -> Result<String, BuildError> {
    let invalid = |reason: &str| BuildError::InvalidBaseUrl {
        url: url.to_string(),
        reason: reason.to_string(),
    };
    let uri: Uri = url.parse().map_err(|_| invalid("not a valid URI"))?;
    match uri.scheme_str() {
        Some("http") | Some("https") => {}
        Some(_) => return Err(invalid("scheme must be http or https")),
        None => return Err(invalid("missing scheme")),
    }
    if uri.authority().is_none() {
        return Err(invalid("missing host"));
    }
    Ok(url.trim_end_matches('/').to_string())
}
