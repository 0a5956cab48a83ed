//! The unified RPC error model.
//!
//! - [`Code`]: canonical status codes shared by Connect, gRPC and gRPC-Web
//! - [`ConnectError`]: code, message, metadata and structured details
//! - [`ErrorDetail`]: a detail either already encoded or still a typed message

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};

/// Status codes of a failed RPC.
///
/// There is no `Ok` variant: success is never represented as an error.
/// Numeric values match the gRPC wire values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Code {
    Canceled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

impl Code {
    /// Snake-case name used in Connect JSON.
    pub fn as_str(&self) -> &'static str {
        match self {
            Code::Canceled => "canceled",
            Code::Unknown => "unknown",
            Code::InvalidArgument => "invalid_argument",
            Code::DeadlineExceeded => "deadline_exceeded",
            Code::NotFound => "not_found",
            Code::AlreadyExists => "already_exists",
            Code::PermissionDenied => "permission_denied",
            Code::ResourceExhausted => "resource_exhausted",
            Code::FailedPrecondition => "failed_precondition",
            Code::Aborted => "aborted",
            Code::OutOfRange => "out_of_range",
            Code::Unimplemented => "unimplemented",
            Code::Internal => "internal",
            Code::Unavailable => "unavailable",
            Code::DataLoss => "data_loss",
            Code::Unauthenticated => "unauthenticated",
        }
    }

    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    /// Map a numeric `grpc-status`. Zero (success) and unknown values yield `None`.
    pub fn from_i32(value: i32) -> Option<Self> {
        let code = match value {
            1 => Code::Canceled,
            2 => Code::Unknown,
            3 => Code::InvalidArgument,
            4 => Code::DeadlineExceeded,
            5 => Code::NotFound,
            6 => Code::AlreadyExists,
            7 => Code::PermissionDenied,
            8 => Code::ResourceExhausted,
            9 => Code::FailedPrecondition,
            10 => Code::Aborted,
            11 => Code::OutOfRange,
            12 => Code::Unimplemented,
            13 => Code::Internal,
            14 => Code::Unavailable,
            15 => Code::DataLoss,
            16 => Code::Unauthenticated,
            _ => return None,
        };
        Some(code)
    }

    /// HTTP status a Connect server uses for a unary error response.
    pub fn http_status(&self) -> StatusCode {
        match self {
            Code::Canceled | Code::DeadlineExceeded => StatusCode::REQUEST_TIMEOUT,
            Code::InvalidArgument | Code::OutOfRange => StatusCode::BAD_REQUEST,
            Code::NotFound | Code::Unimplemented => StatusCode::NOT_FOUND,
            Code::AlreadyExists | Code::Aborted => StatusCode::CONFLICT,
            Code::PermissionDenied => StatusCode::FORBIDDEN,
            Code::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
            Code::FailedPrecondition => StatusCode::PRECONDITION_FAILED,
            Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Code::Unauthenticated => StatusCode::UNAUTHORIZED,
            Code::Unknown | Code::Internal | Code::DataLoss => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Infer a code from an HTTP status when the response carries no
    /// protocol-level error.
    pub fn from_http_status(status: StatusCode) -> Self {
        match status.as_u16() {
            400 => Code::Internal,
            401 => Code::Unauthenticated,
            403 => Code::PermissionDenied,
            404 => Code::Unimplemented,
            408 => Code::DeadlineExceeded,
            429 | 502 | 503 | 504 => Code::Unavailable,
            _ => Code::Unknown,
        }
    }

    /// Transient failures that may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Code::Unavailable | Code::ResourceExhausted | Code::Aborted
        )
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing a [`Code`] from a string fails.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown error code")]
pub struct ParseCodeError(());

impl FromStr for Code {
    type Err = ParseCodeError;

    /// `"ok"` is rejected: it never names an error.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "canceled" | "cancelled" => Ok(Code::Canceled),
            "unknown" => Ok(Code::Unknown),
            "invalid_argument" => Ok(Code::InvalidArgument),
            "deadline_exceeded" => Ok(Code::DeadlineExceeded),
            "not_found" => Ok(Code::NotFound),
            "already_exists" => Ok(Code::AlreadyExists),
            "permission_denied" => Ok(Code::PermissionDenied),
            "resource_exhausted" => Ok(Code::ResourceExhausted),
            "failed_precondition" => Ok(Code::FailedPrecondition),
            "aborted" => Ok(Code::Aborted),
            "out_of_range" => Ok(Code::OutOfRange),
            "unimplemented" => Ok(Code::Unimplemented),
            "internal" => Ok(Code::Internal),
            "unavailable" => Ok(Code::Unavailable),
            "data_loss" => Ok(Code::DataLoss),
            "unauthenticated" => Ok(Code::Unauthenticated),
            _ => Err(ParseCodeError(())),
        }
    }
}

const TYPE_URL_PREFIX: &str = "type.googleapis.com/";

/// Strip the `type.googleapis.com/` prefix of an `Any` type URL.
pub fn type_name_from_url(type_url: &str) -> &str {
    type_url.strip_prefix(TYPE_URL_PREFIX).unwrap_or(type_url)
}

pub(crate) fn type_url_from_name(type_name: &str) -> String {
    if type_name.contains('/') {
        type_name.to_owned()
    } else {
        format!("{TYPE_URL_PREFIX}{type_name}")
    }
}

/// A typed protobuf message that can be attached to an error.
///
/// Implemented for every `prost` message that also implements [`prost::Name`]
/// and `serde::Serialize`.
pub trait DetailMessage: Send + Sync + fmt::Debug + 'static {
    /// Fully-qualified protobuf type name, e.g. `google.rpc.RetryInfo`.
    fn type_name(&self) -> String;

    /// Binary protobuf encoding.
    fn encode_value(&self) -> Result<Vec<u8>, DetailEncodeError>;

    /// Readable rendering for the `debug` field of the JSON form.
    fn debug_json(&self) -> Result<serde_json::Value, DetailEncodeError>;
}

impl<M> DetailMessage for M
where
    M: prost::Message + prost::Name + serde::Serialize + fmt::Debug + 'static,
{
    fn type_name(&self) -> String {
        M::full_name()
    }

    fn encode_value(&self) -> Result<Vec<u8>, DetailEncodeError> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode(&mut buf)
            .map_err(|e| DetailEncodeError::new(e.to_string()))?;
        Ok(buf)
    }

    fn debug_json(&self) -> Result<serde_json::Value, DetailEncodeError> {
        serde_json::to_value(self).map_err(|e| DetailEncodeError::new(e.to_string()))
    }
}

/// Failure to reduce a typed detail to its wire form.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct DetailEncodeError(String);

impl DetailEncodeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// A detail in wire form: type name, encoded bytes and an optional readable copy.
#[derive(Clone, Debug, PartialEq)]
pub struct RawDetail {
    type_name: String,
    value: Bytes,
    debug: Option<serde_json::Value>,
}

impl RawDetail {
    /// `type_name` must not be empty; use [`RawDetail::try_new`] for names
    /// read from the wire.
    pub fn new(type_name: impl Into<String>, value: impl Into<Bytes>) -> Self {
        let type_name = type_name.into();
        debug_assert!(!type_name.is_empty(), "detail type name is empty");
        Self {
            type_name,
            value: value.into(),
            debug: None,
        }
    }

    /// `None` when `type_name` is empty.
    pub fn try_new(type_name: impl Into<String>, value: impl Into<Bytes>) -> Option<Self> {
        let type_name = type_name.into();
        if type_name.is_empty() {
            return None;
        }
        Some(Self {
            type_name,
            value: value.into(),
            debug: None,
        })
    }

    pub fn with_debug(mut self, debug: serde_json::Value) -> Self {
        self.debug = Some(debug);
        self
    }

    /// Fully-qualified type name without a type URL prefix.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn value(&self) -> &Bytes {
        &self.value
    }

    pub fn debug(&self) -> Option<&serde_json::Value> {
        self.debug.as_ref()
    }
}

/// A structured error detail.
#[derive(Clone, Debug)]
pub enum ErrorDetail {
    /// Received from the wire or built from encoded bytes.
    Raw(RawDetail),
    /// A typed message not yet serialized.
    Message(Arc<dyn DetailMessage>),
}

impl ErrorDetail {
    pub fn new(type_name: impl Into<String>, value: impl Into<Bytes>) -> Self {
        ErrorDetail::Raw(RawDetail::new(type_name, value))
    }

    pub fn from_message<M: DetailMessage>(message: M) -> Self {
        ErrorDetail::Message(Arc::new(message))
    }

    pub fn type_name(&self) -> Cow<'_, str> {
        match self {
            ErrorDetail::Raw(raw) => Cow::Borrowed(raw.type_name()),
            ErrorDetail::Message(m) => Cow::Owned(m.type_name()),
        }
    }

    /// Reduce to wire form.
    ///
    /// Typed messages are encoded with their binary encoding. Their `debug`
    /// rendering is best effort: a failure leaves it `None`.
    pub fn to_raw(&self) -> Result<RawDetail, DetailEncodeError> {
        match self {
            ErrorDetail::Raw(raw) => Ok(raw.clone()),
            ErrorDetail::Message(m) => {
                let raw = RawDetail::new(m.type_name(), m.encode_value()?);
                match m.debug_json() {
                    Ok(debug) => Ok(raw.with_debug(debug)),
                    Err(e) => {
                        tracing::trace!(detail = %raw.type_name, error = %e, "debug rendering skipped");
                        Ok(raw)
                    }
                }
            }
        }
    }
}

impl From<RawDetail> for ErrorDetail {
    fn from(raw: RawDetail) -> Self {
        ErrorDetail::Raw(raw)
    }
}

/// An RPC failure.
///
/// `message()` renders `[code] raw_message`, or `[code]` alone when there is
/// no message. Metadata carries headers or trailers that arrived with the
/// error.
#[derive(Clone, Debug)]
pub struct ConnectError {
    code: Code,
    raw_message: String,
    metadata: HeaderMap,
    details: Vec<ErrorDetail>,
}

impl ConnectError {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            raw_message: message.into(),
            metadata: HeaderMap::new(),
            details: Vec::new(),
        }
    }

    pub fn from_code(code: Code) -> Self {
        Self::new(code, String::new())
    }

    /// Wrap an arbitrary failure as `Unknown`.
    ///
    /// A `ConnectError` is returned unchanged through the `From` impl; this
    /// is for everything else.
    pub fn from_reason(reason: impl fmt::Display) -> Self {
        Self::new(Code::Unknown, reason.to_string())
    }

    pub fn code(&self) -> Code {
        self.code
    }

    /// The message as given, without the code prefix.
    pub fn raw_message(&self) -> &str {
        &self.raw_message
    }

    pub fn message(&self) -> String {
        if self.raw_message.is_empty() {
            format!("[{}]", self.code)
        } else {
            format!("[{}] {}", self.code, self.raw_message)
        }
    }

    pub fn metadata(&self) -> &HeaderMap {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut HeaderMap {
        &mut self.metadata
    }

    pub fn details(&self) -> &[ErrorDetail] {
        &self.details
    }

    /// Replace the metadata.
    pub fn with_metadata(mut self, metadata: HeaderMap) -> Self {
        self.metadata = metadata;
        self
    }

    /// Append a metadata entry. Invalid names or values are dropped.
    pub fn with_meta(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        let key = key.as_ref();
        match (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(value.as_ref()),
        ) {
            (Ok(name), Ok(value)) => {
                self.metadata.append(name, value);
            }
            (Err(e), _) => {
                tracing::debug!(key, error = %e, "invalid metadata name, entry dropped");
            }
            (_, Err(e)) => {
                tracing::debug!(key, error = %e, "invalid metadata value, entry dropped");
            }
        }
        self
    }

    pub fn add_detail(mut self, detail: impl Into<ErrorDetail>) -> Self {
        self.details.push(detail.into());
        self
    }

    pub fn add_detail_message<M: DetailMessage>(self, message: M) -> Self {
        self.add_detail(ErrorDetail::from_message(message))
    }

    pub(crate) fn set_details(&mut self, details: Vec<ErrorDetail>) {
        self.details = details;
    }

    /// Decode every detail of type `M`. Details of other types, or that fail
    /// to decode, are skipped.
    pub fn find_details<M>(&self) -> Vec<M>
    where
        M: prost::Message + prost::Name + Default,
    {
        let wanted = M::full_name();
        self.details
            .iter()
            .filter(|d| d.type_name() == wanted)
            .filter_map(|d| d.to_raw().ok())
            .filter_map(|raw| M::decode(raw.value.clone()).ok())
            .collect()
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }
}

macro_rules! code_constructors {
    ($($name:ident => $code:ident),* $(,)?) => {
        impl ConnectError {
            $(
                pub fn $name(message: impl Into<String>) -> Self {
                    Self::new(Code::$code, message)
                }
            )*
        }
    };
}

code_constructors! {
    canceled => Canceled,
    unknown => Unknown,
    invalid_argument => InvalidArgument,
    deadline_exceeded => DeadlineExceeded,
    not_found => NotFound,
    already_exists => AlreadyExists,
    permission_denied => PermissionDenied,
    resource_exhausted => ResourceExhausted,
    failed_precondition => FailedPrecondition,
    aborted => Aborted,
    out_of_range => OutOfRange,
    unimplemented => Unimplemented,
    internal => Internal,
    unavailable => Unavailable,
    data_loss => DataLoss,
    unauthenticated => Unauthenticated,
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

impl std::error::Error for ConnectError {}
