//! Wire-level building blocks for Connect, gRPC and gRPC-Web.
//!
//! This crate knows nothing about sockets or generated service code. It
//! turns messages into bodies and bodies back into messages, negotiates
//! encodings, and maps failures onto [`ConnectError`].
//!
//! ## Modules
//!
//! - `error`: Status codes, error details and [`ConnectError`]
//! - `error_json`: Connect's JSON error and end-of-stream documents
//! - `trailer`: gRPC status trailers and gRPC-Web trailer blocks
//! - `codec`: Compression codec trait and implementations
//! - `compression`: Codec registry and accept-encoding negotiation
//! - `envelope`: Envelope framing and the incremental reader
//! - `content_type`: Content-Type recognition
//! - `headers`: Request header construction
//! - `timeout`: Deadline header encoding
//! - `limits`: Message size limits
//! - `serialization`: Binary and JSON message serialization
//! - `protocol`: The [`Protocol`] trait and its three implementations

mod codec;
mod compression;
mod content_type;
mod envelope;
mod error;
mod error_json;
mod headers;
mod limits;
mod protocol;
mod serialization;
mod timeout;
mod trailer;

pub use codec::*;
pub use compression::*;
pub use content_type::*;
pub use envelope::*;
pub use error::*;
pub use error_json::*;
pub use headers::*;
pub use limits::*;
pub use protocol::*;
pub use serialization::*;
pub use timeout::*;
pub use trailer::*;
