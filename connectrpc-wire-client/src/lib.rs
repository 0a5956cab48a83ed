//! Connect, gRPC and gRPC-Web client over a pluggable HTTP transport.
//!
//! The client builds requests and reads responses with the wire building
//! blocks of `connectrpc-wire-core`; moving bytes is left to a
//! [`Transport`] implementation.
//!
//! ## Features
//!
//! - Unary, server streaming, client streaming and bidirectional calls
//! - Connect, gRPC and gRPC-Web, chosen per client
//! - Protobuf and JSON payloads
//! - Request compression and response decompression through a
//!   [`CompressionRegistry`]
//! - Deadlines propagated in protocol headers and enforced locally
//! - Cooperative cancellation with [`cancel_pair`]
//!
//! ## Example
//!
//! ```ignore
//! use connectrpc_wire_client::ConnectClient;
//!
//! let client = ConnectClient::builder("http://localhost:3000", transport)
//!     .use_proto()
//!     .build()?;
//!
//! let response = client.call_unary::<MyRequest, MyResponse>(
//!     "my.package.MyService/MyMethod",
//!     &request,
//! ).await?;
//!
//! println!("Response: {:?}", response.into_inner());
//! ```
//!
//! ## Server Streaming Example
//!
//! ```ignore
//! use futures::StreamExt;
//!
//! let response = client.call_server_stream::<ListRequest, ListItem>(
//!     "items.v1.ItemService/ListItems",
//!     &request,
//! ).await?;
//!
//! let mut stream = response.into_inner();
//! while let Some(result) = stream.next().await {
//!     match result {
//!         Ok(item) => println!("Got item: {item:?}"),
//!         Err(e) => eprintln!("Error: {e}"),
//!     }
//! }
//!
//! if let Some(trailers) = stream.trailers() {
//!     println!("Trailers: {trailers:?}");
//! }
//! ```

mod builder;
mod client;
mod error;
mod options;
pub mod request;
pub mod response;
pub mod transport;

pub use builder::ClientBuilder;
pub use client::{ConnectClient, RpcMessage};
pub use error::BuildError;
pub use options::{CallOptions, CancelHandle, CancelSignal, cancel_pair};

pub use request::FrameEncoder;
pub use response::{ConnectResponse, FrameDecoder, Metadata, Streaming};
pub use transport::{ResponseBody, Transport, TransportBody};

// Core types that appear in the client API.
pub use connectrpc_wire_core::{
    Code, CompressionConfig, CompressionLevel, CompressionRegistry, ConnectError, ErrorDetail,
    MessageLimits, ProtocolKind,
};
