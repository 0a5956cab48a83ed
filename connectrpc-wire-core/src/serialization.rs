//! Message serialization for a fixed wire form.
//!
//! Failures come back as [`ConnectError`]: parse failures are
//! `InvalidArgument` (the peer sent bad data), serialize failures `Internal`.

use std::marker::PhantomData;

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Code, ConnectError};

/// Converts messages of type `T` to and from bytes.
pub trait Serialization<T>: Send + Sync {
    fn serialize(&self, message: &T) -> Result<Bytes, ConnectError>;

    fn parse(&self, data: &[u8]) -> Result<T, ConnectError>;
}

/// Protobuf binary encoding via `prost`.
pub struct BinarySerialization<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> BinarySerialization<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for BinarySerialization<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Serialization<T> for BinarySerialization<T>
where
    T: prost::Message + Default,
{
    fn serialize(&self, message: &T) -> Result<Bytes, ConnectError> {
        let mut buf = Vec::with_capacity(message.encoded_len());
        message.encode(&mut buf).map_err(|e| {
            ConnectError::new(Code::Internal, format!("serialize binary: {e}"))
        })?;
        Ok(Bytes::from(buf))
    }

    fn parse(&self, data: &[u8]) -> Result<T, ConnectError> {
        T::decode(data)
            .map_err(|e| ConnectError::new(Code::InvalidArgument, format!("parse binary: {e}")))
    }
}

/// Protobuf JSON encoding via `serde_json`.
///
/// Error messages name the message by its fully-qualified protobuf name.
pub struct JsonSerialization<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonSerialization<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonSerialization<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Serialization<T> for JsonSerialization<T>
where
    T: Serialize + DeserializeOwned + prost::Name,
{
    fn serialize(&self, message: &T) -> Result<Bytes, ConnectError> {
        serde_json::to_vec(message)
            .map(Bytes::from)
            .map_err(|e| ConnectError::new(Code::Internal, format!("serialize json: {e}")))
    }

    fn parse(&self, data: &[u8]) -> Result<T, ConnectError> {
        serde_json::from_slice(data).map_err(|e| {
            ConnectError::new(
                Code::InvalidArgument,
                format!("cannot decode {} from JSON: {e}", T::full_name()),
            )
        })
    }
}

/// Binary or JSON serialization for `T`, picked at runtime.
pub fn create_serialization<T>(use_binary_format: bool) -> Box<dyn Serialization<T>>
where
    T: prost::Message + prost::Name + Default + Serialize + DeserializeOwned + 'static,
{
    if use_binary_format {
        Box::new(BinarySerialization::<T>::new())
    } else {
        Box::new(JsonSerialization::<T>::new())
    }
}
