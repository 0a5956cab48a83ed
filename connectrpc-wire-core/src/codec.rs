//! Compression codec trait and the built-in algorithms.
//!
//! Every codec enforces a maximum decompressed size so a small compressed
//! payload cannot expand without bound:
//! - [`GzipCodec`]: gzip (requires `compression-gzip`)
//! - [`DeflateCodec`]: zlib-wrapped deflate (requires `compression-deflate`)
//! - [`BrotliCodec`]: brotli (requires `compression-br`)
//! - [`ZstdCodec`]: zstd (requires `compression-zstd`)

use std::io::{self, Read};
use std::sync::Arc;

use bytes::Bytes;

#[cfg(any(feature = "compression-gzip", feature = "compression-deflate"))]
use std::io::Write;

use crate::error::{Code, ConnectError};

/// Errors raised while compressing or decompressing a payload.
#[derive(Debug, thiserror::Error)]
pub enum CompressionError {
    /// The decompressed payload grew past the configured limit.
    #[error("message is larger than configured max {max} after decompression")]
    LimitExceeded { max: usize },

    /// The underlying algorithm failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl CompressionError {
    /// Convert into a [`ConnectError`] for the receive path.
    pub fn into_connect_error(self, encoding: &str) -> ConnectError {
        match self {
            CompressionError::LimitExceeded { .. } => {
                ConnectError::new(Code::ResourceExhausted, self.to_string())
            }
            CompressionError::Io(e) => ConnectError::new(
                Code::InvalidArgument,
                format!("failed to decompress {encoding} payload: {e}"),
            ),
        }
    }
}

/// A named compression algorithm.
///
/// # Example
///
/// ```ignore
/// use connectrpc_wire_core::{Codec, CompressionError};
/// use bytes::Bytes;
/// use std::io;
///
/// struct Lz4Codec;
///
/// impl Codec for Lz4Codec {
///     fn name(&self) -> &'static str { "lz4" }
///     fn compress(&self, data: &[u8]) -> io::Result<Bytes> { todo!() }
///     fn decompress(&self, data: &[u8], max_bytes: usize) -> Result<Bytes, CompressionError> { todo!() }
/// }
/// ```
pub trait Codec: Send + Sync + 'static {
    /// Token used in `*-encoding` headers.
    fn name(&self) -> &'static str;

    fn compress(&self, data: &[u8]) -> io::Result<Bytes>;

    /// Decompress, failing with [`CompressionError::LimitExceeded`] once the
    /// output would exceed `max_bytes`.
    fn decompress(&self, data: &[u8], max_bytes: usize) -> Result<Bytes, CompressionError>;
}

/// Shared handle to a [`Codec`].
///
/// `Option<BoxedCodec>` is used throughout, with `None` meaning identity.
#[derive(Clone)]
pub struct BoxedCodec(Arc<dyn Codec>);

impl BoxedCodec {
    pub fn new<C: Codec>(codec: C) -> Self {
        BoxedCodec(Arc::new(codec))
    }

    pub fn name(&self) -> &'static str {
        self.0.name()
    }

    pub fn compress(&self, data: &[u8]) -> io::Result<Bytes> {
        self.0.compress(data)
    }

    pub fn decompress(&self, data: &[u8], max_bytes: usize) -> Result<Bytes, CompressionError> {
        self.0.decompress(data, max_bytes)
    }
}

impl std::fmt::Debug for BoxedCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("BoxedCodec").field(&self.name()).finish()
    }
}

/// Drain `reader` into memory, stopping one byte past `max_bytes`.
pub fn read_to_end_limited<R: Read>(reader: R, max_bytes: usize) -> Result<Bytes, CompressionError> {
    let limit = (max_bytes as u64).saturating_add(1);
    let mut out = Vec::new();
    reader.take(limit).read_to_end(&mut out)?;
    if out.len() > max_bytes {
        return Err(CompressionError::LimitExceeded { max: max_bytes });
    }
    Ok(Bytes::from(out))
}

/// Gzip via flate2.
#[cfg(feature = "compression-gzip")]
#[derive(Debug, Clone, Copy)]
pub struct GzipCodec {
    /// 0-9, default 6.
    pub level: u32,
}

#[cfg(feature = "compression-gzip")]
impl Default for GzipCodec {
    fn default() -> Self {
        Self { level: 6 }
    }
}

#[cfg(feature = "compression-gzip")]
impl GzipCodec {
    pub fn with_level(level: u32) -> Self {
        Self {
            level: level.min(9),
        }
    }
}

#[cfg(feature = "compression-gzip")]
impl Codec for GzipCodec {
    fn name(&self) -> &'static str {
        "gzip"
    }

    fn compress(&self, data: &[u8]) -> io::Result<Bytes> {
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::new(self.level));
        encoder.write_all(data)?;
        encoder.finish().map(Bytes::from)
    }

    fn decompress(&self, data: &[u8], max_bytes: usize) -> Result<Bytes, CompressionError> {
        read_to_end_limited(flate2::read::GzDecoder::new(data), max_bytes)
    }
}

/// Deflate in zlib framing (RFC 1950), which is what HTTP `deflate` means.
#[cfg(feature = "compression-deflate")]
#[derive(Debug, Clone, Copy)]
pub struct DeflateCodec {
    /// 0-9, default 6.
    pub level: u32,
}

#[cfg(feature = "compression-deflate")]
impl Default for DeflateCodec {
    fn default() -> Self {
        Self { level: 6 }
    }
}

#[cfg(feature = "compression-deflate")]
impl DeflateCodec {
    pub fn with_level(level: u32) -> Self {
        Self {
            level: level.min(9),
        }
    }
}

#[cfg(feature = "compression-deflate")]
impl Codec for DeflateCodec {
    fn name(&self) -> &'static str {
        "deflate"
    }

    fn compress(&self, data: &[u8]) -> io::Result<Bytes> {
        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::new(self.level));
        encoder.write_all(data)?;
        encoder.finish().map(Bytes::from)
    }

    fn decompress(&self, data: &[u8], max_bytes: usize) -> Result<Bytes, CompressionError> {
        read_to_end_limited(flate2::read::ZlibDecoder::new(data), max_bytes)
    }
}

/// Brotli.
#[cfg(feature = "compression-br")]
#[derive(Debug, Clone, Copy)]
pub struct BrotliCodec {
    /// 0-11, default 4.
    pub quality: u32,
}

#[cfg(feature = "compression-br")]
impl Default for BrotliCodec {
    fn default() -> Self {
        Self { quality: 4 }
    }
}

#[cfg(feature = "compression-br")]
impl BrotliCodec {
    pub fn with_quality(quality: u32) -> Self {
        Self {
            quality: quality.min(11),
        }
    }
}

#[cfg(feature = "compression-br")]
impl Codec for BrotliCodec {
    fn name(&self) -> &'static str {
        "br"
    }

    fn compress(&self, data: &[u8]) -> io::Result<Bytes> {
        let params = brotli::enc::BrotliEncoderParams {
            quality: self.quality as i32,
            ..Default::default()
        };
        let mut output = Vec::new();
        brotli::enc::BrotliCompress(&mut io::Cursor::new(data), &mut output, &params)?;
        Ok(Bytes::from(output))
    }

    fn decompress(&self, data: &[u8], max_bytes: usize) -> Result<Bytes, CompressionError> {
        read_to_end_limited(brotli::Decompressor::new(data, 4096), max_bytes)
    }
}

/// Zstandard.
#[cfg(feature = "compression-zstd")]
#[derive(Debug, Clone, Copy)]
pub struct ZstdCodec {
    /// 1-22, default 3.
    pub level: i32,
}

#[cfg(feature = "compression-zstd")]
impl Default for ZstdCodec {
    fn default() -> Self {
        Self { level: 3 }
    }
}

#[cfg(feature = "compression-zstd")]
impl ZstdCodec {
    pub fn with_level(level: i32) -> Self {
        Self {
            level: level.clamp(1, 22),
        }
    }
}

#[cfg(feature = "compression-zstd")]
impl Codec for ZstdCodec {
    fn name(&self) -> &'static str {
        "zstd"
    }

    fn compress(&self, data: &[u8]) -> io::Result<Bytes> {
        zstd::bulk::compress(data, self.level).map(Bytes::from)
    }

    fn decompress(&self, data: &[u8], max_bytes: usize) -> Result<Bytes, CompressionError> {
        read_to_end_limited(zstd::Decoder::new(data)?, max_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Passthrough;

    impl Codec for Passthrough {
        fn name(&self) -> &'static str {
            "passthrough"
        }

        fn compress(&self, data: &[u8]) -> io::Result<Bytes> {
            Ok(Bytes::copy_from_slice(data))
        }

        fn decompress(&self, data: &[u8], max_bytes: usize) -> Result<Bytes, CompressionError> {
            read_to_end_limited(data, max_bytes)
        }
    }

    #[test]
    fn test_read_to_end_limited_exact_limit() {
        let out = read_to_end_limited(&b"12345"[..], 5).unwrap();
        assert_eq!(&out[..], b"12345");
    }

    #[test]
    fn test_read_to_end_limited_over_limit() {
        let err = read_to_end_limited(&b"123456"[..], 5).unwrap_err();
        assert!(matches!(err, CompressionError::LimitExceeded { max: 5 }));
        let connect = err.into_connect_error("gzip");
        assert_eq!(connect.code(), Code::ResourceExhausted);
    }

    #[test]
    fn test_boxed_codec_delegates() {
        let codec = BoxedCodec::new(Passthrough);
        assert_eq!(codec.name(), "passthrough");
        let compressed = codec.compress(b"abc").unwrap();
        assert_eq!(&codec.decompress(&compressed, 10).unwrap()[..], b"abc");
        assert_eq!(format!("{codec:?}"), "BoxedCodec(\"passthrough\")");
    }

    #[cfg(feature = "compression-gzip")]
    #[test]
    fn test_gzip_codec_compress_decompress() {
        let codec = GzipCodec::default();
        assert_eq!(codec.name(), "gzip");

        let original = b"Hello, World! This is a test message.";
        let compressed = codec.compress(original).unwrap();
        assert_ne!(&compressed[..], &original[..]);

        let decompressed = codec.decompress(&compressed, 1024).unwrap();
        assert_eq!(&decompressed[..], &original[..]);
    }

    #[cfg(feature = "compression-gzip")]
    #[test]
    fn test_gzip_decompress_respects_limit() {
        let codec = GzipCodec::with_level(9);
        let original = vec![b'a'; 4096];
        let compressed = codec.compress(&original).unwrap();
        assert!(compressed.len() < 100);

        let err = codec.decompress(&compressed, 1000).unwrap_err();
        assert!(matches!(err, CompressionError::LimitExceeded { max: 1000 }));
        assert_eq!(codec.decompress(&compressed, 4096).unwrap().len(), 4096);
    }

    #[cfg(feature = "compression-gzip")]
    #[test]
    fn test_gzip_decompress_invalid_input() {
        let codec = GzipCodec::default();
        let err = codec.decompress(b"not valid gzip data", 1024).unwrap_err();
        assert!(matches!(err, CompressionError::Io(_)));
        assert_eq!(err.into_connect_error("gzip").code(), Code::InvalidArgument);
    }

    #[cfg(feature = "compression-deflate")]
    #[test]
    fn test_deflate_codec_compress_decompress() {
        let codec = DeflateCodec::with_level(3);
        let original = b"deflate deflate deflate deflate";
        let compressed = codec.compress(original).unwrap();
        assert_eq!(&codec.decompress(&compressed, 1024).unwrap()[..], &original[..]);
    }

    #[cfg(feature = "compression-br")]
    #[test]
    fn test_brotli_codec_compress_decompress() {
        let codec = BrotliCodec::with_quality(11);
        assert_eq!(codec.quality, 11);
        let original = b"Hello, World! This is a test message for brotli.";
        let compressed = codec.compress(original).unwrap();
        assert_eq!(&codec.decompress(&compressed, 1024).unwrap()[..], &original[..]);
        assert!(codec.decompress(&compressed, 8).is_err());
    }

    #[cfg(feature = "compression-zstd")]
    #[test]
    fn test_zstd_codec_compress_decompress() {
        let codec = ZstdCodec::with_level(19);
        assert_eq!(codec.level, 19);
        let original = b"Hello, World! This is a test message for zstd.";
        let compressed = codec.compress(original).unwrap();
        assert_eq!(&codec.decompress(&compressed, 1024).unwrap()[..], &original[..]);
    }
}
