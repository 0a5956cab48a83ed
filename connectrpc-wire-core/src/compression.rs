//! Compression registry, levels and negotiation.
//!
//! - [`CompressionRegistry`]: ordered set of codecs a peer supports
//! - [`CompressionLevel`]: algorithm-independent quality setting
//! - [`CompressionConfig`]: send-side policy (threshold and level)

use crate::codec::BoxedCodec;
use crate::error::{Code, ConnectError};

#[cfg(feature = "compression-gzip")]
use crate::codec::GzipCodec;

#[cfg(feature = "compression-deflate")]
use crate::codec::DeflateCodec;

#[cfg(feature = "compression-br")]
use crate::codec::BrotliCodec;

#[cfg(feature = "compression-zstd")]
use crate::codec::ZstdCodec;

/// Name of the "no compression" encoding.
pub const IDENTITY: &str = "identity";

/// Ordered, immutable collection of compression codecs.
///
/// The order is the preference order advertised in accept-encoding headers.
/// A registry is a plain value: construct it once and pass it to every call
/// that needs to compress or decompress.
#[derive(Debug, Clone, Default)]
pub struct CompressionRegistry {
    codecs: Vec<BoxedCodec>,
}

impl CompressionRegistry {
    /// An empty registry (identity only).
    pub fn new() -> Self {
        Self::default()
    }

    /// Every codec enabled through cargo features, at `level`.
    ///
    /// Order: gzip, br, zstd, deflate.
    #[allow(unused_variables, unused_mut)]
    pub fn builtin(level: CompressionLevel) -> Self {
        let mut registry = Self::new();
        #[cfg(feature = "compression-gzip")]
        {
            registry = registry.with(GzipCodec::with_level(level_to_flate2(level)));
        }
        #[cfg(feature = "compression-br")]
        {
            registry = registry.with(BrotliCodec::with_quality(level_to_brotli(level)));
        }
        #[cfg(feature = "compression-zstd")]
        {
            registry = registry.with(ZstdCodec::with_level(level_to_zstd(level)));
        }
        #[cfg(feature = "compression-deflate")]
        {
            registry = registry.with(DeflateCodec::with_level(level_to_flate2(level)));
        }
        registry
    }

    /// Append a codec. A codec whose name is already registered replaces the
    /// earlier entry in place.
    pub fn with<C: crate::codec::Codec>(self, codec: C) -> Self {
        self.with_boxed(BoxedCodec::new(codec))
    }

    pub fn with_boxed(mut self, codec: BoxedCodec) -> Self {
        match self.codecs.iter_mut().find(|c| c.name() == codec.name()) {
            Some(slot) => *slot = codec,
            None => self.codecs.push(codec),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&BoxedCodec> {
        self.codecs.iter().find(|c| c.name() == name)
    }

    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }

    pub fn codecs(&self) -> &[BoxedCodec] {
        &self.codecs
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.codecs.iter().map(|c| c.name())
    }

    /// Comma-joined names for an accept-encoding header, `None` when empty.
    pub fn accept_header_value(&self) -> Option<String> {
        if self.codecs.is_empty() {
            return None;
        }
        Some(self.names().collect::<Vec<_>>().join(","))
    }

    /// Resolve the encoding a peer declared for data it sent us.
    ///
    /// Absent, empty and `identity` resolve to `Ok(None)`. An encoding the
    /// registry does not know fails with `unsupported_code`: servers answer
    /// `InvalidArgument`, clients treat it as `Internal`.
    pub fn resolve_inbound(
        &self,
        encoding: Option<&str>,
        unsupported_code: Code,
    ) -> Result<Option<BoxedCodec>, ConnectError> {
        let name = match encoding.map(str::trim) {
            None | Some("") | Some(IDENTITY) => return Ok(None),
            Some(name) => name,
        };
        match self.get(name) {
            Some(codec) => Ok(Some(codec.clone())),
            None => {
                tracing::debug!(encoding = name, "unsupported compression");
                Err(ConnectError::new(
                    unsupported_code,
                    format!(
                        "unknown compression \"{name}\": supported encodings are {}",
                        self.supported_encodings()
                    ),
                ))
            }
        }
    }

    /// Human readable list for error messages, always ending in identity.
    pub fn supported_encodings(&self) -> String {
        self.names()
            .chain(std::iter::once(IDENTITY))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Pick the encoding for data we send back to a peer that advertised
    /// `accept` (an accept-encoding header value).
    ///
    /// The first token we support wins, in the peer's order. Tokens with
    /// `q=0` are not acceptable. `identity` or no match yields `None`.
    pub fn negotiate(&self, accept: Option<&str>) -> Option<BoxedCodec> {
        for token in accept?.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }

            let (encoding, q_value) = match token.split_once(';') {
                Some((enc, params)) => {
                    let q = params.split(';').find_map(|p| p.trim().strip_prefix("q="));
                    (enc.trim(), q)
                }
                None => (token, None),
            };

            if q_value.is_some_and(is_zero_quality) {
                continue;
            }
            if encoding == IDENTITY {
                return None;
            }
            if let Some(codec) = self.get(encoding) {
                return Some(codec.clone());
            }
        }
        None
    }
}

fn is_zero_quality(q: &str) -> bool {
    q.trim().parse::<f32>().is_ok_and(|q| q == 0.0)
}

/// Compression quality, mapped onto each algorithm's own scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionLevel {
    Fastest,
    Best,
    #[default]
    Default,
    /// Algorithm-specific value: gzip/deflate 0-9, brotli 0-11, zstd 1-22.
    Precise(u32),
}

impl CompressionLevel {
    pub fn precise(level: u32) -> Self {
        CompressionLevel::Precise(level)
    }
}

#[cfg(any(feature = "compression-gzip", feature = "compression-deflate"))]
fn level_to_flate2(level: CompressionLevel) -> u32 {
    match level {
        CompressionLevel::Fastest => 1,
        CompressionLevel::Best => 9,
        CompressionLevel::Default => 6,
        CompressionLevel::Precise(n) => n.min(9),
    }
}

#[cfg(feature = "compression-br")]
fn level_to_brotli(level: CompressionLevel) -> u32 {
    match level {
        CompressionLevel::Fastest => 0,
        CompressionLevel::Best => 11,
        CompressionLevel::Default => 4,
        CompressionLevel::Precise(n) => n.min(11),
    }
}

#[cfg(feature = "compression-zstd")]
fn level_to_zstd(level: CompressionLevel) -> i32 {
    match level {
        CompressionLevel::Fastest => 1,
        CompressionLevel::Best => 22,
        CompressionLevel::Default => 3,
        CompressionLevel::Precise(n) => n.clamp(1, 22) as i32,
    }
}

/// Send-side compression policy.
#[derive(Debug, Clone, Copy)]
pub struct CompressionConfig {
    /// Payloads shorter than this are sent uncompressed. Default 0.
    pub min_bytes: usize,
    pub level: CompressionLevel,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            min_bytes: 0,
            level: CompressionLevel::Default,
        }
    }
}

impl CompressionConfig {
    pub fn new(min_bytes: usize) -> Self {
        Self {
            min_bytes,
            ..Default::default()
        }
    }

    pub fn level(mut self, level: CompressionLevel) -> Self {
        self.level = level;
        self
    }

    pub fn disabled() -> Self {
        Self::new(usize::MAX)
    }

    pub fn is_disabled(&self) -> bool {
        self.min_bytes == usize::MAX
    }

    /// Whether a payload of `len` bytes should go through the codec.
    pub fn should_compress(&self, len: usize) -> bool {
        !self.is_disabled() && len >= self.min_bytes
    }
}
