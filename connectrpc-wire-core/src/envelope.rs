//! Length-prefixed message framing.
//!
//! Streaming Connect calls and every gRPC / gRPC-Web call frame messages as
//!
//! ```text
//! [flags:1][length:4, big-endian][payload:length]
//! ```
//!
//! [`EnvelopeReader`] turns an arbitrarily chunked byte stream back into
//! envelopes.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Code, ConnectError};

/// Envelope flag bits.
pub mod envelope_flags {
    /// Plain message.
    pub const MESSAGE: u8 = 0x00;
    /// Payload is compressed with the negotiated encoding.
    pub const COMPRESSED: u8 = 0x01;
    /// Connect end-of-stream message.
    pub const END_STREAM: u8 = 0x02;
    /// gRPC-Web trailer block.
    pub const TRAILER: u8 = 0x80;
}

/// Size of the envelope prefix.
pub const ENVELOPE_HEADER_SIZE: usize = 5;

/// One framed message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub flags: u8,
    pub data: Bytes,
}

impl Envelope {
    pub fn new(flags: u8, data: impl Into<Bytes>) -> Self {
        Self {
            flags,
            data: data.into(),
        }
    }

    /// A message envelope. Only the compressed bit is ever set.
    pub fn message(data: impl Into<Bytes>, compressed: bool) -> Self {
        let flags = if compressed {
            envelope_flags::COMPRESSED
        } else {
            envelope_flags::MESSAGE
        };
        Self::new(flags, data)
    }

    pub fn is_compressed(&self) -> bool {
        self.flags & envelope_flags::COMPRESSED != 0
    }

    pub fn is_end_stream(&self) -> bool {
        self.flags & envelope_flags::END_STREAM != 0
    }

    pub fn is_trailer(&self) -> bool {
        self.flags & envelope_flags::TRAILER != 0
    }

    /// Serialize prefix and payload.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(ENVELOPE_HEADER_SIZE + self.data.len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.reserve(ENVELOPE_HEADER_SIZE + self.data.len());
        buf.put_u8(self.flags);
        buf.put_u32(self.data.len() as u32);
        buf.put_slice(&self.data);
    }
}

/// Frame `data` as a message envelope.
pub fn encode_envelope(data: &[u8], compressed: bool) -> Bytes {
    Envelope::message(Bytes::copy_from_slice(data), compressed).encode()
}

/// Decode one envelope from `bytes` starting at `offset`.
///
/// Returns the envelope and the number of bytes it occupied, or `None` when
/// the input ends before the frame does. Short input is never an error here;
/// the caller waits for more bytes.
pub fn decode_envelope(bytes: &[u8], offset: usize) -> Option<(Envelope, usize)> {
    let input = bytes.get(offset..)?;
    let (flags, length) = parse_envelope_header(input)?;
    let end = ENVELOPE_HEADER_SIZE + length as usize;
    let data = input.get(ENVELOPE_HEADER_SIZE..end)?;
    Some((
        Envelope::new(flags, Bytes::copy_from_slice(data)),
        end,
    ))
}

/// Read `(flags, length)` from the first five bytes.
pub fn parse_envelope_header(data: &[u8]) -> Option<(u8, u32)> {
    match data {
        [flags, a, b, c, d, ..] => Some((*flags, u32::from_be_bytes([*a, *b, *c, *d]))),
        _ => None,
    }
}

/// Framing failures.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    /// The stream ended inside a frame.
    #[error("protocol error: premature EOF ({buffered} bytes of incomplete envelope)")]
    PrematureEof { buffered: usize },

    /// A declared payload length exceeds the read limit.
    #[error("message size {size} is larger than configured max {max}")]
    MessageTooLarge { size: usize, max: usize },

    #[error("protocol error: invalid envelope flags 0x{0:02x}")]
    InvalidFlags(u8),

    #[error("decompression failed: {0}")]
    Decompression(String),

    #[error("compression failed: {0}")]
    Compression(String),
}

impl From<EnvelopeError> for ConnectError {
    fn from(err: EnvelopeError) -> Self {
        let code = match err {
            EnvelopeError::PrematureEof { .. }
            | EnvelopeError::InvalidFlags(_)
            | EnvelopeError::Decompression(_) => Code::InvalidArgument,
            EnvelopeError::MessageTooLarge { .. } => Code::ResourceExhausted,
            EnvelopeError::Compression(_) => Code::Internal,
        };
        ConnectError::new(code, err.to_string())
    }
}

/// Upper bound on the space reserved ahead of a frame body. Larger bodies
/// grow the buffer as their bytes arrive.
const MAX_RESERVE: usize = 64 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ReadState {
    AwaitingHeader,
    AwaitingBody { flags: u8, length: usize },
}

/// Incremental envelope decoder.
///
/// Feed transport chunks with [`push`](Self::push) and drain complete
/// envelopes with [`next_envelope`](Self::next_envelope). Call
/// [`finish`](Self::finish) once the transport reports end of input.
#[derive(Debug)]
pub struct EnvelopeReader {
    buffer: BytesMut,
    state: ReadState,
    max_bytes: usize,
}

impl Default for EnvelopeReader {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvelopeReader {
    pub fn new() -> Self {
        Self::with_max_bytes(usize::MAX)
    }

    /// Reject frames whose declared length exceeds `max_bytes`.
    pub fn with_max_bytes(max_bytes: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            state: ReadState::AwaitingHeader,
            max_bytes,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Next complete envelope, or `Ok(None)` when more bytes are needed.
    pub fn next_envelope(&mut self) -> Result<Option<Envelope>, EnvelopeError> {
        loop {
            match self.state {
                ReadState::AwaitingHeader => {
                    let Some((flags, length)) = parse_envelope_header(&self.buffer) else {
                        return Ok(None);
                    };
                    let length = length as usize;
                    if length > self.max_bytes {
                        return Err(EnvelopeError::MessageTooLarge {
                            size: length,
                            max: self.max_bytes,
                        });
                    }
                    self.buffer.advance(ENVELOPE_HEADER_SIZE);
                    self.state = ReadState::AwaitingBody { flags, length };
                }
                ReadState::AwaitingBody { flags, length } => {
                    if self.buffer.len() < length {
                        let missing = (length - self.buffer.len()).min(MAX_RESERVE);
                        self.buffer.reserve(missing);
                        return Ok(None);
                    }
                    let data = self.buffer.split_to(length).freeze();
                    self.state = ReadState::AwaitingHeader;
                    return Ok(Some(Envelope { flags, data }));
                }
            }
        }
    }

    /// True when no partial frame is buffered.
    pub fn is_idle(&self) -> bool {
        self.state == ReadState::AwaitingHeader && self.buffer.is_empty()
    }

    /// Check the reader at end of input.
    pub fn finish(&self) -> Result<(), EnvelopeError> {
        if self.is_idle() {
            return Ok(());
        }
        let header = match self.state {
            ReadState::AwaitingHeader => 0,
            ReadState::AwaitingBody { .. } => ENVELOPE_HEADER_SIZE,
        };
        Err(EnvelopeError::PrematureEof {
            buffered: header + self.buffer.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_envelope_layout() {
        let frame = encode_envelope(b"hello", false);
        assert_eq!(&frame[..], &[0x00, 0, 0, 0, 5, b'h', b'e', b'l', b'l', b'o']);

        let frame = encode_envelope(b"hi", true);
        assert_eq!(frame[0], envelope_flags::COMPRESSED);
        assert_eq!(&frame[1..5], &[0, 0, 0, 2]);
    }

    #[test]
    fn test_encode_empty_payload() {
        let frame = encode_envelope(b"", false);
        assert_eq!(&frame[..], &[0, 0, 0, 0, 0]);
        assert_eq!(
            decode_envelope(&frame, 0),
            Some((Envelope::new(0, Bytes::new()), 5))
        );
    }

    #[test]
    fn test_decode_envelope_at_offset() {
        let mut data = vec![0xff, 0xff];
        data.extend_from_slice(&encode_envelope(b"abc", true));
        let (envelope, used) = decode_envelope(&data, 2).unwrap();
        assert!(envelope.is_compressed());
        assert_eq!(&envelope.data[..], b"abc");
        assert_eq!(used, 8);
    }

    #[test]
    fn test_decode_envelope_short_input_needs_more() {
        let frame = encode_envelope(b"abc", false);
        for end in 0..frame.len() {
            assert_eq!(decode_envelope(&frame[..end], 0), None);
        }
        assert_eq!(decode_envelope(&frame, 100), None);
    }

    #[test]
    fn test_parse_envelope_header() {
        assert_eq!(parse_envelope_header(&[0x02, 0, 0, 1, 0]), Some((0x02, 256)));
        assert_eq!(parse_envelope_header(&[0x02, 0, 0]), None);
    }

    #[test]
    fn test_envelope_flag_helpers() {
        assert!(Envelope::new(envelope_flags::END_STREAM, Bytes::new()).is_end_stream());
        assert!(Envelope::new(envelope_flags::TRAILER, Bytes::new()).is_trailer());
        assert!(!Envelope::message(Bytes::new(), false).is_compressed());
    }

    #[test]
    fn test_reader_byte_by_byte() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&encode_envelope(b"first", false));
        stream.extend_from_slice(&encode_envelope(b"", true));
        stream.extend_from_slice(&Envelope::new(envelope_flags::END_STREAM, "{}").encode());

        let mut reader = EnvelopeReader::new();
        let mut out = Vec::new();
        for byte in &stream {
            reader.push(std::slice::from_ref(byte));
            while let Some(envelope) = reader.next_envelope().unwrap() {
                out.push(envelope);
            }
        }
        assert!(reader.finish().is_ok());
        assert_eq!(out.len(), 3);
        assert_eq!(&out[0].data[..], b"first");
        assert!(out[1].is_compressed() && out[1].data.is_empty());
        assert!(out[2].is_end_stream());
    }

    #[test]
    fn test_reader_many_frames_in_one_chunk() {
        let mut stream = BytesMut::new();
        for i in 0..10u8 {
            Envelope::message(vec![i; i as usize], false).encode_into(&mut stream);
        }
        let mut reader = EnvelopeReader::new();
        reader.push(&stream);
        let mut count = 0;
        while let Some(envelope) = reader.next_envelope().unwrap() {
            assert_eq!(envelope.data.len(), count);
            count += 1;
        }
        assert_eq!(count, 10);
        assert!(reader.is_idle());
    }

    #[test]
    fn test_reader_premature_eof_in_header() {
        let mut reader = EnvelopeReader::new();
        reader.push(&[0x00, 0x00]);
        assert_eq!(reader.next_envelope(), Ok(None));
        assert_eq!(
            reader.finish(),
            Err(EnvelopeError::PrematureEof { buffered: 2 })
        );
    }

    #[test]
    fn test_reader_premature_eof_in_body() {
        let frame = encode_envelope(b"truncated", false);
        let mut reader = EnvelopeReader::new();
        reader.push(&frame[..8]);
        assert_eq!(reader.next_envelope(), Ok(None));

        let err: ConnectError = reader.finish().unwrap_err().into();
        assert_eq!(err.code(), Code::InvalidArgument);
        assert!(err.raw_message().contains("premature EOF"));
    }

    #[test]
    fn test_reader_rejects_oversized_frame() {
        let mut reader = EnvelopeReader::with_max_bytes(4);
        reader.push(&encode_envelope(b"12345", false));
        let err = reader.next_envelope().unwrap_err();
        assert_eq!(err, EnvelopeError::MessageTooLarge { size: 5, max: 4 });
        assert_eq!(ConnectError::from(err).code(), Code::ResourceExhausted);
    }

    #[test]
    fn test_reader_bounds_reservation_for_declared_length() {
        let mut reader = EnvelopeReader::new();
        let mut header = vec![envelope_flags::MESSAGE];
        header.extend_from_slice(&u32::MAX.to_be_bytes());
        reader.push(&header);
        assert!(reader.next_envelope().unwrap().is_none());
        assert!(reader.buffer.capacity() < 1024 * 1024);

        reader.push(&[7; 100]);
        assert!(reader.next_envelope().unwrap().is_none());
        assert!(reader.buffer.capacity() < 1024 * 1024);
        assert_eq!(
            reader.finish().unwrap_err(),
            EnvelopeError::PrematureEof { buffered: ENVELOPE_HEADER_SIZE + 100 }
        );
    }
}
