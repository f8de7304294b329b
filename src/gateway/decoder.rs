//! Reassembly of the gateway's continuous zlib-stream transport.

use crate::{constants::ZLIB_SUFFIX, model::Envelope};
use flate2::{Decompress, DecompressError, FlushDecompress, Status};
use std::fmt;

const OUTPUT_CHUNK: usize = 16 * 1024;

/// Rebuilds discrete event envelopes from chunked, zlib-stream-compressed
/// binary frames.
///
/// The decompressor's dictionary persists for the whole connection: frames
/// back-reference earlier traffic, so a decoder must live and die with its
/// transport.
pub(crate) struct StreamDecoder {
    buffer: Vec<u8>,
    inflate: Decompress,
}

impl StreamDecoder {
    pub(crate) fn new() -> Self {
        Self {
            buffer: Vec::new(),
            inflate: Decompress::new(true),
        }
    }

    /// Appends one websocket binary frame.
    ///
    /// Returns a decoded envelope once the accumulated buffer ends with the
    /// frame marker; partial frames are retained until then.
    pub(crate) fn feed(&mut self, chunk: &[u8]) -> Result<Option<Envelope>, DecodeError> {
        self.buffer.extend_from_slice(chunk);

        if chunk.len() < 4 || !self.buffer.ends_with(&ZLIB_SUFFIX) {
            return Ok(None);
        }

        let mut decompressed = Vec::with_capacity(OUTPUT_CHUNK);
        let mut consumed = 0usize;

        loop {
            if decompressed.len() == decompressed.capacity() {
                decompressed.reserve(OUTPUT_CHUNK);
            }

            let in_before = self.inflate.total_in();
            let out_before = decompressed.len();
            let status = self.inflate.decompress_vec(
                &self.buffer[consumed..],
                &mut decompressed,
                FlushDecompress::Sync,
            )?;
            consumed += (self.inflate.total_in() - in_before) as usize;

            if status == Status::StreamEnd {
                break;
            }

            // A full output vector means we stopped for space; grow and go
            // again. Otherwise the decompressor has flushed all it can for
            // this frame.
            if decompressed.len() < decompressed.capacity()
                && (consumed >= self.buffer.len() || decompressed.len() == out_before)
            {
                break;
            }
        }

        self.buffer.clear();

        serde_json::from_slice(&decompressed)
            .map(Some)
            .map_err(DecodeError::Json)
    }
}

#[derive(Debug)]
pub enum DecodeError {
    Inflate(DecompressError),
    Json(serde_json::Error),
}

impl From<DecompressError> for DecodeError {
    fn from(e: DecompressError) -> Self {
        DecodeError::Inflate(e)
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Inflate(e) => write!(f, "stream decompression failed: {e}"),
            DecodeError::Json(e) => write!(f, "envelope was not valid JSON: {e}"),
        }
    }
}

impl std::error::Error for DecodeError {}

#[cfg(test)]
mod test {
    use super::*;
    use flate2::{Compress, Compression, FlushCompress};

    /// Compresses one payload as a frame of a continuous zlib stream.
    fn frame(compress: &mut Compress, payload: &str) -> Vec<u8> {
        let mut out = Vec::with_capacity(payload.len() + 64);
        compress
            .compress_vec(payload.as_bytes(), &mut out, FlushCompress::Sync)
            .unwrap();
        assert!(out.ends_with(&ZLIB_SUFFIX));
        out
    }

    #[test]
    fn partial_frames_are_retained_until_the_marker() {
        let mut compress = Compress::new(Compression::default(), true);
        let mut decoder = StreamDecoder::new();

        let bytes = frame(&mut compress, r#"{"op":10,"d":{"heartbeat_interval":41250.0}}"#);
        let (head, tail) = bytes.split_at(bytes.len() / 2);

        assert!(decoder.feed(head).unwrap().is_none());

        let env = decoder.feed(tail).unwrap().expect("second half completes the frame");
        assert_eq!(env.op, 10);
    }

    #[test]
    fn decompressor_state_spans_frames() {
        let mut compress = Compress::new(Compression::default(), true);
        let mut decoder = StreamDecoder::new();

        let first = frame(&mut compress, r#"{"op":0,"d":{"a":"abcdefabcdef"},"s":1,"t":"X"}"#);
        // Second frame back-references the first via the shared dictionary.
        let second = frame(&mut compress, r#"{"op":0,"d":{"a":"abcdefabcdef"},"s":2,"t":"X"}"#);

        let one = decoder.feed(&first).unwrap().unwrap();
        let two = decoder.feed(&second).unwrap().unwrap();

        assert_eq!(one.s, Some(1));
        assert_eq!(two.s, Some(2));
    }

    #[test]
    fn short_chunk_with_marker_bytes_inside_is_not_a_boundary() {
        let mut decoder = StreamDecoder::new();

        // A chunk below four bytes can never terminate a frame, even if the
        // buffer happens to end with the marker afterwards.
        assert!(decoder.feed(&[0x00]).unwrap().is_none());
        assert!(decoder.feed(&[0x00]).unwrap().is_none());
        assert!(decoder.feed(&[0xff]).unwrap().is_none());
        assert!(decoder.feed(&[0xff]).unwrap().is_none());
        assert_eq!(decoder.buffer.len(), 4);
    }
}
