// Copyright 2026 Parity Technologies (UK) Ltd.
//
// Permission is hereby granted, free of charge, to any person obtaining a
// copy of this software and associated documentation files (the "Software"),
// to deal in the Software without restriction, including without limitation
// the rights to use, copy, modify, merge, publish, distribute, sublicense,
// and/or sell copies of the Software, and to permit persons to whom the
// Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
// OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

//! Pluggable streaming compression for data frames.
//!
//! A publisher compresses header and payload blocks through two independent
//! rolling dictionaries, one per lane, flushed at every block boundary so
//! the window state carries over between frames. A frame flagged as a
//! keyframe resets both dictionaries, which is what lets a subscriber that
//! attached mid-stream start decoding: its decompressor rejects everything
//! for a publisher until the first keyframe from that publisher arrives.
//!
//! The reference algorithm is deflate via `flate2`; other algorithms plug in
//! by compression id.

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

/// Compression id of the deflate reference algorithm.
pub const DEFLATE: &str = "deflate";

/// Default compression level for the deflate family.
pub const DEFAULT_LEVEL: u32 = 6;

#[derive(Debug, thiserror::Error)]
pub enum CompressionError {
    /// Decompressed growth passed the safety ceiling; the block is abandoned
    /// rather than allocated for.
    #[error("decompressed size exceeds the {0} byte ceiling")]
    DecompressionTooLarge(usize),
    /// A compressed frame arrived for a publisher from which no keyframe has
    /// been seen yet.
    #[error("no keyframe seen yet for this publisher")]
    MissingKeyframe,
    /// The compressed block does not decode.
    #[error("corrupt compressed block")]
    Corrupt,
    /// The payload is not marked as compressed.
    #[error("payload is not marked compressed")]
    NotCompressed,
    /// A compressed frame arrived but no decompressor is configured.
    #[error("no decompressor configured for compressed data")]
    NotConfigured,
    /// The advertised original size does not match the decompressed data.
    #[error("original size mismatch: advertised {advertised}, got {actual}")]
    SizeMismatch { advertised: usize, actual: usize },
    #[error("compression stream error: {0}")]
    Stream(String),
}

/// Which of the two per-publisher dictionaries a block belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    Header,
    Payload,
}

/// Publisher-side streaming compressor. One instance per publisher; its
/// dictionary state is shared by all subscribers of that publisher's node,
/// which is why a new subscriber forces the next frame to be a keyframe.
pub trait StreamCompressor: Send {
    /// Compresses one block. `keyframe` resets the dictionaries of both
    /// lanes first; the caller must pass the same flag for the header and
    /// payload block of one frame.
    fn compress(&mut self, lane: Lane, data: &[u8], keyframe: bool)
        -> Result<Vec<u8>, CompressionError>;
}

/// Subscriber-side streaming decompressor. One instance per remote
/// publisher.
pub trait StreamDecompressor: Send {
    /// Decompresses one block, growing at most to `ceiling` bytes.
    fn decompress(
        &mut self,
        lane: Lane,
        data: &[u8],
        keyframe: bool,
        ceiling: usize,
    ) -> Result<Vec<u8>, CompressionError>;
}

/// Creates the compressor for `id`, or `None` if the id is unknown.
pub fn compressor(id: &str, level: u32) -> Option<Box<dyn StreamCompressor>> {
    match id {
        DEFLATE => Some(Box::new(DeflateCompressor::new(level))),
        _ => None,
    }
}

/// Creates the decompressor for `id`, or `None` if the id is unknown.
pub fn decompressor(id: &str) -> Option<Box<dyn StreamDecompressor>> {
    match id {
        DEFLATE => Some(Box::new(DeflateDecompressor::new())),
        _ => None,
    }
}

/// Deflate with one zlib stream per lane, sync-flushed at block boundaries.
pub struct DeflateCompressor {
    header: Compress,
    payload: Compress,
}

impl DeflateCompressor {
    pub fn new(level: u32) -> Self {
        let level = Compression::new(level);
        DeflateCompressor {
            header: Compress::new(level, true),
            payload: Compress::new(level, true),
        }
    }

    fn lane(&mut self, lane: Lane) -> &mut Compress {
        match lane {
            Lane::Header => &mut self.header,
            Lane::Payload => &mut self.payload,
        }
    }
}

impl StreamCompressor for DeflateCompressor {
    fn compress(
        &mut self,
        lane: Lane,
        data: &[u8],
        keyframe: bool,
    ) -> Result<Vec<u8>, CompressionError> {
        if keyframe {
            self.header.reset();
            self.payload.reset();
        }
        let stream = self.lane(lane);
        let mut out = Vec::with_capacity(data.len() / 2 + 64);
        let mut consumed = 0;
        loop {
            out.reserve((data.len() - consumed).max(64));
            let before = stream.total_in();
            stream
                .compress_vec(&data[consumed..], &mut out, FlushCompress::Sync)
                .map_err(|e| CompressionError::Stream(e.to_string()))?;
            consumed += (stream.total_in() - before) as usize;
            // The sync flush fit if the output did not fill its capacity.
            if consumed == data.len() && out.len() < out.capacity() {
                return Ok(out);
            }
        }
    }
}

/// Deflate decompression contexts for one remote publisher.
pub struct DeflateDecompressor {
    header: Decompress,
    payload: Decompress,
    seen_keyframe: bool,
}

impl DeflateDecompressor {
    pub fn new() -> Self {
        DeflateDecompressor {
            header: Decompress::new(true),
            payload: Decompress::new(true),
            seen_keyframe: false,
        }
    }

    fn lane(&mut self, lane: Lane) -> &mut Decompress {
        match lane {
            Lane::Header => &mut self.header,
            Lane::Payload => &mut self.payload,
        }
    }
}

impl Default for DeflateDecompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamDecompressor for DeflateDecompressor {
    fn decompress(
        &mut self,
        lane: Lane,
        data: &[u8],
        keyframe: bool,
        ceiling: usize,
    ) -> Result<Vec<u8>, CompressionError> {
        if keyframe {
            self.header.reset(true);
            self.payload.reset(true);
            self.seen_keyframe = true;
        } else if !self.seen_keyframe {
            return Err(CompressionError::MissingKeyframe);
        }
        inflate(self.lane(lane), data, ceiling, FlushDecompress::None)
    }
}

fn inflate(
    stream: &mut Decompress,
    data: &[u8],
    ceiling: usize,
    flush: FlushDecompress,
) -> Result<Vec<u8>, CompressionError> {
    let mut out = Vec::with_capacity((data.len() * 2).max(64));
    let mut consumed = 0;
    loop {
        if out.len() > ceiling {
            return Err(CompressionError::DecompressionTooLarge(ceiling));
        }
        out.reserve(out.capacity().max(256));
        let before = stream.total_in();
        let status = stream
            .decompress_vec(&data[consumed..], &mut out, flush)
            .map_err(|_| CompressionError::Corrupt)?;
        consumed += (stream.total_in() - before) as usize;
        if status == Status::StreamEnd {
            return Ok(out);
        }
        if consumed == data.len() && out.len() < out.capacity() {
            return Ok(out);
        }
    }
}

/// One-shot whole-buffer deflate used by `Message::compress`.
pub fn deflate_block(data: &[u8], level: u32) -> Result<Vec<u8>, CompressionError> {
    let mut stream = Compress::new(Compression::new(level), true);
    let mut out = Vec::with_capacity(data.len() / 2 + 64);
    let mut consumed = 0;
    loop {
        out.reserve((data.len() - consumed).max(64));
        let before = stream.total_in();
        let status = stream
            .compress_vec(&data[consumed..], &mut out, FlushCompress::Finish)
            .map_err(|e| CompressionError::Stream(e.to_string()))?;
        consumed += (stream.total_in() - before) as usize;
        if status == Status::StreamEnd {
            return Ok(out);
        }
    }
}

/// One-shot inflate used by `Message::uncompress`.
pub fn inflate_block(data: &[u8], ceiling: usize) -> Result<Vec<u8>, CompressionError> {
    let mut stream = Decompress::new(true);
    inflate(&mut stream, data, ceiling, FlushDecompress::Finish)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(i: u64) -> Vec<u8> {
        format!("sensor reading {i}: temperature=21.5 humidity=40")
            .into_bytes()
            .repeat(8)
    }

    #[test]
    fn blocks_round_trip_across_a_stream() {
        let mut c = DeflateCompressor::new(DEFAULT_LEVEL);
        let mut d = DeflateDecompressor::new();
        for i in 0..20 {
            let data = sample(i);
            let keyframe = i == 0;
            let block = c.compress(Lane::Payload, &data, keyframe).unwrap();
            let back = d
                .decompress(Lane::Payload, &block, keyframe, 1 << 20)
                .unwrap();
            assert_eq!(back, data, "block {i}");
        }
    }

    #[test]
    fn header_and_payload_lanes_are_independent() {
        let mut c = DeflateCompressor::new(DEFAULT_LEVEL);
        let mut d = DeflateDecompressor::new();
        let header = b"channel\0weather\0seq\0196\0".to_vec();
        let payload = sample(7);
        let hb = c.compress(Lane::Header, &header, true).unwrap();
        let pb = c.compress(Lane::Payload, &payload, false).unwrap();
        assert_eq!(
            d.decompress(Lane::Header, &hb, true, 1 << 20).unwrap(),
            header
        );
        assert_eq!(
            d.decompress(Lane::Payload, &pb, false, 1 << 20).unwrap(),
            payload
        );
    }

    #[test]
    fn rolling_dictionary_pays_off() {
        let mut c = DeflateCompressor::new(DEFAULT_LEVEL);
        let first = c.compress(Lane::Payload, &sample(1), true).unwrap();
        let later = c.compress(Lane::Payload, &sample(2), false).unwrap();
        // The second block re-uses the window of the first and must come out
        // noticeably smaller.
        assert!(later.len() < first.len());
    }

    #[test]
    fn rejects_data_before_first_keyframe() {
        let mut c = DeflateCompressor::new(DEFAULT_LEVEL);
        c.compress(Lane::Payload, &sample(0), true).unwrap();
        let continuation = c.compress(Lane::Payload, &sample(1), false).unwrap();

        let mut late = DeflateDecompressor::new();
        assert!(matches!(
            late.decompress(Lane::Payload, &continuation, false, 1 << 20),
            Err(CompressionError::MissingKeyframe)
        ));

        // The next keyframe re-keys the late joiner.
        let key = c.compress(Lane::Payload, &sample(2), true).unwrap();
        assert_eq!(
            late.decompress(Lane::Payload, &key, true, 1 << 20).unwrap(),
            sample(2)
        );
        let after = c.compress(Lane::Payload, &sample(3), false).unwrap();
        assert_eq!(
            late.decompress(Lane::Payload, &after, false, 1 << 20)
                .unwrap(),
            sample(3)
        );
    }

    #[test]
    fn ceiling_stops_decompression_growth() {
        let zeros = vec![0u8; 1 << 20];
        let block = deflate_block(&zeros, DEFAULT_LEVEL).unwrap();
        assert!(block.len() < zeros.len() / 100);
        assert!(matches!(
            inflate_block(&block, 1024),
            Err(CompressionError::DecompressionTooLarge(1024))
        ));
        assert_eq!(inflate_block(&block, 1 << 21).unwrap(), zeros);
    }

    #[test]
    fn one_shot_round_trip() {
        let data = sample(42);
        let block = deflate_block(&data, DEFAULT_LEVEL).unwrap();
        assert_eq!(inflate_block(&block, 1 << 20).unwrap(), data);
    }

    #[test]
    fn corrupt_block_is_an_error() {
        let mut block = deflate_block(&sample(3), DEFAULT_LEVEL).unwrap();
        let mid = block.len() / 2;
        block[mid] ^= 0xFF;
        block.truncate(mid + 1);
        assert!(inflate_block(&block, 1 << 20).is_err());
    }

    #[test]
    fn unknown_ids_are_rejected() {
        assert!(compressor("lz-unknown", DEFAULT_LEVEL).is_none());
        assert!(decompressor("lz-unknown").is_none());
        assert!(compressor(DEFLATE, DEFAULT_LEVEL).is_some());
        assert!(decompressor(DEFLATE).is_some());
    }
}
