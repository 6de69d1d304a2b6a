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

//! Persisting received message streams and reading them back.
//!
//! A capture file is a sequence of records, each
//!
//! ```text
//! u64  length of the rest of the record
//! u64  offset in milliseconds since the first record
//! ...  meta pairs, key and value NUL terminated
//! \0\0 end of meta marker
//! u64  payload length
//! ...  payload
//! ```
//!
//! with all integers big-endian. The offsets let a replaying tool restore
//! the original inter-message timing.

use std::io::{self, Read, Write};
use std::time::Instant;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::message::Message;
use crate::wire;

/// One replayed record: the message and when it was captured, relative to
/// the start of the capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRecord {
    pub offset_ms: u64,
    pub message: Message,
}

/// Appends messages to a capture stream. The first written message defines
/// offset zero.
pub struct CaptureWriter<W> {
    sink: W,
    epoch: Option<Instant>,
}

impl<W: Write> CaptureWriter<W> {
    pub fn new(sink: W) -> Self {
        CaptureWriter { sink, epoch: None }
    }

    /// Writes `msg` stamped with the time elapsed since the first write.
    pub fn write(&mut self, msg: &Message) -> io::Result<()> {
        let offset_ms = match self.epoch {
            Some(epoch) => epoch.elapsed().as_millis() as u64,
            None => {
                self.epoch = Some(Instant::now());
                0
            }
        };
        self.write_at(offset_ms, msg)
    }

    /// Writes `msg` with an explicit offset, for re-stamping tools.
    pub fn write_at(&mut self, offset_ms: u64, msg: &Message) -> io::Result<()> {
        let mut record = BytesMut::new();
        record.put_u64(offset_ms);
        wire::put_meta_block(&mut record, msg.meta_pairs());
        record.put_u8(0);
        record.put_u8(0);
        record.put_u64(msg.payload().len() as u64);
        record.extend_from_slice(msg.payload());

        self.sink.write_all(&(record.len() as u64).to_be_bytes())?;
        self.sink.write_all(&record)?;
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()
    }

    pub fn into_inner(self) -> W {
        self.sink
    }
}

/// Reads records back from a capture stream.
pub struct CaptureReader<R> {
    source: R,
}

impl<R: Read> CaptureReader<R> {
    pub fn new(source: R) -> Self {
        CaptureReader { source }
    }

    /// Returns the next record, or `None` at a clean end of stream. A
    /// stream ending inside a record is an [`io::ErrorKind::UnexpectedEof`]
    /// error.
    pub fn read(&mut self) -> io::Result<Option<CaptureRecord>> {
        let Some(record_len) = self.read_len()? else {
            return Ok(None);
        };
        let mut raw = vec![0u8; record_len as usize];
        self.source.read_exact(&mut raw)?;
        let mut record = Bytes::from(raw);

        let offset_ms = wire::get_u64(&mut record).map_err(corrupt)?;
        let mut meta = Vec::new();
        loop {
            let key = wire::get_cstr(&mut record).map_err(corrupt)?;
            if key.is_empty() {
                let value = wire::get_cstr(&mut record).map_err(corrupt)?;
                if !value.is_empty() {
                    return Err(corrupt(wire::DecodeError::MissingTerminator));
                }
                break;
            }
            let value = wire::get_cstr(&mut record).map_err(corrupt)?;
            meta.push((key, value));
        }
        let payload_len = wire::get_u64(&mut record).map_err(corrupt)? as usize;
        if record.remaining() != payload_len {
            return Err(corrupt(wire::DecodeError::InsufficientData {
                needed: payload_len,
            }));
        }
        let payload = record.copy_to_bytes(payload_len);
        Ok(Some(CaptureRecord {
            offset_ms,
            message: Message::from_parts(meta, payload),
        }))
    }

    fn read_len(&mut self) -> io::Result<Option<u64>> {
        let mut buf = [0u8; 8];
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.source.read(&mut buf[filled..])?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "capture stream ends inside a record length",
                ));
            }
            filled += n;
        }
        Ok(Some(u64::from_be_bytes(buf)))
    }

    pub fn into_inner(self) -> R {
        self.source
    }
}

fn corrupt(err: wire::DecodeError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::meta;
    use std::io::Cursor;

    fn sample(seq: u64) -> Message {
        let mut msg = Message::with_payload(format!("reading {seq}"));
        msg.set_meta(meta::CHANNEL, "weather");
        msg.set_meta(meta::SEQUENCE, seq.to_string());
        msg
    }

    #[test]
    fn records_round_trip_with_offsets() {
        let mut writer = CaptureWriter::new(Vec::new());
        for (offset, seq) in [(0u64, 0u64), (125, 1), (3000, 2)] {
            writer.write_at(offset, &sample(seq)).unwrap();
        }

        let mut reader = CaptureReader::new(Cursor::new(writer.into_inner()));
        for (offset, seq) in [(0u64, 0u64), (125, 1), (3000, 2)] {
            let record = reader.read().unwrap().unwrap();
            assert_eq!(record.offset_ms, offset);
            assert_eq!(record.message, sample(seq));
        }
        assert!(reader.read().unwrap().is_none());
    }

    #[test]
    fn empty_stream_reads_as_none() {
        let mut reader = CaptureReader::new(Cursor::new(Vec::new()));
        assert!(reader.read().unwrap().is_none());
    }

    #[test]
    fn first_live_write_defines_offset_zero() {
        let mut writer = CaptureWriter::new(Vec::new());
        writer.write(&sample(0)).unwrap();
        writer.write(&sample(1)).unwrap();

        let mut reader = CaptureReader::new(Cursor::new(writer.into_inner()));
        let first = reader.read().unwrap().unwrap();
        let second = reader.read().unwrap().unwrap();
        assert_eq!(first.offset_ms, 0);
        assert!(second.offset_ms >= first.offset_ms);
    }

    #[test]
    fn truncated_records_are_errors() {
        let mut writer = CaptureWriter::new(Vec::new());
        writer.write_at(0, &sample(0)).unwrap();
        let full = writer.into_inner();

        for cut in 1..full.len() {
            let mut reader = CaptureReader::new(Cursor::new(full[..cut].to_vec()));
            assert!(reader.read().is_err(), "cut at {cut}");
        }
    }

    #[test]
    fn messages_without_meta_or_payload_round_trip() {
        let mut writer = CaptureWriter::new(Vec::new());
        writer.write_at(42, &Message::new()).unwrap();

        let mut reader = CaptureReader::new(Cursor::new(writer.into_inner()));
        let record = reader.read().unwrap().unwrap();
        assert_eq!(record.offset_ms, 42);
        assert_eq!(record.message, Message::new());
        assert!(reader.read().unwrap().is_none());
    }
}
