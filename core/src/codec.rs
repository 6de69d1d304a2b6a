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

//! Frame codecs for the control and data planes.
//!
//! Both planes run over byte streams and use the same outer framing, a
//! big-endian `u32` length prefix handled by [`FrameCodec`]. On top of that
//! the control plane speaks [`crate::ControlMessage`] through
//! [`ControlCodec`], while data sockets carry handshake frames
//! ([`AttachFrame`], subscriber to node) and data frames ([`DataEncoder`] /
//! [`DataDecoder`], node to subscriber).

use std::collections::HashMap;
use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use uuid::Uuid;

use crate::compression::{
    compressor, decompressor, CompressionError, Lane, StreamCompressor, StreamDecompressor,
};
use crate::control::ControlMessage;
use crate::message::Message;
use crate::wire::{self, DecodeError};
use crate::DATA_SCHEME_VERSION;

const FLAG_COMPRESSED: u8 = 0b01;
const FLAG_KEYFRAME: u8 = 0b10;

const ATTACH_TAG: u8 = 0x01;
const DETACH_TAG: u8 = 0x00;

fn invalid_data(err: DecodeError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

/// Length-prefix framing shared by both planes. Frames larger than
/// `max_frame` poison the stream, there is no way to resynchronize after
/// refusing a length.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame: usize,
}

impl FrameCodec {
    pub fn new(max_frame: usize) -> Self {
        FrameCodec { max_frame }
    }
}

impl Decoder for FrameCodec {
    type Item = BytesMut;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<BytesMut>, io::Error> {
        if src.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if len > self.max_frame {
            return Err(invalid_data(DecodeError::FrameTooLarge {
                size: len,
                limit: self.max_frame,
            }));
        }
        if src.len() < 4 + len {
            src.reserve(4 + len - src.len());
            return Ok(None);
        }
        src.advance(4);
        Ok(Some(src.split_to(len)))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), io::Error> {
        if item.len() > self.max_frame {
            return Err(invalid_data(DecodeError::FrameTooLarge {
                size: item.len(),
                limit: self.max_frame,
            }));
        }
        dst.reserve(4 + item.len());
        dst.put_u32(item.len() as u32);
        dst.put(item);
        Ok(())
    }
}

/// Control link codec. Messages that fail to decode are logged and skipped
/// so one foreign-version or malformed message does not take the link down.
#[derive(Debug, Clone)]
pub struct ControlCodec {
    framing: FrameCodec,
}

impl ControlCodec {
    pub fn new(max_frame: usize) -> Self {
        ControlCodec {
            framing: FrameCodec::new(max_frame),
        }
    }
}

impl Decoder for ControlCodec {
    type Item = ControlMessage;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<ControlMessage>, io::Error> {
        loop {
            let Some(frame) = self.framing.decode(src)? else {
                return Ok(None);
            };
            match ControlMessage::decode(&mut frame.freeze()) {
                Ok(msg) => return Ok(Some(msg)),
                Err(err) => {
                    tracing::warn!("dropping undecodable control message: {err}");
                }
            }
        }
    }
}

impl Encoder<ControlMessage> for ControlCodec {
    type Error = io::Error;

    fn encode(&mut self, item: ControlMessage, dst: &mut BytesMut) -> Result<(), io::Error> {
        let mut body = BytesMut::new();
        item.encode(&mut body);
        self.framing.encode(body.freeze(), dst)
    }
}

/// Handshake frame a subscriber sends on a freshly dialed data socket, and
/// again with [`AttachFrame::Detach`] before hanging up. Receipt of the
/// attach is the transport level half of subscription confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachFrame {
    Attach(Uuid),
    Detach(Uuid),
}

impl AttachFrame {
    pub fn subscriber(&self) -> Uuid {
        match self {
            AttachFrame::Attach(uuid) | AttachFrame::Detach(uuid) => *uuid,
        }
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        match self {
            AttachFrame::Attach(uuid) => {
                dst.put_u8(ATTACH_TAG);
                wire::put_uuid(dst, uuid);
            }
            AttachFrame::Detach(uuid) => {
                dst.put_u8(DETACH_TAG);
                wire::put_uuid(dst, uuid);
            }
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut dst = BytesMut::with_capacity(17);
        self.encode(&mut dst);
        dst.freeze()
    }

    pub fn decode(src: &mut impl Buf) -> Result<AttachFrame, DecodeError> {
        let tag = wire::get_u8(src)?;
        let uuid = wire::get_uuid(src)?;
        match tag {
            ATTACH_TAG => Ok(AttachFrame::Attach(uuid)),
            DETACH_TAG => Ok(AttachFrame::Detach(uuid)),
            other => Err(DecodeError::UnsupportedHandshake(other)),
        }
    }
}

/// Serializes data frames for one publisher, stream-compressing them when
/// the publisher is configured for it.
pub struct DataEncoder {
    publisher: Uuid,
    compressor: Option<Box<dyn StreamCompressor>>,
}

impl DataEncoder {
    pub fn new(publisher: Uuid) -> Self {
        DataEncoder {
            publisher,
            compressor: None,
        }
    }

    /// Returns `None` if the compression id is unknown.
    pub fn with_compression(publisher: Uuid, id: &str, level: u32) -> Option<Self> {
        Some(DataEncoder {
            publisher,
            compressor: Some(compressor(id, level)?),
        })
    }

    /// Builds the body of one data frame. With compression active,
    /// `keyframe` restarts the dictionaries so subscribers attached since
    /// the previous frame can pick up the stream.
    pub fn encode(&mut self, msg: &Message, keyframe: bool) -> Result<Bytes, CompressionError> {
        let mut header = BytesMut::new();
        wire::put_meta_block(&mut header, msg.meta_pairs());

        let mut flags = 0u8;
        let (header, payload) = match &mut self.compressor {
            Some(compressor) => {
                flags |= FLAG_COMPRESSED;
                if keyframe {
                    flags |= FLAG_KEYFRAME;
                }
                let header = compressor.compress(Lane::Header, &header, keyframe)?;
                let payload = compressor.compress(Lane::Payload, msg.payload(), keyframe)?;
                (Bytes::from(header), Bytes::from(payload))
            }
            None => (header.freeze(), msg.payload().clone()),
        };

        let mut dst =
            BytesMut::with_capacity(1 + 16 + 1 + wire::compact_len(header.len() as u64));
        dst.put_u8(DATA_SCHEME_VERSION);
        wire::put_uuid(&mut dst, &self.publisher);
        dst.put_u8(flags);
        wire::put_compact(&mut dst, header.len() as u64);
        dst.extend_from_slice(&header);
        dst.extend_from_slice(&payload);
        Ok(dst.freeze())
    }
}

/// Deserializes data frames on the subscriber side, keeping one
/// decompression context per remote publisher.
pub struct DataDecoder {
    compression: Option<String>,
    ceiling: usize,
    contexts: HashMap<Uuid, Box<dyn StreamDecompressor>>,
}

impl DataDecoder {
    pub fn new(compression: Option<String>, ceiling: usize) -> Self {
        DataDecoder {
            compression,
            ceiling,
            contexts: HashMap::new(),
        }
    }

    /// Decodes the body of one data frame into the sending publisher and
    /// the reassembled message.
    pub fn decode(&mut self, frame: &mut BytesMut) -> Result<(Uuid, Message), DecodeError> {
        let scheme = wire::get_u8(frame)?;
        if scheme != DATA_SCHEME_VERSION {
            return Err(DecodeError::UnsupportedScheme(scheme));
        }
        let publisher = wire::get_uuid(frame)?;
        let flags = wire::get_u8(frame)?;
        let header_len = wire::get_compact(frame)? as usize;
        wire::ensure(frame, header_len)?;

        let (meta, payload) = if flags & FLAG_COMPRESSED != 0 {
            let keyframe = flags & FLAG_KEYFRAME != 0;
            let context = match self.contexts.entry(publisher) {
                std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
                std::collections::hash_map::Entry::Vacant(entry) => {
                    let id = self
                        .compression
                        .as_deref()
                        .ok_or(CompressionError::NotConfigured)?;
                    entry.insert(decompressor(id).ok_or(CompressionError::NotConfigured)?)
                }
            };
            let header_block = frame.split_to(header_len);
            let header = context.decompress(Lane::Header, &header_block, keyframe, self.ceiling)?;
            let payload = context.decompress(Lane::Payload, frame, keyframe, self.ceiling)?;
            let mut header = Bytes::from(header);
            let len = header.len();
            (wire::get_meta_block(&mut header, len)?, Bytes::from(payload))
        } else {
            let meta = wire::get_meta_block(frame, header_len)?;
            (meta, frame.split_off(0).freeze())
        };
        Ok((publisher, Message::from_parts(meta, payload)))
    }

    /// Drops the decompression context of a publisher. The next compressed
    /// frame from it must be a keyframe again.
    pub fn forget_publisher(&mut self, publisher: &Uuid) {
        self.contexts.remove(publisher);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::DEFAULT_LEVEL;
    use crate::message::meta;
    use crate::PROTOCOL_VERSION;
    use quickcheck::{quickcheck, TestResult};

    fn sample_message(seq: u64) -> Message {
        let mut msg = Message::with_payload(format!("payload number {seq}").repeat(16));
        msg.set_meta(meta::CHANNEL, "weather.eu");
        msg.set_meta(meta::SEQUENCE, seq.to_string());
        msg
    }

    #[test]
    fn frames_arrive_in_pieces() {
        let mut codec = FrameCodec::new(1 << 16);
        let mut wire_bytes = BytesMut::new();
        codec.encode(Bytes::from_static(b"hello"), &mut wire_bytes).unwrap();
        codec.encode(Bytes::from_static(b"world!"), &mut wire_bytes).unwrap();

        let mut src = BytesMut::new();
        let mut frames = Vec::new();
        for byte in wire_bytes.freeze() {
            src.put_u8(byte);
            while let Some(frame) = codec.decode(&mut src).unwrap() {
                frames.push(frame);
            }
        }
        assert_eq!(frames, vec![&b"hello"[..], &b"world!"[..]]);
        assert!(src.is_empty());
    }

    #[test]
    fn oversized_frames_poison_the_stream() {
        let mut codec = FrameCodec::new(16);
        assert!(codec
            .encode(Bytes::from(vec![0u8; 17]), &mut BytesMut::new())
            .is_err());

        let mut src = BytesMut::new();
        src.put_u32(64);
        assert!(codec.decode(&mut src).is_err());
    }

    #[test]
    fn control_codec_round_trips() {
        let mut codec = ControlCodec::new(1 << 16);
        let msg = ControlMessage::ConnectReq {
            node: Uuid::new_v4(),
            port: 4242,
        };
        let mut buf = BytesMut::new();
        codec.encode(msg.clone(), &mut buf).unwrap();
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(msg));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn control_codec_skips_undecodable_messages() {
        let mut codec = ControlCodec::new(1 << 16);
        let mut buf = BytesMut::new();

        // A frame with a foreign protocol version...
        let mut body = BytesMut::new();
        body.put_u16(PROTOCOL_VERSION + 1);
        body.put_u16(0x0008);
        let mut framing = FrameCodec::new(1 << 16);
        framing.encode(body.freeze(), &mut buf).unwrap();
        // ...followed by a healthy one.
        codec.encode(ControlMessage::Disconnect, &mut buf).unwrap();

        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(ControlMessage::Disconnect)
        );
    }

    #[test]
    fn attach_frames_round_trip() {
        for frame in [
            AttachFrame::Attach(Uuid::new_v4()),
            AttachFrame::Detach(Uuid::new_v4()),
        ] {
            let mut bytes = frame.to_bytes();
            assert_eq!(AttachFrame::decode(&mut bytes).unwrap(), frame);
        }
    }

    #[test]
    fn unknown_handshake_tags_are_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u8(0x7F);
        buf.put_slice(Uuid::new_v4().as_bytes());
        assert!(matches!(
            AttachFrame::decode(&mut buf.freeze()),
            Err(DecodeError::UnsupportedHandshake(0x7F))
        ));
    }

    #[test]
    fn plain_data_frames_round_trip() {
        let publisher = Uuid::new_v4();
        let mut encoder = DataEncoder::new(publisher);
        let mut decoder = DataDecoder::new(None, 1 << 20);

        let msg = sample_message(3);
        let body = encoder.encode(&msg, false).unwrap();
        let mut frame = BytesMut::from(&body[..]);
        let (from, back) = decoder.decode(&mut frame).unwrap();
        assert_eq!(from, publisher);
        assert_eq!(back, msg);
    }

    #[test]
    fn compressed_streams_need_a_keyframe_first() {
        let publisher = Uuid::new_v4();
        let mut encoder =
            DataEncoder::with_compression(publisher, crate::compression::DEFLATE, DEFAULT_LEVEL)
                .unwrap();

        let frames: Vec<Bytes> = (0..4)
            .map(|i| encoder.encode(&sample_message(i), i == 0).unwrap())
            .collect();

        // A decoder that saw the stream from the start keeps up.
        let mut decoder = DataDecoder::new(Some("deflate".to_string()), 1 << 20);
        for (i, body) in frames.iter().enumerate() {
            let mut frame = BytesMut::from(&body[..]);
            let (_, msg) = decoder.decode(&mut frame).unwrap();
            assert_eq!(msg, sample_message(i as u64));
        }

        // A late joiner is refused until the next keyframe.
        let mut late = DataDecoder::new(Some("deflate".to_string()), 1 << 20);
        let mut frame = BytesMut::from(&frames[2][..]);
        assert!(late.decode(&mut frame).is_err());

        let keyframe = encoder.encode(&sample_message(4), true).unwrap();
        let mut frame = BytesMut::from(&keyframe[..]);
        let (_, msg) = late.decode(&mut frame).unwrap();
        assert_eq!(msg, sample_message(4));
    }

    #[test]
    fn forgetting_a_publisher_demands_a_fresh_keyframe() {
        let publisher = Uuid::new_v4();
        let mut encoder =
            DataEncoder::with_compression(publisher, crate::compression::DEFLATE, DEFAULT_LEVEL)
                .unwrap();
        let mut decoder = DataDecoder::new(Some("deflate".to_string()), 1 << 20);

        let body = encoder.encode(&sample_message(0), true).unwrap();
        decoder.decode(&mut BytesMut::from(&body[..])).unwrap();

        decoder.forget_publisher(&publisher);
        let body = encoder.encode(&sample_message(1), false).unwrap();
        assert!(decoder.decode(&mut BytesMut::from(&body[..])).is_err());
    }

    #[test]
    fn compressed_frames_without_a_decompressor_are_refused() {
        let publisher = Uuid::new_v4();
        let mut encoder =
            DataEncoder::with_compression(publisher, crate::compression::DEFLATE, DEFAULT_LEVEL)
                .unwrap();
        let mut decoder = DataDecoder::new(None, 1 << 20);

        let body = encoder.encode(&sample_message(0), true).unwrap();
        assert!(decoder.decode(&mut BytesMut::from(&body[..])).is_err());
    }

    #[test]
    fn foreign_scheme_versions_are_rejected() {
        let mut decoder = DataDecoder::new(None, 1 << 20);
        let mut frame = BytesMut::new();
        frame.put_u8(DATA_SCHEME_VERSION + 1);
        frame.put_slice(Uuid::new_v4().as_bytes());
        frame.put_u8(0);
        frame.put_u8(0);
        assert!(matches!(
            decoder.decode(&mut frame),
            Err(DecodeError::UnsupportedScheme(_))
        ));
    }

    quickcheck! {
        fn arbitrary_messages_survive_the_data_codec(
            pairs: Vec<(String, String)>,
            payload: Vec<u8>
        ) -> TestResult {
            if pairs.iter().any(|(k, v)| {
                k.is_empty() || k.contains('\0') || v.contains('\0')
            }) {
                return TestResult::discard();
            }
            let mut msg = Message::with_payload(payload);
            for (k, v) in &pairs {
                msg.set_meta(k.clone(), v.clone());
            }

            let publisher = Uuid::new_v4();
            let mut encoder = DataEncoder::new(publisher);
            let mut decoder = DataDecoder::new(None, 1 << 24);
            let body = encoder.encode(&msg, false).unwrap();
            let (from, back) = decoder.decode(&mut BytesMut::from(&body[..])).unwrap();
            TestResult::from_bool(from == publisher && back == msg)
        }
    }
}
