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

//! Control plane messages exchanged between nodes.
//!
//! Every message starts with the protocol version and a type tag, both
//! big-endian `u16`. A version mismatch invalidates the message but not the
//! link it arrived on; the peer may speak a newer version for some message
//! types only.

use bytes::{Buf, BufMut, BytesMut};
use uuid::Uuid;

use crate::wire::{self, DecodeError};
use crate::PROTOCOL_VERSION;

/// Wire tags of the control message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ControlType {
    ConnectReq = 0x0001,
    ConnectRep = 0x0002,
    NodeInfo = 0x0003,
    PubAdded = 0x0004,
    PubRemoved = 0x0005,
    Subscribe = 0x0006,
    Unsubscribe = 0x0007,
    Disconnect = 0x0008,
    Debug = 0x0009,
    Shutdown = 0x000C,
}

impl ControlType {
    pub fn from_u16(tag: u16) -> Option<ControlType> {
        Some(match tag {
            0x0001 => ControlType::ConnectReq,
            0x0002 => ControlType::ConnectRep,
            0x0003 => ControlType::NodeInfo,
            0x0004 => ControlType::PubAdded,
            0x0005 => ControlType::PubRemoved,
            0x0006 => ControlType::Subscribe,
            0x0007 => ControlType::Unsubscribe,
            0x0008 => ControlType::Disconnect,
            0x0009 => ControlType::Debug,
            0x000C => ControlType::Shutdown,
            _ => return None,
        })
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

impl std::fmt::Display for ControlType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ControlType::ConnectReq => "CONNECT_REQ",
            ControlType::ConnectRep => "CONNECT_REP",
            ControlType::NodeInfo => "NODE_INFO",
            ControlType::PubAdded => "PUB_ADDED",
            ControlType::PubRemoved => "PUB_REMOVED",
            ControlType::Subscribe => "SUBSCRIBE",
            ControlType::Unsubscribe => "UNSUBSCRIBE",
            ControlType::Disconnect => "DISCONNECT",
            ControlType::Debug => "DEBUG",
            ControlType::Shutdown => "SHUTDOWN",
        };
        f.write_str(name)
    }
}

/// A publisher as announced on the control plane. `port` is the data socket
/// of the node the publisher lives on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherDesc {
    pub channel: String,
    pub uuid: Uuid,
    pub port: u16,
}

/// A subscriber as referenced in (un)subscription messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberDesc {
    pub channel: String,
    pub uuid: Uuid,
}

impl PublisherDesc {
    fn encode(&self, dst: &mut BytesMut) {
        wire::put_cstr(dst, &self.channel);
        wire::put_uuid_str(dst, &self.uuid);
        dst.put_u16(self.port);
    }

    fn decode(src: &mut impl Buf) -> Result<PublisherDesc, DecodeError> {
        let channel = wire::get_cstr(src)?;
        let uuid = wire::get_uuid_str(src)?;
        let port = wire::get_u16(src)?;
        Ok(PublisherDesc {
            channel,
            uuid,
            port,
        })
    }
}

impl SubscriberDesc {
    fn encode(&self, dst: &mut BytesMut) {
        wire::put_cstr(dst, &self.channel);
        wire::put_uuid_str(dst, &self.uuid);
    }

    fn decode(src: &mut impl Buf) -> Result<SubscriberDesc, DecodeError> {
        let channel = wire::get_cstr(src)?;
        let uuid = wire::get_uuid_str(src)?;
        Ok(SubscriberDesc { channel, uuid })
    }
}

/// A decoded control plane message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// First message on an outbound link; attributes the link to a node and
    /// names the sender's control port so the receiver can address it.
    ConnectReq { node: Uuid, port: u16 },
    /// Reply to [`ControlMessage::ConnectReq`] listing the local publishers.
    ConnectRep {
        node: Uuid,
        publishers: Vec<PublisherDesc>,
    },
    /// Periodic keep-alive with the full publisher list.
    NodeInfo {
        node: Uuid,
        publishers: Vec<PublisherDesc>,
    },
    PubAdded(PublisherDesc),
    PubRemoved(PublisherDesc),
    /// Confirms a subscription on the control plane; pairs with the
    /// transport level attach of the same subscriber.
    Subscribe {
        subscriber: SubscriberDesc,
        publisher: PublisherDesc,
    },
    Unsubscribe {
        subscriber: SubscriberDesc,
        publisher: PublisherDesc,
    },
    /// The sender is dropping this link on purpose.
    Disconnect,
    /// Asks the receiver for its introspection dump.
    DebugRequest,
    /// Introspection dump, one `key:value` line per entry. Never empty, an
    /// empty body is a [`ControlMessage::DebugRequest`].
    DebugReply { info: Vec<String> },
    /// The sending node is shutting down; receivers drop all its state.
    Shutdown { node: Uuid },
}

impl ControlMessage {
    pub fn control_type(&self) -> ControlType {
        match self {
            ControlMessage::ConnectReq { .. } => ControlType::ConnectReq,
            ControlMessage::ConnectRep { .. } => ControlType::ConnectRep,
            ControlMessage::NodeInfo { .. } => ControlType::NodeInfo,
            ControlMessage::PubAdded(_) => ControlType::PubAdded,
            ControlMessage::PubRemoved(_) => ControlType::PubRemoved,
            ControlMessage::Subscribe { .. } => ControlType::Subscribe,
            ControlMessage::Unsubscribe { .. } => ControlType::Unsubscribe,
            ControlMessage::Disconnect => ControlType::Disconnect,
            ControlMessage::DebugRequest | ControlMessage::DebugReply { .. } => ControlType::Debug,
            ControlMessage::Shutdown { .. } => ControlType::Shutdown,
        }
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u16(PROTOCOL_VERSION);
        dst.put_u16(self.control_type().as_u16());
        match self {
            ControlMessage::ConnectReq { node, port } => {
                wire::put_uuid_str(dst, node);
                dst.put_u16(*port);
            }
            ControlMessage::ConnectRep { node, publishers }
            | ControlMessage::NodeInfo { node, publishers } => {
                wire::put_uuid_str(dst, node);
                for desc in publishers {
                    desc.encode(dst);
                }
            }
            ControlMessage::PubAdded(desc) | ControlMessage::PubRemoved(desc) => {
                desc.encode(dst);
            }
            ControlMessage::Subscribe {
                subscriber,
                publisher,
            }
            | ControlMessage::Unsubscribe {
                subscriber,
                publisher,
            } => {
                subscriber.encode(dst);
                publisher.encode(dst);
            }
            ControlMessage::Disconnect | ControlMessage::DebugRequest => {}
            ControlMessage::DebugReply { info } => {
                for line in info {
                    wire::put_cstr(dst, line);
                }
            }
            ControlMessage::Shutdown { node } => {
                wire::put_uuid_str(dst, node);
            }
        }
    }

    /// Decodes one complete control frame. The framing layer guarantees the
    /// buffer holds exactly one message.
    pub fn decode(src: &mut impl Buf) -> Result<ControlMessage, DecodeError> {
        let version = wire::get_u16(src)?;
        if version != PROTOCOL_VERSION {
            return Err(DecodeError::VersionMismatch(version));
        }
        let tag = wire::get_u16(src)?;
        let control_type = ControlType::from_u16(tag).ok_or(DecodeError::UnknownType(tag))?;
        let msg = match control_type {
            ControlType::ConnectReq => ControlMessage::ConnectReq {
                node: wire::get_uuid_str(src)?,
                port: wire::get_u16(src)?,
            },
            ControlType::ConnectRep => ControlMessage::ConnectRep {
                node: wire::get_uuid_str(src)?,
                publishers: decode_publisher_list(src)?,
            },
            ControlType::NodeInfo => ControlMessage::NodeInfo {
                node: wire::get_uuid_str(src)?,
                publishers: decode_publisher_list(src)?,
            },
            ControlType::PubAdded => ControlMessage::PubAdded(PublisherDesc::decode(src)?),
            ControlType::PubRemoved => ControlMessage::PubRemoved(PublisherDesc::decode(src)?),
            ControlType::Subscribe => ControlMessage::Subscribe {
                subscriber: SubscriberDesc::decode(src)?,
                publisher: PublisherDesc::decode(src)?,
            },
            ControlType::Unsubscribe => ControlMessage::Unsubscribe {
                subscriber: SubscriberDesc::decode(src)?,
                publisher: PublisherDesc::decode(src)?,
            },
            ControlType::Disconnect => ControlMessage::Disconnect,
            ControlType::Debug => {
                if !src.has_remaining() {
                    ControlMessage::DebugRequest
                } else {
                    let mut info = Vec::new();
                    while src.has_remaining() {
                        info.push(wire::get_cstr(src)?);
                    }
                    ControlMessage::DebugReply { info }
                }
            }
            ControlType::Shutdown => ControlMessage::Shutdown {
                node: wire::get_uuid_str(src)?,
            },
        };
        Ok(msg)
    }
}

fn decode_publisher_list(src: &mut impl Buf) -> Result<Vec<PublisherDesc>, DecodeError> {
    let mut publishers = Vec::new();
    while src.has_remaining() {
        publishers.push(PublisherDesc::decode(src)?);
    }
    Ok(publishers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn round_trip(msg: ControlMessage) -> ControlMessage {
        let mut dst = BytesMut::new();
        msg.encode(&mut dst);
        let mut src = dst.freeze();
        let back = ControlMessage::decode(&mut src).unwrap();
        assert!(!src.has_remaining(), "trailing bytes after {back:?}");
        back
    }

    fn pub_desc(channel: &str, port: u16) -> PublisherDesc {
        PublisherDesc {
            channel: channel.to_string(),
            uuid: Uuid::new_v4(),
            port,
        }
    }

    #[test]
    fn connect_req_round_trips() {
        let msg = ControlMessage::ConnectReq {
            node: Uuid::new_v4(),
            port: 4242,
        };
        assert_eq!(round_trip(msg.clone()), msg);
    }

    #[test]
    fn publisher_lists_round_trip() {
        for count in [0, 1, 3] {
            let msg = ControlMessage::NodeInfo {
                node: Uuid::new_v4(),
                publishers: (0..count)
                    .map(|i| pub_desc(&format!("weather.{i}"), 4243 + i))
                    .collect(),
            };
            assert_eq!(round_trip(msg.clone()), msg);
        }
    }

    #[test]
    fn subscribe_round_trips() {
        let msg = ControlMessage::Subscribe {
            subscriber: SubscriberDesc {
                channel: "weather".to_string(),
                uuid: Uuid::new_v4(),
            },
            publisher: pub_desc("weather.eu", 4243),
        };
        assert_eq!(round_trip(msg.clone()), msg);
    }

    #[test]
    fn bodyless_messages_round_trip() {
        assert_eq!(round_trip(ControlMessage::Disconnect), ControlMessage::Disconnect);
        assert_eq!(
            round_trip(ControlMessage::DebugRequest),
            ControlMessage::DebugRequest
        );
    }

    #[test]
    fn debug_reply_round_trips() {
        let msg = ControlMessage::DebugReply {
            info: vec!["uuid:1234".to_string(), "domain:lab".to_string()],
        };
        assert_eq!(round_trip(msg.clone()), msg);
    }

    #[test]
    fn shutdown_round_trips() {
        let msg = ControlMessage::Shutdown {
            node: Uuid::new_v4(),
        };
        assert_eq!(round_trip(msg.clone()), msg);
    }

    #[test]
    fn foreign_version_is_rejected_without_reading_further() {
        let mut dst = BytesMut::new();
        dst.put_u16(0xF006);
        dst.put_u16(ControlType::Disconnect.as_u16());
        assert!(matches!(
            ControlMessage::decode(&mut dst.freeze()),
            Err(DecodeError::VersionMismatch(0xF006))
        ));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let mut dst = BytesMut::new();
        dst.put_u16(PROTOCOL_VERSION);
        dst.put_u16(0x00FF);
        assert!(matches!(
            ControlMessage::decode(&mut dst.freeze()),
            Err(DecodeError::UnknownType(0x00FF))
        ));
    }

    #[test]
    fn truncated_bodies_are_errors() {
        let msg = ControlMessage::ConnectReq {
            node: Uuid::new_v4(),
            port: 4242,
        };
        let mut dst = BytesMut::new();
        msg.encode(&mut dst);
        let full = dst.freeze();
        for cut in 4..full.len() {
            let mut partial = Bytes::copy_from_slice(&full[..cut]);
            assert!(ControlMessage::decode(&mut partial).is_err(), "cut {cut}");
        }
    }

    #[test]
    fn wire_tags_match_the_protocol() {
        assert_eq!(ControlType::ConnectReq.as_u16(), 0x0001);
        assert_eq!(ControlType::Shutdown.as_u16(), 0x000C);
        assert_eq!(ControlType::from_u16(0x0006), Some(ControlType::Subscribe));
        assert_eq!(ControlType::from_u16(0x000A), None);
    }
}
