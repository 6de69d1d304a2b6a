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

//! Wire-level building blocks of the meshbus publish/subscribe bus.
//!
//! This crate contains everything below the node layer: the [`Message`]
//! envelope and its binary codec, the control message vocabulary spoken
//! between nodes, streaming compression with per-publisher dictionary
//! contexts, the capture file format, and the transport role traits with
//! their in-process implementation. It has no opinion about event loops or
//! peer management; that lives in `meshbus-node`.

pub mod capture;
pub mod codec;
pub mod compression;
pub mod control;
pub mod endpoint;
pub mod message;
pub mod process;
pub mod stub;
pub mod transport;
pub mod wire;

pub use capture::{CaptureReader, CaptureRecord, CaptureWriter};
pub use codec::{AttachFrame, ControlCodec, DataDecoder, DataEncoder, FrameCodec};
pub use compression::{CompressionError, StreamCompressor, StreamDecompressor, DEFLATE};
pub use control::{ControlMessage, ControlType, PublisherDesc, SubscriberDesc};
pub use endpoint::{EndPoint, EndPointParseError};
pub use message::{channel_matches, meta, Message};
pub use process::ProcessContext;
pub use stub::{NodeStub, PublisherStub, SubscriberStub};
pub use transport::memory::MemoryHub;
pub use transport::{
    Connection, NodeTransport, PublisherTransport, RawListener, SubscriberTransport,
    TransportError,
};
pub use wire::DecodeError;

/// Protocol version prefixed to every control message. A peer advertising a
/// version we do not recognize has that single message dropped, not its
/// connection torn down.
pub const PROTOCOL_VERSION: u16 = 0xF005;

/// Version byte leading every flat data frame.
pub const DATA_SCHEME_VERSION: u8 = 0x01;

/// Transport tag for TCP endpoints.
pub const TRANSPORT_TCP: &str = "tcp";

/// Transport tag for in-process endpoints.
pub const TRANSPORT_INPROC: &str = "inproc";
