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

//! meshbus is a decentralized publish/subscribe message bus.
//!
//! A [`Node`] joins the bus through a discovery directory, connects to its
//! peers over pluggable transports and routes [`Message`]s from
//! [`Publisher`]s to [`Subscriber`]s whose channels match. There is no
//! broker; every process runs its own node and peers talk directly.
//!
//! See [`meshbus_node`](crate::node) for the full API and an end-to-end
//! example.

pub use bytes;
#[doc(inline)]
pub use meshbus_core as core;
#[doc(inline)]
pub use meshbus_node as node;
#[doc(inline)]
pub use meshbus_tcp as tcp;

pub use self::core::{channel_matches, EndPoint, Message};
pub use self::node::{
    DiscoveryEvent, DiscoveryHandle, Greeter, Node, NodeConfig, NodeError, PublishError,
    Publisher, PublisherConfig, Receiver, StaticDiscovery, Subscriber,
};
