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

//! Immutable remote-facing snapshots of nodes, publishers and subscribers.
//!
//! Live endpoint objects never leave the process that owns them; peers only
//! ever see these stubs, reconstructed from control messages.

use std::fmt;

use uuid::Uuid;

use crate::endpoint::EndPoint;

/// Snapshot of a peer node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStub {
    pub uuid: Uuid,
    pub domain: String,
    pub endpoint: EndPoint,
}

impl fmt::Display for NodeStub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node {} at {}", self.uuid, self.endpoint)
    }
}

/// Snapshot of a remote publisher, as advertised by its owning node.
///
/// `ip` and `port` locate the owning node's data socket; all publishers of
/// one node share it, which is what makes the node the publisher's sharing
/// domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherStub {
    pub uuid: Uuid,
    pub channel: String,
    /// UUID of the owning node.
    pub node: Uuid,
    pub ip: String,
    /// Data port of the owning node.
    pub port: u16,
}

impl fmt::Display for PublisherStub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "publisher {} on `{}`", self.uuid, self.channel)
    }
}

/// Snapshot of a remote subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberStub {
    pub uuid: Uuid,
    pub channel: String,
    /// UUID of the owning node.
    pub node: Uuid,
}

impl fmt::Display for SubscriberStub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subscriber {} on `{}`", self.uuid, self.channel)
    }
}
