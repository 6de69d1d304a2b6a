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

//! Feeding nodes with the whereabouts of their peers.
//!
//! Nodes do not find each other on their own. Any source of peer addresses,
//! multicast beacons, a service registry, a static list, reports what it
//! sees through a node's [`DiscoveryHandle`] and the node takes it from
//! there. [`StaticDiscovery`] is the bundled source for fixed memberships
//! and tests.

use std::sync::Mutex;

use meshbus_core::EndPoint;
use tokio::sync::mpsc;

use crate::node::Node;
use crate::worker::Command;

/// A change in the set of reachable remote nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// A remote node appeared at this endpoint.
    Added(EndPoint),
    /// A remote node disappeared from this endpoint.
    Removed(EndPoint),
    /// A remote node re-announced itself, e.g. after a restart.
    Changed(EndPoint),
}

/// Feeds discovery events into one node. Handles are cheap to clone and
/// remain valid after the node shut down, reports are simply dropped then.
#[derive(Debug, Clone)]
pub struct DiscoveryHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl DiscoveryHandle {
    pub(crate) fn new(commands: mpsc::UnboundedSender<Command>) -> Self {
        DiscoveryHandle { commands }
    }

    /// Reports a remote node at `endpoint`.
    pub fn added(&self, endpoint: EndPoint) {
        self.report(DiscoveryEvent::Added(endpoint));
    }

    /// Reports that the remote node at `endpoint` is gone.
    pub fn removed(&self, endpoint: EndPoint) {
        self.report(DiscoveryEvent::Removed(endpoint));
    }

    /// Reports that the remote node at `endpoint` announced itself anew.
    pub fn changed(&self, endpoint: EndPoint) {
        self.report(DiscoveryEvent::Changed(endpoint));
    }

    pub fn report(&self, event: DiscoveryEvent) {
        let _ = self.commands.send(Command::Discovery(event));
    }
}

/// A fixed membership directory.
///
/// Every registered node learns about all other members, past and future.
/// Endpoints of nodes living elsewhere, e.g. in another process, can be
/// mixed in with [`StaticDiscovery::advertise`].
#[derive(Debug, Default)]
pub struct StaticDiscovery {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    members: Vec<(EndPoint, DiscoveryHandle)>,
    advertised: Vec<EndPoint>,
}

impl StaticDiscovery {
    pub fn new() -> Self {
        StaticDiscovery::default()
    }

    /// Adds a node to the membership, telling it about everyone seen so far
    /// and telling everyone else about it.
    pub fn register(&self, node: &Node) {
        let endpoint = node.endpoint().clone();
        let handle = node.discovery();
        let mut inner = self.lock();
        for (member, _) in &inner.members {
            handle.added(member.clone());
        }
        for advertised in &inner.advertised {
            handle.added(advertised.clone());
        }
        for (_, member) in &inner.members {
            member.added(endpoint.clone());
        }
        inner.members.push((endpoint, handle));
    }

    /// Removes a node from the membership and tells the remaining members.
    pub fn remove(&self, node: &Node) {
        let endpoint = node.endpoint();
        let mut inner = self.lock();
        inner.members.retain(|(member, _)| member != endpoint);
        for (_, member) in &inner.members {
            member.removed(endpoint.clone());
        }
    }

    /// Announces an endpoint that is not backed by a registered node.
    pub fn advertise(&self, endpoint: EndPoint) {
        let mut inner = self.lock();
        for (_, member) in &inner.members {
            member.added(endpoint.clone());
        }
        inner.advertised.push(endpoint);
    }

    /// Withdraws a previously advertised endpoint.
    pub fn unadvertise(&self, endpoint: &EndPoint) {
        let mut inner = self.lock();
        inner.advertised.retain(|advertised| advertised != endpoint);
        for (_, member) in &inner.members {
            member.removed(endpoint.clone());
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("lock to not be poisoned")
    }
}
