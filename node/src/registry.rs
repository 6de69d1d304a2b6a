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

//! Bookkeeping of remote nodes, their publishers and their subscribers.
//!
//! The registry is plain state owned exclusively by the node worker; every
//! transition is a synchronous method returning what the worker has to act
//! on. The central invariant is subscription confirmation: a remote
//! subscriber counts for a local publisher only once both its attach
//! handshake arrived on the data socket and its SUBSCRIBE arrived on the
//! control link. The two halves race freely, each pair is confirmed exactly
//! once, and a confirmed pair produces exactly one farewell when torn down.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use meshbus_core::{EndPoint, PublisherStub, SubscriberStub};
use smallvec::SmallVec;
use uuid::Uuid;

/// Freshly confirmed or torn down pairs of local publisher and remote
/// subscriber.
pub(crate) type Confirmations = SmallVec<[(Uuid, SubscriberStub); 4]>;

/// State of one remote node endpoint.
#[derive(Debug)]
pub(crate) struct NodeConnection {
    pub(crate) endpoint: EndPoint,
    /// Known once the peer introduced itself on the control plane.
    pub(crate) uuid: Option<Uuid>,
    /// How many discovery announcements currently back this endpoint.
    pub(crate) refcount: usize,
    /// We hold a live outbound link to the peer.
    pub(crate) connected_to: bool,
    /// The peer dialed us.
    pub(crate) connected_from: bool,
    /// The peer answered on the control plane.
    pub(crate) is_confirmed: bool,
    /// A dial task is in flight.
    pub(crate) dialing: bool,
    /// Live control link, if any.
    pub(crate) link: Option<u64>,
    pub(crate) started_at: Instant,
    pub(crate) last_seen: Instant,
}

/// A remote subscriber as seen by the publishing side.
#[derive(Debug)]
pub(crate) struct Subscription {
    pub(crate) channel: String,
    /// Node the subscriber lives on, once the control half told us.
    pub(crate) node: Option<Uuid>,
    /// The attach handshake arrived on the data socket.
    pub(crate) is_transport_confirmed: bool,
    /// Control half seen, transport half outstanding, per local publisher.
    pending: HashMap<Uuid, PublisherStub>,
    /// Fully confirmed, per local publisher.
    confirmed: HashMap<Uuid, PublisherStub>,
    pub(crate) started_at: Instant,
}

impl Subscription {
    fn new(now: Instant) -> Self {
        Subscription {
            channel: String::new(),
            node: None,
            is_transport_confirmed: false,
            pending: HashMap::new(),
            confirmed: HashMap::new(),
            started_at: now,
        }
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn confirmed_count(&self) -> usize {
        self.confirmed.len()
    }

    fn stub(&self, uuid: Uuid) -> SubscriberStub {
        SubscriberStub {
            uuid,
            channel: self.channel.clone(),
            node: self.node.unwrap_or_else(Uuid::nil),
        }
    }
}

/// Outcome of an UNSUBSCRIBE control message.
#[derive(Debug)]
pub(crate) enum ControlUnsubscribe {
    /// The pair was confirmed; the publisher owes a farewell.
    WasConfirmed(SubscriberStub),
    /// The pair was only half-confirmed, nothing to tear down.
    WasPending,
    Unknown,
}

/// Everything a vanished node leaves behind.
#[derive(Debug, Default)]
pub(crate) struct DroppedNode {
    /// Endpoint record address, if the node had one.
    pub(crate) addr: Option<String>,
    /// Publishers the node had announced.
    pub(crate) publishers: Vec<PublisherStub>,
    /// Confirmed pairs owed a farewell.
    pub(crate) farewells: Confirmations,
}

#[derive(Debug, Default)]
pub(crate) struct Registry {
    conns: HashMap<String, NodeConnection>,
    by_uuid: HashMap<Uuid, String>,
    subscriptions: HashMap<Uuid, Subscription>,
    remote_pubs: HashMap<Uuid, HashMap<Uuid, PublisherStub>>,
}

impl Registry {
    // Connection records.

    pub(crate) fn ensure_conn(&mut self, endpoint: &EndPoint, now: Instant) -> &mut NodeConnection {
        self.conns
            .entry(endpoint.address())
            .or_insert_with(|| NodeConnection {
                endpoint: endpoint.clone(),
                uuid: None,
                refcount: 0,
                connected_to: false,
                connected_from: false,
                is_confirmed: false,
                dialing: false,
                link: None,
                started_at: now,
                last_seen: now,
            })
    }

    pub(crate) fn conn(&self, addr: &str) -> Option<&NodeConnection> {
        self.conns.get(addr)
    }

    pub(crate) fn conn_mut(&mut self, addr: &str) -> Option<&mut NodeConnection> {
        self.conns.get_mut(addr)
    }

    pub(crate) fn conns(&self) -> impl Iterator<Item = (&String, &NodeConnection)> {
        self.conns.iter()
    }

    pub(crate) fn conns_mut(&mut self) -> impl Iterator<Item = (&String, &mut NodeConnection)> {
        self.conns.iter_mut()
    }

    pub(crate) fn addr_of(&self, uuid: &Uuid) -> Option<String> {
        self.by_uuid.get(uuid).cloned()
    }

    /// Binds a connection record to the node uuid that introduced itself on
    /// it. Returns the previous uuid if the endpoint changed hands, the
    /// caller then drops the old node's state.
    pub(crate) fn attribute(&mut self, addr: &str, uuid: Uuid, now: Instant) -> Option<Uuid> {
        let conn = self.conns.get_mut(addr)?;
        conn.last_seen = now;
        let previous = conn.uuid.replace(uuid);
        self.by_uuid.insert(uuid, addr.to_owned());
        match previous {
            Some(old) if old != uuid => {
                if self.by_uuid.get(&old).is_some_and(|a| a == addr) {
                    self.by_uuid.remove(&old);
                }
                Some(old)
            }
            _ => None,
        }
    }

    pub(crate) fn touch(&mut self, uuid: &Uuid, now: Instant) {
        if let Some(addr) = self.by_uuid.get(uuid) {
            if let Some(conn) = self.conns.get_mut(addr) {
                conn.last_seen = now;
            }
        }
    }

    pub(crate) fn remove_conn(&mut self, addr: &str) -> Option<NodeConnection> {
        let conn = self.conns.remove(addr)?;
        if let Some(uuid) = conn.uuid {
            if self.by_uuid.get(&uuid).is_some_and(|a| a == addr) {
                self.by_uuid.remove(&uuid);
            }
        }
        Some(conn)
    }

    /// Confirmed but silent connections, ripe for eviction.
    pub(crate) fn stale_conns(&self, now: Instant, timeout: Duration) -> Vec<String> {
        self.conns
            .iter()
            .filter(|(_, conn)| {
                let silent = now.duration_since(conn.last_seen) > timeout;
                let settled = conn.is_confirmed || conn.connected_from;
                silent && (settled || now.duration_since(conn.started_at) > timeout)
            })
            .map(|(addr, _)| addr.clone())
            .collect()
    }

    /// Clears the link from whatever connection record carried it.
    pub(crate) fn link_closed(&mut self, link: u64) -> Option<String> {
        let (addr, conn) = self.conns.iter_mut().find(|(_, c)| c.link == Some(link))?;
        conn.link = None;
        conn.is_confirmed = false;
        conn.connected_to = false;
        conn.connected_from = false;
        Some(addr.clone())
    }

    // Remote publishers.

    /// Returns `false` if the publisher was already known.
    pub(crate) fn remote_pub_added(&mut self, node: Uuid, publisher: PublisherStub) -> bool {
        self.remote_pubs
            .entry(node)
            .or_default()
            .insert(publisher.uuid, publisher)
            .is_none()
    }

    pub(crate) fn remote_pub_removed(
        &mut self,
        node: &Uuid,
        publisher: &Uuid,
    ) -> Option<PublisherStub> {
        let pubs = self.remote_pubs.get_mut(node)?;
        let removed = pubs.remove(publisher);
        if pubs.is_empty() {
            self.remote_pubs.remove(node);
        }
        removed
    }

    /// Replaces the publisher list of a node with a freshly announced one,
    /// returning what appeared and what vanished.
    pub(crate) fn sync_remote_pubs(
        &mut self,
        node: Uuid,
        list: Vec<PublisherStub>,
    ) -> (Vec<PublisherStub>, Vec<PublisherStub>) {
        let known = self.remote_pubs.entry(node).or_default();
        let mut added = Vec::new();
        let mut fresh = HashMap::with_capacity(list.len());
        for publisher in list {
            if !known.contains_key(&publisher.uuid) {
                added.push(publisher.clone());
            }
            fresh.insert(publisher.uuid, publisher);
        }
        let removed = known
            .values()
            .filter(|p| !fresh.contains_key(&p.uuid))
            .cloned()
            .collect();
        if fresh.is_empty() {
            self.remote_pubs.remove(&node);
        } else {
            *known = fresh;
        }
        (added, removed)
    }

    pub(crate) fn all_remote_pubs(&self) -> impl Iterator<Item = &PublisherStub> {
        self.remote_pubs.values().flat_map(|pubs| pubs.values())
    }

    // Subscription confirmation.

    /// The attach handshake of a subscriber arrived on the data socket.
    /// Returns the pairs this completes. Repeated attaches are no-ops.
    pub(crate) fn transport_subscribed(&mut self, subscriber: Uuid, now: Instant) -> Confirmations {
        let sub = self
            .subscriptions
            .entry(subscriber)
            .or_insert_with(|| Subscription::new(now));
        sub.is_transport_confirmed = true;
        let drained: Vec<(Uuid, PublisherStub)> = sub.pending.drain().collect();
        let mut confirmed = Confirmations::new();
        for (publisher, stub) in drained {
            sub.confirmed.insert(publisher, stub);
            confirmed.push((publisher, sub.stub(subscriber)));
        }
        confirmed
    }

    /// The subscriber's data socket went away. Drops the whole record and
    /// returns the confirmed pairs owed a farewell.
    pub(crate) fn transport_unsubscribed(&mut self, subscriber: &Uuid) -> Confirmations {
        let Some(sub) = self.subscriptions.remove(subscriber) else {
            return Confirmations::new();
        };
        sub.confirmed
            .keys()
            .map(|publisher| (*publisher, sub.stub(*subscriber)))
            .collect()
    }

    /// A SUBSCRIBE arrived on the control link. Returns the subscriber stub
    /// when this completes the pair, `None` while the transport half is
    /// outstanding or the pair is already confirmed.
    pub(crate) fn control_subscribe(
        &mut self,
        subscriber: SubscriberStub,
        publisher: PublisherStub,
        now: Instant,
    ) -> Option<SubscriberStub> {
        let sub = self
            .subscriptions
            .entry(subscriber.uuid)
            .or_insert_with(|| Subscription::new(now));
        sub.channel = subscriber.channel;
        sub.node = Some(subscriber.node);
        if sub.confirmed.contains_key(&publisher.uuid) {
            return None;
        }
        if sub.is_transport_confirmed {
            sub.confirmed.insert(publisher.uuid, publisher);
            Some(sub.stub(subscriber.uuid))
        } else {
            sub.pending.insert(publisher.uuid, publisher);
            None
        }
    }

    pub(crate) fn control_unsubscribe(
        &mut self,
        subscriber: &Uuid,
        publisher: &Uuid,
    ) -> ControlUnsubscribe {
        let Some(sub) = self.subscriptions.get_mut(subscriber) else {
            return ControlUnsubscribe::Unknown;
        };
        if sub.confirmed.remove(publisher).is_some() {
            return ControlUnsubscribe::WasConfirmed(sub.stub(*subscriber));
        }
        if sub.pending.remove(publisher).is_some() {
            return ControlUnsubscribe::WasPending;
        }
        ControlUnsubscribe::Unknown
    }

    /// A local publisher went away; its halves of all pairs dissolve.
    pub(crate) fn drop_publisher(&mut self, publisher: &Uuid) -> Vec<SubscriberStub> {
        let mut farewells = Vec::new();
        for (uuid, sub) in self.subscriptions.iter_mut() {
            sub.pending.remove(publisher);
            if sub.confirmed.remove(publisher).is_some() {
                farewells.push(sub.stub(*uuid));
            }
        }
        farewells
    }

    /// Drops half-confirmed subscriptions nobody completed in time.
    pub(crate) fn purge_stale_pending(
        &mut self,
        now: Instant,
        timeout: Duration,
    ) -> Vec<(Uuid, String)> {
        let expired: Vec<Uuid> = self
            .subscriptions
            .iter()
            .filter(|(_, sub)| {
                sub.confirmed.is_empty()
                    && !(sub.is_transport_confirmed && sub.pending.is_empty())
                    && now.duration_since(sub.started_at) > timeout
            })
            .map(|(uuid, _)| *uuid)
            .collect();
        expired
            .into_iter()
            .filter_map(|uuid| {
                let sub = self.subscriptions.remove(&uuid)?;
                Some((uuid, sub.channel))
            })
            .collect()
    }

    pub(crate) fn subscriptions(&self) -> impl Iterator<Item = (&Uuid, &Subscription)> {
        self.subscriptions.iter()
    }

    /// Forgets everything known about a node.
    pub(crate) fn drop_node(&mut self, node: &Uuid) -> DroppedNode {
        let addr = self.by_uuid.remove(node);
        if let Some(addr) = &addr {
            self.conns.remove(addr);
        }
        let publishers = self
            .remote_pubs
            .remove(node)
            .map(|pubs| pubs.into_values().collect())
            .unwrap_or_default();

        let mut farewells = Confirmations::new();
        let of_node: Vec<Uuid> = self
            .subscriptions
            .iter()
            .filter(|(_, sub)| sub.node == Some(*node))
            .map(|(uuid, _)| *uuid)
            .collect();
        for uuid in of_node {
            farewells.extend(self.transport_unsubscribed(&uuid));
        }
        DroppedNode {
            addr,
            publishers,
            farewells,
        }
    }
}
