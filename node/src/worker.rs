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

//! The per-node worker task.
//!
//! One task owns all of a node's bookkeeping: the connection registry, the
//! control links, the local publishers and subscribers. Everything reaches
//! it as a message, either a command from a [`crate::Node`] handle or an
//! event from the tasks driving the sockets, so none of the state needs a
//! lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use meshbus_core::codec::ControlCodec;
use meshbus_core::control::{ControlMessage, PublisherDesc, SubscriberDesc};
use meshbus_core::message::channel_matches;
use meshbus_core::transport::{Connection, NodeTransport, RawIo, RawListener, TransportError};
use meshbus_core::{EndPoint, PublisherStub, SubscriberStub};
use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::discovery::DiscoveryEvent;
use crate::hub::{self, HubCommand, HubEvent};
use crate::publisher::Publisher;
use crate::registry::{Confirmations, ControlUnsubscribe, Registry};
use crate::subscriber::Subscriber;

pub(crate) enum Command {
    AddPublisher(Publisher, oneshot::Sender<()>),
    RemovePublisher(Publisher, oneshot::Sender<()>),
    AddSubscriber(Subscriber, oneshot::Sender<()>),
    RemoveSubscriber(Subscriber, oneshot::Sender<()>),
    Discovery(DiscoveryEvent),
    DebugDump(oneshot::Sender<Vec<String>>),
    Shutdown(oneshot::Sender<()>),
}

enum InternalEvent {
    InboundLink(Connection),
    OutboundLink { addr: String, conn: Connection },
    DialFailed { addr: String, error: TransportError },
    ControlFrame { link: u64, msg: ControlMessage },
    LinkClosed { link: u64 },
}

/// One control plane connection, either direction.
struct Link {
    peer_ip: String,
    /// Control endpoint address. Known from the start for outbound links,
    /// for inbound ones once CONNECT_REQ names the peer's port.
    addr: Option<String>,
    writer: mpsc::UnboundedSender<ControlMessage>,
    writer_task: tokio::task::JoinHandle<()>,
    reader: tokio::task::JoinHandle<()>,
}

/// Everything [`spawn`] needs to know, prepared by `Node::new`.
pub(crate) struct Seed {
    pub(crate) uuid: Uuid,
    pub(crate) domain: String,
    pub(crate) endpoint: EndPoint,
    pub(crate) advertise_ip: String,
    pub(crate) control_port: u16,
    pub(crate) data_port: u16,
    pub(crate) process_uuid: Uuid,
    pub(crate) host_uuid: Uuid,
    pub(crate) info_interval: Duration,
    pub(crate) stale_timeout: Duration,
    pub(crate) pending_timeout: Duration,
    pub(crate) max_frame: usize,
    pub(crate) decompress_ceiling: usize,
    pub(crate) compression: String,
}

pub(crate) fn spawn(
    seed: Seed,
    transport: Arc<dyn NodeTransport>,
    control_listener: Box<dyn RawListener>,
    data_listener: Box<dyn RawListener>,
    commands: mpsc::UnboundedReceiver<Command>,
) {
    let (events_tx, events) = mpsc::unbounded_channel();
    let (hub_events_tx, hub_events) = mpsc::unbounded_channel();
    let hub_tx = hub::spawn(data_listener, seed.max_frame, hub_events_tx);
    tokio::spawn(accept_links(control_listener, events_tx.clone()));

    let worker = Worker {
        uuid: seed.uuid,
        domain: seed.domain,
        endpoint: seed.endpoint,
        advertise_ip: seed.advertise_ip,
        control_port: seed.control_port,
        data_port: seed.data_port,
        process_uuid: seed.process_uuid,
        host_uuid: seed.host_uuid,
        transport,
        max_frame: seed.max_frame,
        decompress_ceiling: seed.decompress_ceiling,
        compression: seed.compression,
        info_interval: seed.info_interval,
        stale_timeout: seed.stale_timeout,
        pending_timeout: seed.pending_timeout,
        started_at: Instant::now(),
        registry: Registry::default(),
        publishers: HashMap::new(),
        subscribers: HashMap::new(),
        links: HashMap::new(),
        next_link: 0,
        hub_tx,
        events_tx,
    };
    tokio::spawn(worker.run(commands, events, hub_events));
}

struct Worker {
    uuid: Uuid,
    domain: String,
    endpoint: EndPoint,
    advertise_ip: String,
    control_port: u16,
    data_port: u16,
    process_uuid: Uuid,
    host_uuid: Uuid,
    transport: Arc<dyn NodeTransport>,
    max_frame: usize,
    decompress_ceiling: usize,
    compression: String,
    info_interval: Duration,
    stale_timeout: Duration,
    pending_timeout: Duration,
    started_at: Instant,
    registry: Registry,
    publishers: HashMap<Uuid, Publisher>,
    subscribers: HashMap<Uuid, Subscriber>,
    links: HashMap<u64, Link>,
    next_link: u64,
    hub_tx: mpsc::UnboundedSender<HubCommand>,
    events_tx: mpsc::UnboundedSender<InternalEvent>,
}

impl Worker {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<InternalEvent>,
        mut hub_events: mpsc::UnboundedReceiver<HubEvent>,
    ) {
        let mut housekeeping = tokio::time::interval(self.info_interval);
        housekeeping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => {
                        if !self.on_command(command).await {
                            return;
                        }
                    }
                    None => {
                        // All node handles are gone.
                        self.shutdown().await;
                        return;
                    }
                },
                Some(event) = events.recv() => self.on_event(event),
                Some(event) = hub_events.recv() => self.on_hub_event(event),
                _ = housekeeping.tick() => self.on_housekeeping(),
            }
        }
    }

    /// Returns `false` once the node is to stop.
    async fn on_command(&mut self, command: Command) -> bool {
        match command {
            Command::AddPublisher(publisher, ack) => {
                self.add_publisher(publisher);
                let _ = ack.send(());
            }
            Command::RemovePublisher(publisher, ack) => {
                self.remove_publisher(&publisher);
                let _ = ack.send(());
            }
            Command::AddSubscriber(subscriber, ack) => {
                self.add_subscriber(subscriber);
                let _ = ack.send(());
            }
            Command::RemoveSubscriber(subscriber, ack) => {
                self.remove_subscriber(&subscriber);
                let _ = ack.send(());
            }
            Command::Discovery(event) => self.on_discovery(event),
            Command::DebugDump(reply) => {
                let _ = reply.send(self.debug_lines());
            }
            Command::Shutdown(ack) => {
                self.shutdown().await;
                let _ = ack.send(());
                return false;
            }
        }
        true
    }

    // Local endpoints.

    fn add_publisher(&mut self, publisher: Publisher) {
        publisher.attach(
            self.uuid,
            self.advertise_ip.clone(),
            self.data_port,
            self.process_uuid,
            self.host_uuid,
            self.hub_tx.clone(),
        );
        info!(
            node = %self.uuid,
            publisher = %publisher.uuid(),
            channel = %publisher.channel(),
            "publisher added"
        );
        self.publishers.insert(publisher.uuid(), publisher.clone());
        if let Some(desc) = desc_of(&publisher) {
            self.broadcast(ControlMessage::PubAdded(desc));
        }
        let matching: Vec<Subscriber> = self
            .subscribers
            .values()
            .filter(|s| channel_matches(s.channel(), publisher.channel()))
            .cloned()
            .collect();
        for subscriber in matching {
            self.wire_local(&publisher, &subscriber);
        }
    }

    fn remove_publisher(&mut self, publisher: &Publisher) {
        let Some(publisher) = self.publishers.remove(&publisher.uuid()) else {
            return;
        };
        for stub in self.registry.drop_publisher(&publisher.uuid()) {
            publisher.removed_subscriber(&stub);
        }
        if let Some(desc) = desc_of(&publisher) {
            self.broadcast(ControlMessage::PubRemoved(desc));
        }
        for subscriber in self.subscribers.values() {
            if channel_matches(subscriber.channel(), publisher.channel()) {
                subscriber.disconnect(self.uuid, publisher.uuid());
            }
        }
        publisher.detach();
        info!(node = %self.uuid, publisher = %publisher.uuid(), "publisher removed");
    }

    fn add_subscriber(&mut self, subscriber: Subscriber) {
        subscriber.attach(
            self.transport.clone(),
            Some(self.compression.clone()),
            self.decompress_ceiling,
            self.max_frame,
        );
        info!(
            node = %self.uuid,
            subscriber = %subscriber.uuid(),
            channel = %subscriber.channel(),
            "subscriber added"
        );
        self.subscribers.insert(subscriber.uuid(), subscriber.clone());
        let matching: Vec<PublisherStub> = self
            .registry
            .all_remote_pubs()
            .filter(|p| channel_matches(subscriber.channel(), &p.channel))
            .cloned()
            .collect();
        for publisher in matching {
            self.wire_subscription(&subscriber, publisher);
        }
        let locals: Vec<Publisher> = self
            .publishers
            .values()
            .filter(|p| channel_matches(subscriber.channel(), p.channel()))
            .cloned()
            .collect();
        for publisher in locals {
            self.wire_local(&publisher, &subscriber);
        }
    }

    fn remove_subscriber(&mut self, subscriber: &Subscriber) {
        let Some(subscriber) = self.subscribers.remove(&subscriber.uuid()) else {
            return;
        };
        for publisher in self.registry.all_remote_pubs() {
            if !channel_matches(subscriber.channel(), &publisher.channel) {
                continue;
            }
            if let Some(writer) = self.link_of(&publisher.node) {
                let _ = writer.send(ControlMessage::Unsubscribe {
                    subscriber: SubscriberDesc {
                        channel: subscriber.channel().to_owned(),
                        uuid: subscriber.uuid(),
                    },
                    publisher: desc_of_stub(publisher),
                });
            }
        }
        for publisher in self.publishers.values() {
            if !channel_matches(subscriber.channel(), publisher.channel()) {
                continue;
            }
            if let ControlUnsubscribe::WasConfirmed(stub) = self
                .registry
                .control_unsubscribe(&subscriber.uuid(), &publisher.uuid())
            {
                publisher.removed_subscriber(&stub);
            }
        }
        subscriber.detach();
        info!(node = %self.uuid, subscriber = %subscriber.uuid(), "subscriber removed");
    }

    /// Completes both halves of a subscription to a remote publisher: the
    /// SUBSCRIBE on the control link and the attach on the data socket.
    fn wire_subscription(&self, subscriber: &Subscriber, publisher: PublisherStub) {
        if let Some(writer) = self.link_of(&publisher.node) {
            let _ = writer.send(ControlMessage::Subscribe {
                subscriber: SubscriberDesc {
                    channel: subscriber.channel().to_owned(),
                    uuid: subscriber.uuid(),
                },
                publisher: desc_of_stub(&publisher),
            });
        }
        subscriber.connect(publisher);
    }

    /// Wires a pair living on this very node. The data conn still goes
    /// through the node's own data socket; the control half skips the wire.
    fn wire_local(&mut self, publisher: &Publisher, subscriber: &Subscriber) {
        let Some(stub) = publisher.stub() else {
            return;
        };
        let desc = SubscriberStub {
            uuid: subscriber.uuid(),
            channel: subscriber.channel().to_owned(),
            node: self.uuid,
        };
        subscriber.connect(stub.clone());
        if let Some(confirmed) = self.registry.control_subscribe(desc, stub, Instant::now()) {
            publisher.added_subscriber(confirmed);
        }
    }

    // Discovery.

    fn on_discovery(&mut self, event: DiscoveryEvent) {
        match event {
            DiscoveryEvent::Added(endpoint) => self.on_node_seen(endpoint, true),
            DiscoveryEvent::Changed(endpoint) => self.on_node_seen(endpoint, false),
            DiscoveryEvent::Removed(endpoint) => self.on_node_gone(endpoint),
        }
    }

    fn on_node_seen(&mut self, endpoint: EndPoint, fresh: bool) {
        if endpoint == self.endpoint {
            return;
        }
        if endpoint.transport != self.transport.scheme() {
            debug!(node = %self.uuid, %endpoint, "ignoring endpoint on a foreign transport");
            return;
        }
        let now = Instant::now();
        let (link, dialing) = {
            let conn = self.registry.ensure_conn(&endpoint, now);
            if fresh {
                conn.refcount += 1;
            }
            conn.last_seen = now;
            (conn.link, conn.dialing)
        };
        match link {
            Some(link) => {
                // Already linked, re-announce ourselves.
                let announce = self.node_info();
                self.send_on(link, announce);
            }
            None if !dialing => {
                if let Some(conn) = self.registry.conn_mut(&endpoint.address()) {
                    conn.dialing = true;
                }
                self.dial(endpoint);
            }
            None => {}
        }
    }

    fn on_node_gone(&mut self, endpoint: EndPoint) {
        let addr = endpoint.address();
        let Some(conn) = self.registry.conn_mut(&addr) else {
            return;
        };
        conn.refcount = conn.refcount.saturating_sub(1);
        if conn.refcount > 0 {
            return;
        }
        conn.connected_to = false;
        let (link, uuid) = (conn.link, conn.uuid);
        debug!(node = %self.uuid, %endpoint, "dropping unreferenced endpoint");
        if let Some(link) = link {
            self.close_link(link, true);
        }
        match uuid {
            Some(uuid) => self.drop_remote_node(uuid),
            None => {
                self.registry.remove_conn(&addr);
            }
        }
    }

    fn dial(&self, endpoint: EndPoint) {
        debug!(node = %self.uuid, %endpoint, "dialing");
        let transport = self.transport.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let addr = endpoint.address();
            let event = match transport.dial(&endpoint).await {
                Ok(conn) => InternalEvent::OutboundLink { addr, conn },
                Err(error) => InternalEvent::DialFailed { addr, error },
            };
            let _ = events.send(event);
        });
    }

    // Socket events.

    fn on_event(&mut self, event: InternalEvent) {
        match event {
            InternalEvent::InboundLink(conn) => {
                let peer = conn.peer_ip.clone();
                let link = self.adopt_link(conn, None);
                debug!(node = %self.uuid, %peer, link, "inbound control link");
            }
            InternalEvent::OutboundLink { addr, conn } => self.on_outbound_link(addr, conn),
            InternalEvent::DialFailed { addr, error } => {
                if let Some(conn) = self.registry.conn_mut(&addr) {
                    conn.dialing = false;
                }
                debug!(node = %self.uuid, %addr, "dial failed: {error}");
            }
            InternalEvent::ControlFrame { link, msg } => self.on_control(link, msg),
            InternalEvent::LinkClosed { link } => self.on_link_closed(link),
        }
    }

    fn on_outbound_link(&mut self, addr: String, conn: Connection) {
        {
            let Some(record) = self.registry.conn_mut(&addr) else {
                // The endpoint was dropped while the dial was in flight.
                return;
            };
            record.dialing = false;
            if record.link.is_some() {
                // An inbound link from the same peer won the race.
                return;
            }
        }
        let link = self.adopt_link(conn, Some(addr.clone()));
        if let Some(record) = self.registry.conn_mut(&addr) {
            record.link = Some(link);
            record.connected_to = true;
        }
        debug!(node = %self.uuid, %addr, link, "outbound control link");
        self.send_on(
            link,
            ControlMessage::ConnectReq {
                node: self.uuid,
                port: self.control_port,
            },
        );
        let announce = self.node_info();
        self.send_on(link, announce);
    }

    fn adopt_link(&mut self, conn: Connection, addr: Option<String>) -> u64 {
        let id = self.next_link;
        self.next_link += 1;
        let Connection { peer_ip, io } = conn;
        let (read, write) = tokio::io::split(io);
        let (writer, writer_rx) = mpsc::unbounded_channel();
        let writer_task = tokio::spawn(write_control(
            FramedWrite::new(write, ControlCodec::new(self.max_frame)),
            writer_rx,
        ));
        let reader = tokio::spawn(read_control(
            id,
            FramedRead::new(read, ControlCodec::new(self.max_frame)),
            self.events_tx.clone(),
        ));
        self.links.insert(
            id,
            Link {
                peer_ip,
                addr,
                writer,
                writer_task,
                reader,
            },
        );
        id
    }

    /// Removes a link; `polite` says goodbye first. The writer task drains
    /// whatever is queued before the connection goes away.
    fn close_link(&mut self, link: u64, polite: bool) {
        if let Some(l) = self.links.remove(&link) {
            if polite {
                let _ = l.writer.send(ControlMessage::Disconnect);
            }
            l.reader.abort();
        }
        self.registry.link_closed(link);
    }

    fn on_link_closed(&mut self, link: u64) {
        self.links.remove(&link);
        let Some(addr) = self.registry.link_closed(link) else {
            return;
        };
        debug!(node = %self.uuid, %addr, link, "control link closed");
        let Some(conn) = self.registry.conn(&addr) else {
            return;
        };
        if conn.refcount == 0 {
            match conn.uuid {
                Some(uuid) => self.drop_remote_node(uuid),
                None => {
                    self.registry.remove_conn(&addr);
                }
            }
        }
        // With discovery still backing the endpoint, housekeeping redials.
    }

    // Control plane.

    fn on_control(&mut self, link: u64, msg: ControlMessage) {
        trace!(node = %self.uuid, link, kind = %msg.control_type(), "control message");
        match msg {
            ControlMessage::ConnectReq { node, port } => self.on_connect_req(link, node, port),
            ControlMessage::ConnectRep { node, publishers }
            | ControlMessage::NodeInfo { node, publishers } => {
                self.on_node_announced(link, node, publishers)
            }
            ControlMessage::PubAdded(desc) => self.on_pub_added(link, desc),
            ControlMessage::PubRemoved(desc) => self.on_pub_removed(link, desc),
            ControlMessage::Subscribe {
                subscriber,
                publisher,
            } => self.on_subscribe(link, subscriber, publisher),
            ControlMessage::Unsubscribe {
                subscriber,
                publisher,
            } => self.on_unsubscribe(subscriber, publisher),
            ControlMessage::Disconnect => self.close_link(link, false),
            ControlMessage::DebugRequest => {
                let info = self.debug_lines();
                self.send_on(link, ControlMessage::DebugReply { info });
            }
            ControlMessage::DebugReply { info } => {
                debug!(node = %self.uuid, link, lines = info.len(), "debug reply");
                for line in info {
                    trace!(link, "{line}");
                }
            }
            ControlMessage::Shutdown { node } => {
                debug!(node = %self.uuid, remote = %node, "remote node is shutting down");
                self.close_link(link, false);
                self.drop_remote_node(node);
            }
        }
    }

    fn on_connect_req(&mut self, link: u64, node: Uuid, port: u16) {
        let now = Instant::now();
        let endpoint = {
            let Some(l) = self.links.get_mut(&link) else {
                return;
            };
            let endpoint = if self.endpoint.is_in_process {
                EndPoint::in_process(port)
            } else {
                EndPoint::tcp(l.peer_ip.clone(), port)
            };
            l.addr = Some(endpoint.address());
            endpoint
        };
        let addr = endpoint.address();
        {
            let record = self.registry.ensure_conn(&endpoint, now);
            record.connected_from = true;
            record.is_confirmed = true;
            record.link = Some(link);
            record.last_seen = now;
        }
        if let Some(old) = self.registry.attribute(&addr, node, now) {
            self.drop_remote_node(old);
        }
        let reply = ControlMessage::ConnectRep {
            node: self.uuid,
            publishers: self.local_descs(),
        };
        self.send_on(link, reply);
    }

    /// CONNECT_REP and NODE_INFO carry the same payload and get the same
    /// treatment: bind the link to the node and reconcile its publishers.
    fn on_node_announced(&mut self, link: u64, node: Uuid, publishers: Vec<PublisherDesc>) {
        let now = Instant::now();
        let (peer_ip, addr) = {
            let Some(l) = self.links.get(&link) else {
                return;
            };
            let Some(addr) = l.addr.clone() else {
                warn!(node = %self.uuid, link, "node announcement on an unattributed link, dropping");
                return;
            };
            (l.peer_ip.clone(), addr)
        };
        if let Some(old) = self.registry.attribute(&addr, node, now) {
            self.drop_remote_node(old);
        }
        if let Some(record) = self.registry.conn_mut(&addr) {
            record.is_confirmed = true;
            if record.link.is_none() {
                record.link = Some(link);
            }
        }
        let stubs = publishers
            .into_iter()
            .map(|desc| PublisherStub {
                uuid: desc.uuid,
                channel: desc.channel,
                node,
                ip: peer_ip.clone(),
                port: desc.port,
            })
            .collect();
        let (added, removed) = self.registry.sync_remote_pubs(node, stubs);
        for publisher in added {
            self.on_remote_pub(publisher);
        }
        for publisher in removed {
            self.unwire_remote_pub(&publisher);
        }
    }

    fn on_pub_added(&mut self, link: u64, desc: PublisherDesc) {
        let Some((node, peer_ip)) = self.attributed(link) else {
            warn!(node = %self.uuid, link, "publisher announcement on an unattributed link, dropping");
            return;
        };
        self.registry.touch(&node, Instant::now());
        let stub = PublisherStub {
            uuid: desc.uuid,
            channel: desc.channel,
            node,
            ip: peer_ip,
            port: desc.port,
        };
        if self.registry.remote_pub_added(node, stub.clone()) {
            self.on_remote_pub(stub);
        }
    }

    fn on_pub_removed(&mut self, link: u64, desc: PublisherDesc) {
        let Some((node, _)) = self.attributed(link) else {
            return;
        };
        if let Some(stub) = self.registry.remote_pub_removed(&node, &desc.uuid) {
            self.unwire_remote_pub(&stub);
        }
    }

    fn on_remote_pub(&self, publisher: PublisherStub) {
        debug!(
            node = %self.uuid,
            remote = %publisher.node,
            channel = %publisher.channel,
            "remote publisher appeared"
        );
        for subscriber in self.subscribers.values() {
            if channel_matches(subscriber.channel(), &publisher.channel) {
                self.wire_subscription(subscriber, publisher.clone());
            }
        }
    }

    fn unwire_remote_pub(&self, publisher: &PublisherStub) {
        for subscriber in self.subscribers.values() {
            if channel_matches(subscriber.channel(), &publisher.channel) {
                subscriber.disconnect(publisher.node, publisher.uuid);
            }
        }
    }

    fn on_subscribe(&mut self, link: u64, subscriber: SubscriberDesc, publisher: PublisherDesc) {
        let node = self
            .attributed(link)
            .map(|(uuid, _)| uuid)
            .unwrap_or_else(Uuid::nil);
        let Some(local) = self.publishers.get(&publisher.uuid) else {
            warn!(node = %self.uuid, publisher = %publisher.uuid, "subscription to an unknown publisher, dropping");
            return;
        };
        let Some(stub) = local.stub() else {
            return;
        };
        let subscriber = SubscriberStub {
            uuid: subscriber.uuid,
            channel: subscriber.channel,
            node,
        };
        if let Some(confirmed) = self.registry.control_subscribe(subscriber, stub, Instant::now())
        {
            local.added_subscriber(confirmed);
        }
    }

    fn on_unsubscribe(&mut self, subscriber: SubscriberDesc, publisher: PublisherDesc) {
        match self
            .registry
            .control_unsubscribe(&subscriber.uuid, &publisher.uuid)
        {
            ControlUnsubscribe::WasConfirmed(stub) => {
                if let Some(local) = self.publishers.get(&publisher.uuid) {
                    local.removed_subscriber(&stub);
                }
            }
            ControlUnsubscribe::WasPending | ControlUnsubscribe::Unknown => {}
        }
    }

    // Data plane.

    fn on_hub_event(&mut self, event: HubEvent) {
        match event {
            HubEvent::Attached { subscriber } => {
                debug!(node = %self.uuid, %subscriber, "subscriber attached to the data socket");
                // Every stream re-keys so the newcomer can decode from its
                // first frame.
                for publisher in self.publishers.values() {
                    publisher.mark_keyframe();
                }
                let confirmations = self.registry.transport_subscribed(subscriber, Instant::now());
                self.deliver_welcomes(confirmations);
            }
            HubEvent::Detached { subscriber } => {
                debug!(node = %self.uuid, %subscriber, "subscriber left the data socket");
                let farewells = self.registry.transport_unsubscribed(&subscriber);
                self.deliver_farewells(farewells);
            }
        }
    }

    fn deliver_welcomes(&self, confirmations: Confirmations) {
        for (publisher, stub) in confirmations {
            if let Some(publisher) = self.publishers.get(&publisher) {
                publisher.added_subscriber(stub);
            }
        }
    }

    fn deliver_farewells(&self, farewells: Confirmations) {
        for (publisher, stub) in farewells {
            if let Some(publisher) = self.publishers.get(&publisher) {
                publisher.removed_subscriber(&stub);
            }
        }
    }

    // Housekeeping.

    fn on_housekeeping(&mut self) {
        let now = Instant::now();
        if !self.links.is_empty() {
            self.broadcast(self.node_info());
        }
        for addr in self.registry.stale_conns(now, self.stale_timeout) {
            warn!(node = %self.uuid, %addr, "endpoint went silent, evicting");
            let (link, uuid) = match self.registry.conn(&addr) {
                Some(conn) => (conn.link, conn.uuid),
                None => continue,
            };
            if let Some(link) = link {
                self.close_link(link, false);
            }
            match uuid {
                Some(uuid) => self.drop_remote_node(uuid),
                None => {
                    self.registry.remove_conn(&addr);
                }
            }
        }
        for (subscriber, channel) in self.registry.purge_stale_pending(now, self.pending_timeout)
        {
            debug!(node = %self.uuid, %subscriber, %channel, "dropping half-confirmed subscription");
        }
        let redial: Vec<EndPoint> = self
            .registry
            .conns_mut()
            .filter(|(_, conn)| conn.refcount > 0 && conn.link.is_none() && !conn.dialing)
            .map(|(_, conn)| {
                conn.dialing = true;
                conn.endpoint.clone()
            })
            .collect();
        for endpoint in redial {
            self.dial(endpoint);
        }
    }

    // Teardown.

    async fn shutdown(&mut self) {
        info!(node = %self.uuid, "shutting down");
        self.broadcast(ControlMessage::Shutdown { node: self.uuid });
        for subscriber in self.subscribers.values() {
            subscriber.detach();
        }
        for publisher in self.publishers.values() {
            publisher.detach();
        }
        for (_, link) in self.links.drain() {
            drop(link.writer);
            link.reader.abort();
            // Waits for the goodbye to be flushed.
            let _ = link.writer_task.await;
        }
    }

    // Plumbing.

    fn drop_remote_node(&mut self, node: Uuid) {
        if let Some(addr) = self.registry.addr_of(&node) {
            if let Some(link) = self.registry.conn(&addr).and_then(|c| c.link) {
                self.close_link(link, false);
            }
        }
        let dropped = self.registry.drop_node(&node);
        debug!(node = %self.uuid, remote = %node, publishers = dropped.publishers.len(), "dropping remote node state");
        for publisher in &dropped.publishers {
            self.unwire_remote_pub(publisher);
        }
        self.deliver_farewells(dropped.farewells);
    }

    fn attributed(&self, link: u64) -> Option<(Uuid, String)> {
        let l = self.links.get(&link)?;
        let addr = l.addr.as_ref()?;
        let uuid = self.registry.conn(addr)?.uuid?;
        Some((uuid, l.peer_ip.clone()))
    }

    fn link_of(&self, node: &Uuid) -> Option<&mpsc::UnboundedSender<ControlMessage>> {
        let addr = self.registry.addr_of(node)?;
        let link = self.registry.conn(&addr)?.link?;
        self.links.get(&link).map(|l| &l.writer)
    }

    fn send_on(&self, link: u64, msg: ControlMessage) {
        if let Some(l) = self.links.get(&link) {
            let _ = l.writer.send(msg);
        }
    }

    fn broadcast(&self, msg: ControlMessage) {
        for link in self.links.values() {
            let _ = link.writer.send(msg.clone());
        }
    }

    fn node_info(&self) -> ControlMessage {
        ControlMessage::NodeInfo {
            node: self.uuid,
            publishers: self.local_descs(),
        }
    }

    fn local_descs(&self) -> Vec<PublisherDesc> {
        self.publishers.values().filter_map(desc_of).collect()
    }

    fn debug_lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("uuid:{}", self.uuid),
            format!("domain:{}", self.domain),
            format!("endpoint:{}", self.endpoint),
            format!("uptime:{}s", self.started_at.elapsed().as_secs()),
            format!("publishers:{}", self.publishers.len()),
            format!("subscribers:{}", self.subscribers.len()),
        ];
        // Positional, `conn:<addr>:<uuid>:refcount:to:from:confirmed` and
        // `sub:<uuid>:pending:confirmed`; peers parse these.
        for (addr, conn) in self.registry.conns() {
            lines.push(format!(
                "conn:{addr}:{}:{}:{}:{}:{}",
                conn.uuid
                    .map(|u| u.to_string())
                    .unwrap_or_else(|| "?".to_owned()),
                conn.refcount,
                conn.connected_to,
                conn.connected_from,
                conn.is_confirmed,
            ));
        }
        for (uuid, sub) in self.registry.subscriptions() {
            lines.push(format!(
                "sub:{uuid}:{}:{}",
                sub.pending_count(),
                sub.confirmed_count(),
            ));
        }
        lines
    }
}

fn desc_of(publisher: &Publisher) -> Option<PublisherDesc> {
    publisher.stub().map(|stub| desc_of_stub(&stub))
}

fn desc_of_stub(stub: &PublisherStub) -> PublisherDesc {
    PublisherDesc {
        channel: stub.channel.clone(),
        uuid: stub.uuid,
        port: stub.port,
    }
}

async fn accept_links(
    mut listener: Box<dyn RawListener>,
    events: mpsc::UnboundedSender<InternalEvent>,
) {
    loop {
        match listener.accept().await {
            Ok(conn) => {
                if events.send(InternalEvent::InboundLink(conn)).is_err() {
                    return;
                }
            }
            Err(err) => {
                warn!("control listener failed: {err}");
                return;
            }
        }
    }
}

async fn read_control(
    link: u64,
    mut frames: FramedRead<ReadHalf<Box<dyn RawIo>>, ControlCodec>,
    events: mpsc::UnboundedSender<InternalEvent>,
) {
    loop {
        match frames.next().await {
            Some(Ok(msg)) => {
                if events
                    .send(InternalEvent::ControlFrame { link, msg })
                    .is_err()
                {
                    return;
                }
            }
            Some(Err(err)) => {
                debug!(link, "control link failed: {err}");
                break;
            }
            None => break,
        }
    }
    let _ = events.send(InternalEvent::LinkClosed { link });
}

async fn write_control(
    mut framed: FramedWrite<WriteHalf<Box<dyn RawIo>>, ControlCodec>,
    mut rx: mpsc::UnboundedReceiver<ControlMessage>,
) {
    while let Some(msg) = rx.recv().await {
        if framed.send(msg).await.is_err() {
            break;
        }
    }
}
