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

//! The subscribing endpoint.
//!
//! A subscriber keeps one data connection per remote node it receives from,
//! no matter how many of that node's publishers it is subscribed to. Frames
//! from publishers it does not care about are decoded and dropped, so shared
//! compression contexts stay in sync.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use meshbus_core::codec::{AttachFrame, DataDecoder, FrameCodec};
use meshbus_core::message::meta;
use meshbus_core::transport::{Connection, NodeTransport, RawIo, TransportError};
use meshbus_core::{Message, PublisherStub, SubscriberStub};
use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Receives the messages a [`Subscriber`] is subscribed to.
pub trait Receiver: Send {
    fn receive(&mut self, msg: Message);
}

impl<F: FnMut(Message) + Send> Receiver for F {
    fn receive(&mut self, msg: Message) {
        self(msg)
    }
}

/// A subscribing endpoint on one channel, including all its subchannels.
///
/// Cloning yields another handle onto the same subscriber. A subscriber
/// receives nothing until it is added to a [`crate::Node`].
///
/// # Panics
///
/// Constructing a subscriber spawns its worker task and therefore panics
/// outside of a tokio runtime.
#[derive(Clone)]
pub struct Subscriber {
    shared: Arc<Shared>,
}

struct Shared {
    uuid: Uuid,
    channel: String,
    commands: mpsc::UnboundedSender<SubCommand>,
}

pub(crate) enum SubCommand {
    SetReceiver(Option<Box<dyn Receiver>>),
    Attach {
        transport: Arc<dyn NodeTransport>,
        compression: Option<String>,
        ceiling: usize,
        max_frame: usize,
    },
    Detach,
    Connect {
        publisher: PublisherStub,
    },
    Disconnect {
        node: Uuid,
        publisher: Uuid,
    },
}

enum SubEvent {
    Dialed {
        node: Uuid,
        result: Result<Connection, TransportError>,
    },
    Frame {
        node: Uuid,
        frame: BytesMut,
    },
    Closed {
        node: Uuid,
    },
}

enum DataConn {
    Dialing {
        publishers: HashSet<Uuid>,
    },
    Open {
        frames: FramedWrite<WriteHalf<Box<dyn RawIo>>, FrameCodec>,
        publishers: HashSet<Uuid>,
        reader: tokio::task::JoinHandle<()>,
    },
}

impl DataConn {
    fn publishers(&self) -> &HashSet<Uuid> {
        match self {
            DataConn::Dialing { publishers } | DataConn::Open { publishers, .. } => publishers,
        }
    }

    fn publishers_mut(&mut self) -> &mut HashSet<Uuid> {
        match self {
            DataConn::Dialing { publishers } | DataConn::Open { publishers, .. } => publishers,
        }
    }
}

impl Subscriber {
    pub fn new(channel: impl Into<String>) -> Subscriber {
        let uuid = Uuid::new_v4();
        let (tx, commands) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();
        let worker = SubWorker {
            uuid,
            receiver: None,
            transport: None,
            max_frame: 0,
            decoder: DataDecoder::new(None, 0),
            conns: HashMap::new(),
            events_tx,
        };
        tokio::spawn(worker.run(commands, events));
        Subscriber {
            shared: Arc::new(Shared {
                uuid,
                channel: channel.into(),
                commands: tx,
            }),
        }
    }

    pub fn with_receiver(channel: impl Into<String>, receiver: Box<dyn Receiver>) -> Subscriber {
        let subscriber = Subscriber::new(channel);
        subscriber.set_receiver(Some(receiver));
        subscriber
    }

    pub fn uuid(&self) -> Uuid {
        self.shared.uuid
    }

    pub fn channel(&self) -> &str {
        &self.shared.channel
    }

    /// Installs or removes the receiver. Messages arriving without one are
    /// dropped.
    pub fn set_receiver(&self, receiver: Option<Box<dyn Receiver>>) {
        self.command(SubCommand::SetReceiver(receiver));
    }

    pub(crate) fn stub(&self, node: Uuid) -> SubscriberStub {
        SubscriberStub {
            uuid: self.shared.uuid,
            channel: self.shared.channel.clone(),
            node,
        }
    }

    pub(crate) fn attach(
        &self,
        transport: Arc<dyn NodeTransport>,
        compression: Option<String>,
        ceiling: usize,
        max_frame: usize,
    ) {
        self.command(SubCommand::Attach {
            transport,
            compression,
            ceiling,
            max_frame,
        });
    }

    pub(crate) fn detach(&self) {
        self.command(SubCommand::Detach);
    }

    pub(crate) fn connect(&self, publisher: PublisherStub) {
        self.command(SubCommand::Connect { publisher });
    }

    pub(crate) fn disconnect(&self, node: Uuid, publisher: Uuid) {
        self.command(SubCommand::Disconnect { node, publisher });
    }

    fn command(&self, command: SubCommand) {
        let _ = self.shared.commands.send(command);
    }
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("uuid", &self.shared.uuid)
            .field("channel", &self.shared.channel)
            .finish()
    }
}

struct SubWorker {
    uuid: Uuid,
    receiver: Option<Box<dyn Receiver>>,
    transport: Option<Arc<dyn NodeTransport>>,
    max_frame: usize,
    decoder: DataDecoder,
    conns: HashMap<Uuid, DataConn>,
    events_tx: mpsc::UnboundedSender<SubEvent>,
}

impl SubWorker {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<SubCommand>,
        mut events: mpsc::UnboundedReceiver<SubEvent>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    None => break,
                },
                Some(event) = events.recv() => self.on_event(event).await,
            }
        }
        self.close_all().await;
    }

    async fn on_command(&mut self, command: SubCommand) {
        match command {
            SubCommand::SetReceiver(receiver) => self.receiver = receiver,
            SubCommand::Attach {
                transport,
                compression,
                ceiling,
                max_frame,
            } => {
                self.transport = Some(transport);
                self.max_frame = max_frame;
                self.decoder = DataDecoder::new(compression, ceiling);
            }
            SubCommand::Detach => {
                self.transport = None;
                self.close_all().await;
            }
            SubCommand::Connect { publisher } => self.connect(publisher),
            SubCommand::Disconnect { node, publisher } => self.disconnect(node, publisher).await,
        }
    }

    fn connect(&mut self, publisher: PublisherStub) {
        let Some(transport) = self.transport.clone() else {
            debug!(subscriber = %self.uuid, "not attached, ignoring publisher");
            return;
        };
        let node = publisher.node;
        if let Some(conn) = self.conns.get_mut(&node) {
            conn.publishers_mut().insert(publisher.uuid);
            return;
        }
        let mut publishers = HashSet::new();
        publishers.insert(publisher.uuid);
        self.conns.insert(node, DataConn::Dialing { publishers });

        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = transport.dial_data(&publisher.ip, publisher.port).await;
            let _ = events.send(SubEvent::Dialed { node, result });
        });
    }

    async fn disconnect(&mut self, node: Uuid, publisher: Uuid) {
        let Some(conn) = self.conns.get_mut(&node) else {
            return;
        };
        conn.publishers_mut().remove(&publisher);
        self.decoder.forget_publisher(&publisher);
        if conn.publishers().is_empty() {
            if let Some(conn) = self.conns.remove(&node) {
                close(self.uuid, conn).await;
            }
        }
    }

    async fn on_event(&mut self, event: SubEvent) {
        match event {
            SubEvent::Dialed { node, result } => self.on_dialed(node, result).await,
            SubEvent::Frame { node, mut frame } => match self.decoder.decode(&mut frame) {
                Ok((publisher, msg)) => self.deliver(node, publisher, msg),
                Err(err) => {
                    trace!(subscriber = %self.uuid, "dropping undecodable data frame: {err}")
                }
            },
            SubEvent::Closed { node } => {
                // The subscription to that node's publishers is gone until
                // they are announced again.
                if let Some(conn) = self.conns.remove(&node) {
                    debug!(subscriber = %self.uuid, %node, "lost the data connection");
                    for publisher in conn.publishers() {
                        self.decoder.forget_publisher(publisher);
                    }
                }
            }
        }
    }

    async fn on_dialed(&mut self, node: Uuid, result: Result<Connection, TransportError>) {
        if !matches!(self.conns.get(&node), Some(DataConn::Dialing { .. })) {
            // Disconnected or already replaced while the dial was in flight.
            return;
        }
        let conn = match result {
            Ok(conn) => conn,
            Err(err) => {
                warn!(subscriber = %self.uuid, %node, "failed to reach the data port: {err}");
                self.conns.remove(&node);
                return;
            }
        };
        let Some(DataConn::Dialing { publishers }) = self.conns.remove(&node) else {
            return;
        };
        let (read, write) = tokio::io::split(conn.io);
        let mut frames = FramedWrite::new(write, FrameCodec::new(self.max_frame));
        if frames
            .send(AttachFrame::Attach(self.uuid).to_bytes())
            .await
            .is_err()
        {
            warn!(subscriber = %self.uuid, %node, "data connection went away during attach");
            return;
        }
        let reader = tokio::spawn(read_frames(
            node,
            FramedRead::new(read, FrameCodec::new(self.max_frame)),
            self.events_tx.clone(),
        ));
        self.conns.insert(
            node,
            DataConn::Open {
                frames,
                publishers,
                reader,
            },
        );
    }

    fn deliver(&mut self, node: Uuid, publisher: Uuid, msg: Message) {
        let wanted = self
            .conns
            .get(&node)
            .is_some_and(|conn| conn.publishers().contains(&publisher));
        if !wanted {
            trace!(subscriber = %self.uuid, %publisher, "dropping frame from an unsubscribed publisher");
            return;
        }
        if let Some(target) = msg.get_meta(meta::SUBSCRIBER) {
            if target.parse::<Uuid>() != Ok(self.uuid) {
                trace!(subscriber = %self.uuid, "dropping frame directed elsewhere");
                return;
            }
        }
        match &mut self.receiver {
            Some(receiver) => receiver.receive(msg),
            None => trace!(subscriber = %self.uuid, "no receiver installed, dropping message"),
        }
    }

    async fn close_all(&mut self) {
        for (_, conn) in self.conns.drain() {
            close(self.uuid, conn).await;
        }
    }
}

/// Tears one connection down, telling the hub goodbye when it is open.
async fn close(subscriber: Uuid, conn: DataConn) {
    if let DataConn::Open {
        mut frames, reader, ..
    } = conn
    {
        let _ = frames
            .send(AttachFrame::Detach(subscriber).to_bytes())
            .await;
        reader.abort();
    }
}

async fn read_frames(
    node: Uuid,
    mut frames: FramedRead<ReadHalf<Box<dyn RawIo>>, FrameCodec>,
    events: mpsc::UnboundedSender<SubEvent>,
) {
    loop {
        match frames.next().await {
            Some(Ok(frame)) => {
                if events.send(SubEvent::Frame { node, frame }).is_err() {
                    return;
                }
            }
            Some(Err(err)) => {
                debug!(%node, "data connection failed: {err}");
                break;
            }
            None => break,
        }
    }
    let _ = events.send(SubEvent::Closed { node });
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshbus_core::codec::DataEncoder;
    use meshbus_core::transport::PublisherTransport;
    use meshbus_core::MemoryHub;

    const MAX_FRAME: usize = 1 << 20;

    struct Forward(mpsc::UnboundedSender<Message>);

    impl Receiver for Forward {
        fn receive(&mut self, msg: Message) {
            let _ = self.0.send(msg);
        }
    }

    struct FakeNode {
        uuid: Uuid,
        port: u16,
        listener: Box<dyn meshbus_core::transport::RawListener>,
    }

    async fn fake_node(memory: &MemoryHub) -> FakeNode {
        let (port, listener) = memory.bind("local", 4242, 5242).await.unwrap();
        FakeNode {
            uuid: Uuid::new_v4(),
            port,
            listener,
        }
    }

    async fn accept_attached(
        node: &mut FakeNode,
        expected: Uuid,
    ) -> (
        FramedRead<ReadHalf<Box<dyn RawIo>>, FrameCodec>,
        FramedWrite<WriteHalf<Box<dyn RawIo>>, FrameCodec>,
    ) {
        let conn = node.listener.accept().await.unwrap();
        let (read, write) = tokio::io::split(conn.io);
        let mut frames = FramedRead::new(read, FrameCodec::new(MAX_FRAME));
        let mut hello = frames.next().await.unwrap().unwrap();
        assert_eq!(
            AttachFrame::decode(&mut hello).unwrap(),
            AttachFrame::Attach(expected)
        );
        (frames, FramedWrite::new(write, FrameCodec::new(MAX_FRAME)))
    }

    #[tokio::test]
    async fn delivers_only_subscribed_publishers() {
        let memory = MemoryHub::default();
        let mut node = fake_node(&memory).await;
        let (tx, mut received) = mpsc::unbounded_channel();
        let subscriber = Subscriber::with_receiver("weather", Box::new(Forward(tx)));
        subscriber.attach(Arc::new(memory.clone()), None, MAX_FRAME, MAX_FRAME);

        let wanted = Uuid::new_v4();
        subscriber.connect(PublisherStub {
            uuid: wanted,
            channel: "weather".to_owned(),
            node: node.uuid,
            ip: "local".to_owned(),
            port: node.port,
        });
        let (_frames, mut write) = accept_attached(&mut node, subscriber.uuid()).await;

        let mut unwanted_enc = DataEncoder::new(Uuid::new_v4());
        let msg = Message::with_payload("not for you");
        write
            .send(unwanted_enc.encode(&msg, false).unwrap())
            .await
            .unwrap();

        let mut wanted_enc = DataEncoder::new(wanted);
        let msg = Message::with_payload("for you");
        write
            .send(wanted_enc.encode(&msg, false).unwrap())
            .await
            .unwrap();

        let delivered = received.recv().await.unwrap();
        assert_eq!(&delivered.payload()[..], b"for you");
    }

    #[tokio::test]
    async fn directed_frames_for_others_are_dropped() {
        let memory = MemoryHub::default();
        let mut node = fake_node(&memory).await;
        let (tx, mut received) = mpsc::unbounded_channel();
        let subscriber = Subscriber::with_receiver("weather", Box::new(Forward(tx)));
        subscriber.attach(Arc::new(memory.clone()), None, MAX_FRAME, MAX_FRAME);

        let publisher = Uuid::new_v4();
        subscriber.connect(PublisherStub {
            uuid: publisher,
            channel: "weather".to_owned(),
            node: node.uuid,
            ip: "local".to_owned(),
            port: node.port,
        });
        let (_frames, mut write) = accept_attached(&mut node, subscriber.uuid()).await;

        let mut encoder = DataEncoder::new(publisher);
        let mut foreign = Message::with_payload("someone else's");
        foreign.set_meta(meta::SUBSCRIBER, Uuid::new_v4().to_string());
        write
            .send(encoder.encode(&foreign, false).unwrap())
            .await
            .unwrap();
        let mut mine = Message::with_payload("mine");
        mine.set_meta(meta::SUBSCRIBER, subscriber.uuid().to_string());
        write
            .send(encoder.encode(&mine, false).unwrap())
            .await
            .unwrap();

        let delivered = received.recv().await.unwrap();
        assert_eq!(&delivered.payload()[..], b"mine");
    }

    #[tokio::test]
    async fn last_disconnect_says_goodbye() {
        let memory = MemoryHub::default();
        let mut node = fake_node(&memory).await;
        let subscriber = Subscriber::new("weather");
        subscriber.attach(Arc::new(memory.clone()), None, MAX_FRAME, MAX_FRAME);

        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        for publisher in [first, second] {
            subscriber.connect(PublisherStub {
                uuid: publisher,
                channel: "weather".to_owned(),
                node: node.uuid,
                ip: "local".to_owned(),
                port: node.port,
            });
        }
        let (mut frames, _write) = accept_attached(&mut node, subscriber.uuid()).await;

        // One connection serves both publishers, so dropping the first one
        // keeps it open.
        subscriber.disconnect(node.uuid, first);
        subscriber.disconnect(node.uuid, second);
        let mut goodbye = frames.next().await.unwrap().unwrap();
        assert_eq!(
            AttachFrame::decode(&mut goodbye).unwrap(),
            AttachFrame::Detach(subscriber.uuid())
        );
    }
}
