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

use std::sync::Arc;

use meshbus_core::{EndPoint, TRANSPORT_INPROC};
use tokio::sync::{mpsc, oneshot};
use tracing::info;
use uuid::Uuid;

use crate::config::NodeConfig;
use crate::discovery::DiscoveryHandle;
use crate::error::NodeError;
use crate::publisher::Publisher;
use crate::subscriber::Subscriber;
use crate::worker::{self, Command};

/// A peer on the bus.
///
/// A node binds two sockets on start, one for the control plane and one for
/// outgoing data, and owns the publishers and subscribers added to it. It
/// learns about other nodes exclusively through its [`DiscoveryHandle`].
///
/// This is a cheap handle; the node itself lives in a background task that
/// stops when [`Node::shutdown`] is called or the last handle is dropped.
#[derive(Clone)]
pub struct Node {
    inner: Arc<Inner>,
}

struct Inner {
    uuid: Uuid,
    domain: String,
    endpoint: EndPoint,
    data_port: u16,
    commands: mpsc::UnboundedSender<Command>,
}

impl Node {
    /// Binds the node's sockets and starts its worker.
    ///
    /// The control socket takes the first free port in the configured range,
    /// the data socket the next one.
    pub async fn new(config: NodeConfig) -> Result<Node, NodeError> {
        let transport = config.transport.instantiate();
        let uuid = Uuid::new_v4();
        let ceiling = config.port_ceiling();
        let (control_port, control_listener) = transport
            .bind(&config.bind_ip, config.base_port, ceiling)
            .await?;
        let (data_port, data_listener) = transport
            .bind(&config.bind_ip, config.base_port, ceiling)
            .await?;

        let endpoint = if transport.scheme() == TRANSPORT_INPROC {
            EndPoint::in_process(control_port)
        } else {
            EndPoint::tcp(config.advertise_ip.clone(), control_port)
        };
        let advertise_ip = endpoint.ip.clone();

        let (commands, commands_rx) = mpsc::unbounded_channel();
        worker::spawn(
            worker::Seed {
                uuid,
                domain: config.domain.clone(),
                endpoint: endpoint.clone(),
                advertise_ip,
                control_port,
                data_port,
                process_uuid: config.context.process_uuid,
                host_uuid: config.context.host_uuid,
                info_interval: config.info_interval,
                stale_timeout: config.stale_timeout,
                pending_timeout: config.pending_timeout,
                max_frame: config.max_frame,
                decompress_ceiling: config.decompress_ceiling,
                compression: config.compression.clone(),
            },
            transport,
            control_listener,
            data_listener,
            commands_rx,
        );
        info!(node = %uuid, %endpoint, data_port, domain = %config.domain, "node up");
        Ok(Node {
            inner: Arc::new(Inner {
                uuid,
                domain: config.domain,
                endpoint,
                data_port,
                commands,
            }),
        })
    }

    pub fn uuid(&self) -> Uuid {
        self.inner.uuid
    }

    pub fn domain(&self) -> &str {
        &self.inner.domain
    }

    /// The control plane endpoint other nodes dial, the one to hand to
    /// discovery.
    pub fn endpoint(&self) -> &EndPoint {
        &self.inner.endpoint
    }

    /// The port remote subscribers attach to for data.
    pub fn data_port(&self) -> u16 {
        self.inner.data_port
    }

    /// The handle discovery sources feed peer endpoints into.
    pub fn discovery(&self) -> DiscoveryHandle {
        DiscoveryHandle::new(self.inner.commands.clone())
    }

    /// Adds a publisher; its channel is announced to all connected nodes.
    pub async fn add_publisher(&self, publisher: &Publisher) -> Result<(), NodeError> {
        self.command(|ack| Command::AddPublisher(publisher.clone(), ack))
            .await
    }

    /// Removes a publisher, saying farewell to its confirmed subscribers.
    pub async fn remove_publisher(&self, publisher: &Publisher) -> Result<(), NodeError> {
        self.command(|ack| Command::RemovePublisher(publisher.clone(), ack))
            .await
    }

    /// Adds a subscriber; it is wired to all known matching publishers.
    pub async fn add_subscriber(&self, subscriber: &Subscriber) -> Result<(), NodeError> {
        self.command(|ack| Command::AddSubscriber(subscriber.clone(), ack))
            .await
    }

    pub async fn remove_subscriber(&self, subscriber: &Subscriber) -> Result<(), NodeError> {
        self.command(|ack| Command::RemoveSubscriber(subscriber.clone(), ack))
            .await
    }

    /// One `key:value` line per piece of node state, the same dump remote
    /// nodes can request over the control plane.
    pub async fn debug_info(&self) -> Result<Vec<String>, NodeError> {
        let (reply, lines) = oneshot::channel();
        self.inner
            .commands
            .send(Command::DebugDump(reply))
            .map_err(|_| NodeError::WorkerGone)?;
        lines.await.map_err(|_| NodeError::WorkerGone)
    }

    /// Announces the shutdown to all connected nodes and stops the worker.
    /// Remaining handles report [`NodeError::WorkerGone`] afterwards.
    pub async fn shutdown(self) -> Result<(), NodeError> {
        self.command(Command::Shutdown).await
    }

    async fn command(
        &self,
        make: impl FnOnce(oneshot::Sender<()>) -> Command,
    ) -> Result<(), NodeError> {
        let (ack, done) = oneshot::channel();
        self.inner
            .commands
            .send(make(ack))
            .map_err(|_| NodeError::WorkerGone)?;
        done.await.map_err(|_| NodeError::WorkerGone)
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("uuid", &self.inner.uuid)
            .field("domain", &self.inner.domain)
            .field("endpoint", &self.inner.endpoint)
            .finish()
    }
}
