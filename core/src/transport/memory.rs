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

//! In-process transport over paired duplex streams.
//!
//! A [`MemoryHub`] is a little port namespace: nodes sharing a clone of the
//! same hub can reach each other, nodes on different hubs cannot. Used for
//! single-process buses and throughout the test suites.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::duplex;
use tokio::sync::mpsc;

use crate::endpoint::EndPoint;
use crate::transport::{
    Connection, NodeTransport, PublisherTransport, RawListener, SubscriberTransport,
    TransportError,
};
use crate::TRANSPORT_INPROC;

/// Peer address reported for in-process connections.
pub const LOCAL_IP: &str = "local";

const STREAM_BUFFER: usize = 64 * 1024;

/// Shared in-process port namespace. Cloning is cheap and all clones
/// address the same ports.
#[derive(Debug, Clone, Default)]
pub struct MemoryHub {
    inner: Arc<Mutex<HubInner>>,
}

#[derive(Debug, Default)]
struct HubInner {
    listeners: HashMap<u16, mpsc::UnboundedSender<Connection>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        MemoryHub::default()
    }

    fn connect(&self, port: u16) -> Result<Connection, TransportError> {
        let inner = self.inner.lock().expect("lock to not be poisoned");
        let accept = inner
            .listeners
            .get(&port)
            .filter(|tx| !tx.is_closed())
            .ok_or_else(|| TransportError::Dial {
                addr: format!("{TRANSPORT_INPROC}://{LOCAL_IP}:{port}"),
                source: std::io::ErrorKind::ConnectionRefused.into(),
            })?;
        let (ours, theirs) = duplex(STREAM_BUFFER);
        let _ = accept.send(Connection {
            peer_ip: LOCAL_IP.to_string(),
            io: Box::new(theirs),
        });
        Ok(Connection {
            peer_ip: LOCAL_IP.to_string(),
            io: Box::new(ours),
        })
    }
}

pub struct MemoryListener {
    port: u16,
    accept: mpsc::UnboundedReceiver<Connection>,
    hub: MemoryHub,
}

impl Drop for MemoryListener {
    fn drop(&mut self) {
        let mut inner = self.hub.inner.lock().expect("lock to not be poisoned");
        inner.listeners.remove(&self.port);
    }
}

#[async_trait]
impl RawListener for MemoryListener {
    async fn accept(&mut self) -> Result<Connection, TransportError> {
        // The sender cannot go away while the listener is registered.
        match self.accept.recv().await {
            Some(conn) => Ok(conn),
            None => Err(TransportError::Io(std::io::ErrorKind::BrokenPipe.into())),
        }
    }
}

#[async_trait]
impl PublisherTransport for MemoryHub {
    async fn bind(
        &self,
        _ip: &str,
        base: u16,
        ceiling: u16,
    ) -> Result<(u16, Box<dyn RawListener>), TransportError> {
        let mut inner = self.inner.lock().expect("lock to not be poisoned");
        for port in base..=ceiling {
            let taken = inner
                .listeners
                .get(&port)
                .is_some_and(|tx| !tx.is_closed());
            if taken {
                continue;
            }
            let (tx, rx) = mpsc::unbounded_channel();
            inner.listeners.insert(port, tx);
            let listener = MemoryListener {
                port,
                accept: rx,
                hub: self.clone(),
            };
            return Ok((port, Box::new(listener)));
        }
        Err(TransportError::PortRangeExhausted { base, ceiling })
    }
}

#[async_trait]
impl SubscriberTransport for MemoryHub {
    async fn dial_data(&self, _ip: &str, port: u16) -> Result<Connection, TransportError> {
        self.connect(port)
    }
}

#[async_trait]
impl NodeTransport for MemoryHub {
    fn scheme(&self) -> &'static str {
        TRANSPORT_INPROC
    }

    async fn dial(&self, endpoint: &EndPoint) -> Result<Connection, TransportError> {
        if endpoint.transport != TRANSPORT_INPROC {
            return Err(TransportError::UnsupportedTransport(
                endpoint.transport.clone(),
            ));
        }
        self.connect(endpoint.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn bound_ports_are_distinct() {
        let hub = MemoryHub::new();
        let (first, _l1) = hub.bind("ignored", 4242, 4245).await.unwrap();
        let (second, _l2) = hub.bind("ignored", 4242, 4245).await.unwrap();
        assert_eq!(first, 4242);
        assert_eq!(second, 4243);
    }

    #[tokio::test]
    async fn bytes_flow_between_dialer_and_acceptor() {
        let hub = MemoryHub::new();
        let (port, mut listener) = hub.bind("ignored", 4242, 4242).await.unwrap();

        let mut dialed = hub.dial_data("ignored", port).await.unwrap();
        let mut accepted = listener.accept().await.unwrap();
        assert_eq!(accepted.peer_ip, LOCAL_IP);

        dialed.io.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        accepted.io.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn dialing_an_unbound_port_is_refused() {
        let hub = MemoryHub::new();
        assert!(matches!(
            hub.dial_data("ignored", 9999).await,
            Err(TransportError::Dial { .. })
        ));
    }

    #[tokio::test]
    async fn dropping_the_listener_frees_its_port() {
        let hub = MemoryHub::new();
        let (port, listener) = hub.bind("ignored", 4242, 4242).await.unwrap();
        drop(listener);
        let (rebound, _l) = hub.bind("ignored", 4242, 4242).await.unwrap();
        assert_eq!(rebound, port);
    }

    #[tokio::test]
    async fn a_full_range_reports_exhaustion() {
        let hub = MemoryHub::new();
        let (_p1, _l1) = hub.bind("ignored", 4242, 4243).await.unwrap();
        let (_p2, _l2) = hub.bind("ignored", 4242, 4243).await.unwrap();
        assert!(matches!(
            hub.bind("ignored", 4242, 4243).await,
            Err(TransportError::PortRangeExhausted {
                base: 4242,
                ceiling: 4243
            })
        ));
    }

    #[tokio::test]
    async fn separate_hubs_do_not_see_each_other() {
        let first = MemoryHub::new();
        let second = MemoryHub::new();
        let (port, _l) = first.bind("ignored", 4242, 4242).await.unwrap();
        assert!(second.dial_data("ignored", port).await.is_err());

        let endpoint = EndPoint::in_process(port);
        assert!(first.dial(&endpoint).await.is_ok());
    }

    #[tokio::test]
    async fn foreign_schemes_are_refused() {
        let hub = MemoryHub::new();
        let endpoint = EndPoint::tcp("127.0.0.1", 4242);
        assert!(matches!(
            hub.dial(&endpoint).await,
            Err(TransportError::UnsupportedTransport(scheme)) if scheme == "tcp"
        ));
    }
}
