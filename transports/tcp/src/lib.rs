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

//! TCP transport for meshbus nodes.
//!
//! Control and data listeners are bound by scanning the configured port
//! range for a free port, so several nodes can share a host without
//! coordination.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use socket2::{SockRef, TcpKeepalive};
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

use meshbus_core::transport::{
    Connection, NodeTransport, PublisherTransport, RawListener, SubscriberTransport,
    TransportError,
};
use meshbus_core::{EndPoint, TRANSPORT_TCP};

/// Socket options applied to every opened connection.
#[derive(Debug, Clone, Default)]
pub struct TcpConfig {
    /// Size of the recv buffer to set for opened sockets, or `None` to keep
    /// the OS default.
    recv_buffer_size: Option<usize>,
    /// Size of the send buffer to set for opened sockets, or `None` to keep
    /// the OS default.
    send_buffer_size: Option<usize>,
    /// TTL to set for opened sockets, or `None` to keep the OS default.
    ttl: Option<u32>,
    /// Keep alive probing interval, or `None` to leave probing off.
    keepalive: Option<Duration>,
    /// `TCP_NODELAY` to set for opened sockets, or `None` to keep the OS
    /// default.
    nodelay: Option<bool>,
}

impl TcpConfig {
    pub fn new() -> TcpConfig {
        TcpConfig::default()
    }

    /// Sets the size of the recv buffer for opened sockets.
    pub fn recv_buffer_size(mut self, value: usize) -> Self {
        self.recv_buffer_size = Some(value);
        self
    }

    /// Sets the size of the send buffer for opened sockets.
    pub fn send_buffer_size(mut self, value: usize) -> Self {
        self.send_buffer_size = Some(value);
        self
    }

    /// Sets the TTL for opened sockets.
    pub fn ttl(mut self, value: u32) -> Self {
        self.ttl = Some(value);
        self
    }

    /// Sets the keep alive probing interval for opened sockets.
    pub fn keepalive(mut self, value: Duration) -> Self {
        self.keepalive = Some(value);
        self
    }

    /// Sets `TCP_NODELAY` for opened sockets.
    pub fn nodelay(mut self, value: bool) -> Self {
        self.nodelay = Some(value);
        self
    }
}

/// Applies the socket configuration parameters to a socket.
fn apply_config(config: &TcpConfig, stream: &TcpStream) -> io::Result<()> {
    let socket = SockRef::from(stream);
    if let Some(recv_buffer_size) = config.recv_buffer_size {
        socket.set_recv_buffer_size(recv_buffer_size)?;
    }
    if let Some(send_buffer_size) = config.send_buffer_size {
        socket.set_send_buffer_size(send_buffer_size)?;
    }
    if let Some(ttl) = config.ttl {
        socket.set_ttl(ttl)?;
    }
    if let Some(keepalive) = config.keepalive {
        socket.set_tcp_keepalive(&TcpKeepalive::new().with_time(keepalive))?;
    }
    if let Some(nodelay) = config.nodelay {
        stream.set_nodelay(nodelay)?;
    }
    Ok(())
}

/// The TCP transport family.
#[derive(Debug, Clone, Default)]
pub struct TcpTransport {
    config: TcpConfig,
}

impl TcpTransport {
    pub fn new(config: TcpConfig) -> Self {
        TcpTransport { config }
    }

    async fn connect(&self, ip: &str, port: u16) -> Result<Connection, TransportError> {
        let addr = format!("{TRANSPORT_TCP}://{ip}:{port}");
        if port == 0 {
            debug!("instantly refusing to dial {addr}, the port is invalid");
            return Err(TransportError::Dial {
                addr,
                source: io::ErrorKind::ConnectionRefused.into(),
            });
        }
        debug!("dialing {addr}");
        let stream = TcpStream::connect((ip, port))
            .await
            .map_err(|source| TransportError::Dial {
                addr: addr.clone(),
                source,
            })?;
        apply_config(&self.config, &stream)?;
        let peer_ip = stream.peer_addr()?.ip().to_string();
        Ok(Connection {
            peer_ip,
            io: Box::new(stream),
        })
    }
}

struct TcpRawListener {
    listener: TcpListener,
    config: TcpConfig,
}

#[async_trait]
impl RawListener for TcpRawListener {
    async fn accept(&mut self) -> Result<Connection, TransportError> {
        let (stream, peer) = self.listener.accept().await?;
        apply_config(&self.config, &stream)?;
        Ok(Connection {
            peer_ip: peer.ip().to_string(),
            io: Box::new(stream),
        })
    }
}

#[async_trait]
impl PublisherTransport for TcpTransport {
    async fn bind(
        &self,
        ip: &str,
        base: u16,
        ceiling: u16,
    ) -> Result<(u16, Box<dyn RawListener>), TransportError> {
        for port in base..=ceiling {
            match TcpListener::bind((ip, port)).await {
                Ok(listener) => {
                    debug!("listening on {TRANSPORT_TCP}://{ip}:{port}");
                    let listener = TcpRawListener {
                        listener,
                        config: self.config.clone(),
                    };
                    return Ok((port, Box::new(listener)));
                }
                Err(err) if err.kind() == io::ErrorKind::AddrInUse => continue,
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
        Err(TransportError::PortRangeExhausted { base, ceiling })
    }
}

#[async_trait]
impl SubscriberTransport for TcpTransport {
    async fn dial_data(&self, ip: &str, port: u16) -> Result<Connection, TransportError> {
        self.connect(ip, port).await
    }
}

#[async_trait]
impl NodeTransport for TcpTransport {
    fn scheme(&self) -> &'static str {
        TRANSPORT_TCP
    }

    async fn dial(&self, endpoint: &EndPoint) -> Result<Connection, TransportError> {
        if endpoint.transport != TRANSPORT_TCP {
            return Err(TransportError::UnsupportedTransport(
                endpoint.transport.clone(),
            ));
        }
        self.connect(&endpoint.ip, endpoint.port).await
    }
}
