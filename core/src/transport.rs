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

//! Byte stream transports underneath the control and data planes.
//!
//! A node needs three capabilities from a transport family: binding its
//! control and data listeners somewhere in the configured port range,
//! dialing other nodes' control endpoints, and dialing data sockets on
//! behalf of subscribers. All nodes of one bus must share a transport
//! family; endpoints of a foreign family are ignored.

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::endpoint::EndPoint;

pub mod memory;

/// Raw byte stream requirements shared by all transports.
pub trait RawIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> RawIo for T {}

/// An established byte stream plus the address it came from.
pub struct Connection {
    /// Peer address without the port, `"local"` for in-process streams.
    pub peer_ip: String,
    pub io: Box<dyn RawIo>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer_ip", &self.peer_ip)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Every port of the configured range is taken.
    #[error("no free port between {base} and {ceiling}")]
    PortRangeExhausted { base: u16, ceiling: u16 },
    #[error("dialing {addr} failed: {source}")]
    Dial {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("unsupported transport '{0}'")]
    UnsupportedTransport(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Accept side of a bound port.
#[async_trait]
pub trait RawListener: Send {
    async fn accept(&mut self) -> Result<Connection, TransportError>;
}

/// Binding for the node owning side of the data plane.
#[async_trait]
pub trait PublisherTransport: Send + Sync {
    /// Binds a listener on the first free port in `base..=ceiling` and
    /// returns the chosen port.
    async fn bind(
        &self,
        ip: &str,
        base: u16,
        ceiling: u16,
    ) -> Result<(u16, Box<dyn RawListener>), TransportError>;
}

/// Dialing for the subscriber side of the data plane.
#[async_trait]
pub trait SubscriberTransport: Send + Sync {
    async fn dial_data(&self, ip: &str, port: u16) -> Result<Connection, TransportError>;
}

/// Full transport family as used by a node.
#[async_trait]
pub trait NodeTransport: PublisherTransport + SubscriberTransport {
    /// Scheme tag in endpoint addresses, for example `"tcp"`.
    fn scheme(&self) -> &'static str;

    /// Dials the control endpoint of another node.
    async fn dial(&self, endpoint: &EndPoint) -> Result<Connection, TransportError>;
}
