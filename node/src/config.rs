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

//! Configuration for nodes and publishers.

use std::sync::Arc;
use std::time::Duration;

use meshbus_core::compression::{DEFAULT_LEVEL, DEFLATE};
use meshbus_core::transport::NodeTransport;
use meshbus_core::{MemoryHub, ProcessContext};
use meshbus_tcp::{TcpConfig, TcpTransport};

/// Which transport family a node runs on. All nodes of one bus must agree.
#[derive(Debug, Clone)]
pub enum TransportSelect {
    /// TCP sockets with the given options.
    Tcp(TcpConfig),
    /// Duplex streams through an in-process hub.
    Memory(MemoryHub),
}

impl TransportSelect {
    pub(crate) fn instantiate(&self) -> Arc<dyn NodeTransport> {
        match self {
            TransportSelect::Tcp(config) => Arc::new(TcpTransport::new(config.clone())),
            TransportSelect::Memory(hub) => Arc::new(hub.clone()),
        }
    }
}

/// Configuration for a [`crate::Node`].
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub(crate) domain: String,
    pub(crate) context: ProcessContext,
    pub(crate) transport: TransportSelect,
    pub(crate) bind_ip: String,
    pub(crate) advertise_ip: String,
    pub(crate) base_port: u16,
    pub(crate) port_range: u16,
    pub(crate) info_interval: Duration,
    pub(crate) stale_timeout: Duration,
    pub(crate) pending_timeout: Duration,
    pub(crate) max_frame: usize,
    pub(crate) decompress_ceiling: usize,
    pub(crate) compression: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            domain: String::new(),
            context: ProcessContext::new(),
            transport: TransportSelect::Tcp(TcpConfig::default()),
            bind_ip: "0.0.0.0".to_owned(),
            advertise_ip: "127.0.0.1".to_owned(),
            base_port: 4242,
            port_range: 1000,
            info_interval: Duration::from_secs(5),
            stale_timeout: Duration::from_secs(30),
            pending_timeout: Duration::from_secs(30),
            max_frame: 8 * 1024 * 1024,
            decompress_ceiling: 64 * 1024 * 1024,
            compression: DEFLATE.to_owned(),
        }
    }
}

impl NodeConfig {
    pub fn new() -> NodeConfig {
        NodeConfig::default()
    }

    /// A node on the given context's in-process hub. Nodes built from the
    /// same context find each other without leaving the process.
    pub fn in_process(context: &ProcessContext) -> NodeConfig {
        NodeConfig::default()
            .context(context.clone())
            .transport(TransportSelect::Memory(context.hub.clone()))
    }

    /// Sets the domain label of the node.
    pub fn domain(mut self, value: impl Into<String>) -> Self {
        self.domain = value.into();
        self
    }

    /// Sets the process identity the node stamps onto outgoing messages.
    pub fn context(mut self, value: ProcessContext) -> Self {
        self.context = value;
        self
    }

    pub fn transport(mut self, value: TransportSelect) -> Self {
        self.transport = value;
        self
    }

    /// Sets the address listeners bind on.
    pub fn bind_ip(mut self, value: impl Into<String>) -> Self {
        self.bind_ip = value.into();
        self
    }

    /// Sets the address other nodes are told to reach this node under.
    pub fn advertise_ip(mut self, value: impl Into<String>) -> Self {
        self.advertise_ip = value.into();
        self
    }

    /// Sets the first port tried when binding listeners.
    pub fn base_port(mut self, value: u16) -> Self {
        self.base_port = value;
        self
    }

    /// Sets how many ports above the base port may be scanned.
    pub fn port_range(mut self, value: u16) -> Self {
        self.port_range = value;
        self
    }

    /// Sets the interval of the periodic node info broadcast.
    pub fn info_interval(mut self, value: Duration) -> Self {
        self.info_interval = value;
        self
    }

    /// Sets how long a known node may stay silent before it is evicted.
    pub fn stale_timeout(mut self, value: Duration) -> Self {
        self.stale_timeout = value;
        self
    }

    /// Sets how long a half-confirmed subscription may linger.
    pub fn pending_timeout(mut self, value: Duration) -> Self {
        self.pending_timeout = value;
        self
    }

    /// Sets the largest accepted frame on both planes.
    pub fn max_frame(mut self, value: usize) -> Self {
        self.max_frame = value;
        self
    }

    /// Sets the decompressed-size ceiling for received frames.
    pub fn decompress_ceiling(mut self, value: usize) -> Self {
        self.decompress_ceiling = value;
        self
    }

    /// Sets the compression id subscribers of this node decode with.
    pub fn compression(mut self, value: impl Into<String>) -> Self {
        self.compression = value.into();
        self
    }

    pub(crate) fn port_ceiling(&self) -> u16 {
        self.base_port.saturating_add(self.port_range)
    }
}

/// Configuration for a [`crate::Publisher`].
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub(crate) channel: String,
    pub(crate) compression: Option<String>,
    pub(crate) compression_level: u32,
}

impl PublisherConfig {
    pub fn new(channel: impl Into<String>) -> PublisherConfig {
        PublisherConfig {
            channel: channel.into(),
            compression: None,
            compression_level: DEFAULT_LEVEL,
        }
    }

    /// Stream-compresses all frames of this publisher with the given
    /// algorithm id, for example [`DEFLATE`].
    pub fn compression(mut self, id: impl Into<String>) -> Self {
        self.compression = Some(id.into());
        self
    }

    pub fn compression_level(mut self, level: u32) -> Self {
        self.compression_level = level;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_the_protocol() {
        let config = NodeConfig::default();
        assert_eq!(config.base_port, 4242);
        assert_eq!(config.port_range, 1000);
        assert_eq!(config.port_ceiling(), 5242);
        assert_eq!(config.info_interval, Duration::from_secs(5));
        assert_eq!(config.stale_timeout, Duration::from_secs(30));
        assert_eq!(config.compression, DEFLATE);
    }

    #[test]
    fn the_port_ceiling_saturates() {
        let config = NodeConfig::new().base_port(u16::MAX - 10).port_range(1000);
        assert_eq!(config.port_ceiling(), u16::MAX);
    }

    #[test]
    fn in_process_configs_share_one_context() {
        let context = ProcessContext::new();
        let a = NodeConfig::in_process(&context);
        let b = NodeConfig::in_process(&context);
        assert!(matches!(a.transport, TransportSelect::Memory(_)));
        assert_eq!(a.context.process_uuid, context.process_uuid);
        assert_eq!(a.context.process_uuid, b.context.process_uuid);
    }
}
