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

//! Network location of a node as seen by discovery.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::{TRANSPORT_INPROC, TRANSPORT_TCP};

/// Where a peer node can be reached.
///
/// Endpoints are handed to the node by a discovery backend and identify the
/// peer's control socket. Two endpoints are considered equal when their
/// transport, address and port agree; the reachability flags do not take
/// part in equality.
#[derive(Debug, Clone)]
pub struct EndPoint {
    /// Transport family tag, e.g. `"tcp"` or `"inproc"`.
    pub transport: String,
    /// Host address. For the in-process family this is the literal `"local"`.
    pub ip: String,
    /// Control port.
    pub port: u16,
    /// Whether the endpoint lives outside this host.
    pub is_remote: bool,
    /// Whether the endpoint lives inside this very process.
    pub is_in_process: bool,
}

impl EndPoint {
    /// A remote TCP endpoint.
    pub fn tcp(ip: impl Into<String>, port: u16) -> Self {
        EndPoint {
            transport: TRANSPORT_TCP.to_owned(),
            ip: ip.into(),
            port,
            is_remote: true,
            is_in_process: false,
        }
    }

    /// An endpoint reachable through the in-process memory hub.
    pub fn in_process(port: u16) -> Self {
        EndPoint {
            transport: TRANSPORT_INPROC.to_owned(),
            ip: "local".to_owned(),
            port,
            is_remote: false,
            is_in_process: true,
        }
    }

    /// Canonical `transport://ip:port` form, used as the registry key.
    pub fn address(&self) -> String {
        format!("{}://{}:{}", self.transport, self.ip, self.port)
    }
}

impl PartialEq for EndPoint {
    fn eq(&self, other: &Self) -> bool {
        self.transport == other.transport && self.ip == other.ip && self.port == other.port
    }
}

impl Eq for EndPoint {}

impl Hash for EndPoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.transport.hash(state);
        self.ip.hash(state);
        self.port.hash(state);
    }
}

impl fmt::Display for EndPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.transport, self.ip, self.port)
    }
}

/// Error parsing an endpoint from its `transport://ip:port` form.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum EndPointParseError {
    #[error("missing `://` scheme separator")]
    MissingScheme,
    #[error("missing `:` before the port")]
    MissingPort,
    #[error("invalid port number `{0}`")]
    InvalidPort(String),
    #[error("empty host address")]
    EmptyHost,
}

impl FromStr for EndPoint {
    type Err = EndPointParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (transport, rest) = s
            .split_once("://")
            .ok_or(EndPointParseError::MissingScheme)?;
        let (ip, port) = rest.rsplit_once(':').ok_or(EndPointParseError::MissingPort)?;
        if ip.is_empty() {
            return Err(EndPointParseError::EmptyHost);
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| EndPointParseError::InvalidPort(port.to_owned()))?;
        let in_process = transport == TRANSPORT_INPROC;
        Ok(EndPoint {
            transport: transport.to_owned(),
            ip: ip.to_owned(),
            port,
            is_remote: !in_process,
            is_in_process: in_process,
        })
    }
}
