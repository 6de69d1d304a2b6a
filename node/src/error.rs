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

//! Error types for the node runtime.

use meshbus_core::transport::TransportError;
use meshbus_core::CompressionError;

/// Error associated with bringing up or talking to a [`crate::Node`].
#[derive(Debug)]
pub enum NodeError {
    /// Binding the control or data listener failed, typically because the
    /// configured port range is exhausted.
    Bind(TransportError),
    /// The node worker task is gone; the node was shut down or its runtime
    /// dropped.
    WorkerGone,
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeError::Bind(err) => write!(f, "binding the node failed: {err}"),
            NodeError::WorkerGone => write!(f, "the node worker is gone"),
        }
    }
}

impl std::error::Error for NodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            NodeError::Bind(err) => Some(err),
            NodeError::WorkerGone => None,
        }
    }
}

impl From<TransportError> for NodeError {
    fn from(err: TransportError) -> Self {
        NodeError::Bind(err)
    }
}

/// Error associated with publishing a message.
#[derive(Debug)]
pub enum PublishError {
    /// The publisher has not been added to a node yet.
    Detached,
    /// Stream-compressing the outgoing frame failed.
    Compression(CompressionError),
}

impl std::fmt::Display for PublishError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PublishError::Detached => write!(f, "the publisher is not attached to a node"),
            PublishError::Compression(err) => write!(f, "compressing the frame failed: {err}"),
        }
    }
}

impl std::error::Error for PublishError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PublishError::Detached => None,
            PublishError::Compression(err) => Some(err),
        }
    }
}

impl From<CompressionError> for PublishError {
    fn from(err: CompressionError) -> Self {
        PublishError::Compression(err)
    }
}
