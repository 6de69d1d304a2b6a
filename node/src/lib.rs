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

//! Publish/subscribe over a mesh of equal nodes.
//!
//! Every process hosts one or more [`Node`]s. A node binds a control socket
//! and a data socket, announces its publishers to whatever peers discovery
//! reports, and completes subscriptions in two halves: an attach handshake
//! on the data socket plus a SUBSCRIBE on the control link. Once both
//! halves are seen the publisher greets the subscriber and frames flow,
//! broadcast to everyone or directed at a single subscriber.
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use meshbus_core::{Message, ProcessContext};
//! use meshbus_node::{Node, NodeConfig, Publisher, StaticDiscovery, Subscriber};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let context = ProcessContext::new();
//! let directory = StaticDiscovery::new();
//!
//! let reporting = Node::new(NodeConfig::in_process(&context)).await?;
//! let publisher = Publisher::new("sensors.temperature");
//! reporting.add_publisher(&publisher).await?;
//! directory.register(&reporting);
//!
//! let watching = Node::new(NodeConfig::in_process(&context)).await?;
//! let subscriber = Subscriber::with_receiver(
//!     "sensors",
//!     Box::new(|msg: Message| println!("{:?}", msg.payload())),
//! );
//! watching.add_subscriber(&subscriber).await?;
//! directory.register(&watching);
//!
//! publisher.wait_for_subscribers(1, Duration::from_secs(5)).await;
//! publisher.send(&Message::with_payload("21.5"))?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod discovery;

mod error;
mod hub;
mod node;
mod publisher;
mod registry;
mod subscriber;
mod worker;

pub use config::{NodeConfig, PublisherConfig, TransportSelect};
pub use discovery::{DiscoveryEvent, DiscoveryHandle, StaticDiscovery};
pub use error::{NodeError, PublishError};
pub use node::Node;
pub use publisher::{Greeter, Publisher};
pub use subscriber::{Receiver, Subscriber};
