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

//! The outbound data socket shared by all publishers of a node.
//!
//! Remote subscribers dial the node's data port and identify themselves with
//! an attach frame. From then on the hub fans published frames out to them,
//! either to everyone or to a single subscriber for directed messages.

use std::collections::HashMap;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use meshbus_core::codec::{AttachFrame, FrameCodec};
use meshbus_core::transport::{Connection, RawIo, RawListener};
use tokio::io::WriteHalf;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug)]
pub(crate) enum HubCommand {
    /// A frame for every attached subscriber.
    Broadcast(Bytes),
    /// A frame for one subscriber only.
    Direct(Uuid, Bytes),
}

/// Transport-level subscriber churn, reported to the node worker.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum HubEvent {
    Attached { subscriber: Uuid },
    Detached { subscriber: Uuid },
}

enum ConnEvent {
    Attached {
        subscriber: Uuid,
        writer: mpsc::UnboundedSender<Bytes>,
    },
    Closed {
        subscriber: Uuid,
        /// Identifies the connection, so a close cannot evict a newer
        /// attachment of the same subscriber.
        writer: mpsc::UnboundedSender<Bytes>,
    },
}

/// Runs the hub on the given data listener. The hub stops once the returned
/// command sender is dropped, draining queued frames to each subscriber
/// before the connections go away.
pub(crate) fn spawn(
    mut listener: Box<dyn RawListener>,
    max_frame: usize,
    events: mpsc::UnboundedSender<HubEvent>,
) -> mpsc::UnboundedSender<HubCommand> {
    let (tx, mut commands) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let (conn_tx, mut conn_events) = mpsc::unbounded_channel();
        let mut subscribers: HashMap<Uuid, mpsc::UnboundedSender<Bytes>> = HashMap::new();
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(HubCommand::Broadcast(frame)) => {
                        // A failed send means the writer already ended, its
                        // reader reports the close shortly after.
                        for writer in subscribers.values() {
                            let _ = writer.send(frame.clone());
                        }
                    }
                    Some(HubCommand::Direct(to, frame)) => {
                        if let Some(writer) = subscribers.get(&to) {
                            let _ = writer.send(frame);
                        }
                    }
                    None => break,
                },
                conn = listener.accept() => match conn {
                    Ok(conn) => {
                        tokio::spawn(drive_connection(conn, max_frame, conn_tx.clone()));
                    }
                    Err(err) => {
                        warn!("data listener failed: {err}");
                        break;
                    }
                },
                event = conn_events.recv() => match event {
                    Some(ConnEvent::Attached { subscriber, writer }) => {
                        if subscribers.insert(subscriber, writer).is_none() {
                            let _ = events.send(HubEvent::Attached { subscriber });
                        }
                    }
                    Some(ConnEvent::Closed { subscriber, writer }) => {
                        let current = subscribers
                            .get(&subscriber)
                            .is_some_and(|w| w.same_channel(&writer));
                        if current {
                            subscribers.remove(&subscriber);
                            let _ = events.send(HubEvent::Detached { subscriber });
                        }
                    }
                    None => break,
                },
            }
        }
    });
    tx
}

/// Reads attach frames off one inbound data connection and keeps its writer
/// task fed with the hub's frames.
async fn drive_connection(
    conn: Connection,
    max_frame: usize,
    events: mpsc::UnboundedSender<ConnEvent>,
) {
    let Connection { peer_ip, io } = conn;
    let (read, write) = tokio::io::split(io);
    let (writer_tx, writer_rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_frames(
        FramedWrite::new(write, FrameCodec::new(max_frame)),
        writer_rx,
    ));

    let mut frames = FramedRead::new(read, FrameCodec::new(max_frame));
    let mut attached = None;
    while let Some(frame) = frames.next().await {
        match frame {
            Ok(mut frame) => match AttachFrame::decode(&mut frame) {
                Ok(AttachFrame::Attach(subscriber)) => {
                    if let Some(old) = attached.replace(subscriber) {
                        if old != subscriber {
                            let _ = events.send(ConnEvent::Closed {
                                subscriber: old,
                                writer: writer_tx.clone(),
                            });
                        }
                    }
                    let _ = events.send(ConnEvent::Attached {
                        subscriber,
                        writer: writer_tx.clone(),
                    });
                }
                Ok(AttachFrame::Detach(subscriber)) => {
                    if attached == Some(subscriber) {
                        attached = None;
                    }
                    let _ = events.send(ConnEvent::Closed {
                        subscriber,
                        writer: writer_tx.clone(),
                    });
                }
                Err(err) => {
                    debug!(peer = %peer_ip, "ignoring bad handshake frame: {err}");
                }
            },
            Err(err) => {
                debug!(peer = %peer_ip, "data connection failed: {err}");
                break;
            }
        }
    }
    if let Some(subscriber) = attached {
        let _ = events.send(ConnEvent::Closed {
            subscriber,
            writer: writer_tx.clone(),
        });
    }
    drop(writer_tx);
    let _ = writer.await;
}

async fn write_frames(
    mut framed: FramedWrite<WriteHalf<Box<dyn RawIo>>, FrameCodec>,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
) {
    while let Some(frame) = rx.recv().await {
        if framed.send(frame).await.is_err() {
            break;
        }
    }
}
