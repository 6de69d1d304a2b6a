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

//! The publishing endpoint.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use meshbus_core::codec::DataEncoder;
use meshbus_core::message::meta;
use meshbus_core::{Message, PublisherStub, SubscriberStub};
use tokio::sync::{mpsc, watch};
use tracing::{trace, warn};
use uuid::Uuid;

use crate::config::PublisherConfig;
use crate::error::PublishError;
use crate::hub::HubCommand;

/// Callbacks around the lifetime of remote subscribers, invoked once per
/// confirmed subscriber.
pub trait Greeter: Send {
    /// A remote subscriber completed its subscription to this publisher.
    fn welcome(&mut self, publisher: &PublisherStub, subscriber: &SubscriberStub);
    /// A confirmed subscriber went away.
    fn farewell(&mut self, publisher: &PublisherStub, subscriber: &SubscriberStub);
}

/// A publishing endpoint on one channel.
///
/// Cloning yields another handle onto the same publisher. A publisher sends
/// nothing until it is added to a [`crate::Node`].
#[derive(Clone)]
pub struct Publisher {
    shared: Arc<Shared>,
}

struct Shared {
    uuid: Uuid,
    channel: String,
    sub_count: watch::Sender<usize>,
    inner: Mutex<Inner>,
}

struct Inner {
    /// Broadcast frames, stream-compressed when configured.
    encoder: DataEncoder,
    /// Directed frames bypass the shared dictionaries so they cannot
    /// desynchronize the other subscribers' streams.
    direct_encoder: DataEncoder,
    subscribers: HashMap<Uuid, SubscriberStub>,
    /// Messages addressed to subscribers that are not confirmed yet,
    /// replayed in order on confirmation.
    queued: HashMap<Uuid, Vec<Message>>,
    greeter: Option<Box<dyn Greeter>>,
    /// Pairs stamped onto every outgoing message unless the message
    /// already carries the key.
    meta: Vec<(String, String)>,
    suspended: bool,
    /// The next broadcast frame restarts the compression dictionaries.
    needs_keyframe: bool,
    seq: u64,
    attachment: Option<Attachment>,
}

/// State that exists only while the publisher is added to a node.
struct Attachment {
    node: Uuid,
    ip: String,
    data_port: u16,
    process_uuid: Uuid,
    host_uuid: Uuid,
    sink: mpsc::UnboundedSender<HubCommand>,
}

enum Route {
    Broadcast,
    Direct(Uuid),
    Unroutable,
}

impl Publisher {
    pub fn new(channel: impl Into<String>) -> Publisher {
        Publisher::with_config(PublisherConfig::new(channel))
    }

    pub fn with_config(config: PublisherConfig) -> Publisher {
        let uuid = Uuid::new_v4();
        let encoder = match &config.compression {
            Some(id) => DataEncoder::with_compression(uuid, id, config.compression_level)
                .unwrap_or_else(|| {
                    warn!(publisher = %uuid, compression = %id, "unknown compression id, publishing plain frames");
                    DataEncoder::new(uuid)
                }),
            None => DataEncoder::new(uuid),
        };
        Publisher {
            shared: Arc::new(Shared {
                uuid,
                channel: config.channel,
                sub_count: watch::Sender::new(0),
                inner: Mutex::new(Inner {
                    encoder,
                    direct_encoder: DataEncoder::new(uuid),
                    subscribers: HashMap::new(),
                    queued: HashMap::new(),
                    greeter: None,
                    meta: Vec::new(),
                    suspended: false,
                    needs_keyframe: true,
                    seq: 0,
                    attachment: None,
                }),
            }),
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.shared.uuid
    }

    pub fn channel(&self) -> &str {
        &self.shared.channel
    }

    /// Installs or removes the greeter observing subscriber churn.
    pub fn set_greeter(&self, greeter: Option<Box<dyn Greeter>>) {
        self.lock().greeter = greeter;
    }

    /// Stamps `key`/`value` onto every message published from now on. The
    /// message's own meta wins on collision; the identity fields always win.
    pub fn put_meta(&self, key: impl Into<String>, value: impl Into<String>) {
        let (key, value) = (key.into(), value.into());
        let mut inner = self.lock();
        match inner.meta.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = value,
            None => inner.meta.push((key, value)),
        }
    }

    /// Stops stamping `key` onto outgoing messages.
    pub fn clear_meta(&self, key: &str) {
        self.lock().meta.retain(|(k, _)| k != key);
    }

    pub fn subscriber_count(&self) -> usize {
        *self.shared.sub_count.borrow()
    }

    /// Snapshots of the currently confirmed subscribers.
    pub fn subscribers(&self) -> Vec<SubscriberStub> {
        self.lock().subscribers.values().cloned().collect()
    }

    pub fn is_publishing_to(&self, subscriber: Uuid) -> bool {
        self.lock().subscribers.contains_key(&subscriber)
    }

    /// Waits until at least `count` subscribers are confirmed or `timeout`
    /// passed, returning the confirmed count either way. A zero timeout
    /// waits indefinitely.
    pub async fn wait_for_subscribers(&self, count: usize, timeout: Duration) -> usize {
        let mut watcher = self.shared.sub_count.subscribe();
        let wait = watcher.wait_for(|n| *n >= count);
        let reached = if timeout.is_zero() {
            match wait.await {
                Ok(reached) => Some(*reached),
                Err(_) => None,
            }
        } else {
            match tokio::time::timeout(timeout, wait).await {
                Ok(Ok(reached)) => Some(*reached),
                _ => None,
            }
        };
        reached.unwrap_or_else(|| *self.shared.sub_count.borrow())
    }

    /// Stops sending; messages published while suspended are dropped.
    pub fn suspend(&self) {
        self.lock().suspended = true;
    }

    /// Resumes sending. The next frame is a keyframe so compressed streams
    /// re-key cleanly.
    pub fn resume(&self) {
        let mut inner = self.lock();
        if inner.suspended {
            inner.suspended = false;
            inner.needs_keyframe = true;
        }
    }

    /// Publishes a message to all confirmed subscribers, stamping the
    /// publisher, process, host, channel and sequence meta fields.
    ///
    /// A message carrying a [`meta::SUBSCRIBER`] field goes only to that
    /// subscriber; while the target is not confirmed yet the message is
    /// queued and replayed in order on confirmation.
    pub fn send(&self, msg: &Message) -> Result<(), PublishError> {
        let mut inner = self.lock();
        if inner.suspended {
            warn!(publisher = %self.shared.uuid, "suspended, dropping message");
            return Ok(());
        }
        let (process_uuid, host_uuid, sink) = match &inner.attachment {
            Some(a) => (a.process_uuid, a.host_uuid, a.sink.clone()),
            None => return Err(PublishError::Detached),
        };

        let mut msg = msg.clone();
        for (key, value) in &inner.meta {
            if msg.get_meta(key).is_none() {
                msg.set_meta(key.clone(), value.clone());
            }
        }
        msg.set_meta(meta::PUBLISHER, self.shared.uuid.to_string());
        msg.set_meta(meta::PROCESS, process_uuid.to_string());
        msg.set_meta(meta::HOST, host_uuid.to_string());
        msg.set_meta(meta::CHANNEL, self.shared.channel.clone());
        inner.seq += 1;
        msg.set_meta(meta::SEQUENCE, inner.seq.to_string());

        let route = match msg.get_meta(meta::SUBSCRIBER) {
            None => Route::Broadcast,
            Some(raw) => match raw.parse::<Uuid>() {
                Ok(target) => Route::Direct(target),
                Err(_) => Route::Unroutable,
            },
        };
        let command = match route {
            Route::Unroutable => {
                warn!(publisher = %self.shared.uuid, "unparseable subscriber target, dropping message");
                return Ok(());
            }
            Route::Direct(target) if !inner.subscribers.contains_key(&target) => {
                trace!(publisher = %self.shared.uuid, %target, "queueing for unconfirmed subscriber");
                inner.queued.entry(target).or_default().push(msg);
                return Ok(());
            }
            Route::Direct(target) => {
                HubCommand::Direct(target, inner.direct_encoder.encode(&msg, false)?)
            }
            Route::Broadcast => {
                let keyframe = inner.needs_keyframe;
                let frame = inner.encoder.encode(&msg, keyframe)?;
                inner.needs_keyframe = false;
                HubCommand::Broadcast(frame)
            }
        };
        drop(inner);
        let _ = sink.send(command);
        Ok(())
    }

    pub(crate) fn attach(
        &self,
        node: Uuid,
        ip: String,
        data_port: u16,
        process_uuid: Uuid,
        host_uuid: Uuid,
        sink: mpsc::UnboundedSender<HubCommand>,
    ) {
        let mut inner = self.lock();
        inner.attachment = Some(Attachment {
            node,
            ip,
            data_port,
            process_uuid,
            host_uuid,
            sink,
        });
        inner.needs_keyframe = true;
    }

    pub(crate) fn detach(&self) {
        let mut inner = self.lock();
        inner.attachment = None;
        inner.subscribers.clear();
        inner.queued.clear();
        self.shared.sub_count.send_replace(0);
    }

    /// Forces the next broadcast frame to be a keyframe. Called whenever a
    /// subscriber attaches to the node's data socket.
    pub(crate) fn mark_keyframe(&self) {
        self.lock().needs_keyframe = true;
    }

    /// The publisher as announced on the control plane, `None` while
    /// detached.
    pub(crate) fn stub(&self) -> Option<PublisherStub> {
        let inner = self.lock();
        self.stub_locked(&inner)
    }

    fn stub_locked(&self, inner: &Inner) -> Option<PublisherStub> {
        let attachment = inner.attachment.as_ref()?;
        Some(PublisherStub {
            uuid: self.shared.uuid,
            channel: self.shared.channel.clone(),
            node: attachment.node,
            ip: attachment.ip.clone(),
            port: attachment.data_port,
        })
    }

    /// A remote subscriber completed confirmation. Replays any queued
    /// directed messages in order, then greets.
    pub(crate) fn added_subscriber(&self, subscriber: SubscriberStub) {
        let (greeter, stub) = {
            let mut inner = self.lock();
            if inner
                .subscribers
                .insert(subscriber.uuid, subscriber.clone())
                .is_some()
            {
                return;
            }
            inner.needs_keyframe = true;
            self.shared.sub_count.send_replace(inner.subscribers.len());

            if let Some(queued) = inner.queued.remove(&subscriber.uuid) {
                let sink = inner.attachment.as_ref().map(|a| a.sink.clone());
                if let Some(sink) = sink {
                    for msg in queued {
                        match inner.direct_encoder.encode(&msg, false) {
                            Ok(frame) => {
                                let _ = sink.send(HubCommand::Direct(subscriber.uuid, frame));
                            }
                            Err(err) => {
                                warn!(publisher = %self.shared.uuid, "dropping queued message: {err}")
                            }
                        }
                    }
                }
            }
            (inner.greeter.take(), self.stub_locked(&inner))
        };
        if let Some(mut greeter) = greeter {
            if let Some(stub) = &stub {
                greeter.welcome(stub, &subscriber);
            }
            self.reinstall(greeter);
        }
    }

    /// A confirmed subscriber went away.
    pub(crate) fn removed_subscriber(&self, subscriber: &SubscriberStub) {
        let (greeter, stub) = {
            let mut inner = self.lock();
            if inner.subscribers.remove(&subscriber.uuid).is_none() {
                return;
            }
            self.shared.sub_count.send_replace(inner.subscribers.len());
            (inner.greeter.take(), self.stub_locked(&inner))
        };
        if let Some(mut greeter) = greeter {
            if let Some(stub) = &stub {
                greeter.farewell(stub, subscriber);
            }
            self.reinstall(greeter);
        }
    }

    fn reinstall(&self, greeter: Box<dyn Greeter>) {
        let mut inner = self.lock();
        if inner.greeter.is_none() {
            inner.greeter = Some(greeter);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.shared.inner.lock().expect("lock to not be poisoned")
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("uuid", &self.shared.uuid)
            .field("channel", &self.shared.channel)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
