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

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use meshbus_core::compression::DEFLATE;
use meshbus_core::message::meta;
use meshbus_core::{EndPoint, Message, ProcessContext, PublisherStub, SubscriberStub};
use meshbus_node::{
    Greeter, Node, NodeConfig, Publisher, PublisherConfig, Receiver, StaticDiscovery, Subscriber,
};
use rand::RngCore;
use tokio::sync::mpsc;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}

struct Forward(mpsc::UnboundedSender<Message>);

impl Receiver for Forward {
    fn receive(&mut self, msg: Message) {
        let _ = self.0.send(msg);
    }
}

struct CountingGreeter {
    welcomes: Arc<AtomicUsize>,
    farewells: Arc<AtomicUsize>,
}

impl Greeter for CountingGreeter {
    fn welcome(&mut self, _publisher: &PublisherStub, _subscriber: &SubscriberStub) {
        self.welcomes.fetch_add(1, Ordering::SeqCst);
    }

    fn farewell(&mut self, _publisher: &PublisherStub, _subscriber: &SubscriberStub) {
        self.farewells.fetch_add(1, Ordering::SeqCst);
    }
}

async fn recv_within(rx: &mut mpsc::UnboundedReceiver<Message>, what: &str) -> Message {
    tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
        .unwrap_or_else(|| panic!("channel closed waiting for {what}"))
}

async fn wait_until(mut cond: impl FnMut() -> bool, what: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !cond() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting until {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn publishes_across_in_process_nodes() {
    init_tracing();
    let context = ProcessContext::new();
    let directory = StaticDiscovery::new();

    let sender = Node::new(NodeConfig::in_process(&context)).await.unwrap();
    let publisher = Publisher::new("traffic.bikes");
    sender.add_publisher(&publisher).await.unwrap();
    directory.register(&sender);

    let watcher = Node::new(NodeConfig::in_process(&context)).await.unwrap();
    let (tx, mut received) = mpsc::unbounded_channel();
    let subscriber = Subscriber::with_receiver("traffic", Box::new(Forward(tx)));
    watcher.add_subscriber(&subscriber).await.unwrap();
    directory.register(&watcher);

    assert_eq!(
        publisher
            .wait_for_subscribers(1, Duration::from_secs(10))
            .await,
        1
    );

    for i in 0..100u32 {
        publisher
            .send(&Message::with_payload(format!("count {i}")))
            .unwrap();
    }
    for i in 0..100u32 {
        let msg = recv_within(&mut received, "a counted message").await;
        assert_eq!(&msg.payload()[..], format!("count {i}").as_bytes());
        assert_eq!(
            msg.get_meta(meta::SEQUENCE),
            Some((i + 1).to_string().as_str())
        );
        assert_eq!(msg.get_meta(meta::CHANNEL), Some("traffic.bikes"));
        assert_eq!(
            msg.get_meta(meta::PUBLISHER),
            Some(publisher.uuid().to_string().as_str())
        );
    }

    // Binary payloads pass through untouched.
    let mut blob = vec![0u8; 256];
    rand::thread_rng().fill_bytes(&mut blob);
    publisher
        .send(&Message::with_payload(blob.clone()))
        .unwrap();
    let msg = recv_within(&mut received, "the binary payload").await;
    assert_eq!(&msg.payload()[..], &blob[..]);

    // Taking the watcher out of the directory dissolves the pairing on the
    // publishing side.
    directory.remove(&watcher);
    wait_until(
        || publisher.subscriber_count() == 0,
        "the pairing to dissolve",
    )
    .await;
    assert_eq!(publisher.wait_for_subscribers(0, Duration::ZERO).await, 0);

    sender.shutdown().await.unwrap();
    watcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn local_subscribers_hear_local_publishers() {
    init_tracing();
    let context = ProcessContext::new();
    let node = Node::new(NodeConfig::in_process(&context)).await.unwrap();
    let publisher = Publisher::new("metrics.cpu");
    node.add_publisher(&publisher).await.unwrap();
    let (tx, mut received) = mpsc::unbounded_channel();
    let subscriber = Subscriber::with_receiver("metrics", Box::new(Forward(tx)));
    node.add_subscriber(&subscriber).await.unwrap();

    assert_eq!(
        publisher
            .wait_for_subscribers(1, Duration::from_secs(10))
            .await,
        1
    );
    publisher.send(&Message::with_payload("0.97")).unwrap();
    let msg = recv_within(&mut received, "the local message").await;
    assert_eq!(&msg.payload()[..], b"0.97");
    assert_eq!(msg.get_meta(meta::CHANNEL), Some("metrics.cpu"));

    node.remove_subscriber(&subscriber).await.unwrap();
    wait_until(|| publisher.subscriber_count() == 0, "the roster to empty").await;
    node.shutdown().await.unwrap();
}

#[tokio::test]
async fn publishes_across_tcp_nodes_and_says_farewell() {
    init_tracing();
    let directory = StaticDiscovery::new();
    let config = || {
        NodeConfig::new()
            .bind_ip("127.0.0.1")
            .advertise_ip("127.0.0.1")
            .base_port(49700)
            .port_range(50)
    };

    let sender = Node::new(config()).await.unwrap();
    let publisher = Publisher::new("alerts");
    let welcomes = Arc::new(AtomicUsize::new(0));
    let farewells = Arc::new(AtomicUsize::new(0));
    publisher.set_greeter(Some(Box::new(CountingGreeter {
        welcomes: welcomes.clone(),
        farewells: farewells.clone(),
    })));
    sender.add_publisher(&publisher).await.unwrap();
    directory.register(&sender);

    let watcher = Node::new(config()).await.unwrap();
    let (tx, mut received) = mpsc::unbounded_channel();
    let subscriber = Subscriber::with_receiver("alerts", Box::new(Forward(tx)));
    watcher.add_subscriber(&subscriber).await.unwrap();
    directory.register(&watcher);

    assert_eq!(
        publisher
            .wait_for_subscribers(1, Duration::from_secs(10))
            .await,
        1
    );
    let w = welcomes.clone();
    wait_until(move || w.load(Ordering::SeqCst) == 1, "the welcome").await;

    publisher
        .send(&Message::with_payload("roads are wet"))
        .unwrap();
    let msg = recv_within(&mut received, "the alert").await;
    assert_eq!(&msg.payload()[..], b"roads are wet");

    // Removing the subscriber dissolves the pair on both planes, the
    // publisher says farewell exactly once.
    watcher.remove_subscriber(&subscriber).await.unwrap();
    let f = farewells.clone();
    wait_until(move || f.load(Ordering::SeqCst) == 1, "the farewell").await;
    wait_until(
        || publisher.subscriber_count() == 0,
        "the subscriber count to drop",
    )
    .await;
    assert_eq!(welcomes.load(Ordering::SeqCst), 1);

    sender.shutdown().await.unwrap();
    watcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn compressed_streams_rekey_for_late_joiners() {
    init_tracing();
    let context = ProcessContext::new();
    let directory = StaticDiscovery::new();

    let sender = Node::new(NodeConfig::in_process(&context)).await.unwrap();
    let publisher =
        Publisher::with_config(PublisherConfig::new("camera.frames").compression(DEFLATE));
    sender.add_publisher(&publisher).await.unwrap();
    directory.register(&sender);

    let first_node = Node::new(NodeConfig::in_process(&context)).await.unwrap();
    let (tx, mut first) = mpsc::unbounded_channel();
    let first_sub = Subscriber::with_receiver("camera", Box::new(Forward(tx)));
    first_node.add_subscriber(&first_sub).await.unwrap();
    directory.register(&first_node);
    assert_eq!(
        publisher
            .wait_for_subscribers(1, Duration::from_secs(10))
            .await,
        1
    );

    publisher
        .send(&Message::with_payload("frame one"))
        .unwrap();
    assert_eq!(
        &recv_within(&mut first, "the first frame").await.payload()[..],
        b"frame one"
    );

    // A node joining mid-stream can only decode once the stream re-keys,
    // which its attach forces.
    let second_node = Node::new(NodeConfig::in_process(&context)).await.unwrap();
    let (tx, mut second) = mpsc::unbounded_channel();
    let second_sub = Subscriber::with_receiver("camera.frames", Box::new(Forward(tx)));
    second_node.add_subscriber(&second_sub).await.unwrap();
    directory.register(&second_node);
    assert_eq!(
        publisher
            .wait_for_subscribers(2, Duration::from_secs(10))
            .await,
        2
    );

    publisher
        .send(&Message::with_payload("frame two"))
        .unwrap();
    assert_eq!(
        &recv_within(&mut first, "the second frame at the first subscriber")
            .await
            .payload()[..],
        b"frame two"
    );
    assert_eq!(
        &recv_within(&mut second, "the second frame at the late joiner")
            .await
            .payload()[..],
        b"frame two"
    );

    sender.shutdown().await.unwrap();
    first_node.shutdown().await.unwrap();
    second_node.shutdown().await.unwrap();
}

#[tokio::test]
async fn directed_messages_reach_only_their_target() {
    init_tracing();
    let context = ProcessContext::new();
    let directory = StaticDiscovery::new();

    let sender = Node::new(NodeConfig::in_process(&context)).await.unwrap();
    let publisher = Publisher::new("chat");
    sender.add_publisher(&publisher).await.unwrap();
    directory.register(&sender);

    let mut subscribers = Vec::new();
    for _ in 0..2 {
        let node = Node::new(NodeConfig::in_process(&context)).await.unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let subscriber = Subscriber::with_receiver("chat", Box::new(Forward(tx)));
        node.add_subscriber(&subscriber).await.unwrap();
        directory.register(&node);
        subscribers.push((node, subscriber, rx));
    }
    assert_eq!(
        publisher
            .wait_for_subscribers(2, Duration::from_secs(10))
            .await,
        2
    );

    let mut whisper = Message::with_payload("for your eyes only");
    whisper.set_meta(meta::SUBSCRIBER, subscribers[0].1.uuid().to_string());
    publisher.send(&whisper).unwrap();
    publisher
        .send(&Message::with_payload("hello everyone"))
        .unwrap();

    let msg = recv_within(&mut subscribers[0].2, "the whisper").await;
    assert_eq!(&msg.payload()[..], b"for your eyes only");
    let msg = recv_within(&mut subscribers[0].2, "the broadcast").await;
    assert_eq!(&msg.payload()[..], b"hello everyone");

    // The other subscriber's first message is the broadcast, the whisper
    // never reached it.
    let msg = recv_within(&mut subscribers[1].2, "the broadcast").await;
    assert_eq!(&msg.payload()[..], b"hello everyone");

    sender.shutdown().await.unwrap();
    for (node, _, _) in subscribers {
        node.shutdown().await.unwrap();
    }
}

#[tokio::test]
async fn queued_directed_messages_replay_on_confirmation() {
    init_tracing();
    let context = ProcessContext::new();
    let directory = StaticDiscovery::new();

    let sender = Node::new(NodeConfig::in_process(&context)).await.unwrap();
    let publisher = Publisher::new("jobs");
    sender.add_publisher(&publisher).await.unwrap();
    directory.register(&sender);

    let worker_node = Node::new(NodeConfig::in_process(&context)).await.unwrap();
    let (tx, mut received) = mpsc::unbounded_channel();
    let subscriber = Subscriber::with_receiver("jobs", Box::new(Forward(tx)));

    // Addressed before the subscriber exists anywhere on the bus; held back
    // until its subscription is confirmed.
    for i in 0..3 {
        let mut msg = Message::with_payload(format!("job {i}"));
        msg.set_meta(meta::SUBSCRIBER, subscriber.uuid().to_string());
        publisher.send(&msg).unwrap();
    }

    worker_node.add_subscriber(&subscriber).await.unwrap();
    directory.register(&worker_node);

    for i in 0..3 {
        let msg = recv_within(&mut received, "a replayed job").await;
        assert_eq!(&msg.payload()[..], format!("job {i}").as_bytes());
    }

    sender.shutdown().await.unwrap();
    worker_node.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_is_announced_to_peers() {
    init_tracing();
    let context = ProcessContext::new();
    let directory = StaticDiscovery::new();

    let leaving = Node::new(NodeConfig::in_process(&context)).await.unwrap();
    let publisher = Publisher::new("news");
    leaving.add_publisher(&publisher).await.unwrap();
    directory.register(&leaving);

    let staying = Node::new(NodeConfig::in_process(&context)).await.unwrap();
    let (tx, mut received) = mpsc::unbounded_channel();
    let subscriber = Subscriber::with_receiver("news", Box::new(Forward(tx)));
    staying.add_subscriber(&subscriber).await.unwrap();
    directory.register(&staying);

    assert_eq!(
        publisher
            .wait_for_subscribers(1, Duration::from_secs(10))
            .await,
        1
    );
    publisher.send(&Message::with_payload("last words")).unwrap();
    assert_eq!(
        &recv_within(&mut received, "the last message").await.payload()[..],
        b"last words"
    );

    // The introspection dump crosses the wire in its positional form,
    // `conn:<addr>:<uuid>:refcount:to:from:confirmed` and
    // `sub:<uuid>:pending:confirmed`.
    let info = staying.debug_info().await.unwrap();
    let conn = info
        .iter()
        .find(|line| line.starts_with("conn:"))
        .expect("a connection line");
    let fields: Vec<&str> = conn.split(':').collect();
    assert_eq!(fields.len(), 9, "unexpected connection line: {conn}");
    assert_eq!(fields[4], leaving.uuid().to_string());
    assert_eq!(fields[5], "1");
    assert!(fields[6..9].iter().all(|f| *f == "true" || *f == "false"));
    assert_eq!(fields[8], "true");
    let info = leaving.debug_info().await.unwrap();
    assert!(
        info.contains(&format!("sub:{}:0:1", subscriber.uuid())),
        "missing confirmed subscription line: {info:?}"
    );

    leaving.shutdown().await.unwrap();

    // The peer hears the announcement and forgets the node entirely.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let info = staying.debug_info().await.unwrap();
        if !info.iter().any(|line| line.starts_with("conn:")) {
            break;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("peer state survived the shutdown announcement: {info:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    staying.shutdown().await.unwrap();
}

#[tokio::test]
async fn failed_dials_do_not_claim_a_connection() {
    init_tracing();
    let context = ProcessContext::new();
    let node = Node::new(NodeConfig::in_process(&context)).await.unwrap();

    // Nobody listens there; the dial fails and the record stays unconnected
    // in both directions until eviction.
    let ghost = EndPoint::in_process(9999);
    node.discovery().added(ghost.clone());

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let info = node.debug_info().await.unwrap();
        if let Some(line) = info.iter().find(|l| l.starts_with("conn:")) {
            assert_eq!(
                line,
                &format!("conn:{}:?:1:false:false:false", ghost.address())
            );
            break;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("the advertised endpoint never showed up: {info:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    node.shutdown().await.unwrap();
}
