//! End-to-end tests against in-process relays on loopback listeners.
//!
//! Each test builds its own relays, so nothing is shared between tests.
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use rchat::relay::client::{Client, ClientError, EventStream};
use rchat::relay::codec::MAX_FRAME_LENGTH;
use rchat::relay::config::RelayConfig;
use rchat::relay::directory::{Directory, DirectoryError, MemoryDirectory};
use rchat::relay::event::{Event, Message};
use rchat::relay::federation::Upstream;
use rchat::relay::router::MAX_EVENT_LENGTH;
use rchat::relay::server::{self, AuthError, Relay};
use rchat::relay::session::SessionPolicy;

const WAIT: Duration = Duration::from_secs(5);

/// Serve `relay` on an ephemeral loopback port.
async fn serve(relay: Arc<Relay>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server::accept_loop(listener, relay));
    addr
}

fn plain_relay() -> Arc<Relay> {
    Relay::new(Arc::new(MemoryDirectory::new()), SessionPolicy::default())
}

/// Sign up, log in again (fresh token), and open a stream.
async fn join(addr: SocketAddr, name: &str) -> EventStream<TcpStream> {
    let mut client = Client::connect(addr).await.unwrap();
    client.signup(name, "pw").await.unwrap();
    let token = client.login(name, "pw").await.unwrap();
    client.open(&token).await.unwrap()
}

async fn next(stream: &mut EventStream<TcpStream>) -> Event {
    timeout(WAIT, stream.recv())
        .await
        .expect("timed out waiting for event")
        .unwrap()
        .expect("stream closed")
}

async fn next_message(stream: &mut EventStream<TcpStream>) -> Message {
    match next(stream).await {
        Event::Message(msg) => msg,
        other => panic!("expected message, got {other:?}"),
    }
}

/// An address nothing listens on.
async fn dead_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr.to_string()
}

/// A message to `target` whose JSON encoding is exactly `len` bytes.
fn sized_message(target: &str, len: usize) -> Event {
    let Event::Message(mut msg) = Event::message(target, "") else {
        unreachable!();
    };
    let base = Event::Message(msg.clone()).encoded_len();
    msg.data = "x".repeat(len - base);
    Event::Message(msg)
}

async fn wait_until_gone(relay: &Relay, identity: &str) {
    timeout(WAIT, async {
        while relay.registry().lookup(identity).is_some() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("identity never unregistered");
}

// ── Local routing ────────────────────────────────────────────────

#[tokio::test]
async fn alice_messages_bob() {
    let addr = serve(plain_relay()).await;
    let mut alice = join(addr, "alice").await;
    let mut bob = join(addr, "bob").await;
    assert_eq!(alice.identity(), "alice");

    alice.send(Event::message("bob", "hi")).await.unwrap();

    let msg = next_message(&mut bob).await;
    assert_eq!(msg.target, "");
    assert_eq!(msg.author, "alice");
    assert_eq!(msg.data, "hi");
}

#[tokio::test]
async fn target_matching_is_case_insensitive() {
    let addr = serve(plain_relay()).await;
    let mut alice = join(addr, "alice").await;
    let mut bob = join(addr, "Bob").await;
    assert_eq!(bob.identity(), "bob");

    alice.send(Event::message("BOB", "hey")).await.unwrap();
    assert_eq!(next_message(&mut bob).await.data, "hey");
}

#[tokio::test]
async fn unknown_target_bounces_error_to_sender() {
    let addr = serve(plain_relay()).await;
    let mut alice = join(addr, "alice").await;

    let original = Event::message("nobody", "x");
    alice.send(original.clone()).await.unwrap();

    match next(&mut alice).await {
        Event::Error { target, event } => {
            assert_eq!(target, "");
            assert_eq!(*event, original);
        }
        other => panic!("expected error, got {other:?}"),
    }
}

#[tokio::test]
async fn fan_out_reaches_every_connection_of_identity() {
    let relay = plain_relay();
    let addr = serve(Arc::clone(&relay)).await;
    let mut bob = join(addr, "bob").await;

    let mut client = Client::connect(addr).await.unwrap();
    client.signup("alice", "pw").await.unwrap();
    let mut phones = Vec::new();
    for _ in 0..3 {
        let mut c = Client::connect(addr).await.unwrap();
        let token = c.login("alice", "pw").await.unwrap();
        phones.push(c.open(&token).await.unwrap());
    }
    assert_eq!(relay.registry().lookup("alice").unwrap().len(), 3);

    bob.send(Event::message("alice", "ping")).await.unwrap();
    for phone in &mut phones {
        let msg = next_message(phone).await;
        assert_eq!(msg.author, "bob");
        assert_eq!(msg.data, "ping");
    }
}

#[tokio::test]
async fn per_sender_order_is_preserved() {
    let addr = serve(plain_relay()).await;
    let mut alice = join(addr, "alice").await;
    let mut bob = join(addr, "bob").await;

    for i in 0..50 {
        alice
            .send(Event::message("bob", i.to_string()))
            .await
            .unwrap();
    }
    for i in 0..50 {
        assert_eq!(next_message(&mut bob).await.data, i.to_string());
    }
}

#[tokio::test]
async fn oversized_message_bounces_and_stream_survives() {
    let addr = serve(plain_relay()).await;
    let mut alice = join(addr, "alice").await;
    let mut bob = join(addr, "bob").await;

    for target in ["nobody", "bob"] {
        let original = sized_message(target, MAX_FRAME_LENGTH - 200);
        alice.send(original.clone()).await.unwrap();
        match next(&mut alice).await {
            Event::Error { target, event } => {
                assert_eq!(target, "");
                assert_eq!(*event, original);
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    alice.send(Event::message("bob", "still here")).await.unwrap();
    assert_eq!(next_message(&mut bob).await.data, "still here");
}

#[tokio::test]
async fn disconnect_unregisters_and_later_sends_bounce() {
    let relay = plain_relay();
    let addr = serve(Arc::clone(&relay)).await;
    let mut alice = join(addr, "alice").await;
    let bob = join(addr, "bob").await;
    assert!(relay.registry().lookup("bob").is_some());

    drop(bob);
    wait_until_gone(&relay, "bob").await;

    alice.send(Event::message("bob", "late")).await.unwrap();
    assert!(matches!(next(&mut alice).await, Event::Error { .. }));
}

// ── Sessions ─────────────────────────────────────────────────────

#[tokio::test]
async fn whoami_over_the_wire() {
    let addr = serve(plain_relay()).await;
    let mut client = Client::connect(addr).await.unwrap();
    let token = client.signup("Carol", "pw").await.unwrap();
    assert_eq!(client.whoami(&token).await.unwrap(), "carol");

    let err = client.whoami("deadbeef").await.unwrap_err();
    assert!(matches!(err, ClientError::Refused(ref r) if r == "session not found"));
}

#[tokio::test]
async fn open_with_invalid_token_is_refused() {
    let relay = plain_relay();
    let addr = serve(Arc::clone(&relay)).await;
    let client = Client::connect(addr).await.unwrap();

    let err = client.open("not-a-token").await.unwrap_err();
    assert!(matches!(err, ClientError::Refused(_)), "got {err:?}");
    assert!(relay.registry().identities().is_empty());
}

#[tokio::test]
async fn expired_session_cannot_open() {
    let relay = Relay::new(
        Arc::new(MemoryDirectory::new()),
        SessionPolicy::with_ttl(Duration::ZERO),
    );
    let addr = serve(relay).await;
    let mut client = Client::connect(addr).await.unwrap();
    let token = client.signup("alice", "pw").await.unwrap();

    let err = client.open(&token).await.unwrap_err();
    assert!(matches!(err, ClientError::Refused(_)), "got {err:?}");
}

#[tokio::test]
async fn bad_credentials_are_refused() {
    let addr = serve(plain_relay()).await;
    let mut client = Client::connect(addr).await.unwrap();
    client.signup("alice", "pw").await.unwrap();

    let wrong_password = client.login("alice", "wrong").await.unwrap_err();
    let no_account = client.login("mallory", "pw").await.unwrap_err();
    match (wrong_password, no_account) {
        (ClientError::Refused(a), ClientError::Refused(b)) => assert_eq!(a, b),
        other => panic!("expected two refusals, got {other:?}"),
    }
    assert!(matches!(
        client.signup("x!", "pw").await,
        Err(ClientError::Refused(_))
    ));
}

// ── Federation ───────────────────────────────────────────────────

/// Records how often the relay asks the directory to create accounts.
#[derive(Default)]
struct CountingDirectory {
    inner: MemoryDirectory,
    creates: AtomicUsize,
}

#[async_trait]
impl Directory for CountingDirectory {
    async fn create(&self, username: &str, password: &str) -> Result<(), DirectoryError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.inner.create(username, password).await
    }

    async fn validate(&self, username: &str, password: &str) -> Result<(), DirectoryError> {
        self.inner.validate(username, password).await
    }
}

fn upstream(target: &str, username: &str, password: &str, address: &str) -> Upstream {
    Upstream {
        username: username.into(),
        password: password.into(),
        address: address.into(),
        target_name: target.into(),
    }
}

fn federated_config(upstreams: Vec<Upstream>) -> RelayConfig {
    RelayConfig {
        upstreams,
        dial_timeout: Duration::from_secs(2),
        ..RelayConfig::default()
    }
}

#[tokio::test]
async fn signup_cannot_shadow_reserved_target() {
    let directory = Arc::new(CountingDirectory::default());
    let config = federated_config(vec![upstream("Remote", "relaya", "pw", &dead_address().await)]);
    let relay = Relay::bootstrap(directory.clone(), &config).await;

    assert!(relay.registry().is_reserved("remote"));
    assert_eq!(
        relay.signup("REMOTE", "pw").await,
        Err(AuthError::AlreadyExists)
    );
    assert_eq!(directory.creates.load(Ordering::SeqCst), 0);
    assert!(relay.sessions().is_empty().await);
}

#[tokio::test]
async fn failed_upstream_login_does_not_affect_local_routing() {
    // The hub has no account for us, so login fails.
    let hub_addr = serve(plain_relay()).await;
    let config = federated_config(vec![upstream("remote", "relaya", "pw", &hub_addr.to_string())]);
    let relay = Relay::bootstrap(Arc::new(MemoryDirectory::new()), &config).await;
    assert!(relay.registry().lookup("remote").is_none());

    let addr = serve(relay).await;
    let mut alice = join(addr, "alice").await;
    let mut bob = join(addr, "bob").await;

    alice.send(Event::message("bob", "still works")).await.unwrap();
    assert_eq!(next_message(&mut bob).await.data, "still works");

    bob.send(Event::message("remote@carol", "x")).await.unwrap();
    assert!(matches!(next(&mut bob).await, Event::Error { .. }));
}

#[tokio::test]
async fn bootstrap_skips_bad_upstreams_and_links_good_ones() {
    let hub = Relay::new(
        Arc::new(MemoryDirectory::with_accounts([("relaya", "pw")])),
        SessionPolicy::default(),
    );
    let hub_addr = serve(hub).await.to_string();

    let config = federated_config(vec![
        upstream("bad name!", "relaya", "pw", &hub_addr),
        upstream("down", "relaya", "pw", &dead_address().await),
        upstream("denied", "relaya", "wrong", &hub_addr),
        upstream("hub", "relaya", "pw", &hub_addr),
    ]);
    let relay = Relay::bootstrap(Arc::new(MemoryDirectory::new()), &config).await;

    assert_eq!(relay.registry().identities(), vec!["hub".to_owned()]);
    assert!(relay.registry().is_reserved("down"));
    assert!(relay.registry().is_reserved("denied"));
    assert!(!relay.registry().is_reserved("bad name!"));
}

#[tokio::test]
async fn message_crosses_federation_link_and_reply_unwinds() {
    // hub: carol lives here; edge logs in to hub as `relaya`.
    let hub = Relay::new(
        Arc::new(MemoryDirectory::with_accounts([("relaya", "pw")])),
        SessionPolicy::default(),
    );
    let hub_addr = serve(Arc::clone(&hub)).await;
    let mut carol = join(hub_addr, "carol").await;

    let config = federated_config(vec![upstream("remote", "relaya", "pw", &hub_addr.to_string())]);
    let edge = Relay::bootstrap(Arc::new(MemoryDirectory::new()), &config).await;
    assert!(edge.registry().lookup("remote").is_some());
    assert!(hub.registry().lookup("relaya").is_some());

    let edge_addr = serve(edge).await;
    let mut alice = join(edge_addr, "alice").await;

    alice
        .send(Event::message("remote@carol", "hello hub"))
        .await
        .unwrap();
    let msg = next_message(&mut carol).await;
    assert_eq!(msg.target, "");
    assert_eq!(msg.author, "relaya@alice");
    assert_eq!(msg.data, "hello hub");

    // Replying to the author chain walks back over the link.
    carol
        .send(Event::message(msg.author.clone(), "hello edge"))
        .await
        .unwrap();
    let reply = next_message(&mut alice).await;
    assert_eq!(reply.target, "");
    assert_eq!(reply.author, "remote@carol");
    assert_eq!(reply.data, "hello edge");
}

#[tokio::test]
async fn remote_miss_returns_error_across_link() {
    let hub = Relay::new(
        Arc::new(MemoryDirectory::with_accounts([("relaya", "pw")])),
        SessionPolicy::default(),
    );
    let hub_addr = serve(hub).await;

    let config = federated_config(vec![upstream("remote", "relaya", "pw", &hub_addr.to_string())]);
    let edge = Relay::bootstrap(Arc::new(MemoryDirectory::new()), &config).await;
    let edge_addr = serve(edge).await;
    let mut alice = join(edge_addr, "alice").await;

    alice
        .send(Event::message("remote@ghost", "anyone?"))
        .await
        .unwrap();

    match next(&mut alice).await {
        Event::Error { target, event } => {
            assert_eq!(target, "");
            let Event::Message(failed) = *event else {
                panic!("expected wrapped message");
            };
            // As the hub saw it: one hop consumed, author prefixed.
            assert_eq!(failed.target, "ghost");
            assert_eq!(failed.author, "alice");
            assert_eq!(failed.data, "anyone?");
        }
        other => panic!("expected error, got {other:?}"),
    }
}

#[tokio::test]
async fn large_messages_never_break_a_federation_link() {
    let hub = Relay::new(
        Arc::new(MemoryDirectory::with_accounts([("relaya", "pw")])),
        SessionPolicy::default(),
    );
    let hub_addr = serve(Arc::clone(&hub)).await;
    let mut carol = join(hub_addr, "carol").await;

    let config = federated_config(vec![upstream("remote", "relaya", "pw", &hub_addr.to_string())]);
    let edge = Relay::bootstrap(Arc::new(MemoryDirectory::new()), &config).await;
    let edge_addr = serve(Arc::clone(&edge)).await;
    let mut sender = join(edge_addr, &"u".repeat(28)).await;

    // Too large for the edge: bounced locally. At the limit: forwarded, but
    // the longer author puts it over the hub's limit, so the hub bounces it
    // back across the link.
    for len in [MAX_FRAME_LENGTH - 200, MAX_EVENT_LENGTH] {
        sender
            .send(sized_message("remote@carol", len))
            .await
            .unwrap();
        match next(&mut sender).await {
            Event::Error { target, .. } => assert_eq!(target, ""),
            other => panic!("expected error, got {other:?}"),
        }
    }

    assert!(edge.registry().lookup("remote").is_some());
    assert!(hub.registry().lookup("relaya").is_some());

    sender
        .send(Event::message("remote@carol", "link still up"))
        .await
        .unwrap();
    assert_eq!(next_message(&mut carol).await.data, "link still up");
}
