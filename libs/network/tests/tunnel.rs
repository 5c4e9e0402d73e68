//! Tunnel integration tests: cross-domain round trips and reconnection
//! with queued envelopes.

use async_trait::async_trait;
use cells::{Cell, CellContext, Domain};
use network::{
    BackoffPolicy, LinkState, LocationClient, LocationServer, Tunnel, TunnelConfig,
    TunnelListener, TunnelTarget,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use types::{CellAddress, CellPath, Envelope, Payload, Result};

struct EchoCell;

#[async_trait]
impl Cell for EchoCell {
    async fn on_message(&mut self, ctx: &CellContext, envelope: Envelope) -> Result<()> {
        let payload = envelope.payload.clone();
        ctx.reply(&envelope, payload).await
    }
}

struct RecorderCell {
    seen: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Cell for RecorderCell {
    async fn on_message(&mut self, _ctx: &CellContext, envelope: Envelope) -> Result<()> {
        if let Payload::Text(text) = envelope.payload {
            self.seen.lock().unwrap().push(text);
        }
        Ok(())
    }
}

async fn wait_for<F>(what: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = Duration::from_secs(10);
    tokio::time::timeout(deadline, async {
        loop {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {}", what));
}

fn fast_config() -> TunnelConfig {
    TunnelConfig {
        backoff: BackoffPolicy::new(Duration::from_millis(50), Duration::from_millis(400)),
        ..TunnelConfig::default()
    }
}

fn request(from_domain: &str, dest: &str, payload: Payload) -> Envelope {
    Envelope::request(
        CellAddress::qualified("test", from_domain.to_string()),
        dest.parse::<CellPath>().unwrap(),
        payload,
    )
}

#[tokio::test]
async fn test_cross_domain_echo_round_trip() {
    let store = Domain::new("store");
    store.register("echo", EchoCell).await.unwrap();
    let listener = TunnelListener::bind(store.clone(), "127.0.0.1:0", fast_config())
        .await
        .unwrap();

    let doors = Domain::new("doors");
    let tunnel = Tunnel::connect(
        doors.clone(),
        "uplink",
        TunnelTarget::Static(listener.local_addr().to_string()),
        fast_config(),
    );

    wait_for("tunnel to connect", || {
        tunnel.state() == LinkState::Connected && doors.link_for("store").is_some()
    })
    .await;
    wait_for("accepted session", || listener.accepted_count() == 1).await;

    let reply = doors
        .send_and_wait(
            "test",
            request("doors", "echo@store", Payload::Text("ping".into())),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
    assert!(reply.is_reply);
    assert_eq!(reply.payload, Payload::Text("ping".into()));

    tunnel.shutdown();
    listener.shutdown();
}

#[tokio::test]
async fn test_send_to_missing_cell_fails_across_domains() {
    let store = Domain::new("store");
    let listener = TunnelListener::bind(store.clone(), "127.0.0.1:0", fast_config())
        .await
        .unwrap();

    let doors = Domain::new("doors");
    let tunnel = Tunnel::connect(
        doors.clone(),
        "uplink",
        TunnelTarget::Static(listener.local_addr().to_string()),
        fast_config(),
    );

    wait_for("tunnel to connect", || doors.link_for("store").is_some()).await;

    // The remote domain reports the missing cell along the reverted path,
    // so the waiter fails well before its deadline.
    let err = doors
        .send_and_wait(
            "test",
            request("doors", "nobody@store", Payload::Text("hello".into())),
            Duration::from_secs(10),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, types::CellError::DestinationNotFound { .. }));

    tunnel.shutdown();
    listener.shutdown();
}

#[tokio::test]
async fn test_reconnect_preserves_queued_envelopes_in_order() {
    let directory = LocationServer::bind("127.0.0.1:0", None).await.unwrap();
    let locator = LocationClient::new(directory.local_addr().to_string());

    // First incarnation of the store domain.
    let store1 = Domain::new("store");
    let listener1 = TunnelListener::bind(store1.clone(), "127.0.0.1:0", fast_config())
        .await
        .unwrap();
    locator
        .register("store", "127.0.0.1", listener1.local_addr().port())
        .await
        .unwrap();

    let doors = Domain::new("doors");
    let tunnel = Tunnel::connect(
        doors.clone(),
        "uplink",
        TunnelTarget::Named {
            domain: "store".into(),
            locator: locator.clone(),
        },
        fast_config(),
    );

    wait_for("initial connection", || tunnel.state() == LinkState::Connected).await;

    // Drop the link mid-session.
    listener1.shutdown();
    wait_for("link drop detection", || tunnel.state() != LinkState::Connected).await;

    // Queue envelopes while the link is down. The direct route survives
    // a retry wait, so these land in the outbound queue.
    for i in 0..20 {
        doors
            .route(request("doors", "sink@store", Payload::Text(format!("{}", i))))
            .await
            .unwrap();
    }
    assert_eq!(tunnel.queued(), 20);

    // The store domain comes back somewhere else and re-registers.
    let seen = Arc::new(Mutex::new(Vec::new()));
    let store2 = Domain::new("store");
    store2
        .register("sink", RecorderCell { seen: seen.clone() })
        .await
        .unwrap();
    let listener2 = TunnelListener::bind(store2.clone(), "127.0.0.1:0", fast_config())
        .await
        .unwrap();
    locator
        .register("store", "127.0.0.1", listener2.local_addr().port())
        .await
        .unwrap();

    wait_for("reconnection", || tunnel.state() == LinkState::Connected).await;
    wait_for("queued envelopes to drain", || seen.lock().unwrap().len() == 20).await;

    let seen = seen.lock().unwrap();
    let expected: Vec<String> = (0..20).map(|i| format!("{}", i)).collect();
    assert_eq!(*seen, expected);
    assert!(tunnel.retry_count() == 0);

    tunnel.shutdown();
    listener2.shutdown();
    directory.shutdown();
}

#[tokio::test]
async fn test_explicit_shutdown_is_terminal() {
    let store = Domain::new("store");
    let listener = TunnelListener::bind(store.clone(), "127.0.0.1:0", fast_config())
        .await
        .unwrap();

    let doors = Domain::new("doors");
    let tunnel = Tunnel::connect(
        doors.clone(),
        "uplink",
        TunnelTarget::Static(listener.local_addr().to_string()),
        fast_config(),
    );

    wait_for("tunnel to connect", || tunnel.state() == LinkState::Connected).await;

    tunnel.shutdown();
    wait_for("tunnel death", || tunnel.state() == LinkState::Dead).await;

    // The direct route is gone; local sends now fail with NoRoute.
    let err = doors
        .send_and_wait(
            "test",
            request("doors", "echo@store", Payload::Text("ping".into())),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, types::CellError::NoRoute { .. }));

    listener.shutdown();
}
