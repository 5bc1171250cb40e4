#![allow(clippy::unwrap_used)]
// Event stream lifecycle against a wiremock subscribe endpoint.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use arlo_api::{ApiClient, Endpoints, EventStreamHandle, ReconnectConfig, StreamEvent, TransportConfig};

const CONNECTED: &str = "event: message\ndata: {\"status\":\"connected\"}\n\n";

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, Arc<ApiClient>) {
    let server = MockServer::start().await;
    let endpoints = Endpoints::new(&format!("{}/api", server.uri()), &format!("{}/hmsweb", server.uri())).unwrap();
    let client = ApiClient::new(endpoints, &TransportConfig::default()).unwrap();
    client.set_token(Some("session".to_string().into()));
    (server, Arc::new(client))
}

fn fast_reconnect(max_retries: u32) -> ReconnectConfig {
    ReconnectConfig {
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(40),
        max_retries: Some(max_retries),
    }
}

async fn collect_until_exhausted(rx: &mut broadcast::Receiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let event = rx.recv().await.unwrap();
            let done = matches!(event, StreamEvent::Exhausted);
            events.push(event);
            if done {
                break;
            }
        }
    })
    .await
    .unwrap();
    events
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_stream_delivers_then_reconnects_until_exhausted() {
    let (server, api) = setup().await;

    Mock::given(method("GET"))
        .and(path("/hmsweb/client/subscribe"))
        .and(header("Accept", "text/event-stream"))
        .and(header("Authorization", "session"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(CONNECTED, "text/event-stream"))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/hmsweb/client/subscribe"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let (tx, mut rx) = broadcast::channel(64);
    let cancel = CancellationToken::new();
    let _handle = EventStreamHandle::connect(api, fast_reconnect(1), cancel.clone(), tx);

    let events = collect_until_exhausted(&mut rx).await;

    assert!(matches!(events[0], StreamEvent::Opened));
    match &events[1] {
        StreamEvent::Envelope(envelope) => assert!(envelope.is_status("connected")),
        other => panic!("expected envelope, got {other:?}"),
    }
    let envelopes = events
        .iter()
        .filter(|e| matches!(e, StreamEvent::Envelope(_)))
        .count();
    assert_eq!(envelopes, 1, "each message is delivered exactly once");

    // One productive connection, then max_retries + 1 failed attempts.
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 3);
}

#[tokio::test]
async fn test_rejected_session_stops_immediately() {
    let (server, api) = setup().await;

    Mock::given(method("GET"))
        .and(path("/hmsweb/client/subscribe"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let (tx, mut rx) = broadcast::channel(16);
    let _handle = EventStreamHandle::connect(api, fast_reconnect(5), CancellationToken::new(), tx);

    let events = collect_until_exhausted(&mut rx).await;
    assert!(matches!(events[0], StreamEvent::Closed { .. }));
    assert!(matches!(events[1], StreamEvent::Exhausted));
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_cancel_stops_reconnecting() {
    let (server, api) = setup().await;

    Mock::given(method("GET"))
        .and(path("/hmsweb/client/subscribe"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let (tx, mut rx) = broadcast::channel(16);
    let cancel = CancellationToken::new();
    let handle = EventStreamHandle::connect(
        api,
        ReconnectConfig {
            initial_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(60),
            max_retries: None,
        },
        cancel,
        tx,
    );

    // First failure, then the loop parks in its backoff sleep.
    let first = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
    assert!(matches!(first, StreamEvent::Closed { .. }));

    handle.shutdown();
    assert!(handle.is_shut_down());
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(server.received_requests().await.unwrap().len(), 1);
    assert!(rx.try_recv().is_err(), "nothing is published after cancel");
}
