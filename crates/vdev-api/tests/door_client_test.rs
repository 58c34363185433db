#![allow(clippy::unwrap_used)]
// Integration tests for `DoorClient` and `EventStream` using wiremock.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use vdev_api::{
    DoorClient, DoorCommand, Entity, Error, EventKind, EventRecord, EventSink, EventStream,
    ReconnectConfig, StreamState,
};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, DoorClient) {
    let server = MockServer::start().await;
    let base_url = Url::parse(&server.uri()).unwrap();
    (server, DoorClient::with_client(reqwest::Client::new(), base_url))
}

#[derive(Default)]
struct Collector(Mutex<Vec<EventRecord>>);

impl EventSink for Collector {
    fn push(&self, record: EventRecord) {
        self.0.lock().unwrap().push(record);
    }
}

impl Collector {
    fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    fn kinds(&self) -> Vec<EventKind> {
        self.0.lock().unwrap().iter().map(|r| r.kind).collect()
    }
}

fn fast_reconnect(max_retries: Option<u32>) -> ReconnectConfig {
    ReconnectConfig {
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(40),
        max_retries,
        idle_timeout: Duration::from_secs(2),
    }
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Event endpoint that answers the first `failures` connections with 503,
/// then sends one ping per connection and goes silent with the socket
/// held open. Returns the events URL and a connection counter.
async fn stalling_controller(failures: usize) -> (Url, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&connections);

    tokio::spawn(async move {
        let mut open = Vec::new();
        loop {
            let (mut socket, _) = listener.accept().await.unwrap();
            let seen = counter.fetch_add(1, Ordering::SeqCst);
            let mut request = [0_u8; 2048];
            let _ = socket.read(&mut request).await;

            if seen < failures {
                let _ = socket
                    .write_all(b"HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                    .await;
                continue;
            }

            let event = b"event: ping\ndata: {}\n\n";
            let mut response = b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ntransfer-encoding: chunked\r\n\r\n".to_vec();
            response.extend_from_slice(format!("{:x}\r\n", event.len()).as_bytes());
            response.extend_from_slice(event);
            response.extend_from_slice(b"\r\n");
            let _ = socket.write_all(&response).await;
            open.push(socket);
        }
    });

    let url = Url::parse(&format!("http://{addr}/events")).unwrap();
    (url, connections)
}

// ── REST ────────────────────────────────────────────────────────────

#[tokio::test]
async fn status_parses_cover() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/cover/door"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cover-door",
            "state": "OPEN",
            "value": 1.0,
            "current_operation": "IDLE"
        })))
        .mount(&server)
        .await;

    let status = client.status(Entity::Door).await.unwrap();
    assert_eq!(status.entity(), Some(Entity::Door));
    assert_eq!(status.state.as_deref(), Some("OPEN"));
    assert_eq!(status.current_operation.as_deref(), Some("IDLE"));
}

#[tokio::test]
async fn status_error_codes_surface() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/binary_sensor/motor"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/binary_sensor/motion"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    let err = client.status(Entity::Motor).await.unwrap_err();
    assert!(matches!(err, Error::Status { status: 500, .. }));
    assert!(err.is_transient());

    let err = client.status(Entity::Motion).await.unwrap_err();
    assert!(matches!(err, Error::Deserialization { .. }));
}

#[tokio::test]
async fn identify_checks_light_id() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/light/light"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"id": "light-light", "state": "OFF"})),
        )
        .mount(&server)
        .await;

    assert!(client.identify().await.unwrap());
}

#[tokio::test]
async fn identify_rejects_foreign_device() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/light/light"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"id": "light-porch", "state": "ON"})),
        )
        .mount(&server)
        .await;

    assert!(!client.identify().await.unwrap());
}

#[tokio::test]
async fn commands_post_to_action_paths() {
    let (server, client) = setup().await;

    for route in ["/cover/door/open", "/button/toggle_door/press", "/lock/lock_remotes/unlock"] {
        Mock::given(method("POST"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
    }

    client.send(DoorCommand::DoorOpen).await.unwrap();
    client.send(DoorCommand::DoorTrigger).await.unwrap();
    client.send(DoorCommand::Unlock).await.unwrap();
}

// ── Event stream ────────────────────────────────────────────────────

const SSE_BODY: &str = "retry: 30000\n\
id: 1\n\
event: ping\n\
data: {\"title\":\"garage\"}\n\
\n\
event: state\n\
data: {\"id\":\"light-light\",\"state\":\"ON\"}\n\
\n\
: comment\n\
event: log\n\
data: [I][app]: Rebooting...\n\n";

#[tokio::test]
async fn stream_delivers_parsed_records() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(SSE_BODY),
        )
        .mount(&server)
        .await;

    let stream = EventStream::new(
        reqwest::Client::new(),
        client.events_url().unwrap(),
        fast_reconnect(Some(3)),
    );
    let sink = Arc::new(Collector::default());
    let cancel = CancellationToken::new();

    let handle = stream.spawn(Arc::clone(&sink), cancel.clone()).unwrap();
    wait_for(|| sink.len() >= 5).await;

    cancel.cancel();
    handle.await.unwrap();

    assert_eq!(
        sink.kinds()[..5],
        [
            EventKind::Retry,
            EventKind::Id,
            EventKind::Ping,
            EventKind::State,
            EventKind::Log
        ]
    );
    assert_eq!(stream.state(), StreamState::Disconnected);
    assert!(!stream.is_running());
}

#[tokio::test]
async fn second_start_is_a_no_op() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(": idle\n")
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let stream = EventStream::new(
        reqwest::Client::new(),
        client.events_url().unwrap(),
        fast_reconnect(None),
    );
    let sink = Arc::new(Collector::default());
    let cancel = CancellationToken::new();

    let first = stream.spawn(Arc::clone(&sink), cancel.clone());
    let second = stream.spawn(Arc::clone(&sink), cancel.clone());
    assert!(first.is_some());
    assert!(second.is_none());
    assert!(stream.is_running());

    cancel.cancel();
    first.unwrap().await.unwrap();
    assert!(!stream.is_running());
}

#[tokio::test]
async fn gives_up_after_max_retries() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let stream = EventStream::new(
        reqwest::Client::new(),
        client.events_url().unwrap(),
        fast_reconnect(Some(2)),
    );
    let sink = Arc::new(Collector::default());

    let handle = stream.spawn(Arc::clone(&sink), CancellationToken::new()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(stream.state(), StreamState::Disconnected);
    assert_eq!(sink.len(), 0);

    // Restartable once given up.
    let again = stream.spawn(Arc::clone(&sink), CancellationToken::new());
    assert!(again.is_some());
    again.unwrap().abort();
}

#[tokio::test]
async fn idle_stream_backs_off_and_reconnects() {
    let (url, connections) = stalling_controller(0).await;
    let reconnect = ReconnectConfig {
        initial_delay: Duration::from_millis(500),
        max_delay: Duration::from_millis(500),
        max_retries: None,
        idle_timeout: Duration::from_millis(200),
    };
    let stream = EventStream::new(reqwest::Client::new(), url, reconnect);
    let sink = Arc::new(Collector::default());
    let cancel = CancellationToken::new();

    let handle = stream.spawn(Arc::clone(&sink), cancel.clone()).unwrap();

    wait_for(|| sink.len() == 1).await;
    assert_eq!(sink.kinds(), vec![EventKind::Ping]);
    // Silence past the idle window drops the connection; the counter was
    // reset by the handshake.
    wait_for(|| stream.state() == StreamState::Backoff { attempt: 0 }).await;
    assert_eq!(connections.load(Ordering::SeqCst), 1);

    wait_for(|| connections.load(Ordering::SeqCst) >= 2 && sink.len() >= 2).await;
    assert!(stream.is_running());

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn handshake_resets_retry_counter() {
    // Two refusals bring the counter to the cap; without the reset on
    // connect, the first idle drop afterwards would end the loop.
    let (url, connections) = stalling_controller(2).await;
    let reconnect = ReconnectConfig {
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(40),
        max_retries: Some(2),
        idle_timeout: Duration::from_millis(150),
    };
    let stream = EventStream::new(reqwest::Client::new(), url, reconnect);
    let sink = Arc::new(Collector::default());
    let cancel = CancellationToken::new();

    let handle = stream.spawn(Arc::clone(&sink), cancel.clone()).unwrap();

    wait_for(|| connections.load(Ordering::SeqCst) >= 5).await;
    assert!(stream.is_running());
    assert!(!handle.is_finished());
    assert!(sink.len() >= 2);

    cancel.cancel();
    handle.await.unwrap();
}
