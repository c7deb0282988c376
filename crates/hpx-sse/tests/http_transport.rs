//! Integration tests for the HTTP transport.
//!
//! Uses a mock hyper HTTP server to emit SSE records, verifying the full
//! request → stream → parse → dispatch pipeline.

use std::{
    convert::Infallible,
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use futures_util::StreamExt;
use hpx_sse::{
    ConnectionState, EventFilter, HttpTransport, SseConfig, SseError, SseManager, StreamRequest,
    Transport,
};
use http_body_util::Full;
use hyper::{
    HeaderMap, Request, Response,
    body::{Bytes, Incoming},
    server::conn::http1,
    service::service_fn,
};
use hyper_util::rt::TokioIo;
use tokio::{net::TcpListener, time::timeout};

const WAIT: Duration = Duration::from_secs(5);

const BODY: &str = "id:1\nevent:cheese\ndata:{\"a\":1}\n\nid:2\ndata:plain\n\n";

type SeenHeaders = Arc<Mutex<Option<HeaderMap>>>;

// ---------------------------------------------------------------------------
// Mock SSE server helpers
// ---------------------------------------------------------------------------

/// Start a mock server answering a single connection with `body` and
/// `status`. The request headers are recorded in the returned slot.
async fn start_sse_server(body: &'static str, status: u16) -> (SocketAddr, SeenHeaders) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock server");
    let addr = listener.local_addr().expect("local addr");
    let seen: SeenHeaders = Arc::new(Mutex::new(None));
    let record = Arc::clone(&seen);

    tokio::spawn(async move {
        if let Ok((stream, _)) = listener.accept().await {
            let io = TokioIo::new(stream);
            let _ = http1::Builder::new()
                .serve_connection(
                    io,
                    service_fn(move |req: Request<Incoming>| {
                        *record.lock().expect("lock headers") = Some(req.headers().clone());
                        let resp = Response::builder()
                            .status(status)
                            .header("content-type", "text/event-stream")
                            .body(Full::new(Bytes::from(body)))
                            .expect("build response");
                        async move { Ok::<_, Infallible>(resp) }
                    }),
                )
                .await;
        }
    });

    (addr, seen)
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_http_transport_streams_body_with_sse_headers() {
    let (addr, seen) = start_sse_server(BODY, 200).await;
    let transport = HttpTransport::new().expect("client");

    let request = StreamRequest::new(format!("http://{addr}/notify"), Duration::from_secs(2));
    let response = timeout(WAIT, transport.open(request))
        .await
        .expect("timeout")
        .expect("open");
    assert_eq!(response.status, 200);

    let mut body = Vec::new();
    let mut chunks = response.body;
    while let Some(chunk) = timeout(WAIT, chunks.next()).await.expect("timeout") {
        body.extend_from_slice(&chunk.expect("chunk"));
    }
    assert_eq!(body, BODY.as_bytes());

    let headers = seen.lock().expect("lock headers").clone().expect("request seen");
    assert_eq!(
        headers.get("accept").and_then(|v| v.to_str().ok()),
        Some("text/event-stream")
    );
    assert_eq!(
        headers.get("cache-control").and_then(|v| v.to_str().ok()),
        Some("no-cache")
    );
}

#[tokio::test]
async fn test_http_transport_reports_status() {
    let (addr, _) = start_sse_server("", 404).await;
    let transport = HttpTransport::new().expect("client");

    let request = StreamRequest::new(format!("http://{addr}/missing"), Duration::from_secs(2));
    let response = timeout(WAIT, transport.open(request))
        .await
        .expect("timeout")
        .expect("open");
    assert_eq!(response.status, 404);
}

// ---------------------------------------------------------------------------
// Manager over HTTP
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_manager_delivers_events_over_http() {
    let (addr, _) = start_sse_server(BODY, 200).await;
    let config = SseConfig::from_url(&format!("http://{addr}/notify"))
        .expect("valid url")
        .max_retries(0)
        .log_events(["cheese"]);
    let manager = SseManager::new(config).expect("manager");

    let mut source = manager.add_source(EventFilter::all()).expect("add source");

    let first = timeout(WAIT, source.recv())
        .await
        .expect("timeout")
        .expect("event");
    assert_eq!(first.identifier(), "1");
    assert_eq!(first.name(), Some("cheese"));
    assert_eq!(first.decoded_payload(), Some(&serde_json::json!({"a": 1})));
    assert_eq!(first.origin_uri(), format!("http://{addr}/notify"));

    let second = timeout(WAIT, source.recv())
        .await
        .expect("timeout")
        .expect("event");
    assert_eq!(second.identifier(), "2");
    assert_eq!(second.name(), None);
    assert_eq!(second.payload_str(), Some("plain"));
    assert!(second.decoded_payload().is_none());

    // The server closes the stream after the body and no retries are left.
    let mut state = manager.watch_state();
    timeout(WAIT, state.wait_for(|s| *s == ConnectionState::Idle))
        .await
        .expect("timeout")
        .expect("state");
}

#[tokio::test]
async fn test_manager_rejects_missing_endpoint() {
    let (addr, _) = start_sse_server("", 404).await;
    let config = SseConfig::from_url(&format!("http://{addr}/missing")).expect("valid url");
    let manager = SseManager::new(config).expect("manager");

    let result = timeout(WAIT, manager.connect(format!("http://{addr}/missing")))
        .await
        .expect("timeout");
    assert_eq!(result, Err(SseError::EndpointNotFound { status: 404 }));
    assert_eq!(manager.state(), ConnectionState::Idle);
}

#[tokio::test]
async fn test_manager_gives_up_on_refused_connection() {
    // Reserve a port, then close it so connections are refused.
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);

    let config = SseConfig::from_url(&format!("http://{addr}/notify"))
        .expect("valid url")
        .max_retries(1);
    let manager = SseManager::new(config).expect("manager");

    let result = timeout(WAIT, manager.connect(format!("http://{addr}/notify")))
        .await
        .expect("timeout");
    assert!(matches!(result, Err(SseError::Transport { .. })));
    assert_eq!(manager.state(), ConnectionState::Idle);
}
