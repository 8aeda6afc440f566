//! End-to-end tests for the HTTP surface over a real socket and fake worker.

#![cfg(unix)]

mod common;

use common::{ECHO_WORKER, sh_worker, within};
use serde_json::{Value, json};
use std::net::SocketAddr;
use stockbridge::bus::CommandBus;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

struct TestServer {
    addr: SocketAddr,
    bus: CommandBus,
    cancel: CancellationToken,
}

impl TestServer {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let bus = CommandBus::start(sh_worker(ECHO_WORKER));
        let cancel = CancellationToken::new();
        tokio::spawn(stockbridge::http::serve(
            listener,
            bus.clone(),
            cancel.clone(),
        ));
        Self { addr, bus, cancel }
    }

    /// Send a raw request and return (status, headers block, body).
    async fn raw(&self, request: &str) -> (u16, String, Vec<u8>) {
        let mut stream = TcpStream::connect(self.addr).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = Vec::new();
        within(stream.read_to_end(&mut response)).await.unwrap();

        let text = String::from_utf8_lossy(&response).to_string();
        let (head, _) = text
            .split_once("\r\n\r\n")
            .expect("response should have a header block");
        let status = head
            .split_whitespace()
            .nth(1)
            .and_then(|s| s.parse().ok())
            .expect("status line should carry a code");
        let body_start = head.len() + 4;
        (status, head.to_string(), response[body_start..].to_vec())
    }

    async fn get(&self, path: &str) -> (u16, Value) {
        let (status, _, body) = self
            .raw(&format!("GET {path} HTTP/1.1\r\nHost: test\r\n\r\n"))
            .await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    async fn post(&self, path: &str, body: &Value) -> (u16, Value) {
        let body = body.to_string();
        let (status, _, response) = self
            .raw(&format!(
                "POST {path} HTTP/1.1\r\nHost: test\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
                body.len()
            ))
            .await;
        (status, serde_json::from_slice(&response).unwrap())
    }

    async fn stop(self) {
        self.cancel.cancel();
        self.bus.shutdown().await;
    }
}

#[tokio::test]
async fn get_routes_forward_worker_json() {
    let server = TestServer::start().await;

    assert_eq!(
        server.get("/api/stocks").await,
        (200, json!({ "echo": "STOCKS" }))
    );
    assert_eq!(
        server.get("/api/trends/AAPL").await,
        (200, json!({ "echo": "TRENDS AAPL" }))
    );
    assert_eq!(
        server.get("/api/clusters").await,
        (200, json!({ "echo": "CLUSTERS" }))
    );

    server.stop().await;
}

#[tokio::test]
async fn add_stock_sends_add_command() {
    let server = TestServer::start().await;

    let (status, body) = server
        .post(
            "/api/stocks",
            &json!({ "name": "AAPL", "buyPrice": 150.5, "quantity": 10 }),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(
        body,
        json!({ "status": "added", "name": "AAPL", "price": "150.5", "qty": "10" })
    );

    server.stop().await;
}

#[tokio::test]
async fn invalid_body_is_rejected_without_reaching_worker() {
    let server = TestServer::start().await;

    let (status, body) = server
        .post("/api/stocks", &json!({ "name": "AAPL" }))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body, json!({ "error": "Missing fields" }));

    let (status, _) = server
        .post(
            "/api/price",
            &json!({ "name": "A\nSTOCKS", "newPrice": 1, "newQty": 1 }),
        )
        .await;
    assert_eq!(status, 400);

    let (status, _) = server
        .post(
            "/api/stocks",
            &json!({ "name": "A".repeat(300), "buyPrice": 1e300, "quantity": 1 }),
        )
        .await;
    assert_eq!(status, 400);

    // The pairing is intact: the next answer belongs to the next request.
    assert_eq!(server.get("/api/top").await, (200, json!({ "echo": "TOP" })));

    server.stop().await;
}

#[tokio::test]
async fn malformed_worker_line_is_returned_as_marker() {
    let server = TestServer::start().await;

    assert_eq!(
        server.get("/api/trends/GARBLED").await,
        (200, json!({ "error": "invalid payload", "raw": "not json" }))
    );
    assert_eq!(
        server.get("/api/summary").await,
        (200, json!({ "echo": "SUMMARY" }))
    );

    server.stop().await;
}

#[tokio::test]
async fn health_reports_bus_status() {
    let server = TestServer::start().await;
    server.get("/api/top").await;

    let (status, body) = server.get("/api/health").await;
    assert_eq!(status, 200);
    assert_eq!(body["state"], "running");
    assert_eq!(body["generation"], 1);
    assert_eq!(body["inFlight"], false);

    server.stop().await;
}

#[tokio::test]
async fn unknown_path_and_wrong_method() {
    let server = TestServer::start().await;

    assert_eq!(server.get("/api/nope").await.0, 404);

    let (status, head, _) = server
        .raw("DELETE /api/stocks HTTP/1.1\r\nHost: test\r\n\r\n")
        .await;
    assert_eq!(status, 405);
    assert!(head.contains("Allow: GET, POST, OPTIONS"), "{head}");

    server.stop().await;
}

#[tokio::test]
async fn preflight_allows_any_origin() {
    let server = TestServer::start().await;

    let (status, head, body) = server
        .raw("OPTIONS /api/stocks HTTP/1.1\r\nHost: test\r\nOrigin: http://localhost:3000\r\n\r\n")
        .await;
    assert_eq!(status, 204);
    assert!(head.contains("Access-Control-Allow-Origin: *"), "{head}");
    assert!(body.is_empty());

    server.stop().await;
}

#[tokio::test]
async fn garbage_request_gets_bad_request() {
    let server = TestServer::start().await;

    let (status, _, _) = server.raw("NONSENSE\r\n\r\n").await;
    assert_eq!(status, 400);

    server.stop().await;
}

#[tokio::test]
async fn worker_crash_maps_to_bad_gateway() {
    let server = TestServer::start().await;

    let (status, body) = server.get("/api/trends/BOOM").await;
    assert_eq!(status, 502);
    assert!(
        body["error"].as_str().unwrap().contains("exit code 3"),
        "{body}"
    );

    // After the respawn the HTTP surface answers again.
    assert_eq!(
        server.get("/api/stocks").await,
        (200, json!({ "echo": "STOCKS" }))
    );

    server.stop().await;
}

#[tokio::test]
async fn oversized_body_is_payload_too_large() {
    let server = TestServer::start().await;

    let (status, _, _) = server
        .raw("POST /api/stocks HTTP/1.1\r\nHost: test\r\nContent-Length: 1000000\r\n\r\n")
        .await;
    assert_eq!(status, 413);

    server.stop().await;
}

#[tokio::test]
async fn requests_during_shutdown_are_unavailable() {
    let server = TestServer::start().await;
    let addr = server.addr;
    let cancel = server.cancel.clone();
    server.bus.clone().shutdown().await;

    // The listener is still up but the bus is gone.
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /api/stocks HTTP/1.1\r\nHost: test\r\n\r\n")
        .await
        .unwrap();
    let mut response = Vec::new();
    within(stream.read_to_end(&mut response)).await.unwrap();
    assert!(String::from_utf8_lossy(&response).starts_with("HTTP/1.1 503 "));

    cancel.cancel();
}
