//! Accept loop and per-connection handling.

use std::net::SocketAddr;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use super::HttpError;
use super::request::{Request, read_request};
use super::response::Response;
use super::routes::{Action, resolve};
use crate::bus::CommandBus;
use crate::error::BusError;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);
/// How long a client may take to send a complete request.
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Serve requests on `listener` until `cancel` fires.
///
/// Each connection is handled on its own task; requests that are already
/// waiting on the bus when the loop stops are settled by the bus shutdown.
pub async fn serve(
    listener: TcpListener,
    bus: CommandBus,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    info!(
        target: "stockbridge::http",
        "Listening on http://{}",
        listener.local_addr()?
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(target: "stockbridge::http", "Accept loop stopping");
                return Ok(());
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let bus = bus.clone();
                    tokio::spawn(handle_connection(stream, peer, bus, REQUEST_READ_TIMEOUT));
                }
                Err(e) => {
                    // Keep listening; back off so fd exhaustion does not spin.
                    warn!(target: "stockbridge::http", "Accept failed: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    bus: CommandBus,
    read_timeout: Duration,
) {
    let Ok(read) = tokio::time::timeout(read_timeout, read_request(&mut stream)).await else {
        debug!(
            target: "stockbridge::http",
            "No complete request from {} within {:?}",
            peer,
            read_timeout
        );
        let _ = Response::error(408, "Request timeout")
            .write_to(&mut stream)
            .await;
        let _ = stream.shutdown().await;
        return;
    };

    let response = match read {
        Ok(request) => {
            let method = request.method.clone();
            let path = request.path.clone();
            let response = handle_request(&bus, request).await;
            info!(
                target: "stockbridge::http",
                "{} {} {} -> {}",
                peer,
                method,
                path,
                response.status()
            );
            response
        }
        Err(HttpError::Io(e)) => {
            debug!(target: "stockbridge::http", "Connection from {} dropped: {}", peer, e);
            return;
        }
        Err(e @ HttpError::TooLarge { .. }) => {
            debug!(target: "stockbridge::http", "Rejecting request from {}: {}", peer, e);
            Response::error(413, e.to_string())
        }
        Err(e @ HttpError::Malformed(_)) => {
            debug!(target: "stockbridge::http", "Rejecting request from {}: {}", peer, e);
            Response::error(400, e.to_string())
        }
    };

    if let Err(e) = response.write_to(&mut stream).await {
        debug!(target: "stockbridge::http", "Failed to respond to {}: {}", peer, e);
        return;
    }
    let _ = stream.shutdown().await;
}

/// Route one parsed request, consulting the bus where needed.
pub async fn handle_request(bus: &CommandBus, request: Request) -> Response {
    let action = match resolve(&request.method, &request.path, &request.body) {
        Ok(action) => action,
        Err(rejection) => return rejection.into_response(),
    };

    match action {
        Action::Preflight => Response::preflight(),
        Action::Health => match bus.status().await {
            Ok(status) => Response::json(200, &status),
            Err(e) => bus_error(&e),
        },
        Action::Submit(line) => match bus.submit(line).await {
            Ok(value) => Response::json(200, &value),
            Err(e) => bus_error(&e),
        },
    }
}

/// Worker-side failures are a bad gateway; a closing bus is unavailable.
fn bus_error(error: &BusError) -> Response {
    let status = if error.is_worker_fault() { 502 } else { 503 };
    Response::error(status, error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crash_maps_to_bad_gateway() {
        assert_eq!(bus_error(&BusError::worker_crashed(Some(1))).status(), 502);
        assert_eq!(
            bus_error(&BusError::write_failure(std::io::ErrorKind::BrokenPipe.into())).status(),
            502
        );
    }

    #[test]
    fn shutdown_maps_to_unavailable() {
        let response = bus_error(&BusError::ShuttingDown);
        assert_eq!(response.status(), 503);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["error"], "command bus is shutting down");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stalled_request_times_out() {
        use crate::config::WorkerConfig;
        use tokio::io::AsyncReadExt;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let bus = CommandBus::start(WorkerConfig {
            program: "sh".into(),
            args: vec!["-c".to_string(), "cat".to_string()],
            ..WorkerConfig::default()
        });

        let server = tokio::spawn({
            let bus = bus.clone();
            async move {
                let (stream, peer) = listener.accept().await.unwrap();
                handle_connection(stream, peer, bus, Duration::from_millis(100)).await;
            }
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"GET /api/sto").await.unwrap();
        let mut response = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), client.read_to_end(&mut response))
            .await
            .expect("server should close the connection")
            .unwrap();

        let wire = String::from_utf8_lossy(&response);
        assert!(wire.starts_with("HTTP/1.1 408 Request Timeout\r\n"), "{wire}");
        server.await.unwrap();
        bus.shutdown().await;
    }
}
