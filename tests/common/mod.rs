//! Shared helpers for bus and HTTP integration tests.

#![allow(dead_code)]

use std::path::PathBuf;
use std::time::Duration;

use stockbridge::bus::{BusStatus, CommandBus};
use stockbridge::config::WorkerConfig;

/// Fake worker speaking the line protocol:
/// - `CRASH` sleeps briefly then exits 7 without answering
/// - `BAD` answers with a line that is not JSON
/// - `QUIET` answers nothing
/// - `ADD name price qty` echoes its arguments
/// - `TRENDS BOOM` exits 3, `TRENDS GARBLED` answers with a non-JSON line
/// - anything else is echoed back as `{"echo": "<line>"}`
pub const ECHO_WORKER: &str = r#"
while IFS= read -r line; do
  set -- $line
  case "$1" in
    CRASH) sleep 0.3; exit 7 ;;
    BAD) echo 'not json' ;;
    QUIET) ;;
    ADD) printf '{"status":"added","name":"%s","price":"%s","qty":"%s"}\n' "$2" "$3" "$4" ;;
    TRENDS)
      case "$2" in
        BOOM) exit 3 ;;
        GARBLED) echo 'not json' ;;
        *) printf '{"echo":"%s"}\n' "$line" ;;
      esac ;;
    *) printf '{"echo":"%s"}\n' "$line" ;;
  esac
done
"#;

pub fn sh_worker(script: &str) -> WorkerConfig {
    WorkerConfig {
        program: PathBuf::from("sh"),
        args: vec!["-c".to_string(), script.to_string()],
        respawn_delay_ms: 20,
        kill_grace_ms: 200,
    }
}

/// Poll `status` until `predicate` holds, failing after five seconds.
pub async fn wait_for_status(
    bus: &CommandBus,
    predicate: impl Fn(&BusStatus) -> bool,
) -> BusStatus {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let status = bus.status().await.expect("bus should be running");
        if predicate(&status) {
            return status;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for bus status, last: {:?}",
            status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Bound a future so a hung bus fails the test instead of stalling it.
pub async fn within<F: std::future::Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(10), future)
        .await
        .expect("should not timeout")
}
