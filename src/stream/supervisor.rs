//! Connection supervision shared by the stream tasks.

use futures_util::future::BoxFuture;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{info, warn};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Why a session returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    Shutdown,
    Disconnected(String),
}

/// One reconnectable connection.
pub trait Session: Send {
    fn name(&self) -> String;

    /// Connect and read until the connection ends.
    fn run_session(&mut self) -> BoxFuture<'_, SessionEnd>;
}

/// Run `session` until shutdown, reconnecting after a fixed delay.
pub async fn supervise<S: Session>(mut session: S, delay: Duration, stop: Arc<AtomicBool>) {
    let name = session.name();
    let mut failures: u64 = 0;

    loop {
        if stop.load(Ordering::Relaxed) {
            break;
        }

        match session.run_session().await {
            SessionEnd::Shutdown => break,
            SessionEnd::Disconnected(reason) => {
                failures += 1;
                warn!(
                    stream = %name,
                    %reason,
                    failures,
                    retry_in_secs = delay.as_secs(),
                    "🔌 Stream disconnected, reconnecting"
                );
            }
        }

        if stop.load(Ordering::Relaxed) {
            break;
        }
        tokio::time::sleep(delay).await;
    }

    info!(stream = %name, "Stream supervisor stopped");
}

/// Open a WebSocket within `timeout`.
pub async fn connect(url: &str, timeout: Duration) -> Result<WsStream, String> {
    match tokio::time::timeout(timeout, connect_async(url)).await {
        Ok(Ok((stream, _))) => Ok(stream),
        Ok(Err(e)) => Err(format!("connect failed: {}", e)),
        Err(_) => Err("connection timeout".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;

    struct Scripted {
        script: Vec<SessionEnd>,
    }

    impl Session for Scripted {
        fn name(&self) -> String {
            "scripted".to_string()
        }

        fn run_session(&mut self) -> BoxFuture<'_, SessionEnd> {
            let end = self.script.remove(0);
            async move { end }.boxed()
        }
    }

    #[tokio::test]
    async fn test_reconnects_until_shutdown() {
        let session = Scripted {
            script: vec![
                SessionEnd::Disconnected("reset by peer".into()),
                SessionEnd::Disconnected("timeout".into()),
                SessionEnd::Shutdown,
            ],
        };
        tokio::time::timeout(
            Duration::from_secs(5),
            supervise(session, Duration::from_millis(1), Arc::new(AtomicBool::new(false))),
        )
        .await
        .expect("supervisor should return on shutdown");
    }

    #[tokio::test]
    async fn test_stop_flag_prevents_reconnect() {
        let stop = Arc::new(AtomicBool::new(true));
        let session = Scripted { script: vec![] };
        // An empty script would panic if a session were started.
        supervise(session, Duration::from_millis(1), stop).await;
    }

    #[tokio::test]
    async fn test_connect_reports_failure() {
        let err = connect("ws://127.0.0.1:9/none", Duration::from_secs(2))
            .await
            .err()
            .expect("nothing listens on the discard port");
        assert!(err.starts_with("connect failed") || err == "connection timeout");
    }
}
