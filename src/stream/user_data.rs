//! User data stream: execution reports for every strategy.
//!
//! Each session leases a fresh listen key and publishes it on a watch
//! channel, where the renewal task and shutdown pick it up.

use super::supervisor::{connect, Session, SessionEnd};
use crate::dispatch::{EventRouter, OrderEvent};
use crate::exchange::{parse_user_frame, BinanceWebSocket, UserFrame, UserStreamAuth};
use futures_util::future::BoxFuture;
use futures_util::{FutureExt, SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

pub struct UserDataStream {
    endpoints: BinanceWebSocket,
    auth: Arc<dyn UserStreamAuth>,
    router: Arc<EventRouter>,
    connect_timeout: Duration,
    listen_key: watch::Sender<Option<String>>,
}

impl UserDataStream {
    /// Returns the stream and a receiver of the current listen key.
    pub fn new(
        endpoints: BinanceWebSocket,
        auth: Arc<dyn UserStreamAuth>,
        router: Arc<EventRouter>,
        connect_timeout: Duration,
    ) -> (Self, watch::Receiver<Option<String>>) {
        let (listen_key, key_rx) = watch::channel(None);
        (
            Self {
                endpoints,
                auth,
                router,
                connect_timeout,
                listen_key,
            },
            key_rx,
        )
    }

    /// Route one text frame. Returns the session end if the frame ends it.
    fn handle_text(&self, text: &str) -> Option<SessionEnd> {
        match parse_user_frame(text) {
            Ok(UserFrame::Execution(report)) => {
                debug!(
                    order = report.order_id,
                    symbol = %report.symbol,
                    status = ?report.status,
                    "Execution report"
                );
                self.router.route_order(&OrderEvent::Execution(report));
            }
            Ok(UserFrame::ListenKeyExpired) => {
                return Some(SessionEnd::Disconnected("listen key expired".to_string()));
            }
            Ok(UserFrame::Other(event)) => {
                self.router.route_order(&OrderEvent::Other(event));
            }
            Err(e) => warn!(error = %e, "Dropping malformed user data frame"),
        }
        None
    }

    async fn session(&mut self) -> SessionEnd {
        let key = match self.auth.create_listen_key().await {
            Ok(key) => key,
            Err(e) => return SessionEnd::Disconnected(format!("listen key: {}", e)),
        };
        self.listen_key.send_replace(Some(key.clone()));

        let url = self.endpoints.user_stream_url(&key);
        let stream = match connect(&url, self.connect_timeout).await {
            Ok(stream) => stream,
            Err(reason) => return SessionEnd::Disconnected(reason),
        };
        info!("👤 User data stream connected");

        let (mut write, mut read) = stream.split();
        while let Some(message) = read.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    if let Some(end) = self.handle_text(text.as_str()) {
                        return end;
                    }
                }
                Ok(Message::Ping(data)) => {
                    if let Err(e) = write.send(Message::Pong(data)).await {
                        return SessionEnd::Disconnected(format!("pong failed: {}", e));
                    }
                }
                Ok(Message::Close(_)) => {
                    return SessionEnd::Disconnected("closed by server".to_string());
                }
                Ok(_) => {}
                Err(e) => return SessionEnd::Disconnected(e.to_string()),
            }
        }
        SessionEnd::Disconnected("stream ended".to_string())
    }
}

impl Session for UserDataStream {
    fn name(&self) -> String {
        "user-data".to_string()
    }

    fn run_session(&mut self) -> BoxFuture<'_, SessionEnd> {
        self.session().boxed()
    }
}

/// Keep the current listen key alive every `every` for the process lifetime.
/// Failures are logged; the next period tries again.
pub fn spawn_listen_key_renewal(
    auth: Arc<dyn UserStreamAuth>,
    listen_key: watch::Receiver<Option<String>>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // The first tick completes immediately; the key is fresh.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(key) = listen_key.borrow().clone() else {
                continue;
            };
            match auth.keepalive_listen_key(&key).await {
                Ok(()) => debug!("Listen key renewed"),
                Err(e) => warn!(error = %e, "Listen key renewal failed"),
            }
        }
    })
}
