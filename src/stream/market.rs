//! Market data stream: depth diffs and trades for one symbol.

use super::filter::LastPriceFilter;
use super::supervisor::{connect, Session, SessionEnd};
use crate::dispatch::{EventRouter, MarketEvent};
use crate::exchange::{parse_market_frame, BinanceWebSocket, MarketFrame};
use futures_util::future::BoxFuture;
use futures_util::{FutureExt, SinkExt, StreamExt};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

pub struct MarketStream {
    symbol: String,
    url: String,
    connect_timeout: Duration,
    router: Arc<EventRouter>,
    filter: LastPriceFilter,
}

impl MarketStream {
    pub fn new(
        symbol: impl Into<String>,
        endpoints: &BinanceWebSocket,
        connect_timeout: Duration,
        price_threshold: Decimal,
        router: Arc<EventRouter>,
    ) -> Self {
        let symbol = symbol.into();
        Self {
            url: endpoints.market_stream_url(&symbol),
            symbol,
            connect_timeout,
            router,
            filter: LastPriceFilter::new(price_threshold),
        }
    }

    /// Decode one text frame and route it.
    fn handle_text(&mut self, text: &str) {
        match parse_market_frame(text) {
            Ok(MarketFrame::Depth(update)) => {
                self.router.route_market(&MarketEvent::Depth(update));
            }
            Ok(MarketFrame::Trade(tick)) => {
                if self.filter.admit(&tick.symbol, tick.price) {
                    self.router.route_market(&MarketEvent::Trade(tick));
                }
            }
            Ok(MarketFrame::Other(event)) => {
                debug!(symbol = %self.symbol, %event, "Ignoring market frame");
            }
            Err(e) => {
                warn!(symbol = %self.symbol, error = %e, "Dropping malformed market frame");
            }
        }
    }

    async fn session(&mut self) -> SessionEnd {
        let stream = match connect(&self.url, self.connect_timeout).await {
            Ok(stream) => stream,
            Err(reason) => return SessionEnd::Disconnected(reason),
        };
        info!(symbol = %self.symbol, url = %self.url, "📡 Market stream connected");

        // Diffs were missed while disconnected; strategies resync their books.
        self.router.route_market(&MarketEvent::Reconnected {
            symbol: self.symbol.clone(),
        });

        let (mut write, mut read) = stream.split();
        while let Some(message) = read.next().await {
            match message {
                Ok(Message::Text(text)) => self.handle_text(text.as_str()),
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

impl Session for MarketStream {
    fn name(&self) -> String {
        format!("market:{}", self.symbol)
    }

    fn run_session(&mut self) -> BoxFuture<'_, SessionEnd> {
        self.session().boxed()
    }
}
