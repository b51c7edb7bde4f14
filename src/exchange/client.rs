//! Binance REST API client (spot orders, spot/futures market data, listen keys).

use crate::config::BinanceConfig;
use crate::exchange::error::ExchangeError;
use crate::exchange::traits::{CandleSource, MarketData, OrderGateway, UserStreamAuth};
use crate::exchange::types::*;
use anyhow::{Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;
use sha2::Sha256;
use tracing::{debug, instrument};

const SPOT_BASE_URL: &str = "https://api.binance.com";
const SPOT_TESTNET_URL: &str = "https://testnet.binance.vision";
const FUTURES_BASE_URL: &str = "https://fapi.binance.com";
const FUTURES_TESTNET_URL: &str = "https://testnet.binancefuture.com";

const RECV_WINDOW_MS: u64 = 5000;

/// Binance API client.
pub struct BinanceClient {
    http: Client,
    api_key: String,
    secret_key: String,
    spot_base_url: String,
    futures_base_url: String,
}

impl BinanceClient {
    /// Create a new Binance client from configuration.
    pub fn new(config: &BinanceConfig) -> Result<Self> {
        let (spot, futures) = if config.testnet {
            (SPOT_TESTNET_URL, FUTURES_TESTNET_URL)
        } else {
            (SPOT_BASE_URL, FUTURES_BASE_URL)
        };
        let spot = config.rest_url.clone().unwrap_or_else(|| spot.to_string());
        let futures = config
            .futures_rest_url
            .clone()
            .unwrap_or_else(|| futures.to_string());

        Self::with_base_urls(config, spot, futures)
    }

    /// Create a client against explicit base URLs.
    pub fn with_base_urls(
        config: &BinanceConfig,
        spot_base_url: impl Into<String>,
        futures_base_url: impl Into<String>,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            secret_key: config.secret_key.clone(),
            spot_base_url: spot_base_url.into(),
            futures_base_url: futures_base_url.into(),
        })
    }

    /// Generate HMAC-SHA256 signature for authenticated requests.
    fn sign(&self, query_string: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret_key.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(query_string.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn encode_query(params: &[(&str, String)]) -> String {
        params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Send a signed request (timestamp + signature appended).
    async fn send_signed(
        &self,
        method: Method,
        path: &str,
        mut params: Vec<(&str, String)>,
    ) -> Result<Response, ExchangeError> {
        params.push(("recvWindow", RECV_WINDOW_MS.to_string()));
        params.push(("timestamp", chrono::Utc::now().timestamp_millis().to_string()));

        let query = Self::encode_query(&params);
        let signature = self.sign(&query);
        let url = format!(
            "{}{}?{}&signature={}",
            self.spot_base_url, path, query, signature
        );

        let response = self
            .http
            .request(method, &url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;
        Ok(response)
    }

    /// Send an API-key-only request (no signature).
    async fn send_keyed(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Response, ExchangeError> {
        let mut url = format!("{}{}", self.spot_base_url, path);
        if !params.is_empty() {
            url = format!("{}?{}", url, Self::encode_query(params));
        }

        let response = self
            .http
            .request(method, &url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;
        Ok(response)
    }

    async fn send_public(&self, url: String) -> Result<Response, ExchangeError> {
        Ok(self.http.get(&url).send().await?)
    }

    /// Decode a JSON body, mapping non-success statuses to API errors.
    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ExchangeError> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ExchangeError::from_api_response(status.as_u16(), &body));
        }
        Ok(serde_json::from_str(&body)?)
    }

    async fn expect_success(response: Response) -> Result<(), ExchangeError> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await?;
        Err(ExchangeError::from_api_response(status.as_u16(), &body))
    }
}

#[async_trait]
impl OrderGateway for BinanceClient {
    #[instrument(skip(self), fields(symbol = %order.symbol, side = ?order.side))]
    async fn place_order(&self, order: &NewOrder) -> Result<OrderResponse, ExchangeError> {
        let mut params = vec![
            ("symbol", order.symbol.clone()),
            ("side", order.side.as_str().to_string()),
            ("type", order.order_type.as_str().to_string()),
            ("quantity", order.quantity.normalize().to_string()),
            ("newOrderRespType", "FULL".to_string()),
        ];
        if let Some(price) = &order.price {
            params.push(("price", price.normalize().to_string()));
        }
        if let Some(tif) = &order.time_in_force {
            params.push(("timeInForce", tif.as_str().to_string()));
        }
        if let Some(client_id) = &order.new_client_order_id {
            params.push(("newClientOrderId", client_id.clone()));
        }

        debug!("Placing spot order: {:?}", order);
        let response = self.send_signed(Method::POST, "/api/v3/order", params).await?;
        Self::decode(response).await
    }

    #[instrument(skip(self))]
    async fn query_order(&self, symbol: &str, order_id: &str) -> Result<OrderResponse, ExchangeError> {
        let params = vec![("symbol", symbol.to_string()), ("orderId", order_id.to_string())];
        let response = self.send_signed(Method::GET, "/api/v3/order", params).await?;
        Self::decode(response).await
    }

    #[instrument(skip(self))]
    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<OrderResponse, ExchangeError> {
        let params = vec![("symbol", symbol.to_string()), ("orderId", order_id.to_string())];
        let response = self.send_signed(Method::DELETE, "/api/v3/order", params).await?;
        Self::decode(response).await
    }
}

#[async_trait]
impl MarketData for BinanceClient {
    #[instrument(skip(self))]
    async fn symbol_rules(&self, symbol: &str) -> Result<SymbolRules, ExchangeError> {
        let url = format!("{}/api/v3/exchangeInfo?symbol={}", self.spot_base_url, symbol);
        let info: SpotExchangeInfo = Self::decode(self.send_public(url).await?).await?;

        info.symbols
            .iter()
            .find(|s| s.symbol == symbol)
            .map(SymbolRules::from)
            .ok_or_else(|| ExchangeError::UnknownSymbol(symbol.to_string()))
    }

    #[instrument(skip(self))]
    async fn depth_snapshot(&self, symbol: &str, limit: u32) -> Result<DepthSnapshot, ExchangeError> {
        let url = format!(
            "{}/api/v3/depth?symbol={}&limit={}",
            self.spot_base_url, symbol, limit
        );
        Self::decode(self.send_public(url).await?).await
    }

    #[instrument(skip(self))]
    async fn klines(
        &self,
        source: CandleSource,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let base = match source {
            CandleSource::Spot => format!("{}/api/v3/klines", self.spot_base_url),
            CandleSource::Futures => format!("{}/fapi/v1/klines", self.futures_base_url),
        };
        let url = format!("{}?symbol={}&interval={}&limit={}", base, symbol, interval, limit);

        let rows: Vec<Vec<serde_json::Value>> = Self::decode(self.send_public(url).await?).await?;
        rows.iter().map(|row| Candle::from_row(row)).collect()
    }

    #[instrument(skip(self))]
    async fn funding_rate(&self, symbol: &str) -> Result<FundingRate, ExchangeError> {
        let url = format!(
            "{}/fapi/v1/premiumIndex?symbol={}",
            self.futures_base_url, symbol
        );
        Self::decode(self.send_public(url).await?).await
    }
}

#[async_trait]
impl UserStreamAuth for BinanceClient {
    #[instrument(skip(self))]
    async fn create_listen_key(&self) -> Result<String, ExchangeError> {
        let response = self
            .send_keyed(Method::POST, "/api/v3/userDataStream", &[])
            .await?;
        let key: ListenKey = Self::decode(response).await?;
        Ok(key.listen_key)
    }

    #[instrument(skip(self, listen_key))]
    async fn keepalive_listen_key(&self, listen_key: &str) -> Result<(), ExchangeError> {
        let params = [("listenKey", listen_key.to_string())];
        let response = self
            .send_keyed(Method::PUT, "/api/v3/userDataStream", &params)
            .await?;
        Self::expect_success(response).await
    }

    #[instrument(skip(self, listen_key))]
    async fn close_listen_key(&self, listen_key: &str) -> Result<(), ExchangeError> {
        let params = [("listenKey", listen_key.to_string())];
        let response = self
            .send_keyed(Method::DELETE, "/api/v3/userDataStream", &params)
            .await?;
        Self::expect_success(response).await
    }
}
