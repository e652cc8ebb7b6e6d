use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::{Digest, Sha256, Sha512};
use std::collections::HashMap;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

use crate::config::Config;
use crate::exchange::{Exchange, ExchangeError};
use crate::models::{BookLevel, OrderBook, OrderStatus, Ticker};

const BASE_URL: &str = "https://api.kraken.com";
const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(500);

type HmacSha512 = Hmac<Sha512>;

#[derive(Debug, Deserialize)]
struct KrakenResponse<T> {
    #[serde(default)]
    error: Vec<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct DepthSide {
    bids: Vec<(String, String, i64)>,
    asks: Vec<(String, String, i64)>,
}

#[derive(Debug, Deserialize)]
struct TickerEntry {
    /// Last trade closed: [price, lot volume].
    c: (String, String),
}

#[derive(Debug, Deserialize)]
struct AddOrderResult {
    txid: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct OrderInfo {
    status: String,
}

pub struct KrakenClient {
    client: Client,
    api_key: String,
    api_secret: String,
    last_request: Mutex<Option<Instant>>,
}

impl KrakenClient {
    pub fn new(cfg: &Config) -> Self {
        Self {
            client: Client::new(),
            api_key: cfg.kraken_api_key.clone(),
            api_secret: cfg.kraken_api_secret.clone(),
            last_request: Mutex::new(None),
        }
    }

    /// Map "BTC/EUR" style pairs onto Kraken altnames ("XBTEUR").
    fn kraken_pair(pair: &str) -> String {
        pair.replace("BTC", "XBT").replace('/', "")
    }

    /// Kraken balance keys carry legacy prefixes ("XXBT", "ZEUR").
    fn normalize_asset(code: &str) -> String {
        match code {
            "XXBT" | "XBT" => "BTC".to_string(),
            "XETH" => "ETH".to_string(),
            "ZEUR" => "EUR".to_string(),
            "ZUSD" => "USD".to_string(),
            other => other.to_string(),
        }
    }

    fn map_errors(errors: &[String]) -> ExchangeError {
        let joined = errors.join(", ");
        if joined.contains("Insufficient funds") {
            ExchangeError::InsufficientFunds(joined)
        } else if joined.contains("Unknown asset pair") {
            ExchangeError::InvalidPair(joined)
        } else if joined.contains("Invalid key")
            || joined.contains("Invalid signature")
            || joined.contains("Permission denied")
        {
            ExchangeError::Auth(joined)
        } else {
            ExchangeError::Protocol(joined)
        }
    }

    /// API-Sign: HMAC-SHA512 of `path ++ SHA256(nonce ++ postdata)` keyed
    /// with the base64-decoded secret, base64-encoded.
    fn sign(path: &str, nonce: &str, postdata: &str, secret: &str) -> Result<String, ExchangeError> {
        let key = BASE64
            .decode(secret)
            .map_err(|e| ExchangeError::Auth(format!("secret is not valid base64: {}", e)))?;

        let mut sha = Sha256::new();
        sha.update(nonce.as_bytes());
        sha.update(postdata.as_bytes());
        let digest = sha.finalize();

        let mut mac = HmacSha512::new_from_slice(&key)
            .map_err(|e| ExchangeError::Auth(e.to_string()))?;
        mac.update(path.as_bytes());
        mac.update(&digest);
        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }

    async fn rate_limit(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < MIN_REQUEST_INTERVAL {
                tokio::time::sleep(MIN_REQUEST_INTERVAL - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn public_get<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ExchangeError> {
        self.rate_limit().await;

        let resp = self
            .client
            .get(format!("{}{}", BASE_URL, path))
            .query(query)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ExchangeError::Transport(format!("{}: {}", status, body)));
        }

        let data: KrakenResponse<T> = resp
            .json()
            .await
            .map_err(|e| ExchangeError::Protocol(e.to_string()))?;
        if !data.error.is_empty() {
            return Err(Self::map_errors(&data.error));
        }
        data.result
            .ok_or_else(|| ExchangeError::Protocol("missing result".to_string()))
    }

    async fn private_post<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, ExchangeError> {
        self.rate_limit().await;

        let nonce = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| ExchangeError::Transport(e.to_string()))?
            .as_millis()
            .to_string();

        let mut postdata = format!("nonce={}", nonce);
        for (key, value) in params {
            postdata.push('&');
            postdata.push_str(key);
            postdata.push('=');
            postdata.push_str(value);
        }

        let signature = Self::sign(path, &nonce, &postdata, &self.api_secret)?;

        let resp = self
            .client
            .post(format!("{}{}", BASE_URL, path))
            .header("API-Key", &self.api_key)
            .header("API-Sign", signature)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(postdata)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ExchangeError::Transport(format!("{}: {}", status, body)));
        }

        let data: KrakenResponse<T> = resp
            .json()
            .await
            .map_err(|e| ExchangeError::Protocol(e.to_string()))?;
        if !data.error.is_empty() {
            return Err(Self::map_errors(&data.error));
        }
        data.result
            .ok_or_else(|| ExchangeError::Protocol("missing result".to_string()))
    }

    async fn add_order(
        &self,
        pair: &str,
        ordertype: &str,
        side: &str,
        quantity: f64,
        price: Option<f64>,
    ) -> Result<String, ExchangeError> {
        let mut params = vec![
            ("pair", Self::kraken_pair(pair)),
            ("type", side.to_string()),
            ("ordertype", ordertype.to_string()),
            ("volume", format!("{:.8}", quantity)),
        ];
        if let Some(price) = price {
            params.push(("price", format!("{:.2}", price)));
        }

        let result: AddOrderResult = self.private_post("/0/private/AddOrder", &params).await?;
        result
            .txid
            .into_iter()
            .next()
            .ok_or_else(|| ExchangeError::Protocol("AddOrder returned no txid".to_string()))
    }
}

#[async_trait]
impl Exchange for KrakenClient {
    async fn fetch_balance(&self) -> Result<HashMap<String, f64>, ExchangeError> {
        let raw: HashMap<String, String> = self.private_post("/0/private/Balance", &[]).await?;
        let mut balances = HashMap::new();
        for (code, amount) in raw {
            let amount: f64 = amount
                .parse()
                .map_err(|_| ExchangeError::Protocol(format!("bad balance for {}", code)))?;
            balances.insert(Self::normalize_asset(&code), amount);
        }
        Ok(balances)
    }

    async fn fetch_order_book(
        &self,
        pair: &str,
        depth: usize,
    ) -> Result<OrderBook, ExchangeError> {
        let kraken_pair = Self::kraken_pair(pair);
        let result: HashMap<String, DepthSide> = self
            .public_get(
                "/0/public/Depth",
                &[
                    ("pair", kraken_pair.clone()),
                    ("count", depth.max(1).to_string()),
                ],
            )
            .await?;

        // The result is keyed by Kraken's canonical pair name, which may
        // differ from the altname we asked for. There is exactly one entry.
        let side = result
            .into_values()
            .next()
            .ok_or_else(|| ExchangeError::Protocol("empty depth response".to_string()))?;

        let parse_levels = |levels: Vec<(String, String, i64)>| -> Result<Vec<BookLevel>, ExchangeError> {
            levels
                .into_iter()
                .map(|(price, quantity, _)| {
                    Ok(BookLevel {
                        price: price
                            .parse()
                            .map_err(|_| ExchangeError::Protocol("bad price".to_string()))?,
                        quantity: quantity
                            .parse()
                            .map_err(|_| ExchangeError::Protocol("bad volume".to_string()))?,
                    })
                })
                .collect()
        };

        Ok(OrderBook {
            bids: parse_levels(side.bids)?,
            asks: parse_levels(side.asks)?,
        })
    }

    async fn fetch_ticker(&self, pair: &str) -> Result<Ticker, ExchangeError> {
        let result: HashMap<String, TickerEntry> = self
            .public_get("/0/public/Ticker", &[("pair", Self::kraken_pair(pair))])
            .await?;

        let entry = result
            .into_values()
            .next()
            .ok_or_else(|| ExchangeError::Protocol("empty ticker response".to_string()))?;
        let last_price = entry
            .c
            .0
            .parse()
            .map_err(|_| ExchangeError::Protocol("bad last price".to_string()))?;
        Ok(Ticker { last_price })
    }

    async fn create_limit_buy_order(
        &self,
        pair: &str,
        quantity: f64,
        price: f64,
    ) -> Result<String, ExchangeError> {
        self.add_order(pair, "limit", "buy", quantity, Some(price)).await
    }

    async fn create_market_buy_order(
        &self,
        pair: &str,
        quantity: f64,
    ) -> Result<String, ExchangeError> {
        self.add_order(pair, "market", "buy", quantity, None).await
    }

    async fn create_market_sell_order(
        &self,
        pair: &str,
        quantity: f64,
    ) -> Result<String, ExchangeError> {
        self.add_order(pair, "market", "sell", quantity, None).await
    }

    async fn fetch_order(&self, order_id: &str) -> Result<OrderStatus, ExchangeError> {
        let result: HashMap<String, OrderInfo> = self
            .private_post("/0/private/QueryOrders", &[("txid", order_id.to_string())])
            .await?;

        let info = result
            .get(order_id)
            .ok_or_else(|| ExchangeError::Protocol(format!("unknown order {}", order_id)))?;
        Ok(match info.status.as_str() {
            "closed" => OrderStatus::Closed,
            "canceled" | "expired" => OrderStatus::Canceled,
            _ => OrderStatus::Open,
        })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), ExchangeError> {
        let _: serde_json::Value = self
            .private_post("/0/private/CancelOrder", &[("txid", order_id.to_string())])
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_mapping() {
        assert_eq!(KrakenClient::kraken_pair("BTC/EUR"), "XBTEUR");
        assert_eq!(KrakenClient::kraken_pair("USDC/EUR"), "USDCEUR");
        assert_eq!(KrakenClient::kraken_pair("SOL/USDC"), "SOLUSDC");
    }

    #[test]
    fn asset_normalization() {
        assert_eq!(KrakenClient::normalize_asset("XXBT"), "BTC");
        assert_eq!(KrakenClient::normalize_asset("ZEUR"), "EUR");
        assert_eq!(KrakenClient::normalize_asset("USDC"), "USDC");
        assert_eq!(KrakenClient::normalize_asset("SOL"), "SOL");
    }

    #[test]
    fn signature_matches_documented_example() {
        // Worked example from Kraken's REST authentication docs.
        let secret = "kQH5HW/8p1uGOVjbgWA7FunAmGO8lsSUXNsu3eow76sz84Q18fWxnyRzBHCd3pd5nE9qa99HAZtuZuj6F1huXg==";
        let path = "/0/private/AddOrder";
        let nonce = "1616492376594";
        let postdata =
            "nonce=1616492376594&ordertype=limit&pair=XBTUSD&price=37500&type=buy&volume=1.25";

        let sig = KrakenClient::sign(path, nonce, postdata, secret).unwrap();
        assert_eq!(
            sig,
            "4/dpxb3iT4tp/ZCVEwSnEsLxx0bqyhLpdfOpc6fn7OR8+UClSV5n9E6aSS8MPtnRfp32bAb0nmbRn6H8ndwLUQ=="
        );
    }

    #[test]
    fn error_classification() {
        let e = KrakenClient::map_errors(&["EOrder:Insufficient funds".to_string()]);
        assert!(!e.is_retryable());
        assert!(matches!(e, ExchangeError::InsufficientFunds(_)));

        let e = KrakenClient::map_errors(&["EQuery:Unknown asset pair".to_string()]);
        assert!(matches!(e, ExchangeError::InvalidPair(_)));

        let e = KrakenClient::map_errors(&["EService:Unavailable".to_string()]);
        assert!(e.is_retryable());
    }
}
