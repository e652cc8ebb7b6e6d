pub mod kraken;

pub use kraken::KrakenClient;

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

use crate::models::{OrderBook, OrderStatus, Ticker};

/// Failure classification drives the retry policy: transient errors consume
/// a retry slot, the rest abort the attempt sequence.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),
    #[error("invalid pair: {0}")]
    InvalidPair(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("request failed: {0}")]
    Transport(String),
    #[error("unexpected response: {0}")]
    Protocol(String),
}

impl ExchangeError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExchangeError::Transport(_) | ExchangeError::Protocol(_))
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(e: reqwest::Error) -> Self {
        ExchangeError::Transport(e.to_string())
    }
}

#[async_trait]
pub trait Exchange: Send + Sync {
    /// Total balance per asset code ("EUR", "BTC", ...).
    async fn fetch_balance(&self) -> Result<HashMap<String, f64>, ExchangeError>;
    async fn fetch_order_book(&self, pair: &str, depth: usize)
        -> Result<OrderBook, ExchangeError>;
    async fn fetch_ticker(&self, pair: &str) -> Result<Ticker, ExchangeError>;
    /// Returns the exchange order id.
    async fn create_limit_buy_order(
        &self,
        pair: &str,
        quantity: f64,
        price: f64,
    ) -> Result<String, ExchangeError>;
    async fn create_market_buy_order(
        &self,
        pair: &str,
        quantity: f64,
    ) -> Result<String, ExchangeError>;
    async fn create_market_sell_order(
        &self,
        pair: &str,
        quantity: f64,
    ) -> Result<String, ExchangeError>;
    async fn fetch_order(&self, order_id: &str) -> Result<OrderStatus, ExchangeError>;
    async fn cancel_order(&self, order_id: &str) -> Result<(), ExchangeError>;
}
