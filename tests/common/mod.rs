use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use kraken_dca_bot::config::Config;
use kraken_dca_bot::exchange::{Exchange, ExchangeError};
use kraken_dca_bot::models::{BookLevel, OrderBook, OrderStatus, Ticker};
use kraken_dca_bot::notify::{Level, Notifier};

pub const CHAT_ID: &str = "42";

/// A mock exchange serving canned balances and a fixed order book, with
/// call counters for asserting how often the executor touched it.
pub struct MockExchange {
    balances: HashMap<String, f64>,
    book: OrderBook,
    pub book_fetches: AtomicUsize,
    pub limit_orders: AtomicUsize,
}

impl MockExchange {
    pub fn new(balances: &[(&str, f64)], bids: &[f64]) -> Self {
        Self {
            balances: balances
                .iter()
                .map(|(code, amount)| (code.to_string(), *amount))
                .collect(),
            book: OrderBook {
                bids: bids
                    .iter()
                    .map(|&price| BookLevel {
                        price,
                        quantity: 1.0,
                    })
                    .collect(),
                asks: vec![],
            },
            book_fetches: AtomicUsize::new(0),
            limit_orders: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Exchange for MockExchange {
    async fn fetch_balance(&self) -> Result<HashMap<String, f64>, ExchangeError> {
        Ok(self.balances.clone())
    }

    async fn fetch_order_book(
        &self,
        _pair: &str,
        _depth: usize,
    ) -> Result<OrderBook, ExchangeError> {
        self.book_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.book.clone())
    }

    async fn fetch_ticker(&self, _pair: &str) -> Result<Ticker, ExchangeError> {
        Ok(Ticker {
            last_price: self.book.best_bid().unwrap_or(0.0),
        })
    }

    async fn create_limit_buy_order(
        &self,
        _pair: &str,
        _quantity: f64,
        _price: f64,
    ) -> Result<String, ExchangeError> {
        self.limit_orders.fetch_add(1, Ordering::SeqCst);
        Ok("MOCK-LIMIT".to_string())
    }

    async fn create_market_buy_order(
        &self,
        _pair: &str,
        _quantity: f64,
    ) -> Result<String, ExchangeError> {
        Ok("MOCK-MARKET".to_string())
    }

    async fn create_market_sell_order(
        &self,
        _pair: &str,
        _quantity: f64,
    ) -> Result<String, ExchangeError> {
        Ok("MOCK-SELL".to_string())
    }

    async fn fetch_order(&self, _order_id: &str) -> Result<OrderStatus, ExchangeError> {
        Ok(OrderStatus::Open)
    }

    async fn cancel_order(&self, _order_id: &str) -> Result<(), ExchangeError> {
        Ok(())
    }
}

/// Captures every outbound alert so tests can assert on the exact
/// notification stream.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, Level)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<(String, Level)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn count_containing(&self, needle: &str) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(message, _)| message.contains(needle))
            .count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, message: &str, level: Level) {
        self.sent.lock().unwrap().push((message.to_string(), level));
    }
}

pub fn test_config() -> Config {
    let mut cfg = Config::from_env();
    cfg.dry_run = true;
    cfg.max_retries = 3;
    cfg.retry_delay = Duration::from_millis(1);
    cfg.min_funding_balance = 10.0;
    cfg.bid_depth = 3;
    cfg.balance_fraction = 0.2;
    cfg.telegram_chat_id = CHAT_ID.to_string();
    cfg.command_cooldown = Duration::ZERO;
    cfg.trade_confirmation_ttl = Duration::from_secs(30);
    cfg.large_transaction_threshold = 500.0;
    cfg
}
