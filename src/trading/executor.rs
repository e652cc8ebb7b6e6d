use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::config::SharedConfig;
use crate::exchange::{Exchange, ExchangeError};
use crate::metrics::Metrics;
use crate::models::{AmountSpec, Currency, FundingCurrency, OrderStatus, TradeInstruction};
use crate::notify::{Level, Notifier};
use crate::state::{CycleStateStore, WeeklyCycleState};
use crate::trading::{History, TradeExecutor};

/// Why an attempt sequence stopped without consuming its retries.
#[derive(Debug, Clone, PartialEq)]
pub enum AbortReason {
    /// No funding currency clears the minimum usable balance.
    InsufficientBalance,
    /// Fewer bid levels than the configured peg depth.
    BookTooThin,
    BelowMinimumQuantity { computed: f64, minimum: f64 },
    /// A live order whose status could not be confirmed and whose cancel
    /// also failed. Retrying would stack resting orders.
    UnresolvedOrder { order_id: String },
    /// Gateway error classified as non-retryable.
    NonRetryable(String),
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::InsufficientBalance => {
                write!(f, "no funding currency clears the minimum balance")
            }
            AbortReason::BookTooThin => write!(f, "not enough bid levels in the order book"),
            AbortReason::BelowMinimumQuantity { computed, minimum } => write!(
                f,
                "quantity {:.8} is below the minimum of {:.8}",
                computed, minimum
            ),
            AbortReason::UnresolvedOrder { order_id } => write!(
                f,
                "order {} is unresolved: status unknown and cancel failed, check the exchange",
                order_id
            ),
            AbortReason::NonRetryable(msg) => write!(f, "{}", msg),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TerminalOutcome {
    Filled {
        quantity: f64,
        price: f64,
        currency: Currency,
        simulated: bool,
    },
    Aborted(AbortReason),
    RetriesExhausted {
        attempts: u32,
    },
}

enum AttemptOutcome {
    Filled {
        quantity: f64,
        price: f64,
        currency: Currency,
    },
    NotFilled,
    Abort(AbortReason),
}

/// The order-placement state machine. One call works through up to
/// `max_retries` attempts: size against the live book, place (or simulate)
/// a limit buy pegged below the spread, wait for fill, cancel and retry.
pub struct OrderExecutor {
    cfg: SharedConfig,
    exchange: Arc<dyn Exchange>,
    notifier: Arc<dyn Notifier>,
    metrics: Arc<dyn Metrics>,
    store: Arc<CycleStateStore>,
    history: Arc<History>,
}

impl OrderExecutor {
    pub fn new(
        cfg: SharedConfig,
        exchange: Arc<dyn Exchange>,
        notifier: Arc<dyn Notifier>,
        metrics: Arc<dyn Metrics>,
        store: Arc<CycleStateStore>,
        history: Arc<History>,
    ) -> Self {
        Self {
            cfg,
            exchange,
            notifier,
            metrics,
            store,
            history,
        }
    }

    /// Run the full attempt sequence for one instruction. When
    /// `cycle_tracked` is set, a fill also persists the weekly success flag.
    pub async fn execute(
        &self,
        instruction: &TradeInstruction,
        cycle_tracked: bool,
    ) -> TerminalOutcome {
        let mode = if self.cfg.dry_run { "simulated" } else { "live" };
        info!(
            "Starting {} buy run: {} funded by {:?}",
            mode, instruction.asset, instruction.funding
        );

        let max_retries = self.cfg.max_retries;
        for attempt in 0..max_retries {
            self.metrics.order_attempt();
            let started = Instant::now();

            match self.try_attempt(instruction, attempt).await {
                Ok(AttemptOutcome::Filled {
                    quantity,
                    price,
                    currency,
                }) => {
                    self.metrics.order_success(quantity, price, started.elapsed());
                    let line = format!(
                        "{} BUY {:.prec$} {} @ {:.2} {}{}",
                        Utc::now().format("%Y-%m-%d %H:%M"),
                        quantity,
                        instruction.asset,
                        price,
                        currency,
                        if self.cfg.dry_run { " (simulated)" } else { "" },
                        prec = instruction.asset.precision(),
                    );
                    self.history.push(line);
                    self.notifier
                        .send(
                            &format!(
                                "Bought {:.prec$} {} at {:.2} {} on attempt {}",
                                quantity,
                                instruction.asset,
                                price,
                                currency,
                                attempt + 1,
                                prec = instruction.asset.precision(),
                            ),
                            Level::Success,
                        )
                        .await;

                    if cycle_tracked {
                        self.store.save(&WeeklyCycleState {
                            monday_attempt_successful: true,
                        });
                    }

                    return TerminalOutcome::Filled {
                        quantity,
                        price,
                        currency,
                        simulated: self.cfg.dry_run,
                    };
                }
                Ok(AttemptOutcome::Abort(reason)) => {
                    self.notifier
                        .send(&format!("Buy run aborted: {}", reason), Level::Warning)
                        .await;
                    return TerminalOutcome::Aborted(reason);
                }
                Ok(AttemptOutcome::NotFilled) => {
                    self.metrics.order_failure();
                    info!(
                        "Attempt {}/{} not filled, retrying",
                        attempt + 1,
                        max_retries
                    );
                }
                Err(e) if !e.is_retryable() => {
                    let reason = AbortReason::NonRetryable(e.to_string());
                    self.notifier
                        .send(&format!("Buy run aborted: {}", reason), Level::Warning)
                        .await;
                    return TerminalOutcome::Aborted(reason);
                }
                Err(e) => {
                    self.metrics.order_failure();
                    warn!("Attempt {}/{} failed: {}", attempt + 1, max_retries, e);
                }
            }

            if attempt + 1 < max_retries {
                tokio::time::sleep(self.cfg.retry_delay).await;
            }
        }

        self.notifier
            .send(
                &format!(
                    "Max retries ({}) reached for {} buy, giving up until next run",
                    max_retries, instruction.asset
                ),
                Level::Warning,
            )
            .await;
        TerminalOutcome::RetriesExhausted {
            attempts: max_retries,
        }
    }

    async fn try_attempt(
        &self,
        instruction: &TradeInstruction,
        attempt: u32,
    ) -> Result<AttemptOutcome, ExchangeError> {
        let balances = self.exchange.fetch_balance().await?;

        let (currency, available) = match self.resolve_funding(instruction, &balances) {
            Some(pair) => pair,
            None => return Ok(AttemptOutcome::Abort(AbortReason::InsufficientBalance)),
        };
        self.metrics.balance(currency.code(), available);
        info!("Available {} balance: {:.2}", currency, available);

        let pair = instruction.asset.pair(currency);
        let depth = self.cfg.bid_depth;
        let book = self.exchange.fetch_order_book(&pair, depth.max(10)).await?;

        let chosen_bid = match book.bid_at(depth) {
            Some(price) => price,
            None => return Ok(AttemptOutcome::Abort(AbortReason::BookTooThin)),
        };
        info!("Level {} bid: {:.2} {}", depth, chosen_bid, currency);

        let quantity = match instruction.amount {
            AmountSpec::MinimumOnly => instruction.min_quantity,
            AmountSpec::Absolute(amount) => {
                let spend = amount.min(available);
                info!("Spending {:.2} {} (fixed amount)", spend, currency);
                spend / chosen_bid
            }
            AmountSpec::BalanceFraction(fraction) => {
                let spend = available * fraction;
                info!(
                    "Spending {:.2} {} ({:.0}% of balance)",
                    spend,
                    currency,
                    fraction * 100.0
                );
                spend / chosen_bid
            }
        };

        if quantity < instruction.min_quantity {
            return Ok(AttemptOutcome::Abort(AbortReason::BelowMinimumQuantity {
                computed: quantity,
                minimum: instruction.min_quantity,
            }));
        }
        info!(
            "Attempt {}: buying {:.prec$} {} at {:.2}",
            attempt + 1,
            quantity,
            instruction.asset,
            chosen_bid,
            prec = instruction.asset.precision(),
        );

        if self.cfg.dry_run {
            // A resting bid at `chosen_bid` would fill as long as the best
            // bid has not risen past it.
            let best_bid = book.best_bid().unwrap_or(chosen_bid);
            if best_bid <= chosen_bid {
                info!(
                    "SIMULATED: best bid {:.2} <= our bid {:.2}, order would fill",
                    best_bid, chosen_bid
                );
                return Ok(AttemptOutcome::Filled {
                    quantity,
                    price: chosen_bid,
                    currency,
                });
            }
            info!(
                "SIMULATED: best bid {:.2} above our bid {:.2}, order would not fill",
                best_bid, chosen_bid
            );
            return Ok(AttemptOutcome::NotFilled);
        }

        let order_id = self
            .exchange
            .create_limit_buy_order(&pair, quantity, chosen_bid)
            .await?;
        info!("Limit buy order {} placed, waiting for fill", order_id);

        tokio::time::sleep(self.cfg.order_timeout).await;

        let status = match self.exchange.fetch_order(&order_id).await {
            Ok(status) => status,
            Err(e) => {
                // The order may still be resting. It must be off the book
                // before the next attempt can place a new one.
                warn!("Status check for order {} failed: {}", order_id, e);
                return match self.exchange.cancel_order(&order_id).await {
                    Ok(()) => Err(e),
                    Err(cancel_err) => {
                        warn!(
                            "Cancel of unresolved order {} failed: {}",
                            order_id, cancel_err
                        );
                        Ok(AttemptOutcome::Abort(AbortReason::UnresolvedOrder {
                            order_id,
                        }))
                    }
                };
            }
        };

        match status {
            OrderStatus::Closed => Ok(AttemptOutcome::Filled {
                quantity,
                price: chosen_bid,
                currency,
            }),
            status => {
                info!("Order {} still {:?} after timeout, canceling", order_id, status);
                if let Err(e) = self.exchange.cancel_order(&order_id).await {
                    // A failed cancel is tolerated; the order may have
                    // filled or expired in the meantime.
                    warn!("Cancel of order {} failed: {}", order_id, e);
                }
                Ok(AttemptOutcome::NotFilled)
            }
        }
    }

    /// Pick the funding currency and its usable balance, or `None` when
    /// nothing clears the minimum.
    fn resolve_funding(
        &self,
        instruction: &TradeInstruction,
        balances: &HashMap<String, f64>,
    ) -> Option<(Currency, f64)> {
        let usable = |currency: Currency| -> Option<(Currency, f64)> {
            let balance = balances.get(currency.code()).copied().unwrap_or(0.0);
            (balance >= self.cfg.min_funding_balance).then_some((currency, balance))
        };

        match instruction.funding {
            FundingCurrency::Fixed(currency) => usable(currency),
            FundingCurrency::Auto => Currency::priority_order().into_iter().find_map(usable),
        }
    }
}

#[async_trait]
impl TradeExecutor for OrderExecutor {
    async fn execute_trade(&self, instruction: TradeInstruction) -> TerminalOutcome {
        self.execute(&instruction, false).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::models::{Asset, BookLevel, OrderBook, Ticker};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct StubExchange {
        balances: HashMap<String, f64>,
        book: OrderBook,
        book_fetches: AtomicUsize,
        orders_placed: AtomicUsize,
        cancels: AtomicUsize,
        status_checks_fail: bool,
        cancels_fail: bool,
    }

    impl StubExchange {
        fn new(balances: &[(&str, f64)], bids: &[f64]) -> Self {
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
                orders_placed: AtomicUsize::new(0),
                cancels: AtomicUsize::new(0),
                status_checks_fail: false,
                cancels_fail: false,
            }
        }
    }

    #[async_trait]
    impl Exchange for StubExchange {
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
            self.orders_placed.fetch_add(1, Ordering::SeqCst);
            Ok("STUB-1".to_string())
        }

        async fn create_market_buy_order(
            &self,
            _pair: &str,
            _quantity: f64,
        ) -> Result<String, ExchangeError> {
            Ok("STUB-2".to_string())
        }

        async fn create_market_sell_order(
            &self,
            _pair: &str,
            _quantity: f64,
        ) -> Result<String, ExchangeError> {
            Ok("STUB-3".to_string())
        }

        async fn fetch_order(&self, _order_id: &str) -> Result<OrderStatus, ExchangeError> {
            if self.status_checks_fail {
                return Err(ExchangeError::Transport("status check timed out".to_string()));
            }
            Ok(OrderStatus::Open)
        }

        async fn cancel_order(&self, _order_id: &str) -> Result<(), ExchangeError> {
            self.cancels.fetch_add(1, Ordering::SeqCst);
            if self.cancels_fail {
                return Err(ExchangeError::Transport("cancel timed out".to_string()));
            }
            Ok(())
        }
    }

    fn test_config() -> Config {
        let mut cfg = Config::from_env();
        cfg.dry_run = true;
        cfg.max_retries = 3;
        cfg.retry_delay = Duration::from_millis(1);
        cfg.min_funding_balance = 10.0;
        cfg.bid_depth = 3;
        cfg.balance_fraction = 0.2;
        cfg
    }

    fn make_executor(cfg: Config, exchange: Arc<StubExchange>) -> (OrderExecutor, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CycleStateStore::new(dir.path().join("state.json")));
        let executor = OrderExecutor::new(
            cfg.shared(),
            exchange,
            Arc::new(crate::notify::LogNotifier),
            Arc::new(crate::metrics::LogMetrics),
            store,
            Arc::new(History::new()),
        );
        (executor, dir)
    }

    fn btc_fraction(fraction: f64) -> TradeInstruction {
        TradeInstruction::new(
            Asset::Btc,
            FundingCurrency::Fixed(Currency::Eur),
            AmountSpec::BalanceFraction(fraction),
        )
    }

    #[tokio::test]
    async fn fills_on_first_attempt_when_best_bid_not_above_chosen() {
        // Worked example: 100 EUR, 20%, level-3 bid 50000 => 0.0004 BTC.
        let exchange = Arc::new(StubExchange::new(
            &[("EUR", 100.0)],
            &[50000.0, 50000.0, 50000.0],
        ));
        let (executor, _dir) = make_executor(test_config(), exchange.clone());

        let outcome = executor.execute(&btc_fraction(0.2), false).await;
        match outcome {
            TerminalOutcome::Filled {
                quantity,
                price,
                simulated,
                ..
            } => {
                assert!((quantity - 0.0004).abs() < 1e-12);
                assert_eq!(price, 50000.0);
                assert!(simulated);
            }
            other => panic!("expected fill, got {:?}", other),
        }
        assert_eq!(exchange.book_fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_exactly_max_retries_when_never_filling() {
        // Best bid strictly above the level-3 bid on every snapshot.
        let exchange = Arc::new(StubExchange::new(
            &[("EUR", 100.0)],
            &[50100.0, 50050.0, 50000.0],
        ));
        let cfg = test_config();
        let max_retries = cfg.max_retries;
        let (executor, _dir) = make_executor(cfg, exchange.clone());

        let outcome = executor.execute(&btc_fraction(0.2), false).await;
        assert_eq!(
            outcome,
            TerminalOutcome::RetriesExhausted {
                attempts: max_retries
            }
        );
        assert_eq!(
            exchange.book_fetches.load(Ordering::SeqCst),
            max_retries as usize
        );
    }

    #[tokio::test]
    async fn below_minimum_quantity_aborts_without_placing_orders() {
        let exchange = Arc::new(StubExchange::new(
            &[("EUR", 100.0)],
            &[50000.0, 50000.0, 50000.0],
        ));
        let (executor, _dir) = make_executor(test_config(), exchange.clone());

        // 20 EUR at 50000 => 0.0004, below a 0.0005 floor.
        let instruction = btc_fraction(0.2).with_min_quantity(0.0005);
        let outcome = executor.execute(&instruction, false).await;
        assert!(matches!(
            outcome,
            TerminalOutcome::Aborted(AbortReason::BelowMinimumQuantity { .. })
        ));
        assert_eq!(exchange.orders_placed.load(Ordering::SeqCst), 0);
        // Abort on the first attempt: no retries consumed.
        assert_eq!(exchange.book_fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn insufficient_balance_aborts_before_fetching_book() {
        let exchange = Arc::new(StubExchange::new(&[("EUR", 5.0)], &[50000.0]));
        let (executor, _dir) = make_executor(test_config(), exchange.clone());

        let outcome = executor.execute(&btc_fraction(0.2), false).await;
        assert_eq!(
            outcome,
            TerminalOutcome::Aborted(AbortReason::InsufficientBalance)
        );
        assert_eq!(exchange.book_fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn thin_book_aborts() {
        let exchange = Arc::new(StubExchange::new(&[("EUR", 100.0)], &[50000.0, 49900.0]));
        let (executor, _dir) = make_executor(test_config(), exchange.clone());

        let outcome = executor.execute(&btc_fraction(0.2), false).await;
        assert_eq!(outcome, TerminalOutcome::Aborted(AbortReason::BookTooThin));
    }

    #[tokio::test]
    async fn auto_funding_prefers_eur_then_usdc() {
        let exchange = Arc::new(StubExchange::new(
            &[("EUR", 2.0), ("USDC", 100.0)],
            &[50000.0, 50000.0, 50000.0],
        ));
        let (executor, _dir) = make_executor(test_config(), exchange);

        let instruction = TradeInstruction::new(
            Asset::Btc,
            FundingCurrency::Auto,
            AmountSpec::BalanceFraction(0.2),
        );
        match executor.execute(&instruction, false).await {
            TerminalOutcome::Filled { currency, .. } => assert_eq!(currency, Currency::Usdc),
            other => panic!("expected fill, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn cycle_tracked_fill_persists_flag() {
        let exchange = Arc::new(StubExchange::new(
            &[("EUR", 100.0)],
            &[50000.0, 50000.0, 50000.0],
        ));
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = Arc::new(CycleStateStore::new(&path));
        let executor = OrderExecutor::new(
            test_config().shared(),
            exchange,
            Arc::new(crate::notify::LogNotifier),
            Arc::new(crate::metrics::LogMetrics),
            store.clone(),
            Arc::new(History::new()),
        );

        executor.execute(&btc_fraction(0.2), true).await;
        assert!(store.load().monday_attempt_successful);
    }

    fn live_config() -> Config {
        let mut cfg = test_config();
        cfg.dry_run = false;
        cfg.order_timeout = Duration::from_millis(1);
        cfg
    }

    #[tokio::test]
    async fn live_unfilled_order_is_canceled_before_retry() {
        let exchange = Arc::new(StubExchange::new(
            &[("EUR", 100.0)],
            &[50000.0, 50000.0, 50000.0],
        ));
        let (executor, _dir) = make_executor(live_config(), exchange.clone());

        let outcome = executor.execute(&btc_fraction(0.2), false).await;
        assert_eq!(outcome, TerminalOutcome::RetriesExhausted { attempts: 3 });
        assert_eq!(exchange.orders_placed.load(Ordering::SeqCst), 3);
        // Every resting order was taken off the book before the next one.
        assert_eq!(exchange.cancels.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn failed_status_check_cancels_before_retrying() {
        let mut exchange = StubExchange::new(&[("EUR", 100.0)], &[50000.0, 50000.0, 50000.0]);
        exchange.status_checks_fail = true;
        let exchange = Arc::new(exchange);
        let (executor, _dir) = make_executor(live_config(), exchange.clone());

        let outcome = executor.execute(&btc_fraction(0.2), false).await;
        assert_eq!(outcome, TerminalOutcome::RetriesExhausted { attempts: 3 });
        // One cancel per placed order: no attempt retries over an
        // unresolved resting order.
        assert_eq!(exchange.orders_placed.load(Ordering::SeqCst), 3);
        assert_eq!(exchange.cancels.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unresolved_order_aborts_instead_of_stacking() {
        let mut exchange = StubExchange::new(&[("EUR", 100.0)], &[50000.0, 50000.0, 50000.0]);
        exchange.status_checks_fail = true;
        exchange.cancels_fail = true;
        let exchange = Arc::new(exchange);
        let (executor, _dir) = make_executor(live_config(), exchange.clone());

        let outcome = executor.execute(&btc_fraction(0.2), false).await;
        assert!(matches!(
            outcome,
            TerminalOutcome::Aborted(AbortReason::UnresolvedOrder { .. })
        ));
        // The run stops with the first order still in doubt rather than
        // placing more against the same balance.
        assert_eq!(exchange.orders_placed.load(Ordering::SeqCst), 1);
    }
}
