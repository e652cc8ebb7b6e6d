use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::commands::parser::{self, AmountArg, Command, USAGE};
use crate::config::SharedConfig;
use crate::exchange::Exchange;
use crate::models::{AmountSpec, Asset, Currency, FundingCurrency, TradeInstruction};
use crate::schedule::SchedulingController;
use crate::state::CycleStateStore;
use crate::trading::{CurrencyConverter, History, TradeExecutor};

/// A staged, not-yet-executed action awaiting its confirmation command.
struct Pending<T> {
    payload: T,
    created_at: Instant,
    ttl: Duration,
}

impl<T> Pending<T> {
    fn new(payload: T, ttl: Duration) -> Self {
        Self {
            payload,
            created_at: Instant::now(),
            ttl,
        }
    }

    fn is_expired(&self) -> bool {
        self.created_at.elapsed() > self.ttl
    }
}

/// Two-phase commit over the remote command channel: risky commands are
/// staged per requester with a short expiry, and a separate confirmation
/// command executes the staged action exactly once. Everything else is
/// rejected with a user-visible reason.
pub struct ConfirmationGateway {
    cfg: SharedConfig,
    executors: HashMap<Asset, Arc<dyn TradeExecutor>>,
    converter: Arc<CurrencyConverter>,
    scheduler: Arc<Mutex<SchedulingController>>,
    exchange: Arc<dyn Exchange>,
    store: Arc<CycleStateStore>,
    history: Arc<History>,

    pending_trades: Mutex<HashMap<String, Pending<TradeInstruction>>>,
    pending_conversions: Mutex<HashMap<String, Pending<Option<f64>>>>,
    /// Process-wide cooldown against rapid-fire input.
    last_command: Mutex<Option<Instant>>,
}

impl ConfirmationGateway {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: SharedConfig,
        executors: HashMap<Asset, Arc<dyn TradeExecutor>>,
        converter: Arc<CurrencyConverter>,
        scheduler: Arc<Mutex<SchedulingController>>,
        exchange: Arc<dyn Exchange>,
        store: Arc<CycleStateStore>,
        history: Arc<History>,
    ) -> Self {
        Self {
            cfg,
            executors,
            converter,
            scheduler,
            exchange,
            store,
            history,
            pending_trades: Mutex::new(HashMap::new()),
            pending_conversions: Mutex::new(HashMap::new()),
            last_command: Mutex::new(None),
        }
    }

    /// Handle one raw command line and produce the reply text.
    pub async fn handle(&self, requester: &str, text: &str) -> String {
        // Authorization first: unauthorized requesters get one uniform
        // rejection regardless of whether the command would have parsed.
        if requester != self.cfg.telegram_chat_id {
            warn!("Rejected command from unauthorized requester {}", requester);
            return "Unauthorized.".to_string();
        }

        {
            let mut last = self.last_command.lock().await;
            if let Some(prev) = *last {
                if prev.elapsed() < self.cfg.command_cooldown {
                    return "Too many commands. Wait a moment and try again.".to_string();
                }
            }
            *last = Some(Instant::now());
        }

        let command = match parser::parse(text) {
            Ok(command) => command,
            Err(e) => return format!("{}\n\n{}", e, USAGE),
        };
        info!("Command from {}: {:?}", requester, command);

        match command {
            Command::Buy {
                asset,
                amount,
                currency,
            } => self.stage_buy(requester, asset, amount, currency).await,
            Command::Confirm => self.confirm_trade(requester).await,
            Command::ConfirmEur => self.confirm_conversion(requester).await,
            Command::ConvertEur { amount } => self.convert_eur(requester, amount).await,
            Command::Enable => {
                if self.scheduler.lock().await.enable() {
                    "Schedule enabled.".to_string()
                } else {
                    "Schedule is already enabled.".to_string()
                }
            }
            Command::Disable => {
                if self.scheduler.lock().await.disable() {
                    "Schedule disabled.".to_string()
                } else {
                    "Schedule is already disabled.".to_string()
                }
            }
            Command::Status => self.status().await,
            Command::Balance => self.balance().await,
            Command::Price => self.price().await,
            Command::History => {
                let lines = self.history.recent(10);
                if lines.is_empty() {
                    "No trades recorded yet.".to_string()
                } else {
                    lines.join("\n")
                }
            }
            Command::Help => USAGE.to_string(),
        }
    }

    async fn stage_buy(
        &self,
        requester: &str,
        asset: Asset,
        amount: Option<AmountArg>,
        currency: Option<Currency>,
    ) -> String {
        let funding = match currency {
            Some(currency) => FundingCurrency::Fixed(currency),
            None => FundingCurrency::Auto,
        };
        let amount_spec = match amount {
            None => AmountSpec::BalanceFraction(self.cfg.balance_fraction),
            Some(AmountArg::Absolute(value)) => AmountSpec::Absolute(value),
            Some(AmountArg::Percent(percent)) => AmountSpec::BalanceFraction(percent / 100.0),
        };
        let instruction = TradeInstruction::new(asset, funding, amount_spec);

        let description = match amount_spec {
            AmountSpec::Absolute(value) => format!("{:.2}", value),
            AmountSpec::BalanceFraction(fraction) => {
                format!("{:.0}% of balance", fraction * 100.0)
            }
            AmountSpec::MinimumOnly => "minimum quantity".to_string(),
        };

        let ttl = self.cfg.trade_confirmation_ttl;
        self.pending_trades
            .lock()
            .await
            .insert(requester.to_string(), Pending::new(instruction, ttl));

        format!(
            "Staged: buy {} using {}. Send 'confirm' within {}s to execute.",
            asset,
            description,
            ttl.as_secs()
        )
    }

    async fn confirm_trade(&self, requester: &str) -> String {
        let pending = self.pending_trades.lock().await.remove(requester);
        let pending = match pending {
            Some(pending) => pending,
            None => return "Nothing to confirm.".to_string(),
        };
        if pending.is_expired() {
            return "Confirmation expired. Stage the buy again.".to_string();
        }

        let instruction = pending.payload;
        let executor = match self.executors.get(&instruction.asset) {
            Some(executor) => executor.clone(),
            None => return format!("No executor registered for {}.", instruction.asset),
        };

        // Dispatch off the command path; outcome lines arrive as
        // notifications from the executor itself.
        let asset = instruction.asset;
        tokio::spawn(async move {
            executor.execute_trade(instruction).await;
        });
        format!("Confirmed. Executing {} buy...", asset)
    }

    async fn confirm_conversion(&self, requester: &str) -> String {
        let pending = self.pending_conversions.lock().await.remove(requester);
        let pending = match pending {
            Some(pending) => pending,
            None => return "No pending conversion to confirm.".to_string(),
        };
        if pending.is_expired() {
            return "Conversion confirmation expired. Stage it again.".to_string();
        }

        let converter = self.converter.clone();
        let amount = pending.payload;
        tokio::spawn(async move {
            if let Err(e) = converter.convert(amount).await {
                warn!("Confirmed conversion failed: {}", e);
            }
        });
        "Confirmed. Converting EUR...".to_string()
    }

    async fn convert_eur(&self, requester: &str, amount: Option<f64>) -> String {
        let effective = match amount {
            Some(amount) => amount,
            None => match self.exchange.fetch_balance().await {
                Ok(balances) => balances.get("EUR").copied().unwrap_or(0.0),
                Err(e) => return format!("Could not fetch balance: {}", e),
            },
        };

        if effective >= self.cfg.large_transaction_threshold {
            return self.stage_large_conversion(requester, amount, effective).await;
        }

        let converter = self.converter.clone();
        tokio::spawn(async move {
            if let Err(e) = converter.convert(amount).await {
                warn!("Conversion failed: {}", e);
            }
        });
        format!("Converting {:.2} EUR into USDC...", effective)
    }

    async fn stage_large_conversion(
        &self,
        requester: &str,
        amount: Option<f64>,
        effective: f64,
    ) -> String {
        let ttl = self.cfg.conversion_confirmation_ttl;
        self.pending_conversions
            .lock()
            .await
            .insert(requester.to_string(), Pending::new(amount, ttl));
        format!(
            "Conversion of {:.2} EUR exceeds the large-transaction threshold. \
             Send 'confirm_eur' within {}h to execute.",
            effective,
            ttl.as_secs() / 3600
        )
    }

    async fn status(&self) -> String {
        let mode = if self.cfg.test_mode {
            "TEST"
        } else if self.cfg.dry_run {
            "SIMULATED"
        } else {
            "LIVE"
        };
        let scheduler = self.scheduler.lock().await;
        let schedule = if scheduler.is_enabled() {
            format!("enabled ({} jobs)", scheduler.job_count())
        } else {
            "disabled".to_string()
        };
        let cycle = if self.store.load().monday_attempt_successful {
            "successful"
        } else {
            "pending"
        };
        format!(
            "Mode: {}\nSchedule: {}\nMonday attempt this week: {}",
            mode, schedule, cycle
        )
    }

    async fn balance(&self) -> String {
        let balances = match self.exchange.fetch_balance().await {
            Ok(balances) => balances,
            Err(e) => return format!("Could not fetch balance: {}", e),
        };
        let get = |code: &str| balances.get(code).copied().unwrap_or(0.0);
        format!(
            "EUR: {:.2}\nUSDC: {:.2}\n{}: {:.prec$}",
            get("EUR"),
            get("USDC"),
            self.cfg.asset,
            get(self.cfg.asset.code()),
            prec = self.cfg.asset.precision(),
        )
    }

    async fn price(&self) -> String {
        let pair = self.cfg.asset.pair(Currency::Eur);
        match self.exchange.fetch_ticker(&pair).await {
            Ok(ticker) => format!("{}: {:.2}", pair, ticker.last_price),
            Err(e) => format!("Could not fetch price: {}", e),
        }
    }

    /// Entry point for the hourly conversion job: large balances are staged
    /// under the allow-listed requester instead of converting outright.
    /// Returns the prompt to push to the operator.
    pub async fn stage_scheduled_conversion(&self, available: f64) -> String {
        let requester = self.cfg.telegram_chat_id.clone();
        self.stage_large_conversion(&requester, None, available).await
    }
}
