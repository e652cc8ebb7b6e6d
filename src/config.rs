use anyhow::Result;
use chrono::NaiveTime;
use chrono_tz::Tz;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::models::Asset;

pub type SharedConfig = Arc<Config>;

#[derive(Debug, Clone)]
pub struct Config {
    // Exchange
    pub kraken_api_key: String,
    pub kraken_api_secret: String,
    pub asset: Asset,
    /// Minimum tradable quantity for the scheduled asset.
    pub min_quantity: f64,

    // Sizing
    /// Fraction of the funding balance to spend, in [0, 1].
    pub balance_fraction: f64,
    /// Funding currencies below this balance are not usable.
    pub min_funding_balance: f64,
    /// Bid level the limit price is pegged to (1 = best bid).
    pub bid_depth: usize,

    // Retry policy
    pub order_timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,

    // Weekly schedule
    pub monday_time: NaiveTime,
    pub sunday_time: NaiveTime,
    pub timezone: Tz,

    // Conversion
    /// EUR balances below this are never converted.
    pub conversion_threshold: f64,
    /// Conversions at or above this amount require explicit confirmation.
    pub large_transaction_threshold: f64,

    // Command gateway
    pub command_cooldown: Duration,
    pub trade_confirmation_ttl: Duration,
    pub conversion_confirmation_ttl: Duration,

    // Telegram
    pub telegram_enabled: bool,
    pub telegram_token: String,
    /// The single chat id allowed to issue commands.
    pub telegram_chat_id: String,

    // Modes
    pub dry_run: bool,
    pub test_mode: bool,

    // Persistence & logging
    pub state_file: String,
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let env = |key: &str, default: &str| -> String {
            std::env::var(key).unwrap_or_else(|_| default.to_string())
        };

        let asset = match env("TRADING_ASSET", "BTC").to_ascii_uppercase().as_str() {
            "ETH" => Asset::Eth,
            "SOL" => Asset::Sol,
            "USDC" => Asset::Usdc,
            _ => Asset::Btc,
        };

        let parse_time = |s: String| -> NaiveTime {
            NaiveTime::parse_from_str(&s, "%H:%M")
                .unwrap_or_else(|_| NaiveTime::from_hms_opt(2, 0, 0).unwrap())
        };

        Config {
            kraken_api_key: env("KRAKEN_API_KEY", ""),
            kraken_api_secret: env("KRAKEN_API_SECRET", ""),
            asset,
            min_quantity: env("MIN_TRADE_QUANTITY", "")
                .parse()
                .unwrap_or_else(|_| asset.min_quantity()),
            balance_fraction: env("BALANCE_PERCENTAGE", "20").parse().unwrap_or(20.0) / 100.0,
            min_funding_balance: env("MIN_FUNDING_BALANCE", "10").parse().unwrap_or(10.0),
            bid_depth: env("BID_DEPTH", "3").parse().unwrap_or(3),
            order_timeout: Duration::from_secs(
                env("ORDER_TIMEOUT_MINUTES", "5").parse().unwrap_or(5) * 60,
            ),
            max_retries: env("MAX_RETRIES", "10").parse().unwrap_or(10),
            retry_delay: Duration::from_secs(env("RETRY_DELAY_SECONDS", "5").parse().unwrap_or(5)),
            monday_time: parse_time(env("MONDAY_TIME", "02:00")),
            sunday_time: parse_time(env("SUNDAY_TIME", "02:00")),
            timezone: Tz::from_str(&env("SCHEDULE_TZ", "UTC")).unwrap_or(Tz::UTC),
            conversion_threshold: env("CONVERSION_THRESHOLD", "10").parse().unwrap_or(10.0),
            large_transaction_threshold: env("LARGE_TRANSACTION_THRESHOLD", "500")
                .parse()
                .unwrap_or(500.0),
            command_cooldown: Duration::from_secs(
                env("COMMAND_COOLDOWN_SECONDS", "2").parse().unwrap_or(2),
            ),
            trade_confirmation_ttl: Duration::from_secs(
                env("TRADE_CONFIRM_TTL_SECONDS", "30").parse().unwrap_or(30),
            ),
            conversion_confirmation_ttl: Duration::from_secs(
                env("CONVERT_CONFIRM_TTL_HOURS", "4").parse().unwrap_or(4) * 3600,
            ),
            telegram_enabled: env("TELEGRAM_ENABLED", "false").to_lowercase() == "true",
            telegram_token: env("TELEGRAM_BOT_TOKEN", ""),
            telegram_chat_id: env("TELEGRAM_CHAT_ID", ""),
            dry_run: env("DRY_RUN", "true").to_lowercase() == "true",
            test_mode: env("TEST_MODE", "false").to_lowercase() == "true",
            state_file: env("STATE_FILE", "bot_state.json"),
            log_level: env("LOG_LEVEL", "info"),
        }
    }

    /// Startup validation. Missing credentials are fatal, not deferred to
    /// the first failing request.
    pub fn validate(&self) -> Result<()> {
        if !self.dry_run && (self.kraken_api_key.is_empty() || self.kraken_api_secret.is_empty()) {
            anyhow::bail!("KRAKEN_API_KEY and KRAKEN_API_SECRET must be set for live trading");
        }
        if self.telegram_enabled {
            if self.telegram_token.is_empty() {
                anyhow::bail!("TELEGRAM_BOT_TOKEN must be set when Telegram is enabled");
            }
            if self.telegram_chat_id.is_empty() {
                anyhow::bail!("TELEGRAM_CHAT_ID must be set when Telegram is enabled");
            }
        }
        if self.bid_depth == 0 {
            anyhow::bail!("BID_DEPTH must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.balance_fraction) {
            anyhow::bail!("BALANCE_PERCENTAGE must be between 0 and 100");
        }
        Ok(())
    }

    pub fn shared(self) -> SharedConfig {
        Arc::new(self)
    }
}
