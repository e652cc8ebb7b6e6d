use std::sync::Arc;
use tracing::info;

use crate::config::SharedConfig;
use crate::exchange::{Exchange, ExchangeError};
use crate::models::Currency;
use crate::notify::{Level, Notifier};

/// Market-converts idle EUR into the trading currency (USDC). Invoked by
/// the hourly balance check and by `convert_eur`; large amounts only reach
/// this after passing the confirmation gateway.
pub struct CurrencyConverter {
    cfg: SharedConfig,
    exchange: Arc<dyn Exchange>,
    notifier: Arc<dyn Notifier>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConversionOutcome {
    Converted { amount_eur: f64, quantity: f64 },
    /// Balance (or requested amount) below the conversion minimum.
    Skipped { available: f64 },
}

impl CurrencyConverter {
    pub fn new(cfg: SharedConfig, exchange: Arc<dyn Exchange>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            cfg,
            exchange,
            notifier,
        }
    }

    /// Convert `amount` EUR (full available balance when omitted) into
    /// USDC with a market buy.
    pub async fn convert(&self, amount: Option<f64>) -> Result<ConversionOutcome, ExchangeError> {
        let balances = self.exchange.fetch_balance().await?;
        let available = balances
            .get(Currency::Eur.code())
            .copied()
            .unwrap_or(0.0);

        let amount_eur = amount.unwrap_or(available).min(available);
        if amount_eur < self.cfg.conversion_threshold {
            info!(
                "EUR balance {:.2} below conversion threshold {:.2}, skipping",
                amount_eur, self.cfg.conversion_threshold
            );
            return Ok(ConversionOutcome::Skipped { available });
        }

        let pair = "USDC/EUR";
        let price = self.exchange.fetch_ticker(pair).await?.last_price;
        if price <= 0.0 {
            return Err(ExchangeError::Protocol(format!(
                "non-positive {} price {}",
                pair, price
            )));
        }
        let quantity = amount_eur / price;

        if self.cfg.dry_run {
            info!(
                "SIMULATED: would convert {:.2} EUR into {:.2} USDC at {:.4}",
                amount_eur, quantity, price
            );
        } else {
            let order_id = self.exchange.create_market_buy_order(pair, quantity).await?;
            info!("Conversion order {} placed", order_id);
        }

        self.notifier
            .send(
                &format!(
                    "Converted {:.2} EUR into {:.2} USDC{}",
                    amount_eur,
                    quantity,
                    if self.cfg.dry_run { " (simulated)" } else { "" }
                ),
                Level::Success,
            )
            .await;

        Ok(ConversionOutcome::Converted {
            amount_eur,
            quantity,
        })
    }
}
