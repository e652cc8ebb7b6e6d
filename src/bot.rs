use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use kraken_dca_bot::commands::{ConfirmationGateway, IncomingCommand};
use kraken_dca_bot::config::SharedConfig;
use kraken_dca_bot::exchange::Exchange;
use kraken_dca_bot::models::{AmountSpec, FundingCurrency, TradeInstruction};
use kraken_dca_bot::notify::{Level, Notifier};
use kraken_dca_bot::schedule::{JobKind, SchedulingController};
use kraken_dca_bot::state::CycleStateStore;
use kraken_dca_bot::trading::{CurrencyConverter, WeeklyCycle};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// The single scheduling/execution task. The Telegram listener runs
/// separately and only enqueues raw command lines onto `rx`.
pub struct DcaBot {
    cfg: SharedConfig,
    exchange: Arc<dyn Exchange>,
    cycle: Arc<WeeklyCycle>,
    converter: Arc<CurrencyConverter>,
    gateway: Arc<ConfirmationGateway>,
    scheduler: Arc<Mutex<SchedulingController>>,
    store: Arc<CycleStateStore>,
    notifier: Arc<dyn Notifier>,
    rx: mpsc::Receiver<IncomingCommand>,
}

impl DcaBot {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: SharedConfig,
        exchange: Arc<dyn Exchange>,
        cycle: Arc<WeeklyCycle>,
        converter: Arc<CurrencyConverter>,
        gateway: Arc<ConfirmationGateway>,
        scheduler: Arc<Mutex<SchedulingController>>,
        store: Arc<CycleStateStore>,
        notifier: Arc<dyn Notifier>,
        rx: mpsc::Receiver<IncomingCommand>,
    ) -> Self {
        Self {
            cfg,
            exchange,
            cycle,
            converter,
            gateway,
            scheduler,
            store,
            notifier,
            rx,
        }
    }

    pub async fn run(&mut self) -> Result<()> {
        let cfg = &self.cfg;
        info!("{}", "=".repeat(60));
        info!("Kraken DCA bot starting up");
        info!("Mode: {}", if cfg.dry_run { "SIMULATED" } else { "LIVE" });
        info!("Asset: {} (min quantity {})", cfg.asset, cfg.min_quantity);
        info!(
            "Schedule: Monday {} / Sunday {} ({})",
            cfg.monday_time, cfg.sunday_time, cfg.timezone
        );
        info!(
            "Weekly flag: {}",
            if self.store.load().monday_attempt_successful {
                "Monday attempt already successful"
            } else {
                "no successful attempt this week"
            }
        );
        info!("{}", "=".repeat(60));

        self.notifier
            .send(
                "Bot is ready. Send 'help' for the command list.",
                Level::Info,
            )
            .await;

        let mut tick = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    self.shutdown().await;
                    return Ok(());
                }
                Some(cmd) = self.rx.recv() => {
                    let reply = self.gateway.handle(&cmd.requester, &cmd.text).await;
                    self.notifier.send(&reply, Level::Info).await;
                }
                _ = tick.tick() => {
                    self.run_due_jobs().await;
                }
            }
        }
    }

    async fn run_due_jobs(&self) {
        let due = self.scheduler.lock().await.due(Utc::now());
        for kind in due {
            match kind {
                JobKind::PrimaryBuy => self.primary_buy().await,
                JobKind::FallbackBuy => self.fallback_buy().await,
                JobKind::ConversionCheck => self.conversion_check().await,
            }
        }
    }

    fn scheduled_instruction(&self) -> TradeInstruction {
        TradeInstruction::new(
            self.cfg.asset,
            FundingCurrency::Auto,
            AmountSpec::BalanceFraction(self.cfg.balance_fraction),
        )
        .with_min_quantity(self.cfg.min_quantity)
    }

    async fn primary_buy(&self) {
        self.cycle.primary_run(&self.scheduled_instruction()).await;
    }

    async fn fallback_buy(&self) {
        self.cycle.fallback_run(&self.scheduled_instruction()).await;
    }

    async fn conversion_check(&self) {
        let available = match self.exchange.fetch_balance().await {
            Ok(balances) => balances.get("EUR").copied().unwrap_or(0.0),
            Err(e) => {
                warn!("Conversion check could not fetch balance: {}", e);
                return;
            }
        };
        if available < self.cfg.conversion_threshold {
            return;
        }

        if available >= self.cfg.large_transaction_threshold {
            let prompt = self.gateway.stage_scheduled_conversion(available).await;
            self.notifier.send(&prompt, Level::Warning).await;
            return;
        }

        if let Err(e) = self.converter.convert(None).await {
            warn!("Scheduled conversion failed: {}", e);
        }
    }

    async fn shutdown(&self) {
        info!("Shutting down...");
        // Bounded grace: the farewell may be dropped, the process must not
        // hang on a dead network.
        let farewell = tokio::time::timeout(
            SHUTDOWN_GRACE,
            self.notifier.send("Bot shutting down.", Level::Info),
        );
        if farewell.await.is_err() {
            warn!("Shutdown notification timed out");
        }
        info!("Bot stopped.");
    }
}
