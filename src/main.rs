mod bot;

use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use kraken_dca_bot::commands::ConfirmationGateway;
use kraken_dca_bot::config::Config;
use kraken_dca_bot::exchange::{Exchange, KrakenClient};
use kraken_dca_bot::metrics::LogMetrics;
use kraken_dca_bot::models::{AmountSpec, Asset, FundingCurrency, TradeInstruction};
use kraken_dca_bot::notify::{LogNotifier, Notifier, TelegramListener, TelegramNotifier};
use kraken_dca_bot::schedule::SchedulingController;
use kraken_dca_bot::state::CycleStateStore;
use kraken_dca_bot::trading::{
    CurrencyConverter, History, OrderExecutor, TradeExecutor, WeeklyCycle,
};

use crate::bot::DcaBot;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cfg.log_level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .init();

    cfg.validate()?;
    let cfg = cfg.shared();

    let exchange: Arc<dyn Exchange> = Arc::new(KrakenClient::new(&cfg));
    let notifier: Arc<dyn Notifier> = if cfg.telegram_enabled {
        Arc::new(TelegramNotifier::new(
            &cfg.telegram_token,
            &cfg.telegram_chat_id,
        ))
    } else {
        Arc::new(LogNotifier)
    };
    let store = Arc::new(CycleStateStore::new(&cfg.state_file));
    let history = Arc::new(History::new());

    let executor = Arc::new(OrderExecutor::new(
        cfg.clone(),
        exchange.clone(),
        notifier.clone(),
        Arc::new(LogMetrics),
        store.clone(),
        history.clone(),
    ));
    let converter = Arc::new(CurrencyConverter::new(
        cfg.clone(),
        exchange.clone(),
        notifier.clone(),
    ));

    if cfg.test_mode {
        // One real purchase of exactly the minimum quantity, then exit.
        info!("TEST MODE: buying the minimum quantity once");
        let instruction =
            TradeInstruction::new(cfg.asset, FundingCurrency::Auto, AmountSpec::MinimumOnly)
                .with_min_quantity(cfg.min_quantity);
        executor.execute(&instruction, false).await;
        return Ok(());
    }

    if cfg.dry_run {
        info!("Running in dry-run mode: executing once immediately");
        let instruction = TradeInstruction::new(
            cfg.asset,
            FundingCurrency::Auto,
            AmountSpec::BalanceFraction(cfg.balance_fraction),
        )
        .with_min_quantity(cfg.min_quantity);
        executor.execute(&instruction, false).await;
        info!("Dry run completed");
        return Ok(());
    }

    let scheduler = Arc::new(Mutex::new(SchedulingController::new(&cfg)));
    let cycle = Arc::new(WeeklyCycle::new(
        executor.clone(),
        store.clone(),
        notifier.clone(),
    ));

    // One generic executor serves every asset the command surface knows.
    let trade_executor: Arc<dyn TradeExecutor> = executor.clone();
    let executors: HashMap<Asset, Arc<dyn TradeExecutor>> = Asset::all()
        .into_iter()
        .map(|asset| (asset, trade_executor.clone()))
        .collect();

    let gateway = Arc::new(ConfirmationGateway::new(
        cfg.clone(),
        executors,
        converter.clone(),
        scheduler.clone(),
        exchange.clone(),
        store.clone(),
        history.clone(),
    ));

    let (tx, rx) = mpsc::channel(32);
    if cfg.telegram_enabled {
        let listener = TelegramListener::new(&cfg.telegram_token);
        tokio::spawn(listener.run(tx));
    }

    let mut bot = DcaBot::new(
        cfg,
        exchange,
        cycle,
        converter,
        gateway,
        scheduler,
        store,
        notifier,
        rx,
    );
    bot.run().await?;

    Ok(())
}
