use std::sync::Arc;
use tracing::info;

use crate::models::TradeInstruction;
use crate::notify::{Level, Notifier};
use crate::state::{CycleStateStore, WeeklyCycleState};
use crate::trading::{OrderExecutor, TerminalOutcome};

/// Weekly primary/fallback pair around the executor. The primary run opens
/// a fresh cycle; the fallback is idempotent against a primary that already
/// filled.
pub struct WeeklyCycle {
    executor: Arc<OrderExecutor>,
    store: Arc<CycleStateStore>,
    notifier: Arc<dyn Notifier>,
}

impl WeeklyCycle {
    pub fn new(
        executor: Arc<OrderExecutor>,
        store: Arc<CycleStateStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            executor,
            store,
            notifier,
        }
    }

    /// Monday run: clear the flag before attempting, so a crash between
    /// reset and fill leaves the fallback armed.
    pub async fn primary_run(&self, instruction: &TradeInstruction) -> TerminalOutcome {
        info!("Starting Monday order attempt");
        self.store.save(&WeeklyCycleState {
            monday_attempt_successful: false,
        });
        self.executor.execute(instruction, true).await
    }

    /// Sunday run: a no-op when the primary already succeeded this week.
    pub async fn fallback_run(&self, instruction: &TradeInstruction) -> Option<TerminalOutcome> {
        if self.store.load().monday_attempt_successful {
            let msg = "Monday attempt was successful, skipping Sunday fallback";
            info!("{}", msg);
            self.notifier.send(msg, Level::Info).await;
            return None;
        }
        info!("Monday attempt was not successful, running Sunday fallback");
        Some(self.executor.execute(instruction, true).await)
    }
}
