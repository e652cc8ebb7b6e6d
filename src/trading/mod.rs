pub mod conversion;
pub mod cycle;
pub mod executor;

pub use conversion::CurrencyConverter;
pub use cycle::WeeklyCycle;
pub use executor::{AbortReason, OrderExecutor, TerminalOutcome};

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::models::TradeInstruction;

/// Dispatch seam between the command gateway and order execution. The
/// gateway resolves one of these per command kind instead of hard-wiring
/// per-asset buy functions.
#[async_trait]
pub trait TradeExecutor: Send + Sync {
    async fn execute_trade(&self, instruction: TradeInstruction) -> TerminalOutcome;
}

const HISTORY_CAPACITY: usize = 50;

/// In-memory record of recent trade outcomes, served by the `history`
/// command. Not persisted.
#[derive(Default)]
pub struct History {
    lines: Mutex<VecDeque<String>>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, line: String) {
        let mut lines = self.lines.lock().unwrap();
        if lines.len() == HISTORY_CAPACITY {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    pub fn recent(&self, count: usize) -> Vec<String> {
        let lines = self.lines.lock().unwrap();
        lines.iter().rev().take(count).rev().cloned().collect()
    }
}
