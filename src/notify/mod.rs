pub mod telegram;

pub use telegram::{TelegramListener, TelegramNotifier};

use async_trait::async_trait;
use tracing::{error, info, warn};

/// Severity of an outbound alert. Warning and above also reach the remote
/// channel; everything is logged locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Success,
    Warning,
    Error,
}

impl Level {
    pub fn prefix(&self) -> &'static str {
        match self {
            Level::Info => "",
            Level::Success => "✅ SUCCESS: ",
            Level::Warning => "⚠️ WARNING: ",
            Level::Error => "🚨 ERROR: ",
        }
    }
}

/// Delivery of human-readable alerts. Implementations are best-effort:
/// failures are logged, never returned.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &str, level: Level);
}

/// Fallback notifier when no remote channel is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, message: &str, level: Level) {
        match level {
            Level::Error => error!("{}", message),
            Level::Warning => warn!("{}", message),
            _ => info!("{}", message),
        }
    }
}
