use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::commands::IncomingCommand;
use crate::notify::{Level, Notifier};

const API_URL: &str = "https://api.telegram.org";
const POLL_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
struct UpdatesResponse {
    ok: bool,
    #[serde(default)]
    result: Vec<Update>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    chat: Chat,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

/// Outbound alerts to a single Telegram chat.
pub struct TelegramNotifier {
    client: Client,
    token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(token: &str, chat_id: &str) -> Self {
        Self {
            client: Client::new(),
            token: token.to_string(),
            chat_id: chat_id.to_string(),
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, message: &str, level: Level) {
        match level {
            Level::Error => tracing::error!("{}", message),
            Level::Warning => warn!("{}", message),
            _ => info!("{}", message),
        }

        let text = format!("{}{}", level.prefix(), message);
        let result = self
            .client
            .post(format!("{}/bot{}/sendMessage", API_URL, self.token))
            .json(&serde_json::json!({
                "chat_id": self.chat_id,
                "text": text,
            }))
            .send()
            .await;

        // Delivery is best-effort: a lost alert never aborts trading.
        match result {
            Ok(resp) if !resp.status().is_success() => {
                warn!("Telegram sendMessage failed: {}", resp.status());
            }
            Err(e) => warn!("Telegram sendMessage error: {}", e),
            _ => debug!("Telegram notification sent ({} chars)", text.len()),
        }
    }
}

/// Long-polls getUpdates and enqueues raw command lines. Parsing,
/// authorization, and dispatch all happen on the receiving side; this task
/// must never block the scheduler.
pub struct TelegramListener {
    client: Client,
    token: String,
    offset: i64,
}

impl TelegramListener {
    pub fn new(token: &str) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 10))
                .build()
                .unwrap_or_default(),
            token: token.to_string(),
            offset: 0,
        }
    }

    pub async fn run(mut self, tx: mpsc::Sender<IncomingCommand>) {
        info!("Telegram listener started");
        // Commands queued while the process was down are stale; skip them
        // instead of replaying them against the fresh process.
        if let Err(e) = self.drop_backlog().await {
            warn!("Could not drop queued updates: {}", e);
        }
        loop {
            match self.poll_once().await {
                Ok(commands) => {
                    for cmd in commands {
                        if tx.send(cmd).await.is_err() {
                            info!("Command channel closed, stopping listener");
                            return;
                        }
                    }
                }
                Err(e) => {
                    warn!("Telegram poll error: {}", e);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        }
    }

    /// Fetch the newest queued update (if any) and advance the offset past
    /// it, discarding everything that accumulated while we were not running.
    async fn drop_backlog(&mut self) -> Result<(), reqwest::Error> {
        let resp: UpdatesResponse = self
            .client
            .get(format!("{}/bot{}/getUpdates", API_URL, self.token))
            .query(&[("timeout", "0".to_string()), ("offset", "-1".to_string())])
            .send()
            .await?
            .json()
            .await?;

        if resp.ok && self.skip_past(&resp.result) {
            info!("Dropped queued updates up to offset {}", self.offset);
        }
        Ok(())
    }

    /// Advance the offset past `updates`. Returns true when it moved.
    fn skip_past(&mut self, updates: &[Update]) -> bool {
        match updates.last() {
            Some(last) => {
                self.offset = self.offset.max(last.update_id + 1);
                true
            }
            None => false,
        }
    }

    async fn poll_once(&mut self) -> Result<Vec<IncomingCommand>, reqwest::Error> {
        let resp: UpdatesResponse = self
            .client
            .get(format!("{}/bot{}/getUpdates", API_URL, self.token))
            .query(&[
                ("timeout", POLL_TIMEOUT_SECS.to_string()),
                ("offset", self.offset.to_string()),
            ])
            .send()
            .await?
            .json()
            .await?;

        let mut commands = Vec::new();
        if !resp.ok {
            return Ok(commands);
        }

        for update in resp.result {
            self.offset = self.offset.max(update.update_id + 1);
            if let Some(message) = update.message {
                if let Some(text) = message.text {
                    commands.push(IncomingCommand {
                        requester: message.chat.id.to_string(),
                        text,
                    });
                }
            }
        }
        Ok(commands)
    }
}
