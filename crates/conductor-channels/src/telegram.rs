use crate::notifier::{Notifier, TaskEvent};
use async_trait::async_trait;
use conductor_core::{ConductorError, ConductorResult};
use serde::{Deserialize, Serialize};

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Telegram Bot API notifier.
///
/// Sends one `sendMessage` per event to a fixed chat. Failed tasks carry an
/// inline keyboard with Retry and Dismiss buttons whose callback data is
/// `retry_<id>` / `dismiss_<id>`.
pub struct TelegramNotifier {
    bot_token: String,
    chat_id: String,
    api_base: String,
    client: reqwest::Client,
}

// ── Telegram API types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Serialize)]
struct InlineButton<'a> {
    text: &'a str,
    callback_data: &'a str,
}

#[derive(Debug, Serialize)]
struct InlineKeyboard<'a> {
    inline_keyboard: Vec<Vec<InlineButton<'a>>>,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<InlineKeyboard<'a>>,
}

// ── Implementation ──────────────────────────────────────────────────────────

impl TelegramNotifier {
    /// Create a notifier posting to `chat_id` with the given bot token.
    pub fn new(bot_token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
            chat_id: chat_id.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Points the notifier at a different API host (proxies, tests).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.bot_token, method)
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn notify(&self, event: &TaskEvent) -> ConductorResult<()> {
        let text = event.render_text();
        let actions = event.actions();
        let reply_markup = (!actions.is_empty()).then(|| InlineKeyboard {
            inline_keyboard: vec![actions
                .iter()
                .map(|a| InlineButton {
                    text: a.label,
                    callback_data: &a.payload,
                })
                .collect()],
        });

        let payload = SendMessageRequest {
            chat_id: &self.chat_id,
            text: &text,
            reply_markup,
        };

        let response = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&payload)
            .send()
            .await
            .map_err(|e| ConductorError::Channel(format!("Telegram send error: {e}")))?;

        let body: TelegramResponse = response
            .json()
            .await
            .map_err(|e| ConductorError::Channel(format!("Telegram parse error: {e}")))?;

        if !body.ok {
            return Err(ConductorError::Channel(format!(
                "Telegram sendMessage failed: {}",
                body.description.unwrap_or_default()
            )));
        }

        tracing::debug!(task_id = %event.task_id, "Telegram notification sent");
        Ok(())
    }
}
