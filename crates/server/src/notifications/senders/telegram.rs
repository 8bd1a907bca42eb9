use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use super::{NotificationSender, SenderError};

/// A sender for pushing admin notifications via the Telegram Bot API.
pub struct TelegramSender {
    client: Client,
    bot_token: String,
    chat_id: String,
}

impl TelegramSender {
    pub fn new(bot_token: impl Into<String>, chat_id: impl Into<String>) -> Result<Self, SenderError> {
        let bot_token = bot_token.into();
        let chat_id = chat_id.into();
        if bot_token.trim().is_empty() || chat_id.trim().is_empty() {
            return Err(SenderError::InvalidConfiguration(
                "Telegram bot token and chat id must both be set.".to_string(),
            ));
        }
        Ok(Self {
            client: Client::new(),
            bot_token,
            chat_id,
        })
    }

    /// Escapes text for Telegram MarkdownV2.
    /// Characters to escape: _ * [ ] ( ) ~ ` > # + - = | { } . !
    fn escape_markdown_v2(text: &str) -> String {
        let mut escaped_text = String::with_capacity(text.len());
        for c in text.chars() {
            if matches!(
                c,
                '_' | '*' | '[' | ']' | '(' | ')' | '~' | '`' | '>' | '#' | '+' | '-' | '='
                    | '|' | '{' | '}' | '.' | '!' | '\\'
            ) {
                escaped_text.push('\\');
            }
            escaped_text.push(c);
        }
        escaped_text
    }
}

#[derive(Serialize)]
struct TelegramMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
    disable_notification: bool,
}

#[async_trait]
impl NotificationSender for TelegramSender {
    async fn send(&self, message: &str) -> Result<(), SenderError> {
        let api_url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);

        let escaped_message = Self::escape_markdown_v2(message);
        let payload = TelegramMessage {
            chat_id: &self.chat_id,
            text: &escaped_message,
            parse_mode: "MarkdownV2",
            disable_notification: true,
        };

        let response = self.client.post(&api_url).json(&payload).send().await?;
        let status = response.status();

        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            return Err(SenderError::SendFailed(format!(
                "Telegram API returned non-success status: {status}. Body: {error_body}"
            )));
        }

        Ok(())
    }
}
