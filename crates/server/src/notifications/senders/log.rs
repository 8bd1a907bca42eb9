use async_trait::async_trait;
use tracing::info;

use super::{NotificationSender, SenderError};

/// Used when no admin chat is configured: messages only reach the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSender;

#[async_trait]
impl NotificationSender for LogSender {
    async fn send(&self, message: &str) -> Result<(), SenderError> {
        info!(target: "admin_notifications", "{message}");
        Ok(())
    }
}
