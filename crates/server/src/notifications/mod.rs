use awgbot_common::units::humanize_bytes;
use awgbot_common::PeerName;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error};

pub mod senders;

pub use senders::{log::LogSender, telegram::TelegramSender, NotificationSender, SenderError};

use crate::server::config::ServerConfig;
use crate::services::DeactivationReason;

/// Something the admin must hear about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    Provisioned {
        name: PeerName,
        expires_at: Option<DateTime<Utc>>,
        quota: Option<u64>,
    },
    Deactivated {
        name: PeerName,
        reason: DeactivationReason,
    },
    /// Deactivation ran but part of the cleanup failed.
    CleanupFailed {
        name: PeerName,
        error: String,
    },
    ExpiryExtended {
        name: PeerName,
        expires_at: DateTime<Utc>,
    },
    Renamed {
        name: PeerName,
        public_key: String,
    },
    /// Stored traffic totals were unreadable and restarted from zero.
    TrafficReset {
        name: PeerName,
    },
    /// New keys could not be installed; the old ones stay in place.
    ReissueFailed {
        name: PeerName,
        error: String,
    },
    EnvironmentFailure {
        error: String,
    },
}

impl PeerEvent {
    pub fn render(&self) -> String {
        match self {
            PeerEvent::Provisioned { name, expires_at, quota } => {
                let lifetime = match expires_at {
                    Some(at) => format!("expires {}", at.format("%Y-%m-%d %H:%M UTC")),
                    None => "unlimited lifetime".to_string(),
                };
                let limit = match quota {
                    Some(bytes) => format!("traffic limit {}", humanize_bytes(*bytes)),
                    None => "unlimited traffic".to_string(),
                };
                format!("Peer {name} added: {lifetime}, {limit}.")
            }
            PeerEvent::Deactivated { name, reason } => {
                format!("Peer {name} was deactivated: {reason}.")
            }
            PeerEvent::CleanupFailed { name, error } => {
                format!("Peer {name} was only partly removed: {error}")
            }
            PeerEvent::ExpiryExtended { name, expires_at } => format!(
                "Peer {name} extended until {}.",
                expires_at.format("%Y-%m-%d %H:%M UTC")
            ),
            PeerEvent::Renamed { name, public_key } => {
                format!("Interface peer {public_key} renamed to {name}.")
            }
            PeerEvent::TrafficReset { name } => format!(
                "Traffic counters of peer {name} were unreadable and restarted from zero; its quota usage is lost."
            ),
            PeerEvent::ReissueFailed { name, error } => {
                format!("Key reissue for peer {name} failed, the old keys stay active: {error}")
            }
            PeerEvent::EnvironmentFailure { error } => {
                format!("AmneziaVPN must be initialised before the bot can start: {error}")
            }
        }
    }
}

/// Formats [`PeerEvent`]s for the admin channel. Delivery failures are logged
/// and never reach the caller.
#[derive(Clone)]
pub struct AdminNotifier {
    sender: Arc<dyn NotificationSender>,
}

impl AdminNotifier {
    pub fn new(sender: Arc<dyn NotificationSender>) -> Self {
        Self { sender }
    }

    /// Telegram when both credentials are configured, the log otherwise.
    pub fn from_config(config: &ServerConfig) -> Result<Self, SenderError> {
        let sender: Arc<dyn NotificationSender> =
            match (&config.telegram_bot_token, &config.admin_chat_id) {
                (Some(token), Some(chat_id)) => Arc::new(TelegramSender::new(token, chat_id)?),
                _ => Arc::new(LogSender),
            };
        Ok(Self::new(sender))
    }

    pub async fn notify(&self, event: PeerEvent) {
        let message = event.render();
        match self.sender.send(&message).await {
            Ok(()) => debug!(message = %message, "Admin notified."),
            Err(e) => error!(error = %e, message = %message, "Failed to deliver admin notification."),
        }
    }
}
