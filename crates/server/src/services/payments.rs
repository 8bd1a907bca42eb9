use awgbot_common::PeerName;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tracing::info;

use super::errors::LifecycleError;
use super::lifecycle::{LifecycleManager, PeerHandle, ProvisionRequest};
use crate::notifications::PeerEvent;

/// What a payment provider reports once a purchase clears.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PaymentSucceeded {
    pub peer_name: String,
    pub days: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    Extended { expires_at: DateTime<Utc> },
    /// The peer never expires; nothing to extend.
    AlreadyUnlimited,
    Provisioned(PeerHandle),
}

impl LifecycleManager {
    /// Extends an existing peer by the paid days, counted from its current
    /// expiry when that is still in the future. Unknown names get a new peer
    /// with that lifetime and no traffic limit.
    pub async fn on_payment_succeeded(
        &self,
        payment: PaymentSucceeded,
    ) -> Result<PaymentOutcome, LifecycleError> {
        let name = PeerName::parse(&payment.peer_name)?;
        if payment.days == 0 {
            return Err(LifecycleError::InvalidRequest(
                "a payment must cover at least one day".to_string(),
            ));
        }
        let paid = Duration::days(i64::from(payment.days));

        {
            let _guard = self.locks.lock(&name).await;
            if let Some(mut record) = self.store.load(&name).await? {
                let Some(current) = record.expires_at else {
                    info!(peer = %name, days = payment.days, "Payment for a peer without expiry.");
                    return Ok(PaymentOutcome::AlreadyUnlimited);
                };
                let expires_at = current
                    .max(Utc::now())
                    .checked_add_signed(paid)
                    .ok_or_else(|| {
                        LifecycleError::InvalidRequest("lifetime is out of range".to_string())
                    })?;
                record.expires_at = Some(expires_at);
                self.apply_expiry(&record).await?;
                info!(peer = %name, days = payment.days, expires_at = %expires_at, "Payment extended peer.");
                self.notifier
                    .notify(PeerEvent::ExpiryExtended {
                        name: name.clone(),
                        expires_at,
                    })
                    .await;
                return Ok(PaymentOutcome::Extended { expires_at });
            }
        }

        let handle = self
            .provision(ProvisionRequest {
                name: payment.peer_name,
                lifetime: Some(paid),
                quota: None,
                ipv6: false,
            })
            .await?;
        Ok(PaymentOutcome::Provisioned(handle))
    }
}
