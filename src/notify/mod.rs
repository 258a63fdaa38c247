//! Collector notifications: tell a drop's creator who picked it up.

pub mod tokens;
pub mod transport;

use std::collections::BTreeMap;

use crate::drops::{DropWrite, RepositoryError};
use crate::users::DynUserDirectory;

pub use self::tokens::{DynTokenStore, SqliteTokenStore, TokenStore};
pub use self::transport::{
    DeliveryResult, LogPushTransport, PushPayload, PushTransport, INVALID_TOKEN_CODES,
    MAX_MULTICAST_TOKENS,
};

/// Label used when a collector's profile cannot be resolved.
pub const FALLBACK_LABEL: &str = "Someone";

pub const NOTIFICATION_TITLE: &str = "Your drop was picked up";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanoutReport {
    pub new_collectors: usize,
    pub tokens: usize,
    pub delivered: usize,
    pub failed: usize,
    pub pruned: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FanoutOutcome {
    NoNewCollectors,
    NoTokens,
    Sent(FanoutReport),
}

/// "Ana picked up your drop", "Ana and 2 others picked up your drop".
pub fn compose_body(first_label: &str, additional: usize) -> String {
    match additional {
        0 => format!("{} picked up your drop", first_label),
        1 => format!("{} and 1 other picked up your drop", first_label),
        n => format!("{} and {} others picked up your drop", first_label, n),
    }
}

pub struct NotificationFanout {
    users: DynUserDirectory,
    tokens: DynTokenStore,
    transport: std::sync::Arc<dyn PushTransport>,
    batch_size: usize,
}

impl NotificationFanout {
    pub fn new(
        users: DynUserDirectory,
        tokens: DynTokenStore,
        transport: std::sync::Arc<dyn PushTransport>,
        batch_size: usize,
    ) -> Self {
        Self {
            users,
            tokens,
            transport,
            batch_size: batch_size.clamp(1, MAX_MULTICAST_TOKENS),
        }
    }

    /// Document-write trigger for a drop.
    pub async fn on_drop_written(&self, write: &DropWrite) -> Result<FanoutOutcome, RepositoryError> {
        let new_collectors = write.new_collectors();
        let (Some(first), Some(after)) = (new_collectors.first(), write.after.as_ref()) else {
            return Ok(FanoutOutcome::NoNewCollectors);
        };

        let creator = after.created_by.as_str();
        let tokens = self.tokens.tokens_for(creator).await?;
        if tokens.is_empty() {
            tracing::debug!("Creator {} has no delivery tokens", creator);
            return Ok(FanoutOutcome::NoTokens);
        }

        let label = self.resolve_label(first).await;
        let payload = PushPayload {
            title: NOTIFICATION_TITLE.to_string(),
            body: compose_body(&label, new_collectors.len() - 1),
            data: BTreeMap::from([
                ("type".to_string(), "drop_collected".to_string()),
                ("dropId".to_string(), after.id.clone()),
                ("collectorId".to_string(), first.clone()),
            ]),
        };

        let mut report = FanoutReport {
            new_collectors: new_collectors.len(),
            tokens: tokens.len(),
            ..Default::default()
        };
        let mut invalid = Vec::new();

        for batch in tokens.chunks(self.batch_size) {
            match self.transport.send_multicast(batch, &payload).await {
                Ok(results) => {
                    for (token, result) in batch.iter().zip(results) {
                        match result {
                            DeliveryResult::Delivered => report.delivered += 1,
                            failure => {
                                report.failed += 1;
                                if failure.is_token_invalid() {
                                    invalid.push(token.clone());
                                } else if let DeliveryResult::Failed { code } = &failure {
                                    tracing::warn!("Delivery to a token of {} failed: {}", creator, code);
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("Multicast of {} token(s) failed: {}", batch.len(), e);
                    report.failed += batch.len();
                }
            }
        }

        if !invalid.is_empty() {
            match self.tokens.remove(creator, &invalid).await {
                Ok(removed) => {
                    report.pruned = removed;
                    tracing::info!("Pruned {} invalid token(s) for {}", removed, creator);
                }
                Err(e) => tracing::warn!("Failed to prune tokens for {}: {}", creator, e),
            }
        }

        tracing::info!(
            "Notified {} of {} new collector(s) on drop {}: {} delivered, {} failed",
            creator,
            report.new_collectors,
            after.id,
            report.delivered,
            report.failed
        );

        Ok(FanoutOutcome::Sent(report))
    }

    async fn resolve_label(&self, user_id: &str) -> String {
        match self.users.profile(user_id).await {
            Ok(profile) => profile
                .and_then(|p| p.label())
                .unwrap_or_else(|| FALLBACK_LABEL.to_string()),
            Err(e) => {
                tracing::warn!("Label lookup for {} failed: {}", user_id, e);
                FALLBACK_LABEL.to_string()
            }
        }
    }
}
