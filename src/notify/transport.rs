use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::TransportError;

/// Upper bound on recipients per multicast call.
pub const MAX_MULTICAST_TOKENS: usize = 500;

/// Error codes meaning the token will never work again.
pub const INVALID_TOKEN_CODES: &[&str] = &[
    "messaging/invalid-registration-token",
    "messaging/registration-token-not-registered",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    pub data: BTreeMap<String, String>,
}

/// Per-token result of a multicast, in request order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryResult {
    Delivered,
    Failed { code: String },
}

impl DeliveryResult {
    pub fn is_token_invalid(&self) -> bool {
        match self {
            DeliveryResult::Delivered => false,
            DeliveryResult::Failed { code } => INVALID_TOKEN_CODES.contains(&code.as_str()),
        }
    }
}

/// External push delivery service.
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Deliver `payload` to every token; `tokens.len()` never exceeds
    /// [`MAX_MULTICAST_TOKENS`].
    async fn send_multicast(
        &self,
        tokens: &[String],
        payload: &PushPayload,
    ) -> Result<Vec<DeliveryResult>, TransportError>;
}

/// Transport that only logs; the server's default when no push provider is wired in.
pub struct LogPushTransport;

#[async_trait]
impl PushTransport for LogPushTransport {
    async fn send_multicast(
        &self,
        tokens: &[String],
        payload: &PushPayload,
    ) -> Result<Vec<DeliveryResult>, TransportError> {
        tracing::info!(
            "push to {} token(s): {} - {}",
            tokens.len(),
            payload.title,
            payload.body
        );
        Ok(vec![DeliveryResult::Delivered; tokens.len()])
    }
}
