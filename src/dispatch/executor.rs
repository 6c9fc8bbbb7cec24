//! Executor capability: the platform-specific send mechanism.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::info;

use super::action::Action;
use crate::error::DeliveryError;

/// Performs one concrete send. Implementations live outside the core;
/// the dispatcher only ever sees this trait.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, action: Action) -> Result<(), DeliveryError>;
}

/// Decode the base64 image payloads of a photo action, in order.
///
/// Returns an empty list for text actions. A payload that does not decode
/// fails the whole action.
pub fn decode_images(action: &Action) -> Result<Vec<Vec<u8>>, DeliveryError> {
    let payloads: &[String] = match action {
        Action::SendText { .. } => &[],
        Action::SendPhoto { image, .. } => std::slice::from_ref(image),
        Action::SendPhotoSet { images, .. } => images,
    };
    payloads
        .iter()
        .enumerate()
        .map(|(index, b64)| {
            STANDARD
                .decode(b64.trim())
                .map_err(|e| DeliveryError::InvalidImage {
                    index,
                    reason: e.to_string(),
                })
        })
        .collect()
}

/// Dry-run executor: logs each action and reports success.
///
/// Used by the binary on hosts without a platform send mechanism. Image
/// payloads are decoded as a real send would, so bad base64 still fails.
#[derive(Debug, Default)]
pub struct LoggingExecutor;

#[async_trait]
impl Executor for LoggingExecutor {
    async fn execute(&self, action: Action) -> Result<(), DeliveryError> {
        match &action {
            Action::SendText {
                referer,
                chat_id,
                text,
            } => info!(chat_id, referer = %referer, len = text.len(), "Dry-run text send"),
            Action::SendPhoto { chat_id, .. } | Action::SendPhotoSet { chat_id, .. } => {
                let images = decode_images(&action)?;
                let bytes: usize = images.iter().map(Vec::len).sum();
                info!(
                    chat_id,
                    kind = action.kind(),
                    count = images.len(),
                    bytes,
                    "Dry-run photo send"
                )
            }
        }
        Ok(())
    }
}
