//! Content decryption capability.
//!
//! The chat application stores message bodies encrypted per user. The cipher
//! itself lives outside the gateway; this module defines the seam and the row
//! post-processing `/query` applies through it.

use async_trait::async_trait;
use tracing::debug;

use crate::error::DecryptError;
use crate::store::Row;

/// Decrypts one base64 ciphertext for a given encryption type and user.
#[async_trait]
pub trait Decryptor: Send + Sync {
    async fn decrypt(
        &self,
        enc: i64,
        b64_ciphertext: &str,
        user_id: i64,
    ) -> Result<String, DecryptError>;
}

/// Columns that hold encrypted content in chat log rows.
const ENCRYPTED_COLUMNS: &[&str] = &["message", "attachment"];

/// Decrypt the content columns of a chat log row in place.
///
/// Rows without a `v` column carrying an `enc` field, or without a
/// `user_id`, are left untouched. A column that fails to decrypt keeps its
/// original value.
pub async fn decrypt_row(decryptor: &dyn Decryptor, mut row: Row) -> Row {
    let Some(enc) = row.get("v").and_then(encryption_type) else {
        return row;
    };
    let Some(user_id) = row.get("user_id").and_then(as_i64) else {
        return row;
    };

    for column in ENCRYPTED_COLUMNS {
        let cipher = match row.get(*column) {
            Some(serde_json::Value::String(s)) if !s.is_empty() && s != "{}" => s.clone(),
            _ => continue,
        };
        match decryptor.decrypt(enc, &cipher, user_id).await {
            Ok(plain) => {
                row.insert((*column).to_string(), serde_json::Value::String(plain));
            }
            Err(e) => debug!(column, error = %e, "Leaving column encrypted"),
        }
    }
    row
}

/// `v` is stored as JSON text, e.g. `{"enc":31,"origin":"MSG"}`.
fn encryption_type(v: &serde_json::Value) -> Option<i64> {
    let parsed: serde_json::Value = match v {
        serde_json::Value::String(s) => serde_json::from_str(s).ok()?,
        other => other.clone(),
    };
    parsed.get("enc").and_then(as_i64)
}

fn as_i64(v: &serde_json::Value) -> Option<i64> {
    match v {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Reverses the ciphertext; fails for user 0.
    struct ReverseDecryptor;

    #[async_trait]
    impl Decryptor for ReverseDecryptor {
        async fn decrypt(&self, enc: i64, b64: &str, user_id: i64) -> Result<String, DecryptError> {
            if user_id == 0 {
                return Err(DecryptError::Failed("no key".into()));
            }
            Ok(format!("{enc}:{}", b64.chars().rev().collect::<String>()))
        }
    }

    fn row(value: serde_json::Value) -> Row {
        value.as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn decrypts_message_and_attachment() {
        let input = row(json!({
            "v": "{\"enc\":31}",
            "user_id": "99",
            "message": "cba",
            "attachment": "zyx",
        }));
        let out = decrypt_row(&ReverseDecryptor, input).await;
        assert_eq!(out["message"], json!("31:abc"));
        assert_eq!(out["attachment"], json!("31:xyz"));
    }

    #[tokio::test]
    async fn rows_without_metadata_pass_through() {
        let input = row(json!({"message": "cba", "user_id": 1}));
        let out = decrypt_row(&ReverseDecryptor, input.clone()).await;
        assert_eq!(out, input);
    }

    #[tokio::test]
    async fn failed_column_keeps_ciphertext() {
        let input = row(json!({"v": {"enc": 1}, "user_id": 0, "message": "secret"}));
        let out = decrypt_row(&ReverseDecryptor, input).await;
        assert_eq!(out["message"], json!("secret"));
    }
}
