//! Utility functions for minigraph

use std::time::{SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp (milliseconds)
pub fn timestamp_now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Retry with exponential backoff
///
/// Only errors for which [`crate::Error::is_retryable`] holds are retried.
pub async fn retry_with_backoff<F, Fut, T>(
    mut f: F,
    max_retries: usize,
    initial_delay: std::time::Duration,
) -> crate::Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = crate::Result<T>>,
{
    let mut delay = initial_delay;

    for attempt in 0..max_retries {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_retryable() && attempt < max_retries - 1 => {
                tracing::warn!(
                    "Retry attempt {} failed: {}, retrying in {:?}",
                    attempt + 1,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(e) => return Err(e),
        }
    }

    Err(crate::Error::Internal("Max retries exceeded".into()))
}

/// Generate a unique write-session client id
pub fn generate_client_id() -> String {
    format!("client-{}", uuid::Uuid::new_v4())
}

/// Validate a schema label (non-empty, no whitespace or control chars)
pub fn validate_label(label: &str) -> crate::Result<()> {
    if label.is_empty() {
        return Err(crate::Error::SchemaConflict("label cannot be empty".into()));
    }

    if label.len() > 128 {
        return Err(crate::Error::SchemaConflict(format!(
            "label too long (max 128 bytes): {}",
            label
        )));
    }

    if label.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return Err(crate::Error::SchemaConflict(format!(
            "label contains invalid characters: {:?}",
            label
        )));
    }

    Ok(())
}
