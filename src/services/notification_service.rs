use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use sha2::Sha256;
use sqlx::PgPool;

use crate::dto::webhook_dto::AttemptCompletedEvent;
use crate::error::{Error, Result};
use crate::models::webhook_log::WebhookLog;

pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

const WEBHOOK_COLUMNS: &str = r#"
    id, event_type, payload, target_url, http_status, response_body, attempts,
    max_attempts, next_retry_at, status, created_at, updated_at
"#;

/// Downstream consumers of finished attempts (gradebook, progress tracking).
/// Called exactly once per attempt, after the result is stored.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AttemptNotifier: Send + Sync {
    async fn attempt_completed(&self, event: &AttemptCompletedEvent) -> Result<()>;
}

/// Writes the event to the log only. Used when no webhook is configured.
#[derive(Debug, Default, Clone)]
pub struct TracingNotifier;

#[async_trait]
impl AttemptNotifier for TracingNotifier {
    async fn attempt_completed(&self, event: &AttemptCompletedEvent) -> Result<()> {
        tracing::info!(
            attempt_id = %event.attempt_id,
            quiz_id = event.quiz_id,
            user_id = event.user_id,
            status = %event.status,
            percentage = event.percentage,
            passed = event.passed,
            "attempt finalized"
        );
        Ok(())
    }
}

/// Hex HMAC-SHA256 of the request body, sent in [`SIGNATURE_HEADER`].
pub fn sign_payload(secret: &str, body: &[u8]) -> Result<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| Error::Internal(format!("Invalid webhook secret: {}", e)))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Seconds to wait before retry number `attempts`.
pub fn retry_delay_seconds(attempts: i32) -> i64 {
    let exp = u32::try_from(attempts.saturating_sub(1).max(0)).unwrap_or(0).min(16);
    (30_i64 * 2_i64.pow(exp)).min(3600)
}

/// Webhook outbox. Events are stored in `webhook_logs` and delivered by a
/// background worker calling [`NotificationService::run_once`].
#[derive(Clone)]
pub struct NotificationService {
    pool: PgPool,
    client: Client,
    target_url: String,
    secret: String,
}

impl NotificationService {
    pub fn new(pool: PgPool, target_url: String, secret: String) -> Self {
        Self {
            pool,
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(15))
                .build()
                .unwrap_or_default(),
            target_url,
            secret,
        }
    }

    pub async fn enqueue_webhook(
        &self,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Result<WebhookLog> {
        let row = sqlx::query_as::<_, WebhookLog>(&format!(
            r#"
            INSERT INTO webhook_logs (event_type, payload, target_url, status)
            VALUES ($1, $2, $3, 'pending')
            RETURNING {}
            "#,
            WEBHOOK_COLUMNS
        ))
        .bind(event_type)
        .bind(payload)
        .bind(&self.target_url)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    /// Posts one claimed row and records the outcome. A failed delivery is
    /// put back to `pending` with a backoff until `max_attempts` is reached.
    pub async fn deliver_once(&self, log: &WebhookLog) -> Result<bool> {
        let body = serde_json::to_vec(&log.payload)?;
        let signature = sign_payload(&self.secret, &body)?;

        let res = self
            .client
            .post(&log.target_url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signature)
            .body(body)
            .send()
            .await;

        let (http_status, response_body, delivered) = match res {
            Ok(resp) => {
                let status = resp.status();
                let text = resp.text().await.unwrap_or_default();
                (Some(i32::from(status.as_u16())), text, status.is_success())
            }
            Err(err) => (None, err.to_string(), false),
        };

        let attempts = log.attempts + 1;
        let (status, retry_in) = if delivered {
            ("success", None)
        } else if attempts < log.max_attempts {
            ("pending", Some(retry_delay_seconds(attempts)))
        } else {
            ("failed", None)
        };

        if !delivered {
            tracing::warn!(
                webhook_id = %log.id,
                attempts,
                http_status = ?http_status,
                "webhook delivery failed"
            );
        }

        sqlx::query(
            r#"
            UPDATE webhook_logs
            SET http_status = $2, response_body = $3, status = $4, attempts = $5,
                next_retry_at = CASE WHEN $6::BIGINT IS NULL THEN NULL
                                     ELSE NOW() + make_interval(secs => $6::BIGINT) END,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(log.id)
        .bind(http_status)
        .bind(response_body)
        .bind(status)
        .bind(attempts)
        .bind(retry_in)
        .execute(&self.pool)
        .await?;

        Ok(delivered)
    }

    /// Claims and delivers the oldest due row. Returns false when the outbox
    /// had nothing due.
    pub async fn run_once(&self) -> Result<bool> {
        let claimed = sqlx::query_as::<_, WebhookLog>(&format!(
            r#"
            UPDATE webhook_logs SET status = 'sending', updated_at = NOW()
            WHERE id = (
                SELECT id FROM webhook_logs
                WHERE status = 'pending' AND (next_retry_at IS NULL OR next_retry_at <= NOW())
                ORDER BY created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING {}
            "#,
            WEBHOOK_COLUMNS
        ))
        .fetch_optional(&self.pool)
        .await?;

        let Some(log) = claimed else { return Ok(false) };
        self.deliver_once(&log).await?;
        Ok(true)
    }
}

#[async_trait]
impl AttemptNotifier for NotificationService {
    async fn attempt_completed(&self, event: &AttemptCompletedEvent) -> Result<()> {
        let payload = serde_json::to_value(event)?;
        let log = self.enqueue_webhook(&event.event, &payload).await?;
        tracing::debug!(webhook_id = %log.id, attempt_id = %event.attempt_id, "webhook queued");
        Ok(())
    }
}
