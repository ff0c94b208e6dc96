use std::time::Duration;

use serde::{Deserialize, Serialize};
use shared::queue::QueueName;
use shared::SyncedItemInput;
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use crate::Services;

pub const FILE_SYNC_JOB: &str = "file:sync";
pub const AUTH_TOKEN_RENEWAL_JOB: &str = "file:auth-token-renewal";

const SYNC_SUCCESSOR_DELAY: Duration = Duration::from_secs(30 * 60);
const SUCCESSOR_UNIQUE_WINDOW: Duration = Duration::from_secs(6 * 60);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPayload {
    pub user_id: String,
    pub account_id: Uuid,
}

/// An error a handler can surface: `Terminal` means the job should be
/// dead-lettered immediately (missing credentials, unsupported provider);
/// `Retryable` lets the queue's backoff policy decide.
#[derive(Debug)]
pub enum HandlerError {
    Terminal(anyhow::Error),
    Retryable(anyhow::Error),
}

impl HandlerError {
    pub fn message(&self) -> String {
        match self {
            HandlerError::Terminal(e) => e.to_string(),
            HandlerError::Retryable(e) => e.to_string(),
        }
    }
}

impl<E: Into<anyhow::Error>> From<E> for HandlerError {
    fn from(e: E) -> Self {
        HandlerError::Retryable(e.into())
    }
}

/// Step 2 of both handlers: the first attempt transitions `queued ->
/// started`; a redelivered attempt instead records the bumped retry count
/// against the error that caused the previous attempt to fail.
async fn record_attempt(services: &Services, job_id: &str, retry_count: i32) -> Result<(), anyhow::Error> {
    if retry_count == 0 {
        services.job_log_repo.update_job_log_start(job_id).await?;
    } else {
        let previous_error = services
            .job_log_repo
            .find_by_id(job_id)
            .await?
            .and_then(|log| log.error)
            .unwrap_or_else(|| "retrying after a prior failure".to_string());
        services
            .job_log_repo
            .update_job_log_retry_count(job_id, retry_count, &previous_error)
            .await?;
    }
    Ok(())
}

/// `file:sync` handler. Loads the account's tokens, resolves its provider
/// adapter, and walks every page of `list_changes`, reconciling each page
/// into the catalog inside one transaction before advancing the cursor.
pub async fn handle_file_sync(
    services: &Services,
    job_id: &str,
    retry_count: i32,
    payload: &JobPayload,
) -> Result<(), HandlerError> {
    record_attempt(services, job_id, retry_count).await?;

    let account = services
        .account_repo
        .find_by_id(payload.account_id)
        .await?
        .ok_or_else(|| HandlerError::Terminal(anyhow::anyhow!("no account {}", payload.account_id)))?;

    let adapter = services.registry.get(account.provider).ok_or_else(|| {
        HandlerError::Terminal(anyhow::anyhow!("unsupported provider: {}", account.provider))
    })?;

    let auth_token = services
        .auth_token_repo
        .get_auth_tokens(&payload.user_id, payload.account_id)
        .await?
        .ok_or_else(|| HandlerError::Terminal(anyhow::anyhow!("no auth token for account {}", payload.account_id)))?;

    let mut access_token = services
        .vault
        .decrypt(&auth_token.access_token)
        .map_err(|e| HandlerError::Terminal(anyhow::anyhow!(e)))?;

    let refresh_token = services
        .vault
        .decrypt(&auth_token.refresh_token)
        .map_err(|e| HandlerError::Terminal(anyhow::anyhow!(e)))?;

    let sync_state = services
        .sync_state_repo
        .get(payload.account_id)
        .await?
        .ok_or_else(|| HandlerError::Terminal(anyhow::anyhow!("no sync_state for account {}", payload.account_id)))?;

    let is_incremental = sync_state.last_synced_at.is_some();
    let mut page_token = sync_state.sync_page_token.clone();
    let run_started_at = OffsetDateTime::now_utc();
    let mut new_sync_page_token: Option<String> = None;

    loop {
        let page = adapter
            .list_changes(&access_token, Some(&refresh_token), sync_state.last_synced_at, page_token.as_deref())
            .await
            .map_err(|e| HandlerError::Retryable(e.into()))?;

        if let Some(renewed) = &page.renewed_token {
            let encrypted_access = services
                .vault
                .encrypt(&renewed.access_token)
                .map_err(|e| HandlerError::Terminal(anyhow::anyhow!(e)))?;
            let encrypted_refresh = renewed
                .refresh_token
                .as_deref()
                .map(|rt| services.vault.encrypt(rt))
                .transpose()
                .map_err(|e| HandlerError::Terminal(anyhow::anyhow!(e)))?;
            services
                .auth_token_repo
                .update_renewed_auth_token(
                    payload.account_id,
                    &encrypted_access,
                    renewed.expiry,
                    encrypted_refresh.as_deref(),
                )
                .await?;
            access_token = renewed.access_token.clone();
        }

        let re_observed: Vec<_> = page.items.iter().filter(|i| !i.deleted).collect();

        let mut tx = services.db_pool.pool().begin().await.map_err(anyhow::Error::from)?;

        if is_incremental && !re_observed.is_empty() {
            let parent_folders: Vec<String> = re_observed.iter().map(|i| i.parent_folder.clone()).collect();
            let names: Vec<String> = re_observed.iter().map(|i| i.name.clone()).collect();
            let provider_file_ids: Vec<String> = re_observed.iter().map(|i| i.provider_file_id.clone()).collect();
            services
                .synced_item_repo
                .delete_conflicting(payload.account_id, &parent_folders, &names, &provider_file_ids, &mut tx)
                .await?;
        }

        for item in &re_observed {
            let input = SyncedItemInput {
                provider_file_id: item.provider_file_id.clone(),
                name: item.name.clone(),
                extension: item.extension.clone(),
                size: item.size,
                mime_type: item.mime_type.clone(),
                parent_folder: item.parent_folder.clone(),
                is_folder: item.is_folder,
                content_hash: item.content_hash.clone(),
                created_time: item.created_time,
                modified_time: item.modified_time,
                thumbnail_link: item.thumbnail_link.clone(),
                preview_link: item.preview_link.clone(),
                web_view_link: item.web_view_link.clone(),
                web_content_link: item.web_content_link.clone(),
                link_expires_at: item.link_expires_at,
            };
            services
                .synced_item_repo
                .upsert(payload.account_id, &input, &mut tx)
                .await?;
        }

        tx.commit().await.map_err(anyhow::Error::from)?;

        if page.new_sync_page_token.is_some() {
            new_sync_page_token = page.new_sync_page_token;
        }

        match page.next_page_token {
            Some(next) => page_token = Some(next),
            None => break,
        }
    }

    services
        .sync_state_repo
        .update_last_synced(payload.account_id, run_started_at, new_sync_page_token.as_deref())
        .await?;

    services.job_log_repo.update_job_log_finish(job_id).await?;

    let successor = JobPayload {
        user_id: payload.user_id.clone(),
        account_id: payload.account_id,
    };
    services
        .queue
        .enqueue(
            QueueName::Default,
            FILE_SYNC_JOB,
            serde_json::to_value(&successor)?,
            shared::queue::EnqueueOptions {
                max_retries: Some(3),
                delay: Some(SYNC_SUCCESSOR_DELAY),
                unique_window: Some(SUCCESSOR_UNIQUE_WINDOW),
            },
        )
        .await?;

    info!(account_id = %payload.account_id, "file sync completed");
    Ok(())
}

/// `file:auth-token-renewal` handler. Same lifecycle skeleton as
/// `handle_file_sync`, but the provider call is a token exchange rather
/// than a listing; the successor is scheduled to fire when the fresh
/// token is due to expire rather than on a fixed delay.
pub async fn handle_auth_token_renewal(
    services: &Services,
    job_id: &str,
    retry_count: i32,
    payload: &JobPayload,
) -> Result<(), HandlerError> {
    record_attempt(services, job_id, retry_count).await?;

    let account = services
        .account_repo
        .find_by_id(payload.account_id)
        .await?
        .ok_or_else(|| HandlerError::Terminal(anyhow::anyhow!("no account {}", payload.account_id)))?;

    let adapter = services.registry.get(account.provider).ok_or_else(|| {
        HandlerError::Terminal(anyhow::anyhow!("unsupported provider: {}", account.provider))
    })?;

    let auth_token = services
        .auth_token_repo
        .get_auth_tokens(&payload.user_id, payload.account_id)
        .await?
        .ok_or_else(|| HandlerError::Terminal(anyhow::anyhow!("no auth token for account {}", payload.account_id)))?;

    let refresh_token = services
        .vault
        .decrypt(&auth_token.refresh_token)
        .map_err(|e| HandlerError::Terminal(anyhow::anyhow!(e)))?;

    let renewed = adapter
        .renew_token(&refresh_token)
        .await
        .map_err(|e| HandlerError::Retryable(e.into()))?;

    let encrypted_access = services
        .vault
        .encrypt(&renewed.access_token)
        .map_err(|e| HandlerError::Terminal(anyhow::anyhow!(e)))?;
    let encrypted_refresh = renewed
        .refresh_token
        .as_deref()
        .map(|rt| services.vault.encrypt(rt))
        .transpose()
        .map_err(|e| HandlerError::Terminal(anyhow::anyhow!(e)))?;

    services
        .auth_token_repo
        .update_renewed_auth_token(
            payload.account_id,
            &encrypted_access,
            renewed.expiry,
            encrypted_refresh.as_deref(),
        )
        .await?;

    services.job_log_repo.update_job_log_finish(job_id).await?;

    let expires_in = (renewed.expiry - OffsetDateTime::now_utc())
        .whole_seconds()
        .max(0) as u64;

    let successor = JobPayload {
        user_id: payload.user_id.clone(),
        account_id: payload.account_id,
    };
    services
        .queue
        .enqueue(
            QueueName::Default,
            AUTH_TOKEN_RENEWAL_JOB,
            serde_json::to_value(&successor)?,
            shared::queue::EnqueueOptions {
                max_retries: Some(3),
                delay: Some(Duration::from_secs(expires_in)),
                unique_window: Some(SUCCESSOR_UNIQUE_WINDOW),
            },
        )
        .await?;

    info!(account_id = %payload.account_id, "auth token renewed");
    Ok(())
}

const RETRY_BASE_BACKOFF_SECS: u64 = 10;
const RETRY_MAX_BACKOFF_SECS: u64 = 5 * 60;

fn exponential_backoff(retry_count: i32) -> Duration {
    let secs = RETRY_BASE_BACKOFF_SECS.saturating_mul(1u64 << retry_count.clamp(0, 10));
    Duration::from_secs(secs.min(RETRY_MAX_BACKOFF_SECS))
}

pub async fn mark_job_outcome(
    services: &Services,
    job_id: &str,
    retry_count: i32,
    result: &Result<(), HandlerError>,
) {
    match result {
        Ok(()) => {
            if let Err(e) = services.queue.mark_finished(job_id).await {
                warn!(job_id, error = %e, "failed to mark job finished in queue");
            }
        }
        Err(HandlerError::Terminal(e)) => {
            if let Err(log_err) = services.job_log_repo.update_job_log_failed(job_id, &e.to_string()).await {
                warn!(job_id, error = %log_err, "failed to write terminal job log");
            }
            if let Err(queue_err) = services.queue.mark_dead_letter(job_id).await {
                warn!(job_id, error = %queue_err, "failed to dead-letter job");
            }
        }
        Err(HandlerError::Retryable(e)) => {
            let backoff = exponential_backoff(retry_count);
            match services.queue.mark_failed(job_id, backoff).await {
                Ok(shared::JobStatus::Failed) => {
                    if let Err(log_err) = services.job_log_repo.update_job_log_failed(job_id, &e.to_string()).await {
                        warn!(job_id, error = %log_err, "failed to write dead-letter job log");
                    }
                }
                Ok(_) => {
                    warn!(job_id, error = %e, "job failed, will retry");
                }
                Err(queue_err) => {
                    warn!(job_id, error = %queue_err, "failed to mark job failed in queue");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_with_each_retry() {
        assert_eq!(exponential_backoff(0), Duration::from_secs(10));
        assert_eq!(exponential_backoff(1), Duration::from_secs(20));
        assert_eq!(exponential_backoff(2), Duration::from_secs(40));
        assert_eq!(exponential_backoff(3), Duration::from_secs(80));
    }

    #[test]
    fn backoff_is_capped_at_the_maximum() {
        assert_eq!(exponential_backoff(10), Duration::from_secs(RETRY_MAX_BACKOFF_SECS));
        assert_eq!(exponential_backoff(30), Duration::from_secs(RETRY_MAX_BACKOFF_SECS));
    }

    #[test]
    fn negative_retry_counts_are_clamped_to_the_base_backoff() {
        assert_eq!(exponential_backoff(-1), Duration::from_secs(RETRY_BASE_BACKOFF_SECS));
    }
}
