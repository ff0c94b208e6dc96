use serde_json::json;
use time::OffsetDateTime;

use shared::test_support::TestEnvironment;
use shared::{
    Account, AccountRepository, AuthTokenRepository, JobLogRepository, Provider,
    SyncStateRepository, SyncedItemInput, SyncedItemRepository,
};

async fn seed_user(pool: &sqlx::PgPool, user_id: &str) {
    sqlx::query("INSERT INTO users (id) VALUES ($1) ON CONFLICT DO NOTHING")
        .bind(user_id)
        .execute(pool)
        .await
        .unwrap();
}

fn sample_item(provider_file_id: &str, name: &str) -> SyncedItemInput {
    SyncedItemInput {
        provider_file_id: provider_file_id.to_string(),
        name: name.to_string(),
        extension: Some("txt".to_string()),
        size: 42,
        mime_type: Some("text/plain".to_string()),
        parent_folder: "/".to_string(),
        is_folder: false,
        content_hash: Some("deadbeef".to_string()),
        created_time: None,
        modified_time: None,
        thumbnail_link: None,
        preview_link: None,
        web_view_link: None,
        web_content_link: None,
        link_expires_at: None,
    }
}

#[tokio::test]
async fn add_account_details_seeds_empty_sync_state() {
    let env = TestEnvironment::new().await.unwrap();
    let pool = env.pool().clone();
    seed_user(&pool, "user-1").await;

    let account_repo = AccountRepository::new(&pool);
    let sync_state_repo = SyncStateRepository::new(&pool);

    let account = account_repo
        .add_account_details(Account {
            account_id: uuid::Uuid::new_v4(),
            user_id: "user-1".to_string(),
            provider: Provider::Google,
            provider_user_id: "google-user-1".to_string(),
            email: Some("a@example.com".to_string()),
            name: Some("A".to_string()),
            avatar_url: None,
            created_at: OffsetDateTime::now_utc(),
        })
        .await
        .unwrap();

    let state = sync_state_repo.get(account.account_id).await.unwrap().unwrap();
    assert!(state.last_synced_at.is_none());
    assert!(state.sync_page_token.is_none());
}

#[tokio::test]
async fn linking_same_provider_account_twice_is_rejected() {
    let env = TestEnvironment::new().await.unwrap();
    let pool = env.pool().clone();
    seed_user(&pool, "user-1").await;

    let account_repo = AccountRepository::new(&pool);
    let base = Account {
        account_id: uuid::Uuid::new_v4(),
        user_id: "user-1".to_string(),
        provider: Provider::Dropbox,
        provider_user_id: "dbx-user-1".to_string(),
        email: None,
        name: None,
        avatar_url: None,
        created_at: OffsetDateTime::now_utc(),
    };

    account_repo.add_account_details(base.clone()).await.unwrap();

    let mut duplicate = base;
    duplicate.account_id = uuid::Uuid::new_v4();
    let result = account_repo.add_account_details(duplicate).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn synced_items_upsert_is_idempotent_and_preserves_item_id_on_conflict() {
    let env = TestEnvironment::new().await.unwrap();
    let pool = env.pool().clone();
    seed_user(&pool, "user-1").await;

    let account_repo = AccountRepository::new(&pool);
    let item_repo = SyncedItemRepository::new(&pool);

    let account = account_repo
        .add_account_details(Account {
            account_id: uuid::Uuid::new_v4(),
            user_id: "user-1".to_string(),
            provider: Provider::Google,
            provider_user_id: "google-user-2".to_string(),
            email: None,
            name: None,
            avatar_url: None,
            created_at: OffsetDateTime::now_utc(),
        })
        .await
        .unwrap();

    let mut tx = pool.begin().await.unwrap();
    let first = item_repo
        .upsert(account.account_id, &sample_item("f1", "report.txt"), &mut tx)
        .await
        .unwrap();
    tx.commit().await.unwrap();

    // Re-observing f1 with a new name updates in place and keeps its item_id.
    let mut tx = pool.begin().await.unwrap();
    let updated = item_repo
        .upsert(account.account_id, &sample_item("f1", "report-renamed.txt"), &mut tx)
        .await
        .unwrap();
    tx.commit().await.unwrap();
    assert_eq!(updated.item_id, first.item_id);
    assert_eq!(updated.name, "report-renamed.txt");
}

#[tokio::test]
async fn delete_conflicting_is_scoped_to_the_current_page_and_leaves_other_pages_untouched() {
    let env = TestEnvironment::new().await.unwrap();
    let pool = env.pool().clone();
    seed_user(&pool, "user-1").await;

    let account_repo = AccountRepository::new(&pool);
    let item_repo = SyncedItemRepository::new(&pool);

    let account = account_repo
        .add_account_details(Account {
            account_id: uuid::Uuid::new_v4(),
            user_id: "user-1".to_string(),
            provider: Provider::Google,
            provider_user_id: "google-user-2".to_string(),
            email: None,
            name: None,
            avatar_url: None,
            created_at: OffsetDateTime::now_utc(),
        })
        .await
        .unwrap();

    // A prior full sync populated the catalog with items that would span
    // two incremental pages: f1 ("page 1") and f2 ("page 2").
    let mut tx = pool.begin().await.unwrap();
    item_repo
        .upsert(account.account_id, &sample_item("f1", "report.txt"), &mut tx)
        .await
        .unwrap();
    item_repo
        .upsert(account.account_id, &sample_item("f2", "notes.txt"), &mut tx)
        .await
        .unwrap();
    tx.commit().await.unwrap();

    // An incremental sync's first page only re-observes f1, now moved to a
    // new folder. delete_conflicting is called scoped to just that page.
    let mut tx = pool.begin().await.unwrap();
    let mut moved = sample_item("f1", "report.txt");
    moved.parent_folder = "/archive".to_string();
    item_repo
        .delete_conflicting(
            account.account_id,
            &["/archive".to_string()],
            &["report.txt".to_string()],
            &["f1".to_string()],
            &mut tx,
        )
        .await
        .unwrap();
    item_repo.upsert(account.account_id, &moved, &mut tx).await.unwrap();
    tx.commit().await.unwrap();

    // f2 belongs to a page this sync hasn't reached yet and must survive.
    let remaining = item_repo.find_by_account(account.account_id).await.unwrap();
    assert_eq!(remaining.len(), 2);
    assert!(remaining.iter().any(|i| i.provider_file_id == "f2"));
    let moved_row = remaining.iter().find(|i| i.provider_file_id == "f1").unwrap();
    assert_eq!(moved_row.parent_folder, "/archive");
}

#[tokio::test]
async fn delete_conflicting_prunes_the_stale_row_left_behind_by_a_move() {
    let env = TestEnvironment::new().await.unwrap();
    let pool = env.pool().clone();
    seed_user(&pool, "user-1").await;

    let account_repo = AccountRepository::new(&pool);
    let item_repo = SyncedItemRepository::new(&pool);

    let account = account_repo
        .add_account_details(Account {
            account_id: uuid::Uuid::new_v4(),
            user_id: "user-1".to_string(),
            provider: Provider::Google,
            provider_user_id: "google-user-3".to_string(),
            email: None,
            name: None,
            avatar_url: None,
            created_at: OffsetDateTime::now_utc(),
        })
        .await
        .unwrap();

    // f_old sits at /docs/report.txt. The provider later reports a
    // different file (f_new) now occupying that exact path — f_old's
    // provider_file_id was deleted or replaced out from under us.
    let mut tx = pool.begin().await.unwrap();
    let mut old_item = sample_item("f_old", "report.txt");
    old_item.parent_folder = "/docs".to_string();
    item_repo.upsert(account.account_id, &old_item, &mut tx).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = pool.begin().await.unwrap();
    item_repo
        .delete_conflicting(
            account.account_id,
            &["/docs".to_string()],
            &["report.txt".to_string()],
            &["f_new".to_string()],
            &mut tx,
        )
        .await
        .unwrap();
    let mut new_item = sample_item("f_new", "report.txt");
    new_item.parent_folder = "/docs".to_string();
    item_repo.upsert(account.account_id, &new_item, &mut tx).await.unwrap();
    tx.commit().await.unwrap();

    let remaining = item_repo.find_by_account(account.account_id).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].provider_file_id, "f_new");
}

#[tokio::test]
async fn auth_token_renewal_preserves_refresh_token_when_absent() {
    let env = TestEnvironment::new().await.unwrap();
    let pool = env.pool().clone();
    seed_user(&pool, "user-1").await;

    let account_repo = AccountRepository::new(&pool);
    let auth_repo = AuthTokenRepository::new(&pool);

    let account = account_repo
        .add_account_details(Account {
            account_id: uuid::Uuid::new_v4(),
            user_id: "user-1".to_string(),
            provider: Provider::Google,
            provider_user_id: "google-user-3".to_string(),
            email: None,
            name: None,
            avatar_url: None,
            created_at: OffsetDateTime::now_utc(),
        })
        .await
        .unwrap();

    let expiry = OffsetDateTime::now_utc() + time::Duration::hours(1);
    auth_repo
        .upsert_auth_tokens(&shared::AuthToken {
            account_id: account.account_id,
            access_token: "enc-access-1".to_string(),
            refresh_token: "enc-refresh-1".to_string(),
            token_type: "Bearer".to_string(),
            expiry,
        })
        .await
        .unwrap();

    let new_expiry = expiry + time::Duration::hours(1);
    auth_repo
        .update_renewed_auth_token(account.account_id, "enc-access-2", new_expiry, None)
        .await
        .unwrap();

    let tokens = auth_repo
        .get_auth_tokens("user-1", account.account_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tokens.access_token, "enc-access-2");
    assert_eq!(tokens.refresh_token, "enc-refresh-1");
    assert_eq!(tokens.expiry, new_expiry);
}

#[tokio::test]
async fn job_log_lifecycle_tracks_start_retry_and_finish() {
    let env = TestEnvironment::new().await.unwrap();
    let pool = env.pool().clone();
    seed_user(&pool, "user-1").await;

    let account_repo = AccountRepository::new(&pool);
    let job_log_repo = JobLogRepository::new(&pool);

    let account = account_repo
        .add_account_details(Account {
            account_id: uuid::Uuid::new_v4(),
            user_id: "user-1".to_string(),
            provider: Provider::Dropbox,
            provider_user_id: "dbx-user-2".to_string(),
            email: None,
            name: None,
            avatar_url: None,
            created_at: OffsetDateTime::now_utc(),
        })
        .await
        .unwrap();

    let job_id = "job-1";
    job_log_repo
        .add_new_job_log(job_id, account.account_id, "file:sync", "default", json!({}))
        .await
        .unwrap();

    job_log_repo.update_job_log_start(job_id).await.unwrap();
    let started = job_log_repo.find_by_id(job_id).await.unwrap().unwrap();
    assert!(started.started_at.is_some());

    job_log_repo
        .update_job_log_retry_count(job_id, 1, "transient network error")
        .await
        .unwrap();
    let retried = job_log_repo.find_by_id(job_id).await.unwrap().unwrap();
    assert_eq!(retried.retries, 1);
    assert_eq!(retried.error.as_deref(), Some("transient network error"));

    job_log_repo.update_job_log_finish(job_id).await.unwrap();
    let finished = job_log_repo.find_by_id(job_id).await.unwrap().unwrap();
    assert!(finished.finished_at.is_some());
    assert!(finished.error.is_none());
}
