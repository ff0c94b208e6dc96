pub mod handlers;
pub mod registry;
pub mod scheduler;
pub mod worker;

use shared::{
    AccountRepository, AuthTokenRepository, Config, DatabasePool, JobLogRepository, JobQueue,
    SyncStateRepository, SyncedItemRepository, VaultService,
};

use registry::ProviderRegistry;

/// Every dependency a scheduler tick or worker loop needs, built once at
/// startup and shared (via `Arc`) across every spawned task.
pub struct Services {
    pub db_pool: DatabasePool,
    pub config: Config,
    pub vault: VaultService,
    pub queue: JobQueue,
    pub account_repo: AccountRepository,
    pub auth_token_repo: AuthTokenRepository,
    pub sync_state_repo: SyncStateRepository,
    pub synced_item_repo: SyncedItemRepository,
    pub job_log_repo: JobLogRepository,
    pub registry: ProviderRegistry,
}

impl Services {
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        let db_pool = DatabasePool::from_config(&config.database).await?;
        db_pool.run_migrations().await?;

        let vault = VaultService::new(&config.vault.master_key)?;
        let queue = JobQueue::new(db_pool.pool().clone());
        let account_repo = AccountRepository::new(db_pool.pool());
        let auth_token_repo = AuthTokenRepository::new(db_pool.pool());
        let sync_state_repo = SyncStateRepository::new(db_pool.pool());
        let synced_item_repo = SyncedItemRepository::new(db_pool.pool());
        let job_log_repo = JobLogRepository::new(db_pool.pool());
        let registry = ProviderRegistry::new(&config);

        Ok(Self {
            db_pool,
            config,
            vault,
            queue,
            account_repo,
            auth_token_repo,
            sync_state_repo,
            synced_item_repo,
            job_log_repo,
            registry,
        })
    }
}
