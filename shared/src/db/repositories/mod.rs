pub mod account;
pub mod auth_token;
pub mod job_log;
pub mod sync_state;
pub mod synced_item;

pub use account::AccountRepository;
pub use auth_token::AuthTokenRepository;
pub use job_log::JobLogRepository;
pub use sync_state::SyncStateRepository;
pub use synced_item::SyncedItemRepository;
