pub mod config;
pub mod db;
pub mod encryption;
pub mod models;
pub mod provider;
pub mod queue;
pub mod rate_limiter;
pub mod telemetry;
pub mod test_support;
pub mod traits;
pub mod utils;

pub use config::*;
pub use db::repositories::{
    AccountRepository, AuthTokenRepository, JobLogRepository, SyncStateRepository,
    SyncedItemRepository,
};
pub use db::{DatabaseError, DatabasePool};
pub use encryption::{VaultError, VaultService};
pub use models::*;
pub use provider::{
    generate_pkce_verifier, pkce_challenge_for, OAuthState, OAuthTokenSet, PkceChallenge,
    ProviderAccountInfo, ProviderAdapter, ProviderError, ProviderItem, ProviderPage,
};
pub use queue::{JobQueue, QueueError};
pub use rate_limiter::RateLimiter;
pub use traits::Repository;
