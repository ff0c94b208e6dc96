use std::collections::HashMap;
use std::sync::Arc;

use cloudmesh_provider_dropbox::DropboxAdapter;
use cloudmesh_provider_google_drive::GoogleDriveAdapter;
use shared::{Config, Provider, ProviderAdapter, RateLimiter};

/// Maps each `Provider` to the concrete adapter that speaks its API. Built
/// once at startup and shared read-only across every worker task.
pub struct ProviderRegistry {
    adapters: HashMap<Provider, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new(config: &Config) -> Self {
        let google_rate_limit = std::env::var("GOOGLE_API_RATE_LIMIT")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(180);
        let google_max_retries = std::env::var("GOOGLE_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(5);
        let google_limiter = Arc::new(RateLimiter::new(google_rate_limit, google_max_retries));

        let dropbox_rate_limit = std::env::var("DROPBOX_API_RATE_LIMIT")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(120);
        let dropbox_max_retries = std::env::var("DROPBOX_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(3);
        let dropbox_limiter = Arc::new(RateLimiter::new(dropbox_rate_limit, dropbox_max_retries));

        let mut adapters: HashMap<Provider, Arc<dyn ProviderAdapter>> = HashMap::new();
        adapters.insert(
            Provider::Google,
            Arc::new(GoogleDriveAdapter::new(config.google.clone(), google_limiter)) as Arc<dyn ProviderAdapter>,
        );
        adapters.insert(
            Provider::Dropbox,
            Arc::new(DropboxAdapter::new(config.dropbox.clone(), dropbox_limiter)) as Arc<dyn ProviderAdapter>,
        );

        Self { adapters }
    }

    pub fn get(&self, provider: Provider) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&provider).cloned()
    }
}
