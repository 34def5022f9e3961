use std::sync::Arc;

use crate::{
    analytics::AnalyticsStore,
    config::Config,
    credentials::CredentialResolver,
    dispatcher::Dispatcher,
    platform::{throttled::ThrottledPlatform, SocialPlatform},
    webhook::TriggerAdapter,
};

/// Everything an entry point needs, wired once from config.
pub struct AppContext {
    pub cfg: Arc<Config>,
    pub credentials: CredentialResolver,
    pub store: Arc<AnalyticsStore>,
    pub dispatcher: Arc<Dispatcher>,
    pub adapter: Arc<TriggerAdapter>,
}

impl AppContext {
    /// Wire the context around `platform`, spacing its calls by `action_spacing`.
    pub fn new(cfg: Config, platform: Arc<dyn SocialPlatform>) -> Self {
        let cfg = Arc::new(cfg);
        let platform: Arc<dyn SocialPlatform> =
            Arc::new(ThrottledPlatform::new(platform, cfg.action_spacing));
        let store = Arc::new(AnalyticsStore::open(cfg.state_file.clone()));
        let dispatcher = Arc::new(Dispatcher::new(cfg.clone(), platform, store.clone()));
        let adapter = Arc::new(TriggerAdapter::new(
            dispatcher.clone(),
            cfg.webhook_secret.clone(),
        ));

        Self {
            credentials: CredentialResolver::github_default(cfg.credential_timeout),
            cfg,
            store,
            dispatcher,
            adapter,
        }
    }
}
