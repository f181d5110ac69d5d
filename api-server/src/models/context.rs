use chrono::Duration;
use getset::Getters;
use log::{info, warn};
use mention_monitor::{
    CacheConfig, GeminiAnalyzer, PulseService, RateLimiter, SerpApiCollector, ServiceConfig,
    SqliteStore,
};
use std::sync::Arc;

use super::config::Config;

#[derive(Getters)]
#[get = "pub"]
pub struct Context {
    service: PulseService,
    rate_limiter: RateLimiter,
    config: Config,
}

impl Context {
    /// Assemble the service around the configured providers and database
    pub async fn new(config: Config) -> mention_monitor::Result<Self> {
        let cache_config = CacheConfig::new(
            Duration::minutes(*config.cache_ttl_minutes()),
            *config.cache_max_entries(),
        );

        let serpapi_key = config.serpapi_key().clone().unwrap_or_default();
        let gemini_api_key = config.gemini_api_key().clone().unwrap_or_default();
        if serpapi_key.is_empty() {
            warn!("SERPAPI_KEY is not set; collection requests will fail");
        }
        if gemini_api_key.is_empty() {
            warn!("GEMINI_API_KEY is not set; mentions get the keyword fallback classification");
        }

        info!(
            "Initialized PulseService with caching (TTL: {}min, Max entries: {})",
            config.cache_ttl_minutes(),
            config.cache_max_entries()
        );

        let store = SqliteStore::open(config.db_path()).await?;

        let service = PulseService::new(
            Arc::new(SerpApiCollector::new(serpapi_key)),
            Arc::new(GeminiAnalyzer::new(gemini_api_key, config.gemini_model().clone())),
            Arc::new(store),
            ServiceConfig {
                cache: cache_config,
                ..ServiceConfig::default()
            },
        );

        Ok(Self::with_service(service, config))
    }

    /// Wrap an already assembled service
    pub fn with_service(service: PulseService, config: Config) -> Self {
        Self {
            service,
            rate_limiter: RateLimiter::new(*config.rate_limit_qps()),
            config,
        }
    }
}

pub type ContextPointer = Arc<Context>;

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Figment;
    use mention_monitor::CampaignInput;

    #[rocket::async_test]
    async fn test_campaigns_survive_restart() {
        let path = std::env::temp_dir().join(format!(
            "pulse-context-{}-{}.db",
            std::process::id(),
            chrono::Utc::now().timestamp_micros()
        ));
        let config: Config = Figment::new()
            .join(("db_path", path.to_string_lossy().to_string()))
            .extract()
            .unwrap();

        let context = Context::new(config.clone()).await.unwrap();
        let created = context
            .service()
            .create_campaign(CampaignInput {
                topic: "pricing".to_string(),
                ..CampaignInput::default()
            })
            .await
            .unwrap();
        drop(context);

        let restarted = Context::new(config).await.unwrap();
        let campaigns = restarted.service().campaigns(10).await.unwrap();
        assert_eq!(campaigns, vec![created]);

        drop(restarted);
        let _ = std::fs::remove_file(&path);
    }
}
