use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use getset::Getters;
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use serde_inline_default::serde_inline_default;
use std::str::FromStr;

const CONFIG_PATH_VAR: &str = "PULSE_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "pulse.yaml";
const ENV_PREFIX: &str = "PULSE_";
const PROVIDER_KEYS: [&str; 2] = ["SERPAPI_KEY", "GEMINI_API_KEY"];

#[serde_inline_default]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Getters)]
#[get = "pub"]
pub struct Config {
    #[serde_inline_default("Taboola".to_string())]
    default_entity: String,
    #[serde_inline_default(30)]
    default_days: u32,
    #[serde_inline_default(20)]
    default_limit: usize,
    #[serde_inline_default(10)]
    cache_ttl_minutes: i64,
    #[serde_inline_default(1000)]
    cache_max_entries: usize,
    #[serde_inline_default(10.0)]
    rate_limit_qps: f64,
    #[serde_inline_default("gemini-2.5-flash".to_string())]
    gemini_model: String,
    #[serde_inline_default("info".to_string())]
    log_level: String,
    #[serde_inline_default("pulse.db".to_string())]
    db_path: String,
    #[serde(default)]
    serpapi_key: Option<String>,
    #[serde(default)]
    gemini_api_key: Option<String>,
}

impl Config {
    /// Layers, lowest priority first: field defaults, the YAML file named by
    /// `PULSE_CONFIG` (or `pulse.yaml`), `PULSE_*` variables, provider keys.
    pub fn figment() -> Figment {
        let path = std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).ignore(&["CONFIG"]))
            .merge(Env::raw().only(&PROVIDER_KEYS))
    }

    pub fn load() -> Result<Self, figment::Error> {
        Self::figment().extract()
    }

    pub fn level_filter(&self) -> LevelFilter {
        LevelFilter::from_str(&self.log_level).unwrap_or(LevelFilter::Info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults() {
        Jail::expect_with(|_jail| {
            let config = Config::load()?;
            assert_eq!(config.default_entity(), "Taboola");
            assert_eq!(*config.default_days(), 30);
            assert_eq!(*config.default_limit(), 20);
            assert_eq!(*config.cache_ttl_minutes(), 10);
            assert_eq!(*config.cache_max_entries(), 1000);
            assert_eq!(*config.rate_limit_qps(), 10.0);
            assert_eq!(config.gemini_model(), "gemini-2.5-flash");
            assert_eq!(config.level_filter(), LevelFilter::Info);
            assert_eq!(config.db_path(), "pulse.db");
            assert_eq!(config.serpapi_key(), &None);
            Ok(())
        });
    }

    #[test]
    fn test_layers_override_in_order() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "pulse.yaml",
                "default_entity: Realize\ndefault_days: 14\nlog_level: debug\n",
            )?;
            jail.set_env("PULSE_DEFAULT_DAYS", "7");
            jail.set_env("PULSE_DB_PATH", "/var/lib/pulse/mentions.db");
            jail.set_env("SERPAPI_KEY", "serp-secret");

            let config = Config::load()?;
            assert_eq!(config.default_entity(), "Realize");
            assert_eq!(*config.default_days(), 7);
            assert_eq!(config.db_path(), "/var/lib/pulse/mentions.db");
            assert_eq!(config.level_filter(), LevelFilter::Debug);
            assert_eq!(config.serpapi_key().as_deref(), Some("serp-secret"));
            assert_eq!(config.gemini_api_key(), &None);
            Ok(())
        });
    }

    #[test]
    fn test_config_path_from_env() {
        Jail::expect_with(|jail| {
            jail.create_file("staging.yaml", "cache_ttl_minutes: 3\n")?;
            jail.set_env("PULSE_CONFIG", "staging.yaml");

            let config = Config::load()?;
            assert_eq!(*config.cache_ttl_minutes(), 3);
            Ok(())
        });
    }

    #[test]
    fn test_unknown_log_level_falls_back_to_info() {
        Jail::expect_with(|jail| {
            jail.set_env("PULSE_LOG_LEVEL", "chatty");
            assert_eq!(Config::load()?.level_filter(), LevelFilter::Info);
            Ok(())
        });
    }
}
