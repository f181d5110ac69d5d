use crate::models::context::ContextPointer;
use mention_monitor::service::CacheInfo;
use mention_monitor::CacheStats;
use rocket::serde::json::Json;
use rocket::{delete, get, State};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct CacheStatsResponse {
    pub cache_stats: CacheStats,
    pub cache_enabled: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CacheCleared {
    pub status: String,
    pub pattern: Option<String>,
    pub removed: usize,
}

/// Clear the cache, or only the entries whose key contains `pattern`
#[delete("/cache?<pattern>")]
pub fn clear_cache(ctx: &State<ContextPointer>, pattern: Option<String>) -> Json<CacheCleared> {
    let removed = ctx.service().clear_cache(pattern.as_deref());

    Json(CacheCleared {
        status: "cache cleared".to_string(),
        pattern,
        removed,
    })
}

#[get("/cache/info")]
pub fn cache_info(ctx: &State<ContextPointer>) -> Json<CacheInfo> {
    Json(ctx.service().cache_info())
}

/// Get current cache statistics
#[get("/cache/stats")]
pub fn cache_stats(ctx: &State<ContextPointer>) -> Json<CacheStatsResponse> {
    let service = ctx.service();

    Json(CacheStatsResponse {
        cache_stats: service.cache_stats(),
        cache_enabled: service.stats_cache().config.enabled,
    })
}
