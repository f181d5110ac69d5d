use super::ApiResult;
use crate::models::context::ContextPointer;
use mention_monitor::service::{CollectRequest, CollectSummary};
use mention_monitor::store::StoreSummary;
use rocket::serde::json::Json;
use rocket::{delete, get, post, State};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct Health {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StoreCleared {
    pub status: String,
    pub entity: Option<String>,
    pub removed: usize,
}

#[get("/health")]
pub fn health() -> Json<Health> {
    Json(Health {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Collect, analyze and aggregate now; the report is cached for `/stats`
#[post("/collect", data = "<request>")]
pub async fn collect(
    ctx: &State<ContextPointer>,
    request: Json<CollectRequest>,
) -> ApiResult<CollectSummary> {
    ctx.rate_limiter().acquire().await;
    Ok(Json(ctx.service().collect(&request).await?))
}

#[get("/db/stats")]
pub async fn store_stats(ctx: &State<ContextPointer>) -> ApiResult<StoreSummary> {
    Ok(Json(ctx.service().store_summary().await?))
}

#[delete("/db/clear?<entity>")]
pub async fn clear_store(
    ctx: &State<ContextPointer>,
    entity: Option<String>,
) -> ApiResult<StoreCleared> {
    let removed = ctx.service().clear_store(entity.as_deref()).await?;

    Ok(Json(StoreCleared {
        status: "database cleared".to_string(),
        entity,
        removed,
    }))
}
