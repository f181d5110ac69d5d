use super::ApiResult;
use crate::models::context::ContextPointer;
use mention_monitor::{StatsQuery, StatsReport};
use rocket::serde::json::Json;
use rocket::{get, State};

/// Aggregated statistics for an entity over a time window
#[get("/stats?<entity>&<days>&<limit>&<force_refresh>&<use_db>")]
pub async fn stats(
    ctx: &State<ContextPointer>,
    entity: Option<String>,
    days: Option<u32>,
    limit: Option<usize>,
    force_refresh: Option<bool>,
    use_db: Option<bool>,
) -> ApiResult<StatsReport> {
    ctx.rate_limiter().acquire().await;

    let config = ctx.config();
    let query = StatsQuery {
        entity: entity.unwrap_or_else(|| config.default_entity().clone()),
        days: days.unwrap_or(*config.default_days()),
        limit: limit.unwrap_or(*config.default_limit()),
        force_refresh: force_refresh.unwrap_or(false),
        use_db: use_db.unwrap_or(true),
    };

    Ok(Json(ctx.service().stats(&query).await?))
}
