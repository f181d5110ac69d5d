use super::ApiResult;
use crate::models::context::ContextPointer;
use mention_monitor::{ClassifiedMention, Error, MentionQuery, Sentiment};
use rocket::serde::json::Json;
use rocket::{get, State};
use std::str::FromStr;

const DEFAULT_LIST_LIMIT: usize = 50;

/// Analyzed mentions, optionally filtered by sentiment and category
#[get("/mentions?<entity>&<sentiment>&<category>&<days>&<limit>&<use_db>")]
pub async fn list_mentions(
    ctx: &State<ContextPointer>,
    entity: Option<String>,
    sentiment: Option<String>,
    category: Option<String>,
    days: Option<u32>,
    limit: Option<usize>,
    use_db: Option<bool>,
) -> ApiResult<Vec<ClassifiedMention>> {
    ctx.rate_limiter().acquire().await;

    let sentiment = sentiment
        .map(|label| {
            Sentiment::from_str(&label)
                .map_err(|_| Error::Validation(format!("unknown sentiment: {}", label)))
        })
        .transpose()?;

    let config = ctx.config();
    let query = MentionQuery {
        entity: entity.unwrap_or_else(|| config.default_entity().clone()),
        sentiment,
        category,
        days: days.unwrap_or(*config.default_days()),
        limit: limit.unwrap_or(DEFAULT_LIST_LIMIT),
        use_db: use_db.unwrap_or(false),
    };

    Ok(Json(ctx.service().mentions(&query).await?))
}

#[get("/mentions/<id>?<days>&<entity>&<use_db>")]
pub async fn get_mention(
    ctx: &State<ContextPointer>,
    id: &str,
    days: Option<u32>,
    entity: Option<String>,
    use_db: Option<bool>,
) -> ApiResult<ClassifiedMention> {
    ctx.rate_limiter().acquire().await;

    let config = ctx.config();
    let entity = entity.unwrap_or_else(|| config.default_entity().clone());
    let days = days.unwrap_or(*config.default_days());

    let mention = ctx
        .service()
        .mention(id, &entity, days, use_db.unwrap_or(false))
        .await?;
    Ok(Json(mention))
}
