use super::ApiResult;
use crate::models::context::ContextPointer;
use mention_monitor::{Campaign, CampaignInput};
use rocket::serde::json::Json;
use rocket::{get, post, State};

const DEFAULT_CAMPAIGN_LIMIT: usize = 20;

#[get("/campaigns?<limit>")]
pub async fn list_campaigns(
    ctx: &State<ContextPointer>,
    limit: Option<usize>,
) -> ApiResult<Vec<Campaign>> {
    let campaigns = ctx
        .service()
        .campaigns(limit.unwrap_or(DEFAULT_CAMPAIGN_LIMIT))
        .await?;
    Ok(Json(campaigns))
}

#[post("/campaigns", data = "<input>")]
pub async fn create_campaign(
    ctx: &State<ContextPointer>,
    input: Json<CampaignInput>,
) -> ApiResult<Campaign> {
    Ok(Json(ctx.service().create_campaign(input.into_inner()).await?))
}
