mod admin;
mod cache;
mod campaigns;
mod error;
mod mentions;
mod stats;


use crate::models::context::ContextPointer;
use rocket::{catchers, routes, Build, Rocket};

use error::ApiResult;

pub fn build(context: ContextPointer) -> Rocket<Build> {
    rocket::build()
        .manage(context)
        .mount(
            "/api",
            routes![
                admin::health,
                admin::collect,
                admin::store_stats,
                admin::clear_store,
                stats::stats,
                mentions::list_mentions,
                mentions::get_mention,
                cache::clear_cache,
                cache::cache_info,
                cache::cache_stats,
                campaigns::list_campaigns,
                campaigns::create_campaign,
            ],
        )
        .register("/", catchers![error::default_catcher])
}
