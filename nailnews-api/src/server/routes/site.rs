use crate::server::{Result, ServerError, ServerRouter, json::Json};
use axum::extract::State;
use axum_extra::routing::{RouterExt, TypedPath};
use nailnews_common::model::site::Banner;
use nailnews_db::client::DbClient;
use serde::Deserialize;
use std::sync::Arc;

pub fn routes() -> ServerRouter {
    ServerRouter::new().typed_get(get_banners)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/banners", rejection(ServerError))]
struct BannersPath();

async fn get_banners(
    BannersPath(): BannersPath,
    State(db): State<Arc<DbClient>>,
) -> Result<Json<Vec<Banner>>> {
    Ok(Json(db.fetch_banners(true).await?))
}
