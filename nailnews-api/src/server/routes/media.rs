use crate::{
    media::{Bucket, MediaStore, Upload, store_all},
    server::{
        Result, ServerError, ServerRouter, auth::AuthenticatedUser, json::Created, query::Query,
    },
};
use axum::extract::{Multipart, State};
use axum_extra::{
    extract::WithRejection,
    routing::{RouterExt, TypedPath},
};
use nailnews_common::model::post::MediaUrl;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

pub fn routes() -> ServerRouter {
    ServerRouter::new().typed_post(upload_media)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/media", rejection(ServerError))]
struct MediaPath();

#[derive(Clone, Debug, Deserialize)]
struct MediaQuery {
    bucket: String,
}

#[derive(Clone, Debug, Serialize)]
struct Uploaded {
    urls: Vec<MediaUrl>,
}

/// Every part of the multipart body is one file. URLs come back in part order.
async fn upload_media(
    MediaPath(): MediaPath,
    Query(query): Query<MediaQuery>,
    State(store): State<Arc<dyn MediaStore>>,
    user: AuthenticatedUser,
    WithRejection(mut multipart, _): WithRejection<Multipart, ServerError>,
) -> Result<Created<Uploaded>> {
    let bucket: Bucket = query.bucket.parse()?;

    let mut uploads = Vec::new();
    while let Some(field) = multipart.next_field().await? {
        let file_name = field.file_name().map(str::to_owned);
        let bytes = field.bytes().await?;
        uploads.push(Upload { file_name, bytes });
    }

    let count = uploads.len();
    let urls = store_all(store.as_ref(), bucket, uploads).await?;
    info!(user = %user.user_id(), bucket = bucket.as_str(), count, "Stored uploads");

    Ok(Created(Uploaded { urls }))
}
