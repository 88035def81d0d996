use crate::server::{Result, ServerError, ServerRouter, auth::AuthenticatedUser};
use axum::{extract::State, http::StatusCode};
use axum_extra::routing::{RouterExt, TypedPath};
use nailnews_common::model::{Id, post::PostMarker};
use nailnews_db::client::{DbClient, DbError};
use serde::Deserialize;
use std::sync::Arc;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_put(add_favorite)
        .typed_delete(remove_favorite)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts/{id}/favorite", rejection(ServerError))]
struct FavoritePath {
    id: Id<PostMarker>,
}

/// Idempotent, so a retried toggle is harmless.
async fn add_favorite(
    FavoritePath { id }: FavoritePath,
    State(db): State<Arc<DbClient>>,
    user: AuthenticatedUser,
) -> Result<StatusCode> {
    db.add_favorite(user.user_id(), id)
        .await
        .map_err(|err| match err {
            DbError::MissingReference { .. } => ServerError::PostByIdNotFound(id),
            err => err.into(),
        })?;

    Ok(StatusCode::NO_CONTENT)
}

async fn remove_favorite(
    FavoritePath { id }: FavoritePath,
    State(db): State<Arc<DbClient>>,
    user: AuthenticatedUser,
) -> Result<StatusCode> {
    db.remove_favorite(user.user_id(), id).await?;
    Ok(StatusCode::NO_CONTENT)
}
