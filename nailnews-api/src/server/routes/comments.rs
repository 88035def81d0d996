use crate::server::{
    Result, ServerError, ServerRouter,
    auth::AuthenticatedUser,
    json::{Created, Json},
};
use axum::extract::State;
use axum_extra::routing::{RouterExt, TypedPath};
use nailnews_common::model::{
    Id, ModelValidationError,
    engagement::{Comment, CreateComment},
    post::PostMarker,
};
use nailnews_db::client::{DbClient, DbError};
use serde::Deserialize;
use std::sync::Arc;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_get(get_comments)
        .typed_post(create_comment)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts/{id}/comments", rejection(ServerError))]
struct CommentsPath {
    id: Id<PostMarker>,
}

async fn get_comments(
    CommentsPath { id }: CommentsPath,
    State(db): State<Arc<DbClient>>,
) -> Result<Json<Vec<Comment>>> {
    Ok(Json(db.fetch_comments(id).await?))
}

/// One review per author and post; a second one is `409 already reviewed`.
async fn create_comment(
    CommentsPath { id }: CommentsPath,
    State(db): State<Arc<DbClient>>,
    user: AuthenticatedUser,
    Json(comment): Json<CreateComment>,
) -> Result<Created<Comment>> {
    comment.validate().map_err(ModelValidationError::from)?;

    let comment = db
        .create_comment(id, user.user_id(), &comment)
        .await
        .map_err(|err| match err {
            DbError::MissingReference { .. } => ServerError::PostByIdNotFound(id),
            err => ServerError::from_comment_error(err),
        })?;

    Ok(Created(comment))
}
