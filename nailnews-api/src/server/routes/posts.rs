use crate::server::{
    Result, ServerError, ServerRouter,
    auth::AuthenticatedUser,
    json::{Created, Json},
    query::Query,
};
use axum::{extract::State, http::StatusCode};
use axum_extra::routing::{RouterExt, TypedPath};
use nailnews_common::model::{
    Id, ModelValidationError,
    listing::Category,
    post::{Post, PostDraft, PostMarker, PostPatch, validate_tags},
    tag::TagName,
};
use nailnews_db::client::DbClient;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::info;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_post(create_post)
        .typed_get(get_featured_posts)
        .typed_get(search_posts)
        .typed_get(get_post)
        .typed_patch(update_post)
        .typed_delete(delete_post)
        .typed_put(replace_tags)
        .typed_post(record_view)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts/create", rejection(ServerError))]
struct CreatePostPath();

/// Free listings only. Paid tiers are bought through `/payments/intents`.
async fn create_post(
    CreatePostPath(): CreatePostPath,
    State(db): State<Arc<DbClient>>,
    user: AuthenticatedUser,
    Json(draft): Json<PostDraft>,
) -> Result<Created<Post>> {
    draft.validate().map_err(ModelValidationError::from)?;
    if draft.selection.duration().is_some() {
        return Err(ServerError::PaymentRequired(draft.selection));
    }

    let post = db
        .create_post(user.user_id(), &draft, OffsetDateTime::now_utc())
        .await?;
    info!(post = %post.id, author = %user.user_id(), "Created free post");

    Ok(Created(post))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts/{id}", rejection(ServerError))]
struct PostPath {
    id: Id<PostMarker>,
}

async fn get_post(
    PostPath { id }: PostPath,
    State(db): State<Arc<DbClient>>,
) -> Result<Json<Post>> {
    let post = db
        .fetch_post(id)
        .await?
        .ok_or(ServerError::PostByIdNotFound(id))?;

    Ok(Json(post))
}

async fn update_post(
    PostPath { id }: PostPath,
    State(db): State<Arc<DbClient>>,
    user: AuthenticatedUser,
    Json(mut patch): Json<PostPatch>,
) -> Result<Json<Post>> {
    let post = db
        .fetch_post(id)
        .await?
        .ok_or(ServerError::PostByIdNotFound(id))?;
    user.ensure_can_modify(post.author.id)?;

    let tags = patch.tags.take();
    if let Some(tags) = &tags {
        validate_tags(tags).map_err(ModelValidationError::from)?;
    }
    let content = post
        .content
        .patched(patch)
        .map_err(ModelValidationError::from)?;

    let post = db.update_post(id, &content, tags.as_deref()).await?;
    Ok(Json(post))
}

async fn delete_post(
    PostPath { id }: PostPath,
    State(db): State<Arc<DbClient>>,
    user: AuthenticatedUser,
) -> Result<StatusCode> {
    let post = db
        .fetch_post(id)
        .await?
        .ok_or(ServerError::PostByIdNotFound(id))?;
    user.ensure_can_modify(post.author.id)?;

    if !db.delete_post(id).await? {
        return Err(ServerError::PostByIdNotFound(id));
    }
    info!(post = %id, by = %user.user_id(), "Deleted post");

    Ok(StatusCode::NO_CONTENT)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts/{id}/tags", rejection(ServerError))]
struct PostTagsPath {
    id: Id<PostMarker>,
}

#[derive(Clone, Debug, Deserialize)]
struct TagList {
    tags: Vec<TagName>,
}

/// Replaces the whole tag set of a post.
async fn replace_tags(
    PostTagsPath { id }: PostTagsPath,
    State(db): State<Arc<DbClient>>,
    user: AuthenticatedUser,
    Json(TagList { tags }): Json<TagList>,
) -> Result<Json<Post>> {
    validate_tags(&tags).map_err(ModelValidationError::from)?;

    let post = db
        .fetch_post(id)
        .await?
        .ok_or(ServerError::PostByIdNotFound(id))?;
    user.ensure_can_modify(post.author.id)?;

    db.set_post_tags(id, &tags).await?;
    let post = db
        .fetch_post(id)
        .await?
        .ok_or(ServerError::PostByIdNotFound(id))?;

    Ok(Json(post))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts/featured", rejection(ServerError))]
struct FeaturedPostsPath();

async fn get_featured_posts(
    FeaturedPostsPath(): FeaturedPostsPath,
    State(db): State<Arc<DbClient>>,
) -> Result<Json<Vec<Post>>> {
    let posts = db.fetch_featured_posts(OffsetDateTime::now_utc()).await?;
    Ok(Json(posts))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts/search", rejection(ServerError))]
struct SearchPostsPath();

#[derive(Clone, Debug, Default, Deserialize)]
struct SearchQuery {
    #[serde(default)]
    q: String,
    category: Option<Category>,
}

async fn search_posts(
    SearchPostsPath(): SearchPostsPath,
    Query(query): Query<SearchQuery>,
    State(db): State<Arc<DbClient>>,
) -> Result<Json<Vec<Post>>> {
    let posts = db.search_posts(&query.q, query.category).await?;
    Ok(Json(posts))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts/{id}/views", rejection(ServerError))]
struct PostViewsPath {
    id: Id<PostMarker>,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize)]
struct ViewCount {
    view_count: i64,
}

async fn record_view(
    PostViewsPath { id }: PostViewsPath,
    State(db): State<Arc<DbClient>>,
) -> Result<Json<ViewCount>> {
    let view_count = db
        .increment_view_count(id)
        .await?
        .ok_or(ServerError::PostByIdNotFound(id))?;

    Ok(Json(ViewCount { view_count }))
}

#[cfg(test)]
mod tests {
    use crate::server::test_support::{body_json, send};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };

    #[tokio::test]
    async fn creating_needs_a_session() {
        let response = send(
            Request::post("/posts/create")
                .header("content-type", "application/json")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn non_numeric_ids_are_404() {
        let response = send(Request::get("/posts/salon").body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["status"], 404);
    }

    #[tokio::test]
    async fn unknown_search_categories_are_rejected() {
        let response = send(
            Request::get("/posts/search?q=gel&category=spaceships")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn replacing_tags_needs_a_session() {
        let response = send(
            Request::put("/posts/11/tags")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"tags":["gel","acrylic"]}"#))
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
