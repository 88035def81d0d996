use crate::server::{
    Result, ServerError, ServerRouter, ServerSettings,
    auth::AuthenticatedUser,
    json::{Created, Json},
    routes::sessions::issue_session,
};
use axum::extract::State;
use axum_extra::routing::{RouterExt, TypedPath};
use nailnews_common::model::{
    Id, ModelValidationError,
    auth::IssuedSession,
    post::{PartialPost, Post},
    transaction::{Transaction, Wallet},
    user::{CreateUser, Profile, ProfilePatch, User, UserHandle, UserMarker},
};
use nailnews_db::client::{DbClient, DbError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::info;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_post(create_user)
        .typed_get(get_me)
        .typed_patch(update_me)
        .typed_get(get_favorites)
        .typed_get(get_transactions)
        .typed_get(get_wallet)
        .typed_get(get_user)
        .typed_get(get_user_by_handle)
        .typed_get(get_user_posts)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/users/create", rejection(ServerError))]
struct CreateUserPath();

#[derive(Clone, Debug, Serialize)]
struct SignUp {
    user: User,
    session: IssuedSession,
}

async fn create_user(
    _: CreateUserPath,
    State(db): State<Arc<DbClient>>,
    State(settings): State<Arc<ServerSettings>>,
    Json(request): Json<CreateUser>,
) -> Result<Created<SignUp>> {
    ProfilePatch {
        display_name: request.display_name.clone(),
        avatar_url: None,
    }
    .validate()
    .map_err(ModelValidationError::from)?;

    let user = db.create_user(&request).await.map_err(|err| match err {
        DbError::Conflict { .. } => ServerError::HandleTaken,
        err => err.into(),
    })?;
    let session = issue_session(&db, &settings, user.id).await?;

    info!(user = %user.id, handle = user.handle.get(), "Signed up");
    Ok(Created(SignUp { user, session }))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/users/me", rejection(ServerError))]
struct MePath();

async fn get_me(
    _: MePath,
    State(db): State<Arc<DbClient>>,
    user: AuthenticatedUser,
) -> Result<Json<Profile>> {
    let profile = db
        .fetch_profile(user.user_id())
        .await?
        .ok_or(ServerError::UserByIdNotFound(user.user_id()))?;

    Ok(Json(profile))
}

async fn update_me(
    _: MePath,
    State(db): State<Arc<DbClient>>,
    user: AuthenticatedUser,
    Json(patch): Json<ProfilePatch>,
) -> Result<Json<Profile>> {
    patch.validate().map_err(ModelValidationError::from)?;

    let profile = db
        .update_profile(user.user_id(), &patch)
        .await?
        .ok_or(ServerError::UserByIdNotFound(user.user_id()))?;

    Ok(Json(profile))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/users/me/favorites", rejection(ServerError))]
struct MyFavoritesPath();

async fn get_favorites(
    _: MyFavoritesPath,
    State(db): State<Arc<DbClient>>,
    user: AuthenticatedUser,
) -> Result<Json<Vec<Post>>> {
    Ok(Json(db.fetch_favorite_posts(user.user_id()).await?))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/users/me/transactions", rejection(ServerError))]
struct MyTransactionsPath();

async fn get_transactions(
    _: MyTransactionsPath,
    State(db): State<Arc<DbClient>>,
    user: AuthenticatedUser,
) -> Result<Json<Vec<Transaction>>> {
    Ok(Json(db.fetch_transactions(user.user_id()).await?))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/users/me/wallet", rejection(ServerError))]
struct MyWalletPath();

async fn get_wallet(
    _: MyWalletPath,
    State(db): State<Arc<DbClient>>,
    user: AuthenticatedUser,
) -> Result<Json<Wallet>> {
    let transactions = db.fetch_transactions(user.user_id()).await?;
    Ok(Json(Wallet::from_transactions(&transactions)))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/users/{id}", rejection(ServerError))]
struct GetUserPath {
    id: Id<UserMarker>,
}

async fn get_user(
    GetUserPath { id }: GetUserPath,
    State(db): State<Arc<DbClient>>,
) -> Result<Json<User>> {
    let user = db
        .fetch_user(id)
        .await?
        .ok_or(ServerError::UserByIdNotFound(id))?;

    Ok(Json(user))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/users/by-handle/{handle}", rejection(ServerError))]
struct UserByHandlePath {
    handle: UserHandle,
}

async fn get_user_by_handle(
    UserByHandlePath { handle }: UserByHandlePath,
    State(db): State<Arc<DbClient>>,
) -> Result<Json<User>> {
    let user = db
        .fetch_user_by_handle(&handle)
        .await?
        .ok_or(ServerError::UserByHandleNotFound(handle))?;

    Ok(Json(user))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/users/{id}/posts", rejection(ServerError))]
struct GetUserPostsPath {
    id: Id<UserMarker>,
}

/// A profile's post with whether it currently shows up as featured.
#[derive(Clone, Debug, Serialize)]
struct UserPost {
    #[serde(flatten)]
    post: PartialPost,
    featured: bool,
}

fn mark_featured(posts: Vec<PartialPost>, now: OffsetDateTime) -> Vec<UserPost> {
    posts
        .into_iter()
        .map(|post| UserPost {
            featured: post.is_featured(now),
            post,
        })
        .collect()
}

async fn get_user_posts(
    GetUserPostsPath { id }: GetUserPostsPath,
    State(db): State<Arc<DbClient>>,
) -> Result<Json<Vec<UserPost>>> {
    let posts = db
        .fetch_user_posts(id)
        .await?
        .ok_or(ServerError::UserByIdNotFound(id))?;

    Ok(Json(mark_featured(posts, OffsetDateTime::now_utc())))
}
