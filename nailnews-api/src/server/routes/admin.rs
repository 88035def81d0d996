//! Back office. Every route requires the admin role.

use crate::server::{
    Result, ServerError, ServerRouter,
    auth::AdminUser,
    json::{Created, Json},
    query::Query,
};
use axum::{extract::State, http::StatusCode};
use axum_extra::routing::{RouterExt, TypedPath};
use nailnews_common::model::{
    Id,
    auth::LoginRecord,
    post::Post,
    pricing::{DiscountEntry, DiscountSchedule},
    site::{Banner, BannerMarker, CreateBanner, Setting},
    transaction::RevenueReportRow,
    user::{Profile, UserMarker},
};
use nailnews_db::client::DbClient;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

pub const DEFAULT_PAGE_SIZE: i64 = 100;
pub const MAX_PAGE_SIZE: i64 = 500;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_get(get_users)
        .typed_get(get_posts)
        .typed_get(get_login_history)
        .typed_get(get_revenue)
        .typed_put(put_discount)
        .typed_post(create_banner)
        .typed_delete(delete_banner)
        .typed_get(get_settings)
        .typed_put(put_setting)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/admin/users", rejection(ServerError))]
struct UsersPath();

async fn get_users(
    UsersPath(): UsersPath,
    State(db): State<Arc<DbClient>>,
    _: AdminUser,
) -> Result<Json<Vec<Profile>>> {
    Ok(Json(db.fetch_all_users().await?))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/admin/posts", rejection(ServerError))]
struct PostsPath();

#[derive(Copy, Clone, Debug, Default, Deserialize)]
struct Page {
    limit: Option<i64>,
    offset: Option<i64>,
}

async fn get_posts(
    PostsPath(): PostsPath,
    Query(page): Query<Page>,
    State(db): State<Arc<DbClient>>,
    _: AdminUser,
) -> Result<Json<Vec<Post>>> {
    let limit = page.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = page.offset.unwrap_or(0).max(0);

    Ok(Json(db.fetch_all_posts(limit, offset).await?))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/admin/users/{id}/logins", rejection(ServerError))]
struct LoginHistoryPath {
    id: Id<UserMarker>,
}

async fn get_login_history(
    LoginHistoryPath { id }: LoginHistoryPath,
    State(db): State<Arc<DbClient>>,
    _: AdminUser,
) -> Result<Json<Vec<LoginRecord>>> {
    Ok(Json(db.fetch_login_history(id).await?))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/admin/revenue", rejection(ServerError))]
struct RevenuePath();

async fn get_revenue(
    RevenuePath(): RevenuePath,
    State(db): State<Arc<DbClient>>,
    _: AdminUser,
) -> Result<Json<Vec<RevenueReportRow>>> {
    Ok(Json(db.fetch_revenue_report().await?))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/admin/discounts", rejection(ServerError))]
struct DiscountsPath();

/// Stored for display only; checkout charges the flat monthly price.
async fn put_discount(
    DiscountsPath(): DiscountsPath,
    State(db): State<Arc<DbClient>>,
    AdminUser(admin): AdminUser,
    Json(entry): Json<DiscountEntry>,
) -> Result<Json<DiscountSchedule>> {
    if entry.percent_off > 100 {
        return Err(ServerError::InvalidDiscount(entry.percent_off));
    }

    db.upsert_discount(&entry).await?;
    info!(
        admin = %admin.user_id(),
        months = entry.duration_months.months(),
        percent_off = entry.percent_off,
        "Updated discount"
    );

    Ok(Json(db.fetch_discount_schedule().await?))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/admin/banners", rejection(ServerError))]
struct BannersPath();

async fn create_banner(
    BannersPath(): BannersPath,
    State(db): State<Arc<DbClient>>,
    _: AdminUser,
    Json(banner): Json<CreateBanner>,
) -> Result<Created<Banner>> {
    Ok(Created(db.create_banner(&banner).await?))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/admin/banners/{id}", rejection(ServerError))]
struct BannerPath {
    id: Id<BannerMarker>,
}

async fn delete_banner(
    BannerPath { id }: BannerPath,
    State(db): State<Arc<DbClient>>,
    _: AdminUser,
) -> Result<StatusCode> {
    if !db.delete_banner(id).await? {
        return Err(ServerError::BannerByIdNotFound(id));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/admin/settings", rejection(ServerError))]
struct SettingsPath();

async fn get_settings(
    SettingsPath(): SettingsPath,
    State(db): State<Arc<DbClient>>,
    _: AdminUser,
) -> Result<Json<Vec<Setting>>> {
    Ok(Json(db.fetch_settings().await?))
}

async fn put_setting(
    SettingsPath(): SettingsPath,
    State(db): State<Arc<DbClient>>,
    _: AdminUser,
    Json(setting): Json<Setting>,
) -> Result<Json<Setting>> {
    db.put_setting(&setting).await?;
    Ok(Json(setting))
}

#[cfg(test)]
mod tests {
    use crate::server::test_support::send;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };

    #[tokio::test]
    async fn back_office_needs_a_session() {
        for uri in ["/admin/users", "/admin/posts", "/admin/revenue", "/admin/settings"] {
            let response = send(Request::get(uri).body(Body::empty()).unwrap()).await;
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{uri}");
        }
    }
}
