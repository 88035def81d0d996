//! Privileged single-write endpoints called straight from the browser.
//!
//! They answer `{ "success": true }` and carry a fixed CORS policy.

use crate::server::{Result, ServerError, ServerRouter, auth::AdminUser, json::Json};
use axum::{
    extract::State,
    http::{
        HeaderName, Method,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
};
use axum_extra::routing::{RouterExt, TypedPath};
use nailnews_common::model::{
    Id,
    user::{PhoneNumber, Role, UserMarker},
};
use nailnews_db::client::DbClient;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

const X_CLIENT_INFO: HeaderName = HeaderName::from_static("x-client-info");
const APIKEY: HeaderName = HeaderName::from_static("apikey");

fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_headers([AUTHORIZATION, X_CLIENT_INFO, APIKEY, CONTENT_TYPE])
        .allow_methods([Method::POST, Method::OPTIONS])
}

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_post(set_user_role)
        .typed_post(update_phone)
        .layer(cors())
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize)]
struct Success {
    success: bool,
}

const SUCCESS: Json<Success> = Json(Success { success: true });

#[derive(TypedPath, Deserialize)]
#[typed_path("/functions/set-user-role", rejection(ServerError))]
struct SetUserRolePath();

#[derive(Copy, Clone, Debug, Deserialize)]
struct SetUserRole {
    user_id: Id<UserMarker>,
    role: Role,
}

async fn set_user_role(
    SetUserRolePath(): SetUserRolePath,
    State(db): State<Arc<DbClient>>,
    AdminUser(admin): AdminUser,
    Json(request): Json<SetUserRole>,
) -> Result<Json<Success>> {
    if !db.set_user_role(request.user_id, request.role).await? {
        return Err(ServerError::UnknownTargetUser(request.user_id));
    }
    info!(admin = %admin.user_id(), user = %request.user_id, role = %request.role, "Changed role");

    Ok(SUCCESS)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/functions/update-phone", rejection(ServerError))]
struct UpdatePhonePath();

#[derive(Clone, Debug, Deserialize)]
struct UpdatePhone {
    user_id: Id<UserMarker>,
    phone: PhoneNumber,
}

async fn update_phone(
    UpdatePhonePath(): UpdatePhonePath,
    State(db): State<Arc<DbClient>>,
    AdminUser(admin): AdminUser,
    Json(request): Json<UpdatePhone>,
) -> Result<Json<Success>> {
    if !db.update_phone(request.user_id, &request.phone).await? {
        return Err(ServerError::UnknownTargetUser(request.user_id));
    }
    info!(admin = %admin.user_id(), user = %request.user_id, "Changed phone number");

    Ok(SUCCESS)
}

#[cfg(test)]
mod tests {
    use crate::server::test_support::send;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };

    #[tokio::test]
    async fn preflight_gets_the_fixed_cors_headers() {
        let response = send(
            Request::builder()
                .method("OPTIONS")
                .uri("/functions/set-user-role")
                .header("origin", "https://nailnews.example")
                .header("access-control-request-method", "POST")
                .header("access-control-request-headers", "authorization, content-type")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers["access-control-allow-origin"], "*");
        let allowed = headers["access-control-allow-headers"].to_str().unwrap();
        for header in ["authorization", "x-client-info", "apikey", "content-type"] {
            assert!(allowed.contains(header), "{header} missing from {allowed}");
        }
        assert!(
            headers["access-control-allow-methods"]
                .to_str()
                .unwrap()
                .contains("POST")
        );
    }

    #[tokio::test]
    async fn errors_keep_cors_headers() {
        let response = send(
            Request::post("/functions/update-phone")
                .header("origin", "https://nailnews.example")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"user_id": 1, "phone": "555-0100"}"#))
                .unwrap(),
        )
        .await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
    }
}
