use crate::server::{
    Result, ServerError, ServerRouter, ServerSettings, auth::CurrentSession, json::Created,
};
use axum::extract::State;
use axum_extra::routing::{RouterExt, TypedPath};
use nailnews_common::model::{
    Id,
    auth::{IssuedSession, SessionToken},
    user::UserMarker,
};
use nailnews_db::client::DbClient;
use serde::Deserialize;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::info;

pub fn routes() -> ServerRouter {
    ServerRouter::new().typed_post(rotate_session)
}

/// Mints a token, stores only its hash and returns the plain token once.
pub(super) async fn issue_session(
    db: &DbClient,
    settings: &ServerSettings,
    user_id: Id<UserMarker>,
) -> Result<IssuedSession> {
    let token = SessionToken::generate_random(user_id);
    let token_hash = token.hash()?;
    let issued = token.issue(OffsetDateTime::now_utc(), settings.session_lifetime);

    db.create_session(user_id, &token_hash, issued.expires_at).await?;

    Ok(issued)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/sessions", rejection(ServerError))]
struct SessionsPath();

/// Replaces the presented token. The old one stops working immediately.
async fn rotate_session(
    _: SessionsPath,
    State(db): State<Arc<DbClient>>,
    State(settings): State<Arc<ServerSettings>>,
    current: CurrentSession,
) -> Result<Created<IssuedSession>> {
    let user_id = current.user.user_id();
    let now = OffsetDateTime::now_utc();

    let token = SessionToken::generate_random(user_id);
    let token_hash = token.hash()?;
    let issued = token.issue(now, settings.session_lifetime);

    let rotated = db
        .rotate_session(user_id, &current.token_hash, &token_hash, issued.expires_at, now)
        .await?;
    if !rotated {
        return Err(ServerError::InvalidToken);
    }
    info!(user = %user_id, "Rotated session");

    Ok(Created(issued))
}

#[cfg(test)]
mod tests {
    use crate::server::test_support::send;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };

    #[tokio::test]
    async fn rotation_needs_the_current_token() {
        let response = send(Request::post("/sessions").body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
