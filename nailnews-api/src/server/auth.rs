use crate::server::ServerError;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};
use nailnews_common::model::{
    Id,
    auth::{SessionToken, SessionTokenHash},
    user::{Role, UserMarker},
};
use nailnews_db::client::DbClient;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::debug;

type AuthorizationHeader = TypedHeader<Authorization<Bearer>>;

/// Caller identified by a bearer session token.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct AuthenticatedUser {
    id: Id<UserMarker>,
    role: Role,
}

impl AuthenticatedUser {
    #[must_use]
    pub fn user_id(self) -> Id<UserMarker> {
        self.id
    }

    #[must_use]
    pub fn is_admin(self) -> bool {
        self.role.is_admin()
    }

    /// Owners and admins may change a resource.
    pub fn ensure_can_modify(self, owner: Id<UserMarker>) -> Result<(), ServerError> {
        if self.id == owner || self.is_admin() {
            Ok(())
        } else {
            Err(ServerError::Forbidden)
        }
    }
}

/// The presented session, for handlers acting on the session itself.
#[derive(Clone, Debug)]
pub struct CurrentSession {
    pub user: AuthenticatedUser,
    pub token_hash: SessionTokenHash,
}

impl<S> FromRequestParts<S> for CurrentSession
where
    Arc<DbClient>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let request_token: SessionToken = AuthorizationHeader::from_request_parts(parts, state)
            .await
            .map_err(ServerError::InvalidAuthorizationHeader)?
            .token()
            .parse()?;

        let token_hash = request_token.hash()?;

        let session = Arc::<DbClient>::from_ref(state)
            .fetch_session(&token_hash)
            .await?
            .ok_or(ServerError::InvalidToken)?;

        if session.user != request_token.user_id {
            return Err(ServerError::InvalidToken);
        }
        if !session.is_active(OffsetDateTime::now_utc()) {
            debug!(user = %session.user, "Rejecting expired or rotated session");
            return Err(ServerError::InvalidToken);
        }

        Ok(Self {
            user: AuthenticatedUser {
                id: session.user,
                role: session.role,
            },
            token_hash,
        })
    }
}

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    Arc<DbClient>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let session = CurrentSession::from_request_parts(parts, state).await?;
        Ok(session.user)
    }
}

/// Caller holding the admin role. Anyone else gets 403.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct AdminUser(pub AuthenticatedUser);

impl<S> FromRequestParts<S> for AdminUser
where
    Arc<DbClient>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = AuthenticatedUser::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            return Err(ServerError::Forbidden);
        }
        Ok(Self(user))
    }
}
