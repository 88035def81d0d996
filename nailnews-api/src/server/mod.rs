use crate::{
    media::{MediaError, MediaStore},
    payment::{PaymentError, PaymentProcessor},
};
use axum::{
    Router,
    extract::{
        FromRef, Request,
        multipart::{MultipartError, MultipartRejection},
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
};
use axum_extra::typed_header::TypedHeaderRejection;
use json::Json;
use nailnews_common::model::{
    Id, ModelValidationError,
    auth::{SessionTokenDecodeError, SessionTokenHashError},
    payment::{IdempotencyKey, InvalidIdempotencyKeyError, InvalidPaymentTransition},
    post::PostMarker,
    pricing::{PriceSchedule, TierSelection},
    site::BannerMarker,
    user::{UserHandle, UserMarker},
};
use nailnews_db::client::{COMMENT_UNIQUE_CONSTRAINT, DbClient, DbError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use time::Duration;
use tracing::error;

mod auth;
mod json;
mod query;
mod routes;

pub type ServerRouter = Router<ServerState>;

/// Settings handlers read but never change.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct ServerSettings {
    pub prices: PriceSchedule,
    pub currency: String,
    pub session_lifetime: Option<Duration>,
}

#[derive(Clone, Debug, FromRef)]
pub struct ServerState {
    pub db_client: Arc<DbClient>,
    pub payments: Arc<dyn PaymentProcessor>,
    pub media: Arc<dyn MediaStore>,
    pub settings: Arc<ServerSettings>,
}

pub fn routes() -> ServerRouter {
    routes::routes().fallback(fallback)
}

pub async fn fallback(request: Request) -> ServerError {
    ServerError::UnknownRoute(request.into_parts().0.uri)
}

pub type Result<T, E = ServerError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Unknown route requested: {0}")]
    UnknownRoute(Uri),
    #[error("Path rejected: {0}")]
    PathRejection(#[from] PathRejection),
    #[error("Query rejected: {0}")]
    QueryRejection(#[from] QueryRejection),
    #[error("Incoming JSON rejected: {0}")]
    JsonRejection(#[from] JsonRejection),
    #[error("Multipart body rejected: {0}")]
    MultipartRejection(#[from] MultipartRejection),
    #[error("Multipart body could not be read: {0}")]
    Multipart(#[from] MultipartError),
    #[error("JSON response could not be serialized: {0}")]
    JsonResponse(#[from] serde_json::Error),
    #[error("Authorization header was missing or invalid: {0}")]
    InvalidAuthorizationHeader(TypedHeaderRejection),
    #[error("The provided session token could not be decoded: {0}")]
    InvalidSessionToken(#[from] SessionTokenDecodeError),
    #[error("The session token could not be hashed: {0}")]
    SessionTokenHash(#[from] SessionTokenHashError),
    #[error("Provided token was invalid")]
    InvalidToken,
    #[error("This action needs the admin role")]
    Forbidden,
    #[error("Invalid input: {0}")]
    Validation(#[from] ModelValidationError),
    #[error("Invalid idempotency key: {0}")]
    InvalidIdempotencyKey(#[from] InvalidIdempotencyKeyError),
    #[error("Discounts go up to 100 percent, not {0}")]
    InvalidDiscount(u8),
    #[error("User with id {0} does not exist")]
    UnknownTargetUser(Id<UserMarker>),
    #[error("That handle is already taken")]
    HandleTaken,
    #[error("already reviewed")]
    AlreadyReviewed,
    #[error("Free listings do not need a payment")]
    NothingToPay,
    #[error(transparent)]
    PaymentTransition(#[from] InvalidPaymentTransition),
    #[error("{} needs a payment; use the payment endpoints", .0.describe())]
    PaymentRequired(TierSelection),
    #[error("Payment {0} has not been confirmed by the processor")]
    PaymentNotConfirmed(IdempotencyKey),
    #[error("Payment {0} failed at the processor")]
    PaymentFailed(IdempotencyKey),
    #[error("The payment processor failed: {0}")]
    PaymentProcessor(#[from] PaymentError),
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error(transparent)]
    Database(#[from] DbError),
    #[error("Post with id {0} was not found.")]
    PostByIdNotFound(Id<PostMarker>),
    #[error("User with id {0} was not found.")]
    UserByIdNotFound(Id<UserMarker>),
    #[error("User with handle {} was not found.", .0.get())]
    UserByHandleNotFound(UserHandle),
    #[error("Banner with id {0} was not found.")]
    BannerByIdNotFound(Id<BannerMarker>),
    #[error("Payment {0} was not found.")]
    PaymentNotFound(IdempotencyKey),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::UnknownRoute(_)
            | ServerError::PathRejection(_)
            | ServerError::PostByIdNotFound(_)
            | ServerError::UserByIdNotFound(_)
            | ServerError::UserByHandleNotFound(_)
            | ServerError::BannerByIdNotFound(_)
            | ServerError::PaymentNotFound(_)
            | ServerError::Database(DbError::NotFound | DbError::MissingReference { .. }) => {
                StatusCode::NOT_FOUND
            }
            ServerError::InvalidAuthorizationHeader(rejection) if rejection.is_missing() => {
                StatusCode::UNAUTHORIZED
            }
            ServerError::InvalidToken => StatusCode::UNAUTHORIZED,
            ServerError::Forbidden => StatusCode::FORBIDDEN,
            ServerError::QueryRejection(_)
            | ServerError::JsonRejection(_)
            | ServerError::MultipartRejection(_)
            | ServerError::Multipart(_)
            | ServerError::InvalidAuthorizationHeader(_)
            | ServerError::InvalidSessionToken(_)
            | ServerError::Validation(_)
            | ServerError::InvalidIdempotencyKey(_)
            | ServerError::NothingToPay
            | ServerError::InvalidDiscount(_)
            | ServerError::UnknownTargetUser(_)
            | ServerError::Media(MediaError::UnknownBucket(_) | MediaError::NoFiles) => {
                StatusCode::BAD_REQUEST
            }
            ServerError::HandleTaken
            | ServerError::AlreadyReviewed
            | ServerError::PaymentTransition(_)
            | ServerError::Database(DbError::Conflict { .. } | DbError::Payment(_)) => {
                StatusCode::CONFLICT
            }
            ServerError::PaymentRequired(_)
            | ServerError::PaymentNotConfirmed(_)
            | ServerError::PaymentFailed(_) => StatusCode::PAYMENT_REQUIRED,
            ServerError::PaymentProcessor(_) => StatusCode::BAD_GATEWAY,
            ServerError::JsonResponse(_)
            | ServerError::SessionTokenHash(_)
            | ServerError::Media(MediaError::Io(_))
            | ServerError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Maps the one-review-per-author constraint to [`ServerError::AlreadyReviewed`].
    pub fn from_comment_error(error: DbError) -> Self {
        if error.is_conflict_on(COMMENT_UNIQUE_CONSTRAINT) {
            ServerError::AlreadyReviewed
        } else {
            error.into()
        }
    }
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Serialize, Deserialize)]
struct ErrorResponse {
    status: u16,
    message: String,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();

        error!(error = %self, %status, "Replying with error");

        let message = if status.is_server_error() {
            status
                .canonical_reason()
                .unwrap_or("Internal server error")
                .to_owned()
        } else {
            self.to_string()
        };

        let error_response = ErrorResponse {
            status: status.as_u16(),
            message,
        };
        (status, Json(error_response)).into_response()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::{ServerRouter, ServerSettings, ServerState};
    use crate::{
        media::{Bucket, MediaError, MediaStore},
        payment::{IntentRequest, IntentStatus, PaymentError, PaymentIntent, PaymentProcessor},
    };
    use async_trait::async_trait;
    use axum::{
        Router,
        body::{Body, Bytes},
        http::{Request, Response},
    };
    use nailnews_common::{model::{post::MediaUrl, pricing::PriceSchedule}, snowflake::Origin};
    use nailnews_db::client::DbClient;
    use serde_json::Value;
    use sqlx::postgres::PgPoolOptions;
    use std::{sync::Arc, time::Duration};
    use tower::ServiceExt;

    #[derive(Debug)]
    pub struct UnreachableProcessor;

    #[async_trait]
    impl PaymentProcessor for UnreachableProcessor {
        async fn create_intent(
            &self,
            request: &IntentRequest<'_>,
        ) -> Result<PaymentIntent, PaymentError> {
            Ok(PaymentIntent {
                id: format!("pi_{}", request.idempotency_key),
                amount: request.amount.0,
                status: IntentStatus::RequiresPaymentMethod,
                client_secret: Some("secret".to_owned()),
            })
        }

        async fn retrieve_intent(&self, intent_id: &str) -> Result<PaymentIntent, PaymentError> {
            Ok(PaymentIntent {
                id: intent_id.to_owned(),
                amount: 0,
                status: IntentStatus::Processing,
                client_secret: None,
            })
        }
    }

    #[derive(Debug)]
    pub struct NullMediaStore;

    #[async_trait]
    impl MediaStore for NullMediaStore {
        async fn put(
            &self,
            bucket: Bucket,
            name: &str,
            _bytes: Bytes,
        ) -> Result<MediaUrl, MediaError> {
            Ok(MediaUrl(format!("/files/{}/{name}", bucket.as_str())))
        }
    }

    /// Router whose database is never reachable. Requests that fail before
    /// the first query can be tested without Postgres.
    pub fn router() -> Router {
        let pool = PgPoolOptions::new()
            .acquire_timeout(Duration::from_millis(200))
            .connect_lazy("postgres://nailnews@127.0.0.1:1/nailnews")
            .unwrap();

        let state = ServerState {
            db_client: Arc::new(DbClient::new(pool, Origin::new(0, 0).unwrap())),
            payments: Arc::new(UnreachableProcessor),
            media: Arc::new(NullMediaStore),
            settings: Arc::new(ServerSettings {
                prices: PriceSchedule::default(),
                currency: "usd".to_owned(),
                session_lifetime: None,
            }),
        };

        let router: ServerRouter = super::routes();
        router.with_state(state)
    }

    pub async fn send(request: Request<Body>) -> Response<Body> {
        router().oneshot(request).await.unwrap()
    }

    pub async fn body_json(response: Response<Body>) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::{
        ServerError,
        test_support::{body_json, send},
    };
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use nailnews_common::model::pricing::{ListingDuration, PaidTier, TierSelection};
    use nailnews_db::client::DbError;

    #[tokio::test]
    async fn unknown_routes_are_404_json() {
        let response = send(Request::get("/nope").body(Body::empty()).unwrap()).await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["status"], 404);
        assert_eq!(body["message"], "Unknown route requested: /nope");
    }

    #[tokio::test]
    async fn missing_authorization_is_401() {
        let response = send(Request::get("/users/me").body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn malformed_tokens_are_400() {
        let response = send(
            Request::get("/users/me/wallet")
                .header("authorization", "Bearer not-a-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn statuses() {
        assert_eq!(ServerError::AlreadyReviewed.status(), StatusCode::CONFLICT);
        assert_eq!(ServerError::AlreadyReviewed.to_string(), "already reviewed");
        assert_eq!(ServerError::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            ServerError::PaymentRequired(TierSelection::paid(
                PaidTier::Vip,
                ListingDuration::from_months(3).unwrap()
            ))
            .status(),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            ServerError::Database(DbError::NotFound).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServerError::Database(DbError::Conflict { constraint: None }).status(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn comment_conflicts_become_already_reviewed() {
        let error = ServerError::from_comment_error(DbError::Conflict {
            constraint: Some("comments_one_per_author".to_owned()),
        });
        assert!(matches!(error, ServerError::AlreadyReviewed));

        let error = ServerError::from_comment_error(DbError::NotFound);
        assert!(matches!(error, ServerError::Database(DbError::NotFound)));
    }

    #[tokio::test]
    async fn server_errors_hide_their_details() {
        use axum::response::IntoResponse;

        let response =
            ServerError::Database(DbError::Sqlx(sqlx::Error::PoolTimedOut)).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["message"], "Internal Server Error");
    }
}
