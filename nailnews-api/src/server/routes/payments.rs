//! Checkout for paid tiers.
//!
//! 1. `POST /payments/intents` prices the purchase, opens an intent at the
//!    processor and stores a pending payment under the idempotency key.
//! 2. The browser confirms the card with the processor's widget.
//! 3. `POST /payments/{key}/finalize` checks the intent and, once it
//!    succeeded, creates or renews the post and records the charge.
//!
//! Both calls can be retried with the same key.

use crate::{
    payment::{IntentRequest, IntentStatus, PaymentError, PaymentIntent, PaymentProcessor},
    server::{
        Result, ServerError, ServerRouter, ServerSettings,
        auth::AuthenticatedUser,
        json::{Created, Json},
    },
};
use axum::{extract::State, http::HeaderMap};
use axum_extra::routing::{RouterExt, TypedPath};
use nailnews_common::model::{
    ModelValidationError,
    payment::{
        IdempotencyKey, InvalidIdempotencyKeyError, PaymentEvent, PaymentPurpose, PaymentState,
        PendingPayment,
    },
    post::Post,
    pricing::Cents,
};
use nailnews_db::client::DbClient;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_post(create_intent)
        .typed_get(get_payment)
        .typed_post(finalize_payment)
}

/// The client's key when it sent one, a fresh one otherwise.
fn idempotency_key(headers: &HeaderMap) -> Result<IdempotencyKey> {
    match headers.get(IDEMPOTENCY_KEY_HEADER) {
        Some(value) => {
            let value = value
                .to_str()
                .map_err(|_| InvalidIdempotencyKeyError)?;
            Ok(value.parse()?)
        }
        None => Ok(IdempotencyKey::new(Uuid::new_v4().to_string())?),
    }
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/payments/intents", rejection(ServerError))]
struct IntentsPath();

#[derive(Clone, Debug, Serialize)]
struct IntentCreated {
    payment: PendingPayment,
    client_secret: String,
    currency: String,
}

impl IntentCreated {
    fn new(payment: PendingPayment, settings: &ServerSettings) -> Self {
        Self {
            client_secret: payment.client_secret.clone(),
            payment,
            currency: settings.currency.clone(),
        }
    }
}

async fn create_intent(
    IntentsPath(): IntentsPath,
    State(db): State<Arc<DbClient>>,
    State(payments): State<Arc<dyn PaymentProcessor>>,
    State(settings): State<Arc<ServerSettings>>,
    user: AuthenticatedUser,
    headers: HeaderMap,
    Json(purpose): Json<PaymentPurpose>,
) -> Result<Created<IntentCreated>> {
    let key = idempotency_key(&headers)?;

    if let Some(existing) = db.fetch_pending_payment(user.user_id(), &key).await? {
        return Ok(Created(IntentCreated::new(existing, &settings)));
    }

    match &purpose {
        PaymentPurpose::Create { draft } => {
            draft.validate().map_err(ModelValidationError::from)?;
        }
        PaymentPurpose::Renew { post, .. } => {
            let renewed = db
                .fetch_post(*post)
                .await?
                .ok_or(ServerError::PostByIdNotFound(*post))?;
            if renewed.author.id != user.user_id() {
                return Err(ServerError::Forbidden);
            }
        }
    }

    let selection = purpose.selection();
    let amount = settings.prices.compute_cost(selection);
    let state = PaymentState::Idle.on(PaymentEvent::Submitted { cost: amount })?;
    if state != PaymentState::AwaitingIntent {
        return Err(ServerError::NothingToPay);
    }

    let intent = payments
        .create_intent(&IntentRequest {
            amount,
            currency: &settings.currency,
            description: selection.describe(),
            user: user.user_id(),
            idempotency_key: &key,
        })
        .await?;
    let client_secret = intent
        .client_secret
        .clone()
        .ok_or_else(|| PaymentError::MissingClientSecret(intent.id.clone()))?;
    let state = state.on(PaymentEvent::IntentReceived)?;

    let payment = db
        .create_pending_payment(&PendingPayment {
            key,
            user: user.user_id(),
            purpose,
            amount,
            intent_id: intent.id,
            client_secret,
            state,
            post: None,
            created_at: OffsetDateTime::now_utc(),
        })
        .await?;
    info!(key = %payment.key, amount = %payment.amount, user = %user.user_id(), "Opened payment");

    Ok(Created(IntentCreated::new(payment, &settings)))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/payments/{key}", rejection(ServerError))]
struct PaymentPath {
    key: IdempotencyKey,
}

async fn own_payment(
    db: &DbClient,
    user: AuthenticatedUser,
    key: IdempotencyKey,
) -> Result<PendingPayment> {
    db.fetch_pending_payment(user.user_id(), &key)
        .await?
        .ok_or(ServerError::PaymentNotFound(key))
}

async fn get_payment(
    PaymentPath { key }: PaymentPath,
    State(db): State<Arc<DbClient>>,
    user: AuthenticatedUser,
) -> Result<Json<PendingPayment>> {
    Ok(Json(own_payment(&db, user, key).await?))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/payments/{key}/finalize", rejection(ServerError))]
struct FinalizePath {
    key: IdempotencyKey,
}

/// Whether finalizing has to ask the processor first. Done payments are
/// replayed from the database; failed ones stay failed.
fn needs_confirmation(payment: &PendingPayment) -> Result<bool> {
    match payment.state {
        PaymentState::Done => Ok(false),
        PaymentState::Failed => Err(ServerError::PaymentFailed(payment.key.clone())),
        _ => Ok(true),
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
enum IntentOutcome {
    Succeeded,
    Canceled,
}

/// Reads the processor's intent against what the payment expects to charge.
fn intent_outcome(payment: &PendingPayment, intent: &PaymentIntent) -> Result<IntentOutcome> {
    if intent.status.is_failed() {
        return Ok(IntentOutcome::Canceled);
    }
    if intent.id != payment.intent_id
        || intent.status != IntentStatus::Succeeded
        || Cents(intent.amount) != payment.amount
    {
        return Err(ServerError::PaymentNotConfirmed(payment.key.clone()));
    }
    Ok(IntentOutcome::Succeeded)
}

async fn finalize_payment(
    FinalizePath { key }: FinalizePath,
    State(db): State<Arc<DbClient>>,
    State(payments): State<Arc<dyn PaymentProcessor>>,
    user: AuthenticatedUser,
) -> Result<Json<Post>> {
    let payment = own_payment(&db, user, key).await?;

    if needs_confirmation(&payment)? {
        let intent = payments.retrieve_intent(&payment.intent_id).await?;
        if intent_outcome(&payment, &intent)? == IntentOutcome::Canceled {
            db.mark_payment_failed(user.user_id(), &payment.key).await?;
            warn!(key = %payment.key, "Payment intent was canceled");
            return Err(ServerError::PaymentFailed(payment.key));
        }
    }

    let post_id = db
        .finalize_payment(user.user_id(), &payment.key, OffsetDateTime::now_utc())
        .await?;
    let post = db
        .fetch_post(post_id)
        .await?
        .ok_or(ServerError::PostByIdNotFound(post_id))?;

    Ok(Json(post))
}

#[cfg(test)]
mod tests {
    use super::{IntentOutcome, idempotency_key, intent_outcome, needs_confirmation};
    use crate::{
        payment::{IntentStatus, PaymentIntent},
        server::{ServerError, test_support::send},
    };
    use axum::{
        body::Body,
        http::{HeaderMap, HeaderValue, Request, StatusCode},
    };
    use nailnews_common::model::{
        Id,
        payment::{PaymentPurpose, PaymentState, PendingPayment},
        pricing::{Cents, ListingDuration, PaidTier, TierSelection},
    };
    use time::OffsetDateTime;

    fn payment(state: PaymentState) -> PendingPayment {
        PendingPayment {
            key: "checkout-7".parse().unwrap(),
            user: Id::from(3),
            purpose: PaymentPurpose::Renew {
                post: Id::from(11),
                selection: TierSelection::paid(
                    PaidTier::Vip,
                    ListingDuration::from_months(3).unwrap(),
                ),
            },
            amount: Cents(7_500),
            intent_id: "pi_7".to_owned(),
            client_secret: "pi_7_secret".to_owned(),
            state,
            post: None,
            created_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    fn intent(status: IntentStatus, amount: i64) -> PaymentIntent {
        PaymentIntent {
            id: "pi_7".to_owned(),
            amount,
            status,
            client_secret: None,
        }
    }

    #[test]
    fn client_keys_are_kept_and_missing_ones_generated() {
        let mut headers = HeaderMap::new();
        assert_eq!(idempotency_key(&headers).unwrap().get().len(), 36);

        headers.insert("idempotency-key", HeaderValue::from_static("checkout-42"));
        assert_eq!(idempotency_key(&headers).unwrap().get(), "checkout-42");

        headers.insert("idempotency-key", HeaderValue::from_static("has space"));
        assert!(idempotency_key(&headers).is_err());
    }

    #[tokio::test]
    async fn intents_need_a_session() {
        let response = send(
            Request::post("/payments/intents")
                .header("content-type", "application/json")
                .body(Body::from(
                    r#"{"kind":"renew","post":1,"selection":{"tier":"vip","duration_months":3}}"#,
                ))
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn done_payments_skip_the_processor_and_failed_ones_stay_failed() {
        let awaiting = payment(PaymentState::AwaitingPaymentConfirmation);
        assert!(needs_confirmation(&awaiting).unwrap());
        assert!(!needs_confirmation(&payment(PaymentState::Done)).unwrap());

        let error = needs_confirmation(&payment(PaymentState::Failed)).unwrap_err();
        assert!(matches!(error, ServerError::PaymentFailed(_)));
        assert_eq!(error.status(), StatusCode::PAYMENT_REQUIRED);
    }

    #[test]
    fn succeeded_intents_with_the_expected_amount_confirm() {
        let pending = payment(PaymentState::AwaitingPaymentConfirmation);
        let outcome = intent_outcome(&pending, &intent(IntentStatus::Succeeded, 7_500));
        assert_eq!(outcome.unwrap(), IntentOutcome::Succeeded);
    }

    #[test]
    fn canceled_intents_fail_the_payment() {
        let pending = payment(PaymentState::AwaitingPaymentConfirmation);
        let outcome = intent_outcome(&pending, &intent(IntentStatus::Canceled, 7_500));
        assert_eq!(outcome.unwrap(), IntentOutcome::Canceled);
    }

    #[test]
    fn unfinished_or_mismatched_intents_are_not_confirmed() {
        let pending = payment(PaymentState::AwaitingPaymentConfirmation);
        let mut other_intent = intent(IntentStatus::Succeeded, 7_500);
        other_intent.id = "pi_8".to_owned();

        for intent in [
            intent(IntentStatus::Processing, 7_500),
            intent(IntentStatus::RequiresAction, 7_500),
            intent(IntentStatus::Succeeded, 2_500),
            other_intent,
        ] {
            let error = intent_outcome(&pending, &intent).unwrap_err();
            assert!(matches!(error, ServerError::PaymentNotConfirmed(_)), "{intent:?}");
            assert_eq!(error.status(), StatusCode::PAYMENT_REQUIRED);
        }
    }
}
