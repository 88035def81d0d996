//! Hosted payment processor.
//!
//! Only intents are handled here. Card details go straight from the browser
//! widget to the processor.

use async_trait::async_trait;
use nailnews_common::model::{
    Id,
    payment::IdempotencyKey,
    pricing::Cents,
    user::UserMarker,
};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("Could not reach the payment processor: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Payment processor rejected the request with {status}: {message}")]
    Rejected { status: StatusCode, message: String },
    #[error("Payment intent {0} came back without a client secret")]
    MissingClientSecret(String),
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    Processing,
    RequiresCapture,
    Canceled,
    Succeeded,
    #[serde(other)]
    Unknown,
}

impl IntentStatus {
    #[must_use]
    pub fn is_failed(self) -> bool {
        matches!(self, IntentStatus::Canceled)
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub amount: i64,
    pub status: IntentStatus,
    pub client_secret: Option<String>,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct IntentRequest<'a> {
    pub amount: Cents,
    pub currency: &'a str,
    pub description: String,
    pub user: Id<UserMarker>,
    pub idempotency_key: &'a IdempotencyKey,
}

impl IntentRequest<'_> {
    /// Key sent to the processor. Its keys are shared by the whole account,
    /// so the user's key is namespaced with the user id.
    #[must_use]
    pub fn processor_key(&self) -> String {
        let name = format!("{}:{}", self.user, self.idempotency_key);
        Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
    }
}

#[async_trait]
pub trait PaymentProcessor: Debug + Send + Sync {
    /// Creating twice with the same idempotency key yields the same intent.
    async fn create_intent(
        &self,
        request: &IntentRequest<'_>,
    ) -> Result<PaymentIntent, PaymentError>;

    async fn retrieve_intent(&self, intent_id: &str) -> Result<PaymentIntent, PaymentError>;
}

/// Client for processors speaking the Stripe payment intents API.
#[derive(Clone, Debug)]
pub struct StripeClient {
    http: Client,
    api_base: String,
    secret_key: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

impl StripeClient {
    #[must_use]
    pub fn new(http: Client, api_base: &str, secret_key: String) -> Self {
        Self {
            http,
            api_base: api_base.trim_end_matches('/').to_owned(),
            secret_key,
        }
    }

    fn intents_url(&self) -> String {
        format!("{}/v1/payment_intents", self.api_base)
    }

    async fn read_intent(response: reqwest::Response) -> Result<PaymentIntent, PaymentError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let message = match response.json::<ErrorBody>().await {
            Ok(body) => body.error.message,
            Err(err) => {
                warn!(error = %err, "Payment processor error body was unreadable");
                String::from("unknown error")
            }
        };
        Err(PaymentError::Rejected { status, message })
    }
}

#[async_trait]
impl PaymentProcessor for StripeClient {
    async fn create_intent(
        &self,
        request: &IntentRequest<'_>,
    ) -> Result<PaymentIntent, PaymentError> {
        let processor_key = request.processor_key();
        let amount = request.amount.0.to_string();
        let form = [
            ("amount", amount.as_str()),
            ("currency", request.currency),
            ("description", request.description.as_str()),
            ("automatic_payment_methods[enabled]", "true"),
            ("metadata[idempotency_key]", request.idempotency_key.get()),
        ];

        debug!(
            key = %request.idempotency_key,
            user = %request.user,
            amount = %request.amount,
            "Creating payment intent"
        );

        let response = self
            .http
            .post(self.intents_url())
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", &processor_key)
            .form(&form)
            .send()
            .await?;

        Self::read_intent(response).await
    }

    async fn retrieve_intent(&self, intent_id: &str) -> Result<PaymentIntent, PaymentError> {
        let response = self
            .http
            .get(format!("{}/{intent_id}", self.intents_url()))
            .bearer_auth(&self.secret_key)
            .send()
            .await?;

        Self::read_intent(response).await
    }
}
