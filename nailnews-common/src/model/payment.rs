//! Checkout workflow.
//!
//! A paid submission becomes a pending payment keyed by an idempotency key.
//! The state machine below is shared by the server, which persists the
//! resting states, and by clients that drive the hosted payment widget.

use crate::model::{
    Id,
    post::{PostDraft, PostMarker},
    pricing::{Cents, TierSelection},
    user::UserMarker,
};
use serde::{Deserialize, Deserializer, Serialize, de::Error as _};
use std::{fmt::Display, str::FromStr};
use thiserror::Error;
use time::OffsetDateTime;

pub const IDEMPOTENCY_KEY_MAX_LEN: usize = 255;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    Idle,
    AwaitingIntent,
    AwaitingPaymentConfirmation,
    Finalizing,
    Done,
    Failed,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum PaymentEvent {
    Submitted { cost: Cents },
    IntentReceived,
    PaymentConfirmed,
    Finalized,
    Errored,
    Dismissed,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Error)]
#[error("Payment cannot go from {from:?} on {event:?}")]
pub struct InvalidPaymentTransition {
    pub from: PaymentState,
    pub event: PaymentEvent,
}

impl PaymentState {
    pub fn on(self, event: PaymentEvent) -> Result<Self, InvalidPaymentTransition> {
        use PaymentEvent as E;
        use PaymentState as S;

        let next = match (self, event) {
            (S::Idle, E::Submitted { cost }) if cost.is_positive() => S::AwaitingIntent,
            (S::Idle, E::Submitted { cost }) if cost == Cents::ZERO => S::Finalizing,
            (S::AwaitingIntent, E::IntentReceived) => S::AwaitingPaymentConfirmation,
            (S::AwaitingPaymentConfirmation, E::PaymentConfirmed) => S::Finalizing,
            (S::Finalizing | S::Done, E::Finalized) => S::Done,
            (S::AwaitingIntent | S::AwaitingPaymentConfirmation | S::Finalizing, E::Errored) => {
                S::Failed
            }
            (S::Failed, E::Dismissed) => S::Idle,
            (from, event) => return Err(InvalidPaymentTransition { from, event }),
        };
        Ok(next)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentState::Idle => "idle",
            PaymentState::AwaitingIntent => "awaiting_intent",
            PaymentState::AwaitingPaymentConfirmation => "awaiting_payment_confirmation",
            PaymentState::Finalizing => "finalizing",
            PaymentState::Done => "done",
            PaymentState::Failed => "failed",
        }
    }
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("Unknown payment state: {0}")]
pub struct UnknownPaymentStateError(String);

impl FromStr for PaymentState {
    type Err = UnknownPaymentStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            PaymentState::Idle,
            PaymentState::AwaitingIntent,
            PaymentState::AwaitingPaymentConfirmation,
            PaymentState::Finalizing,
            PaymentState::Done,
            PaymentState::Failed,
        ]
        .into_iter()
        .find(|state| state.as_str() == s)
        .ok_or_else(|| UnknownPaymentStateError(s.to_owned()))
    }
}

impl Display for PaymentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client-chosen key that makes intent creation and finalize safe to retry.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Serialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("Idempotency keys are 1 to {IDEMPOTENCY_KEY_MAX_LEN} visible ASCII characters")]
pub struct InvalidIdempotencyKeyError;

impl IdempotencyKey {
    pub fn new(key: String) -> Result<Self, InvalidIdempotencyKeyError> {
        if key.is_empty()
            || key.len() > IDEMPOTENCY_KEY_MAX_LEN
            || !key.bytes().all(|byte| byte.is_ascii_graphic())
        {
            return Err(InvalidIdempotencyKeyError);
        }
        Ok(Self(key))
    }

    #[must_use]
    pub fn get(&self) -> &str {
        &self.0
    }
}

impl FromStr for IdempotencyKey {
    type Err = InvalidIdempotencyKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_owned())
    }
}

impl Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for IdempotencyKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        IdempotencyKey::new(String::deserialize(deserializer)?).map_err(D::Error::custom)
    }
}

/// What a successful payment buys.
#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PaymentPurpose {
    Create { draft: PostDraft },
    Renew { post: Id<PostMarker>, selection: TierSelection },
}

impl PaymentPurpose {
    #[must_use]
    pub fn selection(&self) -> TierSelection {
        match self {
            PaymentPurpose::Create { draft } => draft.selection,
            PaymentPurpose::Renew { selection, .. } => *selection,
        }
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct PendingPayment {
    pub key: IdempotencyKey,
    pub user: Id<UserMarker>,
    pub purpose: PaymentPurpose,
    pub amount: Cents,
    pub intent_id: String,
    #[serde(skip_serializing)]
    pub client_secret: String,
    pub state: PaymentState,
    pub post: Option<Id<PostMarker>>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::{IdempotencyKey, PaymentEvent as E, PaymentState as S};
    use crate::model::pricing::Cents;

    #[test]
    fn paid_checkout_path() {
        let state = S::Idle
            .on(E::Submitted { cost: Cents(6_000) })
            .and_then(|s| s.on(E::IntentReceived))
            .and_then(|s| s.on(E::PaymentConfirmed))
            .and_then(|s| s.on(E::Finalized));

        assert_eq!(state, Ok(S::Done));
    }

    #[test]
    fn free_checkout_skips_payment() {
        assert_eq!(S::Idle.on(E::Submitted { cost: Cents::ZERO }), Ok(S::Finalizing));
        assert!(S::Idle.on(E::Submitted { cost: Cents(-1) }).is_err());
    }

    #[test]
    fn failures_return_to_idle_after_dismissal() {
        let failed = S::AwaitingPaymentConfirmation.on(E::Errored).unwrap();
        assert_eq!(failed, S::Failed);
        assert_eq!(failed.on(E::Dismissed), Ok(S::Idle));
        assert!(S::Idle.on(E::Errored).is_err());
        assert!(S::Done.on(E::Errored).is_err());
    }

    #[test]
    fn finalize_is_repeatable_but_cannot_skip_payment() {
        assert_eq!(S::Done.on(E::Finalized), Ok(S::Done));
        assert!(S::AwaitingIntent.on(E::Finalized).is_err());
        assert!(S::AwaitingPaymentConfirmation.on(E::Finalized).is_err());
    }

    #[test]
    fn states_round_trip_through_their_column_values() {
        for state in [S::AwaitingPaymentConfirmation, S::Done, S::Failed] {
            assert_eq!(state.as_str().parse::<S>(), Ok(state));
        }
    }

    #[test]
    fn idempotency_keys() {
        assert!(IdempotencyKey::new("3b1f-checkout".to_owned()).is_ok());
        assert!(IdempotencyKey::new(String::new()).is_err());
        assert!(IdempotencyKey::new("has space".to_owned()).is_err());
        assert!(IdempotencyKey::new("k".repeat(256)).is_err());
    }
}
