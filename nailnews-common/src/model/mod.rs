pub mod auth;
pub mod engagement;
pub mod listing;
pub mod payment;
pub mod post;
pub mod pricing;
pub mod site;
pub mod tag;
pub mod transaction;
pub mod user;

use crate::{
    model::{
        auth::InvalidSessionTokenHashError,
        engagement::{InvalidCommentError, InvalidRatingError},
        listing::{InvalidListingError, UnknownCategoryError},
        payment::{InvalidIdempotencyKeyError, UnknownPaymentStateError},
        post::InvalidPostError,
        pricing::{InvalidDurationError, UnknownTierError},
        tag::InvalidTagNameError,
        user::{
            InvalidDisplayNameError, InvalidPhoneNumberError, InvalidUserHandleError,
            UnknownRoleError,
        },
    },
    snowflake::{Epoch, Snowflake, SnowflakeGenerator},
};
use serde::{Deserialize, Serialize};
use std::{fmt::Display, marker::PhantomData};
use thiserror::Error;
use time::{UtcDateTime, macros::utc_datetime};

#[derive(Clone, Eq, PartialEq, Debug, Error)]
pub enum ModelValidationError {
    #[error(transparent)]
    UserHandle(#[from] InvalidUserHandleError),
    #[error(transparent)]
    Role(#[from] UnknownRoleError),
    #[error(transparent)]
    DisplayName(#[from] InvalidDisplayNameError),
    #[error(transparent)]
    PhoneNumber(#[from] InvalidPhoneNumberError),
    #[error(transparent)]
    TokenHash(#[from] InvalidSessionTokenHashError),
    #[error(transparent)]
    Post(#[from] InvalidPostError),
    #[error(transparent)]
    Listing(#[from] InvalidListingError),
    #[error(transparent)]
    Category(#[from] UnknownCategoryError),
    #[error(transparent)]
    PaymentState(#[from] UnknownPaymentStateError),
    #[error(transparent)]
    Tier(#[from] UnknownTierError),
    #[error(transparent)]
    Duration(#[from] InvalidDurationError),
    #[error(transparent)]
    TagName(#[from] InvalidTagNameError),
    #[error(transparent)]
    Rating(#[from] InvalidRatingError),
    #[error(transparent)]
    Comment(#[from] InvalidCommentError),
    #[error(transparent)]
    IdempotencyKey(#[from] InvalidIdempotencyKeyError),
    #[error("Stored JSON did not match its model: {0}")]
    Json(String),
    #[error("Date out of range: {0}")]
    DateRange(#[from] time::error::ComponentRange),
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct NailNewsEpoch;
impl Epoch for NailNewsEpoch {
    const EPOCH_TIME: UtcDateTime = utc_datetime!(2025-01-01 00:00);
}

pub type NailNewsSnowflake = Snowflake<NailNewsEpoch>;
pub type NailNewsSnowflakeGenerator = SnowflakeGenerator<NailNewsEpoch>;

#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Id<Marker>(NailNewsSnowflake, #[serde(skip)] PhantomData<Marker>);

impl<Marker> Id<Marker> {
    #[must_use]
    pub fn new(snowflake: NailNewsSnowflake) -> Self {
        Self(snowflake, PhantomData)
    }

    #[must_use]
    pub fn snowflake(self) -> NailNewsSnowflake {
        self.0
    }

    /// The id as stored in a `BIGINT` column.
    #[must_use]
    pub fn to_db(self) -> i64 {
        self.0.get().cast_signed()
    }

    #[must_use]
    pub fn from_db(value: i64) -> Self {
        value.cast_unsigned().into()
    }
}

impl<Marker> Display for Id<Marker> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl<Marker> From<NailNewsSnowflake> for Id<Marker> {
    fn from(value: NailNewsSnowflake) -> Self {
        Self::new(value)
    }
}

impl<Marker> From<u64> for Id<Marker> {
    fn from(value: u64) -> Self {
        Id::new(NailNewsSnowflake::new(value))
    }
}

impl<Marker> From<Id<Marker>> for u64 {
    fn from(value: Id<Marker>) -> Self {
        value.snowflake().get()
    }
}
