use nailnews_common::model::{
    Id, ModelValidationError,
    auth::{LoginRecord, Session},
    engagement::{Comment, Rating},
    listing::Listing,
    payment::{IdempotencyKey, PaymentPurpose, PendingPayment},
    post::{Location, MediaUrl, PartialPost, Post, PostContent},
    pricing::{Cents, DiscountEntry, ListingDuration, Tier},
    site::{Banner, Setting},
    tag::{Tag, TagName},
    transaction::{RevenueReportRow, Transaction},
    user::{PhoneNumber, Profile, User, UserHandle},
};
use sqlx::{FromRow, types::Json};
use time::OffsetDateTime;

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, FromRow)]
pub(crate) struct UserRecord {
    pub user_snowflake: i64,
    pub handle: String,
    pub role: String,
}

#[derive(Clone, Eq, PartialEq, Debug, FromRow)]
pub(crate) struct ProfileRecord {
    pub user_snowflake: i64,
    pub handle: String,
    pub role: String,
    pub display_name: Option<String>,
    pub phone: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: OffsetDateTime,
}

#[derive(Clone, Eq, PartialEq, Debug, FromRow)]
pub(crate) struct SessionRecord {
    pub user_snowflake: i64,
    pub role: String,
    pub token_hash: Vec<u8>,
    pub created_at: OffsetDateTime,
    pub expires_at: Option<OffsetDateTime>,
    pub revoked_at: Option<OffsetDateTime>,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, FromRow)]
pub(crate) struct LoginRecordRow {
    pub created_at: OffsetDateTime,
    pub expires_at: Option<OffsetDateTime>,
}

#[derive(Clone, Debug, FromRow)]
pub(crate) struct FullPostRecord {
    pub post_snowflake: i64,
    pub title: String,
    pub description: String,
    pub details: Json<Listing>,
    pub location: String,
    pub media: Vec<String>,
    pub tier: String,
    pub duration_months: Option<i16>,
    pub created_at: OffsetDateTime,
    pub expires_at: Option<OffsetDateTime>,
    pub view_count: i64,
    pub tags: Vec<String>,
    pub user_snowflake: i64,
    pub handle: String,
    pub role: String,
}

#[derive(Clone, Debug, FromRow)]
pub(crate) struct PartialPostRecord {
    pub post_snowflake: i64,
    pub user_snowflake: i64,
    pub title: String,
    pub description: String,
    pub details: Json<Listing>,
    pub location: String,
    pub media: Vec<String>,
    pub tier: String,
    pub created_at: OffsetDateTime,
    pub expires_at: Option<OffsetDateTime>,
    pub view_count: i64,
}

#[derive(Clone, Eq, PartialEq, Debug, FromRow)]
pub(crate) struct TagRecord {
    pub tag_snowflake: i64,
    pub name: String,
}

#[derive(Clone, Eq, PartialEq, Debug, FromRow)]
pub(crate) struct CommentRecord {
    pub comment_snowflake: i64,
    pub post_snowflake: i64,
    pub body: String,
    pub rating: Option<i16>,
    pub created_at: OffsetDateTime,
    pub user_snowflake: i64,
    pub handle: String,
    pub role: String,
}

#[derive(Clone, Eq, PartialEq, Debug, FromRow)]
pub(crate) struct TransactionRecord {
    pub transaction_snowflake: i64,
    pub user_snowflake: i64,
    pub amount_cents: i64,
    pub description: String,
    pub post_snowflake: Option<i64>,
    pub created_at: OffsetDateTime,
}

#[derive(Clone, Debug, FromRow)]
pub(crate) struct PendingPaymentRecord {
    pub idempotency_key: String,
    pub user_snowflake: i64,
    pub purpose: Json<PaymentPurpose>,
    pub amount_cents: i64,
    pub intent_id: String,
    pub client_secret: String,
    pub state: String,
    pub post_snowflake: Option<i64>,
    pub created_at: OffsetDateTime,
}

#[derive(Clone, Eq, PartialEq, Debug, FromRow)]
pub(crate) struct RevenueRecord {
    pub month: OffsetDateTime,
    pub charges: i64,
    pub revenue: i64,
}

#[derive(Clone, Eq, PartialEq, Debug, FromRow)]
pub(crate) struct DiscountRecord {
    pub tier: String,
    pub duration_months: i16,
    pub percent_off: i16,
}

#[derive(Clone, Eq, PartialEq, Debug, FromRow)]
pub(crate) struct BannerRecord {
    pub banner_snowflake: i64,
    pub title: String,
    pub image_url: String,
    pub link_url: Option<String>,
    pub active: bool,
    pub created_at: OffsetDateTime,
}

#[derive(Clone, Debug, FromRow)]
pub(crate) struct SettingRecord {
    pub key: String,
    pub value: serde_json::Value,
}

fn user(user_snowflake: i64, handle: String, role: &str) -> Result<User, ModelValidationError> {
    Ok(User {
        id: Id::from_db(user_snowflake),
        handle: UserHandle::new(handle)?,
        role: role.parse()?,
    })
}

fn content(
    title: String,
    description: String,
    details: Json<Listing>,
    location: String,
    media: Vec<String>,
) -> PostContent {
    PostContent {
        title,
        description,
        listing: details.0,
        location: Location(location),
        media: media.into_iter().map(MediaUrl).collect(),
    }
}

impl TryFrom<UserRecord> for User {
    type Error = ModelValidationError;

    fn try_from(value: UserRecord) -> Result<Self, Self::Error> {
        user(value.user_snowflake, value.handle, &value.role)
    }
}

impl TryFrom<ProfileRecord> for Profile {
    type Error = ModelValidationError;

    fn try_from(value: ProfileRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            user: user(value.user_snowflake, value.handle, &value.role)?,
            display_name: value.display_name,
            phone: value.phone.as_deref().map(PhoneNumber::new).transpose()?,
            avatar_url: value.avatar_url,
            created_at: value.created_at,
        })
    }
}

impl TryFrom<SessionRecord> for Session {
    type Error = ModelValidationError;

    fn try_from(value: SessionRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            user: Id::from_db(value.user_snowflake),
            role: value.role.parse()?,
            token_hash: value.token_hash.try_into()?,
            created_at: value.created_at,
            expires_at: value.expires_at,
            revoked_at: value.revoked_at,
        })
    }
}

impl From<LoginRecordRow> for LoginRecord {
    fn from(value: LoginRecordRow) -> Self {
        Self {
            created_at: value.created_at,
            expires_at: value.expires_at,
        }
    }
}

impl TryFrom<FullPostRecord> for Post {
    type Error = ModelValidationError;

    fn try_from(value: FullPostRecord) -> Result<Self, Self::Error> {
        let duration_months = value
            .duration_months
            .map(|months| ListingDuration::from_months(months.into()))
            .transpose()?
            .map(ListingDuration::months);

        Ok(Self {
            id: Id::from_db(value.post_snowflake),
            author: user(value.user_snowflake, value.handle, &value.role)?,
            content: content(
                value.title,
                value.description,
                value.details,
                value.location,
                value.media,
            ),
            tier: value.tier.parse::<Tier>()?,
            duration_months,
            created_at: value.created_at,
            expires_at: value.expires_at,
            view_count: value.view_count,
            tags: value
                .tags
                .iter()
                .map(|name| TagName::new(name))
                .collect::<Result<_, _>>()?,
        })
    }
}

impl TryFrom<PartialPostRecord> for PartialPost {
    type Error = ModelValidationError;

    fn try_from(value: PartialPostRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Id::from_db(value.post_snowflake),
            author_id: Id::from_db(value.user_snowflake),
            content: content(
                value.title,
                value.description,
                value.details,
                value.location,
                value.media,
            ),
            tier: value.tier.parse()?,
            created_at: value.created_at,
            expires_at: value.expires_at,
            view_count: value.view_count,
        })
    }
}

impl TryFrom<TagRecord> for Tag {
    type Error = ModelValidationError;

    fn try_from(value: TagRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Id::from_db(value.tag_snowflake),
            name: TagName::new(&value.name)?,
        })
    }
}

impl TryFrom<CommentRecord> for Comment {
    type Error = ModelValidationError;

    fn try_from(value: CommentRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Id::from_db(value.comment_snowflake),
            post: Id::from_db(value.post_snowflake),
            author: user(value.user_snowflake, value.handle, &value.role)?,
            body: value.body,
            rating: value.rating.map(|stars| Rating::new(stars.into())).transpose()?,
            created_at: value.created_at,
        })
    }
}

impl From<TransactionRecord> for Transaction {
    fn from(value: TransactionRecord) -> Self {
        Self {
            id: Id::from_db(value.transaction_snowflake),
            user: Id::from_db(value.user_snowflake),
            amount: Cents(value.amount_cents),
            description: value.description,
            post: value.post_snowflake.map(Id::from_db),
            created_at: value.created_at,
        }
    }
}

impl TryFrom<PendingPaymentRecord> for PendingPayment {
    type Error = ModelValidationError;

    fn try_from(value: PendingPaymentRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            key: IdempotencyKey::new(value.idempotency_key)?,
            user: Id::from_db(value.user_snowflake),
            purpose: value.purpose.0,
            amount: Cents(value.amount_cents),
            intent_id: value.intent_id,
            client_secret: value.client_secret,
            state: value.state.parse()?,
            post: value.post_snowflake.map(Id::from_db),
            created_at: value.created_at,
        })
    }
}

impl From<RevenueRecord> for RevenueReportRow {
    fn from(value: RevenueRecord) -> Self {
        Self {
            month: value.month,
            charges: value.charges,
            revenue: Cents(value.revenue),
        }
    }
}

impl TryFrom<DiscountRecord> for DiscountEntry {
    type Error = ModelValidationError;

    fn try_from(value: DiscountRecord) -> Result<Self, Self::Error> {
        let tier = value.tier.parse::<Tier>()?;
        Ok(Self {
            tier: tier
                .paid()
                .ok_or_else(|| ModelValidationError::Json(format!("free tier discount: {tier}")))?,
            duration_months: ListingDuration::from_months(value.duration_months.into())?,
            percent_off: u8::try_from(value.percent_off).unwrap_or(0).min(100),
        })
    }
}

impl From<BannerRecord> for Banner {
    fn from(value: BannerRecord) -> Self {
        Self {
            id: Id::from_db(value.banner_snowflake),
            title: value.title,
            image_url: value.image_url,
            link_url: value.link_url,
            active: value.active,
            created_at: value.created_at,
        }
    }
}

impl From<SettingRecord> for Setting {
    fn from(value: SettingRecord) -> Self {
        Self {
            key: value.key,
            value: value.value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{FullPostRecord, UserRecord};
    use nailnews_common::model::{
        ModelValidationError,
        listing::Listing,
        post::Post,
        pricing::Tier,
        user::{Role, User},
    };
    use sqlx::types::Json;
    use time::macros::datetime;

    fn post_record() -> FullPostRecord {
        FullPostRecord {
            post_snowflake: 11,
            title: "Hiring nail techs".to_owned(),
            description: "Two positions, weekends required.".to_owned(),
            details: Json(Listing::HireTech {
                position: "Nail tech".to_owned(),
                pay: None,
            }),
            location: "Houston, Texas, 77002".to_owned(),
            media: vec!["https://cdn.example.com/1.jpg".to_owned()],
            tier: "vip".to_owned(),
            duration_months: Some(6),
            created_at: datetime!(2026-01-01 00:00 UTC),
            expires_at: Some(datetime!(2026-07-01 00:00 UTC)),
            view_count: 3,
            tags: vec!["acrylic".to_owned()],
            user_snowflake: 7,
            handle: "salon_owner".to_owned(),
            role: "user".to_owned(),
        }
    }

    #[test]
    fn post_record_converts() {
        let post = Post::try_from(post_record()).unwrap();

        assert_eq!(u64::from(post.id), 11);
        assert_eq!(post.tier, Tier::Vip);
        assert_eq!(post.duration_months, Some(6));
        assert_eq!(post.author.role, Role::User);
        assert_eq!(post.tags[0].get(), "acrylic");
    }

    #[test]
    fn corrupt_rows_are_reported() {
        let mut record = post_record();
        record.tier = "platinum".to_owned();
        assert!(matches!(Post::try_from(record), Err(ModelValidationError::Tier(_))));

        let mut record = post_record();
        record.duration_months = Some(4);
        assert!(matches!(Post::try_from(record), Err(ModelValidationError::Duration(_))));

        let user = UserRecord {
            user_snowflake: 1,
            handle: "someone".to_owned(),
            role: "root".to_owned(),
        };
        assert!(matches!(User::try_from(user), Err(ModelValidationError::Role(_))));
    }
}
