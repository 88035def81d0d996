use crate::record::{
    BannerRecord, CommentRecord, DiscountRecord, FullPostRecord, LoginRecordRow,
    PartialPostRecord, PendingPaymentRecord, ProfileRecord, RevenueRecord, SessionRecord,
    SettingRecord, TagRecord, TransactionRecord, UserRecord,
};
use nailnews_common::{
    model::{
        Id, ModelValidationError, NailNewsSnowflakeGenerator,
        auth::{LoginRecord, Session, SessionTokenHash},
        engagement::{Comment, CreateComment},
        listing::Category,
        payment::{
            IdempotencyKey, InvalidPaymentTransition, PaymentEvent, PaymentPurpose, PaymentState,
            PendingPayment,
        },
        post::{PartialPost, Post, PostContent, PostDraft, PostMarker},
        pricing::{DiscountEntry, DiscountSchedule, Tier, TierSelection},
        site::{Banner, BannerMarker, CreateBanner, Setting},
        tag::{Tag, TagName},
        transaction::{RevenueReportRow, Transaction},
        user::{CreateUser, PhoneNumber, Profile, ProfilePatch, Role, User, UserHandle, UserMarker},
    },
    snowflake::{Origin, SnowflakeTimeError},
};
use sqlx::{PgConnection, PgPool, migrate::MigrateError, query, query_as, query_scalar, types::Json};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info};

pub type Result<T, E = DbError> = std::result::Result<T, E>;

pub const SEARCH_LIMIT: i64 = 50;
pub const FEATURED_LIMIT: i64 = 100;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("An object in the database was invalid: {0}")]
    Data(#[from] ModelValidationError),
    #[error("A unique constraint was violated: {constraint:?}")]
    Conflict { constraint: Option<String> },
    #[error("A referenced row does not exist: {constraint:?}")]
    MissingReference { constraint: Option<String> },
    #[error("The row to change does not exist")]
    NotFound,
    #[error(transparent)]
    Payment(#[from] InvalidPaymentTransition),
    #[error("Could not mint an id: {0}")]
    Snowflake(#[from] SnowflakeTimeError),
    #[error("Migrating the database failed: {0}")]
    Migrate(#[from] MigrateError),
    #[error(transparent)]
    Sqlx(sqlx::Error),
}

impl From<sqlx::Error> for DbError {
    fn from(value: sqlx::Error) -> Self {
        if let Some(db_error) = value.as_database_error() {
            let constraint = db_error.constraint().map(str::to_owned);
            if db_error.is_unique_violation() {
                return DbError::Conflict { constraint };
            }
            if db_error.is_foreign_key_violation() {
                return DbError::MissingReference { constraint };
            }
        }
        DbError::Sqlx(value)
    }
}

impl DbError {
    /// Whether a unique constraint with this name was violated.
    #[must_use]
    pub fn is_conflict_on(&self, name: &str) -> bool {
        matches!(self, DbError::Conflict { constraint: Some(constraint) } if constraint == name)
    }
}

/// Unique constraint holding one review per author and post.
pub const COMMENT_UNIQUE_CONSTRAINT: &str = "comments_one_per_author";

macro_rules! select_posts {
    ($($tail:literal)*) => {
        concat!(
            "
            SELECT
                p.post_snowflake,
                p.title,
                p.description,
                p.details,
                p.location,
                p.media,
                p.tier,
                p.duration_months,
                p.created_at,
                p.expires_at,
                p.view_count,
                ARRAY(
                    SELECT t.name
                    FROM posts.post_tags AS pt JOIN posts.tags AS t USING (tag_snowflake)
                    WHERE pt.post_snowflake = p.post_snowflake
                    ORDER BY t.name
                ) AS tags,
                u.user_snowflake,
                u.handle,
                u.role
            FROM
                posts.posts AS p JOIN users.users AS u USING (user_snowflake)
            ",
            $(" ", $tail,)*
        )
    };
}

const SELECT_PROFILES: &str = "
    SELECT user_snowflake, handle, role, display_name, phone, avatar_url, created_at
    FROM users.users
";

const SELECT_PENDING_PAYMENTS: &str = "
    SELECT
        idempotency_key, user_snowflake, purpose, amount_cents, intent_id,
        client_secret, state, post_snowflake, created_at
    FROM billing.pending_payments
";
const PAYMENT_BY_USER_AND_KEY: &str = "WHERE user_snowflake = $1 AND idempotency_key = $2";

pub struct DbClient {
    pool: PgPool,
    snowflake_generator: Mutex<NailNewsSnowflakeGenerator>,
}

impl std::fmt::Debug for DbClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbClient")
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl DbClient {
    #[must_use]
    pub fn new(pool: PgPool, origin: Origin) -> Self {
        Self {
            pool,
            snowflake_generator: Mutex::new(NailNewsSnowflakeGenerator::new(origin)),
        }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations applied");
        Ok(())
    }

    fn next_snowflake(&self) -> Result<i64> {
        let snowflake = self
            .snowflake_generator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .generate()?;
        Ok(snowflake.get().cast_signed())
    }

    // Users

    pub async fn fetch_user(&self, user_id: Id<UserMarker>) -> Result<Option<User>> {
        let record = query_as::<_, UserRecord>(
            "
            SELECT user_snowflake, handle, role
            FROM users.users
            WHERE user_snowflake = $1
            ",
        )
        .bind(user_id.to_db())
        .fetch_optional(&self.pool)
        .await?;

        let user = record.map(User::try_from).transpose()?;
        Ok(user)
    }

    pub async fn fetch_user_by_handle(&self, handle: &UserHandle) -> Result<Option<User>> {
        let record = query_as::<_, UserRecord>(
            "
            SELECT user_snowflake, handle, role
            FROM users.users
            WHERE handle = $1
            ",
        )
        .bind(handle.get())
        .fetch_optional(&self.pool)
        .await?;

        let user = record.map(User::try_from).transpose()?;
        Ok(user)
    }

    pub async fn create_user(&self, user: &CreateUser) -> Result<User> {
        let user_snowflake = self.next_snowflake()?;

        let record = query_as::<_, UserRecord>(
            "
            INSERT INTO users.users (user_snowflake, handle, display_name)
            VALUES ($1, $2, $3)
            RETURNING user_snowflake, handle, role
            ",
        )
        .bind(user_snowflake)
        .bind(user.handle.get())
        .bind(user.display_name.as_deref())
        .fetch_one(&self.pool)
        .await?;

        Ok(record.try_into()?)
    }

    pub async fn fetch_profile(&self, user_id: Id<UserMarker>) -> Result<Option<Profile>> {
        let record = query_as::<_, ProfileRecord>(&format!(
            "{SELECT_PROFILES} WHERE user_snowflake = $1"
        ))
        .bind(user_id.to_db())
        .fetch_optional(&self.pool)
        .await?;

        let profile = record.map(Profile::try_from).transpose()?;
        Ok(profile)
    }

    pub async fn update_profile(
        &self,
        user_id: Id<UserMarker>,
        patch: &ProfilePatch,
    ) -> Result<Option<Profile>> {
        let record = query_as::<_, ProfileRecord>(
            "
            UPDATE users.users
            SET
                display_name = COALESCE($2, display_name),
                avatar_url = COALESCE($3, avatar_url)
            WHERE user_snowflake = $1
            RETURNING user_snowflake, handle, role, display_name, phone, avatar_url, created_at
            ",
        )
        .bind(user_id.to_db())
        .bind(patch.display_name.as_deref())
        .bind(patch.avatar_url.as_deref())
        .fetch_optional(&self.pool)
        .await?;

        let profile = record.map(Profile::try_from).transpose()?;
        Ok(profile)
    }

    /// Returns whether the user exists.
    pub async fn set_user_role(&self, user_id: Id<UserMarker>, role: Role) -> Result<bool> {
        let result = query("UPDATE users.users SET role = $2 WHERE user_snowflake = $1")
            .bind(user_id.to_db())
            .bind(role.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Returns whether the user exists.
    pub async fn update_phone(&self, user_id: Id<UserMarker>, phone: &PhoneNumber) -> Result<bool> {
        let result = query("UPDATE users.users SET phone = $2 WHERE user_snowflake = $1")
            .bind(user_id.to_db())
            .bind(phone.get())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn fetch_all_users(&self) -> Result<Vec<Profile>> {
        let records = query_as::<_, ProfileRecord>(&format!(
            "{SELECT_PROFILES} ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;

        let profiles = records
            .into_iter()
            .map(Profile::try_from)
            .collect::<Result<_, _>>()?;
        Ok(profiles)
    }

    // Sessions

    pub async fn create_session(
        &self,
        user_id: Id<UserMarker>,
        token_hash: &SessionTokenHash,
        expires_at: Option<OffsetDateTime>,
    ) -> Result<()> {
        query(
            "
            INSERT INTO users.sessions (token_hash, user_snowflake, expires_at)
            VALUES ($1, $2, $3)
            ",
        )
        .bind(&token_hash.0[..])
        .bind(user_id.to_db())
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn fetch_session(&self, token_hash: &SessionTokenHash) -> Result<Option<Session>> {
        let record = query_as::<_, SessionRecord>(
            "
            SELECT s.user_snowflake, u.role, s.token_hash, s.created_at, s.expires_at, s.revoked_at
            FROM users.sessions AS s JOIN users.users AS u USING (user_snowflake)
            WHERE s.token_hash = $1
            ",
        )
        .bind(&token_hash.0[..])
        .fetch_optional(&self.pool)
        .await?;

        let session = record.map(Session::try_from).transpose()?;
        Ok(session)
    }

    /// Revokes the presented session and stores its successor in one step.
    /// Returns `false` when the old session was already revoked, so a token
    /// can be rotated only once.
    pub async fn rotate_session(
        &self,
        user_id: Id<UserMarker>,
        old_hash: &SessionTokenHash,
        new_hash: &SessionTokenHash,
        expires_at: Option<OffsetDateTime>,
        now: OffsetDateTime,
    ) -> Result<bool> {
        let mut transaction = self.pool.begin().await?;

        let revoked = query(
            "
            UPDATE users.sessions
            SET revoked_at = $3
            WHERE token_hash = $1 AND user_snowflake = $2 AND revoked_at IS NULL
            ",
        )
        .bind(&old_hash.0[..])
        .bind(user_id.to_db())
        .bind(now)
        .execute(&mut *transaction)
        .await?;
        if revoked.rows_affected() == 0 {
            return Ok(false);
        }

        query(
            "
            INSERT INTO users.sessions (token_hash, user_snowflake, created_at, expires_at)
            VALUES ($1, $2, $3, $4)
            ",
        )
        .bind(&new_hash.0[..])
        .bind(user_id.to_db())
        .bind(now)
        .bind(expires_at)
        .execute(&mut *transaction)
        .await?;

        transaction.commit().await?;
        debug!(user = %user_id, "Rotated session");
        Ok(true)
    }

    /// `get_user_login_history`: sessions issued to a user, newest first.
    pub async fn fetch_login_history(&self, user_id: Id<UserMarker>) -> Result<Vec<LoginRecord>> {
        let records = query_as::<_, LoginRecordRow>(
            "
            SELECT created_at, expires_at
            FROM users.sessions
            WHERE user_snowflake = $1
            ORDER BY created_at DESC
            ",
        )
        .bind(user_id.to_db())
        .fetch_all(&self.pool)
        .await?;

        Ok(records.into_iter().map(LoginRecord::from).collect())
    }

    // Posts

    pub async fn fetch_post(&self, post_id: Id<PostMarker>) -> Result<Option<Post>> {
        let record = query_as::<_, FullPostRecord>(select_posts!("WHERE p.post_snowflake = $1"))
            .bind(post_id.to_db())
            .fetch_optional(&self.pool)
            .await?;

        let post = record.map(Post::try_from).transpose()?;
        Ok(post)
    }

    pub async fn create_post(
        &self,
        author: Id<UserMarker>,
        draft: &PostDraft,
        now: OffsetDateTime,
    ) -> Result<Post> {
        let post_snowflake = self.next_snowflake()?;

        let mut transaction = self.pool.begin().await?;
        insert_post(&mut transaction, post_snowflake, author, draft, now).await?;
        replace_post_tags(&mut transaction, self, post_snowflake, &draft.tags).await?;
        transaction.commit().await?;

        self.fetch_post(Id::from_db(post_snowflake))
            .await?
            .ok_or(DbError::NotFound)
    }

    /// Overwrites the editable content; last write wins.
    pub async fn update_post(
        &self,
        post_id: Id<PostMarker>,
        content: &PostContent,
        tags: Option<&[TagName]>,
    ) -> Result<Post> {
        let mut transaction = self.pool.begin().await?;

        let result = query(
            "
            UPDATE posts.posts
            SET title = $2, description = $3, category = $4, details = $5, location = $6, media = $7
            WHERE post_snowflake = $1
            ",
        )
        .bind(post_id.to_db())
        .bind(&content.title)
        .bind(&content.description)
        .bind(content.listing.category().as_str())
        .bind(Json(&content.listing))
        .bind(&content.location.0)
        .bind(media_strings(content))
        .execute(&mut *transaction)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        if let Some(tags) = tags {
            replace_post_tags(&mut transaction, self, post_id.to_db(), tags).await?;
        }
        transaction.commit().await?;

        self.fetch_post(post_id).await?.ok_or(DbError::NotFound)
    }

    /// Returns whether the post existed.
    pub async fn delete_post(&self, post_id: Id<PostMarker>) -> Result<bool> {
        let result = query("DELETE FROM posts.posts WHERE post_snowflake = $1")
            .bind(post_id.to_db())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Paid posts that have not expired at `now`, VIP first.
    pub async fn fetch_featured_posts(&self, now: OffsetDateTime) -> Result<Vec<Post>> {
        let records = query_as::<_, FullPostRecord>(select_posts!(
            "WHERE p.tier <> 'free' AND p.expires_at > $1"
            "ORDER BY CASE p.tier WHEN 'vip' THEN 0 ELSE 1 END, p.created_at DESC"
            "LIMIT $2"
        ))
        .bind(now)
        .bind(FEATURED_LIMIT)
        .fetch_all(&self.pool)
        .await?;

        collect_posts(records)
    }

    /// `search_posts`: case-insensitive substring match, newest first.
    pub async fn search_posts(&self, text: &str, category: Option<Category>) -> Result<Vec<Post>> {
        let pattern = format!("%{}%", escape_like(text.trim()));

        let records = query_as::<_, FullPostRecord>(select_posts!(
            "WHERE (p.title ILIKE $1 OR p.description ILIKE $1 OR p.location ILIKE $1)"
            "AND ($2::TEXT IS NULL OR p.category = $2)"
            "ORDER BY p.created_at DESC"
            "LIMIT $3"
        ))
        .bind(pattern)
        .bind(category.map(Category::as_str))
        .bind(SEARCH_LIMIT)
        .fetch_all(&self.pool)
        .await?;

        collect_posts(records)
    }

    pub async fn fetch_posts_by_category(&self, categories: &[Category]) -> Result<Vec<Post>> {
        let categories: Vec<&str> = categories.iter().map(|category| category.as_str()).collect();

        let records = query_as::<_, FullPostRecord>(select_posts!(
            "WHERE p.category = ANY($1)"
            "ORDER BY p.created_at DESC"
        ))
        .bind(categories)
        .fetch_all(&self.pool)
        .await?;

        collect_posts(records)
    }

    /// `get_all_posts` for the back office.
    pub async fn fetch_all_posts(&self, limit: i64, offset: i64) -> Result<Vec<Post>> {
        let records = query_as::<_, FullPostRecord>(select_posts!(
            "ORDER BY p.created_at DESC"
            "LIMIT $1 OFFSET $2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        collect_posts(records)
    }

    /// `None` when the user does not exist.
    pub async fn fetch_user_posts(
        &self,
        user_id: Id<UserMarker>,
    ) -> Result<Option<Vec<PartialPost>>> {
        if self.fetch_user(user_id).await?.is_none() {
            return Ok(None);
        }

        let records = query_as::<_, PartialPostRecord>(
            "
            SELECT
                post_snowflake, user_snowflake, title, description, details, location,
                media, tier, created_at, expires_at, view_count
            FROM posts.posts
            WHERE user_snowflake = $1
            ORDER BY created_at DESC
            ",
        )
        .bind(user_id.to_db())
        .fetch_all(&self.pool)
        .await?;

        let posts = records
            .into_iter()
            .map(PartialPost::try_from)
            .collect::<Result<_, _>>()?;
        Ok(Some(posts))
    }

    /// `increment_view_count`. Returns the new count, `None` for unknown posts.
    pub async fn increment_view_count(&self, post_id: Id<PostMarker>) -> Result<Option<i64>> {
        let count = query_scalar::<_, i64>(
            "
            UPDATE posts.posts
            SET view_count = view_count + 1
            WHERE post_snowflake = $1
            RETURNING view_count
            ",
        )
        .bind(post_id.to_db())
        .fetch_optional(&self.pool)
        .await?;

        Ok(count)
    }

    pub async fn set_post_tags(&self, post_id: Id<PostMarker>, tags: &[TagName]) -> Result<()> {
        let mut transaction = self.pool.begin().await?;
        replace_post_tags(&mut transaction, self, post_id.to_db(), tags).await?;
        transaction.commit().await?;
        Ok(())
    }

    pub async fn fetch_tags(&self) -> Result<Vec<Tag>> {
        let records = query_as::<_, TagRecord>(
            "SELECT tag_snowflake, name FROM posts.tags ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        let tags = records.into_iter().map(Tag::try_from).collect::<Result<_, _>>()?;
        Ok(tags)
    }

    // Favorites

    /// Idempotent; favoriting twice is not an error.
    pub async fn add_favorite(
        &self,
        user_id: Id<UserMarker>,
        post_id: Id<PostMarker>,
    ) -> Result<()> {
        query(
            "
            INSERT INTO posts.favorites (user_snowflake, post_snowflake)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            ",
        )
        .bind(user_id.to_db())
        .bind(post_id.to_db())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Returns whether the post was a favorite.
    pub async fn remove_favorite(
        &self,
        user_id: Id<UserMarker>,
        post_id: Id<PostMarker>,
    ) -> Result<bool> {
        let result = query(
            "DELETE FROM posts.favorites WHERE user_snowflake = $1 AND post_snowflake = $2",
        )
        .bind(user_id.to_db())
        .bind(post_id.to_db())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn fetch_favorite_posts(&self, user_id: Id<UserMarker>) -> Result<Vec<Post>> {
        let records = query_as::<_, FullPostRecord>(select_posts!(
            "WHERE p.post_snowflake IN ("
            "    SELECT post_snowflake FROM posts.favorites WHERE user_snowflake = $1"
            ")"
            "ORDER BY p.created_at DESC"
        ))
        .bind(user_id.to_db())
        .fetch_all(&self.pool)
        .await?;

        collect_posts(records)
    }

    // Comments

    /// A second review of the same post by the same author is a
    /// [`DbError::Conflict`] on [`COMMENT_UNIQUE_CONSTRAINT`].
    pub async fn create_comment(
        &self,
        post_id: Id<PostMarker>,
        author: Id<UserMarker>,
        comment: &CreateComment,
    ) -> Result<Comment> {
        let comment_snowflake = self.next_snowflake()?;

        let record = query_as::<_, CommentRecord>(
            "
            WITH inserted AS (
                INSERT INTO posts.comments
                    (comment_snowflake, post_snowflake, user_snowflake, body, rating)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING
                    comment_snowflake, post_snowflake, user_snowflake, body, rating, created_at
            )
            SELECT
                i.comment_snowflake, i.post_snowflake, i.body, i.rating, i.created_at,
                u.user_snowflake, u.handle, u.role
            FROM inserted AS i JOIN users.users AS u USING (user_snowflake)
            ",
        )
        .bind(comment_snowflake)
        .bind(post_id.to_db())
        .bind(author.to_db())
        .bind(comment.body.trim())
        .bind(comment.rating.map(|rating| i16::from(rating.stars())))
        .fetch_one(&self.pool)
        .await?;

        Ok(record.try_into()?)
    }

    pub async fn fetch_comments(&self, post_id: Id<PostMarker>) -> Result<Vec<Comment>> {
        let records = query_as::<_, CommentRecord>(
            "
            SELECT
                c.comment_snowflake, c.post_snowflake, c.body, c.rating, c.created_at,
                u.user_snowflake, u.handle, u.role
            FROM posts.comments AS c JOIN users.users AS u USING (user_snowflake)
            WHERE c.post_snowflake = $1
            ORDER BY c.created_at DESC
            ",
        )
        .bind(post_id.to_db())
        .fetch_all(&self.pool)
        .await?;

        let comments = records
            .into_iter()
            .map(Comment::try_from)
            .collect::<Result<_, _>>()?;
        Ok(comments)
    }

    // Billing

    pub async fn fetch_transactions(&self, user_id: Id<UserMarker>) -> Result<Vec<Transaction>> {
        let records = query_as::<_, TransactionRecord>(
            "
            SELECT
                transaction_snowflake, user_snowflake, amount_cents, description,
                post_snowflake, created_at
            FROM billing.transactions
            WHERE user_snowflake = $1
            ORDER BY created_at DESC
            ",
        )
        .bind(user_id.to_db())
        .fetch_all(&self.pool)
        .await?;

        Ok(records.into_iter().map(Transaction::from).collect())
    }

    /// Stores a pending payment. When the user already used the key the stored
    /// row is returned unchanged. Keys are scoped to their user.
    pub async fn create_pending_payment(
        &self,
        payment: &PendingPayment,
    ) -> Result<PendingPayment> {
        query(
            "
            INSERT INTO billing.pending_payments
                (idempotency_key, user_snowflake, purpose, amount_cents, intent_id,
                 client_secret, state)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (user_snowflake, idempotency_key) DO NOTHING
            ",
        )
        .bind(payment.key.get())
        .bind(payment.user.to_db())
        .bind(Json(&payment.purpose))
        .bind(payment.amount.0)
        .bind(&payment.intent_id)
        .bind(&payment.client_secret)
        .bind(payment.state.as_str())
        .execute(&self.pool)
        .await?;

        self.fetch_pending_payment(payment.user, &payment.key)
            .await?
            .ok_or(DbError::NotFound)
    }

    pub async fn fetch_pending_payment(
        &self,
        user_id: Id<UserMarker>,
        key: &IdempotencyKey,
    ) -> Result<Option<PendingPayment>> {
        let record = query_as::<_, PendingPaymentRecord>(&format!(
            "{SELECT_PENDING_PAYMENTS} {PAYMENT_BY_USER_AND_KEY}"
        ))
        .bind(user_id.to_db())
        .bind(key.get())
        .fetch_optional(&self.pool)
        .await?;

        let payment = record.map(PendingPayment::try_from).transpose()?;
        Ok(payment)
    }

    /// Records that the processor reported the payment as failed.
    pub async fn mark_payment_failed(
        &self,
        user_id: Id<UserMarker>,
        key: &IdempotencyKey,
    ) -> Result<bool> {
        let result = query(
            "
            UPDATE billing.pending_payments
            SET state = $3
            WHERE user_snowflake = $1 AND idempotency_key = $2 AND state = $4
            ",
        )
        .bind(user_id.to_db())
        .bind(key.get())
        .bind(PaymentState::Failed.as_str())
        .bind(PaymentState::AwaitingPaymentConfirmation.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Creates or renews the post, records the charge and marks the payment
    /// done, all in one transaction. Finalizing a payment that is already done
    /// returns its post without side effects.
    pub async fn finalize_payment(
        &self,
        user_id: Id<UserMarker>,
        key: &IdempotencyKey,
        now: OffsetDateTime,
    ) -> Result<Id<PostMarker>> {
        let mut transaction = self.pool.begin().await?;

        let payment: PendingPayment = query_as::<_, PendingPaymentRecord>(&format!(
            "{SELECT_PENDING_PAYMENTS} {PAYMENT_BY_USER_AND_KEY} FOR UPDATE"
        ))
        .bind(user_id.to_db())
        .bind(key.get())
        .fetch_optional(&mut *transaction)
        .await?
        .ok_or(DbError::NotFound)?
        .try_into()?;

        if let (PaymentState::Done, Some(post)) = (payment.state, payment.post) {
            debug!(%key, %post, "Payment was already finalized");
            return Ok(post);
        }

        let finalizing = payment.state.on(PaymentEvent::PaymentConfirmed)?;
        let selection = payment.purpose.selection();

        let post_snowflake = match &payment.purpose {
            PaymentPurpose::Create { draft } => {
                let post_snowflake = self.next_snowflake()?;
                insert_post(&mut transaction, post_snowflake, payment.user, draft, now).await?;
                replace_post_tags(&mut transaction, self, post_snowflake, &draft.tags).await?;
                post_snowflake
            }
            PaymentPurpose::Renew { post, selection } => {
                renew_post(&mut transaction, *post, payment.user, *selection, now).await?;
                post.to_db()
            }
        };

        query(
            "
            INSERT INTO billing.transactions
                (transaction_snowflake, user_snowflake, amount_cents, description, post_snowflake)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(self.next_snowflake()?)
        .bind(payment.user.to_db())
        .bind((-payment.amount).0)
        .bind(selection.describe())
        .bind(post_snowflake)
        .execute(&mut *transaction)
        .await?;

        let done = finalizing.on(PaymentEvent::Finalized)?;
        query(
            "
            UPDATE billing.pending_payments
            SET state = $3, post_snowflake = $4, finalized_at = $5
            WHERE user_snowflake = $1 AND idempotency_key = $2
            ",
        )
        .bind(user_id.to_db())
        .bind(key.get())
        .bind(done.as_str())
        .bind(post_snowflake)
        .bind(now)
        .execute(&mut *transaction)
        .await?;

        transaction.commit().await?;
        info!(%key, post = post_snowflake, amount = payment.amount.0, "Payment finalized");

        Ok(Id::from_db(post_snowflake))
    }

    /// `get_detailed_revenue_report`: charges per calendar month, newest first.
    pub async fn fetch_revenue_report(&self) -> Result<Vec<RevenueReportRow>> {
        let records = query_as::<_, RevenueRecord>(
            "
            SELECT
                date_trunc('month', created_at) AS month,
                COUNT(*) AS charges,
                (-SUM(amount_cents))::BIGINT AS revenue
            FROM billing.transactions
            WHERE amount_cents < 0
            GROUP BY 1
            ORDER BY 1 DESC
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(records.into_iter().map(RevenueReportRow::from).collect())
    }

    pub async fn fetch_discount_schedule(&self) -> Result<DiscountSchedule> {
        let records = query_as::<_, DiscountRecord>(
            "
            SELECT tier, duration_months, percent_off
            FROM billing.discount_schedule
            ORDER BY tier, duration_months
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        let entries = records
            .into_iter()
            .map(DiscountEntry::try_from)
            .collect::<Result<_, _>>()?;
        Ok(DiscountSchedule { entries })
    }

    pub async fn upsert_discount(&self, entry: &DiscountEntry) -> Result<()> {
        let tier: Tier = entry.tier.into();

        query(
            "
            INSERT INTO billing.discount_schedule (tier, duration_months, percent_off)
            VALUES ($1, $2, $3)
            ON CONFLICT (tier, duration_months) DO UPDATE SET percent_off = EXCLUDED.percent_off
            ",
        )
        .bind(tier.as_str())
        .bind(i16::from(entry.duration_months.months()))
        .bind(i16::from(entry.percent_off.min(100)))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // Site content

    pub async fn fetch_banners(&self, active_only: bool) -> Result<Vec<Banner>> {
        let records = query_as::<_, BannerRecord>(
            "
            SELECT banner_snowflake, title, image_url, link_url, active, created_at
            FROM site.banners
            WHERE active OR NOT $1
            ORDER BY created_at DESC
            ",
        )
        .bind(active_only)
        .fetch_all(&self.pool)
        .await?;

        Ok(records.into_iter().map(Banner::from).collect())
    }

    pub async fn create_banner(&self, banner: &CreateBanner) -> Result<Banner> {
        let record = query_as::<_, BannerRecord>(
            "
            INSERT INTO site.banners (banner_snowflake, title, image_url, link_url, active)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING banner_snowflake, title, image_url, link_url, active, created_at
            ",
        )
        .bind(self.next_snowflake()?)
        .bind(&banner.title)
        .bind(&banner.image_url)
        .bind(banner.link_url.as_deref())
        .bind(banner.active)
        .fetch_one(&self.pool)
        .await?;

        Ok(record.into())
    }

    pub async fn delete_banner(&self, banner_id: Id<BannerMarker>) -> Result<bool> {
        let result = query("DELETE FROM site.banners WHERE banner_snowflake = $1")
            .bind(banner_id.to_db())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn fetch_settings(&self) -> Result<Vec<Setting>> {
        let records =
            query_as::<_, SettingRecord>("SELECT key, value FROM site.settings ORDER BY key")
                .fetch_all(&self.pool)
                .await?;

        Ok(records.into_iter().map(Setting::from).collect())
    }

    pub async fn put_setting(&self, setting: &Setting) -> Result<()> {
        query(
            "
            INSERT INTO site.settings (key, value)
            VALUES ($1, $2)
            ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value
            ",
        )
        .bind(&setting.key)
        .bind(&setting.value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn collect_posts(records: Vec<FullPostRecord>) -> Result<Vec<Post>> {
    let posts = records
        .into_iter()
        .map(Post::try_from)
        .collect::<Result<_, _>>()?;
    Ok(posts)
}

fn media_strings(content: &PostContent) -> Vec<String> {
    content.media.iter().map(|url| url.0.clone()).collect()
}

fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

async fn insert_post(
    connection: &mut PgConnection,
    post_snowflake: i64,
    author: Id<UserMarker>,
    draft: &PostDraft,
    now: OffsetDateTime,
) -> Result<()> {
    let content = &draft.content;
    let expires_at = draft
        .selection
        .expires_at(now)
        .map_err(ModelValidationError::from)?;

    query(
        "
        INSERT INTO posts.posts (
            post_snowflake, user_snowflake, title, description, category, details,
            location, media, tier, duration_months, created_at, expires_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        ",
    )
    .bind(post_snowflake)
    .bind(author.to_db())
    .bind(&content.title)
    .bind(&content.description)
    .bind(content.listing.category().as_str())
    .bind(Json(&content.listing))
    .bind(&content.location.0)
    .bind(media_strings(content))
    .bind(draft.selection.tier().as_str())
    .bind(draft.selection.duration().map(|duration| i16::from(duration.months())))
    .bind(now)
    .bind(expires_at)
    .execute(&mut *connection)
    .await?;

    Ok(())
}

/// Restarts the paid period at `now`, not at the original creation time.
async fn renew_post(
    connection: &mut PgConnection,
    post_id: Id<PostMarker>,
    owner: Id<UserMarker>,
    selection: TierSelection,
    now: OffsetDateTime,
) -> Result<()> {
    let expires_at = selection.expires_at(now).map_err(ModelValidationError::from)?;

    let result = query(
        "
        UPDATE posts.posts
        SET tier = $3, duration_months = $4, expires_at = $5
        WHERE post_snowflake = $1 AND user_snowflake = $2
        ",
    )
    .bind(post_id.to_db())
    .bind(owner.to_db())
    .bind(selection.tier().as_str())
    .bind(selection.duration().map(|duration| i16::from(duration.months())))
    .bind(expires_at)
    .execute(&mut *connection)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}

async fn replace_post_tags(
    connection: &mut PgConnection,
    db: &DbClient,
    post_snowflake: i64,
    tags: &[TagName],
) -> Result<()> {
    query("DELETE FROM posts.post_tags WHERE post_snowflake = $1")
        .bind(post_snowflake)
        .execute(&mut *connection)
        .await?;

    for tag in tags {
        let tag_snowflake = query_scalar::<_, i64>(
            "
            INSERT INTO posts.tags (tag_snowflake, name)
            VALUES ($1, $2)
            ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
            RETURNING tag_snowflake
            ",
        )
        .bind(db.next_snowflake()?)
        .bind(tag.get())
        .fetch_one(&mut *connection)
        .await?;

        query(
            "
            INSERT INTO posts.post_tags (post_snowflake, tag_snowflake)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            ",
        )
        .bind(post_snowflake)
        .bind(tag_snowflake)
        .execute(&mut *connection)
        .await?;
    }

    Ok(())
}
