//! Bearer session tokens.
//!
//! A token reads `{user_id}:{core}:{salt}` with base64 core and salt. Only the
//! argon2 hash of the core is ever stored.

use crate::model::{
    Id,
    user::{Role, UserMarker},
};
use argon2::{Argon2, Params};
use base64::{DecodeError, Engine, display::Base64Display, prelude::BASE64_STANDARD};
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Debug, Formatter},
    num::ParseIntError,
    str::FromStr,
};
use thiserror::Error;
use time::{Duration, OffsetDateTime};

pub const SESSION_TOKEN_CORE_LEN: usize = 24;
pub const SESSION_TOKEN_SALT_LEN: usize = 18;
pub const SESSION_TOKEN_HASH_LEN: usize = Params::DEFAULT_OUTPUT_LEN;

#[derive(Clone, Eq, PartialEq, Debug, Error)]
#[error("Hashing session token failed: {0}")]
pub struct SessionTokenHashError(argon2::Error);

#[derive(Clone, Eq, PartialEq, Debug, Error)]
pub enum SessionTokenDecodeError {
    #[error("Not enough parts separated by ':'")]
    NotEnoughParts,
    #[error("Invalid user id: {0}")]
    InvalidUserId(ParseIntError),
    #[error("Decoding base64 failed: {0}")]
    Decode(#[from] DecodeError),
    #[error("The core part has the wrong length")]
    InvalidCoreLength,
    #[error("The salt part has the wrong length")]
    InvalidSaltLength,
}

#[derive(Clone, Eq, PartialEq, Hash)]
pub struct SessionToken {
    pub user_id: Id<UserMarker>,
    core: [u8; SESSION_TOKEN_CORE_LEN],
    salt: [u8; SESSION_TOKEN_SALT_LEN],
}

#[derive(Clone, Eq, PartialEq, Hash)]
pub struct SessionTokenHash(pub Box<[u8; SESSION_TOKEN_HASH_LEN]>);

/// A stored session joined with the role of its user.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Session {
    pub user: Id<UserMarker>,
    pub role: Role,
    pub token_hash: SessionTokenHash,
    pub created_at: OffsetDateTime,
    pub expires_at: Option<OffsetDateTime>,
    pub revoked_at: Option<OffsetDateTime>,
}

impl Session {
    #[must_use]
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    /// Usable for authentication: neither expired nor replaced by rotation.
    #[must_use]
    pub fn is_active(&self, now: OffsetDateTime) -> bool {
        self.revoked_at.is_none() && !self.is_expired(now)
    }
}

/// One row of a user's login history.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct LoginRecord {
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
}

/// A freshly issued token, handed to the client exactly once.
#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct IssuedSession {
    pub user_id: Id<UserMarker>,
    pub token: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
}

impl SessionToken {
    #[must_use]
    pub fn generate_random(user_id: Id<UserMarker>) -> Self {
        Self {
            user_id,
            core: rand::random(),
            salt: rand::random(),
        }
    }

    #[must_use]
    pub fn as_token_str(&self) -> String {
        let user_id = self.user_id;
        let core = Base64Display::new(&self.core, &BASE64_STANDARD);
        let salt = Base64Display::new(&self.salt, &BASE64_STANDARD);

        format!("{user_id}:{core}:{salt}")
    }

    pub fn hash(&self) -> Result<SessionTokenHash, SessionTokenHashError> {
        let mut hash = Box::new([0; SESSION_TOKEN_HASH_LEN]);
        Argon2::default()
            .hash_password_into(&self.core, &self.salt, &mut *hash)
            .map_err(SessionTokenHashError)?;

        Ok(SessionTokenHash(hash))
    }

    /// Issues this token with an optional lifetime starting at `now`.
    #[must_use]
    pub fn issue(&self, now: OffsetDateTime, lifetime: Option<Duration>) -> IssuedSession {
        IssuedSession {
            user_id: self.user_id,
            token: self.as_token_str(),
            expires_at: lifetime.map(|lifetime| now + lifetime),
        }
    }
}

impl FromStr for SessionToken {
    type Err = SessionTokenDecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let (Some(user_id), Some(core), Some(salt)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(Self::Err::NotEnoughParts);
        };

        Ok(Self {
            user_id: u64::from_str(user_id)
                .map_err(Self::Err::InvalidUserId)?
                .into(),
            core: BASE64_STANDARD
                .decode(core)?
                .try_into()
                .map_err(|_| Self::Err::InvalidCoreLength)?,
            salt: BASE64_STANDARD
                .decode(salt)?
                .try_into()
                .map_err(|_| Self::Err::InvalidSaltLength)?,
        })
    }
}

impl Debug for SessionToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionToken")
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

impl Debug for SessionTokenHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionTokenHash([redacted])")
    }
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("The session token hash had an invalid length")]
pub struct InvalidSessionTokenHashError;

impl TryFrom<Vec<u8>> for SessionTokenHash {
    type Error = InvalidSessionTokenHashError;

    fn try_from(value: Vec<u8>) -> Result<Self, Self::Error> {
        let bytes: [u8; SESSION_TOKEN_HASH_LEN] =
            value.try_into().map_err(|_| InvalidSessionTokenHashError)?;
        Ok(Self(Box::new(bytes)))
    }
}

#[cfg(test)]
mod tests {
    use super::{
        SESSION_TOKEN_HASH_LEN, Session, SessionToken, SessionTokenDecodeError, SessionTokenHash,
    };
    use crate::model::{Id, user::Role};
    use time::{Duration, macros::datetime};

    #[test]
    fn token_string_parses_back() {
        let token = SessionToken::generate_random(Id::from(77));
        let parsed: SessionToken = token.as_token_str().parse().unwrap();

        assert_eq!(parsed, token);
        assert_eq!(parsed.hash().unwrap(), token.hash().unwrap());
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        assert_eq!(
            "12:abc".parse::<SessionToken>(),
            Err(SessionTokenDecodeError::NotEnoughParts)
        );
        assert!(matches!(
            "me:AAAA:AAAA".parse::<SessionToken>(),
            Err(SessionTokenDecodeError::InvalidUserId(_))
        ));
        assert_eq!(
            "12:AAAA:AAAA".parse::<SessionToken>(),
            Err(SessionTokenDecodeError::InvalidCoreLength)
        );
    }

    #[test]
    fn debug_output_hides_secrets() {
        let token = SessionToken::generate_random(Id::from(5));
        let debug = format!("{token:?}");
        assert!(!debug.contains(&token.as_token_str()));
    }

    #[test]
    fn issued_session_expiry() {
        let now = datetime!(2026-03-01 12:00 UTC);
        let token = SessionToken::generate_random(Id::from(9));

        assert_eq!(token.issue(now, None).expires_at, None);
        assert_eq!(
            token.issue(now, Some(Duration::days(30))).expires_at,
            Some(datetime!(2026-03-31 12:00 UTC))
        );
    }

    #[test]
    fn rotated_and_expired_sessions_are_inactive() {
        let now = datetime!(2026-03-01 12:00 UTC);
        let mut session = Session {
            user: Id::from(9),
            role: Role::User,
            token_hash: SessionTokenHash(Box::new([0; SESSION_TOKEN_HASH_LEN])),
            created_at: now - Duration::days(1),
            expires_at: Some(now + Duration::days(1)),
            revoked_at: None,
        };
        assert!(session.is_active(now));

        session.revoked_at = Some(now - Duration::hours(1));
        assert!(!session.is_active(now));

        session.revoked_at = None;
        session.expires_at = Some(now);
        assert!(!session.is_active(now));
    }
}
