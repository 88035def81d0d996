//! Favorites and reviews.

use crate::model::{
    Id,
    post::PostMarker,
    user::{User, UserMarker},
};
use serde::{Deserialize, Deserializer, Serialize, de::Error as _};
use thiserror::Error;
use time::OffsetDateTime;

pub const COMMENT_MAX_LEN: usize = 2000;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct CommentMarker;

/// A `(user, post)` pair; its existence means the post is favorited.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Serialize, Deserialize)]
pub struct Favorite {
    pub user: Id<UserMarker>,
    pub post: Id<PostMarker>,
}

/// Star rating from 1 to 5.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Serialize)]
#[serde(transparent)]
pub struct Rating(u8);

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("Ratings go from 1 to 5 stars, not {0}")]
pub struct InvalidRatingError(i64);

impl Rating {
    pub fn new(stars: i64) -> Result<Self, InvalidRatingError> {
        match u8::try_from(stars) {
            Ok(stars @ 1..=5) => Ok(Self(stars)),
            _ => Err(InvalidRatingError(stars)),
        }
    }

    #[must_use]
    pub fn stars(self) -> u8 {
        self.0
    }
}

impl<'de> Deserialize<'de> for Rating {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Rating::new(i64::deserialize(deserializer)?).map_err(D::Error::custom)
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct Comment {
    pub id: Id<CommentMarker>,
    pub post: Id<PostMarker>,
    pub author: User,
    pub body: String,
    pub rating: Option<Rating>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize, Deserialize)]
pub struct CreateComment {
    pub body: String,
    #[serde(default)]
    pub rating: Option<Rating>,
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Error)]
#[error("Comments need 1 to {COMMENT_MAX_LEN} characters")]
pub struct InvalidCommentError;

impl CreateComment {
    pub fn validate(&self) -> Result<(), InvalidCommentError> {
        let len = self.body.trim().chars().count();
        if len == 0 || len > COMMENT_MAX_LEN {
            return Err(InvalidCommentError);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{CreateComment, InvalidCommentError, Rating};
    use crate::model::ModelValidationError;

    #[test]
    fn ratings_are_one_to_five_stars() {
        assert_eq!(Rating::new(5).unwrap().stars(), 5);
        assert!(Rating::new(0).is_err());
        assert!(Rating::new(6).is_err());
        assert!(Rating::new(-1).is_err());
        assert!(serde_json::from_str::<CreateComment>(r#"{"body":"ok","rating":9}"#).is_err());
    }

    #[test]
    fn empty_comments_are_invalid() {
        let comment = CreateComment {
            body: "   ".to_owned(),
            rating: None,
        };
        assert!(comment.validate().is_err());
    }

    #[test]
    fn comment_errors_are_validation_errors() {
        let comment = CreateComment {
            body: String::new(),
            rating: None,
        };
        let error = comment.validate().map_err(ModelValidationError::from);
        assert_eq!(error, Err(ModelValidationError::Comment(InvalidCommentError)));
    }
}
