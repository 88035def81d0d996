use crate::model::{
    Id,
    listing::{InvalidListingError, Listing},
    pricing::{Tier, TierSelection},
    tag::TagName,
    user::{User, UserMarker},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

pub const TITLE_MIN_LEN: usize = 5;
pub const TITLE_MAX_LEN: usize = 120;
pub const DESCRIPTION_MIN_LEN: usize = 20;
pub const DESCRIPTION_MAX_LEN: usize = 5000;
pub const MEDIA_MAX_COUNT: usize = 20;
pub const TAGS_MAX_COUNT: usize = 10;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct PostMarker;

#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct Post {
    pub id: Id<PostMarker>,
    pub author: User,
    pub content: PostContent,
    pub tier: Tier,
    pub duration_months: Option<u8>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
    pub view_count: i64,
    pub tags: Vec<TagName>,
}

/// A post without its author expanded, as listed on a profile.
#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct PartialPost {
    pub id: Id<PostMarker>,
    pub author_id: Id<UserMarker>,
    pub content: PostContent,
    pub tier: Tier,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
    pub view_count: i64,
}

/// The author-editable part of a post.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize, Deserialize)]
pub struct PostContent {
    pub title: String,
    pub description: String,
    pub listing: Listing,
    pub location: Location,
    #[serde(default)]
    pub media: Vec<MediaUrl>,
}

/// What an author submits to create a post.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize, Deserialize)]
pub struct PostDraft {
    #[serde(flatten)]
    pub content: PostContent,
    #[serde(default)]
    pub selection: TierSelection,
    #[serde(default)]
    pub tags: Vec<TagName>,
}

/// Partial edit. Tier and expiry only change through checkout.
#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Serialize, Deserialize)]
pub struct PostPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub listing: Option<Listing>,
    #[serde(default)]
    pub location: Option<Location>,
    #[serde(default)]
    pub media: Option<Vec<MediaUrl>>,
    #[serde(default)]
    pub tags: Option<Vec<TagName>>,
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Error)]
pub enum InvalidPostError {
    #[error("Titles need {TITLE_MIN_LEN} to {TITLE_MAX_LEN} characters")]
    TitleLength,
    #[error("Descriptions need {DESCRIPTION_MIN_LEN} to {DESCRIPTION_MAX_LEN} characters")]
    DescriptionLength,
    #[error("A location is required")]
    MissingLocation,
    #[error("At most {MEDIA_MAX_COUNT} media files per post")]
    TooManyMedia,
    #[error("Media must be an http or https URL: {0}")]
    InvalidMediaUrl(String),
    #[error("At most {TAGS_MAX_COUNT} tags per post")]
    TooManyTags,
    #[error(transparent)]
    Listing(#[from] InvalidListingError),
}

impl PostContent {
    pub fn validate(&self) -> Result<(), InvalidPostError> {
        validate_title(&self.title)?;
        validate_description(&self.description)?;
        if self.location.0.trim().is_empty() {
            return Err(InvalidPostError::MissingLocation);
        }
        validate_media(&self.media)?;
        self.listing.validate()?;
        Ok(())
    }

    /// Applies a patch and validates the result.
    pub fn patched(&self, patch: PostPatch) -> Result<Self, InvalidPostError> {
        let content = Self {
            title: patch.title.unwrap_or_else(|| self.title.clone()),
            description: patch.description.unwrap_or_else(|| self.description.clone()),
            listing: patch.listing.unwrap_or_else(|| self.listing.clone()),
            location: patch.location.unwrap_or_else(|| self.location.clone()),
            media: patch.media.unwrap_or_else(|| self.media.clone()),
        };
        content.validate()?;
        Ok(content)
    }
}

impl PostDraft {
    pub fn validate(&self) -> Result<(), InvalidPostError> {
        self.content.validate()?;
        validate_tags(&self.tags)
    }
}

pub fn validate_tags(tags: &[TagName]) -> Result<(), InvalidPostError> {
    if tags.len() > TAGS_MAX_COUNT {
        return Err(InvalidPostError::TooManyTags);
    }
    Ok(())
}

fn validate_title(title: &str) -> Result<(), InvalidPostError> {
    let len = title.trim().chars().count();
    if (TITLE_MIN_LEN..=TITLE_MAX_LEN).contains(&len) {
        Ok(())
    } else {
        Err(InvalidPostError::TitleLength)
    }
}

fn validate_description(description: &str) -> Result<(), InvalidPostError> {
    let len = description.trim().chars().count();
    if (DESCRIPTION_MIN_LEN..=DESCRIPTION_MAX_LEN).contains(&len) {
        Ok(())
    } else {
        Err(InvalidPostError::DescriptionLength)
    }
}

fn validate_media(media: &[MediaUrl]) -> Result<(), InvalidPostError> {
    if media.len() > MEDIA_MAX_COUNT {
        return Err(InvalidPostError::TooManyMedia);
    }
    match media
        .iter()
        .find(|url| !(url.0.starts_with("https://") || url.0.starts_with("http://")))
    {
        Some(url) => Err(InvalidPostError::InvalidMediaUrl(url.0.clone())),
        None => Ok(()),
    }
}

impl Post {
    /// Paid and not yet expired. Lapsed posts stay readable and editable.
    #[must_use]
    pub fn is_featured(&self, now: OffsetDateTime) -> bool {
        is_featured(self.tier, self.expires_at, now)
    }
}

impl PartialPost {
    #[must_use]
    pub fn is_featured(&self, now: OffsetDateTime) -> bool {
        is_featured(self.tier, self.expires_at, now)
    }
}

#[must_use]
pub fn is_featured(tier: Tier, expires_at: Option<OffsetDateTime>, now: OffsetDateTime) -> bool {
    tier != Tier::Free && expires_at.is_some_and(|expires_at| expires_at > now)
}

/// Free-text `"city, state, zip"`.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Location(pub String);

impl Location {
    fn token(&self, index: usize) -> Option<&str> {
        self.0
            .split(',')
            .nth(index)
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }

    #[must_use]
    pub fn city(&self) -> Option<&str> {
        self.token(0)
    }

    #[must_use]
    pub fn state(&self) -> Option<&str> {
        self.token(1)
    }

    #[must_use]
    pub fn zip(&self) -> Option<&str> {
        self.token(2)
    }
}

/// URL of an uploaded image or an embedded video.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaUrl(pub String);

#[cfg(test)]
mod tests {
    use super::{
        InvalidPostError, Location, MediaUrl, PostContent, PostPatch, is_featured,
    };
    use crate::model::{listing::Listing, pricing::Tier};
    use time::{Duration, macros::datetime};

    fn content() -> PostContent {
        PostContent {
            title: "Salon for sale".to_owned(),
            description: "Busy six chair salon next to a grocery store.".to_owned(),
            listing: Listing::Service { service_type: None },
            location: Location("Houston, Texas, 77002".to_owned()),
            media: vec![MediaUrl("https://cdn.example.com/a.jpg".to_owned())],
        }
    }

    #[test]
    fn featured_predicate() {
        let now = datetime!(2026-05-01 12:00 UTC);

        assert!(!is_featured(Tier::Vip, Some(now - Duration::seconds(1)), now));
        assert!(is_featured(Tier::Vip, Some(now + Duration::days(1)), now));
        assert!(!is_featured(Tier::Free, None, now));
        assert!(!is_featured(Tier::Urgent, None, now));
    }

    #[test]
    fn content_validation() {
        assert_eq!(content().validate(), Ok(()));

        let mut short = content();
        short.title = "Hi".to_owned();
        assert_eq!(short.validate(), Err(InvalidPostError::TitleLength));

        let mut terse = content();
        terse.description = "Call me".to_owned();
        assert_eq!(terse.validate(), Err(InvalidPostError::DescriptionLength));

        let mut local = content();
        local.media = vec![MediaUrl("file:///etc/passwd".to_owned())];
        assert!(matches!(local.validate(), Err(InvalidPostError::InvalidMediaUrl(_))));
    }

    #[test]
    fn patch_keeps_untouched_fields() {
        let patched = content()
            .patched(PostPatch {
                title: Some("Salon for sale, price cut".to_owned()),
                ..PostPatch::default()
            })
            .unwrap();

        assert_eq!(patched.title, "Salon for sale, price cut");
        assert_eq!(patched.location, content().location);
        assert!(
            content()
                .patched(PostPatch {
                    description: Some(String::new()),
                    ..PostPatch::default()
                })
                .is_err()
        );
    }

    #[test]
    fn location_tokens() {
        let location = Location("Houston,  Texas , 77002".to_owned());
        assert_eq!(location.city(), Some("Houston"));
        assert_eq!(location.state(), Some("Texas"));
        assert_eq!(location.zip(), Some("77002"));

        let partial = Location("Houston".to_owned());
        assert_eq!(partial.state(), None);
    }
}
