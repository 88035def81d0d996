use crate::model::Id;
use serde::{Deserialize, Deserializer, Serialize, de::Error as _};
use thiserror::Error;

pub const TAG_NAME_MAX_LEN: usize = 40;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct TagMarker;

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub id: Id<TagMarker>,
    pub name: TagName,
}

/// Trimmed, lowercase tag name.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Serialize)]
#[serde(transparent)]
pub struct TagName(String);

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("Tag names need 1 to {TAG_NAME_MAX_LEN} characters: {0:?}")]
pub struct InvalidTagNameError(String);

impl TagName {
    pub fn new(raw: &str) -> Result<Self, InvalidTagNameError> {
        let name = raw.trim().to_lowercase();
        let len = name.chars().count();
        if len == 0 || len > TAG_NAME_MAX_LEN {
            return Err(InvalidTagNameError(raw.to_owned()));
        }
        Ok(Self(name))
    }

    #[must_use]
    pub fn get(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for TagName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        TagName::new(&raw).map_err(D::Error::custom)
    }
}
