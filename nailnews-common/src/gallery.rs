//! Photo and video albums.

use crate::model::post::{MediaUrl, Post};
use serde::{Deserialize, Serialize};

pub const VIDEO_HOSTS: [&str; 3] = ["youtube.com", "youtu.be", "vimeo.com"];

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlbumKind {
    Image,
    Video,
}

#[must_use]
pub fn is_video(url: &MediaUrl) -> bool {
    VIDEO_HOSTS.iter().any(|host| url.0.contains(host))
}

/// An album is a video album as soon as one of its media links a video host.
#[must_use]
pub fn classify_album(media: &[MediaUrl]) -> AlbumKind {
    if media.iter().any(is_video) {
        AlbumKind::Video
    } else {
        AlbumKind::Image
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Serialize, Deserialize)]
pub struct Gallery {
    pub image_albums: Vec<Post>,
    pub video_albums: Vec<Post>,
}

#[must_use]
pub fn split_gallery(posts: impl IntoIterator<Item = Post>) -> Gallery {
    let (video_albums, image_albums) = posts
        .into_iter()
        .partition(|post| classify_album(&post.content.media) == AlbumKind::Video);

    Gallery {
        image_albums,
        video_albums,
    }
}
