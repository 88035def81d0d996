//! Uploaded images and logos.

use async_trait::async_trait;
use axum::body::Bytes;
use futures::{StreamExt, TryStreamExt, stream};
use nailnews_common::model::post::MediaUrl;
use std::{fmt::Debug, path::PathBuf, str::FromStr};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

pub const MAX_CONCURRENT_WRITES: usize = 4;
const MAX_EXTENSION_LEN: usize = 8;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Unknown media bucket: {0}")]
    UnknownBucket(String),
    #[error("The upload contained no files")]
    NoFiles,
    #[error("Could not write media file: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub enum Bucket {
    Images,
    Logos,
    Covers,
}

impl Bucket {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Bucket::Images => "images",
            Bucket::Logos => "logos",
            Bucket::Covers => "covers",
        }
    }
}

impl FromStr for Bucket {
    type Err = MediaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [Bucket::Images, Bucket::Logos, Bucket::Covers]
            .into_iter()
            .find(|bucket| bucket.as_str() == s)
            .ok_or_else(|| MediaError::UnknownBucket(s.to_owned()))
    }
}

#[derive(Clone, Debug)]
pub struct Upload {
    pub file_name: Option<String>,
    pub bytes: Bytes,
}

impl Upload {
    /// Random object name keeping a short alphanumeric extension.
    fn object_name(&self) -> String {
        let extension = self
            .file_name
            .as_deref()
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, extension)| extension.to_ascii_lowercase())
            .filter(|extension| {
                !extension.is_empty()
                    && extension.len() <= MAX_EXTENSION_LEN
                    && extension.bytes().all(|byte| byte.is_ascii_alphanumeric())
            });

        match extension {
            Some(extension) => format!("{}.{extension}", Uuid::new_v4()),
            None => Uuid::new_v4().to_string(),
        }
    }
}

#[async_trait]
pub trait MediaStore: Debug + Send + Sync {
    /// Stores one object and returns its public URL.
    async fn put(&self, bucket: Bucket, name: &str, bytes: Bytes) -> Result<MediaUrl, MediaError>;
}

/// Writes objects below a directory that is served statically.
#[derive(Clone, Debug)]
pub struct LocalMediaStore {
    root: PathBuf,
    base_url: String,
}

impl LocalMediaStore {
    #[must_use]
    pub fn new(root: PathBuf, base_url: &str) -> Self {
        Self {
            root,
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }
}

#[async_trait]
impl MediaStore for LocalMediaStore {
    async fn put(&self, bucket: Bucket, name: &str, bytes: Bytes) -> Result<MediaUrl, MediaError> {
        let directory = self.root.join(bucket.as_str());
        tokio::fs::create_dir_all(&directory).await?;
        tokio::fs::write(directory.join(name), &bytes).await?;

        debug!(bucket = bucket.as_str(), name, len = bytes.len(), "Stored media file");
        Ok(MediaUrl(format!("{}/{}/{name}", self.base_url, bucket.as_str())))
    }
}

/// Stores every upload, keeping their order in the returned URLs.
///
/// The first failed write fails the whole batch. Files already written stay
/// where they are.
pub async fn store_all(
    store: &dyn MediaStore,
    bucket: Bucket,
    uploads: Vec<Upload>,
) -> Result<Vec<MediaUrl>, MediaError> {
    if uploads.is_empty() {
        return Err(MediaError::NoFiles);
    }

    stream::iter(uploads)
        .map(|upload| async move {
            let name = upload.object_name();
            store.put(bucket, &name, upload.bytes).await
        })
        .buffered(MAX_CONCURRENT_WRITES)
        .try_collect()
        .await
}

#[cfg(test)]
mod tests {
    use super::{
        Bucket, LocalMediaStore, MAX_CONCURRENT_WRITES, MediaError, MediaStore, Upload, store_all,
    };
    use async_trait::async_trait;
    use axum::body::Bytes;
    use nailnews_common::model::post::MediaUrl;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct CountingStore {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        writes: AtomicUsize,
    }

    #[async_trait]
    impl MediaStore for CountingStore {
        async fn put(
            &self,
            bucket: Bucket,
            _name: &str,
            bytes: Bytes,
        ) -> Result<MediaUrl, MediaError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            for _ in 0..3 {
                tokio::task::yield_now().await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if &bytes[..] == b"broken" {
                return Err(MediaError::Io(std::io::Error::other("disk full")));
            }
            self.writes.fetch_add(1, Ordering::SeqCst);

            let label = String::from_utf8_lossy(&bytes).into_owned();
            Ok(MediaUrl(format!("/files/{}/{label}", bucket.as_str())))
        }
    }

    fn upload(content: &str) -> Upload {
        Upload {
            file_name: Some(format!("{content}.png")),
            bytes: Bytes::from(content.to_owned()),
        }
    }

    #[tokio::test]
    async fn uploads_keep_their_order_with_bounded_fan_out() {
        let store = CountingStore::default();
        let uploads = (0..10).map(|i| upload(&format!("photo{i}"))).collect();

        let urls = store_all(&store, Bucket::Images, uploads).await.unwrap();

        let expected: Vec<_> = (0..10)
            .map(|i| MediaUrl(format!("/files/images/photo{i}")))
            .collect();
        assert_eq!(urls, expected);
        assert!(store.peak.load(Ordering::SeqCst) <= MAX_CONCURRENT_WRITES);
    }

    #[tokio::test]
    async fn first_failure_fails_the_batch() {
        let store = CountingStore::default();
        let uploads = vec![upload("a"), upload("broken"), upload("c")];

        let result = store_all(&store, Bucket::Logos, uploads).await;

        assert!(matches!(result, Err(MediaError::Io(_))));
        assert!(store.writes.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn empty_uploads_are_rejected() {
        let store = CountingStore::default();
        let result = store_all(&store, Bucket::Covers, Vec::new()).await;
        assert!(matches!(result, Err(MediaError::NoFiles)));
    }

    #[test]
    fn object_names_keep_safe_extensions_only() {
        let name = upload("salon").object_name();
        assert!(name.ends_with(".png"));

        let sneaky = Upload {
            file_name: Some("../../etc/passwd".to_owned()),
            bytes: Bytes::new(),
        };
        assert!(!sneaky.object_name().contains('/'));
    }

    #[test]
    fn buckets_parse() {
        assert_eq!("logos".parse::<Bucket>().unwrap(), Bucket::Logos);
        assert!(matches!("videos".parse::<Bucket>(), Err(MediaError::UnknownBucket(_))));
    }

    #[tokio::test]
    async fn local_store_writes_below_the_bucket() {
        let root = std::env::temp_dir().join(format!("nailnews-media-{}", uuid::Uuid::new_v4()));
        let store = LocalMediaStore::new(root.clone(), "/files/");

        let url = store
            .put(Bucket::Images, "nails.jpg", Bytes::from_static(b"jpeg"))
            .await
            .unwrap();

        assert_eq!(url, MediaUrl("/files/images/nails.jpg".to_owned()));
        assert_eq!(std::fs::read(root.join("images/nails.jpg")).unwrap(), b"jpeg");
        std::fs::remove_dir_all(root).unwrap();
    }
}
