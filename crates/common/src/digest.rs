//! SHA-1 content digests and the digest cache.
//!
//! Digests double as strong ETags, rendered as `urn:sha1:<hex>`.
//!
//! # Staleness
//!
//! [`DigestCache::compute_or_fetch`] trusts a cached value without looking at the
//! file again. If something outside the connector rewrites a file, the cached
//! digest goes stale until the connector's own store or remove path refreshes it.
//! Only writes made through the connector keep the cache honest.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::SystemTime;

use serde::{Serialize, Serializer};
use sha1::{Digest, Sha1};
use tokio::io::AsyncReadExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::extra_props::{ExtraPropertiesError, ExtraPropertiesStore, CONTENT_DIGEST};
use crate::node::ResourceId;

const URN_PREFIX: &str = "urn:sha1:";

/// Read size used while hashing a file.
const HASH_CHUNK_SIZE: usize = 64 * 1024;

/// A SHA-1 digest of some content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentDigest([u8; 20]);

impl ContentDigest {
    pub fn of(data: &[u8]) -> Self {
        Self(Sha1::digest(data).into())
    }

    pub fn from_hasher(hasher: Sha1) -> Self {
        Self(hasher.finalize().into())
    }

    pub fn hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", URN_PREFIX, self.hex())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid content digest: {0}")]
pub struct DigestParseError(String);

impl FromStr for ContentDigest {
    type Err = DigestParseError;

    /// Accepts `urn:sha1:<hex>` or a bare 40 character hex string.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex_part = s.strip_prefix(URN_PREFIX).unwrap_or(s);
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(hex_part, &mut bytes).map_err(|_| DigestParseError(s.to_string()))?;
        Ok(Self(bytes))
    }
}

impl Serialize for ContentDigest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Hash a file by streaming it in fixed-size chunks.
pub async fn sha1_file(path: &Path) -> std::io::Result<ContentDigest> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha1::new();
    let mut buf = vec![0u8; HASH_CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(ContentDigest::from_hasher(hasher))
}

/// Size and mtime of a file, used to notice rewrites that happen while hashing.
#[derive(Debug, PartialEq, Eq)]
struct Fingerprint {
    len: u64,
    modified: Option<SystemTime>,
}

impl Fingerprint {
    async fn of(path: &Path) -> std::io::Result<Self> {
        let metadata = tokio::fs::metadata(path).await?;
        Ok(Self {
            len: metadata.len(),
            modified: metadata.modified().ok(),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DigestError {
    #[error("failed to read content: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Properties(#[from] ExtraPropertiesError),
}

/// Digest cache backed by the extra-properties store.
#[derive(Debug, Clone)]
pub struct DigestCache {
    props: Arc<dyn ExtraPropertiesStore>,
}

impl DigestCache {
    pub fn new(props: Arc<dyn ExtraPropertiesStore>) -> Self {
        Self { props }
    }

    /// Return the cached digest for `id`, or hash `path` once and remember it.
    ///
    /// `writes` is the lock held by every store and remove. A fresh digest is only
    /// recorded under it, and only when no writer cached a value while the file was
    /// being hashed and the file still has the size and mtime seen before hashing.
    /// Otherwise the writer's value wins.
    pub async fn compute_or_fetch(
        &self,
        id: &ResourceId,
        path: &Path,
        writes: &Mutex<()>,
    ) -> Result<ContentDigest, DigestError> {
        if let Some(digest) = self.cached(id).await? {
            debug!(id = %id, "digest cache hit");
            return Ok(digest);
        }

        let before = Fingerprint::of(path).await?;
        let digest = sha1_file(path).await?;

        let _guard = writes.lock().await;
        if let Some(cached) = self.cached(id).await? {
            debug!(id = %id, "digest recorded by a writer while hashing");
            return Ok(cached);
        }
        if Fingerprint::of(path).await.ok().as_ref() != Some(&before) {
            debug!(id = %id, "file changed while hashing, digest not cached");
            return Ok(digest);
        }
        self.refresh(id, &digest).await?;
        debug!(id = %id, digest = %digest, "digest computed");
        Ok(digest)
    }

    /// [`compute_or_fetch`](Self::compute_or_fetch) for callers already holding the
    /// writer lock.
    pub async fn compute_or_fetch_exclusive(
        &self,
        id: &ResourceId,
        path: &Path,
    ) -> Result<ContentDigest, DigestError> {
        if let Some(digest) = self.cached(id).await? {
            return Ok(digest);
        }
        let digest = sha1_file(path).await?;
        self.refresh(id, &digest).await?;
        debug!(id = %id, digest = %digest, "digest computed");
        Ok(digest)
    }

    /// The cached digest, without touching the file.
    pub async fn cached(&self, id: &ResourceId) -> Result<Option<ContentDigest>, DigestError> {
        let Some(raw) = self.props.get(id.as_str(), CONTENT_DIGEST).await? else {
            return Ok(None);
        };
        match raw.parse::<ContentDigest>() {
            Ok(digest) => Ok(Some(digest)),
            Err(e) => {
                warn!(id = %id, error = %e, "discarding unparsable cached digest");
                Ok(None)
            }
        }
    }

    pub async fn refresh(&self, id: &ResourceId, digest: &ContentDigest) -> Result<(), DigestError> {
        self.props
            .store(id.as_str(), CONTENT_DIGEST, &digest.to_string())
            .await?;
        Ok(())
    }

    pub async fn invalidate(&self, id: &ResourceId) -> Result<(), DigestError> {
        self.props.remove(id.as_str(), CONTENT_DIGEST).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extra_props::MemoryExtraProperties;

    const MARBLES_SHA1: &str = "ba6cb22191300aebcfcfb83de9635d6b224677df";

    #[test]
    fn test_known_digest() {
        let digest = ContentDigest::of(b"marbles for everyone");
        assert_eq!(digest.hex(), MARBLES_SHA1);
        assert_eq!(digest.to_string(), format!("urn:sha1:{}", MARBLES_SHA1));
        assert_eq!(
            ContentDigest::of(b"hello").hex(),
            "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d"
        );
    }

    #[test]
    fn test_parse_urn_and_bare_hex() {
        let urn: ContentDigest = format!("urn:sha1:{}", MARBLES_SHA1).parse().unwrap();
        let bare: ContentDigest = MARBLES_SHA1.parse().unwrap();
        assert_eq!(urn, bare);
        assert!("urn:sha1:xyz".parse::<ContentDigest>().is_err());
        assert!("urn:sha1:abcd".parse::<ContentDigest>().is_err());
    }

    #[tokio::test]
    async fn test_file_digest_matches_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.bin");
        // Larger than one hashing chunk
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &data).unwrap();

        assert_eq!(sha1_file(&path).await.unwrap(), ContentDigest::of(&data));
    }

    #[tokio::test]
    async fn test_compute_then_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, "hello").unwrap();

        let props = Arc::new(MemoryExtraProperties::new());
        let cache = DigestCache::new(props.clone());
        let writes = Mutex::new(());
        let id = ResourceId::parse("/f.txt/fcr:content").unwrap();

        assert!(cache.cached(&id).await.unwrap().is_none());
        let computed = cache.compute_or_fetch(&id, &path, &writes).await.unwrap();
        assert_eq!(computed, ContentDigest::of(b"hello"));
        assert_eq!(cache.cached(&id).await.unwrap(), Some(computed));
    }

    #[tokio::test]
    async fn test_cached_value_is_trusted_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, "hello").unwrap();

        let props = Arc::new(MemoryExtraProperties::new());
        let cache = DigestCache::new(props.clone());
        let writes = Mutex::new(());
        let id = ResourceId::parse("/f.txt/fcr:content").unwrap();
        cache.compute_or_fetch(&id, &path, &writes).await.unwrap();

        // Mutate the file outside the connector; the cache keeps the old value
        std::fs::write(&path, "goodbye").unwrap();
        let digest = cache.compute_or_fetch(&id, &path, &writes).await.unwrap();
        assert_eq!(digest, ContentDigest::of(b"hello"));

        cache.invalidate(&id).await.unwrap();
        let digest = cache.compute_or_fetch(&id, &path, &writes).await.unwrap();
        assert_eq!(digest, ContentDigest::of(b"goodbye"));
    }

    #[tokio::test]
    async fn test_unparsable_cache_entry_is_recomputed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, "hello").unwrap();

        let props = Arc::new(MemoryExtraProperties::new());
        let id = ResourceId::parse("/f.txt/fcr:content").unwrap();
        props
            .store(id.as_str(), CONTENT_DIGEST, "not-a-digest")
            .await
            .unwrap();

        let cache = DigestCache::new(props);
        let writes = Mutex::new(());
        let digest = cache.compute_or_fetch(&id, &path, &writes).await.unwrap();
        assert_eq!(digest, ContentDigest::of(b"hello"));
    }

    #[tokio::test]
    async fn test_writer_digest_wins_over_concurrent_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, "old bytes").unwrap();

        let props = Arc::new(MemoryExtraProperties::new());
        let cache = DigestCache::new(props);
        let writes = Mutex::new(());
        let id = ResourceId::parse("/f.txt/fcr:content").unwrap();

        // A writer holds the lock while the reader hashes the old bytes, then
        // publishes new bytes and their digest before letting go
        let guard = writes.lock().await;
        let fresh = ContentDigest::of(b"new bytes");
        let (read, ()) = tokio::join!(cache.compute_or_fetch(&id, &path, &writes), async {
            tokio::task::yield_now().await;
            std::fs::write(&path, "new bytes").unwrap();
            cache.refresh(&id, &fresh).await.unwrap();
            drop(guard);
        });

        assert_eq!(read.unwrap(), fresh);
        assert_eq!(cache.cached(&id).await.unwrap(), Some(fresh));
    }
}
