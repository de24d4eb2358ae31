use std::fs::Metadata;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    Existing, FederationConfig, FederationError, Guarded, StoreMode, StoreOutcome,
    StorePayload, StoreRequest, TEMP_PREFIX,
};
use crate::digest::{ContentDigest, DigestCache};
use crate::extra_props::{ExtraPropertiesStore, MIME_TYPE, ORIGINAL_NAME, TOUCHED_AT};
use crate::node::{BinaryDescriptor, NodeKind, ResourceId, ResourceNode};

type Result<T> = std::result::Result<T, FederationError>;

/// Whether the caller already holds the writer lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Shared,
    Exclusive,
}

/// Read-only filesystem connector.
///
/// Reads run concurrently. Mutations go through a single writer lock, so a store or
/// remove and its parent touch are ordered with respect to other mutations. Readers
/// are never blocked and may see the parent's touch marker either before or after
/// a concurrent child mutation.
#[derive(Debug)]
pub struct FileSystemConnector {
    root: PathBuf,
    props: Arc<dyn ExtraPropertiesStore>,
    digests: DigestCache,
    write_lock: Mutex<()>,
}

impl FileSystemConnector {
    /// Validate `config` and build a connector.
    ///
    /// Fails with [`FederationError::Misconfigured`] unless the federation is marked
    /// read-only and the root is a readable directory.
    pub async fn initialize(
        config: FederationConfig,
        props: Arc<dyn ExtraPropertiesStore>,
        digests: DigestCache,
    ) -> Result<Self> {
        if !config.read_only {
            return Err(FederationError::Misconfigured(
                "the federated filesystem must be configured read-only".to_string(),
            ));
        }

        let root = tokio::fs::canonicalize(&config.root).await.map_err(|e| {
            FederationError::Misconfigured(format!(
                "root directory {} is not accessible: {}",
                config.root.display(),
                e
            ))
        })?;

        let metadata = tokio::fs::metadata(&root).await.map_err(|e| {
            FederationError::Misconfigured(format!("cannot stat {}: {}", root.display(), e))
        })?;
        if !metadata.is_dir() {
            return Err(FederationError::Misconfigured(format!(
                "root {} is not a directory",
                root.display()
            )));
        }
        tokio::fs::read_dir(&root).await.map_err(|e| {
            FederationError::Misconfigured(format!("root {} is not readable: {}", root.display(), e))
        })?;

        info!(root = %root.display(), "filesystem connector initialized");
        Ok(Self {
            root,
            props,
            digests,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn extra_properties(&self) -> &Arc<dyn ExtraPropertiesStore> {
        &self.props
    }

    /// Backing path of the resource that owns `id`.
    pub fn file_for(&self, id: &ResourceId) -> PathBuf {
        let mut path = self.root.clone();
        for segment in id.owner().segments() {
            path.push(segment);
        }
        path
    }

    /// Identifier of the file or directory at `path`, if it lies under the root.
    pub fn id_for(&self, path: &Path) -> Option<ResourceId> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let mut raw = String::from("/");
        for (i, component) in relative.components().enumerate() {
            if i > 0 {
                raw.push('/');
            }
            raw.push_str(component.as_os_str().to_str()?);
        }
        ResourceId::parse(&raw)
    }

    /// Resolve a raw identifier. Empty or unresolvable identifiers yield `None`.
    pub async fn get_document_by_id(&self, id: &str) -> Result<Option<ResourceNode>> {
        match ResourceId::parse(id) {
            Some(id) => self.get_document(&id).await,
            None => Ok(None),
        }
    }

    pub async fn get_document(&self, id: &ResourceId) -> Result<Option<ResourceNode>> {
        self.load_document(id, Access::Shared).await
    }

    async fn load_document(&self, id: &ResourceId, access: Access) -> Result<Option<ResourceNode>> {
        let path = self.file_for(id);
        let Some(metadata) = stat(&path).await? else {
            return Ok(None);
        };

        if id.is_content() {
            if !metadata.is_file() {
                return Ok(None);
            }
            return self
                .binary_document(id, &path, &metadata, access)
                .await
                .map(Some);
        }

        if metadata.is_dir() {
            self.directory_document(id, &path, &metadata).await.map(Some)
        } else if metadata.is_file() {
            Ok(Some(ResourceNode {
                id: id.clone(),
                name: id.name(),
                last_modified: modified(&metadata),
                kind: NodeKind::File {
                    content: id.content(),
                },
            }))
        } else {
            Ok(None)
        }
    }

    async fn directory_document(
        &self,
        id: &ResourceId,
        path: &Path,
        metadata: &Metadata,
    ) -> Result<ResourceNode> {
        let mut children = Vec::new();
        let mut entries = tokio::fs::read_dir(path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.starts_with(TEMP_PREFIX) {
                continue;
            }
            if let Some(child) = id.child(&name) {
                children.push(child);
            }
        }
        children.sort();

        let mut last_modified = modified(metadata);
        if let Some(touched) = self.touched_at(id).await? {
            last_modified = last_modified.max(touched);
        }

        Ok(ResourceNode {
            id: id.clone(),
            name: id.name(),
            last_modified,
            kind: NodeKind::Directory { children },
        })
    }

    async fn binary_document(
        &self,
        id: &ResourceId,
        path: &Path,
        metadata: &Metadata,
        access: Access,
    ) -> Result<ResourceNode> {
        let props = self.props.get_all(id.as_str()).await?;
        let name = id.name();

        let mime_type = props.get(MIME_TYPE).cloned().unwrap_or_else(|| {
            mime_guess::from_path(&name)
                .first_or_octet_stream()
                .essence_str()
                .to_string()
        });
        let digest = match access {
            Access::Shared => {
                self.digests
                    .compute_or_fetch(id, path, &self.write_lock)
                    .await?
            }
            Access::Exclusive => self.digests.compute_or_fetch_exclusive(id, path).await?,
        };

        Ok(ResourceNode {
            id: id.clone(),
            name,
            last_modified: modified(metadata),
            kind: NodeKind::BinaryContent {
                owner: id.owner(),
                descriptor: BinaryDescriptor {
                    size: metadata.len(),
                    mime_type,
                    digest: Some(digest),
                    original_name: props.get(ORIGINAL_NAME).cloned(),
                    source: path.to_path_buf(),
                },
            },
        })
    }

    /// Digest of the file at `path`, served from the cache when one is recorded.
    ///
    /// A cached value is returned without re-reading the file, even if the file has
    /// since changed on disk.
    pub async fn sha1(&self, path: &Path) -> Result<ContentDigest> {
        let id = self.id_for(path).ok_or_else(|| {
            FederationError::InvalidTarget(format!("{} is outside the root", path.display()))
        })?;
        Ok(self
            .digests
            .compute_or_fetch(&id.content(), path, &self.write_lock)
            .await?)
    }

    pub async fn exists(&self, id: &ResourceId) -> Result<bool> {
        Ok(stat(&self.file_for(id)).await?.is_some())
    }

    pub async fn is_file(&self, id: &ResourceId) -> Result<bool> {
        Ok(stat(&self.file_for(id))
            .await?
            .map(|m| m.is_file())
            .unwrap_or(false))
    }

    /// Write a document to the filesystem, then touch its parent.
    pub async fn store_document(&self, request: StoreRequest) -> Result<StoreOutcome> {
        let _guard = self.write_lock.lock().await;
        self.store_locked(request).await
    }

    /// Store `request` only if `check` accepts the current state of its owner.
    ///
    /// The check and the write happen under the writer lock, so no other mutation
    /// can slip in between them.
    pub async fn store_document_if<F>(
        &self,
        request: StoreRequest,
        check: F,
    ) -> Result<Guarded<StoreOutcome>>
    where
        F: FnOnce(Option<Existing<'_>>) -> bool + Send,
    {
        let owner = request.id.owner();
        let _guard = self.write_lock.lock().await;
        let current = self.load_exclusive(&owner).await?;
        if !check(current.as_ref().map(Existing::from_pair)) {
            debug!(id = %owner, "store rejected by precondition");
            return Ok(Guarded::Rejected);
        }
        self.store_locked(request).await.map(Guarded::Applied)
    }

    /// `id` and, for files, their content document, read while holding the writer lock.
    async fn load_exclusive(
        &self,
        id: &ResourceId,
    ) -> Result<Option<(ResourceNode, Option<ResourceNode>)>> {
        let Some(node) = self.load_document(id, Access::Exclusive).await? else {
            return Ok(None);
        };
        let content = if node.is_file() {
            self.load_document(&id.content(), Access::Exclusive).await?
        } else {
            None
        };
        Ok(Some((node, content)))
    }

    async fn store_locked(&self, request: StoreRequest) -> Result<StoreOutcome> {
        let owner = request.id.owner();
        if owner.is_root() {
            return Err(FederationError::InvalidTarget(
                "cannot store over the repository root".to_string(),
            ));
        }

        let path = self.file_for(&owner);
        self.require_parent_container(&owner, &path).await?;
        let existing = stat(&path).await?;

        let outcome = match request.payload {
            StorePayload::Binary {
                data,
                mime_type,
                original_name,
            } => {
                if existing.as_ref().is_some_and(|m| m.is_dir()) {
                    return Err(FederationError::InvalidTarget(format!(
                        "{} is a container, not a binary",
                        owner
                    )));
                }
                if existing.is_some() && request.mode == StoreMode::Create {
                    return Err(FederationError::Conflict(owner));
                }

                let outcome = self.write_file(&owner, &path, &data, request.mode).await?;

                let content_id = owner.content();
                self.digests
                    .refresh(&content_id, &ContentDigest::of(&data))
                    .await?;
                // New bytes never inherit the previous upload's type or name
                self.replace_property(&content_id, MIME_TYPE, mime_type.as_deref())
                    .await?;
                self.replace_property(&content_id, ORIGINAL_NAME, original_name.as_deref())
                    .await?;
                info!(id = %owner, size = data.len(), outcome = ?outcome, "binary stored");
                outcome
            }
            StorePayload::Container => match existing {
                Some(m) if m.is_dir() && request.mode == StoreMode::Upsert => {
                    StoreOutcome::Replaced
                }
                Some(m) if m.is_dir() => return Err(FederationError::Conflict(owner)),
                Some(_) => {
                    return Err(FederationError::InvalidTarget(format!(
                        "{} is a binary, not a container",
                        owner
                    )))
                }
                None => {
                    match tokio::fs::create_dir(&path).await {
                        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                            return Err(FederationError::Conflict(owner))
                        }
                        other => other?,
                    }
                    info!(id = %owner, "container created");
                    StoreOutcome::Created
                }
            },
        };

        self.touch_parent(&owner).await?;
        Ok(outcome)
    }

    /// Stage `data` next to `path`, then publish it atomically.
    ///
    /// Creation links the staged file into place, which fails if anything appeared at
    /// `path` in the meantime. Replacement renames over the old file.
    async fn write_file(
        &self,
        owner: &ResourceId,
        path: &Path,
        data: &[u8],
        mode: StoreMode,
    ) -> Result<StoreOutcome> {
        let parent = path.parent().unwrap_or(&self.root);
        let staging = parent.join(format!("{}{}", TEMP_PREFIX, Uuid::new_v4()));

        let result = publish(owner, &staging, path, data, mode).await;

        if let Err(e) = tokio::fs::remove_file(&staging).await {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %staging.display(), error = %e, "failed to remove staging file");
            }
        }
        result
    }

    async fn require_parent_container(&self, owner: &ResourceId, path: &Path) -> Result<()> {
        let parent = path.parent().unwrap_or(&self.root);
        match stat(parent).await? {
            Some(m) if m.is_dir() => Ok(()),
            Some(_) => Err(FederationError::InvalidTarget(format!(
                "parent of {} is not a container",
                owner
            ))),
            None => Err(FederationError::InvalidTarget(format!(
                "parent of {} does not exist",
                owner
            ))),
        }
    }

    async fn replace_property(
        &self,
        id: &ResourceId,
        name: &str,
        value: Option<&str>,
    ) -> Result<()> {
        match value {
            Some(value) => self.props.store(id.as_str(), name, value).await?,
            None => {
                self.props.remove(id.as_str(), name).await?;
            }
        }
        Ok(())
    }

    /// Delete the backing entry of `id`. Returns whether anything was removed.
    pub async fn remove_document(&self, id: &ResourceId) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        self.remove_locked(id).await
    }

    /// Remove `id` only if `check` accepts its current state. A missing entry is
    /// reported as `Applied(false)` without consulting `check`.
    pub async fn remove_document_if<F>(&self, id: &ResourceId, check: F) -> Result<Guarded<bool>>
    where
        F: FnOnce(Existing<'_>) -> bool + Send,
    {
        let _guard = self.write_lock.lock().await;
        let Some(current) = self.load_exclusive(id).await? else {
            return Ok(Guarded::Applied(false));
        };
        if !check(Existing::from_pair(&current)) {
            debug!(id = %id, "remove rejected by precondition");
            return Ok(Guarded::Rejected);
        }
        self.remove_locked(id).await.map(Guarded::Applied)
    }

    async fn remove_locked(&self, id: &ResourceId) -> Result<bool> {
        let owner = id.owner();
        if owner.is_root() {
            return Err(FederationError::InvalidTarget(
                "cannot remove the repository root".to_string(),
            ));
        }

        let path = self.file_for(&owner);
        let Some(metadata) = stat(&path).await? else {
            return Ok(false);
        };

        if metadata.is_dir() {
            let descendants = self.walk(&path).await?;
            tokio::fs::remove_dir_all(&path).await?;
            for (child_path, _) in descendants {
                if let Some(child) = self.id_for(&child_path) {
                    self.drop_properties(&child).await?;
                }
            }
        } else {
            tokio::fs::remove_file(&path).await?;
        }
        self.drop_properties(&owner).await?;

        info!(id = %owner, "document removed");
        self.touch_parent(&owner).await?;
        Ok(true)
    }

    async fn drop_properties(&self, id: &ResourceId) -> Result<()> {
        self.props.remove_all(id.as_str()).await?;
        self.props.remove_all(id.content().as_str()).await?;
        Ok(())
    }

    /// Record a child mutation on the parent of `id`.
    pub async fn touch_parent(&self, id: &ResourceId) -> Result<()> {
        let Some(parent) = id.parent() else {
            return Ok(());
        };
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        self.props.store(parent.as_str(), TOUCHED_AT, &now).await?;
        debug!(parent = %parent, child = %id, "parent touched");
        Ok(())
    }

    /// When a child of `id` was last mutated through this connector.
    pub async fn touched_at(&self, id: &ResourceId) -> Result<Option<DateTime<Utc>>> {
        let Some(raw) = self.props.get(id.owner().as_str(), TOUCHED_AT).await? else {
            return Ok(None);
        };
        match DateTime::parse_from_rfc3339(&raw) {
            Ok(t) => Ok(Some(t.with_timezone(&Utc))),
            Err(e) => {
                warn!(id = %id, error = %e, "ignoring unparsable touch marker");
                Ok(None)
            }
        }
    }

    /// Create every missing ancestor container of `id`. Returns the ones created.
    pub async fn ensure_containers(&self, id: &ResourceId) -> Result<Vec<ResourceId>> {
        let mut created = Vec::new();
        for ancestor in id.ancestors() {
            if ancestor.is_root() {
                continue;
            }
            if stat(&self.file_for(&ancestor)).await?.is_some_and(|m| m.is_dir()) {
                continue;
            }
            let request = StoreRequest::container(ancestor.clone(), StoreMode::Upsert);
            if self.store_document(request).await? == StoreOutcome::Created {
                created.push(ancestor);
            }
        }
        Ok(created)
    }

    /// Total size in bytes of every file under the root.
    pub async fn repository_size(&self) -> Result<u64> {
        Ok(self
            .walk(&self.root)
            .await?
            .iter()
            .filter(|(_, m)| m.is_file())
            .map(|(_, m)| m.len())
            .sum())
    }

    /// Number of entries directly under the root.
    pub async fn object_count(&self) -> Result<u64> {
        let mut count = 0;
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX) {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn walk(&self, dir: &Path) -> Result<Vec<(PathBuf, Metadata)>> {
        let mut out = Vec::new();
        let mut pending = vec![dir.to_path_buf()];
        while let Some(current) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&current).await?;
            while let Some(entry) = entries.next_entry().await? {
                if entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX) {
                    continue;
                }
                let metadata = entry.metadata().await?;
                if metadata.is_dir() {
                    pending.push(entry.path());
                }
                out.push((entry.path(), metadata));
            }
        }
        Ok(out)
    }
}

async fn publish(
    owner: &ResourceId,
    staging: &Path,
    path: &Path,
    data: &[u8],
    mode: StoreMode,
) -> Result<StoreOutcome> {
    let mut file = tokio::fs::File::create(staging).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    drop(file);

    match mode {
        StoreMode::Create => match tokio::fs::hard_link(staging, path).await {
            Ok(()) => Ok(StoreOutcome::Created),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(FederationError::Conflict(owner.clone()))
            }
            Err(e) => Err(e.into()),
        },
        StoreMode::Upsert => {
            let existed = stat(path).await?.is_some();
            tokio::fs::rename(staging, path).await?;
            Ok(if existed {
                StoreOutcome::Replaced
            } else {
                StoreOutcome::Created
            })
        }
    }
}

/// `stat` that maps "not there" (including a file in place of a directory) to `None`.
async fn stat(path: &Path) -> Result<Option<Metadata>> {
    match tokio::fs::metadata(path).await {
        Ok(m) => Ok(Some(m)),
        Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn modified(metadata: &Metadata) -> DateTime<Utc> {
    metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| DateTime::<Utc>::from(std::time::UNIX_EPOCH))
}
