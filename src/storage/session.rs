//! 后端会话
//!
//! 持有能力表与目录缓存。所有会改变目录内容的操作都从这里发起，完成后统一失效受影响的
//! 缓存目录，调用方无需自行维护失效逻辑。

use super::registry::{
    CapabilityKind, CapabilityRegistry, DeleteFeature, DirectoryFeature, Feature, IdFeature,
    ListFeature, MetadataFeature, MoveFeature, TouchFeature,
};
use super::{DeleteCallback, DeleteReport, OP_TIMEOUT_SECS};
use crate::core::cache::ListingCache;
use crate::error::{Messages, Result, TransferError};
use crate::model::{AttributedList, Path, SessionId, TransferStatus};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub struct Session {
    id: SessionId,
    host: String,
    registry: Arc<CapabilityRegistry>,
    cache: Arc<ListingCache>,
}

impl Session {
    pub fn new(host: impl Into<String>, registry: CapabilityRegistry, cache_size: usize) -> Self {
        let id = SessionId::new();
        let cache = Arc::new(ListingCache::new(id, cache_size));
        Self::with_cache(host, registry, cache)
    }

    /// 使用外部创建的缓存，会话 ID 与缓存保持一致
    pub fn with_cache(
        host: impl Into<String>,
        registry: CapabilityRegistry,
        cache: Arc<ListingCache>,
    ) -> Self {
        let host = host.into();
        if let Some(lister) = registry.feature::<ListFeature>() {
            lister.with_cache(cache.clone());
        }
        if let Some(ids) = registry.feature::<IdFeature>() {
            ids.with_cache(cache.clone());
        }
        info!("会话已建立: {} ({:?})", host, registry.kinds());
        Self {
            id: cache.session(),
            host,
            registry: Arc::new(registry),
            cache,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn cache(&self) -> &Arc<ListingCache> {
        &self.cache
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn messages(&self) -> &Messages {
        self.registry.messages()
    }

    pub fn feature<F: Feature>(&self) -> Option<Arc<F::Service>> {
        self.registry.feature::<F>()
    }

    pub fn require<F: Feature>(&self, file: &Path) -> Result<Arc<F::Service>> {
        self.registry.require::<F>(file)
    }

    pub fn is_supported(&self, kind: CapabilityKind) -> bool {
        self.registry.is_supported(kind)
    }

    /// 列出目录，同一目录的并发请求只访问一次后端
    pub async fn list(&self, directory: &Path) -> Result<Arc<AttributedList>> {
        let lister = self.require::<ListFeature>(directory)?;
        let reference = self.cache.reference(directory);
        let messages = *self.messages();
        self.cache
            .get_or_fetch(&reference, || async move {
                let listing = tokio::time::timeout(
                    Duration::from_secs(OP_TIMEOUT_SECS),
                    lister.list(directory),
                )
                .await
                .map_err(|_| {
                    TransferError::transient(
                        messages.format("Listing directory {0} failed", &[directory.name()]),
                    )
                    .with_file(directory)
                })??;
                debug!("列出目录 {}: {} 项", directory, listing.len());
                Ok(listing)
            })
            .await
    }

    /// 只读缓存，不触发拉取
    pub fn cached(&self, directory: &Path) -> Option<Arc<AttributedList>> {
        self.cache.lookup(directory)
    }

    pub async fn touch(&self, file: &Path, status: &TransferStatus) -> Result<Path> {
        let feature = self.require::<TouchFeature>(file)?;
        let parent = file.parent().ok_or_else(|| self.registry.unsupported(file))?;
        if !feature.is_supported(parent, file.name()) {
            return Err(self.registry.unsupported(file));
        }
        feature.preflight(parent, file.name()).await?;
        let created = feature.touch(file, status).await;
        self.invalidate(parent);
        created
    }

    pub async fn mkdir(&self, directory: &Path) -> Result<Path> {
        let feature = self.require::<DirectoryFeature>(directory)?;
        let created = feature.mkdir(directory).await;
        self.invalidate_parent(directory);
        created
    }

    /// 重命名或移动，源与目标所在目录都会失效
    pub async fn rename(&self, source: &Path, target: &Path) -> Result<Path> {
        let feature = self.require::<MoveFeature>(source)?;
        if !feature.is_supported(source, target) {
            return Err(self.registry.unsupported(source));
        }
        let renamed = feature.rename(source, target).await;
        self.invalidate_parent(source);
        self.invalidate_parent(target);
        if source.is_directory() {
            self.invalidate_tree(source);
            self.invalidate_tree(target);
        }
        renamed
    }

    pub async fn delete(&self, files: &[Path], callback: &dyn DeleteCallback) -> Result<DeleteReport> {
        let Some(first) = files.first() else {
            return Ok(DeleteReport::default());
        };
        let feature = self.require::<DeleteFeature>(first)?;
        let report = feature.delete(files, callback).await;
        for file in report.touched() {
            self.invalidate_parent(file);
            if file.is_directory() {
                self.invalidate_tree(file);
            }
        }
        Ok(report)
    }

    pub async fn read_metadata(&self, file: &Path) -> Result<HashMap<String, String>> {
        self.require::<MetadataFeature>(file)?.get(file).await
    }

    pub async fn write_metadata(&self, file: &Path, metadata: &HashMap<String, String>) -> Result<()> {
        let written = self.require::<MetadataFeature>(file)?.set(file, metadata).await;
        self.invalidate_parent(file);
        written
    }

    pub fn invalidate(&self, directory: &Path) -> bool {
        self.cache.invalidate(&self.cache.reference(directory))
    }

    /// 目录及其所有子目录
    pub fn invalidate_tree(&self, directory: &Path) -> usize {
        self.cache.invalidate_tree(&self.cache.reference(directory))
    }

    pub fn invalidate_parent(&self, file: &Path) -> bool {
        match file.parent() {
            Some(parent) => self.invalidate(parent),
            None => false,
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("host", &self.host)
            .field("registry", &self.registry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::model::PathType;
    use crate::storage::testing::MockBackend;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_list_is_cached() {
        let backend = MockBackend::new();
        backend.add_file("/docs/a.txt", 1);
        let session = backend.session();
        let docs = Path::from_absolute("/docs", PathType::Directory);

        let first = session.list(&docs).await.unwrap();
        let second = session.list(&docs).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(backend.calls.list.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_write_paths_invalidate_parent() {
        let backend = MockBackend::new();
        backend.add_file("/docs/a.txt", 1);
        let session = backend.session();
        let docs = Path::from_absolute("/docs", PathType::Directory);
        let file = Path::child(&docs, "b.txt", PathType::File);

        session.list(&docs).await.unwrap();
        session.touch(&file, &TransferStatus::new()).await.unwrap();
        assert!(session.cached(&docs).is_none());

        let listing = session.list(&docs).await.unwrap();
        assert!(listing.find_by_name("b.txt").is_some());

        let renamed = Path::child(&docs, "c.txt", PathType::File);
        session.rename(&file, &renamed).await.unwrap();
        assert!(session.cached(&docs).is_none());

        session.list(&docs).await.unwrap();
        let report = session.delete(&[renamed], &|_: &Path| {}).await.unwrap();
        assert!(report.is_complete());
        assert!(session.cached(&docs).is_none());
        assert_eq!(backend.calls.list.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_directory_rename_and_delete_drop_descendants() {
        let backend = MockBackend::new();
        backend.add_file("/a/sub/deep/x.txt", 1);
        backend.add_dir("/b");
        let session = backend.session();
        let a = Path::from_absolute("/a", PathType::Directory);
        let sub = Path::from_absolute("/a/sub", PathType::Directory);
        let deep = Path::from_absolute("/a/sub/deep", PathType::Directory);

        for dir in [&a, &sub, &deep] {
            session.list(dir).await.unwrap();
        }
        let moved = Path::from_absolute("/b/a", PathType::Directory);
        session.rename(&a, &moved).await.unwrap();
        for dir in [&a, &sub, &deep] {
            assert!(session.cached(dir).is_none(), "{}", dir);
        }

        let b = Path::from_absolute("/b", PathType::Directory);
        let moved_sub = Path::from_absolute("/b/a/sub", PathType::Directory);
        session.list(&moved).await.unwrap();
        session.list(&moved_sub).await.unwrap();
        let report = session.delete(&[moved.clone()], &|_: &Path| {}).await.unwrap();
        assert!(report.is_complete());
        assert!(session.cached(&b).is_none());
        assert!(session.cached(&moved).is_none());
        assert!(session.cached(&moved_sub).is_none());
    }

    #[tokio::test]
    async fn test_touch_unsupported_at_root() {
        let backend = MockBackend::new();
        let session = backend.session();
        let file = Path::child(&Path::root(), "a.txt", PathType::File);

        let err = session.touch(&file, &TransferStatus::new()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AccessDenied);
        assert_eq!(backend.calls.touch.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_capability() {
        let session = Session::new("empty", CapabilityRegistry::builder().build(), 10);
        let err = session.list(&Path::root()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AccessDenied);
    }
}
