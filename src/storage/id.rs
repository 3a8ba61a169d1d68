use super::{IdProvider, ListService};
use crate::core::cache::ListingCache;
use crate::error::{Result, TransferError};
use crate::model::{AttributedList, Path};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// 通过父目录列表查找文件 ID
///
/// 条目自带 ID 时直接返回；否则读取父目录列表，接入会话缓存后与其他列表请求共享同一次拉取。
pub struct ListingIdProvider {
    lister: Arc<dyn ListService>,
    cache: RwLock<Option<Arc<ListingCache>>>,
}

impl ListingIdProvider {
    pub fn new(lister: Arc<dyn ListService>) -> Self {
        Self {
            lister,
            cache: RwLock::new(None),
        }
    }

    async fn parent_listing(&self, parent: &Path) -> Result<Arc<AttributedList>> {
        let cache = self.cache.read().clone();
        match cache {
            Some(cache) => {
                let reference = cache.reference(parent);
                cache
                    .get_or_fetch(&reference, || self.lister.list(parent))
                    .await
            }
            None => self.lister.list(parent).await.map(Arc::new),
        }
    }
}

#[async_trait]
impl IdProvider for ListingIdProvider {
    async fn file_id(&self, file: &Path) -> Result<String> {
        if let Some(id) = &file.attributes().file_id {
            return Ok(id.clone());
        }
        let parent = file
            .parent()
            .ok_or_else(|| TransferError::not_found("File not found").with_file(file))?;
        let listing = self.parent_listing(parent).await?;
        let found = listing
            .find_by_name(file.name())
            .and_then(|p| p.attributes().file_id.clone());
        debug!("解析文件 ID {}: {:?}", file, found);
        found.ok_or_else(|| TransferError::not_found("File not found").with_file(file))
    }

    fn with_cache(&self, cache: Arc<ListingCache>) {
        *self.cache.write() = Some(cache);
    }
}
