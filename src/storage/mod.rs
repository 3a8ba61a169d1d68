pub mod id;
pub mod list;
pub mod local;
pub mod registry;
pub mod session;
pub mod share;

#[cfg(test)]
pub(crate) mod testing;

use crate::core::cache::ListingCache;
use crate::error::{Result, TransferError};
use crate::model::{AttributedList, Path, TransferStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

pub use id::ListingIdProvider;
pub use list::{GroupChildrenOverride, MarkerOverride, NodeOverride, TieredListService};
pub use local::LocalStorage;
pub use registry::{
    Capability, CapabilityKind, CapabilityRegistry, CapabilityRegistryBuilder, DeleteFeature,
    DirectoryFeature, Feature, IdFeature, ListFeature, MetadataFeature, MoveFeature,
    ShareFeature, TouchFeature,
};
pub use session::Session;
pub use share::{DescriptiveUrl, NoPassword, PasswordCallback, PolicyShareProvider, ShareKind};

// ============ 公共常量 ============

/// 单次后端操作超时（秒）- list, stat, delete 等
pub const OP_TIMEOUT_SECS: u64 = 60;

// ============ 能力接口 ============

/// 目录列表
#[async_trait]
pub trait ListService: Send + Sync {
    /// 列出目录的直接子条目，失败时为 AccessDenied 或 NotFound
    async fn list(&self, directory: &Path) -> Result<AttributedList>;

    /// 让内部的辅助组件共享会话缓存
    fn with_cache(&self, _cache: Arc<ListingCache>) {}
}

/// 创建空文件
#[async_trait]
pub trait Touch: Send + Sync {
    /// 目标目录下能否创建文件，例如存储根目录通常不允许
    fn is_supported(&self, _workdir: &Path, _filename: &str) -> bool {
        true
    }

    /// 创建前校验文件名与目录权限，失败时为 InvalidName 或 AccessDenied
    async fn preflight(&self, _workdir: &Path, _filename: &str) -> Result<()> {
        Ok(())
    }

    async fn touch(&self, file: &Path, status: &TransferStatus) -> Result<Path>;
}

/// 创建目录
#[async_trait]
pub trait Directory: Send + Sync {
    async fn mkdir(&self, directory: &Path) -> Result<Path>;
}

/// 重命名 / 移动
#[async_trait]
pub trait Move: Send + Sync {
    fn is_supported(&self, _source: &Path, _target: &Path) -> bool {
        true
    }

    async fn rename(&self, source: &Path, target: &Path) -> Result<Path>;
}

/// 删除进度回调
pub trait DeleteCallback: Send + Sync {
    fn deleting(&self, file: &Path);
}

impl<F> DeleteCallback for F
where
    F: Fn(&Path) + Send + Sync,
{
    fn deleting(&self, file: &Path) {
        self(file)
    }
}

/// 逐个路径的删除结果
#[derive(Debug, Default)]
pub struct DeleteReport {
    pub deleted: Vec<Path>,
    pub failed: Vec<(Path, TransferError)>,
}

impl DeleteReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// 所有被处理过的路径，无论成功与否
    pub fn touched(&self) -> impl Iterator<Item = &Path> {
        self.deleted
            .iter()
            .chain(self.failed.iter().map(|(path, _)| path))
    }
}

/// 删除；单个路径失败不影响其余路径
#[async_trait]
pub trait Delete: Send + Sync {
    async fn delete(&self, files: &[Path], callback: &dyn DeleteCallback) -> DeleteReport;
}

/// 自定义元数据
#[async_trait]
pub trait Metadata: Send + Sync {
    async fn get(&self, file: &Path) -> Result<HashMap<String, String>>;

    /// 用 `metadata` 整体替换文件的元数据
    async fn set(&self, file: &Path, metadata: &HashMap<String, String>) -> Result<()>;
}

/// 文件 ID 解析
#[async_trait]
pub trait IdProvider: Send + Sync {
    async fn file_id(&self, file: &Path) -> Result<String>;

    fn with_cache(&self, cache: Arc<ListingCache>);
}

/// 共享链接
#[async_trait]
pub trait ShareProvider: Send + Sync {
    fn is_supported(&self, file: &Path, kind: ShareKind) -> bool;

    async fn to_download_url(
        &self,
        file: &Path,
        expiry: Option<DateTime<Utc>>,
        password: &dyn PasswordCallback,
    ) -> Result<DescriptiveUrl>;

    async fn to_upload_url(
        &self,
        file: &Path,
        expiry: Option<DateTime<Utc>>,
        password: &dyn PasswordCallback,
    ) -> Result<DescriptiveUrl>;
}
