pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod model;
pub mod storage;

pub use crate::config::AppConfig;
pub use crate::core::{
    ListingCache, MetadataReconciler, SymlinkResolver, TransferAction, TransferDirection,
    TransferFilter, TransferItem, TransferPlan, TransferPlanner, WorkerPool,
};
pub use crate::error::{ErrorKind, Result, TransferError};
pub use crate::model::{AttributedList, Local, Path, PathType, TransferStatus};
pub use crate::storage::{CapabilityKind, CapabilityRegistry, PolicyShareProvider, Session};

use crate::storage::ShareProvider;
use std::sync::Arc;

/// 按配置创建传输过滤器，`roots` 为本次传输的根条目
pub fn transfer_filter(
    session: Arc<Session>,
    config: &AppConfig,
    direction: TransferDirection,
    roots: &[TransferItem],
) -> TransferFilter {
    let symlinks = config
        .transfer
        .symlink_resolver()
        .with_roots(roots.iter().map(|r| r.remote.clone()).collect())
        .with_local_roots(roots.iter().map(|r| r.local.clone()).collect());
    TransferFilter::new(session, direction, config.transfer.action(direction)).with_symlinks(symlinks)
}

/// 按配置创建会话
pub fn open_session(host: impl Into<String>, registry: CapabilityRegistry, config: &AppConfig) -> Session {
    Session::new(host, registry, config.cache.size)
}

/// 按配置给共享提供者加上密码长度和根目录限制
pub fn share_policy<P: ShareProvider>(inner: P, config: &AppConfig) -> PolicyShareProvider<P> {
    PolicyShareProvider::new(inner)
        .with_min_password_length(config.share.min_password_length)
        .with_messages(config.messages())
}
