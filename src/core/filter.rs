//! 传输过滤
//!
//! 对每个待传输文件决定接受或跳过，并为接受的文件准备初始 `TransferStatus`。
//! 冲突处理方式由 `TransferAction` 选择，上传与下载共用同一套规则，只是源与目标对调。

use super::comparator::{FileComparator, Snapshot};
use super::conflict::{find_alternate, find_displaced, ConflictSide};
use super::symlink::{SymlinkDecision, SymlinkResolver};
use crate::error::{ErrorKind, Result, TransferError};
use crate::model::{Local, Path, TransferStatus};
use crate::storage::{DirectoryFeature, ListFeature, Session, TouchFeature};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 默认并发判定数
pub const DEFAULT_CONCURRENCY: usize = 8;

/// 目标已存在时的处理方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferAction {
    /// 跳过已存在的文件
    #[default]
    Skip,
    /// 覆盖
    Overwrite,
    /// 断点续传
    Resume,
    /// 以新名称写入
    Rename,
    /// 先挪走已有文件，再以原名写入
    RenameExisting,
    /// 内容相同则跳过，否则覆盖
    Compare,
}

impl std::fmt::Display for TransferAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferAction::Skip => write!(f, "skip"),
            TransferAction::Overwrite => write!(f, "overwrite"),
            TransferAction::Resume => write!(f, "resume"),
            TransferAction::Rename => write!(f, "rename"),
            TransferAction::RenameExisting => write!(f, "rename_existing"),
            TransferAction::Compare => write!(f, "compare"),
        }
    }
}

impl From<&str> for TransferAction {
    fn from(s: &str) -> Self {
        match s {
            "overwrite" => TransferAction::Overwrite,
            "resume" => TransferAction::Resume,
            "rename" => TransferAction::Rename,
            "rename_existing" => TransferAction::RenameExisting,
            "compare" => TransferAction::Compare,
            _ => TransferAction::Skip,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferDirection {
    Download,
    Upload,
}

/// 单个文件的判定状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterState {
    Pending,
    Accepted,
    Skipped,
    Failed,
}

/// 批量判定中出错时的处理方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchMode {
    /// 单个文件失败不影响其他文件
    #[default]
    Continue,
    /// 任一文件失败即停止
    AllOrNothing,
}

/// 一对远程与本地文件
#[derive(Debug, Clone, PartialEq)]
pub struct TransferItem {
    pub remote: Path,
    pub local: Local,
}

impl TransferItem {
    pub fn new(remote: Path, local: Local) -> Self {
        Self { remote, local }
    }
}

pub struct TransferFilter {
    session: Arc<Session>,
    action: TransferAction,
    direction: TransferDirection,
    symlinks: SymlinkResolver,
    comparator: FileComparator,
}

impl TransferFilter {
    pub fn new(session: Arc<Session>, direction: TransferDirection, action: TransferAction) -> Self {
        Self {
            session,
            action,
            direction,
            symlinks: SymlinkResolver::default(),
            comparator: FileComparator::default(),
        }
    }

    pub fn with_symlinks(mut self, symlinks: SymlinkResolver) -> Self {
        self.symlinks = symlinks;
        self
    }

    pub fn with_comparator(mut self, comparator: FileComparator) -> Self {
        self.comparator = comparator;
        self
    }

    pub fn action(&self) -> TransferAction {
        self.action
    }

    pub fn direction(&self) -> TransferDirection {
        self.direction
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// 远程条目内容的实际位置：跟随的链接返回最终目标，以链接保留或跳过时返回 `None`
    pub async fn source(&self, file: &Path) -> Result<Option<Path>> {
        Ok(match self.symlinks.resolve(&self.session, file).await? {
            SymlinkDecision::NotALink => Some(file.clone()),
            SymlinkDecision::Follow(target) => Some(target),
            SymlinkDecision::Preserve { .. } | SymlinkDecision::Skip => None,
        })
    }

    /// 本地条目内容的实际位置，规则同 `source`
    pub fn local_source(&self, local: &Local) -> Result<Option<Local>> {
        Ok(match self.symlinks.resolve_local(local)? {
            SymlinkDecision::NotALink => Some(local.clone()),
            SymlinkDecision::Follow(target) => Some(target),
            SymlinkDecision::Preserve { .. } | SymlinkDecision::Skip => None,
        })
    }

    /// 是否传输该文件，`parent` 为父目录已准备好的状态
    pub async fn accept(&self, file: &Path, local: &Local, parent: &TransferStatus) -> Result<bool> {
        match self.direction {
            TransferDirection::Download => self.accept_download(file, local).await,
            TransferDirection::Upload => self.accept_upload(file, local, parent).await,
        }
    }

    /// 只对已接受的文件调用
    pub async fn prepare(
        &self,
        file: &Path,
        local: &Local,
        parent: &TransferStatus,
    ) -> Result<TransferStatus> {
        match self.direction {
            TransferDirection::Download => self.prepare_download(file, local).await,
            TransferDirection::Upload => self.prepare_upload(file, local, parent).await,
        }
    }

    async fn accept_download(&self, file: &Path, local: &Local) -> Result<bool> {
        // 本地已有同名文件时直接跳过，不访问后端
        if self.action == TransferAction::Skip && local.is_file() {
            info!("跳过已存在文件: {}", file);
            return Ok(false);
        }
        let source = match self.symlinks.resolve(&self.session, file).await? {
            SymlinkDecision::Skip => {
                debug!("跳过符号链接: {}", file);
                return Ok(false);
            }
            SymlinkDecision::Preserve { .. } => return Ok(true),
            SymlinkDecision::Follow(target) => target,
            SymlinkDecision::NotALink => file.clone(),
        };
        if source.is_directory() {
            self.session.require::<ListFeature>(file)?;
            return Ok(true);
        }
        if !local.is_file() {
            return Ok(true);
        }
        match self.action {
            TransferAction::Resume => {
                if local.size() >= source.size() {
                    info!(
                        "本地文件已完整，跳过续传: {} (local={}, remote={})",
                        file,
                        local.size(),
                        source.size()
                    );
                    return Ok(false);
                }
                Ok(true)
            }
            TransferAction::Compare => {
                let remote = Snapshot::from_path(&source);
                let with_checksum = remote.checksum.is_some() && self.comparator.config().use_checksum;
                let existing = Snapshot::from_local(local, with_checksum);
                let relation = self.comparator.compare(&remote, &existing);
                if relation.is_equal() {
                    info!("文件未变化，跳过: {}", file);
                    return Ok(false);
                }
                Ok(true)
            }
            _ => Ok(true),
        }
    }

    async fn accept_upload(&self, file: &Path, local: &Local, parent: &TransferStatus) -> Result<bool> {
        let remote_parent = file
            .parent()
            .ok_or_else(|| self.session.registry().unsupported(file))?;
        let source = match self.symlinks.resolve_local(local)? {
            SymlinkDecision::Skip => {
                debug!("跳过符号链接: {}", local);
                return Ok(false);
            }
            SymlinkDecision::Preserve { .. } => return Ok(true),
            SymlinkDecision::Follow(target) => target,
            SymlinkDecision::NotALink => local.clone(),
        };
        if source.is_directory() {
            self.session.require::<DirectoryFeature>(file)?;
            return Ok(true);
        }
        let touch = self.session.require::<TouchFeature>(file)?;
        if !touch.is_supported(remote_parent, file.name()) {
            warn!("目标目录不支持创建文件: {}", file);
            return Err(self.session.registry().unsupported(file));
        }
        let Some(existing) = self.remote_entry(file, parent).await? else {
            return Ok(true);
        };
        match self.action {
            TransferAction::Skip => {
                info!("跳过已存在文件: {}", file);
                Ok(false)
            }
            TransferAction::Resume => {
                if existing.size() >= source.size() {
                    info!(
                        "远程文件已完整，跳过续传: {} (remote={}, local={})",
                        file,
                        existing.size(),
                        source.size()
                    );
                    return Ok(false);
                }
                Ok(true)
            }
            TransferAction::Compare => {
                let remote = Snapshot::from_path(&existing);
                let with_checksum = remote.checksum.is_some() && self.comparator.config().use_checksum;
                let relation = self
                    .comparator
                    .compare(&Snapshot::from_local(&source, with_checksum), &remote);
                if relation.is_equal() {
                    info!("文件未变化，跳过: {}", file);
                    return Ok(false);
                }
                Ok(true)
            }
            _ => Ok(true),
        }
    }

    /// 远程目标是否已存在，父目录不存在时无需查询
    async fn remote_entry(&self, file: &Path, parent: &TransferStatus) -> Result<Option<Path>> {
        if !parent.exists {
            return Ok(None);
        }
        let Some(directory) = file.parent() else {
            return Ok(None);
        };
        let listing = match self.session.list(directory).await {
            Ok(listing) => listing,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(listing.find_by_name(file.name()).cloned())
    }

    async fn prepare_download(&self, file: &Path, local: &Local) -> Result<TransferStatus> {
        let mut source = file.clone();
        let mut status = TransferStatus::new();
        match self.symlinks.resolve(&self.session, file).await? {
            SymlinkDecision::Preserve { target } => {
                status.symlink = Some(target);
                status.exists = local.exists();
                return Ok(status);
            }
            SymlinkDecision::Follow(target) => source = target,
            SymlinkDecision::NotALink | SymlinkDecision::Skip => {}
        }
        let attributes = source.attributes();
        status.modified_time = attributes.modified_time;
        status.permission = attributes.permission;
        status.checksum = attributes.checksum.clone();

        if source.is_directory() {
            status.exists = local.is_directory();
            return Ok(status);
        }
        status.length = source.size();
        status.exists = local.exists();
        if !status.exists {
            return Ok(status);
        }

        match self.action {
            TransferAction::Resume if local.is_file() && local.size() < source.size() => {
                debug!("续传 {}，偏移 {}", file, local.size());
                status = status.resume_from(local.size());
            }
            TransferAction::Rename => {
                let name = find_alternate(&local.name(), |n| local.with_name(n).exists());
                debug!("下载改名: {} -> {}", local, name);
                status.rename.local = Some(local.with_name(&name));
                status.exists = false;
            }
            TransferAction::RenameExisting => {
                let name = find_displaced(
                    &local.name(),
                    ConflictSide::Local,
                    chrono::Utc::now().timestamp(),
                    |n| local.with_name(n).exists(),
                );
                debug!("挪走本地已有文件: {} -> {}", local, name);
                status.displace.local = Some(local.with_name(&name));
                status.exists = false;
            }
            _ => {}
        }
        Ok(status)
    }

    async fn prepare_upload(
        &self,
        file: &Path,
        local: &Local,
        parent: &TransferStatus,
    ) -> Result<TransferStatus> {
        let mut source = local.clone();
        let mut status = TransferStatus::new();
        let existing = self.remote_entry(file, parent).await?;
        status.exists = existing.is_some();
        match self.symlinks.resolve_local(local)? {
            SymlinkDecision::Preserve { target } => {
                status.symlink = Some(target);
                return Ok(status);
            }
            SymlinkDecision::Follow(target) => source = target,
            SymlinkDecision::NotALink | SymlinkDecision::Skip => {}
        }
        status.modified_time = source.modified_time();
        status.permission = source.permission();
        if source.is_directory() {
            return Ok(status);
        }

        let directory = file
            .parent()
            .ok_or_else(|| self.session.registry().unsupported(file))?;
        self.session
            .require::<TouchFeature>(file)?
            .preflight(directory, file.name())
            .await
            .map_err(|e| match e.file() {
                Some(_) => e,
                None => e.with_file(file),
            })?;

        status.length = source.size();
        let Some(existing) = existing else {
            return Ok(status);
        };

        match self.action {
            TransferAction::Resume if existing.size() < source.size() => {
                debug!("续传 {}，偏移 {}", file, existing.size());
                status = status.resume_from(existing.size());
            }
            TransferAction::Rename => {
                let listing = self.session.list(directory).await?;
                let name = find_alternate(file.name(), |n| listing.find_by_name(n).is_some());
                debug!("上传改名: {} -> {}", file, name);
                status.rename.remote = Some(Path::child(directory, &name, file.kind()));
                status.exists = false;
            }
            TransferAction::RenameExisting => {
                let listing = self.session.list(directory).await?;
                let name = find_displaced(
                    file.name(),
                    ConflictSide::Remote,
                    chrono::Utc::now().timestamp(),
                    |n| listing.find_by_name(n).is_some(),
                );
                debug!("挪走远程已有文件: {} -> {}", file, name);
                status.displace.remote = Some(Path::child(directory, &name, existing.kind()));
                status.exists = false;
            }
            _ => {}
        }
        Ok(status)
    }
}

/// 单个文件的判定结果
#[derive(Debug, Clone)]
pub struct FilterOutcome {
    pub item: TransferItem,
    pub state: FilterState,
    pub status: Option<TransferStatus>,
    pub error: Option<TransferError>,
}

impl FilterOutcome {
    fn new(item: TransferItem, state: FilterState) -> Self {
        Self {
            item,
            state,
            status: None,
            error: None,
        }
    }
}

/// 并发判定一批文件，结果顺序与输入一致
pub struct FilterPipeline {
    filter: Arc<TransferFilter>,
    concurrency: usize,
}

impl FilterPipeline {
    pub fn new(filter: Arc<TransferFilter>) -> Self {
        Self {
            filter,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn filter(&self) -> &Arc<TransferFilter> {
        &self.filter
    }

    pub async fn evaluate(
        &self,
        items: Vec<TransferItem>,
        parent: &TransferStatus,
        mode: BatchMode,
    ) -> Vec<FilterOutcome> {
        let aborted = AtomicBool::new(false);
        let aborted = &aborted;
        stream::iter(items)
            .map(|item| async move {
                if aborted.load(Ordering::SeqCst) {
                    return FilterOutcome::new(item, FilterState::Pending);
                }
                let outcome = self.evaluate_one(item, parent).await;
                if let Some(e) = &outcome.error {
                    if e.is_fatal() || mode == BatchMode::AllOrNothing {
                        warn!("判定中止: {}", e);
                        aborted.store(true, Ordering::SeqCst);
                    }
                }
                outcome
            })
            .buffered(self.concurrency)
            .collect()
            .await
    }

    async fn evaluate_one(&self, item: TransferItem, parent: &TransferStatus) -> FilterOutcome {
        let decided = match self.filter.accept(&item.remote, &item.local, parent).await {
            Ok(true) => self
                .filter
                .prepare(&item.remote, &item.local, parent)
                .await
                .map(Some),
            Ok(false) => Ok(None),
            Err(e) => Err(e),
        };
        match decided {
            Ok(Some(status)) => FilterOutcome {
                status: Some(status),
                ..FilterOutcome::new(item, FilterState::Accepted)
            },
            Ok(None) => FilterOutcome::new(item, FilterState::Skipped),
            Err(e) => {
                let e = match e.file() {
                    Some(_) => e,
                    None => e.with_file(&item.remote),
                };
                warn!("判定失败 {}: {}", item.remote, e);
                FilterOutcome {
                    error: Some(e),
                    ..FilterOutcome::new(item, FilterState::Failed)
                }
            }
        }
    }
}
