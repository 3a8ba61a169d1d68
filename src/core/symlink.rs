//! 符号链接处理
//!
//! 沿链接链逐跳解析目标：优先使用条目自带的目标，其次查父目录列表（经会话缓存）。
//! 重复访问同一地址或超过最大层级时以 `CyclicLink` 失败。

use crate::error::{Result, TransferError};
use crate::model::{Local, Path};
use crate::storage::Session;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{debug, warn};

/// 默认最大链接层级
pub const DEFAULT_MAX_DEPTH: usize = 32;

/// 符号链接策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymlinkPolicy {
    /// 传输链接指向的内容
    Follow,
    /// 目标仍在传输范围内时保留为链接
    #[default]
    Preserve,
    /// 忽略链接
    Skip,
}

impl std::fmt::Display for SymlinkPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SymlinkPolicy::Follow => write!(f, "follow"),
            SymlinkPolicy::Preserve => write!(f, "preserve"),
            SymlinkPolicy::Skip => write!(f, "skip"),
        }
    }
}

impl From<&str> for SymlinkPolicy {
    fn from(s: &str) -> Self {
        match s {
            "follow" => SymlinkPolicy::Follow,
            "skip" => SymlinkPolicy::Skip,
            _ => SymlinkPolicy::Preserve,
        }
    }
}

/// 解析结果，`T` 为远程 `Path` 或本地 `Local`
#[derive(Debug, Clone, PartialEq)]
pub enum SymlinkDecision<T = Path> {
    NotALink,
    /// 按最终目标的内容传输
    Follow(T),
    /// 以链接形式还原，`target` 为相对链接所在目录的链接内容
    Preserve { target: String },
    Skip,
}

impl<T> SymlinkDecision<T> {
    pub fn is_skip(&self) -> bool {
        matches!(self, SymlinkDecision::Skip)
    }
}

#[derive(Debug, Clone)]
pub struct SymlinkResolver {
    policy: SymlinkPolicy,
    roots: Vec<Path>,
    local_roots: Vec<Local>,
    max_depth: usize,
}

impl Default for SymlinkResolver {
    fn default() -> Self {
        Self::new(SymlinkPolicy::default())
    }
}

impl SymlinkResolver {
    pub fn new(policy: SymlinkPolicy) -> Self {
        Self {
            policy,
            roots: Vec::new(),
            local_roots: Vec::new(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// 传输的远程根目录
    pub fn with_roots(mut self, roots: Vec<Path>) -> Self {
        self.roots = roots;
        self
    }

    /// 传输的本地根目录
    pub fn with_local_roots(mut self, roots: Vec<Local>) -> Self {
        self.local_roots = roots;
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth.max(1);
        self
    }

    pub fn policy(&self) -> SymlinkPolicy {
        self.policy
    }

    pub async fn resolve(&self, session: &Session, file: &Path) -> Result<SymlinkDecision> {
        if !file.is_symlink() {
            return Ok(SymlinkDecision::NotALink);
        }
        if self.policy == SymlinkPolicy::Skip {
            return Ok(SymlinkDecision::Skip);
        }
        let chain = self.chain(session, file).await?;
        let (Some(first), Some(last)) = (chain.first(), chain.last()) else {
            return Ok(SymlinkDecision::NotALink);
        };
        if self.policy == SymlinkPolicy::Preserve && self.within_roots(last) {
            let base = file.parent().map(|p| p.absolute()).unwrap_or("/");
            return Ok(SymlinkDecision::Preserve {
                target: relativize(base, first.absolute()),
            });
        }
        debug!("跟随符号链接 {} -> {}", file, last);
        Ok(SymlinkDecision::Follow(last.clone()))
    }

    /// 链接链的最终目标
    pub async fn final_target(&self, session: &Session, file: &Path) -> Result<Path> {
        let chain = self.chain(session, file).await?;
        Ok(chain.last().cloned().unwrap_or_else(|| file.clone()))
    }

    /// 依次返回每一跳的目标，最后一项不再是链接
    async fn chain(&self, session: &Session, file: &Path) -> Result<Vec<Path>> {
        let mut visited = HashSet::new();
        let mut hops = Vec::new();
        let mut current = file.clone();
        while current.is_symlink() {
            if !visited.insert(current.absolute().to_string()) || visited.len() > self.max_depth {
                warn!("检测到循环符号链接: {}", file);
                return Err(self.cyclic(session, file));
            }
            let target = self.target_of(session, &current).await?;
            current = self.refresh(session, target).await?;
            hops.push(current.clone());
        }
        Ok(hops)
    }

    /// 链接的直接目标
    async fn target_of(&self, session: &Session, link: &Path) -> Result<Path> {
        if let Some(target) = link.symlink_target() {
            return Ok(target.clone());
        }
        let missing = || {
            TransferError::not_found(session.messages().localize("File not found")).with_file(link)
        };
        let parent = link.parent().ok_or_else(missing)?;
        let listing = match session.cached(parent) {
            Some(listing) => listing,
            None => session.list(parent).await?,
        };
        listing
            .find_by_name(link.name())
            .and_then(|entry| entry.symlink_target().cloned())
            .ok_or_else(missing)
    }

    /// 用父目录列表中的条目替换目标，以得知目标本身是否也是链接
    async fn refresh(&self, session: &Session, target: Path) -> Result<Path> {
        let Some(parent) = target.parent() else {
            return Ok(target);
        };
        let listing = match session.cached(parent) {
            Some(listing) => listing,
            None => match session.list(parent).await {
                Ok(listing) => listing,
                Err(e) => {
                    debug!("无法读取链接目标所在目录 {}: {}", parent, e);
                    return Ok(target);
                }
            },
        };
        Ok(listing.find_by_name(target.name()).cloned().unwrap_or(target))
    }

    fn within_roots(&self, target: &Path) -> bool {
        self.roots
            .iter()
            .any(|root| target == root || target.is_child_of(root))
    }

    fn cyclic(&self, session: &Session, file: &Path) -> TransferError {
        TransferError::cyclic_link(
            session
                .messages()
                .format("Too many levels of symbolic links {0}", &[file.name()]),
        )
        .with_file(file)
    }

    /// 上传方向：解析本地链接
    pub fn resolve_local(&self, local: &Local) -> Result<SymlinkDecision<Local>> {
        if !local.is_symlink() {
            return Ok(SymlinkDecision::NotALink);
        }
        if self.policy == SymlinkPolicy::Skip {
            return Ok(SymlinkDecision::Skip);
        }
        let mut visited: HashSet<PathBuf> = HashSet::new();
        let mut current = local.clone();
        let mut first = None;
        while current.is_symlink() {
            if !visited.insert(current.path().to_path_buf()) || visited.len() > self.max_depth {
                warn!("检测到循环符号链接: {}", local);
                return Err(TransferError::cyclic_link(format!(
                    "Too many levels of symbolic links {}",
                    local.name()
                )));
            }
            let Some(target) = current.symlink_target() else {
                break;
            };
            first.get_or_insert_with(|| target.clone());
            current = target;
        }
        let inside = self
            .local_roots
            .iter()
            .any(|root| current.path().starts_with(root.path()));
        match (self.policy, first) {
            (SymlinkPolicy::Preserve, Some(first)) if inside => {
                let base = local
                    .parent()
                    .map(|p| p.path().to_string_lossy().replace('\\', "/"))
                    .unwrap_or_default();
                let target = first.path().to_string_lossy().replace('\\', "/");
                Ok(SymlinkDecision::Preserve {
                    target: relativize(&base, &target),
                })
            }
            _ => Ok(SymlinkDecision::Follow(current)),
        }
    }
}

/// `target` 相对于目录 `base` 的路径
///
/// `relativize("/a/b", "/a/c/d") == "../c/d"`
pub fn relativize(base: &str, target: &str) -> String {
    let base: Vec<&str> = base.split('/').filter(|s| !s.is_empty()).collect();
    let target: Vec<&str> = target.split('/').filter(|s| !s.is_empty()).collect();
    let common = base
        .iter()
        .zip(target.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let mut parts: Vec<&str> = vec![".."; base.len() - common];
    parts.extend(&target[common..]);
    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}
