//! 传输计划
//!
//! 从根目录开始逐层遍历（下载方向列出远程目录，上传方向读取本地目录），每层交给过滤管线判定，
//! 只进入被接受的目录。每次 I/O 之间检查取消令牌，进度以 `PlanEvent` 发送到 mpsc 通道。

use super::filter::{
    BatchMode, FilterPipeline, FilterState, TransferDirection, TransferFilter, TransferItem,
    DEFAULT_CONCURRENCY,
};
use crate::error::{Result, TransferError};
use crate::model::{Local, Path, PathType, TransferStatus};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 计划配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanConfig {
    /// 同一层并发判定的文件数
    pub concurrency: usize,
    pub batch_mode: BatchMode,
    /// 排除规则（glob patterns）
    pub exclude_patterns: Vec<String>,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            batch_mode: BatchMode::Continue,
            exclude_patterns: vec![
                // 常见的排除模式
                ".DS_Store".to_string(),
                "Thumbs.db".to_string(),
                "*.tmp".to_string(),
                "*.temp".to_string(),
            ],
        }
    }
}

/// 排除规则
#[derive(Debug, Clone, Default)]
pub struct ExcludeRules {
    patterns: Vec<String>,
}

impl ExcludeRules {
    pub fn new(patterns: Vec<String>) -> Self {
        Self { patterns }
    }

    /// `path` 为相对路径，`name` 为文件名，任一匹配即排除
    pub fn is_excluded(&self, path: &str, name: &str) -> bool {
        self.patterns
            .iter()
            .any(|pattern| matches_pattern(path, pattern) || matches_pattern(name, pattern))
    }
}

/// 简单的 glob 模式匹配
fn matches_pattern(path: &str, pattern: &str) -> bool {
    let path = path.to_lowercase();
    let pattern = pattern.to_lowercase();

    // 处理 ** 通配符
    if pattern.contains("**") {
        let parts: Vec<&str> = pattern.split("**").collect();
        if parts.len() == 2 {
            let prefix = parts[0].trim_end_matches('/');
            let suffix = parts[1].trim_start_matches('/');
            if !prefix.is_empty() && !path.starts_with(prefix) {
                return false;
            }
            if !suffix.is_empty() && !path.ends_with(suffix) {
                return false;
            }
            return true;
        }
    }

    // 处理 * 通配符
    if pattern.contains('*') {
        let regex_pattern = regex::escape(&pattern).replace("\\*", ".*");
        if let Ok(re) = regex::Regex::new(&format!("^{}$", regex_pattern)) {
            return re.is_match(&path);
        }
    }

    // 精确匹配
    path == pattern || path.ends_with(&format!("/{}", pattern))
}

/// 计划进度
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlanEvent {
    Started { roots: usize },
    Listed { directory: String, count: usize },
    Accepted { file: String, length: u64 },
    Skipped { file: String },
    Failed { file: String, error: String },
    Cancelled,
    Finished { summary: PlanSummary },
}

/// 已接受的文件及其初始状态
#[derive(Debug, Clone)]
pub struct PlannedTransfer {
    pub item: TransferItem,
    pub status: TransferStatus,
    /// 条目本身或其跟随的链接目标是目录
    pub directory: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlanSummary {
    pub accepted_count: usize,
    pub accepted_bytes: u64,
    pub directory_count: usize,
    pub skipped_count: usize,
    pub failed_count: usize,
    pub pending_count: usize,
}

impl PlanSummary {
    pub fn total_files(&self) -> usize {
        self.accepted_count + self.skipped_count + self.failed_count + self.pending_count
    }

    pub fn total_transfer_bytes(&self) -> u64 {
        self.accepted_bytes
    }
}

#[derive(Debug, Clone, Default)]
pub struct TransferPlan {
    pub accepted: Vec<PlannedTransfer>,
    pub skipped: Vec<TransferItem>,
    pub failed: Vec<(TransferItem, TransferError)>,
    /// 因取消或中止而未判定的文件
    pub pending: Vec<TransferItem>,
    pub cancelled: bool,
    pub aborted: bool,
}

impl TransferPlan {
    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for planned in &self.accepted {
            if planned.directory {
                summary.directory_count += 1;
            } else {
                summary.accepted_count += 1;
                summary.accepted_bytes += planned.status.length;
            }
        }
        summary.skipped_count = self.skipped.len();
        summary.failed_count = self.failed.len();
        summary.pending_count = self.pending.len();
        summary
    }

    pub fn is_complete(&self) -> bool {
        !self.cancelled && !self.aborted && self.failed.is_empty()
    }
}

/// 条目内容的实际位置
enum Source {
    Remote(Path),
    Local(Local),
}

impl Source {
    fn is_directory(&self) -> bool {
        match self {
            Source::Remote(path) => path.is_directory(),
            Source::Local(local) => local.is_directory(),
        }
    }

    fn key(&self) -> String {
        match self {
            Source::Remote(path) => path.absolute().to_string(),
            Source::Local(local) => local.path().to_string_lossy().into_owned(),
        }
    }
}

/// 待判定的一层
struct Level {
    items: Vec<TransferItem>,
    parent: TransferStatus,
}

pub struct TransferPlanner {
    filter: Arc<TransferFilter>,
    config: PlanConfig,
    excludes: ExcludeRules,
    events: Option<mpsc::Sender<PlanEvent>>,
    token: CancellationToken,
}

impl TransferPlanner {
    pub fn new(filter: Arc<TransferFilter>) -> Self {
        Self::with_config(filter, PlanConfig::default())
    }

    pub fn with_config(filter: Arc<TransferFilter>, config: PlanConfig) -> Self {
        Self {
            excludes: ExcludeRules::new(config.exclude_patterns.clone()),
            filter,
            config,
            events: None,
            token: CancellationToken::new(),
        }
    }

    pub fn with_events(mut self, events: mpsc::Sender<PlanEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// 使用外部取消令牌（如 `WorkerPool::token`）
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// 取消计划
    pub fn cancel(&self) {
        self.token.cancel();
    }

    fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// 发送进度更新
    async fn send(&self, event: PlanEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event).await;
        }
    }

    /// 生成传输计划，单个文件的失败记录在计划中，不会中断整个计划
    pub async fn plan(&self, roots: Vec<TransferItem>) -> TransferPlan {
        info!("开始生成传输计划: {} 个根条目", roots.len());
        self.send(PlanEvent::Started { roots: roots.len() }).await;

        let pipeline = FilterPipeline::new(self.filter.clone()).with_concurrency(self.config.concurrency);
        let mut plan = TransferPlan::default();
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(Level {
            items: roots,
            parent: TransferStatus::new().with_exists(true),
        });

        while let Some(level) = queue.pop_front() {
            if plan.aborted || self.is_cancelled() {
                plan.cancelled |= self.is_cancelled();
                plan.pending.extend(level.items);
                continue;
            }

            let mut candidates = Vec::with_capacity(level.items.len());
            for item in level.items {
                let relative = item.remote.absolute().trim_start_matches('/');
                if self.excludes.is_excluded(relative, item.remote.name()) {
                    debug!("排除文件: {}", item.remote);
                    self.send(PlanEvent::Skipped {
                        file: item.remote.absolute().to_string(),
                    })
                    .await;
                    plan.skipped.push(item);
                } else {
                    candidates.push(item);
                }
            }

            let evaluated = tokio::select! {
                biased;
                _ = self.token.cancelled() => None,
                outcomes = pipeline.evaluate(candidates.clone(), &level.parent, self.config.batch_mode) => Some(outcomes),
            };
            let Some(outcomes) = evaluated else {
                plan.cancelled = true;
                plan.pending.extend(candidates);
                continue;
            };

            for outcome in outcomes {
                let file = outcome.item.remote.absolute().to_string();
                match outcome.state {
                    FilterState::Accepted => {
                        let status = outcome.status.unwrap_or_default();
                        self.send(PlanEvent::Accepted {
                            file,
                            length: status.length,
                        })
                        .await;
                        let mut directory = false;
                        let listed = match self.source_of(&outcome.item, &status).await {
                            Ok(Some(source)) if source.is_directory() => {
                                directory = true;
                                if visited.insert(source.key()) {
                                    self.children(&outcome.item, &source).await
                                } else {
                                    debug!("目录已访问，不再进入: {}", outcome.item.remote);
                                    Ok(Some(Vec::new()))
                                }
                            }
                            Ok(_) => Ok(Some(Vec::new())),
                            Err(e) => Err(e),
                        };
                        match listed {
                            Ok(Some(items)) if items.is_empty() => {}
                            Ok(Some(items)) => queue.push_back(Level {
                                items,
                                parent: status.clone(),
                            }),
                            Ok(None) => plan.cancelled = true,
                            Err(e) => {
                                warn!("列出目录失败 {}: {}", outcome.item.remote, e);
                                self.send(PlanEvent::Failed {
                                    file: outcome.item.remote.absolute().to_string(),
                                    error: e.to_string(),
                                })
                                .await;
                                if e.is_fatal() || self.config.batch_mode == BatchMode::AllOrNothing {
                                    plan.aborted = true;
                                }
                                plan.failed.push((outcome.item.clone(), e));
                            }
                        }
                        plan.accepted.push(PlannedTransfer {
                            item: outcome.item,
                            status,
                            directory,
                        });
                    }
                    FilterState::Skipped => {
                        self.send(PlanEvent::Skipped { file }).await;
                        plan.skipped.push(outcome.item);
                    }
                    FilterState::Failed => {
                        let error = outcome
                            .error
                            .unwrap_or_else(|| TransferError::fatal("Connection failed"));
                        self.send(PlanEvent::Failed {
                            file,
                            error: error.to_string(),
                        })
                        .await;
                        if error.is_fatal() || self.config.batch_mode == BatchMode::AllOrNothing {
                            plan.aborted = true;
                        }
                        plan.failed.push((outcome.item, error));
                    }
                    FilterState::Pending => {
                        plan.aborted = true;
                        plan.pending.push(outcome.item);
                    }
                }
            }
        }

        if plan.cancelled {
            info!("传输计划已取消");
            self.send(PlanEvent::Cancelled).await;
        }
        let summary = plan.summary();
        info!(
            "传输计划完成: {} 个文件 ({} 字节), {} 个目录, {} 个跳过, {} 个失败, {} 个未处理",
            summary.accepted_count,
            summary.accepted_bytes,
            summary.directory_count,
            summary.skipped_count,
            summary.failed_count,
            summary.pending_count
        );
        self.send(PlanEvent::Finished { summary }).await;
        plan
    }

    /// 以链接形式保留的条目没有可进入的来源
    async fn source_of(&self, item: &TransferItem, status: &TransferStatus) -> Result<Option<Source>> {
        if status.symlink.is_some() {
            return Ok(None);
        }
        Ok(match self.filter.direction() {
            TransferDirection::Download => self.filter.source(&item.remote).await?.map(Source::Remote),
            TransferDirection::Upload => self.filter.local_source(&item.local)?.map(Source::Local),
        })
    }

    /// 列出 `source` 的内容，子条目挂到 `item` 的本地路径下；取消时返回 `None`
    async fn children(&self, item: &TransferItem, source: &Source) -> Result<Option<Vec<TransferItem>>> {
        let listed = match source {
            Source::Remote(directory) => {
                let session = self.filter.session();
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => return Ok(None),
                    listing = session.list(directory) => {
                        listing?
                            .iter()
                            .map(|child| TransferItem::new(child.clone(), item.local.join(child.name())))
                            .collect::<Vec<_>>()
                    }
                }
            }
            Source::Local(directory) => {
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => return Ok(None),
                    entries = read_local(directory) => {
                        entries
                            .map_err(|e| TransferError::from(e).with_file(&item.remote))?
                            .into_iter()
                            .map(|(name, kind, local)| {
                                TransferItem::new(Path::child(&item.remote, &name, kind), local)
                            })
                            .collect::<Vec<_>>()
                    }
                }
            }
        };
        self.send(PlanEvent::Listed {
            directory: item.remote.absolute().to_string(),
            count: listed.len(),
        })
        .await;
        Ok(Some(listed))
    }
}

/// 读取本地目录，按名称排序
async fn read_local(directory: &Local) -> std::io::Result<Vec<(String, PathType, Local)>> {
    let mut entries = tokio::fs::read_dir(directory.path()).await?;
    let mut items = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let file_type = entry.file_type().await?;
        let kind = if file_type.is_symlink() {
            PathType::Symlink
        } else if file_type.is_dir() {
            PathType::Directory
        } else {
            PathType::File
        };
        let name = entry.file_name().to_string_lossy().into_owned();
        items.push((name, kind, Local::new(entry.path())));
    }
    items.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(items)
}
