//! 单个文件的传输状态 - 仅存在于一次传输会话内，不做持久化

use super::local::Local;
use super::path::{Path, Permission};
use crate::error::TransferError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 校验算法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Blake3,
    Md5,
    Sha1,
    Sha256,
    /// 后端自定义的内容标识（如 ETag），只能与同类值比较
    Etag,
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HashAlgorithm::Blake3 => "blake3",
            HashAlgorithm::Md5 => "md5",
            HashAlgorithm::Sha1 => "sha1",
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Etag => "etag",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum {
    pub algorithm: HashAlgorithm,
    pub hash: String,
}

impl Checksum {
    pub fn new(algorithm: HashAlgorithm, hash: impl Into<String>) -> Self {
        Self {
            algorithm,
            hash: hash.into().to_ascii_lowercase(),
        }
    }

    /// 同算法下哈希一致
    pub fn matches(&self, other: &Checksum) -> bool {
        self.algorithm == other.algorithm && self.hash == other.hash
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hash)
    }
}

/// 冲突时的改名目标
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenameTarget {
    pub local: Option<Local>,
    pub remote: Option<Path>,
}

impl RenameTarget {
    pub fn is_empty(&self) -> bool {
        self.local.is_none() && self.remote.is_none()
    }
}

/// 传输状态
///
/// 由过滤管线在 `prepare` 中创建并填充偏移量与长度，执行器随后更新进度与完成标记。
#[derive(Debug, Clone, Default)]
pub struct TransferStatus {
    /// 需要传输的总长度
    pub length: u64,
    /// 续传起点
    pub offset: u64,
    /// 追加写入（续传）
    pub append: bool,
    /// 目标已存在
    pub exists: bool,
    /// 写入位置改名（Rename）
    pub rename: RenameTarget,
    /// 已有目标需要先挪走（RenameExisting）
    pub displace: RenameTarget,
    /// 期望的校验和
    pub checksum: Option<Checksum>,
    /// 以链接形式还原时的链接内容
    pub symlink: Option<String>,
    pub modified_time: Option<i64>,
    pub permission: Option<Permission>,
    pub transferred: u64,
    pub complete: bool,
    pub failure: Option<TransferError>,
}

impl TransferStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_length(mut self, length: u64) -> Self {
        self.length = length;
        self
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_exists(mut self, exists: bool) -> Self {
        self.exists = exists;
        self
    }

    /// 从 `offset` 处续传，剩余长度同步减少
    pub fn resume_from(mut self, offset: u64) -> Self {
        self.append = true;
        self.offset = offset;
        self.length = self.length.saturating_sub(offset);
        self
    }

    pub fn remaining(&self) -> u64 {
        self.length.saturating_sub(self.transferred)
    }

    pub fn progress(&self) -> f64 {
        if self.length == 0 {
            if self.complete {
                1.0
            } else {
                0.0
            }
        } else {
            (self.transferred as f64 / self.length as f64).min(1.0)
        }
    }

    pub fn record_progress(&mut self, bytes: u64) {
        self.transferred = self.transferred.saturating_add(bytes);
    }

    pub fn set_complete(&mut self) {
        self.complete = true;
        self.failure = None;
    }

    pub fn set_failure(&mut self, error: TransferError) {
        self.complete = false;
        self.failure = Some(error);
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }
}
