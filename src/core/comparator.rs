use crate::model::{Checksum, Local, Path};
use tracing::debug;

/// 文件比较结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileRelation {
    /// 文件相同
    Equal,
    /// 源文件更新
    SourceNewer,
    /// 目标文件更新
    DestNewer,
    /// 不同（大小或校验和不同）
    Different,
    /// 可能相同（大小相同，未比较时间）
    ProbablyEqual,
}

impl FileRelation {
    pub fn is_equal(&self) -> bool {
        matches!(self, FileRelation::Equal | FileRelation::ProbablyEqual)
    }
}

/// 比较配置
#[derive(Debug, Clone)]
pub struct CompareConfig {
    /// 时间容差（秒）
    pub time_tolerance_seconds: i64,
    /// 是否使用 checksum 比较
    pub use_checksum: bool,
    /// 是否忽略文件时间（仅比较大小和 checksum）
    pub ignore_mtime: bool,
    /// 大小相同时是否认为文件相同（适用于 WebDAV 等不保留 mtime 的场景）
    pub size_only_for_same_size: bool,
}

impl Default for CompareConfig {
    fn default() -> Self {
        Self {
            time_tolerance_seconds: 2,
            use_checksum: true,
            ignore_mtime: false,
            size_only_for_same_size: false,
        }
    }
}

/// 参与比较的一侧
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub name: String,
    pub size: u64,
    pub modified_time: Option<i64>,
    pub checksum: Option<Checksum>,
}

impl Snapshot {
    pub fn from_path(path: &Path) -> Self {
        let attributes = path.attributes();
        Self {
            name: path.absolute().to_string(),
            size: attributes.size,
            modified_time: attributes.modified_time,
            checksum: attributes.checksum.clone(),
        }
    }

    /// 本地校验和只在需要时计算
    pub fn from_local(local: &Local, checksum: bool) -> Self {
        Self {
            name: local.to_string(),
            size: local.size(),
            modified_time: local.modified_time(),
            checksum: if checksum { local.checksum().ok() } else { None },
        }
    }
}

/// 文件比较器
#[derive(Debug, Clone, Default)]
pub struct FileComparator {
    config: CompareConfig,
}

impl FileComparator {
    pub fn new(use_checksum: bool) -> Self {
        Self {
            config: CompareConfig {
                use_checksum,
                ..Default::default()
            },
        }
    }

    pub fn with_config(config: CompareConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CompareConfig {
        &self.config
    }

    /// 比较两侧，`source` 为传输来源
    pub fn compare(&self, source: &Snapshot, dest: &Snapshot) -> FileRelation {
        // 首先检查 checksum（同算法才可比）
        if self.config.use_checksum {
            if let (Some(src_sum), Some(dst_sum)) = (&source.checksum, &dest.checksum) {
                if src_sum.algorithm == dst_sum.algorithm {
                    return if src_sum.matches(dst_sum) {
                        FileRelation::Equal
                    } else {
                        FileRelation::Different
                    };
                }
            }
        }

        // 大小不同，肯定不同
        if source.size != dest.size {
            debug!(
                "文件大小不同: {} (src={}, dst={})",
                source.name, source.size, dest.size
            );
            return FileRelation::Different;
        }

        if self.config.size_only_for_same_size {
            return FileRelation::Equal;
        }

        if self.config.ignore_mtime {
            return FileRelation::ProbablyEqual;
        }

        // 任一侧缺少时间时无法判断先后
        let (Some(src_time), Some(dst_time)) = (source.modified_time, dest.modified_time) else {
            return FileRelation::ProbablyEqual;
        };

        let time_diff = (src_time - dst_time).abs();
        if time_diff <= self.config.time_tolerance_seconds {
            return FileRelation::Equal;
        }

        debug!(
            "文件时间不同: {} (src_time={}, dst_time={}, diff={}s)",
            source.name, src_time, dst_time, time_diff
        );

        if src_time > dst_time {
            FileRelation::SourceNewer
        } else {
            FileRelation::DestNewer
        }
    }
}
