//! 元数据批量更新
//!
//! 以文件已知的元数据为基准合并调用方给出的更新，只有结果发生变化的文件才会写回后端。

use crate::error::TransferError;
use crate::model::Path;
use crate::storage::Session;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 单个键的更新方式
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataValue {
    Set(String),
    /// 保留原值
    Keep,
    /// 删除该键
    Remove,
}

/// `None` 表示保留原值
impl From<Option<String>> for MetadataValue {
    fn from(value: Option<String>) -> Self {
        match value {
            Some(v) => MetadataValue::Set(v),
            None => MetadataValue::Keep,
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::Set(value.to_string())
    }
}

pub type MetadataUpdate = HashMap<String, MetadataValue>;

/// 合并后的元数据，与 `previous` 相同时返回 `None`
pub fn reconcile(
    previous: &HashMap<String, String>,
    updated: &MetadataUpdate,
) -> Option<HashMap<String, String>> {
    let mut merged = previous.clone();
    for (key, value) in updated {
        match value {
            MetadataValue::Set(v) => {
                merged.insert(key.clone(), v.clone());
            }
            MetadataValue::Keep => {}
            MetadataValue::Remove => {
                merged.remove(key);
            }
        }
    }
    if &merged == previous {
        None
    } else {
        Some(merged)
    }
}

/// 批量更新结果
#[derive(Debug, Clone, Default)]
pub struct MetadataOutcome {
    /// 调用方给出的更新
    pub mapping: MetadataUpdate,
    /// 实际写回的文件及写入内容
    pub written: Vec<(Path, HashMap<String, String>)>,
    pub failures: Vec<(Path, TransferError)>,
}

impl MetadataOutcome {
    pub fn is_empty(&self) -> bool {
        self.written.is_empty()
    }
}

pub struct MetadataReconciler {
    session: Arc<Session>,
}

impl MetadataReconciler {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    /// 逐个文件合并并写回，至少写入一个文件后才调用 `callback`
    pub async fn run<F>(&self, files: &[Path], updated: MetadataUpdate, callback: F) -> MetadataOutcome
    where
        F: FnOnce(&MetadataOutcome),
    {
        let mut outcome = MetadataOutcome {
            mapping: updated,
            ..Default::default()
        };
        for file in files {
            let Some(merged) = reconcile(&file.attributes().metadata, &outcome.mapping) else {
                debug!("元数据无变化，跳过: {}", file);
                continue;
            };
            match self.session.write_metadata(file, &merged).await {
                Ok(()) => outcome.written.push((file.clone(), merged)),
                Err(e) => {
                    warn!("写入元数据失败 {}: {}", file, e);
                    outcome.failures.push((file.clone(), e));
                }
            }
        }
        if !outcome.is_empty() {
            info!("已更新 {} 个文件的元数据", outcome.written.len());
            callback(&outcome);
        }
        outcome
    }
}
