//! 分层目录列表
//!
//! 命名空间混合了真实条目与后端合成的导航节点（如 SharePoint 的 Sites、Drives）。
//! 列表请求依次尝试：根目录专用列表 -> 合成节点覆盖 -> 通用列表。

use super::{IdProvider, ListService};
use crate::core::cache::ListingCache;
use crate::error::Result;
use crate::model::{AttributedList, Attributes, Path, PathType};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// 站点集合节点的版本标记
pub const SITES_MARKER: &str = "SITES";
/// 站点驱动器集合节点的版本标记
pub const DRIVES_MARKER: &str = "DRIVES";

pub const SITES_NAME: &str = "Sites";
pub const DRIVES_NAME: &str = "Drives";

/// 合成节点覆盖，只有目录匹配时才返回结果
#[async_trait]
pub trait NodeOverride: Send + Sync {
    async fn list(&self, directory: &Path) -> Result<Option<AttributedList>>;
}

fn marker_of(path: &Path) -> Option<&str> {
    path.attributes().version_id.as_deref()
}

/// 版本标记与 `marker` 相同的目录交给专用列表
pub struct MarkerOverride {
    marker: String,
    lister: Arc<dyn ListService>,
}

impl MarkerOverride {
    pub fn new(marker: impl Into<String>, lister: Arc<dyn ListService>) -> Self {
        Self {
            marker: marker.into(),
            lister,
        }
    }
}

#[async_trait]
impl NodeOverride for MarkerOverride {
    async fn list(&self, directory: &Path) -> Result<Option<AttributedList>> {
        if marker_of(directory) != Some(self.marker.as_str()) {
            return Ok(None);
        }
        debug!("合成节点 {} 使用专用列表: {}", self.marker, directory);
        self.lister.list(directory).await.map(Some)
    }
}

/// 父目录带 `parent_marker` 时，直接返回固定的合成子节点
pub struct GroupChildrenOverride {
    parent_marker: String,
    children: Vec<(String, String)>,
}

impl GroupChildrenOverride {
    /// `children` 为 (名称, 版本标记)
    pub fn new(parent_marker: impl Into<String>, children: Vec<(String, String)>) -> Self {
        Self {
            parent_marker: parent_marker.into(),
            children,
        }
    }

    /// 单个站点下的 Drives 与 Sites
    pub fn site_items() -> Self {
        Self::new(
            SITES_MARKER,
            vec![
                (DRIVES_NAME.to_string(), DRIVES_MARKER.to_string()),
                (SITES_NAME.to_string(), SITES_MARKER.to_string()),
            ],
        )
    }
}

#[async_trait]
impl NodeOverride for GroupChildrenOverride {
    async fn list(&self, directory: &Path) -> Result<Option<AttributedList>> {
        let Some(parent) = directory.parent() else {
            return Ok(None);
        };
        if marker_of(parent) != Some(self.parent_marker.as_str()) {
            return Ok(None);
        }
        Ok(Some(
            self.children
                .iter()
                .map(|(name, marker)| {
                    Path::child(directory, name, PathType::Directory)
                        .with_attributes(Attributes::default().with_version_id(marker.as_str()))
                })
                .collect(),
        ))
    }
}

pub struct TieredListService {
    root: Arc<dyn ListService>,
    overrides: Vec<Arc<dyn NodeOverride>>,
    generic: Arc<dyn ListService>,
    id_provider: Option<Arc<dyn IdProvider>>,
}

impl TieredListService {
    pub fn new(root: Arc<dyn ListService>, generic: Arc<dyn ListService>) -> Self {
        Self {
            root,
            overrides: Vec::new(),
            generic,
            id_provider: None,
        }
    }

    /// 按添加顺序尝试
    pub fn with_override(mut self, node: Arc<dyn NodeOverride>) -> Self {
        self.overrides.push(node);
        self
    }

    pub fn with_id_provider(mut self, provider: Arc<dyn IdProvider>) -> Self {
        self.id_provider = Some(provider);
        self
    }

    /// SharePoint 风格：Sites / Drives 标记节点以及站点下的默认子项
    pub fn sharepoint(
        root: Arc<dyn ListService>,
        sites: Arc<dyn ListService>,
        drives: Arc<dyn ListService>,
        generic: Arc<dyn ListService>,
    ) -> Self {
        Self::new(root, generic)
            .with_override(Arc::new(MarkerOverride::new(SITES_MARKER, sites)))
            .with_override(Arc::new(MarkerOverride::new(DRIVES_MARKER, drives)))
            .with_override(Arc::new(GroupChildrenOverride::site_items()))
    }
}

#[async_trait]
impl ListService for TieredListService {
    async fn list(&self, directory: &Path) -> Result<AttributedList> {
        if directory.is_root() {
            return self.root.list(directory).await;
        }
        for node in &self.overrides {
            if let Some(children) = node.list(directory).await? {
                return Ok(children);
            }
        }
        self.generic.list(directory).await
    }

    fn with_cache(&self, cache: Arc<ListingCache>) {
        if let Some(provider) = &self.id_provider {
            provider.with_cache(cache);
        }
    }
}
