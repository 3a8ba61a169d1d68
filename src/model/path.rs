//! 远程实体
//!
//! `Path` 描述后端上的一个条目（文件、目录、符号链接或卷），父目录链通过 `Arc`
//! 共享，只能由父到子构造，因此不会成环，并且总是终止于根目录。

use super::status::Checksum;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use uuid::Uuid;

/// 条目类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathType {
    File,
    Directory,
    Symlink,
    Volume,
}

/// Unix 风格权限位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Permission(u32);

impl Permission {
    pub const fn new(mode: u32) -> Self {
        Self(mode & 0o7777)
    }

    pub fn mode(&self) -> u32 {
        self.0
    }

    pub fn owner_readable(&self) -> bool {
        self.0 & 0o400 != 0
    }

    pub fn owner_writable(&self) -> bool {
        self.0 & 0o200 != 0
    }

    pub fn owner_executable(&self) -> bool {
        self.0 & 0o100 != 0
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const FLAGS: [(u32, char); 9] = [
            (0o400, 'r'),
            (0o200, 'w'),
            (0o100, 'x'),
            (0o040, 'r'),
            (0o020, 'w'),
            (0o010, 'x'),
            (0o004, 'r'),
            (0o002, 'w'),
            (0o001, 'x'),
        ];
        for (bit, c) in FLAGS {
            write!(f, "{}", if self.0 & bit != 0 { c } else { '-' })?;
        }
        Ok(())
    }
}

/// 条目属性
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attributes {
    pub size: u64,
    /// 修改时间（Unix 时间戳，秒）
    pub modified_time: Option<i64>,
    pub owner: Option<String>,
    pub group: Option<String>,
    pub permission: Option<Permission>,
    /// 后端特定的版本标识，合成节点也用它做标记
    pub version_id: Option<String>,
    /// 后端特定的文件 ID
    pub file_id: Option<String>,
    pub checksum: Option<Checksum>,
    pub metadata: HashMap<String, String>,
}

impl Attributes {
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn with_modified_time(mut self, timestamp: i64) -> Self {
        self.modified_time = Some(timestamp);
        self
    }

    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.permission = Some(permission);
        self
    }

    pub fn with_version_id(mut self, version_id: impl Into<String>) -> Self {
        self.version_id = Some(version_id.into());
        self
    }

    pub fn with_file_id(mut self, file_id: impl Into<String>) -> Self {
        self.file_id = Some(file_id.into());
        self
    }

    pub fn with_checksum(mut self, checksum: Checksum) -> Self {
        self.checksum = Some(checksum);
        self
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// 远程条目
#[derive(Debug, Clone)]
pub struct Path {
    name: String,
    parent: Option<Arc<Path>>,
    absolute: String,
    kind: PathType,
    attributes: Attributes,
    symlink_target: Option<Arc<Path>>,
}

impl Path {
    /// 根目录
    pub fn root() -> Self {
        Self {
            name: String::new(),
            parent: None,
            absolute: "/".to_string(),
            kind: PathType::Volume,
            attributes: Attributes::default(),
            symlink_target: None,
        }
    }

    /// `name` 含分隔符或为 `.`、`..` 时按绝对路径规范化，结果不会越过根目录
    pub fn child(parent: &Path, name: &str, kind: PathType) -> Self {
        if matches!(name, "" | "." | "..") || name.contains(['/', '\\']) {
            return Self::from_absolute(&format!("{}/{}", parent.absolute, name), kind);
        }
        let name = name.to_string();
        let absolute = if parent.is_root() {
            format!("/{}", name)
        } else {
            format!("{}/{}", parent.absolute, name)
        };
        Self {
            name,
            parent: Some(Arc::new(parent.clone())),
            absolute,
            kind,
            attributes: Attributes::default(),
            symlink_target: None,
        }
    }

    /// 从绝对路径构造，中间各级都视为目录
    pub fn from_absolute(absolute: &str, kind: PathType) -> Self {
        let normalized = normalize(absolute);
        if normalized == "/" {
            return Self::root();
        }
        let segments: Vec<&str> = normalized.split('/').filter(|s| !s.is_empty()).collect();
        let mut current = Self::root();
        for (i, segment) in segments.iter().enumerate() {
            let segment_kind = if i + 1 == segments.len() {
                kind
            } else {
                PathType::Directory
            };
            current = Self::child(&current, segment, segment_kind);
        }
        current
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_symlink_target(mut self, target: Path) -> Self {
        self.symlink_target = Some(Arc::new(target));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn absolute(&self) -> &str {
        &self.absolute
    }

    pub fn parent(&self) -> Option<&Path> {
        self.parent.as_deref()
    }

    pub fn kind(&self) -> PathType {
        self.kind
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn symlink_target(&self) -> Option<&Path> {
        self.symlink_target.as_deref()
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn is_file(&self) -> bool {
        self.kind == PathType::File
    }

    pub fn is_directory(&self) -> bool {
        matches!(self.kind, PathType::Directory | PathType::Volume)
    }

    pub fn is_symlink(&self) -> bool {
        self.kind == PathType::Symlink
    }

    pub fn size(&self) -> u64 {
        self.attributes.size
    }

    pub fn extension(&self) -> Option<&str> {
        let (_, ext) = crate::core::conflict::split_extension(&self.name);
        ext
    }

    /// 是否位于 `directory` 之下（任意层级）
    pub fn is_child_of(&self, directory: &Path) -> bool {
        if directory.is_root() {
            return !self.is_root();
        }
        self.absolute
            .strip_prefix(directory.absolute())
            .is_some_and(|rest| rest.starts_with('/'))
    }

    pub fn reference(&self, session: SessionId) -> Reference {
        Reference::new(session, self)
    }
}

impl PartialEq for Path {
    fn eq(&self, other: &Self) -> bool {
        self.absolute == other.absolute && self.is_directory() == other.is_directory()
    }
}

impl Eq for Path {}

impl Hash for Path {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.absolute.hash(state);
        self.is_directory().hash(state);
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.absolute)
    }
}

/// 规范化绝对路径：合并重复分隔符，处理 `.` 与 `..`，去掉结尾的 `/`
pub fn normalize(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => continue,
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

/// 后端会话标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 缓存键：由会话与规范化地址决定，与显示名称、属性内容无关
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    session: SessionId,
    absolute: Arc<str>,
}

impl Reference {
    pub fn new(session: SessionId, path: &Path) -> Self {
        Self {
            session,
            absolute: Arc::from(path.absolute()),
        }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn absolute(&self) -> &str {
        &self.absolute
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.session, self.absolute)
    }
}
