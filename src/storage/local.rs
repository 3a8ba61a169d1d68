use super::registry::{Capability, CapabilityRegistry};
use super::share::{DescriptiveUrl, PasswordCallback, ShareKind};
use super::{Delete, DeleteCallback, DeleteReport, Directory, ListService, Move, ShareProvider, Touch};
use crate::error::{ErrorMapping, IoErrorMapping, Messages, Result, TransferError};
use crate::model::{normalize, AttributedList, Attributes, Path, PathType, Permission, TransferStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::path::{Path as FsPath, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::UNIX_EPOCH;
use tokio::fs;
use tracing::{debug, warn};

/// 文件名中不允许出现的字符
fn forbidden_characters() -> Option<&'static Regex> {
    static FORBIDDEN: OnceLock<Option<Regex>> = OnceLock::new();
    FORBIDDEN
        .get_or_init(|| Regex::new(r#"[\\<>:"|?*/]"#).ok())
        .as_ref()
}

/// 以本地目录为根的后端
pub struct LocalStorage {
    base_path: PathBuf,
    name: String,
    errors: IoErrorMapping,
}

impl LocalStorage {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = path.into();
        if !base_path.exists() {
            std::fs::create_dir_all(&base_path)?;
        }
        let name = format!("local:{}", base_path.display());
        Ok(Self {
            base_path,
            name,
            errors: IoErrorMapping::default(),
        })
    }

    pub fn with_messages(mut self, messages: Messages) -> Self {
        self.errors = IoErrorMapping::new(messages);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_path(&self) -> &FsPath {
        &self.base_path
    }

    /// 远程路径 -> 磁盘路径
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        let normalized = normalize(path.absolute());
        let relative = normalized.trim_start_matches('/');
        if relative.is_empty() {
            self.base_path.clone()
        } else {
            self.base_path.join(relative)
        }
    }

    pub fn validate(filename: &str) -> bool {
        let forbidden = match forbidden_characters() {
            Some(re) => re.is_match(filename),
            None => filename.contains(['\\', '<', '>', ':', '"', '|', '?', '*', '/']),
        };
        if filename.is_empty() || forbidden {
            warn!("文件名校验失败: {}", filename);
            return false;
        }
        true
    }

    /// 登记本地后端支持的全部能力
    pub fn registry(self) -> CapabilityRegistry {
        let messages = *self.errors.messages();
        let shared = Arc::new(self);
        CapabilityRegistry::builder()
            .with_messages(messages)
            .register(Capability::List(shared.clone()))
            .register(Capability::Touch(shared.clone()))
            .register(Capability::Directory(shared.clone()))
            .register(Capability::Move(shared.clone()))
            .register(Capability::Delete(shared.clone()))
            .register(Capability::ShareProvider(shared))
            .build()
    }

    /// 链接目标：基准目录内的映射为远程路径
    fn link_target(&self, link: &FsPath, directory: &Path) -> Option<Path> {
        let raw = std::fs::read_link(link).ok()?;
        let resolved = if raw.is_absolute() {
            raw
        } else {
            self.resolve_path(directory).join(raw)
        };
        let kind = match std::fs::metadata(&resolved) {
            Ok(m) if m.is_dir() => PathType::Directory,
            _ => PathType::File,
        };
        match resolved.strip_prefix(&self.base_path) {
            Ok(relative) => Some(Path::from_absolute(
                &relative.to_string_lossy().replace('\\', "/"),
                kind,
            )),
            Err(_) => Some(Path::from_absolute(&resolved.to_string_lossy(), kind)),
        }
    }

    fn attributes(metadata: &std::fs::Metadata) -> Attributes {
        let mut attributes = Attributes::default().with_size(if metadata.is_dir() {
            0
        } else {
            metadata.len()
        });
        if let Some(modified) = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        {
            attributes = attributes.with_modified_time(modified.as_secs() as i64);
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            attributes = attributes.with_permission(Permission::new(metadata.permissions().mode()));
        }
        #[cfg(not(unix))]
        {
            let mode = if metadata.permissions().readonly() { 0o444 } else { 0o644 };
            attributes = attributes.with_permission(Permission::new(mode));
        }
        attributes
    }
}

#[async_trait]
impl ListService for LocalStorage {
    async fn list(&self, directory: &Path) -> Result<AttributedList> {
        let full_path = self.resolve_path(directory);
        let failed = |e: std::io::Error| {
            self.errors
                .map_for_file("Listing directory {0} failed", e, directory)
        };
        let mut entries = fs::read_dir(&full_path).await.map_err(failed)?;
        let mut children = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(failed)? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let metadata = match fs::symlink_metadata(entry.path()).await {
                Ok(m) => m,
                // 列出期间被删除
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(failed(e)),
            };
            let file_type = metadata.file_type();
            let child = if file_type.is_symlink() {
                let child = Path::child(directory, &name, PathType::Symlink)
                    .with_attributes(Self::attributes(&metadata));
                match self.link_target(&entry.path(), directory) {
                    Some(target) => child.with_symlink_target(target),
                    None => child,
                }
            } else if file_type.is_dir() {
                Path::child(directory, &name, PathType::Directory)
                    .with_attributes(Self::attributes(&metadata))
            } else {
                Path::child(directory, &name, PathType::File)
                    .with_attributes(Self::attributes(&metadata))
            };
            children.push(child);
        }
        children.sort_by(|a, b| a.name().cmp(b.name()));
        debug!("{} 列出 {}: {} 项", self.name, directory, children.len());
        Ok(AttributedList::new(children))
    }
}

#[async_trait]
impl Touch for LocalStorage {
    async fn preflight(&self, workdir: &Path, filename: &str) -> Result<()> {
        if !Self::validate(filename) {
            return Err(TransferError::invalid_name(
                self.errors
                    .messages()
                    .format("Cannot create {0}", &[filename]),
            ));
        }
        let full_path = self.resolve_path(workdir);
        let metadata = match fs::metadata(&full_path).await {
            Ok(metadata) => metadata,
            // 目录尚未创建，传输时会先建目录
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(self.errors.map_for_file("Cannot create {0}", e, workdir)),
        };
        if !metadata.is_dir() || metadata.permissions().readonly() {
            return Err(TransferError::access_denied(
                self.errors
                    .messages()
                    .format("Cannot create {0}", &[filename]),
            )
            .with_file(workdir));
        }
        Ok(())
    }

    async fn touch(&self, file: &Path, _status: &TransferStatus) -> Result<Path> {
        let full_path = self.resolve_path(file);
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&full_path)
            .await
            .map_err(|e| self.errors.map_for_file("Cannot create {0}", e, file))?;
        let metadata = fs::metadata(&full_path)
            .await
            .map_err(|e| self.errors.map_for_file("Cannot create {0}", e, file))?;
        Ok(Path::from_absolute(file.absolute(), PathType::File)
            .with_attributes(Self::attributes(&metadata)))
    }
}

#[async_trait]
impl Directory for LocalStorage {
    async fn mkdir(&self, directory: &Path) -> Result<Path> {
        let full_path = self.resolve_path(directory);
        fs::create_dir_all(&full_path)
            .await
            .map_err(|e| self.errors.map_for_file("Cannot create {0}", e, directory))?;
        Ok(Path::from_absolute(directory.absolute(), PathType::Directory))
    }
}

#[async_trait]
impl Move for LocalStorage {
    fn is_supported(&self, source: &Path, target: &Path) -> bool {
        !source.is_root() && !target.is_child_of(source)
    }

    async fn rename(&self, source: &Path, target: &Path) -> Result<Path> {
        fs::rename(self.resolve_path(source), self.resolve_path(target))
            .await
            .map_err(|e| self.errors.map_for_file("Cannot rename {0}", e, source))?;
        Ok(Path::from_absolute(target.absolute(), source.kind())
            .with_attributes(source.attributes().clone()))
    }
}

#[async_trait]
impl Delete for LocalStorage {
    async fn delete(&self, files: &[Path], callback: &dyn DeleteCallback) -> DeleteReport {
        let mut report = DeleteReport::default();
        for file in files {
            callback.deleting(file);
            let full_path = self.resolve_path(file);
            let result = match fs::symlink_metadata(&full_path).await {
                Ok(m) if m.is_dir() => fs::remove_dir_all(&full_path).await,
                Ok(_) => fs::remove_file(&full_path).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => report.deleted.push(file.clone()),
                Err(e) => {
                    let err = self.errors.map_for_file("Cannot delete {0}", e, file);
                    warn!("删除失败 {}: {}", file, err);
                    report.failed.push((file.clone(), err));
                }
            }
        }
        report
    }
}

#[async_trait]
impl ShareProvider for LocalStorage {
    fn is_supported(&self, _file: &Path, kind: ShareKind) -> bool {
        kind == ShareKind::Download
    }

    async fn to_download_url(
        &self,
        file: &Path,
        expiry: Option<DateTime<Utc>>,
        _password: &dyn PasswordCallback,
    ) -> Result<DescriptiveUrl> {
        let base = format!("file://{}", self.base_path.to_string_lossy().replace('\\', "/"));
        Ok(DescriptiveUrl::new(DescriptiveUrl::encode(&base, file), self.name.clone()).with_expiry(expiry))
    }

    async fn to_upload_url(
        &self,
        file: &Path,
        _expiry: Option<DateTime<Utc>>,
        _password: &dyn PasswordCallback,
    ) -> Result<DescriptiveUrl> {
        Err(TransferError::access_denied(
            self.errors
                .messages()
                .format("Unsupported operation for {0}", &[file.name()]),
        )
        .with_file(file))
    }
}
