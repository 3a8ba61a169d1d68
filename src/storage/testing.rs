//! 单元测试用的内存后端

use super::registry::{Capability, CapabilityRegistry};
use super::session::Session;
use super::{Delete, DeleteCallback, DeleteReport, Directory, ListService, Metadata, Move, Touch};
use crate::error::{ErrorKind, Locale, Messages, Result, TransferError};
use crate::model::{normalize, AttributedList, Attributes, Path, PathType, TransferStatus};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
pub(crate) struct MockCalls {
    pub list: AtomicUsize,
    pub touch: AtomicUsize,
    pub preflight: AtomicUsize,
    pub mkdir: AtomicUsize,
    pub rename: AtomicUsize,
    pub delete: AtomicUsize,
    pub metadata_get: AtomicUsize,
    pub metadata_set: AtomicUsize,
}

impl MockCalls {
    pub fn total(&self) -> usize {
        [
            &self.list,
            &self.touch,
            &self.preflight,
            &self.mkdir,
            &self.rename,
            &self.delete,
            &self.metadata_get,
            &self.metadata_set,
        ]
        .iter()
        .map(|c| c.load(Ordering::SeqCst))
        .sum()
    }
}

#[derive(Clone)]
pub(crate) struct MockBackend {
    entries: Arc<Mutex<BTreeMap<String, Path>>>,
    pub calls: Arc<MockCalls>,
    list_delay: Arc<Mutex<Option<Duration>>>,
    touch_supported: Arc<AtomicBool>,
    failing: Arc<Mutex<HashSet<String>>>,
    /// 按文件名注入的 preflight 错误
    preflight_failures: Arc<Mutex<HashMap<String, ErrorKind>>>,
    /// 每次 set 收到的完整映射
    pub written: Arc<Mutex<Vec<(String, HashMap<String, String>)>>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(BTreeMap::new())),
            calls: Arc::new(MockCalls::default()),
            list_delay: Arc::new(Mutex::new(None)),
            touch_supported: Arc::new(AtomicBool::new(true)),
            failing: Arc::new(Mutex::new(HashSet::new())),
            preflight_failures: Arc::new(Mutex::new(HashMap::new())),
            written: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn add(&self, path: Path) -> Path {
        if let Some(parent) = path.parent() {
            if !parent.is_root() && !self.entries.lock().contains_key(parent.absolute()) {
                self.add(parent.clone());
            }
        }
        self.entries
            .lock()
            .insert(path.absolute().to_string(), path.clone());
        path
    }

    pub fn add_dir(&self, absolute: &str) -> Path {
        self.add(Path::from_absolute(absolute, PathType::Directory))
    }

    pub fn add_file(&self, absolute: &str, size: u64) -> Path {
        self.add(
            Path::from_absolute(absolute, PathType::File)
                .with_attributes(Attributes::default().with_size(size)),
        )
    }

    /// 链接目标内嵌在条目中，列出父目录即可解析
    pub fn add_symlink(&self, absolute: &str, target: &str) -> Path {
        let target = Path::from_absolute(target, PathType::File);
        self.add(Path::from_absolute(absolute, PathType::Symlink).with_symlink_target(target))
    }

    pub fn set_list_delay(&self, delay: Duration) {
        *self.list_delay.lock() = Some(delay);
    }

    pub fn set_touch_supported(&self, supported: bool) {
        self.touch_supported.store(supported, Ordering::SeqCst);
    }

    /// 对该路径的写操作一律失败
    pub fn fail_on(&self, absolute: &str) {
        self.failing.lock().insert(normalize(absolute));
    }

    pub fn fail_preflight(&self, filename: &str, kind: ErrorKind) {
        self.preflight_failures.lock().insert(filename.to_string(), kind);
    }

    pub fn get(&self, absolute: &str) -> Option<Path> {
        self.entries.lock().get(&normalize(absolute)).cloned()
    }

    pub fn registry(&self) -> CapabilityRegistry {
        let shared = Arc::new(self.clone());
        CapabilityRegistry::builder()
            .with_messages(Messages::new(Locale::En))
            .register(Capability::List(shared.clone()))
            .register(Capability::Touch(shared.clone()))
            .register(Capability::Directory(shared.clone()))
            .register(Capability::Move(shared.clone()))
            .register(Capability::Delete(shared.clone()))
            .register(Capability::Metadata(shared))
            .build()
    }

    pub fn session(&self) -> Session {
        Session::new("mock", self.registry(), 100)
    }

    fn check_failing(&self, file: &Path) -> Result<()> {
        if self.failing.lock().contains(file.absolute()) {
            return Err(TransferError::transient("Connection failed").with_file(file));
        }
        Ok(())
    }
}

#[async_trait]
impl ListService for MockBackend {
    async fn list(&self, directory: &Path) -> Result<AttributedList> {
        self.calls.list.fetch_add(1, Ordering::SeqCst);
        let delay = *self.list_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let entries = self.entries.lock();
        if !directory.is_root() && !entries.contains_key(directory.absolute()) {
            return Err(TransferError::not_found("File not found").with_file(directory));
        }
        Ok(entries
            .values()
            .filter(|p| p.parent().map(|parent| parent.absolute()) == Some(directory.absolute()))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl Touch for MockBackend {
    fn is_supported(&self, workdir: &Path, _filename: &str) -> bool {
        !workdir.is_root() && self.touch_supported.load(Ordering::SeqCst)
    }

    async fn preflight(&self, workdir: &Path, filename: &str) -> Result<()> {
        self.calls.preflight.fetch_add(1, Ordering::SeqCst);
        if let Some(kind) = self.preflight_failures.lock().get(filename) {
            return Err(TransferError::new(*kind, "Connection failed"));
        }
        if filename.contains(['/', '\\', ':', '*', '?', '"', '<', '>', '|']) {
            return Err(TransferError::invalid_name(format!("Cannot create {}", filename)));
        }
        if let Some(permission) = workdir.attributes().permission {
            if !permission.owner_writable() {
                return Err(TransferError::access_denied("Access denied").with_file(workdir));
            }
        }
        Ok(())
    }

    async fn touch(&self, file: &Path, _status: &TransferStatus) -> Result<Path> {
        self.calls.touch.fetch_add(1, Ordering::SeqCst);
        self.check_failing(file)?;
        Ok(self.add(Path::from_absolute(file.absolute(), PathType::File)))
    }
}

#[async_trait]
impl Directory for MockBackend {
    async fn mkdir(&self, directory: &Path) -> Result<Path> {
        self.calls.mkdir.fetch_add(1, Ordering::SeqCst);
        self.check_failing(directory)?;
        Ok(self.add(Path::from_absolute(directory.absolute(), PathType::Directory)))
    }
}

#[async_trait]
impl Move for MockBackend {
    async fn rename(&self, source: &Path, target: &Path) -> Result<Path> {
        self.calls.rename.fetch_add(1, Ordering::SeqCst);
        self.check_failing(source)?;
        let existing = self
            .entries
            .lock()
            .remove(source.absolute())
            .ok_or_else(|| TransferError::not_found("File not found").with_file(source))?;
        let prefix = format!("{}/", source.absolute());
        let descendants: Vec<Path> = {
            let mut entries = self.entries.lock();
            let keys: Vec<String> = entries
                .keys()
                .filter(|key| key.starts_with(&prefix))
                .cloned()
                .collect();
            keys.iter().filter_map(|key| entries.remove(key)).collect()
        };
        let moved = Path::from_absolute(target.absolute(), existing.kind())
            .with_attributes(existing.attributes().clone());
        let moved = self.add(moved);
        for child in descendants {
            let relative = &child.absolute()[prefix.len()..];
            self.add(
                Path::from_absolute(&format!("{}/{}", target.absolute(), relative), child.kind())
                    .with_attributes(child.attributes().clone()),
            );
        }
        Ok(moved)
    }
}

#[async_trait]
impl Delete for MockBackend {
    async fn delete(&self, files: &[Path], callback: &dyn DeleteCallback) -> DeleteReport {
        self.calls.delete.fetch_add(1, Ordering::SeqCst);
        let mut report = DeleteReport::default();
        for file in files {
            callback.deleting(file);
            if let Err(e) = self.check_failing(file) {
                report.failed.push((file.clone(), e));
                continue;
            }
            let prefix = format!("{}/", file.absolute());
            let mut entries = self.entries.lock();
            let removed = entries.remove(file.absolute()).is_some();
            entries.retain(|key, _| !key.starts_with(&prefix));
            drop(entries);
            if removed {
                report.deleted.push(file.clone());
            } else {
                report
                    .failed
                    .push((file.clone(), TransferError::not_found("File not found").with_file(file)));
            }
        }
        report
    }
}

#[async_trait]
impl Metadata for MockBackend {
    async fn get(&self, file: &Path) -> Result<HashMap<String, String>> {
        self.calls.metadata_get.fetch_add(1, Ordering::SeqCst);
        self.entries
            .lock()
            .get(file.absolute())
            .map(|p| p.attributes().metadata.clone())
            .ok_or_else(|| TransferError::not_found("File not found").with_file(file))
    }

    async fn set(&self, file: &Path, metadata: &HashMap<String, String>) -> Result<()> {
        self.calls.metadata_set.fetch_add(1, Ordering::SeqCst);
        self.check_failing(file)?;
        self.written
            .lock()
            .push((file.absolute().to_string(), metadata.clone()));
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(file.absolute()).cloned() {
            let attributes = existing.attributes().clone().with_metadata(metadata.clone());
            entries.insert(
                file.absolute().to_string(),
                existing.with_attributes(attributes),
            );
        }
        Ok(())
    }
}
