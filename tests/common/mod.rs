#![allow(dead_code)]

use std::path::Path as FsPath;
use std::sync::Arc;
use synctools_core::error::{Locale, Messages};
use synctools_core::storage::LocalStorage;
use synctools_core::{Local, Path, PathType, Session};
use tempfile::TempDir;

/// 一个以临时目录为根的本地后端，加上一个空的本地目标目录
pub struct Fixture {
    pub remote: TempDir,
    pub local: TempDir,
    pub session: Arc<Session>,
}

impl Fixture {
    pub fn new() -> Self {
        let remote = tempfile::tempdir().expect("remote dir");
        let local = tempfile::tempdir().expect("local dir");
        let storage = LocalStorage::new(remote.path())
            .expect("local storage")
            .with_messages(Messages::new(Locale::En));
        let session = Arc::new(Session::new("fixture", storage.registry(), 100));
        Self {
            remote,
            local,
            session,
        }
    }

    pub fn write_remote(&self, relative: &str, content: &[u8]) {
        write(self.remote.path(), relative, content);
    }

    pub fn write_local(&self, relative: &str, content: &[u8]) {
        write(self.local.path(), relative, content);
    }

    pub fn local_root(&self) -> Local {
        Local::new(self.local.path())
    }

    /// 通过父目录列表取得带属性的远程条目
    pub async fn remote_entry(&self, absolute: &str) -> Path {
        let path = Path::from_absolute(absolute, PathType::File);
        let parent = path.parent().expect("not root").clone();
        let listing = self.session.list(&parent).await.expect("list parent");
        listing
            .find_by_name(path.name())
            .cloned()
            .expect("entry exists")
    }
}

fn write(base: &FsPath, relative: &str, content: &[u8]) {
    let target = base.join(relative);
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).expect("create parent");
    }
    std::fs::write(target, content).expect("write file");
}
