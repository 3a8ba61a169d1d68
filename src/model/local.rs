use super::path::Permission;
use super::status::{Checksum, HashAlgorithm};
use std::fs;
use std::io::{self, BufReader, Read};
use std::path::{Path as FsPath, PathBuf};
use std::time::UNIX_EPOCH;

/// 本地文件
///
/// 与远程 `Path` 相互独立，传输时仅通过名称关联。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Local {
    path: PathBuf,
}

impl Local {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &FsPath {
        &self.path
    }

    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn parent(&self) -> Option<Local> {
        self.path.parent().map(Local::new)
    }

    pub fn join(&self, name: &str) -> Local {
        Local::new(self.path.join(name))
    }

    /// 同目录下改名后的文件
    pub fn with_name(&self, name: &str) -> Local {
        Local::new(self.path.with_file_name(name))
    }

    /// 不跟随链接，悬空的符号链接也算存在
    pub fn exists(&self) -> bool {
        fs::symlink_metadata(&self.path).is_ok()
    }

    pub fn is_file(&self) -> bool {
        fs::metadata(&self.path).map(|m| m.is_file()).unwrap_or(false)
    }

    pub fn is_directory(&self) -> bool {
        fs::metadata(&self.path).map(|m| m.is_dir()).unwrap_or(false)
    }

    pub fn is_symlink(&self) -> bool {
        fs::symlink_metadata(&self.path)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false)
    }

    pub fn size(&self) -> u64 {
        fs::metadata(&self.path)
            .map(|m| if m.is_dir() { 0 } else { m.len() })
            .unwrap_or(0)
    }

    pub fn modified_time(&self) -> Option<i64> {
        let modified = fs::metadata(&self.path).ok()?.modified().ok()?;
        Some(modified.duration_since(UNIX_EPOCH).ok()?.as_secs() as i64)
    }

    #[cfg(unix)]
    pub fn permission(&self) -> Option<Permission> {
        use std::os::unix::fs::PermissionsExt;
        fs::metadata(&self.path)
            .ok()
            .map(|m| Permission::new(m.permissions().mode()))
    }

    #[cfg(not(unix))]
    pub fn permission(&self) -> Option<Permission> {
        fs::metadata(&self.path).ok().map(|m| {
            if m.permissions().readonly() {
                Permission::new(0o444)
            } else {
                Permission::new(0o644)
            }
        })
    }

    pub fn is_writable(&self) -> bool {
        fs::metadata(&self.path)
            .map(|m| !m.permissions().readonly())
            .unwrap_or(false)
    }

    /// 链接指向的本地路径（相对目标按链接所在目录解析）
    pub fn symlink_target(&self) -> Option<Local> {
        let target = fs::read_link(&self.path).ok()?;
        if target.is_absolute() {
            Some(Local::new(target))
        } else {
            Some(Local::new(self.path.parent()?.join(target)))
        }
    }

    /// 计算文件内容的 BLAKE3 校验和
    pub fn checksum(&self) -> io::Result<Checksum> {
        let mut reader = BufReader::new(fs::File::open(&self.path)?);
        let mut hasher = blake3::Hasher::new();
        let mut buffer = [0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }
        Ok(Checksum::new(
            HashAlgorithm::Blake3,
            hasher.finalize().to_hex().to_string(),
        ))
    }
}

impl std::fmt::Display for Local {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path.display())
    }
}
