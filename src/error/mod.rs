//! 统一错误分类
//!
//! 所有能力调用与核心组件都只返回 [`TransferError`]，后端原生错误经由
//! [`mapping`] 中的映射器转换后作为 `cause` 保留。

pub mod mapping;
pub mod messages;

use crate::model::Path;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub use mapping::{AnyhowMapping, ErrorMapping, HttpFailure, HttpStatusMapping, IoErrorMapping};
pub use messages::{Locale, Messages};

pub type Result<T, E = TransferError> = std::result::Result<T, E>;

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// 权限或策略拒绝，包括目标不支持所需能力
    AccessDenied,
    /// 文件名不符合后端命名规则
    InvalidName,
    NotFound,
    /// 符号链接成环或链条过深
    CyclicLink,
    /// 网络或后端的暂时性故障，可由调用方重试
    TransientIo,
    /// 程序或契约错误，不重试
    Fatal,
    /// 后台任务被取消
    Cancelled,
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::TransientIo)
    }

    /// 是否中止整批处理
    pub fn is_fatal(&self) -> bool {
        matches!(self, ErrorKind::Fatal)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::AccessDenied => "access_denied",
            ErrorKind::InvalidName => "invalid_name",
            ErrorKind::NotFound => "not_found",
            ErrorKind::CyclicLink => "cyclic_link",
            ErrorKind::TransientIo => "transient_io",
            ErrorKind::Fatal => "fatal",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// 出错文件的标识
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileIdentity {
    pub name: String,
    pub absolute: String,
}

impl From<&Path> for FileIdentity {
    fn from(path: &Path) -> Self {
        Self {
            name: path.name().to_string(),
            absolute: path.absolute().to_string(),
        }
    }
}

type SharedCause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// 统一错误
///
/// 可克隆，单飞请求的结果需要分发给所有等待者。
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TransferError {
    kind: ErrorKind,
    message: String,
    detail: Option<String>,
    file: Option<FileIdentity>,
    #[source]
    cause: Option<SharedCause>,
}

impl TransferError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: None,
            file: None,
            cause: None,
        }
    }

    pub fn access_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AccessDenied, message)
    }

    pub fn invalid_name(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidName, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn cyclic_link(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CyclicLink, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransientIo, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "Cancelled")
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_file(mut self, file: &Path) -> Self {
        self.file = Some(FileIdentity::from(file));
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_cause<E>(self, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.with_shared_cause(Arc::new(cause))
    }

    pub fn with_shared_cause(mut self, cause: SharedCause) -> Self {
        self.cause = Some(cause);
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    pub fn file(&self) -> Option<&FileIdentity> {
        self.file.as_ref()
    }

    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    pub fn is_fatal(&self) -> bool {
        self.kind.is_fatal()
    }
}

impl From<std::io::Error> for TransferError {
    fn from(err: std::io::Error) -> Self {
        IoErrorMapping::default().map(err)
    }
}
