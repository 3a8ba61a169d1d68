//! 后端错误映射
//!
//! 映射器只决定错误类别并补充提示文本，原始错误始终作为 `cause` 保留。

use super::messages::Messages;
use super::{ErrorKind, TransferError};
use crate::model::Path;
use std::fmt;
use std::io;
use std::sync::Arc;

/// 把某一类后端错误转换为 [`TransferError`]
pub trait ErrorMapping<E> {
    fn messages(&self) -> &Messages;

    fn map(&self, failure: E) -> TransferError;

    /// 用本地化后的 `message` 替换提示文本，类别与原因不变
    fn map_with_message(&self, message: &str, failure: E) -> TransferError {
        let text = self.messages().localize(chomp(message));
        self.map(failure).with_message(text)
    }

    /// 提示文本形如 `无法创建 a.txt (/dir/a.txt)`，并记录出错文件
    fn map_for_file(&self, message: &str, failure: E, file: &Path) -> TransferError {
        let text = format!(
            "{} ({})",
            self.messages().format(chomp(message), &[file.name()]),
            file.absolute()
        );
        self.map(failure).with_message(text).with_file(file)
    }
}

fn chomp(message: &str) -> &str {
    message.trim_end_matches(['\r', '\n'])
}

fn summary(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::AccessDenied => "Access denied",
        ErrorKind::NotFound => "File not found",
        ErrorKind::InvalidName => "Invalid filename",
        _ => "Connection failed",
    }
}

/// 标准库 IO 错误
#[derive(Debug, Clone, Copy, Default)]
pub struct IoErrorMapping {
    messages: Messages,
}

impl IoErrorMapping {
    pub fn new(messages: Messages) -> Self {
        Self { messages }
    }
}

impl ErrorMapping<io::Error> for IoErrorMapping {
    fn messages(&self) -> &Messages {
        &self.messages
    }

    fn map(&self, failure: io::Error) -> TransferError {
        let kind = match failure.kind() {
            io::ErrorKind::NotFound => ErrorKind::NotFound,
            io::ErrorKind::PermissionDenied | io::ErrorKind::AlreadyExists => {
                ErrorKind::AccessDenied
            }
            io::ErrorKind::InvalidInput => ErrorKind::InvalidName,
            _ => ErrorKind::TransientIo,
        };
        TransferError::new(kind, self.messages.localize(summary(kind)))
            .with_detail(failure.to_string())
            .with_cause(failure)
    }
}

/// HTTP 类后端返回的失败状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpFailure {
    pub status: u16,
    pub reason: String,
}

impl HttpFailure {
    pub fn new(status: u16, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for HttpFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.status, self.reason)
    }
}

impl std::error::Error for HttpFailure {}

/// 按状态码分类
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpStatusMapping {
    messages: Messages,
}

impl HttpStatusMapping {
    pub fn new(messages: Messages) -> Self {
        Self { messages }
    }

    pub fn kind_of(status: u16) -> ErrorKind {
        match status {
            401 | 403 | 507 => ErrorKind::AccessDenied,
            404 | 409 | 410 => ErrorKind::NotFound,
            408 | 425 | 429 => ErrorKind::TransientIo,
            500..=599 if status != 501 => ErrorKind::TransientIo,
            _ => ErrorKind::Fatal,
        }
    }
}

impl ErrorMapping<HttpFailure> for HttpStatusMapping {
    fn messages(&self) -> &Messages {
        &self.messages
    }

    fn map(&self, failure: HttpFailure) -> TransferError {
        let kind = Self::kind_of(failure.status);
        TransferError::new(kind, self.messages.localize(summary(kind)))
            .with_detail(failure.to_string())
            .with_cause(failure)
    }
}

/// 不透明的后端错误
///
/// 错误链中已有 `TransferError` 或 `io::Error` 时沿用其类别，否则归为暂时性故障。
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyhowMapping {
    messages: Messages,
}

impl AnyhowMapping {
    pub fn new(messages: Messages) -> Self {
        Self { messages }
    }
}

impl ErrorMapping<anyhow::Error> for AnyhowMapping {
    fn messages(&self) -> &Messages {
        &self.messages
    }

    fn map(&self, failure: anyhow::Error) -> TransferError {
        let failure = match failure.downcast::<TransferError>() {
            Ok(err) => return err,
            Err(other) => other,
        };
        let failure = match failure.downcast::<io::Error>() {
            Ok(err) => return IoErrorMapping::new(self.messages).map(err),
            Err(other) => other,
        };
        let detail = format!("{:#}", failure);
        let cause: Box<dyn std::error::Error + Send + Sync + 'static> = failure.into();
        TransferError::transient(self.messages.localize("Connection failed"))
            .with_detail(detail)
            .with_shared_cause(Arc::from(cause))
    }
}
