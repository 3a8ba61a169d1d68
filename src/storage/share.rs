//! 共享链接

use super::ShareProvider;
use crate::error::{Messages, Result, TransferError};
use crate::model::Path;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// 共享密码最短长度
pub const DEFAULT_MIN_PASSWORD_LENGTH: usize = 10;

const SHARE_ROOT_FORBIDDEN: &str = "Forbidden. You cannot share your root folder. Please contact your web hosting service provider for assistance.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShareKind {
    Download,
    Upload,
}

/// 向用户索取共享密码，返回 `None` 表示不设密码
pub trait PasswordCallback: Send + Sync {
    fn prompt(&self, file: &Path) -> Option<String>;
}

pub struct NoPassword;

impl PasswordCallback for NoPassword {
    fn prompt(&self, _file: &Path) -> Option<String> {
        None
    }
}

/// 已确定的密码，避免重复询问
pub struct StaticPassword(pub Option<String>);

impl PasswordCallback for StaticPassword {
    fn prompt(&self, _file: &Path) -> Option<String> {
        self.0.clone()
    }
}

/// 带说明的链接
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptiveUrl {
    pub url: String,
    pub help: String,
    pub expiry: Option<DateTime<Utc>>,
}

impl DescriptiveUrl {
    pub fn new(url: impl Into<String>, help: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            help: help.into(),
            expiry: None,
        }
    }

    pub fn with_expiry(mut self, expiry: Option<DateTime<Utc>>) -> Self {
        self.expiry = expiry;
        self
    }

    /// `base` 拼接逐段编码后的绝对路径
    pub fn encode(base: &str, file: &Path) -> String {
        let encoded: Vec<String> = file
            .absolute()
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        format!("{}{}", base.trim_end_matches('/'), encoded.join("/"))
    }
}

/// 共享策略：禁止共享根目录，密码不得短于 `min_password_length`
pub struct PolicyShareProvider<P> {
    inner: P,
    min_password_length: usize,
    messages: Messages,
}

impl<P: ShareProvider> PolicyShareProvider<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            min_password_length: DEFAULT_MIN_PASSWORD_LENGTH,
            messages: Messages::default(),
        }
    }

    pub fn with_min_password_length(mut self, length: usize) -> Self {
        self.min_password_length = length;
        self
    }

    pub fn with_messages(mut self, messages: Messages) -> Self {
        self.messages = messages;
        self
    }

    fn forbidden(&self, file: &Path, detail: String) -> TransferError {
        warn!("拒绝共享 {}: {}", file, detail);
        TransferError::access_denied(self.messages.format("Cannot share {0}", &[file.name()]))
            .with_detail(detail)
            .with_file(file)
    }

    /// 校验通过后返回确定的密码
    fn check(&self, file: &Path, password: &dyn PasswordCallback) -> Result<StaticPassword> {
        if file.is_root() {
            return Err(self.forbidden(file, SHARE_ROOT_FORBIDDEN.to_string()));
        }
        let password = password.prompt(file);
        if let Some(p) = &password {
            if p.chars().count() < self.min_password_length {
                return Err(self.forbidden(
                    file,
                    format!(
                        "Forbidden. Password needs to be at least {} characters long. Please contact your web hosting service provider for assistance.",
                        self.min_password_length
                    ),
                ));
            }
        }
        Ok(StaticPassword(password))
    }
}

#[async_trait]
impl<P: ShareProvider> ShareProvider for PolicyShareProvider<P> {
    fn is_supported(&self, file: &Path, kind: ShareKind) -> bool {
        !file.is_root() && self.inner.is_supported(file, kind)
    }

    async fn to_download_url(
        &self,
        file: &Path,
        expiry: Option<DateTime<Utc>>,
        password: &dyn PasswordCallback,
    ) -> Result<DescriptiveUrl> {
        let password = self.check(file, password)?;
        self.inner.to_download_url(file, expiry, &password).await
    }

    async fn to_upload_url(
        &self,
        file: &Path,
        expiry: Option<DateTime<Utc>>,
        password: &dyn PasswordCallback,
    ) -> Result<DescriptiveUrl> {
        let password = self.check(file, password)?;
        self.inner.to_upload_url(file, expiry, &password).await
    }
}
