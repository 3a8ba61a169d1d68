//! 能力注册表
//!
//! 会话建立时按能力类别登记一次实现，之后只读共享。按类别查找，能力缺失是正常情况。

use super::{Delete, Directory, IdProvider, ListService, Metadata, Move, ShareProvider, Touch};
use crate::error::{Messages, Result, TransferError};
use crate::model::Path;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// 能力类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    List,
    Touch,
    Directory,
    Move,
    Delete,
    Metadata,
    IdProvider,
    ShareProvider,
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// 某一类能力的具体实现
#[derive(Clone)]
pub enum Capability {
    List(Arc<dyn ListService>),
    Touch(Arc<dyn Touch>),
    Directory(Arc<dyn Directory>),
    Move(Arc<dyn Move>),
    Delete(Arc<dyn Delete>),
    Metadata(Arc<dyn Metadata>),
    IdProvider(Arc<dyn IdProvider>),
    ShareProvider(Arc<dyn ShareProvider>),
}

impl Capability {
    pub fn kind(&self) -> CapabilityKind {
        match self {
            Capability::List(_) => CapabilityKind::List,
            Capability::Touch(_) => CapabilityKind::Touch,
            Capability::Directory(_) => CapabilityKind::Directory,
            Capability::Move(_) => CapabilityKind::Move,
            Capability::Delete(_) => CapabilityKind::Delete,
            Capability::Metadata(_) => CapabilityKind::Metadata,
            Capability::IdProvider(_) => CapabilityKind::IdProvider,
            Capability::ShareProvider(_) => CapabilityKind::ShareProvider,
        }
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Capability::{}", self.kind())
    }
}

/// 类型化查找的标记
pub trait Feature {
    type Service: ?Sized + Send + Sync;
    const KIND: CapabilityKind;

    fn select(capability: &Capability) -> Option<Arc<Self::Service>>;
}

macro_rules! feature {
    ($marker:ident, $variant:ident, $service:ty) => {
        pub struct $marker;

        impl Feature for $marker {
            type Service = $service;
            const KIND: CapabilityKind = CapabilityKind::$variant;

            fn select(capability: &Capability) -> Option<Arc<$service>> {
                match capability {
                    Capability::$variant(service) => Some(service.clone()),
                    _ => None,
                }
            }
        }
    };
}

feature!(ListFeature, List, dyn ListService);
feature!(TouchFeature, Touch, dyn Touch);
feature!(DirectoryFeature, Directory, dyn Directory);
feature!(MoveFeature, Move, dyn Move);
feature!(DeleteFeature, Delete, dyn Delete);
feature!(MetadataFeature, Metadata, dyn Metadata);
feature!(IdFeature, IdProvider, dyn IdProvider);
feature!(ShareFeature, ShareProvider, dyn ShareProvider);

#[derive(Default)]
pub struct CapabilityRegistryBuilder {
    capabilities: HashMap<CapabilityKind, Capability>,
    messages: Messages,
}

impl CapabilityRegistryBuilder {
    /// 同类能力重复登记时后者覆盖前者
    pub fn register(mut self, capability: Capability) -> Self {
        let kind = capability.kind();
        if self.capabilities.insert(kind, capability).is_some() {
            warn!("能力 {} 重复注册，已覆盖", kind);
        }
        self
    }

    pub fn with_messages(mut self, messages: Messages) -> Self {
        self.messages = messages;
        self
    }

    pub fn build(self) -> CapabilityRegistry {
        CapabilityRegistry {
            capabilities: self.capabilities,
            messages: self.messages,
        }
    }
}

/// 会话的能力表，构建后不可变
pub struct CapabilityRegistry {
    capabilities: HashMap<CapabilityKind, Capability>,
    messages: Messages,
}

impl CapabilityRegistry {
    pub fn builder() -> CapabilityRegistryBuilder {
        CapabilityRegistryBuilder::default()
    }

    pub fn feature<F: Feature>(&self) -> Option<Arc<F::Service>> {
        self.capabilities.get(&F::KIND).and_then(F::select)
    }

    pub fn is_supported(&self, kind: CapabilityKind) -> bool {
        self.capabilities.contains_key(&kind)
    }

    /// 能力缺失时返回归属于 `file` 的 AccessDenied
    pub fn require<F: Feature>(&self, file: &Path) -> Result<Arc<F::Service>> {
        self.feature::<F>().ok_or_else(|| self.unsupported(file))
    }

    pub fn unsupported(&self, file: &Path) -> TransferError {
        TransferError::access_denied(
            self.messages
                .format("Unsupported operation for {0}", &[file.name()]),
        )
        .with_file(file)
    }

    pub fn kinds(&self) -> Vec<CapabilityKind> {
        let mut kinds: Vec<_> = self.capabilities.keys().copied().collect();
        kinds.sort_by_key(|k| *k as u8);
        kinds
    }

    pub fn messages(&self) -> &Messages {
        &self.messages
    }
}

impl fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
