//! 值类型：远程条目、本地文件、目录快照与传输状态

pub mod list;
pub mod local;
pub mod path;
pub mod status;

pub use list::AttributedList;
pub use local::Local;
pub use path::{normalize, Attributes, Path, PathType, Permission, Reference, SessionId};
pub use status::{Checksum, HashAlgorithm, RenameTarget, TransferStatus};
