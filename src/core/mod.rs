pub mod cache;
pub mod comparator;
pub mod conflict;
pub mod engine;
pub mod filter;
pub mod metadata;
pub mod symlink;
pub mod worker;

pub use cache::{CacheEvent, CacheStats, ListingCache, DEFAULT_CACHE_SIZE};
pub use comparator::{CompareConfig, FileComparator, FileRelation, Snapshot};
pub use conflict::{alternate_name, displaced_name, find_alternate, find_displaced, ConflictSide};
pub use engine::{
    ExcludeRules, PlanConfig, PlanEvent, PlanSummary, PlannedTransfer, TransferPlan,
    TransferPlanner,
};
pub use filter::{
    BatchMode, FilterOutcome, FilterPipeline, FilterState, TransferAction, TransferDirection,
    TransferFilter, TransferItem,
};
pub use metadata::{reconcile, MetadataOutcome, MetadataReconciler, MetadataUpdate, MetadataValue};
pub use symlink::{relativize, SymlinkDecision, SymlinkPolicy, SymlinkResolver};
pub use worker::WorkerPool;
