// Client Net Worth - Core Library
// Ownership validation, attribution, aggregation, snapshots and guarded writes.
// Exposes all modules for use in the CLI, the API server and tests.

pub mod error;
pub mod entities;
pub mod ownership;
pub mod attribution;
pub mod item;
pub mod adapters;
pub mod aggregation;
pub mod snapshot;
pub mod concurrency;
pub mod db;
pub mod config;
pub mod logging;

// Re-export commonly used types
pub use error::{OwnershipError, SnapshotError, WriteError};
pub use entities::{Owner, OwnerColumn, OwnerId, OwnerSet};
pub use ownership::{validate, AssociationType, Ownership, OwnershipRecord, OwnershipValidator};
pub use attribution::{Attribution, AttributionEngine};
pub use item::{ItemRef, ItemSide, ItemSource, MalformedItem, MonetaryItem, Valued};
pub use adapters::{
    default_adapters, InformationItem, InformationItemsAdapter, SharedConnection,
    SimpleHolding, SimpleHoldingsAdapter, SourceAdapter, TrackedHolding, TrackedHoldingsAdapter,
};
pub use aggregation::{
    AggregationEngine, AggregationIssue, ColumnTotals, IssueKind, MatrixRow, NetWorthMatrix, Section,
};
pub use snapshot::{
    MemorySnapshotStore, NetWorthSnapshot, SnapshotService, SnapshotStore, SnapshotSummary,
    SqliteSnapshotStore,
};
pub use concurrency::{
    detect_conflict, ConcurrencyGuard, ConflictCheck, ConflictDetails, EditLock, LockManager,
    LockOutcome, VersionStamp,
};
pub use db::{
    Event, ImportStats,
    open_database, setup_database, insert_owner, get_owners,
    insert_event, get_events_for_entity, import_simple_holdings_csv,
};
pub use config::AppConfig;
pub use logging::{init_logging, LogConfig, LogFormat};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
