// 📸 Snapshot Service - immutable point-in-time net-worth captures
//
// A snapshot copies the whole matrix (owner columns, category labels, every
// row) by value, so it reads the same after live items or owners change.
// Stores are append-only: there is no update or delete anywhere in this API,
// and every fetch re-checks the SHA-256 content hash taken at capture time.

use crate::adapters::{lock_connection, SharedConnection};
use crate::aggregation::{AggregationEngine, NetWorthMatrix};
use crate::db::{self, Event, SnapshotRow};
use crate::entities::{Owner, OwnerColumn};
use crate::error::SnapshotError;
use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::str::FromStr;
use std::sync::RwLock;
use tracing::{info, warn};

// ============================================================================
// SNAPSHOT TYPES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetWorthSnapshot {
    pub id: String,
    pub client_id: String,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub label: Option<String>,
    pub as_of: NaiveDate,

    /// Owners included at capture time, in column order
    pub owner_set: Vec<OwnerColumn>,

    pub matrix: NetWorthMatrix,
    pub total_assets: Decimal,
    pub total_liabilities: Decimal,
    pub net_worth: Decimal,

    /// SHA-256 over every other field
    pub content_hash: String,
}

/// Hashed view of a snapshot: everything except the hash itself
#[derive(Serialize)]
struct SnapshotContent<'a> {
    id: &'a str,
    client_id: &'a str,
    created_at: &'a DateTime<Utc>,
    created_by: &'a str,
    label: &'a Option<String>,
    as_of: &'a NaiveDate,
    owner_set: &'a [OwnerColumn],
    matrix: &'a NetWorthMatrix,
    total_assets: &'a Decimal,
    total_liabilities: &'a Decimal,
    net_worth: &'a Decimal,
}

impl NetWorthSnapshot {
    pub fn capture(
        matrix: NetWorthMatrix,
        created_by: &str,
        label: Option<&str>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let mut snapshot = NetWorthSnapshot {
            id: uuid::Uuid::new_v4().to_string(),
            client_id: matrix.client_id.clone(),
            created_at,
            created_by: created_by.to_string(),
            label: label.map(String::from),
            as_of: matrix.as_of,
            owner_set: matrix.owners.clone(),
            total_assets: matrix.total_assets,
            total_liabilities: matrix.total_liabilities,
            net_worth: matrix.net_worth,
            matrix,
            content_hash: String::new(),
        };
        snapshot.content_hash = snapshot.compute_hash();
        snapshot
    }

    pub fn compute_hash(&self) -> String {
        let content = SnapshotContent {
            id: &self.id,
            client_id: &self.client_id,
            created_at: &self.created_at,
            created_by: &self.created_by,
            label: &self.label,
            as_of: &self.as_of,
            owner_set: &self.owner_set,
            matrix: &self.matrix,
            total_assets: &self.total_assets,
            total_liabilities: &self.total_liabilities,
            net_worth: &self.net_worth,
        };

        // Struct fields and BTreeMaps serialize in a fixed order
        let canonical = serde_json::to_string(&content).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn verify(&self) -> bool {
        self.compute_hash() == self.content_hash
    }

    pub fn summary(&self) -> SnapshotSummary {
        SnapshotSummary {
            id: self.id.clone(),
            client_id: self.client_id.clone(),
            created_at: self.created_at,
            created_by: self.created_by.clone(),
            label: self.label.clone(),
            as_of: self.as_of,
            total_assets: self.total_assets,
            total_liabilities: self.total_liabilities,
            net_worth: self.net_worth,
        }
    }
}

/// List entry: id, timestamp and headline totals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotSummary {
    pub id: String,
    pub client_id: String,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub label: Option<String>,
    pub as_of: NaiveDate,
    pub total_assets: Decimal,
    pub total_liabilities: Decimal,
    pub net_worth: Decimal,
}

// ============================================================================
// STORES
// ============================================================================

/// Append-only snapshot storage
pub trait SnapshotStore: Send + Sync {
    /// Fails with `Immutable` when a snapshot with the same id exists.
    fn insert(&self, snapshot: &NetWorthSnapshot) -> Result<(), SnapshotError>;

    fn get(&self, id: &str) -> Result<NetWorthSnapshot, SnapshotError>;

    /// Newest first
    fn list(&self, client_id: &str) -> Result<Vec<SnapshotSummary>, SnapshotError>;
}

fn verified(snapshot: NetWorthSnapshot, stored_hash: &str) -> Result<NetWorthSnapshot, SnapshotError> {
    if snapshot.content_hash != stored_hash || !snapshot.verify() {
        warn!(id = %snapshot.id, "snapshot content hash mismatch");
        return Err(SnapshotError::IntegrityMismatch(snapshot.id));
    }
    Ok(snapshot)
}

pub struct SqliteSnapshotStore {
    db: SharedConnection,
}

impl SqliteSnapshotStore {
    pub fn new(db: SharedConnection) -> Self {
        SqliteSnapshotStore { db }
    }
}

fn parse_stored_decimal(text: &str) -> anyhow::Result<Decimal> {
    Decimal::from_str(text).with_context(|| format!("stored amount `{}` is not a decimal", text))
}

impl SnapshotStore for SqliteSnapshotStore {
    fn insert(&self, snapshot: &NetWorthSnapshot) -> Result<(), SnapshotError> {
        let payload = serde_json::to_string(snapshot).context("Failed to serialize snapshot")?;
        let row = SnapshotRow {
            id: snapshot.id.clone(),
            client_id: snapshot.client_id.clone(),
            as_of_date: snapshot.as_of.format("%Y-%m-%d").to_string(),
            created_at: snapshot.created_at,
            created_by: snapshot.created_by.clone(),
            label: snapshot.label.clone(),
            total_assets: snapshot.total_assets.to_string(),
            total_liabilities: snapshot.total_liabilities.to_string(),
            net_worth: snapshot.net_worth.to_string(),
            content_hash: snapshot.content_hash.clone(),
            payload,
        };

        let mut conn = lock_connection(&self.db)?;
        let tx = conn.transaction().context("Failed to start snapshot transaction")?;

        if !db::insert_snapshot(&tx, &row)? {
            return Err(SnapshotError::Immutable(snapshot.id.clone()));
        }

        db::insert_event(
            &tx,
            &Event::new(
                "snapshot_created",
                "snapshot",
                &snapshot.id,
                serde_json::json!({
                    "client_id": snapshot.client_id,
                    "as_of": snapshot.as_of,
                    "net_worth": snapshot.net_worth,
                    "excluded_items": snapshot.matrix.excluded_count(),
                    "content_hash": snapshot.content_hash,
                }),
                &snapshot.created_by,
            ),
        )?;

        tx.commit().context("Failed to commit snapshot")?;
        Ok(())
    }

    fn get(&self, id: &str) -> Result<NetWorthSnapshot, SnapshotError> {
        let row = {
            let conn = lock_connection(&self.db)?;
            db::get_snapshot(&conn, id)?
        };
        let row = row.ok_or_else(|| SnapshotError::NotFound(id.to_string()))?;

        let snapshot: NetWorthSnapshot = serde_json::from_str(&row.payload)
            .with_context(|| format!("Failed to decode snapshot {}", id))?;
        verified(snapshot, &row.content_hash)
    }

    fn list(&self, client_id: &str) -> Result<Vec<SnapshotSummary>, SnapshotError> {
        let rows = {
            let conn = lock_connection(&self.db)?;
            db::list_snapshots(&conn, client_id)?
        };

        let summaries = rows
            .into_iter()
            .map(|row| -> anyhow::Result<SnapshotSummary> {
                Ok(SnapshotSummary {
                    as_of: NaiveDate::parse_from_str(&row.as_of_date, "%Y-%m-%d")
                        .with_context(|| format!("snapshot {} has a bad as-of date", row.id))?,
                    total_assets: parse_stored_decimal(&row.total_assets)?,
                    total_liabilities: parse_stored_decimal(&row.total_liabilities)?,
                    net_worth: parse_stored_decimal(&row.net_worth)?,
                    id: row.id,
                    client_id: row.client_id,
                    created_at: row.created_at,
                    created_by: row.created_by,
                    label: row.label,
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(summaries)
    }
}

/// Process-local store (tests, dry runs)
#[derive(Default)]
pub struct MemorySnapshotStore {
    snapshots: RwLock<Vec<NetWorthSnapshot>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn insert(&self, snapshot: &NetWorthSnapshot) -> Result<(), SnapshotError> {
        let mut snapshots = self.snapshots.write().unwrap_or_else(|e| e.into_inner());
        if snapshots.iter().any(|s| s.id == snapshot.id) {
            return Err(SnapshotError::Immutable(snapshot.id.clone()));
        }
        snapshots.push(snapshot.clone());
        Ok(())
    }

    fn get(&self, id: &str) -> Result<NetWorthSnapshot, SnapshotError> {
        let snapshots = self.snapshots.read().unwrap_or_else(|e| e.into_inner());
        let snapshot = snapshots
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or_else(|| SnapshotError::NotFound(id.to_string()))?;
        let hash = snapshot.content_hash.clone();
        verified(snapshot, &hash)
    }

    fn list(&self, client_id: &str) -> Result<Vec<SnapshotSummary>, SnapshotError> {
        let snapshots = self.snapshots.read().unwrap_or_else(|e| e.into_inner());
        let mut summaries: Vec<SnapshotSummary> = snapshots
            .iter()
            .rev()
            .filter(|s| s.client_id == client_id)
            .map(NetWorthSnapshot::summary)
            .collect();
        // Stable sort keeps later inserts first among equal timestamps
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(summaries)
    }
}

// ============================================================================
// SNAPSHOT SERVICE
// ============================================================================

pub struct SnapshotService {
    engine: AggregationEngine,
    store: Box<dyn SnapshotStore>,
}

impl SnapshotService {
    pub fn new(engine: AggregationEngine, store: Box<dyn SnapshotStore>) -> Self {
        SnapshotService { engine, store }
    }

    /// Service over one SQLite database for both items and snapshots
    pub fn with_database(db: SharedConnection) -> Self {
        Self::new(
            AggregationEngine::with_database(db.clone()),
            Box::new(SqliteSnapshotStore::new(db)),
        )
    }

    pub fn engine(&self) -> &AggregationEngine {
        &self.engine
    }

    /// Aggregate once as of today and persist the result.
    ///
    /// Every call creates a new snapshot, even for identical inputs.
    pub fn create_snapshot(
        &self,
        client_id: &str,
        owners: &[Owner],
        created_by: &str,
        label: Option<&str>,
    ) -> Result<NetWorthSnapshot, SnapshotError> {
        let now = Utc::now();
        self.create_snapshot_as_of(client_id, owners, created_by, label, now.date_naive(), now)
    }

    pub fn create_snapshot_as_of(
        &self,
        client_id: &str,
        owners: &[Owner],
        created_by: &str,
        label: Option<&str>,
        as_of: NaiveDate,
        created_at: DateTime<Utc>,
    ) -> Result<NetWorthSnapshot, SnapshotError> {
        let matrix = self.engine.aggregate(client_id, owners, as_of)?;
        let snapshot = NetWorthSnapshot::capture(matrix, created_by, label, created_at);

        self.store.insert(&snapshot)?;

        info!(
            id = %snapshot.id,
            client_id,
            net_worth = %snapshot.net_worth,
            excluded = snapshot.matrix.excluded_count(),
            "snapshot created"
        );
        Ok(snapshot)
    }

    pub fn get_snapshot(&self, id: &str) -> Result<NetWorthSnapshot, SnapshotError> {
        self.store.get(id)
    }

    pub fn list_snapshots(&self, client_id: &str) -> Result<Vec<SnapshotSummary>, SnapshotError> {
        self.store.list(client_id)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::SimpleHolding;
    use crate::item::{ItemRef, ItemSide, ItemSource};
    use crate::ownership::OwnershipRecord;
    use rusqlite::Connection;
    use rust_decimal_macros::dec;
    use std::sync::{Arc, Mutex};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn owners() -> Vec<Owner> {
        vec![
            Owner::new("a", "client-1", "Alan", date(2012, 3, 1)),
            Owner::new("b", "client-1", "Bea", date(2018, 6, 1)),
        ]
    }

    fn create_test_db() -> SharedConnection {
        let conn = Connection::open_in_memory().unwrap();
        db::setup_database(&conn).unwrap();
        db::insert_simple_holding(
            &conn,
            &SimpleHolding::new(
                "sh-1",
                "client-1",
                "Family home",
                "Property",
                ItemSide::Asset,
                dec!(450000),
                date(2025, 1, 1),
                &OwnershipRecord::tenants_in_common([("a", dec!(50)), ("b", dec!(50))]),
            ),
        )
        .unwrap();
        db::insert_simple_holding(
            &conn,
            &SimpleHolding::new(
                "sh-2",
                "client-1",
                "Mortgage",
                "Mortgages",
                ItemSide::Liability,
                dec!(150000),
                date(2025, 1, 1),
                &OwnershipRecord::joint(["a", "b"]),
            ),
        )
        .unwrap();
        Arc::new(Mutex::new(conn))
    }

    #[test]
    fn test_snapshot_survives_live_edits() {
        let db = create_test_db();
        let service = SnapshotService::with_database(db.clone());

        let snapshot = service
            .create_snapshot("client-1", &owners(), "adviser", Some("annual review"))
            .unwrap();
        assert_eq!(snapshot.net_worth, dec!(300000.00));
        assert!(snapshot.verify());

        {
            let conn = db.lock().unwrap();
            db::update_simple_holding_value(&conn, "sh-1", dec!(1), "adviser").unwrap();
            db::delete_item(&conn, &ItemRef::new(ItemSource::SimpleHolding, "sh-2")).unwrap();
        }

        let fetched = service.get_snapshot(&snapshot.id).unwrap();
        assert_eq!(fetched, snapshot);
        assert_eq!(fetched.matrix.assets[0].rows[0].value, dec!(450000.00));

        let live = service
            .engine()
            .aggregate("client-1", &owners(), Utc::now().date_naive())
            .unwrap();
        assert_eq!(live.net_worth, dec!(1.00));
    }

    #[test]
    fn test_each_call_creates_a_new_snapshot() {
        let service = SnapshotService::with_database(create_test_db());

        let first = service.create_snapshot("client-1", &owners(), "adviser", None).unwrap();
        let second = service.create_snapshot("client-1", &owners(), "adviser", None).unwrap();
        assert_ne!(first.id, second.id);

        let listed = service.list_snapshots("client-1").unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, second.id);
        assert_eq!(listed[1].net_worth, dec!(300000.00));
    }

    #[test]
    fn test_missing_snapshot_is_not_found() {
        let service = SnapshotService::with_database(create_test_db());
        assert!(matches!(
            service.get_snapshot("nope"),
            Err(SnapshotError::NotFound(id)) if id == "nope"
        ));
    }

    #[test]
    fn test_duplicate_insert_is_immutable() {
        let db = create_test_db();
        let service = SnapshotService::with_database(db.clone());
        let snapshot = service.create_snapshot("client-1", &owners(), "adviser", None).unwrap();

        let store = SqliteSnapshotStore::new(db);
        let mut tampered = snapshot.clone();
        tampered.net_worth = dec!(0);
        assert!(matches!(store.insert(&tampered), Err(SnapshotError::Immutable(_))));
        assert_eq!(store.get(&snapshot.id).unwrap().net_worth, dec!(300000.00));
    }

    #[test]
    fn test_creation_is_audited() {
        let db = create_test_db();
        let service = SnapshotService::with_database(db.clone());
        let snapshot = service.create_snapshot("client-1", &owners(), "adviser", None).unwrap();

        let conn = db.lock().unwrap();
        let events = db::get_events_for_entity(&conn, "snapshot", &snapshot.id).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "snapshot_created");
        assert_eq!(events[0].actor, "adviser");
    }

    #[test]
    fn test_memory_store_checks_integrity() {
        let db = create_test_db();
        let engine = AggregationEngine::with_database(db);
        let matrix = engine.aggregate("client-1", &owners(), date(2025, 6, 30)).unwrap();

        let mut snapshot = NetWorthSnapshot::capture(matrix, "adviser", None, Utc::now());
        let store = MemorySnapshotStore::new();
        store.insert(&snapshot).unwrap();
        assert!(store.get(&snapshot.id).is_ok());

        snapshot.net_worth = dec!(1);
        assert!(!snapshot.verify());
        assert!(matches!(
            verified(snapshot.clone(), &snapshot.content_hash.clone()),
            Err(SnapshotError::IntegrityMismatch(_))
        ));
    }
}
