use crate::adapters::information::InformationItem;
use crate::adapters::simple::{self, SimpleHolding, SimpleOwnership};
use crate::adapters::tracked::{self, TrackedHolding};
use crate::concurrency::VersionStamp;
use crate::entities::Owner;
use crate::item::{ItemRef, ItemSource};
use crate::ownership::OwnershipRecord;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

/// Event for audit trail
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

/// Fixed-width timestamps so text ordering matches time ordering
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(idx: usize, text: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Open (or create) the database file and make sure the schema exists
pub fn open_database(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    setup_database(&conn)?;
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Owners (read-only for the core, maintained by client management)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS owners (
            id TEXT PRIMARY KEY,
            client_id TEXT NOT NULL,
            display_name TEXT NOT NULL,
            inception_date TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Item tables - ownership is a JSON sub-document on each row
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS tracked_holdings (
            id TEXT PRIMARY KEY,
            client_id TEXT NOT NULL,
            product_name TEXT NOT NULL,
            provider TEXT NOT NULL,
            product_type TEXT NOT NULL,
            units TEXT NOT NULL,
            unit_price TEXT NOT NULL,
            valuation_date TEXT NOT NULL,
            ownership TEXT,
            version INTEGER NOT NULL DEFAULT 1,
            updated_by TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS simple_holdings (
            id TEXT PRIMARY KEY,
            client_id TEXT NOT NULL,
            name TEXT NOT NULL,
            category TEXT NOT NULL,
            side TEXT NOT NULL,
            value TEXT NOT NULL,
            as_of_date TEXT NOT NULL,
            ownership TEXT,
            version INTEGER NOT NULL DEFAULT 1,
            updated_by TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS information_items (
            id TEXT PRIMARY KEY,
            client_id TEXT NOT NULL,
            item_type TEXT NOT NULL,
            title TEXT NOT NULL,
            data TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 1,
            updated_by TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Snapshots (append-only)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS snapshots (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT UNIQUE NOT NULL,
            client_id TEXT NOT NULL,
            as_of_date TEXT NOT NULL,
            created_at TEXT NOT NULL,
            created_by TEXT NOT NULL,
            label TEXT,
            total_assets TEXT NOT NULL,
            total_liabilities TEXT NOT NULL,
            net_worth TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            payload TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute_batch(
        "CREATE TRIGGER IF NOT EXISTS snapshots_no_update
         BEFORE UPDATE ON snapshots
         BEGIN
             SELECT RAISE(ABORT, 'snapshots are immutable');
         END;
         CREATE TRIGGER IF NOT EXISTS snapshots_no_delete
         BEFORE DELETE ON snapshots
         BEGIN
             SELECT RAISE(ABORT, 'snapshots are immutable');
         END;",
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_owners_client ON owners(client_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tracked_client ON tracked_holdings(client_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_simple_client ON simple_holdings(client_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_information_client ON information_items(client_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_snapshots_client ON snapshots(client_id, created_at)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// OWNERS
// ============================================================================

pub fn insert_owner(conn: &Connection, owner: &Owner) -> Result<()> {
    conn.execute(
        "INSERT INTO owners (id, client_id, display_name, inception_date)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            owner.id,
            owner.client_id,
            owner.display_name,
            owner.inception_date.format("%Y-%m-%d").to_string(),
        ],
    )
    .with_context(|| format!("Failed to insert owner {}", owner.id))?;

    Ok(())
}

pub fn get_owners(conn: &Connection, client_id: &str) -> Result<Vec<Owner>> {
    let mut stmt = conn.prepare(
        "SELECT id, client_id, display_name, inception_date
         FROM owners
         WHERE client_id = ?1
         ORDER BY inception_date, id",
    )?;

    let owners = stmt
        .query_map(params![client_id], |row| {
            let date_str: String = row.get(3)?;
            let inception_date = NaiveDate::parse_from_str(&date_str, "%Y-%m-%d")
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;

            Ok(Owner {
                id: row.get(0)?,
                client_id: row.get(1)?,
                display_name: row.get(2)?,
                inception_date,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(owners)
}

// ============================================================================
// TRACKED HOLDINGS
// ============================================================================

pub fn insert_tracked_holding(conn: &Connection, holding: &TrackedHolding) -> Result<()> {
    conn.execute(
        "INSERT INTO tracked_holdings (
            id, client_id, product_name, provider, product_type,
            units, unit_price, valuation_date, ownership,
            version, updated_by, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            holding.id,
            holding.client_id,
            holding.product_name,
            holding.provider,
            holding.product_type,
            holding.units,
            holding.unit_price,
            holding.valuation_date,
            holding.ownership,
            holding.version,
            holding.updated_by,
            format_timestamp(&holding.updated_at),
        ],
    )
    .with_context(|| format!("Failed to insert tracked holding {}", holding.id))?;

    Ok(())
}

pub fn get_tracked_holdings(conn: &Connection, client_id: &str) -> Result<Vec<TrackedHolding>> {
    let mut stmt = conn.prepare(
        "SELECT id, client_id, product_name, provider, product_type,
                units, unit_price, valuation_date, ownership,
                version, updated_by, updated_at
         FROM tracked_holdings
         WHERE client_id = ?1
         ORDER BY id",
    )?;

    let holdings = stmt
        .query_map(params![client_id], |row| {
            let updated_at: String = row.get(11)?;

            Ok(TrackedHolding {
                id: row.get(0)?,
                client_id: row.get(1)?,
                product_name: row.get(2)?,
                provider: row.get(3)?,
                product_type: row.get(4)?,
                units: row.get(5)?,
                unit_price: row.get(6)?,
                valuation_date: row.get(7)?,
                ownership: row.get(8)?,
                version: row.get(9)?,
                updated_by: row.get(10)?,
                updated_at: parse_timestamp(11, &updated_at)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to read tracked holdings")?;

    Ok(holdings)
}

// ============================================================================
// SIMPLE HOLDINGS
// ============================================================================

pub fn insert_simple_holding(conn: &Connection, holding: &SimpleHolding) -> Result<()> {
    conn.execute(
        "INSERT INTO simple_holdings (
            id, client_id, name, category, side, value, as_of_date,
            ownership, version, updated_by, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            holding.id,
            holding.client_id,
            holding.name,
            holding.category,
            holding.side,
            holding.value,
            holding.as_of_date,
            holding.ownership,
            holding.version,
            holding.updated_by,
            format_timestamp(&holding.updated_at),
        ],
    )
    .with_context(|| format!("Failed to insert simple holding {}", holding.id))?;

    Ok(())
}

pub fn get_simple_holdings(conn: &Connection, client_id: &str) -> Result<Vec<SimpleHolding>> {
    let mut stmt = conn.prepare(
        "SELECT id, client_id, name, category, side, value, as_of_date,
                ownership, version, updated_by, updated_at
         FROM simple_holdings
         WHERE client_id = ?1
         ORDER BY id",
    )?;

    let holdings = stmt
        .query_map(params![client_id], |row| {
            let updated_at: String = row.get(10)?;

            Ok(SimpleHolding {
                id: row.get(0)?,
                client_id: row.get(1)?,
                name: row.get(2)?,
                category: row.get(3)?,
                side: row.get(4)?,
                value: row.get(5)?,
                as_of_date: row.get(6)?,
                ownership: row.get(7)?,
                version: row.get(8)?,
                updated_by: row.get(9)?,
                updated_at: parse_timestamp(10, &updated_at)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to read simple holdings")?;

    Ok(holdings)
}

/// Direct value edit, used by CRUD flows outside the guarded ownership path
pub fn update_simple_holding_value(
    conn: &Connection,
    id: &str,
    value: Decimal,
    writer: &str,
) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE simple_holdings
         SET value = ?1, version = version + 1, updated_by = ?2, updated_at = ?3
         WHERE id = ?4",
        params![value.to_string(), writer, format_timestamp(&Utc::now()), id],
    )?;

    Ok(changed == 1)
}

// ============================================================================
// INFORMATION ITEMS
// ============================================================================

pub fn insert_information_item(conn: &Connection, item: &InformationItem) -> Result<()> {
    conn.execute(
        "INSERT INTO information_items (
            id, client_id, item_type, title, data, version, updated_by, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            item.id,
            item.client_id,
            item.item_type,
            item.title,
            item.data,
            item.version,
            item.updated_by,
            format_timestamp(&item.updated_at),
        ],
    )
    .with_context(|| format!("Failed to insert information item {}", item.id))?;

    Ok(())
}

fn information_item_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<InformationItem> {
    let updated_at: String = row.get(7)?;

    Ok(InformationItem {
        id: row.get(0)?,
        client_id: row.get(1)?,
        item_type: row.get(2)?,
        title: row.get(3)?,
        data: row.get(4)?,
        version: row.get(5)?,
        updated_by: row.get(6)?,
        updated_at: parse_timestamp(7, &updated_at)?,
    })
}

pub fn get_information_items(conn: &Connection, client_id: &str) -> Result<Vec<InformationItem>> {
    let mut stmt = conn.prepare(
        "SELECT id, client_id, item_type, title, data, version, updated_by, updated_at
         FROM information_items
         WHERE client_id = ?1
         ORDER BY id",
    )?;

    let items = stmt
        .query_map(params![client_id], information_item_from_row)?
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to read information items")?;

    Ok(items)
}

pub fn get_information_item(conn: &Connection, id: &str) -> Result<Option<InformationItem>> {
    let item = conn
        .query_row(
            "SELECT id, client_id, item_type, title, data, version, updated_by, updated_at
             FROM information_items
             WHERE id = ?1",
            params![id],
            information_item_from_row,
        )
        .optional()?;

    Ok(item)
}

// ============================================================================
// ITEM VERSIONS & OWNERSHIP WRITES
// ============================================================================

fn item_table(source: ItemSource) -> &'static str {
    match source {
        ItemSource::TrackedHolding => "tracked_holdings",
        ItemSource::SimpleHolding => "simple_holdings",
        ItemSource::InformationItem => "information_items",
    }
}

/// Current version stamp of an item, `None` when it does not exist
pub fn get_item_version(conn: &Connection, item: &ItemRef) -> Result<Option<VersionStamp>> {
    let sql = format!(
        "SELECT version, updated_by, updated_at FROM {} WHERE id = ?1",
        item_table(item.source)
    );

    let stamp = conn
        .query_row(&sql, params![item.item_id], |row| {
            let updated_at: String = row.get(2)?;
            Ok(VersionStamp {
                version: row.get(0)?,
                written_by: row.get(1)?,
                written_at: parse_timestamp(2, &updated_at)?,
            })
        })
        .optional()?;

    Ok(stamp)
}

/// Client relationship an item belongs to
pub fn get_item_client_id(conn: &Connection, item: &ItemRef) -> Result<Option<String>> {
    let sql = format!("SELECT client_id FROM {} WHERE id = ?1", item_table(item.source));
    let client_id = conn
        .query_row(&sql, params![item.item_id], |row| row.get(0))
        .optional()?;
    Ok(client_id)
}

/// Compare-and-swap ownership write.
///
/// The record is stored in the item's native shape. Returns the new version
/// stamp, or `None` when the stored version is no longer `base_version`.
pub fn update_item_ownership(
    conn: &Connection,
    item: &ItemRef,
    record: &OwnershipRecord,
    base_version: i64,
    writer: &str,
) -> Result<Option<VersionStamp>> {
    let written_at = Utc::now();
    let stamp = format_timestamp(&written_at);

    let changed = match item.source {
        ItemSource::TrackedHolding => conn.execute(
            "UPDATE tracked_holdings
             SET ownership = ?1, version = version + 1, updated_by = ?2, updated_at = ?3
             WHERE id = ?4 AND version = ?5",
            params![
                tracked::ownership_document(record).to_string(),
                writer,
                stamp,
                item.item_id,
                base_version,
            ],
        )?,
        ItemSource::SimpleHolding => conn.execute(
            "UPDATE simple_holdings
             SET ownership = ?1, version = version + 1, updated_by = ?2, updated_at = ?3
             WHERE id = ?4 AND version = ?5",
            params![
                simple::ownership_document(record).to_string(),
                writer,
                stamp,
                item.item_id,
                base_version,
            ],
        )?,
        ItemSource::InformationItem => {
            let current = match get_information_item(conn, &item.item_id)? {
                Some(current) => current,
                None => return Ok(None),
            };
            conn.execute(
                "UPDATE information_items
                 SET data = ?1, version = version + 1, updated_by = ?2, updated_at = ?3
                 WHERE id = ?4 AND version = ?5",
                params![
                    current.with_ownership(record)?,
                    writer,
                    stamp,
                    item.item_id,
                    base_version,
                ],
            )?
        }
    };

    if changed == 0 {
        debug!(item = %item, base_version, "ownership write lost compare-and-swap");
        return Ok(None);
    }

    Ok(get_item_version(conn, item)?)
}

pub fn delete_item(conn: &Connection, item: &ItemRef) -> Result<bool> {
    let sql = format!("DELETE FROM {} WHERE id = ?1", item_table(item.source));
    let changed = conn.execute(&sql, params![item.item_id])?;
    Ok(changed == 1)
}

// ============================================================================
// SNAPSHOTS
// ============================================================================

/// A snapshot as stored: summary columns plus the canonical JSON payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRow {
    pub id: String,
    pub client_id: String,
    pub as_of_date: String,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub label: Option<String>,
    pub total_assets: String,
    pub total_liabilities: String,
    pub net_worth: String,
    pub content_hash: String,
    pub payload: String,
}

/// Append a snapshot. Returns `false` when the id is already taken.
pub fn insert_snapshot(conn: &Connection, row: &SnapshotRow) -> Result<bool> {
    let result = conn.execute(
        "INSERT INTO snapshots (
            id, client_id, as_of_date, created_at, created_by, label,
            total_assets, total_liabilities, net_worth, content_hash, payload
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            row.id,
            row.client_id,
            row.as_of_date,
            format_timestamp(&row.created_at),
            row.created_by,
            row.label,
            row.total_assets,
            row.total_liabilities,
            row.net_worth,
            row.content_hash,
            row.payload,
        ],
    );

    match result {
        Ok(_) => Ok(true),
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

fn snapshot_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SnapshotRow> {
    let created_at: String = row.get(3)?;

    Ok(SnapshotRow {
        id: row.get(0)?,
        client_id: row.get(1)?,
        as_of_date: row.get(2)?,
        created_at: parse_timestamp(3, &created_at)?,
        created_by: row.get(4)?,
        label: row.get(5)?,
        total_assets: row.get(6)?,
        total_liabilities: row.get(7)?,
        net_worth: row.get(8)?,
        content_hash: row.get(9)?,
        payload: row.get(10)?,
    })
}

pub fn get_snapshot(conn: &Connection, id: &str) -> Result<Option<SnapshotRow>> {
    let row = conn
        .query_row(
            "SELECT id, client_id, as_of_date, created_at, created_by, label,
                    total_assets, total_liabilities, net_worth, content_hash, payload
             FROM snapshots
             WHERE id = ?1",
            params![id],
            snapshot_from_row,
        )
        .optional()?;

    Ok(row)
}

/// Snapshots of a client, newest first
pub fn list_snapshots(conn: &Connection, client_id: &str) -> Result<Vec<SnapshotRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, client_id, as_of_date, created_at, created_by, label,
                total_assets, total_liabilities, net_worth, content_hash, payload
         FROM snapshots
         WHERE client_id = ?1
         ORDER BY created_at DESC, seq DESC",
    )?;

    let rows = stmt
        .query_map(params![client_id], snapshot_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows)
}

// ============================================================================
// EVENTS
// ============================================================================

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            format_timestamp(&event.timestamp),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Get events for a specific entity, newest first
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY timestamp DESC, id DESC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: parse_timestamp(1, &timestamp_str)?,
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json)
                    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?,
                actor: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

// ============================================================================
// CSV IMPORT (simple holdings)
// ============================================================================

/// One line of a simple-holdings CSV export
#[derive(Debug, Deserialize)]
struct SimpleHoldingCsvRow {
    id: String,
    client_id: String,
    name: String,
    category: String,
    side: String,
    value: String,
    as_of_date: String,
    association: String,
    #[serde(default)]
    owners: String,
    #[serde(default)]
    percentages: String,
}

impl SimpleHoldingCsvRow {
    fn ownership(&self) -> Result<SimpleOwnership> {
        let owners = self
            .owners
            .split(';')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(String::from)
            .collect();

        let mut percentages = BTreeMap::new();
        for entry in self.percentages.split(';').map(str::trim).filter(|e| !e.is_empty()) {
            let (owner, pct) = entry
                .split_once('=')
                .ok_or_else(|| anyhow!("percentage `{}` is not owner=pct", entry))?;
            let pct = Decimal::from_str(pct.trim())
                .with_context(|| format!("percentage for `{}` is not a number", owner.trim()))?;
            percentages.insert(owner.trim().to_string(), pct);
        }

        Ok(SimpleOwnership {
            association: self.association.trim().to_string(),
            owners,
            percentages,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportStats {
    pub inserted: usize,
    pub duplicates: usize,
}

/// Import simple holdings from CSV. Values and dates are kept as written so
/// bad rows surface later as malformed items; rows whose id already exists
/// are skipped.
pub fn import_simple_holdings_csv(conn: &Connection, csv_path: &Path, actor: &str) -> Result<ImportStats> {
    let mut rdr = csv::Reader::from_path(csv_path).context("Failed to open CSV file")?;
    let mut stats = ImportStats::default();

    for (line, result) in rdr.deserialize().enumerate() {
        let row: SimpleHoldingCsvRow =
            result.with_context(|| format!("Failed to deserialize CSV row {}", line + 2))?;
        let ownership = row
            .ownership()
            .with_context(|| format!("Invalid ownership on CSV row {}", line + 2))?;

        let holding = SimpleHolding {
            id: row.id.trim().to_string(),
            client_id: row.client_id.trim().to_string(),
            name: row.name,
            category: row.category,
            side: row.side,
            value: row.value,
            as_of_date: row.as_of_date,
            ownership: Some(serde_json::to_string(&ownership)?),
            version: 1,
            updated_by: actor.to_string(),
            updated_at: Utc::now(),
        };

        match insert_simple_holding(conn, &holding) {
            Ok(()) => stats.inserted += 1,
            Err(e) if is_constraint_violation(&e) => {
                debug!(id = %holding.id, "skipping duplicate simple holding");
                stats.duplicates += 1;
            }
            Err(e) => return Err(e),
        }
    }

    info!(
        inserted = stats.inserted,
        duplicates = stats.duplicates,
        path = %csv_path.display(),
        "imported simple holdings"
    );

    Ok(stats)
}

fn is_constraint_violation(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<rusqlite::Error>(),
        Some(rusqlite::Error::SqliteFailure(e, _)) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

// ============================================================================
// TESTS
// ============================================================================
