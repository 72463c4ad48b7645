// 🔒 Concurrency Guard - soft edit locks and last-write-wins conflict detection
//
// Locks are advisory: a second editor is told who holds the item and for how
// long, but may override. Saves are checked against the version the editor
// started from; a mismatch is reported as a conflict, never merged.

use crate::adapters::{lock_connection, SharedConnection};
use crate::db::{self, Event};
use crate::entities::OwnerSet;
use crate::error::WriteError;
use crate::item::ItemRef;
use crate::ownership::{OwnershipRecord, OwnershipValidator};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

// ============================================================================
// EDIT LOCKS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditLock {
    pub item: ItemRef,
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    pub ttl_seconds: i64,
}

impl EditLock {
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.acquired_at + Duration::seconds(self.ttl_seconds)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LockOutcome {
    Acquired(EditLock),

    /// Someone else is editing; enough to show "being edited by X, retry in N s"
    Busy {
        held_by: String,
        expires_at: DateTime<Utc>,
        retry_after_secs: i64,
    },
}

/// In-memory lock table keyed by `ItemRef::key()`.
///
/// Locks live only as long as the process; expired entries are replaced on
/// the next acquisition and dropped by `purge_expired`.
pub struct LockManager {
    locks: RwLock<HashMap<String, EditLock>>,
    ttl: Duration,
}

impl LockManager {
    pub fn new(ttl: Duration) -> Self {
        LockManager {
            locks: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, EditLock>> {
        self.locks.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, EditLock>> {
        self.locks.write().unwrap_or_else(|e| e.into_inner())
    }

    fn new_lock(&self, item: &ItemRef, holder: &str, now: DateTime<Utc>) -> EditLock {
        EditLock {
            item: item.clone(),
            holder: holder.to_string(),
            acquired_at: now,
            ttl_seconds: self.ttl.num_seconds(),
        }
    }

    pub fn acquire(&self, item: &ItemRef, holder: &str) -> LockOutcome {
        self.acquire_at(item, holder, Utc::now())
    }

    /// Same holder refreshes its lock; an expired lock is replaced.
    pub fn acquire_at(&self, item: &ItemRef, holder: &str, now: DateTime<Utc>) -> LockOutcome {
        let mut locks = self.write();

        if let Some(existing) = locks.get(&item.key()) {
            if existing.holder != holder && !existing.is_expired_at(now) {
                let expires_at = existing.expires_at();
                let retry_after_secs = (expires_at - now).num_seconds().max(1);
                debug!(item = %item, held_by = %existing.holder, "lock busy");
                return LockOutcome::Busy {
                    held_by: existing.holder.clone(),
                    expires_at,
                    retry_after_secs,
                };
            }
        }

        let lock = self.new_lock(item, holder, now);
        locks.insert(item.key(), lock.clone());
        info!(item = %item, holder, "edit lock acquired");
        LockOutcome::Acquired(lock)
    }

    /// Take the lock regardless of the current holder. Returns the new lock
    /// and the live lock it displaced, if any.
    pub fn force_acquire(&self, item: &ItemRef, holder: &str) -> (EditLock, Option<EditLock>) {
        self.force_acquire_at(item, holder, Utc::now())
    }

    pub fn force_acquire_at(
        &self,
        item: &ItemRef,
        holder: &str,
        now: DateTime<Utc>,
    ) -> (EditLock, Option<EditLock>) {
        let lock = self.new_lock(item, holder, now);
        let previous = self
            .write()
            .insert(item.key(), lock.clone())
            .filter(|prev| prev.holder != holder && !prev.is_expired_at(now));

        if let Some(prev) = &previous {
            warn!(item = %item, holder, overridden = %prev.holder, "edit lock overridden");
        }

        (lock, previous)
    }

    /// Release only if `lock` is still the current lock for its item.
    pub fn release(&self, lock: &EditLock) -> bool {
        let mut locks = self.write();
        let key = lock.item.key();

        match locks.get(&key) {
            Some(current) if current.holder == lock.holder && current.acquired_at == lock.acquired_at => {
                locks.remove(&key);
                debug!(item = %lock.item, holder = %lock.holder, "edit lock released");
                true
            }
            _ => false,
        }
    }

    /// Release whatever lock `holder` has on `item`
    pub fn release_held(&self, item: &ItemRef, holder: &str) -> bool {
        let current = self.read().get(&item.key()).cloned();
        match current {
            Some(lock) if lock.holder == holder => self.release(&lock),
            _ => false,
        }
    }

    /// Live lock on `item`, if any
    pub fn current(&self, item: &ItemRef) -> Option<EditLock> {
        self.current_at(item, Utc::now())
    }

    pub fn current_at(&self, item: &ItemRef, now: DateTime<Utc>) -> Option<EditLock> {
        self.read()
            .get(&item.key())
            .filter(|lock| !lock.is_expired_at(now))
            .cloned()
    }

    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut locks = self.write();
        let before = locks.len();
        locks.retain(|_, lock| !lock.is_expired_at(now));
        before - locks.len()
    }
}

// ============================================================================
// CONFLICT DETECTION
// ============================================================================

/// Who last wrote an item, and when
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionStamp {
    pub version: i64,
    pub written_by: String,
    pub written_at: DateTime<Utc>,
}

/// Both sides of a conflicting save, for a manual merge/overwrite choice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictDetails {
    pub item: ItemRef,
    pub base_version: i64,
    pub current: VersionStamp,
    pub proposed: OwnershipRecord,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictCheck {
    Clean,
    Conflict {
        base_version: i64,
        current_version: i64,
        prior_writer: String,
        prior_timestamp: DateTime<Utc>,
    },
}

/// Compare the version an editor started from with what is stored now
pub fn detect_conflict(base_version: i64, current: &VersionStamp) -> ConflictCheck {
    if base_version == current.version {
        ConflictCheck::Clean
    } else {
        ConflictCheck::Conflict {
            base_version,
            current_version: current.version,
            prior_writer: current.written_by.clone(),
            prior_timestamp: current.written_at,
        }
    }
}

// ============================================================================
// GUARDED WRITES
// ============================================================================

/// Write path for ownership-bearing items:
/// validate, check the lock, detect conflicts, compare-and-swap, audit.
pub struct ConcurrencyGuard {
    db: SharedConnection,
    locks: Arc<LockManager>,
    validator: OwnershipValidator,
}

impl ConcurrencyGuard {
    pub fn new(db: SharedConnection, locks: Arc<LockManager>) -> Self {
        ConcurrencyGuard {
            db,
            locks,
            validator: OwnershipValidator::new(),
        }
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    fn audit_override(conn: &rusqlite::Connection, item: &ItemRef, displaced: &EditLock, holder: &str) -> anyhow::Result<()> {
        db::insert_event(
            conn,
            &Event::new(
                "lock_overridden",
                "item",
                &item.key(),
                serde_json::json!({
                    "previous_holder": displaced.holder,
                    "previous_expires_at": displaced.expires_at(),
                }),
                holder,
            ),
        )
    }

    /// Version an editor should start from
    pub fn current_version(&self, item: &ItemRef) -> Result<VersionStamp, WriteError> {
        let conn = lock_connection(&self.db)?;
        db::get_item_version(&conn, item)?.ok_or_else(|| WriteError::ItemNotFound(item.key()))
    }

    /// Conflict check against the stored item, without writing
    pub fn check(&self, item: &ItemRef, base_version: i64) -> Result<ConflictCheck, WriteError> {
        let current = self.current_version(item)?;
        Ok(detect_conflict(base_version, &current))
    }

    /// Edit-start: take the soft lock on an existing item. With `force` a
    /// live lock held by someone else is overridden and the override audited.
    pub fn acquire_lock(&self, item: &ItemRef, holder: &str, force: bool) -> Result<LockOutcome, WriteError> {
        let conn = lock_connection(&self.db)?;
        if db::get_item_version(&conn, item)?.is_none() {
            return Err(WriteError::ItemNotFound(item.key()));
        }

        if !force {
            return Ok(self.locks.acquire(item, holder));
        }

        let (lock, displaced) = self.locks.force_acquire(item, holder);
        if let Some(displaced) = displaced {
            Self::audit_override(&conn, item, &displaced, holder)?;
        }
        Ok(LockOutcome::Acquired(lock))
    }

    pub fn write_ownership(
        &self,
        item: &ItemRef,
        record: &OwnershipRecord,
        base_version: i64,
        writer: &str,
        override_lock: bool,
    ) -> Result<VersionStamp, WriteError> {
        let conn = lock_connection(&self.db)?;

        let client_id = db::get_item_client_id(&conn, item)?
            .ok_or_else(|| WriteError::ItemNotFound(item.key()))?;
        let owners = OwnerSet::new(&db::get_owners(&conn, &client_id)?);
        self.validator.validate(record, owners.ids())?;

        if let Some(lock) = self.locks.current(item) {
            if lock.holder != writer {
                if !override_lock {
                    return Err(WriteError::Locked {
                        held_by: lock.holder.clone(),
                        expires_at: lock.expires_at(),
                    });
                }
                let (_, displaced) = self.locks.force_acquire(item, writer);
                if let Some(displaced) = displaced {
                    Self::audit_override(&conn, item, &displaced, writer)?;
                }
            }
        }

        let current = db::get_item_version(&conn, item)?
            .ok_or_else(|| WriteError::ItemNotFound(item.key()))?;

        let written = match detect_conflict(base_version, &current) {
            ConflictCheck::Clean => db::update_item_ownership(&conn, item, record, base_version, writer)?,
            ConflictCheck::Conflict { .. } => None,
        };

        let stamp = match written {
            Some(stamp) => stamp,
            None => {
                // Either the versions differed up front or the CAS lost a race
                let current = db::get_item_version(&conn, item)?
                    .ok_or_else(|| WriteError::ItemNotFound(item.key()))?;
                let details = ConflictDetails {
                    item: item.clone(),
                    base_version,
                    current,
                    proposed: record.clone(),
                };

                warn!(
                    item = %item,
                    base_version,
                    current_version = details.current.version,
                    prior_writer = %details.current.written_by,
                    "ownership write conflict"
                );
                db::insert_event(
                    &conn,
                    &Event::new(
                        "ownership_conflict",
                        "item",
                        &item.key(),
                        serde_json::json!({
                            "base_version": base_version,
                            "current_version": details.current.version,
                            "prior_writer": details.current.written_by,
                        }),
                        writer,
                    ),
                )?;
                return Err(WriteError::Conflict(details));
            }
        };

        db::insert_event(
            &conn,
            &Event::new(
                "ownership_updated",
                "item",
                &item.key(),
                serde_json::json!({
                    "from_version": base_version,
                    "to_version": stamp.version,
                    "ownership": record,
                }),
                writer,
            ),
        )?;

        // Saving ends the writer's edit session
        self.locks.release_held(item, writer);

        info!(item = %item, version = stamp.version, writer, "ownership updated");
        Ok(stamp)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::SimpleHolding;
    use crate::entities::Owner;
    use crate::item::{ItemSide, ItemSource};
    use chrono::NaiveDate;
    use rusqlite::Connection;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    fn item() -> ItemRef {
        ItemRef::new(ItemSource::SimpleHolding, "sh-1")
    }

    fn create_test_guard() -> ConcurrencyGuard {
        let conn = Connection::open_in_memory().unwrap();
        db::setup_database(&conn).unwrap();

        let inception = NaiveDate::from_ymd_opt(2010, 1, 1).unwrap();
        db::insert_owner(&conn, &Owner::new("a", "client-1", "Alan", inception)).unwrap();
        db::insert_owner(&conn, &Owner::new("b", "client-1", "Bea", inception)).unwrap();
        db::insert_simple_holding(
            &conn,
            &SimpleHolding::new(
                "sh-1",
                "client-1",
                "Savings",
                "Cash",
                ItemSide::Asset,
                dec!(1000),
                NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
                &OwnershipRecord::individual("a"),
            ),
        )
        .unwrap();

        ConcurrencyGuard::new(
            Arc::new(Mutex::new(conn)),
            Arc::new(LockManager::new(Duration::seconds(120))),
        )
    }

    #[test]
    fn test_second_holder_gets_busy() {
        let manager = LockManager::new(Duration::seconds(120));
        let now = Utc::now();

        assert!(matches!(manager.acquire_at(&item(), "alice", now), LockOutcome::Acquired(_)));

        match manager.acquire_at(&item(), "bob", now + Duration::seconds(20)) {
            LockOutcome::Busy {
                held_by,
                retry_after_secs,
                ..
            } => {
                assert_eq!(held_by, "alice");
                assert_eq!(retry_after_secs, 100);
            }
            other => panic!("expected busy, got {:?}", other),
        }
    }

    #[test]
    fn test_expired_lock_is_replaced() {
        let manager = LockManager::new(Duration::seconds(120));
        let now = Utc::now();
        manager.acquire_at(&item(), "alice", now);

        let later = now + Duration::seconds(121);
        match manager.acquire_at(&item(), "bob", later) {
            LockOutcome::Acquired(lock) => assert_eq!(lock.holder, "bob"),
            other => panic!("expected acquired, got {:?}", other),
        }
    }

    #[test]
    fn test_stale_release_is_noop() {
        let manager = LockManager::new(Duration::seconds(120));
        let now = Utc::now();

        let first = match manager.acquire_at(&item(), "alice", now) {
            LockOutcome::Acquired(lock) => lock,
            other => panic!("expected acquired, got {:?}", other),
        };
        let (_, displaced) = manager.force_acquire_at(&item(), "bob", now + Duration::seconds(5));
        assert_eq!(displaced.map(|l| l.holder), Some("alice".to_string()));

        assert!(!manager.release(&first));
        assert_eq!(manager.current_at(&item(), now + Duration::seconds(6)).unwrap().holder, "bob");
        assert!(manager.release_held(&item(), "bob"));
        assert!(manager.current(&item()).is_none());
    }

    #[test]
    fn test_detect_conflict() {
        let stamp = VersionStamp {
            version: 3,
            written_by: "bob".into(),
            written_at: Utc::now(),
        };
        assert_eq!(detect_conflict(3, &stamp), ConflictCheck::Clean);
        match detect_conflict(2, &stamp) {
            ConflictCheck::Conflict {
                base_version,
                current_version,
                prior_writer,
                ..
            } => {
                assert_eq!(base_version, 2);
                assert_eq!(current_version, 3);
                assert_eq!(prior_writer, "bob");
            }
            other => panic!("expected conflict, got {:?}", other),
        }
    }

    #[test]
    fn test_second_writer_from_same_base_conflicts() {
        let guard = create_test_guard();
        let record = OwnershipRecord::joint(["a", "b"]);

        let stamp = guard.write_ownership(&item(), &record, 1, "alice", false).unwrap();
        assert_eq!(stamp.version, 2);

        let other = OwnershipRecord::tenants_in_common([("a", dec!(50)), ("b", dec!(50))]);
        match guard.write_ownership(&item(), &other, 1, "bob", false) {
            Err(WriteError::Conflict(details)) => {
                assert_eq!(details.base_version, 1);
                assert_eq!(details.current.version, 2);
                assert_eq!(details.current.written_by, "alice");
                assert_eq!(details.proposed, other);
            }
            other => panic!("expected conflict, got {:?}", other),
        }

        let conn = guard.db.lock().unwrap();
        let events = db::get_events_for_entity(&conn, "item", &item().key()).unwrap();
        let kinds: Vec<_> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert!(kinds.contains(&"ownership_updated"));
        assert!(kinds.contains(&"ownership_conflict"));
    }

    #[test]
    fn test_invalid_record_is_rejected_before_write() {
        let guard = create_test_guard();
        let record = OwnershipRecord::tenants_in_common([("a", dec!(60)), ("b", dec!(41))]);

        assert!(matches!(
            guard.write_ownership(&item(), &record, 1, "alice", false),
            Err(WriteError::Invalid(crate::error::OwnershipError::OwnershipExceeds100 { .. }))
        ));
        assert!(matches!(guard.check(&item(), 1), Ok(ConflictCheck::Clean)));
    }

    #[test]
    fn test_lock_blocks_unless_overridden() {
        let guard = create_test_guard();
        guard.locks().acquire(&item(), "alice");
        let record = OwnershipRecord::individual("b");

        assert!(matches!(
            guard.write_ownership(&item(), &record, 1, "bob", false),
            Err(WriteError::Locked { held_by, .. }) if held_by == "alice"
        ));

        let stamp = guard.write_ownership(&item(), &record, 1, "bob", true).unwrap();
        assert_eq!(stamp.written_by, "bob");
        assert!(guard.locks().current(&item()).is_none());
    }

    #[test]
    fn test_save_releases_own_lock() {
        let guard = create_test_guard();
        assert!(matches!(guard.acquire_lock(&item(), "alice", false), Ok(LockOutcome::Acquired(_))));

        guard.write_ownership(&item(), &OwnershipRecord::individual("b"), 1, "alice", false).unwrap();
        assert!(guard.locks().current(&item()).is_none());

        match guard.check(&item(), 1).unwrap() {
            ConflictCheck::Conflict {
                base_version,
                current_version,
                prior_writer,
                ..
            } => {
                assert_eq!((base_version, current_version), (1, 2));
                assert_eq!(prior_writer, "alice");
            }
            other => panic!("expected conflict, got {:?}", other),
        }
    }

    #[test]
    fn test_forced_lock_is_audited() {
        let guard = create_test_guard();
        assert!(matches!(guard.acquire_lock(&item(), "alice", false), Ok(LockOutcome::Acquired(_))));
        assert!(matches!(guard.acquire_lock(&item(), "bob", false), Ok(LockOutcome::Busy { .. })));
        assert!(matches!(guard.acquire_lock(&item(), "bob", true), Ok(LockOutcome::Acquired(_))));

        let conn = guard.db.lock().unwrap();
        let events = db::get_events_for_entity(&conn, "item", &item().key()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "lock_overridden");
        assert_eq!(events[0].data["previous_holder"], "alice");
    }

    #[test]
    fn test_unknown_item() {
        let guard = create_test_guard();
        let missing = ItemRef::new(ItemSource::TrackedHolding, "nope");
        assert!(matches!(
            guard.write_ownership(&missing, &OwnershipRecord::individual("a"), 1, "alice", false),
            Err(WriteError::ItemNotFound(_))
        ));
    }
}
