// End-to-end: seed a household, build the statement, freeze it, edit the
// live data, then race two editors on the same holding.

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use client_networth::db::{
    get_events_for_entity, insert_information_item, insert_owner, insert_simple_holding,
    insert_tracked_holding, setup_database, update_simple_holding_value,
};
use client_networth::{
    AggregationEngine, ConcurrencyGuard, InformationItem, IssueKind, ItemRef, ItemSide, ItemSource,
    LockManager, LockOutcome, Owner, OwnershipError, OwnershipRecord, SharedConnection,
    SimpleHolding, SnapshotService, TrackedHolding, WriteError,
};
use rusqlite::Connection;
use rust_decimal_macros::dec;
use serde_json::json;
use std::sync::{Arc, Mutex};

const CLIENT: &str = "client-1";

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn seeded_database() -> (SharedConnection, Vec<Owner>) {
    let conn = Connection::open_in_memory().unwrap();
    setup_database(&conn).unwrap();

    // Bea joined first, so her column comes first
    insert_owner(&conn, &Owner::new("a", CLIENT, "Alan", date(2001, 5, 1))).unwrap();
    insert_owner(&conn, &Owner::new("b", CLIENT, "Bea", date(1999, 2, 1))).unwrap();

    insert_tracked_holding(
        &conn,
        &TrackedHolding::new(
            "th-1",
            CLIENT,
            "Global Equity",
            "Fundsmith",
            "Investments",
            dec!(100),
            dec!(25.50),
            date(2025, 3, 1),
            &OwnershipRecord::tenants_in_common([("a", dec!(60)), ("b", dec!(40))]),
        ),
    )
    .unwrap();

    insert_simple_holding(
        &conn,
        &SimpleHolding::new(
            "sh-1",
            CLIENT,
            "Family home",
            "Property",
            ItemSide::Asset,
            dec!(300000),
            date(2025, 1, 1),
            &OwnershipRecord::joint(["a", "b"]),
        ),
    )
    .unwrap();

    insert_simple_holding(
        &conn,
        &SimpleHolding::new(
            "sh-2",
            CLIENT,
            "Mortgage",
            "Mortgages",
            ItemSide::Liability,
            dec!(120000),
            date(2025, 1, 1),
            &OwnershipRecord::joint(["a", "b"]),
        ),
    )
    .unwrap();

    // Entered with a minus sign, as advisers often do for debts
    insert_information_item(
        &conn,
        &InformationItem::new(
            "ii-1",
            CLIENT,
            "liability",
            "Credit card",
            json!({
                "value": "-5000",
                "category": "Credit cards",
                "as_of": "2025-02-01",
                "owned_by": { "type": "individual", "owner": "a" }
            }),
        ),
    )
    .unwrap();

    // Names someone outside the household
    insert_information_item(
        &conn,
        &InformationItem::new(
            "ii-2",
            CLIENT,
            "asset",
            "Classic car",
            json!({
                "value": 40000,
                "category": "Vehicles",
                "as_of": "2025-02-01",
                "owned_by": { "type": "individual", "owner": "z" }
            }),
        ),
    )
    .unwrap();

    insert_information_item(
        &conn,
        &InformationItem::new("ii-3", CLIENT, "note", "Will review", json!({ "text": "due 2026" })),
    )
    .unwrap();

    let owners = client_networth::get_owners(&conn, CLIENT).unwrap();
    (Arc::new(Mutex::new(conn)), owners)
}

#[test]
fn test_statement_from_all_sources() {
    let (db, owners) = seeded_database();
    let matrix = AggregationEngine::with_database(db)
        .aggregate(CLIENT, &owners, date(2025, 3, 31))
        .unwrap();

    let columns: Vec<&str> = matrix.owners.iter().map(|o| o.id.as_str()).collect();
    assert_eq!(columns, vec!["b", "a"]);

    assert_eq!(matrix.total_assets, dec!(302550));
    assert_eq!(matrix.total_liabilities, dec!(125000));
    assert_eq!(matrix.net_worth, dec!(177550));

    assert_eq!(matrix.owner_net_worth("a"), dec!(-3470));
    assert_eq!(matrix.owner_net_worth("b"), dec!(1020));
    assert_eq!(matrix.joint_net_worth(), dec!(180000));

    // Note is ignored, the car is reported but not counted
    assert_eq!(matrix.item_count(), 4);
    assert_eq!(matrix.excluded_count(), 1);
    assert_eq!(matrix.issues[0].kind, IssueKind::InvalidOwnership);
    assert_eq!(matrix.issues[0].code, "UnknownOwner");
}

#[test]
fn test_snapshot_survives_live_edits() {
    let (db, owners) = seeded_database();
    let service = SnapshotService::with_database(db.clone());

    let created_at = Utc.with_ymd_and_hms(2025, 3, 31, 17, 0, 0).unwrap();
    let snapshot = service
        .create_snapshot_as_of(CLIENT, &owners, "adviser", Some("annual review"), date(2025, 3, 31), created_at)
        .unwrap();
    assert_eq!(snapshot.net_worth, dec!(177550));

    {
        let conn = db.lock().unwrap();
        assert!(update_simple_holding_value(&conn, "sh-1", dec!(350000), "adviser").unwrap());
    }

    let live = service.engine().aggregate(CLIENT, &owners, date(2025, 3, 31)).unwrap();
    assert_eq!(live.net_worth, dec!(227550));

    let frozen = service.get_snapshot(&snapshot.id).unwrap();
    assert_eq!(frozen, snapshot);
    assert!(frozen.verify());
    assert_eq!(frozen.net_worth, dec!(177550));

    let listed = service.list_snapshots(CLIENT).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].label.as_deref(), Some("annual review"));
}

#[test]
fn test_two_editors_on_one_holding() {
    let (db, owners) = seeded_database();
    let guard = ConcurrencyGuard::new(db.clone(), Arc::new(LockManager::new(Duration::minutes(2))));
    let home = ItemRef::new(ItemSource::SimpleHolding, "sh-1");

    // Both open the editor on version 1
    let base = guard.current_version(&home).unwrap().version;
    assert_eq!(base, 1);
    assert!(matches!(guard.acquire_lock(&home, "alice", false), Ok(LockOutcome::Acquired(_))));
    match guard.acquire_lock(&home, "bob", false).unwrap() {
        LockOutcome::Busy { held_by, retry_after_secs, .. } => {
            assert_eq!(held_by, "alice");
            assert!(retry_after_secs > 0);
        }
        other => panic!("expected busy, got {:?}", other),
    }

    // Bob cannot save while alice holds the item
    let bob = OwnershipRecord::individual("b");
    assert!(matches!(
        guard.write_ownership(&home, &bob, base, "bob", false),
        Err(WriteError::Locked { .. })
    ));

    let split = OwnershipRecord::tenants_in_common([("a", dec!(50)), ("b", dec!(50))]);
    let stamp = guard.write_ownership(&home, &split, base, "alice", false).unwrap();
    assert_eq!(stamp.version, 2);

    // Alice's save released her lock, but bob's base is stale
    assert!(guard.locks().current(&home).is_none());
    match guard.write_ownership(&home, &bob, base, "bob", false) {
        Err(WriteError::Conflict(details)) => {
            assert_eq!(details.base_version, 1);
            assert_eq!(details.current.version, 2);
            assert_eq!(details.current.written_by, "alice");
            assert_eq!(details.proposed, bob);
        }
        other => panic!("expected conflict, got {:?}", other),
    }

    // Over 100.01% never reaches storage
    let over = OwnershipRecord::tenants_in_common([("a", dec!(60)), ("b", dec!(41))]);
    assert!(matches!(
        guard.write_ownership(&home, &over, 2, "bob", false),
        Err(WriteError::Invalid(OwnershipError::OwnershipExceeds100 { .. }))
    ));

    let events = {
        let conn = db.lock().unwrap();
        get_events_for_entity(&conn, "item", &home.key()).unwrap()
    };
    let kinds: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(kinds, vec!["ownership_conflict", "ownership_updated"]);

    // Alice's split is what the statement now uses
    let matrix = AggregationEngine::with_database(db)
        .aggregate(CLIENT, &owners, date(2025, 3, 31))
        .unwrap();
    assert_eq!(matrix.asset_totals.for_owner("a"), dec!(151530));
    assert_eq!(matrix.asset_totals.for_owner("b"), dec!(151020));
    assert_eq!(matrix.asset_totals.joint, dec!(0));
}
