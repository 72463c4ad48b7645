// Source Adapters - read-only views over the three kinds of stored items
//
// Each adapter reads its own table for one client (the only I/O point),
// then normalises rows lazily into the common `MonetaryItem` shape. Calling
// `list_items` again restarts the sequence from fresh rows.

pub mod information;
pub mod simple;
pub mod tracked;

pub use information::{InformationItem, InformationItemsAdapter};
pub use simple::{SimpleHolding, SimpleHoldingsAdapter, SimpleOwnership};
pub use tracked::{TrackedHolding, TrackedHoldingsAdapter};

use crate::item::{ItemSource, MalformedItem, MonetaryItem};
use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

/// Connection shared between adapters, stores and the server
pub type SharedConnection = Arc<Mutex<Connection>>;

/// Lazy, finite sequence of normalised items
pub type ItemStream<'a> = Box<dyn Iterator<Item = Result<MonetaryItem, MalformedItem>> + Send + 'a>;

pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> ItemSource;

    /// Items of `client_id` valued on or before `as_of`.
    ///
    /// `Err` means the source could not be read at all. Rows that cannot be
    /// normalised come through the stream as `MalformedItem`.
    fn list_items(&self, client_id: &str, as_of: NaiveDate) -> Result<ItemStream<'_>>;
}

/// The three standard adapters over one database
pub fn default_adapters(db: SharedConnection) -> Vec<Box<dyn SourceAdapter>> {
    vec![
        Box::new(TrackedHoldingsAdapter::new(Arc::clone(&db))),
        Box::new(SimpleHoldingsAdapter::new(Arc::clone(&db))),
        Box::new(InformationItemsAdapter::new(db)),
    ]
}

pub(crate) fn lock_connection(db: &SharedConnection) -> Result<MutexGuard<'_, Connection>> {
    db.lock().map_err(|_| anyhow!("database connection mutex poisoned"))
}

// ============================================================================
// PARSING HELPERS (shared by the adapters)
// ============================================================================

pub(crate) fn parse_decimal(text: &str) -> Option<Decimal> {
    let trimmed = text.trim();
    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .ok()
}

/// Decimal from a JSON string or number
pub(crate) fn decimal_from_json(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) => parse_decimal(s),
        Value::Number(n) => parse_decimal(&n.to_string()),
        _ => None,
    }
}

pub(crate) fn parse_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d").ok()
}

/// Shared tail of every normalisation: date window and value sanity.
pub(crate) fn check_common(
    source: ItemSource,
    id: &str,
    value: Option<Decimal>,
    category: &str,
    as_of_date: Option<NaiveDate>,
) -> std::result::Result<(Decimal, NaiveDate), MalformedItem> {
    let value = value.ok_or_else(|| MalformedItem::new(source, id, "missing or unparseable value"))?;
    if value < Decimal::ZERO {
        return Err(MalformedItem::new(source, id, format!("negative value {}", value)));
    }
    if category.trim().is_empty() {
        return Err(MalformedItem::new(source, id, "empty category"));
    }
    let as_of_date =
        as_of_date.ok_or_else(|| MalformedItem::new(source, id, "missing or unparseable valuation date"))?;

    Ok((crate::ownership::round2(value), as_of_date))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_decimal_from_json() {
        assert_eq!(decimal_from_json(&serde_json::json!("2500.00")), Some(dec!(2500.00)));
        assert_eq!(decimal_from_json(&serde_json::json!(45000)), Some(dec!(45000)));
        assert_eq!(decimal_from_json(&serde_json::json!(12.5)), Some(dec!(12.5)));
        assert_eq!(decimal_from_json(&serde_json::json!("abc")), None);
        assert_eq!(decimal_from_json(&serde_json::json!(null)), None);
    }

    #[test]
    fn test_check_common_rejects_bad_rows() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 31);

        let err = check_common(ItemSource::SimpleHolding, "x", None, "Cash", date).unwrap_err();
        assert!(err.reason.contains("value"));

        let err = check_common(ItemSource::SimpleHolding, "x", Some(dec!(-1)), "Cash", date).unwrap_err();
        assert!(err.reason.contains("negative"));

        let err = check_common(ItemSource::SimpleHolding, "x", Some(dec!(1)), "  ", date).unwrap_err();
        assert!(err.reason.contains("category"));

        let (value, _) = check_common(ItemSource::SimpleHolding, "x", Some(dec!(10.005)), "Cash", date).unwrap();
        assert_eq!(value, dec!(10.01));
    }
}
