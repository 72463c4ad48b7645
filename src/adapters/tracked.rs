// 📈 Tracked Holdings - investment products valued from units and prices
//
// Native ownership shape (JSON column `ownership`):
//   {"association_type": "tenants_in_common", "shares": {"owner-a": "50.00", ...}}

use super::{check_common, lock_connection, parse_date, parse_decimal, ItemStream, SharedConnection, SourceAdapter};
use crate::db;
use crate::item::{ItemRef, ItemSide, ItemSource, MalformedItem, MonetaryItem};
use crate::ownership::OwnershipRecord;
use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A tracked holding row as stored
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedHolding {
    pub id: String,
    pub client_id: String,
    pub product_name: String,
    pub provider: String,

    /// Statement section ("Investments", "Pensions", ...)
    pub product_type: String,

    pub units: String,
    pub unit_price: String,
    pub valuation_date: String,

    /// Raw ownership document, `None` when the column is NULL
    pub ownership: Option<String>,

    pub version: i64,
    pub updated_by: String,
    pub updated_at: DateTime<Utc>,
}

impl TrackedHolding {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: impl Into<String>,
        client_id: impl Into<String>,
        product_name: impl Into<String>,
        provider: impl Into<String>,
        product_type: impl Into<String>,
        units: Decimal,
        unit_price: Decimal,
        valuation_date: NaiveDate,
        ownership: &OwnershipRecord,
    ) -> Self {
        TrackedHolding {
            id: id.into(),
            client_id: client_id.into(),
            product_name: product_name.into(),
            provider: provider.into(),
            product_type: product_type.into(),
            units: units.to_string(),
            unit_price: unit_price.to_string(),
            valuation_date: valuation_date.format("%Y-%m-%d").to_string(),
            ownership: Some(ownership_document(ownership).to_string()),
            version: 1,
            updated_by: "system".to_string(),
            updated_at: Utc::now(),
        }
    }

    /// `None` when the holding is valued after `as_of`
    pub fn normalize(&self, as_of: NaiveDate) -> Option<Result<MonetaryItem, MalformedItem>> {
        if let Some(date) = parse_date(&self.valuation_date) {
            if date > as_of {
                return None;
            }
        }
        Some(self.to_item())
    }

    fn to_item(&self) -> Result<MonetaryItem, MalformedItem> {
        let source = ItemSource::TrackedHolding;

        let raw = self
            .ownership
            .as_deref()
            .ok_or_else(|| MalformedItem::new(source, &self.id, "missing ownership document"))?;
        let ownership: OwnershipRecord = serde_json::from_str(raw).map_err(|e| {
            MalformedItem::new(source, &self.id, format!("invalid ownership document: {}", e))
        })?;

        let value = match (parse_decimal(&self.units), parse_decimal(&self.unit_price)) {
            (Some(units), Some(price)) => Some(
                units
                    .checked_mul(price)
                    .ok_or_else(|| MalformedItem::new(source, &self.id, "value out of range"))?,
            ),
            _ => None,
        };

        let (value, as_of_date) = check_common(
            source,
            &self.id,
            value,
            &self.product_type,
            parse_date(&self.valuation_date),
        )?;

        Ok(MonetaryItem {
            item: ItemRef::new(source, &self.id),
            label: format!("{} ({})", self.product_name, self.provider),
            side: ItemSide::Asset,
            value,
            category: self.product_type.trim().to_string(),
            ownership,
            as_of_date,
        })
    }
}

/// The stored document is the record itself
pub fn ownership_document(record: &OwnershipRecord) -> serde_json::Value {
    serde_json::to_value(record).unwrap_or(serde_json::Value::Null)
}

pub struct TrackedHoldingsAdapter {
    db: SharedConnection,
}

impl TrackedHoldingsAdapter {
    pub fn new(db: SharedConnection) -> Self {
        TrackedHoldingsAdapter { db }
    }
}

impl SourceAdapter for TrackedHoldingsAdapter {
    fn source(&self) -> ItemSource {
        ItemSource::TrackedHolding
    }

    fn list_items(&self, client_id: &str, as_of: NaiveDate) -> Result<ItemStream<'_>> {
        let rows = {
            let conn = lock_connection(&self.db)?;
            db::get_tracked_holdings(&conn, client_id)?
        };

        Ok(Box::new(rows.into_iter().filter_map(move |row| row.normalize(as_of))))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;
    use rust_decimal_macros::dec;
    use std::sync::{Arc, Mutex};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn create_test_holding(id: &str) -> TrackedHolding {
        TrackedHolding::new(
            id,
            "client-1",
            "Global Equity Fund",
            "Vanguard",
            "Investments",
            dec!(1500),
            dec!(30.00),
            date(2025, 1, 31),
            &OwnershipRecord::joint(["a", "b"]),
        )
    }

    #[test]
    fn test_normalize_values_units_times_price() {
        let item = create_test_holding("th-1")
            .normalize(date(2025, 2, 1))
            .unwrap()
            .unwrap();

        assert_eq!(item.value, dec!(45000.00));
        assert_eq!(item.side, ItemSide::Asset);
        assert_eq!(item.category, "Investments");
        assert_eq!(item.ownership.association_type, "joint");
        assert_eq!(item.label, "Global Equity Fund (Vanguard)");
    }

    #[test]
    fn test_normalize_skips_future_valuations() {
        assert!(create_test_holding("th-1").normalize(date(2024, 12, 31)).is_none());
    }

    #[test]
    fn test_missing_ownership_is_malformed() {
        let mut holding = create_test_holding("th-2");
        holding.ownership = None;

        let err = holding.normalize(date(2025, 2, 1)).unwrap().unwrap_err();
        assert_eq!(err.item.item_id, "th-2");
        assert!(err.reason.contains("missing ownership"));
    }

    #[test]
    fn test_overflowing_value_is_malformed() {
        let mut holding = create_test_holding("th-4");
        holding.units = Decimal::MAX.to_string();

        let err = holding.normalize(date(2025, 2, 1)).unwrap().unwrap_err();
        assert_eq!(err.item.item_id, "th-4");
        assert_eq!(err.reason, "value out of range");
    }

    #[test]
    fn test_bad_units_is_malformed() {
        let mut holding = create_test_holding("th-3");
        holding.units = "lots".to_string();

        let err = holding.normalize(date(2025, 2, 1)).unwrap().unwrap_err();
        assert!(err.reason.contains("value"));
    }

    #[test]
    fn test_adapter_reads_client_rows_only() {
        let conn = Connection::open_in_memory().unwrap();
        db::setup_database(&conn).unwrap();
        db::insert_tracked_holding(&conn, &create_test_holding("th-1")).unwrap();

        let mut other = create_test_holding("th-9");
        other.client_id = "client-2".to_string();
        db::insert_tracked_holding(&conn, &other).unwrap();

        let adapter = TrackedHoldingsAdapter::new(Arc::new(Mutex::new(conn)));
        let items: Vec<_> = adapter
            .list_items("client-1", date(2025, 6, 30))
            .unwrap()
            .collect();

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap().item.item_id, "th-1");

        // Restartable: a second call yields the same sequence
        let again: Vec<_> = adapter
            .list_items("client-1", date(2025, 6, 30))
            .unwrap()
            .collect();
        assert_eq!(items, again);
    }
}
