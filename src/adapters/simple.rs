// 🏠 Simple Holdings - manually entered assets and debts
//
// Native ownership shape (JSON column `ownership`) is an owner list:
//   {"association": "joint", "owners": ["owner-a", "owner-b"]}
//   {"association": "tenants_in_common", "owners": [...], "percentages": {"owner-a": 60}}
// Individual ownership implies 100% for its single owner.

use super::{check_common, lock_connection, parse_date, parse_decimal, ItemStream, SharedConnection, SourceAdapter};
use crate::db;
use crate::item::{ItemRef, ItemSide, ItemSource, MalformedItem, MonetaryItem};
use crate::ownership::{AssociationType, OwnershipRecord};
use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleOwnership {
    pub association: String,

    #[serde(default)]
    pub owners: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub percentages: BTreeMap<String, Decimal>,
}

impl SimpleOwnership {
    /// Convert to the common record. Unknown association names pass through
    /// untouched so the validator reports them.
    pub fn to_record(&self) -> Result<OwnershipRecord, String> {
        let association = self.association.parse::<AssociationType>();

        let shares: BTreeMap<String, Decimal> = match association {
            Ok(AssociationType::Individual) => self
                .owners
                .iter()
                .map(|o| (o.clone(), Decimal::ONE_HUNDRED))
                .collect(),
            Ok(AssociationType::TenantsInCommon) => {
                if let Some(missing) = self.owners.iter().find(|o| !self.percentages.contains_key(*o)) {
                    return Err(format!("no percentage recorded for owner `{}`", missing));
                }
                self.percentages.clone()
            }
            _ => self
                .owners
                .iter()
                .map(|o| (o.clone(), Decimal::ZERO))
                .collect(),
        };

        Ok(OwnershipRecord::new(self.association.clone(), shares))
    }

    pub fn from_record(record: &OwnershipRecord) -> Self {
        let owners: Vec<String> = record.shares.keys().cloned().collect();
        let percentages = match record.association_type.parse::<AssociationType>() {
            Ok(AssociationType::TenantsInCommon) => record.shares.clone(),
            _ => BTreeMap::new(),
        };

        SimpleOwnership {
            association: record.association_type.clone(),
            owners,
            percentages,
        }
    }
}

/// A simple holding row as stored
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimpleHolding {
    pub id: String,
    pub client_id: String,
    pub name: String,
    pub category: String,

    /// "asset" or "liability"
    pub side: String,

    pub value: String,
    pub as_of_date: String,

    /// Raw ownership document
    pub ownership: Option<String>,

    pub version: i64,
    pub updated_by: String,
    pub updated_at: DateTime<Utc>,
}

impl SimpleHolding {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: impl Into<String>,
        client_id: impl Into<String>,
        name: impl Into<String>,
        category: impl Into<String>,
        side: ItemSide,
        value: Decimal,
        as_of_date: NaiveDate,
        ownership: &OwnershipRecord,
    ) -> Self {
        SimpleHolding {
            id: id.into(),
            client_id: client_id.into(),
            name: name.into(),
            category: category.into(),
            side: side.as_str().to_string(),
            value: value.to_string(),
            as_of_date: as_of_date.format("%Y-%m-%d").to_string(),
            ownership: Some(ownership_document(ownership).to_string()),
            version: 1,
            updated_by: "system".to_string(),
            updated_at: Utc::now(),
        }
    }

    pub fn normalize(&self, as_of: NaiveDate) -> Option<Result<MonetaryItem, MalformedItem>> {
        if let Some(date) = parse_date(&self.as_of_date) {
            if date > as_of {
                return None;
            }
        }
        Some(self.to_item())
    }

    fn to_item(&self) -> Result<MonetaryItem, MalformedItem> {
        let source = ItemSource::SimpleHolding;
        let malformed = |reason: String| MalformedItem::new(source, &self.id, reason);

        let side: ItemSide = self.side.parse().map_err(malformed)?;

        let raw = self
            .ownership
            .as_deref()
            .ok_or_else(|| malformed("missing ownership document".to_string()))?;
        let native: SimpleOwnership = serde_json::from_str(raw)
            .map_err(|e| malformed(format!("invalid ownership document: {}", e)))?;
        let ownership = native.to_record().map_err(malformed)?;

        let (value, as_of_date) = check_common(
            source,
            &self.id,
            parse_decimal(&self.value),
            &self.category,
            parse_date(&self.as_of_date),
        )?;

        Ok(MonetaryItem {
            item: ItemRef::new(source, &self.id),
            label: self.name.clone(),
            side,
            value,
            category: self.category.trim().to_string(),
            ownership,
            as_of_date,
        })
    }
}

pub fn ownership_document(record: &OwnershipRecord) -> serde_json::Value {
    serde_json::to_value(SimpleOwnership::from_record(record)).unwrap_or(serde_json::Value::Null)
}

pub struct SimpleHoldingsAdapter {
    db: SharedConnection,
}

impl SimpleHoldingsAdapter {
    pub fn new(db: SharedConnection) -> Self {
        SimpleHoldingsAdapter { db }
    }
}

impl SourceAdapter for SimpleHoldingsAdapter {
    fn source(&self) -> ItemSource {
        ItemSource::SimpleHolding
    }

    fn list_items(&self, client_id: &str, as_of: NaiveDate) -> Result<ItemStream<'_>> {
        let rows = {
            let conn = lock_connection(&self.db)?;
            db::get_simple_holdings(&conn, client_id)?
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
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_individual_owner_list_implies_100() {
        let native = SimpleOwnership {
            association: "individual".into(),
            owners: vec!["a".into()],
            percentages: BTreeMap::new(),
        };

        let record = native.to_record().unwrap();
        assert_eq!(record, OwnershipRecord::individual("a"));
    }

    #[test]
    fn test_tenancy_requires_percentages() {
        let native = SimpleOwnership {
            association: "tenants_in_common".into(),
            owners: vec!["a".into(), "b".into()],
            percentages: [("a".to_string(), dec!(60))].into_iter().collect(),
        };

        let err = native.to_record().unwrap_err();
        assert!(err.contains("`b`"));
    }

    #[test]
    fn test_unknown_association_passes_through() {
        let native = SimpleOwnership {
            association: "community_property".into(),
            owners: vec!["a".into(), "b".into()],
            percentages: BTreeMap::new(),
        };

        let record = native.to_record().unwrap();
        assert_eq!(record.association_type, "community_property");
        assert_eq!(record.shares.len(), 2);
    }

    #[test]
    fn test_record_round_trip_through_native_shape() {
        let record = OwnershipRecord::tenants_in_common([("a", dec!(50)), ("b", dec!(25))]);
        let native = SimpleOwnership::from_record(&record);

        assert_eq!(native.owners, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(native.to_record().unwrap(), record);
    }

    #[test]
    fn test_normalize_liability() {
        let holding = SimpleHolding::new(
            "sh-1",
            "client-1",
            "Home mortgage",
            "Mortgages",
            ItemSide::Liability,
            dec!(180000),
            date(2025, 1, 1),
            &OwnershipRecord::joint(["a", "b"]),
        );

        let item = holding.normalize(date(2025, 6, 30)).unwrap().unwrap();
        assert_eq!(item.side, ItemSide::Liability);
        assert_eq!(item.value, dec!(180000.00));
        assert_eq!(item.category, "Mortgages");
    }

    #[test]
    fn test_unknown_side_is_malformed() {
        let mut holding = SimpleHolding::new(
            "sh-2",
            "client-1",
            "Car",
            "Personal Possessions",
            ItemSide::Asset,
            dec!(15000),
            date(2025, 1, 1),
            &OwnershipRecord::individual("a"),
        );
        holding.side = "income".to_string();

        let err = holding.normalize(date(2025, 6, 30)).unwrap().unwrap_err();
        assert!(err.reason.contains("side"));
    }
}
