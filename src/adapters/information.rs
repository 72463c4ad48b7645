// 🗂️ Information Items - free-form client facts, some of them monetary
//
// Only items whose `item_type` is "asset" or "liability" take part in net
// worth; every other type (notes, objectives, ...) is ignored. The payload
// is a free-form JSON document:
//   {"value": "12000", "category": "Cash", "as_of": "2025-01-31",
//    "owned_by": {"type": "individual", "owner": "owner-a"}}
// `owned_by` may also carry `owners: [...]` or `shares: {...}`.

use super::{check_common, decimal_from_json, lock_connection, parse_date, ItemStream, SharedConnection, SourceAdapter};
use crate::db;
use crate::item::{ItemRef, ItemSide, ItemSource, MalformedItem, MonetaryItem};
use crate::ownership::{AssociationType, OwnershipRecord};
use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Ownership as nested inside an information item's `owned_by` key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnedBy {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owners: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub shares: BTreeMap<String, Decimal>,
}

impl OwnedBy {
    /// Convert to the common record. Tenants in common need a share for
    /// every listed owner; a missing one makes the item malformed.
    pub fn to_record(&self) -> std::result::Result<OwnershipRecord, String> {
        let association = self.kind.parse::<AssociationType>();
        let mut listed = self.owner.iter().chain(self.owners.iter());

        if let Ok(AssociationType::TenantsInCommon) = association {
            if let Some(missing) = listed.find(|o| !self.shares.contains_key(*o)) {
                return Err(format!("no share recorded for owner `{}`", missing));
            }
            return Ok(OwnershipRecord::new(self.kind.clone(), self.shares.clone()));
        }

        if !self.shares.is_empty() {
            return Ok(OwnershipRecord::new(self.kind.clone(), self.shares.clone()));
        }

        let implied = match association {
            Ok(AssociationType::Individual) => Decimal::ONE_HUNDRED,
            _ => Decimal::ZERO,
        };
        let shares = listed.map(|o| (o.clone(), implied)).collect();

        Ok(OwnershipRecord::new(self.kind.clone(), shares))
    }

    pub fn from_record(record: &OwnershipRecord) -> Self {
        let mut owned_by = OwnedBy {
            kind: record.association_type.clone(),
            owner: None,
            owners: Vec::new(),
            shares: BTreeMap::new(),
        };

        match record.association_type.parse::<AssociationType>() {
            Ok(AssociationType::Individual) if record.shares.len() == 1 => {
                owned_by.owner = record.shares.keys().next().cloned();
            }
            Ok(AssociationType::Joint) => {
                owned_by.owners = record.shares.keys().cloned().collect();
            }
            _ => owned_by.shares = record.shares.clone(),
        }

        owned_by
    }
}

/// An information item row as stored
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InformationItem {
    pub id: String,
    pub client_id: String,
    pub item_type: String,
    pub title: String,

    /// Raw free-form JSON document
    pub data: String,

    pub version: i64,
    pub updated_by: String,
    pub updated_at: DateTime<Utc>,
}

impl InformationItem {
    pub fn new(
        id: impl Into<String>,
        client_id: impl Into<String>,
        item_type: impl Into<String>,
        title: impl Into<String>,
        data: Value,
    ) -> Self {
        InformationItem {
            id: id.into(),
            client_id: client_id.into(),
            item_type: item_type.into(),
            title: title.into(),
            data: data.to_string(),
            version: 1,
            updated_by: "system".to_string(),
            updated_at: Utc::now(),
        }
    }

    /// Asset or liability, `None` for non-monetary item types
    pub fn side(&self) -> Option<ItemSide> {
        match self.item_type.trim().to_ascii_lowercase().as_str() {
            "asset" => Some(ItemSide::Asset),
            "liability" => Some(ItemSide::Liability),
            _ => None,
        }
    }

    pub fn normalize(&self, as_of: NaiveDate) -> Option<Result<MonetaryItem, MalformedItem>> {
        let side = self.side()?;
        let source = ItemSource::InformationItem;

        let data: Value = match serde_json::from_str(&self.data) {
            Ok(Value::Object(map)) => Value::Object(map),
            Ok(_) => {
                return Some(Err(MalformedItem::new(source, &self.id, "data is not a JSON object")))
            }
            Err(e) => {
                return Some(Err(MalformedItem::new(
                    source,
                    &self.id,
                    format!("invalid data document: {}", e),
                )))
            }
        };

        let date = match data.get("as_of").and_then(Value::as_str) {
            Some(text) => parse_date(text),
            None => Some(self.updated_at.date_naive()),
        };
        if let Some(date) = date {
            if date > as_of {
                return None;
            }
        }

        Some(self.to_item(side, &data, date))
    }

    fn to_item(&self, side: ItemSide, data: &Value, date: Option<NaiveDate>) -> Result<MonetaryItem, MalformedItem> {
        let source = ItemSource::InformationItem;

        let owned_by = data
            .get("owned_by")
            .ok_or_else(|| MalformedItem::new(source, &self.id, "missing owned_by"))?;
        let owned_by: OwnedBy = serde_json::from_value(owned_by.clone())
            .map_err(|e| MalformedItem::new(source, &self.id, format!("invalid owned_by: {}", e)))?;

        // Liabilities are often entered with a negative sign; the side
        // already says it is a debt, so keep the magnitude.
        let value = data.get("value").and_then(decimal_from_json).map(|v| match side {
            ItemSide::Liability => v.abs(),
            ItemSide::Asset => v,
        });

        let ownership = owned_by
            .to_record()
            .map_err(|reason| MalformedItem::new(source, &self.id, reason))?;

        let category = match data.get("category") {
            Some(Value::String(s)) => s.clone(),
            Some(_) => return Err(MalformedItem::new(source, &self.id, "category is not text")),
            None => String::new(),
        };

        let (value, as_of_date) = check_common(source, &self.id, value, &category, date)?;

        Ok(MonetaryItem {
            item: ItemRef::new(source, &self.id),
            label: self.title.clone(),
            side,
            value,
            category: category.trim().to_string(),
            ownership,
            as_of_date,
        })
    }

    /// Replace the nested ownership, leaving the rest of the document as is
    pub fn with_ownership(&self, record: &OwnershipRecord) -> Result<String> {
        let mut data: Value = serde_json::from_str(&self.data)?;
        let map = data
            .as_object_mut()
            .ok_or_else(|| anyhow::anyhow!("information item {} data is not an object", self.id))?;
        map.insert("owned_by".to_string(), serde_json::to_value(OwnedBy::from_record(record))?);
        Ok(data.to_string())
    }
}

pub struct InformationItemsAdapter {
    db: SharedConnection,
}

impl InformationItemsAdapter {
    pub fn new(db: SharedConnection) -> Self {
        InformationItemsAdapter { db }
    }
}

impl SourceAdapter for InformationItemsAdapter {
    fn source(&self) -> ItemSource {
        ItemSource::InformationItem
    }

    fn list_items(&self, client_id: &str, as_of: NaiveDate) -> Result<ItemStream<'_>> {
        let rows = {
            let conn = lock_connection(&self.db)?;
            db::get_information_items(&conn, client_id)?
        };

        Ok(Box::new(rows.into_iter().filter_map(move |row| row.normalize(as_of))))
    }
}

// ============================================================================
// TESTS
// ============================================================================
