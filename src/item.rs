// 💼 Monetary Items - the common shape every source adapter produces
//
// Tracked holdings, simple holdings and free-form information items are
// stored in different native shapes. Adapters normalise them into
// `MonetaryItem`, or report a `MalformedItem` when they cannot.

use crate::ownership::OwnershipRecord;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// ITEM SOURCE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemSource {
    /// Investment products tracked with units and prices
    TrackedHolding,

    /// Manually entered holdings ("unmanaged" assets and debts)
    SimpleHolding,

    /// Free-form client information items tagged as asset or liability
    InformationItem,
}

impl ItemSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemSource::TrackedHolding => "tracked_holding",
            ItemSource::SimpleHolding => "simple_holding",
            ItemSource::InformationItem => "information_item",
        }
    }

    pub fn all() -> [ItemSource; 3] {
        [
            ItemSource::TrackedHolding,
            ItemSource::SimpleHolding,
            ItemSource::InformationItem,
        ]
    }
}

impl fmt::Display for ItemSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tracked_holding" => Ok(ItemSource::TrackedHolding),
            "simple_holding" => Ok(ItemSource::SimpleHolding),
            "information_item" => Ok(ItemSource::InformationItem),
            other => Err(format!("unknown item source: {}", other)),
        }
    }
}

/// Fully qualified item identity (ids are only unique within one source)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemRef {
    pub source: ItemSource,
    pub item_id: String,
}

impl ItemRef {
    pub fn new(source: ItemSource, item_id: impl Into<String>) -> Self {
        ItemRef {
            source,
            item_id: item_id.into(),
        }
    }

    /// Key used for locks and audit events
    pub fn key(&self) -> String {
        format!("{}:{}", self.source.as_str(), self.item_id)
    }
}

impl fmt::Display for ItemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

// ============================================================================
// ITEM SIDE
// ============================================================================

/// Assets and liabilities are kept as two typed sets; values are always
/// non-negative magnitudes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemSide {
    Asset,
    Liability,
}

impl ItemSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemSide::Asset => "asset",
            ItemSide::Liability => "liability",
        }
    }
}

impl FromStr for ItemSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asset" | "assets" => Ok(ItemSide::Asset),
            "liability" | "liabilities" | "debt" => Ok(ItemSide::Liability),
            other => Err(format!("unknown item side `{}`", other)),
        }
    }
}

// ============================================================================
// MONETARY ITEM
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonetaryItem {
    pub item: ItemRef,

    /// Short label for statement rows
    pub label: String,

    pub side: ItemSide,

    /// Non-negative magnitude, two decimals
    pub value: Decimal,

    /// Section label ("Bank Accounts", "Property", "Mortgages", ...)
    pub category: String,

    /// Ownership as stored; validated during aggregation
    pub ownership: OwnershipRecord,

    pub as_of_date: NaiveDate,
}

/// Capability set every native item shape exposes to the aggregation path.
pub trait Valued {
    fn value(&self) -> Decimal;
    fn ownership(&self) -> &OwnershipRecord;
    fn category(&self) -> &str;
}

impl Valued for MonetaryItem {
    fn value(&self) -> Decimal {
        self.value
    }

    fn ownership(&self) -> &OwnershipRecord {
        &self.ownership
    }

    fn category(&self) -> &str {
        &self.category
    }
}

// ============================================================================
// MALFORMED ITEM
// ============================================================================

/// An item an adapter could not normalise. Reported, never fatal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MalformedItem {
    pub item: ItemRef,
    pub reason: String,
}

impl MalformedItem {
    pub fn new(source: ItemSource, item_id: impl Into<String>, reason: impl Into<String>) -> Self {
        MalformedItem {
            item: ItemRef::new(source, item_id),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for MalformedItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed {}: {}", self.item, self.reason)
    }
}

// ============================================================================
// CATEGORIES
// ============================================================================

/// Fixed statement section order. Unknown categories follow, alphabetically.
pub const CANONICAL_CATEGORIES: &[&str] = &[
    "Bank Accounts",
    "Cash",
    "Investments",
    "Pensions",
    "Property",
    "Business Interests",
    "Personal Possessions",
    "Other Assets",
    "Mortgages",
    "Loans",
    "Credit Cards",
    "Other Liabilities",
];

fn canonical_rank(category: &str) -> Option<usize> {
    CANONICAL_CATEGORIES.iter().position(|c| *c == category)
}

/// Ordering for section labels: canonical ones by list position, then
/// anything else alphabetically.
pub fn compare_categories(a: &str, b: &str) -> Ordering {
    match (canonical_rank(a), canonical_rank(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_ordering() {
        let mut categories = vec![
            "Yachts",
            "Mortgages",
            "Art",
            "Bank Accounts",
            "Property",
        ];
        categories.sort_by(|a, b| compare_categories(a, b));
        assert_eq!(
            categories,
            vec!["Bank Accounts", "Property", "Mortgages", "Art", "Yachts"]
        );
    }

    #[test]
    fn test_item_side_parsing() {
        assert_eq!("Asset".parse::<ItemSide>().unwrap(), ItemSide::Asset);
        assert_eq!("liabilities".parse::<ItemSide>().unwrap(), ItemSide::Liability);
        assert!("income".parse::<ItemSide>().is_err());
    }

    #[test]
    fn test_item_ref_key() {
        let item = ItemRef::new(ItemSource::SimpleHolding, "sh-1");
        assert_eq!(item.key(), "simple_holding:sh-1");
        assert_eq!("simple_holding".parse::<ItemSource>().unwrap(), ItemSource::SimpleHolding);
    }
}
