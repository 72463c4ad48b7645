// 👤 Owner Entity - people who can hold a share of a monetary item
//
// Owners are created and removed by client-management flows outside this
// crate. The core only reads them: their identifiers validate ownership
// records and their inception dates fix the column order of a statement.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Owner identifier (stable, never reused).
pub type OwnerId = String;

// ============================================================================
// OWNER ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    /// Stable identity
    pub id: OwnerId,

    /// Client relationship this owner belongs to
    pub client_id: String,

    /// Name shown in column headers
    pub display_name: String,

    /// Used only for deterministic column ordering
    pub inception_date: NaiveDate,
}

impl Owner {
    pub fn new(
        id: impl Into<String>,
        client_id: impl Into<String>,
        display_name: impl Into<String>,
        inception_date: NaiveDate,
    ) -> Self {
        Owner {
            id: id.into(),
            client_id: client_id.into(),
            display_name: display_name.into(),
            inception_date,
        }
    }

    /// Copy of the fields a statement column needs
    pub fn column(&self) -> OwnerColumn {
        OwnerColumn {
            id: self.id.clone(),
            display_name: self.display_name.clone(),
            inception_date: self.inception_date,
        }
    }
}

/// Owner as it appears in a matrix or snapshot header. Copied by value so a
/// snapshot stays readable after the live owner is renamed or removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerColumn {
    pub id: OwnerId,
    pub display_name: String,
    pub inception_date: NaiveDate,
}

// ============================================================================
// OWNER SET
// ============================================================================

/// The authoritative, ordered set of owners for one client relationship.
///
/// Ordering is `inception_date` ascending, ties broken by id, so two calls
/// with the same owners always produce the same column layout.
#[derive(Debug, Clone, Default)]
pub struct OwnerSet {
    owners: Vec<Owner>,
    ids: BTreeSet<OwnerId>,
}

impl OwnerSet {
    pub fn new(owners: &[Owner]) -> Self {
        let mut owners = owners.to_vec();
        owners.sort_by(|a, b| {
            a.inception_date
                .cmp(&b.inception_date)
                .then_with(|| a.id.cmp(&b.id))
        });

        // One column per id; the earliest record wins
        let mut ids = BTreeSet::new();
        owners.retain(|o| ids.insert(o.id.clone()));

        OwnerSet { owners, ids }
    }

    /// Owners in display order
    pub fn ordered(&self) -> &[Owner] {
        &self.owners
    }

    pub fn ids(&self) -> &BTreeSet<OwnerId> {
        &self.ids
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn columns(&self) -> Vec<OwnerColumn> {
        self.owners.iter().map(Owner::column).collect()
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_owner_set_orders_by_inception_date() {
        let owners = vec![
            Owner::new("b", "client-1", "Bea", date(2019, 5, 1)),
            Owner::new("a", "client-1", "Alan", date(2015, 1, 1)),
            Owner::new("c", "client-1", "Cara", date(2021, 3, 9)),
        ];

        let set = OwnerSet::new(&owners);
        let ids: Vec<&str> = set.ordered().iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_owner_set_ties_broken_by_id() {
        let owners = vec![
            Owner::new("z", "client-1", "Zed", date(2020, 1, 1)),
            Owner::new("m", "client-1", "Mo", date(2020, 1, 1)),
        ];

        let set = OwnerSet::new(&owners);
        assert_eq!(set.ordered()[0].id, "m");
        assert_eq!(set.ordered()[1].id, "z");
    }

    #[test]
    fn test_owner_set_deduplicates() {
        let alan = Owner::new("a", "client-1", "Alan", date(2015, 1, 1));
        let set = OwnerSet::new(&[alan.clone(), alan]);
        assert_eq!(set.len(), 1);
        assert!(set.contains("a"));
        assert!(!set.contains("b"));
    }

    #[test]
    fn test_owner_set_deduplicates_across_dates() {
        let owners = vec![
            Owner::new("a", "client-1", "Alan", date(2020, 1, 1)),
            Owner::new("b", "client-1", "Bea", date(2015, 1, 1)),
            Owner::new("a", "client-1", "Alan (old record)", date(2010, 1, 1)),
        ];

        let set = OwnerSet::new(&owners);
        let ids: Vec<_> = set.ordered().iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(set.ordered()[0].inception_date, date(2010, 1, 1));
        assert_eq!(set.columns().len(), 2);
    }

    #[test]
    fn test_column_copies_owner_fields() {
        let alan = Owner::new("a", "client-1", "Alan", date(2015, 1, 1));
        let column = alan.column();
        assert_eq!(column.id, "a");
        assert_eq!(column.display_name, "Alan");
        assert_eq!(column.inception_date, date(2015, 1, 1));
    }
}
