// 🤝 Ownership Layer - how a monetary item is divided among owners
//
// An `OwnershipRecord` is the sub-document persisted on every item. It is
// kept deliberately loose (association type as text, any share map) so it
// round-trips exactly what was stored. `OwnershipValidator` turns it into a
// typed `Ownership`, which is the only form the attribution engine accepts.

use crate::entities::OwnerId;
use crate::error::OwnershipError;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Percentages are compared at two-decimal fixed precision.
pub const PERCENT_SCALE: u32 = 2;

/// Round a percentage (or a money amount) to two decimals.
pub fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(PERCENT_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Upper bound for tenants-in-common totals (100% plus rounding tolerance).
pub fn max_tenancy_total() -> Decimal {
    Decimal::new(10001, 2)
}

// ============================================================================
// ASSOCIATION TYPE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssociationType {
    /// One owner holds 100%
    Individual,

    /// Indivisible group ownership, never split per owner
    Joint,

    /// Independent percentage per owner
    TenantsInCommon,
}

impl AssociationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssociationType::Individual => "individual",
            AssociationType::Joint => "joint",
            AssociationType::TenantsInCommon => "tenants_in_common",
        }
    }
}

impl fmt::Display for AssociationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssociationType {
    type Err = OwnershipError;

    /// Accepts the canonical snake_case names; case, dashes and spaces are
    /// normalised ("Tenants-in-Common" parses).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .map(|c| match c {
                '-' | ' ' => '_',
                other => other.to_ascii_lowercase(),
            })
            .collect();

        match normalized.as_str() {
            "individual" => Ok(AssociationType::Individual),
            "joint" => Ok(AssociationType::Joint),
            "tenants_in_common" => Ok(AssociationType::TenantsInCommon),
            _ => Err(OwnershipError::InvalidAssociationType(s.to_string())),
        }
    }
}

// ============================================================================
// OWNERSHIP RECORD (persisted form)
// ============================================================================

/// Ownership sub-document embedded in every monetary item.
///
/// For `joint` records only the keys of `shares` matter; the values are kept
/// as stored but never used for attribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnershipRecord {
    pub association_type: String,

    #[serde(default)]
    pub shares: BTreeMap<OwnerId, Decimal>,
}

impl OwnershipRecord {
    pub fn new(association_type: impl Into<String>, shares: BTreeMap<OwnerId, Decimal>) -> Self {
        OwnershipRecord {
            association_type: association_type.into(),
            shares,
        }
    }

    pub fn individual(owner: impl Into<OwnerId>) -> Self {
        let mut shares = BTreeMap::new();
        shares.insert(owner.into(), Decimal::ONE_HUNDRED);
        Self::new(AssociationType::Individual.as_str(), shares)
    }

    pub fn joint<I, S>(owners: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OwnerId>,
    {
        let shares = owners
            .into_iter()
            .map(|o| (o.into(), Decimal::ZERO))
            .collect();
        Self::new(AssociationType::Joint.as_str(), shares)
    }

    pub fn tenants_in_common<I, S>(shares: I) -> Self
    where
        I: IntoIterator<Item = (S, Decimal)>,
        S: Into<OwnerId>,
    {
        let shares = shares.into_iter().map(|(o, p)| (o.into(), p)).collect();
        Self::new(AssociationType::TenantsInCommon.as_str(), shares)
    }

    /// Sum of listed percentages at two-decimal precision, saturating at
    /// the decimal range
    pub fn total_percentage(&self) -> Decimal {
        self.shares
            .values()
            .fold(Decimal::ZERO, |acc, share| acc.saturating_add(round2(*share)))
    }
}

// ============================================================================
// OWNERSHIP (validated form)
// ============================================================================

/// Ownership that passed validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "association_type", rename_all = "snake_case")]
pub enum Ownership {
    Individual { owner: OwnerId },
    Joint { owners: BTreeSet<OwnerId> },
    /// Shares rounded to two decimals; may total less than 100 when part of
    /// the item belongs to people outside the client relationship.
    TenantsInCommon { shares: BTreeMap<OwnerId, Decimal> },
}

impl Ownership {
    pub fn association_type(&self) -> AssociationType {
        match self {
            Ownership::Individual { .. } => AssociationType::Individual,
            Ownership::Joint { .. } => AssociationType::Joint,
            Ownership::TenantsInCommon { .. } => AssociationType::TenantsInCommon,
        }
    }

    pub fn owners(&self) -> Vec<&OwnerId> {
        match self {
            Ownership::Individual { owner } => vec![owner],
            Ownership::Joint { owners } => owners.iter().collect(),
            Ownership::TenantsInCommon { shares } => shares.keys().collect(),
        }
    }
}

// ============================================================================
// VALIDATOR
// ============================================================================

/// Pure validator for ownership records.
///
/// Rules are checked in a fixed order and the first failure is returned:
/// 1. association type is known
/// 2. every owner key is a known owner of the client
/// 3. individual: exactly one share of 100.00
/// 4. tenants in common: shares non-negative, total ≤ 100.01
/// 5. joint: at least two distinct owners
pub struct OwnershipValidator {
    max_tenancy_total: Decimal,
}

impl OwnershipValidator {
    pub fn new() -> Self {
        OwnershipValidator {
            max_tenancy_total: max_tenancy_total(),
        }
    }

    pub fn validate(
        &self,
        record: &OwnershipRecord,
        known_owners: &BTreeSet<OwnerId>,
    ) -> Result<Ownership, OwnershipError> {
        let association: AssociationType = record.association_type.parse()?;

        if let Some(unknown) = record.shares.keys().find(|id| !known_owners.contains(*id)) {
            return Err(OwnershipError::UnknownOwner(unknown.clone()));
        }

        match association {
            AssociationType::Individual => self.validate_individual(record),
            AssociationType::TenantsInCommon => self.validate_tenancy(record),
            AssociationType::Joint => self.validate_joint(record),
        }
    }

    fn validate_individual(&self, record: &OwnershipRecord) -> Result<Ownership, OwnershipError> {
        let total = record.total_percentage();

        match record.shares.iter().next() {
            Some((owner, share)) if record.shares.len() == 1 && round2(*share) == Decimal::ONE_HUNDRED => {
                Ok(Ownership::Individual {
                    owner: owner.clone(),
                })
            }
            _ => Err(OwnershipError::InvalidIndividualShare {
                count: record.shares.len(),
                total,
            }),
        }
    }

    fn validate_tenancy(&self, record: &OwnershipRecord) -> Result<Ownership, OwnershipError> {
        if record.shares.is_empty() {
            return Err(OwnershipError::NoOwnersListed);
        }

        let shares: BTreeMap<OwnerId, Decimal> = record
            .shares
            .iter()
            .map(|(owner, share)| (owner.clone(), round2(*share)))
            .collect();
        let total = shares
            .values()
            .fold(Decimal::ZERO, |acc, share| acc.saturating_add(*share));

        if let Some((owner, _)) = shares.iter().find(|(_, share)| **share < Decimal::ZERO) {
            return Err(OwnershipError::OwnershipExceeds100 {
                total,
                negative_owner: Some(owner.clone()),
            });
        }

        if total > self.max_tenancy_total {
            return Err(OwnershipError::OwnershipExceeds100 {
                total,
                negative_owner: None,
            });
        }

        Ok(Ownership::TenantsInCommon { shares })
    }

    fn validate_joint(&self, record: &OwnershipRecord) -> Result<Ownership, OwnershipError> {
        let owners: BTreeSet<OwnerId> = record.shares.keys().cloned().collect();

        if owners.len() < 2 {
            return Err(OwnershipError::InsufficientJointOwners(owners.len()));
        }

        Ok(Ownership::Joint { owners })
    }
}

impl Default for OwnershipValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience wrapper around `OwnershipValidator::validate`
pub fn validate(
    record: &OwnershipRecord,
    known_owners: &BTreeSet<OwnerId>,
) -> Result<Ownership, OwnershipError> {
    OwnershipValidator::new().validate(record, known_owners)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn known(ids: &[&str]) -> BTreeSet<OwnerId> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_association_type_parsing() {
        assert_eq!("individual".parse::<AssociationType>().unwrap(), AssociationType::Individual);
        assert_eq!("Joint".parse::<AssociationType>().unwrap(), AssociationType::Joint);
        assert_eq!(
            "Tenants-in-Common".parse::<AssociationType>().unwrap(),
            AssociationType::TenantsInCommon
        );

        let err = "shared".parse::<AssociationType>().unwrap_err();
        assert_eq!(err, OwnershipError::InvalidAssociationType("shared".into()));
    }

    #[test]
    fn test_individual_valid() {
        let record = OwnershipRecord::individual("a");
        let ownership = validate(&record, &known(&["a", "b"])).unwrap();
        assert_eq!(ownership, Ownership::Individual { owner: "a".into() });
    }

    #[test]
    fn test_individual_must_be_100() {
        let mut shares = BTreeMap::new();
        shares.insert("a".to_string(), dec!(99.00));
        let record = OwnershipRecord::new("individual", shares);

        let err = validate(&record, &known(&["a"])).unwrap_err();
        assert!(matches!(err, OwnershipError::InvalidIndividualShare { count: 1, .. }));
    }

    #[test]
    fn test_individual_rejects_two_owners() {
        let mut shares = BTreeMap::new();
        shares.insert("a".to_string(), dec!(100));
        shares.insert("b".to_string(), dec!(0));
        let record = OwnershipRecord::new("individual", shares);

        let err = validate(&record, &known(&["a", "b"])).unwrap_err();
        assert!(matches!(err, OwnershipError::InvalidIndividualShare { count: 2, .. }));
    }

    #[test]
    fn test_tenancy_exactly_100_valid() {
        let record = OwnershipRecord::tenants_in_common([("a", dec!(50.00)), ("b", dec!(50.00))]);
        assert!(validate(&record, &known(&["a", "b"])).is_ok());
    }

    #[test]
    fn test_tenancy_rounding_tolerance_valid() {
        let record = OwnershipRecord::tenants_in_common([
            ("a", dec!(33.34)),
            ("b", dec!(33.34)),
            ("c", dec!(33.33)),
        ]);
        assert!(validate(&record, &known(&["a", "b", "c"])).is_ok());
    }

    #[test]
    fn test_tenancy_100_02_rejected() {
        let record = OwnershipRecord::tenants_in_common([("a", dec!(50.01)), ("b", dec!(50.01))]);
        let err = validate(&record, &known(&["a", "b"])).unwrap_err();
        assert_eq!(
            err,
            OwnershipError::OwnershipExceeds100 {
                total: dec!(100.02),
                negative_owner: None
            }
        );
    }

    #[test]
    fn test_tenancy_third_party_remainder_valid() {
        let record = OwnershipRecord::tenants_in_common([("a", dec!(30)), ("b", dec!(30))]);
        let ownership = validate(&record, &known(&["a", "b"])).unwrap();

        match ownership {
            Ownership::TenantsInCommon { shares } => {
                assert_eq!(shares.values().copied().sum::<Decimal>(), dec!(60.00));
            }
            other => panic!("unexpected ownership: {:?}", other),
        }
    }

    #[test]
    fn test_tenancy_60_41_rejected() {
        let record = OwnershipRecord::tenants_in_common([("a", dec!(60)), ("b", dec!(41))]);
        let err = validate(&record, &known(&["a", "b"])).unwrap_err();
        assert_eq!(err.code(), "OwnershipExceeds100");
    }

    #[test]
    fn test_tenancy_negative_share_rejected() {
        let record = OwnershipRecord::tenants_in_common([("a", dec!(80)), ("b", dec!(-10))]);
        let err = validate(&record, &known(&["a", "b"])).unwrap_err();
        assert_eq!(
            err,
            OwnershipError::OwnershipExceeds100 {
                total: dec!(70),
                negative_owner: Some("b".into())
            }
        );
    }

    #[test]
    fn test_tenancy_empty_rejected() {
        let record = OwnershipRecord::new("tenants_in_common", BTreeMap::new());
        assert_eq!(
            validate(&record, &known(&["a"])).unwrap_err(),
            OwnershipError::NoOwnersListed
        );
    }

    #[test]
    fn test_joint_needs_two_owners() {
        let record = OwnershipRecord::joint(["a"]);
        assert_eq!(
            validate(&record, &known(&["a", "b"])).unwrap_err(),
            OwnershipError::InsufficientJointOwners(1)
        );

        let record = OwnershipRecord::joint(["a", "b"]);
        let ownership = validate(&record, &known(&["a", "b"])).unwrap();
        assert_eq!(ownership.association_type(), AssociationType::Joint);
        assert_eq!(ownership.owners().len(), 2);
    }

    #[test]
    fn test_rule_order_type_before_owner() {
        // Both the type and the owner are wrong: the type is reported first.
        let mut shares = BTreeMap::new();
        shares.insert("ghost".to_string(), dec!(100));
        let record = OwnershipRecord::new("partnership", shares);

        let err = validate(&record, &known(&["a"])).unwrap_err();
        assert_eq!(err, OwnershipError::InvalidAssociationType("partnership".into()));
    }

    #[test]
    fn test_rule_order_owner_before_shares() {
        let record = OwnershipRecord::tenants_in_common([("a", dec!(90)), ("ghost", dec!(90))]);
        let err = validate(&record, &known(&["a"])).unwrap_err();
        assert_eq!(err, OwnershipError::UnknownOwner("ghost".into()));
    }

    #[test]
    fn test_huge_shares_rejected_without_overflow() {
        let record = OwnershipRecord::tenants_in_common([("a", Decimal::MAX), ("b", dec!(1))]);
        let err = validate(&record, &known(&["a", "b"])).unwrap_err();
        assert_eq!(
            err,
            OwnershipError::OwnershipExceeds100 {
                total: Decimal::MAX,
                negative_owner: None
            }
        );
        assert_eq!(record.total_percentage(), Decimal::MAX);
    }

    #[test]
    fn test_record_json_shape() {
        let record = OwnershipRecord::tenants_in_common([("a", dec!(60.00)), ("b", dec!(40.00))]);
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["association_type"], "tenants_in_common");
        assert_eq!(json["shares"]["a"], "60.00");

        let back: OwnershipRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
