// ⚖️ Attribution Engine - split an item's value between owners
//
// For every validated item the attributed amounts plus any third-party
// remainder add back up to the item's value:
//
//   sum(per_owner) + joint + unattributed = value
//
// `unattributed` is only non-zero for tenants-in-common records whose
// shares total less than 100%. It never shows up in an owner or joint column.

use crate::entities::OwnerId;
use crate::ownership::{round2, Ownership};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// ATTRIBUTION RESULT
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attribution {
    /// Amount belonging to each individually named owner
    pub per_owner: BTreeMap<OwnerId, Decimal>,

    /// Amount belonging to the joint owner group as a whole
    pub joint: Decimal,

    /// Share held outside the client relationship (third parties)
    pub unattributed: Decimal,
}

impl Attribution {
    /// Owner columns plus the joint column
    pub fn attributed_total(&self) -> Decimal {
        self.per_owner.values().copied().sum::<Decimal>() + self.joint
    }

    /// Amount for one owner (zero when the owner has no share)
    pub fn for_owner(&self, owner: &str) -> Decimal {
        self.per_owner.get(owner).copied().unwrap_or(Decimal::ZERO)
    }

    /// Check that the split adds back up to `value` within `tolerance`
    pub fn balances(&self, value: Decimal, tolerance: Decimal) -> bool {
        (self.attributed_total() + self.unattributed - value).abs() <= tolerance
    }
}

// ============================================================================
// ATTRIBUTION ENGINE
// ============================================================================

/// Computes the amount attributable to each owner and to the joint pool.
///
/// The engine trusts its input: `Ownership` only exists for records that
/// already passed `OwnershipValidator`, so nothing is re-validated here.
pub struct AttributionEngine {
    /// Allowed difference when checking a split against the item value (default: 0.01)
    pub tolerance: Decimal,
}

impl AttributionEngine {
    pub fn new() -> Self {
        AttributionEngine {
            tolerance: Decimal::new(1, 2),
        }
    }

    pub fn with_tolerance(tolerance: Decimal) -> Self {
        AttributionEngine { tolerance }
    }

    /// `None` when the split overflows the decimal range
    pub fn attribute(&self, value: Decimal, ownership: &Ownership) -> Option<Attribution> {
        match ownership {
            Ownership::Individual { owner } => {
                let mut per_owner = BTreeMap::new();
                per_owner.insert(owner.clone(), value);
                Some(Attribution {
                    per_owner,
                    joint: Decimal::ZERO,
                    unattributed: Decimal::ZERO,
                })
            }
            Ownership::Joint { .. } => Some(Attribution {
                per_owner: BTreeMap::new(),
                joint: value,
                unattributed: Decimal::ZERO,
            }),
            Ownership::TenantsInCommon { shares } => self.split_tenancy(value, shares),
        }
    }

    /// Percentage split for tenants in common.
    ///
    /// Shares totalling at least 100 (the 100.01 tolerance band included)
    /// cover the whole item: amounts are proportional to the shares and the
    /// last owner with a non-zero share absorbs rounding so the row balances
    /// exactly. Below 100 each owner gets `value * share / 100` and the rest
    /// stays unattributed.
    fn split_tenancy(&self, value: Decimal, shares: &BTreeMap<OwnerId, Decimal>) -> Option<Attribution> {
        let total = shares
            .values()
            .try_fold(Decimal::ZERO, |acc, share| acc.checked_add(*share))?;
        let covers_whole = total >= Decimal::ONE_HUNDRED;
        let divisor = if covers_whole { total } else { Decimal::ONE_HUNDRED };

        let mut per_owner = BTreeMap::new();
        let mut allocated = Decimal::ZERO;

        for (owner, share) in shares {
            let amount = if divisor.is_zero() {
                Decimal::ZERO
            } else {
                round2(value.checked_mul(*share)?.checked_div(divisor)?)
            };
            allocated = allocated.checked_add(amount)?;
            per_owner.insert(owner.clone(), amount);
        }

        let remainder = value.checked_sub(allocated)?;

        if !covers_whole {
            return Some(Attribution {
                per_owner,
                joint: Decimal::ZERO,
                unattributed: remainder,
            });
        }

        if !remainder.is_zero() {
            let absorber = shares
                .iter()
                .rev()
                .find(|(_, share)| !share.is_zero())
                .map(|(owner, _)| owner.clone());

            if let Some(owner) = absorber {
                if let Some(amount) = per_owner.get_mut(&owner) {
                    *amount = amount.checked_add(remainder)?;
                }
            }
        }

        Some(Attribution {
            per_owner,
            joint: Decimal::ZERO,
            unattributed: Decimal::ZERO,
        })
    }
}

impl Default for AttributionEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
