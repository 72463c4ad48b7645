// 📊 Aggregation Engine - per-owner net worth across every item source
//
// Pulls items from every source adapter, validates ownership, attributes each
// valid item and groups the rows into asset and liability sections. Items
// that cannot be used are reported in `issues`; they never abort the run.

use crate::adapters::{default_adapters, SharedConnection, SourceAdapter};
use crate::attribution::{Attribution, AttributionEngine};
use crate::entities::{Owner, OwnerColumn, OwnerId, OwnerSet};
use crate::item::{compare_categories, ItemRef, ItemSide, MalformedItem, MonetaryItem, Valued};
use crate::ownership::OwnershipValidator;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

// ============================================================================
// MATRIX TYPES
// ============================================================================

/// One column set: every owner, the joint pool, the third-party remainder
/// and the overall total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnTotals {
    /// One entry per owner column, zero when nothing is attributed
    pub per_owner: BTreeMap<OwnerId, Decimal>,
    pub joint: Decimal,
    pub unattributed: Decimal,
    pub total: Decimal,
}

impl ColumnTotals {
    pub fn zero(owners: &OwnerSet) -> Self {
        ColumnTotals {
            per_owner: owners
                .ordered()
                .iter()
                .map(|o| (o.id.clone(), Decimal::ZERO))
                .collect(),
            joint: Decimal::ZERO,
            unattributed: Decimal::ZERO,
            total: Decimal::ZERO,
        }
    }

    /// Totals with `row` added, `None` if any column leaves the decimal range
    fn checked_add_row(&self, row: &MatrixRow) -> Option<ColumnTotals> {
        let mut next = self.clone();
        for (owner, amount) in &row.per_owner {
            let cell = next.per_owner.entry(owner.clone()).or_insert(Decimal::ZERO);
            *cell = cell.checked_add(*amount)?;
        }
        next.joint = next.joint.checked_add(row.joint)?;
        next.unattributed = next.unattributed.checked_add(row.unattributed)?;
        next.total = next.total.checked_add(row.value)?;
        Some(next)
    }

    // Rows only reach a section after passing the per-side running check in
    // `aggregate`, so subtotals and grand totals stay within range.
    fn add_row(&mut self, row: &MatrixRow) {
        for (owner, amount) in &row.per_owner {
            let cell = self.per_owner.entry(owner.clone()).or_insert(Decimal::ZERO);
            *cell = cell.saturating_add(*amount);
        }
        self.joint = self.joint.saturating_add(row.joint);
        self.unattributed = self.unattributed.saturating_add(row.unattributed);
        self.total = self.total.saturating_add(row.value);
    }

    fn add_totals(&mut self, other: &ColumnTotals) {
        for (owner, amount) in &other.per_owner {
            let cell = self.per_owner.entry(owner.clone()).or_insert(Decimal::ZERO);
            *cell = cell.saturating_add(*amount);
        }
        self.joint = self.joint.saturating_add(other.joint);
        self.unattributed = self.unattributed.saturating_add(other.unattributed);
        self.total = self.total.saturating_add(other.total);
    }

    pub fn for_owner(&self, owner: &str) -> Decimal {
        self.per_owner.get(owner).copied().unwrap_or(Decimal::ZERO)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixRow {
    pub item: ItemRef,
    pub label: String,
    pub value: Decimal,
    pub as_of_date: NaiveDate,
    pub per_owner: BTreeMap<OwnerId, Decimal>,
    pub joint: Decimal,
    pub unattributed: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub category: String,
    pub rows: Vec<MatrixRow>,
    pub subtotal: ColumnTotals,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// The adapter could not normalise the stored item
    MalformedItem,
    /// The ownership record failed validation
    InvalidOwnership,
}

/// An item left out of the totals, and why
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationIssue {
    pub item: ItemRef,
    pub kind: IssueKind,

    /// Validation error code, or "MalformedItem"
    pub code: String,

    pub message: String,
}

impl AggregationIssue {
    /// Item whose amounts do not fit the decimal range
    fn out_of_range(item: &ItemRef, detail: &str) -> Self {
        AggregationIssue {
            item: item.clone(),
            kind: IssueKind::MalformedItem,
            code: "MalformedItem".to_string(),
            message: format!("value out of range: {}", detail),
        }
    }
}

impl From<MalformedItem> for AggregationIssue {
    fn from(malformed: MalformedItem) -> Self {
        AggregationIssue {
            item: malformed.item,
            kind: IssueKind::MalformedItem,
            code: "MalformedItem".to_string(),
            message: malformed.reason,
        }
    }
}

/// Live net-worth statement for one client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetWorthMatrix {
    pub client_id: String,
    pub as_of: NaiveDate,

    /// Owner columns in display order (inception date ascending)
    pub owners: Vec<OwnerColumn>,

    pub assets: Vec<Section>,
    pub liabilities: Vec<Section>,
    pub asset_totals: ColumnTotals,
    pub liability_totals: ColumnTotals,

    pub total_assets: Decimal,
    pub total_liabilities: Decimal,
    pub net_worth: Decimal,

    pub issues: Vec<AggregationIssue>,
}

impl NetWorthMatrix {
    /// Number of items left out of the totals
    pub fn excluded_count(&self) -> usize {
        self.issues.len()
    }

    pub fn has_issues(&self) -> bool {
        !self.issues.is_empty()
    }

    /// Assets minus liabilities attributed to one owner
    pub fn owner_net_worth(&self, owner: &str) -> Decimal {
        self.asset_totals.for_owner(owner) - self.liability_totals.for_owner(owner)
    }

    pub fn joint_net_worth(&self) -> Decimal {
        self.asset_totals.joint - self.liability_totals.joint
    }

    pub fn item_count(&self) -> usize {
        self.assets
            .iter()
            .chain(self.liabilities.iter())
            .map(|s| s.rows.len())
            .sum()
    }
}

// ============================================================================
// AGGREGATION ENGINE
// ============================================================================

pub struct AggregationEngine {
    adapters: Vec<Box<dyn SourceAdapter>>,
    validator: OwnershipValidator,
    attribution: AttributionEngine,
}

impl AggregationEngine {
    pub fn new(adapters: Vec<Box<dyn SourceAdapter>>) -> Self {
        AggregationEngine {
            adapters,
            validator: OwnershipValidator::new(),
            attribution: AttributionEngine::new(),
        }
    }

    /// Engine over the three standard adapters of one database
    pub fn with_database(db: SharedConnection) -> Self {
        Self::new(default_adapters(db))
    }

    /// Build the statement for `client_id` as of `as_of`.
    ///
    /// `Err` only when a source cannot be read at all. Malformed items and
    /// invalid ownership end up in `issues`.
    pub fn aggregate(&self, client_id: &str, owners: &[Owner], as_of: NaiveDate) -> Result<NetWorthMatrix> {
        let owner_set = OwnerSet::new(owners);

        let mut assets: BTreeMap<String, Vec<MatrixRow>> = BTreeMap::new();
        let mut liabilities: BTreeMap<String, Vec<MatrixRow>> = BTreeMap::new();
        let mut issues = Vec::new();
        let mut asset_running = ColumnTotals::zero(&owner_set);
        let mut liability_running = ColumnTotals::zero(&owner_set);

        for adapter in &self.adapters {
            let items = adapter
                .list_items(client_id, as_of)
                .with_context(|| format!("Failed to read {} items for {}", adapter.source(), client_id))?;

            for entry in items {
                let item = match entry {
                    Ok(item) => item,
                    Err(malformed) => {
                        warn!(item = %malformed.item, reason = %malformed.reason, "excluding malformed item");
                        issues.push(AggregationIssue::from(malformed));
                        continue;
                    }
                };

                match self.attribute_item(&item, &owner_set) {
                    Ok(row) => {
                        let (section, running) = match item.side {
                            ItemSide::Asset => (&mut assets, &mut asset_running),
                            ItemSide::Liability => (&mut liabilities, &mut liability_running),
                        };
                        match running.checked_add_row(&row) {
                            Some(next) => {
                                *running = next;
                                section.entry(item.category().to_string()).or_default().push(row);
                            }
                            None => {
                                warn!(item = %item.item, "excluding item that overflows the totals");
                                issues.push(AggregationIssue::out_of_range(&item.item, "totals overflow"));
                            }
                        }
                    }
                    Err(issue) => {
                        warn!(item = %issue.item, code = %issue.code, "excluding item with invalid ownership");
                        issues.push(issue);
                    }
                }
            }
        }

        let assets = build_sections(assets, &owner_set);
        let liabilities = build_sections(liabilities, &owner_set);
        let asset_totals = grand_totals(&assets, &owner_set);
        let liability_totals = grand_totals(&liabilities, &owner_set);

        let total_assets = asset_totals.total;
        let total_liabilities = liability_totals.total;
        let net_worth = total_assets - total_liabilities;

        issues.sort_by(|a, b| a.item.cmp(&b.item));

        let matrix = NetWorthMatrix {
            client_id: client_id.to_string(),
            as_of,
            owners: owner_set.columns(),
            assets,
            liabilities,
            asset_totals,
            liability_totals,
            total_assets,
            total_liabilities,
            net_worth,
            issues,
        };

        info!(
            client_id,
            %as_of,
            items = matrix.item_count(),
            excluded = matrix.excluded_count(),
            %net_worth,
            "aggregated net worth"
        );

        Ok(matrix)
    }

    fn attribute_item(
        &self,
        item: &MonetaryItem,
        owners: &OwnerSet,
    ) -> std::result::Result<MatrixRow, AggregationIssue> {
        let ownership = self
            .validator
            .validate(item.ownership(), owners.ids())
            .map_err(|e| AggregationIssue {
                item: item.item.clone(),
                kind: IssueKind::InvalidOwnership,
                code: e.code().to_string(),
                message: e.to_string(),
            })?;

        let attribution = self
            .attribution
            .attribute(item.value(), &ownership)
            .ok_or_else(|| AggregationIssue::out_of_range(&item.item, "ownership split overflows"))?;
        if !attribution.balances(item.value(), self.attribution.tolerance) {
            warn!(item = %item.item, "attribution does not balance");
        }
        debug!(item = %item.item, joint = %attribution.joint, "attributed item");

        Ok(to_row(item, attribution, owners))
    }
}

fn to_row(item: &MonetaryItem, attribution: Attribution, owners: &OwnerSet) -> MatrixRow {
    let mut per_owner = ColumnTotals::zero(owners).per_owner;
    for (owner, amount) in attribution.per_owner {
        per_owner.insert(owner, amount);
    }

    MatrixRow {
        item: item.item.clone(),
        label: item.label.clone(),
        value: item.value,
        as_of_date: item.as_of_date,
        per_owner,
        joint: attribution.joint,
        unattributed: attribution.unattributed,
    }
}

/// Canonical section order; rows by (source, item id)
fn build_sections(grouped: BTreeMap<String, Vec<MatrixRow>>, owners: &OwnerSet) -> Vec<Section> {
    let mut sections: Vec<Section> = grouped
        .into_iter()
        .map(|(category, mut rows)| {
            rows.sort_by(|a, b| a.item.cmp(&b.item));
            let mut subtotal = ColumnTotals::zero(owners);
            for row in &rows {
                subtotal.add_row(row);
            }
            Section {
                category,
                rows,
                subtotal,
            }
        })
        .collect();

    sections.sort_by(|a, b| compare_categories(&a.category, &b.category));
    sections
}

fn grand_totals(sections: &[Section], owners: &OwnerSet) -> ColumnTotals {
    let mut totals = ColumnTotals::zero(owners);
    for section in sections {
        totals.add_totals(&section.subtotal);
    }
    totals
}

// ============================================================================
// TESTS
// ============================================================================
