//! Candidate model: allocatable units, the constraint envelope, and the
//! request/response records exchanged with the orchestration layer.
//!
//! Everything here is an immutable value object. Candidates are built fresh per
//! request from externally supplied priors and dropped when the request ends.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::{AllocationPath, Error, FallbackReason, Result};

/// One allocatable (channel, placement, audience, product) combination.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AllocationCandidate {
    pub channel_id: String,
    pub placement_type: String,
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub audience_id: Option<String>,
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub product_id: Option<String>,
    /// Revenue generated per unit of spend (a return multiple, `>= 0`).
    pub expected_incremental_return: f64,
    /// Fraction of revenue retained as margin, in `[0, 1]`.
    pub margin_fraction: f64,
    /// Probability the unit cannot fulfil demand, in `[0, 1]`.
    pub stock_risk_probability: f64,
    /// Prior-period spend (informational).
    #[cfg_attr(feature = "serde", serde(default))]
    pub historical_spend: f64,
}

impl AllocationCandidate {
    pub fn new(
        channel_id: impl Into<String>,
        placement_type: impl Into<String>,
        expected_incremental_return: f64,
        margin_fraction: f64,
        stock_risk_probability: f64,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            placement_type: placement_type.into(),
            audience_id: None,
            product_id: None,
            expected_incremental_return,
            margin_fraction,
            stock_risk_probability,
            historical_spend: 0.0,
        }
    }

    pub fn with_audience(mut self, audience_id: impl Into<String>) -> Self {
        self.audience_id = Some(audience_id.into());
        self
    }

    pub fn with_product(mut self, product_id: impl Into<String>) -> Self {
        self.product_id = Some(product_id.into());
        self
    }

    pub fn with_historical_spend(mut self, spend: f64) -> Self {
        self.historical_spend = spend;
        self
    }

    /// `channel/placement` label used in rationale lines and logs.
    pub fn label(&self) -> String {
        format!("{}/{}", self.channel_id, self.placement_type)
    }

    fn validate(&self, index: usize) -> Result<()> {
        if self.channel_id.is_empty() {
            return Err(Error::MissingIdentifier {
                index,
                field: "channel_id",
            });
        }
        if self.placement_type.is_empty() {
            return Err(Error::MissingIdentifier {
                index,
                field: "placement_type",
            });
        }
        let out_of_range = |field: &'static str, value: f64| Error::CandidateFieldOutOfRange {
            index,
            field,
            value,
        };
        let r = self.expected_incremental_return;
        if !(r.is_finite() && r >= 0.0) {
            return Err(out_of_range("expected_incremental_return", r));
        }
        if !is_unit_interval(self.margin_fraction) {
            return Err(out_of_range("margin_fraction", self.margin_fraction));
        }
        if !is_unit_interval(self.stock_risk_probability) {
            return Err(out_of_range(
                "stock_risk_probability",
                self.stock_risk_probability,
            ));
        }
        let h = self.historical_spend;
        if !(h.is_finite() && h >= 0.0) {
            return Err(out_of_range("historical_spend", h));
        }
        Ok(())
    }
}

fn is_unit_interval(x: f64) -> bool {
    x.is_finite() && (0.0..=1.0).contains(&x)
}

/// Which candidate attribute a [`ScopeCap`] matches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ScopeKind {
    Channel,
    Placement,
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeKind::Channel => f.write_str("channel"),
            ScopeKind::Placement => f.write_str("placement"),
        }
    }
}

impl FromStr for ScopeKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "channel" => Ok(ScopeKind::Channel),
            "placement" => Ok(ScopeKind::Placement),
            _ => Err(Error::UnknownScopeKind(s.to_string())),
        }
    }
}

/// Ceiling on total spend across all candidates sharing a channel or placement.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScopeCap {
    pub scope_kind: ScopeKind,
    pub scope_id: String,
    pub max_budget: f64,
}

impl ScopeCap {
    pub fn channel(scope_id: impl Into<String>, max_budget: f64) -> Self {
        Self {
            scope_kind: ScopeKind::Channel,
            scope_id: scope_id.into(),
            max_budget,
        }
    }

    pub fn placement(scope_id: impl Into<String>, max_budget: f64) -> Self {
        Self {
            scope_kind: ScopeKind::Placement,
            scope_id: scope_id.into(),
            max_budget,
        }
    }

    pub fn matches(&self, candidate: &AllocationCandidate) -> bool {
        match self.scope_kind {
            ScopeKind::Channel => candidate.channel_id == self.scope_id,
            ScopeKind::Placement => candidate.placement_type == self.scope_id,
        }
    }

    /// Key used in [`AllocationResult::constraint_satisfaction`].
    pub fn constraint_name(&self) -> String {
        format!("scope_cap:{}:{}", self.scope_kind, self.scope_id)
    }
}

/// Allocation request envelope: hard and soft business constraints.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct BudgetConstraints {
    /// Budget-weighted average return must be at least this value.
    pub minimum_blended_return: Option<f64>,
    /// Converted internally to a return floor of `1 / maximum_acquisition_cost`.
    pub maximum_acquisition_cost: Option<f64>,
    /// Share of the total budget withheld for experimentation, in `[0, 1)`.
    pub experiment_reserve_fraction: f64,
    /// Candidates whose stock risk is strictly above this are excluded.
    pub stock_risk_threshold: f64,
    pub excluded_product_ids: BTreeSet<String>,
    pub scope_caps: Vec<ScopeCap>,
}

impl Default for BudgetConstraints {
    fn default() -> Self {
        Self {
            minimum_blended_return: None,
            maximum_acquisition_cost: None,
            experiment_reserve_fraction: 0.0,
            stock_risk_threshold: 1.0,
            excluded_product_ids: BTreeSet::new(),
            scope_caps: Vec::new(),
        }
    }
}

impl BudgetConstraints {
    pub fn with_minimum_blended_return(mut self, floor: f64) -> Self {
        self.minimum_blended_return = Some(floor);
        self
    }

    pub fn with_maximum_acquisition_cost(mut self, cost: f64) -> Self {
        self.maximum_acquisition_cost = Some(cost);
        self
    }

    pub fn with_experiment_reserve(mut self, fraction: f64) -> Self {
        self.experiment_reserve_fraction = fraction;
        self
    }

    pub fn with_stock_risk_threshold(mut self, threshold: f64) -> Self {
        self.stock_risk_threshold = threshold;
        self
    }

    pub fn exclude_product(mut self, product_id: impl Into<String>) -> Self {
        self.excluded_product_ids.insert(product_id.into());
        self
    }

    pub fn with_scope_cap(mut self, cap: ScopeCap) -> Self {
        self.scope_caps.push(cap);
        self
    }

    /// Return floor implied by the acquisition-cost ceiling.
    pub fn acquisition_return_floor(&self) -> Option<f64> {
        self.maximum_acquisition_cost.map(|c| 1.0 / c)
    }

    /// The binding return floor: the larger of the explicit floor and the
    /// acquisition-cost equivalent, if either is declared.
    pub fn effective_return_floor(&self) -> Option<f64> {
        match (self.minimum_blended_return, self.acquisition_return_floor()) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    fn validate(&self) -> Result<()> {
        let reserve = self.experiment_reserve_fraction;
        if !(reserve.is_finite() && (0.0..1.0).contains(&reserve)) {
            return Err(Error::InvalidReserveFraction(reserve));
        }
        if !is_unit_interval(self.stock_risk_threshold) {
            return Err(Error::InvalidStockRiskThreshold(self.stock_risk_threshold));
        }
        if let Some(floor) = self.minimum_blended_return {
            if !(floor.is_finite() && floor >= 0.0) {
                return Err(Error::InvalidReturnFloor(floor));
            }
        }
        if let Some(cost) = self.maximum_acquisition_cost {
            if !(cost.is_finite() && cost > 0.0) {
                return Err(Error::InvalidAcquisitionCost(cost));
            }
        }
        for (index, cap) in self.scope_caps.iter().enumerate() {
            if !(cap.max_budget.is_finite() && cap.max_budget >= 0.0) {
                return Err(Error::InvalidScopeCap {
                    index,
                    max_budget: cap.max_budget,
                });
            }
        }
        Ok(())
    }
}

/// What the allocator maximizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
pub enum Objective {
    #[default]
    MaximizeMargin,
    MaximizeRevenue,
}

impl Objective {
    /// Risk-adjusted value per unit of spend for `candidate` under this objective.
    pub fn coefficient(self, candidate: &AllocationCandidate) -> f64 {
        let survive = 1.0 - candidate.stock_risk_probability;
        match self {
            Objective::MaximizeMargin => {
                candidate.expected_incremental_return * candidate.margin_fraction * survive
            }
            Objective::MaximizeRevenue => candidate.expected_incremental_return * survive,
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            Objective::MaximizeMargin => "expected incremental margin",
            Objective::MaximizeRevenue => "expected incremental revenue",
        }
    }
}

impl FromStr for Objective {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "maximize_margin" | "margin" => Ok(Objective::MaximizeMargin),
            "maximize_revenue" | "revenue" => Ok(Objective::MaximizeRevenue),
            _ => Err(Error::UnknownObjective(s.to_string())),
        }
    }
}

/// Which allocator the orchestrator dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
pub enum Method {
    #[default]
    Convex,
    Bandit,
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "convex" => Ok(Method::Convex),
            "bandit" => Ok(Method::Bandit),
            _ => Err(Error::UnknownMethod(s.to_string())),
        }
    }
}

/// Request record consumed by [`crate::AllocationEngine::allocate_request`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AllocateRequest {
    pub total_budget: f64,
    #[cfg_attr(feature = "serde", serde(default))]
    pub objective: Objective,
    #[cfg_attr(feature = "serde", serde(default))]
    pub method: Method,
    #[cfg_attr(feature = "serde", serde(default))]
    pub candidates: Vec<AllocationCandidate>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub constraints: BudgetConstraints,
}

/// Validate a request before any allocation logic runs.
///
/// Nothing is corrected silently: the first malformed field is reported.
pub fn validate_request(
    candidates: &[AllocationCandidate],
    constraints: &BudgetConstraints,
    total_budget: f64,
) -> Result<()> {
    if !(total_budget.is_finite() && total_budget > 0.0) {
        return Err(Error::InvalidBudget(total_budget));
    }
    constraints.validate()?;
    for (i, c) in candidates.iter().enumerate() {
        c.validate(i)?;
    }
    Ok(())
}

/// Spend assigned to one candidate.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Allocation {
    /// Position of the candidate in the request's candidate list.
    pub candidate_index: usize,
    pub candidate: AllocationCandidate,
    pub allocated_budget: f64,
    /// `allocated_budget * expected_incremental_return`.
    pub expected_incremental_revenue: f64,
    /// `expected_incremental_revenue * margin_fraction`.
    pub expected_incremental_margin: f64,
}

impl Allocation {
    pub fn new(candidate_index: usize, candidate: &AllocationCandidate, budget: f64) -> Self {
        let revenue = budget * candidate.expected_incremental_return;
        Self {
            candidate_index,
            candidate: candidate.clone(),
            allocated_budget: budget,
            expected_incremental_revenue: revenue,
            expected_incremental_margin: revenue * candidate.margin_fraction,
        }
    }
}

/// Sort allocations by budget (descending), ties by input position.
pub(crate) fn sort_allocations(allocations: &mut [Allocation]) {
    allocations.sort_by(|a, b| {
        b.allocated_budget
            .total_cmp(&a.allocated_budget)
            .then_with(|| a.candidate_index.cmp(&b.candidate_index))
    });
}

/// Request-level output.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AllocationResult {
    /// Non-zero allocations, largest first.
    pub allocations: Vec<Allocation>,
    pub total_allocated: f64,
    pub experiment_budget: f64,
    /// `Σ(budget_i · return_i) / Σ budget_i`, or 0 when nothing was allocated.
    pub expected_blended_return: f64,
    /// Solver-independent re-check of every declared constraint.
    pub constraint_satisfaction: BTreeMap<String, bool>,
    pub rationale: Vec<String>,
    pub used_fallback: bool,
    /// Which allocator actually produced `allocations`.
    pub path: AllocationPath,
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub fallback_reason: Option<FallbackReason>,
}

impl AllocationResult {
    /// Budget assigned to the candidate at `candidate_index` (0 when omitted).
    pub fn budget_for(&self, candidate_index: usize) -> f64 {
        self.allocations
            .iter()
            .find(|a| a.candidate_index == candidate_index)
            .map(|a| a.allocated_budget)
            .unwrap_or(0.0)
    }

    /// Whether every declared constraint held on the realized allocation.
    pub fn all_constraints_satisfied(&self) -> bool {
        self.constraint_satisfaction.values().all(|ok| *ok)
    }
}
