//! Hard exclusion rules and the post-hoc constraint check.
//!
//! [`is_excluded`] is applied by every allocator before any spend is assigned.
//! [`verify_constraints`] re-checks the realized allocation against every
//! declared constraint without trusting the solver's own feasibility claim.

use std::collections::BTreeMap;

use crate::{Allocation, AllocationCandidate, BudgetConstraints};

/// Absolute slack (currency units) for budget and cap checks.
pub const BUDGET_TOLERANCE: f64 = 1.0;

/// Slack for the blended-return comparison.
pub const RETURN_TOLERANCE: f64 = 1e-6;

pub const CONSTRAINT_BUDGET: &str = "budget";
pub const CONSTRAINT_MINIMUM_BLENDED_RETURN: &str = "minimum_blended_return";
pub const CONSTRAINT_MAXIMUM_ACQUISITION_COST: &str = "maximum_acquisition_cost";
pub const CONSTRAINT_STOCK_RISK: &str = "stock_risk_threshold";
pub const CONSTRAINT_EXCLUDED_PRODUCTS: &str = "excluded_product_ids";

/// Whether `candidate` must receive zero spend.
///
/// Excluded iff its stock risk is strictly above the threshold, or its product
/// is on the exclusion list.
pub fn is_excluded(candidate: &AllocationCandidate, constraints: &BudgetConstraints) -> bool {
    candidate.stock_risk_probability > constraints.stock_risk_threshold
        || candidate
            .product_id
            .as_ref()
            .is_some_and(|p| constraints.excluded_product_ids.contains(p))
}

/// Indices of candidates that survive the exclusion rules, in input order.
pub fn eligible_indices(
    candidates: &[AllocationCandidate],
    constraints: &BudgetConstraints,
) -> Vec<usize> {
    candidates
        .iter()
        .enumerate()
        .filter(|(_, c)| !is_excluded(c, constraints))
        .map(|(i, _)| i)
        .collect()
}

/// Budget-weighted average return, or 0 when nothing is allocated.
pub fn blended_return(allocations: &[Allocation]) -> f64 {
    let spend: f64 = allocations.iter().map(|a| a.allocated_budget).sum();
    if spend <= 0.0 {
        return 0.0;
    }
    let weighted: f64 = allocations
        .iter()
        .map(|a| a.allocated_budget * a.candidate.expected_incremental_return)
        .sum();
    weighted / spend
}

/// Re-check every declared constraint against a finished allocation.
///
/// Always reports `budget`, `stock_risk_threshold`, and `excluded_product_ids`.
/// Return floors and scope caps are reported only when declared. Return floors
/// hold vacuously when nothing is spent.
pub fn verify_constraints(
    allocations: &[Allocation],
    constraints: &BudgetConstraints,
    allocatable_budget: f64,
) -> BTreeMap<String, bool> {
    let mut out = BTreeMap::new();
    let spent: f64 = allocations.iter().map(|a| a.allocated_budget).sum();
    let blended = blended_return(allocations);
    let floor_ok = |floor: f64| spent <= 0.0 || blended >= floor - RETURN_TOLERANCE;

    out.insert(
        CONSTRAINT_BUDGET.to_string(),
        spent <= allocatable_budget + BUDGET_TOLERANCE,
    );
    if let Some(floor) = constraints.minimum_blended_return {
        out.insert(
            CONSTRAINT_MINIMUM_BLENDED_RETURN.to_string(),
            floor_ok(floor),
        );
    }
    if let Some(floor) = constraints.acquisition_return_floor() {
        out.insert(
            CONSTRAINT_MAXIMUM_ACQUISITION_COST.to_string(),
            floor_ok(floor),
        );
    }

    let funded = allocations.iter().filter(|a| a.allocated_budget > 0.0);
    let (mut risk_ok, mut product_ok) = (true, true);
    for a in funded {
        if a.candidate.stock_risk_probability > constraints.stock_risk_threshold {
            risk_ok = false;
        }
        if a.candidate
            .product_id
            .as_ref()
            .is_some_and(|p| constraints.excluded_product_ids.contains(p))
        {
            product_ok = false;
        }
    }
    out.insert(CONSTRAINT_STOCK_RISK.to_string(), risk_ok);
    out.insert(CONSTRAINT_EXCLUDED_PRODUCTS.to_string(), product_ok);

    for cap in &constraints.scope_caps {
        let scope_spend: f64 = allocations
            .iter()
            .filter(|a| cap.matches(&a.candidate))
            .map(|a| a.allocated_budget)
            .sum();
        // Repeated caps on the same scope must all hold.
        let ok = scope_spend <= cap.max_budget + BUDGET_TOLERANCE;
        out.entry(cap.constraint_name())
            .and_modify(|prev| *prev &= ok)
            .or_insert(ok);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ScopeCap;

    fn cand(risk: f64, product: Option<&str>) -> AllocationCandidate {
        let c = AllocationCandidate::new("search", "top", 3.0, 0.3, risk);
        match product {
            Some(p) => c.with_product(p),
            None => c,
        }
    }

    #[test]
    fn excluded_when_risk_strictly_above_threshold() {
        let cons = BudgetConstraints::default().with_stock_risk_threshold(0.2);
        assert!(!is_excluded(&cand(0.2, None), &cons));
        assert!(is_excluded(&cand(0.21, None), &cons));
    }

    #[test]
    fn excluded_when_product_listed_regardless_of_risk() {
        let cons = BudgetConstraints::default().exclude_product("sku-1");
        assert!(is_excluded(&cand(0.0, Some("sku-1")), &cons));
        assert!(!is_excluded(&cand(0.0, Some("sku-2")), &cons));
        assert!(!is_excluded(&cand(0.0, None), &cons));
    }

    #[test]
    fn eligible_indices_preserve_input_order() {
        let cons = BudgetConstraints::default().with_stock_risk_threshold(0.5);
        let cs = vec![cand(0.1, None), cand(0.9, None), cand(0.4, None)];
        assert_eq!(eligible_indices(&cs, &cons), vec![0, 2]);
    }

    #[test]
    fn verify_flags_violations() {
        let low = AllocationCandidate::new("display", "side", 1.0, 0.2, 0.0);
        let allocations = vec![
            Allocation::new(0, &cand(0.9, None), 600.0),
            Allocation::new(1, &low, 600.0),
        ];
        let cons = BudgetConstraints::default()
            .with_minimum_blended_return(2.5)
            .with_stock_risk_threshold(0.5)
            .with_scope_cap(ScopeCap::channel("display", 500.0))
            .with_scope_cap(ScopeCap::channel("search", 700.0));
        let v = verify_constraints(&allocations, &cons, 1000.0);
        assert_eq!(v[CONSTRAINT_BUDGET], false);
        // blended = (600*3 + 600*1) / 1200 = 2.0
        assert_eq!(v[CONSTRAINT_MINIMUM_BLENDED_RETURN], false);
        assert_eq!(v[CONSTRAINT_STOCK_RISK], false);
        assert_eq!(v[CONSTRAINT_EXCLUDED_PRODUCTS], true);
        assert_eq!(v["scope_cap:channel:display"], false);
        assert_eq!(v["scope_cap:channel:search"], true);
        assert!(!v.contains_key(CONSTRAINT_MAXIMUM_ACQUISITION_COST));
    }

    #[test]
    fn floors_hold_vacuously_without_spend() {
        let cons = BudgetConstraints::default()
            .with_minimum_blended_return(10.0)
            .with_maximum_acquisition_cost(0.05);
        let v = verify_constraints(&[], &cons, 100.0);
        assert!(v.values().all(|ok| *ok));
        assert_eq!(blended_return(&[]), 0.0);
    }
}
