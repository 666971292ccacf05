//! Deterministic proportional allocation.
//!
//! Used whenever the convex path cannot produce an optimum. It always returns
//! *some* allocation: every eligible candidate gets a share proportional to its
//! objective coefficient. Return floors and scope caps are not enforced here.

use crate::{
    constraint::is_excluded, proportional_split, sort_allocations, Allocation,
    AllocationCandidate, BudgetConstraints, Objective,
};

/// Split `allocatable_budget` over non-excluded candidates by objective score.
///
/// An empty result (every candidate excluded or zero-scored) is a valid
/// terminal state, not a failure.
pub fn fallback_allocate(
    candidates: &[AllocationCandidate],
    constraints: &BudgetConstraints,
    allocatable_budget: f64,
    objective: Objective,
) -> Vec<Allocation> {
    let scores: Vec<f64> = candidates
        .iter()
        .map(|c| {
            if is_excluded(c, constraints) {
                0.0
            } else {
                objective.coefficient(c)
            }
        })
        .collect();

    let mut out: Vec<Allocation> = proportional_split(&scores, allocatable_budget)
        .into_iter()
        .enumerate()
        .filter(|(_, budget)| *budget > 0.0)
        .map(|(i, budget)| Allocation::new(i, &candidates[i], budget))
        .collect();
    sort_allocations(&mut out);
    out
}
