//! Constrained allocation as a linear program.
//!
//! ```text
//! maximize   Σ x_i · coef_i
//! subject to Σ x_i                      <= allocatable_budget
//!            Σ x_i · (return_i − floor) >= 0      (per declared return floor)
//!            Σ_{i ∈ scope} x_i           <= cap    (per scope cap)
//!            x_i = 0                              (excluded candidates)
//!            x_i >= 0
//! ```
//!
//! `coef_i` is the objective coefficient from [`Objective::coefficient`]. The
//! blended-return floor `Σ x_i r_i >= floor · Σ x_i` is linear once moved to
//! one side; the acquisition-cost ceiling contributes a second row with floor
//! `1 / max_cost`.
//!
//! Failure never surfaces as an error: the caller gets a [`FallbackReason`]
//! and switches to [`crate::fallback_allocate`].

use tracing::debug;

use crate::{
    constraint::{eligible_indices, is_excluded},
    sort_allocations, Allocation, AllocationCandidate, BudgetConstraints, FallbackReason,
    LinearProgram, LpSolver, LpStatus, Objective, Relation,
};

/// Slack when comparing a return floor against the best eligible return.
const FLOOR_EPS: f64 = 1e-9;

/// Build the allocation LP. Variable `i` is the spend on `candidates[i]`.
pub fn build_program(
    candidates: &[AllocationCandidate],
    constraints: &BudgetConstraints,
    allocatable_budget: f64,
    objective: Objective,
) -> LinearProgram {
    let n = candidates.len();
    let mut lp = LinearProgram::new(candidates.iter().map(|c| objective.coefficient(c)).collect());

    lp.add_constraint(vec![1.0; n], Relation::Le, allocatable_budget);

    let floors = [
        constraints.minimum_blended_return,
        constraints.acquisition_return_floor(),
    ];
    for floor in floors.into_iter().flatten() {
        let coeffs = candidates
            .iter()
            .map(|c| c.expected_incremental_return - floor)
            .collect();
        lp.add_constraint(coeffs, Relation::Ge, 0.0);
    }

    for (i, c) in candidates.iter().enumerate() {
        if is_excluded(c, constraints) {
            lp.fix_to_zero(i);
        }
    }

    for cap in &constraints.scope_caps {
        let coeffs = candidates
            .iter()
            .map(|c| if cap.matches(c) { 1.0 } else { 0.0 })
            .collect();
        lp.add_constraint(coeffs, Relation::Le, cap.max_budget);
    }
    lp
}

/// Solve the allocation LP and return material, non-zero allocations.
///
/// Allocations strictly below `materiality_threshold` are pinned to zero and
/// the program is re-solved until every remaining allocation is material, so
/// the result still meets every floor and cap. The output is ordered by
/// budget, largest first.
pub fn convex_allocate(
    solver: &dyn LpSolver,
    candidates: &[AllocationCandidate],
    constraints: &BudgetConstraints,
    allocatable_budget: f64,
    objective: Objective,
    materiality_threshold: f64,
) -> Result<Vec<Allocation>, FallbackReason> {
    let eligible = eligible_indices(candidates, constraints);
    if !eligible
        .iter()
        .any(|&i| objective.coefficient(&candidates[i]) > 0.0)
    {
        return Err(FallbackReason::NoEligibleCandidates);
    }

    if let Some(floor) = constraints.effective_return_floor() {
        let best_return = eligible
            .iter()
            .map(|&i| candidates[i].expected_incremental_return)
            .fold(0.0, f64::max);
        if floor > best_return + FLOOR_EPS {
            return Err(FallbackReason::ReturnFloorUnattainable { floor, best_return });
        }
    }

    let mut lp = build_program(candidates, constraints, allocatable_budget, objective);
    let mut pinned = vec![false; candidates.len()];
    loop {
        let x = solve_once(solver, &lp, candidates.len())?;

        // Immaterial spend is pinned to zero and the program re-solved, so the
        // freed budget is re-optimized under the same floors and caps.
        let immaterial: Vec<usize> = x
            .iter()
            .enumerate()
            .filter(|(i, &v)| !pinned[*i] && v > 0.0 && v < materiality_threshold)
            .map(|(i, _)| i)
            .collect();
        if immaterial.is_empty() {
            let mut out: Vec<Allocation> = x
                .iter()
                .enumerate()
                .filter(|(i, &v)| !pinned[*i] && v > 0.0)
                .map(|(i, &v)| Allocation::new(i, &candidates[i], v))
                .collect();
            if out.is_empty() {
                return Err(FallbackReason::ZeroSpendOptimum);
            }
            sort_allocations(&mut out);
            return Ok(out);
        }
        debug!(
            pinned = immaterial.len(),
            materiality_threshold, "re-solving without immaterial allocations"
        );
        for i in immaterial {
            pinned[i] = true;
            lp.fix_to_zero(i);
        }
    }
}

/// One solver call, with non-optimal outcomes mapped to a [`FallbackReason`].
fn solve_once(
    solver: &dyn LpSolver,
    lp: &LinearProgram,
    num_vars: usize,
) -> Result<Vec<f64>, FallbackReason> {
    let sol = solver.solve(lp);
    debug!(
        status = ?sol.status,
        iterations = sol.iterations,
        objective_value = sol.objective_value,
        "convex allocation solved"
    );
    match sol.status {
        LpStatus::Optimal => {}
        LpStatus::Infeasible => return Err(FallbackReason::Infeasible),
        LpStatus::Unbounded => return Err(FallbackReason::Unbounded),
        LpStatus::IterationLimit => {
            return Err(FallbackReason::DidNotConverge {
                iterations: solver.iteration_budget(),
            })
        }
    }
    if sol.x.len() != num_vars || sol.x.iter().any(|v| !v.is_finite()) {
        return Err(FallbackReason::Unbounded);
    }
    Ok(sol.x)
}
