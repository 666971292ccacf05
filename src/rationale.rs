//! Human-readable justification for a finished allocation.

use crate::{Allocation, AllocationPath, FallbackReason, Method, Objective};

/// Everything the rationale needs to know about a finished allocation.
#[derive(Debug, Clone, Copy)]
pub struct RationaleContext<'a> {
    /// Allocations ordered largest first.
    pub allocations: &'a [Allocation],
    pub objective: Objective,
    pub method: Method,
    pub path: AllocationPath,
    pub experiment_reserve_fraction: f64,
    pub experiment_budget: f64,
    pub fallback_reason: Option<&'a FallbackReason>,
    pub top_n: usize,
}

/// Build the rationale lines, in order:
///
/// 1. a fallback notice, when the primary optimizer was abandoned, worded by
///    whether the constraints were infeasible or the solve itself failed;
/// 2. the optimized objective and allocator;
/// 3. the experiment reserve, when non-zero;
/// 4. one line per top-`top_n` allocation;
/// 5. a note when nothing was allocated.
pub fn generate_rationale(ctx: &RationaleContext<'_>) -> Vec<String> {
    let mut lines = Vec::new();

    if ctx.path == AllocationPath::Fallback {
        let outcome = match ctx.fallback_reason {
            None
            | Some(FallbackReason::Infeasible)
            | Some(FallbackReason::ReturnFloorUnattainable { .. })
            | Some(FallbackReason::NoEligibleCandidates) => "was infeasible",
            Some(FallbackReason::Unbounded)
            | Some(FallbackReason::DidNotConverge { .. })
            | Some(FallbackReason::ZeroSpendOptimum) => "failed",
        };
        let reason = ctx
            .fallback_reason
            .map(|r| format!(" ({r})"))
            .unwrap_or_default();
        lines.push(format!(
            "Primary optimization {outcome}{reason}; used proportional fallback allocation"
        ));
    }

    let via = match ctx.method {
        Method::Convex => "linear programming",
        Method::Bandit => "Thompson sampling",
    };
    lines.push(format!("Optimized {} via {via}", ctx.objective.describe()));

    if ctx.experiment_reserve_fraction > 0.0 {
        lines.push(format!(
            "Reserved {:.1}% of budget (${:.2}) for experimentation",
            ctx.experiment_reserve_fraction * 100.0,
            ctx.experiment_budget
        ));
    }

    for a in ctx.allocations.iter().take(ctx.top_n) {
        lines.push(format!(
            "${:.2} allocated to {} due to return of {:.2}",
            a.allocated_budget,
            a.candidate.label(),
            a.candidate.expected_incremental_return
        ));
    }

    if ctx.allocations.is_empty() {
        lines.push("No eligible candidates received budget".to_string());
    }
    lines
}
