//! Audit record of which allocator produced a result, and why the primary
//! optimizer was abandoned when it was.
//!
//! Reasons are small, typed, and stable so they can be logged, rendered into
//! rationale lines, and matched on by callers. Prefer adding new variants over
//! changing existing semantics.

use std::fmt;

/// The allocator whose output ended up in the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum AllocationPath {
    /// Linear-program optimum.
    #[default]
    Convex,
    /// Thompson-sampling proportional allocation.
    Bandit,
    /// Deterministic proportional split after the convex path failed.
    Fallback,
}

impl fmt::Display for AllocationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocationPath::Convex => f.write_str("convex"),
            AllocationPath::Bandit => f.write_str("bandit"),
            AllocationPath::Fallback => f.write_str("fallback"),
        }
    }
}

/// Why the convex allocator handed control to the fallback.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum FallbackReason {
    /// Every candidate was excluded or has a zero objective coefficient.
    NoEligibleCandidates,

    /// The return floor exceeds the best return any eligible candidate offers.
    ReturnFloorUnattainable { floor: f64, best_return: f64 },

    /// The solver proved the constraint set infeasible.
    Infeasible,

    /// The solver reported an unbounded objective (should not happen with a
    /// budget row present; treated as numerical degeneracy).
    Unbounded,

    /// The solver hit its iteration budget before converging.
    DidNotConverge { iterations: usize },

    /// The optimum spends nothing even though eligible candidates exist.
    ZeroSpendOptimum,
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::NoEligibleCandidates => f.write_str("no eligible candidates"),
            FallbackReason::ReturnFloorUnattainable { floor, best_return } => write!(
                f,
                "return floor {floor:.2} exceeds best eligible return {best_return:.2}"
            ),
            FallbackReason::Infeasible => f.write_str("constraints are infeasible"),
            FallbackReason::Unbounded => f.write_str("solver reported an unbounded objective"),
            FallbackReason::DidNotConverge { iterations } => {
                write!(f, "solver did not converge within {iterations} iterations")
            }
            FallbackReason::ZeroSpendOptimum => {
                f.write_str("optimum allocates no spend under the declared constraints")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasons_render_their_numbers() {
        let r = FallbackReason::ReturnFloorUnattainable {
            floor: 10.0,
            best_return: 3.5,
        };
        assert_eq!(
            r.to_string(),
            "return floor 10.00 exceeds best eligible return 3.50"
        );
        assert_eq!(
            FallbackReason::DidNotConverge { iterations: 7 }.to_string(),
            "solver did not converge within 7 iterations"
        );
    }
}
