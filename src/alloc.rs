//! Proportional split helpers shared by the bandit and fallback allocators.
//!
//! Deterministic utilities for turning non-negative scores into budget shares.

/// Split `budget` across `scores` in proportion to each score.
///
/// - Non-finite and negative scores count as zero.
/// - Returns all zeros (same length) when the scores sum to zero.
/// - Otherwise the shares sum to `budget` up to floating-point rounding.
pub fn proportional_split(scores: &[f64], budget: f64) -> Vec<f64> {
    let clean = |s: f64| if s.is_finite() && s > 0.0 { s } else { 0.0 };
    let total: f64 = scores.iter().copied().map(clean).sum();
    if !(total > 0.0 && total.is_finite()) || !(budget > 0.0) {
        return vec![0.0; scores.len()];
    }
    scores
        .iter()
        .map(|&s| budget * clean(s) / total)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn split_is_proportional() {
        let shares = proportional_split(&[1.0, 3.0, 0.0], 100.0);
        assert_eq!(shares, vec![25.0, 75.0, 0.0]);
    }

    #[test]
    fn zero_scores_allocate_nothing() {
        assert_eq!(proportional_split(&[0.0, -1.0, f64::NAN], 10.0), vec![0.0; 3]);
        assert!(proportional_split(&[], 10.0).is_empty());
    }

    proptest! {
        #[test]
        fn split_conserves_budget(
            scores in proptest::collection::vec(
                prop_oneof![Just(0.0), Just(f64::NAN), -5.0f64..0.0, 1e-6f64..1e3],
                1..40,
            ),
            budget in 1.0f64..1.0e7,
        ) {
            let shares = proportional_split(&scores, budget);
            prop_assert_eq!(shares.len(), scores.len());
            for &s in &shares {
                prop_assert!(s.is_finite());
                prop_assert!(s >= 0.0);
            }
            let sum: f64 = shares.iter().sum();
            let any_positive = scores.iter().any(|s| s.is_finite() && *s > 0.0);
            if any_positive {
                prop_assert!((sum - budget).abs() <= 1e-6 * budget, "sum={} budget={}", sum, budget);
            } else {
                prop_assert_eq!(sum, 0.0);
            }
        }
    }
}
