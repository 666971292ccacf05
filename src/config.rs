//! Engine configuration.
//!
//! Start with [`EngineConfig::default()`] and adjust via the `with_*` builders
//! or by setting fields directly.

/// Dense simplex solver limits.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SimplexConfig {
    /// Pivot budget across both phases. Exceeding it is reported as
    /// [`crate::LpStatus::IterationLimit`] and handled like infeasibility.
    pub max_iterations: usize,
    /// Pivot / reduced-cost tolerance.
    pub tolerance: f64,
}

impl Default for SimplexConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10_000,
            tolerance: 1e-9,
        }
    }
}

/// Thompson-sampling prior and seeding.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct BanditConfig {
    /// Prior alpha for unseen arms (must be > 0).
    pub alpha0: f64,
    /// Prior beta for unseen arms (must be > 0).
    pub beta0: f64,
    /// Base seed; unseeded calls derive a per-call seed from it.
    pub seed: u64,
}

impl Default for BanditConfig {
    fn default() -> Self {
        Self {
            alpha0: 1.0,
            beta0: 1.0,
            seed: 0,
        }
    }
}

/// Full configuration for an [`crate::AllocationEngine`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct EngineConfig {
    /// Convex allocations below `allocatable * materiality_fraction` are pinned to
    /// zero and the program re-solved.
    pub materiality_fraction: f64,
    /// Absolute lower bound on the materiality threshold (currency units).
    pub materiality_floor: f64,
    /// How many allocations the rationale lists individually.
    pub rationale_top_n: usize,
    pub solver: SimplexConfig,
    pub bandit: BanditConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            materiality_fraction: 1e-3,
            materiality_floor: 0.0,
            rationale_top_n: 5,
            solver: SimplexConfig::default(),
            bandit: BanditConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn with_materiality(mut self, fraction: f64, floor: f64) -> Self {
        self.materiality_fraction = fraction;
        self.materiality_floor = floor;
        self
    }

    pub fn with_rationale_top_n(mut self, n: usize) -> Self {
        self.rationale_top_n = n;
        self
    }

    pub fn with_solver(mut self, solver: SimplexConfig) -> Self {
        self.solver = solver;
        self
    }

    pub fn with_bandit_seed(mut self, seed: u64) -> Self {
        self.bandit.seed = seed;
        self
    }

    pub fn with_bandit_prior(mut self, alpha0: f64, beta0: f64) -> Self {
        self.bandit.alpha0 = alpha0;
        self.bandit.beta0 = beta0;
        self
    }

    /// Spend below this is pinned to zero on the convex path.
    ///
    /// Non-finite or negative settings are treated as zero.
    pub fn materiality_threshold(&self, allocatable_budget: f64) -> f64 {
        let sanitize = |x: f64| if x.is_finite() && x > 0.0 { x } else { 0.0 };
        (allocatable_budget * sanitize(self.materiality_fraction))
            .max(sanitize(self.materiality_floor))
    }
}
