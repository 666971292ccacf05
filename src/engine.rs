//! Allocation orchestrator: the public entry point.
//!
//! [`AllocationEngine`] validates a request, withholds the experiment reserve,
//! dispatches to the convex or bandit allocator, substitutes the fallback when
//! the convex path fails, re-verifies every declared constraint, and attaches
//! the rationale.
//!
//! ```text
//! let engine = AllocationEngine::default();
//! let result = engine.allocate(&candidates, &constraints, budget, objective, method)?;
//! engine.update(&arm, reward)?;   // feedback loop, bandit mode
//! ```
//!
//! The convex and fallback paths are pure functions of their inputs. The only
//! shared mutable state is the bandit's arm store.

use tracing::{debug, warn};

use crate::{
    constraint::{blended_return, verify_constraints},
    convex_allocate, fallback_allocate, generate_rationale, validate_request, AllocateRequest,
    Allocation, AllocationCandidate, AllocationPath, AllocationResult, ArmKey, ArmStore,
    BanditAllocator, BudgetConstraints, EngineConfig, Error, FallbackReason, InMemoryArmStore,
    LpSolver, Method, Objective, RationaleContext, Result, SimplexSolver,
};

/// Budget allocation engine.
pub struct AllocationEngine<S = InMemoryArmStore> {
    cfg: EngineConfig,
    solver: Box<dyn LpSolver>,
    bandit: BanditAllocator<S>,
}

impl AllocationEngine<InMemoryArmStore> {
    /// Engine with the bundled simplex solver and an in-memory arm store.
    pub fn new(cfg: EngineConfig) -> Self {
        let store = InMemoryArmStore::new(cfg.bandit);
        Self::with_arm_store(cfg, store)
    }
}

impl Default for AllocationEngine<InMemoryArmStore> {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl<S: ArmStore> AllocationEngine<S> {
    /// Engine backed by a caller-supplied arm store (e.g. an external keyed store).
    pub fn with_arm_store(cfg: EngineConfig, store: S) -> Self {
        let bandit = BanditAllocator::with_store(store, cfg.bandit.seed);
        Self {
            solver: Box::new(SimplexSolver::new(cfg.solver)),
            cfg,
            bandit,
        }
    }

    /// Replace the LP solver.
    pub fn with_solver(mut self, solver: impl LpSolver + 'static) -> Self {
        self.solver = Box::new(solver);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    pub fn arm_store(&self) -> &S {
        self.bandit.store()
    }

    /// Allocate `total_budget` across `candidates`.
    ///
    /// Fails only on malformed input. Solver trouble on the convex path is
    /// absorbed by the fallback allocator and reported on the result.
    pub fn allocate(
        &self,
        candidates: &[AllocationCandidate],
        constraints: &BudgetConstraints,
        total_budget: f64,
        objective: Objective,
        method: Method,
    ) -> Result<AllocationResult> {
        self.run(candidates, constraints, total_budget, objective, method, None)
    }

    /// Like [`Self::allocate`], with an explicit seed for the bandit draws.
    /// The convex path ignores the seed.
    pub fn allocate_seeded(
        &self,
        candidates: &[AllocationCandidate],
        constraints: &BudgetConstraints,
        total_budget: f64,
        objective: Objective,
        method: Method,
        seed: u64,
    ) -> Result<AllocationResult> {
        self.run(
            candidates,
            constraints,
            total_budget,
            objective,
            method,
            Some(seed),
        )
    }

    pub fn allocate_request(&self, req: &AllocateRequest) -> Result<AllocationResult> {
        self.allocate(
            &req.candidates,
            &req.constraints,
            req.total_budget,
            req.objective,
            req.method,
        )
    }

    /// Feed one realized outcome back into an arm's posterior.
    pub fn update(&self, arm: &ArmKey, reward: f64) -> Result<()> {
        if !(reward.is_finite() && (0.0..=1.0).contains(&reward)) {
            return Err(Error::InvalidReward(reward));
        }
        self.bandit.store().update_arm(arm, reward);
        Ok(())
    }

    fn run(
        &self,
        candidates: &[AllocationCandidate],
        constraints: &BudgetConstraints,
        total_budget: f64,
        objective: Objective,
        method: Method,
        seed: Option<u64>,
    ) -> Result<AllocationResult> {
        validate_request(candidates, constraints, total_budget)?;

        let experiment_budget = total_budget * constraints.experiment_reserve_fraction;
        let allocatable = total_budget - experiment_budget;

        let (allocations, path, fallback_reason) = if candidates.is_empty() {
            let path = match method {
                Method::Convex => AllocationPath::Convex,
                Method::Bandit => AllocationPath::Bandit,
            };
            (Vec::new(), path, None)
        } else {
            match method {
                Method::Convex => self.run_convex(candidates, constraints, allocatable, objective),
                Method::Bandit => {
                    let allocations = match seed {
                        Some(seed) => self.bandit.allocate_seeded(
                            candidates,
                            constraints,
                            allocatable,
                            objective,
                            seed,
                        ),
                        None => self
                            .bandit
                            .allocate(candidates, constraints, allocatable, objective),
                    };
                    (allocations, AllocationPath::Bandit, None)
                }
            }
        };

        let total_allocated: f64 = allocations.iter().map(|a| a.allocated_budget).sum();
        let expected_blended_return = blended_return(&allocations);
        let constraint_satisfaction = verify_constraints(&allocations, constraints, allocatable);
        let rationale = generate_rationale(&RationaleContext {
            allocations: &allocations,
            objective,
            method,
            path,
            experiment_reserve_fraction: constraints.experiment_reserve_fraction,
            experiment_budget,
            fallback_reason: fallback_reason.as_ref(),
            top_n: self.cfg.rationale_top_n,
        });
        debug!(
            %path,
            candidates = candidates.len(),
            funded = allocations.len(),
            total_allocated,
            experiment_budget,
            expected_blended_return,
            "allocation complete"
        );

        Ok(AllocationResult {
            used_fallback: path == AllocationPath::Fallback,
            allocations,
            total_allocated,
            experiment_budget,
            expected_blended_return,
            constraint_satisfaction,
            rationale,
            path,
            fallback_reason,
        })
    }

    fn run_convex(
        &self,
        candidates: &[AllocationCandidate],
        constraints: &BudgetConstraints,
        allocatable: f64,
        objective: Objective,
    ) -> (Vec<Allocation>, AllocationPath, Option<FallbackReason>) {
        let threshold = self.cfg.materiality_threshold(allocatable);
        match convex_allocate(
            self.solver.as_ref(),
            candidates,
            constraints,
            allocatable,
            objective,
            threshold,
        ) {
            Ok(allocations) => (allocations, AllocationPath::Convex, None),
            Err(reason) => {
                warn!(%reason, "convex allocation failed; using proportional fallback");
                let allocations = fallback_allocate(candidates, constraints, allocatable, objective);
                (allocations, AllocationPath::Fallback, Some(reason))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LinearProgram, LpSolution, LpStatus};

    struct AlwaysInfeasible;

    impl LpSolver for AlwaysInfeasible {
        fn solve(&self, lp: &LinearProgram) -> LpSolution {
            LpSolution {
                status: LpStatus::Infeasible,
                x: vec![0.0; lp.num_vars()],
                objective_value: 0.0,
                iterations: 0,
            }
        }

        fn iteration_budget(&self) -> usize {
            0
        }
    }

    fn cands() -> Vec<AllocationCandidate> {
        vec![
            AllocationCandidate::new("social", "feed", 3.2, 0.25, 0.05),
            AllocationCandidate::new("search", "top", 3.5, 0.30, 0.03),
        ]
    }

    #[test]
    fn injected_solver_failure_degrades_to_fallback() {
        let engine = AllocationEngine::default().with_solver(AlwaysInfeasible);
        let r = engine
            .allocate(
                &cands(),
                &BudgetConstraints::default(),
                1_000.0,
                Objective::MaximizeMargin,
                Method::Convex,
            )
            .unwrap();
        assert!(r.used_fallback);
        assert_eq!(r.path, AllocationPath::Fallback);
        assert_eq!(r.fallback_reason, Some(FallbackReason::Infeasible));
        assert!((r.total_allocated - 1_000.0).abs() < 1e-6);
        assert!(r.rationale[0].contains("infeasible"));
    }

    #[test]
    fn invalid_requests_fail_fast() {
        let engine = AllocationEngine::default();
        let err = engine
            .allocate(
                &cands(),
                &BudgetConstraints::default().with_experiment_reserve(1.5),
                1_000.0,
                Objective::MaximizeMargin,
                Method::Bandit,
            )
            .unwrap_err();
        assert_eq!(err, Error::InvalidReserveFraction(1.5));
        assert!(err.is_invalid_request());
        // Validation runs before any arm is touched.
        assert!(engine.arm_store().is_empty());
    }

    #[test]
    fn update_rejects_out_of_range_rewards() {
        let engine = AllocationEngine::default();
        let arm = ArmKey::new("search", "top");
        assert_eq!(engine.update(&arm, 1.5), Err(Error::InvalidReward(1.5)));
        assert!(engine.update(&arm, f64::NAN).is_err());
        engine.update(&arm, 1.0).unwrap();
        assert_eq!(engine.arm_store().get_or_create_arm(&arm).pulls, 1);
    }

    #[test]
    fn request_record_dispatches_like_allocate() {
        let engine = AllocationEngine::default();
        let req = AllocateRequest {
            total_budget: 500.0,
            objective: Objective::MaximizeRevenue,
            method: Method::Convex,
            candidates: cands(),
            constraints: BudgetConstraints::default(),
        };
        let a = engine.allocate_request(&req).unwrap();
        let b = engine
            .allocate(
                &req.candidates,
                &req.constraints,
                req.total_budget,
                req.objective,
                req.method,
            )
            .unwrap();
        assert_eq!(a, b);
        assert!(a.rationale[0].contains("revenue"));
    }
}
