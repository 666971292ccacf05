//! Thompson-sampling budget allocation over (channel × placement) arms.
//!
//! Each arm keeps a Beta posterior over a binary "the spend paid off" outcome.
//! An allocation draws a posterior sample per candidate, scales it by the
//! candidate's objective coefficient, and splits the budget proportionally.
//! Realized outcomes flow back through [`ArmStore::update_arm`]; the allocator
//! itself never updates arm state.
//!
//! Notes:
//! - Draws are per candidate, not per arm: candidates sharing an arm sample
//!   independently from the same posterior. Each candidate's stream is seeded
//!   from `(call seed, candidate index, arm)`, so a seeded call is reproducible
//!   regardless of how many other candidates are present.
//! - Scope caps are applied after the proportional split, in declaration order,
//!   by scaling the scope's members down. Clipped spend is not redistributed.
//! - Arm state is the only cross-request mutable state in the crate. It lives
//!   behind [`ArmStore`]; the in-memory store takes a single lock per read
//!   snapshot or update, and sampling runs without holding it.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Beta, Distribution};
use tracing::{debug, warn};

use crate::{
    constraint::eligible_indices, derive_seed, proportional_split, sort_allocations,
    stable_hash64, Allocation, AllocationCandidate, BanditConfig, BudgetConstraints, Objective,
};

/// Arm identity: one (channel, placement) pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ArmKey {
    pub channel_id: String,
    pub placement_type: String,
}

impl ArmKey {
    pub fn new(channel_id: impl Into<String>, placement_type: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            placement_type: placement_type.into(),
        }
    }

    pub fn of(candidate: &AllocationCandidate) -> Self {
        Self::new(
            candidate.channel_id.clone(),
            candidate.placement_type.clone(),
        )
    }
}

impl fmt::Display for ArmKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.channel_id, self.placement_type)
    }
}

/// Beta posterior state for one arm.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BanditArmState {
    pub alpha: f64,
    pub beta: f64,
    pub pulls: u64,
}

impl BanditArmState {
    pub fn prior(alpha0: f64, beta0: f64) -> Self {
        let positive = |x: f64| if x.is_finite() && x > 0.0 { x } else { 1.0 };
        Self {
            alpha: positive(alpha0),
            beta: positive(beta0),
            pulls: 0,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.alpha.is_finite() && self.alpha > 0.0 && self.beta.is_finite() && self.beta > 0.0
    }

    /// Posterior mean.
    pub fn expected_value(&self) -> f64 {
        let denom = self.alpha + self.beta;
        if denom <= 0.0 {
            0.5
        } else {
            self.alpha / denom
        }
    }

    /// Binary-success update: `reward > 0.5` counts as a success.
    pub fn record(&mut self, reward: f64) {
        if reward > 0.5 {
            self.alpha += 1.0;
        } else {
            self.beta += 1.0;
        }
        self.pulls = self.pulls.saturating_add(1);
    }
}

impl Default for BanditArmState {
    fn default() -> Self {
        Self::prior(1.0, 1.0)
    }
}

/// Flat, persistable form of one arm.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ArmStateRecord {
    pub channel_id: String,
    pub placement_type: String,
    pub alpha: f64,
    pub beta: f64,
    pub pulls: u64,
}

/// Backing store for arm posteriors.
///
/// Implementations must make `get_or_create_arm` and `update_arm` atomic per
/// arm. An external keyed store can stand in for [`InMemoryArmStore`] without
/// touching the allocation algorithm.
pub trait ArmStore: Send + Sync {
    /// Current state of `key`, created from the prior if unseen.
    fn get_or_create_arm(&self, key: &ArmKey) -> BanditArmState;

    /// Apply one observed reward in `[0, 1]` to `key`.
    fn update_arm(&self, key: &ArmKey, reward: f64);

    /// Consistent read of several arms. The default reads them one by one.
    fn snapshot_arms(&self, keys: &[ArmKey]) -> BTreeMap<ArmKey, BanditArmState> {
        keys.iter()
            .map(|k| (k.clone(), self.get_or_create_arm(k)))
            .collect()
    }
}

/// Process-local arm store guarded by one mutex.
#[derive(Debug)]
pub struct InMemoryArmStore {
    prior: BanditArmState,
    arms: Mutex<BTreeMap<ArmKey, BanditArmState>>,
}

impl Default for InMemoryArmStore {
    fn default() -> Self {
        Self::new(BanditConfig::default())
    }
}

impl InMemoryArmStore {
    pub fn new(cfg: BanditConfig) -> Self {
        Self {
            prior: BanditArmState::prior(cfg.alpha0, cfg.beta0),
            arms: Mutex::new(BTreeMap::new()),
        }
    }

    /// Rebuild a store from persisted records.
    ///
    /// A corrupt record (non-finite or non-positive alpha/beta) is replaced by
    /// the prior, as if the arm had never been seen.
    pub fn restore(cfg: BanditConfig, records: impl IntoIterator<Item = ArmStateRecord>) -> Self {
        let store = Self::new(cfg);
        {
            let mut arms = store.lock();
            for r in records {
                let key = ArmKey::new(r.channel_id, r.placement_type);
                let state = BanditArmState {
                    alpha: r.alpha,
                    beta: r.beta,
                    pulls: r.pulls,
                };
                if state.is_valid() {
                    arms.insert(key, state);
                } else {
                    warn!(
                        arm = %key,
                        alpha = r.alpha,
                        beta = r.beta,
                        "corrupt arm state; resetting to prior"
                    );
                    arms.insert(key, store.prior);
                }
            }
        }
        store
    }

    /// Export every known arm in key order.
    pub fn records(&self) -> Vec<ArmStateRecord> {
        self.lock()
            .iter()
            .map(|(k, s)| ArmStateRecord {
                channel_id: k.channel_id.clone(),
                placement_type: k.placement_type.clone(),
                alpha: s.alpha,
                beta: s.beta,
                pulls: s.pulls,
            })
            .collect()
    }

    /// Number of arms seen so far.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // A panic while holding the lock cannot leave a half-written arm: every
    // mutation is a single field update on a `Copy` value.
    fn lock(&self) -> MutexGuard<'_, BTreeMap<ArmKey, BanditArmState>> {
        self.arms.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ArmStore for InMemoryArmStore {
    fn get_or_create_arm(&self, key: &ArmKey) -> BanditArmState {
        *self.lock().entry(key.clone()).or_insert(self.prior)
    }

    fn update_arm(&self, key: &ArmKey, reward: f64) {
        self.lock()
            .entry(key.clone())
            .or_insert(self.prior)
            .record(reward);
    }

    fn snapshot_arms(&self, keys: &[ArmKey]) -> BTreeMap<ArmKey, BanditArmState> {
        let mut arms = self.lock();
        keys.iter()
            .map(|k| (k.clone(), *arms.entry(k.clone()).or_insert(self.prior)))
            .collect()
    }
}

/// Thompson-sampling allocator over an [`ArmStore`].
#[derive(Debug)]
pub struct BanditAllocator<S = InMemoryArmStore> {
    store: S,
    seed: u64,
    calls: AtomicU64,
}

impl BanditAllocator<InMemoryArmStore> {
    pub fn new(cfg: BanditConfig) -> Self {
        Self::with_store(InMemoryArmStore::new(cfg), cfg.seed)
    }
}

impl<S: ArmStore> BanditAllocator<S> {
    pub fn with_store(store: S, seed: u64) -> Self {
        Self {
            store,
            seed,
            calls: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Allocate with a fresh seed derived from the base seed and a call counter.
    pub fn allocate(
        &self,
        candidates: &[AllocationCandidate],
        constraints: &BudgetConstraints,
        allocatable_budget: f64,
        objective: Objective,
    ) -> Vec<Allocation> {
        let n = self.calls.fetch_add(1, Ordering::Relaxed);
        let seed = derive_seed(self.seed, n);
        self.allocate_seeded(candidates, constraints, allocatable_budget, objective, seed)
    }

    /// Allocate with an explicit seed (reproducible for a fixed arm state).
    pub fn allocate_seeded(
        &self,
        candidates: &[AllocationCandidate],
        constraints: &BudgetConstraints,
        allocatable_budget: f64,
        objective: Objective,
        seed: u64,
    ) -> Vec<Allocation> {
        let eligible = eligible_indices(candidates, constraints);
        if eligible.is_empty() {
            return Vec::new();
        }
        let keys: Vec<ArmKey> = eligible.iter().map(|&i| ArmKey::of(&candidates[i])).collect();
        let posteriors = self.store.snapshot_arms(&keys);

        let mut scored: Vec<(usize, f64)> = eligible
            .iter()
            .zip(&keys)
            .map(|(&i, key)| {
                let state = posteriors.get(key).copied().unwrap_or_default();
                let mut rng = StdRng::seed_from_u64(stable_hash64(seed, &format!("{i}:{key}")));
                let draw = sample_beta(&mut rng, state);
                (i, draw * objective.coefficient(&candidates[i]))
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let scores: Vec<f64> = scored.iter().map(|(_, s)| *s).collect();
        let mut budgets = proportional_split(&scores, allocatable_budget);

        for cap in &constraints.scope_caps {
            let members: Vec<usize> = scored
                .iter()
                .enumerate()
                .filter(|(_, (i, _))| cap.matches(&candidates[*i]))
                .map(|(pos, _)| pos)
                .collect();
            let spend: f64 = members.iter().map(|&pos| budgets[pos]).sum();
            if spend > cap.max_budget {
                let factor = if spend > 0.0 { cap.max_budget / spend } else { 0.0 };
                for pos in members {
                    budgets[pos] *= factor;
                }
            }
        }

        let mut out: Vec<Allocation> = scored
            .iter()
            .zip(budgets)
            .filter(|(_, b)| *b > 0.0)
            .map(|(&(i, _), b)| Allocation::new(i, &candidates[i], b))
            .collect();
        sort_allocations(&mut out);
        debug!(
            eligible = eligible.len(),
            funded = out.len(),
            total = out.iter().map(|a| a.allocated_budget).sum::<f64>(),
            "bandit allocation"
        );
        out
    }
}

fn sample_beta(rng: &mut StdRng, state: BanditArmState) -> f64 {
    if !state.is_valid() {
        return 0.5;
    }
    match Beta::new(state.alpha, state.beta) {
        Ok(dist) => dist.sample(rng),
        Err(_) => 0.5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ScopeCap;

    fn cands() -> Vec<AllocationCandidate> {
        vec![
            AllocationCandidate::new("social", "feed", 3.0, 0.3, 0.0),
            AllocationCandidate::new("search", "top", 3.0, 0.3, 0.0),
            AllocationCandidate::new("search", "side", 3.0, 0.3, 0.0),
        ]
    }

    #[test]
    fn update_moves_expected_value() {
        let store = InMemoryArmStore::default();
        let key = ArmKey::new("search", "top");
        let before = store.get_or_create_arm(&key).expected_value();
        for _ in 0..10 {
            store.update_arm(&key, 1.0);
        }
        let after = store.get_or_create_arm(&key);
        assert!(after.expected_value() > before);
        assert_eq!(after.pulls, 10);
        assert_eq!(after.alpha, 11.0);

        store.update_arm(&key, 0.5);
        assert_eq!(store.get_or_create_arm(&key).beta, 2.0);
    }

    #[test]
    fn arms_are_created_lazily() {
        let store = InMemoryArmStore::default();
        assert!(store.is_empty());
        let bandit = BanditAllocator::with_store(store, 1);
        bandit.allocate(&cands(), &BudgetConstraints::default(), 100.0, Objective::MaximizeMargin);
        assert_eq!(bandit.store().len(), 3);
    }

    #[test]
    fn seeded_allocation_is_reproducible_and_conserves_budget() {
        let bandit = BanditAllocator::new(BanditConfig::default());
        let cons = BudgetConstraints::default();
        let a = bandit.allocate_seeded(&cands(), &cons, 1_000.0, Objective::MaximizeMargin, 9);
        let b = bandit.allocate_seeded(&cands(), &cons, 1_000.0, Objective::MaximizeMargin, 9);
        assert_eq!(a, b);
        let total: f64 = a.iter().map(|x| x.allocated_budget).sum();
        assert!((total - 1_000.0).abs() < 1e-6);
        for w in a.windows(2) {
            assert!(w[0].allocated_budget >= w[1].allocated_budget);
        }
    }

    #[test]
    fn caps_clip_without_redistribution() {
        let bandit = BanditAllocator::new(BanditConfig::default());
        let cons = BudgetConstraints::default().with_scope_cap(ScopeCap::channel("search", 10.0));
        let out = bandit.allocate_seeded(&cands(), &cons, 1_000.0, Objective::MaximizeMargin, 3);
        let search: f64 = out
            .iter()
            .filter(|a| a.candidate.channel_id == "search")
            .map(|a| a.allocated_budget)
            .sum();
        let total: f64 = out.iter().map(|a| a.allocated_budget).sum();
        assert!(search <= 10.0 + 1e-9);
        assert!(total < 1_000.0);
    }

    #[test]
    fn excluded_candidates_are_never_sampled() {
        let bandit = BanditAllocator::new(BanditConfig::default());
        let mut cs = cands();
        cs[1].stock_risk_probability = 0.9;
        let cons = BudgetConstraints::default().with_stock_risk_threshold(0.5);
        for seed in 0..20 {
            let out = bandit.allocate_seeded(&cs, &cons, 100.0, Objective::MaximizeMargin, seed);
            assert!(out.iter().all(|a| a.candidate_index != 1));
        }
        // The excluded arm was never created either.
        assert!(bandit
            .store()
            .records()
            .iter()
            .all(|r| !(r.channel_id == "search" && r.placement_type == "top")));
    }

    #[test]
    fn rewarded_arm_wins_more_budget_on_average() {
        let bandit = BanditAllocator::new(BanditConfig::default());
        let good = ArmKey::new("search", "top");
        for _ in 0..50 {
            bandit.store().update_arm(&good, 1.0);
        }
        let cs = vec![
            AllocationCandidate::new("social", "feed", 3.0, 0.3, 0.0),
            AllocationCandidate::new("search", "top", 3.0, 0.3, 0.0),
        ];
        let cons = BudgetConstraints::default();
        let (mut good_total, mut other_total) = (0.0, 0.0);
        for _ in 0..200 {
            let out = bandit.allocate(&cs, &cons, 1.0, Objective::MaximizeMargin);
            for a in out {
                if a.candidate_index == 1 {
                    good_total += a.allocated_budget;
                } else {
                    other_total += a.allocated_budget;
                }
            }
        }
        assert!(good_total > other_total, "good={good_total} other={other_total}");
    }

    #[test]
    fn restore_resets_corrupt_records() {
        let records = vec![
            ArmStateRecord {
                channel_id: "search".into(),
                placement_type: "top".into(),
                alpha: 5.0,
                beta: 2.0,
                pulls: 5,
            },
            ArmStateRecord {
                channel_id: "social".into(),
                placement_type: "feed".into(),
                alpha: f64::NAN,
                beta: -1.0,
                pulls: 3,
            },
        ];
        let store = InMemoryArmStore::restore(BanditConfig::default(), records);
        let good = store.get_or_create_arm(&ArmKey::new("search", "top"));
        assert_eq!((good.alpha, good.beta, good.pulls), (5.0, 2.0, 5));
        let reset = store.get_or_create_arm(&ArmKey::new("social", "feed"));
        assert_eq!(reset, BanditArmState::default());
        assert_eq!(store.records().len(), 2);
    }

    #[test]
    fn invalid_state_samples_neutral() {
        let mut rng = StdRng::seed_from_u64(0);
        let bad = BanditArmState {
            alpha: 0.0,
            beta: 1.0,
            pulls: 0,
        };
        assert_eq!(sample_beta(&mut rng, bad), 0.5);
    }
}
