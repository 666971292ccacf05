//! `spendmux`: constrained marketing-budget allocation.
//!
//! Designed for "where does the next dollar go" problems: you have a discrete
//! set of candidates (channel × placement × audience × product), each with an
//! externally estimated return multiple, margin, and stock risk, and a fixed
//! budget to spread across them under business constraints.
//!
//! An [`AllocationCandidate`] carries:
//! - `expected_incremental_return`: revenue per unit of spend (a return multiple).
//! - `margin_fraction`: share of that revenue kept as margin.
//! - `stock_risk_probability`: chance the unit cannot fulfil demand.
//!
//! [`BudgetConstraints`] carries the request envelope: a minimum blended return,
//! a maximum acquisition cost (treated as a return floor of `1 / cost`), an
//! experiment reserve, a stock-risk exclusion threshold, a product exclusion
//! list, and per-channel / per-placement spending caps.
//!
//! **Goals:**
//! - **Always an answer**: malformed input fails fast; everything else degrades
//!   to a fully specified [`AllocationResult`].
//! - **Deterministic by default**: the convex and fallback paths are pure; the
//!   bandit path is seedable.
//! - **Auditable**: every result carries a solver-independent constraint check
//!   and rationale lines.
//!
//! **Allocators:**
//! - [`convex_allocate`]: linear program over spend per candidate, solved by an
//!   injectable [`LpSolver`] (bundled: [`SimplexSolver`]).
//! - [`BanditAllocator`]: Thompson sampling over (channel × placement) arms with
//!   Beta posteriors, updated online through an [`ArmStore`].
//! - [`fallback_allocate`]: proportional split, used when the convex path is
//!   infeasible, degenerate, or does not converge.
//!
//! [`AllocationEngine`] ties these together: it withholds the experiment
//! reserve, dispatches on [`Method`], substitutes the fallback when needed, and
//! runs [`generate_rationale`].
//!
//! **Non-goals:**
//! - Training the models that produce the return priors.
//! - Scheduling or triggering re-optimization.
//! - Storage: [`InMemoryArmStore`] exports/imports plain records; durability is
//!   the caller's concern.

#![forbid(unsafe_code)]

mod error;
pub use error::*;

mod config;
pub use config::*;

mod candidate;
pub use candidate::*;
pub(crate) use candidate::sort_allocations;

mod decision;
pub use decision::*;

pub mod constraint;
pub use constraint::{is_excluded, verify_constraints};

mod alloc;
pub use alloc::*;

mod stable_hash;
pub use stable_hash::*;

mod lp;
pub use lp::*;

mod convex;
pub use convex::*;

mod fallback;
pub use fallback::*;

mod thompson;
pub use thompson::*;

mod rationale;
pub use rationale::*;

mod engine;
pub use engine::*;

pub const SPENDMUX_VERSION: &str = env!("CARGO_PKG_VERSION");
