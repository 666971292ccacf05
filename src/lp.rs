//! Linear-program solve as an injectable capability.
//!
//! Allocation logic only builds a [`LinearProgram`] and reads an [`LpSolution`];
//! any solver implementing [`LpSolver`] can be swapped in. The bundled
//! [`SimplexSolver`] is a dense two-phase tableau simplex, adequate for the
//! tens to low hundreds of variables an allocation request produces.
//!
//! Conventions:
//! - The objective is **maximized**.
//! - Every variable has an implicit lower bound of 0; upper bounds and
//!   fixings are ordinary constraint rows.
//! - Entering and leaving variables follow Bland's rule (lowest index), so
//!   the solve is deterministic and cannot cycle. Among columns with equal
//!   objective coefficients the earliest one enters first.

use tracing::debug;

use crate::SimplexConfig;

/// Sense of a constraint row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Le,
    Ge,
    Eq,
}

/// `coeffs · x  (relation)  rhs`.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearConstraint {
    pub coeffs: Vec<f64>,
    pub relation: Relation,
    pub rhs: f64,
}

/// `maximize objective · x` subject to `constraints`, `x >= 0`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LinearProgram {
    pub objective: Vec<f64>,
    pub constraints: Vec<LinearConstraint>,
}

impl LinearProgram {
    pub fn new(objective: Vec<f64>) -> Self {
        Self {
            objective,
            constraints: Vec::new(),
        }
    }

    pub fn num_vars(&self) -> usize {
        self.objective.len()
    }

    /// Append a constraint row. Short coefficient vectors are zero-padded.
    pub fn add_constraint(&mut self, coeffs: Vec<f64>, relation: Relation, rhs: f64) {
        self.constraints.push(LinearConstraint {
            coeffs,
            relation,
            rhs,
        });
    }

    /// Pin `x[var] = 0`.
    pub fn fix_to_zero(&mut self, var: usize) {
        let mut coeffs = vec![0.0; self.num_vars()];
        if let Some(c) = coeffs.get_mut(var) {
            *c = 1.0;
        }
        self.add_constraint(coeffs, Relation::Eq, 0.0);
    }
}

/// Terminal state of a solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LpStatus {
    Optimal,
    Infeasible,
    Unbounded,
    IterationLimit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LpSolution {
    pub status: LpStatus,
    /// Primal values; meaningful only when `status == Optimal`.
    pub x: Vec<f64>,
    pub objective_value: f64,
    /// Pivots performed across both phases.
    pub iterations: usize,
}

impl LpSolution {
    fn without_point(status: LpStatus, n: usize, iterations: usize) -> Self {
        Self {
            status,
            x: vec![0.0; n],
            objective_value: 0.0,
            iterations,
        }
    }
}

/// A linear-program solver.
pub trait LpSolver: Send + Sync {
    fn solve(&self, lp: &LinearProgram) -> LpSolution;

    /// Pivot budget, reported in [`crate::FallbackReason::DidNotConverge`].
    fn iteration_budget(&self) -> usize;
}

/// Dense two-phase simplex with Bland's rule.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimplexSolver {
    cfg: SimplexConfig,
}

impl SimplexSolver {
    pub fn new(cfg: SimplexConfig) -> Self {
        Self { cfg }
    }
}

enum Phase {
    Optimal,
    Unbounded,
    IterationLimit,
}

struct Tableau {
    /// `m` rows of `width + 1` entries; the last entry is the rhs.
    rows: Vec<Vec<f64>>,
    basis: Vec<usize>,
    width: usize,
    tol: f64,
    iterations: usize,
}

impl Tableau {
    fn rhs(&self, i: usize) -> f64 {
        self.rows[i][self.width]
    }

    fn reduced_cost(&self, cost: &[f64], j: usize) -> f64 {
        let priced: f64 = self
            .basis
            .iter()
            .zip(&self.rows)
            .map(|(&b, row)| cost[b] * row[j])
            .sum();
        cost[j] - priced
    }

    fn objective(&self, cost: &[f64]) -> f64 {
        (0..self.rows.len())
            .map(|i| cost[self.basis[i]] * self.rhs(i))
            .sum()
    }

    fn pivot(&mut self, r: usize, c: usize) {
        let p = self.rows[r][c];
        for v in self.rows[r].iter_mut() {
            *v /= p;
        }
        let pivot_row = self.rows[r].clone();
        for (i, row) in self.rows.iter_mut().enumerate() {
            if i == r {
                continue;
            }
            let f = row[c];
            if f == 0.0 {
                continue;
            }
            for (v, pv) in row.iter_mut().zip(&pivot_row) {
                *v -= f * pv;
            }
            if row[self.width].abs() < self.tol {
                row[self.width] = 0.0;
            }
        }
        self.basis[r] = c;
        self.iterations += 1;
    }

    /// Maximize `cost` letting only columns `< allowed` enter the basis.
    fn optimize(&mut self, cost: &[f64], allowed: usize, max_iterations: usize) -> Phase {
        loop {
            let entering = (0..allowed)
                .find(|&j| !self.basis.contains(&j) && self.reduced_cost(cost, j) > self.tol);
            let Some(col) = entering else {
                return Phase::Optimal;
            };
            if self.iterations >= max_iterations {
                return Phase::IterationLimit;
            }

            let mut leave: Option<(usize, f64)> = None;
            for i in 0..self.rows.len() {
                let a = self.rows[i][col];
                if a <= self.tol {
                    continue;
                }
                // Rounding can leave a basic value a hair below zero.
                let ratio = self.rhs(i).max(0.0) / a;
                let better = match leave {
                    None => true,
                    Some((li, best)) => {
                        ratio < best - self.tol
                            || ((ratio - best).abs() <= self.tol && self.basis[i] < self.basis[li])
                    }
                };
                if better {
                    leave = Some((i, ratio));
                }
            }
            let Some((row, _)) = leave else {
                return Phase::Unbounded;
            };
            self.pivot(row, col);
        }
    }

    /// Pivot zero-level artificials out of the basis where a structural or
    /// slack column can replace them. Rows with no such column are redundant.
    fn drive_out_artificials(&mut self, art_start: usize) {
        for i in 0..self.rows.len() {
            if self.basis[i] < art_start {
                continue;
            }
            if let Some(j) = (0..art_start).find(|&j| self.rows[i][j].abs() > self.tol) {
                self.pivot(i, j);
            }
        }
    }
}

impl LpSolver for SimplexSolver {
    fn solve(&self, lp: &LinearProgram) -> LpSolution {
        let n = lp.num_vars();
        let m = lp.constraints.len();
        let tol = if self.cfg.tolerance.is_finite() && self.cfg.tolerance > 0.0 {
            self.cfg.tolerance
        } else {
            1e-9
        };

        // Normalize to rhs >= 0, flipping the relation where needed.
        let normalized: Vec<(Vec<f64>, Relation, f64)> = lp
            .constraints
            .iter()
            .map(|c| {
                let mut coeffs = c.coeffs.clone();
                coeffs.resize(n, 0.0);
                if c.rhs < 0.0 {
                    let rel = match c.relation {
                        Relation::Le => Relation::Ge,
                        Relation::Ge => Relation::Le,
                        Relation::Eq => Relation::Eq,
                    };
                    (coeffs.iter().map(|v| -v).collect(), rel, -c.rhs)
                } else {
                    (coeffs, c.relation, c.rhs)
                }
            })
            .collect();

        let n_slack = normalized.iter().filter(|r| r.1 != Relation::Eq).count();
        let n_art = normalized.iter().filter(|r| r.1 != Relation::Le).count();
        let art_start = n + n_slack;
        let width = art_start + n_art;

        let mut rows = Vec::with_capacity(m);
        let mut basis = Vec::with_capacity(m);
        let (mut s, mut a) = (n, art_start);
        for (coeffs, rel, rhs) in &normalized {
            let mut row = vec![0.0; width + 1];
            row[..n].copy_from_slice(coeffs);
            row[width] = *rhs;
            match rel {
                Relation::Le => {
                    row[s] = 1.0;
                    basis.push(s);
                    s += 1;
                }
                Relation::Ge => {
                    row[s] = -1.0;
                    s += 1;
                    row[a] = 1.0;
                    basis.push(a);
                    a += 1;
                }
                Relation::Eq => {
                    row[a] = 1.0;
                    basis.push(a);
                    a += 1;
                }
            }
            rows.push(row);
        }

        let mut tab = Tableau {
            rows,
            basis,
            width,
            tol,
            iterations: 0,
        };

        if n_art > 0 {
            let phase1: Vec<f64> = (0..width)
                .map(|j| if j >= art_start { -1.0 } else { 0.0 })
                .collect();
            match tab.optimize(&phase1, width, self.cfg.max_iterations) {
                Phase::Optimal => {}
                Phase::IterationLimit => {
                    return LpSolution::without_point(LpStatus::IterationLimit, n, tab.iterations)
                }
                // Phase 1 is bounded above by 0; treat as a numerical failure.
                Phase::Unbounded => {
                    return LpSolution::without_point(LpStatus::Unbounded, n, tab.iterations)
                }
            }
            let max_rhs = normalized.iter().map(|r| r.2).fold(0.0, f64::max);
            let infeasibility = -tab.objective(&phase1);
            if infeasibility > tol * 100.0 * (1.0 + max_rhs) {
                debug!(infeasibility, iterations = tab.iterations, "simplex phase 1 infeasible");
                return LpSolution::without_point(LpStatus::Infeasible, n, tab.iterations);
            }
            tab.drive_out_artificials(art_start);
        }

        let mut phase2 = vec![0.0; width];
        phase2[..n].copy_from_slice(&lp.objective);
        let status = match tab.optimize(&phase2, art_start, self.cfg.max_iterations) {
            Phase::Optimal => LpStatus::Optimal,
            Phase::Unbounded => LpStatus::Unbounded,
            Phase::IterationLimit => LpStatus::IterationLimit,
        };
        if status != LpStatus::Optimal {
            return LpSolution::without_point(status, n, tab.iterations);
        }

        let mut x = vec![0.0; n];
        for (i, &b) in tab.basis.iter().enumerate() {
            if b < n {
                x[b] = tab.rhs(i).max(0.0);
            }
        }
        let objective_value = x.iter().zip(&lp.objective).map(|(v, c)| v * c).sum();
        debug!(vars = n, rows = m, iterations = tab.iterations, objective_value, "simplex optimal");
        LpSolution {
            status,
            x,
            objective_value,
            iterations: tab.iterations,
        }
    }

    fn iteration_budget(&self) -> usize {
        self.cfg.max_iterations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solver() -> SimplexSolver {
        SimplexSolver::default()
    }

    #[test]
    fn textbook_maximization() {
        // max 3x + 2y  s.t.  x + y <= 4,  x + 3y <= 6,  x <= 3
        let mut lp = LinearProgram::new(vec![3.0, 2.0]);
        lp.add_constraint(vec![1.0, 1.0], Relation::Le, 4.0);
        lp.add_constraint(vec![1.0, 3.0], Relation::Le, 6.0);
        lp.add_constraint(vec![1.0], Relation::Le, 3.0);
        let sol = solver().solve(&lp);
        assert_eq!(sol.status, LpStatus::Optimal);
        assert!((sol.x[0] - 3.0).abs() < 1e-9, "{:?}", sol.x);
        assert!((sol.x[1] - 1.0).abs() < 1e-9, "{:?}", sol.x);
        assert!((sol.objective_value - 11.0).abs() < 1e-9);
    }

    #[test]
    fn equality_and_fixed_variables() {
        // max x + 2y  s.t.  x + y = 2,  y = 0
        let mut lp = LinearProgram::new(vec![1.0, 2.0]);
        lp.add_constraint(vec![1.0, 1.0], Relation::Eq, 2.0);
        lp.fix_to_zero(1);
        let sol = solver().solve(&lp);
        assert_eq!(sol.status, LpStatus::Optimal);
        assert!((sol.x[0] - 2.0).abs() < 1e-9);
        assert_eq!(sol.x[1], 0.0);
    }

    #[test]
    fn ge_row_with_zero_rhs() {
        // max x + y  s.t.  x + y <= 10,  x - y >= 0,  y <= 4
        let mut lp = LinearProgram::new(vec![1.0, 1.0]);
        lp.add_constraint(vec![1.0, 1.0], Relation::Le, 10.0);
        lp.add_constraint(vec![1.0, -1.0], Relation::Ge, 0.0);
        lp.add_constraint(vec![0.0, 1.0], Relation::Le, 4.0);
        let sol = solver().solve(&lp);
        assert_eq!(sol.status, LpStatus::Optimal);
        assert!((sol.objective_value - 10.0).abs() < 1e-9);
        assert!(sol.x[0] >= sol.x[1] - 1e-9);
    }

    #[test]
    fn detects_infeasible() {
        // x >= 5, x <= 2
        let mut lp = LinearProgram::new(vec![-1.0]);
        lp.add_constraint(vec![1.0], Relation::Ge, 5.0);
        lp.add_constraint(vec![1.0], Relation::Le, 2.0);
        assert_eq!(solver().solve(&lp).status, LpStatus::Infeasible);
    }

    #[test]
    fn negative_rhs_is_normalized() {
        // -x <= -5 is x >= 5; max -x gives x = 5.
        let mut lp = LinearProgram::new(vec![-1.0]);
        lp.add_constraint(vec![-1.0], Relation::Le, -5.0);
        let sol = solver().solve(&lp);
        assert_eq!(sol.status, LpStatus::Optimal);
        assert!((sol.x[0] - 5.0).abs() < 1e-9);
    }

    #[test]
    fn detects_unbounded() {
        // max x  s.t.  x - y <= 1
        let mut lp = LinearProgram::new(vec![1.0, 0.0]);
        lp.add_constraint(vec![1.0, -1.0], Relation::Le, 1.0);
        assert_eq!(solver().solve(&lp).status, LpStatus::Unbounded);
    }

    #[test]
    fn iteration_budget_is_enforced() {
        let mut lp = LinearProgram::new(vec![1.0, 1.0]);
        lp.add_constraint(vec![1.0, 1.0], Relation::Le, 1.0);
        let tight = SimplexSolver::new(SimplexConfig {
            max_iterations: 0,
            ..SimplexConfig::default()
        });
        let sol = tight.solve(&lp);
        assert_eq!(sol.status, LpStatus::IterationLimit);
        assert_eq!(tight.iteration_budget(), 0);
    }

    #[test]
    fn equal_coefficients_favor_the_earlier_column() {
        let mut lp = LinearProgram::new(vec![2.0, 2.0, 2.0]);
        lp.add_constraint(vec![1.0, 1.0, 1.0], Relation::Le, 5.0);
        let sol = solver().solve(&lp);
        assert_eq!(sol.x, vec![5.0, 0.0, 0.0]);
    }
}
