// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! A Levenberg-Marquardt fitter driven one step at a time.
//!
//! The fitter never sees the model; every step is fed a fresh set of normal
//! equations evaluated (by kernels) at the current unknowns. Consequentially,
//! the chi-squared available at the start of a step describes the unknowns
//! produced by the *previous* step. A step that made chi-squared worse is
//! rejected by restoring the last accepted unknowns and raising the LM factor;
//! the kernels then rebuild the equations at the restored point and the next
//! step is taken with more damping.

use ndarray::prelude::*;
use serde::{Deserialize, Serialize};

use super::{ReadyCode, SolverError};
use crate::equations::{EquationsError, NormalEquations};

/// Once the LM factor is raised above this, the fit is considered diverged.
pub(crate) const LM_FACTOR_MAX: f64 = 1e10;

/// The LM factor is never lowered below this.
const LM_FACTOR_MIN: f64 = 1e-12;

const LM_FACTOR_DOWN: f64 = 0.1;
const LM_FACTOR_UP: f64 = 10.0;

/// Pivots are also considered dependent below this relative size, regardless
/// of the collinearity factor.
const MIN_PIVOT_TOLERANCE: f64 = 1e-14;

/// Convergence and damping settings for one domain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolverOptions {
    /// Stop when the largest relative solution increment is at or below this.
    pub epsilon_value: f64,

    /// Stop when the largest element of the right-hand side is at or below
    /// this.
    pub epsilon_derivative: f64,

    pub max_iter: u32,

    /// Collinearity factor for rank detection.
    pub col_factor: f64,

    /// The initial Levenberg-Marquardt factor.
    pub lm_factor: f64,

    /// Equilibrate the normal equations before solving.
    pub balanced_eq: bool,
}

impl Default for SolverOptions {
    fn default() -> Self {
        SolverOptions {
            epsilon_value: 1e-8,
            epsilon_derivative: 1e-8,
            max_iter: 50,
            col_factor: 1e-9,
            lm_factor: 1e-3,
            balanced_eq: false,
        }
    }
}

impl SolverOptions {
    pub(crate) fn validate(&self, domain: u32) -> Result<(), SolverError> {
        let bad = |reason: String| Err(SolverError::InvalidDomainConfig { domain, reason });
        if !(self.epsilon_value.is_finite() && self.epsilon_value >= 0.0) {
            return bad(format!("epsilon must be >= 0, got {}", self.epsilon_value));
        }
        if !(self.epsilon_derivative.is_finite() && self.epsilon_derivative >= 0.0) {
            return bad(format!(
                "derivative epsilon must be >= 0, got {}",
                self.epsilon_derivative
            ));
        }
        if self.max_iter == 0 {
            return bad("the maximum number of iterations must be at least 1".to_string());
        }
        if !(self.col_factor.is_finite() && self.col_factor >= 0.0) {
            return bad(format!(
                "collinearity factor must be >= 0, got {}",
                self.col_factor
            ));
        }
        if !(self.lm_factor.is_finite() && self.lm_factor > 0.0) {
            return bad(format!("LM factor must be > 0, got {}", self.lm_factor));
        }
        Ok(())
    }
}

/// Statistics of a fitter before it is stepped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Statistics {
    pub(crate) rank: u32,
    pub(crate) num_unknowns: usize,
    pub(crate) chi_squared: f64,
    pub(crate) lm_factor: f64,
}

/// The outcome of a single step.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Step {
    pub(crate) code: ReadyCode,
    pub(crate) text: String,
    pub(crate) statistics: Statistics,
}

pub(crate) struct LmFitter {
    options: SolverOptions,
    equations: NormalEquations,
    lm_factor: f64,
    num_iterations: u32,

    /// The chi-squared and unknowns of the last accepted step.
    accepted: Option<(f64, Vec<f64>)>,

    /// Was the previous step rejected?
    rejected: bool,
}

impl LmFitter {
    pub(crate) fn new(num_unknowns: usize, options: SolverOptions) -> LmFitter {
        LmFitter {
            options,
            equations: NormalEquations::new(num_unknowns),
            lm_factor: options.lm_factor,
            num_iterations: 0,
            accepted: None,
            rejected: false,
        }
    }

    pub(crate) fn num_iterations(&self) -> u32 {
        self.num_iterations
    }

    pub(crate) fn merge(&mut self, equations: &NormalEquations) -> Result<(), EquationsError> {
        self.equations.merge(equations)
    }

    pub(crate) fn statistics(&self) -> Statistics {
        let rank = if self.equations.is_empty() {
            0
        } else {
            let (matrix, _) = self.prepared_system(0.0);
            factorise(matrix.view(), self.options.col_factor).rank
        };
        let dof = self
            .equations
            .num_observations()
            .saturating_sub(rank as u64)
            .max(1);
        Statistics {
            rank: rank as u32,
            num_unknowns: self.equations.num_unknowns(),
            chi_squared: self.equations.sum_sq_residuals() / dof as f64,
            lm_factor: self.lm_factor,
        }
    }

    /// Take one step with the equations merged so far, updating `unknowns` in
    /// place. The merged equations are consumed.
    pub(crate) fn step(&mut self, unknowns: &mut [f64]) -> Step {
        let statistics = self.statistics();
        self.num_iterations += 1;
        let (code, text) = self.step_inner(unknowns, &statistics);
        self.equations.reset();
        Step {
            code,
            text,
            statistics,
        }
    }

    fn step_inner(&mut self, unknowns: &mut [f64], stats: &Statistics) -> (ReadyCode, String) {
        if self.equations.is_empty() {
            return (ReadyCode::Singular, "no condition equations".to_string());
        }
        if stats.rank == 0 {
            return (ReadyCode::Singular, "normal matrix has rank 0".to_string());
        }

        let max_derivative = self
            .equations
            .rhs()
            .iter()
            .fold(0.0_f64, |acc, b| acc.max(b.abs()));
        if max_derivative <= self.options.epsilon_derivative {
            return (
                ReadyCode::Converged,
                format!("derivative level {max_derivative:e} <= {:e}", self.options.epsilon_derivative),
            );
        }

        // Was the previous step an improvement?
        match &self.accepted {
            Some((accepted_chi_squared, accepted_unknowns))
                if stats.chi_squared > *accepted_chi_squared =>
            {
                unknowns.copy_from_slice(accepted_unknowns);
                self.lm_factor *= LM_FACTOR_UP;
                self.rejected = true;
                if self.lm_factor > LM_FACTOR_MAX {
                    return (
                        ReadyCode::Diverged,
                        format!(
                            "no reduction of chi-squared; LM factor exceeded {LM_FACTOR_MAX:e}"
                        ),
                    );
                }
                return self.iteration_cap_or(ReadyCode::InProgress, "step rejected".to_string());
            }
            Some(_) => {
                if !self.rejected {
                    self.lm_factor = (self.lm_factor * LM_FACTOR_DOWN).max(LM_FACTOR_MIN);
                }
            }
            None => (),
        }
        self.rejected = false;
        self.accepted = Some((stats.chi_squared, unknowns.to_vec()));

        let (matrix, scale) = self.prepared_system(self.lm_factor);
        let factorisation = factorise(matrix.view(), self.options.col_factor);
        let rhs = &self.equations.rhs() * &scale;
        let increment = factorisation.solve(rhs.view()) * &scale;
        if increment.iter().any(|d| !d.is_finite()) {
            if let Some((_, accepted_unknowns)) = &self.accepted {
                unknowns.copy_from_slice(accepted_unknowns);
            }
            return (
                ReadyCode::Singular,
                "solution increment is not finite".to_string(),
            );
        }

        let mut max_relative_increment: f64 = 0.0;
        for (x, dx) in unknowns.iter_mut().zip(increment.iter()) {
            *x += dx;
            max_relative_increment = max_relative_increment.max(dx.abs() / x.abs().max(1.0));
        }
        if max_relative_increment <= self.options.epsilon_value {
            return (
                ReadyCode::Converged,
                format!(
                    "solution increment {max_relative_increment:e} <= {:e}",
                    self.options.epsilon_value
                ),
            );
        }

        self.iteration_cap_or(ReadyCode::InProgress, String::new())
    }

    fn iteration_cap_or(&self, code: ReadyCode, text: String) -> (ReadyCode, String) {
        if self.num_iterations >= self.options.max_iter {
            (
                ReadyCode::MaxIterationsReached,
                format!("reached the maximum of {} iterations", self.options.max_iter),
            )
        } else {
            (code, text)
        }
    }

    /// The damped (and, if requested, balanced) normal matrix, along with the
    /// scale factors applied to the unknowns.
    fn prepared_system(&self, lm_factor: f64) -> (Array2<f64>, Array1<f64>) {
        let n = self.equations.num_unknowns();
        let mut matrix = self.equations.matrix().to_owned();
        for i in 0..n {
            matrix[(i, i)] *= 1.0 + lm_factor;
        }

        let scale = if self.options.balanced_eq {
            let scale = matrix
                .diag()
                .mapv(|d| if d > 0.0 { 1.0 / d.sqrt() } else { 1.0 });
            for ((i, j), m) in matrix.indexed_iter_mut() {
                *m *= scale[i] * scale[j];
            }
            scale
        } else {
            Array1::ones(n)
        };
        (matrix, scale)
    }
}

/// A Cholesky factorisation that tolerates rank deficiency: columns whose pivot
/// is too small compared with their diagonal are marked dependent and their
/// unknowns are held fixed.
pub(crate) struct Factorisation {
    lower: Array2<f64>,
    dependent: Vec<bool>,
    pub(crate) rank: usize,
}

pub(crate) fn factorise(matrix: ArrayView2<f64>, col_factor: f64) -> Factorisation {
    let n = matrix.nrows();
    let tolerance = col_factor.max(MIN_PIVOT_TOLERANCE);
    let mut lower = Array2::zeros((n, n));
    let mut dependent = vec![false; n];
    let mut rank = 0;

    for k in 0..n {
        let diag = matrix[(k, k)];
        let mut pivot = diag;
        for j in 0..k {
            pivot -= lower[(k, j)] * lower[(k, j)];
        }
        if !(diag > 0.0) || !pivot.is_finite() || pivot <= tolerance * diag {
            dependent[k] = true;
            continue;
        }
        let l_kk = pivot.sqrt();
        lower[(k, k)] = l_kk;
        for i in k + 1..n {
            let mut sum = matrix[(i, k)];
            for j in 0..k {
                sum -= lower[(i, j)] * lower[(k, j)];
            }
            lower[(i, k)] = sum / l_kk;
        }
        rank += 1;
    }

    Factorisation {
        lower,
        dependent,
        rank,
    }
}

impl Factorisation {
    /// Solve `L Lᵀ x = b`. Dependent unknowns are 0.
    pub(crate) fn solve(&self, b: ArrayView1<f64>) -> Array1<f64> {
        let n = b.len();
        let mut y = Array1::zeros(n);
        for i in 0..n {
            if self.dependent[i] {
                continue;
            }
            let mut sum = b[i];
            for j in 0..i {
                sum -= self.lower[(i, j)] * y[j];
            }
            y[i] = sum / self.lower[(i, i)];
        }

        let mut x = Array1::zeros(n);
        for i in (0..n).rev() {
            if self.dependent[i] {
                continue;
            }
            let mut sum = y[i];
            for j in i + 1..n {
                sum -= self.lower[(j, i)] * x[j];
            }
            x[i] = sum / self.lower[(i, i)];
        }
        x
    }
}
