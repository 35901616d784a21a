// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Accumulators of least-squares normal equations.
//!
//! For condition equations `A x = r` with weights `w`, the normal equations
//! are `(Aᵀ W A) dx = Aᵀ W r`. Kernels accumulate these per solve cell in their
//! local coefficient layout; the solver scatters them into the global layout
//! and adds the contributions of every kernel together.

mod error;
#[cfg(test)]
mod tests;

pub use error::EquationsError;

use ndarray::prelude::*;
use serde::{Deserialize, Serialize};

use crate::coeff_index::CoeffMapping;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawNormalEquations")]
pub struct NormalEquations {
    /// The symmetric normal matrix `Aᵀ W A`.
    pub(crate) matrix: Array2<f64>,

    /// The right-hand side `Aᵀ W r`.
    pub(crate) rhs: Array1<f64>,

    /// The number of condition equations that have been added.
    pub(crate) num_observations: u64,

    /// The sum of all condition equation weights.
    pub(crate) sum_weights: f64,

    /// The weighted sum of squared residuals, `Σ w r²`.
    pub(crate) sum_sq_residuals: f64,
}

/// [`NormalEquations`] as they arrive from a peer, before their shape has
/// been checked.
#[derive(Deserialize)]
struct RawNormalEquations {
    matrix: Array2<f64>,
    rhs: Array1<f64>,
    num_observations: u64,
    sum_weights: f64,
    sum_sq_residuals: f64,
}

impl TryFrom<RawNormalEquations> for NormalEquations {
    type Error = EquationsError;

    fn try_from(raw: RawNormalEquations) -> Result<Self, Self::Error> {
        let equations = NormalEquations {
            matrix: raw.matrix,
            rhs: raw.rhs,
            num_observations: raw.num_observations,
            sum_weights: raw.sum_weights,
            sum_sq_residuals: raw.sum_sq_residuals,
        };
        equations.check_shape()?;
        Ok(equations)
    }
}

impl NormalEquations {
    pub fn new(num_unknowns: usize) -> NormalEquations {
        NormalEquations {
            matrix: Array2::zeros((num_unknowns, num_unknowns)),
            rhs: Array1::zeros(num_unknowns),
            num_observations: 0,
            sum_weights: 0.0,
            sum_sq_residuals: 0.0,
        }
    }

    pub fn num_unknowns(&self) -> usize {
        self.rhs.len()
    }

    pub fn num_observations(&self) -> u64 {
        self.num_observations
    }

    pub fn sum_weights(&self) -> f64 {
        self.sum_weights
    }

    pub fn sum_sq_residuals(&self) -> f64 {
        self.sum_sq_residuals
    }

    pub fn matrix(&self) -> ArrayView2<f64> {
        self.matrix.view()
    }

    pub fn rhs(&self) -> ArrayView1<f64> {
        self.rhs.view()
    }

    pub fn is_empty(&self) -> bool {
        self.num_observations == 0
    }

    /// The normal matrix must be square with one row per unknown.
    pub fn check_shape(&self) -> Result<(), EquationsError> {
        let n = self.rhs.len();
        let (rows, cols) = self.matrix.dim();
        if rows != n || cols != n {
            return Err(EquationsError::BadShape { rows, cols, rhs: n });
        }
        Ok(())
    }

    /// Add one condition equation. `derivatives` holds the partial derivative
    /// of the model with respect to every unknown, `residual` is
    /// observed-minus-model.
    pub fn add_condition(
        &mut self,
        derivatives: &[f64],
        residual: f64,
        weight: f64,
    ) -> Result<(), EquationsError> {
        let n = self.num_unknowns();
        if derivatives.len() != n {
            return Err(EquationsError::DimensionMismatch {
                expected: n,
                got: derivatives.len(),
            });
        }
        if !residual.is_finite() || !weight.is_finite() || weight < 0.0 {
            return Err(EquationsError::NonFiniteCondition { residual, weight });
        }
        if weight == 0.0 {
            return Ok(());
        }

        for (i, &d_i) in derivatives.iter().enumerate() {
            if d_i == 0.0 {
                continue;
            }
            let wd_i = weight * d_i;
            self.rhs[i] += wd_i * residual;
            let mut row = self.matrix.row_mut(i);
            for (m, &d_j) in row.iter_mut().zip(derivatives.iter()) {
                *m += wd_i * d_j;
            }
        }

        self.num_observations += 1;
        self.sum_weights += weight;
        self.sum_sq_residuals += weight * residual * residual;
        Ok(())
    }

    /// Add another system with the same unknowns to this one.
    pub fn merge(&mut self, other: &NormalEquations) -> Result<(), EquationsError> {
        self.check_shape()?;
        other.check_shape()?;
        if other.num_unknowns() != self.num_unknowns() {
            return Err(EquationsError::DimensionMismatch {
                expected: self.num_unknowns(),
                got: other.num_unknowns(),
            });
        }
        self.matrix += &other.matrix;
        self.rhs += &other.rhs;
        self.num_observations += other.num_observations;
        self.sum_weights += other.sum_weights;
        self.sum_sq_residuals += other.sum_sq_residuals;
        Ok(())
    }

    /// Translate this (local) system into a global coefficient layout of
    /// `global_len` unknowns. Unknowns not covered by the mapping get empty
    /// rows and columns.
    pub fn scatter(
        &self,
        mapping: &CoeffMapping,
        global_len: usize,
    ) -> Result<NormalEquations, EquationsError> {
        self.check_shape()?;
        if mapping.local_len() != self.num_unknowns() {
            return Err(EquationsError::DimensionMismatch {
                expected: mapping.local_len(),
                got: self.num_unknowns(),
            });
        }
        let offsets = mapping.offsets();
        if let Some(&bad) = offsets.iter().find(|&&o| o >= global_len) {
            return Err(EquationsError::OffsetOutOfRange {
                offset: bad,
                global_len,
            });
        }

        let mut out = NormalEquations::new(global_len);
        for (i, &gi) in offsets.iter().enumerate() {
            out.rhs[gi] = self.rhs[i];
            for (j, &gj) in offsets.iter().enumerate() {
                out.matrix[(gi, gj)] = self.matrix[(i, j)];
            }
        }
        out.num_observations = self.num_observations;
        out.sum_weights = self.sum_weights;
        out.sum_sq_residuals = self.sum_sq_residuals;
        Ok(out)
    }

    /// Forget every condition equation, keeping the number of unknowns.
    pub fn reset(&mut self) {
        self.matrix.fill(0.0);
        self.rhs.fill(0.0);
        self.num_observations = 0;
        self.sum_weights = 0.0;
        self.sum_sq_residuals = 0.0;
    }
}

/// The normal equations of one solve cell, as exchanged between a kernel and
/// the solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellEquation {
    pub id: u32,
    pub equation: NormalEquations,
}
