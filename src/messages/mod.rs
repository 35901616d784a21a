// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Messages exchanged between kernels and solvers.
//!
//! Every message travels as a [`Message`]; receivers match on it exhaustively
//! rather than inspecting types at run time. [`blob`] frames messages for
//! byte-stream connections.

pub mod blob;
#[cfg(test)]
mod tests;

pub use blob::{read_message, write_message, CodecError};

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumDiscriminants};

use crate::{
    coeff_index::CoeffIndex,
    equations::{CellEquation, NormalEquations},
    solver::ReadyCode,
};

/// Ask the solver to start (or restart) solving a domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainRegistrationRequest {
    pub domain_index: u32,

    /// The initial values of the unknowns.
    pub unknowns: Vec<f64>,

    /// Convergence threshold on the relative solution increment.
    pub epsilon: f64,

    /// Convergence threshold on the largest derivative (right-hand side)
    /// element.
    pub epsilon_derivative: f64,

    pub max_iter: u32,

    /// Collinearity factor; pivots smaller than this (relative to their
    /// diagonal) are treated as rank deficient.
    pub col_factor: f64,

    /// The initial Levenberg-Marquardt factor.
    pub lm_factor: f64,

    /// Balance (equilibrate) the normal equations before solving.
    pub balanced_eq: bool,
}

/// One iteration's worth of normal equations for a domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRequest {
    pub domain_index: u32,
    pub normal_equations: NormalEquations,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationResult {
    pub domain_index: u32,
    pub ready_code: ReadyCode,
    pub ready_text: String,
    pub unknowns: Vec<f64>,
    pub rank: u32,
    pub chi_squared: f64,
    pub lm_factor: f64,
}

impl IterationResult {
    /// The placeholder returned for a domain the solver isn't tracking, e.g.
    /// one that has already converged.
    pub fn not_tracked(domain_index: u32) -> IterationResult {
        IterationResult {
            domain_index,
            ready_code: ReadyCode::NotTracked,
            ready_text: String::new(),
            unknowns: Vec::new(),
            rank: 0,
            chi_squared: -1.0,
            lm_factor: -1.0,
        }
    }
}

/// A kernel's coefficient index, or the global index sent back to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoeffIndexMsg {
    pub kernel_id: u32,
    pub contents: CoeffIndex,
}

/// The coefficients of one solve cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellCoeff {
    pub id: u32,
    pub coeff: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoefficientMsg {
    pub kernel_id: u32,
    pub contents: Vec<CellCoeff>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquationMsg {
    pub kernel_id: u32,
    pub contents: Vec<CellEquation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellSolution {
    pub id: u32,
    pub coeff: Vec<f64>,
    pub result: ReadyCode,
    pub result_text: String,
    pub rank: u32,
    pub chi_sqr: f64,
    pub lm_factor: f64,
}

impl From<IterationResult> for CellSolution {
    fn from(r: IterationResult) -> Self {
        CellSolution {
            id: r.domain_index,
            coeff: r.unknowns,
            result: r.ready_code,
            result_text: r.ready_text,
            rank: r.rank,
            chi_sqr: r.chi_squared,
            lm_factor: r.lm_factor,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolutionMsg {
    pub contents: Vec<CellSolution>,
}

/// End of a time chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkDoneMsg {
    pub kernel_id: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, EnumDiscriminants)]
#[strum_discriminants(name(MessageKind), derive(Display, Hash))]
pub enum Message {
    DomainRegistration(DomainRegistrationRequest),
    DomainRegistrationBatch(Vec<DomainRegistrationRequest>),
    Iteration(IterationRequest),
    IterationBatch(Vec<IterationRequest>),
    IterationResult(IterationResult),
    IterationResultBatch(Vec<IterationResult>),
    CoeffIndex(CoeffIndexMsg),
    Coefficients(CoefficientMsg),
    Equations(EquationMsg),
    Solutions(SolutionMsg),
    ChunkDone(ChunkDoneMsg),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        MessageKind::from(self)
    }
}
