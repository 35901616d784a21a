// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EquationsError {
    #[error("Normal equations have {expected} unknowns, but got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("A normal matrix of {rows}x{cols} doesn't match a right-hand side of {rhs} unknowns")]
    BadShape { rows: usize, cols: usize, rhs: usize },

    #[error("Condition equation has a non-finite residual ({residual}) or invalid weight ({weight})")]
    NonFiniteCondition { residual: f64, weight: f64 },

    #[error("Coefficient offset {offset} doesn't fit in a system of {global_len} unknowns")]
    OffsetOutOfRange { offset: usize, global_len: usize },
}
