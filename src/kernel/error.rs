// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use thiserror::Error;

use crate::{
    coeff_index::CoeffIndexError, connection::ConnectionError, equations::EquationsError,
    grid::GridError, parms::ParmError,
};

#[derive(Error, Debug)]
pub enum KernelError {
    #[error("No solution grid has been set")]
    NoSolutionGrid,

    #[error("The equation builder produced {got} systems for {expected} cells")]
    BuilderMismatch { expected: usize, got: usize },

    #[error("The solver didn't send solutions for {num_missing} pending cells")]
    MissingSolutions { num_missing: usize },

    #[error("No true value is known for parameter '{name}'")]
    NoTruth { name: String },

    #[error(transparent)]
    Parm(#[from] ParmError),

    #[error(transparent)]
    CoeffIndex(#[from] CoeffIndexError),

    #[error(transparent)]
    Equations(#[from] EquationsError),

    #[error(transparent)]
    Grid(#[from] GridError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}
