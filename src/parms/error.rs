// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::path::PathBuf;

use thiserror::Error;

use crate::{coeff_index::CoeffIndexError, grid::GridError};

#[derive(Error, Debug)]
pub enum ParmError {
    #[error("No parameter named '{name}' is defined")]
    UnknownParm { name: String },

    #[error("Parameter '{name}' must have at least one coefficient")]
    ZeroLength { name: String },

    #[error("Parameter '{name}' has {expected} coefficients, but {got} were supplied")]
    CountMismatch {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("Parameter '{name}' was given a non-finite coefficient")]
    NonFinite { name: String },

    #[error("Invalid parameter-name pattern: {0}")]
    BadPattern(#[from] glob::PatternError),

    #[error("Couldn't parse parameter file '{}': {err}", file.display())]
    BadFile {
        file: PathBuf,
        err: serde_json::Error,
    },

    #[error(transparent)]
    CoeffIndex(#[from] CoeffIndexError),

    #[error(transparent)]
    Grid(#[from] GridError),

    #[error(transparent)]
    IO(#[from] std::io::Error),
}
