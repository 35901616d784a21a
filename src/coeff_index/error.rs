// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoeffIndexError {
    #[error("Coefficient index entry '{name}' already has {existing} coefficients; cannot change it to {new}")]
    InconsistentIndex {
        name: String,
        existing: usize,
        new: usize,
    },

    #[error("Cannot add '{name}' to a coefficient index with zero coefficients")]
    ZeroLength { name: String },

    #[error("Coefficient index entry '{name}' starts at {start}, but the previous entries end at {expected}")]
    NotContiguous {
        name: String,
        start: usize,
        expected: usize,
    },

    #[error("Coefficient index claims {len} coefficients, but its entries hold {sum}")]
    BadLength { len: usize, sum: usize },

    #[error("'{name}' is not in the coefficient index")]
    NotFound { name: String },

    #[error("Expected a coefficient vector of length {expected}, but got {got}")]
    LengthMismatch { expected: usize, got: usize },

    #[error("Global coefficient offset {offset} is outside the coefficient vector")]
    OutOfRange { offset: usize },
}
