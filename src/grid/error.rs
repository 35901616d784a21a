// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use thiserror::Error;

use super::Location;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GridError {
    #[error("An axis must have at least one cell")]
    EmptyAxis,

    #[error("Axis cells must have a positive, finite width; got {width}")]
    BadCellWidth { width: f64 },

    #[error("Axis cell {index} has invalid bounds [{lower}, {upper})")]
    BadCell { index: usize, lower: f64, upper: f64 },

    #[error("Axis cell {index} doesn't start where the previous cell ends")]
    NotContiguous { index: usize },

    #[error("Cell range {start}..{end} is invalid for an axis with {size} cells")]
    BadRange { start: usize, end: usize, size: usize },

    #[error("Cannot group axis cells by a factor of 0")]
    ZeroFactor,

    #[error("Cell location {location} is outside of the grid ({num_freq} x {num_time} cells)")]
    LocationOutOfBounds {
        location: Location,
        num_freq: usize,
        num_time: usize,
    },

    #[error("Cell id {id} is outside of the grid ({num_cells} cells)")]
    IdOutOfBounds { id: u64, num_cells: usize },
}
