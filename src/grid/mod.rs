// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Frequency-time grids and their solve cells.
//!
//! A [`Grid`] is the product of a frequency [`Axis`] and a time [`Axis`]. Every
//! cell of a solution grid is a solve domain. Kernels and solvers translate
//! between a cell's [`Location`] and its numeric id with the same canonical
//! scheme: frequency varies fastest, so `id = time * n_freq + freq`.

mod error;
#[cfg(test)]
mod tests;

pub use error::GridError;

use std::ops::Range;

use serde::{Deserialize, Serialize};
use vec1::Vec1;

/// Relative tolerance used when checking that irregular cells are contiguous.
const CONTIGUITY_TOLERANCE: f64 = 1e-9;

/// A sequence of contiguous, ascending cells along one dimension. Each cell
/// spans `[lower, upper)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Axis {
    cells: Vec1<(f64, f64)>,
}

impl Axis {
    /// An axis of `count` cells, each `width` wide, starting at `start`.
    pub fn regular(start: f64, width: f64, count: usize) -> Result<Axis, GridError> {
        if !start.is_finite() || !width.is_finite() || width <= 0.0 {
            return Err(GridError::BadCellWidth { width });
        }
        let cells = (0..count)
            .map(|i| {
                (
                    start + i as f64 * width,
                    start + (i + 1) as f64 * width,
                )
            })
            .collect();
        let cells = Vec1::try_from_vec(cells).map_err(|_| GridError::EmptyAxis)?;
        Ok(Axis { cells })
    }

    /// An axis from explicit cell bounds. Cells must be non-empty, ascending
    /// and contiguous.
    pub fn irregular(bounds: Vec<(f64, f64)>) -> Result<Axis, GridError> {
        let cells = Vec1::try_from_vec(bounds).map_err(|_| GridError::EmptyAxis)?;
        for (i, &(lower, upper)) in cells.iter().enumerate() {
            if !lower.is_finite() || !upper.is_finite() || upper <= lower {
                return Err(GridError::BadCell {
                    index: i,
                    lower,
                    upper,
                });
            }
        }
        for (i, pair) in cells.windows(2).enumerate() {
            let gap = (pair[1].0 - pair[0].1).abs();
            let scale = pair[0].1.abs().max(1.0);
            if gap > CONTIGUITY_TOLERANCE * scale {
                return Err(GridError::NotContiguous { index: i + 1 });
            }
        }
        Ok(Axis { cells })
    }

    pub fn size(&self) -> usize {
        self.cells.len()
    }

    pub fn lower(&self, i: usize) -> f64 {
        self.cells[i].0
    }

    pub fn upper(&self, i: usize) -> f64 {
        self.cells[i].1
    }

    pub fn centre(&self, i: usize) -> f64 {
        0.5 * (self.cells[i].0 + self.cells[i].1)
    }

    pub fn width(&self, i: usize) -> f64 {
        self.cells[i].1 - self.cells[i].0
    }

    /// The lower bound of the first cell.
    pub fn start(&self) -> f64 {
        self.cells.first().0
    }

    /// The upper bound of the last cell.
    pub fn end(&self) -> f64 {
        self.cells.last().1
    }

    /// Find the cell containing `x`. The end of the axis is considered part of
    /// the last cell.
    pub fn locate(&self, x: f64) -> Option<usize> {
        if !(self.start()..=self.end()).contains(&x) {
            return None;
        }
        // The index of the first cell whose upper bound is beyond x.
        let i = self.cells.partition_point(|&(_, upper)| upper <= x);
        Some(i.min(self.size() - 1))
    }

    /// The axis made from a contiguous range of this axis' cells.
    pub fn subset(&self, range: Range<usize>) -> Result<Axis, GridError> {
        if range.start >= range.end || range.end > self.size() {
            return Err(GridError::BadRange {
                start: range.start,
                end: range.end,
                size: self.size(),
            });
        }
        let cells = Vec1::try_from_vec(self.cells[range].to_vec()).map_err(|_| GridError::EmptyAxis)?;
        Ok(Axis { cells })
    }

    /// Group every `factor` cells into one. The last cell may group fewer.
    pub fn compress(&self, factor: usize) -> Result<Axis, GridError> {
        if factor == 0 {
            return Err(GridError::ZeroFactor);
        }
        let cells = self
            .cells
            .chunks(factor)
            .map(|chunk| (chunk[0].0, chunk[chunk.len() - 1].1))
            .collect();
        let cells = Vec1::try_from_vec(cells).map_err(|_| GridError::EmptyAxis)?;
        Ok(Axis { cells })
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.cells.iter().copied()
    }
}

/// The position of a cell in a [`Grid`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Location {
    pub freq: usize,
    pub time: usize,
}

impl Location {
    pub fn new(freq: usize, time: usize) -> Location {
        Location { freq, time }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.freq, self.time)
    }
}

/// The frequency and time extent of a cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellBox {
    pub freq: (f64, f64),
    pub time: (f64, f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    pub freq: Axis,
    pub time: Axis,
}

impl Grid {
    pub fn new(freq: Axis, time: Axis) -> Grid {
        Grid { freq, time }
    }

    /// Make a solution grid from a data grid by grouping data cells together.
    /// e.g. 4 channels per cell and 10 timeslots per cell.
    pub fn partition(
        data: &Grid,
        freq_cells_per_domain: usize,
        time_cells_per_domain: usize,
    ) -> Result<Grid, GridError> {
        Ok(Grid {
            freq: data.freq.compress(freq_cells_per_domain)?,
            time: data.time.compress(time_cells_per_domain)?,
        })
    }

    pub fn num_freq(&self) -> usize {
        self.freq.size()
    }

    pub fn num_time(&self) -> usize {
        self.time.size()
    }

    pub fn num_cells(&self) -> usize {
        self.freq.size() * self.time.size()
    }

    pub fn contains(&self, location: Location) -> bool {
        location.freq < self.num_freq() && location.time < self.num_time()
    }

    pub fn cell_id(&self, location: Location) -> Result<u32, GridError> {
        if !self.contains(location) {
            return Err(GridError::LocationOutOfBounds {
                location,
                num_freq: self.num_freq(),
                num_time: self.num_time(),
            });
        }
        let id = location.time * self.num_freq() + location.freq;
        u32::try_from(id).map_err(|_| GridError::IdOutOfBounds {
            id: id as u64,
            num_cells: self.num_cells(),
        })
    }

    pub fn location(&self, id: u32) -> Result<Location, GridError> {
        let id_usize = id as usize;
        if id_usize >= self.num_cells() {
            return Err(GridError::IdOutOfBounds {
                id: id as u64,
                num_cells: self.num_cells(),
            });
        }
        Ok(Location {
            freq: id_usize % self.num_freq(),
            time: id_usize / self.num_freq(),
        })
    }

    pub fn cell_box(&self, location: Location) -> Result<CellBox, GridError> {
        if !self.contains(location) {
            return Err(GridError::LocationOutOfBounds {
                location,
                num_freq: self.num_freq(),
                num_time: self.num_time(),
            });
        }
        Ok(CellBox {
            freq: (self.freq.lower(location.freq), self.freq.upper(location.freq)),
            time: (self.time.lower(location.time), self.time.upper(location.time)),
        })
    }

    /// Split the time axis into consecutive ranges of at most `chunk_size`
    /// cells.
    pub fn time_chunks(&self, chunk_size: usize) -> Vec<Range<usize>> {
        split_range(0..self.num_time(), chunk_size)
    }

    /// As [`Grid::time_chunks`], but only covering the time cells in `range`.
    pub fn time_chunks_within(
        &self,
        range: Range<usize>,
        chunk_size: usize,
    ) -> Result<Vec<Range<usize>>, GridError> {
        if range.start >= range.end || range.end > self.num_time() {
            return Err(GridError::BadRange {
                start: range.start,
                end: range.end,
                size: self.num_time(),
            });
        }
        Ok(split_range(range, chunk_size))
    }

    /// All cell locations with a time index in `time_range`, ordered by cell
    /// id.
    pub fn locations_in(&self, time_range: Range<usize>) -> Vec<Location> {
        let end = time_range.end.min(self.num_time());
        (time_range.start..end)
            .flat_map(|t| (0..self.num_freq()).map(move |f| Location::new(f, t)))
            .collect()
    }
}

fn split_range(range: Range<usize>, chunk_size: usize) -> Vec<Range<usize>> {
    let chunk_size = chunk_size.max(1);
    let end = range.end;
    range
        .step_by(chunk_size)
        .map(|start| start..(start + chunk_size).min(end))
        .collect()
}
