// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The kernel side of a distributed solve.
//!
//! A [`LocalSolveController`] walks a solution grid in chunks of time cells.
//! For every chunk it agrees on a coefficient index with the solver, seeds the
//! solver with the current coefficients, then repeatedly builds normal
//! equations (via an [`EquationBuilder`]), sends them off and writes the
//! returned coefficients back into its [`ParmManager`] until the solver has
//! declared every cell of the chunk finished.

mod error;
mod prediffer;
#[cfg(test)]
mod tests;

pub use error::KernelError;
pub use prediffer::SyntheticPrediffer;

use std::{collections::BTreeMap, ops::Range};

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    coeff_index::{CoeffIndex, CoeffMapping},
    connection::{Connection, ConnectionError},
    equations::{CellEquation, NormalEquations},
    grid::{Grid, Location},
    messages::{
        CellCoeff, CellSolution, ChunkDoneMsg, CoeffIndexMsg, CoefficientMsg, EquationMsg, Message,
    },
    parms::{ParmGroup, ParmManager},
    solver::ReadyCode,
    PROGRESS_BARS,
};

pub const DEFAULT_CELL_CHUNK_SIZE: usize = 1;

/// Produces normal equations for solve cells from the kernel's data.
pub trait EquationBuilder {
    /// Build one system per cell, in the same order as `cells`. The unknowns
    /// of each system are the coefficients of `solvables`, in order.
    fn construct(
        &mut self,
        grid: &Grid,
        parms: &ParmManager,
        solvables: &ParmGroup,
        cells: &[Location],
    ) -> Result<Vec<NormalEquations>, KernelError>;

    /// The values of the solvable parameters have been updated.
    fn solvables_changed(&mut self) {}
}

/// How a solve cell finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellReport {
    pub location: Location,
    pub ready_code: ReadyCode,
    pub ready_text: String,
    pub num_iterations: u32,
    pub rank: u32,
    pub chi_squared: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SolveReport {
    pub num_chunks: usize,

    /// Keyed by cell id.
    pub cells: BTreeMap<u32, CellReport>,
}

impl SolveReport {
    pub fn count(&self, code: ReadyCode) -> usize {
        self.cells.values().filter(|c| c.ready_code == code).count()
    }

    pub fn all_converged(&self) -> bool {
        self.cells
            .values()
            .all(|c| c.ready_code == ReadyCode::Converged)
    }
}

pub struct LocalSolveController<C: Connection, B: EquationBuilder> {
    kernel_id: u32,
    connection: C,
    builder: B,
    parms: ParmManager,
    grid: Option<Grid>,
    solvables: ParmGroup,
    local_index: CoeffIndex,
    propagate_solutions: bool,
    cell_chunk_size: usize,
    time_cells: Option<Range<usize>>,
}

impl<C: Connection, B: EquationBuilder> LocalSolveController<C, B> {
    pub fn new(
        kernel_id: u32,
        connection: C,
        builder: B,
        parms: ParmManager,
    ) -> LocalSolveController<C, B> {
        LocalSolveController {
            kernel_id,
            connection,
            builder,
            parms,
            grid: None,
            solvables: ParmGroup::default(),
            local_index: CoeffIndex::new(),
            propagate_solutions: false,
            cell_chunk_size: DEFAULT_CELL_CHUNK_SIZE,
            time_cells: None,
        }
    }

    /// Set the grid whose cells are solved. The parameter manager adopts the
    /// same grid.
    pub fn set_solution_grid(&mut self, grid: Grid) {
        debug!(
            "Kernel {}: solution grid has {} x {} cells",
            self.kernel_id,
            grid.num_freq(),
            grid.num_time()
        );
        self.parms.set_grid(grid.clone());
        self.grid = Some(grid);
    }

    /// Choose the parameters to solve for. An empty selection isn't an error,
    /// but makes [`LocalSolveController::run`] do nothing.
    pub fn set_solvables(
        &mut self,
        include: &[String],
        exclude: &[String],
    ) -> Result<(), KernelError> {
        let solvables = self.parms.select(include, exclude)?;
        if solvables.is_empty() {
            warn!(
                "Kernel {}: no parameters match the solvable patterns {include:?} (excluding {exclude:?})",
                self.kernel_id
            );
        }
        self.local_index = self.parms.coeff_index(&solvables)?;
        self.solvables = solvables;
        Ok(())
    }

    pub fn set_propagate_solutions(&mut self, propagate: bool) {
        self.propagate_solutions = propagate;
    }

    /// Set how many time cells are solved together. 0 is ignored.
    pub fn set_cell_chunk_size(&mut self, size: usize) {
        if size == 0 {
            warn!(
                "Kernel {}: ignoring a cell chunk size of 0; keeping {}",
                self.kernel_id, self.cell_chunk_size
            );
            return;
        }
        self.cell_chunk_size = size;
    }

    /// Only solve the cells with a time index in `cells` (the work domain).
    /// `None` solves the whole solution grid.
    pub fn set_time_cells(&mut self, cells: Option<Range<usize>>) {
        self.time_cells = cells;
    }

    pub fn cell_chunk_size(&self) -> usize {
        self.cell_chunk_size
    }

    pub fn solvables(&self) -> &ParmGroup {
        &self.solvables
    }

    pub fn parms(&self) -> &ParmManager {
        &self.parms
    }

    pub fn builder(&self) -> &B {
        &self.builder
    }

    /// Consume the controller, keeping the parameters (with their solved
    /// values).
    pub fn into_parms(self) -> ParmManager {
        self.parms
    }

    /// Solve every cell of the solution grid.
    pub fn run(&mut self) -> Result<SolveReport, KernelError> {
        let grid = self.grid.clone().ok_or(KernelError::NoSolutionGrid)?;
        let mut report = SolveReport::default();
        if self.solvables.is_empty() {
            warn!("Kernel {}: nothing to solve", self.kernel_id);
            return Ok(report);
        }

        let chunks = match &self.time_cells {
            Some(cells) => grid.time_chunks_within(cells.clone(), self.cell_chunk_size)?,
            None => grid.time_chunks(self.cell_chunk_size),
        };
        report.num_chunks = chunks.len();
        let num_cells = chunks.iter().map(|c| c.len()).sum::<usize>() * grid.num_freq();
        info!(
            "Kernel {}: solving {} parameters ({} coefficients) over {} cells in {} chunks",
            self.kernel_id,
            self.solvables.len(),
            self.local_index.len(),
            num_cells,
            chunks.len()
        );
        let progress = make_progress_bar(num_cells, format!("Kernel {}", self.kernel_id));

        for (i_chunk, chunk) in chunks.iter().enumerate() {
            let locations = grid.locations_in(chunk.clone());
            let mut pending = BTreeMap::new();
            for location in locations {
                pending.insert(grid.cell_id(location)?, location);
            }
            debug!(
                "Kernel {}: chunk {} (time cells {:?}, {} cells)",
                self.kernel_id,
                i_chunk,
                chunk,
                pending.len()
            );

            let mapping = self.exchange_coeff_index()?;
            self.send_initial_coefficients(&pending)?;

            let mut num_iterations: BTreeMap<u32, u32> = BTreeMap::new();
            while !pending.is_empty() {
                let solutions = self.iterate(&grid, &pending)?;
                let mut num_answered = 0;
                for solution in solutions {
                    let location = match pending.get(&solution.id) {
                        Some(l) => *l,
                        None => {
                            warn!(
                                "Kernel {}: ignoring a solution for cell {}, which isn't pending",
                                self.kernel_id, solution.id
                            );
                            continue;
                        }
                    };
                    num_answered += 1;
                    if !solution.coeff.is_empty() {
                        let local = mapping.gather(&solution.coeff)?;
                        self.parms.set_coeffs(&self.solvables, location, &local)?;
                    }
                    let n = num_iterations.entry(solution.id).or_default();
                    *n += 1;
                    if solution.result.is_terminal() {
                        debug!(
                            "Kernel {}: cell {} {location} finished after {n} iterations: {} {}",
                            self.kernel_id, solution.id, solution.result, solution.result_text
                        );
                        report.cells.insert(
                            solution.id,
                            CellReport {
                                location,
                                ready_code: solution.result,
                                ready_text: solution.result_text,
                                num_iterations: *n,
                                rank: solution.rank,
                                chi_squared: solution.chi_sqr,
                            },
                        );
                        pending.remove(&solution.id);
                        progress.inc(1);
                    }
                }
                if num_answered == 0 {
                    return Err(KernelError::MissingSolutions {
                        num_missing: pending.len(),
                    });
                }
                self.builder.solvables_changed();
            }

            self.connection.send(&Message::ChunkDone(ChunkDoneMsg {
                kernel_id: self.kernel_id,
            }))?;

            if self.propagate_solutions {
                if let Some(next) = chunks.get(i_chunk + 1) {
                    self.propagate(&grid, chunk.end - 1, next.clone())?;
                }
            }
        }
        progress.finish();

        info!(
            "Kernel {}: {}/{} cells converged",
            self.kernel_id,
            report.count(ReadyCode::Converged),
            report.cells.len()
        );
        Ok(report)
    }

    /// Send the local coefficient index and get the global one back.
    fn exchange_coeff_index(&mut self) -> Result<CoeffMapping, KernelError> {
        self.connection.send(&Message::CoeffIndex(CoeffIndexMsg {
            kernel_id: self.kernel_id,
            contents: self.local_index.clone(),
        }))?;
        let global = match self.connection.recv()? {
            Message::CoeffIndex(msg) => msg.contents,
            other => {
                return Err(ConnectionError::UnexpectedMessage {
                    expected: "CoeffIndex",
                    got: other.kind(),
                }
                .into())
            }
        };
        Ok(global.mapping_for(&self.local_index)?)
    }

    fn send_initial_coefficients(
        &mut self,
        cells: &BTreeMap<u32, Location>,
    ) -> Result<(), KernelError> {
        let contents = cells
            .iter()
            .map(|(&id, &location)| {
                Ok(CellCoeff {
                    id,
                    coeff: self.parms.get_coeffs(&self.solvables, location)?,
                })
            })
            .collect::<Result<Vec<_>, KernelError>>()?;
        self.connection.send(&Message::Coefficients(CoefficientMsg {
            kernel_id: self.kernel_id,
            contents,
        }))?;
        Ok(())
    }

    /// One round trip: equations for every pending cell out, solutions in.
    fn iterate(
        &mut self,
        grid: &Grid,
        pending: &BTreeMap<u32, Location>,
    ) -> Result<Vec<CellSolution>, KernelError> {
        let locations: Vec<Location> = pending.values().copied().collect();
        let equations = self
            .builder
            .construct(grid, &self.parms, &self.solvables, &locations)?;
        if equations.len() != locations.len() {
            return Err(KernelError::BuilderMismatch {
                expected: locations.len(),
                got: equations.len(),
            });
        }
        let contents = pending
            .keys()
            .zip(equations)
            .map(|(&id, equation)| CellEquation { id, equation })
            .collect();
        self.connection.send(&Message::Equations(EquationMsg {
            kernel_id: self.kernel_id,
            contents,
        }))?;

        match self.connection.recv()? {
            Message::Solutions(msg) => Ok(msg.contents),
            other => Err(ConnectionError::UnexpectedMessage {
                expected: "Solutions",
                got: other.kind(),
            }
            .into()),
        }
    }

    /// Copy the coefficients of time cell `from_time` into every cell of the
    /// `to` time range.
    fn propagate(
        &mut self,
        grid: &Grid,
        from_time: usize,
        to: std::ops::Range<usize>,
    ) -> Result<(), KernelError> {
        for location in grid.locations_in(to) {
            let source = Location::new(location.freq, from_time);
            let coeff = self.parms.get_coeffs(&self.solvables, source)?;
            self.parms.set_coeffs(&self.solvables, location, &coeff)?;
        }
        Ok(())
    }
}

fn make_progress_bar(num_cells: usize, message: String) -> ProgressBar {
    ProgressBar::with_draw_target(
        Some(num_cells as _),
        if PROGRESS_BARS.load() {
            ProgressDrawTarget::stdout()
        } else {
            ProgressDrawTarget::hidden()
        },
    )
    .with_style(
        ProgressStyle::default_bar()
            .template("{msg}: [{wide_bar:.blue}] {pos:3}/{len:3} cells ({elapsed_precise}<{eta_precise})")
            .unwrap()
            .progress_chars("=> "),
    )
    .with_position(0)
    .with_message(message)
}
