// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The worker pool behind `simulate`: a strategy controller issues work
//! orders, one thread per kernel executes the prediffer orders and another
//! runs the global solve for the solve order. Every order passes through a
//! [`CalSession`] so that the run can be inspected afterwards.

use std::{collections::BTreeMap, ops::Range, path::PathBuf, thread};

use indexmap::IndexMap;
use log::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    connection::{BlobStream, ChannelConnection, Connection, ConnectionError},
    grid::{Axis, Grid},
    kernel::{CellReport, KernelError, LocalSolveController, SolveReport, SyntheticPrediffer},
    parms::{ParmError, ParmGroup, ParmManager},
    session::{CalSession, SessionError, SessionState, WorkerInfo, WorkerType},
    solver::{ReadyCode, Solver},
    solver_control::{
        GlobalSolveController, GlobalSolveSummary, SolverAddress, SolverBackend, SolverClient,
        SolverControlError,
    },
    strategy::{
        MemoryWorkQueue, PredifferTask, Solution, StrategyConfig, StrategyController,
        StrategyError, StrategyStep, WorkOrder, WorkOrderKind, WorkOrderTask,
    },
};

const CONTROL_PROCESS_ID: &str = "control";
const SOLVER_PROCESS_ID: &str = "solver-0";

#[derive(Error, Debug)]
pub(crate) enum SimulateError {
    #[error("The strategy is waiting on work orders that no worker will execute")]
    StrategyStalled,

    #[error("Worker '{process_id}' has no command to execute")]
    NoCommand { process_id: String },

    #[error("There is no work order for KS type '{ks_type}'")]
    NoWorkOrder { ks_type: String },

    #[error("The work domain {start} s to {end} s contains no solve cells")]
    EmptyWorkDomain { start: f64, end: f64 },

    #[error("Worker '{process_id}' panicked")]
    WorkerPanicked { process_id: String },

    #[error(transparent)]
    Kernel(#[from] KernelError),

    #[error(transparent)]
    SolverControl(#[from] SolverControlError),

    #[error(transparent)]
    Strategy(#[from] StrategyError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Parm(#[from] ParmError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// What a kernel reports back through the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(super) struct KernelResult {
    pub(super) work_order_id: u64,
    pub(super) num_cells: usize,
    pub(super) num_converged: usize,
}

/// What the solver reports back through the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(super) struct SolverResult {
    pub(super) work_order_id: u64,
    pub(super) num_chunks: usize,
    pub(super) num_iterations: usize,
    pub(super) num_cells: usize,
}

struct KernelOutcome {
    report: SolveReport,
    solvables: ParmGroup,
    parms: ParmManager,
}

pub(super) struct SimulateParams {
    pub(super) solution_grid: Grid,

    /// Starting values, defined on `solution_grid`.
    pub(super) parms: ParmManager,

    pub(super) truth: IndexMap<String, Vec<f64>>,
    pub(super) samples_per_cell: usize,
    pub(super) num_kernels: usize,
    pub(super) cell_chunk_size: usize,
    pub(super) propagate_solutions: bool,
    pub(super) exclude: Vec<String>,
    pub(super) strategy: StrategyConfig,

    /// A remote solver. `None` solves in this process.
    pub(super) solver: Option<SolverAddress>,

    pub(super) session_file: Option<PathBuf>,
    pub(super) output_parms: Option<PathBuf>,
}

#[derive(Debug)]
pub(super) struct SimulateSummary {
    pub(super) parms: ParmManager,

    /// The last report of every solved cell, keyed by cell id.
    pub(super) cells: BTreeMap<u32, CellReport>,

    pub(super) solutions: Vec<Solution>,
    pub(super) num_work_orders: usize,
}

impl SimulateSummary {
    pub(super) fn num_converged(&self) -> usize {
        self.cells
            .values()
            .filter(|c| c.ready_code == ReadyCode::Converged)
            .count()
    }

    /// The largest absolute difference between any solved coefficient of
    /// `name` and its true value.
    pub(super) fn largest_error(&self, name: &str, truth: &[f64]) -> Result<f64, ParmError> {
        let mut largest: f64 = 0.0;
        for cell in self.cells.values() {
            let coeff = self.parms.get_coeff(name, cell.location)?;
            for (c, t) in coeff.iter().zip(truth) {
                largest = largest.max((c - t).abs());
            }
        }
        Ok(largest)
    }
}

fn kernel_process_id(index: usize) -> String {
    format!("kernel-{index}")
}

/// The KS type of the prediffer orders for kernel `index`; the first kernel
/// takes the original orders and the rest take the replicas.
fn kernel_ks_type(base: &str, index: usize) -> String {
    if index == 0 {
        base.to_string()
    } else {
        format!("{base}_{index}")
    }
}

/// The time cells whose centres lie in `[start, end)`.
pub(super) fn time_cells(axis: &Axis, (start, end): (f64, f64)) -> Result<Range<usize>, SimulateError> {
    let mut cells = (0..axis.size()).filter(|&i| {
        let centre = axis.centre(i);
        centre >= start && centre < end
    });
    match cells.next() {
        Some(first) => {
            let last = cells.last().unwrap_or(first);
            Ok(first..last + 1)
        }
        None => Err(SimulateError::EmptyWorkDomain { start, end }),
    }
}

fn connect(address: &SolverAddress) -> Result<Box<dyn Connection>, ConnectionError> {
    Ok(match address {
        SolverAddress::Tcp(a) => Box::new(BlobStream::connect(*a)?),
        #[cfg(unix)]
        SolverAddress::Unix(p) => Box::new(BlobStream::connect_unix(p)?),
    })
}

impl SimulateParams {
    /// Calibrate. A failure is also recorded in the session.
    pub(super) fn run(&self) -> Result<SimulateSummary, SimulateError> {
        let session = match &self.session_file {
            Some(file) => CalSession::create(file)?,
            None => CalSession::new(),
        };
        let result = match &self.solver {
            None => self.run_with(&session, Solver::new()),
            Some(address) => match connect(address) {
                Ok(c) => self.run_with(&session, SolverClient::new(c)),
                Err(e) => Err(e.into()),
            },
        };
        if let Err(e) = &result {
            if !session.state().is_terminal() {
                if let Err(e) = session.fail(&e.to_string()) {
                    warn!("Couldn't record the failure in the session: {e}");
                }
            }
        }
        result
    }

    fn run_with<B: SolverBackend + Send>(
        &self,
        session: &CalSession,
        mut backend: B,
    ) -> Result<SimulateSummary, SimulateError> {
        let grid = &self.solution_grid;
        session.register_control(CONTROL_PROCESS_ID)?;
        let info = WorkerInfo {
            freq_range: Some((grid.freq.start(), grid.freq.end())),
            time_range: Some((grid.time.start(), grid.time.end())),
            ..Default::default()
        };
        for i in 0..self.num_kernels {
            session.register_kernel(&kernel_process_id(i), info.clone())?;
        }
        session.register_solver(
            SOLVER_PROCESS_ID,
            WorkerInfo {
                port: match &self.solver {
                    Some(SolverAddress::Tcp(a)) => Some(a.port()),
                    _ => None,
                },
                ..Default::default()
            },
        )?;
        session.set_time_axis(grid.time.clone())?;
        session.set_state(SessionState::Initializing)?;
        session.set_state(SessionState::Processing)?;

        let queue = MemoryWorkQueue::new();
        let mut controller = StrategyController::new(0, self.strategy.clone(), queue.clone())?;
        let mut summary = SimulateSummary {
            parms: self.parms.clone(),
            cells: BTreeMap::new(),
            solutions: vec![],
            num_work_orders: 0,
        };

        loop {
            match controller.execute()? {
                StrategyStep::Issued(ids) => {
                    trace!("Executing work orders {ids:?}");
                    summary.num_work_orders += ids.len();
                    backend = self.execute_work_orders(
                        session,
                        &queue,
                        controller.iteration(),
                        backend,
                        &mut summary,
                    )?;
                }
                // Every order is executed before the next tick, so there's
                // never anything to wait for.
                StrategyStep::Waiting => return Err(SimulateError::StrategyStalled),
                StrategyStep::Finished => break,
            }
        }

        session.set_state(SessionState::Done)?;
        Ok(summary)
    }

    /// Claim and execute everything issued on one strategy tick.
    fn execute_work_orders<B: SolverBackend + Send>(
        &self,
        session: &CalSession,
        queue: &MemoryWorkQueue,
        iteration: u32,
        backend: B,
        summary: &mut SimulateSummary,
    ) -> Result<B, SimulateError> {
        let mut prediffer_orders = Vec::with_capacity(self.num_kernels);
        for i in 0..self.num_kernels {
            let ks_type = kernel_ks_type(&self.strategy.prediffer_ks_type, i);
            let order = queue
                .claim(WorkOrderKind::Prediffer, Some(ks_type.as_str()))
                .ok_or(SimulateError::NoWorkOrder { ks_type })?;
            prediffer_orders.push(order);
        }
        let solve_order = queue
            .claim(WorkOrderKind::Solve, Some(self.strategy.solver_ks_type.as_str()))
            .ok_or_else(|| SimulateError::NoWorkOrder {
                ks_type: self.strategy.solver_ks_type.clone(),
            })?;

        let flags = solve_order.flags;
        if flags.do_nothing || flags.clean_up {
            if flags.clean_up {
                self.clean_up(&summary.parms)?;
            }
            for order in prediffer_orders.iter().chain(std::iter::once(&solve_order)) {
                queue.complete(order.id, None)?;
            }
            return Ok(backend);
        }

        let kernel_command = session.post_command(Some(WorkerType::Kernel), &prediffer_orders)?;
        let solver_command = session.post_command(Some(WorkerType::Solver), &solve_order)?;
        trace!("Posted commands {kernel_command} and {solver_command}");

        let (kernel_ends, solver_ends): (Vec<ChannelConnection>, Vec<ChannelConnection>) =
            (0..self.num_kernels)
                .map(|_| ChannelConnection::pair())
                .unzip();
        let solver_ends: Vec<Box<dyn Connection>> = solver_ends
            .into_iter()
            .map(|c| Box::new(c) as Box<dyn Connection>)
            .collect();
        let start_parms = &summary.parms;

        let (kernel_results, solver_result) = thread::scope(|scope| {
            let solver = scope.spawn(|| self.solve(session, backend, solver_ends));
            let kernels: Vec<_> = kernel_ends
                .into_iter()
                .enumerate()
                .map(|(i, connection)| {
                    let parms = start_parms.clone();
                    scope.spawn(move || self.predict(session, i, connection, parms))
                })
                .collect();

            let kernel_results: Vec<Result<KernelOutcome, SimulateError>> = kernels
                .into_iter()
                .enumerate()
                .map(|(i, handle)| {
                    handle
                        .join()
                        .map_err(|_| SimulateError::WorkerPanicked {
                            process_id: kernel_process_id(i),
                        })
                        .and_then(|r| r)
                })
                .collect();
            let solver_result = solver
                .join()
                .map_err(|_| SimulateError::WorkerPanicked {
                    process_id: SOLVER_PROCESS_ID.to_string(),
                })
                .and_then(|r| r);
            (kernel_results, solver_result)
        });

        // A kernel that couldn't talk to the solver is a symptom; report the
        // cause if there is one.
        let mut outcomes = Vec::with_capacity(kernel_results.len());
        let mut connection_error = None;
        for result in kernel_results {
            match result {
                Ok(o) => outcomes.push(o),
                Err(SimulateError::Kernel(KernelError::Connection(e))) => {
                    connection_error.get_or_insert(e);
                }
                Err(e) => return Err(e),
            }
        }
        let (global, backend) = solver_result?;
        if let Some(e) = connection_error {
            return Err(KernelError::Connection(e).into());
        }

        // Keep what the kernels solved.
        for outcome in &outcomes {
            for cell in outcome.report.cells.values() {
                let values = outcome.parms.get_coeffs(&outcome.solvables, cell.location)?;
                summary
                    .parms
                    .set_coeffs(&outcome.solvables, cell.location, &values)?;
            }
        }
        let fit = outcomes
            .first()
            .map(|o| fit(&o.report))
            .unwrap_or_default();
        if let Some(outcome) = outcomes.into_iter().next() {
            summary.cells.extend(outcome.report.cells);
        }

        let solution = Solution {
            work_order_id: solve_order.id,
            iteration,
            fit,
            num_cells: global.cells.len(),
            num_converged: global
                .cells
                .values()
                .filter(|&&c| c == ReadyCode::Converged)
                .count(),
        };
        debug!(
            "Work order {}: {}/{} cells converged, fit {:e}",
            solve_order.id, solution.num_converged, solution.num_cells, solution.fit
        );
        for order in &prediffer_orders {
            queue.complete(order.id, None)?;
        }
        queue.complete(solve_order.id, Some(solution.clone()))?;
        summary.solutions.push(solution);
        Ok(backend)
    }

    /// Execute this kernel's prediffer order from the latest kernel command.
    fn predict(
        &self,
        session: &CalSession,
        index: usize,
        connection: ChannelConnection,
        parms: ParmManager,
    ) -> Result<KernelOutcome, SimulateError> {
        let process_id = kernel_process_id(index);
        let command = session
            .next_command(&process_id)?
            .ok_or_else(|| SimulateError::NoCommand {
                process_id: process_id.clone(),
            })?;
        let orders: Vec<WorkOrder> = command.parse()?;
        let ks_type = kernel_ks_type(&self.strategy.prediffer_ks_type, index);
        let (order_id, task): (u64, &PredifferTask) = orders
            .iter()
            .find_map(|o| match &o.task {
                WorkOrderTask::Prediffer(t) if t.ks_type == ks_type => Some((o.id, t)),
                _ => None,
            })
            .ok_or(SimulateError::NoWorkOrder { ks_type })?;
        let cells = time_cells(&self.solution_grid.time, task.time_interval)?;

        let builder = SyntheticPrediffer::new(self.truth.clone(), self.samples_per_cell)
            .with_subset(index, self.num_kernels);
        let mut kernel = LocalSolveController::new(index as u32, connection, builder, parms);
        kernel.set_solution_grid(self.solution_grid.clone());
        kernel.set_solvables(&task.solvables, &self.exclude)?;
        kernel.set_cell_chunk_size(self.cell_chunk_size);
        kernel.set_propagate_solutions(self.propagate_solutions);
        kernel.set_time_cells(Some(cells));
        let report = kernel.run()?;
        let solvables = kernel.solvables().clone();
        // Dropping the kernel's connection tells the solver it's finished.
        let parms = kernel.into_parms();

        session.post_result(
            command.id,
            &process_id,
            &KernelResult {
                work_order_id: order_id,
                num_cells: report.cells.len(),
                num_converged: report.count(ReadyCode::Converged),
            },
        )?;
        Ok(KernelOutcome {
            report,
            solvables,
            parms,
        })
    }

    /// Execute the solve order from the latest solver command.
    fn solve<B: SolverBackend>(
        &self,
        session: &CalSession,
        backend: B,
        kernels: Vec<Box<dyn Connection>>,
    ) -> Result<(GlobalSolveSummary, B), SimulateError> {
        let command = session
            .next_command(SOLVER_PROCESS_ID)?
            .ok_or_else(|| SimulateError::NoCommand {
                process_id: SOLVER_PROCESS_ID.to_string(),
            })?;
        let order: WorkOrder = command.parse()?;
        let options = match &order.task {
            WorkOrderTask::Solve(t) => t.options,
            WorkOrderTask::Prediffer(_) => {
                return Err(SimulateError::NoWorkOrder {
                    ks_type: self.strategy.solver_ks_type.clone(),
                })
            }
        };

        let mut global = GlobalSolveController::new(backend, options, kernels);
        let summary = global.run()?;
        session.post_result(
            command.id,
            SOLVER_PROCESS_ID,
            &SolverResult {
                work_order_id: order.id,
                num_chunks: summary.num_chunks,
                num_iterations: summary.num_iterations,
                num_cells: summary.cells.len(),
            },
        )?;
        Ok((summary, global.into_backend()))
    }

    fn clean_up(&self, parms: &ParmManager) -> Result<(), SimulateError> {
        match &self.output_parms {
            Some(file) => {
                parms.write(file)?;
                info!("Wrote the solved parameters to {}", file.display());
            }
            None => debug!("Nothing to write"),
        }
        Ok(())
    }
}

/// How well a solve went: the largest chi-squared of any finished cell.
/// Cells that didn't converge count as infinitely bad.
fn fit(report: &SolveReport) -> f64 {
    report
        .cells
        .values()
        .map(|c| match c.ready_code {
            ReadyCode::Converged => c.chi_squared.max(0.0),
            _ => f64::INFINITY,
        })
        .fold(0.0, f64::max)
}
