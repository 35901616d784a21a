// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Calibrate synthetic data with a strategy controller, kernels and a solver,
//! all in this process.

mod run;

pub(super) use run::SimulateError;
use run::{SimulateParams, SimulateSummary};

use std::path::PathBuf;

use clap::Parser;
use indexmap::IndexMap;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::common::{
    display_warnings, InfoPrinter, SolverOptionsArgs, SolverOptionsArgsError, Warn, ARG_FILE_HELP,
};
use crate::{
    grid::{Axis, Grid, GridError},
    parms::{ParmError, ParmManager},
    solver_control::{SolverAddress, SolverControlError},
    strategy::{
        work_intervals, StrategyConfig, StrategyError, DEFAULT_FIT_CRITERION,
        DEFAULT_MAX_ITERATIONS,
    },
    DistcalError,
};

const DEFAULT_NUM_CHANNELS: usize = 8;
const DEFAULT_FREQ_RES_MHZ: f64 = 1.0;
const DEFAULT_START_FREQ_MHZ: f64 = 100.0;
const DEFAULT_NUM_TIMESTEPS: usize = 16;
const DEFAULT_TIME_RES_SECONDS: f64 = 10.0;
const DEFAULT_CHANNELS_PER_CELL: usize = 4;
const DEFAULT_TIMESTEPS_PER_CELL: usize = 2;
const DEFAULT_SAMPLES_PER_CELL: usize = 32;
const DEFAULT_NUM_KERNELS: usize = 2;
const DEFAULT_CELL_CHUNK_SIZE: usize = crate::kernel::DEFAULT_CELL_CHUNK_SIZE;
const DEFAULT_PARMS: [&str; 2] = ["gain:x=1.5,0.2", "gain:y=0.8,-0.4"];

lazy_static::lazy_static! {
    static ref NUM_CHANNELS_HELP: String =
        format!("The number of data channels. Default: {DEFAULT_NUM_CHANNELS}");

    static ref FREQ_RES_HELP: String =
        format!("The channel width [MHz]. Default: {DEFAULT_FREQ_RES_MHZ}");

    static ref START_FREQ_HELP: String =
        format!("The lower edge of the first channel [MHz]. Default: {DEFAULT_START_FREQ_MHZ}");

    static ref NUM_TIMESTEPS_HELP: String =
        format!("The number of data timesteps. Default: {DEFAULT_NUM_TIMESTEPS}");

    static ref TIME_RES_HELP: String =
        format!("The timestep length [seconds]. Default: {DEFAULT_TIME_RES_SECONDS}");

    static ref CHANNELS_PER_CELL_HELP: String =
        format!("How many data channels make up one solve cell. Default: {DEFAULT_CHANNELS_PER_CELL}");

    static ref TIMESTEPS_PER_CELL_HELP: String =
        format!("How many data timesteps make up one solve cell. Default: {DEFAULT_TIMESTEPS_PER_CELL}");

    static ref SAMPLES_PER_CELL_HELP: String =
        format!("How many synthetic samples each parameter has per solve cell. Default: {DEFAULT_SAMPLES_PER_CELL}");

    static ref NUM_KERNELS_HELP: String =
        format!("The number of kernels sharing the data. Default: {DEFAULT_NUM_KERNELS}");

    static ref CELL_CHUNK_SIZE_HELP: String =
        format!("How many time cells are solved together. Default: {DEFAULT_CELL_CHUNK_SIZE}");

    static ref MAX_ITERATIONS_HELP: String =
        format!("The most times a work domain is solved before moving on. Default: {DEFAULT_MAX_ITERATIONS}");

    static ref FIT_CRITERION_HELP: String =
        format!("A work domain is finished once its fit is at or below this. Default: {DEFAULT_FIT_CRITERION:e}");

    static ref PARMS_HELP: String =
        format!("The true coefficients of the parameters, as NAME=C0,C1,... Solving starts from 1 for the first coefficient and 0 for the rest. Default: {}", DEFAULT_PARMS.join(" "));
}

#[derive(Parser, Debug, Clone, Default, Serialize, Deserialize)]
pub(super) struct SimulateCliArgs {
    #[clap(long, help = NUM_CHANNELS_HELP.as_str(), help_heading = "DATA")]
    pub(super) num_channels: Option<usize>,

    #[clap(long, help = FREQ_RES_HELP.as_str(), help_heading = "DATA")]
    pub(super) freq_res: Option<f64>,

    #[clap(long, help = START_FREQ_HELP.as_str(), help_heading = "DATA")]
    pub(super) start_freq: Option<f64>,

    #[clap(short = 't', long, help = NUM_TIMESTEPS_HELP.as_str(), help_heading = "DATA")]
    pub(super) num_timesteps: Option<usize>,

    #[clap(long, help = TIME_RES_HELP.as_str(), help_heading = "DATA")]
    pub(super) time_res: Option<f64>,

    #[clap(long, multiple_values(true), help = PARMS_HELP.as_str(), help_heading = "DATA")]
    pub(super) parms: Option<Vec<String>>,

    #[clap(long, help = SAMPLES_PER_CELL_HELP.as_str(), help_heading = "DATA")]
    pub(super) samples_per_cell: Option<usize>,

    #[clap(long, help = CHANNELS_PER_CELL_HELP.as_str(), help_heading = "SOLVE CELLS")]
    pub(super) channels_per_cell: Option<usize>,

    #[clap(long, help = TIMESTEPS_PER_CELL_HELP.as_str(), help_heading = "SOLVE CELLS")]
    pub(super) timesteps_per_cell: Option<usize>,

    #[clap(long, help = CELL_CHUNK_SIZE_HELP.as_str(), help_heading = "SOLVE CELLS")]
    pub(super) cell_chunk_size: Option<usize>,

    /// Start each chunk of cells from the solutions of the previous chunk.
    #[clap(long, help_heading = "SOLVE CELLS")]
    #[serde(default)]
    pub(super) propagate_solutions: bool,

    /// Glob patterns of the parameters to solve for. Default: all of them
    #[clap(long, multiple_values(true), help_heading = "SOLVE CELLS")]
    pub(super) solvables: Option<Vec<String>>,

    /// Glob patterns of parameters not to solve for.
    #[clap(long, multiple_values(true), help_heading = "SOLVE CELLS")]
    pub(super) exclude: Option<Vec<String>>,

    #[clap(short = 'k', long, help = NUM_KERNELS_HELP.as_str(), help_heading = "STRATEGY")]
    pub(super) num_kernels: Option<usize>,

    /// The length of each work domain [seconds]. Default: the whole
    /// observation
    #[clap(long, help_heading = "STRATEGY")]
    pub(super) work_domain_size: Option<f64>,

    #[clap(long, help = MAX_ITERATIONS_HELP.as_str(), help_heading = "STRATEGY")]
    pub(super) max_iterations: Option<u32>,

    #[clap(long, help = FIT_CRITERION_HELP.as_str(), help_heading = "STRATEGY")]
    pub(super) fit_criterion: Option<f64>,

    /// Use the solver served at this socket (see `distcal solver`) rather than
    /// one in this process.
    #[clap(long, help_heading = "STRATEGY")]
    pub(super) solver_socket: Option<String>,

    /// Start from the parameter values in this file.
    #[clap(long, parse(from_os_str), help_heading = "INPUT FILES")]
    pub(super) input_parms: Option<PathBuf>,

    /// Write the solved parameters to this file.
    #[clap(short, long, parse(from_os_str), help_heading = "OUTPUT FILES")]
    pub(super) output_parms: Option<PathBuf>,

    /// Record the calibration session in this file.
    #[clap(long, parse(from_os_str), help_heading = "OUTPUT FILES")]
    pub(super) session: Option<PathBuf>,
}

impl SimulateCliArgs {
    fn merge(self, other: Self) -> Self {
        Self {
            num_channels: self.num_channels.or(other.num_channels),
            freq_res: self.freq_res.or(other.freq_res),
            start_freq: self.start_freq.or(other.start_freq),
            num_timesteps: self.num_timesteps.or(other.num_timesteps),
            time_res: self.time_res.or(other.time_res),
            parms: self.parms.or(other.parms),
            samples_per_cell: self.samples_per_cell.or(other.samples_per_cell),
            channels_per_cell: self.channels_per_cell.or(other.channels_per_cell),
            timesteps_per_cell: self.timesteps_per_cell.or(other.timesteps_per_cell),
            cell_chunk_size: self.cell_chunk_size.or(other.cell_chunk_size),
            propagate_solutions: self.propagate_solutions || other.propagate_solutions,
            solvables: self.solvables.or(other.solvables),
            exclude: self.exclude.or(other.exclude),
            num_kernels: self.num_kernels.or(other.num_kernels),
            work_domain_size: self.work_domain_size.or(other.work_domain_size),
            max_iterations: self.max_iterations.or(other.max_iterations),
            fit_criterion: self.fit_criterion.or(other.fit_criterion),
            solver_socket: self.solver_socket.or(other.solver_socket),
            input_parms: self.input_parms.or(other.input_parms),
            output_parms: self.output_parms.or(other.output_parms),
            session: self.session.or(other.session),
        }
    }
}

#[derive(Parser, Debug, Clone, Default, Serialize, Deserialize)]
pub(super) struct SimulateArgs {
    #[clap(name = "ARGUMENTS_FILE", help = ARG_FILE_HELP.as_str(), parse(from_os_str))]
    pub(super) args_file: Option<PathBuf>,

    #[clap(flatten)]
    #[serde(rename = "solver")]
    #[serde(default)]
    pub(super) solver_args: SolverOptionsArgs,

    #[clap(flatten)]
    #[serde(rename = "simulate")]
    #[serde(default)]
    pub(super) simulate_args: SimulateCliArgs,
}

#[derive(Error, Debug)]
pub(crate) enum SimulateArgsError {
    #[error("Couldn't parse '{text}' as a parameter; expected NAME=C0,C1,... e.g. gain:x=1.5,0.2")]
    BadParm { text: String },

    #[error("Parameter '{name}' was specified more than once")]
    DuplicateParm { name: String },

    #[error("At least one parameter must be simulated")]
    NoParms,

    #[error("At least one kernel is needed")]
    NoKernels,

    #[error("Every solve cell needs at least one sample")]
    NoSamples,

    #[error("The cell chunk size must be at least 1")]
    NoCellChunk,

    #[error("The channel width and timestep length must be positive; got {freq_res} MHz and {time_res} s")]
    BadResolution { freq_res: f64, time_res: f64 },

    #[error("The work domain size ({size} s) is smaller than a solve cell ({cell} s)")]
    WorkDomainTooSmall { size: f64, cell: f64 },

    #[error("No solvable patterns were given")]
    NoSolvables,

    #[error(transparent)]
    SolverOptions(#[from] SolverOptionsArgsError),

    #[error(transparent)]
    Strategy(#[from] StrategyError),

    #[error(transparent)]
    Grid(#[from] GridError),

    #[error(transparent)]
    Parm(#[from] ParmError),

    #[error(transparent)]
    Solver(#[from] SolverControlError),
}

/// Parse "NAME=C0,C1,...".
fn parse_parm(text: &str) -> Result<(String, Vec<f64>), SimulateArgsError> {
    let bad = || SimulateArgsError::BadParm {
        text: text.to_string(),
    };
    let (name, coeff) = text.split_once('=').ok_or_else(bad)?;
    let name = name.trim();
    if name.is_empty() {
        return Err(bad());
    }
    let coeff = coeff
        .split(',')
        .map(|c| c.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| bad())?;
    if coeff.is_empty() || coeff.iter().any(|c| !c.is_finite()) {
        return Err(bad());
    }
    Ok((name.to_string(), coeff))
}

impl SimulateArgs {
    /// Both command-line and file arguments overlap in terms of what is
    /// available; this function consolidates everything that was specified into
    /// a single struct. Where applicable, it will prefer CLI parameters over
    /// those in the file.
    ///
    /// This function should only ever merge arguments, and not try to make
    /// sense of them.
    pub(super) fn merge(self) -> Result<SimulateArgs, DistcalError> {
        debug!("Merging command-line arguments with the argument file");

        let cli_args = self;

        if let Some(arg_file) = cli_args.args_file {
            // Read in the file arguments. Ensure all of the file args are
            // accounted for by pattern matching.
            let SimulateArgs {
                args_file: _,
                solver_args,
                simulate_args,
            } = unpack_arg_file!(arg_file);

            Ok(SimulateArgs {
                args_file: None,
                solver_args: cli_args.solver_args.merge(solver_args),
                simulate_args: cli_args.simulate_args.merge(simulate_args),
            })
        } else {
            Ok(cli_args)
        }
    }

    fn parse(self) -> Result<SimulateParams, SimulateArgsError> {
        debug!("{:#?}", self);

        // Expose all the struct fields to ensure they're all used.
        let SimulateArgs {
            args_file: _,
            solver_args,
            simulate_args:
                SimulateCliArgs {
                    num_channels,
                    freq_res,
                    start_freq,
                    num_timesteps,
                    time_res,
                    parms,
                    samples_per_cell,
                    channels_per_cell,
                    timesteps_per_cell,
                    cell_chunk_size,
                    propagate_solutions,
                    solvables,
                    exclude,
                    num_kernels,
                    work_domain_size,
                    max_iterations,
                    fit_criterion,
                    solver_socket,
                    input_parms,
                    output_parms,
                    session,
                },
        } = self;

        let solver_options = solver_args.parse()?;

        // The grids.
        let freq_res = freq_res.unwrap_or(DEFAULT_FREQ_RES_MHZ);
        let time_res = time_res.unwrap_or(DEFAULT_TIME_RES_SECONDS);
        if !(freq_res > 0.0 && time_res > 0.0) {
            return Err(SimulateArgsError::BadResolution { freq_res, time_res });
        }
        let num_channels = num_channels.unwrap_or(DEFAULT_NUM_CHANNELS);
        let data_grid = Grid::new(
            Axis::regular(
                start_freq.unwrap_or(DEFAULT_START_FREQ_MHZ) * 1e6,
                freq_res * 1e6,
                num_channels,
            )?,
            Axis::regular(
                0.0,
                time_res,
                num_timesteps.unwrap_or(DEFAULT_NUM_TIMESTEPS),
            )?,
        );
        let solution_grid = Grid::partition(
            &data_grid,
            channels_per_cell.unwrap_or(DEFAULT_CHANNELS_PER_CELL),
            timesteps_per_cell.unwrap_or(DEFAULT_TIMESTEPS_PER_CELL),
        )?;
        let time_range = (solution_grid.time.start(), solution_grid.time.end());

        // The parameters and their true values.
        let parm_texts = match parms {
            Some(p) if p.is_empty() => return Err(SimulateArgsError::NoParms),
            Some(p) => p,
            None => DEFAULT_PARMS.iter().map(|s| s.to_string()).collect(),
        };
        let mut truth = IndexMap::new();
        for text in &parm_texts {
            let (name, coeff) = parse_parm(text)?;
            if truth.contains_key(&name) {
                return Err(SimulateArgsError::DuplicateParm { name });
            }
            truth.insert(name, coeff);
        }
        let mut parm_manager = match &input_parms {
            Some(file) => {
                let mut p = ParmManager::read(file)?;
                if p.grid() != &solution_grid {
                    format!(
                        "The solve cells of {} differ from the simulated ones; values are matched by cell index",
                        file.display()
                    )
                    .warn();
                }
                p.set_grid(solution_grid.clone());
                p
            }
            None => ParmManager::new(solution_grid.clone()),
        };
        for (name, coeff) in &truth {
            if parm_manager.names().any(|n| n == name) {
                continue;
            }
            let mut default = vec![0.0; coeff.len()];
            default[0] = 1.0;
            parm_manager.define(name, default)?;
        }

        let solvables = solvables.unwrap_or_else(|| vec!["*".to_string()]);
        if solvables.is_empty() {
            return Err(SimulateArgsError::NoSolvables);
        }
        let exclude = exclude.unwrap_or_default();
        let selected = parm_manager.select(&solvables, &exclude)?;
        if selected.is_empty() {
            format!("No parameters match the solvables {solvables:?}; nothing will be solved")
                .warn();
        }

        // Workers.
        let num_kernels = num_kernels.unwrap_or(DEFAULT_NUM_KERNELS);
        if num_kernels == 0 {
            return Err(SimulateArgsError::NoKernels);
        }
        let samples_per_cell = samples_per_cell.unwrap_or(DEFAULT_SAMPLES_PER_CELL);
        if samples_per_cell == 0 {
            return Err(SimulateArgsError::NoSamples);
        }
        if samples_per_cell < num_kernels {
            format!("With {num_kernels} kernels and {samples_per_cell} samples per cell, some kernels have no data").warn();
        }
        let cell_chunk_size = cell_chunk_size.unwrap_or(DEFAULT_CELL_CHUNK_SIZE);
        if cell_chunk_size == 0 {
            return Err(SimulateArgsError::NoCellChunk);
        }
        let solver = solver_socket
            .as_deref()
            .map(SolverAddress::parse)
            .transpose()?;

        // The strategy.
        let cell_time = solution_grid.time.width(0);
        let work_domain_size = work_domain_size.unwrap_or(time_range.1 - time_range.0);
        if work_domain_size < cell_time {
            return Err(SimulateArgsError::WorkDomainTooSmall {
                size: work_domain_size,
                cell: cell_time,
            });
        }
        let cells_per_domain = work_domain_size / cell_time;
        if (cells_per_domain - cells_per_domain.round()).abs() > 1e-6 {
            format!("The work domain size ({work_domain_size} s) isn't a multiple of the solve-cell length ({cell_time} s); work domains take the cells whose centres they contain").warn();
        }
        let intervals = work_intervals(time_range, work_domain_size)?;
        let strategy = StrategyConfig {
            time_range,
            work_domain_size,
            channels: (0, num_channels.saturating_sub(1) as u32),
            max_iterations: max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS),
            fit_criterion: fit_criterion.unwrap_or(DEFAULT_FIT_CRITERION),
            num_prediffers: num_kernels,
            solvables: solvables.clone(),
            solver_options,
            ..Default::default()
        };
        if strategy.max_iterations == 0 {
            return Err(StrategyError::NoIterations.into());
        }

        let mut printer = InfoPrinter::new("Simulation".into());
        printer.push_block(vec![
            format!(
                "Data: {} channels x {} timesteps",
                data_grid.num_freq(),
                data_grid.num_time()
            )
            .into(),
            format!(
                "Solve cells: {} x {} ({} samples per parameter each)",
                solution_grid.num_freq(),
                solution_grid.num_time(),
                samples_per_cell
            )
            .into(),
        ]);
        let mut block = vec![format!("{} parameters", truth.len()).into()];
        for (name, coeff) in &truth {
            block.push(format!("{name}: {coeff:?}").into());
        }
        printer.push_block(block);
        printer.push_line(
            format!(
                "Solving for {:?}, excluding {:?}",
                selected.names(),
                exclude
            )
            .into(),
        );
        printer.display();

        let mut printer = InfoPrinter::new("Strategy".into());
        printer.push_line(
            format!(
                "{} work domains of {work_domain_size} s, at most {} iterations each",
                intervals.len(),
                strategy.max_iterations
            )
            .into(),
        );
        printer.push_line(format!("Fit criterion: {:e}", strategy.fit_criterion).into());
        printer.push_line(
            format!(
                "{num_kernels} kernels; chunks of {cell_chunk_size} time cells{}",
                if propagate_solutions {
                    ", propagating solutions"
                } else {
                    ""
                }
            )
            .into(),
        );
        printer.push_line(
            match &solver {
                Some(address) => format!("Solver at {address}"),
                None => "Solver in this process".to_string(),
            }
            .into(),
        );
        if let Some(output) = &output_parms {
            printer.push_line(format!("Writing solutions to {}", output.display()).into());
        }
        if let Some(session) = &session {
            printer.push_line(format!("Recording the session in {}", session.display()).into());
        }
        printer.display();
        display_warnings();

        Ok(SimulateParams {
            solution_grid,
            parms: parm_manager,
            truth,
            samples_per_cell,
            num_kernels,
            cell_chunk_size,
            propagate_solutions,
            exclude,
            strategy,
            solver,
            session_file: session,
            output_parms,
        })
    }

    pub(super) fn run(self, dry_run: bool) -> Result<(), DistcalError> {
        let params = self.parse()?;
        if dry_run {
            info!("Dry run -- exiting now.");
            return Ok(());
        }
        let summary = params.run()?;
        display_summary(&params, &summary)?;
        Ok(())
    }
}

fn display_summary(params: &SimulateParams, summary: &SimulateSummary) -> Result<(), DistcalError> {
    let mut printer = InfoPrinter::new("Calibration results".into());
    printer.push_line(
        format!(
            "{}/{} cells converged; {} work orders",
            summary.num_converged(),
            summary.cells.len(),
            summary.num_work_orders
        )
        .into(),
    );
    for (name, truth) in &params.truth {
        let error = summary.largest_error(name, truth)?;
        printer.push_line(format!("{name}: largest error {error:e}").into());
    }
    printer.display();
    Ok(())
}
