// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Top-level orchestration of a calibration run.
//!
//! A [`StrategyController`] splits the time range of an observation into work
//! domains and, one [`StrategyController::execute`] tick at a time, issues
//! pairs of prediffer and solve [`WorkOrder`]s for them. It never waits on the
//! workers directly; it only reads back the solution of the pair it issued on
//! the previous tick.

mod error;
mod workorder;

pub use error::StrategyError;
pub use workorder::{
    MemoryWorkQueue, PredifferTask, Solution, SolveTask, WorkOrder, WorkOrderFlags, WorkOrderKind,
    WorkOrderStatus, WorkOrderTask, WorkQueue,
};

use log::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::solver::SolverOptions;

pub const DEFAULT_MAX_ITERATIONS: u32 = 10;
pub const DEFAULT_FIT_CRITERION: f64 = 1e-6;
pub const DEFAULT_PREDIFFER_KS_TYPE: &str = "kernel";
pub const DEFAULT_SOLVER_KS_TYPE: &str = "solver";
pub const DEFAULT_MODEL_TYPE: &str = "synthetic";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Start and end of the data to calibrate \[s\].
    pub time_range: (f64, f64),

    /// The length of each work domain \[s\]. The last one may be shorter.
    pub work_domain_size: f64,

    /// First and last channel, inclusive.
    pub channels: (u32, u32),

    /// The most pairs of work orders issued for a single work domain.
    pub max_iterations: u32,

    /// A work domain is finished once a solution's fit is at or below this.
    pub fit_criterion: f64,

    /// How many prediffers take part. Every one after the first gets a copy
    /// of each prediffer work order.
    pub num_prediffers: usize,

    pub prediffer_ks_type: String,
    pub solver_ks_type: String,
    pub model_type: String,
    pub solvables: Vec<String>,
    pub subtract_sources: bool,
    pub write_predicted_data: bool,
    pub solver_options: SolverOptions,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        StrategyConfig {
            time_range: (0.0, 1.0),
            work_domain_size: 1.0,
            channels: (0, 0),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            fit_criterion: DEFAULT_FIT_CRITERION,
            num_prediffers: 1,
            prediffer_ks_type: DEFAULT_PREDIFFER_KS_TYPE.to_string(),
            solver_ks_type: DEFAULT_SOLVER_KS_TYPE.to_string(),
            model_type: DEFAULT_MODEL_TYPE.to_string(),
            solvables: vec!["*".to_string()],
            subtract_sources: false,
            write_predicted_data: false,
            solver_options: SolverOptions::default(),
        }
    }
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyState {
    #[strum(serialize = "pre-processing")]
    Preprocess,

    #[strum(serialize = "iterating")]
    Iterate,

    #[strum(serialize = "post-processing")]
    Postprocess,

    #[strum(serialize = "done")]
    Done,
}

/// The outcome of one [`StrategyController::execute`] tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyStep {
    /// These work orders were issued.
    Issued(Vec<u64>),

    /// The solution of the previous work orders isn't available yet.
    Waiting,

    /// There's nothing left to do.
    Finished,
}

/// Split `time_range` into consecutive work domains of `size` seconds. The
/// last domain is shortened to fit.
pub fn work_intervals(time_range: (f64, f64), size: f64) -> Result<Vec<(f64, f64)>, StrategyError> {
    let (start, end) = time_range;
    if !start.is_finite() || !end.is_finite() || end <= start {
        return Err(StrategyError::BadTimeRange { start, end });
    }
    if !size.is_finite() || size <= 0.0 {
        return Err(StrategyError::BadWorkDomainSize { size });
    }
    // Don't make a sliver of a domain out of floating-point error.
    let n = ((end - start) / size - 1e-9).ceil().max(1.0) as usize;
    Ok((0..n)
        .map(|i| {
            let lower = start + i as f64 * size;
            let upper = if i == n - 1 {
                end
            } else {
                start + (i + 1) as f64 * size
            };
            (lower, upper)
        })
        .collect())
}

/// The work orders issued on the previous tick.
#[derive(Debug, Clone)]
struct Pending {
    ids: Vec<u64>,
    solve_id: u64,
    expects_solution: bool,
}

pub struct StrategyController<Q: WorkQueue> {
    id: u32,
    config: StrategyConfig,
    queue: Q,
    intervals: Vec<(f64, f64)>,
    state: StrategyState,
    next_work_order_id: u64,

    /// Index into `intervals`.
    interval: usize,

    /// Which iteration of the current work domain was last issued (1-based).
    iteration: u32,

    pending: Option<Pending>,

    /// The solve order whose solution the next work orders build on.
    last_solution: Option<u64>,
}

impl<Q: WorkQueue> StrategyController<Q> {
    pub fn new(id: u32, config: StrategyConfig, queue: Q) -> Result<StrategyController<Q>, StrategyError> {
        if config.num_prediffers == 0 {
            return Err(StrategyError::NoPrediffers);
        }
        if config.max_iterations == 0 {
            return Err(StrategyError::NoIterations);
        }
        let intervals = work_intervals(config.time_range, config.work_domain_size)?;
        debug!(
            "Strategy {id}: {} work domains of {} s",
            intervals.len(),
            config.work_domain_size
        );
        Ok(StrategyController {
            id,
            config,
            queue,
            intervals,
            state: StrategyState::Preprocess,
            next_work_order_id: 1,
            interval: 0,
            iteration: 0,
            pending: None,
            last_solution: None,
        })
    }

    /// Start numbering work orders from `id` rather than 1, e.g. to share a
    /// work queue with another controller.
    pub fn with_first_work_order_id(mut self, id: u64) -> StrategyController<Q> {
        self.next_work_order_id = id;
        self
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn state(&self) -> StrategyState {
        self.state
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    pub fn intervals(&self) -> &[(f64, f64)] {
        &self.intervals
    }

    /// The index of the work domain being worked on.
    pub fn current_interval(&self) -> usize {
        self.interval
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    /// Advance the strategy by one step.
    pub fn execute(&mut self) -> Result<StrategyStep, StrategyError> {
        // Read back the solution of the previous solve order, unless it
        // was never going to produce one.
        let solution = match &self.pending {
            Some(p) if p.expects_solution => match self.queue.solution(p.solve_id) {
                Some(s) => Some(s),
                None => {
                    trace!(
                        "Strategy {}: no solution for work order {} yet",
                        self.id,
                        p.solve_id
                    );
                    return Ok(StrategyStep::Waiting);
                }
            },
            _ => None,
        };

        match self.state {
            StrategyState::Preprocess => {
                info!(
                    "Strategy {}: calibrating {} work domains",
                    self.id,
                    self.intervals.len()
                );
                self.state = StrategyState::Iterate;
                self.start_interval(0)
            }

            StrategyState::Iterate => match solution {
                Some(solution) => {
                    self.last_solution = Some(solution.work_order_id);
                    if solution.fit <= self.config.fit_criterion {
                        debug!(
                            "Strategy {}: work domain {} met the fit criterion after {} iterations (fit {})",
                            self.id, self.interval, self.iteration, solution.fit
                        );
                        self.issue(
                            WorkOrderFlags {
                                do_nothing: true,
                                ..Default::default()
                            },
                            self.intervals[self.interval],
                        )
                    } else if self.iteration >= self.config.max_iterations {
                        warn!(
                            "Strategy {}: work domain {} didn't meet the fit criterion in {} iterations (fit {})",
                            self.id, self.interval, self.iteration, solution.fit
                        );
                        self.next_interval()
                    } else {
                        self.iteration += 1;
                        self.issue(
                            WorkOrderFlags {
                                update_parms: true,
                                subtract_sources: self.config.subtract_sources,
                                ..Default::default()
                            },
                            self.intervals[self.interval],
                        )
                    }
                }
                // The previous pair did nothing, so this work domain is done.
                None => self.next_interval(),
            },

            StrategyState::Postprocess => {
                if let Some(p) = &self.pending {
                    let all_executed = p
                        .ids
                        .iter()
                        .all(|&id| self.queue.status(id) == Some(WorkOrderStatus::Executed));
                    if !all_executed {
                        return Ok(StrategyStep::Waiting);
                    }
                }
                self.pending = None;
                self.state = StrategyState::Done;
                info!("Strategy {}: done", self.id);
                Ok(StrategyStep::Finished)
            }

            StrategyState::Done => Ok(StrategyStep::Finished),
        }
    }

    fn next_interval(&mut self) -> Result<StrategyStep, StrategyError> {
        let next = self.interval + 1;
        if next < self.intervals.len() {
            return self.start_interval(next);
        }

        self.state = StrategyState::Postprocess;
        self.last_solution = None;
        self.issue(
            WorkOrderFlags {
                clean_up: true,
                write_predicted_data: self.config.write_predicted_data,
                ..Default::default()
            },
            self.config.time_range,
        )
    }

    fn start_interval(&mut self, interval: usize) -> Result<StrategyStep, StrategyError> {
        self.interval = interval;
        self.iteration = 1;
        // Solutions from another work domain don't apply here.
        self.last_solution = None;
        debug!(
            "Strategy {}: starting work domain {} {:?}",
            self.id, interval, self.intervals[interval]
        );
        self.issue(
            WorkOrderFlags {
                new_domain: true,
                new_baselines: interval == 0,
                subtract_sources: self.config.subtract_sources,
                ..Default::default()
            },
            self.intervals[interval],
        )
    }

    /// Issue a prediffer and solve work order pair, plus a copy of the
    /// prediffer order for every extra prediffer.
    fn issue(
        &mut self,
        flags: WorkOrderFlags,
        time_interval: (f64, f64),
    ) -> Result<StrategyStep, StrategyError> {
        let solution_id = if flags.update_parms {
            self.last_solution
        } else {
            None
        };
        let prediffer = PredifferTask {
            ks_type: self.config.prediffer_ks_type.clone(),
            channels: self.config.channels,
            time_interval,
            model_type: self.config.model_type.clone(),
            solvables: self.config.solvables.clone(),
        };

        let mut tasks = Vec::with_capacity(self.config.num_prediffers + 1);
        tasks.push(WorkOrderTask::Prediffer(prediffer.clone()));
        tasks.push(WorkOrderTask::Solve(SolveTask {
            ks_type: self.config.solver_ks_type.clone(),
            options: self.config.solver_options,
        }));
        for replica in 1..self.config.num_prediffers {
            tasks.push(WorkOrderTask::Prediffer(PredifferTask {
                ks_type: format!("{}_{replica}", prediffer.ks_type),
                ..prediffer.clone()
            }));
        }

        let mut ids = Vec::with_capacity(tasks.len());
        let mut solve_id = 0;
        for task in tasks {
            let id = self.next_work_order_id;
            self.next_work_order_id += 1;
            if matches!(task, WorkOrderTask::Solve(_)) {
                solve_id = id;
            }
            self.queue.add(WorkOrder {
                id,
                controller_id: self.id,
                status: WorkOrderStatus::New,
                flags,
                solution_id,
                task,
            })?;
            ids.push(id);
        }
        trace!("Strategy {}: issued work orders {ids:?} ({flags:?})", self.id);

        self.pending = Some(Pending {
            ids: ids.clone(),
            solve_id,
            expects_solution: !flags.do_nothing && !flags.clean_up,
        });
        Ok(StrategyStep::Issued(ids))
    }
}
