// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Work orders and the queue they're dispatched through.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use log::trace;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumDiscriminants};

use super::StrategyError;
use crate::solver::SolverOptions;

/// Work orders are created `New`, claimed by a worker (`Assigned`) and
/// finally `Executed`. Only the worker pool moves an order along.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkOrderStatus {
    #[strum(serialize = "new")]
    New,

    #[strum(serialize = "assigned")]
    Assigned,

    #[strum(serialize = "executed")]
    Executed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkOrderFlags {
    pub new_baselines: bool,
    pub new_domain: bool,
    pub subtract_sources: bool,
    pub write_predicted_data: bool,
    pub clean_up: bool,
    pub update_parms: bool,

    /// A placeholder; the worker only marks it executed and no solution is
    /// produced.
    pub do_nothing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredifferTask {
    /// Which kernel (prediffer) should take this order.
    pub ks_type: String,

    /// First and last channel, inclusive.
    pub channels: (u32, u32),

    /// Start and end of the work domain \[s\].
    pub time_interval: (f64, f64),

    pub model_type: String,

    /// Glob patterns of the parameters to solve for.
    pub solvables: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolveTask {
    pub ks_type: String,
    pub options: SolverOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, EnumDiscriminants)]
#[strum_discriminants(name(WorkOrderKind), derive(Display, Hash, Serialize, Deserialize))]
pub enum WorkOrderTask {
    Prediffer(PredifferTask),
    Solve(SolveTask),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkOrder {
    pub id: u64,

    /// The id of the strategy controller that issued this order.
    pub controller_id: u32,

    pub status: WorkOrderStatus,
    pub flags: WorkOrderFlags,

    /// The id of the work order whose solution this one builds on, if any.
    pub solution_id: Option<u64>,

    pub task: WorkOrderTask,
}

impl WorkOrder {
    pub fn kind(&self) -> WorkOrderKind {
        WorkOrderKind::from(&self.task)
    }

    pub fn ks_type(&self) -> &str {
        match &self.task {
            WorkOrderTask::Prediffer(t) => &t.ks_type,
            WorkOrderTask::Solve(t) => &t.ks_type,
        }
    }
}

/// What a worker reports back after executing a solve order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Solution {
    pub work_order_id: u64,

    /// The strategy iteration (within the work domain) that produced this.
    pub iteration: u32,

    /// The fit quality; smaller is better.
    pub fit: f64,

    pub num_cells: usize,
    pub num_converged: usize,
}

/// The controller's view of the work-order table.
pub trait WorkQueue {
    /// Insert a new work order.
    fn add(&self, order: WorkOrder) -> Result<(), StrategyError>;

    fn status(&self, id: u64) -> Option<WorkOrderStatus>;

    /// The solution written for a work order, if there is one yet.
    fn solution(&self, id: u64) -> Option<Solution>;
}

#[derive(Debug, Default)]
struct QueueState {
    orders: BTreeMap<u64, WorkOrder>,
    solutions: BTreeMap<u64, Solution>,
}

/// An in-process work-order table. Clones share the same table, so the
/// controller and any number of workers can each hold one.
#[derive(Debug, Clone, Default)]
pub struct MemoryWorkQueue {
    state: Arc<Mutex<QueueState>>,
}

impl MemoryWorkQueue {
    pub fn new() -> MemoryWorkQueue {
        MemoryWorkQueue::default()
    }

    /// Take the oldest new order of the given kind (and KS type, if given),
    /// marking it assigned. Each order is handed out at most once.
    pub fn claim(&self, kind: WorkOrderKind, ks_type: Option<&str>) -> Option<WorkOrder> {
        let mut state = self.state.lock().unwrap();
        let order = state.orders.values_mut().find(|o| {
            o.status == WorkOrderStatus::New
                && o.kind() == kind
                && ks_type.map(|k| k == o.ks_type()).unwrap_or(true)
        })?;
        order.status = WorkOrderStatus::Assigned;
        trace!("Assigned work order {} ({})", order.id, order.ks_type());
        Some(order.clone())
    }

    /// Give an assigned order back so that another worker can claim it.
    pub fn release(&self, id: u64) -> Result<(), StrategyError> {
        let mut state = self.state.lock().unwrap();
        let order = state
            .orders
            .get_mut(&id)
            .ok_or(StrategyError::UnknownWorkOrder { id })?;
        transition(order, WorkOrderStatus::Assigned, WorkOrderStatus::New)
    }

    /// Mark an assigned order as executed, storing its solution (if it made
    /// one).
    pub fn complete(&self, id: u64, solution: Option<Solution>) -> Result<(), StrategyError> {
        let mut state = self.state.lock().unwrap();
        if solution.is_some() && state.solutions.contains_key(&id) {
            return Err(StrategyError::DuplicateSolution { id });
        }
        let order = state
            .orders
            .get_mut(&id)
            .ok_or(StrategyError::UnknownWorkOrder { id })?;
        transition(order, WorkOrderStatus::Assigned, WorkOrderStatus::Executed)?;
        if let Some(solution) = solution {
            state.solutions.insert(id, solution);
        }
        Ok(())
    }

    /// Every order, by id.
    pub fn orders(&self) -> Vec<WorkOrder> {
        self.state.lock().unwrap().orders.values().cloned().collect()
    }

    pub fn count(&self, status: WorkOrderStatus) -> usize {
        self.state
            .lock()
            .unwrap()
            .orders
            .values()
            .filter(|o| o.status == status)
            .count()
    }
}

fn transition(
    order: &mut WorkOrder,
    from: WorkOrderStatus,
    to: WorkOrderStatus,
) -> Result<(), StrategyError> {
    if order.status != from {
        return Err(StrategyError::BadTransition {
            id: order.id,
            status: order.status,
            wanted: to,
        });
    }
    order.status = to;
    Ok(())
}

impl WorkQueue for MemoryWorkQueue {
    fn add(&self, order: WorkOrder) -> Result<(), StrategyError> {
        let mut state = self.state.lock().unwrap();
        if state.orders.contains_key(&order.id) {
            return Err(StrategyError::DuplicateWorkOrder { id: order.id });
        }
        if order.status != WorkOrderStatus::New {
            return Err(StrategyError::BadTransition {
                id: order.id,
                status: order.status,
                wanted: WorkOrderStatus::New,
            });
        }
        state.orders.insert(order.id, order);
        Ok(())
    }

    fn status(&self, id: u64) -> Option<WorkOrderStatus> {
        self.state.lock().unwrap().orders.get(&id).map(|o| o.status)
    }

    fn solution(&self, id: u64) -> Option<Solution> {
        self.state.lock().unwrap().solutions.get(&id).cloned()
    }
}
