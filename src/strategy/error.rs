// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use thiserror::Error;

use super::WorkOrderStatus;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StrategyError {
    #[error("The strategy time range {start}..{end} is empty or not finite")]
    BadTimeRange { start: f64, end: f64 },

    #[error("The work domain size must be positive and finite; got {size}")]
    BadWorkDomainSize { size: f64 },

    #[error("The strategy needs at least one prediffer")]
    NoPrediffers,

    #[error("The maximum number of iterations per work domain must be at least 1")]
    NoIterations,

    #[error("Work order {id} is already in the queue")]
    DuplicateWorkOrder { id: u64 },

    #[error("Work order {id} doesn't exist")]
    UnknownWorkOrder { id: u64 },

    #[error("Work order {id} is {status}; it can't become {wanted}")]
    BadTransition {
        id: u64,
        status: WorkOrderStatus,
        wanted: WorkOrderStatus,
    },

    #[error("A solution for work order {id} was already written")]
    DuplicateSolution { id: u64 },
}
