// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Distributed solve-domain calibration engine for radio-interferometric data.

Kernel processes ("prediffers") build partial normal equations for solve cells
of a frequency-time grid, and solver processes merge them and iterate a
Levenberg-Marquardt fit until every cell reaches a terminal ready code.
 */

pub mod cli;
pub mod coeff_index;
pub mod connection;
pub mod equations;
pub mod grid;
pub mod kernel;
pub mod messages;
pub mod parms;
pub mod session;
pub mod solver;
pub mod solver_control;
pub mod strategy;

use crossbeam_utils::atomic::AtomicCell;

/// Should progress bars be drawn? Set by the CLI; off by default so that
/// library users and tests don't draw anything.
pub static PROGRESS_BARS: AtomicCell<bool> = AtomicCell::new(false);

// Re-exports.
pub use cli::{Distcal, DistcalError};
pub use coeff_index::{CoeffIndex, CoeffIndexError, CoeffInterval, CoeffMapping};
pub use connection::{BlobStream, ChannelConnection, Connection, ConnectionError};
pub use equations::{CellEquation, NormalEquations};
pub use grid::{Axis, Grid, Location};
pub use kernel::{EquationBuilder, LocalSolveController, SolveReport, SyntheticPrediffer};
pub use messages::{Message, MessageKind};
pub use parms::{ParmGroup, ParmManager};
pub use session::{CalSession, SessionState, WorkerType};
pub use solver::{ReadyCode, Solver};
pub use solver_control::{GlobalSolveController, SolverProcessControl};
pub use strategy::{StrategyController, WorkOrder, WorkQueue};
