// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Error type for all distcal-related errors. This should be the *only* error
//! enum that is publicly visible.

use thiserror::Error;

use super::{
    common::SolverOptionsArgsError,
    simulate::{SimulateArgsError, SimulateError},
};
use crate::{
    connection::ConnectionError, grid::GridError, kernel::KernelError, parms::ParmError,
    session::SessionError, solver_control::SolverControlError, strategy::StrategyError,
};

const URL: &str = "https://docs.rs/distcal/latest/distcal";

/// The *only* publicly visible error from distcal. Each error message should
/// include the URL, unless it's "generic".
#[derive(Error, Debug)]
pub enum DistcalError {
    /// An error related to simulate.
    #[error("{0}\n\nSee for more info: {URL}/cli/index.html")]
    Simulate(String),

    /// An error related to the solver process or the global solve loop.
    #[error("{0}\n\nSee for more info: {URL}/solver_control/index.html")]
    Solver(String),

    /// An error from the kernel side of a solve.
    #[error("{0}\n\nSee for more info: {URL}/kernel/index.html")]
    Kernel(String),

    /// An error related to work orders and the strategy controller.
    #[error("{0}\n\nSee for more info: {URL}/strategy/index.html")]
    Strategy(String),

    /// An error related to calibration sessions.
    #[error("{0}\n\nSee for more info: {URL}/session/index.html")]
    Session(String),

    /// An error related to parameters and parameter files.
    #[error("{0}\n\nSee for more info: {URL}/parms/index.html")]
    Parms(String),

    /// An error related to frequency-time grids.
    #[error("{0}\n\nSee for more info: {URL}/grid/index.html")]
    Grid(String),

    /// An error talking to another process.
    #[error("{0}\n\nSee for more info: {URL}/connection/index.html")]
    Connection(String),

    /// An error related to argument files.
    #[error("{0}\n\nSee for more info: {URL}/cli/index.html#argument-files")]
    ArgFile(String),

    /// A generic error that can't be clarified further with documentation, e.g.
    /// IO errors.
    #[error("{0}")]
    Generic(String),
}

// When changing the error propagation below, ensure `Self::from(e)` uses the
// correct `e`!

impl From<SimulateArgsError> for DistcalError {
    fn from(e: SimulateArgsError) -> Self {
        let s = e.to_string();
        match e {
            SimulateArgsError::SolverOptions(e) => Self::from(e),
            SimulateArgsError::Grid(e) => Self::from(e),
            SimulateArgsError::Parm(e) => Self::from(e),
            SimulateArgsError::Solver(e) => Self::from(e),
            SimulateArgsError::Strategy(e) => Self::from(e),
            _ => Self::Simulate(s),
        }
    }
}

impl From<SimulateError> for DistcalError {
    fn from(e: SimulateError) -> Self {
        let s = e.to_string();
        match e {
            SimulateError::Kernel(e) => Self::from(e),
            SimulateError::SolverControl(e) => Self::from(e),
            SimulateError::Strategy(e) => Self::from(e),
            SimulateError::Session(e) => Self::from(e),
            SimulateError::Parm(e) => Self::from(e),
            SimulateError::Connection(e) => Self::from(e),
            SimulateError::StrategyStalled { .. }
            | SimulateError::NoCommand { .. }
            | SimulateError::NoWorkOrder { .. }
            | SimulateError::EmptyWorkDomain { .. }
            | SimulateError::WorkerPanicked { .. } => Self::Simulate(s),
        }
    }
}

impl From<SolverOptionsArgsError> for DistcalError {
    fn from(e: SolverOptionsArgsError) -> Self {
        Self::Solver(e.to_string())
    }
}

// Library errors.

impl From<SolverControlError> for DistcalError {
    fn from(e: SolverControlError) -> Self {
        let s = e.to_string();
        match e {
            SolverControlError::Connection(e) => Self::from(e),
            SolverControlError::IO(e) => Self::from(e),
            SolverControlError::WrongState { .. }
            | SolverControlError::BadAddress { .. }
            | SolverControlError::Protocol { .. }
            | SolverControlError::KernelLost { .. }
            | SolverControlError::CoeffIndex(_)
            | SolverControlError::Equations(_) => Self::Solver(s),
        }
    }
}

impl From<KernelError> for DistcalError {
    fn from(e: KernelError) -> Self {
        let s = e.to_string();
        match e {
            KernelError::Parm(e) => Self::from(e),
            KernelError::Grid(e) => Self::from(e),
            KernelError::Connection(e) => Self::from(e),
            KernelError::NoSolutionGrid
            | KernelError::BuilderMismatch { .. }
            | KernelError::MissingSolutions { .. }
            | KernelError::NoTruth { .. }
            | KernelError::CoeffIndex(_)
            | KernelError::Equations(_) => Self::Kernel(s),
        }
    }
}

impl From<StrategyError> for DistcalError {
    fn from(e: StrategyError) -> Self {
        Self::Strategy(e.to_string())
    }
}

impl From<SessionError> for DistcalError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::IO(e) => Self::from(e),
            _ => Self::Session(e.to_string()),
        }
    }
}

impl From<ParmError> for DistcalError {
    fn from(e: ParmError) -> Self {
        let s = e.to_string();
        match e {
            ParmError::Grid(e) => Self::from(e),
            ParmError::IO(e) => Self::from(e),
            _ => Self::Parms(s),
        }
    }
}

impl From<GridError> for DistcalError {
    fn from(e: GridError) -> Self {
        Self::Grid(e.to_string())
    }
}

impl From<ConnectionError> for DistcalError {
    fn from(e: ConnectionError) -> Self {
        Self::Connection(e.to_string())
    }
}

impl From<std::io::Error> for DistcalError {
    fn from(e: std::io::Error) -> Self {
        Self::Generic(e.to_string())
    }
}

impl From<toml::ser::Error> for DistcalError {
    fn from(e: toml::ser::Error) -> Self {
        Self::ArgFile(e.to_string())
    }
}
