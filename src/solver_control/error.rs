// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use thiserror::Error;

use super::ControlState;
use crate::{
    coeff_index::CoeffIndexError, connection::ConnectionError, equations::EquationsError,
    messages::MessageKind,
};

#[derive(Error, Debug)]
pub enum SolverControlError {
    #[error("Cannot {operation} while the solver control is {state}")]
    WrongState {
        operation: &'static str,
        state: ControlState,
    },

    #[error("Couldn't interpret '{address}' as a solver socket address (expected e.g. '127.0.0.1:31337' or 'unix:/tmp/solver.sock')")]
    BadAddress { address: String },

    #[error("Kernel {kernel} sent {got} when {expected} was expected")]
    Protocol {
        kernel: usize,
        expected: &'static str,
        got: MessageKind,
    },

    #[error("Kernel {kernel} closed its connection in the middle of a solve")]
    KernelLost { kernel: usize },

    #[error(transparent)]
    CoeffIndex(#[from] CoeffIndexError),

    #[error(transparent)]
    Equations(#[from] EquationsError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    IO(#[from] std::io::Error),
}
