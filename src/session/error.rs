// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::path::PathBuf;

use thiserror::Error;

use super::SessionState;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Cannot {operation} while the session is {state}")]
    WrongState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("The session cannot go from {from} to {to}")]
    BadTransition { from: SessionState, to: SessionState },

    #[error("Process '{process_id}' is already controlling this session")]
    ControlAlreadyRegistered { process_id: String },

    #[error("Process '{process_id}' is already registered with this session")]
    DuplicateProcess { process_id: String },

    #[error("Process '{process_id}' isn't registered with this session")]
    UnknownProcess { process_id: String },

    #[error("There is no command with id {id}")]
    UnknownCommand { id: u64 },

    #[error("Process '{process_id}' already posted a result for command {command_id}")]
    DuplicateResult { command_id: u64, process_id: String },

    #[error("Couldn't read the session file {file}: {err}")]
    BadSnapshot {
        file: PathBuf,
        err: serde_json::Error,
    },

    #[error(transparent)]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    IO(#[from] std::io::Error),
}
