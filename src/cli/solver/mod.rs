// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Serve a solver on a socket.

#[cfg(test)]
mod tests;

use std::path::PathBuf;

use clap::Parser;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::common::{InfoPrinter, ARG_FILE_HELP};
use crate::{
    solver_control::{
        SolverAddress, SolverProcessControl, DEFAULT_SOLVER_SOCKET, SOLVER_SOCKET_ENV,
    },
    DistcalError,
};

const DEFAULT_NUM_CONNECTIONS: usize = 1;

lazy_static::lazy_static! {
    static ref SOCKET_HELP: String =
        format!("The socket to listen on, e.g. 127.0.0.1:31337 or unix:/tmp/solver.sock. If not given, {SOLVER_SOCKET_ENV} is used, else {DEFAULT_SOLVER_SOCKET}");

    static ref NUM_CONNECTIONS_HELP: String =
        format!("Serve this many connections, one after the other, before exiting. Default: {DEFAULT_NUM_CONNECTIONS}");
}

#[derive(Parser, Debug, Clone, Default, Serialize, Deserialize)]
pub(super) struct SolverArgs {
    #[clap(name = "ARGUMENTS_FILE", help = ARG_FILE_HELP.as_str(), parse(from_os_str))]
    pub(super) args_file: Option<PathBuf>,

    #[clap(short, long, help = SOCKET_HELP.as_str(), help_heading = "SOCKET")]
    pub(super) socket: Option<String>,

    #[clap(short, long, help = NUM_CONNECTIONS_HELP.as_str(), help_heading = "SOCKET")]
    pub(super) num_connections: Option<usize>,

    /// Keep accepting connections until killed. Overrides --num-connections.
    #[clap(long, help_heading = "SOCKET")]
    #[serde(default)]
    pub(super) forever: bool,
}

/// The checked form of [`SolverArgs`].
#[derive(Debug, PartialEq)]
pub(super) struct SolverParams {
    pub(super) address: SolverAddress,

    /// `None` serves forever.
    pub(super) num_connections: Option<usize>,
}

impl SolverArgs {
    /// Prefer CLI arguments over those in the argument file.
    pub(super) fn merge(self) -> Result<SolverArgs, DistcalError> {
        debug!("Merging command-line arguments with the argument file");

        let cli_args = self;

        if let Some(arg_file) = cli_args.args_file {
            let SolverArgs {
                args_file: _,
                socket,
                num_connections,
                forever,
            } = unpack_arg_file!(arg_file);

            Ok(SolverArgs {
                args_file: None,
                socket: cli_args.socket.or(socket),
                num_connections: cli_args.num_connections.or(num_connections),
                forever: cli_args.forever || forever,
            })
        } else {
            Ok(cli_args)
        }
    }

    pub(super) fn parse(self) -> Result<SolverParams, DistcalError> {
        let SolverArgs {
            args_file: _,
            socket,
            num_connections,
            forever,
        } = self;

        let address = SolverAddress::resolve(socket.as_deref())?;
        let num_connections = if forever {
            None
        } else {
            match num_connections.unwrap_or(DEFAULT_NUM_CONNECTIONS) {
                0 => {
                    return Err(DistcalError::Solver(
                        "The number of connections to serve must be at least 1".to_string(),
                    ))
                }
                n => Some(n),
            }
        };

        let mut printer = InfoPrinter::new("Solver".into());
        printer.push_line(format!("Socket: {address}").into());
        printer.push_line(
            match num_connections {
                Some(n) => format!("Serving {n} connection(s)"),
                None => "Serving until killed".to_string(),
            }
            .into(),
        );
        printer.display();

        Ok(SolverParams {
            address,
            num_connections,
        })
    }

    pub(super) fn run(self, dry_run: bool) -> Result<(), DistcalError> {
        let params = self.parse()?;
        if dry_run {
            info!("Dry run -- exiting now.");
            return Ok(());
        }
        params.run()?;
        Ok(())
    }
}

impl SolverParams {
    /// Serve peers one after the other. Returns the number of messages
    /// handled.
    pub(super) fn run(&self) -> Result<usize, DistcalError> {
        let mut control = SolverProcessControl::new();
        control.define(Some(&self.address.to_string()))?;
        let bound = control.listen()?;
        info!("Solver listening on {bound}");

        let mut num_served = 0;
        let mut num_messages = 0;
        while self.num_connections.map(|n| num_served < n).unwrap_or(true) {
            control.init()?;
            num_messages += control.serve()?;
            num_served += 1;
            debug!("Served {num_served} connection(s), {num_messages} messages");
        }
        info!(
            "Solver handled {num_messages} messages from {num_served} connection(s); {} domains still active",
            control.solver().num_active()
        );
        Ok(num_messages)
    }
}
