// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Print what a calibration session file says.

use std::{borrow::Cow, path::PathBuf};

use clap::Parser;
use log::debug;

use super::common::InfoPrinter;
use crate::{
    session::{CalSession, SessionSnapshot, WorkerType},
    DistcalError,
};

#[derive(Parser, Debug)]
pub(super) struct SessionShowArgs {
    /// The session file, as written by `distcal simulate --session`.
    #[clap(name = "SESSION_FILE", parse(from_os_str))]
    session: PathBuf,

    /// Print the whole session as JSON instead.
    #[clap(long)]
    json: bool,
}

impl SessionShowArgs {
    pub(super) fn run(self) -> Result<(), DistcalError> {
        debug!("Reading session file {}", self.session.display());
        let snapshot = CalSession::read_snapshot(&self.session)?;
        if self.json {
            let json = serde_json::to_string_pretty(&snapshot)
                .map_err(|e| DistcalError::Session(e.to_string()))?;
            println!("{json}");
        } else {
            describe(&snapshot, &self.session.display().to_string()).display();
        }
        Ok(())
    }
}

fn describe(snapshot: &SessionSnapshot, name: &str) -> InfoPrinter {
    let mut printer = InfoPrinter::new(format!("Session {name}").into());
    printer.push_line(format!("State: {}", snapshot.state).into());
    if let Some(failure) = &snapshot.failure {
        printer.push_line(format!("Failure: {failure}").into());
    }
    printer.push_line(
        match &snapshot.control {
            Some(c) => format!("Controlled by '{c}'"),
            None => "No controller".to_string(),
        }
        .into(),
    );
    if let Some(axis) = &snapshot.time_axis {
        printer.push_line(
            format!(
                "Time axis: {} cells from {} s to {} s",
                axis.size(),
                axis.start(),
                axis.end()
            )
            .into(),
        );
    }

    for worker_type in [WorkerType::Kernel, WorkerType::Solver] {
        let mut block: Vec<Cow<'static, str>> = vec![];
        for w in snapshot
            .workers
            .iter()
            .filter(|w| w.worker_type == worker_type)
        {
            let mut line = format!("{} {}: '{}'", worker_type, w.index, w.process_id);
            if let Some(port) = w.info.port {
                line.push_str(&format!(", port {port}"));
            }
            if let Some((start, end)) = w.info.freq_range {
                line.push_str(&format!(", {start:e} Hz to {end:e} Hz"));
            }
            if let Some((start, end)) = w.info.time_range {
                line.push_str(&format!(", {start} s to {end} s"));
            }
            block.push(line.into());
        }
        if !block.is_empty() {
            printer.push_block(block);
        }
    }

    printer.push_line(
        format!(
            "{} commands, {} results",
            snapshot.commands.len(),
            snapshot.results.len()
        )
        .into(),
    );
    printer
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SessionState, WorkerInfo};

    #[test]
    fn test_describe() {
        let session = CalSession::new();
        session.register_control("control").unwrap();
        session
            .register_kernel(
                "kernel-0",
                WorkerInfo {
                    time_range: Some((0.0, 20.0)),
                    ..Default::default()
                },
            )
            .unwrap();
        session
            .register_solver(
                "solver-0",
                WorkerInfo {
                    port: Some(4000),
                    ..Default::default()
                },
            )
            .unwrap();
        session.fail("out of coffee").unwrap();
        assert_eq!(session.state(), SessionState::Failed);

        let lines = describe(&session.snapshot(), "test").lines();
        assert_eq!(
            lines,
            vec![
                "├ State: failed",
                "├ Failure: out of coffee",
                "├ Controlled by 'control'",
                "├ kernel 0: 'kernel-0', 0 s to 20 s",
                "├ solver 0: 'solver-0', port 4000",
                "└ 0 commands, 0 results",
            ]
        );
    }

    #[test]
    fn test_missing_file() {
        let args = SessionShowArgs {
            session: PathBuf::from("/does/not/exist.json"),
            json: false,
        };
        assert!(args.run().is_err());
    }
}
