// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Integration tests.
//!
//! Some help for laying out these tests was taken from:
//! https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html

mod session_show;
mod simulate;

use std::process::Output;
use std::str::from_utf8;

use assert_cmd::{output::OutputError, Command};

fn distcal() -> Command {
    Command::cargo_bin("distcal").unwrap()
}

fn get_cmd_output(result: Result<Output, OutputError>) -> (String, String) {
    let output = match result {
        Ok(o) => o,
        Err(o) => o.as_output().unwrap().clone(),
    };
    (
        from_utf8(&output.stdout).unwrap().to_string(),
        from_utf8(&output.stderr).unwrap().to_string(),
    )
}

#[test]
fn test_help() {
    let cmd = distcal().arg("--help").ok();
    assert!(cmd.is_ok());
    let (stdout, _) = get_cmd_output(cmd);
    for sub_command in ["solver", "simulate", "session-show"] {
        assert!(stdout.contains(sub_command), "{stdout}");
    }

    let cmd = distcal().args(["simulate", "--help"]).ok();
    assert!(cmd.is_ok());
    let (stdout, _) = get_cmd_output(cmd);
    assert!(stdout.contains("--work-domain-size"), "{stdout}");
}

#[test]
fn test_no_subcommand_fails() {
    let cmd = distcal().ok();
    assert!(cmd.is_err());
}
