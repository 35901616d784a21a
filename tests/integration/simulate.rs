// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use distcal::{CalSession, Location, ParmManager, SessionState};
use indoc::indoc;
use tempfile::TempDir;

use crate::{distcal, get_cmd_output};

#[test]
fn test_simulate() {
    let tmp_dir = TempDir::new().unwrap();
    let parms = tmp_dir.path().join("parms.json");
    let session = tmp_dir.path().join("session.json");

    let cmd = distcal()
        .args([
            "simulate",
            "--no-progress-bars",
            "--work-domain-size",
            "80",
            "-o",
            &format!("{}", parms.display()),
            "--session",
            &format!("{}", session.display()),
        ])
        .ok();
    assert!(cmd.is_ok(), "{:?}", get_cmd_output(cmd));
    let (stdout, _) = get_cmd_output(cmd);
    assert!(stdout.contains("16/16 cells converged"), "{stdout}");

    let solved = ParmManager::read(&parms).unwrap();
    let gain = solved.get_coeff("gain:y", Location::new(0, 0)).unwrap();
    assert!((gain[0] - 0.8).abs() < 1e-6, "{gain:?}");
    assert!((gain[1] + 0.4).abs() < 1e-6, "{gain:?}");

    let snapshot = CalSession::read_snapshot(&session).unwrap();
    assert_eq!(snapshot.state, SessionState::Done);
}

#[test]
fn test_simulate_dry_run() {
    let tmp_dir = TempDir::new().unwrap();
    let parms = tmp_dir.path().join("parms.json");
    let cmd = distcal()
        .args([
            "simulate",
            "--dry-run",
            "-o",
            &format!("{}", parms.display()),
        ])
        .ok();
    assert!(cmd.is_ok(), "{:?}", get_cmd_output(cmd));
    let (stdout, _) = get_cmd_output(cmd);
    assert!(stdout.contains("Dry run"), "{stdout}");
    assert!(!parms.exists());
}

#[test]
fn test_simulate_arg_file() {
    let tmp_dir = TempDir::new().unwrap();
    let args_file = tmp_dir.path().join("args.toml");
    std::fs::write(
        &args_file,
        indoc! {r#"
            [solver]
            max_solver_iterations = 50

            [simulate]
            num_timesteps = 4
            num_kernels = 1
            parms = ["phase=0.5,0.1"]
        "#},
    )
    .unwrap();
    let saved = tmp_dir.path().join("saved.toml");

    let cmd = distcal()
        .args([
            "simulate",
            &format!("{}", args_file.display()),
            "--save-toml",
            &format!("{}", saved.display()),
        ])
        .ok();
    assert!(cmd.is_ok(), "{:?}", get_cmd_output(cmd));
    let (stdout, _) = get_cmd_output(cmd);
    assert!(stdout.contains("4/4 cells converged"), "{stdout}");

    let saved = std::fs::read_to_string(saved).unwrap();
    assert!(saved.contains("num_kernels = 1"), "{saved}");
}

#[test]
fn test_simulate_bad_args() {
    let cmd = distcal().args(["simulate", "-k", "0"]).ok();
    assert!(cmd.is_err());
    let (stdout, stderr) = get_cmd_output(cmd);
    assert!(
        stdout.contains("At least one kernel") || stderr.contains("At least one kernel"),
        "{stdout}\n{stderr}"
    );

    let cmd = distcal()
        .args(["simulate", "--parms", "gain:x=oops"])
        .ok();
    assert!(cmd.is_err());
}
