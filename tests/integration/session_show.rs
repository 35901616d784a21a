// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use tempfile::TempDir;

use crate::{distcal, get_cmd_output};

#[test]
fn test_session_show() {
    let tmp_dir = TempDir::new().unwrap();
    let session = tmp_dir.path().join("session.json");
    let cmd = distcal()
        .args([
            "simulate",
            "-k",
            "1",
            "--session",
            &format!("{}", session.display()),
        ])
        .ok();
    assert!(cmd.is_ok(), "{:?}", get_cmd_output(cmd));

    let cmd = distcal()
        .args(["session-show", &format!("{}", session.display())])
        .ok();
    assert!(cmd.is_ok(), "{:?}", get_cmd_output(cmd));
    let (stdout, _) = get_cmd_output(cmd);
    assert!(stdout.contains("State: done"), "{stdout}");
    assert!(stdout.contains("kernel 0: 'kernel-0'"), "{stdout}");

    let cmd = distcal()
        .args(["session-show", "--json", &format!("{}", session.display())])
        .ok();
    assert!(cmd.is_ok(), "{:?}", get_cmd_output(cmd));
    let (stdout, _) = get_cmd_output(cmd);
    assert!(stdout.contains("\"state\": \"Done\""), "{stdout}");
}

#[test]
fn test_session_show_missing_file() {
    let cmd = distcal()
        .args(["session-show", "/this/session/does/not/exist.json"])
        .ok();
    assert!(cmd.is_err());
}
