// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{thread, time::Duration};

use tempfile::tempdir;

use super::*;
use crate::{
    connection::{BlobStream, Connection},
    equations::NormalEquations,
    messages::{IterationRequest, IterationResult, Message},
};

#[test]
fn test_merge_prefers_cli() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("solver.toml");
    std::fs::write(&file, "socket = \"127.0.0.1:4000\"\nnum_connections = 3\n").unwrap();

    let args = SolverArgs {
        args_file: Some(file.clone()),
        socket: Some("127.0.0.1:5000".to_string()),
        ..Default::default()
    }
    .merge()
    .unwrap();
    assert_eq!(args.args_file, None);
    assert_eq!(args.socket.as_deref(), Some("127.0.0.1:5000"));
    assert_eq!(args.num_connections, Some(3));
    assert!(!args.forever);

    let params = args.parse().unwrap();
    assert_eq!(
        params.address,
        SolverAddress::parse("127.0.0.1:5000").unwrap()
    );
    assert_eq!(params.num_connections, Some(3));
}

#[test]
fn test_bad_arg_file() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("solver.yaml");
    std::fs::write(&file, "socket: 127.0.0.1:4000\n").unwrap();
    let result = SolverArgs {
        args_file: Some(file),
        ..Default::default()
    }
    .merge();
    assert!(matches!(result, Err(DistcalError::ArgFile(_))));

    let file = dir.path().join("solver.json");
    std::fs::write(&file, "{ \"socket\": 4000 }").unwrap();
    let result = SolverArgs {
        args_file: Some(file),
        ..Default::default()
    }
    .merge();
    assert!(matches!(result, Err(DistcalError::ArgFile(_))));
}

#[test]
fn test_parse() {
    let params = SolverArgs {
        socket: Some("127.0.0.1:0".to_string()),
        forever: true,
        num_connections: Some(2),
        ..Default::default()
    }
    .parse()
    .unwrap();
    assert_eq!(params.num_connections, None);

    let result = SolverArgs {
        socket: Some("127.0.0.1:0".to_string()),
        num_connections: Some(0),
        ..Default::default()
    }
    .parse();
    assert!(matches!(result, Err(DistcalError::Solver(_))));

    let result = SolverArgs {
        socket: Some("not a socket".to_string()),
        ..Default::default()
    }
    .parse();
    assert!(matches!(result, Err(DistcalError::Solver(_))));
}

#[cfg(unix)]
#[test]
fn test_serves_one_connection() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("solver.sock");
    let params = SolverParams {
        address: SolverAddress::Unix(path.clone()),
        num_connections: Some(1),
    };
    let server = thread::spawn(move || params.run().unwrap());

    // Wait for the socket to appear.
    let mut client = None;
    for _ in 0..500 {
        match BlobStream::connect_unix(&path) {
            Ok(c) => {
                client = Some(c);
                break;
            }
            Err(_) => thread::sleep(Duration::from_millis(10)),
        }
    }
    let mut client = client.unwrap();

    let mut normal_equations = NormalEquations::new(1);
    normal_equations.add_condition(&[1.0], 0.0, 1.0).unwrap();
    client
        .send(&Message::Iteration(IterationRequest {
            domain_index: 3,
            normal_equations,
        }))
        .unwrap();
    assert_eq!(
        client.recv().unwrap(),
        Message::IterationResult(IterationResult::not_tracked(3))
    );
    drop(client);

    assert_eq!(server.join().unwrap(), 1);
}
