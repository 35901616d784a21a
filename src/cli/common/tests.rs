// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Tests against command-line interfaces that aren't big enough to go in their
//! own modules.

use std::str::FromStr;

use super::*;

#[test]
fn test_solver_options_defaults() {
    let options = SolverOptionsArgs::default().parse().unwrap();
    assert_eq!(options, SolverOptions::default());
}

#[test]
fn test_solver_options_merge_prefers_cli() {
    let cli = SolverOptionsArgs {
        epsilon: Some(1e-4),
        ..Default::default()
    };
    let file = SolverOptionsArgs {
        epsilon: Some(1e-2),
        max_solver_iterations: Some(7),
        balanced_equations: true,
        ..Default::default()
    };
    let options = cli.merge(file).parse().unwrap();
    assert_eq!(options.epsilon_value, 1e-4);
    assert_eq!(options.max_iter, 7);
    assert!(options.balanced_eq);
    assert_eq!(options.lm_factor, SolverOptions::default().lm_factor);
}

#[test]
fn test_bad_solver_options() {
    let result = SolverOptionsArgs {
        epsilon: Some(-1.0),
        ..Default::default()
    }
    .parse();
    assert!(matches!(result, Err(SolverOptionsArgsError::Epsilon(_))));

    let result = SolverOptionsArgs {
        max_solver_iterations: Some(0),
        ..Default::default()
    }
    .parse();
    assert!(matches!(result, Err(SolverOptionsArgsError::NoIterations)));

    let result = SolverOptionsArgs {
        lm_factor: Some(0.0),
        ..Default::default()
    }
    .parse();
    assert!(matches!(result, Err(SolverOptionsArgsError::LmFactor(_))));

    let result = SolverOptionsArgs {
        col_factor: Some(f64::NAN),
        ..Default::default()
    }
    .parse();
    assert!(matches!(result, Err(SolverOptionsArgsError::ColFactor(_))));
}

#[test]
fn test_arg_file_types() {
    assert!(matches!(
        ArgFileTypes::from_str("toml"),
        Ok(ArgFileTypes::Toml)
    ));
    assert!(ArgFileTypes::from_str("yaml").is_err());
    assert_eq!(ARG_FILE_TYPES_COMMA_SEPARATED.as_str(), "toml, json");
}
