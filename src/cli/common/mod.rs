// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Common arguments for command-line interfaces, e.g. the `solver` and
//! `simulate` subcommands both need solver settings, so the same arguments
//! are shared between them.

mod printers;
#[cfg(test)]
mod tests;

pub(super) use printers::InfoPrinter;
pub(crate) use printers::{display_warnings, Warn};

use clap::Parser;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};
use thiserror::Error;

use crate::solver::SolverOptions;

lazy_static::lazy_static! {
    pub(super) static ref ARG_FILE_TYPES_COMMA_SEPARATED: String = ArgFileTypes::iter().join(", ");

    pub(super) static ref ARG_FILE_HELP: String =
        format!("All arguments may be specified in a file. Any CLI arguments override arguments set in the file. Supported formats: {}", *ARG_FILE_TYPES_COMMA_SEPARATED);

    static ref EPSILON_HELP: String =
        format!("Stop iterating a cell when the largest relative change of its unknowns is at or below this. Default: {:e}", SolverOptions::default().epsilon_value);

    static ref EPSILON_DERIVATIVE_HELP: String =
        format!("Stop iterating a cell when the largest element of its right-hand side is at or below this. Default: {:e}", SolverOptions::default().epsilon_derivative);

    static ref MAX_SOLVER_ITERATIONS_HELP: String =
        format!("The maximum number of solver iterations per cell. Default: {}", SolverOptions::default().max_iter);

    static ref COL_FACTOR_HELP: String =
        format!("The collinearity factor used to detect rank deficiency. Default: {:e}", SolverOptions::default().col_factor);

    static ref LM_FACTOR_HELP: String =
        format!("The initial Levenberg-Marquardt damping factor. Default: {:e}", SolverOptions::default().lm_factor);
}

#[derive(Debug, Display, EnumIter, EnumString)]
pub(super) enum ArgFileTypes {
    #[strum(serialize = "toml")]
    Toml,
    #[strum(serialize = "json")]
    Json,
}

macro_rules! unpack_arg_file {
    ($arg_file:expr) => ({
        use std::{fs::File, io::Read, str::FromStr};

        use crate::cli::common::{ArgFileTypes, ARG_FILE_TYPES_COMMA_SEPARATED};

        debug!("Attempting to parse argument file {}", $arg_file.display());

        let mut contents = String::new();
        let arg_file_type = $arg_file
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .and_then(|e| ArgFileTypes::from_str(&e).ok());

        match arg_file_type {
            Some(ArgFileTypes::Toml) => {
                debug!("Parsing toml file...");
                let mut fh = File::open(&$arg_file)?;
                fh.read_to_string(&mut contents)?;
                match toml::from_str(&contents) {
                    Ok(p) => p,
                    Err(err) => {
                        return Err(DistcalError::ArgFile(format!(
                            "Couldn't decode toml structure from {:?}:\n{err}",
                            $arg_file
                        )))
                    }
                }
            }
            Some(ArgFileTypes::Json) => {
                debug!("Parsing json file...");
                let mut fh = File::open(&$arg_file)?;
                fh.read_to_string(&mut contents)?;
                match serde_json::from_str(&contents) {
                    Ok(p) => p,
                    Err(err) => {
                        return Err(DistcalError::ArgFile(format!(
                            "Couldn't decode json structure from {:?}:\n{err}",
                            $arg_file
                        )))
                    }
                }
            }

            _ => {
                return Err(DistcalError::ArgFile(format!(
                    "Argument file '{:?}' doesn't have a recognised file extension! Valid extensions are: {}", $arg_file, *ARG_FILE_TYPES_COMMA_SEPARATED)
                ))
            }
        }
    });
}

#[derive(Error, Debug)]
pub(crate) enum SolverOptionsArgsError {
    #[error("The solver epsilon must be a non-negative number; got {0}")]
    Epsilon(f64),

    #[error("The solver derivative epsilon must be a non-negative number; got {0}")]
    EpsilonDerivative(f64),

    #[error("The maximum number of solver iterations must be at least 1")]
    NoIterations,

    #[error("The collinearity factor must be a non-negative number; got {0}")]
    ColFactor(f64),

    #[error("The Levenberg-Marquardt factor must be a positive number; got {0}")]
    LmFactor(f64),
}

/// Settings handed to the solver for every cell.
#[derive(Parser, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(super) struct SolverOptionsArgs {
    #[clap(long, help = EPSILON_HELP.as_str(), help_heading = "SOLVER")]
    pub(super) epsilon: Option<f64>,

    #[clap(long, help = EPSILON_DERIVATIVE_HELP.as_str(), help_heading = "SOLVER")]
    pub(super) epsilon_derivative: Option<f64>,

    #[clap(long, help = MAX_SOLVER_ITERATIONS_HELP.as_str(), help_heading = "SOLVER")]
    pub(super) max_solver_iterations: Option<u32>,

    #[clap(long, help = COL_FACTOR_HELP.as_str(), help_heading = "SOLVER")]
    pub(super) col_factor: Option<f64>,

    #[clap(long, help = LM_FACTOR_HELP.as_str(), help_heading = "SOLVER")]
    pub(super) lm_factor: Option<f64>,

    /// Equilibrate the normal equations before solving them.
    #[clap(long, help_heading = "SOLVER")]
    #[serde(default)]
    pub(super) balanced_equations: bool,
}

impl SolverOptionsArgs {
    /// Prefer the values in `self` (the command line) over those in `other`
    /// (an argument file).
    pub(super) fn merge(self, other: Self) -> Self {
        Self {
            epsilon: self.epsilon.or(other.epsilon),
            epsilon_derivative: self.epsilon_derivative.or(other.epsilon_derivative),
            max_solver_iterations: self.max_solver_iterations.or(other.max_solver_iterations),
            col_factor: self.col_factor.or(other.col_factor),
            lm_factor: self.lm_factor.or(other.lm_factor),
            balanced_equations: self.balanced_equations || other.balanced_equations,
        }
    }

    pub(super) fn parse(self) -> Result<SolverOptions, SolverOptionsArgsError> {
        let defaults = SolverOptions::default();
        let non_negative = |x: f64| x.is_finite() && x >= 0.0;

        let epsilon_value = self.epsilon.unwrap_or(defaults.epsilon_value);
        if !non_negative(epsilon_value) {
            return Err(SolverOptionsArgsError::Epsilon(epsilon_value));
        }
        let epsilon_derivative = self
            .epsilon_derivative
            .unwrap_or(defaults.epsilon_derivative);
        if !non_negative(epsilon_derivative) {
            return Err(SolverOptionsArgsError::EpsilonDerivative(
                epsilon_derivative,
            ));
        }
        let max_iter = self.max_solver_iterations.unwrap_or(defaults.max_iter);
        if max_iter == 0 {
            return Err(SolverOptionsArgsError::NoIterations);
        }
        let col_factor = self.col_factor.unwrap_or(defaults.col_factor);
        if !non_negative(col_factor) {
            return Err(SolverOptionsArgsError::ColFactor(col_factor));
        }
        let lm_factor = self.lm_factor.unwrap_or(defaults.lm_factor);
        if !(lm_factor.is_finite() && lm_factor > 0.0) {
            return Err(SolverOptionsArgsError::LmFactor(lm_factor));
        }

        Ok(SolverOptions {
            epsilon_value,
            epsilon_derivative,
            max_iter,
            col_factor,
            lm_factor,
            balanced_eq: self.balanced_equations || defaults.balanced_eq,
        })
    }
}
