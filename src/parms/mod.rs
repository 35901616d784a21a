// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Solvable parameters and their per-cell coefficients.
//!
//! Each parameter has a fixed number of coefficients and default values.
//! Coefficients can be set for any cell of the manager's grid; cells without
//! a value use the defaults. The whole manager can be written to and read from
//! a JSON file.

mod error;
#[cfg(test)]
mod tests;

pub use error::ParmError;

use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
};

use glob::Pattern;
use indexmap::IndexMap;
use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::{
    coeff_index::CoeffIndex,
    grid::{Grid, GridError, Location},
};

#[derive(Debug, Clone, PartialEq)]
struct Parm {
    default: Vec<f64>,
    values: BTreeMap<Location, Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParmManager {
    grid: Grid,
    parms: IndexMap<String, Parm>,
}

/// An ordered set of parameter names, e.g. the solvables of a kernel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParmGroup {
    names: Vec<String>,
}

impl ParmGroup {
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(|s| s.as_str())
    }
}

impl ParmManager {
    pub fn new(grid: Grid) -> ParmManager {
        ParmManager {
            grid,
            parms: IndexMap::new(),
        }
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// Change the grid. Stored coefficients of cells outside the new grid are
    /// discarded.
    pub fn set_grid(&mut self, grid: Grid) {
        for parm in self.parms.values_mut() {
            parm.values.retain(|loc, _| grid.contains(*loc));
        }
        self.grid = grid;
    }

    /// Define a parameter with its default coefficients. Redefining a
    /// parameter with the same number of coefficients replaces its defaults.
    pub fn define(&mut self, name: &str, default: Vec<f64>) -> Result<(), ParmError> {
        if default.is_empty() {
            return Err(ParmError::ZeroLength {
                name: name.to_string(),
            });
        }
        check_finite(name, &default)?;
        match self.parms.get_mut(name) {
            Some(parm) => {
                if parm.default.len() != default.len() {
                    return Err(ParmError::CountMismatch {
                        name: name.to_string(),
                        expected: parm.default.len(),
                        got: default.len(),
                    });
                }
                parm.default = default;
            }
            None => {
                trace!("Defining parameter '{name}' with {} coefficients", default.len());
                self.parms.insert(
                    name.to_string(),
                    Parm {
                        default,
                        values: BTreeMap::new(),
                    },
                );
            }
        }
        Ok(())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.parms.keys().map(|s| s.as_str())
    }

    pub fn num_coeff(&self, name: &str) -> Result<usize, ParmError> {
        Ok(self.parm(name)?.default.len())
    }

    pub fn get_coeff(&self, name: &str, location: Location) -> Result<Vec<f64>, ParmError> {
        self.check_location(location)?;
        let parm = self.parm(name)?;
        Ok(parm
            .values
            .get(&location)
            .unwrap_or(&parm.default)
            .clone())
    }

    pub fn set_coeff(
        &mut self,
        name: &str,
        location: Location,
        values: &[f64],
    ) -> Result<(), ParmError> {
        self.check_location(location)?;
        let parm = self
            .parms
            .get_mut(name)
            .ok_or_else(|| ParmError::UnknownParm {
                name: name.to_string(),
            })?;
        if values.len() != parm.default.len() {
            return Err(ParmError::CountMismatch {
                name: name.to_string(),
                expected: parm.default.len(),
                got: values.len(),
            });
        }
        check_finite(name, values)?;
        parm.values.insert(location, values.to_vec());
        Ok(())
    }

    /// The coefficients of every parameter in `group` for one cell,
    /// concatenated in the group's order.
    pub fn get_coeffs(&self, group: &ParmGroup, location: Location) -> Result<Vec<f64>, ParmError> {
        let mut out = vec![];
        for name in group.iter() {
            out.extend(self.get_coeff(name, location)?);
        }
        Ok(out)
    }

    /// The inverse of [`ParmManager::get_coeffs`].
    pub fn set_coeffs(
        &mut self,
        group: &ParmGroup,
        location: Location,
        values: &[f64],
    ) -> Result<(), ParmError> {
        let expected = group
            .iter()
            .map(|name| self.num_coeff(name))
            .sum::<Result<usize, _>>()?;
        if values.len() != expected {
            return Err(ParmError::CountMismatch {
                name: group.names.join(","),
                expected,
                got: values.len(),
            });
        }
        let mut offset = 0;
        for name in group.iter() {
            let n = self.num_coeff(name)?;
            self.set_coeff(name, location, &values[offset..offset + n])?;
            offset += n;
        }
        Ok(())
    }

    /// The parameters matching any `include` pattern and no `exclude`
    /// pattern, in definition order. Patterns use glob syntax, e.g. "gain:*".
    pub fn select(&self, include: &[String], exclude: &[String]) -> Result<ParmGroup, ParmError> {
        let include = include
            .iter()
            .map(|p| Pattern::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        let exclude = exclude
            .iter()
            .map(|p| Pattern::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        let names = self
            .parms
            .keys()
            .filter(|name| include.iter().any(|p| p.matches(name)))
            .filter(|name| !exclude.iter().any(|p| p.matches(name)))
            .cloned()
            .collect();
        Ok(ParmGroup { names })
    }

    /// A coefficient index of the parameters in `group`, in the group's
    /// order.
    pub fn coeff_index(&self, group: &ParmGroup) -> Result<CoeffIndex, ParmError> {
        let mut index = CoeffIndex::new();
        for name in group.iter() {
            let n = self.num_coeff(name)?;
            index.insert(name, n)?;
        }
        Ok(index)
    }

    pub fn read<P: AsRef<Path>>(path: P) -> Result<ParmManager, ParmError> {
        let path = path.as_ref();
        let file: ParmFile = serde_json::from_reader(BufReader::new(File::open(path)?))
            .map_err(|err| ParmError::BadFile {
                file: path.to_path_buf(),
                err,
            })?;

        let mut manager = ParmManager::new(file.grid);
        for record in file.parms {
            manager.define(&record.name, record.default)?;
            for cell in record.values {
                manager.set_coeff(&record.name, cell.location, &cell.coeff)?;
            }
        }
        debug!(
            "Read {} parameters from {}",
            manager.parms.len(),
            path.display()
        );
        Ok(manager)
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<(), ParmError> {
        let path = path.as_ref();
        let file = ParmFile {
            grid: self.grid.clone(),
            parms: self
                .parms
                .iter()
                .map(|(name, parm)| ParmRecord {
                    name: name.clone(),
                    default: parm.default.clone(),
                    values: parm
                        .values
                        .iter()
                        .map(|(location, coeff)| CellValue {
                            location: *location,
                            coeff: coeff.clone(),
                        })
                        .collect(),
                })
                .collect(),
        };
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, &file).map_err(|err| ParmError::BadFile {
            file: path.to_path_buf(),
            err,
        })?;
        debug!("Wrote {} parameters to {}", self.parms.len(), path.display());
        Ok(())
    }

    fn parm(&self, name: &str) -> Result<&Parm, ParmError> {
        self.parms.get(name).ok_or_else(|| ParmError::UnknownParm {
            name: name.to_string(),
        })
    }

    fn check_location(&self, location: Location) -> Result<(), ParmError> {
        if self.grid.contains(location) {
            Ok(())
        } else {
            Err(GridError::LocationOutOfBounds {
                location,
                num_freq: self.grid.num_freq(),
                num_time: self.grid.num_time(),
            }
            .into())
        }
    }
}

fn check_finite(name: &str, values: &[f64]) -> Result<(), ParmError> {
    if values.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(ParmError::NonFinite {
            name: name.to_string(),
        })
    }
}

#[derive(Serialize, Deserialize)]
struct ParmFile {
    grid: Grid,
    parms: Vec<ParmRecord>,
}

#[derive(Serialize, Deserialize)]
struct ParmRecord {
    name: String,
    default: Vec<f64>,
    #[serde(default)]
    values: Vec<CellValue>,
}

#[derive(Serialize, Deserialize)]
struct CellValue {
    location: Location,
    coeff: Vec<f64>,
}
