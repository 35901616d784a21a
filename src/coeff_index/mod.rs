// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Mapping of named parameters to contiguous intervals of a flat coefficient
//! vector.
//!
//! A kernel builds a [`CoeffIndex`] from the parameters it can solve for. The
//! solver folds every kernel's index into a global one with
//! [`CoeffIndex::merge`]; the returned [`CoeffMapping`] lets a kernel translate
//! between its local coefficient layout and the global one.
//!
//! Indices are append-only. Once a name has been given an interval, that
//! interval never moves, so merging the same kernel index twice (e.g. a
//! retried message) is harmless.

mod error;
#[cfg(test)]
mod tests;

pub use error::CoeffIndexError;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A `[start, start + length)` interval of a coefficient vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoeffInterval {
    pub start: usize,
    pub length: usize,
}

impl CoeffInterval {
    pub fn end(&self) -> usize {
        self.start + self.length
    }

    pub fn range(&self) -> std::ops::Range<usize> {
        self.start..self.end()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawCoeffIndex")]
pub struct CoeffIndex {
    intervals: IndexMap<String, CoeffInterval>,

    /// The total number of coefficients, i.e. the sum of all interval lengths.
    len: usize,
}

/// A [`CoeffIndex`] as it arrives from a peer, before it has been checked.
#[derive(Deserialize)]
struct RawCoeffIndex {
    intervals: IndexMap<String, CoeffInterval>,
    len: usize,
}

impl TryFrom<RawCoeffIndex> for CoeffIndex {
    type Error = CoeffIndexError;

    /// Intervals must follow each other without gaps, starting at 0, and
    /// their lengths must add up to `len`.
    fn try_from(raw: RawCoeffIndex) -> Result<Self, Self::Error> {
        let mut offset = 0;
        for (name, interval) in &raw.intervals {
            if interval.length == 0 {
                return Err(CoeffIndexError::ZeroLength { name: name.clone() });
            }
            if interval.start != offset {
                return Err(CoeffIndexError::NotContiguous {
                    name: name.clone(),
                    start: interval.start,
                    expected: offset,
                });
            }
            offset += interval.length;
        }
        if offset != raw.len {
            return Err(CoeffIndexError::BadLength {
                len: raw.len,
                sum: offset,
            });
        }
        Ok(CoeffIndex {
            intervals: raw.intervals,
            len: raw.len,
        })
    }
}

impl CoeffIndex {
    pub fn new() -> CoeffIndex {
        CoeffIndex::default()
    }

    /// Append an interval of `count` coefficients for `name`. If `name` is
    /// already present with the same length, nothing changes and the existing
    /// interval is returned.
    pub fn insert(&mut self, name: &str, count: usize) -> Result<CoeffInterval, CoeffIndexError> {
        if count == 0 {
            return Err(CoeffIndexError::ZeroLength {
                name: name.to_string(),
            });
        }

        if let Some(existing) = self.intervals.get(name) {
            if existing.length != count {
                return Err(CoeffIndexError::InconsistentIndex {
                    name: name.to_string(),
                    existing: existing.length,
                    new: count,
                });
            }
            return Ok(*existing);
        }

        let interval = CoeffInterval {
            start: self.len,
            length: count,
        };
        self.intervals.insert(name.to_string(), interval);
        self.len += count;
        Ok(interval)
    }

    /// Fold `other` into this index, in `other`'s insertion order. Names
    /// already present keep their offsets; new names are appended.
    ///
    /// On error, entries of `other` preceding the inconsistent one have already
    /// been appended. This is harmless, as indices are append-only.
    pub fn merge(&mut self, other: &CoeffIndex) -> Result<CoeffMapping, CoeffIndexError> {
        let mut starts = Vec::with_capacity(other.intervals.len());
        for (name, local) in &other.intervals {
            let global = self.insert(name, local.length)?;
            starts.push((*local, global.start));
        }
        Ok(CoeffMapping {
            intervals: starts,
            local_len: other.len,
        })
    }

    /// Build the mapping from `local` into this (global) index without
    /// modifying it. Every name in `local` must already be present.
    pub fn mapping_for(&self, local: &CoeffIndex) -> Result<CoeffMapping, CoeffIndexError> {
        let mut starts = Vec::with_capacity(local.intervals.len());
        for (name, local_interval) in &local.intervals {
            let global = self
                .find(name)
                .ok_or_else(|| CoeffIndexError::NotFound { name: name.clone() })?;
            if global.length != local_interval.length {
                return Err(CoeffIndexError::InconsistentIndex {
                    name: name.clone(),
                    existing: global.length,
                    new: local_interval.length,
                });
            }
            starts.push((*local_interval, global.start));
        }
        Ok(CoeffMapping {
            intervals: starts,
            local_len: local.len,
        })
    }

    pub fn find(&self, name: &str) -> Option<CoeffInterval> {
        self.intervals.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.intervals.contains_key(name)
    }

    /// The total number of coefficients.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// The number of named intervals.
    pub fn num_names(&self) -> usize {
        self.intervals.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, CoeffInterval)> {
        self.intervals.iter().map(|(n, i)| (n.as_str(), *i))
    }

    pub fn clear(&mut self) {
        self.intervals.clear();
        self.len = 0;
    }
}

/// Where each interval of a local [`CoeffIndex`] lives in a global one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoeffMapping {
    /// Pairs of (local interval, global start offset).
    intervals: Vec<(CoeffInterval, usize)>,

    /// The length of the local coefficient vector.
    local_len: usize,
}

impl CoeffMapping {
    pub fn local_len(&self) -> usize {
        self.local_len
    }

    /// The global offset of every local coefficient, in local order.
    pub fn offsets(&self) -> Vec<usize> {
        let mut out = vec![0; self.local_len];
        for (local, global_start) in &self.intervals {
            for (i, o) in out[local.range()].iter_mut().enumerate() {
                *o = global_start + i;
            }
        }
        out
    }

    /// Write the local vector `local` into the global vector `global`.
    /// Coefficients not owned by the local index are left untouched.
    pub fn scatter(&self, local: &[f64], global: &mut [f64]) -> Result<(), CoeffIndexError> {
        self.check_len(local.len())?;
        for (l, &g) in local.iter().zip(self.offsets().iter()) {
            let slot = global
                .get_mut(g)
                .ok_or(CoeffIndexError::OutOfRange { offset: g })?;
            *slot = *l;
        }
        Ok(())
    }

    /// Pick the coefficients owned by the local index out of `global`.
    pub fn gather(&self, global: &[f64]) -> Result<Vec<f64>, CoeffIndexError> {
        self.offsets()
            .into_iter()
            .map(|g| {
                global
                    .get(g)
                    .copied()
                    .ok_or(CoeffIndexError::OutOfRange { offset: g })
            })
            .collect()
    }

    fn check_len(&self, len: usize) -> Result<(), CoeffIndexError> {
        if len != self.local_len {
            return Err(CoeffIndexError::LengthMismatch {
                expected: self.local_len,
                got: len,
            });
        }
        Ok(())
    }
}
