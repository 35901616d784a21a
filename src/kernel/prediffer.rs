// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! A prediffer that makes its own "observed" data.

use indexmap::IndexMap;
use log::trace;

use super::{EquationBuilder, KernelError};
use crate::{
    equations::NormalEquations,
    grid::{Grid, Location},
    parms::{ParmGroup, ParmManager},
};

/// Builds normal equations from data generated with known parameter values.
///
/// Every parameter has its own stream of samples at positions `x` in (-1, 1)
/// across each cell, modelled as
///
/// `y(x) = c[0] * exp(c[1] * x + c[2] * x^2 + ...)`
///
/// so a parameter with a single coefficient is a plain amplitude. When several
/// prediffers share the work, each takes an interleaved subset of the samples.
#[derive(Debug, Clone)]
pub struct SyntheticPrediffer {
    truth: IndexMap<String, Vec<f64>>,
    samples_per_cell: usize,
    subset_index: usize,
    num_subsets: usize,
    num_constructs: usize,
}

impl SyntheticPrediffer {
    pub fn new(truth: IndexMap<String, Vec<f64>>, samples_per_cell: usize) -> SyntheticPrediffer {
        SyntheticPrediffer {
            truth,
            samples_per_cell: samples_per_cell.max(1),
            subset_index: 0,
            num_subsets: 1,
            num_constructs: 0,
        }
    }

    /// Only use every `num_subsets`-th sample, starting from `subset_index`.
    pub fn with_subset(mut self, subset_index: usize, num_subsets: usize) -> SyntheticPrediffer {
        self.num_subsets = num_subsets.max(1);
        self.subset_index = subset_index % self.num_subsets;
        self
    }

    pub fn model(coeff: &[f64], x: f64) -> f64 {
        coeff[0] * exponent(coeff, x).exp()
    }

    /// How many times equations have been built.
    pub fn num_constructs(&self) -> usize {
        self.num_constructs
    }

    fn sample_positions(&self) -> impl Iterator<Item = f64> + '_ {
        let n = self.samples_per_cell * self.num_subsets;
        (self.subset_index..n)
            .step_by(self.num_subsets)
            .map(move |i| -1.0 + 2.0 * (i as f64 + 0.5) / n as f64)
    }
}

fn exponent(coeff: &[f64], x: f64) -> f64 {
    coeff
        .iter()
        .skip(1)
        .fold((0.0, 1.0), |(sum, power), c| {
            let power = power * x;
            (sum + c * power, power)
        })
        .0
}

impl EquationBuilder for SyntheticPrediffer {
    fn construct(
        &mut self,
        _grid: &Grid,
        parms: &ParmManager,
        solvables: &ParmGroup,
        cells: &[Location],
    ) -> Result<Vec<NormalEquations>, KernelError> {
        self.num_constructs += 1;
        let index = parms.coeff_index(solvables)?;
        let truths = solvables
            .iter()
            .map(|name| {
                self.truth
                    .get(name)
                    .ok_or_else(|| KernelError::NoTruth {
                        name: name.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut out = Vec::with_capacity(cells.len());
        let mut derivs = vec![0.0; index.len()];
        for &location in cells {
            let mut eq = NormalEquations::new(index.len());
            for ((name, interval), truth) in index.iter().zip(truths.iter()) {
                let coeff = parms.get_coeff(name, location)?;
                for x in self.sample_positions() {
                    let observed = SyntheticPrediffer::model(truth, x);
                    let e = exponent(&coeff, x).exp();
                    let predicted = coeff[0] * e;

                    derivs.fill(0.0);
                    derivs[interval.start] = e;
                    let mut power = 1.0;
                    for d in &mut derivs[interval.start + 1..interval.end()] {
                        power *= x;
                        *d = coeff[0] * power * e;
                    }
                    eq.add_condition(&derivs, observed - predicted, 1.0)?;
                }
            }
            out.push(eq);
        }
        trace!("Built equations for {} cells", cells.len());
        Ok(out)
    }
}
