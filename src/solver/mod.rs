// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The solver core: a set of independent solve domains, each driven by its own
//! Levenberg-Marquardt fitter.
//!
//! A domain is created by a registration request and stepped by iteration
//! requests carrying normal equations. Once a domain reports a terminal
//! [`ReadyCode`] it is forgotten; iteration requests for domains that aren't
//! being tracked are answered with a placeholder.

mod error;
mod lm;

pub use error::SolverError;
pub use lm::SolverOptions;

use std::collections::BTreeMap;

use itertools::Itertools;
use log::{debug, trace, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter};

use crate::messages::{DomainRegistrationRequest, IterationRequest, IterationResult};
use lm::LmFitter;

/// The state of a solve domain after an iteration. Anything other than
/// `InProgress` is terminal.
#[derive(
    Debug, Display, EnumIter, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[repr(u32)]
pub enum ReadyCode {
    InProgress = 0,
    Converged = 1,
    Diverged = 2,
    MaxIterationsReached = 3,
    Singular = 4,

    /// The solver doesn't know about this domain (e.g. it already finished).
    NotTracked = 5,
}

impl ReadyCode {
    pub fn is_terminal(self) -> bool {
        self != ReadyCode::InProgress
    }

    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<ReadyCode> {
        match code {
            0 => Some(ReadyCode::InProgress),
            1 => Some(ReadyCode::Converged),
            2 => Some(ReadyCode::Diverged),
            3 => Some(ReadyCode::MaxIterationsReached),
            4 => Some(ReadyCode::Singular),
            5 => Some(ReadyCode::NotTracked),
            _ => None,
        }
    }
}

pub(crate) struct Domain {
    unknowns: Vec<f64>,
    fitter: LmFitter,
}

impl Domain {
    fn new(request: &DomainRegistrationRequest) -> Result<Domain, SolverError> {
        let options = SolverOptions {
            epsilon_value: request.epsilon,
            epsilon_derivative: request.epsilon_derivative,
            max_iter: request.max_iter,
            col_factor: request.col_factor,
            lm_factor: request.lm_factor,
            balanced_eq: request.balanced_eq,
        };
        options.validate(request.domain_index)?;
        if request.unknowns.is_empty() {
            return Err(SolverError::InvalidDomainConfig {
                domain: request.domain_index,
                reason: "a domain needs at least one unknown".to_string(),
            });
        }
        if let Some(bad) = request.unknowns.iter().find(|u| !u.is_finite()) {
            return Err(SolverError::InvalidDomainConfig {
                domain: request.domain_index,
                reason: format!("initial unknown {bad} is not finite"),
            });
        }

        Ok(Domain {
            unknowns: request.unknowns.clone(),
            fitter: LmFitter::new(request.unknowns.len(), options),
        })
    }

    fn iterate(&mut self, request: &IterationRequest) -> IterationResult {
        let id = request.domain_index;
        if let Err(e) = self.fitter.merge(&request.normal_equations) {
            warn!("Domain {id}: {e}");
            return IterationResult {
                domain_index: id,
                ready_code: ReadyCode::Singular,
                ready_text: e.to_string(),
                unknowns: self.unknowns.clone(),
                rank: 0,
                chi_squared: -1.0,
                lm_factor: -1.0,
            };
        }

        let step = self.fitter.step(&mut self.unknowns);
        trace!(
            "Domain {id} iteration {}: {} (rank {}/{}, chi² {}, LM factor {})",
            self.fitter.num_iterations(),
            step.code,
            step.statistics.rank,
            step.statistics.num_unknowns,
            step.statistics.chi_squared,
            step.statistics.lm_factor
        );
        IterationResult {
            domain_index: id,
            ready_code: step.code,
            ready_text: step.text,
            unknowns: self.unknowns.clone(),
            rank: step.statistics.rank,
            chi_squared: step.statistics.chi_squared,
            lm_factor: step.statistics.lm_factor,
        }
    }
}

#[derive(Default)]
pub struct Solver {
    domains: BTreeMap<u32, Domain>,
}

impl Solver {
    pub fn new() -> Solver {
        Solver::default()
    }

    /// Start solving a domain. Registering an id that's already active
    /// discards its state and starts afresh.
    pub fn register_domain(
        &mut self,
        request: &DomainRegistrationRequest,
    ) -> Result<(), SolverError> {
        let domain = Domain::new(request)?;
        if self.domains.insert(request.domain_index, domain).is_some() {
            debug!("Re-registered domain {}", request.domain_index);
        }
        Ok(())
    }

    /// Register several domains. A failure doesn't prevent the remaining
    /// registrations; the failures are returned.
    pub fn register_domains(
        &mut self,
        requests: &[DomainRegistrationRequest],
    ) -> Vec<SolverError> {
        requests
            .iter()
            .filter_map(|r| self.register_domain(r).err())
            .collect()
    }

    /// Step one domain with the supplied equations. Domains that reach a
    /// terminal state are removed.
    pub fn perform_iteration(&mut self, request: &IterationRequest) -> IterationResult {
        let id = request.domain_index;
        let domain = match self.domains.get_mut(&id) {
            Some(d) => d,
            None => return IterationResult::not_tracked(id),
        };
        let result = domain.iterate(request);
        if result.ready_code.is_terminal() {
            debug!("Domain {id} finished: {}", result.ready_code);
            self.domains.remove(&id);
        }
        result
    }

    /// Step many domains. Distinct domains are stepped in parallel; requests
    /// for the same domain are applied in order. The results are in the same
    /// order as the requests.
    pub fn perform_iterations(&mut self, requests: &[IterationRequest]) -> Vec<IterationResult> {
        let groups = requests
            .iter()
            .enumerate()
            .into_group_map_by(|(_, r)| r.domain_index);

        // Pull the involved domains out of the map so that they can be
        // mutated independently.
        let work: Vec<_> = groups
            .into_iter()
            .map(|(id, reqs)| (id, self.domains.remove(&id), reqs))
            .collect();

        let done: Vec<_> = work
            .into_par_iter()
            .map(|(id, mut domain, reqs)| {
                let results = reqs
                    .into_iter()
                    .map(|(i, req)| {
                        let result = match domain.as_mut() {
                            Some(d) => d.iterate(req),
                            None => IterationResult::not_tracked(id),
                        };
                        if result.ready_code.is_terminal() && domain.is_some() {
                            debug!("Domain {id} finished: {}", result.ready_code);
                            domain = None;
                        }
                        (i, result)
                    })
                    .collect::<Vec<_>>();
                (id, domain, results)
            })
            .collect();

        let mut ordered: Vec<Option<IterationResult>> = vec![None; requests.len()];
        for (id, domain, results) in done {
            if let Some(domain) = domain {
                self.domains.insert(id, domain);
            }
            for (i, result) in results {
                ordered[i] = Some(result);
            }
        }
        ordered.into_iter().flatten().collect()
    }

    pub fn is_active(&self, domain_index: u32) -> bool {
        self.domains.contains_key(&domain_index)
    }

    /// The ids of the domains being solved, in ascending order.
    pub fn active_domains(&self) -> Vec<u32> {
        self.domains.keys().copied().collect()
    }

    pub fn num_active(&self) -> usize {
        self.domains.len()
    }

    /// Forget all domains.
    pub fn clear(&mut self) {
        self.domains.clear();
    }
}
