// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The solver's half of the kernel protocol.

use std::collections::BTreeMap;

use log::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};

use super::SolverControlError;
use crate::{
    coeff_index::{CoeffIndex, CoeffMapping},
    connection::{Connection, ConnectionError},
    equations::{CellEquation, NormalEquations},
    messages::{
        CellSolution, CoeffIndexMsg, DomainRegistrationRequest, IterationRequest, IterationResult,
        Message, MessageKind, SolutionMsg,
    },
    solver::{ReadyCode, Solver, SolverOptions},
};

/// Something that solves domains.
pub trait SolverBackend {
    /// Register domains. Registration is best effort; a domain that couldn't
    /// be registered is reported as not tracked when iterated.
    fn register_domains(
        &mut self,
        requests: Vec<DomainRegistrationRequest>,
    ) -> Result<(), SolverControlError>;

    /// Iterate domains, returning one result per request, in order.
    fn iterate(
        &mut self,
        requests: Vec<IterationRequest>,
    ) -> Result<Vec<IterationResult>, SolverControlError>;
}

impl SolverBackend for Solver {
    fn register_domains(
        &mut self,
        requests: Vec<DomainRegistrationRequest>,
    ) -> Result<(), SolverControlError> {
        for e in Solver::register_domains(self, &requests) {
            warn!("{e}");
        }
        Ok(())
    }

    fn iterate(
        &mut self,
        requests: Vec<IterationRequest>,
    ) -> Result<Vec<IterationResult>, SolverControlError> {
        Ok(self.perform_iterations(&requests))
    }
}

/// Talks to a remote [`super::SolverProcessControl`].
pub struct SolverClient<C: Connection> {
    connection: C,
}

impl<C: Connection> SolverClient<C> {
    pub fn new(connection: C) -> SolverClient<C> {
        SolverClient { connection }
    }

    pub fn into_inner(self) -> C {
        self.connection
    }
}

impl<C: Connection> SolverBackend for SolverClient<C> {
    fn register_domains(
        &mut self,
        requests: Vec<DomainRegistrationRequest>,
    ) -> Result<(), SolverControlError> {
        self.connection
            .send(&Message::DomainRegistrationBatch(requests))?;
        Ok(())
    }

    fn iterate(
        &mut self,
        requests: Vec<IterationRequest>,
    ) -> Result<Vec<IterationResult>, SolverControlError> {
        self.connection.send(&Message::IterationBatch(requests))?;
        match self.connection.recv()? {
            Message::IterationResultBatch(results) => Ok(results),
            other => Err(ConnectionError::UnexpectedMessage {
                expected: "IterationResultBatch",
                got: other.kind(),
            }
            .into()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalSolveSummary {
    pub num_chunks: usize,

    /// The number of solver iterations over all chunks.
    pub num_iterations: usize,

    /// The final ready code of every cell, keyed by cell id.
    pub cells: BTreeMap<u32, ReadyCode>,

    /// The global coefficient index.
    pub coeff_index: CoeffIndex,
}

/// Serves the kernel protocol for a fixed set of kernels.
///
/// Per time chunk, each kernel sends its coefficient index and receives the
/// merged global index, then sends initial coefficients. After that every
/// round consists of one equation message from each kernel, answered with the
/// solutions of all cells; the chunk ends when every kernel sends a chunk-done
/// message instead. The run ends when every kernel has closed its connection.
pub struct GlobalSolveController<B: SolverBackend> {
    backend: B,
    options: SolverOptions,
    kernels: Vec<Box<dyn Connection>>,
    index: CoeffIndex,
}

/// What a kernel sent during a solve round.
enum RoundMessage {
    Equations(Vec<CellEquation>),
    ChunkDone,
}

impl<B: SolverBackend> GlobalSolveController<B> {
    pub fn new(
        backend: B,
        options: SolverOptions,
        kernels: Vec<Box<dyn Connection>>,
    ) -> GlobalSolveController<B> {
        GlobalSolveController {
            backend,
            options,
            kernels,
            index: CoeffIndex::new(),
        }
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    pub fn run(&mut self) -> Result<GlobalSolveSummary, SolverControlError> {
        let mut summary = GlobalSolveSummary::default();
        info!("Solving for {} kernels", self.kernels.len());

        while let Some(mappings) = self.exchange_coeff_indices()? {
            summary.num_chunks += 1;
            let cell_ids = self.register_cells(&mappings)?;
            debug!(
                "Chunk {}: registered {} cells with {} unknowns each",
                summary.num_chunks,
                cell_ids.len(),
                self.index.len()
            );

            loop {
                let systems = match self.receive_equations(&mappings)? {
                    Some(s) => s,
                    None => break,
                };
                let requests = systems
                    .into_iter()
                    .map(|(domain_index, normal_equations)| IterationRequest {
                        domain_index,
                        normal_equations,
                    })
                    .collect();
                let results = self.backend.iterate(requests)?;
                summary.num_iterations += 1;

                let contents: Vec<CellSolution> = results
                    .into_iter()
                    .map(|r| {
                        if r.ready_code.is_terminal() {
                            summary.cells.insert(r.domain_index, r.ready_code);
                        }
                        CellSolution::from(r)
                    })
                    .collect();
                trace!("Sending {} solutions", contents.len());
                let msg = Message::Solutions(SolutionMsg { contents });
                for kernel in &mut self.kernels {
                    kernel.send(&msg)?;
                }
            }
        }

        summary.coeff_index = self.index.clone();
        info!(
            "Solved {} chunks; {}/{} cells converged",
            summary.num_chunks,
            summary
                .cells
                .values()
                .filter(|c| **c == ReadyCode::Converged)
                .count(),
            summary.cells.len()
        );
        Ok(summary)
    }

    /// Merge the coefficient index of every kernel and send back the global
    /// index. `None` means that every kernel has finished.
    fn exchange_coeff_indices(&mut self) -> Result<Option<Vec<CoeffMapping>>, SolverControlError> {
        let mut local_indices = Vec::with_capacity(self.kernels.len());
        let mut closed = vec![];
        for (i, kernel) in self.kernels.iter_mut().enumerate() {
            match kernel.recv() {
                Ok(Message::CoeffIndex(msg)) => {
                    trace!("Kernel {} has {} coefficients", msg.kernel_id, msg.contents.len());
                    local_indices.push(msg.contents);
                }
                Ok(other) => {
                    return Err(SolverControlError::Protocol {
                        kernel: i,
                        expected: "CoeffIndex",
                        got: other.kind(),
                    })
                }
                Err(ConnectionError::Closed) => closed.push(i),
                Err(e) => return Err(e.into()),
            }
        }
        if closed.len() == self.kernels.len() {
            return Ok(None);
        }
        if let Some(&kernel) = closed.first() {
            return Err(SolverControlError::KernelLost { kernel });
        }

        // Merge everything before replying, so that every kernel sees the
        // same global index.
        let mut mappings = Vec::with_capacity(local_indices.len());
        for local in &local_indices {
            mappings.push(self.index.merge(local)?);
        }
        let msg = Message::CoeffIndex(CoeffIndexMsg {
            kernel_id: 0,
            contents: self.index.clone(),
        });
        for kernel in &mut self.kernels {
            kernel.send(&msg)?;
        }
        Ok(Some(mappings))
    }

    /// Receive the initial coefficients of every kernel and register a domain
    /// per cell.
    fn register_cells(&mut self, mappings: &[CoeffMapping]) -> Result<Vec<u32>, SolverControlError> {
        let global_len = self.index.len();
        let mut unknowns: BTreeMap<u32, Vec<f64>> = BTreeMap::new();
        for (i, (kernel, mapping)) in self.kernels.iter_mut().zip(mappings).enumerate() {
            let msg = match kernel.recv() {
                Ok(Message::Coefficients(msg)) => msg,
                Ok(other) => {
                    return Err(SolverControlError::Protocol {
                        kernel: i,
                        expected: "Coefficients",
                        got: other.kind(),
                    })
                }
                Err(ConnectionError::Closed) => return Err(SolverControlError::KernelLost { kernel: i }),
                Err(e) => return Err(e.into()),
            };
            for cell in msg.contents {
                let global = unknowns
                    .entry(cell.id)
                    .or_insert_with(|| vec![0.0; global_len]);
                mapping.scatter(&cell.coeff, global)?;
            }
        }

        let ids = unknowns.keys().copied().collect();
        let requests = unknowns
            .into_iter()
            .map(|(domain_index, unknowns)| DomainRegistrationRequest {
                domain_index,
                unknowns,
                epsilon: self.options.epsilon_value,
                epsilon_derivative: self.options.epsilon_derivative,
                max_iter: self.options.max_iter,
                col_factor: self.options.col_factor,
                lm_factor: self.options.lm_factor,
                balanced_eq: self.options.balanced_eq,
            })
            .collect();
        self.backend.register_domains(requests)?;
        Ok(ids)
    }

    /// Receive one round of equations from every kernel and merge them per
    /// cell in the global layout. `None` means the chunk is done.
    fn receive_equations(
        &mut self,
        mappings: &[CoeffMapping],
    ) -> Result<Option<BTreeMap<u32, NormalEquations>>, SolverControlError> {
        let mut round = Vec::with_capacity(self.kernels.len());
        for (i, kernel) in self.kernels.iter_mut().enumerate() {
            let msg = match kernel.recv() {
                Ok(Message::Equations(msg)) => RoundMessage::Equations(msg.contents),
                Ok(Message::ChunkDone(_)) => RoundMessage::ChunkDone,
                Ok(other) => {
                    return Err(SolverControlError::Protocol {
                        kernel: i,
                        expected: "Equations or ChunkDone",
                        got: other.kind(),
                    })
                }
                Err(ConnectionError::Closed) => return Err(SolverControlError::KernelLost { kernel: i }),
                Err(e) => return Err(e.into()),
            };
            round.push(msg);
        }

        let num_done = round
            .iter()
            .filter(|m| matches!(m, RoundMessage::ChunkDone))
            .count();
        if num_done == round.len() {
            return Ok(None);
        }
        if num_done > 0 {
            // Kernels see the same solutions, so they should all finish a
            // chunk together.
            let kernel = round
                .iter()
                .position(|m| matches!(m, RoundMessage::ChunkDone))
                .unwrap_or(0);
            return Err(SolverControlError::Protocol {
                kernel,
                expected: "Equations",
                got: MessageKind::ChunkDone,
            });
        }

        let global_len = self.index.len();
        let mut systems: BTreeMap<u32, NormalEquations> = BTreeMap::new();
        for (msg, mapping) in round.into_iter().zip(mappings) {
            if let RoundMessage::Equations(cells) = msg {
                for cell in cells {
                    let scattered = cell.equation.scatter(mapping, global_len)?;
                    match systems.get_mut(&cell.id) {
                        Some(system) => system.merge(&scattered)?,
                        None => {
                            systems.insert(cell.id, scattered);
                        }
                    }
                }
            }
        }
        Ok(Some(systems))
    }
}
