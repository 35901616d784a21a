// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::thread;

use approx::assert_abs_diff_eq;
use indexmap::indexmap;

use super::*;
use crate::{
    connection::ChannelConnection,
    grid::Axis,
    solver::{Solver, SolverOptions},
    solver_control::{GlobalSolveController, GlobalSolveSummary},
};

fn grid() -> Grid {
    Grid::new(
        Axis::regular(150e6, 2e6, 2).unwrap(),
        Axis::regular(0.0, 8.0, 4).unwrap(),
    )
}

fn parms() -> ParmManager {
    let mut parms = ParmManager::new(grid());
    parms.define("gain:a", vec![1.0, 0.0]).unwrap();
    parms.define("amp:b", vec![1.0]).unwrap();
    parms.define("fixed:c", vec![7.0]).unwrap();
    parms
}

fn prediffer() -> SyntheticPrediffer {
    SyntheticPrediffer::new(
        indexmap! {
            "gain:a".to_string() => vec![2.0, -0.3],
            "amp:b".to_string() => vec![0.5],
            "fixed:c".to_string() => vec![7.0],
        },
        16,
    )
}

fn options() -> SolverOptions {
    SolverOptions {
        epsilon_value: 1e-9,
        epsilon_derivative: 1e-12,
        max_iter: 100,
        ..Default::default()
    }
}

type Kernel = LocalSolveController<ChannelConnection, SyntheticPrediffer>;

/// A kernel connected to a global solve controller running on another thread.
fn kernel() -> (Kernel, thread::JoinHandle<GlobalSolveSummary>) {
    let (kernel_end, solver_end) = ChannelConnection::pair();
    let handle = thread::spawn(move || {
        GlobalSolveController::new(Solver::new(), options(), vec![Box::new(solver_end)])
            .run()
            .unwrap()
    });
    let mut kernel = LocalSolveController::new(0, kernel_end, prediffer(), parms());
    kernel.set_solution_grid(grid());
    kernel
        .set_solvables(&["gain:*".to_string(), "amp:*".to_string()], &[])
        .unwrap();
    (kernel, handle)
}

#[test]
fn test_cell_chunk_size() {
    let (mut kernel, _handle) = kernel();
    assert_eq!(kernel.cell_chunk_size(), DEFAULT_CELL_CHUNK_SIZE);
    kernel.set_cell_chunk_size(3);
    assert_eq!(kernel.cell_chunk_size(), 3);
    kernel.set_cell_chunk_size(0);
    assert_eq!(kernel.cell_chunk_size(), 3);
}

#[test]
fn test_every_cell_finishes() {
    let (mut kernel, handle) = kernel();
    kernel.set_cell_chunk_size(3);
    let report = kernel.run().unwrap();
    let parms = kernel.into_parms();
    let summary = handle.join().unwrap();

    assert_eq!(report.num_chunks, 2);
    assert_eq!(report.cells.len(), 8);
    assert!(report.all_converged(), "{report:?}");
    assert_eq!(summary.num_chunks, 2);
    assert_eq!(summary.cells.len(), 8);
    assert_eq!(summary.coeff_index.len(), 3);

    for (id, cell) in &report.cells {
        assert_eq!(grid().cell_id(cell.location).unwrap(), *id);
        assert_eq!(cell.rank, 3);
        let gain = parms.get_coeff("gain:a", cell.location).unwrap();
        assert_abs_diff_eq!(gain[0], 2.0, epsilon = 1e-6);
        assert_abs_diff_eq!(gain[1], -0.3, epsilon = 1e-6);
        let amp = parms.get_coeff("amp:b", cell.location).unwrap();
        assert_abs_diff_eq!(amp[0], 0.5, epsilon = 1e-6);
        // Not solvable, so untouched.
        assert_eq!(parms.get_coeff("fixed:c", cell.location).unwrap(), vec![7.0]);
    }
}

#[test]
fn test_propagated_solutions_warm_start() {
    let (mut kernel, handle) = kernel();
    kernel.set_propagate_solutions(true);
    let report = kernel.run().unwrap();
    drop(kernel);
    handle.join().unwrap();

    assert_eq!(report.num_chunks, 4);
    assert!(report.all_converged());
    for cell in report.cells.values() {
        if cell.location.time == 0 {
            assert!(cell.num_iterations > 1);
        } else {
            assert_eq!(cell.num_iterations, 1, "{cell:?}");
        }
    }
}

#[test]
fn test_without_propagation_every_chunk_starts_cold() {
    let (mut kernel, handle) = kernel();
    let report = kernel.run().unwrap();
    drop(kernel);
    handle.join().unwrap();

    assert!(report.all_converged());
    assert!(report.cells.values().all(|c| c.num_iterations > 1));
}

#[test]
fn test_no_solvables_is_a_no_op() {
    let (kernel_end, mut solver_end) = ChannelConnection::pair();
    let mut kernel = LocalSolveController::new(0, kernel_end, prediffer(), parms());
    kernel.set_solution_grid(grid());
    kernel
        .set_solvables(&["nothing:*".to_string()], &[])
        .unwrap();
    assert!(kernel.solvables().is_empty());

    let report = kernel.run().unwrap();
    assert!(report.cells.is_empty());
    assert_eq!(kernel.builder().num_constructs(), 0);
    drop(kernel);
    // Nothing was sent.
    assert!(matches!(solver_end.recv(), Err(ConnectionError::Closed)));
}

#[test]
fn test_no_grid() {
    let (kernel_end, _solver_end) = ChannelConnection::pair();
    let mut kernel = LocalSolveController::new(0, kernel_end, prediffer(), parms());
    kernel.set_solvables(&["*".to_string()], &[]).unwrap();
    assert!(matches!(kernel.run(), Err(KernelError::NoSolutionGrid)));
}

#[test]
fn test_unexpected_reply() {
    let (kernel_end, mut solver_end) = ChannelConnection::pair();
    let mut kernel = LocalSolveController::new(3, kernel_end, prediffer(), parms());
    kernel.set_solution_grid(grid());
    kernel.set_solvables(&["amp:*".to_string()], &[]).unwrap();

    // Answer the coefficient index with something else.
    solver_end
        .send(&Message::ChunkDone(ChunkDoneMsg { kernel_id: 99 }))
        .unwrap();
    let result = kernel.run();
    assert!(matches!(
        result,
        Err(KernelError::Connection(ConnectionError::UnexpectedMessage {
            expected: "CoeffIndex",
            ..
        }))
    ));
    match solver_end.recv().unwrap() {
        Message::CoeffIndex(msg) => {
            assert_eq!(msg.kernel_id, 3);
            assert_eq!(msg.contents.len(), 1);
        }
        other => panic!("unexpected {}", other.kind()),
    }
}

#[test]
fn test_synthetic_model() {
    assert_abs_diff_eq!(SyntheticPrediffer::model(&[0.5], 0.3), 0.5);
    assert_abs_diff_eq!(
        SyntheticPrediffer::model(&[2.0, -0.3, 0.1], 0.5),
        2.0 * (-0.15_f64 + 0.025).exp(),
        epsilon = 1e-15
    );
}

#[test]
fn test_synthetic_equations_vanish_at_truth() {
    let mut parms = parms();
    let solvables = parms
        .select(&["gain:*".to_string(), "amp:*".to_string()], &[])
        .unwrap();
    let loc = Location::new(1, 1);
    parms.set_coeff("gain:a", loc, &[2.0, -0.3]).unwrap();
    parms.set_coeff("amp:b", loc, &[0.5]).unwrap();

    let mut prediffer = prediffer().with_subset(1, 2);
    let eqs = prediffer
        .construct(&grid(), &parms, &solvables, &[loc, Location::new(0, 0)])
        .unwrap();
    assert_eq!(eqs.len(), 2);
    // 16 samples for each of the 2 parameters.
    assert_eq!(eqs[0].num_observations(), 32);
    assert_abs_diff_eq!(eqs[0].sum_sq_residuals(), 0.0, epsilon = 1e-20);
    // The default values don't fit.
    assert!(eqs[1].sum_sq_residuals() > 0.1);
    // Parameters don't share any conditions.
    assert_abs_diff_eq!(eqs[1].matrix()[(0, 2)], 0.0);
}

#[test]
fn test_work_domain_time_cells() {
    let (mut kernel, handle) = kernel();
    kernel.set_cell_chunk_size(3);
    kernel.set_time_cells(Some(1..3));
    let report = kernel.run().unwrap();
    let parms = kernel.into_parms();
    let summary = handle.join().unwrap();

    assert_eq!(report.num_chunks, 1);
    assert_eq!(summary.cells.len(), 4);
    assert!(report.cells.values().all(|c| (1..3).contains(&c.location.time)));
    // Cells outside of the work domain keep their defaults.
    assert_eq!(
        parms.get_coeff("gain:a", Location::new(0, 0)).unwrap(),
        vec![1.0, 0.0]
    );
}

#[test]
fn test_work_domain_outside_grid() {
    let (kernel_end, _solver_end) = ChannelConnection::pair();
    let mut kernel = LocalSolveController::new(0, kernel_end, prediffer(), parms());
    kernel.set_solution_grid(grid());
    kernel.set_solvables(&["amp:*".to_string()], &[]).unwrap();
    kernel.set_time_cells(Some(2..9));
    assert!(matches!(kernel.run(), Err(KernelError::Grid(_))));
}
