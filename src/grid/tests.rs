// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use approx::assert_abs_diff_eq;

use super::*;

fn data_grid() -> Grid {
    // 8 channels of 40 kHz starting at 150 MHz, 10 timeslots of 2 s.
    Grid::new(
        Axis::regular(150e6, 40e3, 8).unwrap(),
        Axis::regular(0.0, 2.0, 10).unwrap(),
    )
}

#[test]
fn test_regular_axis() {
    let axis = Axis::regular(10.0, 0.5, 4).unwrap();
    assert_eq!(axis.size(), 4);
    assert_abs_diff_eq!(axis.start(), 10.0);
    assert_abs_diff_eq!(axis.end(), 12.0);
    assert_abs_diff_eq!(axis.lower(2), 11.0);
    assert_abs_diff_eq!(axis.upper(2), 11.5);
    assert_abs_diff_eq!(axis.centre(2), 11.25);
    assert_abs_diff_eq!(axis.width(3), 0.5);
}

#[test]
fn test_bad_axes() {
    assert_eq!(Axis::regular(0.0, 1.0, 0), Err(GridError::EmptyAxis));
    assert!(matches!(
        Axis::regular(0.0, 0.0, 3),
        Err(GridError::BadCellWidth { .. })
    ));
    assert_eq!(Axis::irregular(vec![]), Err(GridError::EmptyAxis));
    assert!(matches!(
        Axis::irregular(vec![(0.0, 1.0), (1.5, 2.0)]),
        Err(GridError::NotContiguous { index: 1 })
    ));
    assert!(matches!(
        Axis::irregular(vec![(1.0, 1.0)]),
        Err(GridError::BadCell { index: 0, .. })
    ));
}

#[test]
fn test_locate() {
    let axis = Axis::irregular(vec![(0.0, 1.0), (1.0, 3.0), (3.0, 3.5)]).unwrap();
    assert_eq!(axis.locate(-0.1), None);
    assert_eq!(axis.locate(0.0), Some(0));
    assert_eq!(axis.locate(0.999), Some(0));
    assert_eq!(axis.locate(1.0), Some(1));
    assert_eq!(axis.locate(2.9), Some(1));
    assert_eq!(axis.locate(3.2), Some(2));
    assert_eq!(axis.locate(3.5), Some(2));
    assert_eq!(axis.locate(3.6), None);
}

#[test]
fn test_compress_keeps_short_last_cell() {
    let axis = Axis::regular(0.0, 2.0, 10).unwrap().compress(4).unwrap();
    assert_eq!(axis.size(), 3);
    assert_abs_diff_eq!(axis.lower(1), 8.0);
    assert_abs_diff_eq!(axis.upper(1), 16.0);
    assert_abs_diff_eq!(axis.lower(2), 16.0);
    assert_abs_diff_eq!(axis.upper(2), 20.0);

    assert_eq!(
        Axis::regular(0.0, 1.0, 3).unwrap().compress(0),
        Err(GridError::ZeroFactor)
    );
}

#[test]
fn test_partition() {
    let solution_grid = Grid::partition(&data_grid(), 4, 3).unwrap();
    assert_eq!(solution_grid.num_freq(), 2);
    assert_eq!(solution_grid.num_time(), 4);
    assert_eq!(solution_grid.num_cells(), 8);
    let cell = solution_grid.cell_box(Location::new(1, 3)).unwrap();
    assert_abs_diff_eq!(cell.freq.0, 150e6 + 4.0 * 40e3);
    assert_abs_diff_eq!(cell.freq.1, 150e6 + 8.0 * 40e3);
    assert_abs_diff_eq!(cell.time.0, 18.0);
    assert_abs_diff_eq!(cell.time.1, 20.0);
}

#[test]
fn test_cell_id_round_trip() {
    let grid = Grid::partition(&data_grid(), 3, 4).unwrap();
    for id in 0..grid.num_cells() as u32 {
        let location = grid.location(id).unwrap();
        assert_eq!(grid.cell_id(location).unwrap(), id);
    }
    // Frequency varies fastest.
    assert_eq!(grid.cell_id(Location::new(1, 0)).unwrap(), 1);
    assert_eq!(grid.cell_id(Location::new(0, 1)).unwrap(), 3);

    assert!(matches!(
        grid.location(grid.num_cells() as u32),
        Err(GridError::IdOutOfBounds { .. })
    ));
    assert!(matches!(
        grid.cell_id(Location::new(3, 0)),
        Err(GridError::LocationOutOfBounds { .. })
    ));
}

#[test]
fn test_time_chunks() {
    let grid = data_grid();
    assert_eq!(grid.time_chunks(4), vec![0..4, 4..8, 8..10]);
    assert_eq!(grid.time_chunks(10), vec![0..10]);
    assert_eq!(grid.time_chunks(20), vec![0..10]);
    // A chunk size of 0 is treated as 1.
    assert_eq!(grid.time_chunks(0).len(), 10);

    assert_eq!(
        grid.time_chunks_within(3..9, 4).unwrap(),
        vec![3..7, 7..9]
    );
    assert!(matches!(
        grid.time_chunks_within(8..11, 4),
        Err(GridError::BadRange { end: 11, .. })
    ));
    assert!(grid.time_chunks_within(5..5, 4).is_err());
}

#[test]
fn test_locations_in() {
    let grid = Grid::partition(&data_grid(), 4, 5).unwrap();
    let locations = grid.locations_in(1..2);
    assert_eq!(locations, vec![Location::new(0, 1), Location::new(1, 1)]);
    let ids: Vec<u32> = grid
        .locations_in(0..2)
        .into_iter()
        .map(|l| grid.cell_id(l).unwrap())
        .collect();
    assert_eq!(ids, vec![0, 1, 2, 3]);
}
