// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use super::*;
use crate::grid::Axis;

fn grid(num_freq: usize, num_time: usize) -> Grid {
    Grid::new(
        Axis::regular(100e6, 1e6, num_freq).unwrap(),
        Axis::regular(0.0, 10.0, num_time).unwrap(),
    )
}

fn manager() -> ParmManager {
    let mut parms = ParmManager::new(grid(2, 3));
    parms.define("gain:0:x", vec![1.0, 0.0]).unwrap();
    parms.define("gain:0:y", vec![1.0, 0.0]).unwrap();
    parms.define("gain:1:x", vec![1.0, 0.0]).unwrap();
    parms.define("phase:0", vec![0.0]).unwrap();
    parms
}

#[test]
fn test_defaults_and_round_trip() {
    let mut parms = manager();
    let loc = Location::new(1, 2);
    assert_eq!(parms.get_coeff("gain:0:x", loc).unwrap(), vec![1.0, 0.0]);

    // Vector-valued and scalar parameters.
    parms.set_coeff("gain:0:x", loc, &[0.5, -0.25]).unwrap();
    parms.set_coeff("phase:0", loc, &[3.0]).unwrap();
    assert_eq!(parms.get_coeff("gain:0:x", loc).unwrap(), vec![0.5, -0.25]);
    assert_eq!(parms.get_coeff("phase:0", loc).unwrap(), vec![3.0]);

    // Other cells still have the defaults.
    assert_eq!(
        parms.get_coeff("gain:0:x", Location::new(0, 2)).unwrap(),
        vec![1.0, 0.0]
    );
}

#[test]
fn test_bad_coefficients() {
    let mut parms = manager();
    let result = parms.set_coeff("gain:0:x", Location::new(0, 0), &[1.0]);
    assert!(matches!(
        result,
        Err(ParmError::CountMismatch {
            expected: 2,
            got: 1,
            ..
        })
    ));

    let result = parms.set_coeff("gain:0:x", Location::new(2, 0), &[1.0, 2.0]);
    assert!(matches!(result, Err(ParmError::Grid(_))));
    let result = parms.get_coeff("gain:0:x", Location::new(0, 3));
    assert!(matches!(result, Err(ParmError::Grid(_))));

    let result = parms.set_coeff("nope", Location::new(0, 0), &[1.0]);
    assert!(matches!(result, Err(ParmError::UnknownParm { .. })));

    let result = parms.set_coeff("phase:0", Location::new(0, 0), &[f64::NAN]);
    assert!(matches!(result, Err(ParmError::NonFinite { .. })));

    assert!(matches!(
        parms.define("empty", vec![]),
        Err(ParmError::ZeroLength { .. })
    ));
    assert!(matches!(
        parms.define("phase:0", vec![0.0, 1.0]),
        Err(ParmError::CountMismatch { .. })
    ));
}

#[test]
fn test_select() {
    let parms = manager();
    let group = parms
        .select(&["gain:*".to_string()], &["gain:1:*".to_string()])
        .unwrap();
    assert_eq!(group.names(), &["gain:0:x", "gain:0:y"]);

    let group = parms
        .select(&["phase:*".to_string(), "gain:1:?".to_string()], &[])
        .unwrap();
    // Definition order, not pattern order.
    assert_eq!(group.names(), &["gain:1:x", "phase:0"]);

    let group = parms.select(&["nothing*".to_string()], &[]).unwrap();
    assert!(group.is_empty());

    assert!(matches!(
        parms.select(&["[".to_string()], &[]),
        Err(ParmError::BadPattern(_))
    ));
}

#[test]
fn test_group_coefficients() {
    let mut parms = manager();
    let group = parms
        .select(&["gain:0:*".to_string(), "phase:*".to_string()], &[])
        .unwrap();
    let index = parms.coeff_index(&group).unwrap();
    assert_eq!(index.len(), 5);
    assert_eq!(index.find("phase:0").unwrap().start, 4);

    let loc = Location::new(0, 1);
    parms
        .set_coeffs(&group, loc, &[2.0, 0.1, 3.0, 0.2, 0.7])
        .unwrap();
    assert_eq!(parms.get_coeff("gain:0:y", loc).unwrap(), vec![3.0, 0.2]);
    assert_eq!(
        parms.get_coeffs(&group, loc).unwrap(),
        vec![2.0, 0.1, 3.0, 0.2, 0.7]
    );

    assert!(parms.set_coeffs(&group, loc, &[1.0; 4]).is_err());
}

#[test]
fn test_set_grid_drops_outside_values() {
    let mut parms = manager();
    parms
        .set_coeff("phase:0", Location::new(1, 2), &[1.5])
        .unwrap();
    parms
        .set_coeff("phase:0", Location::new(0, 0), &[2.5])
        .unwrap();
    parms.set_grid(grid(2, 2));
    assert_eq!(parms.get_coeff("phase:0", Location::new(0, 0)).unwrap(), vec![2.5]);
    assert!(parms.get_coeff("phase:0", Location::new(1, 2)).is_err());

    // Growing the grid again doesn't bring the value back.
    parms.set_grid(grid(2, 3));
    assert_eq!(parms.get_coeff("phase:0", Location::new(1, 2)).unwrap(), vec![0.0]);
}

#[test]
fn test_read_write() {
    let mut parms = manager();
    parms
        .set_coeff("gain:1:x", Location::new(1, 1), &[0.9, 0.1])
        .unwrap();
    parms
        .set_coeff("phase:0", Location::new(0, 2), &[std::f64::consts::PI])
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("parms.json");
    parms.write(&path).unwrap();
    let read = ParmManager::read(&path).unwrap();
    assert_eq!(read, parms);
    assert_eq!(
        read.names().collect::<Vec<_>>(),
        vec!["gain:0:x", "gain:0:y", "gain:1:x", "phase:0"]
    );
}

#[test]
fn test_read_bad_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    std::io::Write::write_all(&mut file, b"{\"grid\": 3}").unwrap();
    let result = ParmManager::read(file.path());
    assert!(matches!(result, Err(ParmError::BadFile { .. })));

    let result = ParmManager::read("/does/not/exist.json");
    assert!(matches!(result, Err(ParmError::IO(_))));
}
