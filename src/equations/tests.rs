// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use approx::assert_abs_diff_eq;
use ndarray::array;

use super::*;
use crate::coeff_index::CoeffIndex;

#[test]
fn test_add_condition() {
    let mut eq = NormalEquations::new(2);
    assert!(eq.is_empty());
    eq.add_condition(&[1.0, 2.0], 0.5, 2.0).unwrap();
    eq.add_condition(&[0.0, 1.0], -1.0, 1.0).unwrap();

    assert_eq!(eq.num_observations(), 2);
    assert_abs_diff_eq!(eq.sum_weights(), 3.0);
    assert_abs_diff_eq!(eq.sum_sq_residuals(), 2.0 * 0.25 + 1.0);
    assert_abs_diff_eq!(eq.matrix(), array![[2.0, 4.0], [4.0, 9.0]].view());
    assert_abs_diff_eq!(eq.rhs(), array![1.0, 1.0].view());
}

#[test]
fn test_zero_weight_conditions_are_ignored() {
    let mut eq = NormalEquations::new(1);
    eq.add_condition(&[1.0], 5.0, 0.0).unwrap();
    assert!(eq.is_empty());
    assert_abs_diff_eq!(eq.sum_sq_residuals(), 0.0);
}

#[test]
fn test_bad_conditions() {
    let mut eq = NormalEquations::new(2);
    assert!(matches!(
        eq.add_condition(&[1.0], 0.0, 1.0),
        Err(EquationsError::DimensionMismatch {
            expected: 2,
            got: 1
        })
    ));
    assert!(matches!(
        eq.add_condition(&[1.0, 1.0], f64::NAN, 1.0),
        Err(EquationsError::NonFiniteCondition { .. })
    ));
    assert!(matches!(
        eq.add_condition(&[1.0, 1.0], 1.0, -1.0),
        Err(EquationsError::NonFiniteCondition { .. })
    ));
    assert!(eq.is_empty());
}

#[test]
fn test_merge() {
    let mut a = NormalEquations::new(2);
    a.add_condition(&[1.0, 0.0], 1.0, 1.0).unwrap();
    let mut b = NormalEquations::new(2);
    b.add_condition(&[0.0, 1.0], 2.0, 1.0).unwrap();

    a.merge(&b).unwrap();
    assert_eq!(a.num_observations(), 2);
    assert_abs_diff_eq!(a.matrix(), array![[1.0, 0.0], [0.0, 1.0]].view());
    assert_abs_diff_eq!(a.rhs(), array![1.0, 2.0].view());
    assert_abs_diff_eq!(a.sum_sq_residuals(), 5.0);

    assert!(a.merge(&NormalEquations::new(3)).is_err());
}

#[test]
fn test_scatter_to_global_layout() {
    let mut local_index = CoeffIndex::new();
    local_index.insert("gain:x", 1).unwrap();
    local_index.insert("phase", 1).unwrap();
    let mut global_index = CoeffIndex::new();
    global_index.insert("gain:y", 2).unwrap();
    let mapping = global_index.merge(&local_index).unwrap();

    let mut local = NormalEquations::new(2);
    local.add_condition(&[1.0, 2.0], 3.0, 1.0).unwrap();
    let global = local.scatter(&mapping, global_index.len()).unwrap();

    assert_eq!(global.num_unknowns(), 4);
    assert_abs_diff_eq!(
        global.matrix(),
        array![
            [0.0, 0.0, 0.0, 0.0],
            [0.0, 0.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 2.0],
            [0.0, 0.0, 2.0, 4.0],
        ]
        .view()
    );
    assert_abs_diff_eq!(global.rhs(), array![0.0, 0.0, 3.0, 6.0].view());
    assert_eq!(global.num_observations(), 1);

    assert!(matches!(
        local.scatter(&mapping, 3),
        Err(EquationsError::OffsetOutOfRange { offset: 3, .. })
    ));
}

#[test]
fn test_reset() {
    let mut eq = NormalEquations::new(2);
    eq.add_condition(&[1.0, 1.0], 1.0, 1.0).unwrap();
    eq.reset();
    assert!(eq.is_empty());
    assert_eq!(eq.num_unknowns(), 2);
    assert_abs_diff_eq!(eq.matrix(), Array2::<f64>::zeros((2, 2)).view());
}

#[test]
fn test_decoded_shape_is_checked() {
    let good = r#"{"matrix":{"v":1,"dim":[1,1],"data":[1.0]},"rhs":{"v":1,"dim":[1],"data":[0.5]},"num_observations":1,"sum_weights":1.0,"sum_sq_residuals":0.25}"#;
    let eq: NormalEquations = serde_json::from_str(good).unwrap();
    assert_eq!(eq.num_unknowns(), 1);
    assert_abs_diff_eq!(eq.rhs(), array![0.5].view());

    let bad = r#"{"matrix":{"v":1,"dim":[2,2],"data":[1.0,0.0,0.0,1.0]},"rhs":{"v":1,"dim":[1],"data":[0.0]},"num_observations":1,"sum_weights":1.0,"sum_sq_residuals":0.0}"#;
    let result = serde_json::from_str::<NormalEquations>(bad);
    assert!(result.unwrap_err().to_string().contains("2x2"));
}

#[test]
fn test_misshapen_systems_are_errors() {
    let misshapen = NormalEquations {
        matrix: Array2::zeros((2, 2)),
        rhs: Array1::zeros(1),
        num_observations: 1,
        sum_weights: 1.0,
        sum_sq_residuals: 0.0,
    };
    let bad_shape = EquationsError::BadShape {
        rows: 2,
        cols: 2,
        rhs: 1,
    };
    assert_eq!(misshapen.check_shape(), Err(bad_shape.clone()));

    let mut eq = NormalEquations::new(1);
    assert_eq!(eq.merge(&misshapen), Err(bad_shape.clone()));
    // Nothing was added.
    assert!(eq.is_empty());

    let mut index = CoeffIndex::new();
    index.insert("a", 1).unwrap();
    let mapping = CoeffIndex::new().merge(&index).unwrap();
    assert_eq!(misshapen.scatter(&mapping, 1), Err(bad_shape));
}
