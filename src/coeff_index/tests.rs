// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use super::*;

fn kernel_index(entries: &[(&str, usize)]) -> CoeffIndex {
    let mut index = CoeffIndex::new();
    for (name, count) in entries {
        index.insert(name, *count).unwrap();
    }
    index
}

#[test]
fn test_insert_is_contiguous() {
    let index = kernel_index(&[("a", 3), ("b", 1), ("c", 2)]);
    assert_eq!(index.len(), 6);
    assert_eq!(index.num_names(), 3);
    assert_eq!(
        index.find("a"),
        Some(CoeffInterval {
            start: 0,
            length: 3
        })
    );
    assert_eq!(index.find("b").unwrap().range(), 3..4);
    assert_eq!(index.find("c").unwrap().range(), 4..6);
    assert!(index.find("d").is_none());
}

#[test]
fn test_insert_is_idempotent() {
    let mut index = kernel_index(&[("gain:x", 2)]);
    let again = index.insert("gain:x", 2).unwrap();
    assert_eq!(again.start, 0);
    assert_eq!(index.len(), 2);
    assert_eq!(index.num_names(), 1);
}

#[test]
fn test_insert_with_different_length_fails() {
    let mut index = kernel_index(&[("gain:x", 2)]);
    let result = index.insert("gain:x", 3);
    assert!(matches!(
        result,
        Err(CoeffIndexError::InconsistentIndex {
            existing: 2,
            new: 3,
            ..
        })
    ));
    // The failed insert must not change anything.
    assert_eq!(index.len(), 2);
}

#[test]
fn test_insert_zero_length_fails() {
    let mut index = CoeffIndex::new();
    assert!(matches!(
        index.insert("phase", 0),
        Err(CoeffIndexError::ZeroLength { .. })
    ));
    assert!(index.is_empty());
}

#[test]
fn test_merge_two_kernels() {
    let kernel_a = kernel_index(&[("gain:x", 2), ("gain:y", 2)]);
    let kernel_b = kernel_index(&[("gain:x", 2), ("phase", 1)]);

    let mut global = CoeffIndex::new();
    let mapping_a = global.merge(&kernel_a).unwrap();
    assert_eq!(global.find("gain:x").unwrap().range(), 0..2);
    assert_eq!(global.find("gain:y").unwrap().range(), 2..4);
    assert_eq!(mapping_a.offsets(), vec![0, 1, 2, 3]);

    let mapping_b = global.merge(&kernel_b).unwrap();
    assert_eq!(global.find("gain:x").unwrap().range(), 0..2);
    assert_eq!(global.find("phase").unwrap().range(), 4..5);
    assert_eq!(global.len(), 5);
    assert_eq!(mapping_b.offsets(), vec![0, 1, 4]);
}

#[test]
fn test_repeated_merge_does_not_move_offsets() {
    let kernel_a = kernel_index(&[("gain:x", 2), ("gain:y", 2)]);
    let kernel_b = kernel_index(&[("phase", 1), ("gain:y", 2)]);

    let mut global = CoeffIndex::new();
    global.merge(&kernel_a).unwrap();
    global.merge(&kernel_b).unwrap();
    let before = global.clone();

    // Retried registrations.
    global.merge(&kernel_b).unwrap();
    global.merge(&kernel_a).unwrap();
    assert_eq!(global, before);
}

#[test]
fn test_merge_inconsistent_fails_but_keeps_offsets() {
    let kernel_a = kernel_index(&[("gain:x", 2)]);
    let kernel_b = kernel_index(&[("phase", 1), ("gain:x", 4)]);

    let mut global = CoeffIndex::new();
    global.merge(&kernel_a).unwrap();
    let result = global.merge(&kernel_b);
    assert!(matches!(
        result,
        Err(CoeffIndexError::InconsistentIndex { .. })
    ));
    assert_eq!(global.find("gain:x").unwrap().range(), 0..2);
}

#[test]
fn test_scatter_gather() {
    let kernel_b = kernel_index(&[("gain:x", 2), ("phase", 1)]);
    let mut global = kernel_index(&[("gain:x", 2), ("gain:y", 2)]);
    let mapping = global.merge(&kernel_b).unwrap();

    let mut global_coeffs = vec![-1.0; global.len()];
    mapping.scatter(&[1.0, 2.0, 3.0], &mut global_coeffs).unwrap();
    assert_eq!(global_coeffs, vec![1.0, 2.0, -1.0, -1.0, 3.0]);
    assert_eq!(mapping.gather(&global_coeffs).unwrap(), vec![1.0, 2.0, 3.0]);

    assert!(matches!(
        mapping.scatter(&[1.0], &mut global_coeffs),
        Err(CoeffIndexError::LengthMismatch {
            expected: 3,
            got: 1
        })
    ));
    assert!(matches!(
        mapping.gather(&[0.0; 2]),
        Err(CoeffIndexError::OutOfRange { offset: 4 })
    ));
}

#[test]
fn test_mapping_for_requires_known_names() {
    let global = kernel_index(&[("gain:x", 2), ("gain:y", 2)]);
    let local = kernel_index(&[("gain:y", 2)]);
    assert_eq!(global.mapping_for(&local).unwrap().offsets(), vec![2, 3]);

    let unknown = kernel_index(&[("phase", 1)]);
    assert!(matches!(
        global.mapping_for(&unknown),
        Err(CoeffIndexError::NotFound { .. })
    ));
}

#[test]
fn test_decoded_index_is_checked() {
    let index: CoeffIndex = serde_json::from_str(
        r#"{"intervals":{"a":{"start":0,"length":3},"b":{"start":3,"length":1}},"len":4}"#,
    )
    .unwrap();
    assert_eq!(index, kernel_index(&[("a", 3), ("b", 1)]));

    // The intervals claim more coefficients than the index has.
    let result = serde_json::from_str::<CoeffIndex>(
        r#"{"intervals":{"a":{"start":0,"length":3}},"len":1}"#,
    );
    assert!(result.unwrap_err().to_string().contains("entries hold 3"));

    // A gap between intervals.
    let result = serde_json::from_str::<CoeffIndex>(
        r#"{"intervals":{"a":{"start":0,"length":1},"b":{"start":2,"length":1}},"len":3}"#,
    );
    assert!(result.unwrap_err().to_string().contains("'b' starts at 2"));

    let result =
        serde_json::from_str::<CoeffIndex>(r#"{"intervals":{"a":{"start":0,"length":0}},"len":0}"#);
    assert!(result.is_err());
}

#[test]
fn test_raw_index_errors() {
    let raw = RawCoeffIndex {
        intervals: [("a".to_string(), CoeffInterval { start: 1, length: 2 })]
            .into_iter()
            .collect(),
        len: 2,
    };
    assert_eq!(
        CoeffIndex::try_from(raw),
        Err(CoeffIndexError::NotContiguous {
            name: "a".to_string(),
            start: 1,
            expected: 0
        })
    );
}
