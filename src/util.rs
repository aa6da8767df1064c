use na::{DMatrix, DVector};

use crate::types::Float;

/// Block-diagonal matrix from square blocks, each scaled by its factor.
pub fn block_diagonal<'a>(
    blocks: impl Iterator<Item = (&'a DMatrix<Float>, Float)>,
) -> DMatrix<Float> {
    let blocks: Vec<(&DMatrix<Float>, Float)> = blocks.collect();
    let size = blocks.iter().map(|(b, _)| b.nrows()).sum();
    let mut result = DMatrix::zeros(size, size);
    let mut offset = 0;
    for (block, factor) in blocks {
        let n = block.nrows();
        result
            .view_mut((offset, offset), (n, n))
            .copy_from(&(block * factor));
        offset += n;
    }
    result
}

pub fn assert_close(a: Float, b: Float, tol: Float) {
    assert!((a - b).abs() < tol, "{} != {}", a, b);
}

pub fn assert_dvec_close(a: &DVector<Float>, b: &DVector<Float>, tol: Float) {
    assert_eq!(a.len(), b.len(), "length {} != {}", a.len(), b.len());
    for (a, b) in a.iter().zip(b.iter()) {
        assert!((a - b).abs() < tol, "{} != {}", a, b);
    }
}

#[macro_export]
macro_rules! assert_close {
    ($left:expr, $right:expr, $tolerance:expr) => {
        let left = $left;
        let right = $right;
        let tol = $tolerance;
        let diff = (left - right).abs();
        if diff > tol {
            panic!(
                "assertion failed: {} ~= {} \
                (tolerance: {}, difference: {})",
                left, right, tol, diff
            );
        }
    };
}

#[macro_export]
macro_rules! assert_vec_close {
    ($left:expr, $right:expr, $tolerance:expr) => {
        let left = $left;
        let right = $right;
        let tol = $tolerance;
        for (a, b) in left.iter().zip(right.iter()) {
            $crate::assert_close!(a, b, tol);
        }
    };
}
