//! Numpy-style shape broadcasting.
//!
//! Sampling directions may arrive as scalars, vectors, or grids of angles,
//! and the two angle arrays do not have to share a shape. The rules here are
//! the usual right-aligned ones: axes match when equal or when one of them
//! is 1, and missing leading axes count as 1.

use ndarray::{ArrayBase, ArrayView, Data, Dimension, IxDyn};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum BroadcastError {
    #[error("shapes {lhs:?} and {rhs:?} cannot be broadcast together")]
    Incompatible { lhs: Vec<usize>, rhs: Vec<usize> },
}

/// Shape produced by broadcasting `lhs` against `rhs`.
pub fn broadcast_shape(lhs: &[usize], rhs: &[usize]) -> Result<Vec<usize>, BroadcastError> {
    let ndim = lhs.len().max(rhs.len());
    let mut shape = vec![0; ndim];
    for i in 0..ndim {
        let a = axis_len(lhs, ndim, i);
        let b = axis_len(rhs, ndim, i);
        shape[i] = if a == b || b == 1 {
            a
        } else if a == 1 {
            b
        } else {
            return Err(BroadcastError::Incompatible {
                lhs: lhs.to_vec(),
                rhs: rhs.to_vec(),
            });
        };
    }
    Ok(shape)
}

/// Common broadcast shape of any number of operands.
pub fn common_shape(shapes: &[&[usize]]) -> Result<Vec<usize>, BroadcastError> {
    let mut shape = Vec::new();
    for s in shapes {
        shape = broadcast_shape(&shape, s)?;
    }
    Ok(shape)
}

/// View of `array` broadcast to `shape`, without copying.
pub fn broadcast_to<'a, S, D>(
    array: &'a ArrayBase<S, D>,
    shape: &[usize],
) -> Result<ArrayView<'a, S::Elem, IxDyn>, BroadcastError>
where
    S: Data,
    D: Dimension,
{
    array
        .broadcast(IxDyn(shape))
        .ok_or_else(|| BroadcastError::Incompatible {
            lhs: array.shape().to_vec(),
            rhs: shape.to_vec(),
        })
}

/// Length of logical axis `i` after padding `shape` to `ndim` axes.
#[inline]
fn axis_len(shape: &[usize], ndim: usize, i: usize) -> usize {
    let pad = ndim - shape.len();
    if i < pad { 1 } else { shape[i - pad] }
}
