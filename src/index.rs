//! Voxel selection over dynamic-rank arrays.
//!
//! A selection is a short list of [`Sel`] entries, one per leading axis:
//! single positions (negative counts from the end), clamped ranges with a
//! positive step, full axes, and a single [`Sel::Rest`] placeholder that
//! stands for every remaining axis. [`resolve`] turns a selection into the
//! per-axis slice elements `ndarray` consumes, validating positions before
//! anything touches the data.

use ndarray::SliceInfoElem;
use std::ops::{Range, RangeFull};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum IndexingError {
    #[error("selection has {given} entries but the target has {ndim} dimensions")]
    TooManyIndices { given: usize, ndim: usize },
    #[error("position {index} is out of bounds for axis {axis} of length {len}")]
    OutOfBounds { axis: usize, index: isize, len: usize },
    #[error("range step must be at least 1 (got {step})")]
    BadStep { step: isize },
    #[error("a selection may contain at most one Rest placeholder")]
    MultipleRest,
}

/// One axis of a selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sel {
    /// A single position; negative values count from the end of the axis.
    At(isize),
    /// A half-open range with a positive step. Endpoints may be negative
    /// (from the end) and are clamped to the axis like numpy slices;
    /// `end: None` runs to the end of the axis.
    Range {
        start: isize,
        end: Option<isize>,
        step: isize,
    },
    /// The whole axis.
    All,
    /// Every remaining axis not named by the other entries.
    Rest,
}

impl From<isize> for Sel {
    fn from(index: isize) -> Self {
        Sel::At(index)
    }
}

impl From<Range<isize>> for Sel {
    fn from(range: Range<isize>) -> Self {
        Sel::Range {
            start: range.start,
            end: Some(range.end),
            step: 1,
        }
    }
}

impl From<RangeFull> for Sel {
    fn from(_: RangeFull) -> Self {
        Sel::All
    }
}

/// Resolves `sel` against `shape` into one slice element per axis.
///
/// Unnamed trailing axes are kept whole, so the output always has exactly
/// `shape.len()` entries and can be fed straight to `ndarray` slicing.
pub fn resolve(sel: &[Sel], shape: &[usize]) -> Result<Vec<SliceInfoElem>, IndexingError> {
    let ndim = shape.len();
    let rest_count = sel.iter().filter(|s| matches!(s, Sel::Rest)).count();
    if rest_count > 1 {
        return Err(IndexingError::MultipleRest);
    }
    let explicit = sel.len() - rest_count;
    if explicit > ndim {
        return Err(IndexingError::TooManyIndices { given: explicit, ndim });
    }

    let mut elems = Vec::with_capacity(ndim);
    let mut axis = 0;
    for entry in sel {
        match *entry {
            Sel::Rest => {
                for _ in 0..(ndim - explicit) {
                    elems.push(full_axis());
                    axis += 1;
                }
            }
            Sel::All => {
                elems.push(full_axis());
                axis += 1;
            }
            Sel::At(index) => {
                let len = shape[axis] as isize;
                let position = if index < 0 { index + len } else { index };
                if position < 0 || position >= len {
                    return Err(IndexingError::OutOfBounds {
                        axis,
                        index,
                        len: shape[axis],
                    });
                }
                elems.push(SliceInfoElem::Index(position));
                axis += 1;
            }
            Sel::Range { start, end, step } => {
                if step < 1 {
                    return Err(IndexingError::BadStep { step });
                }
                let len = shape[axis];
                let start = clamp_endpoint(start, len);
                let end = end.map_or(len, |e| clamp_endpoint(e, len)).max(start);
                elems.push(SliceInfoElem::Slice {
                    start: start as isize,
                    end: Some(end as isize),
                    step,
                });
                axis += 1;
            }
        }
    }
    while axis < ndim {
        elems.push(full_axis());
        axis += 1;
    }
    Ok(elems)
}

#[inline]
fn full_axis() -> SliceInfoElem {
    SliceInfoElem::Slice {
        start: 0,
        end: None,
        step: 1,
    }
}

/// Range endpoint normalized from-the-end and clamped into `[0, len]`.
#[inline]
fn clamp_endpoint(value: isize, len: usize) -> usize {
    if value < 0 {
        (value + len as isize).max(0) as usize
    } else {
        (value as usize).min(len)
    }
}
