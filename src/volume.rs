//! Mask-compacted storage for per-voxel arrays.
//!
//! A scan rarely fills its bounding box, so per-voxel results are stored as
//! a dense block of rows covering only the voxels inside a boolean mask. An
//! index volume with the spatial shape of the mask maps each voxel to its
//! row, with `-1` marking voxels outside the mask. Sub-volume handles share
//! the row block and carry their own index volume, so writes through any
//! handle are visible through all of them.

use crate::index::{self, IndexingError, Sel};
use ndarray::{ArrayD, ArrayViewD, Axis, IxDyn};
use std::sync::{Arc, RwLock};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VolumeError {
    #[error("data must carry a leading row axis")]
    MissingRowAxis,
    #[error("data has {found} rows but the mask selects {expected} voxels")]
    RowCountMismatch { expected: usize, found: usize },
    #[error("cannot arrange {len} voxels into shape {shape:?}")]
    ShapeMismatch { len: usize, shape: Vec<usize> },
    #[error(
        "values of shape {found:?} match neither one row per masked voxel \
         (shape {per_row:?}) nor a single shared row (shape {row:?})"
    )]
    ValueShapeMismatch {
        found: Vec<usize>,
        per_row: Vec<usize>,
        row: Vec<usize>,
    },
    #[error(transparent)]
    Indexing(#[from] IndexingError),
}

/// Dense rows of per-voxel values addressed through a boolean mask.
///
/// Cloning a `MaskedVolume` is cheap and yields another handle onto the same
/// rows; [`MaskedVolume::deep_copy`] severs the sharing.
#[derive(Debug, Clone)]
pub struct MaskedVolume<A> {
    /// Row `i` holds the values of the `i`-th masked-in voxel in scan order.
    data: Arc<RwLock<ArrayD<A>>>,
    /// Row index per voxel, `-1` outside the mask. Always owns a
    /// standard-layout buffer, so reshapes never copy.
    imask: ArrayD<i64>,
}

impl<A: Clone> MaskedVolume<A> {
    /// Builds a store from a boolean mask and one data row per masked-in
    /// voxel, ordered by scan position.
    ///
    /// # Arguments
    /// * `mask` - Which voxels carry data.
    /// * `data` - `rows × value-shape` block; `rows` must equal the number
    ///   of `true` voxels.
    pub fn new(mask: ArrayViewD<'_, bool>, data: ArrayD<A>) -> Result<Self, VolumeError> {
        if data.ndim() == 0 {
            return Err(VolumeError::MissingRowAxis);
        }
        let mut rows = 0i64;
        let flags: Vec<i64> = mask
            .iter()
            .map(|&inside| {
                if inside {
                    rows += 1;
                    rows - 1
                } else {
                    -1
                }
            })
            .collect();
        let expected = rows as usize;
        if data.shape()[0] != expected {
            return Err(VolumeError::RowCountMismatch {
                expected,
                found: data.shape()[0],
            });
        }
        let imask = ArrayD::from_shape_vec(mask.raw_dim(), flags)
            .expect("index volume has one entry per mask voxel");
        Ok(Self {
            data: Arc::new(RwLock::new(data)),
            imask,
        })
    }

    /// Boolean mask of the voxels addressable through this handle.
    pub fn mask(&self) -> ArrayD<bool> {
        self.imask.mapv(|row| row >= 0)
    }

    /// Spatial shape of the volume.
    pub fn shape(&self) -> &[usize] {
        self.imask.shape()
    }

    /// Number of spatial dimensions.
    pub fn ndim(&self) -> usize {
        self.imask.ndim()
    }

    /// Number of masked-in voxels addressable through this handle.
    pub fn rows(&self) -> usize {
        self.imask.iter().filter(|&&row| row >= 0).count()
    }

    /// Shape of the value stored at each voxel.
    pub fn value_shape(&self) -> Vec<usize> {
        let data = self.data.read().expect("voxel store lock poisoned");
        data.shape()[1..].to_vec()
    }

    /// Rearranges the spatial axes without touching the data rows.
    ///
    /// The new shape must cover exactly as many voxels as the old one.
    pub fn set_shape(&mut self, shape: &[usize]) -> Result<(), VolumeError> {
        let len = self.imask.len();
        if shape.iter().product::<usize>() != len {
            return Err(VolumeError::ShapeMismatch {
                len,
                shape: shape.to_vec(),
            });
        }
        let old = std::mem::replace(&mut self.imask, ArrayD::zeros(IxDyn(&[0])));
        self.imask = old
            .into_shape_with_order(IxDyn(shape))
            .expect("voxel count already checked");
        Ok(())
    }

    /// Sub-volume handle sharing this handle's data rows.
    ///
    /// The selection narrows the index volume only; voxels outside the
    /// selection stay reachable through the original handle.
    pub fn get(&self, sel: &[Sel]) -> Result<Self, VolumeError> {
        let elems = index::resolve(sel, self.imask.shape())?;
        let imask = self.imask.slice(elems.as_slice()).to_owned();
        Ok(Self {
            data: Arc::clone(&self.data),
            imask,
        })
    }

    /// Writes values into the selected voxels, skipping masked-out ones.
    ///
    /// `values` either carries one row per masked-in selected voxel (in scan
    /// order) or a single row shared by all of them.
    pub fn set(&self, sel: &[Sel], values: ArrayViewD<'_, A>) -> Result<(), VolumeError> {
        let elems = index::resolve(sel, self.imask.shape())?;
        let selected = self.imask.slice(elems.as_slice());
        let rows: Vec<usize> = selected
            .iter()
            .filter(|&&row| row >= 0)
            .map(|&row| row as usize)
            .collect();

        let mut data = self.data.write().expect("voxel store lock poisoned");
        let row_shape = data.shape()[1..].to_vec();
        let mut per_row_shape = vec![rows.len()];
        per_row_shape.extend_from_slice(&row_shape);

        if values.shape() == per_row_shape.as_slice() {
            for (i, &row) in rows.iter().enumerate() {
                data.index_axis_mut(Axis(0), row)
                    .assign(&values.index_axis(Axis(0), i));
            }
        } else if values.shape() == row_shape.as_slice() {
            for &row in &rows {
                data.index_axis_mut(Axis(0), row).assign(&values);
            }
        } else {
            return Err(VolumeError::ValueShapeMismatch {
                found: values.shape().to_vec(),
                per_row: per_row_shape,
                row: row_shape,
            });
        }
        Ok(())
    }

    /// Expands the compacted rows into a dense volume, placing `fill` at
    /// every voxel outside the mask.
    pub fn to_dense(&self, fill: A) -> ArrayD<A> {
        let data = self.data.read().expect("voxel store lock poisoned");
        let row_shape = &data.shape()[1..];
        let voxels = self.imask.len();

        let mut flat_shape = vec![voxels];
        flat_shape.extend_from_slice(row_shape);
        let mut dense = ArrayD::from_elem(IxDyn(&flat_shape), fill);
        for (voxel, &row) in self.imask.iter().enumerate() {
            if row >= 0 {
                dense
                    .index_axis_mut(Axis(0), voxel)
                    .assign(&data.index_axis(Axis(0), row as usize));
            }
        }

        let mut dense_shape = self.imask.shape().to_vec();
        dense_shape.extend_from_slice(row_shape);
        dense
            .into_shape_with_order(IxDyn(&dense_shape))
            .expect("dense volume keeps one entry per voxel")
    }

    /// Detached copy holding only the voxels reachable from this handle,
    /// with rows re-compacted into scan order.
    pub fn deep_copy(&self) -> Self {
        let data = self.data.read().expect("voxel store lock poisoned");
        let keep: Vec<usize> = self
            .imask
            .iter()
            .filter(|&&row| row >= 0)
            .map(|&row| row as usize)
            .collect();
        let fresh = data.select(Axis(0), &keep);

        let mut next = 0i64;
        let renumbered: Vec<i64> = self
            .imask
            .iter()
            .map(|&row| {
                if row >= 0 {
                    next += 1;
                    next - 1
                } else {
                    -1
                }
            })
            .collect();
        let imask = ArrayD::from_shape_vec(self.imask.raw_dim(), renumbered)
            .expect("index volume has one entry per mask voxel");
        Self {
            data: Arc::new(RwLock::new(fresh)),
            imask,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr2, array, Array2, ArrayD};

    /// 2x3 mask with voxels (0,1), (1,0), (1,2) inside.
    fn small_store() -> MaskedVolume<f64> {
        let mask = array![[false, true, false], [true, false, true]].into_dyn();
        let data = arr2(&[[10.0, 11.0], [20.0, 21.0], [30.0, 31.0]]).into_dyn();
        MaskedVolume::new(mask.view(), data).unwrap()
    }

    #[test]
    fn test_new_compacts_rows_in_scan_order() {
        let store = small_store();
        assert_eq!(store.shape(), &[2, 3]);
        assert_eq!(store.ndim(), 2);
        assert_eq!(store.rows(), 3);
        assert_eq!(store.value_shape(), vec![2]);
        assert_eq!(
            store.imask.clone().into_raw_vec_and_offset().0,
            vec![-1, 0, -1, 1, -1, 2]
        );
    }

    #[test]
    fn test_new_rejects_row_count_mismatch() {
        let mask = array![[true, true]].into_dyn();
        let data = Array2::<f64>::zeros((3, 2)).into_dyn();
        let err = MaskedVolume::new(mask.view(), data).unwrap_err();
        assert!(matches!(
            err,
            VolumeError::RowCountMismatch { expected: 2, found: 3 }
        ));
    }

    #[test]
    fn test_new_rejects_data_without_row_axis() {
        let mask = array![true].into_dyn();
        let data = ArrayD::<f64>::zeros(IxDyn(&[]));
        assert!(matches!(
            MaskedVolume::new(mask.view(), data).unwrap_err(),
            VolumeError::MissingRowAxis
        ));
    }

    #[test]
    fn test_mask_round_trips() {
        let store = small_store();
        let mask = store.mask();
        assert_eq!(
            mask.into_raw_vec_and_offset().0,
            vec![false, true, false, true, false, true]
        );
    }

    #[test]
    fn test_to_dense_places_fill_outside_mask() {
        let dense = small_store().to_dense(f64::NAN);
        assert_eq!(dense.shape(), &[2, 3, 2]);
        assert!(dense[[0, 0, 0]].is_nan());
        assert_eq!(dense[[0, 1, 0]], 10.0);
        assert_eq!(dense[[1, 0, 1]], 21.0);
        assert_eq!(dense[[1, 2, 0]], 30.0);
    }

    #[test]
    fn test_get_yields_view_sharing_storage() {
        let store = small_store();
        let row1 = store.get(&[Sel::At(1)]).unwrap();
        assert_eq!(row1.shape(), &[3]);
        assert_eq!(row1.rows(), 2);

        // A write through the view is visible through the parent.
        row1.set(&[Sel::At(0)], array![99.0, 98.0].into_dyn().view())
            .unwrap();
        let dense = store.to_dense(0.0);
        assert_eq!(dense[[1, 0, 0]], 99.0);
        assert_eq!(dense[[1, 0, 1]], 98.0);
    }

    #[test]
    fn test_set_skips_masked_out_voxels() {
        let store = small_store();
        // Row 0 of the volume holds one masked-in voxel and two outside.
        store
            .set(&[Sel::At(0)], array![7.0, 8.0].into_dyn().view())
            .unwrap();
        let dense = store.to_dense(-1.0);
        assert_eq!(dense[[0, 1, 0]], 7.0);
        assert_eq!(dense[[0, 0, 0]], -1.0);
        assert_eq!(dense[[0, 2, 0]], -1.0);
    }

    #[test]
    fn test_set_accepts_one_row_per_masked_voxel() {
        let store = small_store();
        store
            .set(
                &[Sel::Rest],
                array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]].into_dyn().view(),
            )
            .unwrap();
        let dense = store.to_dense(0.0);
        assert_eq!(dense[[0, 1, 1]], 2.0);
        assert_eq!(dense[[1, 0, 0]], 3.0);
        assert_eq!(dense[[1, 2, 1]], 6.0);
    }

    #[test]
    fn test_set_rejects_unusable_value_shape() {
        let store = small_store();
        let err = store
            .set(&[Sel::All], Array2::<f64>::zeros((4, 2)).into_dyn().view())
            .unwrap_err();
        match err {
            VolumeError::ValueShapeMismatch { found, per_row, row } => {
                assert_eq!(found, vec![4, 2]);
                assert_eq!(per_row, vec![3, 2]);
                assert_eq!(row, vec![2]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_set_shape_preserves_scan_order() {
        let mut store = small_store();
        store.set_shape(&[3, 2]).unwrap();
        assert_eq!(store.shape(), &[3, 2]);
        // Voxel order is unchanged, only the coordinates move.
        let dense = store.to_dense(0.0);
        assert_eq!(dense[[0, 1, 0]], 10.0);
        assert_eq!(dense[[1, 1, 0]], 20.0);
        assert_eq!(dense[[2, 1, 0]], 30.0);

        let err = store.set_shape(&[4, 2]).unwrap_err();
        assert!(matches!(err, VolumeError::ShapeMismatch { len: 6, .. }));
    }

    #[test]
    fn test_deep_copy_detaches_and_recompacts() {
        let store = small_store();
        let view = store.get(&[Sel::At(1)]).unwrap();
        let copy = view.deep_copy();
        assert_eq!(copy.rows(), 2);
        assert_eq!(
            copy.imask.clone().into_raw_vec_and_offset().0,
            vec![0, -1, 1]
        );

        // Writes to the original no longer reach the copy.
        view.set(&[Sel::All], array![0.5, 0.5].into_dyn().view())
            .unwrap();
        let dense = copy.to_dense(0.0);
        assert_eq!(dense[[0, 0]], 20.0);
        assert_eq!(dense[[2, 0]], 30.0);
    }

    #[test]
    fn test_get_rejects_excess_indices() {
        let store = small_store();
        let err = store.get(&[Sel::At(0), Sel::At(0), Sel::At(0)]).unwrap_err();
        assert!(matches!(err, VolumeError::Indexing(_)));
    }
}
