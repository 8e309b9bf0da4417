//! Orientation distribution functions from high-angular-resolution
//! diffusion data.
//!
//! The fit projects each voxel's diffusion-weighted signal onto the real
//! symmetric spherical-harmonic basis and applies the Funk-Radon transform
//! in coefficient space, where it is diagonal: coefficients of degree `n`
//! are scaled by the Legendre value `P_n(0)`. Both steps collapse into one
//! signal-by-matrix product, so fitting a whole volume is a single GEMM.
//!
//! A fitted [`OdfModel`] can be evaluated on arbitrary direction grids,
//! resampled into bootstrap realizations from its retained residuals, and
//! narrowed to sub-volumes that share coefficient storage with the parent.

use crate::basis::{self, BasisError};
use crate::broadcast::{self, BroadcastError};
use crate::index::{self, IndexingError, Sel};
use crate::linalg::{self, LinalgError};
use crate::special;
use ndarray::{
    ArcArray, ArcArray2, Array1, ArrayD, ArrayView1, ArrayView2, ArrayViewD, Axis, IxDyn,
    SliceInfoElem,
};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error(transparent)]
    Basis(#[from] BasisError),
    #[error(transparent)]
    Broadcast(#[from] BroadcastError),
    #[error(transparent)]
    Indexing(#[from] IndexingError),
    #[error("linear algebra failed while factorizing the basis: {0}")]
    Linalg(#[from] LinalgError),
    #[error("gradient table must have 3 rows of direction components (got {rows})")]
    GradientShape { rows: usize },
    #[error("gradient table lists {directions} directions but {b_values} b-values")]
    BValueCountMismatch { b_values: usize, directions: usize },
    #[error("signal trailing axis has {found} acquisitions but the gradient table lists {expected}")]
    AcquisitionMismatch { expected: usize, found: usize },
    #[error(
        "order {sh_order} needs {needed} coefficients but only {available} \
         diffusion-weighted measurements are present"
    )]
    TooFewDirections {
        available: usize,
        needed: usize,
        sh_order: usize,
    },
    #[error("residuals were not retained by the fit; refit with keep_residuals enabled")]
    ResidualsNotRetained,
    #[error("permutation must have one entry per diffusion direction ({expected}, got {found})")]
    PermutationLength { expected: usize, found: usize },
    #[error("permutation entry {index} is out of range for {len} diffusion directions")]
    PermutationOutOfRange { index: usize, len: usize },
}

/// Spherical-harmonic ODF reconstruction of a diffusion acquisition.
///
/// All per-voxel arrays use shared storage, so cloning a model or selecting
/// a sub-volume never copies coefficients.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OdfModel {
    sh_order: usize,
    /// Fit matrix, `dwi × coefficients`; right-multiplying a signal row by
    /// it yields Funk-Radon-transformed coefficients.
    fit: ArcArray2<f64>,
    /// Coefficients, voxel shape plus a trailing coefficient axis.
    coef: ArcArray<f64, IxDyn>,
    /// Non-diffusion-weighted measurements, voxel shape plus a trailing
    /// acquisition axis.
    b0: ArcArray<f64, IxDyn>,
    /// Fit residuals over the diffusion-weighted measurements, kept only on
    /// request.
    resid: Option<ArcArray<f64, IxDyn>>,
}

impl OdfModel {
    /// Fits the ODF model to a diffusion-weighted volume.
    ///
    /// Measurements with a positive b-value contribute to the fit; the rest
    /// are retained unchanged as the b0 block. The signal's trailing axis
    /// enumerates acquisitions and every leading axis is treated as a voxel
    /// axis, so single voxels, slices, and whole scans all work.
    ///
    /// # Arguments
    /// * `signal` - Measured signal, `voxels... × acquisitions`.
    /// * `sh_order` - Highest harmonic degree of the basis; must be even.
    /// * `gradients` - Unit gradient directions as a `3 × acquisitions`
    ///   matrix of x, y, z components.
    /// * `b_values` - One b-value per acquisition.
    /// * `keep_residuals` - Retain per-voxel fit residuals, enabling
    ///   [`OdfModel::evaluate_boot`].
    ///
    /// # Returns
    /// The fitted model, or the validation or factorization error.
    pub fn fit(
        signal: ArrayViewD<f64>,
        sh_order: usize,
        gradients: ArrayView2<f64>,
        b_values: ArrayView1<f64>,
        keep_residuals: bool,
    ) -> Result<Self, ModelError> {
        let (_, n_list) = basis::index_list(sh_order)?;
        let ncoef = n_list.len();

        if gradients.nrows() != 3 {
            return Err(ModelError::GradientShape {
                rows: gradients.nrows(),
            });
        }
        let total = b_values.len();
        if gradients.ncols() != total {
            return Err(ModelError::BValueCountMismatch {
                b_values: total,
                directions: gradients.ncols(),
            });
        }
        if signal.ndim() == 0 || signal.shape()[signal.ndim() - 1] != total {
            return Err(ModelError::AcquisitionMismatch {
                expected: total,
                found: signal.shape().last().copied().unwrap_or(0),
            });
        }

        let dwi: Vec<usize> = (0..total).filter(|&i| b_values[i] > 0.0).collect();
        let b0_idx: Vec<usize> = (0..total).filter(|&i| !(b_values[i] > 0.0)).collect();
        let n_dwi = dwi.len();
        if n_dwi < ncoef {
            return Err(ModelError::TooFewDirections {
                available: n_dwi,
                needed: ncoef,
                sh_order,
            });
        }

        // Spherical angles of the diffusion-weighted directions. The z
        // component is clamped so unit vectors touched by round-off still
        // have a polar angle.
        let theta: Array1<f64> = dwi
            .iter()
            .map(|&i| gradients[[1, i]].atan2(gradients[[0, i]]))
            .collect();
        let phi: Array1<f64> = dwi
            .iter()
            .map(|&i| gradients[[2, i]].clamp(-1.0, 1.0).acos())
            .collect();

        let design = basis::design_matrix(sh_order, theta.view(), phi.view())?;
        log::debug!(
            "fitting order-{sh_order} ODF model: {n_dwi} diffusion directions, \
             {ncoef} coefficients, {} b0 acquisitions",
            b0_idx.len()
        );

        // Funk-Radon transform, diagonal in coefficient space.
        let legendre0 = special::legendre_polynomials(sh_order, 0.0);
        let funk_radon: Array1<f64> = n_list.mapv(|n| legendre0[n as usize]);
        let mut fit_matrix = linalg::pinv(design.view())?.reversed_axes();
        fit_matrix *= &funk_radon;

        let voxel_shape: Vec<usize> = signal.shape()[..signal.ndim() - 1].to_vec();
        let voxels: usize = voxel_shape.iter().product();
        let last = Axis(signal.ndim() - 1);
        let b0 = signal.select(last, &b0_idx);
        let dwi_flat = signal
            .select(last, &dwi)
            .into_shape_with_order((voxels, n_dwi))
            .expect("selected signal stays contiguous");

        let coef_flat = dwi_flat.dot(&fit_matrix);

        let resid = if keep_residuals {
            // Predicted signal uses the basis without the Funk-Radon
            // scaling, cancelling it out of the fit matrix.
            let unscaled = &design / &funk_radon;
            let predicted = coef_flat.dot(&unscaled.t());
            let mut resid_shape = voxel_shape.clone();
            resid_shape.push(n_dwi);
            let resid = (&dwi_flat - &predicted)
                .into_shape_with_order(IxDyn(&resid_shape))
                .expect("residuals keep one entry per measurement");
            Some(resid.into_shared())
        } else {
            None
        };

        let mut coef_shape = voxel_shape;
        coef_shape.push(ncoef);
        let coef = coef_flat
            .into_shape_with_order(IxDyn(&coef_shape))
            .expect("coefficients keep one row per voxel")
            .into_shared();

        Ok(Self {
            sh_order,
            fit: fit_matrix.into_shared(),
            coef,
            b0: b0.into_shared(),
            resid,
        })
    }

    /// Highest harmonic degree of the basis.
    pub fn sh_order(&self) -> usize {
        self.sh_order
    }

    /// Voxel shape of the fitted volume.
    pub fn shape(&self) -> &[usize] {
        let s = self.coef.shape();
        &s[..s.len() - 1]
    }

    /// Number of voxel dimensions.
    pub fn ndim(&self) -> usize {
        self.coef.ndim() - 1
    }

    /// Number of basis coefficients per voxel.
    pub fn num_coefficients(&self) -> usize {
        self.fit.ncols()
    }

    /// Number of diffusion-weighted measurements behind the fit.
    pub fn num_dwi(&self) -> usize {
        self.fit.nrows()
    }

    /// Fitted coefficients, voxel shape plus a trailing coefficient axis.
    pub fn coefficients(&self) -> ArrayViewD<f64> {
        self.coef.view()
    }

    /// Retained non-diffusion-weighted measurements.
    pub fn b0(&self) -> ArrayViewD<f64> {
        self.b0.view()
    }

    /// Fit residuals, present when the fit kept them.
    pub fn residuals(&self) -> Option<ArrayViewD<f64>> {
        self.resid.as_ref().map(|r| r.view())
    }

    /// Samples the fitted ODF on a grid of directions.
    ///
    /// `theta` and `phi` broadcast against each other; the result has the
    /// voxel shape followed by the broadcast grid shape.
    pub fn evaluate_at(
        &self,
        theta: ArrayViewD<f64>,
        phi: ArrayViewD<f64>,
    ) -> Result<ArrayD<f64>, ModelError> {
        let coef = self
            .coef
            .to_shape((self.num_voxels(), self.num_coefficients()))
            .expect("coefficients keep one row per voxel");
        self.project(coef.view(), theta, phi)
    }

    /// Samples one bootstrap realization of the ODF.
    ///
    /// Residuals are resampled over the diffusion directions according to
    /// `permutation` (entries may repeat), refit through the stored fit
    /// matrix, and added to the coefficients before evaluation. With
    /// `permutation: None` a fresh random permutation is drawn, so two such
    /// calls generally differ; pass an explicit permutation to reproduce a
    /// realization.
    pub fn evaluate_boot(
        &self,
        theta: ArrayViewD<f64>,
        phi: ArrayViewD<f64>,
        permutation: Option<&[usize]>,
    ) -> Result<ArrayD<f64>, ModelError> {
        let resid = self
            .resid
            .as_ref()
            .ok_or(ModelError::ResidualsNotRetained)?;
        let n_dwi = self.num_dwi();

        let drawn: Vec<usize>;
        let permutation: &[usize] = match permutation {
            Some(given) => {
                if given.len() != n_dwi {
                    return Err(ModelError::PermutationLength {
                        expected: n_dwi,
                        found: given.len(),
                    });
                }
                if let Some(&bad) = given.iter().find(|&&i| i >= n_dwi) {
                    return Err(ModelError::PermutationOutOfRange {
                        index: bad,
                        len: n_dwi,
                    });
                }
                given
            }
            None => {
                let mut indices: Vec<usize> = (0..n_dwi).collect();
                indices.shuffle(&mut rand::thread_rng());
                drawn = indices;
                &drawn
            }
        };
        log::debug!("bootstrap evaluation resampling {n_dwi} residual columns");

        let voxels = self.num_voxels();
        let resid_flat = resid
            .to_shape((voxels, n_dwi))
            .expect("residuals keep one row per voxel");
        let perturbation = resid_flat.select(Axis(1), permutation).dot(&self.fit);
        let coef = self
            .coef
            .to_shape((voxels, self.num_coefficients()))
            .expect("coefficients keep one row per voxel");
        let boot = &coef + &perturbation;
        self.project(boot.view(), theta, phi)
    }

    /// Narrows the model to a sub-volume sharing this model's storage.
    ///
    /// The selection addresses voxel axes only; coefficient, b0, and
    /// residual axes come along untouched.
    pub fn select(&self, sel: &[Sel]) -> Result<Self, ModelError> {
        let elems = index::resolve(sel, self.shape())?;
        Ok(Self {
            sh_order: self.sh_order,
            fit: self.fit.clone(),
            coef: slice_voxels(&self.coef, &elems),
            b0: slice_voxels(&self.b0, &elems),
            resid: self.resid.as_ref().map(|r| slice_voxels(r, &elems)),
        })
    }

    fn num_voxels(&self) -> usize {
        self.shape().iter().product()
    }

    fn project(
        &self,
        coef: ArrayView2<f64>,
        theta: ArrayViewD<f64>,
        phi: ArrayViewD<f64>,
    ) -> Result<ArrayD<f64>, ModelError> {
        let grid_shape = broadcast::broadcast_shape(theta.shape(), phi.shape())?;
        let theta = broadcast::broadcast_to(&theta, &grid_shape)?;
        let phi = broadcast::broadcast_to(&phi, &grid_shape)?;
        let theta_flat: Array1<f64> = theta.iter().copied().collect();
        let phi_flat: Array1<f64> = phi.iter().copied().collect();

        let design = basis::design_matrix(self.sh_order, theta_flat.view(), phi_flat.view())?;
        let values = coef.dot(&design.t());

        let mut out_shape = self.shape().to_vec();
        out_shape.extend_from_slice(&grid_shape);
        Ok(values
            .into_shape_with_order(IxDyn(&out_shape))
            .expect("samples keep one value per voxel and direction"))
    }
}

/// Applies a voxel selection to a shared array with one trailing value axis.
fn slice_voxels(
    array: &ArcArray<f64, IxDyn>,
    voxel_elems: &[SliceInfoElem],
) -> ArcArray<f64, IxDyn> {
    let mut elems = voxel_elems.to_vec();
    elems.push(SliceInfoElem::Slice {
        start: 0,
        end: None,
        step: 1,
    });
    array.clone().slice_move(elems.as_slice())
}
