//! Dense linear algebra on top of LAPACK.

use ndarray::{Array1, Array2, ArrayView2};
use ndarray_linalg::{JobSvd, SVDDC};

pub use ndarray_linalg::error::LinalgError;

/// Moore-Penrose pseudo-inverse of a real matrix.
///
/// Computed from the thin SVD `A = U Σ Vᵀ` as `A⁺ = V Σ⁺ Uᵀ`. Singular
/// values below `σ_max · max(rows, cols) · ε` are treated as exact zeros, so
/// rank-deficient systems stay well behaved.
///
/// # Arguments
/// * `a` - The matrix to invert, `rows × cols` in any layout.
///
/// # Returns
/// The `cols × rows` pseudo-inverse, or the underlying LAPACK error.
pub fn pinv(a: ArrayView2<f64>) -> Result<Array2<f64>, LinalgError> {
    let (rows, cols) = a.dim();
    log::debug!("computing pseudo-inverse of a {rows}x{cols} matrix");
    let (u, sigma, vt) = a.svddc(JobSvd::Some)?;
    let u = u.expect("thin SVD returns U");
    let vt = vt.expect("thin SVD returns VT");

    let largest = sigma.iter().cloned().fold(0.0, f64::max);
    let cutoff = largest * rows.max(cols) as f64 * f64::EPSILON;
    let inverted: Array1<f64> =
        sigma.mapv(|s| if s > cutoff { 1.0 / s } else { 0.0 });

    // Scale the rows of Uᵀ by Σ⁺ before the final product.
    let mut ut = u.reversed_axes();
    for (mut row, &s) in ut.rows_mut().into_iter().zip(inverted.iter()) {
        row.mapv_inplace(|v| v * s);
    }
    Ok(vt.reversed_axes().dot(&ut))
}
