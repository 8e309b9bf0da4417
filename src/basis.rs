//! Real, symmetric spherical-harmonic basis.
//!
//! Diffusion signals are antipodally symmetric, so the basis keeps only the
//! even degrees `n = 0, 2, ..., sh_order` and replaces the complex harmonics
//! with the real-valued combination used throughout q-ball imaging:
//!
//! ```text
//! R_n^0  = Re(Y_n^0)
//! R_n^m  = Re(Y_n^m)  · √2   for m > 0
//! R_n^m  = Im(Y_n^m)  · √2   for m < 0
//! ```
//!
//! [`index_list`] enumerates the `(order, degree)` pairs that define the
//! coefficient layout, [`real_sph_harm`] samples individual basis functions
//! over broadcast angle grids, and [`design_matrix`] assembles the dense
//! directions-by-coefficients matrix the model fit factorizes.

use crate::broadcast::{self, BroadcastError};
use crate::special;
use ndarray::{Array1, Array2, ArrayD, ArrayView1, ArrayViewD, IxDyn, Zip};
use std::f64::consts::SQRT_2;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum BasisError {
    #[error("spherical harmonic order must be even (got {0})")]
    OddOrder(usize),
    #[error("harmonic degree must be non-negative (got {0})")]
    NegativeDegree(i32),
    #[error("harmonic order {m} lies outside [-{n}, {n}] for degree {n}")]
    OrderOutOfRange { m: i32, n: i32 },
    #[error("theta has {theta} entries but phi has {phi}; each direction needs one of each")]
    DirectionCountMismatch { theta: usize, phi: usize },
    #[error(transparent)]
    Broadcast(#[from] BroadcastError),
}

/// Number of coefficients in an even-order symmetric basis,
/// `(sh_order + 2)(sh_order + 1) / 2`.
pub fn num_coefficients(sh_order: usize) -> usize {
    (sh_order + 2) * (sh_order + 1) / 2
}

/// Enumerates the `(m, n)` pairs of the symmetric basis up to `sh_order`.
///
/// Degrees ascend over the even values `0, 2, ..., sh_order` and within each
/// degree the order runs `-n ..= n`, which fixes the coefficient layout used
/// by every other routine in the crate.
///
/// # Arguments
/// * `sh_order` - Highest harmonic degree to include; must be even.
///
/// # Returns
/// The pair `(m_list, n_list)`, each of length
/// [`num_coefficients`]`(sh_order)`.
pub fn index_list(sh_order: usize) -> Result<(Array1<i32>, Array1<i32>), BasisError> {
    if sh_order % 2 != 0 {
        return Err(BasisError::OddOrder(sh_order));
    }
    let ncoef = num_coefficients(sh_order);
    let mut m_list = Vec::with_capacity(ncoef);
    let mut n_list = Vec::with_capacity(ncoef);
    for n in (0..=sh_order as i32).step_by(2) {
        for m in -n..=n {
            m_list.push(m);
            n_list.push(n);
        }
    }
    Ok((Array1::from_vec(m_list), Array1::from_vec(n_list)))
}

/// Samples real spherical harmonics over broadcast argument grids.
///
/// All four arguments broadcast against each other under the usual
/// right-aligned rules, so a fixed `(m, n)` can be swept over an angle grid
/// or a whole coefficient list evaluated at one direction.
///
/// # Arguments
/// * `m` - Harmonic orders, each with `|m| ≤ n`.
/// * `n` - Harmonic degrees, each non-negative.
/// * `theta` - Azimuthal angles in `[0, 2π)`.
/// * `phi` - Polar angles in `[0, π]`.
///
/// # Returns
/// The samples, with the common broadcast shape of the inputs.
pub fn real_sph_harm(
    m: ArrayViewD<i32>,
    n: ArrayViewD<i32>,
    theta: ArrayViewD<f64>,
    phi: ArrayViewD<f64>,
) -> Result<ArrayD<f64>, BasisError> {
    let shape = broadcast::common_shape(&[m.shape(), n.shape(), theta.shape(), phi.shape()])?;
    let m = broadcast::broadcast_to(&m, &shape)?;
    let n = broadcast::broadcast_to(&n, &shape)?;
    let theta = broadcast::broadcast_to(&theta, &shape)?;
    let phi = broadcast::broadcast_to(&phi, &shape)?;

    for (&mi, &ni) in m.iter().zip(n.iter()) {
        if ni < 0 {
            return Err(BasisError::NegativeDegree(ni));
        }
        if mi.abs() > ni {
            return Err(BasisError::OrderOutOfRange { m: mi, n: ni });
        }
    }

    let mut out = ArrayD::zeros(IxDyn(&shape));
    Zip::from(&mut out)
        .and(&m)
        .and(&n)
        .and(&theta)
        .and(&phi)
        .for_each(|slot, &mi, &ni, &t, &p| {
            *slot = real_sph_harm_single(mi, ni, t, p);
        });
    Ok(out)
}

/// Dense basis matrix, one row per direction and one column per `(m, n)`
/// pair of [`index_list`]`(sh_order)`.
///
/// Rows are filled in parallel; each row shares a single associated-Legendre
/// sweep at its polar angle across all columns.
///
/// # Arguments
/// * `sh_order` - Highest harmonic degree; must be even.
/// * `theta` - Azimuthal angle of each direction.
/// * `phi` - Polar angle of each direction.
///
/// # Returns
/// The `directions × num_coefficients(sh_order)` design matrix.
pub fn design_matrix(
    sh_order: usize,
    theta: ArrayView1<f64>,
    phi: ArrayView1<f64>,
) -> Result<Array2<f64>, BasisError> {
    if theta.len() != phi.len() {
        return Err(BasisError::DirectionCountMismatch {
            theta: theta.len(),
            phi: phi.len(),
        });
    }
    let (m_list, n_list) = index_list(sh_order)?;

    // Per-column constants: degree, order, and the normalization with the
    // √2 factor and negative-order sign already folded in.
    let columns: Vec<(usize, i32, f64)> = m_list
        .iter()
        .zip(n_list.iter())
        .map(|(&m, &n)| {
            let degree = n as usize;
            let a = m.unsigned_abs() as usize;
            let norm = special::sh_normalization(degree, a);
            let scale = match m {
                0 => norm,
                _ if m > 0 => SQRT_2 * norm,
                _ if a % 2 == 0 => -SQRT_2 * norm,
                _ => SQRT_2 * norm,
            };
            (degree, m, scale)
        })
        .collect();

    let mut matrix = Array2::zeros((theta.len(), columns.len()));
    Zip::from(matrix.rows_mut())
        .and(&theta)
        .and(&phi)
        .par_for_each(|mut row, &t, &p| {
            let table = special::associated_legendre_table(sh_order, p.cos());
            for (slot, &(degree, m, scale)) in row.iter_mut().zip(&columns) {
                let a = m.unsigned_abs() as usize;
                let angular = match m {
                    0 => 1.0,
                    _ if m > 0 => (m as f64 * t).cos(),
                    _ => (a as f64 * t).sin(),
                };
                *slot = scale * table[special::tri(degree, a)] * angular;
            }
        });
    Ok(matrix)
}

fn real_sph_harm_single(m: i32, n: i32, theta: f64, phi: f64) -> f64 {
    let y = special::sph_harm(m, n, theta, phi);
    match m {
        0 => y.re,
        _ if m > 0 => SQRT_2 * y.re,
        _ => SQRT_2 * y.im,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use ndarray::{arr0, aview1, Array};

    #[test]
    fn test_index_list_order_four_layout() {
        let (m, n) = index_list(4).unwrap();
        assert_eq!(
            m.to_vec(),
            vec![0, -2, -1, 0, 1, 2, -4, -3, -2, -1, 0, 1, 2, 3, 4]
        );
        assert_eq!(
            n.to_vec(),
            vec![0, 2, 2, 2, 2, 2, 4, 4, 4, 4, 4, 4, 4, 4, 4]
        );
    }

    #[test]
    fn test_index_list_counts_match_closed_form() {
        for sh_order in [0usize, 2, 4, 6, 8, 12] {
            let (m, n) = index_list(sh_order).unwrap();
            let expected = (sh_order + 2) * (sh_order + 1) / 2;
            assert_eq!(m.len(), expected);
            assert_eq!(n.len(), expected);
            for (&mi, &ni) in m.iter().zip(n.iter()) {
                assert_eq!(ni % 2, 0);
                assert!(mi.abs() <= ni);
            }
        }
    }

    #[test]
    fn test_index_list_rejects_odd_order() {
        assert_eq!(index_list(3), Err(BasisError::OddOrder(3)));
        assert_eq!(index_list(7), Err(BasisError::OddOrder(7)));
    }

    #[test]
    fn test_real_sph_harm_zero_order_has_no_sqrt2() {
        let theta = arr0(0.9).into_dyn();
        let phi = arr0(0.4).into_dyn();
        for n in [0i32, 2, 4] {
            let sample = real_sph_harm(
                arr0(0).into_dyn().view(),
                arr0(n).into_dyn().view(),
                theta.view(),
                phi.view(),
            )
            .unwrap();
            let y = special::sph_harm(0, n, 0.9, 0.4);
            assert_relative_eq!(*sample.first().unwrap(), y.re, epsilon = 1e-13);
        }
    }

    #[test]
    fn test_real_sph_harm_nonzero_orders_scale_by_sqrt2() {
        let y = special::sph_harm(2, 4, 1.2, 0.8);
        let pos = real_sph_harm(
            arr0(2).into_dyn().view(),
            arr0(4).into_dyn().view(),
            arr0(1.2).into_dyn().view(),
            arr0(0.8).into_dyn().view(),
        )
        .unwrap();
        assert_relative_eq!(*pos.first().unwrap(), SQRT_2 * y.re, epsilon = 1e-13);

        let y_neg = special::sph_harm(-2, 4, 1.2, 0.8);
        let neg = real_sph_harm(
            arr0(-2).into_dyn().view(),
            arr0(4).into_dyn().view(),
            arr0(1.2).into_dyn().view(),
            arr0(0.8).into_dyn().view(),
        )
        .unwrap();
        assert_relative_eq!(*neg.first().unwrap(), SQRT_2 * y_neg.im, epsilon = 1e-13);
    }

    #[test]
    fn test_real_sph_harm_broadcasts_arguments() {
        let (m, n) = index_list(2).unwrap();
        let m = m.insert_axis(ndarray::Axis(1)).into_dyn();
        let n = n.insert_axis(ndarray::Axis(1)).into_dyn();
        let theta = Array::linspace(0.0, 3.0, 5).into_dyn();
        let phi = Array::linspace(0.1, 3.0, 5).into_dyn();
        let samples = real_sph_harm(m.view(), n.view(), theta.view(), phi.view()).unwrap();
        assert_eq!(samples.shape(), &[6, 5]);
        // First row is the constant Y_0^0.
        for j in 0..5 {
            assert_relative_eq!(samples[[0, j]], 0.28209479177387814, epsilon = 1e-13);
        }
    }

    #[test]
    fn test_real_sph_harm_rejects_invalid_pairs() {
        let bad = real_sph_harm(
            arr0(3).into_dyn().view(),
            arr0(2).into_dyn().view(),
            arr0(0.0).into_dyn().view(),
            arr0(0.0).into_dyn().view(),
        );
        assert_eq!(bad, Err(BasisError::OrderOutOfRange { m: 3, n: 2 }));

        let bad = real_sph_harm(
            arr0(0).into_dyn().view(),
            arr0(-2).into_dyn().view(),
            arr0(0.0).into_dyn().view(),
            arr0(0.0).into_dyn().view(),
        );
        assert_eq!(bad, Err(BasisError::NegativeDegree(-2)));
    }

    #[test]
    fn test_design_matrix_matches_elementwise_sampling() {
        let theta = aview1(&[0.0, 0.7, 2.1, 4.4]);
        let phi = aview1(&[0.2, 1.0, 1.6, 2.9]);
        let matrix = design_matrix(6, theta, phi).unwrap();
        assert_eq!(matrix.shape(), &[4, num_coefficients(6)]);

        let (m_list, n_list) = index_list(6).unwrap();
        for (i, (&t, &p)) in theta.iter().zip(phi.iter()).enumerate() {
            for (j, (&m, &n)) in m_list.iter().zip(n_list.iter()).enumerate() {
                assert_relative_eq!(
                    matrix[[i, j]],
                    real_sph_harm_single(m, n, t, p),
                    epsilon = 1e-12,
                    max_relative = 1e-12
                );
            }
        }
    }

    #[test]
    fn test_design_matrix_order_zero_is_constant_column() {
        let theta = aview1(&[0.0, 1.0, 2.0]);
        let phi = aview1(&[0.5, 1.5, 2.5]);
        let matrix = design_matrix(0, theta, phi).unwrap();
        assert_eq!(matrix.shape(), &[3, 1]);
        for v in matrix.iter() {
            assert_abs_diff_eq!(*v, 0.28209479177387814, epsilon = 1e-14);
        }
    }

    #[test]
    fn test_design_matrix_rejects_mismatched_angles() {
        let err = design_matrix(2, aview1(&[0.0, 1.0]), aview1(&[0.5])).unwrap_err();
        assert_eq!(err, BasisError::DirectionCountMismatch { theta: 2, phi: 1 });
    }
}
