//! Legendre and spherical-harmonic primitives.
//!
//! The basis and model layers consume three classical special functions: the
//! Legendre polynomials `P_n(x)` (the Funk-Radon transform needs them at
//! `x = 0`), the associated Legendre functions `P_n^m(x)` with the
//! Condon-Shortley phase, and the complex spherical harmonic `Y_n^m(θ, φ)`.
//!
//! All three follow the standard stable recurrences. `sph_harm` uses the
//! physics convention with `θ` azimuthal in `[0, 2π)` and `φ` polar in
//! `[0, π]`, so that
//!
//! ```text
//! Y_n^m(θ, φ) = √((2n+1)/(4π) · (n−m)!/(n+m)!) · P_n^m(cos φ) · e^{imθ}
//! ```
//!
//! and `Y_n^{−m} = (−1)^m · conj(Y_n^m)` extends it to negative orders.

use num_complex::Complex64;
use std::f64::consts::PI;

/// Values of the Legendre polynomials `P_0(x) ..= P_n_max(x)`.
///
/// Three-term recurrence `(n+1) P_{n+1} = (2n+1) x P_n − n P_{n−1}`,
/// numerically stable for all `x` in `[−1, 1]`.
pub fn legendre_polynomials(n_max: usize, x: f64) -> Vec<f64> {
    let mut values = Vec::with_capacity(n_max + 1);
    values.push(1.0);
    if n_max == 0 {
        return values;
    }
    values.push(x);
    for n in 1..n_max {
        let next = ((2 * n + 1) as f64 * x * values[n] - n as f64 * values[n - 1])
            / (n + 1) as f64;
        values.push(next);
    }
    values
}

/// Associated Legendre function `P_n^m(x)` for `0 ≤ m ≤ n`, Condon-Shortley
/// phase included (`P_1^1(x) = −√(1−x²)`).
///
/// Ascends the diagonal to `P_m^m`, then upward in degree. Only valid for
/// `x` in `[−1, 1]`; callers are expected to pass a cosine.
pub fn associated_legendre(n: usize, m: usize, x: f64) -> f64 {
    debug_assert!(m <= n, "P_n^m requires m <= n");
    let somx2 = ((1.0 - x) * (1.0 + x)).max(0.0).sqrt();
    let mut pmm = 1.0;
    let mut fact = 1.0;
    for _ in 0..m {
        pmm *= -fact * somx2;
        fact += 2.0;
    }
    if n == m {
        return pmm;
    }
    let mut pmm1 = x * (2 * m + 1) as f64 * pmm;
    if n == m + 1 {
        return pmm1;
    }
    let mut pnm = 0.0;
    for degree in (m + 2)..=n {
        pnm = ((2 * degree - 1) as f64 * x * pmm1 - (degree + m - 1) as f64 * pmm)
            / (degree - m) as f64;
        pmm = pmm1;
        pmm1 = pnm;
    }
    pnm
}

/// Triangular index of `P_n^m` inside a table produced by
/// [`associated_legendre_table`].
#[inline]
pub(crate) fn tri(n: usize, m: usize) -> usize {
    n * (n + 1) / 2 + m
}

/// All `P_n^m(x)` for `0 ≤ m ≤ n ≤ l_max` in one sweep, laid out
/// triangularly (index via [`tri`]).
///
/// One basis-matrix row needs every `(m, n)` pair at a single polar angle;
/// sweeping the whole triangle costs the same as the largest single entry.
pub(crate) fn associated_legendre_table(l_max: usize, x: f64) -> Vec<f64> {
    let mut table = vec![0.0; tri(l_max, l_max) + 1];
    let somx2 = ((1.0 - x) * (1.0 + x)).max(0.0).sqrt();
    let mut pmm = 1.0;
    let mut fact = 1.0;
    for m in 0..=l_max {
        table[tri(m, m)] = pmm;
        if m < l_max {
            let mut prev = pmm;
            let mut cur = x * (2 * m + 1) as f64 * pmm;
            table[tri(m + 1, m)] = cur;
            for n in (m + 2)..=l_max {
                let next = ((2 * n - 1) as f64 * x * cur - (n + m - 1) as f64 * prev)
                    / (n - m) as f64;
                prev = cur;
                cur = next;
                table[tri(n, m)] = cur;
            }
            pmm *= -fact * somx2;
            fact += 2.0;
        }
    }
    table
}

/// Orthonormalization constant `√((2n+1)/(4π) · (n−m)!/(n+m)!)` for
/// `0 ≤ m ≤ n`.
///
/// The factorial ratio is accumulated as a running product so high degrees
/// never touch an intermediate factorial.
pub(crate) fn sh_normalization(n: usize, m: usize) -> f64 {
    let mut ratio = 1.0;
    for j in (n - m + 1)..=(n + m) {
        ratio /= j as f64;
    }
    ((2 * n + 1) as f64 / (4.0 * PI) * ratio).sqrt()
}

/// Complex spherical harmonic `Y_n^m(θ, φ)` for any `|m| ≤ n`.
///
/// `θ` is the azimuthal coordinate in `[0, 2π)`, `φ` the polar coordinate in
/// `[0, π]` (scipy's `sph_harm` argument order).
pub fn sph_harm(m: i32, n: i32, theta: f64, phi: f64) -> Complex64 {
    debug_assert!(n >= 0 && m.unsigned_abs() as i32 <= n, "Y_n^m requires |m| <= n");
    let a = m.unsigned_abs() as usize;
    let degree = n as usize;
    let scale = sh_normalization(degree, a) * associated_legendre(degree, a, phi.cos());
    let (sin_ma, cos_ma) = (a as f64 * theta).sin_cos();
    let y = Complex64::new(scale * cos_ma, scale * sin_ma);
    if m >= 0 {
        y
    } else if a % 2 == 0 {
        y.conj()
    } else {
        -y.conj()
    }
}
