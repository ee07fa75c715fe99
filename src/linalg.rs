//! Small dense linear algebra for per-arm ridge regression.
//!
//! Matrices are square, row-major `Vec<f64>` of length `dim * dim`. The
//! dimensions this crate targets are small (a handful to a few tens), so
//! everything here is straightforward `O(d^2)` / `O(d^3)` loops with no
//! blocking or SIMD.

use thiserror::Error;

/// Pivots at or below this magnitude are treated as zero during inversion.
const PIVOT_EPS: f64 = 1e-12;

/// Failures of the kernel routines.
///
/// None of these escape the engine on well-formed input: a degenerate
/// Sherman–Morrison denominator triggers a full inversion, and a singular
/// matrix cannot arise from ridge-regularized state.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum LinalgError {
    /// Gauss–Jordan elimination found no usable pivot in `column`, even after row swaps.
    #[error("matrix is singular (no usable pivot in column {column})")]
    SingularMatrix { column: usize },

    /// `1 + x^T A^{-1} x` was non-positive or non-finite.
    #[error("sherman-morrison denominator is degenerate ({denom})")]
    DegenerateDenominator { denom: f64 },

    /// Operand lengths do not agree with `dim`.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// `dim x dim` identity matrix.
pub fn identity(dim: usize) -> Vec<f64> {
    let mut m = vec![0.0; dim * dim];
    for i in 0..dim {
        m[i * dim + i] = 1.0;
    }
    m
}

pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    let mut s = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        s += x * y;
    }
    s
}

/// `y = A x`.
pub fn matrix_vector(a: &[f64], dim: usize, x: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; dim];
    for (i, o) in out.iter_mut().enumerate() {
        let row = &a[i * dim..(i + 1) * dim];
        *o = dot(row, x);
    }
    out
}

/// In-place `A += x x^T`.
pub fn outer_add(a: &mut [f64], dim: usize, x: &[f64]) {
    for i in 0..dim {
        let xi = x[i];
        let row = &mut a[i * dim..(i + 1) * dim];
        for (j, v) in row.iter_mut().enumerate() {
            *v += xi * x[j];
        }
    }
}

/// Invert `A` by Gauss–Jordan elimination with partial pivoting on `[A | I]`.
///
/// Intended for the small dimensions used by the engine; not a general-purpose
/// solver.
pub fn invert(a: &[f64], dim: usize) -> Result<Vec<f64>, LinalgError> {
    if a.len() != dim * dim {
        return Err(LinalgError::DimensionMismatch {
            expected: dim * dim,
            actual: a.len(),
        });
    }
    let w = 2 * dim;
    let mut aug = vec![0.0; dim * w];
    for i in 0..dim {
        aug[i * w..i * w + dim].copy_from_slice(&a[i * dim..(i + 1) * dim]);
        aug[i * w + dim + i] = 1.0;
    }

    for col in 0..dim {
        let mut piv = col;
        let mut max_val = aug[col * w + col].abs();
        for row in (col + 1)..dim {
            let v = aug[row * w + col].abs();
            if v > max_val {
                max_val = v;
                piv = row;
            }
        }
        if !max_val.is_finite() || max_val <= PIVOT_EPS {
            return Err(LinalgError::SingularMatrix { column: col });
        }
        if piv != col {
            for j in 0..w {
                aug.swap(col * w + j, piv * w + j);
            }
        }

        let p = aug[col * w + col];
        for j in 0..w {
            aug[col * w + j] /= p;
        }
        for row in 0..dim {
            if row == col {
                continue;
            }
            let f = aug[row * w + col];
            if f == 0.0 {
                continue;
            }
            for j in 0..w {
                aug[row * w + j] -= f * aug[col * w + j];
            }
        }
    }

    let mut inv = vec![0.0; dim * dim];
    for i in 0..dim {
        inv[i * dim..(i + 1) * dim].copy_from_slice(&aug[i * w + dim..(i + 1) * w]);
    }
    Ok(inv)
}

/// Sherman–Morrison rank-one update of a cached inverse, in place.
///
/// Given `A^{-1}`, produces `(A + x x^T)^{-1}`:
///
/// ```text
/// A^{-1} <- A^{-1} - (A^{-1} x)(A^{-1} x)^T / (1 + x^T A^{-1} x)
/// ```
///
/// On `Err` the input is left untouched and the caller must fall back to a
/// full [`invert`].
pub fn rank_one_update_inverse(
    a_inv: &mut [f64],
    dim: usize,
    x: &[f64],
) -> Result<(), LinalgError> {
    let ax = matrix_vector(a_inv, dim, x);
    let denom = 1.0 + dot(x, &ax);
    if !denom.is_finite() || denom <= 0.0 {
        return Err(LinalgError::DegenerateDenominator { denom });
    }
    for i in 0..dim {
        let row = &mut a_inv[i * dim..(i + 1) * dim];
        for (j, v) in row.iter_mut().enumerate() {
            *v -= (ax[i] * ax[j]) / denom;
        }
    }
    Ok(())
}

/// Infinity norm: maximum absolute row sum.
pub fn norm_inf(m: &[f64], dim: usize) -> f64 {
    let mut best = 0.0f64;
    for i in 0..dim {
        let s: f64 = m[i * dim..(i + 1) * dim].iter().map(|v| v.abs()).sum();
        best = best.max(s);
    }
    best
}

/// Cheap condition number estimate `||A||_inf * ||A^{-1}||_inf`.
///
/// Used only as a drift trigger, not as an accurate condition number.
pub fn condition_estimate(a: &[f64], a_inv: &[f64], dim: usize) -> f64 {
    norm_inf(a, dim) * norm_inf(a_inv, dim)
}
