//! Small numerical routines shared across pipeline stages
//!
//! The matrices here are tiny (tens of samples, a handful of model
//! coefficients), so dense textbook algorithms on `ndarray` types are
//! used instead of pulling in a LAPACK binding.

use ndarray::{Array1, Array2};

/// qnorm(0.975), used when matching an upper quantile to a prior variance
pub const QNORM_0975: f64 = 1.959963984540054;

/// Median of a slice; the slice is sorted in place.
pub fn median_in_place(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = values.len();
    if n % 2 == 0 {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    } else {
        values[n / 2]
    }
}

/// Quantile by linear interpolation between order statistics
/// (R's default type=7). The slice is sorted in place.
pub fn quantile_in_place(values: &mut [f64], prob: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = values.len();
    if n == 1 {
        return values[0];
    }
    let pos = prob.clamp(0.0, 1.0) * (n - 1) as f64;
    let low = pos.floor() as usize;
    let high = pos.ceil() as usize;
    let frac = pos - low as f64;
    values[low] * (1.0 - frac) + values[high] * frac
}

/// Solve `A x = b` for a symmetric positive-definite system via Gaussian
/// elimination with partial pivoting. `a` is row-major `n`x`n`.
pub fn solve_symmetric_system(a: &[f64], b: &[f64], n: usize) -> Vec<f64> {
    let mut m = a.to_vec();
    let mut rhs = b.to_vec();

    for col in 0..n {
        // Partial pivot
        let mut pivot_row = col;
        let mut pivot_val = m[col * n + col].abs();
        for row in (col + 1)..n {
            let v = m[row * n + col].abs();
            if v > pivot_val {
                pivot_val = v;
                pivot_row = row;
            }
        }
        if pivot_val < 1e-12 {
            return vec![f64::NAN; n];
        }
        if pivot_row != col {
            for k in 0..n {
                m.swap(col * n + k, pivot_row * n + k);
            }
            rhs.swap(col, pivot_row);
        }

        for row in (col + 1)..n {
            let factor = m[row * n + col] / m[col * n + col];
            for k in col..n {
                m[row * n + k] -= factor * m[col * n + k];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    // Back substitution
    let mut x = vec![0.0; n];
    for col in (0..n).rev() {
        let mut sum = rhs[col];
        for k in (col + 1)..n {
            sum -= m[col * n + k] * x[k];
        }
        x[col] = sum / m[col * n + col];
    }
    x
}

/// Invert a symmetric positive-definite matrix column by column.
/// Returns `None` when the system is singular.
pub fn invert_symmetric(a: &[f64], n: usize) -> Option<Vec<f64>> {
    let mut inv = vec![0.0; n * n];
    for j in 0..n {
        let mut e = vec![0.0; n];
        e[j] = 1.0;
        let col = solve_symmetric_system(a, &e, n);
        if col.iter().any(|v| !v.is_finite()) {
            return None;
        }
        for i in 0..n {
            inv[i * n + j] = col[i];
        }
    }
    Some(inv)
}

/// Eigendecomposition of a symmetric matrix by cyclic Jacobi rotations.
///
/// Returns eigenvalues and the matching eigenvectors (as columns),
/// sorted by descending eigenvalue. Adequate for the sample-by-sample
/// covariance matrices this pipeline diagonalizes.
pub fn jacobi_eigen(sym: &Array2<f64>) -> (Array1<f64>, Array2<f64>) {
    let n = sym.nrows();
    debug_assert_eq!(n, sym.ncols());

    let mut a = sym.to_owned();
    let mut v = Array2::<f64>::eye(n);

    const MAX_SWEEPS: usize = 100;
    for _ in 0..MAX_SWEEPS {
        // Off-diagonal Frobenius norm
        let mut off = 0.0;
        for i in 0..n {
            for j in (i + 1)..n {
                off += a[[i, j]] * a[[i, j]];
            }
        }
        if off.sqrt() < 1e-12 {
            break;
        }

        for p in 0..n {
            for q in (p + 1)..n {
                if a[[p, q]].abs() < 1e-15 {
                    continue;
                }
                let theta = (a[[q, q]] - a[[p, p]]) / (2.0 * a[[p, q]]);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                for k in 0..n {
                    let akp = a[[k, p]];
                    let akq = a[[k, q]];
                    a[[k, p]] = c * akp - s * akq;
                    a[[k, q]] = s * akp + c * akq;
                }
                for k in 0..n {
                    let apk = a[[p, k]];
                    let aqk = a[[q, k]];
                    a[[p, k]] = c * apk - s * aqk;
                    a[[q, k]] = s * apk + c * aqk;
                }
                for k in 0..n {
                    let vkp = v[[k, p]];
                    let vkq = v[[k, q]];
                    v[[k, p]] = c * vkp - s * vkq;
                    v[[k, q]] = s * vkp + c * vkq;
                }
            }
        }
    }

    // Sort by descending eigenvalue
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| {
        a[[j, j]]
            .partial_cmp(&a[[i, i]])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut eigenvalues = Array1::zeros(n);
    let mut eigenvectors = Array2::zeros((n, n));
    for (dst, &src) in order.iter().enumerate() {
        eigenvalues[dst] = a[[src, src]];
        for k in 0..n {
            eigenvectors[[k, dst]] = v[[k, src]];
        }
    }
    (eigenvalues, eigenvectors)
}
