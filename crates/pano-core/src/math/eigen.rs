//! Symmetric eigenvalue decomposition via cyclic Jacobi rotations.
//!
//! Used by the leveling solver to extract the dominant "up" direction
//! from an orientation covariance matrix. The algorithm repeatedly
//! applies plane rotations that zero out off-diagonal entries, tracking
//! the sum of squared off-diagonal elements as the convergence metric.
//!
//! Feeding a non-symmetric matrix is a contract violation: the sweep
//! monotonicity check will detect the resulting divergence and panic.

use nalgebra::DMatrix;

use super::Real;

/// Result of a symmetric eigendecomposition.
///
/// `vectors` holds one eigenvector per column, paired with `values` at
/// the same index. `order` is a permutation sorting eigenvalues into
/// descending order, i.e. `values[order[0]]` is the largest.
#[derive(Debug, Clone)]
pub struct EigenDecomposition {
    pub values: Vec<Real>,
    pub vectors: DMatrix<Real>,
    pub order: Vec<usize>,
    /// Number of sweeps actually performed.
    pub sweeps: usize,
    /// Remaining sum of squared off-diagonal entries.
    pub offdiag: Real,
}

impl EigenDecomposition {
    /// Index of the largest eigenvalue.
    pub fn largest(&self) -> usize {
        self.order[0]
    }

    /// Index of the smallest eigenvalue.
    pub fn smallest(&self) -> usize {
        self.order[self.order.len() - 1]
    }
}

fn offdiag_energy(a: &DMatrix<Real>) -> Real {
    let n = a.nrows();
    let mut sum = 0.0;
    for k in 0..n {
        for l in (k + 1)..n {
            sum += a[(k, l)] * a[(k, l)];
        }
    }
    sum
}

/// Jacobi eigendecomposition of a symmetric matrix.
///
/// Sweeps terminate once the off-diagonal energy falls below
/// `epsilon * initial_energy / n` or after `max_sweeps` sweeps.
///
/// # Panics
///
/// Panics if the matrix is not square and symmetric, or if the
/// off-diagonal energy increases between sweeps (a symptom of malformed
/// input, not a recoverable runtime condition).
pub fn eig_jacobi(matrix: &DMatrix<Real>, max_sweeps: usize, epsilon: Real) -> EigenDecomposition {
    let n = matrix.nrows();
    assert!(n > 0, "eig_jacobi: empty matrix");
    assert_eq!(n, matrix.ncols(), "eig_jacobi: matrix must be square");
    for k in 0..n {
        for l in (k + 1)..n {
            assert!(
                (matrix[(k, l)] - matrix[(l, k)]).abs() <= 1e-9 * (1.0 + matrix[(k, l)].abs()),
                "eig_jacobi: matrix is not symmetric at ({}, {})",
                k,
                l
            );
        }
    }

    let mut a = matrix.clone_owned();
    let mut v = DMatrix::<Real>::identity(n, n);
    let mut d: Vec<Real> = (0..n).map(|i| a[(i, i)]).collect();

    // Convergence is tracked against the initial off-diagonal energy.
    let mu1 = offdiag_energy(&a).sqrt() / n as Real;
    let mut mu2 = mu1;
    let mut sweeps = 0;

    if mu1 > 0.0 {
        for sweep in 1..=max_sweeps {
            sweeps = sweep;
            for p in 0..n {
                for q in (p + 1)..n {
                    if a[(p, q)].abs() <= mu2 {
                        continue;
                    }
                    // Plane rotation that annihilates a[(p, q)].
                    let alpha = 0.5 * (d[p] - d[q]);
                    let beta = (a[(p, q)] * a[(p, q)] + alpha * alpha).sqrt();
                    let c = (0.5 + alpha.abs() / (2.0 * beta)).sqrt();
                    let s = if alpha == 0.0 {
                        c
                    } else {
                        -(alpha * a[(p, q)]) / (2.0 * beta * alpha.abs() * c)
                    };

                    let pp = d[p];
                    let pq = a[(p, q)];
                    let qq = d[q];
                    d[p] = c * c * pp + s * s * qq - 2.0 * s * c * pq;
                    d[q] = s * s * pp + c * c * qq + 2.0 * s * c * pq;
                    a[(p, q)] = (c * c - s * s) * pq + s * c * (pp - qq);

                    for k in 0..p {
                        let t1 = a[(k, p)];
                        let t2 = a[(k, q)];
                        a[(k, p)] = c * t1 - s * t2;
                        a[(k, q)] = c * t2 + s * t1;
                    }
                    for k in (p + 1)..q {
                        let t1 = a[(p, k)];
                        let t2 = a[(k, q)];
                        a[(p, k)] = c * t1 - s * t2;
                        a[(k, q)] = c * t2 + s * t1;
                    }
                    for k in (q + 1)..n {
                        let t1 = a[(p, k)];
                        let t2 = a[(q, k)];
                        a[(p, k)] = c * t1 - s * t2;
                        a[(q, k)] = c * t2 + s * t1;
                    }
                    for k in 0..n {
                        let t1 = v[(k, p)];
                        let t2 = v[(k, q)];
                        v[(k, p)] = c * t1 - s * t2;
                        v[(k, q)] = s * t1 + c * t2;
                    }
                }
            }

            let mu3 = offdiag_energy(&a).sqrt() / n as Real;
            assert!(
                mu2 >= mu3,
                "eig_jacobi: off-diagonal energy increased ({} -> {}); input matrix is malformed",
                mu2,
                mu3
            );
            mu2 = mu3;
            if mu2 <= epsilon * mu1 {
                break;
            }
        }
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| d[j].partial_cmp(&d[i]).unwrap());

    EigenDecomposition {
        values: d,
        vectors: v,
        order,
        sweeps,
        offdiag: offdiag_energy(&a),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn reconstruct(e: &EigenDecomposition) -> DMatrix<Real> {
        let d = DMatrix::from_diagonal(&nalgebra::DVector::from_vec(e.values.clone()));
        &e.vectors * d * e.vectors.transpose()
    }

    #[test]
    fn reconstructs_symmetric_matrix() {
        let m = DMatrix::from_row_slice(3, 3, &[4.0, 1.2, -0.5, 1.2, 3.0, 0.8, -0.5, 0.8, 2.0]);
        let e = eig_jacobi(&m, 100, 1e-15);
        let r = reconstruct(&e);
        for i in 0..3 {
            for j in 0..3 {
                assert_relative_eq!(m[(i, j)], r[(i, j)], epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn sorts_eigenvalues_descending() {
        let m = DMatrix::from_row_slice(3, 3, &[1.0, 0.0, 0.0, 0.0, 5.0, 0.0, 0.0, 0.0, 3.0]);
        let e = eig_jacobi(&m, 100, 1e-15);
        assert_relative_eq!(e.values[e.largest()], 5.0, epsilon = 1e-12);
        assert_relative_eq!(e.values[e.smallest()], 1.0, epsilon = 1e-12);
        let sorted: Vec<Real> = e.order.iter().map(|&i| e.values[i]).collect();
        assert!(sorted.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn diagonal_matrix_needs_no_sweeps() {
        let m = DMatrix::from_row_slice(2, 2, &[2.0, 0.0, 0.0, 7.0]);
        let e = eig_jacobi(&m, 100, 1e-15);
        assert_eq!(e.sweeps, 0);
        assert_relative_eq!(e.values[e.largest()], 7.0, epsilon = 1e-12);
    }

    #[test]
    #[should_panic(expected = "not symmetric")]
    fn rejects_non_symmetric_input() {
        let m = DMatrix::from_row_slice(3, 3, &[1.0, 2.0, 0.0, -2.0, 1.0, 0.0, 0.0, 0.0, 1.0]);
        eig_jacobi(&m, 100, 1e-15);
    }
}
