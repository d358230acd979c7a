use serde::{Deserialize, Serialize};

use crate::error::RegistrationError;

/// Eigenvalues and eigenvectors of a symmetric 4x4 matrix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SymmetricEigen {
    /// The eigenvalues, in no particular order.
    pub eigenvalues: [f64; 4],
    /// Unit eigenvectors stored as columns: column `j` pairs with `eigenvalues[j]`.
    pub eigenvectors: [[f64; 4]; 4],
}

impl SymmetricEigen {
    /// Eigenvector `j` as an array.
    pub fn eigenvector(&self, j: usize) -> [f64; 4] {
        [
            self.eigenvectors[0][j],
            self.eigenvectors[1][j],
            self.eigenvectors[2][j],
            self.eigenvectors[3][j],
        ]
    }

    /// The largest eigenvalue and its eigenvector.
    ///
    /// When eigenvalues tie, the first in storage order is returned.
    pub fn dominant(&self) -> (f64, [f64; 4]) {
        let mut best = 0;
        for j in 1..4 {
            if self.eigenvalues[j] > self.eigenvalues[best] {
                best = j;
            }
        }
        (self.eigenvalues[best], self.eigenvector(best))
    }
}

/// Solves the eigenproblem of a symmetric 4x4 matrix.
pub trait SymmetricEigenSolver {
    /// Decompose `m`, which is assumed symmetric; only its lower triangle may be read.
    fn solve(&self, m: &[[f64; 4]; 4]) -> Result<SymmetricEigen, RegistrationError>;
}

fn check_finite(m: &[[f64; 4]; 4]) -> Result<(), RegistrationError> {
    if m.iter().flatten().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(RegistrationError::NonFiniteInput)
    }
}

/// Eigen solver backed by `faer`'s self-adjoint decomposition.
#[derive(Debug, Clone, Copy, Default)]
pub struct FaerEigenSolver;

impl SymmetricEigenSolver for FaerEigenSolver {
    fn solve(&self, m: &[[f64; 4]; 4]) -> Result<SymmetricEigen, RegistrationError> {
        check_finite(m)?;

        let mat = faer::Mat::<f64>::from_fn(4, 4, |i, j| m[i][j]);
        let evd = mat.selfadjoint_eigendecomposition(faer::Side::Lower);
        let s = evd.s().column_vector();
        let u = evd.u();

        let mut eigen = SymmetricEigen {
            eigenvalues: [0.0; 4],
            eigenvectors: [[0.0; 4]; 4],
        };
        for j in 0..4 {
            eigen.eigenvalues[j] = s[j];
            let col = u.col(j);
            for i in 0..4 {
                eigen.eigenvectors[i][j] = col[i];
            }
        }

        if eigen.eigenvalues.iter().any(|v| !v.is_finite()) {
            return Err(RegistrationError::EigenDecompositionFailed);
        }
        Ok(eigen)
    }
}

/// Cyclic Jacobi eigen solver.
///
/// Sweeps over the off-diagonal entries, annihilating each with a plane
/// rotation, until their squared sum falls below `tolerance` times the
/// squared norm of the matrix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JacobiEigenSolver {
    /// Maximum number of full sweeps.
    pub max_sweeps: usize,
    /// Threshold on the squared off-diagonal mass relative to the squared norm.
    pub tolerance: f64,
}

impl Default for JacobiEigenSolver {
    fn default() -> Self {
        Self {
            max_sweeps: 50,
            tolerance: 1e-26,
        }
    }
}

fn off_diagonal_sq(a: &[[f64; 4]; 4]) -> f64 {
    let mut sum = 0.0;
    for (p, row) in a.iter().enumerate() {
        for (q, v) in row.iter().enumerate() {
            if p != q {
                sum += v * v;
            }
        }
    }
    sum
}

impl SymmetricEigenSolver for JacobiEigenSolver {
    fn solve(&self, m: &[[f64; 4]; 4]) -> Result<SymmetricEigen, RegistrationError> {
        check_finite(m)?;

        // symmetrize from the lower triangle
        let mut a = [[0.0; 4]; 4];
        for i in 0..4 {
            for j in 0..=i {
                a[i][j] = m[i][j];
                a[j][i] = m[i][j];
            }
        }
        let mut v = [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ];

        let norm_sq = a.iter().flatten().map(|x| x * x).sum::<f64>();
        let threshold = self.tolerance * norm_sq;

        let mut converged = off_diagonal_sq(&a) <= threshold;
        let mut sweep = 0;
        while !converged && sweep < self.max_sweeps {
            for p in 0..3 {
                for q in (p + 1)..4 {
                    let apq = a[p][q];
                    if apq == 0.0 {
                        continue;
                    }

                    let theta = (a[q][q] - a[p][p]) / (2.0 * apq);
                    let sign = if theta >= 0.0 { 1.0 } else { -1.0 };
                    let t = sign / (theta.abs() + (theta * theta + 1.0).sqrt());
                    let c = 1.0 / (t * t + 1.0).sqrt();
                    let s = t * c;

                    // A <- A J
                    for row in a.iter_mut() {
                        let (akp, akq) = (row[p], row[q]);
                        row[p] = c * akp - s * akq;
                        row[q] = s * akp + c * akq;
                    }
                    // A <- J^T A
                    for k in 0..4 {
                        let (apk, aqk) = (a[p][k], a[q][k]);
                        a[p][k] = c * apk - s * aqk;
                        a[q][k] = s * apk + c * aqk;
                    }
                    // V <- V J
                    for row in v.iter_mut() {
                        let (vkp, vkq) = (row[p], row[q]);
                        row[p] = c * vkp - s * vkq;
                        row[q] = s * vkp + c * vkq;
                    }
                }
            }
            sweep += 1;
            converged = off_diagonal_sq(&a) <= threshold;
        }

        if !converged {
            log::warn!("jacobi did not converge after {} sweeps", self.max_sweeps);
            return Err(RegistrationError::EigenDecompositionFailed);
        }

        Ok(SymmetricEigen {
            eigenvalues: [a[0][0], a[1][1], a[2][2], a[3][3]],
            eigenvectors: v,
        })
    }
}
