//! Core nonlinear least-squares abstractions.
//!
//! The optimizer flavors in this crate differ only in how they map a
//! parameter vector to residuals, so the solver is written against this
//! trait rather than a concrete problem type.

use nalgebra::{DMatrix, DVector};
use pano_core::Real;
use serde::{Deserialize, Serialize};

/// Generic nonlinear least squares problem with dense parameter and
/// residual vectors.
pub trait NllsProblem {
    /// Number of free parameters.
    fn num_params(&self) -> usize;
    /// Number of residual rows.
    fn num_residuals(&self) -> usize;

    /// Residual vector at `x`.
    fn residuals(&self, x: &DVector<Real>) -> DVector<Real>;

    /// Jacobian at `x`. The default implementation uses forward
    /// differences with a per-parameter relative step.
    fn jacobian(&self, x: &DVector<Real>) -> DMatrix<Real> {
        let m = self.num_residuals();
        let n = self.num_params();
        let r0 = self.residuals(x);
        let mut j = DMatrix::zeros(m, n);
        let mut xp = x.clone();
        for col in 0..n {
            let h = 1e-6 * (1.0 + x[col].abs());
            xp[col] = x[col] + h;
            let r1 = self.residuals(&xp);
            xp[col] = x[col];
            for row in 0..m {
                j[(row, col)] = (r1[row] - r0[row]) / h;
            }
        }
        j
    }
}

/// Options for one solver run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SolveOptions {
    /// Iteration cap for the outer loop.
    pub max_iterations: usize,
    /// Relative tolerance on cost reduction between accepted steps.
    pub ftol: Real,
    /// Tolerance on the parameter update norm.
    pub xtol: Real,
    /// Tolerance on the gradient infinity norm.
    pub gtol: Real,
    /// Initial damping factor.
    pub initial_lambda: Real,
    /// Multiplicative factor applied to the damping on accepted or
    /// rejected steps.
    pub lambda_factor: Real,
    /// Damping ceiling; exceeding it ends the run without convergence.
    pub max_lambda: Real,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            ftol: 1e-10,
            xtol: 1e-12,
            gtol: 1e-12,
            initial_lambda: 1e-3,
            lambda_factor: 10.0,
            max_lambda: 1e7,
        }
    }
}

/// Why the solver stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// A convergence tolerance was met.
    Converged,
    /// The iteration cap was reached first.
    MaxIterations,
    /// The normal-equation system was singular; no step could be taken.
    SingularSystem,
    /// The damping factor exceeded its ceiling without finding a
    /// cost-reducing step.
    Stalled,
    /// Cancellation was requested through the progress channel.
    Cancelled,
}

/// Outcome of one solver run. On failure the returned parameters are the
/// best found so far; whether to accept or roll back is the caller's
/// decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolveReport {
    pub converged: bool,
    pub iterations: usize,
    pub final_cost: Real,
    pub stop: StopReason,
}

impl SolveReport {
    /// Root-mean-square residual corresponding to `final_cost` for a
    /// problem with `num_residuals` rows.
    pub fn rms(&self, num_residuals: usize) -> Real {
        if num_residuals == 0 {
            0.0
        } else {
            (2.0 * self.final_cost / num_residuals as Real).sqrt()
        }
    }
}
