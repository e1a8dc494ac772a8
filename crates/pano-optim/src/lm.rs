//! Damped Gauss-Newton (Levenberg-Marquardt) minimization.
//!
//! The damping factor adapts per iteration: a step that reduces the
//! total squared residual lowers it, a rejected step raises it and the
//! step is recomputed. Cancellation is checked between iterations and
//! always returns the best parameters found so far.

use log::debug;
use nalgebra::DVector;
use pano_core::{ProgressReporter, Real};

use crate::traits::{NllsProblem, SolveOptions, SolveReport, StopReason};

/// Minimize `problem` starting from `x0`.
///
/// Returns the best parameter vector found and a report. A singular
/// normal-equation system fails the run immediately rather than guessing
/// a pseudo-solution.
pub fn minimize<P: NllsProblem>(
    problem: &P,
    x0: DVector<Real>,
    opts: &SolveOptions,
    progress: &mut dyn ProgressReporter,
) -> (DVector<Real>, SolveReport) {
    let n = x0.len();
    let mut x = x0;
    let mut r = problem.residuals(&x);
    let mut cost = 0.5 * r.norm_squared();
    let mut lambda = opts.initial_lambda;

    let finish = |x: DVector<Real>, iterations, cost, stop| {
        let converged = stop == StopReason::Converged;
        (
            x,
            SolveReport {
                converged,
                iterations,
                final_cost: cost,
                stop,
            },
        )
    };

    if n == 0 {
        return finish(x, 0, cost, StopReason::Converged);
    }

    for iter in 1..=opts.max_iterations {
        if progress.is_cancelled() {
            debug!("solver cancelled after {} iterations", iter - 1);
            return finish(x, iter - 1, cost, StopReason::Cancelled);
        }
        progress.report_progress(
            iter as f64 / opts.max_iterations as f64,
            &format!("iteration {iter}, cost {cost:.6e}"),
        );

        let j = problem.jacobian(&x);
        let jtj = j.transpose() * &j;
        let gradient = j.transpose() * &r;

        if gradient.amax() <= opts.gtol {
            return finish(x, iter, cost, StopReason::Converged);
        }
        // A parameter no residual depends on makes the normal equations
        // singular no matter the damping.
        if (0..n).any(|i| jtj[(i, i)] == 0.0) {
            debug!("normal equations singular at iteration {iter}");
            return finish(x, iter, cost, StopReason::SingularSystem);
        }

        loop {
            let mut a = jtj.clone();
            for i in 0..n {
                a[(i, i)] += lambda * jtj[(i, i)];
            }
            let step = match a.cholesky() {
                Some(chol) => chol.solve(&gradient),
                None => {
                    debug!("cholesky failed at iteration {iter}");
                    return finish(x, iter, cost, StopReason::SingularSystem);
                }
            };

            let x_new = &x - &step;
            let r_new = problem.residuals(&x_new);
            let cost_new = 0.5 * r_new.norm_squared();

            if cost_new < cost {
                lambda = (lambda / opts.lambda_factor).max(1e-12);
                let reduction = cost - cost_new;
                let step_norm = step.norm();
                x = x_new;
                r = r_new;
                cost = cost_new;
                if reduction <= opts.ftol * cost.max(opts.ftol)
                    || step_norm <= opts.xtol * (x.norm() + opts.xtol)
                {
                    return finish(x, iter, cost, StopReason::Converged);
                }
                break;
            }

            lambda *= opts.lambda_factor;
            if lambda > opts.max_lambda {
                debug!("damping exceeded ceiling at iteration {iter}, cost {cost:.6e}");
                return finish(x, iter, cost, StopReason::Stalled);
            }
        }
    }

    finish(x, opts.max_iterations, cost, StopReason::MaxIterations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DVector;
    use pano_core::NoProgress;

    /// r(x) = [x0 - 3, 10 (x1 - x0^2)] -- a small Rosenbrock-style bowl.
    struct Bowl;

    impl NllsProblem for Bowl {
        fn num_params(&self) -> usize {
            2
        }
        fn num_residuals(&self) -> usize {
            2
        }
        fn residuals(&self, x: &DVector<Real>) -> DVector<Real> {
            DVector::from_vec(vec![x[0] - 3.0, 10.0 * (x[1] - x[0] * x[0])])
        }
    }

    /// Second parameter never appears in the residual.
    struct Underdetermined;

    impl NllsProblem for Underdetermined {
        fn num_params(&self) -> usize {
            2
        }
        fn num_residuals(&self) -> usize {
            1
        }
        fn residuals(&self, x: &DVector<Real>) -> DVector<Real> {
            DVector::from_vec(vec![x[0] - 1.0])
        }
    }

    struct CancelAfter(std::cell::Cell<usize>);

    impl ProgressReporter for CancelAfter {
        fn report_progress(&mut self, _fraction: f64, _message: &str) {}
        fn is_cancelled(&self) -> bool {
            let left = self.0.get();
            if left == 0 {
                true
            } else {
                self.0.set(left - 1);
                false
            }
        }
    }

    #[test]
    fn converges_on_smooth_problem() {
        let (x, report) = minimize(
            &Bowl,
            DVector::from_vec(vec![-1.0, 1.0]),
            &SolveOptions::default(),
            &mut NoProgress,
        );
        assert!(report.converged, "no convergence: {report:?}");
        assert!((x[0] - 3.0).abs() < 1e-6, "x0 = {}", x[0]);
        assert!((x[1] - 9.0).abs() < 1e-4, "x1 = {}", x[1]);
    }

    #[test]
    fn singular_system_fails_immediately() {
        let (_, report) = minimize(
            &Underdetermined,
            DVector::from_vec(vec![0.0, 0.0]),
            &SolveOptions::default(),
            &mut NoProgress,
        );
        assert!(!report.converged);
        assert_eq!(report.stop, StopReason::SingularSystem);
        assert_eq!(report.iterations, 1);
    }

    #[test]
    fn cancellation_returns_best_so_far() {
        let mut progress = CancelAfter(std::cell::Cell::new(2));
        let (x, report) = minimize(
            &Bowl,
            DVector::from_vec(vec![-1.0, 1.0]),
            &SolveOptions::default(),
            &mut progress,
        );
        assert!(!report.converged);
        assert_eq!(report.stop, StopReason::Cancelled);
        // Two accepted iterations must not have made things worse.
        let start_cost = 0.5 * Bowl.residuals(&DVector::from_vec(vec![-1.0, 1.0])).norm_squared();
        assert!(report.final_cost <= start_cost);
        assert_eq!(x.len(), 2);
    }

    #[test]
    fn empty_parameter_vector_is_trivially_converged() {
        struct NoParams;
        impl NllsProblem for NoParams {
            fn num_params(&self) -> usize {
                0
            }
            fn num_residuals(&self) -> usize {
                1
            }
            fn residuals(&self, _x: &DVector<Real>) -> DVector<Real> {
                DVector::from_vec(vec![2.0])
            }
        }
        let (_, report) = minimize(
            &NoParams,
            DVector::zeros(0),
            &SolveOptions::default(),
            &mut NoProgress,
        );
        assert!(report.converged);
    }
}
