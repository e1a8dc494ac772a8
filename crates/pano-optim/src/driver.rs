//! Seeded optimization driver.
//!
//! A breadth-first traversal of the correspondence graph fits each newly
//! reached image against its already-optimized neighbors, which hands
//! the global refinement a starting point good enough to avoid the
//! locally-consistent-but-globally-wrong minima that plague rotation and
//! field-of-view parameters.

use std::collections::BTreeSet;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use pano_core::{
    CorrespondenceGraph, OptimizeVector, Panorama, ProgressReporter, Real, TransformOracle,
    VarName, VariableSet,
};

use crate::lm;
use crate::problem::{update_cp_errors, GeomProblem};
use crate::traits::{SolveOptions, SolveReport, StopReason};

/// Errors surfaced before or during an optimization run.
#[derive(Debug, Error)]
pub enum OptimizeError {
    /// A global pass was requested on a panorama whose correspondence
    /// graph is not connected; images in different components have no
    /// geometric relationship, so a joint fit is meaningless.
    #[error("correspondence graph has {} components: {components:?}", components.len())]
    DisconnectedGraph { components: Vec<BTreeSet<usize>> },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Outcome of one driver run.
///
/// When the global pass fails to converge the panorama is rolled back to
/// its pre-run variables; the report still carries the best-found cost
/// for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub converged: bool,
    pub final_rms: Real,
    pub iterations: usize,
    pub stop: StopReason,
}

impl OptimizationResult {
    fn from_report(report: &SolveReport, num_residuals: usize) -> Self {
        Self {
            converged: report.converged,
            final_rms: report.rms(num_residuals),
            iterations: report.iterations,
            stop: report.stop,
        }
    }
}

fn snapshot(pano: &Panorama) -> Vec<VariableSet> {
    (0..pano.num_images()).map(|i| pano.variables(i).clone()).collect()
}

fn restore(pano: &mut Panorama, vars: &[VariableSet]) {
    for (i, v) in vars.iter().enumerate() {
        pano.update_variables(i, v);
    }
}

/// Require a single connected component, or report the split.
pub fn require_connected(pano: &Panorama) -> Result<(), OptimizeError> {
    let components = CorrespondenceGraph::build(pano).connected_components();
    if components.len() > 1 {
        return Err(OptimizeError::DisconnectedGraph { components });
    }
    Ok(())
}

/// One global nonlinear refinement over the given optimize vector.
///
/// Pre-flight checks connectivity. On solver failure the panorama keeps
/// its original variables.
pub fn optimize_global<O: TransformOracle>(
    pano: &mut Panorama,
    oracle: &O,
    optvec: &OptimizeVector,
    opts: &SolveOptions,
    progress: &mut dyn ProgressReporter,
) -> Result<OptimizationResult, OptimizeError> {
    require_connected(pano)?;

    let saved = snapshot(pano);
    let problem = GeomProblem::new(pano.clone(), oracle, optvec).map_err(OptimizeError::Other)?;
    let n_free = problem.num_free();
    let m = pano.control_points().len();
    let x0 = problem.initial_params();
    let (x, report) = lm::minimize(&problem, x0, opts, progress);
    problem.write_params(&x);
    *pano = problem.into_panorama();

    if !report.converged {
        debug!("global pass failed ({:?}); rolling back", report.stop);
        restore(pano, &saved);
    }
    update_cp_errors(pano, oracle);
    info!(
        "global optimization: {n_free} parameters, {m} points, rms {:.4}, converged: {}",
        report.rms(m),
        report.converged
    );
    Ok(OptimizationResult::from_report(&report, m))
}

/// Pose variables freed for a newly discovered image during seeding.
fn seed_vars() -> BTreeSet<VarName> {
    BTreeSet::from([VarName::Yaw, VarName::Pitch, VarName::Roll])
}

/// Seed poses by BFS from the anchor: each newly reached image is
/// fitted in yaw, pitch and roll against its already-visited neighbors,
/// over the control points between them. Images the graph cannot reach
/// keep their initial poses; the root is seeded as optimized with zero
/// free variables.
pub(crate) fn seed_positions<O: TransformOracle>(
    pano: &mut Panorama,
    oracle: &O,
    opts: &SolveOptions,
    progress: &mut dyn ProgressReporter,
) -> Result<(), OptimizeError> {
    let graph = CorrespondenceGraph::build(pano);
    let n = pano.num_images();
    let mut visit_order: Vec<(usize, BTreeSet<usize>)> = Vec::new();
    graph.visit_bfs(pano.anchor(), |v, visited, _unvisited| {
        visit_order.push((v, visited.clone()));
    });

    for (step, (v, anchors)) in visit_order.iter().enumerate() {
        if progress.is_cancelled() {
            debug!("seeding cancelled at image {v}");
            break;
        }
        progress.report_progress(
            0.5 * step as f64 / n.max(1) as f64,
            &format!("seeding image {v}"),
        );
        if anchors.is_empty() {
            // BFS root: trivially optimized at its initial values.
            continue;
        }
        if anchors.iter().any(|&a| pano.pose_linked_with(*v, a)) {
            // Pose already determined through a link.
            continue;
        }

        // Local fit: v free, optimized neighbors fixed, points between
        // them only.
        let mut imgs: Vec<usize> = anchors.iter().copied().collect();
        imgs.push(*v);
        let sub = pano.subset(&imgs);
        let local_v = imgs.len() - 1;
        let mut local_optvec: OptimizeVector = vec![BTreeSet::new(); imgs.len()];
        local_optvec[local_v] = seed_vars();

        let problem = GeomProblem::new(sub.pano, oracle, &local_optvec)
            .map_err(OptimizeError::Other)?;
        let x0 = problem.initial_params();
        let (x, report) = lm::minimize(&problem, x0, opts, progress);
        problem.write_params(&x);
        let fitted = problem.into_panorama();
        pano.update_variables(*v, fitted.variables(local_v));
        debug!(
            "seeded image {v} against {:?}: rms {:.4}, converged: {}",
            anchors,
            report.rms(fitted.control_points().len()),
            report.converged
        );
    }
    Ok(())
}

/// Seeded optimization: BFS over the correspondence graph from the
/// anchor image, fitting each newly reached image against its
/// already-optimized neighbors, then one global pass over `optvec`.
pub fn auto_optimize<O: TransformOracle>(
    pano: &mut Panorama,
    oracle: &O,
    optvec: &OptimizeVector,
    opts: &SolveOptions,
    progress: &mut dyn ProgressReporter,
) -> Result<OptimizationResult, OptimizeError> {
    require_connected(pano)?;
    seed_positions(pano, oracle, opts, progress)?;
    progress.report_progress(0.5, "global refinement");
    optimize_global(pano, oracle, optvec, opts, progress)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pano_core::test_utils::{pano_from_poses, synth_control_points, RectilinearOracle};
    use pano_core::NoProgress;

    fn pose_vars(n: usize, anchor: usize) -> OptimizeVector {
        (0..n)
            .map(|i| if i == anchor { BTreeSet::new() } else { seed_vars() })
            .collect()
    }

    #[test]
    fn global_fit_on_disconnected_pairs_is_refused() {
        // A-B and C-D with no cross edges.
        let mut pano = pano_from_poses(
            400,
            300,
            60.0,
            &[(0.0, 0.0, 0.0), (20.0, 0.0, 0.0), (90.0, 0.0, 0.0), (110.0, 0.0, 0.0)],
        );
        let oracle = RectilinearOracle;
        synth_control_points(&mut pano, &oracle, 0, 1, 3);
        synth_control_points(&mut pano, &oracle, 2, 3, 3);

        let optvec = pose_vars(4, 0);
        let err = optimize_global(
            &mut pano,
            &oracle,
            &optvec,
            &SolveOptions::default(),
            &mut NoProgress,
        )
        .unwrap_err();
        match err {
            OptimizeError::DisconnectedGraph { components } => {
                assert_eq!(components.len(), 2);
                assert_eq!(components[0], BTreeSet::from([0, 1]));
                assert_eq!(components[1], BTreeSet::from([2, 3]));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn failed_global_pass_rolls_back_variables() {
        // A single pair with one inconsistent point cannot converge to
        // zero, but still converges; force failure instead with a
        // cancelled run after zero iterations.
        struct CancelImmediately;
        impl ProgressReporter for CancelImmediately {
            fn report_progress(&mut self, _f: f64, _m: &str) {}
            fn is_cancelled(&self) -> bool {
                true
            }
        }

        let mut pano = pano_from_poses(400, 300, 60.0, &[(0.0, 0.0, 0.0), (20.0, 0.0, 0.0)]);
        let oracle = RectilinearOracle;
        synth_control_points(&mut pano, &oracle, 0, 1, 3);
        pano.set_value(1, VarName::Yaw, 5.0);

        let before = pano.value(1, VarName::Yaw);
        let result = optimize_global(
            &mut pano,
            &oracle,
            &pose_vars(2, 0),
            &SolveOptions::default(),
            &mut CancelImmediately,
        )
        .unwrap();
        assert!(!result.converged);
        assert_eq!(result.stop, StopReason::Cancelled);
        assert_eq!(pano.value(1, VarName::Yaw), before);
    }
}
