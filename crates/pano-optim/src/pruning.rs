//! Statistical control-point pruning.
//!
//! Both passes fit a model, refresh the per-point errors, and drop the
//! points whose error exceeds `mean + n * sigma` of the distribution.
//! The pairwise pass judges each image pair in isolation and catches
//! mismatches a global fit would average away; the global pass catches
//! points that only look wrong once the whole panorama is consistent.

use std::collections::BTreeSet;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use pano_core::{
    CpMode, OptimizeVector, Panorama, ProgressReporter, Real, TransformOracle, VarName,
};

use crate::driver::{require_connected, OptimizeError};
use crate::lm;
use crate::problem::{update_cp_errors, GeomProblem};
use crate::smart::smart_optimize;
use crate::stats::cp_error_stats;
use crate::traits::SolveOptions;

/// Outlier threshold: `mean + n * sigma` over the relevant errors.
///
/// `n` is clamped to at least 1 so a caller asking for an aggressive
/// cut cannot discard the majority of its points.
fn error_limit(mean: Real, sigma: Real, n_sigma: Real) -> Real {
    mean + n_sigma.max(1.0) * sigma
}

/// Prune outliers pair by pair.
///
/// Every unordered image pair with at least two point-mode control
/// points between them is fitted in isolation (second image free in
/// yaw, pitch and roll against the first) and its points judged against
/// the pair's own error distribution. Pairs whose yaw is linked are
/// skipped; their relative pose is not free, so a pair fit would blame
/// the points for a mount offset. Returns the removed parent indices in
/// ascending order.
pub fn prune_pairwise<O: TransformOracle>(
    pano: &mut Panorama,
    oracle: &O,
    n_sigma: Real,
    opts: &SolveOptions,
    progress: &mut dyn ProgressReporter,
) -> Result<Vec<usize>, OptimizeError> {
    let n = pano.num_images();
    let total_pairs = (n * n.saturating_sub(1)) / 2;
    let mut to_remove: BTreeSet<usize> = BTreeSet::new();
    let mut pair_index = 0usize;

    for image1 in 0..n {
        for image2 in (image1 + 1)..n {
            pair_index += 1;
            if progress.is_cancelled() {
                debug!("pairwise pruning cancelled at pair ({image1}, {image2})");
                return Ok(finish_removal(pano, to_remove));
            }
            if pano.linked_with(image1, image2, VarName::Yaw) {
                continue;
            }

            let sub = pano.subset(&[image1, image2]);
            let mut kept = Vec::new();
            let mut parent_of: Vec<usize> = Vec::new();
            for (local, cp) in sub.pano.control_points().iter().enumerate() {
                if cp.mode == CpMode::XY {
                    kept.push(cp.clone());
                    parent_of.push(sub.cp_map[local]);
                }
            }
            if kept.len() < 2 {
                continue;
            }
            progress.report_progress(
                pair_index as f64 / total_pairs.max(1) as f64,
                &format!("checking pair ({image1}, {image2})"),
            );

            let mut pair_pano = sub.pano;
            pair_pano.set_control_points(kept);
            let optvec: OptimizeVector = vec![
                BTreeSet::new(),
                BTreeSet::from([VarName::Yaw, VarName::Pitch, VarName::Roll]),
            ];
            let problem =
                GeomProblem::new(pair_pano, oracle, &optvec).map_err(OptimizeError::Other)?;
            let x0 = problem.initial_params();
            let (x, _) = lm::minimize(&problem, x0, opts, progress);
            problem.write_params(&x);
            let mut fitted = problem.into_panorama();
            update_cp_errors(&mut fitted, oracle);

            let Some(stats) = cp_error_stats(&fitted) else {
                continue;
            };
            let limit = error_limit(stats.mean, stats.sigma(), n_sigma);
            for (local, &parent) in parent_of.iter().enumerate() {
                if fitted.control_points()[local].error > limit {
                    debug!(
                        "pair ({image1}, {image2}): point {parent} error {:.2} > limit {limit:.2}",
                        fitted.control_points()[local].error
                    );
                    to_remove.insert(parent);
                }
            }
        }
    }

    Ok(finish_removal(pano, to_remove))
}

fn finish_removal(pano: &mut Panorama, to_remove: BTreeSet<usize>) -> Vec<usize> {
    let removed: Vec<usize> = to_remove.into_iter().collect();
    pano.remove_control_points(&removed);
    info!("pruned {} control points", removed.len());
    removed
}

/// Options for [`prune_global`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GlobalPruneOptions {
    /// Sigma multiplier for the outlier threshold.
    pub n_sigma: Real,
    /// Judge the points at the current variables instead of running the
    /// staged optimization first.
    pub skip_optimization: bool,
    /// Re-run the staged optimization after removal, so the surviving
    /// points define the final geometry.
    pub reoptimize: bool,
}

impl Default for GlobalPruneOptions {
    fn default() -> Self {
        Self {
            n_sigma: 2.0,
            skip_optimization: false,
            reoptimize: false,
        }
    }
}

/// Prune outliers against the global error distribution.
///
/// Requires a connected correspondence graph. Line-mode points neither
/// enter the statistics nor get removed. Returns the removed indices in
/// ascending order.
pub fn prune_global<O: TransformOracle>(
    pano: &mut Panorama,
    oracle: &O,
    prune_opts: &GlobalPruneOptions,
    opts: &SolveOptions,
    progress: &mut dyn ProgressReporter,
) -> Result<Vec<usize>, OptimizeError> {
    require_connected(pano)?;

    if !prune_opts.skip_optimization {
        smart_optimize(pano, oracle, opts, progress)?;
    }
    update_cp_errors(pano, oracle);

    let Some(stats) = cp_error_stats(pano) else {
        debug!("too few point constraints for global pruning");
        return Ok(Vec::new());
    };
    let limit = error_limit(stats.mean, stats.sigma(), prune_opts.n_sigma);
    debug!(
        "global pruning: mean {:.2}, sigma {:.2}, limit {limit:.2}",
        stats.mean,
        stats.sigma()
    );

    let to_remove: BTreeSet<usize> = pano
        .control_points()
        .iter()
        .enumerate()
        .filter(|(_, cp)| cp.mode == CpMode::XY && cp.error > limit)
        .map(|(i, _)| i)
        .collect();
    let removed = finish_removal(pano, to_remove);

    if prune_opts.reoptimize && !removed.is_empty() {
        smart_optimize(pano, oracle, opts, progress)?;
        update_cp_errors(pano, oracle);
    }
    Ok(removed)
}

/// One matched pair with a deliberate mismatch, used by the tests below.
#[cfg(test)]
fn pair_with_outlier() -> (Panorama, pano_core::test_utils::RectilinearOracle, usize) {
    use pano_core::test_utils::{pano_from_poses, synth_control_points, RectilinearOracle};

    let mut pano = pano_from_poses(400, 300, 60.0, &[(0.0, 0.0, 0.0), (20.0, 0.0, 0.0)]);
    let oracle = RectilinearOracle;
    synth_control_points(&mut pano, &oracle, 0, 1, 3);
    assert!(pano.control_points().len() >= 5);
    // Corrupt one match by a large pixel offset in image 2.
    let mut cps = pano.control_points().to_vec();
    let bad = cps.len() / 2;
    cps[bad].x2 += 50.0;
    cps[bad].y2 -= 30.0;
    pano.set_control_points(cps);
    (pano, oracle, bad)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pano_core::NoProgress;

    #[test]
    fn pairwise_removes_the_planted_outlier() {
        let (mut pano, oracle, bad) = pair_with_outlier();
        let before = pano.control_points().len();
        let removed = prune_pairwise(
            &mut pano,
            &oracle,
            2.0,
            &SolveOptions::default(),
            &mut NoProgress,
        )
        .unwrap();
        assert_eq!(removed, vec![bad]);
        assert_eq!(pano.control_points().len(), before - 1);
    }

    #[test]
    fn pairwise_skips_yaw_linked_pairs() {
        let (mut pano, oracle, _) = pair_with_outlier();
        pano.link(1, 0, VarName::Yaw);
        let removed = prune_pairwise(
            &mut pano,
            &oracle,
            2.0,
            &SolveOptions::default(),
            &mut NoProgress,
        )
        .unwrap();
        assert!(removed.is_empty());
    }

    #[test]
    fn pairwise_pruning_ignores_line_constraints() {
        use pano_core::ControlPoint;
        let (mut pano, oracle, bad) = pair_with_outlier();
        pano.add_control_point(
            ControlPoint::new(0, 1, 5.0, 5.0, 390.0, 290.0).with_mode(CpMode::X),
        )
        .unwrap();
        let removed = prune_pairwise(
            &mut pano,
            &oracle,
            2.0,
            &SolveOptions::default(),
            &mut NoProgress,
        )
        .unwrap();
        assert_eq!(removed, vec![bad]);
        assert!(pano.control_points().iter().any(|cp| cp.mode == CpMode::X));
    }

    #[test]
    fn mismatched_line_constraints_are_never_pruned_globally() {
        use pano_core::ControlPoint;
        let (mut pano, oracle, bad) = pair_with_outlier();
        // Its error dwarfs every point error, yet it must neither enter
        // the statistics nor leave the panorama.
        pano.add_control_point(
            ControlPoint::new(0, 1, 5.0, 5.0, 390.0, 290.0).with_mode(CpMode::X),
        )
        .unwrap();
        update_cp_errors(&mut pano, &oracle);
        let removed = prune_global(
            &mut pano,
            &oracle,
            &GlobalPruneOptions {
                skip_optimization: true,
                ..Default::default()
            },
            &SolveOptions::default(),
            &mut NoProgress,
        )
        .unwrap();
        assert_eq!(removed, vec![bad]);
        assert_eq!(
            pano.control_points()
                .iter()
                .filter(|cp| cp.mode == CpMode::X)
                .count(),
            1
        );
    }

    #[test]
    fn global_prune_without_optimization_uses_stored_errors() {
        let (mut pano, oracle, bad) = pair_with_outlier();
        update_cp_errors(&mut pano, &oracle);
        let removed = prune_global(
            &mut pano,
            &oracle,
            &GlobalPruneOptions {
                skip_optimization: true,
                ..Default::default()
            },
            &SolveOptions::default(),
            &mut NoProgress,
        )
        .unwrap();
        assert_eq!(removed, vec![bad]);
    }

    #[test]
    fn sigma_multiplier_never_drops_below_one() {
        assert_eq!(error_limit(1.0, 2.0, 0.0), 3.0);
        assert_eq!(error_limit(1.0, 2.0, 3.0), 7.0);
    }

    #[test]
    fn global_prune_refuses_disconnected_panorama() {
        use pano_core::test_utils::{pano_from_poses, synth_control_points, RectilinearOracle};
        let mut pano = pano_from_poses(
            400,
            300,
            60.0,
            &[(0.0, 0.0, 0.0), (20.0, 0.0, 0.0), (90.0, 0.0, 0.0), (110.0, 0.0, 0.0)],
        );
        let oracle = RectilinearOracle;
        synth_control_points(&mut pano, &oracle, 0, 1, 3);
        synth_control_points(&mut pano, &oracle, 2, 3, 3);
        let err = prune_global(
            &mut pano,
            &oracle,
            &GlobalPruneOptions::default(),
            &SolveOptions::default(),
            &mut NoProgress,
        )
        .unwrap_err();
        assert!(matches!(err, OptimizeError::DisconnectedGraph { .. }));
    }
}
