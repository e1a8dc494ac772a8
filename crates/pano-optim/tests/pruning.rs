//! Outlier pruning scenarios on synthetic panoramas.

use pano_core::test_utils::{pano_from_poses, synth_control_points, RectilinearOracle};
use pano_core::{NoProgress, Panorama};
use pano_optim::pruning::{prune_global, prune_pairwise, GlobalPruneOptions};
use pano_optim::SolveOptions;

/// A pair with ten matches, one of which is off by a large pixel offset.
fn pair_with_one_bad_match() -> (Panorama, RectilinearOracle, usize) {
    let mut pano = pano_from_poses(800, 600, 60.0, &[(0.0, 0.0, 0.0), (20.0, 0.0, 0.0)]);
    let oracle = RectilinearOracle;
    let added = synth_control_points(&mut pano, &oracle, 0, 1, 4);
    assert!(added >= 10, "only {added} synthetic points");
    let mut cps = pano.control_points().to_vec();
    cps.truncate(10);
    let bad = 4;
    cps[bad].x2 += 60.0;
    cps[bad].y2 -= 40.0;
    pano.set_control_points(cps);
    (pano, oracle, bad)
}

#[test]
fn pairwise_removes_exactly_the_bad_match() {
    let (mut pano, oracle, bad) = pair_with_one_bad_match();
    let removed = prune_pairwise(
        &mut pano,
        &oracle,
        2.0,
        &SolveOptions::default(),
        &mut NoProgress,
    )
    .unwrap();
    assert_eq!(removed, vec![bad]);
    assert_eq!(pano.control_points().len(), 9);
}

#[test]
fn repeated_pairwise_pruning_is_monotone() {
    let (mut pano, oracle, _) = pair_with_one_bad_match();
    let mut counts = vec![pano.control_points().len()];
    for _ in 0..3 {
        prune_pairwise(
            &mut pano,
            &oracle,
            2.0,
            &SolveOptions::default(),
            &mut NoProgress,
        )
        .unwrap();
        counts.push(pano.control_points().len());
    }
    assert!(counts.windows(2).all(|w| w[1] <= w[0]), "counts: {counts:?}");
    // Clean data reaches a fixed point instead of eroding to nothing.
    assert!(*counts.last().unwrap() >= 5, "counts: {counts:?}");
}

#[test]
fn global_pruning_after_reoptimization_removes_the_bad_match() {
    let (mut pano, oracle, bad) = pair_with_one_bad_match();
    let removed = prune_global(
        &mut pano,
        &oracle,
        &GlobalPruneOptions::default(),
        &SolveOptions::default(),
        &mut NoProgress,
    )
    .unwrap();
    assert!(removed.contains(&bad), "removed: {removed:?}");
    assert!(pano.control_points().len() >= 8);
}

#[test]
fn too_few_points_skip_pruning() {
    let mut pano = pano_from_poses(800, 600, 60.0, &[(0.0, 0.0, 0.0), (20.0, 0.0, 0.0)]);
    let oracle = RectilinearOracle;
    let mut cps = Vec::new();
    // A single match: sigma is undefined, nothing may be removed.
    let added = synth_control_points(&mut pano, &oracle, 0, 1, 2);
    assert!(added >= 1);
    cps.push(pano.control_points()[0].clone());
    pano.set_control_points(cps);

    let removed = prune_pairwise(
        &mut pano,
        &oracle,
        2.0,
        &SolveOptions::default(),
        &mut NoProgress,
    )
    .unwrap();
    assert!(removed.is_empty());
    assert_eq!(pano.control_points().len(), 1);

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
    assert!(removed.is_empty());
}
