//! Heuristic variable selection and the staged "smart" optimization.
//!
//! The staged run first solves positions alone (seeded, then globally),
//! then decides from the control-point distribution which lens
//! parameters can be trusted to the optimizer, runs again with those
//! freed, and rolls back any stage whose result is implausible.

use std::collections::BTreeSet;

use log::{debug, info, warn};

use pano_core::{OptimizeVector, Panorama, ProgressReporter, TransformOracle, VarName};

use crate::driver::{
    optimize_global, require_connected, seed_positions, OptimizationResult, OptimizeError,
};
use crate::stats::cp_radial_stats;
use crate::traits::SolveOptions;

/// Bit flags selecting variable groups for [`create_opt_vars`].
pub type OptMode = u32;

pub const OPT_POS: OptMode = 1;
pub const OPT_B: OptMode = 2;
pub const OPT_AC: OptMode = 4;
pub const OPT_DE: OptMode = 8;
pub const OPT_HFOV: OptMode = 16;
pub const OPT_GT: OptMode = 32;
pub const OPT_VIG: OptMode = 64;
pub const OPT_VIGCENTRE: OptMode = 128;
pub const OPT_EXP: OptMode = 256;
pub const OPT_WB: OptMode = 512;
pub const OPT_RESP: OptMode = 1024;

/// Build a per-image optimize vector for the selected variable groups.
///
/// Position is never freed for images whose pose is (partly) linked with
/// the anchor. The anchor itself keeps yaw fixed; its pitch and roll are
/// freed only when line constraints exist to pin them, since with point
/// constraints alone they are a pure gauge freedom and would make the
/// system singular. Exposure and white balance stay fixed on the anchor,
/// which defines the photometric reference.
pub fn create_opt_vars(pano: &Panorama, mode: OptMode, anchor: usize) -> OptimizeVector {
    let has_lines = pano
        .control_points()
        .iter()
        .any(|cp| cp.mode != pano_core::CpMode::XY);
    let mut optvec = OptimizeVector::with_capacity(pano.num_images());
    for i in 0..pano.num_images() {
        let mut set = BTreeSet::new();
        let linked_to_anchor = VarName::ALL
            .iter()
            .filter(|n| n.is_pose())
            .any(|&n| pano.linked_with(i, anchor, n));
        if mode & OPT_POS != 0 {
            if !linked_to_anchor {
                set.insert(VarName::Yaw);
                set.insert(VarName::Pitch);
                set.insert(VarName::Roll);
            } else if i == anchor && has_lines {
                set.insert(VarName::Pitch);
                set.insert(VarName::Roll);
            }
        }
        if i != anchor {
            if mode & OPT_EXP != 0 {
                set.insert(VarName::Eev);
            }
            if mode & OPT_WB != 0 {
                set.insert(VarName::Er);
                set.insert(VarName::Eb);
            }
        }
        if mode & OPT_HFOV != 0 {
            set.insert(VarName::Hfov);
        }
        if mode & OPT_B != 0 {
            set.insert(VarName::RadialB);
        }
        if mode & OPT_AC != 0 {
            set.insert(VarName::RadialA);
            set.insert(VarName::RadialC);
        }
        if mode & OPT_DE != 0 {
            set.insert(VarName::ShiftD);
            set.insert(VarName::ShiftE);
        }
        if mode & OPT_GT != 0 {
            set.insert(VarName::ShearG);
            set.insert(VarName::ShearT);
        }
        if mode & OPT_VIG != 0 {
            set.insert(VarName::VigB);
            set.insert(VarName::VigC);
            set.insert(VarName::VigD);
        }
        if mode & OPT_VIGCENTRE != 0 {
            set.insert(VarName::VigX);
            set.insert(VarName::VigY);
        }
        if mode & OPT_RESP != 0 {
            set.insert(VarName::RespA);
            set.insert(VarName::RespB);
            set.insert(VarName::RespC);
            set.insert(VarName::RespD);
            set.insert(VarName::RespE);
        }
        optvec.push(set);
    }
    optvec
}

const LENS_VARS: [VarName; 5] = [
    VarName::RadialA,
    VarName::RadialB,
    VarName::RadialC,
    VarName::ShiftD,
    VarName::ShiftE,
];

/// Estimated horizontal extent of the panorama in degrees: the span of
/// `yaw +- hfov/2` over all images, capped at a full circle.
fn estimate_pano_hfov(pano: &Panorama) -> f64 {
    let mut lo = f64::INFINITY;
    let mut hi = f64::NEG_INFINITY;
    for i in 0..pano.num_images() {
        let yaw = pano.value(i, VarName::Yaw);
        let half = pano.value(i, VarName::Hfov) / 2.0;
        lo = lo.min(yaw - half);
        hi = hi.max(yaw + half);
    }
    if lo > hi {
        0.0
    } else {
        (hi - lo).min(360.0)
    }
}

/// Whether all images share one linked pose (a single bracketed stack).
/// Lens calibration from a stack alone is degenerate.
fn is_single_stack(pano: &Panorama) -> bool {
    (1..pano.num_images()).all(|i| pano.pose_linked_with(i, 0))
}

fn lens_values_implausible(pano: &Panorama) -> (bool, bool, bool) {
    let mut small_hfov = false;
    let mut high_dist = false;
    let mut high_shift = false;
    for i in 0..pano.num_images() {
        if pano.value(i, VarName::Hfov) < 1.0 {
            small_hfov = true;
        }
        for name in [VarName::RadialA, VarName::RadialB, VarName::RadialC] {
            if pano.value(i, name).abs() > 0.2 {
                high_dist = true;
            }
        }
        for name in [VarName::ShiftD, VarName::ShiftE] {
            if pano.value(i, name).abs() > 1000.0 {
                high_shift = true;
            }
        }
    }
    (small_hfov, high_dist, high_shift)
}

/// Staged optimization with heuristic lens-parameter selection.
///
/// 1. Seeded position fit over point constraints only.
/// 2. Global position fit over all constraints.
/// 3. If the lens looks uncalibrated (all of a..e zero) and the images
///    are not a single linked stack: link the lens variables across
///    images, free the groups the control-point distribution supports,
///    refit, and roll back groups whose fitted values are implausible.
pub fn smart_optimize<O: TransformOracle>(
    pano: &mut Panorama,
    oracle: &O,
    opts: &SolveOptions,
    progress: &mut dyn ProgressReporter,
) -> Result<OptimizationResult, OptimizeError> {
    let anchor = pano.anchor();
    require_connected(pano)?;

    // Line constraints would distort the pairwise seeding; run it on a
    // point-only copy and carry the poses over. Connectivity is judged
    // on the full constraint set: images attached through line
    // constraints alone stay at their initial poses until the global
    // pass.
    let mut seed = pano.clone();
    let points_only: Vec<_> = pano
        .control_points()
        .iter()
        .filter(|cp| cp.mode == pano_core::CpMode::XY)
        .cloned()
        .collect();
    seed.set_control_points(points_only);
    seed_positions(&mut seed, oracle, opts, progress)?;
    for i in 0..pano.num_images() {
        pano.update_variables(i, seed.variables(i));
    }

    let positions = create_opt_vars(pano, OPT_POS, anchor);
    let mut result = optimize_global(pano, oracle, &positions, opts, progress)?;

    let already_calibrated = LENS_VARS.iter().any(|&n| pano.value(0, n) != 0.0);
    if already_calibrated {
        debug!("lens parameters nonzero, keeping the existing calibration");
        return Ok(result);
    }
    if is_single_stack(pano) {
        debug!("single linked stack, skipping lens calibration");
        return Ok(result);
    }

    for i in 1..pano.num_images() {
        for name in LENS_VARS {
            pano.link(i, 0, name);
        }
    }

    let mut mode = OPT_POS;
    let orig_hfov = pano.value(0, VarName::Hfov);
    if orig_hfov > 60.0 {
        // Perspective effects too weak below this to separate the
        // distortion center from the pose.
        mode |= OPT_DE;
    }
    match cp_radial_stats(pano) {
        Some(radial) if radial.q90 - radial.q10 > 1.0 => mode |= OPT_AC | OPT_B,
        Some(_) => mode |= OPT_B,
        None => {
            warn!("too few point constraints for lens heuristics");
            return Ok(result);
        }
    }
    if estimate_pano_hfov(pano) >= 150.0 {
        mode |= OPT_HFOV;
    }
    info!("lens refinement with mode {mode:#06b}");

    let saved: Vec<_> = (0..pano.num_images()).map(|i| pano.variables(i).clone()).collect();
    result = optimize_global(pano, oracle, &create_opt_vars(pano, mode, anchor), opts, progress)?;

    let (small_hfov, high_dist, high_shift) = lens_values_implausible(pano);
    if small_hfov || high_dist || high_shift {
        debug!(
            "implausible lens fit (hfov: {small_hfov}, distortion: {high_dist}, shift: {high_shift}), retrying"
        );
        if small_hfov {
            mode &= !OPT_HFOV;
        }
        if high_dist {
            mode &= !OPT_AC;
        }
        if high_shift {
            mode &= !OPT_DE;
        }
        for (i, vars) in saved.iter().enumerate() {
            pano.update_variables(i, vars);
        }
        result = optimize_global(pano, oracle, &create_opt_vars(pano, mode, anchor), opts, progress)?;

        // b alone can still run away once a and c are frozen.
        let b_implausible =
            (0..pano.num_images()).any(|i| pano.value(i, VarName::RadialB).abs() > 0.2);
        if b_implausible {
            mode &= !OPT_B;
            for (i, vars) in saved.iter().enumerate() {
                pano.update_variables(i, vars);
            }
            result =
                optimize_global(pano, oracle, &create_opt_vars(pano, mode, anchor), opts, progress)?;
        }
    }
    Ok(result)
}
