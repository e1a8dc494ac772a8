//! Panorama leveling.
//!
//! In a hand-held panorama the camera's image x-axes all lie close to
//! the horizontal plane, whatever direction each shot faces. The
//! covariance of those axes over all images therefore has its smallest
//! variance along the true vertical: the eigenvector of the smallest
//! eigenvalue is the estimated "up" direction, and rotating the whole
//! panorama so that it coincides with the y-axis levels the horizon.

use log::{debug, info};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use pano_core::math::{rotation_about_axis, rotation_ypr, ypr_from_rotation};
use pano_core::{eig_jacobi, Mat3, Panorama, Real, Vec3, VarName};

use crate::driver::{require_connected, OptimizeError};

const EIGEN_SWEEPS: usize = 100;
const EIGEN_EPSILON: Real = 1e-15;

/// Outcome of a leveling request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LevelingOutcome {
    /// The rotation was applied to every image.
    Applied { rotation: Mat3, angle_deg: Real },
    /// Nothing was changed; `reason` says why.
    Skipped { reason: String },
}

/// World vertical in the camera convention (x right, y down, z forward).
fn vertical() -> Vec3 {
    Vec3::y()
}

/// Estimate the leveling rotation and apply it to the whole panorama.
///
/// Requires a connected correspondence graph. The computation is a no-op
/// when any image carries a nonzero translation (the model assumes
/// pure-rotation camera placement) or when fewer than two independent
/// orientations are available. Images whose yaw is linked to an earlier
/// image are counted once; a rigid stack contributes one orientation,
/// not one per exposure.
pub fn straighten(pano: &mut Panorama) -> Result<LevelingOutcome, OptimizeError> {
    require_connected(pano)?;

    if pano.has_translation() {
        debug!("leveling skipped: translation present");
        return Ok(LevelingOutcome::Skipped {
            reason: "panorama uses translation parameters".into(),
        });
    }

    let mut cov = Mat3::zeros();
    let mut used = 0usize;
    for i in 0..pano.num_images() {
        if (0..i).any(|j| pano.linked_with(i, j, VarName::Yaw)) {
            continue;
        }
        let r = image_rotation(pano, i);
        // Reference axis in world coordinates. EXIF-rotated images hold
        // their x-axis vertical, so the y-axis is the horizontal one.
        let axis = if pano.image(i).exif_rotated {
            r * Vec3::y()
        } else {
            r * Vec3::x()
        };
        cov += axis * axis.transpose();
        used += 1;
    }
    if used < 2 {
        debug!("leveling skipped: {used} independent orientations");
        return Ok(LevelingOutcome::Skipped {
            reason: format!("only {used} independent orientations"),
        });
    }

    let cov_dyn = DMatrix::from_fn(3, 3, |r, c| cov[(r, c)]);
    let eig = eig_jacobi(&cov_dyn, EIGEN_SWEEPS, EIGEN_EPSILON);
    let col = eig.smallest();
    let mut up = Vec3::new(
        eig.vectors[(0, col)],
        eig.vectors[(1, col)],
        eig.vectors[(2, col)],
    );
    // The eigenvector's sign is arbitrary; take the shorter rotation.
    if up.dot(&vertical()) < 0.0 {
        up = -up;
    }

    let axis = up.cross(&vertical());
    let sin = axis.norm();
    let cos = up.dot(&vertical()).clamp(-1.0, 1.0);
    let angle = sin.atan2(cos);
    if sin < 1e-12 {
        debug!("panorama already level");
        return Ok(LevelingOutcome::Applied {
            rotation: Mat3::identity(),
            angle_deg: 0.0,
        });
    }

    let rotation = rotation_about_axis(&(axis / sin), angle);
    apply_rotation(pano, &rotation);
    info!("leveled panorama by {:.2} degrees", angle.to_degrees());
    Ok(LevelingOutcome::Applied {
        rotation,
        angle_deg: angle.to_degrees(),
    })
}

fn image_rotation(pano: &Panorama, image: usize) -> Mat3 {
    rotation_ypr(
        pano.value(image, VarName::Yaw),
        pano.value(image, VarName::Pitch),
        pano.value(image, VarName::Roll),
    )
}

/// Apply a world rotation to every image's pose, and to its translation
/// vector when one is set.
///
/// Linked pose classes are rotated once, through their lowest-indexed
/// member; writes propagate to the rest of the class.
pub fn apply_rotation(pano: &mut Panorama, rotation: &Mat3) {
    for i in 0..pano.num_images() {
        if (0..i).any(|j| pano.linked_with(i, j, VarName::Yaw)) {
            continue;
        }
        let r_new = rotation * image_rotation(pano, i);
        let (yaw, pitch, roll) = ypr_from_rotation(&r_new);
        pano.set_value(i, VarName::Yaw, yaw);
        pano.set_value(i, VarName::Pitch, pitch);
        pano.set_value(i, VarName::Roll, roll);

        let tr = Vec3::new(
            pano.value(i, VarName::TrX),
            pano.value(i, VarName::TrY),
            pano.value(i, VarName::TrZ),
        );
        if tr != Vec3::zeros() {
            let tr = rotation * tr;
            pano.set_value(i, VarName::TrX, tr.x);
            pano.set_value(i, VarName::TrY, tr.y);
            pano.set_value(i, VarName::TrZ, tr.z);
        }
    }
}
