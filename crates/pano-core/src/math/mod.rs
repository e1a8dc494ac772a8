//! Mathematical utilities and type definitions.
//!
//! Provides the scalar/vector/matrix aliases used throughout the
//! workspace and the yaw/pitch/roll rotation conventions shared by the
//! optimizer and the leveling solver.

use nalgebra::{Matrix3, Vector2, Vector3};

pub mod eigen;

pub use eigen::{eig_jacobi, EigenDecomposition};

/// Scalar type used throughout the library (currently `f64`).
pub type Real = f64;

/// 2D vector with [`Real`] components.
pub type Vec2 = Vector2<Real>;
/// 3D vector with [`Real`] components.
pub type Vec3 = Vector3<Real>;
/// 3×3 matrix with [`Real`] entries.
pub type Mat3 = Matrix3<Real>;

/// Convert degrees to radians.
pub fn deg_to_rad(deg: Real) -> Real {
    deg.to_radians()
}

/// Convert radians to degrees.
pub fn rad_to_deg(rad: Real) -> Real {
    rad.to_degrees()
}

/// Camera-to-world rotation from yaw, pitch and roll in degrees.
///
/// The composition is `R_y(yaw) * R_x(pitch) * R_z(roll)`: yaw turns the
/// camera about the vertical (y) axis, pitch tilts it about the image
/// x-axis and roll spins it about the viewing direction.
pub fn rotation_ypr(yaw_deg: Real, pitch_deg: Real, roll_deg: Real) -> Mat3 {
    let (sy, cy) = deg_to_rad(yaw_deg).sin_cos();
    let (sp, cp) = deg_to_rad(pitch_deg).sin_cos();
    let (sr, cr) = deg_to_rad(roll_deg).sin_cos();

    let ry = Mat3::new(cy, 0.0, sy, 0.0, 1.0, 0.0, -sy, 0.0, cy);
    let rx = Mat3::new(1.0, 0.0, 0.0, 0.0, cp, -sp, 0.0, sp, cp);
    let rz = Mat3::new(cr, -sr, 0.0, sr, cr, 0.0, 0.0, 0.0, 1.0);
    ry * rx * rz
}

/// Recover `(yaw, pitch, roll)` in degrees from a rotation produced by
/// [`rotation_ypr`].
///
/// The gimbal-lock configuration (pitch = ±90°) resolves to yaw carrying
/// the full horizontal rotation.
pub fn ypr_from_rotation(r: &Mat3) -> (Real, Real, Real) {
    let pitch = (-r[(1, 2)]).clamp(-1.0, 1.0).asin();
    let yaw = r[(0, 2)].atan2(r[(2, 2)]);
    let roll = r[(1, 0)].atan2(r[(1, 1)]);
    (rad_to_deg(yaw), rad_to_deg(pitch), rad_to_deg(roll))
}

/// Rotation about a unit `axis` by `angle` radians (Rodrigues form).
pub fn rotation_about_axis(axis: &Vec3, angle: Real) -> Mat3 {
    let (s, c) = angle.sin_cos();
    let t = 1.0 - c;
    let (x, y, z) = (axis.x, axis.y, axis.z);
    Mat3::new(
        t * x * x + c,
        t * x * y - s * z,
        t * x * z + s * y,
        t * x * y + s * z,
        t * y * y + c,
        t * y * z - s * x,
        t * x * z - s * y,
        t * y * z + s * x,
        t * z * z + c,
    )
}
