//! Synthetic transform oracle and scenario helpers for testing.
//!
//! This module is public so workspace test suites can share it, but it
//! is not intended for production use. The oracle implements a
//! pure-rotation rectilinear camera projected onto an equirectangular
//! surface: pixels map through the camera ray to (azimuth, elevation) in
//! degrees. It honors yaw, pitch, roll, horizontal field of view and the
//! radial distortion polynomial; center shift, shear and the photometric
//! variables are ignored, which keeps synthetic scenarios exactly
//! reproducible.

use crate::math::{deg_to_rad, rad_to_deg, rotation_ypr, Real, Vec2, Vec3};
use crate::panorama::{ImageInfo, Panorama, TransformOracle};
use crate::variables::VarName;

/// Rectilinear-to-equirectangular projection for pure-rotation cameras.
#[derive(Debug, Default, Clone, Copy)]
pub struct RectilinearOracle;

fn focal_px(pano: &Panorama, image: usize) -> Real {
    let hfov = pano.value(image, VarName::Hfov);
    let w = pano.image(image).width as Real;
    w / (2.0 * (deg_to_rad(hfov) / 2.0).tan())
}

/// Radial polynomial `a r^3 + b r^2 + c r + (1 - a - b - c)` mapping an
/// ideal radius to a distorted one, with radii normalized by half the
/// smaller image dimension.
struct Radial {
    a: Real,
    b: Real,
    c: Real,
    r0: Real,
}

impl Radial {
    fn of(pano: &Panorama, image: usize) -> Self {
        let info = pano.image(image);
        Self {
            a: pano.value(image, VarName::RadialA),
            b: pano.value(image, VarName::RadialB),
            c: pano.value(image, VarName::RadialC),
            r0: info.width.min(info.height) as Real / 2.0,
        }
    }

    fn is_identity(&self) -> bool {
        self.a == 0.0 && self.b == 0.0 && self.c == 0.0
    }

    fn poly(&self, r: Real) -> Real {
        let d = 1.0 - self.a - self.b - self.c;
        ((self.a * r + self.b) * r + self.c) * r + d
    }

    /// Ideal centered offsets to distorted (stored-pixel) offsets.
    fn distort(&self, dx: Real, dy: Real) -> (Real, Real) {
        let r_ideal = (dx * dx + dy * dy).sqrt() / self.r0;
        if self.is_identity() || r_ideal == 0.0 {
            return (dx, dy);
        }
        let scale = self.poly(r_ideal);
        (dx * scale, dy * scale)
    }

    /// Distorted (stored-pixel) offsets back to ideal ones, by Newton
    /// inversion of `r_dist = r_ideal * poly(r_ideal)`.
    fn undistort(&self, dx: Real, dy: Real) -> (Real, Real) {
        let r_dist = (dx * dx + dy * dy).sqrt() / self.r0;
        if self.is_identity() || r_dist == 0.0 {
            return (dx, dy);
        }
        let d = 1.0 - self.a - self.b - self.c;
        let mut r = r_dist;
        for _ in 0..10 {
            let f = r * self.poly(r) - r_dist;
            let fp = ((4.0 * self.a * r + 3.0 * self.b) * r + 2.0 * self.c) * r + d;
            let step = f / fp;
            r -= step;
            if step.abs() < 1e-14 {
                break;
            }
        }
        let scale = r / r_dist;
        (dx * scale, dy * scale)
    }
}

impl TransformOracle for RectilinearOracle {
    fn project(&self, pano: &Panorama, image: usize, pixel: Vec2) -> Vec2 {
        let info = pano.image(image);
        let f = focal_px(pano, image);
        // Camera frame: x right, y down, z forward.
        let dx = pixel.x - info.width as Real / 2.0;
        let dy = pixel.y - info.height as Real / 2.0;
        let (dx, dy) = Radial::of(pano, image).undistort(dx, dy);
        let ray = Vec3::new(dx, dy, f);
        let r = rotation_ypr(
            pano.value(image, VarName::Yaw),
            pano.value(image, VarName::Pitch),
            pano.value(image, VarName::Roll),
        );
        let world = (r * ray).normalize();
        let azimuth = world.x.atan2(world.z);
        let elevation = (-world.y).asin();
        Vec2::new(rad_to_deg(azimuth), rad_to_deg(elevation))
    }

    fn unproject(&self, pano: &Panorama, image: usize, surface: Vec2) -> Vec2 {
        let info = pano.image(image);
        let f = focal_px(pano, image);
        let az = deg_to_rad(surface.x);
        let el = deg_to_rad(surface.y);
        let world = Vec3::new(el.cos() * az.sin(), -el.sin(), el.cos() * az.cos());
        let r = rotation_ypr(
            pano.value(image, VarName::Yaw),
            pano.value(image, VarName::Pitch),
            pano.value(image, VarName::Roll),
        );
        let cam = r.transpose() * world;
        let (dx, dy) = Radial::of(pano, image).distort(cam.x / cam.z * f, cam.y / cam.z * f);
        Vec2::new(
            dx + info.width as Real / 2.0,
            dy + info.height as Real / 2.0,
        )
    }
}

/// Build a panorama of identical images and, for each ground-truth pose,
/// an image whose variables start at that pose.
pub fn pano_from_poses(width: u32, height: u32, hfov: Real, poses: &[(Real, Real, Real)]) -> Panorama {
    let mut pano = Panorama::new();
    for &(y, p, r) in poses {
        let idx = pano.add_image(ImageInfo::new(width, height));
        pano.set_value(idx, VarName::Hfov, hfov);
        pano.set_value(idx, VarName::Yaw, y);
        pano.set_value(idx, VarName::Pitch, p);
        pano.set_value(idx, VarName::Roll, r);
    }
    pano
}

/// Generate noise-free control points between two images of `pano` by
/// sampling a pixel grid in image `a` and mapping it into image `b`
/// through the oracle at the panorama's *current* poses. Points landing
/// outside image `b` are skipped.
pub fn synth_control_points(
    pano: &mut Panorama,
    oracle: &RectilinearOracle,
    a: usize,
    b: usize,
    per_axis: usize,
) -> usize {
    let (aw, ah) = (pano.image(a).width as Real, pano.image(a).height as Real);
    let (bw, bh) = (pano.image(b).width as Real, pano.image(b).height as Real);
    let mut added = 0;
    for gi in 0..per_axis {
        for gj in 0..per_axis {
            let x = aw * (gi as Real + 1.0) / (per_axis as Real + 1.0);
            let y = ah * (gj as Real + 1.0) / (per_axis as Real + 1.0);
            let surf = oracle.project(pano, a, Vec2::new(x, y));
            let p2 = oracle.unproject(pano, b, surf);
            if p2.x < 0.0 || p2.x > bw || p2.y < 0.0 || p2.y > bh {
                continue;
            }
            pano.add_control_point(crate::cpoint::ControlPoint::new(a, b, x, y, p2.x, p2.y))
                .expect("valid image indices");
            added += 1;
        }
    }
    added
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn project_unproject_round_trip() {
        let pano = pano_from_poses(800, 600, 60.0, &[(12.0, -4.0, 3.0)]);
        let oracle = RectilinearOracle;
        let px = Vec2::new(230.0, 410.0);
        let surf = oracle.project(&pano, 0, px);
        let back = oracle.unproject(&pano, 0, surf);
        assert_relative_eq!(px.x, back.x, epsilon = 1e-9);
        assert_relative_eq!(px.y, back.y, epsilon = 1e-9);
    }

    #[test]
    fn center_pixel_maps_to_view_direction() {
        let pano = pano_from_poses(800, 600, 60.0, &[(25.0, 0.0, 0.0)]);
        let oracle = RectilinearOracle;
        let surf = oracle.project(&pano, 0, Vec2::new(400.0, 300.0));
        assert_relative_eq!(surf.x, 25.0, epsilon = 1e-9);
        assert_relative_eq!(surf.y, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn distorted_round_trip_inverts_the_radial_polynomial() {
        let mut pano = pano_from_poses(800, 600, 60.0, &[(0.0, 0.0, 0.0)]);
        pano.set_value(0, VarName::RadialB, 0.05);
        pano.set_value(0, VarName::RadialC, -0.02);
        let oracle = RectilinearOracle;
        let px = Vec2::new(150.0, 480.0);
        let surf = oracle.project(&pano, 0, px);
        let back = oracle.unproject(&pano, 0, surf);
        assert_relative_eq!(px.x, back.x, epsilon = 1e-8);
        assert_relative_eq!(px.y, back.y, epsilon = 1e-8);
    }

    #[test]
    fn synthetic_points_have_zero_error_at_truth() {
        let mut pano = pano_from_poses(800, 600, 60.0, &[(0.0, 0.0, 0.0), (20.0, 0.0, 0.0)]);
        let oracle = RectilinearOracle;
        let added = synth_control_points(&mut pano, &oracle, 0, 1, 4);
        assert!(added > 0);
        for cp in pano.control_points() {
            let s1 = oracle.project(&pano, cp.image1, cp.p1());
            let s2 = oracle.project(&pano, cp.image2, cp.p2());
            assert_relative_eq!((s1 - s2).norm(), 0.0, epsilon = 1e-9);
        }
    }
}
