//! The panorama data model: images, variables, links and control points.
//!
//! This is the shared mutable state every optimization and pruning pass
//! operates on. Access is single-threaded by design; callers are
//! responsible for serializing concurrent user actions.

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cpoint::ControlPoint;
use crate::math::{Real, Vec2};
use crate::variables::{LinkModel, VarName, VariableSet};

/// Errors from structural edits of the panorama.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PanoError {
    #[error("image index {0} out of range ({1} images)")]
    ImageOutOfRange(usize, usize),
    #[error("control point connects image {0} to itself")]
    SelfReferencingControlPoint(usize),
}

/// Static per-image metadata the optimizer needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    /// Set when EXIF orientation marks the image as rotated 90 degrees;
    /// the leveling solver then uses the image y-axis as reference.
    pub exif_rotated: bool,
}

impl ImageInfo {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            exif_rotated: false,
        }
    }

    /// Half of the image diagonal, the normalization radius for
    /// control-point distribution statistics.
    pub fn half_diagonal(&self) -> Real {
        ((self.width as Real).powi(2) + (self.height as Real).powi(2)).sqrt() / 2.0
    }
}

/// A pairwise-fit subset extracted from a panorama, with the mapping
/// from its control points back to the parent's indices.
#[derive(Debug, Clone)]
pub struct Subset {
    pub pano: Panorama,
    /// `pano.control_points()[i]` corresponds to parent index `cp_map[i]`.
    pub cp_map: Vec<usize>,
}

/// Images, per-image variables, cross-image links and control points.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Panorama {
    images: Vec<ImageInfo>,
    vars: Vec<VariableSet>,
    links: LinkModel,
    cps: Vec<ControlPoint>,
    anchor: usize,
}

impl Default for Panorama {
    fn default() -> Self {
        Self::new()
    }
}

impl Panorama {
    pub fn new() -> Self {
        Self {
            images: Vec::new(),
            vars: Vec::new(),
            links: LinkModel::new(0),
            cps: Vec::new(),
            anchor: 0,
        }
    }

    pub fn num_images(&self) -> usize {
        self.images.len()
    }

    pub fn image(&self, i: usize) -> &ImageInfo {
        &self.images[i]
    }

    /// Reference image for optimization; its pose anchors the panorama.
    pub fn anchor(&self) -> usize {
        self.anchor
    }

    pub fn set_anchor(&mut self, image: usize) {
        assert!(image < self.images.len().max(1));
        self.anchor = image;
    }

    /// Append an image with default variables; returns its index.
    pub fn add_image(&mut self, info: ImageInfo) -> usize {
        self.add_image_with_vars(info, VariableSet::default())
    }

    /// Append an image with the given variables (e.g. inherited from a
    /// lens); returns its index.
    pub fn add_image_with_vars(&mut self, info: ImageInfo, vars: VariableSet) -> usize {
        self.images.push(info);
        self.vars.push(vars);
        self.links.push_image();
        self.images.len() - 1
    }

    /// Remove an image, its variables, its links and every control point
    /// referencing it. Later images are renumbered.
    pub fn remove_image(&mut self, image: usize) -> Result<(), PanoError> {
        let n = self.images.len();
        if image >= n {
            return Err(PanoError::ImageOutOfRange(image, n));
        }
        self.images.remove(image);
        self.vars.remove(image);
        self.links.remove_image(image);
        let before = self.cps.len();
        self.cps.retain(|cp| cp.image1 != image && cp.image2 != image);
        debug!(
            "removed image {image} and {} of its control points",
            before - self.cps.len()
        );
        for cp in &mut self.cps {
            if cp.image1 > image {
                cp.image1 -= 1;
            }
            if cp.image2 > image {
                cp.image2 -= 1;
            }
        }
        if self.anchor >= image && self.anchor > 0 {
            self.anchor -= 1;
        }
        Ok(())
    }

    /// Resolved (canonical) value of a variable, honoring links.
    pub fn value(&self, image: usize, name: VarName) -> Real {
        let (img, var) = self.links.representative(image, name);
        self.vars[img].get(var)
    }

    /// Write a variable, propagating through its link class.
    pub fn set_value(&mut self, image: usize, name: VarName, value: Real) {
        for (img, var) in self.links.class_members(image, name) {
            self.vars[img].set(var, value);
        }
    }

    /// Raw variable set of one image. Values of linked variables are kept
    /// in sync by [`set_value`](Self::set_value).
    pub fn variables(&self, image: usize) -> &VariableSet {
        &self.vars[image]
    }

    /// Replace all variables of one image, propagating linked values.
    pub fn update_variables(&mut self, image: usize, vars: &VariableSet) {
        for (name, value) in vars.iter() {
            self.set_value(image, name, value);
        }
    }

    /// Link `name` of `image` to the same variable of `target`; the
    /// merged class adopts the target's current value.
    pub fn link(&mut self, image: usize, target: usize, name: VarName) {
        let value = self.value(target, name);
        self.links.link(image, target, name);
        self.set_value(target, name, value);
    }

    /// Make `name` of `image` independent again, keeping its last
    /// resolved value.
    pub fn unlink(&mut self, image: usize, name: VarName) {
        let value = self.value(image, name);
        self.links.unlink(image, name);
        self.vars[image].set(name, value);
    }

    pub fn is_linked(&self, image: usize, name: VarName) -> bool {
        self.links.is_linked(image, name)
    }

    pub fn linked_with(&self, a: usize, b: usize, name: VarName) -> bool {
        a == b || self.links.linked_with(a, b, name)
    }

    /// Whether two images share their full pose (yaw, pitch and roll all
    /// linked).
    pub fn pose_linked_with(&self, a: usize, b: usize) -> bool {
        self.linked_with(a, b, VarName::Yaw)
            && self.linked_with(a, b, VarName::Pitch)
            && self.linked_with(a, b, VarName::Roll)
    }

    pub fn link_model(&self) -> &LinkModel {
        &self.links
    }

    /// Whether any image carries a nonzero translation component.
    pub fn has_translation(&self) -> bool {
        (0..self.num_images()).any(|i| {
            self.value(i, VarName::TrX) != 0.0
                || self.value(i, VarName::TrY) != 0.0
                || self.value(i, VarName::TrZ) != 0.0
        })
    }

    pub fn control_points(&self) -> &[ControlPoint] {
        &self.cps
    }

    pub fn add_control_point(&mut self, cp: ControlPoint) -> Result<usize, PanoError> {
        let n = self.images.len();
        if cp.image1 >= n {
            return Err(PanoError::ImageOutOfRange(cp.image1, n));
        }
        if cp.image2 >= n {
            return Err(PanoError::ImageOutOfRange(cp.image2, n));
        }
        if cp.image1 == cp.image2 {
            return Err(PanoError::SelfReferencingControlPoint(cp.image1));
        }
        self.cps.push(cp);
        Ok(self.cps.len() - 1)
    }

    pub fn set_control_points(&mut self, cps: Vec<ControlPoint>) {
        self.cps = cps;
    }

    pub fn set_cp_error(&mut self, index: usize, error: Real) {
        self.cps[index].error = error;
    }

    /// Remove control points by index. Indices may arrive in any order;
    /// duplicates are ignored.
    pub fn remove_control_points(&mut self, indices: &[usize]) {
        let mut sorted: Vec<usize> = indices.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        for &i in sorted.iter().rev() {
            self.cps.remove(i);
        }
    }

    /// Extract a sub-panorama containing only `imgs` (renumbered in the
    /// given order), the control points between them, and the links among
    /// them. Used for local pairwise fits.
    pub fn subset(&self, imgs: &[usize]) -> Subset {
        let mut pano = Panorama::new();
        for &i in imgs {
            pano.add_image_with_vars(self.images[i].clone(), self.vars[i].clone());
        }
        // Carry links whose endpoints both survive.
        for (ai, &a) in imgs.iter().enumerate() {
            for (bi, &b) in imgs.iter().enumerate().skip(ai + 1) {
                for name in VarName::ALL {
                    if self.links.linked_with(a, b, name) {
                        pano.link(bi, ai, name);
                    }
                }
            }
        }
        let mut cp_map = Vec::new();
        for (idx, cp) in self.cps.iter().enumerate() {
            let i1 = imgs.iter().position(|&i| i == cp.image1);
            let i2 = imgs.iter().position(|&i| i == cp.image2);
            if let (Some(i1), Some(i2)) = (i1, i2) {
                let mut local = cp.clone();
                local.image1 = i1;
                local.image2 = i2;
                pano.cps.push(local);
                cp_map.push(idx);
            }
        }
        Subset { pano, cp_map }
    }
}

/// Projection between image pixel coordinates and panorama-surface
/// coordinates, parameterized implicitly by the image's *current*
/// variables. Implemented by the host application's remapping layer;
/// re-derived cheaply on every call since the optimizer evaluates it for
/// every residual.
pub trait TransformOracle {
    /// Project a pixel of image `image` onto the panorama surface.
    fn project(&self, pano: &Panorama, image: usize, pixel: Vec2) -> Vec2;

    /// Map a panorama-surface coordinate back into image `image`.
    fn unproject(&self, pano: &Panorama, image: usize, surface: Vec2) -> Vec2;
}

/// Progress and cancellation channel for long-running operations.
///
/// Cancellation is cooperative: the solver checks [`is_cancelled`]
/// between iterations and stops cleanly, returning the best parameters
/// found so far.
///
/// [`is_cancelled`]: ProgressReporter::is_cancelled
pub trait ProgressReporter {
    fn report_progress(&mut self, fraction: f64, message: &str);

    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Reporter that swallows progress and never cancels.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report_progress(&mut self, _fraction: f64, _message: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpoint::ControlPoint;

    fn three_image_pano() -> Panorama {
        let mut pano = Panorama::new();
        for _ in 0..3 {
            pano.add_image(ImageInfo::new(800, 600));
        }
        pano
    }

    #[test]
    fn linked_values_stay_equal_after_writes() {
        let mut pano = three_image_pano();
        pano.set_value(1, VarName::Hfov, 60.0);
        pano.link(0, 1, VarName::Hfov);
        assert_eq!(pano.value(0, VarName::Hfov), 60.0);

        pano.set_value(0, VarName::Hfov, 72.5);
        assert_eq!(pano.value(1, VarName::Hfov), 72.5);
        assert_eq!(pano.variables(1).get(VarName::Hfov), 72.5);
    }

    #[test]
    fn unlink_keeps_last_resolved_value() {
        let mut pano = three_image_pano();
        pano.link(1, 0, VarName::RadialB);
        pano.set_value(0, VarName::RadialB, 0.1);
        pano.unlink(1, VarName::RadialB);
        assert_eq!(pano.value(1, VarName::RadialB), 0.1);
        pano.set_value(0, VarName::RadialB, 0.2);
        assert_eq!(pano.value(1, VarName::RadialB), 0.1);
    }

    #[test]
    fn control_point_validation() {
        let mut pano = three_image_pano();
        assert!(pano
            .add_control_point(ControlPoint::new(0, 1, 1.0, 2.0, 3.0, 4.0))
            .is_ok());
        assert_eq!(
            pano.add_control_point(ControlPoint::new(1, 1, 0.0, 0.0, 0.0, 0.0)),
            Err(PanoError::SelfReferencingControlPoint(1))
        );
        assert_eq!(
            pano.add_control_point(ControlPoint::new(0, 7, 0.0, 0.0, 0.0, 0.0)),
            Err(PanoError::ImageOutOfRange(7, 3))
        );
    }

    #[test]
    fn remove_image_renumbers_control_points() {
        let mut pano = three_image_pano();
        pano.add_control_point(ControlPoint::new(0, 1, 0.0, 0.0, 0.0, 0.0))
            .unwrap();
        pano.add_control_point(ControlPoint::new(1, 2, 0.0, 0.0, 0.0, 0.0))
            .unwrap();
        pano.add_control_point(ControlPoint::new(0, 2, 0.0, 0.0, 0.0, 0.0))
            .unwrap();
        pano.remove_image(1).unwrap();
        assert_eq!(pano.num_images(), 2);
        assert_eq!(pano.control_points().len(), 1);
        assert_eq!(pano.control_points()[0].image2, 1);
    }

    #[test]
    fn subset_remaps_points_and_links() {
        let mut pano = three_image_pano();
        pano.link(2, 1, VarName::Hfov);
        pano.add_control_point(ControlPoint::new(0, 1, 0.0, 0.0, 0.0, 0.0))
            .unwrap();
        pano.add_control_point(ControlPoint::new(1, 2, 5.0, 6.0, 7.0, 8.0))
            .unwrap();
        let sub = pano.subset(&[1, 2]);
        assert_eq!(sub.pano.num_images(), 2);
        assert_eq!(sub.cp_map, vec![1]);
        assert_eq!(sub.pano.control_points()[0].image1, 0);
        assert_eq!(sub.pano.control_points()[0].image2, 1);
        assert!(sub.pano.linked_with(0, 1, VarName::Hfov));
    }
}
