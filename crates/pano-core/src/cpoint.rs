//! Control points: pixel correspondences between image pairs.

use serde::{Deserialize, Serialize};

use crate::math::{Real, Vec2};

/// Constraint mode of a control point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CpMode {
    /// Point correspondence: both surface axes must agree.
    XY,
    /// Line constraint along the first surface axis only.
    X,
    /// Line constraint along the second surface axis only.
    Y,
}

/// A correspondence between a pixel in one image and a pixel in another.
///
/// `error` is the reprojection distance in panorama-surface units from
/// the last projection pass; it is meaningless before one has run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlPoint {
    pub image1: usize,
    pub image2: usize,
    pub x1: Real,
    pub y1: Real,
    pub x2: Real,
    pub y2: Real,
    pub mode: CpMode,
    pub error: Real,
}

impl ControlPoint {
    /// Point-mode control point between `image1` and `image2`.
    pub fn new(image1: usize, image2: usize, x1: Real, y1: Real, x2: Real, y2: Real) -> Self {
        Self {
            image1,
            image2,
            x1,
            y1,
            x2,
            y2,
            mode: CpMode::XY,
            error: 0.0,
        }
    }

    /// Same correspondence with a different constraint mode.
    pub fn with_mode(mut self, mode: CpMode) -> Self {
        self.mode = mode;
        self
    }

    /// Pixel coordinate in the first image.
    pub fn p1(&self) -> Vec2 {
        Vec2::new(self.x1, self.y1)
    }

    /// Pixel coordinate in the second image.
    pub fn p2(&self) -> Vec2 {
        Vec2::new(self.x2, self.y2)
    }

    /// Whether this point connects the given image pair (in either order).
    pub fn connects(&self, a: usize, b: usize) -> bool {
        (self.image1 == a && self.image2 == b) || (self.image1 == b && self.image2 == a)
    }
}
