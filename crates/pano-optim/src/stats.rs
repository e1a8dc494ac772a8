//! Control-point statistics feeding the pruner and the variable-freeing
//! heuristics.
//!
//! Statistics are computed over point-mode control points only; line
//! constraints have a different error scale and would bias the moments.

use pano_core::{CpMode, Panorama, Real};

/// Moments of the stored control-point errors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ErrorStats {
    pub min: Real,
    pub max: Real,
    pub mean: Real,
    /// Sample variance (n - 1 denominator).
    pub variance: Real,
    pub n: usize,
}

impl ErrorStats {
    /// Standard deviation.
    pub fn sigma(&self) -> Real {
        self.variance.sqrt()
    }
}

fn moments(values: &[Real]) -> Option<ErrorStats> {
    // Sigma is undefined below two samples; callers treat None as
    // "skip this pruning scope".
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as Real;
    let mean = values.iter().sum::<Real>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<Real>() / (n - 1.0);
    let min = values.iter().cloned().fold(Real::INFINITY, Real::min);
    let max = values.iter().cloned().fold(Real::NEG_INFINITY, Real::max);
    Some(ErrorStats {
        min,
        max,
        mean,
        variance,
        n: values.len(),
    })
}

/// Error statistics over all point-mode control points, from their
/// stored errors. `None` when fewer than two samples exist.
pub fn cp_error_stats(pano: &Panorama) -> Option<ErrorStats> {
    let errors: Vec<Real> = pano
        .control_points()
        .iter()
        .filter(|cp| cp.mode == CpMode::XY)
        .map(|cp| cp.error)
        .collect();
    moments(&errors)
}

/// Distribution of control-point distances from their image centers,
/// normalized by each image's half-diagonal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RadialStats {
    pub min: Real,
    pub max: Real,
    pub mean: Real,
    pub variance: Real,
    /// 10th and 90th percentiles of the normalized radius.
    pub q10: Real,
    pub q90: Real,
}

/// Radial distribution of point-mode control points over both endpoint
/// images. `None` when fewer than two samples exist.
///
/// The quantile spread `q90 - q10` measures how well the points cover
/// the frame, which decides whether distortion coefficients can be
/// optimized reliably.
pub fn cp_radial_stats(pano: &Panorama) -> Option<RadialStats> {
    let mut radii = Vec::new();
    for cp in pano.control_points() {
        if cp.mode != CpMode::XY {
            continue;
        }
        for (image, x, y) in [(cp.image1, cp.x1, cp.y1), (cp.image2, cp.x2, cp.y2)] {
            let info = pano.image(image);
            let dx = x - info.width as Real / 2.0;
            let dy = y - info.height as Real / 2.0;
            radii.push((dx * dx + dy * dy).sqrt() / info.half_diagonal());
        }
    }
    let m = moments(&radii)?;
    radii.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let quantile = |q: Real| radii[((radii.len() - 1) as Real * q).round() as usize];
    Some(RadialStats {
        min: m.min,
        max: m.max,
        mean: m.mean,
        variance: m.variance,
        q10: quantile(0.1),
        q90: quantile(0.9),
    })
}
