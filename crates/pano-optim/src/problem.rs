//! Geometric alignment as a nonlinear least-squares problem.
//!
//! The free-parameter vector is assembled from the per-image optimize
//! vector through the link model: each link class that contains at least
//! one free variable contributes exactly one entry, no matter how many
//! images share it. Residuals are per-control-point reprojection
//! distances on the panorama surface, evaluated through the external
//! transform oracle at the candidate parameters.

use std::cell::RefCell;
use std::collections::BTreeSet;

use anyhow::{ensure, Result};
use nalgebra::DVector;
use pano_core::{
    ControlPoint, CpMode, OptimizeVector, Panorama, Real, TransformOracle, VarName,
};

use crate::traits::NllsProblem;

/// Signed reprojection residual of one control point under the
/// panorama's current variables, in panorama-surface units.
///
/// Point mode measures the distance between the two projections; line
/// modes measure the mismatch along a single surface axis.
pub fn cp_residual<O: TransformOracle>(pano: &Panorama, oracle: &O, cp: &ControlPoint) -> Real {
    let s1 = oracle.project(pano, cp.image1, cp.p1());
    let s2 = oracle.project(pano, cp.image2, cp.p2());
    let d = s1 - s2;
    match cp.mode {
        CpMode::XY => d.norm(),
        CpMode::X => d.x,
        CpMode::Y => d.y,
    }
}

/// Refresh the stored `error` of every control point from a projection
/// pass at the current variables.
pub fn update_cp_errors<O: TransformOracle>(pano: &mut Panorama, oracle: &O) {
    for i in 0..pano.control_points().len() {
        let cp = pano.control_points()[i].clone();
        let err = cp_residual(pano, oracle, &cp).abs();
        pano.set_cp_error(i, err);
    }
}

/// A geometric optimization problem over a working copy of the panorama.
pub struct GeomProblem<'a, O: TransformOracle> {
    pano: RefCell<Panorama>,
    oracle: &'a O,
    /// One `(image, name)` per free link class: the member through which
    /// the class is read and written.
    layout: Vec<(usize, VarName)>,
    /// Indices of the control points contributing residuals.
    cp_indices: Vec<usize>,
}

impl<'a, O: TransformOracle> GeomProblem<'a, O> {
    /// Build a problem over all control points of `pano`.
    pub fn new(pano: Panorama, oracle: &'a O, optvec: &OptimizeVector) -> Result<Self> {
        let all: Vec<usize> = (0..pano.control_points().len()).collect();
        Self::with_control_points(pano, oracle, optvec, all)
    }

    /// Build a problem restricted to the given control points.
    pub fn with_control_points(
        pano: Panorama,
        oracle: &'a O,
        optvec: &OptimizeVector,
        cp_indices: Vec<usize>,
    ) -> Result<Self> {
        ensure!(
            optvec.len() == pano.num_images(),
            "optimize vector has {} entries for {} images",
            optvec.len(),
            pano.num_images()
        );
        let mut layout = Vec::new();
        let mut seen_classes: BTreeSet<(usize, VarName)> = BTreeSet::new();
        for (image, names) in optvec.iter().enumerate() {
            for &name in names {
                // One entry per link class: any member requesting "free"
                // frees the whole class.
                let class = pano.link_model().representative(image, name);
                if seen_classes.insert(class) {
                    layout.push((image, name));
                }
            }
        }
        Ok(Self {
            pano: RefCell::new(pano),
            oracle,
            layout,
            cp_indices,
        })
    }

    /// Current values of the free parameters.
    pub fn initial_params(&self) -> DVector<Real> {
        let pano = self.pano.borrow();
        DVector::from_iterator(
            self.layout.len(),
            self.layout.iter().map(|&(img, name)| pano.value(img, name)),
        )
    }

    /// Write a candidate parameter vector into the working copy,
    /// propagating through link classes.
    pub fn write_params(&self, x: &DVector<Real>) {
        let mut pano = self.pano.borrow_mut();
        for (i, &(img, name)) in self.layout.iter().enumerate() {
            pano.set_value(img, name, x[i]);
        }
    }

    /// Number of entries in the free-parameter vector.
    pub fn num_free(&self) -> usize {
        self.layout.len()
    }

    /// Consume the problem, returning the working copy with whatever
    /// parameters were last written.
    pub fn into_panorama(self) -> Panorama {
        self.pano.into_inner()
    }
}

impl<O: TransformOracle> NllsProblem for GeomProblem<'_, O> {
    fn num_params(&self) -> usize {
        self.layout.len()
    }

    fn num_residuals(&self) -> usize {
        self.cp_indices.len()
    }

    fn residuals(&self, x: &DVector<Real>) -> DVector<Real> {
        self.write_params(x);
        let pano = self.pano.borrow();
        DVector::from_iterator(
            self.cp_indices.len(),
            self.cp_indices
                .iter()
                .map(|&i| cp_residual(&pano, self.oracle, &pano.control_points()[i])),
        )
    }
}
