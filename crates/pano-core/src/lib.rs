//! Core data model and math primitives for panorama alignment.
//!
//! This crate contains:
//! - linear algebra type aliases (`Real`, `Vec2`, `Mat3`, ...) and the
//!   yaw/pitch/roll rotation conventions,
//! - a symmetric Jacobi eigensolver ([`eig_jacobi`]),
//! - the panorama data model: per-image [`VariableSet`]s, the
//!   cross-image [`LinkModel`], [`ControlPoint`]s and the [`Panorama`]
//!   container,
//! - the [`CorrespondenceGraph`] and its connectivity analysis,
//! - the external-collaborator seams: [`TransformOracle`] for
//!   image-to-surface projection and [`ProgressReporter`] for progress
//!   and cooperative cancellation.

/// Linear algebra aliases, rotations and the eigen solver.
pub mod math;
/// Per-image variables and the cross-image linking model.
pub mod variables;
/// Control points.
pub mod cpoint;
/// The panorama container and external-interface traits.
pub mod panorama;
/// Correspondence graph and connectivity analysis.
pub mod graph;
/// Synthetic oracles and scenario builders for tests.
pub mod test_utils;

pub use cpoint::{ControlPoint, CpMode};
pub use graph::CorrespondenceGraph;
pub use math::{eig_jacobi, EigenDecomposition, Mat3, Real, Vec2, Vec3};
pub use panorama::{
    ImageInfo, NoProgress, PanoError, Panorama, ProgressReporter, Subset, TransformOracle,
};
pub use variables::{LinkModel, OptimizeVector, VarName, VariableSet};
