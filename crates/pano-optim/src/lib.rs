//! Optimization passes for panorama alignment.
//!
//! Built on the data model in `pano-core`, this crate provides:
//! - a generic damped Gauss-Newton solver ([`lm::minimize`]) over the
//!   [`NllsProblem`] trait,
//! - the geometric alignment problem ([`GeomProblem`]) mapping linked
//!   variables to a free-parameter vector and control points to
//!   reprojection residuals,
//! - the seeded optimization driver ([`auto_optimize`]) and single
//!   global pass ([`optimize_global`]),
//! - heuristic variable selection and the staged run
//!   ([`smart_optimize`]),
//! - statistical outlier pruning ([`prune_pairwise`], [`prune_global`]),
//! - the covariance-based leveling solver ([`straighten`]).

/// Seeded and global optimization runs.
pub mod driver;
/// Panorama leveling via the orientation covariance.
pub mod leveling;
/// The damped Gauss-Newton minimizer.
pub mod lm;
/// The geometric least-squares problem.
pub mod problem;
/// Statistical control-point pruning.
pub mod pruning;
/// Variable-selection heuristics and the staged optimization.
pub mod smart;
/// Control-point error and distribution statistics.
pub mod stats;
/// Solver abstractions: problem trait, options, reports.
pub mod traits;

pub use driver::{auto_optimize, optimize_global, OptimizationResult, OptimizeError};
pub use leveling::{apply_rotation, straighten, LevelingOutcome};
pub use problem::{cp_residual, update_cp_errors, GeomProblem};
pub use pruning::{prune_global, prune_pairwise, GlobalPruneOptions};
pub use smart::{create_opt_vars, smart_optimize, OptMode};
pub use stats::{cp_error_stats, cp_radial_stats, ErrorStats, RadialStats};
pub use traits::{NllsProblem, SolveOptions, SolveReport, StopReason};
