//! Polygonal surface reconstruction from plane-segmented point clouds.
//!
//! The reconstruction follows a hypothesize-and-select scheme: the planes of
//! the input segments are intersected into a superset of convex candidate
//! faces, every face is scored against the points, and a 0/1 program picks
//! the subset that forms a watertight surface.
//!
//! # Pipeline
//!
//! | Stage | Function | Produces |
//! |---|---|---|
//! | Plane refinement | [`refine::refine_planes`] | merged [`PlanarGroup`]s |
//! | Hypothesis | [`hypothesis::generate_hypothesis`] | [`CandidateMesh`] |
//! | Confidences | [`confidence::compute_confidences`] | [`FaceAttributes`] |
//! | Selection | [`selection::optimize`] | [`SelectionResult`] |
//!
//! [`PipelineController`] runs the stages in order, owns their results and
//! rejects out-of-order requests with [`ReconError::Precondition`].
//!
//! # Input
//!
//! Point sets are PLY files whose vertices carry `x y z`, optional normals
//! `nx ny nz` and an integer `segment_index`. A negative index marks a point
//! that belongs to no planar segment.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::path::Path;
//! use polyrecon::{PipelineController, Weights, io};
//!
//! let mut controller = PipelineController::new();
//! controller.load_point_set(io::load_point_set(Path::new("building.ply")).unwrap());
//! controller.set_weights(Weights::new(0.43, 0.27, 0.3)).unwrap();
//!
//! let result = controller.run_all().unwrap();
//! println!(
//!     "{} faces, {} planar components",
//!     result.mesh.face_count(),
//!     result.mesh.planar_component_count()
//! );
//! io::save_polygon_mesh(&result.mesh.mesh, Path::new("building_model.ply")).unwrap();
//! ```
//!
//! # Solvers
//!
//! The selection is solved by a [`SolverBackend`] looked up in a
//! [`SolverRegistry`] by [`SolverKind`]. The default backend is the
//! `microlp` mixed-integer solver (through `good_lp`); an in-crate
//! branch-and-bound and an exhaustive enumeration backend serve as
//! cross-checks. Other solvers can be registered in their place.

mod error;
pub mod tracing_ext;
mod types;

pub mod confidence;
pub mod config;
pub mod controller;
pub mod geometry;
pub mod hypothesis;
pub mod io;
pub mod progress;
pub mod refine;
pub mod selection;
pub mod solver;
pub mod validate;

pub use error::{ErrorCode, ReconError, ReconLocation, ReconResult, RecoverySuggestion};
pub use types::{
    FaceColor, PlanarGroup, Plane, PlaneFrame, Point, PointSet, PolygonFace, PolygonMesh, edge_key,
};

pub use confidence::{ConfidenceParams, FaceAttributes, FaceConfidence, PointConfidence};
pub use config::{ConfigError, ReconstructionConfig, SolverConfig};
pub use controller::{PipelineController, PipelineState};
pub use hypothesis::{CandidateMesh, HypothesisParams};
pub use progress::{CallbackObserver, EventLog, NoOpObserver, PipelineEvent, PipelineObserver, Stage};
pub use refine::{RefineParams, RefinementResult};
pub use selection::{OptimizedMesh, SelectionResult, Weights};
pub use solver::{
    LinearProgram, SolveError, SolveStatus, Solution, SolverBackend, SolverKind, SolverOptions,
    SolverRegistry,
};
pub use validate::{MeshReport, validate_polygon_mesh};
