//! The reconstruction state machine.
//!
//! [`PipelineController`] owns the point set and every artifact derived from
//! it. Stages must run in order; re-running an earlier stage discards all
//! artifacts after it. A failed stage leaves the controller exactly as it was.
//!
//! ```text
//! Idle ── refine ──▶ PlanesRefined ── generate_hypothesis ──▶ HypothesisGenerated
//!      ── compute_confidences ──▶ ConfidencesReady ── optimize ──▶ Optimized
//! ```
//!
//! # Example
//!
//! ```ignore
//! use polyrecon::{PipelineController, io};
//!
//! let mut controller = PipelineController::new();
//! controller.load_point_set(io::load_point_set("scan.ply".as_ref())?);
//! controller.refine()?;
//! controller.generate_hypothesis()?;
//! controller.compute_confidences()?;
//! let result = controller.optimize()?;
//! io::save_polygon_mesh(&result.mesh.mesh, "model.ply".as_ref())?;
//! ```

use std::fmt;
use std::time::Instant;

use tracing::info;

use crate::confidence::{FaceAttributes, compute_confidences};
use crate::config::ReconstructionConfig;
use crate::error::{ReconError, ReconResult};
use crate::hypothesis::{CandidateMesh, generate_hypothesis};
use crate::progress::{NoOpObserver, PipelineEvent, PipelineObserver, Stage};
use crate::refine::{RefinementResult, refine_planes};
use crate::selection::{OptimizedMesh, SelectionResult, Weights, check_ready, optimize};
use crate::solver::{SolverBackend, SolverKind, SolverRegistry};
use crate::tracing_ext::log_validation_result;
use crate::types::PointSet;
use crate::validate::{MeshReport, validate_polygon_mesh};

/// Progress of a controller, derived from the artifacts it holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    PlanesRefined,
    HypothesisGenerated,
    ConfidencesReady,
    Optimized,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::PlanesRefined => "planes refined",
            PipelineState::HypothesisGenerated => "hypothesis generated",
            PipelineState::ConfidencesReady => "confidences ready",
            PipelineState::Optimized => "optimized",
        };
        f.write_str(name)
    }
}

/// Drives the reconstruction stages and owns their results.
pub struct PipelineController {
    config: ReconstructionConfig,
    registry: SolverRegistry,
    observer: Box<dyn PipelineObserver>,
    point_set: Option<PointSet>,
    refinement: Option<RefinementResult>,
    candidates: Option<CandidateMesh>,
    attributes: Option<FaceAttributes>,
    selection: Option<SelectionResult>,
}

impl Default for PipelineController {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PipelineController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineController")
            .field("state", &self.state())
            .field("points", &self.point_count())
            .field("candidate_faces", &self.candidate_face_count())
            .field("solver", &self.config.solver.backend)
            .finish_non_exhaustive()
    }
}

impl PipelineController {
    /// Controller with default settings and no observer.
    pub fn new() -> Self {
        Self {
            config: ReconstructionConfig::default(),
            registry: SolverRegistry::new(),
            observer: Box::new(NoOpObserver),
            point_set: None,
            refinement: None,
            candidates: None,
            attributes: None,
            selection: None,
        }
    }

    /// Controller with the given settings.
    pub fn with_config(config: ReconstructionConfig) -> ReconResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            ..Self::new()
        })
    }

    /// Replace the event observer.
    pub fn with_observer(mut self, observer: Box<dyn PipelineObserver>) -> Self {
        self.observer = observer;
        self
    }

    // ========================================================================
    // State and settings
    // ========================================================================

    pub fn state(&self) -> PipelineState {
        if self.selection.is_some() {
            PipelineState::Optimized
        } else if self.attributes.is_some() {
            PipelineState::ConfidencesReady
        } else if self.candidates.is_some() {
            PipelineState::HypothesisGenerated
        } else if self.refinement.is_some() {
            PipelineState::PlanesRefined
        } else {
            PipelineState::Idle
        }
    }

    pub fn config(&self) -> &ReconstructionConfig {
        &self.config
    }

    /// Replace the settings. Artifacts already produced are kept; the new
    /// settings apply to the next stage run.
    pub fn set_config(&mut self, config: ReconstructionConfig) -> ReconResult<()> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    pub fn weights(&self) -> Weights {
        self.config.weights
    }

    /// Set the objective weights for the next [`optimize`](Self::optimize).
    pub fn set_weights(&mut self, weights: Weights) -> ReconResult<()> {
        weights.validate()?;
        self.config.weights = weights;
        Ok(())
    }

    /// Restore the default weights.
    pub fn reset_weights(&mut self) {
        self.config.weights = Weights::default();
    }

    pub fn solver(&self) -> SolverKind {
        self.config.solver.backend
    }

    pub fn set_solver(&mut self, kind: SolverKind) {
        self.config.solver.backend = kind;
    }

    /// Install a custom backend under `kind`.
    pub fn register_backend(&mut self, kind: SolverKind, backend: Box<dyn SolverBackend>) {
        if let Some(previous) = self.registry.register(kind, backend) {
            info!(kind = kind.as_str(), replaced = previous.name(), "Solver backend replaced");
        }
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Replace the input and discard every artifact.
    pub fn load_point_set(&mut self, point_set: PointSet) {
        info!(
            points = point_set.len(),
            groups = point_set.groups.len(),
            "Point set loaded"
        );
        self.point_set = Some(point_set);
        self.clear_from(PipelineState::Idle);
    }

    /// Merge near-duplicate planar groups.
    pub fn refine(&mut self) -> ReconResult<&RefinementResult> {
        let result = self.observe(Stage::Refine, || {
            let set = self.require_point_set(Stage::Refine)?;
            if set.groups.is_empty() {
                return Err(ReconError::precondition(
                    "refine",
                    "the point set has no planar groups",
                ));
            }
            refine_planes(set, &self.config.refine)
        })?;
        self.clear_from(PipelineState::PlanesRefined);
        Ok(self.refinement.insert(result))
    }

    /// Build candidate faces from the refined planes.
    pub fn generate_hypothesis(&mut self) -> ReconResult<&CandidateMesh> {
        let candidates = self.observe(Stage::GenerateHypothesis, || {
            let set = self.require_point_set(Stage::GenerateHypothesis)?;
            let refinement = self.refinement.as_ref().ok_or_else(|| {
                ReconError::precondition("generate_hypothesis", "planes have not been refined")
            })?;
            generate_hypothesis(set, &refinement.groups, &self.config.hypothesis)
        })?;
        self.clear_from(PipelineState::HypothesisGenerated);
        Ok(self.candidates.insert(candidates))
    }

    /// Score every candidate face.
    pub fn compute_confidences(&mut self) -> ReconResult<&FaceAttributes> {
        let attributes = self.observe(Stage::ComputeConfidences, || {
            let set = self.require_point_set(Stage::ComputeConfidences)?;
            let (Some(refinement), Some(candidates)) =
                (self.refinement.as_ref(), self.candidates.as_ref())
            else {
                return Err(ReconError::precondition(
                    "compute_confidences",
                    "no candidate faces have been generated",
                ));
            };
            compute_confidences(candidates, set, &refinement.groups, &self.config.confidence)
        })?;
        self.clear_from(PipelineState::ConfidencesReady);
        Ok(self.attributes.insert(attributes))
    }

    /// Select the faces of the final surface with the current weights and solver.
    ///
    /// May be called repeatedly; earlier stages are reused.
    pub fn optimize(&mut self) -> ReconResult<&SelectionResult> {
        let result = self.observe(Stage::Optimize, || {
            let (Some(candidates), Some(attributes)) =
                (self.candidates.as_ref(), self.attributes.as_ref())
            else {
                return Err(ReconError::precondition(
                    "optimize",
                    "face confidences have not been computed",
                ));
            };
            check_ready(candidates, attributes)?;
            optimize(
                candidates,
                attributes,
                &self.config.weights,
                self.config.solver.backend,
                &self.registry,
                &self.config.solver.options(),
                self.observer.as_ref(),
            )
        })?;
        log_validation_result(&validate_polygon_mesh(&result.mesh.mesh));
        Ok(self.selection.insert(result))
    }

    /// Run every stage from refinement to optimization.
    pub fn run_all(&mut self) -> ReconResult<&SelectionResult> {
        self.refine()?;
        self.generate_hypothesis()?;
        self.compute_confidences()?;
        self.optimize()
    }

    fn require_point_set(&self, stage: Stage) -> ReconResult<&PointSet> {
        self.point_set
            .as_ref()
            .ok_or_else(|| ReconError::precondition(stage.as_str(), "no point set has been loaded"))
    }

    /// Drop every artifact produced after `state`.
    fn clear_from(&mut self, state: PipelineState) {
        if state < PipelineState::PlanesRefined {
            self.refinement = None;
        }
        if state < PipelineState::HypothesisGenerated {
            self.candidates = None;
        }
        if state < PipelineState::ConfidencesReady {
            self.attributes = None;
        }
        self.selection = None;
    }

    fn observe<T>(&self, stage: Stage, run: impl FnOnce() -> ReconResult<T>) -> ReconResult<T> {
        self.observer.on_event(&PipelineEvent::StageStarted { stage });
        let start = Instant::now();
        match run() {
            Ok(value) => {
                self.observer.on_event(&PipelineEvent::StageFinished {
                    stage,
                    elapsed: start.elapsed(),
                });
                Ok(value)
            }
            Err(e) => {
                self.observer.on_event(&PipelineEvent::StageFailed {
                    stage,
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    // ========================================================================
    // Artifacts and derived queries
    // ========================================================================

    pub fn point_set(&self) -> Option<&PointSet> {
        self.point_set.as_ref()
    }

    pub fn refinement(&self) -> Option<&RefinementResult> {
        self.refinement.as_ref()
    }

    pub fn candidates(&self) -> Option<&CandidateMesh> {
        self.candidates.as_ref()
    }

    pub fn attributes(&self) -> Option<&FaceAttributes> {
        self.attributes.as_ref()
    }

    pub fn selection(&self) -> Option<&SelectionResult> {
        self.selection.as_ref()
    }

    pub fn optimized_mesh(&self) -> Option<&OptimizedMesh> {
        self.selection.as_ref().map(|s| &s.mesh)
    }

    /// Validation report of the optimized surface.
    pub fn report(&self) -> Option<MeshReport> {
        self.optimized_mesh().map(|m| validate_polygon_mesh(&m.mesh))
    }

    pub fn point_count(&self) -> usize {
        self.point_set.as_ref().map_or(0, PointSet::len)
    }

    /// Refined groups when available, otherwise the input groups.
    pub fn group_count(&self) -> usize {
        match (&self.refinement, &self.point_set) {
            (Some(r), _) => r.groups.len(),
            (None, Some(set)) => set.groups.len(),
            (None, None) => 0,
        }
    }

    pub fn candidate_face_count(&self) -> usize {
        self.candidates.as_ref().map_or(0, CandidateMesh::face_count)
    }

    pub fn optimized_face_count(&self) -> usize {
        self.optimized_mesh().map_or(0, OptimizedMesh::face_count)
    }

    pub fn optimized_planar_component_count(&self) -> usize {
        self.optimized_mesh()
            .map_or(0, OptimizedMesh::planar_component_count)
    }
}
