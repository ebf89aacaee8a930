//! Tracing helpers for reconstruction stages.
//!
//! Targets used across the crate:
//!
//! - `polyrecon::timing`: stage durations (INFO on completion)
//! - `polyrecon::candidates`: arrangement statistics
//! - `polyrecon::selection`: solver outcome
//! - `polyrecon::io`: file operations
//!
//! Set `RUST_LOG=polyrecon=debug` for detailed output, or
//! `RUST_LOG=polyrecon::timing=info` for timing only.

use std::time::Instant;
use tracing::{Span, debug, info, warn};

use crate::hypothesis::CandidateMesh;
use crate::selection::SelectionResult;
use crate::validate::MeshReport;

/// A performance timer that logs duration on drop.
///
/// ```rust,ignore
/// fn expensive_stage() {
///     let _timer = OperationTimer::new("expensive_stage");
///     // ... do work ...
/// } // duration logged here
/// ```
pub struct OperationTimer {
    name: &'static str,
    start: Instant,
    span: Span,
}

impl OperationTimer {
    /// Create a new operation timer.
    pub fn new(name: &'static str) -> Self {
        let span = tracing::info_span!("recon_operation", operation = name);
        debug!(target: "polyrecon::timing", operation = name, "Starting operation");
        Self {
            name,
            start: Instant::now(),
            span,
        }
    }

    /// Create a timer recording the size of the stage's input.
    pub fn with_context(name: &'static str, items: usize, points: usize) -> Self {
        let span = tracing::info_span!(
            "recon_operation",
            operation = name,
            items = items,
            points = points
        );
        debug!(
            target: "polyrecon::timing",
            operation = name,
            items = items,
            points = points,
            "Starting operation"
        );
        Self {
            name,
            start: Instant::now(),
            span,
        }
    }

    /// Get the elapsed time in milliseconds.
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Get the span for this timer.
    pub fn span(&self) -> &Span {
        &self.span
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        info!(
            target: "polyrecon::timing",
            operation = self.name,
            elapsed_ms = format!("{:.2}", self.elapsed_ms()),
            "Operation completed"
        );
    }
}

/// Log arrangement statistics at debug level.
pub fn log_candidate_stats(candidates: &CandidateMesh) {
    let fan_sizes = candidates
        .edges
        .iter()
        .fold([0usize; 3], |mut acc, e| {
            acc[e.faces.len().min(3) - 1] += 1;
            acc
        });
    debug!(
        target: "polyrecon::candidates",
        planes = candidates.planes.len(),
        vertices = candidates.mesh.vertex_count(),
        faces = candidates.mesh.face_count(),
        boundary_edges = fan_sizes[0],
        two_face_edges = fan_sizes[1],
        crossing_edges = fan_sizes[2],
        "Candidate arrangement"
    );
}

/// Log the outcome of a face selection.
pub fn log_selection_result(result: &SelectionResult) {
    info!(
        target: "polyrecon::selection",
        backend = result.backend.as_str(),
        status = ?result.status,
        selected = result.selected.len(),
        objective = format!("{:.6}", result.objective),
        nodes = result.nodes,
        "Face selection completed"
    );
}

/// Log a mesh validation report.
pub fn log_validation_result(report: &MeshReport) {
    if report.is_watertight && report.is_manifold {
        info!(
            target: "polyrecon::validation",
            faces = report.face_count,
            planar_components = report.planar_component_count,
            "Reconstructed surface is closed"
        );
    } else {
        warn!(
            target: "polyrecon::validation",
            boundary_edges = report.boundary_edge_count,
            non_manifold_edges = report.non_manifold_edge_count,
            "Reconstructed surface is not closed"
        );
    }
}

/// Log a file I/O operation.
pub fn log_io_operation(operation: &str, path: &std::path::Path, format: &str, success: bool) {
    if success {
        info!(
            target: "polyrecon::io",
            operation = operation,
            path = path.display().to_string(),
            format = format,
            "I/O operation completed"
        );
    } else {
        warn!(
            target: "polyrecon::io",
            operation = operation,
            path = path.display().to_string(),
            format = format,
            "I/O operation failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_timer() {
        let timer = OperationTimer::new("test_operation");
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(timer.elapsed_ms() >= 10.0);
    }

    #[test]
    fn test_timer_with_context() {
        let timer = OperationTimer::with_context("refine", 6, 600);
        assert_eq!(timer.name, "refine");
    }
}
