//! Error types for reconstruction with rich diagnostics.
//!
//! Every failure carries a machine-readable code, an optional location and a
//! recovery suggestion, and renders through miette in the terminal.
//!
//! # Error Codes
//!
//! Each error has a unique code in the format `RECON-XXXX`:
//! - `RECON-1xxx`: Usage errors (stage requested out of order, bad parameters)
//! - `RECON-2xxx`: Degenerate geometry (too few planes or intersections)
//! - `RECON-3xxx`: Solver failures (infeasible, budget exhausted)
//! - `RECON-4xxx`: Storage errors (reading, writing, parsing)
//! - `RECON-9xxx`: Internal invariant violations
//!
//! Only the `9xxx` class is fatal. Everything else can be retried after
//! adjusting tolerances or weights.
//!
//! # Example
//!
//! ```
//! use polyrecon::{ErrorCode, ReconError};
//!
//! let err = ReconError::precondition("optimize", "face confidences have not been computed");
//! assert_eq!(err.code(), ErrorCode::Precondition);
//! assert_eq!(err.code().as_str(), "RECON-1001");
//! assert!(!err.is_fatal());
//! ```

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for reconstruction operations.
pub type ReconResult<T> = Result<T, ReconError>;

/// Machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Usage errors (1xxx)
    /// RECON-1001: Stage requested before its inputs exist
    Precondition = 1001,
    /// RECON-1002: Parameter out of range
    InvalidParameter = 1002,

    // Geometry errors (2xxx)
    /// RECON-2001: No group has a usable plane
    InsufficientPlanes = 2001,
    /// RECON-2002: The arrangement produced no candidate face
    DegenerateGeometry = 2002,

    // Solver errors (3xxx)
    /// RECON-3001: The selection program has no feasible assignment
    SolverInfeasible = 3001,
    /// RECON-3002: The solver ran out of time or nodes
    SolverTimeout = 3002,
    /// RECON-3003: The backend failed or returned an unusable assignment
    SolverFailed = 3003,

    // Storage errors (4xxx)
    /// RECON-4001: Failed to read file
    IoRead = 4001,
    /// RECON-4002: Failed to write file
    IoWrite = 4002,
    /// RECON-4003: Failed to parse file contents
    ParseError = 4003,
    /// RECON-4004: Unsupported file format
    UnsupportedFormat = 4004,

    // Internal (9xxx)
    /// RECON-9001: An internal invariant was broken
    InternalInvariant = 9001,
}

impl ErrorCode {
    /// Returns the error code as a string in the format `RECON-XXXX`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Precondition => "RECON-1001",
            ErrorCode::InvalidParameter => "RECON-1002",
            ErrorCode::InsufficientPlanes => "RECON-2001",
            ErrorCode::DegenerateGeometry => "RECON-2002",
            ErrorCode::SolverInfeasible => "RECON-3001",
            ErrorCode::SolverTimeout => "RECON-3002",
            ErrorCode::SolverFailed => "RECON-3003",
            ErrorCode::IoRead => "RECON-4001",
            ErrorCode::IoWrite => "RECON-4002",
            ErrorCode::ParseError => "RECON-4003",
            ErrorCode::UnsupportedFormat => "RECON-4004",
            ErrorCode::InternalInvariant => "RECON-9001",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Recovery suggestions for reconstruction errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoverySuggestion {
    /// Run the named stages first.
    RunStages { stages: Vec<String> },
    /// Adjust parameters and retry the same stage.
    AdjustParameters { parameters: Vec<(String, String)> },
    /// Check the input point cloud.
    CheckInput { checks: Vec<String> },
    /// Use a different file format.
    UseDifferentFormat { suggested: Vec<String> },
    /// Report the failure; the input is not at fault.
    ReportBug,
    /// No automatic recovery available.
    None,
}

impl std::fmt::Display for RecoverySuggestion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoverySuggestion::RunStages { stages } => {
                write!(f, "Run these stages first: {}", stages.join(" -> "))
            }
            RecoverySuggestion::AdjustParameters { parameters } => {
                let params: Vec<String> = parameters
                    .iter()
                    .map(|(k, v)| format!("{} = {}", k, v))
                    .collect();
                write!(f, "Try adjusting: {}", params.join(", "))
            }
            RecoverySuggestion::CheckInput { checks } => {
                write!(f, "Check the input point cloud for: {}", checks.join(", "))
            }
            RecoverySuggestion::UseDifferentFormat { suggested } => {
                write!(f, "Try using a different format: {}", suggested.join(", "))
            }
            RecoverySuggestion::ReportBug => {
                write!(
                    f,
                    "This indicates a bug in candidate generation; please report it with the input"
                )
            }
            RecoverySuggestion::None => write!(f, "No automatic recovery available"),
        }
    }
}

/// Where in the reconstruction an error was detected.
#[derive(Debug, Clone)]
pub enum ReconLocation {
    /// A pipeline stage.
    Stage { name: &'static str },
    /// A candidate face.
    Face { index: usize },
    /// An edge between two pooled vertices.
    Edge { vertex_a: u32, vertex_b: u32 },
    /// A position in a file.
    File { path: PathBuf },
}

impl std::fmt::Display for ReconLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReconLocation::Stage { name } => write!(f, "stage '{}'", name),
            ReconLocation::Face { index } => write!(f, "candidate face {}", index),
            ReconLocation::Edge { vertex_a, vertex_b } => {
                write!(f, "edge between vertices {} and {}", vertex_a, vertex_b)
            }
            ReconLocation::File { path } => write!(f, "{}", path.display()),
        }
    }
}

/// Errors that can occur while reconstructing a surface.
#[derive(Debug, Error, Diagnostic)]
pub enum ReconError {
    /// A stage was requested before its inputs exist.
    #[error("cannot {operation}: {details}")]
    #[diagnostic(
        code(recon::usage::precondition),
        help("Stages run in order: refine, generate hypothesis, compute confidences, optimize.")
    )]
    Precondition {
        operation: &'static str,
        details: String,
    },

    /// A parameter is out of range.
    #[error("invalid parameter '{name}': {details}")]
    #[diagnostic(code(recon::usage::parameter))]
    InvalidParameter { name: &'static str, details: String },

    /// No planar group could support a plane.
    #[error("no usable planes: {details}")]
    #[diagnostic(
        code(recon::geometry::planes),
        help("Check if the input point cloud has good planar segments.")
    )]
    InsufficientPlanes { details: String },

    /// The plane arrangement produced no candidate faces.
    #[error("candidate generation failed: {details}")]
    #[diagnostic(
        code(recon::geometry::degenerate),
        help(
            "Check if the input point cloud has good planar segments, or loosen the refinement tolerances."
        )
    )]
    DegenerateGeometry { details: String },

    /// The selection program has no feasible assignment.
    #[error("face selection is infeasible with the '{backend}' solver")]
    #[diagnostic(code(recon::solver::infeasible))]
    SolverInfeasible { backend: String },

    /// The solver exhausted its time or node budget.
    #[error("'{backend}' solver stopped after {elapsed_secs:.1}s and {nodes} nodes without a proven optimum")]
    #[diagnostic(
        code(recon::solver::timeout),
        help("Raise the time limit, or accept the incumbent on timeout.")
    )]
    SolverTimeout {
        backend: String,
        elapsed_secs: f64,
        nodes: u64,
    },

    /// The backend reported an error or an assignment violating the program.
    #[error("'{backend}' solver failed: {details}")]
    #[diagnostic(
        code(recon::solver::failed),
        help("Try another built-in backend, such as branch-and-bound.")
    )]
    SolverFailed { backend: String, details: String },

    /// Error reading from a file.
    #[error("failed to read {path}")]
    #[diagnostic(
        code(recon::io::read),
        help("Check that the file exists and is readable. Try: ls -la {}", path.display())
    )]
    IoRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error writing to a file.
    #[error("failed to write {path}")]
    #[diagnostic(
        code(recon::io::write),
        help("Check that the directory exists and is writable")
    )]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error parsing file contents.
    #[error("failed to parse {path}: {details}")]
    #[diagnostic(code(recon::io::parse))]
    ParseError { path: PathBuf, details: String },

    /// Unsupported file format.
    #[error("unsupported file format: {extension:?}")]
    #[diagnostic(code(recon::io::format), help("Supported formats: PLY, OBJ (export only)"))]
    UnsupportedFormat { extension: Option<String> },

    /// An internal invariant was broken. Never caused by user input.
    #[error("internal invariant violated: {details}")]
    #[diagnostic(
        code(recon::internal::invariant),
        severity(Error),
        help("This is a bug, not a problem with the input.")
    )]
    InternalInvariant {
        details: String,
        location: Option<ReconLocation>,
    },
}

impl ReconError {
    /// Returns the machine-readable error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            ReconError::Precondition { .. } => ErrorCode::Precondition,
            ReconError::InvalidParameter { .. } => ErrorCode::InvalidParameter,
            ReconError::InsufficientPlanes { .. } => ErrorCode::InsufficientPlanes,
            ReconError::DegenerateGeometry { .. } => ErrorCode::DegenerateGeometry,
            ReconError::SolverInfeasible { .. } => ErrorCode::SolverInfeasible,
            ReconError::SolverTimeout { .. } => ErrorCode::SolverTimeout,
            ReconError::SolverFailed { .. } => ErrorCode::SolverFailed,
            ReconError::IoRead { .. } => ErrorCode::IoRead,
            ReconError::IoWrite { .. } => ErrorCode::IoWrite,
            ReconError::ParseError { .. } => ErrorCode::ParseError,
            ReconError::UnsupportedFormat { .. } => ErrorCode::UnsupportedFormat,
            ReconError::InternalInvariant { .. } => ErrorCode::InternalInvariant,
        }
    }

    /// Whether this error signals a bug rather than bad input.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ReconError::InternalInvariant { .. })
    }

    /// Returns a recovery suggestion for this error.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self {
            ReconError::Precondition { operation, .. } => RecoverySuggestion::RunStages {
                stages: prerequisite_stages(operation),
            },
            ReconError::InvalidParameter { name, .. } => RecoverySuggestion::AdjustParameters {
                parameters: vec![((*name).into(), "a finite, non-negative value".into())],
            },
            ReconError::InsufficientPlanes { .. } => RecoverySuggestion::CheckInput {
                checks: vec![
                    "segment_index labels".into(),
                    "groups with at least 3 non-collinear points".into(),
                ],
            },
            ReconError::DegenerateGeometry { .. } => RecoverySuggestion::AdjustParameters {
                parameters: vec![
                    ("angle_threshold_deg".into(), "try a smaller value".into()),
                    ("distance_threshold".into(), "try a smaller value".into()),
                ],
            },
            ReconError::SolverInfeasible { .. } => RecoverySuggestion::AdjustParameters {
                parameters: vec![("bbox_padding".into(), "try 0".into())],
            },
            ReconError::SolverTimeout { .. } => RecoverySuggestion::AdjustParameters {
                parameters: vec![
                    ("time_limit_secs".into(), "try a larger value".into()),
                    ("accept_incumbent_on_timeout".into(), "true".into()),
                ],
            },
            ReconError::SolverFailed { .. } => RecoverySuggestion::AdjustParameters {
                parameters: vec![("solver.backend".into(), "branch-and-bound".into())],
            },
            ReconError::IoRead { .. } | ReconError::IoWrite { .. } => {
                RecoverySuggestion::CheckInput {
                    checks: vec!["file path".into(), "file permissions".into()],
                }
            }
            ReconError::ParseError { .. } => RecoverySuggestion::CheckInput {
                checks: vec!["PLY header".into(), "vertex properties x, y, z".into()],
            },
            ReconError::UnsupportedFormat { .. } => RecoverySuggestion::UseDifferentFormat {
                suggested: vec!["PLY".into()],
            },
            ReconError::InternalInvariant { .. } => RecoverySuggestion::ReportBug,
        }
    }

    /// Returns location information if available.
    pub fn location(&self) -> Option<ReconLocation> {
        match self {
            ReconError::Precondition { operation, .. } => {
                Some(ReconLocation::Stage { name: operation })
            }
            ReconError::IoRead { path, .. }
            | ReconError::IoWrite { path, .. }
            | ReconError::ParseError { path, .. } => {
                Some(ReconLocation::File { path: path.clone() })
            }
            ReconError::InternalInvariant { location, .. } => location.clone(),
            _ => None,
        }
    }

    // Constructor helpers for common error patterns

    /// Create a Precondition error.
    pub fn precondition(operation: &'static str, details: impl Into<String>) -> Self {
        ReconError::Precondition {
            operation,
            details: details.into(),
        }
    }

    /// Create an InvalidParameter error.
    pub fn invalid_parameter(name: &'static str, details: impl Into<String>) -> Self {
        ReconError::InvalidParameter {
            name,
            details: details.into(),
        }
    }

    /// Create an InsufficientPlanes error.
    pub fn insufficient_planes(details: impl Into<String>) -> Self {
        ReconError::InsufficientPlanes {
            details: details.into(),
        }
    }

    /// Create a DegenerateGeometry error.
    pub fn degenerate_geometry(details: impl Into<String>) -> Self {
        ReconError::DegenerateGeometry {
            details: details.into(),
        }
    }

    /// Create an InternalInvariant error.
    pub fn internal_invariant(details: impl Into<String>, location: Option<ReconLocation>) -> Self {
        ReconError::InternalInvariant {
            details: details.into(),
            location,
        }
    }

    /// Create an IoRead error.
    pub fn io_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ReconError::IoRead {
            path: path.into(),
            source,
        }
    }

    /// Create an IoWrite error.
    pub fn io_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ReconError::IoWrite {
            path: path.into(),
            source,
        }
    }

    /// Create a ParseError.
    pub fn parse_error(path: impl Into<PathBuf>, details: impl Into<String>) -> Self {
        ReconError::ParseError {
            path: path.into(),
            details: details.into(),
        }
    }
}

fn prerequisite_stages(operation: &str) -> Vec<String> {
    let order = ["load", "refine", "generate", "confidences", "optimize"];
    let upto = order
        .iter()
        .position(|stage| operation.contains(stage))
        .unwrap_or(0);
    order[..upto].iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = ReconError::precondition("optimize", "no confidences");
        assert_eq!(err.code(), ErrorCode::Precondition);
        assert_eq!(err.code().as_str(), "RECON-1001");

        let err = ReconError::internal_invariant("edge with 3 faces", None);
        assert_eq!(err.code().as_str(), "RECON-9001");
    }

    #[test]
    fn test_only_invariant_errors_are_fatal() {
        assert!(ReconError::internal_invariant("boom", None).is_fatal());
        assert!(!ReconError::degenerate_geometry("no faces").is_fatal());
        assert!(
            !ReconError::SolverInfeasible {
                backend: "branch-and-bound".into()
            }
            .is_fatal()
        );
    }

    #[test]
    fn test_precondition_suggests_earlier_stages() {
        let err = ReconError::precondition("optimize", "no confidences");
        match err.recovery_suggestion() {
            RecoverySuggestion::RunStages { stages } => {
                assert_eq!(stages, vec!["load", "refine", "generate", "confidences"]);
            }
            other => panic!("Expected RunStages suggestion, got {:?}", other),
        }
    }

    #[test]
    fn test_location_info() {
        let err = ReconError::internal_invariant(
            "edge shared by three faces of one plane",
            Some(ReconLocation::Edge {
                vertex_a: 3,
                vertex_b: 7,
            }),
        );
        let location = err.location().unwrap();
        assert_eq!(location.to_string(), "edge between vertices 3 and 7");
    }

    #[test]
    fn test_error_display() {
        let err = ReconError::SolverTimeout {
            backend: "enumeration".into(),
            elapsed_secs: 2.5,
            nodes: 1000,
        };
        let display = format!("{}", err);
        assert!(display.contains("enumeration"));
        assert!(display.contains("2.5s"));
        assert!(display.contains("1000 nodes"));
    }
}
