//! Binary linear programs and the backends that solve them.
//!
//! Face selection is expressed as a [`LinearProgram`] over 0/1 variables and
//! handed to a [`SolverBackend`]. Backends are looked up by [`SolverKind`] in a
//! [`SolverRegistry`], which ships with three exact solvers:
//!
//! - [`SolverKind::Mip`] (default): `microlp` through `good_lp`, bounded by
//!   the LP relaxation.
//! - [`SolverKind::BranchAndBound`]: in-crate depth-first search with
//!   constraint propagation and objective bounding, for small programs and
//!   cross-checks.
//! - [`SolverKind::Enumeration`]: the same search without objective pruning.
//!
//! Callers can register their own backend under any kind.

mod branch_bound;
mod mip;

pub use branch_bound::BranchAndBound;
pub use mip::MipSolver;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use hashbrown::HashMap;
use thiserror::Error;

use crate::progress::PipelineObserver;

/// Tolerance used when comparing row activities and objectives.
pub const FEASIBILITY_EPS: f64 = 1e-9;

// ============================================================================
// Program
// ============================================================================

/// A named 0/1 variable.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    /// Objective coefficient.
    pub objective: f64,
}

/// Comparison of a row against its right-hand side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowSense {
    Le,
    Eq,
    Ge,
}

impl RowSense {
    fn symbol(&self) -> &'static str {
        match self {
            RowSense::Le => "<=",
            RowSense::Eq => "=",
            RowSense::Ge => ">=",
        }
    }
}

/// A sparse linear row `Σ coef·x  (sense)  rhs`.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub name: String,
    pub terms: Vec<(usize, f64)>,
    pub sense: RowSense,
    pub rhs: f64,
}

impl Row {
    /// Row activity under a full assignment.
    pub fn activity(&self, values: &[bool]) -> f64 {
        self.terms
            .iter()
            .filter(|(j, _)| values[*j])
            .map(|(_, c)| c)
            .sum()
    }

    pub fn is_satisfied(&self, values: &[bool]) -> bool {
        let a = self.activity(values);
        match self.sense {
            RowSense::Le => a <= self.rhs + FEASIBILITY_EPS,
            RowSense::Eq => (a - self.rhs).abs() <= FEASIBILITY_EPS,
            RowSense::Ge => a >= self.rhs - FEASIBILITY_EPS,
        }
    }
}

/// Minimize `Σ objective_j · x_j` over `x ∈ {0,1}^n` subject to the rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinearProgram {
    variables: Vec<Variable>,
    rows: Vec<Row>,
}

impl LinearProgram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a binary variable and return its column index.
    pub fn add_variable(&mut self, name: impl Into<String>, objective: f64) -> usize {
        self.variables.push(Variable {
            name: name.into(),
            objective,
        });
        self.variables.len() - 1
    }

    /// Add a row. Terms with a zero coefficient are dropped.
    ///
    /// # Panics
    ///
    /// Panics if a term refers to a variable that does not exist.
    pub fn add_row(
        &mut self,
        name: impl Into<String>,
        terms: Vec<(usize, f64)>,
        sense: RowSense,
        rhs: f64,
    ) -> usize {
        assert!(
            terms.iter().all(|(j, _)| *j < self.variables.len()),
            "row refers to an unknown variable"
        );
        self.rows.push(Row {
            name: name.into(),
            terms: terms.into_iter().filter(|(_, c)| *c != 0.0).collect(),
            sense,
            rhs,
        });
        self.rows.len() - 1
    }

    #[inline]
    pub fn variable_count(&self) -> usize {
        self.variables.len()
    }

    #[inline]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Objective value of a full assignment.
    pub fn objective_value(&self, values: &[bool]) -> f64 {
        self.variables
            .iter()
            .zip(values)
            .filter(|(_, x)| **x)
            .map(|(v, _)| v.objective)
            .sum()
    }

    /// Whether a full assignment satisfies every row.
    pub fn is_feasible(&self, values: &[bool]) -> bool {
        values.len() == self.variables.len() && self.rows.iter().all(|r| r.is_satisfied(values))
    }
}

impl fmt::Display for LinearProgram {
    /// LP-file style dump, for debugging.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "minimize")?;
        for v in &self.variables {
            writeln!(f, "  {:+} {}", v.objective, v.name)?;
        }
        writeln!(f, "subject to")?;
        for row in &self.rows {
            write!(f, "  {}:", row.name)?;
            for (j, c) in &row.terms {
                write!(f, " {:+} {}", c, self.variables[*j].name)?;
            }
            writeln!(f, " {} {}", row.sense.symbol(), row.rhs)?;
        }
        write!(f, "binary {}", self.variables.len())
    }
}

// ============================================================================
// Solutions and options
// ============================================================================

/// How a solution was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SolveStatus {
    /// Proven optimal.
    Optimal,
    /// Best assignment found before a budget ran out.
    Incumbent,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    pub values: Vec<bool>,
    pub objective: f64,
    pub status: SolveStatus,
    /// Search nodes explored.
    pub nodes: u64,
}

/// Solver budgets.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverOptions {
    /// Wall-clock budget. Default: 60 s
    pub time_limit: Option<Duration>,

    /// Search node budget. Default: unlimited
    pub node_limit: Option<u64>,

    /// Return the incumbent instead of failing when a budget runs out.
    /// Default: false
    pub accept_incumbent_on_timeout: bool,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            time_limit: Some(Duration::from_secs(60)),
            node_limit: None,
            accept_incumbent_on_timeout: false,
        }
    }
}

impl SolverOptions {
    pub fn with_time_limit(mut self, limit: Option<Duration>) -> Self {
        self.time_limit = limit;
        self
    }

    pub fn with_node_limit(mut self, limit: Option<u64>) -> Self {
        self.node_limit = limit;
        self
    }

    pub fn with_accept_incumbent(mut self, accept: bool) -> Self {
        self.accept_incumbent_on_timeout = accept;
        self
    }
}

/// Backend failure.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SolveError {
    #[error("no assignment satisfies every constraint")]
    Infeasible,

    #[error("budget exhausted after {nodes} nodes ({elapsed:?})")]
    LimitReached {
        elapsed: Duration,
        nodes: u64,
        has_incumbent: bool,
    },

    /// Failure reported by an external backend.
    #[error("{0}")]
    Backend(String),
}

// ============================================================================
// Backends
// ============================================================================

/// A 0/1 program solver.
pub trait SolverBackend: Send + Sync {
    fn name(&self) -> &str;

    fn solve(
        &self,
        program: &LinearProgram,
        options: &SolverOptions,
        observer: &dyn PipelineObserver,
    ) -> Result<Solution, SolveError>;
}

/// The closed set of backend slots.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum SolverKind {
    #[default]
    Mip,
    BranchAndBound,
    Enumeration,
}

impl SolverKind {
    pub const ALL: [SolverKind; 3] = [
        SolverKind::Mip,
        SolverKind::BranchAndBound,
        SolverKind::Enumeration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SolverKind::Mip => "mip",
            SolverKind::BranchAndBound => "branch-and-bound",
            SolverKind::Enumeration => "enumeration",
        }
    }
}

impl fmt::Display for SolverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown solver '{0}' (expected mip, branch-and-bound or enumeration)")]
pub struct UnknownSolver(pub String);

impl FromStr for SolverKind {
    type Err = UnknownSolver;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "mip" | "milp" | "microlp" => Ok(SolverKind::Mip),
            "branch-and-bound" | "bnb" | "bb" => Ok(SolverKind::BranchAndBound),
            "enumeration" | "enum" => Ok(SolverKind::Enumeration),
            _ => Err(UnknownSolver(s.to_string())),
        }
    }
}

/// Maps each [`SolverKind`] to a backend.
pub struct SolverRegistry {
    backends: HashMap<SolverKind, Box<dyn SolverBackend>>,
}

impl Default for SolverRegistry {
    fn default() -> Self {
        let mut registry = Self {
            backends: HashMap::new(),
        };
        registry.register(SolverKind::Mip, Box::new(MipSolver::new()));
        registry.register(SolverKind::BranchAndBound, Box::new(BranchAndBound::new()));
        registry.register(SolverKind::Enumeration, Box::new(BranchAndBound::enumeration()));
        registry
    }
}

impl fmt::Debug for SolverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for kind in SolverKind::ALL {
            if let Some(backend) = self.backends.get(&kind) {
                map.entry(&kind.as_str(), &backend.name());
            }
        }
        map.finish()
    }
}

impl SolverRegistry {
    /// Registry with the in-crate backends.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `backend` under `kind`, returning the one it replaces.
    pub fn register(
        &mut self,
        kind: SolverKind,
        backend: Box<dyn SolverBackend>,
    ) -> Option<Box<dyn SolverBackend>> {
        self.backends.insert(kind, backend)
    }

    pub fn get(&self, kind: SolverKind) -> Option<&dyn SolverBackend> {
        self.backends.get(&kind).map(|b| b.as_ref())
    }
}
