//! Exact depth-first search over 0/1 programs.
//!
//! Every node fixes one more variable and then propagates row bounds until a fixpoint: a row whose minimum or
//! maximum activity can no longer reach its right-hand side is a conflict, and
//! a free variable whose other value would cause one is fixed. With pruning
//! enabled, a node is cut when `fixed objective + Σ min(0, c_j)` over free
//! columns cannot beat the incumbent.
//!
//! Variables are branched on by ascending objective coefficient (column order
//! on ties), trying 1 first for negative coefficients and 0 otherwise, so the
//! first leaf reached is usually a good incumbent.

use std::time::Instant;

use tracing::{debug, warn};

use super::{
    FEASIBILITY_EPS, LinearProgram, RowSense, SolveError, SolveStatus, Solution, SolverBackend,
    SolverOptions,
};
use crate::progress::{PipelineEvent, PipelineObserver};

/// Nodes between budget checks.
const CHECK_INTERVAL: u64 = 256;
/// Nodes between progress events.
const PROGRESS_INTERVAL: u64 = 1024;

const FREE: i8 = -1;

/// Branch-and-bound backend. [`BranchAndBound::enumeration`] disables the
/// objective bound and visits every feasible leaf.
#[derive(Debug, Clone, Copy)]
pub struct BranchAndBound {
    prune: bool,
}

impl Default for BranchAndBound {
    fn default() -> Self {
        Self::new()
    }
}

impl BranchAndBound {
    pub fn new() -> Self {
        Self { prune: true }
    }

    pub fn enumeration() -> Self {
        Self { prune: false }
    }
}

impl SolverBackend for BranchAndBound {
    fn name(&self) -> &str {
        if self.prune {
            "branch-and-bound"
        } else {
            "enumeration"
        }
    }

    fn solve(
        &self,
        program: &LinearProgram,
        options: &SolverOptions,
        observer: &dyn PipelineObserver,
    ) -> Result<Solution, SolveError> {
        let mut search = Search::new(program, self.prune);
        let outcome = search.run(options, observer);
        debug!(
            target: "polyrecon::selection",
            backend = self.name(),
            variables = program.variable_count(),
            rows = program.row_count(),
            nodes = search.nodes,
            "Search finished"
        );
        outcome
    }
}

/// Decision point on the search stack.
struct Frame {
    var: usize,
    first: i8,
    trail_len: usize,
    retried: bool,
}

struct Search<'a> {
    program: &'a LinearProgram,
    prune: bool,
    /// Branching order.
    order: Vec<usize>,
    /// Rows containing each column.
    columns: Vec<Vec<(usize, f64)>>,
    values: Vec<i8>,
    trail: Vec<usize>,
    /// Activity of the fixed columns of each row.
    fixed: Vec<f64>,
    /// Sum of negative coefficients over free columns.
    free_neg: Vec<f64>,
    /// Sum of positive coefficients over free columns.
    free_pos: Vec<f64>,
    objective_fixed: f64,
    /// `Σ min(0, c_j)` over free columns.
    objective_free_neg: f64,
    best: Option<(Vec<bool>, f64)>,
    nodes: u64,
}

impl<'a> Search<'a> {
    fn new(program: &'a LinearProgram, prune: bool) -> Self {
        let n = program.variable_count();
        let mut columns = vec![Vec::new(); n];
        let mut free_neg = vec![0.0; program.row_count()];
        let mut free_pos = vec![0.0; program.row_count()];
        for (r, row) in program.rows().iter().enumerate() {
            for &(j, c) in &row.terms {
                columns[j].push((r, c));
                if c < 0.0 {
                    free_neg[r] += c;
                } else {
                    free_pos[r] += c;
                }
            }
        }
        let objective_free_neg = program
            .variables()
            .iter()
            .map(|v| v.objective.min(0.0))
            .sum();

        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| {
            let ca = program.variables()[a].objective;
            let cb = program.variables()[b].objective;
            ca.total_cmp(&cb).then(a.cmp(&b))
        });

        Self {
            program,
            prune,
            order,
            columns,
            values: vec![FREE; n],
            trail: Vec::with_capacity(n),
            fixed: vec![0.0; program.row_count()],
            free_neg,
            free_pos,
            objective_fixed: 0.0,
            objective_free_neg,
            best: None,
            nodes: 0,
        }
    }

    fn assign(&mut self, var: usize, value: i8) {
        debug_assert_eq!(self.values[var], FREE);
        self.values[var] = value;
        self.trail.push(var);
        let c = self.program.variables()[var].objective;
        self.objective_free_neg -= c.min(0.0);
        if value == 1 {
            self.objective_fixed += c;
        }
        for &(r, coef) in &self.columns[var] {
            if coef < 0.0 {
                self.free_neg[r] -= coef;
            } else {
                self.free_pos[r] -= coef;
            }
            if value == 1 {
                self.fixed[r] += coef;
            }
        }
    }

    fn undo_to(&mut self, len: usize) {
        while self.trail.len() > len {
            let Some(var) = self.trail.pop() else { break };
            let value = self.values[var];
            self.values[var] = FREE;
            let c = self.program.variables()[var].objective;
            self.objective_free_neg += c.min(0.0);
            if value == 1 {
                self.objective_fixed -= c;
            }
            for &(r, coef) in &self.columns[var] {
                if coef < 0.0 {
                    self.free_neg[r] += coef;
                } else {
                    self.free_pos[r] += coef;
                }
                if value == 1 {
                    self.fixed[r] -= coef;
                }
            }
        }
    }

    /// Propagate from the rows touching `seed` (all rows when `None`).
    /// Returns `false` on conflict.
    fn propagate(&mut self, seed: Option<usize>) -> bool {
        let program = self.program;
        let mut queue: Vec<usize> = match seed {
            Some(var) => self.columns[var].iter().map(|(r, _)| *r).collect(),
            None => (0..self.program.row_count()).collect(),
        };
        let mut queued = vec![false; self.program.row_count()];
        for &r in &queue {
            queued[r] = true;
        }

        while let Some(r) = queue.pop() {
            queued[r] = false;
            let row = &program.rows()[r];
            let min = self.fixed[r] + self.free_neg[r];
            let max = self.fixed[r] + self.free_pos[r];
            let check_le = matches!(row.sense, RowSense::Le | RowSense::Eq);
            let check_ge = matches!(row.sense, RowSense::Ge | RowSense::Eq);
            if check_le && min > row.rhs + FEASIBILITY_EPS {
                return false;
            }
            if check_ge && max < row.rhs - FEASIBILITY_EPS {
                return false;
            }

            let mut forced: Vec<(usize, i8)> = Vec::new();
            for &(j, c) in &row.terms {
                if self.values[j] != FREE {
                    continue;
                }
                // Moving x_j away from its activity-minimizing value adds |c| to min.
                if check_le && min + c.abs() > row.rhs + FEASIBILITY_EPS {
                    forced.push((j, if c > 0.0 { 0 } else { 1 }));
                } else if check_ge && max - c.abs() < row.rhs - FEASIBILITY_EPS {
                    forced.push((j, if c > 0.0 { 1 } else { 0 }));
                }
            }

            for (j, value) in forced {
                if self.values[j] != FREE {
                    if self.values[j] != value {
                        return false;
                    }
                    continue;
                }
                self.assign(j, value);
                for &(r2, _) in &self.columns[j] {
                    if !queued[r2] {
                        queued[r2] = true;
                        queue.push(r2);
                    }
                }
            }
        }
        true
    }

    fn bound(&self) -> f64 {
        self.objective_fixed + self.objective_free_neg
    }

    fn cut_by_bound(&self) -> bool {
        self.prune
            && self
                .best
                .as_ref()
                .is_some_and(|(_, best)| self.bound() >= best - FEASIBILITY_EPS)
    }

    fn first_free(&self) -> Option<usize> {
        self.order.iter().copied().find(|&j| self.values[j] == FREE)
    }

    fn record_leaf(&mut self) {
        let better = self
            .best
            .as_ref()
            .is_none_or(|(_, best)| self.objective_fixed < best - FEASIBILITY_EPS);
        if better {
            let values: Vec<bool> = self.values.iter().map(|&v| v == 1).collect();
            // Re-summed so the reported value carries no incremental drift.
            let objective = self.program.objective_value(&values);
            self.best = Some((values, objective));
        }
    }

    /// Pop frames until one can try its second value. Returns `false` when
    /// the tree is exhausted.
    fn backtrack(&mut self, stack: &mut Vec<Frame>) -> bool {
        while let Some(mut frame) = stack.pop() {
            self.undo_to(frame.trail_len);
            if frame.retried {
                continue;
            }
            frame.retried = true;
            let var = frame.var;
            let value = 1 - frame.first;
            stack.push(frame);
            self.assign(var, value);
            if self.propagate(Some(var)) {
                return true;
            }
        }
        false
    }

    fn run(
        &mut self,
        options: &SolverOptions,
        observer: &dyn PipelineObserver,
    ) -> Result<Solution, SolveError> {
        let start = Instant::now();

        if !self.propagate(None) {
            return Err(SolveError::Infeasible);
        }

        let mut stack: Vec<Frame> = Vec::new();
        loop {
            self.nodes += 1;

            // The node budget is exact; the clock is only read periodically.
            let out_of_nodes = options.node_limit.is_some_and(|n| self.nodes > n);
            let out_of_time = self.nodes % CHECK_INTERVAL == 0
                && options.time_limit.is_some_and(|t| start.elapsed() >= t);
            if out_of_nodes || out_of_time {
                return self.stop_early(options, start.elapsed());
            }
            if self.nodes % PROGRESS_INTERVAL == 0 {
                observer.on_event(&PipelineEvent::SolverProgress {
                    nodes: self.nodes,
                    incumbent: self.best.as_ref().map(|(_, obj)| *obj),
                });
            }

            let descend = if self.cut_by_bound() {
                false
            } else if let Some(var) = self.first_free() {
                let first = if self.program.variables()[var].objective < 0.0 {
                    1
                } else {
                    0
                };
                stack.push(Frame {
                    var,
                    first,
                    trail_len: self.trail.len(),
                    retried: false,
                });
                self.assign(var, first);
                self.propagate(Some(var))
            } else {
                self.record_leaf();
                false
            };

            if !descend && !self.backtrack(&mut stack) {
                break;
            }
        }

        match self.best.take() {
            Some((values, objective)) => Ok(Solution {
                values,
                objective,
                status: SolveStatus::Optimal,
                nodes: self.nodes,
            }),
            None => Err(SolveError::Infeasible),
        }
    }

    fn stop_early(
        &mut self,
        options: &SolverOptions,
        elapsed: std::time::Duration,
    ) -> Result<Solution, SolveError> {
        match self.best.take() {
            Some((values, objective)) if options.accept_incumbent_on_timeout => {
                warn!(
                    target: "polyrecon::selection",
                    nodes = self.nodes,
                    elapsed_secs = elapsed.as_secs_f64(),
                    objective,
                    "Solver budget exhausted, returning incumbent"
                );
                Ok(Solution {
                    values,
                    objective,
                    status: SolveStatus::Incumbent,
                    nodes: self.nodes,
                })
            }
            best => Err(SolveError::LimitReached {
                elapsed,
                nodes: self.nodes,
                has_incumbent: best.is_some(),
            }),
        }
    }
}
