//! Mixed-integer backend on `good_lp`, solved by the pure-Rust `microlp`.
//!
//! `microlp` bounds its branch-and-bound with the simplex relaxation, so
//! arrangements with hundreds of candidate faces solve in well under a
//! second. It exposes no time or node budget: [`SolverOptions`] limits are
//! honoured by the in-crate search backends only.

use std::time::Instant;

use good_lp::{
    Expression, ProblemVariables, ResolutionError, Solution as _, SolverModel as _, Variable,
    constraint, microlp, variable,
};
use tracing::debug;

use super::{
    LinearProgram, RowSense, SolveError, SolveStatus, Solution, SolverBackend, SolverOptions,
};
use crate::progress::{PipelineEvent, PipelineObserver};

/// Default backend: LP-relaxation branch-and-bound from `microlp`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MipSolver;

impl MipSolver {
    pub fn new() -> Self {
        Self
    }
}

impl SolverBackend for MipSolver {
    fn name(&self) -> &str {
        "microlp"
    }

    fn solve(
        &self,
        program: &LinearProgram,
        _options: &SolverOptions,
        observer: &dyn PipelineObserver,
    ) -> Result<Solution, SolveError> {
        let start = Instant::now();

        // Constant rows never reach the model.
        for row in program.rows().iter().filter(|r| r.terms.is_empty()) {
            if !row.is_satisfied(&[]) {
                return Err(SolveError::Infeasible);
            }
        }
        if program.variable_count() == 0 {
            return Ok(Solution {
                values: Vec::new(),
                objective: 0.0,
                status: SolveStatus::Optimal,
                nodes: 0,
            });
        }

        let mut vars = ProblemVariables::new();
        let columns: Vec<Variable> = program
            .variables()
            .iter()
            .map(|_| vars.add(variable().binary()))
            .collect();
        let objective: Expression = program
            .variables()
            .iter()
            .zip(&columns)
            .map(|(v, &x)| v.objective * x)
            .sum();

        let mut model = vars.minimise(objective).using(microlp);
        for row in program.rows().iter().filter(|r| !r.terms.is_empty()) {
            let lhs: Expression = row.terms.iter().map(|&(j, c)| c * columns[j]).sum();
            let rhs = row.rhs;
            let row_constraint = match row.sense {
                RowSense::Le => constraint!(lhs <= rhs),
                RowSense::Eq => constraint!(lhs == rhs),
                RowSense::Ge => constraint!(lhs >= rhs),
            };
            model.add_constraint(row_constraint);
        }

        let solved = model.solve().map_err(|e| match e {
            ResolutionError::Infeasible => SolveError::Infeasible,
            other => SolveError::Backend(other.to_string()),
        })?;

        let values: Vec<bool> = columns.iter().map(|&x| solved.value(x) > 0.5).collect();
        let objective = program.objective_value(&values);
        observer.on_event(&PipelineEvent::SolverProgress {
            nodes: 0,
            incumbent: Some(objective),
        });
        debug!(
            target: "polyrecon::selection",
            backend = self.name(),
            variables = program.variable_count(),
            rows = program.row_count(),
            elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
            objective,
            "MIP solved"
        );

        Ok(Solution {
            values,
            objective,
            status: SolveStatus::Optimal,
            nodes: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoOpObserver;
    use crate::solver::BranchAndBound;

    fn solve(program: &LinearProgram) -> Result<Solution, SolveError> {
        MipSolver::new().solve(program, &SolverOptions::default(), &NoOpObserver)
    }

    #[test]
    fn test_unconstrained_takes_negative_columns() {
        let mut lp = LinearProgram::new();
        lp.add_variable("a", -1.0);
        lp.add_variable("b", 0.5);
        lp.add_variable("c", -0.25);
        let solution = solve(&lp).unwrap();
        assert_eq!(solution.values, vec![true, false, true]);
        assert!((solution.objective + 1.25).abs() < 1e-9);
        assert_eq!(solution.status, SolveStatus::Optimal);
    }

    #[test]
    fn test_edge_parity_row() {
        // x_a + x_b + x_c - 2 y = 0: exactly zero or two faces.
        let mut lp = LinearProgram::new();
        let f: Vec<usize> = [-1.0, -0.8, -0.1]
            .iter()
            .enumerate()
            .map(|(i, &c)| lp.add_variable(format!("f{}", i), c))
            .collect();
        let y = lp.add_variable("y", 0.0);
        lp.add_row(
            "edge",
            vec![(f[0], 1.0), (f[1], 1.0), (f[2], 1.0), (y, -2.0)],
            RowSense::Eq,
            0.0,
        );
        let solution = solve(&lp).unwrap();
        assert_eq!(solution.values, vec![true, true, false, true]);
        assert!(lp.is_feasible(&solution.values));
    }

    #[test]
    fn test_infeasible_program() {
        let mut lp = LinearProgram::new();
        let a = lp.add_variable("a", 1.0);
        let b = lp.add_variable("b", 1.0);
        lp.add_row("both", vec![(a, 1.0), (b, 1.0)], RowSense::Ge, 3.0);
        assert_eq!(solve(&lp).unwrap_err(), SolveError::Infeasible);
    }

    #[test]
    fn test_constant_row_checked() {
        let mut lp = LinearProgram::new();
        let a = lp.add_variable("a", -1.0);
        lp.add_row("zero", vec![(a, 0.0)], RowSense::Ge, 1.0);
        assert_eq!(solve(&lp).unwrap_err(), SolveError::Infeasible);
    }

    #[test]
    fn test_empty_program() {
        let solution = solve(&LinearProgram::new()).unwrap();
        assert!(solution.values.is_empty());
        assert_eq!(solution.objective, 0.0);
    }

    #[test]
    fn test_matches_branch_and_bound() {
        // Chain of pairwise exclusions over alternating coefficients.
        let mut lp = LinearProgram::new();
        let cols: Vec<usize> = (0..10)
            .map(|i| lp.add_variable(format!("x{}", i), if i % 3 == 0 { -0.7 } else { -0.4 }))
            .collect();
        for pair in cols.windows(2) {
            lp.add_row(
                format!("pair{}", pair[0]),
                vec![(pair[0], 1.0), (pair[1], 1.0)],
                RowSense::Le,
                1.0,
            );
        }
        let mip = solve(&lp).unwrap();
        let exact = BranchAndBound::new()
            .solve(&lp, &SolverOptions::default(), &NoOpObserver)
            .unwrap();
        assert!((mip.objective - exact.objective).abs() < 1e-9);
        assert!(lp.is_feasible(&mip.values));
    }
}
