//! Dense two-phase primal simplex.
//!
//! Each variable `x` with bounds `[l, u]` is shifted to `x' = x - l >= 0`;
//! finite upper bounds become rows `x' <= u - l`. Rows are normalized to a
//! non-negative right-hand side, then get a slack (`<=`), a surplus plus an
//! artificial (`>=`) or an artificial (`==`). Phase one maximizes the negated
//! sum of artificials; phase two maximizes the real objective with the
//! artificial columns barred from entering. Bland's rule is used throughout.

use scirs2_core::ndarray::Array2;

use crate::error::{LpError, Result};
use crate::model::{Comparison, LinearProgram};

const PIVOT_EPS: f64 = 1e-9;
const FEASIBILITY_EPS: f64 = 1e-7;

/// Optimal solution of a continuous relaxation.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Relaxation {
    pub values: Vec<f64>,
    pub objective: f64,
}

struct Tableau {
    /// `rows x (columns + 1)`; the last column is the right-hand side.
    matrix: Array2<f64>,
    basis: Vec<usize>,
    columns: usize,
}

impl Tableau {
    fn rows(&self) -> usize {
        self.basis.len()
    }

    fn rhs(&self, row: usize) -> f64 {
        self.matrix[[row, self.columns]]
    }

    fn pivot(&mut self, row: usize, col: usize) {
        let pivot = self.matrix[[row, col]];
        self.matrix.row_mut(row).mapv_inplace(|v| v / pivot);
        let pivot_row = self.matrix.row(row).to_owned();
        for i in 0..self.rows() {
            if i == row {
                continue;
            }
            let factor = self.matrix[[i, col]];
            if factor != 0.0 {
                self.matrix.row_mut(i).scaled_add(-factor, &pivot_row);
            }
        }
        self.basis[row] = col;
    }

    fn reduced_cost(&self, cost: &[f64], col: usize) -> f64 {
        self.basis
            .iter()
            .enumerate()
            .fold(cost[col], |acc, (i, &b)| acc - cost[b] * self.matrix[[i, col]])
    }

    /// Maximize `cost . x`, letting only columns below `enterable` enter.
    fn optimize(
        &mut self,
        cost: &[f64],
        enterable: usize,
        iterations: &mut usize,
        max_iterations: usize,
    ) -> Result<()> {
        loop {
            let entering = (0..enterable)
                .filter(|j| !self.basis.contains(j))
                .find(|&j| self.reduced_cost(cost, j) > PIVOT_EPS);
            let Some(col) = entering else {
                return Ok(());
            };

            let mut leaving: Option<(usize, f64)> = None;
            for row in 0..self.rows() {
                let a = self.matrix[[row, col]];
                if a <= PIVOT_EPS {
                    continue;
                }
                let ratio = self.rhs(row) / a;
                leaving = match leaving {
                    None => Some((row, ratio)),
                    Some((best_row, best)) => {
                        let better = ratio < best - PIVOT_EPS
                            || (ratio <= best + PIVOT_EPS
                                && self.basis[row] < self.basis[best_row]);
                        if better {
                            Some((row, ratio))
                        } else {
                            Some((best_row, best))
                        }
                    }
                };
            }
            let Some((row, _)) = leaving else {
                return Err(LpError::Unbounded);
            };

            *iterations += 1;
            if *iterations > max_iterations {
                return Err(LpError::IterationLimit(max_iterations));
            }
            self.pivot(row, col);
        }
    }

    /// Pivot basic artificial variables out wherever a structural column can
    /// replace them. Rows left with an artificial are redundant.
    fn drive_out_artificials(&mut self, artificial_start: usize) {
        for row in 0..self.rows() {
            if self.basis[row] < artificial_start {
                continue;
            }
            let replacement = (0..artificial_start)
                .filter(|j| !self.basis.contains(j))
                .find(|&j| self.matrix[[row, j]].abs() > PIVOT_EPS);
            if let Some(col) = replacement {
                self.pivot(row, col);
            }
        }
    }
}

struct Row {
    coefficients: Vec<f64>,
    comparison: Comparison,
    rhs: f64,
}

/// Solve the continuous relaxation of `program` with per-variable `bounds`
/// overriding the model's own.
pub(crate) fn solve_relaxation(
    program: &LinearProgram,
    bounds: &[(f64, f64)],
    max_iterations: usize,
) -> Result<Relaxation> {
    let n = program.num_variables();
    if bounds.len() != n {
        return Err(LpError::InvalidModel(format!(
            "expected bounds for {} variables, got {}",
            n,
            bounds.len()
        )));
    }
    if bounds.iter().any(|&(lower, upper)| upper < lower - FEASIBILITY_EPS) {
        return Err(LpError::Infeasible);
    }

    let mut rows = Vec::with_capacity(program.num_constraints() + n);
    for constraint in program.constraints() {
        let mut coefficients = vec![0.0; n];
        let mut rhs = constraint.rhs;
        for &(var, coef) in constraint.expr.terms() {
            coefficients[var.index()] += coef;
            rhs -= coef * bounds[var.index()].0;
        }
        rows.push(Row {
            coefficients,
            comparison: constraint.comparison,
            rhs,
        });
    }
    for (j, &(lower, upper)) in bounds.iter().enumerate() {
        if upper.is_finite() {
            let mut coefficients = vec![0.0; n];
            coefficients[j] = 1.0;
            rows.push(Row {
                coefficients,
                comparison: Comparison::LessEqual,
                rhs: (upper - lower).max(0.0),
            });
        }
    }
    for row in &mut rows {
        if row.rhs < 0.0 {
            row.coefficients.iter_mut().for_each(|c| *c = -*c);
            row.rhs = -row.rhs;
            row.comparison = row.comparison.flipped();
        }
    }

    let slack_count = rows
        .iter()
        .filter(|r| r.comparison != Comparison::Equal)
        .count();
    let artificial_count = rows
        .iter()
        .filter(|r| r.comparison != Comparison::LessEqual)
        .count();
    let artificial_start = n + slack_count;
    let columns = artificial_start + artificial_count;

    let mut matrix = Array2::<f64>::zeros((rows.len(), columns + 1));
    let mut basis = vec![0; rows.len()];
    let mut next_slack = n;
    let mut next_artificial = artificial_start;
    for (i, row) in rows.iter().enumerate() {
        for (j, &a) in row.coefficients.iter().enumerate() {
            matrix[[i, j]] = a;
        }
        matrix[[i, columns]] = row.rhs;
        match row.comparison {
            Comparison::LessEqual => {
                matrix[[i, next_slack]] = 1.0;
                basis[i] = next_slack;
                next_slack += 1;
            }
            Comparison::GreaterEqual => {
                matrix[[i, next_slack]] = -1.0;
                next_slack += 1;
                matrix[[i, next_artificial]] = 1.0;
                basis[i] = next_artificial;
                next_artificial += 1;
            }
            Comparison::Equal => {
                matrix[[i, next_artificial]] = 1.0;
                basis[i] = next_artificial;
                next_artificial += 1;
            }
        }
    }

    let mut tableau = Tableau {
        matrix,
        basis,
        columns,
    };
    let mut iterations = 0;

    if artificial_count > 0 {
        let mut phase_one = vec![0.0; columns];
        phase_one[artificial_start..].iter_mut().for_each(|c| *c = -1.0);
        tableau.optimize(&phase_one, columns, &mut iterations, max_iterations)?;
        let infeasibility: f64 = (0..tableau.rows())
            .filter(|&row| tableau.basis[row] >= artificial_start)
            .map(|row| tableau.rhs(row))
            .sum();
        if infeasibility > FEASIBILITY_EPS {
            return Err(LpError::Infeasible);
        }
        tableau.drive_out_artificials(artificial_start);
    }

    let mut cost = vec![0.0; columns];
    cost[..n].copy_from_slice(program.objective_coefficients());
    tableau.optimize(&cost, artificial_start, &mut iterations, max_iterations)?;

    let mut shifted = vec![0.0; n];
    for (row, &col) in tableau.basis.iter().enumerate() {
        if col < n {
            shifted[col] = tableau.rhs(row).max(0.0);
        }
    }
    let values: Vec<f64> = shifted
        .iter()
        .zip(bounds)
        .map(|(x, &(lower, upper))| (lower + x).min(upper))
        .collect();
    let objective = program.objective_value(&values);
    Ok(Relaxation { values, objective })
}
