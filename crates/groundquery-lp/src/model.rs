//! Linear program model: bounded variables, linear constraints and a
//! maximization objective.

use std::fmt;

use crate::error::{LpError, Result};

/// Handle of a variable inside one [`LinearProgram`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(usize);

impl VarId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "x{}", self.0)
    }
}

/// Integrality of a variable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VarKind {
    Continuous,
    /// Integer-valued inside `[0, 1]`.
    Binary,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Comparison {
    LessEqual,
    GreaterEqual,
    Equal,
}

impl Comparison {
    /// The comparison obtained by multiplying both sides by `-1`.
    pub fn flipped(self) -> Self {
        match self {
            Comparison::LessEqual => Comparison::GreaterEqual,
            Comparison::GreaterEqual => Comparison::LessEqual,
            Comparison::Equal => Comparison::Equal,
        }
    }

    fn holds(self, lhs: f64, rhs: f64, tolerance: f64) -> bool {
        match self {
            Comparison::LessEqual => lhs <= rhs + tolerance,
            Comparison::GreaterEqual => lhs >= rhs - tolerance,
            Comparison::Equal => (lhs - rhs).abs() <= tolerance,
        }
    }
}

/// A sparse linear expression `sum(coef * var)`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LinearExpr {
    terms: Vec<(VarId, f64)>,
}

impl LinearExpr {
    pub fn new() -> Self {
        Self::default()
    }

    /// `1 * v` for every `v` in `vars`.
    pub fn sum<I: IntoIterator<Item = VarId>>(vars: I) -> Self {
        Self {
            terms: vars.into_iter().map(|v| (v, 1.0)).collect(),
        }
    }

    /// Builder-style term.
    pub fn term(mut self, var: VarId, coefficient: f64) -> Self {
        self.terms.push((var, coefficient));
        self
    }

    pub fn add_term(&mut self, var: VarId, coefficient: f64) {
        self.terms.push((var, coefficient));
    }

    pub fn terms(&self) -> &[(VarId, f64)] {
        &self.terms
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn evaluate(&self, values: &[f64]) -> f64 {
        self.terms
            .iter()
            .map(|&(var, coef)| coef * values.get(var.0).copied().unwrap_or(0.0))
            .sum()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Variable {
    pub name: String,
    pub kind: VarKind,
    pub lower: f64,
    pub upper: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Constraint {
    pub expr: LinearExpr,
    pub comparison: Comparison,
    pub rhs: f64,
}

/// A linear program whose objective is maximized.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LinearProgram {
    variables: Vec<Variable>,
    constraints: Vec<Constraint>,
    objective: Vec<f64>,
}

impl LinearProgram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a variable bounded to `[0, 1]`.
    pub fn add_variable(&mut self, name: impl Into<String>, kind: VarKind) -> VarId {
        self.push_variable(Variable {
            name: name.into(),
            kind,
            lower: 0.0,
            upper: 1.0,
        })
    }

    /// Add `count` variables named `{prefix}[i]`.
    pub fn add_variables(&mut self, prefix: &str, count: usize, kind: VarKind) -> Vec<VarId> {
        (0..count)
            .map(|i| self.add_variable(format!("{}[{}]", prefix, i), kind))
            .collect()
    }

    /// Add a continuous variable with explicit bounds. `upper` may be `+inf`.
    pub fn add_bounded_variable(
        &mut self,
        name: impl Into<String>,
        lower: f64,
        upper: f64,
    ) -> Result<VarId> {
        let name = name.into();
        if !lower.is_finite() || upper.is_nan() || upper < lower {
            return Err(LpError::InvalidModel(format!(
                "variable {} has invalid bounds [{}, {}]",
                name, lower, upper
            )));
        }
        Ok(self.push_variable(Variable {
            name,
            kind: VarKind::Continuous,
            lower,
            upper,
        }))
    }

    fn push_variable(&mut self, variable: Variable) -> VarId {
        self.variables.push(variable);
        self.objective.push(0.0);
        VarId(self.variables.len() - 1)
    }

    fn check_var(&self, var: VarId) -> Result<()> {
        if var.0 >= self.variables.len() {
            return Err(LpError::UnknownVariable(var.0));
        }
        Ok(())
    }

    pub fn add_constraint(
        &mut self,
        expr: LinearExpr,
        comparison: Comparison,
        rhs: f64,
    ) -> Result<()> {
        if !rhs.is_finite() {
            return Err(LpError::InvalidModel(format!(
                "constraint right-hand side must be finite, got {}",
                rhs
            )));
        }
        for &(var, coef) in expr.terms() {
            self.check_var(var)?;
            if !coef.is_finite() {
                return Err(LpError::InvalidModel(format!(
                    "coefficient of {} must be finite, got {}",
                    var, coef
                )));
            }
        }
        self.constraints.push(Constraint {
            expr,
            comparison,
            rhs,
        });
        Ok(())
    }

    /// `lower <= expr <= upper`, as two constraints.
    pub fn add_range_constraint(&mut self, expr: LinearExpr, lower: f64, upper: f64) -> Result<()> {
        self.add_constraint(expr.clone(), Comparison::GreaterEqual, lower)?;
        self.add_constraint(expr, Comparison::LessEqual, upper)
    }

    /// Pin `var` to `value`.
    pub fn fix_variable(&mut self, var: VarId, value: f64) -> Result<()> {
        self.add_constraint(LinearExpr::new().term(var, 1.0), Comparison::Equal, value)
    }

    /// Add `coefficient` to the objective coefficient of `var`.
    pub fn add_objective_term(&mut self, var: VarId, coefficient: f64) -> Result<()> {
        self.check_var(var)?;
        if !coefficient.is_finite() {
            return Err(LpError::InvalidModel(format!(
                "objective coefficient of {} must be finite, got {}",
                var, coefficient
            )));
        }
        self.objective[var.0] += coefficient;
        Ok(())
    }

    pub fn objective_coefficient(&self, var: VarId) -> f64 {
        self.objective.get(var.0).copied().unwrap_or(0.0)
    }

    pub(crate) fn objective_coefficients(&self) -> &[f64] {
        &self.objective
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn num_variables(&self) -> usize {
        self.variables.len()
    }

    pub fn num_constraints(&self) -> usize {
        self.constraints.len()
    }

    pub fn num_integer_variables(&self) -> usize {
        self.variables
            .iter()
            .filter(|v| v.kind == VarKind::Binary)
            .count()
    }

    /// The same program with every integrality requirement dropped.
    pub fn relaxed(&self) -> LinearProgram {
        let mut relaxed = self.clone();
        for variable in &mut relaxed.variables {
            variable.kind = VarKind::Continuous;
        }
        relaxed
    }

    pub fn objective_value(&self, values: &[f64]) -> f64 {
        self.objective
            .iter()
            .zip(values)
            .map(|(c, x)| c * x)
            .sum()
    }

    /// Whether `values` satisfies every bound, constraint and integrality
    /// requirement up to `tolerance`.
    pub fn is_feasible(&self, values: &[f64], tolerance: f64) -> bool {
        if values.len() != self.variables.len() {
            return false;
        }
        let bounds_ok = self.variables.iter().zip(values).all(|(v, &x)| {
            x >= v.lower - tolerance
                && x <= v.upper + tolerance
                && (v.kind == VarKind::Continuous || (x - x.round()).abs() <= tolerance)
        });
        bounds_ok
            && self
                .constraints
                .iter()
                .all(|c| c.comparison.holds(c.expr.evaluate(values), c.rhs, tolerance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_unknown_variable() {
        let mut lp = LinearProgram::new();
        let x = lp.add_variable("x", VarKind::Binary);
        let mut other = LinearProgram::new();
        other.add_variable("a", VarKind::Binary);
        let y = other.add_variable("b", VarKind::Binary);
        assert!(lp
            .add_constraint(LinearExpr::new().term(x, 1.0), Comparison::LessEqual, 1.0)
            .is_ok());
        assert_eq!(
            lp.add_constraint(LinearExpr::sum([y]), Comparison::LessEqual, 1.0),
            Err(LpError::UnknownVariable(1))
        );
    }

    #[test]
    fn test_rejects_infinite_coefficients() {
        let mut lp = LinearProgram::new();
        let x = lp.add_variable("x", VarKind::Binary);
        assert!(lp.add_objective_term(x, f64::NEG_INFINITY).is_err());
        assert!(lp
            .add_constraint(LinearExpr::sum([x]), Comparison::Equal, f64::INFINITY)
            .is_err());
    }

    #[test]
    fn test_feasibility_check() {
        let mut lp = LinearProgram::new();
        let vars = lp.add_variables("x", 2, VarKind::Binary);
        lp.add_constraint(LinearExpr::sum(vars.clone()), Comparison::Equal, 1.0)
            .unwrap();
        assert!(lp.is_feasible(&[1.0, 0.0], 1e-9));
        assert!(!lp.is_feasible(&[1.0, 1.0], 1e-9));
        assert!(!lp.is_feasible(&[0.5, 0.5], 1e-9));
        assert!(lp.relaxed().is_feasible(&[0.5, 0.5], 1e-9));
        assert_eq!(lp.num_integer_variables(), 2);
        assert_eq!(lp.relaxed().num_integer_variables(), 0);
    }
}
