//! A small integer linear program: bounded integer variables, linear
//! constraints with integer coefficients and a linear objective to minimize.
//!
//! The model is the request half of the solver boundary; an [`Assignment`]
//! is the response.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Handle to a model variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VarId(pub u32);

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "x{}", self.0)
    }
}

/// An integer variable with inclusive bounds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Variable {
    pub name: String,
    pub lower: i64,
    pub upper: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Relation {
    Le,
    Ge,
    Eq,
}

/// `sum(coef * var) <relation> rhs`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Constraint {
    pub name: String,
    pub terms: Vec<(VarId, i64)>,
    pub relation: Relation,
    pub rhs: i64,
}

impl Constraint {
    /// Evaluates the constraint under an assignment.
    pub fn holds(&self, assignment: &Assignment) -> bool {
        let lhs: i64 = self
            .terms
            .iter()
            .map(|&(var, coef)| coef * assignment.value(var))
            .sum();
        match self.relation {
            Relation::Le => lhs <= self.rhs,
            Relation::Ge => lhs >= self.rhs,
            Relation::Eq => lhs == self.rhs,
        }
    }
}

/// Values for every variable of a model, indexed by [`VarId`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Assignment {
    values: Vec<i64>,
}

impl Assignment {
    pub fn new(values: Vec<i64>) -> Self {
        Assignment { values }
    }

    /// Value of a variable; zero for unknown handles.
    pub fn value(&self, var: VarId) -> i64 {
        self.values.get(var.0 as usize).copied().unwrap_or(0)
    }

    pub fn values(&self) -> &[i64] {
        &self.values
    }
}

/// Integer minimization problem.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Model {
    variables: Vec<Variable>,
    constraints: Vec<Constraint>,
    objective: Vec<(VarId, i64)>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an integer variable in `[lower, upper]`.
    pub fn add_integer(&mut self, name: impl Into<String>, lower: i64, upper: i64) -> VarId {
        let id = VarId(self.variables.len() as u32);
        self.variables.push(Variable {
            name: name.into(),
            lower,
            upper,
        });
        id
    }

    /// Adds a 0/1 variable.
    pub fn add_binary(&mut self, name: impl Into<String>) -> VarId {
        self.add_integer(name, 0, 1)
    }

    pub fn add_constraint(
        &mut self,
        name: impl Into<String>,
        terms: Vec<(VarId, i64)>,
        relation: Relation,
        rhs: i64,
    ) {
        self.constraints.push(Constraint {
            name: name.into(),
            terms,
            relation,
            rhs,
        });
    }

    /// Sets the objective to minimize, replacing any previous one.
    pub fn minimize(&mut self, terms: Vec<(VarId, i64)>) {
        self.objective = terms;
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn variable(&self, var: VarId) -> Option<&Variable> {
        self.variables.get(var.0 as usize)
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn objective(&self) -> &[(VarId, i64)] {
        &self.objective
    }

    /// Objective value of an assignment.
    pub fn evaluate(&self, assignment: &Assignment) -> i64 {
        self.objective
            .iter()
            .map(|&(var, coef)| coef * assignment.value(var))
            .sum()
    }

    /// Returns `true` if the assignment respects every bound and constraint.
    pub fn is_feasible(&self, assignment: &Assignment) -> bool {
        assignment.values.len() == self.variables.len()
            && self
                .variables
                .iter()
                .zip(&assignment.values)
                .all(|(var, &v)| var.lower <= v && v <= var.upper)
            && self.constraints.iter().all(|c| c.holds(assignment))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feasibility_checks_bounds_and_rows() {
        let mut model = Model::new();
        let x = model.add_integer("x", 0, 3);
        let y = model.add_binary("y");
        model.add_constraint("cover", vec![(x, 1), (y, 1)], Relation::Ge, 2);
        model.minimize(vec![(x, 1), (y, 2)]);

        let good = Assignment::new(vec![2, 0]);
        assert!(model.is_feasible(&good));
        assert_eq!(model.evaluate(&good), 2);

        assert!(!model.is_feasible(&Assignment::new(vec![1, 0])));
        assert!(!model.is_feasible(&Assignment::new(vec![4, 0])));
        assert!(!model.is_feasible(&Assignment::new(vec![2])));
    }

    #[test]
    fn var_display() {
        assert_eq!(VarId(7).to_string(), "x7");
    }
}
