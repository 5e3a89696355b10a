//! The solver boundary and the built-in branch-and-bound solver.
//!
//! [`MilpSolver`] is a synchronous request/response interface: a [`Model`]
//! and a [`SolveBudget`] go in, a [`SolveOutcome`] comes out. Any external
//! optimization library can sit behind it.
//!
//! [`BranchAndBound`] is a deterministic depth-first search over variable
//! boxes. Each node tightens bounds by constraint propagation, prunes on the
//! objective lower bound, accepts the cheapest corner of its box when that
//! corner is feasible, and otherwise splits the first free variable of the
//! first violated constraint into `x = lo` and `x >= lo + 1`.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{Assignment, Model, Relation};

/// Limits on a single solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolveBudget {
    /// Maximum number of search nodes.
    pub max_nodes: u64,
    /// Wall-clock limit, if any.
    pub time_limit: Option<Duration>,
}

impl Default for SolveBudget {
    fn default() -> Self {
        SolveBudget {
            max_nodes: 200_000,
            time_limit: None,
        }
    }
}

/// Result of a solve.
#[derive(Debug, Clone, PartialEq)]
pub enum SolveOutcome {
    /// Proven optimal assignment.
    Optimal(Assignment),
    /// Proven to have no feasible assignment.
    Infeasible,
    /// The budget ran out; `best` is the incumbent found so far, if any.
    BudgetExhausted { best: Option<Assignment> },
}

/// A synchronous integer-program solver.
pub trait MilpSolver {
    fn name(&self) -> &str;

    fn solve(&self, model: &Model, budget: &SolveBudget) -> SolveOutcome;
}

/// Built-in exact solver for small integer programs.
#[derive(Debug, Clone, Copy, Default)]
pub struct BranchAndBound;

/// A constraint in `sum(coef * x) <= rhs` form over dense variable indices.
struct Row {
    terms: Vec<(usize, i64)>,
    rhs: i64,
}

const MAX_PROPAGATION_PASSES: usize = 64;

fn normalize(model: &Model) -> Vec<Row> {
    let mut rows = Vec::with_capacity(model.constraints().len());
    for c in model.constraints() {
        let terms: Vec<(usize, i64)> = c
            .terms
            .iter()
            .filter(|&&(_, coef)| coef != 0)
            .map(|&(var, coef)| (var.0 as usize, coef))
            .collect();
        let negated = || terms.iter().map(|&(i, a)| (i, -a)).collect();
        match c.relation {
            Relation::Le => rows.push(Row {
                terms: terms.clone(),
                rhs: c.rhs,
            }),
            Relation::Ge => rows.push(Row {
                terms: negated(),
                rhs: -c.rhs,
            }),
            Relation::Eq => {
                rows.push(Row {
                    terms: terms.clone(),
                    rhs: c.rhs,
                });
                rows.push(Row {
                    terms: negated(),
                    rhs: -c.rhs,
                });
            }
        }
    }
    rows
}

fn min_activity(row: &Row, lo: &[i64], hi: &[i64]) -> i64 {
    row.terms
        .iter()
        .map(|&(i, a)| if a > 0 { a * lo[i] } else { a * hi[i] })
        .sum()
}

/// Tightens `lo`/`hi` until a fixpoint. Returns `false` if the box is empty.
fn propagate(rows: &[Row], lo: &mut [i64], hi: &mut [i64]) -> bool {
    for _ in 0..MAX_PROPAGATION_PASSES {
        let mut changed = false;
        for row in rows {
            let activity = min_activity(row, lo, hi);
            if activity > row.rhs {
                return false;
            }
            for &(i, a) in &row.terms {
                let own = if a > 0 { a * lo[i] } else { a * hi[i] };
                let slack = row.rhs - (activity - own);
                if a > 0 {
                    let cap = slack.div_euclid(a);
                    if cap < hi[i] {
                        hi[i] = cap;
                        changed = true;
                    }
                } else {
                    let floor = -slack.div_euclid(-a);
                    if floor > lo[i] {
                        lo[i] = floor;
                        changed = true;
                    }
                }
                if lo[i] > hi[i] {
                    return false;
                }
            }
        }
        if !changed {
            break;
        }
    }
    true
}

fn violated<'a>(rows: &'a [Row], point: &[i64]) -> Option<&'a Row> {
    rows.iter().find(|row| {
        let lhs: i64 = row.terms.iter().map(|&(i, a)| a * point[i]).sum();
        lhs > row.rhs
    })
}

impl MilpSolver for BranchAndBound {
    fn name(&self) -> &str {
        "branch-and-bound"
    }

    fn solve(&self, model: &Model, budget: &SolveBudget) -> SolveOutcome {
        let started = Instant::now();
        let rows = normalize(model);
        let count = model.variables().len();
        let lo: Vec<i64> = model.variables().iter().map(|v| v.lower).collect();
        let hi: Vec<i64> = model.variables().iter().map(|v| v.upper).collect();
        let mut cost = vec![0i64; count];
        for &(var, coef) in model.objective() {
            if let Some(slot) = cost.get_mut(var.0 as usize) {
                *slot += coef;
            }
        }

        let mut incumbent: Option<(i64, Vec<i64>)> = None;
        let mut stack = vec![(lo, hi)];
        let mut nodes: u64 = 0;
        let mut exhausted = false;

        while let Some((mut lo, mut hi)) = stack.pop() {
            let out_of_time = budget
                .time_limit
                .map(|limit| started.elapsed() >= limit)
                .unwrap_or(false);
            if nodes >= budget.max_nodes || out_of_time {
                exhausted = true;
                break;
            }
            nodes += 1;

            if lo.iter().zip(&hi).any(|(l, h)| l > h) || !propagate(&rows, &mut lo, &mut hi) {
                continue;
            }

            // Cheapest corner of the box; the objective bound is its cost.
            let corner: Vec<i64> = (0..count)
                .map(|i| if cost[i] >= 0 { lo[i] } else { hi[i] })
                .collect();
            let bound: i64 = (0..count).map(|i| cost[i] * corner[i]).sum();
            if let Some((best, _)) = &incumbent {
                if bound >= *best {
                    continue;
                }
            }

            let Some(row) = violated(&rows, &corner) else {
                incumbent = Some((bound, corner));
                continue;
            };
            let Some(&(var, _)) = row.terms.iter().find(|&&(i, _)| lo[i] < hi[i]) else {
                continue;
            };

            let mut up_lo = lo.clone();
            up_lo[var] = lo[var] + 1;
            stack.push((up_lo, hi.clone()));
            let mut down_hi = hi;
            down_hi[var] = lo[var];
            stack.push((lo, down_hi));
        }

        debug!(
            solver = self.name(),
            nodes,
            objective = ?incumbent.as_ref().map(|(value, _)| *value),
            exhausted,
            "solve finished"
        );

        let best = incumbent.map(|(_, values)| Assignment::new(values));
        match (exhausted, best) {
            (true, best) => SolveOutcome::BudgetExhausted { best },
            (false, Some(best)) => SolveOutcome::Optimal(best),
            (false, None) => SolveOutcome::Infeasible,
        }
    }
}
