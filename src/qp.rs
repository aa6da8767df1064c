//! Boundary to the numerical QP routine used by every cascade level.
//!
//! A [`QpProblem`] is min ½xᵀHx + gᵀx subject to lower ≤ Cx ≤ upper for each
//! block of rows. [`ClarabelQp`] solves it with the clarabel interior point
//! solver.

use clarabel::{
    algebra::CscMatrix,
    solver::{
        DefaultSettingsBuilder, DefaultSolver, IPSolver, SolverStatus,
        SupportedConeT::{self, NonnegativeConeT, ZeroConeT},
    },
};
use na::{DMatrix, DVector};
use tracing::trace;

use crate::{constraint::LinearRows, error::QpError, types::Float};

#[derive(Clone, Debug)]
pub struct QpProblem {
    /// Symmetric positive semi-definite Hessian.
    pub H: DMatrix<Float>,
    pub g: DVector<Float>,
    pub constraints: Vec<LinearRows>,
}

impl QpProblem {
    pub fn unconstrained(H: DMatrix<Float>, g: DVector<Float>) -> Self {
        QpProblem {
            H,
            g,
            constraints: vec![],
        }
    }

    pub fn dim(&self) -> usize {
        self.g.len()
    }

    /// Shapes agree and every entry is a number. Bounds may be infinite.
    pub fn validate(&self) -> Result<(), QpError> {
        let n = self.dim();
        if self.H.shape() != (n, n) {
            return Err(QpError::Setup(format!(
                "Hessian is {:?}, expected ({}, {})",
                self.H.shape(),
                n,
                n
            )));
        }
        if self.H.iter().chain(self.g.iter()).any(|v| !v.is_finite()) {
            return Err(QpError::Setup("non-finite cost".into()));
        }
        for (k, rows) in self.constraints.iter().enumerate() {
            let m = rows.nrows();
            if rows.C.ncols() != n || rows.lower.len() != m || rows.upper.len() != m {
                return Err(QpError::Setup(format!(
                    "constraint block {} has C {:?} and bounds ({}, {}) for {} variables",
                    k,
                    rows.C.shape(),
                    rows.lower.len(),
                    rows.upper.len(),
                    n
                )));
            }
            if rows.C.iter().any(|v| !v.is_finite())
                || rows.lower.iter().chain(rows.upper.iter()).any(|v| v.is_nan())
            {
                return Err(QpError::Setup(format!(
                    "constraint block {} has non-numeric entries",
                    k
                )));
            }
        }
        Ok(())
    }
}

/// External QP routine. Implementations may keep internal state between
/// calls but must not rely on a warm start for correctness.
pub trait QpSolver {
    fn solve(&mut self, problem: &QpProblem) -> Result<DVector<Float>, QpError>;
}

/// Settings passed through to clarabel.
#[derive(Clone, Debug)]
pub struct ClarabelSettings {
    pub max_iter: u32,
    /// Seconds; infinite means no limit.
    pub time_limit: Float,
    pub verbose: bool,
}

impl Default for ClarabelSettings {
    fn default() -> Self {
        ClarabelSettings {
            max_iter: 200,
            time_limit: Float::INFINITY,
            verbose: false,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ClarabelQp {
    settings: ClarabelSettings,
}

impl ClarabelQp {
    pub fn new(settings: ClarabelSettings) -> Self {
        ClarabelQp { settings }
    }

    pub fn settings(&self) -> &ClarabelSettings {
        &self.settings
    }
}

impl QpSolver for ClarabelQp {
    fn solve(&mut self, problem: &QpProblem) -> Result<DVector<Float>, QpError> {
        problem.validate()?;
        let n = problem.dim();
        let cone_rows = ConeRows::from_constraints(&problem.constraints, n)?;

        let P = dmatrix_to_csc_upper_tri(&problem.H);
        let q: Vec<Float> = problem.g.iter().copied().collect();
        let A = dmatrix_to_csc(&cone_rows.A);
        let b: Vec<Float> = cone_rows.b.iter().copied().collect();

        let mut cones: Vec<SupportedConeT<Float>> = vec![];
        if cone_rows.n_eq > 0 {
            cones.push(ZeroConeT(cone_rows.n_eq));
        }
        if cone_rows.n_ineq > 0 {
            cones.push(NonnegativeConeT(cone_rows.n_ineq));
        }

        let settings = DefaultSettingsBuilder::default()
            .max_iter(self.settings.max_iter)
            .time_limit(self.settings.time_limit)
            .verbose(self.settings.verbose)
            .build()
            .map_err(|e| QpError::Setup(format!("{:?}", e)))?;

        let mut solver = DefaultSolver::new(&P, &q, &A, &b, &cones, settings)
            .map_err(|e| QpError::Setup(format!("{:?}", e)))?;
        solver.solve();

        let solution = &solver.solution;
        trace!(
            status = ?solution.status,
            iterations = solution.iterations,
            n_eq = cone_rows.n_eq,
            n_ineq = cone_rows.n_ineq,
            "clarabel"
        );
        match solution.status {
            SolverStatus::Solved | SolverStatus::AlmostSolved => {
                Ok(DVector::from_column_slice(&solution.x))
            }
            SolverStatus::PrimalInfeasible
            | SolverStatus::AlmostPrimalInfeasible
            | SolverStatus::DualInfeasible
            | SolverStatus::AlmostDualInfeasible => {
                Err(QpError::Infeasible(format!("{:?}", solution.status)))
            }
            other => Err(QpError::NumericalFailure(format!("{:?}", other))),
        }
    }
}

/// Two-sided rows rewritten for clarabel's Ax + s = b: equality rows first
/// (s = 0), then one-sided rows Cx ≤ b (s ≥ 0).
struct ConeRows {
    A: DMatrix<Float>,
    b: DVector<Float>,
    n_eq: usize,
    n_ineq: usize,
}

impl ConeRows {
    fn from_constraints(constraints: &[LinearRows], n: usize) -> Result<Self, QpError> {
        let mut equalities: Vec<(DVector<Float>, Float)> = vec![];
        let mut inequalities: Vec<(DVector<Float>, Float)> = vec![];

        for rows in constraints.iter() {
            for i in 0..rows.nrows() {
                let c: DVector<Float> = rows.C.row(i).transpose();
                let (l, u) = (rows.lower[i], rows.upper[i]);
                if l > u {
                    return Err(QpError::Infeasible(format!(
                        "row {} has lower bound {} above upper bound {}",
                        i, l, u
                    )));
                }
                if l == Float::INFINITY || u == Float::NEG_INFINITY {
                    return Err(QpError::Infeasible(format!(
                        "row {} has unreachable bounds [{}, {}]",
                        i, l, u
                    )));
                }
                if c.iter().all(|v| *v == 0.) {
                    if l > 0. || u < 0. {
                        return Err(QpError::Infeasible(format!(
                            "empty row requires {} <= 0 <= {}",
                            l, u
                        )));
                    }
                    continue;
                }
                if l == u && u.is_finite() {
                    equalities.push((c, u));
                    continue;
                }
                if u.is_finite() {
                    inequalities.push((c.clone(), u));
                }
                if l.is_finite() {
                    inequalities.push((-c, -l));
                }
            }
        }

        let (n_eq, n_ineq) = (equalities.len(), inequalities.len());
        let mut A = DMatrix::zeros(n_eq + n_ineq, n);
        let mut b = DVector::zeros(n_eq + n_ineq);
        for (k, (c, bound)) in equalities.iter().chain(inequalities.iter()).enumerate() {
            A.row_mut(k).copy_from(&c.transpose());
            b[k] = *bound;
        }
        Ok(ConeRows { A, b, n_eq, n_ineq })
    }
}

/// Full matrix in compressed sparse column form.
fn dmatrix_to_csc(m: &DMatrix<Float>) -> CscMatrix<Float> {
    let (nrows, ncols) = m.shape();
    let mut colptr = vec![0usize; ncols + 1];
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();

    for j in 0..ncols {
        for i in 0..nrows {
            let v = m[(i, j)];
            if v != 0. {
                rowval.push(i);
                nzval.push(v);
            }
        }
        colptr[j + 1] = rowval.len();
    }

    CscMatrix::new(nrows, ncols, colptr, rowval, nzval)
}

/// Upper triangle of a symmetric matrix, as clarabel expects for P.
fn dmatrix_to_csc_upper_tri(m: &DMatrix<Float>) -> CscMatrix<Float> {
    let (nrows, ncols) = m.shape();
    let mut colptr = vec![0usize; ncols + 1];
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();

    for j in 0..ncols {
        for i in 0..=j.min(nrows.saturating_sub(1)) {
            let v = m[(i, j)];
            if v != 0. {
                rowval.push(i);
                nzval.push(v);
            }
        }
        colptr[j + 1] = rowval.len();
    }

    CscMatrix::new(nrows, ncols, colptr, rowval, nzval)
}
