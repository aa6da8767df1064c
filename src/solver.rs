//! Priority stack and the cascade of least-squares QPs solving it.
//!
//! Level i minimizes ‖Aᵢx − bᵢ‖²_Wᵢ subject to the global constraints, the
//! constraints carried by the tasks of levels 0..=i, and for every j < i
//! the band Rⱼx*ⱼ − τⱼ ≤ Rⱼx ≤ Rⱼx*ⱼ + τⱼ, where x*ⱼ is level j's solution
//! and Rⱼ = Wⱼ^½ Aⱼ. Lower levels therefore cannot move the weighted residual
//! of a higher level by more than its tolerance τ, while rows a level gives
//! zero weight stay free.

use na::{DMatrix, DVector, SymmetricEigen};
use tracing::{debug, warn};

use crate::{
    constraint::{Constraint, LinearRows},
    error::{QpError, Result, SotError},
    qp::{QpProblem, QpSolver},
    task::Task,
    types::Float,
};

/// One priority level of a [`Stack`].
pub struct Level {
    task: Box<dyn Task>,
    tolerance: Option<Float>,
}

impl Level {
    pub fn task(&self) -> &dyn Task {
        self.task.as_ref()
    }

    pub fn task_mut(&mut self) -> &mut (dyn Task + 'static) {
        self.task.as_mut()
    }

    /// Residual tolerance used by lower levels. `None` falls back to
    /// [`CascadeConfig::tolerance`].
    pub fn tolerance(&self) -> Option<Float> {
        self.tolerance
    }
}

/// Ordered task levels, highest priority first, plus constraints applying to
/// every level.
pub struct Stack {
    dof: usize,
    levels: Vec<Level>,
    constraints: Vec<Box<dyn Constraint>>,
}

impl Stack {
    pub fn new(dof: usize) -> Self {
        Stack {
            dof,
            levels: vec![],
            constraints: vec![],
        }
    }

    pub fn dof(&self) -> usize {
        self.dof
    }

    /// Append a level below the existing ones.
    pub fn push(&mut self, task: Box<dyn Task>) -> Result<()> {
        self.push_level(task, None)
    }

    /// `tolerance` is measured on the task's weighted rows W^½A.
    pub fn push_with_tolerance(&mut self, task: Box<dyn Task>, tolerance: Float) -> Result<()> {
        if !tolerance.is_finite() || tolerance < 0. {
            return Err(SotError::Configuration(format!(
                "tolerance of `{}` must be finite and non-negative, got {}",
                task.id(),
                tolerance
            )));
        }
        self.push_level(task, Some(tolerance))
    }

    fn push_level(&mut self, task: Box<dyn Task>, tolerance: Option<Float>) -> Result<()> {
        if task.dof() != self.dof {
            return Err(SotError::dimension(
                &format!("dof of `{}`", task.id()),
                (self.dof, 1),
                (task.dof(), 1),
            ));
        }
        self.levels.push(Level { task, tolerance });
        Ok(())
    }

    pub fn add_constraint(&mut self, constraint: Box<dyn Constraint>) -> Result<()> {
        if constraint.dof() != self.dof {
            return Err(SotError::dimension(
                &format!("dof of constraint `{}`", constraint.id()),
                (self.dof, 1),
                (constraint.dof(), 1),
            ));
        }
        self.constraints.push(constraint);
        Ok(())
    }

    /// Update every level and global constraint at `q`, then check the
    /// dimensions of the result.
    pub fn update(&mut self, q: &DVector<Float>) -> Result<()> {
        if q.len() != self.dof {
            return Err(SotError::dimension(
                "stack configuration",
                (self.dof, 1),
                (q.len(), 1),
            ));
        }
        for level in self.levels.iter_mut() {
            level.task.update(q)?;
        }
        for constraint in self.constraints.iter_mut() {
            constraint.update(q)?;
        }
        self.check_dimensions()
    }

    /// Every task has A: size × dof, b: size, W: size × size, and every
    /// constraint, carried ones included, has consistent bounds.
    pub fn check_dimensions(&self) -> Result<()> {
        for level in self.levels.iter() {
            let task = level.task();
            task.data().check_dimensions()?;
            if task.A().ncols() != self.dof {
                return Err(SotError::dimension(
                    &format!("task `{}` A", task.id()),
                    (task.size(), self.dof),
                    task.A().shape(),
                ));
            }
            for constraint in task.constraints() {
                constraint.bounds().validate(constraint.id(), self.dof)?;
            }
        }
        for constraint in self.constraints.iter() {
            constraint.bounds().validate(constraint.id(), self.dof)?;
        }
        Ok(())
    }

    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    pub fn level(&self, i: usize) -> Option<&Level> {
        self.levels.get(i)
    }

    pub fn level_mut(&mut self, i: usize) -> Option<&mut Level> {
        self.levels.get_mut(i)
    }

    pub fn constraints(&self) -> &[Box<dyn Constraint>] {
        &self.constraints
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct CascadeConfig {
    /// ε added to the diagonal of every level Hessian AᵀWA.
    pub regularization: Float,
    /// Default residual tolerance τ of a level, see [`Stack::push_with_tolerance`].
    /// τ bounds the weighted rows W^½A, so the unweighted residual of a row
    /// may move by τ/√w. Zero turns the band into an equality.
    pub tolerance: Float,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        CascadeConfig {
            regularization: 1e-8,
            tolerance: 1e-6,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum CascadeState {
    Idle,
    LevelSolving(usize),
    Done,
    Failed { level: usize, reason: String },
}

/// Outcome of one level of the last solve.
#[derive(Clone, Debug)]
pub struct LevelReport {
    pub level: usize,
    pub id: String,
    /// ‖Ax − b‖ at the level solution.
    pub residual_norm: Float,
    /// (Ax − b)ᵀ W (Ax − b) at the level solution.
    pub cost: Float,
    /// Constraint rows the level QP was subject to.
    pub constraint_rows: usize,
}

pub struct CascadeSolver<S: QpSolver> {
    qp: S,
    config: CascadeConfig,
    state: CascadeState,
    reports: Vec<LevelReport>,
}

impl<S: QpSolver> CascadeSolver<S> {
    pub fn new(qp: S, config: CascadeConfig) -> Result<Self> {
        if !config.regularization.is_finite() || config.regularization < 0. {
            return Err(SotError::Configuration(format!(
                "regularization must be finite and non-negative, got {}",
                config.regularization
            )));
        }
        if !config.tolerance.is_finite() || config.tolerance < 0. {
            return Err(SotError::Configuration(format!(
                "tolerance must be finite and non-negative, got {}",
                config.tolerance
            )));
        }
        Ok(CascadeSolver {
            qp,
            config,
            state: CascadeState::Idle,
            reports: vec![],
        })
    }

    pub fn config(&self) -> &CascadeConfig {
        &self.config
    }

    pub fn state(&self) -> &CascadeState {
        &self.state
    }

    /// Per-level outcome of the last solve, up to the failing level.
    pub fn reports(&self) -> &[LevelReport] {
        &self.reports
    }

    pub fn qp(&self) -> &S {
        &self.qp
    }

    /// Solve every level of an updated stack, highest priority first.
    ///
    /// Returns the solution of the last level. Nothing is returned when any
    /// level fails; the error names the level.
    pub fn solve(&mut self, stack: &Stack) -> Result<DVector<Float>> {
        self.reports.clear();
        self.state = CascadeState::Idle;
        if stack.is_empty() {
            return Err(SotError::Configuration("stack has no levels".into()));
        }
        stack.check_dimensions()?;

        let dof = stack.dof();
        let mut constraints: Vec<LinearRows> =
            stack.constraints().iter().map(|c| c.rows()).collect();
        let mut solution = DVector::zeros(dof);

        for (i, level) in stack.levels().iter().enumerate() {
            self.state = CascadeState::LevelSolving(i);
            let task = level.task();
            constraints.extend(task.constraints().iter().map(|c| c.rows()));

            let problem = self.level_problem(task, &constraints);
            let constraint_rows: usize = constraints.iter().map(|r| r.nrows()).sum();
            let x = match self.qp.solve(&problem) {
                Ok(x) if x.len() == dof => x,
                Ok(x) => {
                    let reason = format!("solution has {} entries, expected {}", x.len(), dof);
                    return Err(self.fail(i, task.id(), QpError::NumericalFailure(reason)));
                }
                Err(e) => return Err(self.fail(i, task.id(), e)),
            };

            let Ax = task.A() * &x;
            let report = LevelReport {
                level: i,
                id: task.id().to_string(),
                residual_norm: (&Ax - task.b()).norm(),
                cost: task.cost(&x),
                constraint_rows,
            };
            debug!(
                level = i,
                id = %report.id,
                residual_norm = report.residual_norm,
                constraint_rows,
                "level solved"
            );
            self.reports.push(report);

            let tolerance = level.tolerance().unwrap_or(self.config.tolerance);
            let R = weight_root(task.W()) * task.A();
            let Rx = &R * &x;
            constraints.push(LinearRows {
                C: R,
                lower: Rx.add_scalar(-tolerance),
                upper: Rx.add_scalar(tolerance),
            });
            solution = x;
        }

        self.state = CascadeState::Done;
        Ok(solution)
    }

    /// H = AᵀWA + εI, g = −AᵀWb.
    fn level_problem(&self, task: &dyn Task, constraints: &[LinearRows]) -> QpProblem {
        let dof = task.dof();
        let AtW = task.A().transpose() * task.W();
        let mut H = &AtW * task.A() + DMatrix::identity(dof, dof) * self.config.regularization;
        // symmetrize away rounding from the product
        H = (&H + H.transpose()) * 0.5;
        let g = -(AtW * task.b());
        QpProblem {
            H,
            g,
            constraints: constraints.to_vec(),
        }
    }

    fn fail(&mut self, level: usize, id: &str, error: QpError) -> SotError {
        warn!(level, id, error = %error, "cascade failed");
        self.state = CascadeState::Failed {
            level,
            reason: error.to_string(),
        };
        match error {
            QpError::Infeasible(reason) => SotError::SolveInfeasible {
                level,
                id: id.to_string(),
                reason,
            },
            QpError::NumericalFailure(reason) => SotError::SolveNumericalFailure {
                level,
                id: id.to_string(),
                reason,
            },
            QpError::Setup(reason) => SotError::SolveNumericalFailure {
                level,
                id: id.to_string(),
                reason: format!("invalid problem setup: {}", reason),
            },
        }
    }
}

/// S with SᵀS = W, for a symmetric positive semi-definite W.
fn weight_root(W: &DMatrix<Float>) -> DMatrix<Float> {
    let n = W.nrows();
    let diagonal = (0..n).all(|i| (0..n).all(|j| i == j || W[(i, j)] == 0.));
    if diagonal {
        return DMatrix::from_diagonal(&W.diagonal().map(|w| w.max(0.).sqrt()));
    }
    let eigen = SymmetricEigen::new(W.clone());
    let roots = eigen.eigenvalues.map(|l| l.max(0.).sqrt());
    DMatrix::from_diagonal(&roots) * eigen.eigenvectors.transpose()
}
