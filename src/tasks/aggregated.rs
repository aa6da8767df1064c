use itertools::izip;
use na::{DMatrix, DVector};

use crate::{
    constraint::Constraint,
    error::{Result, SotError},
    task::{validate_weight, Task, TaskData},
    types::Float,
    util::block_diagonal,
};

/// A child of an [`Aggregated`] task.
pub enum Child {
    /// Contributes residual rows.
    Task(Box<dyn Task>),
    /// Contributes bound rows, enforced by the solver next to the residual.
    Constraint(Box<dyn Constraint>),
}

impl Child {
    pub fn task(task: impl Task + 'static) -> Self {
        Child::Task(Box::new(task))
    }

    pub fn constraint(constraint: impl Constraint + 'static) -> Self {
        Child::Constraint(Box::new(constraint))
    }
}

/// Several tasks merged into one, solved at the same priority.
///
/// A and b are the children's stacked vertically. W is block diagonal with
/// each child's weight scaled by its factor, so for any x the aggregate cost
/// is Σ factorₖ · costₖ(x).
pub struct Aggregated {
    data: TaskData,
    tasks: Vec<Box<dyn Task>>,
    constraints: Vec<Box<dyn Constraint>>,
    factors: Vec<Float>,
    weight_override: Option<DMatrix<Float>>,
}

impl Aggregated {
    /// Composes the children as they currently are; children are expected to
    /// have been updated at `q` already.
    pub fn new(id: &str, children: Vec<Child>, q: &DVector<Float>) -> Result<Self> {
        let mut tasks = Vec::new();
        let mut constraints = Vec::new();
        for child in children {
            match child {
                Child::Task(task) => tasks.push(task),
                Child::Constraint(constraint) => constraints.push(constraint),
            }
        }
        if tasks.is_empty() {
            return Err(SotError::Configuration(format!(
                "aggregated task `{}` has no tasks",
                id
            )));
        }

        let dof = q.len();
        for task in tasks.iter() {
            if task.dof() != dof {
                return Err(SotError::Configuration(format!(
                    "`{}` has {} dof but aggregated `{}` has {}",
                    task.id(),
                    task.dof(),
                    id,
                    dof
                )));
            }
        }
        for constraint in constraints.iter() {
            if constraint.dof() != dof {
                return Err(SotError::Configuration(format!(
                    "constraint `{}` has {} dof but aggregated `{}` has {}",
                    constraint.id(),
                    constraint.dof(),
                    id,
                    dof
                )));
            }
        }

        let factors = vec![1.; tasks.len()];
        let mut aggregated = Aggregated {
            data: TaskData::new(id, 0, dof),
            tasks,
            constraints,
            factors,
            weight_override: None,
        };
        aggregated.compose()?;
        Ok(aggregated)
    }

    /// Scale each child's weight by a non-negative factor.
    pub fn with_weights(mut self, factors: Vec<Float>) -> Result<Self> {
        if factors.len() != self.tasks.len() {
            return Err(SotError::dimension(
                &format!("weights of aggregated `{}`", self.data.id),
                (self.tasks.len(), 1),
                (factors.len(), 1),
            ));
        }
        if let Some(bad) = factors.iter().find(|f| !f.is_finite() || **f < 0.) {
            return Err(SotError::Configuration(format!(
                "aggregated `{}` weight factors must be finite and non-negative, got {}",
                self.data.id, bad
            )));
        }
        self.factors = factors;
        self.compose()?;
        Ok(self)
    }

    pub fn tasks(&self) -> &[Box<dyn Task>] {
        &self.tasks
    }

    pub fn task_mut(&mut self, i: usize) -> Option<&mut (dyn Task + 'static)> {
        self.tasks.get_mut(i).map(|t| t.as_mut())
    }

    fn compose(&mut self) -> Result<()> {
        let dof = self.data.dof();
        let rows: usize = self.tasks.iter().map(|t| t.size()).sum();

        let mut A = DMatrix::zeros(rows, dof);
        let mut b = DVector::zeros(rows);
        let mut offset = 0;
        for task in self.tasks.iter() {
            task.data().check_dimensions()?;
            let m = task.size();
            A.view_mut((offset, 0), (m, dof)).copy_from(task.A());
            b.rows_mut(offset, m).copy_from(task.b());
            offset += m;
        }

        let W = match &self.weight_override {
            Some(W) if W.nrows() == rows => W.clone(),
            Some(W) => {
                return Err(SotError::dimension(
                    &format!("weight of aggregated `{}`", self.data.id),
                    (rows, rows),
                    W.shape(),
                ))
            }
            None => block_diagonal(
                izip!(self.tasks.iter(), self.factors.iter()).map(|(t, f)| (t.W(), *f)),
            ),
        };

        self.data.A = A;
        self.data.b = b * self.data.lambda;
        self.data.W = W;
        self.data.apply_active_joints();
        Ok(())
    }
}

impl Task for Aggregated {
    fn data(&self) -> &TaskData {
        &self.data
    }

    fn data_mut(&mut self) -> &mut TaskData {
        &mut self.data
    }

    /// Updates every child task and constraint, then recomposes.
    fn update(&mut self, q: &DVector<Float>) -> Result<()> {
        for task in self.tasks.iter_mut() {
            task.update(q)?;
        }
        for constraint in self.constraints.iter_mut() {
            constraint.update(q)?;
        }
        self.compose()
    }

    /// Replaces the composite weight until the next call; children weights
    /// are no longer used.
    fn set_weight(&mut self, W: DMatrix<Float>) -> Result<()> {
        validate_weight(
            &format!("weight of aggregated `{}`", self.data.id),
            &W,
            self.size(),
        )?;
        self.data.W = W.clone();
        self.weight_override = Some(W);
        Ok(())
    }

    fn constraints(&self) -> Vec<&dyn Constraint> {
        let mut constraints: Vec<&dyn Constraint> = Vec::new();
        for constraint in self.constraints.iter() {
            constraints.push(constraint.as_ref());
        }
        for task in self.tasks.iter() {
            constraints.extend(task.constraints());
        }
        constraints
    }
}

#[cfg(test)]
mod aggregated_tests {
    use na::{dmatrix, dvector};
    use rand::Rng;

    use super::*;
    use crate::{
        assert_close,
        constraints::velocity_limits::VelocityLimits,
        tasks::{generic::GenericTask, postural::Postural},
        util::test_utils::{random_dvector, random_spd_matrix},
    };

    fn generic(id: &str, A: DMatrix<Float>, b: DVector<Float>) -> Child {
        Child::task(GenericTask::new(id, A, b).unwrap())
    }

    #[test]
    fn cost_is_sum_of_children_costs() {
        // Arrange
        let mut rng = rand::rng();
        let dof = 4;
        let (m1, m2) = (2, 3);
        let A1 = DMatrix::from_fn(m1, dof, |_, _| rng.random_range(-1.0..1.0));
        let A2 = DMatrix::from_fn(m2, dof, |_, _| rng.random_range(-1.0..1.0));
        let b1 = random_dvector(&mut rng, m1, 1.);
        let b2 = random_dvector(&mut rng, m2, 1.);
        let W1 = random_spd_matrix(&mut rng, m1);
        let W2 = random_spd_matrix(&mut rng, m2);

        let mut t1 = GenericTask::new("t1", A1, b1).unwrap();
        t1.set_weight(W1).unwrap();
        let mut t2 = GenericTask::new("t2", A2, b2).unwrap();
        t2.set_weight(W2).unwrap();
        let q = DVector::zeros(dof);

        // Act
        let aggregated =
            Aggregated::new("t1+t2", vec![Child::task(t1), Child::task(t2)], &q).unwrap();

        // Assert
        assert_eq!(aggregated.A().shape(), (m1 + m2, dof));
        assert_eq!(aggregated.W().shape(), (m1 + m2, m1 + m2));
        for _ in 0..10 {
            let x = random_dvector(&mut rng, dof, 2.);
            let expected: Float = aggregated.tasks().iter().map(|t| t.cost(&x)).sum();
            assert_close!(aggregated.cost(&x), expected, 1e-9);
        }
    }

    #[test]
    fn weight_factors_scale_blocks() {
        // Arrange
        let q = dvector![0., 0.];
        let children = vec![
            generic("a", dmatrix![1., 0.], dvector![1.]),
            generic("b", dmatrix![0., 1.], dvector![2.]),
        ];

        // Act
        let aggregated = Aggregated::new("ab", children, &q)
            .unwrap()
            .with_weights(vec![2., 0.5])
            .unwrap();

        // Assert
        assert_eq!(aggregated.W(), &dmatrix![2., 0.; 0., 0.5]);
        assert_eq!(aggregated.b(), &dvector![1., 2.]);
        let x = dvector![0., 0.];
        assert_close!(aggregated.cost(&x), 2. * 1. + 0.5 * 4., 1e-12);
    }

    #[test]
    fn mismatched_dof_is_configuration_error() {
        let q = dvector![0., 0.];
        let children = vec![
            generic("a", dmatrix![1., 0.], dvector![1.]),
            generic("b", dmatrix![0., 1., 0.], dvector![2.]),
        ];
        let result = Aggregated::new("ab", children, &q);
        assert!(matches!(result, Err(SotError::Configuration(_))));
    }

    #[test]
    fn no_tasks_is_configuration_error() {
        let q = dvector![0., 0.];
        let children = vec![Child::constraint(VelocityLimits::new(1., 0.01, 2).unwrap())];
        let result = Aggregated::new("empty", children, &q);
        assert!(matches!(result, Err(SotError::Configuration(_))));
    }

    #[test]
    fn constraints_are_kept_apart_from_residual() {
        // Arrange
        let q = dvector![0.1, 0.2];
        let children = vec![
            Child::task(Postural::new(&q).unwrap()),
            Child::constraint(VelocityLimits::new(1., 0.01, 2).unwrap()),
        ];

        // Act
        let mut aggregated = Aggregated::new("postural+limits", children, &q).unwrap();
        aggregated.update(&dvector![0.3, 0.2]).unwrap();

        // Assert
        assert_eq!(aggregated.size(), 2);
        let constraints = aggregated.constraints();
        assert_eq!(constraints.len(), 1);
        assert_eq!(constraints[0].id(), "velocity_limits");
    }

    #[test]
    fn nested_aggregates_carry_constraints() {
        let q = dvector![0., 0.];
        let inner = Aggregated::new(
            "inner",
            vec![
                Child::task(Postural::new(&q).unwrap()),
                Child::constraint(VelocityLimits::new(1., 0.01, 2).unwrap()),
            ],
            &q,
        )
        .unwrap();
        let outer = Aggregated::new(
            "outer",
            vec![
                Child::task(inner),
                generic("g", dmatrix![1., 1.], dvector![0.]),
            ],
            &q,
        )
        .unwrap();
        assert_eq!(outer.size(), 3);
        assert_eq!(outer.constraints().len(), 1);
    }

    #[test]
    fn weight_override_survives_update() {
        let q = dvector![0., 0.];
        let mut aggregated = Aggregated::new(
            "ab",
            vec![
                generic("a", dmatrix![1., 0.], dvector![1.]),
                generic("b", dmatrix![0., 1.], dvector![2.]),
            ],
            &q,
        )
        .unwrap();
        aggregated.set_weight(dmatrix![3., 1.; 1., 3.]).unwrap();
        aggregated.update(&q).unwrap();
        assert_eq!(aggregated.W(), &dmatrix![3., 1.; 1., 3.]);
        assert!(aggregated.set_weight(DMatrix::identity(3, 3)).is_err());
    }
}
