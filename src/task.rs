//! A task is one control objective linearized at the current configuration:
//! find x minimizing ‖Ax − b‖²_W.

use na::{DMatrix, DVector, SymmetricEigen};

use crate::{
    constraint::Constraint,
    error::{Result, SotError},
    types::Float,
};

/// Storage shared by every task implementation.
#[derive(Clone, Debug)]
pub struct TaskData {
    pub id: String,
    pub A: DMatrix<Float>,
    pub b: DVector<Float>,
    pub W: DMatrix<Float>,
    /// Columns of A flagged `false` are zeroed after every update.
    pub active_joints: Vec<bool>,
    /// Gain applied to b.
    pub lambda: Float,
}

impl TaskData {
    /// Zero A and b, identity weight, every joint active, unit gain.
    pub fn new(id: &str, size: usize, dof: usize) -> Self {
        TaskData {
            id: id.to_string(),
            A: DMatrix::zeros(size, dof),
            b: DVector::zeros(size),
            W: DMatrix::identity(size, size),
            active_joints: vec![true; dof],
            lambda: 1.0,
        }
    }

    pub fn dof(&self) -> usize {
        self.active_joints.len()
    }

    pub fn apply_active_joints(&mut self) {
        for (j, active) in self.active_joints.iter().enumerate() {
            if !active {
                self.A.column_mut(j).fill(0.);
            }
        }
    }

    /// A.rows() == b.len(), W is square over the task rows, A.cols() == dof.
    pub fn check_dimensions(&self) -> Result<()> {
        let context = format!("task `{}`", self.id);
        if self.A.nrows() != self.b.len() {
            return Err(SotError::dimension(
                &format!("{} b", context),
                (self.A.nrows(), 1),
                (self.b.len(), 1),
            ));
        }
        if self.A.ncols() != self.dof() {
            return Err(SotError::dimension(
                &format!("{} A", context),
                (self.A.nrows(), self.dof()),
                self.A.shape(),
            ));
        }
        if self.W.shape() != (self.A.nrows(), self.A.nrows()) {
            return Err(SotError::dimension(
                &format!("{} W", context),
                (self.A.nrows(), self.A.nrows()),
                self.W.shape(),
            ));
        }
        Ok(())
    }
}

/// Check that `W` is an `size × size` symmetric positive semi-definite matrix.
pub fn validate_weight(context: &str, W: &DMatrix<Float>, size: usize) -> Result<()> {
    if W.shape() != (size, size) {
        return Err(SotError::dimension(context, (size, size), W.shape()));
    }
    if W.iter().any(|w| !w.is_finite()) {
        return Err(SotError::Configuration(format!(
            "{}: weight has non-finite entries",
            context
        )));
    }
    let scale = W.amax().max(1.0);
    if (W - W.transpose()).amax() > 1e-9 * scale {
        return Err(SotError::Configuration(format!(
            "{}: weight is not symmetric",
            context
        )));
    }
    if size > 0 {
        let eigen = SymmetricEigen::new(W.clone());
        if eigen.eigenvalues.min() < -1e-9 * scale {
            return Err(SotError::Configuration(format!(
                "{}: weight is not positive semi-definite",
                context
            )));
        }
    }
    Ok(())
}

pub trait Task {
    fn data(&self) -> &TaskData;

    fn data_mut(&mut self) -> &mut TaskData;

    /// Recompute A and b at configuration `q`.
    /// Repeated calls with the same `q` yield the same A and b.
    fn update(&mut self, q: &DVector<Float>) -> Result<()>;

    fn id(&self) -> &str {
        &self.data().id
    }

    fn dof(&self) -> usize {
        self.data().dof()
    }

    /// Number of residual rows.
    fn size(&self) -> usize {
        self.data().A.nrows()
    }

    fn A(&self) -> &DMatrix<Float> {
        &self.data().A
    }

    fn b(&self) -> &DVector<Float> {
        &self.data().b
    }

    fn W(&self) -> &DMatrix<Float> {
        &self.data().W
    }

    fn lambda(&self) -> Float {
        self.data().lambda
    }

    fn active_joints(&self) -> &[bool] {
        &self.data().active_joints
    }

    fn set_weight(&mut self, W: DMatrix<Float>) -> Result<()> {
        validate_weight(&format!("weight of `{}`", self.id()), &W, self.size())?;
        self.data_mut().W = W;
        Ok(())
    }

    /// Takes effect at the next `update`.
    fn set_lambda(&mut self, lambda: Float) -> Result<()> {
        if !lambda.is_finite() || lambda < 0. {
            return Err(SotError::Configuration(format!(
                "lambda of `{}` must be finite and non-negative, got {}",
                self.id(),
                lambda
            )));
        }
        self.data_mut().lambda = lambda;
        Ok(())
    }

    fn set_active_joints(&mut self, active_joints: Vec<bool>) -> Result<()> {
        if active_joints.len() != self.dof() {
            return Err(SotError::dimension(
                &format!("active joints of `{}`", self.id()),
                (self.dof(), 1),
                (active_joints.len(), 1),
            ));
        }
        let data = self.data_mut();
        data.active_joints = active_joints;
        data.apply_active_joints();
        Ok(())
    }

    /// Constraints carried by the task, to be enforced at its level and below.
    fn constraints(&self) -> Vec<&dyn Constraint> {
        Vec::new()
    }

    /// Ax − b
    fn residual(&self, x: &DVector<Float>) -> DVector<Float> {
        self.A() * x - self.b()
    }

    /// (Ax − b)ᵀ W (Ax − b)
    fn cost(&self, x: &DVector<Float>) -> Float {
        let r = self.residual(x);
        r.dot(&(self.W() * &r))
    }
}

#[cfg(test)]
mod task_tests {
    use na::{dmatrix, dvector};

    use super::*;
    use crate::assert_close;

    struct Fixed {
        data: TaskData,
    }

    impl Task for Fixed {
        fn data(&self) -> &TaskData {
            &self.data
        }

        fn data_mut(&mut self) -> &mut TaskData {
            &mut self.data
        }

        fn update(&mut self, _q: &DVector<Float>) -> Result<()> {
            self.data.A = dmatrix![1., 2.; 3., 4.];
            self.data.b = dvector![1., 1.];
            self.data.apply_active_joints();
            Ok(())
        }
    }

    fn fixed() -> Fixed {
        let mut task = Fixed {
            data: TaskData::new("fixed", 2, 2),
        };
        task.update(&dvector![0., 0.]).unwrap();
        task
    }

    #[test]
    fn set_weight_rejects_wrong_shape() {
        let mut task = fixed();
        let err = task.set_weight(DMatrix::identity(3, 3)).unwrap_err();
        assert!(matches!(err, SotError::DimensionMismatch { .. }));
        assert_eq!(task.W(), &DMatrix::<Float>::identity(2, 2));
    }

    #[test]
    fn set_weight_rejects_indefinite() {
        let mut task = fixed();
        let err = task.set_weight(dmatrix![1., 0.; 0., -1.]).unwrap_err();
        assert!(matches!(err, SotError::Configuration(_)));
    }

    #[test]
    fn inactive_joints_zero_columns() {
        // Arrange
        let mut task = fixed();

        // Act
        task.set_active_joints(vec![true, false]).unwrap();
        task.update(&dvector![0., 0.]).unwrap();

        // Assert
        assert_eq!(task.A(), &dmatrix![1., 0.; 3., 0.]);
        assert!(task
            .set_active_joints(vec![true])
            .is_err_and(|e| matches!(e, SotError::DimensionMismatch { .. })));
    }

    #[test]
    fn weighted_cost() {
        // Arrange
        let mut task = fixed();
        task.set_weight(dmatrix![2., 0.; 0., 3.]).unwrap();
        let x = dvector![1., 0.];

        // Act
        let cost = task.cost(&x);

        // Assert
        // residual = [0, 2]
        assert_close!(cost, 12., 1e-12);
        assert!(task.set_lambda(-1.).is_err());
    }
}
