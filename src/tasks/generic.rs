use na::{DMatrix, DVector};

use crate::{
    error::{Result, SotError},
    task::{Task, TaskData},
    types::Float,
};

/// Task with a user supplied, configuration independent A and b.
pub struct GenericTask {
    data: TaskData,
    A0: DMatrix<Float>,
    b0: DVector<Float>,
}

impl GenericTask {
    pub fn new(id: &str, A: DMatrix<Float>, b: DVector<Float>) -> Result<Self> {
        let mut task = GenericTask {
            data: TaskData::new(id, A.nrows(), A.ncols()),
            A0: DMatrix::zeros(0, 0),
            b0: DVector::zeros(0),
        };
        task.set_A_b(A, b)?;
        Ok(task)
    }

    /// Replace A and b. The row count may change, in which case the weight
    /// is reset to identity.
    pub fn set_A_b(&mut self, A: DMatrix<Float>, b: DVector<Float>) -> Result<()> {
        if A.nrows() != b.len() {
            return Err(SotError::dimension(
                &format!("b of `{}`", self.data.id),
                (A.nrows(), 1),
                (b.len(), 1),
            ));
        }
        if A.ncols() != self.data.dof() {
            return Err(SotError::dimension(
                &format!("A of `{}`", self.data.id),
                (A.nrows(), self.data.dof()),
                A.shape(),
            ));
        }
        if A.nrows() != self.data.W.nrows() {
            self.data.W = DMatrix::identity(A.nrows(), A.nrows());
        }
        self.A0 = A;
        self.b0 = b;
        self.refresh();
        Ok(())
    }

    fn refresh(&mut self) {
        self.data.A.clone_from(&self.A0);
        self.data.b = &self.b0 * self.data.lambda;
        self.data.apply_active_joints();
    }
}

impl Task for GenericTask {
    fn data(&self) -> &TaskData {
        &self.data
    }

    fn data_mut(&mut self) -> &mut TaskData {
        &mut self.data
    }

    fn update(&mut self, q: &DVector<Float>) -> Result<()> {
        if q.len() != self.data.dof() {
            return Err(SotError::dimension(
                &format!("configuration of `{}`", self.data.id),
                (self.data.dof(), 1),
                (q.len(), 1),
            ));
        }
        self.refresh();
        Ok(())
    }
}
