use na::{DMatrix, DVector};

use crate::{
    error::{Result, SotError},
    task::{Task, TaskData},
    types::Float,
};

/// Joint-space task driving the configuration towards a reference posture:
/// A = I, b = λ(q_ref − q).
pub struct Postural {
    data: TaskData,
    q_ref: DVector<Float>,
    q: DVector<Float>,
}

impl Postural {
    /// The reference starts at `q`.
    pub fn new(q: &DVector<Float>) -> Result<Self> {
        let dof = q.len();
        let mut task = Postural {
            data: TaskData::new("postural", dof, dof),
            q_ref: q.clone(),
            q: q.clone(),
        };
        task.update(q)?;
        Ok(task)
    }

    pub fn reference(&self) -> &DVector<Float> {
        &self.q_ref
    }

    /// Takes effect at the next `update`.
    pub fn set_reference(&mut self, q_ref: DVector<Float>) -> Result<()> {
        if q_ref.len() != self.data.dof() {
            return Err(SotError::dimension(
                "postural reference",
                (self.data.dof(), 1),
                (q_ref.len(), 1),
            ));
        }
        self.q_ref = q_ref;
        Ok(())
    }

    /// q_ref − q at the last update.
    pub fn error(&self) -> DVector<Float> {
        &self.q_ref - &self.q
    }
}

impl Task for Postural {
    fn data(&self) -> &TaskData {
        &self.data
    }

    fn data_mut(&mut self) -> &mut TaskData {
        &mut self.data
    }

    fn update(&mut self, q: &DVector<Float>) -> Result<()> {
        let dof = self.data.dof();
        if q.len() != dof {
            return Err(SotError::dimension(
                "postural configuration",
                (dof, 1),
                (q.len(), 1),
            ));
        }
        self.q.copy_from(q);
        self.data.A = DMatrix::identity(dof, dof);
        self.data.b = self.data.lambda * self.error();
        self.data.apply_active_joints();
        Ok(())
    }
}
