use na::{DMatrix, DVector, Isometry3, Vector3, Vector6};

use crate::{
    error::{Result, SotError},
    model::{borrow_model, KinematicModel, SharedModel},
    task::{Task, TaskData},
    types::Float,
};

/// Cartesian pose task on one link, in the world frame.
///
/// A is the 6 × dof geometric Jacobian (angular rows first), and
/// b = λ [k_o · e_o ; e_p], where e_o is the axis-angle rotation from the
/// current to the reference orientation and e_p the position error.
pub struct Cartesian<M: KinematicModel> {
    data: TaskData,
    model: SharedModel<M>,
    link: usize,
    reference: Isometry3<Float>,
    pose: Isometry3<Float>,
    orientation_gain: Float,
}

impl<M: KinematicModel> Cartesian<M> {
    /// The reference starts at the pose of `link` at `q`.
    pub fn new(id: &str, q: &DVector<Float>, model: SharedModel<M>, link: usize) -> Result<Self> {
        let (dof, num_links) = {
            let model = model.borrow();
            (model.dof(), model.num_links())
        };
        if q.len() != dof {
            return Err(SotError::dimension(
                &format!("configuration of `{}`", id),
                (dof, 1),
                (q.len(), 1),
            ));
        }
        if link >= num_links {
            return Err(SotError::Configuration(format!(
                "`{}` targets link {} but the model has {} links",
                id, link, num_links
            )));
        }

        let mut task = Cartesian {
            data: TaskData::new(id, 6, dof),
            model,
            link,
            reference: Isometry3::identity(),
            pose: Isometry3::identity(),
            orientation_gain: 1.0,
        };
        task.update(q)?;
        task.reference = task.pose;
        task.update(q)?;
        Ok(task)
    }

    pub fn link(&self) -> usize {
        self.link
    }

    pub fn reference(&self) -> &Isometry3<Float> {
        &self.reference
    }

    /// Takes effect at the next `update`.
    pub fn set_reference(&mut self, reference: Isometry3<Float>) {
        self.reference = reference;
    }

    /// Pose of the link at the last update.
    pub fn pose(&self) -> &Isometry3<Float> {
        &self.pose
    }

    pub fn set_orientation_gain(&mut self, gain: Float) -> Result<()> {
        if !gain.is_finite() || gain < 0. {
            return Err(SotError::Configuration(format!(
                "orientation gain of `{}` must be finite and non-negative, got {}",
                self.data.id, gain
            )));
        }
        self.orientation_gain = gain;
        Ok(())
    }

    /// [e_o ; e_p] at the last update, without gains.
    pub fn error(&self) -> DVector<Float> {
        DVector::from_column_slice(pose_error(&self.reference, &self.pose).as_slice())
    }
}

/// [e_o ; e_p] from `pose` to `reference`, e_o as axis-angle in the world frame.
pub(crate) fn pose_error(
    reference: &Isometry3<Float>,
    pose: &Isometry3<Float>,
) -> Vector6<Float> {
    let orientation: Vector3<Float> = (reference.rotation * pose.rotation.inverse()).scaled_axis();
    let position = reference.translation.vector - pose.translation.vector;
    Vector6::new(
        orientation.x,
        orientation.y,
        orientation.z,
        position.x,
        position.y,
        position.z,
    )
}

impl<M: KinematicModel> Task for Cartesian<M> {
    fn data(&self) -> &TaskData {
        &self.data
    }

    fn data_mut(&mut self) -> &mut TaskData {
        &mut self.data
    }

    fn update(&mut self, q: &DVector<Float>) -> Result<()> {
        let id = &self.data.id;
        let J = {
            let mut model = borrow_model(&self.model).map_err(|e| SotError::model(id, q, e))?;
            model
                .set_configuration(q)
                .map_err(|e| SotError::model(id, q, e))?;
            self.pose = model.pose(self.link);
            model.jacobian(self.link)
        };

        self.data.A = DMatrix::from_iterator(6, J.ncols(), J.iter().cloned());

        let mut error = self.error();
        error.rows_mut(0, 3).scale_mut(self.orientation_gain);
        self.data.b = self.data.lambda * error;
        self.data.apply_active_joints();
        Ok(())
    }
}
