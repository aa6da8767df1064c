use na::{DMatrix, DVector};

use crate::{
    error::{Result, SotError},
    model::{borrow_model, InertialModel, SharedModel},
    task::{validate_weight, Task, TaskData},
    types::Float,
};

pub const DEFAULT_STIFFNESS: Float = 100.;

/// Virtual spring and damper on every joint, at the torque level:
/// A = I, b = λ·(K·(q_ref − q) + D·(q̇_ref − q̇)), with q̇ the model velocity.
pub struct JointSpringDamper<M: InertialModel> {
    data: TaskData,
    model: SharedModel<M>,
    q_ref: DVector<Float>,
    v_ref: DVector<Float>,
    K: DMatrix<Float>,
    D: DMatrix<Float>,
    spring_force: DVector<Float>,
    damper_force: DVector<Float>,
}

impl<M: InertialModel> JointSpringDamper<M> {
    /// The reference starts at `q`, at rest. Stiffness defaults to
    /// [`DEFAULT_STIFFNESS`] with damping 2√K.
    pub fn new(q: &DVector<Float>, model: SharedModel<M>) -> Result<Self> {
        let id = "joint_spring_damper";
        let dof = model.borrow().dof();
        if q.len() != dof {
            return Err(SotError::dimension(
                &format!("configuration of `{}`", id),
                (dof, 1),
                (q.len(), 1),
            ));
        }

        let mut task = JointSpringDamper {
            data: TaskData::new(id, dof, dof),
            model,
            q_ref: q.clone(),
            v_ref: DVector::zeros(dof),
            K: DMatrix::identity(dof, dof) * DEFAULT_STIFFNESS,
            D: DMatrix::identity(dof, dof) * 2. * DEFAULT_STIFFNESS.sqrt(),
            spring_force: DVector::zeros(dof),
            damper_force: DVector::zeros(dof),
        };
        task.update(q)?;
        Ok(task)
    }

    pub fn stiffness_damping(&self) -> (&DMatrix<Float>, &DMatrix<Float>) {
        (&self.K, &self.D)
    }

    /// Both dof × dof, symmetric positive semi-definite. Takes effect at the
    /// next `update`.
    pub fn set_stiffness_damping(&mut self, K: DMatrix<Float>, D: DMatrix<Float>) -> Result<()> {
        let (id, dof) = (&self.data.id, self.data.dof());
        validate_weight(&format!("stiffness of `{}`", id), &K, dof)?;
        validate_weight(&format!("damping of `{}`", id), &D, dof)?;
        self.K = K;
        self.D = D;
        Ok(())
    }

    pub fn reference(&self) -> (&DVector<Float>, &DVector<Float>) {
        (&self.q_ref, &self.v_ref)
    }

    /// New reference posture, reached at rest.
    pub fn set_reference(&mut self, q_ref: DVector<Float>) -> Result<()> {
        let dof = self.data.dof();
        self.set_reference_with_velocity(q_ref, DVector::zeros(dof))
    }

    pub fn set_reference_with_velocity(
        &mut self,
        q_ref: DVector<Float>,
        v_ref: DVector<Float>,
    ) -> Result<()> {
        let dof = self.data.dof();
        if q_ref.len() != dof || v_ref.len() != dof {
            return Err(SotError::dimension(
                &format!("reference of `{}`", self.data.id),
                (dof, dof),
                (q_ref.len(), v_ref.len()),
            ));
        }
        self.q_ref = q_ref;
        self.v_ref = v_ref;
        Ok(())
    }

    /// K·(q_ref − q) at the last update.
    pub fn spring_force(&self) -> &DVector<Float> {
        &self.spring_force
    }

    /// D·(q̇_ref − q̇) at the last update.
    pub fn damper_force(&self) -> &DVector<Float> {
        &self.damper_force
    }
}

impl<M: InertialModel> Task for JointSpringDamper<M> {
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
                &format!("configuration of `{}`", self.data.id),
                (dof, 1),
                (q.len(), 1),
            ));
        }
        let v = {
            let model =
                borrow_model(&self.model).map_err(|e| SotError::model(&self.data.id, q, e))?;
            model.velocity().clone()
        };

        self.spring_force = &self.K * (&self.q_ref - q);
        self.damper_force = &self.D * (&self.v_ref - v);
        self.data.A = DMatrix::identity(dof, dof);
        self.data.b = (&self.spring_force + &self.damper_force) * self.data.lambda;
        self.data.apply_active_joints();
        Ok(())
    }
}
