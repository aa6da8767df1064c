use na::{DMatrix, DVector};
use tracing::debug;

use crate::{
    error::{ModelError, Result, SotError},
    gradient::{CostFunction, GradientConfig, GradientWorker},
    model::{borrow_model, DynamicsModel, SharedModel},
    task::{validate_weight, Task, TaskData},
    types::Float,
};

/// Effort f(q) = τ(q)ᵀ W τ(q), with τ the generalized forces of the model.
///
/// The forces are computed with the support condition the model currently
/// assumes (e.g. one foot on the ground). Probes do not keep contact
/// constraints satisfied, and floating-base forces are not projected on the
/// contact Jacobians.
pub struct EffortCost<M: DynamicsModel> {
    model: SharedModel<M>,
    W: DMatrix<Float>,
}

impl<M: DynamicsModel> EffortCost<M> {
    pub fn new(model: SharedModel<M>, W: DMatrix<Float>) -> Self {
        EffortCost { model, W }
    }

    pub fn W(&self) -> &DMatrix<Float> {
        &self.W
    }
}

impl<M: DynamicsModel> CostFunction for EffortCost<M> {
    /// Evaluates the model at `q`, then restores the configuration it had
    /// before the evaluation, also when the evaluation fails.
    fn compute(&mut self, q: &DVector<Float>) -> std::result::Result<Float, ModelError> {
        let mut model = borrow_model(&self.model)?;
        let q_saved = model.configuration().clone();

        let evaluated = match model.set_configuration(q) {
            Ok(()) => Ok(model.generalized_forces()),
            Err(e) => Err(e),
        };
        let restored = model.set_configuration(&q_saved);

        let tau = evaluated?;
        restored?;
        Ok(tau.dot(&(&self.W * &tau)))
    }
}

/// Joint-space task pulling the posture towards lower effort:
/// A = I, b = −λ∇f(q) with f the [`EffortCost`].
///
/// The gradient is numerical (2·dof model evaluations per update with the
/// default central scheme) and ignores how contact forces redistribute as the
/// posture changes. It is only meaningful together with a higher priority
/// task or constraint keeping the assumed support valid, typically a
/// Cartesian task on the swing foot:
///
/// ```ignore
/// let mut stack = Stack::new(dof);
/// stack.push(Box::new(Cartesian::new("cartesian::r_sole", &q, kinematics, r_sole)?))?;
/// stack.push(Box::new(MinimumEffort::new(&q, dynamics)?))?;
/// ```
///
/// Whether such a task is present is not checked.
pub struct MinimumEffort<M: DynamicsModel> {
    data: TaskData,
    worker: GradientWorker,
    cost: EffortCost<M>,
    q: DVector<Float>,
}

impl<M: DynamicsModel> MinimumEffort<M> {
    /// Default weight diag(1 / τmaxᵢ²), used both for the effort and as the
    /// task weight. Runs a first update at `q`.
    pub fn new(q: &DVector<Float>, model: SharedModel<M>) -> Result<Self> {
        let id = "minimum_effort";
        let (dof, torque_limits) = {
            let model = model.borrow();
            (model.dof(), model.joint_torque_limits())
        };
        if q.len() != dof || torque_limits.len() != dof {
            return Err(SotError::dimension(
                &format!("configuration/torque limits of `{}`", id),
                (dof, dof),
                (q.len(), torque_limits.len()),
            ));
        }
        if let Some(bad) = torque_limits.iter().find(|t| !t.is_finite() || **t <= 0.) {
            return Err(SotError::Configuration(format!(
                "`{}` needs positive finite torque limits, got {}",
                id, bad
            )));
        }

        let W = DMatrix::from_diagonal(&torque_limits.map(|t| 1. / (t * t)));
        let mut data = TaskData::new(id, dof, dof);
        data.A = DMatrix::identity(dof, dof);
        data.W = W.clone();

        let mut task = MinimumEffort {
            data,
            worker: GradientWorker::new(GradientConfig::default())?,
            cost: EffortCost::new(model, W),
            q: q.clone(),
        };
        task.update(q)?;
        Ok(task)
    }

    /// Override the effort weight. The task weight is left untouched.
    pub fn set_effort_weight(&mut self, W: DMatrix<Float>) -> Result<()> {
        validate_weight(
            &format!("effort weight of `{}`", self.data.id),
            &W,
            self.data.dof(),
        )?;
        self.cost.W = W;
        Ok(())
    }

    pub fn effort_weight(&self) -> &DMatrix<Float> {
        self.cost.W()
    }

    /// Finite-difference step and scheme. Takes effect at the next `update`.
    pub fn set_gradient_config(&mut self, config: GradientConfig) -> Result<()> {
        self.worker = GradientWorker::new(config)?;
        Ok(())
    }

    pub fn gradient_config(&self) -> &GradientConfig {
        self.worker.config()
    }

    /// Effort at the configuration of the last update.
    pub fn compute_effort(&mut self) -> Result<Float> {
        self.cost
            .compute(&self.q)
            .map_err(|e| SotError::model(&self.data.id, &self.q, e))
    }
}

impl<M: DynamicsModel> Task for MinimumEffort<M> {
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
        self.q.copy_from(q);

        let gradient = self
            .worker
            .gradient(q, &mut self.cost)
            .map_err(|e| SotError::model(&self.data.id, q, e))?;
        debug!(id = %self.data.id, gradient_norm = gradient.norm(), "effort gradient");

        self.data.A = DMatrix::identity(dof, dof);
        self.data.b = -self.data.lambda * gradient;
        self.data.apply_active_joints();
        Ok(())
    }
}
