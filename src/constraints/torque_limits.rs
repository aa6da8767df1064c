use na::{DMatrix, DVector};

use crate::{
    constraint::{Constraint, ConstraintData, LinearBounds},
    error::{ModelError, Result, SotError},
    gradient::DEFAULT_STEP,
    model::{borrow_model, DynamicsModel, SharedModel},
    types::Float,
};

/// Keeps the generalized forces within the joint torque limits after a step
/// x, using their first-order expansion:
/// −τmax ≤ τ(q) + (∂τ/∂q) x ≤ τmax.
///
/// ∂τ/∂q is obtained by central differences on the model, which is restored
/// to the configuration it had before the update.
pub struct TorqueLimits<M: DynamicsModel> {
    data: ConstraintData,
    model: SharedModel<M>,
    tau_max: DVector<Float>,
    step: Float,
}

impl<M: DynamicsModel> TorqueLimits<M> {
    /// Limits default to the model's joint torque limits.
    pub fn new(q: &DVector<Float>, model: SharedModel<M>) -> Result<Self> {
        let tau_max = model.borrow().joint_torque_limits();
        Self::with_limits(q, model, tau_max)
    }

    pub fn with_limits(
        q: &DVector<Float>,
        model: SharedModel<M>,
        tau_max: DVector<Float>,
    ) -> Result<Self> {
        let id = "torque_limits";
        let dof = model.borrow().dof();
        if q.len() != dof || tau_max.len() != dof {
            return Err(SotError::dimension(
                &format!("configuration/torque limits of `{}`", id),
                (dof, dof),
                (q.len(), tau_max.len()),
            ));
        }
        if let Some(bad) = tau_max.iter().find(|t| t.is_nan() || **t < 0.) {
            return Err(SotError::Configuration(format!(
                "`{}` needs non-negative torque limits, got {}",
                id, bad
            )));
        }

        let mut constraint = TorqueLimits {
            data: ConstraintData::new(id, dof),
            model,
            tau_max,
            step: DEFAULT_STEP,
        };
        constraint.update(q)?;
        Ok(constraint)
    }

    pub fn tau_max(&self) -> &DVector<Float> {
        &self.tau_max
    }

    /// τ(q) and ∂τ/∂q, leaving the model where it was.
    fn linearize(
        &self,
        q: &DVector<Float>,
    ) -> std::result::Result<(DVector<Float>, DMatrix<Float>), ModelError> {
        let mut model = borrow_model(&self.model)?;
        let q_saved = model.configuration().clone();

        let evaluated = forces_jacobian(&mut *model, q, self.step);
        let restored = model.set_configuration(&q_saved);

        let linearization = evaluated?;
        restored?;
        Ok(linearization)
    }
}

fn forces_jacobian<M: DynamicsModel>(
    model: &mut M,
    q: &DVector<Float>,
    step: Float,
) -> std::result::Result<(DVector<Float>, DMatrix<Float>), ModelError> {
    model.set_configuration(q)?;
    let tau = model.generalized_forces();

    let mut G = DMatrix::zeros(tau.len(), q.len());
    let mut x = q.clone();
    for j in 0..q.len() {
        x[j] = q[j] + step;
        model.set_configuration(&x)?;
        let plus = model.generalized_forces();
        x[j] = q[j] - step;
        model.set_configuration(&x)?;
        let minus = model.generalized_forces();
        x[j] = q[j];
        G.set_column(j, &((plus - minus) / (2. * step)));
    }
    Ok((tau, G))
}

impl<M: DynamicsModel> Constraint for TorqueLimits<M> {
    fn data(&self) -> &ConstraintData {
        &self.data
    }

    fn update(&mut self, q: &DVector<Float>) -> Result<()> {
        if q.len() != self.data.dof {
            return Err(SotError::dimension(
                &format!("configuration of `{}`", self.data.id),
                (self.data.dof, 1),
                (q.len(), 1),
            ));
        }
        let (tau, G) = self
            .linearize(q)
            .map_err(|e| SotError::model(&self.data.id, q, e))?;
        self.data.bounds = LinearBounds::Inequality {
            C: G,
            lower: -&self.tau_max - &tau,
            upper: &self.tau_max - &tau,
        };
        Ok(())
    }
}
