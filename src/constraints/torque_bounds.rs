use na::DVector;

use crate::{
    constraint::{Constraint, ConstraintData, LinearBounds},
    error::{Result, SotError},
    model::{DynamicsModel, SharedModel},
    types::Float,
};

/// Box −τmax ≤ τ ≤ τmax on a torque decision vector, for stacks of
/// virtual-model tasks.
pub struct TorqueBounds {
    data: ConstraintData,
    tau_max: DVector<Float>,
}

impl TorqueBounds {
    pub fn new(tau_max: DVector<Float>) -> Result<Self> {
        let id = "torque_bounds";
        if let Some(bad) = tau_max.iter().find(|t| t.is_nan() || **t < 0.) {
            return Err(SotError::Configuration(format!(
                "`{}` needs non-negative torque limits, got {}",
                id, bad
            )));
        }

        let mut data = ConstraintData::new(id, tau_max.len());
        data.bounds = LinearBounds::Box {
            lower: -&tau_max,
            upper: tau_max.clone(),
        };
        Ok(TorqueBounds { data, tau_max })
    }

    /// Limits taken from the model's joint torque limits.
    pub fn from_model<M: DynamicsModel>(model: &SharedModel<M>) -> Result<Self> {
        Self::new(model.borrow().joint_torque_limits())
    }

    pub fn tau_max(&self) -> &DVector<Float> {
        &self.tau_max
    }
}

impl Constraint for TorqueBounds {
    fn data(&self) -> &ConstraintData {
        &self.data
    }

    /// Bounds do not depend on the configuration.
    fn update(&mut self, q: &DVector<Float>) -> Result<()> {
        if q.len() != self.data.dof {
            return Err(SotError::dimension(
                &format!("configuration of `{}`", self.data.id),
                (self.data.dof, 1),
                (q.len(), 1),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod torque_bounds_tests {
    use na::dvector;

    use super::*;
    use crate::{helpers::build_planar_arm, model::shared};

    #[test]
    fn symmetric_box_from_model() {
        let model = shared(build_planar_arm(2, 1.0, 1.0).unwrap());
        let bounds = TorqueBounds::from_model(&model).unwrap();
        let tau_max = model.borrow().joint_torque_limits();
        assert_eq!(bounds.bounds().upper(), &tau_max);
        assert_eq!(bounds.bounds().lower(), &(-&tau_max));
        assert_eq!(bounds.tau_max(), &tau_max);
    }

    #[test]
    fn torque_inside_limits_is_satisfied() {
        let bounds = TorqueBounds::new(dvector![10., 5.]).unwrap();
        assert!(bounds.is_satisfied(&dvector![-10., 4.], 1e-12));
        assert!(!bounds.is_satisfied(&dvector![0., 5.5], 1e-12));
    }

    #[test]
    fn rejects_negative_limits() {
        assert!(matches!(
            TorqueBounds::new(dvector![1., -1.]),
            Err(SotError::Configuration(_))
        ));
    }
}
