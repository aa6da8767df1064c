use na::DVector;

use crate::{
    constraint::{Constraint, ConstraintData, LinearBounds},
    error::{Result, SotError},
    types::Float,
};

/// |xᵢ| ≤ dq_max · dt for every joint, with x the configuration step of one
/// control cycle of length `dt`.
pub struct VelocityLimits {
    data: ConstraintData,
    dq_max: Float,
    dt: Float,
}

impl VelocityLimits {
    pub fn new(dq_max: Float, dt: Float, dof: usize) -> Result<Self> {
        let id = "velocity_limits";
        if !dq_max.is_finite() || dq_max < 0. {
            return Err(SotError::Configuration(format!(
                "`{}` needs a finite non-negative velocity limit, got {}",
                id, dq_max
            )));
        }
        if !dt.is_finite() || dt <= 0. {
            return Err(SotError::Configuration(format!(
                "`{}` needs a positive time step, got {}",
                id, dt
            )));
        }

        let mut data = ConstraintData::new(id, dof);
        let bound = dq_max * dt;
        data.bounds = LinearBounds::Box {
            lower: DVector::from_element(dof, -bound),
            upper: DVector::from_element(dof, bound),
        };
        Ok(VelocityLimits { data, dq_max, dt })
    }

    pub fn dq_max(&self) -> Float {
        self.dq_max
    }

    pub fn dt(&self) -> Float {
        self.dt
    }
}

impl Constraint for VelocityLimits {
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
