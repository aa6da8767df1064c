use na::DVector;

use crate::{
    constraint::{Constraint, ConstraintData, LinearBounds},
    error::{Result, SotError},
    types::Float,
};

/// Keeps the next configuration q + x inside [q_min, q_max]:
/// gain · (q_min − q) ≤ x ≤ gain · (q_max − q).
///
/// With gain < 1 the limits are approached gradually instead of being reached
/// in a single step.
pub struct JointLimits {
    data: ConstraintData,
    q_min: DVector<Float>,
    q_max: DVector<Float>,
    gain: Float,
}

impl JointLimits {
    pub fn new(q: &DVector<Float>, q_min: DVector<Float>, q_max: DVector<Float>) -> Result<Self> {
        let id = "joint_limits";
        let dof = q.len();
        if q_min.len() != dof || q_max.len() != dof {
            return Err(SotError::dimension(
                &format!("bounds of `{}`", id),
                (dof, dof),
                (q_min.len(), q_max.len()),
            ));
        }
        LinearBounds::Box {
            lower: q_min.clone(),
            upper: q_max.clone(),
        }
        .validate(id, dof)?;

        let mut constraint = JointLimits {
            data: ConstraintData::new(id, dof),
            q_min,
            q_max,
            gain: 1.0,
        };
        constraint.update(q)?;
        Ok(constraint)
    }

    pub fn gain(&self) -> Float {
        self.gain
    }

    /// Takes effect at the next `update`.
    pub fn set_gain(&mut self, gain: Float) -> Result<()> {
        if !gain.is_finite() || gain <= 0. || gain > 1. {
            return Err(SotError::Configuration(format!(
                "gain of `{}` must be in (0, 1], got {}",
                self.data.id, gain
            )));
        }
        self.gain = gain;
        Ok(())
    }
}

impl Constraint for JointLimits {
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
        self.data.bounds = LinearBounds::Box {
            lower: (&self.q_min - q) * self.gain,
            upper: (&self.q_max - q) * self.gain,
        };
        Ok(())
    }
}

#[cfg(test)]
mod joint_limits_tests {
    use na::dvector;

    use super::*;

    #[test]
    fn bounds_follow_configuration() {
        // Arrange
        let q = dvector![0., 0.5];
        let mut limits = JointLimits::new(&q, dvector![-1., -1.], dvector![1., 1.]).unwrap();

        // Act
        limits.set_gain(0.5).unwrap();
        limits.update(&q).unwrap();

        // Assert
        assert_eq!(limits.bounds().lower(), &dvector![-0.5, -0.75]);
        assert_eq!(limits.bounds().upper(), &dvector![0.5, 0.25]);
        assert!(limits.is_satisfied(&dvector![0.5, 0.25], 1e-12));
        assert!(!limits.is_satisfied(&dvector![0., 0.3], 1e-12));
    }

    #[test]
    fn pulls_back_from_outside_the_limits() {
        let q = dvector![1.5];
        let limits = JointLimits::new(&q, dvector![-1.], dvector![1.]).unwrap();
        assert_eq!(limits.bounds().upper(), &dvector![-0.5]);
        assert!(limits.bounds().validate("joint_limits", 1).is_ok());
    }

    #[test]
    fn rejects_inverted_limits() {
        let result = JointLimits::new(&dvector![0.], dvector![1.], dvector![-1.]);
        assert!(matches!(result, Err(SotError::Configuration(_))));
    }

    #[test]
    fn rejects_bad_gain() {
        let mut limits = JointLimits::new(&dvector![0.], dvector![-1.], dvector![1.]).unwrap();
        assert!(limits.set_gain(0.).is_err());
        assert!(limits.set_gain(1.5).is_err());
        assert_eq!(limits.gain(), 1.);
    }
}
