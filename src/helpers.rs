//! Model builders used by tests and demos.

use na::{DMatrix, DVector, Isometry3, Matrix6xX, Translation3, UnitQuaternion, Vector2, Vector3};

use crate::{
    error::{ModelError, Result, SotError},
    model::{DynamicsModel, InertialModel, KinematicModel},
    types::Float,
    GRAVITY,
};

/// Serial arm of revolute joints rotating about world z, moving in the x-y
/// plane, with gravity along −y. Each link is a point mass at its midpoint.
///
/// Joint angles are relative; link i has absolute angle θᵢ = q₀ + … + qᵢ
/// measured from the x axis.
#[derive(Clone, Debug)]
pub struct PlanarArm {
    lengths: Vec<Float>,
    masses: Vec<Float>,
    torque_limits: DVector<Float>,
    gravity: Float,
    q: DVector<Float>,
    v: DVector<Float>,
    angles: Vec<Float>,
}

impl PlanarArm {
    pub fn new(
        lengths: Vec<Float>,
        masses: Vec<Float>,
        torque_limits: DVector<Float>,
    ) -> Result<Self> {
        let n = lengths.len();
        if n == 0 {
            return Err(SotError::Configuration(
                "planar arm needs at least one link".into(),
            ));
        }
        if masses.len() != n || torque_limits.len() != n {
            return Err(SotError::dimension(
                "planar arm masses/torque limits",
                (n, n),
                (masses.len(), torque_limits.len()),
            ));
        }
        let positive = |x: &Float| x.is_finite() && *x > 0.;
        if !lengths.iter().all(positive)
            || !masses.iter().all(positive)
            || !torque_limits.iter().all(positive)
        {
            return Err(SotError::Configuration(
                "planar arm lengths, masses and torque limits must be positive".into(),
            ));
        }

        Ok(PlanarArm {
            lengths,
            masses,
            torque_limits,
            gravity: GRAVITY,
            q: DVector::zeros(n),
            v: DVector::zeros(n),
            angles: vec![0.; n],
        })
    }

    pub fn lengths(&self) -> &[Float] {
        &self.lengths
    }

    /// Gravitational potential energy Σ mᵢ g yᵢ of the link midpoints.
    pub fn potential_energy(&self) -> Float {
        (0..self.lengths.len())
            .map(|i| self.masses[i] * self.gravity * self.com_height(i))
            .sum()
    }

    fn com_height(&self, link: usize) -> Float {
        let proximal: Float = (0..link)
            .map(|j| self.lengths[j] * self.angles[j].sin())
            .sum();
        proximal + self.lengths[link] / 2. * self.angles[link].sin()
    }

    /// ∂cᵢ/∂q_k of the midpoint of `link`, zero for joints distal to it.
    fn com_jacobian(&self, link: usize) -> Vec<Vector2<Float>> {
        let n = self.lengths.len();
        (0..n)
            .map(|k| {
                if k > link {
                    return Vector2::zeros();
                }
                let proximal = (k..link).fold(Vector2::zeros(), |acc, j| {
                    acc + self.lengths[j]
                        * Vector2::new(-self.angles[j].sin(), self.angles[j].cos())
                });
                proximal
                    + self.lengths[link] / 2.
                        * Vector2::new(-self.angles[link].sin(), self.angles[link].cos())
            })
            .collect()
    }
}

/// Build an arm of `n` identical links.
pub fn build_planar_arm(n: usize, length: Float, mass: Float) -> Result<PlanarArm> {
    let torque_limit = 2. * mass * GRAVITY * length * (n * n) as Float;
    PlanarArm::new(
        vec![length; n],
        vec![mass; n],
        DVector::from_element(n, torque_limit),
    )
}

fn set_planar_configuration(
    arm: &mut PlanarArm,
    q: &DVector<Float>,
) -> std::result::Result<(), ModelError> {
    if q.len() != arm.q.len() {
        return Err(ModelError::Evaluation(format!(
            "planar arm has {} joints, got {} coordinates",
            arm.q.len(),
            q.len()
        )));
    }
    if q.iter().any(|x| !x.is_finite()) {
        return Err(ModelError::Evaluation(format!(
            "non-finite configuration {:?}",
            q.as_slice()
        )));
    }
    arm.q.copy_from(q);
    let mut angle: Float = 0.;
    for (i, qi) in q.iter().enumerate() {
        angle += *qi;
        arm.angles[i] = angle;
    }
    Ok(())
}

impl DynamicsModel for PlanarArm {
    fn dof(&self) -> usize {
        self.q.len()
    }

    fn configuration(&self) -> &DVector<Float> {
        &self.q
    }

    fn set_configuration(&mut self, q: &DVector<Float>) -> std::result::Result<(), ModelError> {
        set_planar_configuration(self, q)
    }

    /// Static gravity torques τ = ∂V/∂q.
    fn generalized_forces(&self) -> DVector<Float> {
        let n = self.lengths.len();
        DVector::from_fn(n, |k, _| {
            // ∂yᵢ/∂q_k = Σ_{j=k}^{i-1} lⱼ cos θⱼ + lᵢ/2 cos θᵢ, for i ≥ k
            (k..n)
                .map(|i| {
                    let lever: Float = (k..i)
                        .map(|j| self.lengths[j] * self.angles[j].cos())
                        .sum::<Float>()
                        + self.lengths[i] / 2. * self.angles[i].cos();
                    self.masses[i] * self.gravity * lever
                })
                .sum()
        })
    }

    fn joint_torque_limits(&self) -> DVector<Float> {
        self.torque_limits.clone()
    }
}

/// Point masses only: M = Σ mᵢ Jcᵢᵀ Jcᵢ.
impl InertialModel for PlanarArm {
    fn velocity(&self) -> &DVector<Float> {
        &self.v
    }

    fn set_velocity(&mut self, v: &DVector<Float>) -> std::result::Result<(), ModelError> {
        if v.len() != self.v.len() || v.iter().any(|x| !x.is_finite()) {
            return Err(ModelError::Evaluation(format!(
                "planar arm needs {} finite velocities, got {:?}",
                self.v.len(),
                v.as_slice()
            )));
        }
        self.v.copy_from(v);
        Ok(())
    }

    fn mass_matrix(&self) -> DMatrix<Float> {
        let n = self.lengths.len();
        let mut M = DMatrix::zeros(n, n);
        for i in 0..n {
            let Jc = self.com_jacobian(i);
            for r in 0..n {
                for c in 0..n {
                    M[(r, c)] += self.masses[i] * Jc[r].dot(&Jc[c]);
                }
            }
        }
        M
    }
}

impl KinematicModel for PlanarArm {
    fn dof(&self) -> usize {
        self.q.len()
    }

    fn set_configuration(&mut self, q: &DVector<Float>) -> std::result::Result<(), ModelError> {
        set_planar_configuration(self, q)
    }

    fn num_links(&self) -> usize {
        self.lengths.len()
    }

    /// Pose of the distal end of `link`.
    fn pose(&self, link: usize) -> Isometry3<Float> {
        let (x, y) = (0..=link).fold((0., 0.), |(x, y), j| {
            (
                x + self.lengths[j] * self.angles[j].cos(),
                y + self.lengths[j] * self.angles[j].sin(),
            )
        });
        Isometry3::from_parts(
            Translation3::new(x, y, 0.),
            UnitQuaternion::from_axis_angle(&Vector3::z_axis(), self.angles[link]),
        )
    }

    fn jacobian(&self, link: usize) -> Matrix6xX<Float> {
        let n = self.lengths.len();
        let mut J = Matrix6xX::zeros(n);
        for k in 0..=link {
            let (mut dx, mut dy) = (0., 0.);
            for j in k..=link {
                dx -= self.lengths[j] * self.angles[j].sin();
                dy += self.lengths[j] * self.angles[j].cos();
            }
            J[(2, k)] = 1.;
            J[(3, k)] = dx;
            J[(4, k)] = dy;
        }
        J
    }
}

#[cfg(test)]
mod helpers_tests {
    use na::dvector;

    use super::*;
    use crate::{
        gradient::{GradientConfig, GradientWorker},
        util::assert_dvec_close,
        PI,
    };

    #[test]
    fn gravity_torques_match_potential_gradient() {
        // Arrange
        let mut arm = PlanarArm::new(
            vec![0.4, 0.3, 0.2],
            vec![2.0, 1.5, 0.5],
            dvector![100., 100., 100.],
        )
        .unwrap();
        let q = dvector![0.3, -0.8, 1.1];
        DynamicsModel::set_configuration(&mut arm, &q).unwrap();
        let tau = arm.generalized_forces();

        // Act
        let worker = GradientWorker::new(GradientConfig::default()).unwrap();
        let mut perturbed = arm.clone();
        let mut energy = |x: &DVector<Float>| {
            DynamicsModel::set_configuration(&mut perturbed, x)?;
            Ok::<Float, ModelError>(perturbed.potential_energy())
        };
        let numeric = worker.gradient(&q, &mut energy).unwrap();

        // Assert
        assert_dvec_close(&tau, &numeric, 1e-6);
    }

    #[test]
    fn jacobian_matches_tip_velocity() {
        // Arrange
        let mut arm = build_planar_arm(3, 0.5, 1.0).unwrap();
        let q = dvector![0.2, 0.4, -0.1];
        let dq = dvector![0.3, -0.2, 0.5];
        let h = 1e-6;
        KinematicModel::set_configuration(&mut arm, &q).unwrap();
        let J = arm.jacobian(2);
        let p0 = arm.pose(2).translation.vector;

        // Act
        KinematicModel::set_configuration(&mut arm, &(&q + &dq * h)).unwrap();
        let p1 = arm.pose(2).translation.vector;

        // Assert
        let v = J * &dq;
        let numeric = (p1 - p0) / h;
        assert_dvec_close(
            &DVector::from_column_slice(&[v[3], v[4], v[5]]),
            &DVector::from_column_slice(numeric.as_slice()),
            1e-5,
        );
        assert!((v[2] - dq.sum()).abs() < 1e-12);
    }

    #[test]
    fn mass_matrix_gives_kinetic_energy() {
        // Arrange
        let mut arm = PlanarArm::new(
            vec![0.4, 0.3, 0.2],
            vec![2.0, 1.5, 0.5],
            dvector![100., 100., 100.],
        )
        .unwrap();
        let q = dvector![0.3, -0.8, 1.1];
        let v = dvector![0.5, -1.0, 2.0];
        let h = 1e-7;
        KinematicModel::set_configuration(&mut arm, &q).unwrap();
        let M = arm.mass_matrix();
        let midpoints = |arm: &PlanarArm| -> Vec<Vector2<Float>> {
            (0..3)
                .map(|i| {
                    let distal = arm.pose(i).translation.vector;
                    let direction = Vector2::new(arm.angles[i].cos(), arm.angles[i].sin());
                    Vector2::new(distal.x, distal.y) - direction * arm.lengths[i] / 2.
                })
                .collect()
        };
        let c0 = midpoints(&arm);

        // Act
        KinematicModel::set_configuration(&mut arm, &(&q + &v * h)).unwrap();
        let c1 = midpoints(&arm);

        // Assert
        let energy: Float = (0..3)
            .map(|i| 0.5 * arm.masses[i] * ((c1[i] - c0[i]) / h).norm_squared())
            .sum();
        crate::assert_close!(0.5 * v.dot(&(&M * &v)), energy, 1e-5);
        assert!(M.clone().cholesky().is_some());
        assert!((&M - M.transpose()).amax() < 1e-12);
    }

    #[test]
    fn velocity_length_is_checked() {
        let mut arm = build_planar_arm(2, 1.0, 1.0).unwrap();
        arm.set_velocity(&dvector![0.5, -0.5]).unwrap();
        assert_eq!(arm.velocity(), &dvector![0.5, -0.5]);
        assert!(arm.set_velocity(&dvector![1.]).is_err());
    }

    #[test]
    fn hanging_arm_needs_no_torque() {
        let mut arm = build_planar_arm(2, 1.0, 1.0).unwrap();
        DynamicsModel::set_configuration(&mut arm, &dvector![-PI / 2., 0.]).unwrap();
        assert!(arm.generalized_forces().amax() < 1e-12);
    }

    #[test]
    fn rejects_bad_configuration() {
        let mut arm = build_planar_arm(2, 1.0, 1.0).unwrap();
        let err = DynamicsModel::set_configuration(&mut arm, &dvector![0.]).unwrap_err();
        assert!(matches!(err, ModelError::Evaluation(_)));
        assert_eq!(arm.configuration(), &dvector![0., 0.]);
    }
}
