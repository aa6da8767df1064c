use na::{DMatrix, DVector, Isometry3, Matrix6, Vector6};

use crate::{
    error::{ModelError, Result, SotError},
    model::{borrow_model, InertialModel, SharedModel},
    task::{validate_weight, Task, TaskData},
    tasks::cartesian::pose_error,
    types::Float,
};

pub const DEFAULT_STIFFNESS: Float = 100.;

/// Virtual spring and damper between a link and a reference pose, at the
/// torque level: the decision vector is the joint torque τ.
///
/// The wrench F = K·e + D·(v_ref − J·q̇), with e the pose error (angular
/// first) and q̇ the model velocity. The task asks τ to produce the same
/// Cartesian acceleration as JᵀF would:
/// A = J·M⁻¹, b = λ·J·M⁻¹·Jᵀ·F.
///
/// Joint torques compensating gravity and bias forces are not part of τ.
pub struct CartesianSpringDamper<M: InertialModel> {
    data: TaskData,
    model: SharedModel<M>,
    link: usize,
    reference: Isometry3<Float>,
    reference_twist: Vector6<Float>,
    K: Matrix6<Float>,
    D: Matrix6<Float>,
    spring_force: Vector6<Float>,
    damper_force: Vector6<Float>,
}

impl<M: InertialModel> CartesianSpringDamper<M> {
    /// The reference starts at the pose of `link` at `q`, at rest.
    /// Stiffness defaults to [`DEFAULT_STIFFNESS`] with damping 2√K.
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

        let mut task = CartesianSpringDamper {
            data: TaskData::new(id, 6, dof),
            model,
            link,
            reference: Isometry3::identity(),
            reference_twist: Vector6::zeros(),
            K: Matrix6::identity() * DEFAULT_STIFFNESS,
            D: Matrix6::identity() * 2. * DEFAULT_STIFFNESS.sqrt(),
            spring_force: Vector6::zeros(),
            damper_force: Vector6::zeros(),
        };
        task.reference = task.current_pose(q)?;
        task.update(q)?;
        Ok(task)
    }

    pub fn link(&self) -> usize {
        self.link
    }

    pub fn stiffness_damping(&self) -> (&Matrix6<Float>, &Matrix6<Float>) {
        (&self.K, &self.D)
    }

    /// Both must be symmetric positive semi-definite. Takes effect at the
    /// next `update`.
    pub fn set_stiffness_damping(&mut self, K: Matrix6<Float>, D: Matrix6<Float>) -> Result<()> {
        let id = &self.data.id;
        validate_weight(&format!("stiffness of `{}`", id), &to_dmatrix(&K), 6)?;
        validate_weight(&format!("damping of `{}`", id), &to_dmatrix(&D), 6)?;
        self.K = K;
        self.D = D;
        Ok(())
    }

    pub fn reference(&self) -> (&Isometry3<Float>, &Vector6<Float>) {
        (&self.reference, &self.reference_twist)
    }

    /// New reference pose, reached at rest.
    pub fn set_reference(&mut self, reference: Isometry3<Float>) {
        self.set_reference_with_twist(reference, Vector6::zeros());
    }

    /// Reference pose and twist (angular first), both in the world frame.
    pub fn set_reference_with_twist(&mut self, reference: Isometry3<Float>, twist: Vector6<Float>) {
        self.reference = reference;
        self.reference_twist = twist;
    }

    /// K·e at the last update.
    pub fn spring_force(&self) -> &Vector6<Float> {
        &self.spring_force
    }

    /// D·(v_ref − J·q̇) at the last update.
    pub fn damper_force(&self) -> &Vector6<Float> {
        &self.damper_force
    }

    fn current_pose(&self, q: &DVector<Float>) -> Result<Isometry3<Float>> {
        let id = &self.data.id;
        let mut model = borrow_model(&self.model).map_err(|e| SotError::model(id, q, e))?;
        model
            .set_configuration(q)
            .map_err(|e| SotError::model(id, q, e))?;
        Ok(model.pose(self.link))
    }
}

fn to_dmatrix(m: &Matrix6<Float>) -> DMatrix<Float> {
    DMatrix::from_column_slice(6, 6, m.as_slice())
}

impl<M: InertialModel> Task for CartesianSpringDamper<M> {
    fn data(&self) -> &TaskData {
        &self.data
    }

    fn data_mut(&mut self) -> &mut TaskData {
        &mut self.data
    }

    fn update(&mut self, q: &DVector<Float>) -> Result<()> {
        let id = &self.data.id;
        let (pose, J, v, M_inv) = {
            let mut model = borrow_model(&self.model).map_err(|e| SotError::model(id, q, e))?;
            model
                .set_configuration(q)
                .map_err(|e| SotError::model(id, q, e))?;
            let M_inv = model.mass_matrix().try_inverse().ok_or_else(|| {
                SotError::model(id, q, ModelError::Singular("mass matrix".into()))
            })?;
            let J = model.jacobian(self.link);
            let v = &J * model.velocity();
            (model.pose(self.link), J, v, M_inv)
        };

        self.spring_force = self.K * pose_error(&self.reference, &pose);
        self.damper_force = self.D * (self.reference_twist - v);
        let F = DVector::from_column_slice((self.spring_force + self.damper_force).as_slice());

        let J = DMatrix::from_column_slice(6, J.ncols(), J.as_slice());
        let A = &J * M_inv;
        self.data.b = (&A * J.transpose() * F) * self.data.lambda;
        self.data.A = A;
        self.data.apply_active_joints();
        Ok(())
    }
}

#[cfg(test)]
mod cartesian_spring_damper_tests {
    use na::{dvector, Translation3};

    use super::*;
    use crate::{
        assert_close, assert_vec_close,
        helpers::{build_planar_arm, PlanarArm},
        model::{shared, InertialModel},
    };

    fn position_only(stiffness: Float, damping: Float) -> (Matrix6<Float>, Matrix6<Float>) {
        let select = Vector6::new(0., 0., 0., 1., 1., 1.);
        (
            Matrix6::from_diagonal(&(select * stiffness)),
            Matrix6::from_diagonal(&(select * damping)),
        )
    }

    #[test]
    fn at_rest_on_reference_asks_nothing() {
        // Arrange
        let model = shared(build_planar_arm(3, 0.5, 1.0).unwrap());
        let q = dvector![0.2, 0.4, -0.3];

        // Act
        let task = CartesianSpringDamper::new("spring_damper::tip", &q, model, 2).unwrap();

        // Assert
        assert_eq!(task.A().shape(), (6, 3));
        assert!(task.b().amax() < 1e-12);
        assert!(task.spring_force().amax() < 1e-12);
        let (K, D) = task.stiffness_damping();
        assert_eq!(K[(3, 3)], DEFAULT_STIFFNESS);
        assert_close!(D[(3, 3)], 20., 1e-12);
    }

    #[test]
    fn spring_force_follows_reference_offset() {
        // Arrange
        let model = shared(build_planar_arm(2, 1.0, 1.0).unwrap());
        let q = dvector![0.3, 0.5];
        let mut task = CartesianSpringDamper::new("spring_damper::tip", &q, model, 1).unwrap();
        let (K, D) = position_only(200., 3.);
        task.set_stiffness_damping(K, D).unwrap();
        let mut reference = *task.reference().0;
        reference.append_translation_mut(&Translation3::new(0.05, -0.1, 0.));

        // Act
        task.set_reference(reference);
        task.update(&q).unwrap();

        // Assert
        assert_vec_close!(
            task.spring_force(),
            &Vector6::new(0., 0., 0., 10., -20., 0.),
            1e-12
        );
        assert!(task.damper_force().amax() < 1e-12);
    }

    #[test]
    fn damper_opposes_link_velocity() {
        // Arrange
        let model = shared(build_planar_arm(2, 1.0, 1.0).unwrap());
        let q = dvector![0., 0.];
        let mut task =
            CartesianSpringDamper::new("spring_damper::tip", &q, model.clone(), 1).unwrap();
        let (K, D) = position_only(0., 2.);
        task.set_stiffness_damping(K, D).unwrap();

        // Act
        // stretched along x, the tip moves along +y at 2 m/s
        model.borrow_mut().set_velocity(&dvector![1., 0.]).unwrap();
        task.update(&q).unwrap();

        // Assert
        assert_vec_close!(
            task.damper_force(),
            &Vector6::new(0., 0., 0., 0., -4., 0.),
            1e-12
        );
    }

    #[test]
    fn jt_f_solves_the_task() {
        // Arrange
        let model = shared(build_planar_arm(3, 0.5, 1.0).unwrap());
        let q = dvector![0.2, 0.4, -0.3];
        let mut task =
            CartesianSpringDamper::new("spring_damper::tip", &q, model.clone(), 2).unwrap();
        let mut reference = *task.reference().0;
        reference.append_translation_mut(&Translation3::new(-0.1, 0.05, 0.));
        task.set_reference(reference);
        model.borrow_mut().set_velocity(&dvector![0.1, -0.2, 0.3]).unwrap();
        task.update(&q).unwrap();

        // Act
        let J = {
            let arm = model.borrow();
            let J = crate::model::KinematicModel::jacobian(&*arm, 2);
            DMatrix::from_column_slice(6, 3, J.as_slice())
        };
        let F = task.spring_force() + task.damper_force();
        let tau = J.transpose() * DVector::from_column_slice(F.as_slice());

        // Assert
        assert!(task.residual(&tau).amax() < 1e-9);
    }

    #[test]
    fn rejects_indefinite_stiffness() {
        let model = shared(build_planar_arm(2, 1.0, 1.0).unwrap());
        let mut task: CartesianSpringDamper<PlanarArm> =
            CartesianSpringDamper::new("spring_damper::tip", &dvector![0., 0.], model, 1)
                .unwrap();
        let K = Matrix6::from_diagonal(&Vector6::new(1., 1., 1., 1., 1., -1.));
        let err = task.set_stiffness_damping(K, Matrix6::identity()).unwrap_err();
        assert!(matches!(err, SotError::Configuration(_)));
        assert_eq!(task.stiffness_damping().0[(5, 5)], DEFAULT_STIFFNESS);
    }
}
