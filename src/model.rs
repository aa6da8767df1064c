//! Boundary to the rigid-body model collaborator.
//!
//! Tasks never own the configuration vector. They read the model through a
//! [`SharedModel`] handle, which is updated by whoever calls `update(q)`.

use std::{
    cell::{RefCell, RefMut},
    rc::Rc,
};

use na::{DMatrix, DVector, Isometry3, Matrix6xX};

use crate::{error::ModelError, types::Float};

/// Model handle shared between the tasks of one stack.
///
/// Not `Send`: each stack owns its own model instances. The `RefCell` borrow
/// enforces exclusive access while a gradient evaluation mutates the model.
pub type SharedModel<M> = Rc<RefCell<M>>;

pub fn shared<M>(model: M) -> SharedModel<M> {
    Rc::new(RefCell::new(model))
}

/// Exclusive access to a shared model. A model already borrowed elsewhere is
/// an evaluation failure.
pub fn borrow_model<M>(model: &SharedModel<M>) -> Result<RefMut<'_, M>, ModelError> {
    model
        .try_borrow_mut()
        .map_err(|e| ModelError::Evaluation(format!("model busy: {}", e)))
}

/// Dynamics side of the model: generalized forces at a configuration.
pub trait DynamicsModel {
    fn dof(&self) -> usize;

    /// Configuration the model was last evaluated at.
    fn configuration(&self) -> &DVector<Float>;

    /// Re-evaluate the model at `q`.
    fn set_configuration(&mut self, q: &DVector<Float>) -> Result<(), ModelError>;

    /// Generalized forces needed to hold the current configuration
    /// (gravity and, if the model has velocities, bias terms).
    fn generalized_forces(&self) -> DVector<Float>;

    /// Absolute maximum torque of each joint.
    fn joint_torque_limits(&self) -> DVector<Float>;
}

/// Kinematics side of the model: link poses and Jacobians.
pub trait KinematicModel {
    fn dof(&self) -> usize;

    fn set_configuration(&mut self, q: &DVector<Float>) -> Result<(), ModelError>;

    fn num_links(&self) -> usize;

    /// Pose of `link` expressed in the world frame.
    fn pose(&self, link: usize) -> Isometry3<Float>;

    /// Geometric Jacobian of `link` in the world frame.
    /// Rows are ordered angular then linear.
    fn jacobian(&self, link: usize) -> Matrix6xX<Float>;
}

/// Joint-space state needed by torque-level (virtual model) tasks.
pub trait InertialModel: KinematicModel {
    /// Joint velocities the model was last given.
    fn velocity(&self) -> &DVector<Float>;

    fn set_velocity(&mut self, v: &DVector<Float>) -> Result<(), ModelError>;

    /// Joint-space inertia matrix at the current configuration.
    fn mass_matrix(&self) -> DMatrix<Float>;
}
