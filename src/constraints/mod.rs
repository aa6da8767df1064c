pub mod aggregated;
pub mod bilateral;
pub mod joint_limits;
pub mod torque_bounds;
pub mod torque_limits;
pub mod velocity_limits;
