pub mod aggregated;
pub mod cartesian;
pub mod cartesian_spring_damper;
pub mod generic;
pub mod joint_spring_damper;
pub mod minimum_effort;
pub mod postural;
