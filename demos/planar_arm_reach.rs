use gorilla_sot::{
    constraints::{joint_limits::JointLimits, velocity_limits::VelocityLimits},
    error::{Result, SotError},
    helpers::build_planar_arm,
    model::{shared, KinematicModel},
    na::{dvector, DMatrix, DVector, Translation3},
    qp::{ClarabelQp, ClarabelSettings},
    solver::{CascadeConfig, CascadeSolver, Stack},
    task::Task,
    tasks::{
        aggregated::{Aggregated, Child},
        cartesian::Cartesian,
        minimum_effort::MinimumEffort,
        postural::Postural,
    },
    types::Float,
    PI,
};
use tracing::info;

/// Three-link planar arm reaching a point with its tip, while using the
/// remaining redundancy to stay close to its initial posture at low effort.
pub fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let n_links = 3;
    let tip = n_links - 1;
    let dt = 0.01;
    let arm = shared(build_planar_arm(n_links, 0.5, 1.0)?);
    let mut q: DVector<Float> = dvector![PI / 4., -PI / 4., -PI / 4.];

    // Level 0: tip position
    let mut reach = Cartesian::new("cartesian::tip", &q, arm.clone(), tip)?;
    let mut target = *reach.reference();
    target.append_translation_mut(&Translation3::new(-0.4, -0.3, 0.));
    reach.set_reference(target);
    reach.set_lambda(0.2)?;
    reach.set_weight(DMatrix::from_diagonal(&dvector![0., 0., 0., 1., 1., 1.]))?;

    // Level 1: posture and effort, traded off against each other
    let mut posture = Postural::new(&q)?;
    posture.set_lambda(0.1)?;
    let mut effort = MinimumEffort::new(&q, arm.clone())?;
    effort.set_lambda(0.05)?;
    let redundancy = Aggregated::new(
        "posture+effort",
        vec![Child::task(posture), Child::task(effort)],
        &q,
    )?
    .with_weights(vec![0.1, 1.0])?;

    let mut stack = Stack::new(n_links);
    stack.push(Box::new(reach))?;
    stack.push(Box::new(redundancy))?;
    stack.add_constraint(Box::new(JointLimits::new(
        &q,
        DVector::from_element(n_links, -PI * 0.9),
        DVector::from_element(n_links, PI * 0.9),
    )?))?;
    stack.add_constraint(Box::new(VelocityLimits::new(2.0, dt, n_links)?))?;

    let mut solver = CascadeSolver::new(
        ClarabelQp::new(ClarabelSettings::default()),
        CascadeConfig::default(),
    )?;

    for cycle in 0..400 {
        stack.update(&q)?;
        let dq = solver.solve(&stack)?;
        q += dq;

        if cycle % 50 == 0 {
            let reports = solver.reports();
            info!(
                cycle,
                reach_residual = reports[0].residual_norm,
                redundancy_cost = reports[1].cost,
                "cascade"
            );
        }
    }

    let mut arm = arm.borrow_mut();
    KinematicModel::set_configuration(&mut *arm, &q)
        .map_err(|e| SotError::model("planar_arm_reach", &q, e))?;
    let reached = arm.pose(tip).translation.vector;
    info!(
        x = reached.x,
        y = reached.y,
        target_x = target.translation.x,
        target_y = target.translation.y,
        q = ?q.as_slice(),
        "final tip position"
    );
    Ok(())
}
