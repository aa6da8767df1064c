use gorilla_sot::{
    constraints::{torque_limits::TorqueLimits, velocity_limits::VelocityLimits},
    error::{Result, SotError},
    gradient::{CostFunction, Difference, GradientConfig},
    helpers::build_planar_arm,
    model::shared,
    na::{DMatrix, DVector},
    qp::ClarabelQp,
    solver::{CascadeConfig, CascadeSolver, Stack},
    task::Task,
    tasks::{
        cartesian::Cartesian,
        minimum_effort::{EffortCost, MinimumEffort},
    },
    types::Float,
};
use tracing::{info, warn};

/// Four-link arm holding its elbow in place while the rest of the chain
/// settles into a posture that needs less torque against gravity.
///
/// The elbow task plays the role of the support condition the effort cost
/// assumes.
pub fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let n_links = 4;
    let elbow = 1;
    let dt = 0.01;
    let arm = shared(build_planar_arm(n_links, 0.5, 1.0)?);
    let mut q: DVector<Float> = DVector::zeros(n_links);

    let mut hold = Cartesian::new("cartesian::elbow", &q, arm.clone(), elbow)?;
    hold.set_weight(DMatrix::from_diagonal(&DVector::from_column_slice(&[
        0., 0., 0., 1., 1., 1.,
    ])))?;

    let mut effort = MinimumEffort::new(&q, arm.clone())?;
    effort.set_gradient_config(GradientConfig {
        step: 1e-5,
        scheme: Difference::Central,
    })?;
    let W = effort.effort_weight().clone();

    let mut stack = Stack::new(n_links);
    stack.push(Box::new(hold))?;
    stack.push(Box::new(effort))?;
    stack.add_constraint(Box::new(TorqueLimits::new(&q, arm.clone())?))?;
    stack.add_constraint(Box::new(VelocityLimits::new(1.0, dt, n_links)?))?;

    let mut solver = CascadeSolver::new(ClarabelQp::default(), CascadeConfig::default())?;
    let mut cost = EffortCost::new(arm.clone(), W);
    let initial = cost
        .compute(&q)
        .map_err(|e| SotError::model("minimum_effort_posture", &q, e))?;

    for cycle in 0..300 {
        stack.update(&q)?;
        let dq = match solver.solve(&stack) {
            Ok(dq) => dq,
            Err(e) => {
                warn!(cycle, error = %e, "no command this cycle, holding posture");
                return Err(e);
            }
        };
        q += dq;

        if cycle % 50 == 0 {
            let effort = cost
                .compute(&q)
                .map_err(|e| SotError::model("minimum_effort_posture", &q, e))?;
            info!(cycle, effort, "effort");
        }
    }

    let last = cost
        .compute(&q)
        .map_err(|e| SotError::model("minimum_effort_posture", &q, e))?;
    info!(initial, last, q = ?q.as_slice(), "effort reduced");
    Ok(())
}
