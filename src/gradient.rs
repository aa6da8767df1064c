//! Numerical differentiation of scalar costs that have no closed-form
//! derivative with respect to the configuration.

use na::DVector;
use tracing::trace;

use crate::{
    error::{ModelError, Result, SotError},
    types::Float,
};

/// Default finite-difference step.
/// Smaller steps amplify cancellation noise in the model evaluation, larger
/// steps bias the estimate.
pub const DEFAULT_STEP: Float = 1e-4;

/// A scalar cost evaluated at a configuration.
pub trait CostFunction {
    fn compute(&mut self, q: &DVector<Float>) -> std::result::Result<Float, ModelError>;
}

impl<F> CostFunction for F
where
    F: FnMut(&DVector<Float>) -> std::result::Result<Float, ModelError>,
{
    fn compute(&mut self, q: &DVector<Float>) -> std::result::Result<Float, ModelError> {
        self(q)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Difference {
    /// (f(q + εeᵢ) − f(q − εeᵢ)) / 2ε, error O(ε²), 2·dof evaluations.
    Central,
    /// (f(q + εeᵢ) − f(q)) / ε, error O(ε), dof + 1 evaluations.
    Forward,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GradientConfig {
    pub step: Float,
    pub scheme: Difference,
}

impl Default for GradientConfig {
    fn default() -> Self {
        GradientConfig {
            step: DEFAULT_STEP,
            scheme: Difference::Central,
        }
    }
}

#[derive(Clone, Debug)]
pub struct GradientWorker {
    config: GradientConfig,
}

impl GradientWorker {
    pub fn new(config: GradientConfig) -> Result<Self> {
        if !config.step.is_finite() || config.step <= 0. {
            return Err(SotError::Configuration(format!(
                "finite-difference step must be finite and positive, got {}",
                config.step
            )));
        }
        Ok(GradientWorker { config })
    }

    pub fn config(&self) -> &GradientConfig {
        &self.config
    }

    /// Assemble ∇f(q) by probing `cost` along each axis.
    ///
    /// Probes run on a private copy of `q`; the caller's vector is never
    /// touched. The first failing evaluation aborts the assembly.
    pub fn gradient<C>(
        &self,
        q: &DVector<Float>,
        cost: &mut C,
    ) -> std::result::Result<DVector<Float>, ModelError>
    where
        C: CostFunction + ?Sized,
    {
        let h = self.config.step;
        let mut shifted = q.clone();
        let mut gradient = DVector::zeros(q.len());

        let f0 = match self.config.scheme {
            Difference::Forward => Some(cost.compute(&shifted)?),
            Difference::Central => None,
        };

        for i in 0..q.len() {
            let qi = q[i];

            shifted[i] = qi + h;
            let f_plus = cost.compute(&shifted)?;
            gradient[i] = match f0 {
                Some(f0) => (f_plus - f0) / h,
                None => {
                    shifted[i] = qi - h;
                    let f_minus = cost.compute(&shifted)?;
                    (f_plus - f_minus) / (2. * h)
                }
            };
            shifted[i] = qi;

            trace!(axis = i, derivative = gradient[i], "finite difference");
        }

        Ok(gradient)
    }
}

#[cfg(test)]
mod gradient_tests {
    use na::{dvector, DMatrix};
    use rand::Rng;

    use super::*;
    use crate::{assert_close, util::test_utils::random_spd_matrix};

    fn quadratic(
        M: DMatrix<Float>,
    ) -> impl FnMut(&DVector<Float>) -> std::result::Result<Float, ModelError> {
        move |q: &DVector<Float>| Ok::<Float, ModelError>(q.dot(&(&M * q)))
    }

    #[test]
    fn rejects_bad_step() {
        for step in [0., -1e-3, Float::NAN, Float::INFINITY] {
            let config = GradientConfig {
                step,
                scheme: Difference::Central,
            };
            assert!(GradientWorker::new(config).is_err());
        }
    }

    #[test]
    fn central_difference_of_quadratic() {
        // Arrange
        let mut rng = rand::rng();
        let n = 5;
        let M = random_spd_matrix(&mut rng, n);
        let q = DVector::from_fn(n, |_, _| rng.random_range(-1.0..1.0));
        let analytic = 2. * &M * &q;
        let worker = GradientWorker::new(GradientConfig::default()).unwrap();

        // Act
        let numeric = worker.gradient(&q, &mut quadratic(M)).unwrap();

        // Assert
        assert!((numeric - analytic).amax() < 1e-6);
    }

    #[test]
    fn forward_difference_converges_linearly() {
        // Arrange
        let mut rng = rand::rng();
        let n = 4;
        let M = random_spd_matrix(&mut rng, n);
        let q = DVector::from_fn(n, |_, _| rng.random_range(-1.0..1.0));
        let analytic = 2. * &M * &q;

        // Act
        let errors: Vec<Float> = [1e-2, 1e-3, 1e-4]
            .iter()
            .map(|&step| {
                let worker = GradientWorker::new(GradientConfig {
                    step,
                    scheme: Difference::Forward,
                })
                .unwrap();
                let numeric = worker.gradient(&q, &mut quadratic(M.clone())).unwrap();
                (numeric - &analytic).amax()
            })
            .collect();

        // Assert
        // For a quadratic the forward error is exactly step * M_ii
        let bound = M.diagonal().amax();
        for (error, step) in errors.iter().zip([1e-2, 1e-3, 1e-4]) {
            assert!(*error <= bound * step * 1.01 + 1e-9, "{} > {}", error, bound * step);
        }
        assert!(errors[2] < errors[0]);
    }

    #[test]
    fn central_difference_converges_quadratically() {
        // f(q) = Σ qᵢ³, f''' = 6, so the central error is exactly step²
        let mut cubic =
            |q: &DVector<Float>| Ok::<Float, ModelError>(q.iter().map(|x| x.powi(3)).sum());
        let q = dvector![0.3, -0.7, 1.1];
        let analytic = q.map(|x| 3. * x * x);

        for step in [1e-1, 1e-2] {
            let worker = GradientWorker::new(GradientConfig {
                step,
                scheme: Difference::Central,
            })
            .unwrap();
            let numeric = worker.gradient(&q, &mut cubic).unwrap();
            for (n, a) in numeric.iter().zip(analytic.iter()) {
                assert_close!(n - a, step * step, 1e-9);
            }
        }
    }

    #[test]
    fn evaluation_count_and_caller_q_untouched() {
        // Arrange
        let q = dvector![1., 2., 3.];
        let q_before = q.clone();
        let mut calls = 0;
        let mut counting = |x: &DVector<Float>| {
            calls += 1;
            Ok::<Float, ModelError>(x.norm_squared())
        };

        // Act
        let central = GradientWorker::new(GradientConfig::default()).unwrap();
        central.gradient(&q, &mut counting).unwrap();
        let forward = GradientWorker::new(GradientConfig {
            step: 1e-4,
            scheme: Difference::Forward,
        })
        .unwrap();
        forward.gradient(&q, &mut counting).unwrap();

        // Assert
        assert_eq!(calls, 2 * 3 + (3 + 1));
        assert_eq!(q, q_before);
    }

    #[test]
    fn failing_evaluation_propagates() {
        let worker = GradientWorker::new(GradientConfig::default()).unwrap();
        let mut failing = |x: &DVector<Float>| {
            if x[1] > 2. {
                Err(ModelError::Singular("shifted configuration".into()))
            } else {
                Ok(0.)
            }
        };
        let err = worker.gradient(&dvector![0., 2.], &mut failing).unwrap_err();
        assert_eq!(err, ModelError::Singular("shifted configuration".into()));
    }
}
