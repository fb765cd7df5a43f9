//! Line search ("learning rate") algorithm.
//!
//! Given parameters `p`, a descent direction `d` and the loss at `p`, the
//! search picks a step `η > 0` approximately minimizing `φ(η) = loss(p + η·d)`.
//!
//! # Algorithm
//!
//! 1. **Bracketing.** Starting from a guess seeded with the previous
//!    epoch's accepted step, trial steps expand along the ray by the golden
//!    ratio while the loss keeps falling, or shrink toward zero when the
//!    first trial already worsens the loss. Both phases are bounded.
//! 2. **Refinement.** Once a triplet `a < b < c` with
//!    `φ(b) < min(φ(a), φ(c))` exists, the interior minimum is narrowed by
//!    golden-section reduction or Brent-style parabolic interpolation
//!    (with golden-section fallback), until the bracket width drops below
//!    a relative tolerance or an iteration cap is reached.
//!
//! # Contract
//!
//! The caller must pass a descent direction (`dᵗ·gradient < 0`); for any
//! other input the located step is unspecified. The returned step's loss
//! never exceeds the starting loss. When no trial step improves on the
//! starting loss the search returns a **zero step** together with the
//! starting loss; callers treat that as a stalled epoch, not an error.
//!
//! Every trial evaluates the loss through [`LossModel::loss_at`] and is
//! counted in the result, so callers can charge the trials against their
//! evaluation budgets. A non-finite trial loss is a fatal numerical error.

use num_traits::Float;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrainingError};
use crate::loss::LossModel;
use crate::types::{constants, DVector, Scalar};

/// How the bracketed minimum is refined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum StepSelection {
    /// Pure golden-section interior reduction.
    GoldenSection,
    /// Parabolic interpolation with golden-section fallback.
    Brent,
}

/// Tuning parameters for the line search.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LineSearchParams<T: Scalar> {
    /// Refinement method.
    pub method: StepSelection,

    /// Step guess for the first epoch, before any history exists.
    pub first_step: T,

    /// Relative bracket-width tolerance: refinement stops once the bracket
    /// shrinks below `step_tolerance ×` its initial width.
    pub step_tolerance: T,

    /// Cap on refinement iterations.
    pub max_refinements: usize,

    /// Cap on bracketing expansions (and on shrinks toward zero).
    pub max_expansions: usize,

    /// Smallest step the search will probe.
    pub min_step: T,

    /// Largest step the search will accept.
    pub max_step: T,
}

impl<T: Scalar> Default for LineSearchParams<T> {
    fn default() -> Self {
        Self {
            method: StepSelection::Brent,
            first_step: <T as Scalar>::from_f64(0.01),
            step_tolerance: T::DEFAULT_STEP_TOLERANCE,
            max_refinements: 100,
            max_expansions: 32,
            min_step: T::MIN_STEP_SIZE,
            max_step: T::MAX_STEP_SIZE,
        }
    }
}

impl<T: Scalar> LineSearchParams<T> {
    /// Creates parameters with the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the refinement method.
    pub fn with_method(mut self, method: StepSelection) -> Self {
        self.method = method;
        self
    }

    /// Sets the first-epoch step guess.
    pub fn with_first_step(mut self, first_step: T) -> Self {
        self.first_step = first_step;
        self
    }

    /// Sets the relative bracket-width tolerance.
    pub fn with_step_tolerance(mut self, tolerance: T) -> Self {
        self.step_tolerance = tolerance;
        self
    }

    /// Validates the parameters at the configuration boundary.
    pub fn validate(&self) -> Result<()> {
        if self.first_step <= T::zero() || !Float::is_finite(self.first_step) {
            return Err(TrainingError::invalid_configuration(
                "first step must be positive and finite",
                "first_step",
                format!("{}", self.first_step),
            ));
        }
        if self.step_tolerance <= T::zero() || self.step_tolerance >= T::one() {
            return Err(TrainingError::invalid_configuration(
                "step tolerance must be in (0, 1)",
                "step_tolerance",
                format!("{}", self.step_tolerance),
            ));
        }
        if self.min_step <= T::zero() || self.max_step <= self.min_step {
            return Err(TrainingError::invalid_configuration(
                "step bounds must satisfy 0 < min_step < max_step",
                "min_step/max_step",
                format!("{}/{}", self.min_step, self.max_step),
            ));
        }
        if self.max_refinements == 0 || self.max_expansions == 0 {
            return Err(TrainingError::invalid_configuration(
                "iteration caps must be at least 1",
                "max_refinements/max_expansions",
                format!("{}/{}", self.max_refinements, self.max_expansions),
            ));
        }
        Ok(())
    }
}

/// Outcome of one line search.
#[derive(Debug, Clone, Copy)]
pub struct LineSearchResult<T: Scalar> {
    /// Accepted step size; zero when no improving step was found.
    pub step_size: T,
    /// Loss at the accepted step.
    pub loss: T,
    /// Loss evaluations spent on trial points.
    pub evaluations: usize,
}

/// One-dimensional probe along the search ray, tracking the best step seen.
struct RayProbe<'a, T: Scalar, M: LossModel<T>> {
    model: &'a mut M,
    point: &'a DVector<T>,
    direction: &'a DVector<T>,
    best_step: T,
    best_loss: T,
    evaluations: usize,
}

impl<'a, T: Scalar, M: LossModel<T>> RayProbe<'a, T, M> {
    fn new(model: &'a mut M, point: &'a DVector<T>, direction: &'a DVector<T>, starting_loss: T) -> Self {
        Self {
            model,
            point,
            direction,
            best_step: T::zero(),
            best_loss: starting_loss,
            evaluations: 0,
        }
    }

    fn eval(&mut self, step: T) -> Result<T> {
        let candidate = self.point + self.direction * step;
        let loss = self.model.loss_at(&candidate)?;
        self.evaluations += 1;
        if !Float::is_finite(loss) {
            return Err(TrainingError::numerical_error(format!(
                "loss is not finite at trial step {step}"
            )));
        }
        if loss < self.best_loss {
            self.best_loss = loss;
            self.best_step = step;
        }
        Ok(loss)
    }

    fn finish(self) -> LineSearchResult<T> {
        LineSearchResult {
            step_size: self.best_step,
            loss: self.best_loss,
            evaluations: self.evaluations,
        }
    }
}

/// Bracketing triplet `a < b < c` with `f(b) < min(f(a), f(c))`.
#[derive(Clone, Copy)]
struct Bracket<T> {
    a: T,
    b: T,
    c: T,
    fa: T,
    fb: T,
    fc: T,
}

/// Searches for a step along `direction` from `point`.
///
/// `initial_step` seeds the first trial; pass the previous epoch's accepted
/// step when one exists, or a non-positive value to fall back to
/// [`LineSearchParams::first_step`].
pub fn search<T, M>(
    model: &mut M,
    params: &LineSearchParams<T>,
    point: &DVector<T>,
    direction: &DVector<T>,
    starting_loss: T,
    initial_step: T,
) -> Result<LineSearchResult<T>>
where
    T: Scalar,
    M: LossModel<T>,
{
    let mut probe = RayProbe::new(model, point, direction, starting_loss);

    let seed = if initial_step > T::zero() {
        initial_step
    } else {
        params.first_step
    };
    let seed = Float::min(Float::max(seed, params.min_step), params.max_step);

    let bracket = match form_bracket(&mut probe, params, starting_loss, seed)? {
        Some(bracket) => bracket,
        // Loss is flat or monotone along the probed range: settle for the
        // best step seen, which may be zero.
        None => return Ok(probe.finish()),
    };

    refine(&mut probe, params, bracket)?;
    Ok(probe.finish())
}

/// Expands or shrinks trial steps until a minimum is bracketed.
fn form_bracket<T, M>(
    probe: &mut RayProbe<'_, T, M>,
    params: &LineSearchParams<T>,
    starting_loss: T,
    seed: T,
) -> Result<Option<Bracket<T>>>
where
    T: Scalar,
    M: LossModel<T>,
{
    let golden = constants::golden_ratio::<T>();
    let mut b = seed;
    let mut fb = probe.eval(b)?;

    if fb >= starting_loss {
        // The seed overshoots: shrink toward zero until the loss improves.
        // `(c, fc)` tracks the smallest step known to be too large.
        let mut c = b;
        let mut fc = fb;
        let mut found = false;
        for _ in 0..params.max_expansions {
            let next = b / golden;
            if next < params.min_step {
                break;
            }
            let f_next = probe.eval(next)?;
            if f_next < starting_loss {
                c = b;
                fc = fb;
                b = next;
                fb = f_next;
                found = true;
                break;
            }
            b = next;
            fb = f_next;
        }
        if !found {
            return Ok(None);
        }
        return Ok(Some(Bracket {
            a: T::zero(),
            b,
            c,
            fa: starting_loss,
            fb,
            fc,
        }));
    }

    // The seed improves: expand until the loss turns back up.
    let mut a = T::zero();
    let mut fa = starting_loss;
    let mut c = Float::min(b * golden, params.max_step);
    let mut fc = probe.eval(c)?;
    for _ in 0..params.max_expansions {
        if fc >= fb {
            return Ok(Some(Bracket { a, b, c, fa, fb, fc }));
        }
        if c >= params.max_step {
            // Still descending at the step ceiling; the best trial stands.
            return Ok(None);
        }
        a = b;
        fa = fb;
        b = c;
        fb = fc;
        c = Float::min(c * golden, params.max_step);
        fc = probe.eval(c)?;
    }
    if fc >= fb {
        return Ok(Some(Bracket { a, b, c, fa, fb, fc }));
    }
    Ok(None)
}

/// Narrows a bracket to the configured tolerance.
fn refine<T, M>(
    probe: &mut RayProbe<'_, T, M>,
    params: &LineSearchParams<T>,
    mut bracket: Bracket<T>,
) -> Result<()>
where
    T: Scalar,
    M: LossModel<T>,
{
    let section = constants::golden_section::<T>();
    let width_goal = params.step_tolerance * (bracket.c - bracket.a);

    for _ in 0..params.max_refinements {
        if bracket.c - bracket.a <= width_goal {
            break;
        }

        let golden_step = |br: &Bracket<T>| {
            if br.b - br.a > br.c - br.b {
                br.b - section * (br.b - br.a)
            } else {
                br.b + section * (br.c - br.b)
            }
        };

        let u = match params.method {
            StepSelection::GoldenSection => golden_step(&bracket),
            StepSelection::Brent => {
                parabolic_step(&bracket).unwrap_or_else(|| golden_step(&bracket))
            }
        };
        let fu = probe.eval(u)?;

        if fu < bracket.fb {
            if u < bracket.b {
                bracket.c = bracket.b;
                bracket.fc = bracket.fb;
            } else {
                bracket.a = bracket.b;
                bracket.fa = bracket.fb;
            }
            bracket.b = u;
            bracket.fb = fu;
        } else if u < bracket.b {
            bracket.a = u;
            bracket.fa = fu;
        } else {
            bracket.c = u;
            bracket.fc = fu;
        }
    }
    Ok(())
}

/// Minimum of the parabola through the bracket's three points, or `None`
/// when the parabola is degenerate or its minimum escapes the bracket
/// interior.
fn parabolic_step<T: Scalar>(bracket: &Bracket<T>) -> Option<T> {
    let Bracket { a, b, c, fa, fb, fc } = *bracket;
    let r = (b - a) * (fb - fc);
    let q = (b - c) * (fb - fa);
    let denominator = <T as Scalar>::from_f64(2.0) * (r - q);
    if Float::abs(denominator) <= T::EPSILON {
        return None;
    }
    let u = b - ((b - a) * r - (b - c) * q) / denominator;
    // Reject steps outside the interior or indistinguishable from b.
    let margin = T::EPSILON * Float::max(Float::abs(b), T::one());
    if u <= a || u >= c || Float::abs(u - b) <= margin {
        return None;
    }
    Some(u)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loss::test_losses::QuadraticLoss;
    use crate::loss::{Batch, LossModel};
    use crate::types::DMatrix;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn quadratic_setup(p0: f64) -> (QuadraticLoss<f64>, DVector<f64>, DVector<f64>, f64) {
        let mut model = QuadraticLoss::simple(DVector::from_vec(vec![p0]));
        let point = model.parameters();
        let (loss, gradient) = model.evaluate(&Batch::Full).unwrap();
        (model, point, -gradient, loss)
    }

    #[test]
    fn test_finds_quadratic_minimum() {
        // phi(eta) = (5 - 10 eta)^2, minimized at eta = 0.5.
        let (mut model, point, direction, loss) = quadratic_setup(5.0);
        for method in [StepSelection::GoldenSection, StepSelection::Brent] {
            let params = LineSearchParams::new().with_method(method);
            let result = search(&mut model, &params, &point, &direction, loss, 0.01).unwrap();
            assert_relative_eq!(result.step_size, 0.5, epsilon = 1e-3);
            assert!(result.loss < 1e-4);
        }
    }

    #[test]
    fn test_evaluation_budget_is_bounded() {
        let (mut model, point, direction, loss) = quadratic_setup(5.0);
        for method in [StepSelection::GoldenSection, StepSelection::Brent] {
            let params = LineSearchParams::new().with_method(method);
            let result = search(&mut model, &params, &point, &direction, loss, 0.01).unwrap();
            // Bracketing expansions plus refinement iterations, plus the seed.
            assert!(
                result.evaluations <= params.max_expansions + params.max_refinements + 2,
                "{method:?} spent {} evaluations",
                result.evaluations
            );
        }
    }

    #[test]
    fn test_zero_step_at_minimum() {
        // At the minimum every direction worsens the loss; the search must
        // report a stalled (zero) step, never a worsening one.
        let mut model = QuadraticLoss::simple(DVector::from_vec(vec![0.0_f64]));
        let point = model.parameters();
        let direction = DVector::from_vec(vec![1.0]);
        let result = search(
            &mut model,
            &LineSearchParams::new(),
            &point,
            &direction,
            0.0,
            0.01,
        )
        .unwrap();
        assert_eq!(result.step_size, 0.0);
        assert_eq!(result.loss, 0.0);
    }

    #[test]
    fn test_seed_larger_than_minimum_shrinks() {
        // Seed far past the minimum: phi(4.0) = 1225 > 25, so the search
        // must shrink toward zero and still end below the starting loss.
        let (mut model, point, direction, loss) = quadratic_setup(5.0);
        let result = search(
            &mut model,
            &LineSearchParams::new(),
            &point,
            &direction,
            loss,
            4.0,
        )
        .unwrap();
        assert!(result.step_size > 0.0);
        assert!(result.loss < loss);
    }

    #[test]
    fn test_params_validation() {
        assert!(LineSearchParams::<f64>::new().validate().is_ok());
        assert!(LineSearchParams::<f64>::new()
            .with_first_step(-1.0)
            .validate()
            .is_err());
        assert!(LineSearchParams::<f64>::new()
            .with_step_tolerance(2.0)
            .validate()
            .is_err());
    }

    proptest! {
        /// Hard post-condition: the accepted step never worsens the loss,
        /// for any starting point, curvature and seed.
        #[test]
        fn prop_never_worsens(
            p0 in -100.0_f64..100.0,
            curvature in 0.05_f64..50.0,
            seed in 1e-6_f64..10.0,
        ) {
            let a = DMatrix::from_vec(1, 1, vec![curvature]);
            let mut model = QuadraticLoss::new(
                a,
                DVector::zeros(1),
                0.0,
                DVector::from_vec(vec![p0]),
            );
            let point = model.parameters();
            let (loss, gradient) = model.evaluate(&Batch::Full).unwrap();
            let direction = -gradient;
            let result = search(
                &mut model,
                &LineSearchParams::new(),
                &point,
                &direction,
                loss,
                seed,
            )
            .unwrap();
            prop_assert!(result.loss <= loss);
        }
    }
}
