use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt, TerminationReason};
use nalgebra::{DMatrix, DVector, Dyn, Owned};

use crate::circuit::{Circuit, Cplx};
use crate::error::Error;

/// The least-squares target handed to a [`Minimizer`]: maps a parameter
/// vector to the flattened residual vector, `None` when it cannot be
/// evaluated there.
pub type ResidualFn<'a> = dyn Fn(&[f64]) -> Option<Vec<f64>> + 'a;

/// Converged parameters plus the diagnostics passed through from the solver.
#[derive(Debug, Clone)]
pub struct FitOutcome {
    pub parameters: Vec<f64>,
    pub diagnostics: FitDiagnostics,
}

#[derive(Debug, Clone)]
pub struct FitDiagnostics {
    /// Final residual vector, in the residual function's layout
    pub residuals: Vec<f64>,
    /// Mean squared value of the final residual vector
    pub mean_square: f64,
    /// Covariance estimate `(J^T J)^-1` at the optimum; `None` when the
    /// Jacobian is degenerate there
    pub covariance: Option<DMatrix<f64>>,
    /// Residual evaluations spent by the solver
    pub evaluations: usize,
}

/// A nonlinear least-squares minimizer.
///
/// The fit driver is written against this interface so the concrete
/// optimizer can be swapped, or faked in tests.
pub trait Minimizer {
    fn minimize(
        &self,
        residual_fn: &ResidualFn<'_>,
        initial_guess: &[f64],
        bounds: Option<&[(f64, f64)]>,
    ) -> Result<FitOutcome, Error>;
}

/// Flattened real-valued residual vector: model minus measured, all real
/// parts first, then all imaginary parts. Pure; the layout is fixed so a
/// re-run with the same inputs reproduces it exactly.
pub fn residuals(
    parameters: &[f64],
    measured: &[Cplx],
    frequencies: &[f64],
    circuit: &Circuit,
) -> Result<Vec<f64>, Error> {
    let expected = circuit.parameter_count();
    if parameters.len() != expected {
        return Err(Error::ParameterArity { expected, actual: parameters.len() });
    }
    debug_assert_eq!(frequencies.len(), measured.len());

    let n = frequencies.len();
    let mut out = vec![0.0; 2 * n];
    for (i, (&freq, &z)) in frequencies.iter().zip(measured).enumerate() {
        let diff = circuit.eval(std::f64::consts::TAU * freq, parameters) - z;
        out[i] = diff.re;
        out[n + i] = diff.im;
    }
    Ok(out)
}

/// One fit: validate the inputs, hand the residual function to the solver,
/// return the optimum and the solver diagnostics unchanged.
pub fn circuit_fit(
    frequencies: &[f64],
    impedance: &[Cplx],
    circuit: &Circuit,
    initial_guess: &[f64],
    solver: &dyn Minimizer,
    bounds: Option<&[(f64, f64)]>,
) -> Result<FitOutcome, Error> {
    check_spectrum(frequencies, impedance)?;

    let expected = circuit.parameter_count();
    if initial_guess.len() != expected {
        return Err(Error::GuessLengthMismatch { expected, actual: initial_guess.len() });
    }
    if let Some(v) = initial_guess.iter().find(|v| !v.is_finite()) {
        return Err(Error::InvalidData(format!("initial guess value {v} is not finite")));
    }
    if let Some(bounds) = bounds {
        if bounds.len() != expected {
            return Err(Error::InvalidData(format!(
                "{} bound pairs for {expected} parameters",
                bounds.len()
            )));
        }
        if let Some((lo, hi)) = bounds.iter().find(|(lo, hi)| !(lo <= hi)) {
            return Err(Error::InvalidData(format!("lower bound {lo} exceeds upper bound {hi}")));
        }
    }

    let residual_fn = |params: &[f64]| residuals(params, impedance, frequencies, circuit).ok();
    let outcome = solver.minimize(&residual_fn, initial_guess, bounds)?;
    log::debug!(
        "fit finished: mean squared residual {:e} after {} evaluations",
        outcome.diagnostics.mean_square,
        outcome.diagnostics.evaluations
    );
    Ok(outcome)
}

pub(crate) fn check_frequencies(frequencies: &[f64]) -> Result<(), Error> {
    if frequencies.is_empty() {
        return Err(Error::InvalidData("empty frequency series".into()));
    }
    if let Some(f) = frequencies.iter().find(|f| !(f.is_finite() && **f > 0.0)) {
        return Err(Error::InvalidData(format!("frequency {f} is not a positive real number")));
    }
    Ok(())
}

pub(crate) fn check_spectrum(frequencies: &[f64], impedance: &[Cplx]) -> Result<(), Error> {
    check_frequencies(frequencies)?;
    if frequencies.len() != impedance.len() {
        return Err(Error::InvalidData(format!(
            "{} frequencies against {} impedance samples",
            frequencies.len(),
            impedance.len()
        )));
    }
    Ok(())
}

/// Logarithmically spaced sweep, `count` points from `first` to `last`.
pub fn geomspace(first: f64, last: f64, count: usize) -> impl Iterator<Item = f64> {
    let (lf, ll) = (first.ln(), last.ln());
    let delta = (ll - lf) / ((count - 1) as f64);
    (0..count).map(move |i| (lf + (i as f64) * delta).exp())
}

// Saturation for the internal parameter when a physical value sits on or
// outside its bounds; exp(±23) spans ~1e-10..1e10 around the bound.
const CLAMP: f64 = 23.0;

/// Smooth reparameterization between a bounded physical parameter and the
/// unconstrained internal one the solver sees.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Transform {
    Identity,
    /// (lo, inf): p = lo + exp(x)
    LogLower(f64),
    /// (-inf, hi): p = hi - exp(x)
    LogUpper(f64),
    /// (lo, hi): p = lo + (hi-lo)*sigmoid(x)
    Logistic(f64, f64),
}

impl Transform {
    fn for_bounds(lo: f64, hi: f64) -> Transform {
        match (lo.is_finite(), hi.is_finite()) {
            (false, false) => Transform::Identity,
            (true, false) => Transform::LogLower(lo),
            (false, true) => Transform::LogUpper(hi),
            (true, true) => Transform::Logistic(lo, hi),
        }
    }

    fn to_internal(self, p: f64) -> f64 {
        match self {
            Transform::Identity => p,
            Transform::LogLower(lo) => {
                let d = p - lo;
                if d > 0.0 { d.ln() } else { -CLAMP }
            }
            Transform::LogUpper(hi) => {
                let d = hi - p;
                if d > 0.0 { d.ln() } else { -CLAMP }
            }
            Transform::Logistic(lo, hi) => {
                let t = (p - lo) / (hi - lo);
                if !(t > 0.0) {
                    -CLAMP
                } else if !(t < 1.0) {
                    CLAMP
                } else {
                    (t / (1.0 - t)).ln()
                }
            }
        }
    }

    fn to_physical(self, x: f64) -> f64 {
        match self {
            Transform::Identity => x,
            Transform::LogLower(lo) => lo + x.exp(),
            Transform::LogUpper(hi) => hi - x.exp(),
            Transform::Logistic(lo, hi) => lo + (hi - lo) / (1.0 + (-x).exp()),
        }
    }
}

// Relative finite-difference step for the numeric Jacobian
const DIFF_STEP: f64 = 1e-8;

fn diff_step(x: f64) -> f64 {
    if x != 0.0 { DIFF_STEP * x.abs() } else { DIFF_STEP }
}

struct TransformedProblem<'a> {
    residual_fn: &'a ResidualFn<'a>,
    transforms: &'a [Transform],
    x: DVector<f64>,
    residual_len: usize,
}

impl TransformedProblem<'_> {
    fn physical(&self, x: &DVector<f64>) -> Vec<f64> {
        x.iter().zip(self.transforms).map(|(&xi, t)| t.to_physical(xi)).collect()
    }

    fn eval(&self, x: &DVector<f64>) -> Option<DVector<f64>> {
        let r = (self.residual_fn)(&self.physical(x))?;
        if r.len() != self.residual_len || r.iter().any(|v| !v.is_finite()) {
            return None;
        }
        Some(DVector::from_vec(r))
    }
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for TransformedProblem<'_> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        self.x = x.clone();
    }

    fn params(&self) -> DVector<f64> {
        self.x.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        self.eval(&self.x)
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let base = self.eval(&self.x)?;
        let mut jac = DMatrix::zeros(self.residual_len, self.x.len());
        let mut x = self.x.clone();
        for j in 0..x.len() {
            let x0 = x[j];
            let step = diff_step(x0);
            x[j] = x0 + step;
            let perturbed = self.eval(&x)?;
            for i in 0..self.residual_len {
                jac[(i, j)] = (perturbed[i] - base[i]) / step;
            }
            x[j] = x0;
        }
        Some(jac)
    }
}

/// Levenberg-Marquardt least squares, the default solver.
///
/// Tolerances are loose and the iteration budget high: equivalent-circuit
/// fits are frequently near-degenerate and need the headroom.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeastSq {
    pub ftol: f64,
    pub xtol: f64,
    pub patience: usize,
}

impl Default for LeastSq {
    fn default() -> Self {
        Self { ftol: 1e-13, xtol: 1e-13, patience: 100_000 }
    }
}

impl Minimizer for LeastSq {
    fn minimize(
        &self,
        residual_fn: &ResidualFn<'_>,
        initial_guess: &[f64],
        bounds: Option<&[(f64, f64)]>,
    ) -> Result<FitOutcome, Error> {
        let transforms: Vec<Transform> = match bounds {
            Some(b) => b.iter().map(|&(lo, hi)| Transform::for_bounds(lo, hi)).collect(),
            None => vec![Transform::Identity; initial_guess.len()],
        };

        let first = residual_fn(initial_guess)
            .filter(|r| r.iter().all(|v| v.is_finite()))
            .ok_or_else(|| Error::FitNumerical("residuals are not finite at the initial guess".into()))?;

        let x0 = DVector::from_iterator(
            initial_guess.len(),
            initial_guess.iter().zip(&transforms).map(|(&g, t)| t.to_internal(g)),
        );
        let problem = TransformedProblem {
            residual_fn,
            transforms: &transforms,
            x: x0,
            residual_len: first.len(),
        };

        let (problem, report) = LevenbergMarquardt::new()
            .with_ftol(self.ftol)
            .with_xtol(self.xtol)
            .with_patience(self.patience)
            .minimize(problem);

        if !report.termination.was_successful() {
            return Err(if matches!(report.termination, TerminationReason::LostPatience) {
                Error::FitDidNotConverge(format!(
                    "iteration budget exhausted after {} evaluations",
                    report.number_of_evaluations
                ))
            } else {
                Error::FitNumerical(format!("{:?}", report.termination))
            });
        }

        let parameters = problem.physical(&problem.x);
        let final_residuals = residual_fn(&parameters)
            .ok_or_else(|| Error::FitNumerical("residuals are not finite at the optimum".into()))?;
        let mean_square =
            final_residuals.iter().map(|r| r * r).sum::<f64>() / final_residuals.len() as f64;
        let covariance = covariance_estimate(residual_fn, &parameters, final_residuals.len());

        Ok(FitOutcome {
            parameters,
            diagnostics: FitDiagnostics {
                residuals: final_residuals,
                mean_square,
                covariance,
                evaluations: report.number_of_evaluations,
            },
        })
    }
}

// (J^T J)^-1 with J taken in physical parameter space at the optimum,
// pseudo-inverted so rank-deficient fits still report the estimate.
fn covariance_estimate(
    residual_fn: &ResidualFn<'_>,
    parameters: &[f64],
    residual_len: usize,
) -> Option<DMatrix<f64>> {
    let base = DVector::from_vec(residual_fn(parameters)?);
    let mut jac = DMatrix::zeros(residual_len, parameters.len());
    let mut params = parameters.to_vec();
    for j in 0..params.len() {
        let p0 = params[j];
        let step = diff_step(p0);
        params[j] = p0 + step;
        let perturbed = DVector::from_vec(residual_fn(&params)?);
        for i in 0..residual_len {
            jac[(i, j)] = (perturbed[i] - base[i]) / step;
        }
        params[j] = p0;
    }
    let jtj = jac.transpose() * &jac;
    jtj.pseudo_inverse(1e-12).ok()
}

// ---------- Unit tests ----------
