use std::fmt;

use float_pretty_print::PrettyPrintFloat;

use crate::circuit::{Circuit, Cplx};
use crate::error::Error;
use crate::fitting::{self, FitDiagnostics, LeastSq, Minimizer};

/// The minimizer a [`CircuitModel`] fits with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Algorithm {
    /// Levenberg-Marquardt least squares
    #[default]
    LeastSq,
}

impl Algorithm {
    fn solver(self) -> LeastSq {
        match self {
            Algorithm::LeastSq => LeastSq::default(),
        }
    }
}

const RANDLES: &str = "R_0-p(R_1,C_1)-W_1/W_2";
const RANDLES_CPE: &str = "R_0-p(R_1,E_1/E_2)-W_1/W_2";

/// An equivalent-circuit model bound to the fitting pipeline.
///
/// Construct it with a description and an initial guess, `fit` it against a
/// measured spectrum, then `predict` impedance at new frequencies. Fitted
/// parameters stay `None` until the first successful fit; re-fitting
/// overwrites them.
#[derive(Debug, Clone)]
pub struct CircuitModel {
    name: &'static str,
    description: String,
    circuit: Circuit,
    initial_guess: Option<Vec<f64>>,
    bounds: Option<Vec<(f64, f64)>>,
    algorithm: Algorithm,
    parameters: Option<Vec<f64>>,
    diagnostics: Option<FitDiagnostics>,
}

impl CircuitModel {
    /// A model over a user-defined topology.
    pub fn new(description: &str, initial_guess: Option<Vec<f64>>) -> Result<Self, Error> {
        Self::build("Custom", description, initial_guess)
    }

    /// The Randles cell, optionally with a constant-phase element in place
    /// of the double-layer capacitor.
    pub fn randles(initial_guess: Option<Vec<f64>>, cpe: bool) -> Result<Self, Error> {
        Self::build("Randles", if cpe { RANDLES_CPE } else { RANDLES }, initial_guess)
    }

    fn build(
        name: &'static str,
        description: &str,
        initial_guess: Option<Vec<f64>>,
    ) -> Result<Self, Error> {
        let circuit = Circuit::from_description(description)?;
        if let Some(guess) = &initial_guess {
            let expected = circuit.parameter_count();
            if guess.len() != expected {
                return Err(Error::GuessLengthMismatch { expected, actual: guess.len() });
            }
            if let Some(v) = guess.iter().find(|v| !v.is_finite()) {
                return Err(Error::InvalidData(format!(
                    "value {v} in the initial guess is not a finite number"
                )));
            }
        }
        Ok(Self {
            name,
            description: description.to_owned(),
            circuit,
            initial_guess,
            bounds: None,
            algorithm: Algorithm::default(),
            parameters: None,
            diagnostics: None,
        })
    }

    /// Per-parameter `(lower, upper)` fitting bounds, one pair per circuit
    /// parameter.
    pub fn with_bounds(mut self, bounds: Vec<(f64, f64)>) -> Result<Self, Error> {
        let expected = self.circuit.parameter_count();
        if bounds.len() != expected {
            return Err(Error::InvalidData(format!(
                "{} bound pairs for {expected} parameters",
                bounds.len()
            )));
        }
        if let Some((lo, hi)) = bounds.iter().find(|(lo, hi)| !(lo <= hi)) {
            return Err(Error::InvalidData(format!("lower bound {lo} exceeds upper bound {hi}")));
        }
        self.bounds = Some(bounds);
        Ok(self)
    }

    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn circuit(&self) -> &Circuit {
        &self.circuit
    }

    /// Fitted parameter vector; `None` until a successful [`fit`](Self::fit).
    pub fn parameters(&self) -> Option<&[f64]> {
        self.parameters.as_deref()
    }

    /// Diagnostics of the last successful fit.
    pub fn diagnostics(&self) -> Option<&FitDiagnostics> {
        self.diagnostics.as_ref()
    }

    /// Fit the model to a measured spectrum. Returns the model itself so a
    /// fit can be chained straight into `predict`.
    pub fn fit(&mut self, frequencies: &[f64], impedance: &[Cplx]) -> Result<&mut Self, Error> {
        let solver = self.algorithm.solver();
        self.run_fit(frequencies, impedance, &solver)
    }

    /// Fit with a caller-supplied solver instead of the configured
    /// [`Algorithm`].
    pub fn fit_with(
        &mut self,
        frequencies: &[f64],
        impedance: &[Cplx],
        solver: &dyn Minimizer,
    ) -> Result<&mut Self, Error> {
        self.run_fit(frequencies, impedance, solver)
    }

    fn run_fit(
        &mut self,
        frequencies: &[f64],
        impedance: &[Cplx],
        solver: &dyn Minimizer,
    ) -> Result<&mut Self, Error> {
        // auto-guessing is unimplemented: a guess must be configured up front
        let guess = self.initial_guess.as_deref().ok_or(Error::NoInitialGuess)?;
        let outcome = fitting::circuit_fit(
            frequencies,
            impedance,
            &self.circuit,
            guess,
            solver,
            self.bounds.as_deref(),
        )?;
        self.parameters = Some(outcome.parameters);
        self.diagnostics = Some(outcome.diagnostics);
        Ok(self)
    }

    /// Predict impedance at the given frequencies from the fitted
    /// parameters.
    pub fn predict(&self, frequencies: &[f64]) -> Result<Vec<Cplx>, Error> {
        let params = self.parameters.as_deref().ok_or(Error::ModelNotFitted)?;
        fitting::check_frequencies(frequencies)?;
        self.circuit.simulate(params, frequencies)
    }
}

impl fmt::Display for CircuitModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} circuit (", self.name)?;
        let letters = self.circuit.paramlist();
        match (&self.parameters, &self.initial_guess) {
            (Some(vals), _) => {
                write!(f, "fit values=[")?;
                write_values(f, &letters, vals)?;
                write!(f, "], ")?;
            }
            (None, Some(guess)) => {
                write!(f, "initial guess=[")?;
                write_values(f, &letters, guess)?;
                write!(f, "], ")?;
            }
            (None, None) => write!(f, "no initial guess, ")?,
        }
        write!(f, "circuit={})", self.description)
    }
}

fn write_values(
    f: &mut fmt::Formatter<'_>,
    letters: &[crate::circuit::ParameterBase],
    vals: &[f64],
) -> fmt::Result {
    for (i, (p, v)) in letters.iter().zip(vals).enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}={}", p.letter, PrettyPrintFloat(*v))?;
    }
    Ok(())
}

// ---------- Unit tests ----------

#[cfg(test)]
mod test {
    use super::*;
    use crate::fitting::test_util::EchoSolver;

    #[test]
    fn test_predict_before_fit() {
        let model = CircuitModel::randles(Some(vec![1.0, 1.0, 1.0, 1.0, 1.0]), false).unwrap();
        assert!(matches!(model.predict(&[1.0, 10.0]), Err(Error::ModelNotFitted)));
    }

    #[test]
    fn test_randles_guess_length() {
        // capacitor variant takes 5 parameters, the CPE variant 6
        assert!(CircuitModel::randles(Some(vec![1.0; 5]), false).is_ok());
        assert!(CircuitModel::randles(Some(vec![1.0; 6]), true).is_ok());

        for wrong in [0usize, 3, 4, 6, 10] {
            let err = CircuitModel::randles(Some(vec![1.0; wrong]), false);
            assert!(
                matches!(err, Err(Error::GuessLengthMismatch { expected: 5, actual }) if actual == wrong)
            );
        }
        for wrong in [0usize, 3, 5, 7] {
            let err = CircuitModel::randles(Some(vec![1.0; wrong]), true);
            assert!(
                matches!(err, Err(Error::GuessLengthMismatch { expected: 6, actual }) if actual == wrong)
            );
        }
    }

    #[test]
    fn test_custom_guess_length() {
        assert!(CircuitModel::new("p(R_0,C_0)", Some(vec![1.0, 1.0])).is_ok());
        let err = CircuitModel::new("p(R_0,C_0)", Some(vec![1.0]));
        assert!(matches!(err, Err(Error::GuessLengthMismatch { expected: 2, actual: 1 })));
    }

    #[test]
    fn test_nonfinite_guess() {
        let err = CircuitModel::new("R_0", Some(vec![f64::NAN]));
        assert!(matches!(err, Err(Error::InvalidData(_))));
        let err = CircuitModel::new("R_0", Some(vec![f64::INFINITY]));
        assert!(matches!(err, Err(Error::InvalidData(_))));
    }

    #[test]
    fn test_malformed_description() {
        let err = CircuitModel::new("R_0-p(R_1", None);
        assert!(matches!(err, Err(Error::MalformedCircuit(_))));
    }

    #[test]
    fn test_fit_requires_guess() {
        let mut model = CircuitModel::new("R_0", None).unwrap();
        let err = model.fit(&[1.0], &[Cplx::new(1.0, 0.0)]);
        assert!(matches!(err, Err(Error::NoInitialGuess)));
    }

    #[test]
    fn test_bounds_validation() {
        let model = CircuitModel::new("p(R_0,C_0)", Some(vec![1.0, 1.0])).unwrap();
        assert!(matches!(
            model.clone().with_bounds(vec![(0.0, 1.0)]),
            Err(Error::InvalidData(_))
        ));
        assert!(matches!(
            model.clone().with_bounds(vec![(0.0, 1.0), (3.0, 2.0)]),
            Err(Error::InvalidData(_))
        ));
        assert!(model.with_bounds(vec![(0.0, 1.0), (0.0, 1.0)]).is_ok());
    }

    #[test]
    fn test_chained_fit_predict() {
        let circuit: Circuit = "p(R_0,C_0)".parse().unwrap();
        let guess = vec![40.0, 1e-3];
        let freqs = [0.5, 5.0, 50.0];
        let direct = circuit.simulate(&guess, &freqs).unwrap();

        // the echo solver keeps the guess, so predict must reproduce the
        // direct simulation at those parameters
        let mut model = CircuitModel::new("p(R_0,C_0)", Some(guess)).unwrap();
        let measured = vec![Cplx::new(1.0, -1.0); 3];
        let predicted = model
            .fit_with(&freqs, &measured, &EchoSolver)
            .unwrap()
            .predict(&freqs)
            .unwrap();
        assert_eq!(predicted, direct);
        assert_eq!(model.parameters(), Some(&[40.0, 1e-3][..]));
        assert!(model.diagnostics().is_some());
    }

    #[test]
    fn test_refit_overwrites() {
        let freqs = [1.0, 10.0];
        let measured = [Cplx::new(1.0, 0.0); 2];
        let mut model = CircuitModel::new("R_0", Some(vec![5.0])).unwrap();
        model.fit_with(&freqs, &measured, &EchoSolver).unwrap();
        assert_eq!(model.parameters(), Some(&[5.0][..]));
        model.fit_with(&freqs, &measured, &EchoSolver).unwrap();
        assert_eq!(model.parameters(), Some(&[5.0][..]));
    }

    #[test]
    fn test_display() {
        let model = CircuitModel::randles(Some(vec![10.0, 100.0, 1e-5, 50.0, 0.5]), false).unwrap();
        let shown = model.to_string();
        assert!(shown.starts_with("Randles circuit (initial guess=["));
        assert!(shown.contains("circuit=R_0-p(R_1,C_1)-W_1/W_2"));

        let unset = CircuitModel::new("R_0", None).unwrap();
        assert!(unset.to_string().contains("no initial guess"));
    }
}
