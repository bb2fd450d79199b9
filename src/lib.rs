//! Equivalent-circuit model fitting for electrochemical impedance
//! spectroscopy.
//!
//! A circuit topology is written in a small description language —
//! `R_0-p(R_1,C_1)-W_1/W_2` is a series resistor, a parallel
//! resistor/capacitor pair and a two-parameter Warburg — parsed once into a
//! [`Circuit`] tree and evaluated as a complex impedance function of
//! frequency. [`CircuitModel`] binds a topology to a nonlinear least-squares
//! fit and predicts impedance at new frequencies from the fitted component
//! values; [`TopologySearch`] explores random topologies when the circuit
//! itself is unknown.
//!
//! ```
//! use eisfit::{fitting::geomspace, CircuitModel};
//!
//! let freqs: Vec<f64> = geomspace(1.0, 1e5, 40).collect();
//! let mut model = CircuitModel::randles(Some(vec![10.0, 50.0, 1e-5, 30.0, 1.0]), false)?;
//! // with a measured spectrum: model.fit(&freqs, &measured)?.predict(&freqs)?
//! # Ok::<(), eisfit::Error>(())
//! ```

pub mod circuit;
pub mod error;
pub mod fitting;
pub mod model;
pub mod search;

pub use circuit::{evaluate, parameter_count, Circuit, Cplx, Element};
pub use error::Error;
pub use fitting::{circuit_fit, residuals, FitDiagnostics, FitOutcome, LeastSq, Minimizer};
pub use model::{Algorithm, CircuitModel};
pub use search::{best, CircuitGenerator, RandomPopulation, ScoredCandidate, TopologySearch};
