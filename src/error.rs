use thiserror::Error;

/// Everything that can go wrong between a description string and a fitted
/// model. Errors are surfaced immediately; nothing is retried or silently
/// approximated.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("malformed circuit description: {0}")]
    MalformedCircuit(String),

    #[error("circuit takes {expected} parameters, {actual} supplied")]
    ParameterArity { expected: usize, actual: usize },

    #[error("initial guess has {actual} values, the circuit takes {expected} parameters")]
    GuessLengthMismatch { expected: usize, actual: usize },

    #[error("no initial guess supplied")]
    NoInitialGuess,

    #[error("the model has not been fit yet")]
    ModelNotFitted,

    #[error("fit did not converge: {0}")]
    FitDidNotConverge(String),

    #[error("numerical failure during fit: {0}")]
    FitNumerical(String),

    #[error("invalid input data: {0}")]
    InvalidData(String),
}
