use thiserror::Error;

/// Errors raised by the inference engine.
///
/// Non-convergence of an individual fit is *not* an error: it is recorded in
/// `FitResult::converged`. `ConvergenceFailure` is only raised when the global
/// fit to the observed spectrum fails, because nothing downstream can be
/// trusted in that case.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InferenceError {
    /// Parameter values make a divisor zero or a bin mean non-positive.
    #[error("Domain error: {0}")]
    Domain(String),

    /// A pseudoexperiment produced a bin mean that cannot be Poisson-sampled.
    #[error("Sampling degeneracy: {0}")]
    SamplingDegeneracy(String),

    /// The observed-data global fit did not converge.
    #[error("Convergence failure: {0}")]
    ConvergenceFailure(String),

    /// Invalid configuration (bounds, priors, grids, toy counts).
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The minimizer itself failed (not a convergence verdict).
    #[error("Optimizer error: {0}")]
    Optimizer(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl InferenceError {
    /// Process exit code used when this error reaches `main`.
    pub fn exit_code(&self) -> u8 {
        match self {
            InferenceError::Config(_) | InferenceError::Io(_) => 2,
            InferenceError::Domain(_)
            | InferenceError::SamplingDegeneracy(_)
            | InferenceError::Optimizer(_) => 4,
            InferenceError::ConvergenceFailure(_) => 5,
        }
    }
}

pub type Result<T> = std::result::Result<T, InferenceError>;

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl From<InferenceError> for AppError {
    fn from(err: InferenceError) -> Self {
        AppError::new(err.exit_code(), err.to_string())
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}
