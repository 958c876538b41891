use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TankError {
    /// Serial link cannot be opened, read or written. Fatal for the run.
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),
    /// The optimizer did not reach a feasible solution this cycle. Recoverable.
    #[error("solver failed to converge: {0}")]
    SolverNonConvergence(String),
    #[error("configuration error: {0}")]
    Config(String),
    /// The plant predictor could not advance the model state.
    #[error("prediction failed: {0}")]
    Prediction(String),
    #[error("invalid state: {0}")]
    State(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("run aborted: {0}")]
    Aborted(String),
}

impl TankError {
    /// Whether the loop may continue after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TankError::SolverNonConvergence(_))
    }
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing device")]
    MissingDevice,
    #[error("missing controller")]
    MissingController,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
