use thiserror::Error;

/// Engine-wide error taxonomy.
///
/// `InsufficientData` and `SchemaMismatch` are mostly soft paths (kernels
/// return NaN, predict zero-fills unknown columns); they surface as errors
/// only where a hard fault is warranted, e.g. an empty training set after
/// NaN filtering.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Model not fitted: call fit() first")]
    NotFitted,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Strategy fault: {0}")]
    StrategyFault(String),

    #[error("Learner fault: {0}")]
    LearnerFault(String),
}
