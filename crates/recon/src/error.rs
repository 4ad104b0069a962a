use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconError {
    /// TOML parse / deserialization error.
    #[error("config parse error: {0}")]
    ConfigParse(String),
    /// Config validation error (non-positive tolerance, bad split limit, etc.).
    #[error("config validation error: {0}")]
    ConfigValidation(String),
    /// Observation input could not be decoded.
    #[error("input parse error: {0}")]
    InputParse(String),
    /// Two datasets share one identifier.
    #[error("duplicate dataset id: {0}")]
    DuplicateDataset(String),
    /// More than one dataset flagged as reference.
    #[error("more than one reference dataset: '{first}' and '{second}'")]
    MultipleReference { first: String, second: String },
    /// Internal consistency fault. Never a recoverable condition.
    #[error("internal invariant violated: {0}")]
    Invariant(String),
    /// IO error (file read, etc.).
    #[error("IO error: {0}")]
    Io(String),
}
