use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Value text is neither numeric nor a recognized placeholder form.
    #[error("cannot parse value '{0}'")]
    Value(String),
    /// Uncertainty text is not digits, an asymmetric pair, or a limit marker.
    #[error("cannot parse uncertainty '{unc}' for value '{value}'")]
    Uncertainty { value: String, unc: String },
    /// Spin-parity text outside the supported grammar.
    #[error("cannot parse spin-parity '{0}'")]
    SpinParity(String),
}
