use thiserror::Error;

/// A period identifier that cannot be split into year and term.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed period identifier {value:?}: {reason}")]
pub struct MalformedPeriodError {
    pub value: String,
    pub reason: String,
}

impl MalformedPeriodError {
    pub fn new(value: &str, reason: impl Into<String>) -> Self {
        Self {
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Invalid engine parameters. Bad data never produces this; it is reported
/// as anomalies instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("periods per year must be at least 1")]
    ZeroPeriodsPerYear,

    #[error("lookahead window must be at least 1 column")]
    ZeroLookaheadWindow,

    #[error("lookahead window of {window} columns exceeds the maximum of {max}")]
    LookaheadWindowTooLarge { window: usize, max: usize },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("configuration validation error: {0}")]
    Validation(String),
}
