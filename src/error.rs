use thiserror::Error;

#[derive(Error, Debug)]
pub enum HaystackError {
    #[error("Parse error: {message}")]
    Parse { message: String, line: Option<usize>, col: Option<usize> },
    #[error("Project Haystack version {version} does not support {feature}")]
    FeatureGate { feature: String, version: String },
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("Filter syntax error: {message}")]
    FilterSyntax { message: String, col: Option<usize> },
    #[error("Invalid value: {0}")]
    InvalidValue(String),
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),
    #[error("Key not found: {0}")]
    KeyNotFound(String),
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Internal invariant violated: {0}")]
    Invariant(String),
    #[error("Lock poisoned: {0}")]
    Lock(String),
}

pub type Result<T> = std::result::Result<T, HaystackError>;

impl HaystackError {
    pub fn parse(message: impl Into<String>, line: usize, col: usize) -> Self {
        Self::Parse { message: message.into(), line: Some(line), col: Some(col) }
    }
    pub fn feature_gate(feature: &str, version: impl ToString) -> Self {
        Self::FeatureGate { feature: feature.to_string(), version: version.to_string() }
    }
}

// Helper conversions
impl From<serde_json::Error> for HaystackError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse { message: e.to_string(), line: Some(e.line()), col: Some(e.column()) }
    }
}
impl From<::csv::Error> for HaystackError {
    fn from(e: ::csv::Error) -> Self {
        let line = e.position().map(|p| p.line() as usize);
        Self::Parse { message: e.to_string(), line, col: None }
    }
}
impl From<config::ConfigError> for HaystackError {
    fn from(e: config::ConfigError) -> Self { Self::Config(e.to_string()) }
}
impl From<std::string::FromUtf8Error> for HaystackError {
    fn from(e: std::string::FromUtf8Error) -> Self { Self::InvalidValue(e.to_string()) }
}
impl<T> From<std::sync::PoisonError<T>> for HaystackError {
    fn from(e: std::sync::PoisonError<T>) -> Self { Self::Lock(e.to_string()) }
}
