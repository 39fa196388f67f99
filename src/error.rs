use thiserror::Error;

/// Main application error type that encompasses all possible failure modes
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP status error: {status} for {url} - {message}")]
    HttpStatus {
        url: String,
        status: u16,
        message: String,
    },

    #[error("Request timeout: {url} after {timeout_seconds} seconds")]
    Timeout { url: String, timeout_seconds: u64 },

    #[error("Invalid location: {location} - {reason}")]
    InvalidLocation { location: String, reason: String },

    #[error("Could not parse {location}: {details}")]
    Parse { location: String, details: String },

    #[error("Rule configuration error: {0}")]
    Configuration(#[from] RuleConfigError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("LibXML2 internal error: {details}")]
    LibXml2Internal { details: String },

    #[error("Concurrent operation error: {details}")]
    Concurrency { details: String },
}

/// Errors raised while turning stored rule records into evaluators, or while
/// loading a rule catalog whose references do not hold together.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuleConfigError {
    #[error("{rule}: {kind} rules must have {expected} XPath(s), found {found}")]
    XPathCount {
        rule: String,
        kind: String,
        expected: String,
        found: usize,
    },

    #[error("{rule}: {kind} rules require {field}")]
    MissingField {
        rule: String,
        kind: String,
        field: String,
    },

    #[error("{rule}: {kind} rules do not use {field}")]
    UnexpectedField {
        rule: String,
        kind: String,
        field: String,
    },

    #[error("{rule}: invalid regular expression - {details}")]
    InvalidRegex { rule: String, details: String },

    #[error("Unknown rule: {0}")]
    UnknownRule(String),

    #[error("Unknown valid values set: {0}")]
    UnknownValuesSet(String),

    #[error("Unknown rule set: {0}")]
    UnknownRuleSet(String),

    #[error("Duplicate {kind} id: {id}")]
    DuplicateId { kind: String, id: String },

    #[error("Conditional rules form a cycle: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },
}

/// Persistence-specific error types
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Unknown job id: {0}")]
    UnknownJob(u64),

    #[error("Unknown report id: {0}")]
    UnknownReport(u64),

    #[error("Store file could not be read or written: {path} - {details}")]
    File { path: String, details: String },

    #[error("Store file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// LibXML2-specific error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LibXml2Error {
    #[error("Document is not well-formed: {details}")]
    DocumentParseFailed { details: String },

    #[error("Document is too large to parse ({size} bytes)")]
    DocumentTooLarge { size: usize },

    #[error("XPath context creation failed")]
    XPathContextCreationFailed,

    #[error("invalid XPath {expression}")]
    InvalidXPath { expression: String },

    #[error("Memory allocation failed in libxml2")]
    MemoryAllocation,
}

impl From<LibXml2Error> for ValidationError {
    fn from(err: LibXml2Error) -> Self {
        ValidationError::LibXml2Internal {
            details: err.to_string(),
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, ValidationError>;

/// Rule configuration result type alias
pub type RuleConfigResult<T> = std::result::Result<T, RuleConfigError>;

/// Store result type alias
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// LibXML2 result type alias
pub type LibXml2Result<T> = std::result::Result<T, LibXml2Error>;
