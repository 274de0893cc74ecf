//! Error types for engine operations.
//!
//! Structured error handling instead of panics. Anything recoverable
//! without losing user-visible correctness is recovered inside the
//! component that hit it; only validation, invariant, and shutdown
//! errors surface to callers.

use std::error::Error;
use std::fmt;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur during engine operations.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Malformed input; rejected before any state mutation.
    Validation(ValidationError),
    /// Visit refused at the queue boundary.
    Admission(AdmissionError),
    /// External keyword extraction failed or timed out.
    Extraction(ExtractionError),
    /// Snapshot read/write problems.
    Snapshot(SnapshotError),
    /// A graph invariant was detected violated; the in-flight visit is aborted.
    Invariant(InvariantError),
    /// Configuration errors.
    Config(ConfigError),
    /// The engine is shutting down and no longer accepts visits.
    ShutdownInProgress,
    /// I/O errors (wrapped).
    Io(String),
    /// Serialization errors.
    Serialization(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Validation(e) => write!(f, "Validation error: {}", e),
            EngineError::Admission(e) => write!(f, "Admission error: {}", e),
            EngineError::Extraction(e) => write!(f, "Extraction error: {}", e),
            EngineError::Snapshot(e) => write!(f, "Snapshot error: {}", e),
            EngineError::Invariant(e) => write!(f, "Invariant violation: {}", e),
            EngineError::Config(e) => write!(f, "Config error: {}", e),
            EngineError::ShutdownInProgress => write!(f, "Engine shutdown in progress"),
            EngineError::Io(msg) => write!(f, "I/O error: {}", msg),
            EngineError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
        }
    }
}

impl Error for EngineError {}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Serialization(e.to_string())
    }
}

/// Malformed visit input.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// URL is empty or whitespace.
    EmptyUrl,
    /// Timestamp is NaN or infinite.
    NonFiniteTimestamp(f64),
    /// A keyword normalized to the empty string.
    EmptyKeyword,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::EmptyUrl => write!(f, "URL is empty"),
            ValidationError::NonFiniteTimestamp(t) => write!(f, "Timestamp is not finite: {}", t),
            ValidationError::EmptyKeyword => write!(f, "Keyword is empty after normalization"),
        }
    }
}

/// Visit refused at the queue boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum AdmissionError {
    /// The same URL was accepted too recently.
    Debounced(String),
    /// Browser-internal scheme; never enters the pipeline.
    InternalScheme(String),
}

impl fmt::Display for AdmissionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionError::Debounced(url) => write!(f, "Visit debounced: {}", url),
            AdmissionError::InternalScheme(url) => write!(f, "Internal URL rejected: {}", url),
        }
    }
}

/// External keyword extraction problems. Recovered locally by falling
/// back to the heuristic extractor; logged, not surfaced.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionError {
    /// The external extractor returned an error.
    Unavailable(String),
    /// The external extractor exceeded its soft timeout.
    Timeout,
}

impl fmt::Display for ExtractionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractionError::Unavailable(msg) => write!(f, "Extractor unavailable: {}", msg),
            ExtractionError::Timeout => write!(f, "Extractor timed out"),
        }
    }
}

/// Snapshot persistence problems.
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotError {
    /// Payload did not decode.
    Corrupt(String),
    /// Version tag is newer than this build understands.
    UnsupportedVersion(u8),
    /// Write failed; retried at next shutdown.
    WriteFailed(String),
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotError::Corrupt(msg) => write!(f, "Snapshot corrupt: {}", msg),
            SnapshotError::UnsupportedVersion(v) => {
                write!(f, "Unsupported snapshot version: {}", v)
            }
            SnapshotError::WriteFailed(msg) => write!(f, "Snapshot write failed: {}", msg),
        }
    }
}

/// A structural invariant of the graph was violated.
#[derive(Debug, Clone, PartialEq)]
pub enum InvariantError {
    /// An edge's decayed weight exceeds its base weight.
    WeightExceedsBase { from: String, to: String },
    /// An edge references a node that is not in the node set.
    MissingEndpoint(String),
    /// Two page nodes are directly connected.
    PagePageEdge { from: String, to: String },
    /// An edge connects a node to itself.
    SelfLoop(String),
    /// The node cap was exceeded after pruning.
    NodeCapExceeded { count: usize, max: usize },
    /// A keyword holds more than the allowed page references.
    PageRefsOverflow(String),
    /// A node or edge's timestamps are out of order.
    TimeOrder(String),
}

impl fmt::Display for InvariantError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvariantError::WeightExceedsBase { from, to } => {
                write!(f, "weight > base_weight on edge {} -- {}", from, to)
            }
            InvariantError::MissingEndpoint(id) => {
                write!(f, "edge endpoint missing from node set: {}", id)
            }
            InvariantError::PagePageEdge { from, to } => {
                write!(f, "page-page edge {} -- {}", from, to)
            }
            InvariantError::SelfLoop(id) => write!(f, "self-loop on {}", id),
            InvariantError::NodeCapExceeded { count, max } => {
                write!(f, "node count {} exceeds cap {}", count, max)
            }
            InvariantError::PageRefsOverflow(id) => {
                write!(f, "page_refs overflow on {}", id)
            }
            InvariantError::TimeOrder(id) => write!(f, "timestamps out of order on {}", id),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Invalid value.
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
    /// Out of range.
    OutOfRange {
        field: String,
        min: f64,
        max: f64,
        value: f64,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidValue {
                field,
                value,
                reason,
            } => {
                write!(f, "Invalid value for {}: {} ({})", field, value, reason)
            }
            ConfigError::OutOfRange {
                field,
                min,
                max,
                value,
            } => {
                write!(
                    f,
                    "{} out of range: {} (must be {}-{})",
                    field, value, min, max
                )
            }
        }
    }
}

// Convenience constructors
impl EngineError {
    pub fn empty_url() -> Self {
        EngineError::Validation(ValidationError::EmptyUrl)
    }

    pub fn bad_timestamp(t: f64) -> Self {
        EngineError::Validation(ValidationError::NonFiniteTimestamp(t))
    }

    pub fn debounced(url: impl Into<String>) -> Self {
        EngineError::Admission(AdmissionError::Debounced(url.into()))
    }

    pub fn internal_scheme(url: impl Into<String>) -> Self {
        EngineError::Admission(AdmissionError::InternalScheme(url.into()))
    }

    pub fn snapshot_corrupt(msg: impl Into<String>) -> Self {
        EngineError::Snapshot(SnapshotError::Corrupt(msg.into()))
    }

    pub fn config_out_of_range(field: impl Into<String>, min: f64, max: f64, value: f64) -> Self {
        EngineError::Config(ConfigError::OutOfRange {
            field: field.into(),
            min,
            max,
            value,
        })
    }
}
