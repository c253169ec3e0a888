use metrics::counter;
use thiserror::Error;
use tracing::{error, warn};

// Constants for error handling configuration
const ERROR_CONTEXT_MAX_LENGTH: usize = 1024;

/// Categories of errors for classification and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Storage,
    Cache,
    Queue,
    Filter,
    Config,
    Validation,
    Notify,
    Serialization,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Storage => "storage",
            ErrorCategory::Cache => "cache",
            ErrorCategory::Queue => "queue",
            ErrorCategory::Filter => "filter",
            ErrorCategory::Config => "config",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Notify => "notify",
            ErrorCategory::Serialization => "serialization",
        }
    }
}

/// Primary error type for the Sentinel core.
///
/// The request path treats every variant as skip-and-continue: a failing
/// read is fail-open, a failing write is logged and abandoned. Nothing in
/// this enum ever surfaces to the caller as a request failure.
#[derive(Debug, Error)]
pub enum SentinelError {
    #[error("storage error: {context}")]
    Storage {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("cache error: {context}")]
    Cache {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("queue error: {context}")]
    Queue {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("filter at capacity: {context}")]
    FilterFull { context: String },

    #[error("filter snapshot incompatible or corrupt: {context}")]
    FilterCodec { context: String },

    #[error("configuration error: {context}")]
    Config { context: String },

    #[error("validation error: {context}")]
    Validation { context: String },

    #[error("notification delivery failed: {context}")]
    Notify {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("serialization error: {context}")]
    Serialization {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl SentinelError {
    /// Creates a storage error wrapping an underlying cause.
    pub fn storage<S: Into<String>>(
        context: S,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        SentinelError::Storage {
            context: truncate_context(context.into()),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a storage error with no underlying cause.
    pub fn storage_msg<S: Into<String>>(context: S) -> Self {
        SentinelError::Storage {
            context: truncate_context(context.into()),
            source: None,
        }
    }

    pub fn cache<S: Into<String>>(
        context: S,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        SentinelError::Cache {
            context: truncate_context(context.into()),
            source: Some(Box::new(source)),
        }
    }

    pub fn cache_msg<S: Into<String>>(context: S) -> Self {
        SentinelError::Cache {
            context: truncate_context(context.into()),
            source: None,
        }
    }

    pub fn queue<S: Into<String>>(
        context: S,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        SentinelError::Queue {
            context: truncate_context(context.into()),
            source: Some(Box::new(source)),
        }
    }

    pub fn queue_msg<S: Into<String>>(context: S) -> Self {
        SentinelError::Queue {
            context: truncate_context(context.into()),
            source: None,
        }
    }

    pub fn config<S: Into<String>>(context: S) -> Self {
        SentinelError::Config {
            context: truncate_context(context.into()),
        }
    }

    pub fn validation<S: Into<String>>(context: S) -> Self {
        SentinelError::Validation {
            context: truncate_context(context.into()),
        }
    }

    pub fn serialization<S: Into<String>>(
        context: S,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        SentinelError::Serialization {
            context: truncate_context(context.into()),
            source: Some(Box::new(source)),
        }
    }

    /// Returns the category used for metrics and log routing.
    pub fn category(&self) -> ErrorCategory {
        match self {
            SentinelError::Storage { .. } => ErrorCategory::Storage,
            SentinelError::Cache { .. } => ErrorCategory::Cache,
            SentinelError::Queue { .. } => ErrorCategory::Queue,
            SentinelError::FilterFull { .. } | SentinelError::FilterCodec { .. } => {
                ErrorCategory::Filter
            }
            SentinelError::Config { .. } => ErrorCategory::Config,
            SentinelError::Validation { .. } => ErrorCategory::Validation,
            SentinelError::Notify { .. } => ErrorCategory::Notify,
            SentinelError::Serialization { .. } => ErrorCategory::Serialization,
        }
    }

    /// True for transport-flavored failures that are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SentinelError::Storage { .. }
                | SentinelError::Cache { .. }
                | SentinelError::Queue { .. }
                | SentinelError::Notify { .. }
        )
    }
}

fn truncate_context(context: String) -> String {
    if context.len() > ERROR_CONTEXT_MAX_LENGTH {
        context.chars().take(ERROR_CONTEXT_MAX_LENGTH).collect()
    } else {
        context
    }
}

/// Type alias for Sentinel results
pub type Result<T> = std::result::Result<T, SentinelError>;

/// Logs an error with appropriate severity and records its metrics.
pub fn log_error(err: &SentinelError) {
    let category = err.category();
    counter!("sentinel.errors.total", 1, "category" => category.as_str());

    match category {
        ErrorCategory::Config | ErrorCategory::Validation => {
            error!(error = %err, category = category.as_str(), "sentinel error");
        }
        _ => {
            warn!(error = %err, category = category.as_str(), "sentinel error");
        }
    }
}
