use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// How loudly an error should be reported by whoever finally handles it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Log,
    Normal,
    Critical,
}

/// Structured context attached to an error: ids, field names, offending values.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ErrorContext(BTreeMap<String, serde_json::Value>);

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(&self.0) {
            Ok(s) => f.write_str(&s),
            Err(_) => f.write_str("{}"),
        }
    }
}

/// Top-level error type for the Trellis graph store.
#[derive(Error, Debug)]
pub enum TrellisError {
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        context: ErrorContext,
    },

    #[error("Schema mismatch: {message}")]
    SchemaMismatch {
        message: String,
        context: ErrorContext,
    },

    #[error("Not permitted: {message}")]
    PermissionDenied {
        message: String,
        context: ErrorContext,
    },

    #[error("Conflict: {message}")]
    Conflict {
        message: String,
        context: ErrorContext,
    },

    #[error("Storage error: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    #[error("Invariant violated: {message}")]
    Invariant {
        message: String,
        context: ErrorContext,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TrellisError>;

impl TrellisError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn schema_mismatch(message: impl Into<String>, context: ErrorContext) -> Self {
        Self::SchemaMismatch {
            message: message.into(),
            context,
        }
    }

    pub fn denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied {
            message: message.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn conflict(message: impl Into<String>, context: ErrorContext) -> Self {
        Self::Conflict {
            message: message.into(),
            context,
        }
    }

    pub fn storage(message: impl Into<String>, source: Option<anyhow::Error>) -> Self {
        Self::Storage {
            message: message.into(),
            source,
        }
    }

    pub fn invariant(message: impl Into<String>, context: ErrorContext) -> Self {
        Self::Invariant {
            message: message.into(),
            context,
        }
    }

    /// Attach context to a variant that carries it. Other variants are returned unchanged.
    pub fn with_context(mut self, extra: ErrorContext) -> Self {
        if let Some(ctx) = self.context_mut() {
            for (k, v) in extra.0 {
                ctx.0.insert(k, v);
            }
        }
        self
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::Validation { .. } | Self::PermissionDenied { .. } | Self::Conflict { .. } => {
                Severity::Normal
            }
            Self::SchemaMismatch { .. }
            | Self::Storage { .. }
            | Self::Invariant { .. }
            | Self::Config(_)
            | Self::Serialization(_) => Severity::Critical,
        }
    }

    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Self::Validation { context, .. }
            | Self::SchemaMismatch { context, .. }
            | Self::PermissionDenied { context, .. }
            | Self::Conflict { context, .. }
            | Self::Invariant { context, .. } => Some(context),
            _ => None,
        }
    }

    fn context_mut(&mut self) -> Option<&mut ErrorContext> {
        match self {
            Self::Validation { context, .. }
            | Self::SchemaMismatch { context, .. }
            | Self::PermissionDenied { context, .. }
            | Self::Conflict { context, .. }
            | Self::Invariant { context, .. } => Some(context),
            _ => None,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied { .. })
    }
}

impl From<config::ConfigError> for TrellisError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
