//! Error types for the configuration build pipeline

use thiserror::Error;

use crate::event::BuildEvent;
use crate::resource::{BuildState, DefinitionResource};

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Boxed cause carried by open and listener failures
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Configuration pipeline errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Failed to open source {source_label}: {cause}")]
    ResourceOpenFailure {
        source_label: String,
        #[source]
        cause: BoxError,
    },

    #[error("Unknown namespace '{namespace}' on element <{element}> in {source_label}")]
    UnknownNamespace {
        source_label: String,
        namespace: String,
        element: String,
    },

    #[error("Malformed source {source_label}: {message}")]
    MalformedSource { source_label: String, message: String },

    #[error("Invalid namespace descriptor {source_label}: {message}")]
    InvalidDescriptor { source_label: String, message: String },

    #[error("Invalid definition in {source_label}: {message}")]
    InvalidDefinition { source_label: String, message: String },

    #[error("Listener failed during {event}: {cause}")]
    Listener {
        event: BuildEvent,
        #[source]
        cause: BoxError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    pub(crate) fn open_failure(source_label: impl Into<String>, cause: impl Into<BoxError>) -> Self {
        Self::ResourceOpenFailure {
            source_label: source_label.into(),
            cause: cause.into(),
        }
    }

    pub(crate) fn malformed(source_label: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedSource {
            source_label: source_label.into(),
            message: message.into(),
        }
    }

    pub(crate) fn invalid_definition(source_label: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidDefinition {
            source_label: source_label.into(),
            message: message.into(),
        }
    }

    /// Label of the source that caused this error, if the error is tied to one
    pub fn source_label(&self) -> Option<&str> {
        match self {
            Self::ResourceOpenFailure { source_label, .. }
            | Self::UnknownNamespace { source_label, .. }
            | Self::MalformedSource { source_label, .. }
            | Self::InvalidDescriptor { source_label, .. }
            | Self::InvalidDefinition { source_label, .. } => Some(source_label),
            Self::InvalidArgument(_) | Self::Listener { .. } | Self::Io(_) => None,
        }
    }
}

/// A build that halted before reaching [`BuildState::Built`].
///
/// The partially populated resource is kept so callers can inspect what was
/// merged before the failure. It should be discarded rather than resumed.
#[derive(Error, Debug)]
#[error("build halted in {state} state: {error}")]
pub struct BuildFailure {
    state: BuildState,
    #[source]
    error: ConfigError,
    resource: Box<DefinitionResource>,
}

impl BuildFailure {
    pub(crate) fn new(error: ConfigError, resource: DefinitionResource) -> Self {
        Self {
            state: resource.state(),
            error,
            resource: Box::new(resource),
        }
    }

    /// State the build was in when it halted
    pub fn state(&self) -> BuildState {
        self.state
    }

    /// The underlying error
    pub fn error(&self) -> &ConfigError {
        &self.error
    }

    /// The resource as it was when the build halted
    pub fn partial(&self) -> &DefinitionResource {
        &self.resource
    }

    pub fn into_error(self) -> ConfigError {
        self.error
    }

    pub fn into_partial(self) -> DefinitionResource {
        *self.resource
    }
}
