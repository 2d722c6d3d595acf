//! Error types for merging credentials and running a step.

use std::io;
use thiserror::Error;

/// Why a single credential binding could not be merged.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MergeErrorKind {
    #[error("missing required field '{0}'")]
    MissingCredentialField(&'static str),

    #[error("unsupported credential kind '{0}'")]
    UnsupportedCredentialKind(String),

    #[error("malformed kubeconfig: {0}")]
    MalformedEmbeddedConfig(String),

    #[error("{section} '{name}' is already defined by credential '{owner}'")]
    NameCollisionUnresolved {
        section: &'static str,
        name: String,
        owner: String,
    },

    #[error("invalid server url '{url}': {message}")]
    InvalidServerUrl { url: String, message: String },

    #[error("invalid certificate in '{field}': {message}")]
    InvalidCertificate { field: &'static str, message: String },
}

/// A merge either succeeds as a whole or fails with one of these.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MergeError {
    #[error("no credentials were bound")]
    NoBindings,

    #[error("credential '{credential_id}': {reason}")]
    Binding {
        credential_id: String,
        reason: MergeErrorKind,
    },

    #[error("current context '{0}' is not defined by any bound credential")]
    UnknownCurrentContext(String),

    #[error("merged kubeconfig is inconsistent: {0}")]
    Inconsistent(String),
}

impl MergeError {
    pub fn binding(credential_id: &str, reason: MergeErrorKind) -> Self {
        MergeError::Binding {
            credential_id: credential_id.to_string(),
            reason,
        }
    }

    /// The credential the failure is attributed to, if any.
    pub fn credential_id(&self) -> Option<&str> {
        match self {
            MergeError::Binding { credential_id, .. } => Some(credential_id),
            _ => None,
        }
    }
}

/// Errors raised around the merge: loading definitions, resolving
/// credentials, writing the file and running the child command.
#[derive(Error, Debug)]
pub enum StepError {
    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error("credential '{0}' not found in the credential store")]
    CredentialNotFound(String),

    #[error("invalid step definition: {0}")]
    InvalidStep(String),

    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: String, message: String },

    #[error("failed to serialize kubeconfig: {0}")]
    Serialize(#[from] serde_yaml::Error),

    #[error("failed to launch '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("step was cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] io::Error),
}
