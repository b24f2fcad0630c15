//! Typed error hierarchy for docforge.
//!
//! Four enums cover the four subsystems:
//! - `StoreError`: the file-backed project store
//! - `RegistryError`: project validation and mutation
//! - `BuildError`: spawning and draining the external build command
//! - `WebhookError`: provider detection, authentication and dispatch

use std::path::PathBuf;

use thiserror::Error;

/// Errors from the file-backed project store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to access store file at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Store file at {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Store file at {path} does not hold a JSON object")]
    NotAnObject { path: PathBuf },

    #[error("Failed to lock store file at {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to persist store file at {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize store contents: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("Store lock poisoned")]
    LockPoisoned,
}

/// Errors from the project registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("No such project {name}")]
    NotFound { name: String },

    #[error("This project {name} already exists")]
    AlreadyExists { name: String },

    #[error("Unallowed project name {name}")]
    Unallowed { name: String },

    #[error("Invalid project name {name}")]
    InvalidName { name: String },

    #[error("Invalid custom domain {domain}")]
    InvalidDomain { domain: String },

    #[error("Domain {domain} is already used by {owner}")]
    DomainConflict { domain: String, owner: String },

    #[error("Project {name} must have at least one language")]
    EmptyLanguages { name: String },

    #[error("Invalid transfer string: {reason}")]
    InvalidTransfer { reason: String },

    #[error("The project data of {name} is wrong: {source}")]
    InvalidRecord {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Registry task failed: {0}")]
    TaskFailed(String),
}

impl RegistryError {
    /// True for errors caused by the caller's input rather than the environment.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::AlreadyExists { .. }
                | Self::Unallowed { .. }
                | Self::InvalidName { .. }
                | Self::InvalidDomain { .. }
                | Self::DomainConflict { .. }
                | Self::EmptyLanguages { .. }
                | Self::InvalidTransfer { .. }
        )
    }
}

/// Errors raised while running the external build command.
///
/// These never reach the trigger of an asynchronous build: the executor turns
/// them into an output line and a `failing` result.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Failed to spawn build command {command}: {source}")]
    ExternalProcess {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Build command is empty")]
    EmptyCommand,

    #[error("Failed to read build output: {0}")]
    Io(#[source] std::io::Error),
}

/// Errors from the webhook dispatcher.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("unsupported provider")]
    UnsupportedProvider,

    #[error("unsupported webhook event {event}")]
    UnsupportedEvent { event: String },

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("not found project {name}")]
    NotFound { name: String },

    #[error("empty signature")]
    SignatureMissing,

    #[error("verify signature failed")]
    SignatureInvalid,

    #[error("verify token failed")]
    TokenInvalid,

    #[error("excluded branch {branch}")]
    ExcludedBranch { branch: String },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl WebhookError {
    /// Stable body code for the JSON response; the HTTP status is not used
    /// to signal business outcome.
    pub fn code(&self) -> i32 {
        match self {
            Self::UnsupportedProvider => 10,
            Self::UnsupportedEvent { .. } => 11,
            Self::InvalidPayload(_) => 12,
            Self::NotFound { .. } => 404,
            Self::SignatureMissing => 20,
            Self::SignatureInvalid => 21,
            Self::TokenInvalid => 22,
            Self::ExcludedBranch { .. } => 30,
            Self::Registry(_) => 500,
        }
    }
}
