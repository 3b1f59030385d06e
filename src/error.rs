use thiserror::Error;

use crate::{
    codec::CodecError,
    engine::{EngineError, ErrorCode},
    evaluator::EvalError,
    settings::ConfigError,
};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("[config]: {cause}")]
    Config { cause: ConfigError },

    #[error("[connectivity]: unable to establish a connection to the database server: {cause}")]
    Connectivity { cause: EngineError },

    #[error("[schema]: {reason}")]
    SchemaPrecondition { reason: String },

    #[error("[migration][{action}]: {cause}")]
    Migration {
        action: &'static str,
        cause: EngineError,
    },

    #[error("[engine]: {cause}")]
    Engine { cause: EngineError },

    #[error("[codec]: {cause}")]
    Codec { cause: CodecError },

    #[error("[evaluator]: {cause}")]
    Evaluation { cause: EvalError },
}

impl StorageError {
    /// Engine reason code, when the failure came from the engine.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            StorageError::Connectivity { cause }
            | StorageError::Migration { cause, .. }
            | StorageError::Engine { cause } => Some(cause.code),
            _ => None,
        }
    }
}

impl From<EngineError> for StorageError {
    fn from(cause: EngineError) -> Self {
        StorageError::Engine { cause }
    }
}

impl From<ConfigError> for StorageError {
    fn from(cause: ConfigError) -> Self {
        StorageError::Config { cause }
    }
}

impl From<CodecError> for StorageError {
    fn from(cause: CodecError) -> Self {
        StorageError::Codec { cause }
    }
}

impl From<EvalError> for StorageError {
    fn from(cause: EvalError) -> Self {
        StorageError::Evaluation { cause }
    }
}
