use domain::{DomainError, RepositoryError};
use thiserror::Error;

/// 应用层错误，对应实时同步的错误分类。
///
/// 所有错误只回报给发起请求的连接或请求方，从不广播到房间。
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ApplicationError {
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("not a participant of this conversation")]
    Authorization,
    #[error("{field}: {message}")]
    Validation { field: String, message: String },
    #[error("{resource} not found")]
    NotFound { resource: &'static str },
    #[error("storage error: {0}")]
    Storage(RepositoryError),
    #[error("delivery failed: {0}")]
    Transport(String),
}

impl ApplicationError {
    pub fn authentication(message: impl Into<String>) -> Self {
        ApplicationError::Authentication(message.into())
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        ApplicationError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// 协议里使用的稳定错误码
    pub fn code(&self) -> &'static str {
        match self {
            ApplicationError::Authentication(_) => "AUTHENTICATION_FAILED",
            ApplicationError::Authorization => "AUTHORIZATION_FAILED",
            ApplicationError::Validation { .. } => "VALIDATION_FAILED",
            ApplicationError::NotFound { .. } => "NOT_FOUND",
            ApplicationError::Storage(_) => "STORAGE_ERROR",
            ApplicationError::Transport(_) => "TRANSPORT_ERROR",
        }
    }

    /// 回给客户端的文本，存储错误不暴露内部细节
    pub fn client_message(&self) -> String {
        match self {
            ApplicationError::Storage(_) => "storage unavailable, operation aborted".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<DomainError> for ApplicationError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::ValidationError { field, message } => {
                ApplicationError::Validation { field, message }
            }
        }
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        ApplicationError::Storage(value)
    }
}

pub type ApplicationResult<T> = Result<T, ApplicationError>;
