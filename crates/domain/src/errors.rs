//! 领域模型错误定义
//!
//! 定义核心协调逻辑中所有可能的错误类型，提供清晰的错误上下文。

use thiserror::Error;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// 身份已被其他连接占用
    #[error("identity {identity} is already taken")]
    IdentityTaken { identity: String },

    /// 请求中的身份值无法识别
    #[error("invalid identity value: {value}")]
    InvalidIdentity { value: String },

    /// 非法的状态流转（例如发送者确认自己的消息）
    #[error("unauthorized transition: {reason}")]
    UnauthorizedTransition { reason: String },

    /// 消息不存在
    #[error("message not found: {message_id}")]
    MessageNotFound { message_id: String },
}

impl DomainError {
    /// 创建身份占用错误
    pub fn identity_taken(identity: impl ToString) -> Self {
        Self::IdentityTaken {
            identity: identity.to_string(),
        }
    }

    /// 创建身份非法错误
    pub fn invalid_identity(value: impl Into<String>) -> Self {
        Self::InvalidIdentity {
            value: value.into(),
        }
    }

    /// 创建非法流转错误
    pub fn unauthorized_transition(reason: impl Into<String>) -> Self {
        Self::UnauthorizedTransition {
            reason: reason.into(),
        }
    }

    /// 创建消息不存在错误
    pub fn message_not_found(message_id: impl ToString) -> Self {
        Self::MessageNotFound {
            message_id: message_id.to_string(),
        }
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;

/// 存储层错误类型
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// 底层存储不可用或操作失败
    #[error("storage error: {0}")]
    Storage(String),

    /// 记录不存在
    #[error("record not found")]
    NotFound,
}

impl RepositoryError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }
}

/// 存储层结果类型
pub type RepositoryResult<T> = Result<T, RepositoryError>;
