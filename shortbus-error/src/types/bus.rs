use std::{any::Any, time::Duration};

use thiserror::Error;

use crate::{ErrorExt, StatusCode, TopicError};

/// Ошибки регистрации подписки (fail fast на `subscribe`).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscribeError {
    #[error("subscription name '{name}' is already registered")]
    NameTaken { name: String },

    #[error("subscription name must not be empty")]
    EmptyName,

    #[error("concurrency must be at least 1 (got {value})")]
    InvalidConcurrency { value: usize },

    #[error("inbox capacity must be at least 1 (got {value})")]
    InvalidCapacity { value: usize },

    #[error("invalid fault policy: {reason}")]
    InvalidFaultPolicy { reason: String },

    #[error("bus is shut down")]
    BusClosed,
}

/// Ошибки публикации сообщения.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    #[error(transparent)]
    InvalidTopic(#[from] TopicError),

    /// Неблокирующая публикация в заполненную входящую очередь.
    #[error("inbound queue is full (capacity {capacity})")]
    WouldBlock { capacity: usize },

    #[error("bus is shut down")]
    Closed,
}

/// Ошибки чтения из слота ответа сообщения.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplyError {
    #[error("no reply arrived within {waited:?}")]
    Timeout { waited: Duration },

    #[error("no reply available")]
    Empty,
}

impl ErrorExt for SubscribeError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::NameTaken { .. } => StatusCode::NameTaken,
            Self::EmptyName => StatusCode::InvalidName,
            Self::InvalidConcurrency { .. } => StatusCode::InvalidConcurrency,
            Self::InvalidCapacity { .. } => StatusCode::InvalidCapacity,
            Self::InvalidFaultPolicy { .. } => StatusCode::InvalidArgs,
            Self::BusClosed => StatusCode::ChannelClosed,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl ErrorExt for PublishError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidTopic(_) => StatusCode::InvalidTopic,
            Self::WouldBlock { .. } => StatusCode::QueueFull,
            Self::Closed => StatusCode::ChannelClosed,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn client_message(&self) -> String {
        match self {
            Self::InvalidTopic(err) => err.to_string(),
            Self::WouldBlock { .. } => "Bus is busy, retry later".to_string(),
            Self::Closed => "Bus is shut down".to_string(),
        }
    }
}

impl ErrorExt for ReplyError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Timeout { .. } => StatusCode::Timeout,
            Self::Empty => StatusCode::NotFound,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_error() {
        let err = SubscribeError::NameTaken {
            name: "audit".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::NameTaken);
        assert!(err.status_code().is_client_error());
        assert!(err.to_string().contains("audit"));

        let err = SubscribeError::InvalidFaultPolicy {
            reason: "backoff.first exceeds backoff.max".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::InvalidArgs);
        assert_eq!(
            err.to_string(),
            "invalid fault policy: backoff.first exceeds backoff.max"
        );
    }

    #[test]
    fn test_publish_error() {
        let err = PublishError::WouldBlock { capacity: 8 };
        assert_eq!(err.status_code(), StatusCode::QueueFull);
        assert!(err.status_code().is_retryable());
        assert_eq!(err.client_message(), "Bus is busy, retry later");

        let err: PublishError = TopicError::Empty.into();
        assert_eq!(err.status_code(), StatusCode::InvalidTopic);
        assert_eq!(err.to_string(), "topic must not be empty");
    }

    #[test]
    fn test_reply_error() {
        let err = ReplyError::Timeout {
            waited: Duration::from_millis(50),
        };
        assert_eq!(err.status_code(), StatusCode::Timeout);
        assert!(err.to_string().contains("50ms"));
        assert_eq!(ReplyError::Empty.status_code(), StatusCode::NotFound);
    }
}
