use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Ошибки валидации топика публикуемого сообщения.
///
/// Топик состоит из непустых сегментов, разделённых `::`; сегменты `*` и
/// `**` зарезервированы для фильтров и в топике недопустимы.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopicError {
    #[error("topic must not be empty")]
    Empty,

    #[error("topic '{topic}' has an empty segment at position {position}")]
    EmptySegment { topic: String, position: usize },

    #[error("topic '{topic}' has a wildcard segment at position {position}")]
    Wildcard { topic: String, position: usize },
}

impl ErrorExt for TopicError {
    fn status_code(&self) -> StatusCode {
        StatusCode::InvalidTopic
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
