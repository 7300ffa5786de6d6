use std::{any::Any, fmt, future::Future, sync::Arc};

use futures::{future::BoxFuture, FutureExt};
use thiserror::Error;

use super::{Message, MessageOptions};
use crate::{ErrorExt, StatusCode};

/// Ошибка, которую обработчик может вернуть явно.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    /// Обычный сбой: сообщается в канал ошибок, воркер продолжает работу.
    #[error("handler failed: {0}")]
    Failed(String),

    /// Преднамеренный сигнал остановки всей подписки.
    #[error("handler requested shutdown")]
    Shutdown,
}

impl HandlerError {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}

impl ErrorExt for HandlerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Failed(_) => StatusCode::HandlerFailed,
            Self::Shutdown => StatusCode::Cancelled,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Итог одного вызова обработчика после нормализации.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Ничего не переопубликовывать.
    Done,
    /// Опубликовать новое сообщение от имени подписки.
    Republish(MessageOptions),
    Failed(String),
    Shutdown,
}

/// Значения, которые может вернуть обработчик.
///
/// Пустая строка и `None` означают «ничего не публиковать».
pub trait IntoOutcome {
    fn into_outcome(self) -> Outcome;
}

impl IntoOutcome for Outcome {
    fn into_outcome(self) -> Outcome {
        self
    }
}

impl IntoOutcome for () {
    fn into_outcome(self) -> Outcome {
        Outcome::Done
    }
}

impl IntoOutcome for &str {
    fn into_outcome(self) -> Outcome {
        if self.is_empty() {
            Outcome::Done
        } else {
            Outcome::Republish(MessageOptions::new(self))
        }
    }
}

impl IntoOutcome for String {
    fn into_outcome(self) -> Outcome {
        if self.is_empty() {
            Outcome::Done
        } else {
            Outcome::Republish(MessageOptions::new(self))
        }
    }
}

impl IntoOutcome for MessageOptions {
    fn into_outcome(self) -> Outcome {
        if self.topic.is_empty() {
            Outcome::Done
        } else {
            Outcome::Republish(self)
        }
    }
}

impl<T: IntoOutcome> IntoOutcome for Option<T> {
    fn into_outcome(self) -> Outcome {
        self.map_or(Outcome::Done, IntoOutcome::into_outcome)
    }
}

impl<T: IntoOutcome> IntoOutcome for Result<T, HandlerError> {
    fn into_outcome(self) -> Outcome {
        match self {
            Ok(value) => value.into_outcome(),
            Err(HandlerError::Failed(reason)) => Outcome::Failed(reason),
            Err(HandlerError::Shutdown) => Outcome::Shutdown,
        }
    }
}

impl<T: IntoOutcome> IntoOutcome for Result<T, anyhow::Error> {
    fn into_outcome(self) -> Outcome {
        match self {
            Ok(value) => value.into_outcome(),
            Err(err) => match err.downcast_ref::<HandlerError>() {
                Some(HandlerError::Shutdown) => Outcome::Shutdown,
                Some(HandlerError::Failed(reason)) => Outcome::Failed(reason.clone()),
                None => Outcome::Failed(format!("{err:#}")),
            },
        }
    }
}

type ProducerFn = dyn Fn() -> BoxFuture<'static, Outcome> + Send + Sync;
type ConsumerFn = dyn Fn(Message) -> BoxFuture<'static, Outcome> + Send + Sync;

/// Обработчик подписки. Форма выбирается при регистрации.
#[derive(Clone)]
pub enum Handler {
    /// Вызывается без аргументов (чистый производитель событий).
    Producer(Arc<ProducerFn>),
    /// Получает сообщение.
    Consumer(Arc<ConsumerFn>),
}

impl Handler {
    /// Обработчик, принимающий сообщение.
    ///
    /// ```ignore
    /// let handler = Handler::consumer(|msg: Message| async move {
    ///     tracing::info!(topic = msg.topic(), "got it");
    /// });
    /// ```
    pub fn consumer<F, Fut, O>(f: F) -> Self
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = O> + Send + 'static,
        O: IntoOutcome + 'static,
    {
        Self::Consumer(Arc::new(move |message| {
            let fut = f(message);
            async move { fut.await.into_outcome() }.boxed()
        }))
    }

    /// Обработчик без аргументов.
    pub fn producer<F, Fut, O>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = O> + Send + 'static,
        O: IntoOutcome + 'static,
    {
        Self::Producer(Arc::new(move || {
            let fut = f();
            async move { fut.await.into_outcome() }.boxed()
        }))
    }

    pub fn is_producer(&self) -> bool {
        matches!(self, Self::Producer(_))
    }

    /// Запускает обработчик для сообщения.
    ///
    /// Сам вызов замыкания откладывается до первого опроса, чтобы паника
    /// внутри него перехватывалась вместе с паникой в future.
    pub(crate) fn invoke(
        &self,
        message: Message,
    ) -> BoxFuture<'static, Outcome> {
        let handler = self.clone();
        async move {
            match handler {
                Self::Producer(f) => f().await,
                Self::Consumer(f) => f(message).await,
            }
        }
        .boxed()
    }
}

impl fmt::Debug for Handler {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Self::Producer(_) => f.write_str("Handler::Producer"),
            Self::Consumer(_) => f.write_str("Handler::Consumer"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn republished_topic(outcome: Outcome) -> Option<String> {
        match outcome {
            Outcome::Republish(options) => Some(options.topic),
            _ => None,
        }
    }

    /// Тест проверяет нормализацию возвращаемых значений обработчика.
    #[test]
    fn test_into_outcome() {
        assert!(matches!(().into_outcome(), Outcome::Done));
        assert!(matches!("".into_outcome(), Outcome::Done));
        assert!(matches!(String::new().into_outcome(), Outcome::Done));
        assert!(matches!(None::<String>.into_outcome(), Outcome::Done));
        assert_eq!(
            republished_topic("Cmd::Done".into_outcome()),
            Some("Cmd::Done".to_string())
        );
        assert_eq!(
            republished_topic(Some(MessageOptions::new("A::B").payload(1i64)).into_outcome()),
            Some("A::B".to_string())
        );
    }

    #[test]
    fn test_result_outcomes() {
        let ok: Result<&str, HandlerError> = Ok("Next");
        assert_eq!(republished_topic(ok.into_outcome()), Some("Next".to_string()));

        let failed: Result<(), HandlerError> = Err(HandlerError::failed("boom"));
        assert!(matches!(failed.into_outcome(), Outcome::Failed(reason) if reason == "boom"));

        let stop: Result<(), HandlerError> = Err(HandlerError::Shutdown);
        assert!(matches!(stop.into_outcome(), Outcome::Shutdown));

        let any: anyhow::Result<()> = Err(anyhow::anyhow!("disk full"));
        assert!(matches!(any.into_outcome(), Outcome::Failed(reason) if reason == "disk full"));

        let any_stop: anyhow::Result<()> = Err(HandlerError::Shutdown.into());
        assert!(matches!(any_stop.into_outcome(), Outcome::Shutdown));
    }

    #[test]
    fn test_handler_error_status() {
        assert_eq!(
            HandlerError::failed("x").status_code(),
            StatusCode::HandlerFailed
        );
        assert_eq!(HandlerError::Shutdown.status_code(), StatusCode::Cancelled);
    }

    #[tokio::test]
    async fn test_invoke_shapes() {
        let consumer =
            Handler::consumer(|msg: Message| async move { format!("{}::Seen", msg.topic()) });
        let producer = Handler::producer(|| async { "Tick" });
        assert!(!consumer.is_producer());
        assert!(producer.is_producer());

        let msg = Message::new("Orders::Created").unwrap();
        assert_eq!(
            republished_topic(consumer.invoke(msg.clone()).await),
            Some("Orders::Created::Seen".to_string())
        );
        assert_eq!(
            republished_topic(producer.invoke(msg).await),
            Some("Tick".to_string())
        );
        assert_eq!(format!("{consumer:?}"), "Handler::Consumer");
    }
}
