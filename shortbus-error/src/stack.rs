use std::{fmt, panic::Location, sync::Arc};

use crate::{ErrorExt, StatusCode};

/// Ошибка шины: типизированная причина и шаги, через которые она прошла.
///
/// Шаги добавляются через [`ResultExt`](crate::ResultExt) по мере подъёма
/// ошибки (`validating options` → `subscribing`). Причина и шаги лежат за
/// `Arc`, клон ничего не копирует.
#[derive(Clone)]
pub struct StackError {
    cause: Arc<dyn ErrorExt>,
    trail: Arc<[ErrorContext]>,
}

/// Шаг цепочки: что делалось и где это место в коде.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    pub message: String,
    pub location: &'static Location<'static>,
}

impl fmt::Display for ErrorContext {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(
            f,
            "{} at {}:{}",
            self.message,
            self.location.file(),
            self.location.line()
        )
    }
}

impl StackError {
    pub fn new<E: ErrorExt>(err: E) -> Self {
        Self {
            cause: Arc::new(err),
            trail: Arc::from([]),
        }
    }

    /// Добавляет внешний шаг; место вызова запоминается.
    #[track_caller]
    pub fn context(
        self,
        message: impl Into<String>,
    ) -> Self {
        let step = ErrorContext {
            message: message.into(),
            location: Location::caller(),
        };
        let trail = self.trail.iter().cloned().chain([step]).collect();
        Self {
            cause: self.cause,
            trail,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        self.cause.status_code()
    }

    /// Шаги от самого внутреннего к внешнему.
    pub fn contexts(&self) -> &[ErrorContext] {
        &self.trail
    }

    pub fn cause(&self) -> &dyn ErrorExt {
        self.cause.as_ref()
    }

    /// Типизированная причина, например `SubscribeError`.
    pub fn downcast_ref<T: ErrorExt>(&self) -> Option<&T> {
        self.cause.as_any().downcast_ref::<T>()
    }
}

impl fmt::Debug for StackError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("StackError")
            .field("status_code", &self.status_code())
            .field("cause", &self.cause.to_string())
            .field(
                "trail",
                &self.trail.iter().map(ToString::to_string).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Внешний шаг первым, причина последней: `a: b: cause`.
impl fmt::Display for StackError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        for step in self.trail.iter().rev() {
            write!(f, "{}: ", step.message)?;
        }
        write!(f, "{}", self.cause)
    }
}

impl std::error::Error for StackError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.cause.as_ref())
    }
}

impl<E: ErrorExt> From<E> for StackError {
    fn from(err: E) -> Self {
        StackError::new(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ConfigError, SubscribeError};

    /// Тест проверяет порядок шагов и место их добавления.
    #[test]
    fn test_trail_order() {
        let err = StackError::new(SubscribeError::EmptyName)
            .context("validating options")
            .context("subscribing");

        let steps: Vec<&str> = err.contexts().iter().map(|c| c.message.as_str()).collect();
        assert_eq!(steps, ["validating options", "subscribing"]);
        assert_eq!(err.contexts()[0].location.file(), file!());
        assert_eq!(
            err.to_string(),
            "subscribing: validating options: subscription name must not be empty"
        );
    }

    #[test]
    fn test_clone_keeps_trail_independent() {
        let base = StackError::new(SubscribeError::BusClosed).context("a");
        let longer = base.clone().context("b");
        assert_eq!(base.contexts().len(), 1);
        assert_eq!(longer.contexts().len(), 2);
    }

    #[test]
    fn test_downcast_and_source() {
        let err = StackError::new(ConfigError::Load {
            reason: "bad number".to_string(),
        });
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::Load { reason }) if reason == "bad number"
        ));
        assert!(err.downcast_ref::<SubscribeError>().is_none());
        assert_eq!(err.status_code(), StatusCode::ConfigLoadFailed);

        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source, Some(err.cause().to_string()));
    }

    #[test]
    fn test_debug_lists_locations() {
        let err = StackError::new(SubscribeError::EmptyName).context("subscribing");
        let debug = format!("{err:?}");
        assert!(debug.contains("InvalidName"));
        assert!(debug.contains("subscribing at "));
        assert!(debug.contains(file!()));
    }
}
