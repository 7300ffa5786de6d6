/// Немедленно возвращает ошибку из текущей функции.
///
/// Макрос возвращает `Err(StackError)`. Поддерживает три формы:
/// - `bail!(err)` — принимает готовый тип ошибки, совместимый с `StackError`;
/// - `bail!(code, "msg")` — создаёт `GenericError` с кодом и сообщением;
/// - `bail!(code, "fmt {}", arg)` — форматирует сообщение.
///
/// Пример:
///
/// ```ignore
/// use shortbus_error::{bail, StatusCode};
///
/// fn validate_capacity(capacity: usize) -> Result<(), crate::StackError> {
///     if capacity == 0 {
///         bail!(StatusCode::InvalidCapacity, "Queue capacity must be positive");
///     }
///     Ok(())
/// }
/// ```
#[macro_export]
macro_rules! bail {
    ($err:expr) => {
        return Err($crate::StackError::from($err))
    };
    ($code:expr, $msg:expr) => {
        return Err($crate::StackError::new(
            $crate::types::GenericError::new($code, $msg)
        ))
    };
    ($code:expr, $fmt:expr, $($arg:tt)*) => {
        return Err($crate::StackError::new(
            $crate::types::GenericError::new($code, format!($fmt, $($arg)*))
        ))
    };
}

/// Проверяет условие и вызывает `bail!`, если условие ложно.
///
/// Формы аналогичны `bail!`:
/// - `ensure!(cond, err)`;
/// - `ensure!(cond, code, "msg")`;
/// - `ensure!(cond, code, "fmt {}", arg)`.
///
/// Пример:
///
/// ```ignore
/// use shortbus_error::{ensure, SubscribeError};
///
/// fn validate(concurrency: usize) -> Result<(), crate::StackError> {
///     ensure!(concurrency >= 1, SubscribeError::InvalidConcurrency { value: concurrency });
///     Ok(())
/// }
/// ```
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $err:expr) => {
        if !($cond) {
            $crate::bail!($err);
        }
    };
    ($cond:expr, $code:expr, $msg:expr) => {
        if !($cond) {
            $crate::bail!($code, $msg);
        }
    };
    ($cond:expr, $code:expr, $fmt:expr, $($arg:tt)*) => {
        if !($cond) {
            $crate::bail!($code, $fmt, $($arg)*);
        }
    };
}

/// Шаги `StackError` для `Result`: `.context("loading")?`.
///
/// Подходит как для типизированных ошибок (`ConfigError` и т.п.), так и для
/// `ShortbusResult`, где шаг добавляется к уже накопленным.
pub trait ResultExt<T> {
    fn context(
        self,
        message: impl Into<String>,
    ) -> Result<T, crate::StackError>;

    /// Сообщение строится только при ошибке.
    fn with_context<C, F>(
        self,
        f: F,
    ) -> Result<T, crate::StackError>
    where
        C: Into<String>,
        F: FnOnce() -> C;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Into<crate::StackError>,
{
    #[track_caller]
    fn context(
        self,
        message: impl Into<String>,
    ) -> Result<T, crate::StackError> {
        match self {
            Ok(value) => Ok(value),
            Err(err) => Err(err.into().context(message)),
        }
    }

    #[track_caller]
    fn with_context<C, F>(
        self,
        f: F,
    ) -> Result<T, crate::StackError>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        match self {
            Ok(value) => Ok(value),
            Err(err) => Err(err.into().context(f())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ShortbusResult, StatusCode, SubscribeError, TopicError};

    #[test]
    fn test_bail_typed() {
        fn example() -> ShortbusResult<()> {
            bail!(SubscribeError::EmptyName);
        }

        let err = example().unwrap_err();
        assert_eq!(err.status_code(), StatusCode::InvalidName);
        assert!(err.contexts().is_empty());
    }

    #[test]
    fn test_bail_with_format() {
        fn example(value: usize) -> ShortbusResult<()> {
            bail!(StatusCode::InvalidCapacity, "Invalid capacity: {}", value);
        }

        let err = example(0).unwrap_err();
        assert_eq!(err.to_string(), "Invalid capacity: 0");
    }

    #[test]
    fn test_ensure() {
        fn validate(concurrency: usize) -> ShortbusResult<()> {
            ensure!(
                concurrency >= 1,
                SubscribeError::InvalidConcurrency { value: concurrency }
            );
            ensure!(
                concurrency <= 64,
                StatusCode::InvalidConcurrency,
                "Too many workers: {}",
                concurrency
            );
            Ok(())
        }

        assert!(validate(4).is_ok());
        assert_eq!(
            validate(0).unwrap_err().downcast_ref::<SubscribeError>(),
            Some(&SubscribeError::InvalidConcurrency { value: 0 })
        );
        assert_eq!(validate(65).unwrap_err().to_string(), "Too many workers: 65");
    }

    /// Тест проверяет, что шаги копятся при подъёме через `?`.
    #[test]
    fn test_context_accumulates() {
        fn parse() -> Result<(), TopicError> {
            Err(TopicError::Empty)
        }

        fn publish() -> ShortbusResult<()> {
            parse().context("parsing topic")?;
            Ok(())
        }

        fn handle(attempt: u32) -> ShortbusResult<()> {
            publish().with_context(|| format!("attempt {attempt}"))
        }

        let err = handle(2).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::InvalidTopic);
        assert_eq!(
            err.to_string(),
            "attempt 2: parsing topic: topic must not be empty"
        );
        assert_eq!(err.contexts()[0].location.file(), file!());
    }

    #[test]
    fn test_with_context_is_lazy() {
        let ok: Result<u8, TopicError> = Ok(7);
        let res = ok.with_context(|| -> String { unreachable!("built only on error") });
        assert_eq!(res.unwrap(), 7);
    }
}
