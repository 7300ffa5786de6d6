//! Типы ошибок шины.
//!
//! Основа лежит в крейте `shortbus-error` (коды `StatusCode`, `StackError`,
//! макросы `bail!` / `ensure!`, шаги через `ResultExt`); здесь она переэкспортируется,
//! чтобы внешнему коду хватало одной зависимости.

pub use shortbus_error::{
    bail, ensure, ConfigError, ErrorContext, ErrorExt, GenericError, LogLevel,
    PublishError, ReplyError, ResultExt, ShortbusResult, StackError, StatusCode, SubscribeError,
    TopicError,
};

pub use crate::pubsub::HandlerError;
