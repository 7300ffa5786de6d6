use std::fmt;

use num_enum::TryFromPrimitive;

/// Коды статуса для категоризации ошибок шины.
///
/// # Диапазоны:
/// - 0xxx: Успех
/// - 1xxx: Общие ошибки
/// - 2xxx: Топики и шаблоны
/// - 3xxx: Регистрация подписок
/// - 4xxx: Ёмкость очередей (backpressure)
/// - 5xxx: Ошибки обработчиков
/// - 6xxx: Жизненный цикл каналов
/// - 7xxx: Конфигурация
///
/// `num_enum::TryFromPrimitive` даёт нативную реализацию `TryFrom<u32>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
#[non_exhaustive]
pub enum StatusCode {
    // === 0xxx: Успех ===
    Success = 0,

    // === 1xxx: Общие ошибки ===
    Unknown = 1000,
    Unsupported = 1001,
    Unexpected = 1002,
    Internal = 1003,
    InvalidArgs = 1004,

    // === 2xxx: Топики и шаблоны ===
    NotFound = 2000,
    InvalidTopic = 2001,
    InvalidPattern = 2002,

    // === 3xxx: Регистрация подписок ===
    NameTaken = 3000,
    InvalidName = 3001,
    InvalidConcurrency = 3002,
    InvalidCapacity = 3003,

    // === 4xxx: Ёмкость очередей ===
    QueueFull = 4000,

    // === 5xxx: Обработчики ===
    HandlerFailed = 5000,
    HandlerPanicked = 5001,
    WorkerRetired = 5002,
    RepublishFailed = 5003,

    // === 6xxx: Жизненный цикл ===
    ChannelClosed = 6000,
    Timeout = 6001,
    Cancelled = 6002,

    // === 7xxx: Конфигурация ===
    InvalidConfig = 7000,
    UnsupportedVersion = 7001,
    ConfigLoadFailed = 7002,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl StatusCode {
    /// Числовое представление кода статуса.
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Пытается получить вариант `StatusCode` из `u32`.
    ///
    /// Возвращает `None`, если значение не соответствует ни одному варианту.
    pub fn from_u32(v: u32) -> Option<Self> {
        Self::try_from(v).ok()
    }

    /// Возвращает `true`, если операцию с этим кодом имеет смысл повторить
    /// (например, очередь была временно заполнена).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::QueueFull | Self::Timeout)
    }

    /// Вернёт `true`, если переданный `code` означает успешный результат.
    pub fn is_success(code: u32) -> bool {
        Self::Success as u32 == code
    }

    /// Ошибка вызывающей стороны: неверный топик, опции подписки, ёмкость.
    ///
    /// `InvalidArgs` (1004) семантически тоже относится к клиентским ошибкам.
    pub fn is_client_error(&self) -> bool {
        let c = self.code();
        if (2000..=4999).contains(&c) {
            return true;
        }
        matches!(self, Self::InvalidArgs)
    }

    /// Внутренняя ошибка шины или обработчика (диапазоны `1xxx`, `5xxx`,
    /// `6xxx`).
    pub fn is_server_error(&self) -> bool {
        let c = self.code();
        matches!(c, 1000..=1999 | 5000..=6999) && !matches!(self, Self::InvalidArgs)
    }

    /// Ошибка конфигурации (диапазон 7xxx).
    pub fn is_config_error(&self) -> bool {
        (7000..=7999).contains(&self.code())
    }

    /// Рекомендуемый уровень логирования для данного кода.
    pub fn log_level(&self) -> LogLevel {
        match self {
            Self::Success => LogLevel::Trace,
            Self::NotFound => LogLevel::Debug,
            Self::Cancelled => LogLevel::Info,
            Self::InvalidArgs
            | Self::InvalidTopic
            | Self::InvalidPattern
            | Self::NameTaken
            | Self::InvalidName
            | Self::InvalidConcurrency
            | Self::InvalidCapacity => LogLevel::Info,
            Self::QueueFull | Self::Timeout | Self::ChannelClosed | Self::HandlerFailed => {
                LogLevel::Warn
            }
            Self::Internal | Self::HandlerPanicked | Self::WorkerRetired => LogLevel::Error,
            _ => LogLevel::Warn,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для StatusCode
////////////////////////////////////////////////////////////////////////////////

impl From<StatusCode> for u32 {
    fn from(c: StatusCode) -> Self {
        c.code()
    }
}

impl fmt::Display for StatusCode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{:?} ({})", self, self.code())
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
