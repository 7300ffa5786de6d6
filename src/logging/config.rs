use std::{env, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{ensure, ConfigError, ShortbusResult};

/// Переменная окружения, переопределяющая уровень логирования.
pub const ENV_LOG_LEVEL: &str = "SHORTBUS_LOG_LEVEL";
/// Переменная окружения, переопределяющая формат вывода.
pub const ENV_LOG_FORMAT: &str = "SHORTBUS_LOG_FORMAT";

const LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

/// Формат строк лога.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::InvalidValue {
                field: "log_format",
                reason: format!("unknown format '{other}'"),
            }),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let s = match self {
            Self::Pretty => "pretty",
            Self::Compact => "compact",
            Self::Json => "json",
        };
        f.write_str(s)
    }
}

/// Настройки логирования.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Базовый уровень (`info`, `debug`, ...).
    pub level: String,
    pub format: LogFormat,
    /// Дополнительные директивы фильтра, например `shortbus::monitor=info`.
    pub directives: Vec<String>,
    pub ansi: bool,
    pub with_target: bool,
    pub with_thread_ids: bool,
    pub with_line_numbers: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            directives: Vec::new(),
            ansi: true,
            with_target: true,
            with_thread_ids: false,
            with_line_numbers: false,
        }
    }
}

impl LoggingConfig {
    /// Применяет `SHORTBUS_LOG_LEVEL` и `SHORTBUS_LOG_FORMAT`.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = env::var(ENV_LOG_LEVEL) {
            self.level = level.trim().to_ascii_lowercase();
        }
        if let Ok(format) = env::var(ENV_LOG_FORMAT) {
            match format.parse() {
                Ok(format) => self.format = format,
                Err(err) => eprintln!("Ignoring {ENV_LOG_FORMAT}: {err}"),
            }
        }
    }

    pub fn validate(&self) -> ShortbusResult<()> {
        ensure!(
            LEVELS.contains(&self.level.as_str()),
            ConfigError::InvalidValue {
                field: "level",
                reason: format!("unknown level '{}'", self.level),
            }
        );
        Ok(())
    }

    /// Директива для `EnvFilter`: базовый уровень плюс дополнительные.
    pub fn build_filter_directive(&self) -> String {
        std::iter::once(self.level.as_str())
            .chain(self.directives.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;
    use crate::StatusCode;

    #[test]
    fn test_format_parsing() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!(" compact ".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert!("xml".parse::<LogFormat>().is_err());
        assert_eq!(LogFormat::Pretty.to_string(), "pretty");
    }

    #[test]
    fn test_filter_directive() {
        let cfg = LoggingConfig {
            level: "warn".into(),
            directives: vec!["shortbus::monitor=info".into()],
            ..LoggingConfig::default()
        };
        assert_eq!(cfg.build_filter_directive(), "warn,shortbus::monitor=info");
        assert_eq!(LoggingConfig::default().build_filter_directive(), "info");
    }

    #[test]
    fn test_validate_level() {
        let cfg = LoggingConfig {
            level: "loud".into(),
            ..LoggingConfig::default()
        };
        assert_eq!(
            cfg.validate().unwrap_err().status_code(),
            StatusCode::InvalidConfig
        );
    }

    /// Тест проверяет переопределение уровня и формата из окружения.
    #[test]
    #[serial]
    fn test_env_overrides() {
        env::set_var(ENV_LOG_LEVEL, "DEBUG");
        env::set_var(ENV_LOG_FORMAT, "json");
        let mut cfg = LoggingConfig::default();
        cfg.apply_env_overrides();
        env::remove_var(ENV_LOG_LEVEL);
        env::remove_var(ENV_LOG_FORMAT);

        assert_eq!(cfg.level, "debug");
        assert_eq!(cfg.format, LogFormat::Json);
        assert!(cfg.validate().is_ok());
    }
}
