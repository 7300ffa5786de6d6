use std::time::Duration;

use config::{Config, Environment};
use serde::{Deserialize, Serialize};

use crate::{
    ensure,
    pubsub::{BackoffPolicy, DeliveryPolicy, FaultPolicy, JitterPolicy, PatternSpec},
    ConfigError, ResultExt, ShortbusResult,
};

/// Текущая версия формата `BusConfig`.
pub const CONFIG_VERSION: u32 = 1;

/// Префикс переменных окружения (`SHORTBUS_INBOX_CAPACITY` и т.п.).
pub const ENV_PREFIX: &str = "SHORTBUS";

/// Конфигурация шины.
///
/// Одна явная версионированная структура со значениями по умолчанию.
/// Пустые `default_topic_filter` и `default_publisher_filter` означают
/// «совпадает со всем» и «без фильтра издателя» соответственно.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub version: u32,
    /// Ёмкость общей входящей очереди шины.
    pub inbound_capacity: usize,
    /// Ёмкость входящей очереди каждой подписки.
    pub inbox_capacity: usize,
    pub default_concurrency: usize,
    pub default_topic_filter: Vec<String>,
    pub default_publisher_filter: Vec<String>,
    pub delivery: DeliveryPolicy,
    pub fault_channel_capacity: usize,
    /// Сколько ждать воркеры при отписке и остановке шины.
    pub stop_deadline_ms: u64,
    pub fault_backoff_first_ms: u64,
    pub fault_backoff_max_ms: u64,
    pub fault_backoff_factor: f64,
    pub fault_jitter: JitterPolicy,
    pub max_consecutive_faults: Option<u32>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            inbound_capacity: 1_000_000,
            inbox_capacity: 1024,
            default_concurrency: 1,
            default_topic_filter: Vec::new(),
            default_publisher_filter: Vec::new(),
            delivery: DeliveryPolicy::Backpressure,
            fault_channel_capacity: 256,
            stop_deadline_ms: 5000,
            fault_backoff_first_ms: 10,
            fault_backoff_max_ms: 1000,
            fault_backoff_factor: 2.0,
            fault_jitter: JitterPolicy::None,
            max_consecutive_faults: None,
        }
    }
}

impl BusConfig {
    /// Значения по умолчанию, поверх них переменные окружения `SHORTBUS_*`.
    pub fn load() -> ShortbusResult<Self> {
        Self::load_from(
            Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("default_topic_filter")
                .with_list_parse_key("default_publisher_filter"),
        )
    }

    fn load_from(env: Environment) -> ShortbusResult<Self> {
        let defaults = Config::try_from(&Self::default())
            .map_err(load_error)
            .context("serializing built-in defaults")?;
        let cfg = Config::builder()
            .add_source(defaults)
            .add_source(env)
            .build()
            .map_err(load_error)
            .with_context(|| format!("reading {ENV_PREFIX}_* environment"))?;

        let settings: Self = cfg
            .try_deserialize()
            .map_err(load_error)
            .context("deserializing bus configuration")?;
        settings
            .validate()
            .context("validating loaded bus configuration")?;
        Ok(settings)
    }

    /// Отклоняет значения, с которыми шина не может работать.
    pub fn validate(&self) -> ShortbusResult<()> {
        ensure!(
            self.version == CONFIG_VERSION,
            ConfigError::UnsupportedVersion {
                found: self.version,
                expected: CONFIG_VERSION,
            }
        );
        ensure!(
            self.inbound_capacity >= 1,
            invalid("inbound_capacity", "must be at least 1")
        );
        ensure!(
            self.inbox_capacity >= 1,
            invalid("inbox_capacity", "must be at least 1")
        );
        ensure!(
            self.default_concurrency >= 1,
            invalid("default_concurrency", "must be at least 1")
        );
        ensure!(
            self.fault_channel_capacity >= 1,
            invalid("fault_channel_capacity", "must be at least 1")
        );
        ensure!(
            self.fault_backoff_factor.is_finite() && self.fault_backoff_factor >= 1.0,
            invalid("fault_backoff_factor", "must be a finite number >= 1.0")
        );
        ensure!(
            self.fault_backoff_first_ms <= self.fault_backoff_max_ms,
            invalid(
                "fault_backoff_first_ms",
                "must not exceed fault_backoff_max_ms"
            )
        );
        ensure!(
            self.max_consecutive_faults != Some(0),
            invalid("max_consecutive_faults", "must be at least 1 when set")
        );
        Ok(())
    }

    pub fn stop_deadline(&self) -> Duration {
        Duration::from_millis(self.stop_deadline_ms)
    }

    pub fn fault_policy(&self) -> FaultPolicy {
        FaultPolicy {
            backoff: BackoffPolicy {
                first: Duration::from_millis(self.fault_backoff_first_ms),
                max: Duration::from_millis(self.fault_backoff_max_ms),
                factor: self.fault_backoff_factor,
                jitter: self.fault_jitter,
            },
            max_consecutive_faults: self.max_consecutive_faults,
        }
    }

    pub fn default_topic_filter(&self) -> PatternSpec {
        if self.default_topic_filter.is_empty() {
            PatternSpec::Any
        } else {
            PatternSpec::from(self.default_topic_filter.clone())
        }
    }

    pub fn default_publisher_filter(&self) -> Option<PatternSpec> {
        if self.default_publisher_filter.is_empty() {
            None
        } else {
            Some(PatternSpec::from(self.default_publisher_filter.clone()))
        }
    }
}

fn invalid(
    field: &'static str,
    reason: &str,
) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.to_string(),
    }
}

fn load_error(err: config::ConfigError) -> ConfigError {
    ConfigError::Load {
        reason: err.to_string(),
    }
}
