//! Конфигурация шины: версионированная структура `BusConfig`, значения по
//! умолчанию и переопределение через переменные окружения `SHORTBUS_*`.

pub mod settings;

pub use settings::*;
