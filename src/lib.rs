//! shortbus — внутрипроцессная шина публикации и подписки на tokio.
//!
//! Издатели публикуют сообщения с иерархическими топиками (`Orders::Created`),
//! подписки выбирают их шаблонами (`Orders::*`, `Cmd::**`) и обрабатывают в
//! собственных пулах воркеров. Результат обработчика может быть
//! переопубликован обратно в шину, а каждое сообщение несёт слот ответа для
//! взаимодействия «запрос–ответ».
//!
//! ```ignore
//! use shortbus::{Bus, Handler, Message, SubscribeOptions};
//!
//! let bus = Bus::with_defaults()?;
//! bus.subscribe(
//!     SubscribeOptions::new(Handler::consumer(|msg: Message| async move {
//!         msg.reply("ack");
//!     }))
//!     .topic_filter("Orders::*"),
//! )?;
//! let msg = bus.publish("Orders::Created").await?;
//! let ack = msg.recv_reply_timeout(std::time::Duration::from_secs(1)).await?;
//! ```

/// Конфигурация шины (`BusConfig`) и её загрузка.
pub mod config;
/// Коды и типы ошибок.
pub mod error;
/// Логирование через `tracing`.
pub mod logging;
/// Pub/Sub: Bus, Subscription, Message, TopicPattern.
pub mod pubsub;

// -----------------------------------------------------------------------------
//  Frequently used public types
// -----------------------------------------------------------------------------

/// Конфигурация.
pub use config::{BusConfig, CONFIG_VERSION};
/// Ошибки, коды статуса и макросы.
pub use error::*;
/// Инициализация логирования.
pub use logging::{init_logging, LogFormat, LoggingConfig};
/// Pub/Sub API.
pub use pubsub::{
    Admission, BackoffPolicy, Bus, BusStats, DeliveryPolicy, Fault, FaultKind, FaultPolicy,
    Handler, IntoOutcome, JitterPolicy, Message, MessageOptions, Monitor, MonitorOptions,
    Outcome, PatternSpec, Payload, Publishable, SubscribeOptions, Subscription, SubscriptionRef,
    SubscriptionStats, TopicPattern, TOPIC_DELIMITER,
};
