//! Подсистема Publish–Subscribe (pub/sub).
//!
//! Внутрипроцессная шина сообщений с иерархическими топиками:
//!
//! - `topic`: компиляция шаблонов топиков (`*`, `**`, glob, предикаты).
//! - `message`: неизменяемый конверт сообщения и встроенный слот ответа.
//! - `handler`: обработчики подписок и нормализация их результата.
//! - `subscriber`: подписка с фильтрами, входящей очередью и пулом воркеров.
//! - `worker` (приватный): цикл воркера под надзором.
//! - `backoff`: политика пауз после сбоев обработчика.
//! - `fault`: наблюдаемый поток сбоев.
//! - `bus`: реестр подписок и маршрутизатор.
//! - `monitor`: подписка, пишущая все сообщения в лог.
//!
//! Публичный API переэкспортирует всё, кроме `worker`.

pub mod backoff;
pub mod bus;
pub mod fault;
pub mod handler;
pub mod message;
pub mod monitor;
pub mod subscriber;
pub mod topic;
mod worker;

// Публичный экспорт типов из вложенных модулей, чтобы упростить доступ к ним
// из внешнего кода.
pub use backoff::*;
pub use bus::*;
pub use fault::{Fault, FaultKind};
pub use handler::*;
pub use message::*;
pub use monitor::{Monitor, MonitorOptions, ANONYMOUS_PUBLISHER};
pub use subscriber::{
    Admission, DeliveryPolicy, SubscribeOptions, Subscription, SubscriptionStats,
};
pub use topic::*;
