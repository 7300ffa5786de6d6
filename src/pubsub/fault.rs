use std::{fmt, sync::Arc};

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::Message;
use crate::{LogLevel, StatusCode};

/// Вид сбоя внутри подписки.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultKind {
    /// Обработчик запаниковал; строка — текст паники.
    Panicked(String),
    /// Обработчик вернул ошибку.
    Failed(String),
    /// Переопубликовать результат обработчика не удалось.
    Republish(String),
    /// Входящая очередь подписки переполнена, сообщение отброшено.
    Overflow,
    /// Обработчик запросил остановку подписки.
    ShutdownRequested,
    /// Воркер завершён после серии сбоев подряд.
    WorkerRetired { consecutive: u32 },
}

impl FaultKind {
    /// Код статуса; по нему же выбирается уровень записи в лог.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Panicked(_) => StatusCode::HandlerPanicked,
            Self::Failed(_) => StatusCode::HandlerFailed,
            Self::Republish(_) => StatusCode::RepublishFailed,
            Self::Overflow => StatusCode::QueueFull,
            Self::ShutdownRequested => StatusCode::Cancelled,
            Self::WorkerRetired { .. } => StatusCode::WorkerRetired,
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Self::Panicked(info) => write!(f, "handler panicked: {info}"),
            Self::Failed(reason) => write!(f, "handler failed: {reason}"),
            Self::Republish(reason) => write!(f, "republish failed: {reason}"),
            Self::Overflow => f.write_str("inbox overflow, message dropped"),
            Self::ShutdownRequested => f.write_str("handler requested shutdown"),
            Self::WorkerRetired { consecutive } => {
                write!(f, "worker retired after {consecutive} consecutive faults")
            }
        }
    }
}

/// Наблюдаемое событие сбоя.
#[derive(Debug, Clone)]
pub struct Fault {
    pub subscription: Arc<str>,
    pub message_id: Option<Uuid>,
    pub topic: Option<String>,
    pub kind: FaultKind,
}

impl Fault {
    pub(crate) fn new(
        subscription: &Arc<str>,
        message: Option<&Message>,
        kind: FaultKind,
    ) -> Self {
        Self {
            subscription: subscription.clone(),
            message_id: message.map(Message::id),
            topic: message.map(|m| m.topic().to_string()),
            kind,
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match &self.topic {
            Some(topic) => write!(f, "[{}] {} ({topic})", self.subscription, self.kind),
            None => write!(f, "[{}] {}", self.subscription, self.kind),
        }
    }
}

/// Точка отправки сбоев: лог плюс широковещательный канал.
///
/// Отсутствие получателей не считается ошибкой.
#[derive(Debug, Clone)]
pub(crate) struct FaultSink {
    tx: broadcast::Sender<Fault>,
}

impl FaultSink {
    pub fn new(tx: broadcast::Sender<Fault>) -> Self {
        Self { tx }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(broadcast::channel(capacity.max(1)).0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Fault> {
        self.tx.subscribe()
    }

    pub fn report(
        &self,
        fault: Fault,
    ) {
        let id = fault.message_id.map(|id| id.to_string());
        let message_id = id.as_deref();
        let topic = fault.topic.as_deref();
        let status = fault.kind.status_code();

        macro_rules! emit {
            ($level:ident) => {
                $level!(
                    subscription = %fault.subscription,
                    topic,
                    message_id,
                    %status,
                    "{}",
                    fault.kind
                )
            };
        }
        match status.log_level() {
            LogLevel::Error => emit!(error),
            LogLevel::Warn => emit!(warn),
            LogLevel::Info => emit!(info),
            LogLevel::Debug | LogLevel::Trace => emit!(debug),
        }
        let _ = self.tx.send(fault);
    }
}
