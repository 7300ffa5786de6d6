use std::{
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
};

use futures::FutureExt;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::{
    fault::{Fault, FaultKind, FaultSink},
    handler::{Handler, Outcome},
    subscriber::SubscriptionCounters,
    FaultPolicy, Message, MessageOptions,
};

/// Куда уходят переопубликованные сообщения.
#[derive(Debug, Clone)]
pub(crate) enum Outlet {
    /// Подписка без шины: результат обработчика отбрасывается.
    Detached,
    /// Входящая очередь шины и её счётчик публикаций.
    Bus {
        tx: mpsc::Sender<Message>,
        published: Arc<AtomicU64>,
    },
}

impl Outlet {
    /// Возвращает `Ok(true)`, если сообщение ушло в шину.
    pub async fn send(
        &self,
        message: Message,
    ) -> Result<bool, String> {
        match self {
            Self::Detached => {
                debug!(
                    topic = message.topic(),
                    publisher = message.publisher(),
                    "no bus attached, republish discarded"
                );
                Ok(false)
            }
            Self::Bus { tx, published } => {
                tx.send(message)
                    .await
                    .map_err(|_| "bus is shut down".to_string())?;
                published.fetch_add(1, Ordering::Relaxed);
                Ok(true)
            }
        }
    }
}

/// Один воркер подписки под надзором: перехват паник, отчёт о сбоях,
/// пауза по `FaultPolicy`.
pub(crate) struct Worker {
    pub index: usize,
    pub name: Arc<str>,
    pub handler: Handler,
    pub inbox: Arc<Mutex<mpsc::Receiver<Message>>>,
    pub cancel: CancellationToken,
    pub outlet: Outlet,
    pub faults: FaultSink,
    pub policy: FaultPolicy,
    pub stats: Arc<SubscriptionCounters>,
    /// Сколько воркеров подписки ещё не ушло на покой.
    pub alive: Arc<AtomicUsize>,
}

impl Worker {
    pub async fn run(self) {
        debug!(subscription = %self.name, worker = self.index, "worker started");
        let mut consecutive = 0u32;

        loop {
            let message = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                next = self.next() => match next {
                    Some(message) => message,
                    None => break,
                },
            };

            self.stats.runs.fetch_add(1, Ordering::Relaxed);
            trace!(
                subscription = %self.name,
                worker = self.index,
                topic = message.topic(),
                "invoking handler"
            );

            let fut = self.handler.invoke(message.clone());
            let kind = match AssertUnwindSafe(fut).catch_unwind().await {
                Err(panic) => Some(FaultKind::Panicked(panic_message(&*panic))),
                Ok(Outcome::Done) => None,
                Ok(Outcome::Republish(options)) => self.republish(options).await.err(),
                Ok(Outcome::Failed(reason)) => Some(FaultKind::Failed(reason)),
                Ok(Outcome::Shutdown) => {
                    self.cancel.cancel();
                    self.report(&message, FaultKind::ShutdownRequested);
                    break;
                }
            };

            let Some(kind) = kind else {
                consecutive = 0;
                continue;
            };

            consecutive = consecutive.saturating_add(1);
            self.stats.faults.fetch_add(1, Ordering::Relaxed);
            self.report(&message, kind);

            if self.policy.should_retire(consecutive) {
                self.report(&message, FaultKind::WorkerRetired { consecutive });
                // последний воркер уносит с собой всю подписку
                if self.alive.fetch_sub(1, Ordering::AcqRel) == 1 {
                    self.cancel.cancel();
                }
                break;
            }

            let delay = self.policy.delay_after(consecutive);
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        debug!(subscription = %self.name, worker = self.index, "worker stopped");
    }

    async fn next(&self) -> Option<Message> {
        self.inbox.lock().await.recv().await
    }

    /// Публикует результат обработчика от имени подписки.
    async fn republish(
        &self,
        options: MessageOptions,
    ) -> Result<(), FaultKind> {
        let options = options.publisher(self.name.as_ref());
        let message =
            Message::from_options(options).map_err(|err| FaultKind::Republish(err.to_string()))?;
        let topic = message.topic().to_string();

        let sent = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err("subscription stopped before republish".to_string()),
            sent = self.outlet.send(message) => sent,
        };
        if sent.map_err(FaultKind::Republish)? {
            self.stats.republished.fetch_add(1, Ordering::Relaxed);
            debug!(subscription = %self.name, topic, "republished");
        }
        Ok(())
    }

    fn report(
        &self,
        message: &Message,
        kind: FaultKind,
    ) {
        self.faults
            .report(Fault::new(&self.name, Some(message), kind));
    }
}

/// Текст паники из полезной нагрузки `catch_unwind`.
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
