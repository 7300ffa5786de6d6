use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{
    fault::FaultSink,
    subscriber::{require_runtime, Wiring},
    worker::Outlet,
    Admission, Fault, Message, Publishable, SubscribeOptions, Subscription,
};
use crate::{
    bail, config::BusConfig, ensure, PublishError, ResultExt, ShortbusResult, SubscribeError,
};

/// Снимок счётчиков шины.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    /// Сообщений принято во входящую очередь (включая переопубликации).
    pub published: u64,
    /// Сообщений, предложенных маршрутизатором всем подпискам.
    pub routed: u64,
    /// Постановок во входящие очереди подписок.
    pub delivered: u64,
    pub subscriptions: usize,
}

/// Как указать подписку при отписке: по имени или по дескриптору.
#[derive(Debug, Clone)]
pub enum SubscriptionRef {
    Name(String),
    Handle(Subscription),
}

impl From<&str> for SubscriptionRef {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for SubscriptionRef {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<Subscription> for SubscriptionRef {
    fn from(handle: Subscription) -> Self {
        Self::Handle(handle)
    }
}

impl From<&Subscription> for SubscriptionRef {
    fn from(handle: &Subscription) -> Self {
        Self::Handle(handle.clone())
    }
}

struct Entry {
    seq: u64,
    subscription: Subscription,
}

/// Реестр подписок, общий для шины и маршрутизатора.
#[derive(Default)]
struct Registry {
    entries: DashMap<Arc<str>, Entry>,
}

impl Registry {
    /// Подписки в порядке регистрации.
    fn snapshot(&self) -> Vec<Subscription> {
        let mut entries: Vec<(u64, Subscription)> = self
            .entries
            .iter()
            .map(|e| (e.seq, e.subscription.clone()))
            .collect();
        entries.sort_unstable_by_key(|(seq, _)| *seq);
        entries.into_iter().map(|(_, s)| s).collect()
    }
}

#[derive(Debug, Default)]
struct RouterCounters {
    routed: AtomicU64,
    delivered: AtomicU64,
}

struct BusInner {
    config: BusConfig,
    registry: Arc<Registry>,
    inbound: mpsc::Sender<Message>,
    faults: FaultSink,
    published: Arc<AtomicU64>,
    counters: Arc<RouterCounters>,
    next_name: AtomicU64,
    next_seq: AtomicU64,
    /// Сериализует проверку имени и вставку в реестр.
    registering: Mutex<()>,
    cancel: CancellationToken,
    router: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for BusInner {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(router) = self.router.get_mut().take() {
            router.abort();
        }
    }
}

/// Внутрипроцессная шина публикации и подписки.
///
/// Дешёвый в клонировании дескриптор. При создании запускается задача
/// маршрутизатора: она забирает сообщения из входящей очереди в порядке
/// публикации и предлагает каждое всем подпискам в порядке регистрации.
/// Предложения одного сообщения выполняются параллельно, следующее сообщение
/// не предлагается, пока текущее не предложено всем, поэтому каждая подписка
/// видит свои сообщения в порядке публикации.
///
/// Обратная сторона: подписка с `DeliveryPolicy::Backpressure` и заполненной
/// входящей очередью задерживает следующее сообщение для всех подписок, пока
/// у неё не освободится место. Подписки, которые не должны тормозить
/// остальных, регистрируются с `DeliveryPolicy::DropNewest`.
///
/// Подписка, остановленная любым путём (`Subscription::stop`,
/// `HandlerError::Shutdown` из обработчика, уход последнего воркера),
/// удаляется из реестра сама, её имя снова свободно.
#[derive(Clone)]
pub struct Bus {
    inner: Arc<BusInner>,
}

impl Bus {
    /// Создаёт шину и запускает маршрутизатор. Требует рантайма tokio.
    pub fn new(config: BusConfig) -> ShortbusResult<Self> {
        config.validate().context("starting bus")?;
        require_runtime()?;

        let (tx, rx) = mpsc::channel(config.inbound_capacity);
        let registry = Arc::new(Registry::default());
        let counters = Arc::new(RouterCounters::default());
        let cancel = CancellationToken::new();

        let router = tokio::spawn(route(
            rx,
            registry.clone(),
            counters.clone(),
            cancel.clone(),
        ));

        info!(
            inbound_capacity = config.inbound_capacity,
            inbox_capacity = config.inbox_capacity,
            "bus started"
        );

        Ok(Self {
            inner: Arc::new(BusInner {
                faults: FaultSink::with_capacity(config.fault_channel_capacity),
                config,
                registry,
                inbound: tx,
                published: Arc::new(AtomicU64::new(0)),
                counters,
                next_name: AtomicU64::new(1),
                next_seq: AtomicU64::new(0),
                registering: Mutex::new(()),
                cancel,
                router: Mutex::new(Some(router)),
            }),
        })
    }

    pub fn with_defaults() -> ShortbusResult<Self> {
        Self::new(BusConfig::default())
    }

    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    /// Публикует сообщение.
    ///
    /// Ждёт, если входящая очередь заполнена. Возвращает сообщение, чтобы
    /// вызывающий мог читать его слот ответа.
    pub async fn publish(
        &self,
        input: impl Into<Publishable>,
    ) -> ShortbusResult<Message> {
        let message = Message::from_input(input).map_err(PublishError::from)?;
        self.enqueue(message).await
    }

    /// Публикует от имени `publisher`.
    pub async fn publish_as(
        &self,
        input: impl Into<Publishable>,
        publisher: impl Into<String>,
    ) -> ShortbusResult<Message> {
        let message = Message::from_input(input)
            .map_err(PublishError::from)?
            .with_publisher(publisher);
        self.enqueue(message).await
    }

    async fn enqueue(
        &self,
        message: Message,
    ) -> ShortbusResult<Message> {
        ensure!(!self.is_closed(), PublishError::Closed);
        if self.inner.inbound.send(message.clone()).await.is_err() {
            bail!(PublishError::Closed);
        }
        self.published(&message);
        Ok(message)
    }

    /// Публикация без ожидания: при заполненной очереди возвращает
    /// `PublishError::WouldBlock`, сообщение не теряется молча.
    pub fn try_publish(
        &self,
        input: impl Into<Publishable>,
    ) -> ShortbusResult<Message> {
        let message = Message::from_input(input).map_err(PublishError::from)?;
        ensure!(!self.is_closed(), PublishError::Closed);
        match self.inner.inbound.try_send(message.clone()) {
            Ok(()) => {
                self.published(&message);
                Ok(message)
            }
            Err(mpsc::error::TrySendError::Full(_)) => bail!(PublishError::WouldBlock {
                capacity: self.inner.config.inbound_capacity,
            }),
            Err(mpsc::error::TrySendError::Closed(_)) => bail!(PublishError::Closed),
        }
    }

    /// Публикация из синхронного кода вне рантайма (например, из
    /// `spawn_blocking`). Вызов изнутри асинхронного контекста паникует.
    pub fn blocking_publish(
        &self,
        input: impl Into<Publishable>,
    ) -> ShortbusResult<Message> {
        let message = Message::from_input(input).map_err(PublishError::from)?;
        ensure!(!self.is_closed(), PublishError::Closed);
        if self.inner.inbound.blocking_send(message.clone()).is_err() {
            bail!(PublishError::Closed);
        }
        self.published(&message);
        Ok(message)
    }

    fn published(
        &self,
        message: &Message,
    ) {
        self.inner.published.fetch_add(1, Ordering::Relaxed);
        debug!(
            topic = message.topic(),
            publisher = message.publisher(),
            message_id = %message.id(),
            "published"
        );
    }

    /// Регистрирует подписку и запускает её воркеры.
    ///
    /// Явное имя, уже занятое в реестре, даёт `SubscribeError::NameTaken`,
    /// если не задан `replace(true)`; тогда прежняя подписка останавливается.
    /// Без имени выдаётся `subscription-<n>`.
    pub fn subscribe(
        &self,
        options: SubscribeOptions,
    ) -> ShortbusResult<Subscription> {
        ensure!(!self.is_closed(), SubscribeError::BusClosed);
        options
            .validate()
            .context("validating subscription options")?;
        require_runtime()?;

        let inner = &self.inner;
        let _guard = inner.registering.lock();

        let name: Arc<str> = match options.explicit_name() {
            Some(name) => {
                ensure!(
                    options.replace || !inner.registry.entries.contains_key(name),
                    SubscribeError::NameTaken {
                        name: name.to_string(),
                    }
                );
                Arc::from(name)
            }
            None => loop {
                let n = inner.next_name.fetch_add(1, Ordering::Relaxed);
                let candidate: Arc<str> = Arc::from(format!("subscription-{n}"));
                if !inner.registry.entries.contains_key(&candidate) {
                    break candidate;
                }
            },
        };

        if let Some((_, old)) = inner.registry.entries.remove(&name) {
            info!(subscription = %name, "replacing subscription");
            let deadline = inner.config.stop_deadline();
            tokio::spawn(async move {
                old.subscription.stop(Some(deadline)).await;
            });
        }

        let subscription = Subscription::spawn(
            options,
            &inner.config,
            Wiring {
                name: name.clone(),
                outlet: Outlet::Bus {
                    tx: inner.inbound.clone(),
                    published: inner.published.clone(),
                },
                faults: inner.faults.clone(),
            },
        );
        inner.registry.entries.insert(
            name.clone(),
            Entry {
                seq: inner.next_seq.fetch_add(1, Ordering::Relaxed),
                subscription: subscription.clone(),
            },
        );

        let registry = Arc::downgrade(&inner.registry);
        let deadline = inner.config.stop_deadline();
        subscription.when_stopped(move |stopped| async move {
            // запись с тем же именем может уже принадлежать замене
            let removed = registry.upgrade().and_then(|registry| {
                registry
                    .entries
                    .remove_if(stopped.name(), |_, entry| entry.subscription.same(&stopped))
            });
            if removed.is_some() {
                info!(subscription = stopped.name(), "stopped subscription deregistered");
                stopped.stop(Some(deadline)).await;
            }
        });

        info!(subscription = %name, "subscribed");
        Ok(subscription)
    }

    /// Останавливает и удаляет подписку. `false`, если её нет в реестре.
    pub async fn unsubscribe(
        &self,
        target: impl Into<SubscriptionRef>,
    ) -> bool {
        let registry = &self.inner.registry;
        let removed = match target.into() {
            SubscriptionRef::Name(name) => registry.entries.remove(name.as_str()),
            SubscriptionRef::Handle(handle) => registry
                .entries
                .remove_if(handle.name(), |_, entry| entry.subscription.same(&handle)),
        };
        let Some((name, entry)) = removed else {
            return false;
        };
        entry
            .subscription
            .stop(Some(self.inner.config.stop_deadline()))
            .await;
        info!(subscription = %name, "unsubscribed");
        true
    }

    pub fn subscription(
        &self,
        name: &str,
    ) -> Option<Subscription> {
        self.inner
            .registry
            .entries
            .get(name)
            .map(|e| e.subscription.clone())
    }

    /// Имена подписок в порядке регистрации.
    pub fn subscription_names(&self) -> Vec<String> {
        self.inner
            .registry
            .snapshot()
            .iter()
            .map(|s| s.name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.registry.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.registry.entries.is_empty()
    }

    /// Поток сбоев всех подписок шины.
    pub fn faults(&self) -> broadcast::Receiver<Fault> {
        self.inner.faults.subscribe()
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.inner.published.load(Ordering::Relaxed),
            routed: self.inner.counters.routed.load(Ordering::Relaxed),
            delivered: self.inner.counters.delivered.load(Ordering::Relaxed),
            subscriptions: self.len(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Останавливает приём сообщений, все подписки и маршрутизатор.
    ///
    /// Сообщения, оставшиеся во входящей очереди, не доставляются.
    /// `deadline` передаётся в [`Subscription::stop`] каждой подписки.
    pub async fn shutdown(
        &self,
        deadline: Option<Duration>,
    ) {
        if self.inner.cancel.is_cancelled() {
            return;
        }
        self.inner.cancel.cancel();

        let subscriptions = self.inner.registry.snapshot();
        self.inner.registry.entries.clear();
        join_all(subscriptions.iter().map(|s| s.stop(deadline))).await;

        let router = self.inner.router.lock().take();
        if let Some(router) = router {
            let _ = router.await;
        }
        info!(
            subscriptions = subscriptions.len(),
            "bus shut down"
        );
    }
}

impl fmt::Debug for Bus {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Bus")
            .field("subscriptions", &self.subscription_names())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Цикл маршрутизатора.
async fn route(
    mut inbound: mpsc::Receiver<Message>,
    registry: Arc<Registry>,
    counters: Arc<RouterCounters>,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = inbound.recv() => match next {
                Some(message) => message,
                None => break,
            },
        };

        let targets = registry.snapshot();
        debug!(
            topic = message.topic(),
            message_id = %message.id(),
            subscriptions = targets.len(),
            "routing"
        );

        let offers = join_all(targets.iter().map(|s| s.check(&message)));
        let admissions = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            admissions = offers => admissions,
        };

        let delivered = admissions
            .iter()
            .filter(|a| **a == Admission::Queued)
            .count() as u64;
        counters.routed.fetch_add(1, Ordering::Relaxed);
        counters.delivered.fetch_add(delivered, Ordering::Relaxed);
    }
    debug!("router stopped");
}
