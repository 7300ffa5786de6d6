use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc, Weak,
    },
    time::Duration,
};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{broadcast, mpsc, Mutex as AsyncMutex},
    task::{self, JoinHandle},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::{
    fault::{Fault, FaultKind, FaultSink},
    worker::{Outlet, Worker},
    FaultPolicy, Handler, Message, PatternSpec, TopicPattern,
};
use crate::{config::BusConfig, ensure, ShortbusResult, StatusCode, SubscribeError};

/// Что делать, когда входящая очередь подписки заполнена.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryPolicy {
    /// Маршрутизатор ждёт свободного места (по умолчанию).
    #[default]
    Backpressure,
    /// Сообщение отбрасывается, в канал ошибок уходит `Overflow`.
    DropNewest,
}

/// Результат предложения сообщения подписке.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Сообщение поставлено во входящую очередь.
    Queued,
    /// Не прошло фильтр топика или издателя.
    Filtered,
    /// Отклонено защитой от рекурсии.
    Recursion,
    /// Очередь заполнена при `DeliveryPolicy::DropNewest`.
    Dropped,
    /// Подписка остановлена.
    Stopped,
}

/// Параметры регистрации подписки.
///
/// Незаданные поля берутся из `BusConfig` шины.
#[derive(Debug, Clone)]
pub struct SubscribeOptions {
    pub(crate) handler: Handler,
    pub(crate) topic_filter: Option<PatternSpec>,
    pub(crate) publisher_filter: Option<PatternSpec>,
    pub(crate) recursive: bool,
    pub(crate) concurrency: Option<usize>,
    pub(crate) name: Option<String>,
    pub(crate) inbox_capacity: Option<usize>,
    pub(crate) delivery: Option<DeliveryPolicy>,
    pub(crate) fault_policy: Option<FaultPolicy>,
    pub(crate) replace: bool,
}

impl SubscribeOptions {
    pub fn new(handler: Handler) -> Self {
        Self {
            handler,
            topic_filter: None,
            publisher_filter: None,
            recursive: false,
            concurrency: None,
            name: None,
            inbox_capacity: None,
            delivery: None,
            fault_policy: None,
            replace: false,
        }
    }

    pub fn topic_filter(
        mut self,
        spec: impl Into<PatternSpec>,
    ) -> Self {
        self.topic_filter = Some(spec.into());
        self
    }

    pub fn publisher_filter(
        mut self,
        spec: impl Into<PatternSpec>,
    ) -> Self {
        self.publisher_filter = Some(spec.into());
        self
    }

    /// Разрешает получать собственные публикации.
    pub fn recursive(
        mut self,
        recursive: bool,
    ) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn concurrency(
        mut self,
        concurrency: usize,
    ) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    pub fn name(
        mut self,
        name: impl Into<String>,
    ) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn inbox_capacity(
        mut self,
        capacity: usize,
    ) -> Self {
        self.inbox_capacity = Some(capacity);
        self
    }

    pub fn delivery(
        mut self,
        delivery: DeliveryPolicy,
    ) -> Self {
        self.delivery = Some(delivery);
        self
    }

    pub fn fault_policy(
        mut self,
        policy: FaultPolicy,
    ) -> Self {
        self.fault_policy = Some(policy);
        self
    }

    /// Разрешает заменить уже зарегистрированную подписку с тем же именем.
    pub fn replace(
        mut self,
        replace: bool,
    ) -> Self {
        self.replace = replace;
        self
    }

    pub fn explicit_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Проверка параметров до запуска воркеров.
    pub fn validate(&self) -> ShortbusResult<()> {
        if let Some(name) = &self.name {
            ensure!(!name.trim().is_empty(), SubscribeError::EmptyName);
        }
        if let Some(value) = self.concurrency {
            ensure!(value >= 1, SubscribeError::InvalidConcurrency { value });
        }
        if let Some(value) = self.inbox_capacity {
            ensure!(value >= 1, SubscribeError::InvalidCapacity { value });
        }
        if let Some(policy) = &self.fault_policy {
            let backoff = &policy.backoff;
            ensure!(
                policy.max_consecutive_faults != Some(0),
                fault_policy("max_consecutive_faults must be at least 1 when set")
            );
            ensure!(
                backoff.first <= backoff.max,
                fault_policy("backoff.first exceeds backoff.max")
            );
            ensure!(
                backoff.factor.is_finite() && backoff.factor >= 1.0,
                fault_policy("backoff.factor must be a finite number >= 1.0")
            );
        }
        Ok(())
    }
}

fn fault_policy(reason: &str) -> SubscribeError {
    SubscribeError::InvalidFaultPolicy {
        reason: reason.to_string(),
    }
}

#[derive(Debug, Default)]
pub(crate) struct SubscriptionCounters {
    pub received: AtomicU64,
    pub runs: AtomicU64,
    pub faults: AtomicU64,
    pub dropped: AtomicU64,
    pub republished: AtomicU64,
}

/// Снимок счётчиков подписки.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    /// Поставлено во входящую очередь.
    pub received: u64,
    /// Вызовов обработчика.
    pub runs: u64,
    pub faults: u64,
    /// Отброшено из-за переполнения.
    pub dropped: u64,
    pub republished: u64,
}

/// Связь подписки с внешним миром при запуске.
pub(crate) struct Wiring {
    pub name: Arc<str>,
    pub outlet: Outlet,
    pub faults: FaultSink,
}

struct SubscriptionInner {
    name: Arc<str>,
    topic_filter: RwLock<TopicPattern>,
    publisher_filter: RwLock<Option<TopicPattern>>,
    recursive: bool,
    concurrency: usize,
    delivery: DeliveryPolicy,
    inbox_capacity: usize,
    inbox: mpsc::Sender<Message>,
    cancel: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_ids: Vec<task::Id>,
    /// Отменяется, когда воркеры дождались или прерваны.
    joined: CancellationToken,
    stats: Arc<SubscriptionCounters>,
    faults: FaultSink,
}

impl Drop for SubscriptionInner {
    fn drop(&mut self) {
        self.cancel.cancel();
        for handle in self.workers.get_mut().drain(..) {
            handle.abort();
        }
    }
}

/// Зарегистрированный интерес: фильтры, обработчик и пул воркеров.
///
/// Дешёвый в клонировании дескриптор. Когда исчезает последний клон,
/// воркеры отменяются и прерываются.
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<SubscriptionInner>,
}

static STANDALONE_IDS: AtomicU64 = AtomicU64::new(1);

/// Шина и подписки запускают задачи tokio, без рантайма работать нельзя.
pub(crate) fn require_runtime() -> ShortbusResult<()> {
    ensure!(
        tokio::runtime::Handle::try_current().is_ok(),
        StatusCode::Unsupported,
        "a running tokio runtime is required"
    );
    Ok(())
}

impl Subscription {
    /// Самостоятельная подписка без шины.
    ///
    /// Переопубликации отбрасываются (с записью в лог). Требует запущенного
    /// рантайма tokio.
    pub fn new(options: SubscribeOptions) -> ShortbusResult<Self> {
        options.validate()?;
        require_runtime()?;
        let config = BusConfig::default();
        let name = match options.explicit_name() {
            Some(name) => Arc::from(name),
            None => Arc::from(format!(
                "subscription-{}",
                STANDALONE_IDS.fetch_add(1, Ordering::Relaxed)
            )),
        };
        let wiring = Wiring {
            name,
            outlet: Outlet::Detached,
            faults: FaultSink::with_capacity(config.fault_channel_capacity),
        };
        Ok(Self::spawn(options, &config, wiring))
    }

    /// Запускает воркеры. Параметры должны быть уже проверены.
    pub(crate) fn spawn(
        options: SubscribeOptions,
        config: &BusConfig,
        wiring: Wiring,
    ) -> Self {
        let concurrency = options.concurrency.unwrap_or(config.default_concurrency);
        let inbox_capacity = options.inbox_capacity.unwrap_or(config.inbox_capacity);
        let delivery = options.delivery.unwrap_or(config.delivery);
        let policy = options.fault_policy.unwrap_or_else(|| config.fault_policy());
        let topic_filter = TopicPattern::compile(
            options
                .topic_filter
                .unwrap_or_else(|| config.default_topic_filter()),
        );
        let publisher_filter = options
            .publisher_filter
            .or_else(|| config.default_publisher_filter())
            .map(TopicPattern::compile);

        let (tx, rx) = mpsc::channel(inbox_capacity);
        let inbox = Arc::new(AsyncMutex::new(rx));
        let cancel = CancellationToken::new();
        let stats = Arc::new(SubscriptionCounters::default());
        let alive = Arc::new(AtomicUsize::new(concurrency));

        let workers: Vec<JoinHandle<()>> = (0..concurrency)
            .map(|index| {
                let worker = Worker {
                    index,
                    name: wiring.name.clone(),
                    handler: options.handler.clone(),
                    inbox: inbox.clone(),
                    cancel: cancel.clone(),
                    outlet: wiring.outlet.clone(),
                    faults: wiring.faults.clone(),
                    policy,
                    stats: stats.clone(),
                    alive: alive.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();
        let worker_ids = workers.iter().map(JoinHandle::id).collect();

        debug!(
            subscription = %wiring.name,
            concurrency,
            inbox_capacity,
            ?topic_filter,
            "subscription started"
        );

        Self {
            inner: Arc::new(SubscriptionInner {
                name: wiring.name,
                topic_filter: RwLock::new(topic_filter),
                publisher_filter: RwLock::new(publisher_filter),
                recursive: options.recursive,
                concurrency,
                delivery,
                inbox_capacity,
                inbox: tx,
                cancel,
                workers: Mutex::new(workers),
                worker_ids,
                joined: CancellationToken::new(),
                stats,
                faults: wiring.faults,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn concurrency(&self) -> usize {
        self.inner.concurrency
    }

    pub fn recursive(&self) -> bool {
        self.inner.recursive
    }

    pub fn delivery(&self) -> DeliveryPolicy {
        self.inner.delivery
    }

    pub fn inbox_capacity(&self) -> usize {
        self.inner.inbox_capacity
    }

    /// Сообщения, ожидающие воркера.
    pub fn queued(&self) -> usize {
        self.inner.inbox_capacity - self.inner.inbox.capacity()
    }

    /// Чистый предикат допуска: фильтры и защита от рекурсии.
    pub fn matches(
        &self,
        message: &Message,
    ) -> bool {
        self.screen(message) == Admission::Queued
    }

    fn screen(
        &self,
        message: &Message,
    ) -> Admission {
        if !self.inner.topic_filter.read().matches(message.topic()) {
            return Admission::Filtered;
        }
        let publisher_ok = match (&*self.inner.publisher_filter.read(), message.publisher()) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(filter), Some(publisher)) => filter.matches(publisher),
        };
        if !publisher_ok {
            return Admission::Filtered;
        }
        if !self.inner.recursive && message.publisher() == Some(self.name()) {
            return Admission::Recursion;
        }
        Admission::Queued
    }

    /// Предлагает сообщение подписке.
    ///
    /// При `Backpressure` ждёт свободного места во входящей очереди (или
    /// остановки подписки); при `DropNewest` не ждёт никогда.
    pub async fn check(
        &self,
        message: &Message,
    ) -> Admission {
        if self.is_stopped() {
            return Admission::Stopped;
        }
        let admission = match self.screen(message) {
            Admission::Queued => self.enqueue(message.clone()).await,
            other => other,
        };
        trace!(
            subscription = %self.inner.name,
            topic = message.topic(),
            ?admission,
            "offered"
        );
        admission
    }

    async fn enqueue(
        &self,
        message: Message,
    ) -> Admission {
        let inner = &self.inner;
        let sent = match inner.delivery {
            DeliveryPolicy::Backpressure => tokio::select! {
                biased;
                _ = inner.cancel.cancelled() => return Admission::Stopped,
                sent = inner.inbox.send(message) => sent.is_ok(),
            },
            DeliveryPolicy::DropNewest => match inner.inbox.try_send(message) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(message)) => {
                    inner.stats.dropped.fetch_add(1, Ordering::Relaxed);
                    inner.faults.report(Fault::new(
                        &inner.name,
                        Some(&message),
                        FaultKind::Overflow,
                    ));
                    return Admission::Dropped;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            },
        };
        if sent {
            inner.stats.received.fetch_add(1, Ordering::Relaxed);
            Admission::Queued
        } else {
            Admission::Stopped
        }
    }

    pub fn add_topic_filter(
        &self,
        spec: impl Into<PatternSpec>,
    ) {
        self.inner.topic_filter.write().add(spec);
    }

    /// Возвращает количество удалённых шаблонов.
    pub fn remove_topic_filter(
        &self,
        spec: impl Into<PatternSpec>,
    ) -> usize {
        self.inner.topic_filter.write().remove(spec)
    }

    pub fn set_publisher_filter(
        &self,
        spec: impl Into<PatternSpec>,
    ) {
        *self.inner.publisher_filter.write() = Some(TopicPattern::compile(spec));
    }

    pub fn clear_publisher_filter(&self) {
        *self.inner.publisher_filter.write() = None;
    }

    pub fn topic_filter_sources(&self) -> Vec<String> {
        self.inner
            .topic_filter
            .read()
            .sources()
            .into_iter()
            .map(String::from)
            .collect()
    }

    /// Поток сбоев этой подписки (для подписок на шине — общий поток шины).
    pub fn faults(&self) -> broadcast::Receiver<Fault> {
        self.inner.faults.subscribe()
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Останавливает воркеры.
    ///
    /// Текущие вызовы обработчика дорабатывают; по истечении `deadline`
    /// оставшиеся воркеры прерываются. `None` ждёт без ограничения.
    /// Возвращает `false`, если пришлось прерывать (или если параллельный
    /// вызов не уложился в `deadline`).
    ///
    /// Можно вызывать из обработчика этой же подписки: воркер, выполняющий
    /// вызов, не ждёт сам себя и завершается после возврата из обработчика.
    /// Повторные вызовы ждут, пока первый дождётся воркеров.
    pub async fn stop(
        &self,
        deadline: Option<Duration>,
    ) -> bool {
        let inner = &self.inner;
        inner.cancel.cancel();

        let caller = task::try_id();
        let from_worker = caller.is_some_and(|id| inner.worker_ids.contains(&id));
        let mut handles: Vec<JoinHandle<()>> = std::mem::take(&mut *inner.workers.lock());

        if handles.is_empty() {
            if from_worker {
                return true;
            }
            return within(deadline, inner.joined.cancelled()).await;
        }

        let _joined = inner.joined.clone().drop_guard();
        // собственный воркер отпускается: join на себе не завершится
        handles.retain(|handle| Some(handle.id()) != caller);

        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        let graceful = within(deadline, futures::future::join_all(handles)).await;

        if !graceful {
            warn!(
                subscription = %inner.name,
                ?deadline,
                "workers did not finish in time, aborting"
            );
            for abort in aborts {
                abort.abort();
            }
        }
        debug!(subscription = %inner.name, graceful, from_worker, "subscription stopped");
        graceful
    }

    /// Запускает `f`, когда подписка остановится любым путём, если к тому
    /// моменту на неё ещё есть ссылки.
    pub(crate) fn when_stopped<F, Fut>(
        &self,
        f: F,
    ) where
        F: FnOnce(Subscription) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let cancel = self.inner.cancel.clone();
        let weak: Weak<SubscriptionInner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            cancel.cancelled().await;
            if let Some(inner) = weak.upgrade() {
                f(Subscription { inner }).await;
            }
        });
    }

    pub fn stats(&self) -> SubscriptionStats {
        let s = &self.inner.stats;
        SubscriptionStats {
            received: s.received.load(Ordering::Relaxed),
            runs: s.runs.load(Ordering::Relaxed),
            faults: s.faults.load(Ordering::Relaxed),
            dropped: s.dropped.load(Ordering::Relaxed),
            republished: s.republished.load(Ordering::Relaxed),
        }
    }

    /// Один и тот же ли это экземпляр подписки.
    pub fn same(
        &self,
        other: &Subscription,
    ) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// `true`, если `fut` завершился до `deadline`.
async fn within<F: std::future::Future>(
    deadline: Option<Duration>,
    fut: F,
) -> bool {
    match deadline {
        None => {
            fut.await;
            true
        }
        Some(deadline) => tokio::time::timeout(deadline, fut).await.is_ok(),
    }
}

impl fmt::Debug for Subscription {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("name", &self.inner.name)
            .field("topic_filter", &*self.inner.topic_filter.read())
            .field("recursive", &self.inner.recursive)
            .field("concurrency", &self.inner.concurrency)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::timeout;

    use super::*;
    use crate::MessageOptions;

    fn echo() -> Handler {
        Handler::consumer(|msg: Message| async move {
            msg.reply(msg.topic().to_string());
        })
    }

    #[tokio::test]
    async fn test_validate_options() {
        let err = Subscription::new(SubscribeOptions::new(echo()).concurrency(0)).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::InvalidConcurrency);

        let err = Subscription::new(SubscribeOptions::new(echo()).inbox_capacity(0)).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::InvalidCapacity);

        let err = Subscription::new(SubscribeOptions::new(echo()).name("  ")).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::InvalidName);
    }

    /// Тест проверяет, что политика сбоев подписки проверяется так же, как
    /// в `BusConfig`.
    #[tokio::test]
    async fn test_validate_fault_policy() {
        let with_policy = |policy: FaultPolicy| SubscribeOptions::new(echo()).fault_policy(policy);

        let never_tolerate = FaultPolicy {
            max_consecutive_faults: Some(0),
            ..FaultPolicy::default()
        };
        let err = Subscription::new(with_policy(never_tolerate)).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::InvalidArgs);

        let mut inverted = FaultPolicy::default();
        inverted.backoff.first = Duration::from_secs(2);
        inverted.backoff.max = Duration::from_secs(1);
        let err = Subscription::new(with_policy(inverted)).unwrap_err();
        assert_eq!(
            err.downcast_ref::<SubscribeError>(),
            Some(&SubscribeError::InvalidFaultPolicy {
                reason: "backoff.first exceeds backoff.max".to_string(),
            })
        );

        let mut shrinking = FaultPolicy::default();
        shrinking.backoff.factor = 0.5;
        assert!(with_policy(shrinking).validate().is_err());

        let sub = Subscription::new(with_policy(FaultPolicy {
            max_consecutive_faults: Some(1),
            ..FaultPolicy::default()
        }))
        .unwrap();
        sub.stop(None).await;
    }

    /// Тест проверяет фильтры топика и издателя и защиту от рекурсии.
    #[tokio::test]
    async fn test_matches() {
        let sub = Subscription::new(
            SubscribeOptions::new(echo())
                .name("S")
                .topic_filter("Orders::*")
                .publisher_filter(["S", "billing"]),
        )
        .unwrap();

        let from = |topic: &str, publisher: &str| {
            Message::from_options(MessageOptions::new(topic).publisher(publisher)).unwrap()
        };

        assert!(sub.matches(&from("Orders::Created", "billing")));
        assert!(!sub.matches(&from("Orders::Created", "stranger")));
        assert!(!sub.matches(&from("Billing::Created", "billing")));
        // анонимное сообщение не проходит заданный фильтр издателя
        assert!(!sub.matches(&Message::new("Orders::Created").unwrap()));
        // собственная публикация отсекается защитой от рекурсии
        assert_eq!(
            sub.check(&from("Orders::Created", "S")).await,
            Admission::Recursion
        );

        sub.clear_publisher_filter();
        assert!(sub.matches(&Message::new("Orders::Created").unwrap()));
        sub.stop(None).await;
    }

    #[tokio::test]
    async fn test_recursive_opt_in() {
        let sub = Subscription::new(
            SubscribeOptions::new(echo())
                .name("S")
                .recursive(true),
        )
        .unwrap();
        let own = Message::from_options(MessageOptions::new("Any::Thing").publisher("S")).unwrap();
        assert!(sub.matches(&own));
        sub.stop(None).await;
    }

    #[tokio::test]
    async fn test_check_runs_handler() {
        let sub = Subscription::new(SubscribeOptions::new(echo()).topic_filter("A::**")).unwrap();
        assert!(sub.name().starts_with("subscription-"));

        let msg = Message::new("A::B").unwrap();
        assert_eq!(sub.check(&msg).await, Admission::Queued);
        assert_eq!(sub.check(&Message::new("B").unwrap()).await, Admission::Filtered);

        let reply = msg
            .recv_reply_timeout(Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply.downcast_ref::<String>().map(String::as_str), Some("A::B"));
        assert_eq!(sub.stats().received, 1);
        sub.stop(None).await;
    }

    /// Тест проверяет отбрасывание при переполнении и отчёт `Overflow`.
    #[tokio::test]
    async fn test_drop_newest_reports_overflow() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let handler = {
            let gate = gate.clone();
            Handler::consumer(move |_msg: Message| {
                let gate = gate.clone();
                async move { gate.notified().await }
            })
        };
        let sub = Subscription::new(
            SubscribeOptions::new(handler)
                .inbox_capacity(1)
                .delivery(DeliveryPolicy::DropNewest),
        )
        .unwrap();
        let mut faults = sub.faults();

        // первое сообщение забирает воркер, второе занимает очередь
        assert_eq!(sub.check(&Message::new("M::1").unwrap()).await, Admission::Queued);
        timeout(Duration::from_secs(1), async {
            while sub.stats().runs == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(sub.check(&Message::new("M::2").unwrap()).await, Admission::Queued);
        assert_eq!(sub.check(&Message::new("M::3").unwrap()).await, Admission::Dropped);

        let fault = faults.recv().await.unwrap();
        assert_eq!(fault.kind, FaultKind::Overflow);
        assert_eq!(fault.topic.as_deref(), Some("M::3"));
        assert_eq!(sub.stats().dropped, 1);

        gate.notify_waiters();
        sub.stop(Some(Duration::from_millis(50))).await;
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let sub = Subscription::new(SubscribeOptions::new(echo()).concurrency(3)).unwrap();
        assert!(!sub.is_stopped());
        assert!(sub.stop(Some(Duration::from_secs(1))).await);
        assert!(sub.is_stopped());
        assert!(sub.stop(None).await);
        assert_eq!(
            sub.check(&Message::new("A").unwrap()).await,
            Admission::Stopped
        );
    }

    /// Тест проверяет принудительное прерывание зависшего обработчика.
    #[tokio::test]
    async fn test_stop_deadline_aborts_stuck_handler() {
        let handler = Handler::consumer(|_msg: Message| async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        let sub = Subscription::new(SubscribeOptions::new(handler)).unwrap();
        sub.check(&Message::new("Slow").unwrap()).await;
        timeout(Duration::from_secs(1), async {
            while sub.stats().runs == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        assert!(!sub.stop(Some(Duration::from_millis(20))).await);
        assert!(sub.is_stopped());
    }

    /// Тест проверяет, что обработчик может остановить собственную подписку
    /// и вызов возвращается.
    #[tokio::test]
    async fn test_stop_from_own_handler() {
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let (done_tx, mut done_rx) = mpsc::channel::<bool>(1);
        let handler = {
            let slot = slot.clone();
            Handler::consumer(move |_msg: Message| {
                let own = slot.lock().clone();
                let done_tx = done_tx.clone();
                async move {
                    if let Some(own) = own {
                        let graceful = own.stop(None).await;
                        let _ = done_tx.send(graceful).await;
                    }
                }
            })
        };
        let sub = Subscription::new(SubscribeOptions::new(handler).concurrency(2)).unwrap();
        *slot.lock() = Some(sub.clone());

        sub.check(&Message::new("Quit").unwrap()).await;
        let graceful = timeout(Duration::from_secs(2), done_rx.recv())
            .await
            .unwrap();
        assert_eq!(graceful, Some(true));
        assert!(sub.is_stopped());

        slot.lock().take();
        assert!(timeout(Duration::from_secs(1), sub.stop(None)).await.unwrap());
    }

    /// Тест проверяет, что второй параллельный `stop` ждёт воркеров, а не
    /// возвращается сразу.
    #[tokio::test]
    async fn test_concurrent_stop_waits_for_workers() {
        let finished = Arc::new(AtomicUsize::new(0));
        let handler = {
            let finished = finished.clone();
            Handler::consumer(move |_msg: Message| {
                let finished = finished.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                }
            })
        };
        let sub = Subscription::new(SubscribeOptions::new(handler)).unwrap();
        sub.check(&Message::new("Slow").unwrap()).await;
        timeout(Duration::from_secs(1), async {
            while sub.stats().runs == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        let (first, second) = tokio::join!(sub.stop(None), async {
            tokio::task::yield_now().await;
            let graceful = sub.stop(None).await;
            (graceful, finished.load(Ordering::SeqCst))
        });
        assert!(first);
        assert_eq!(second, (true, 1));

        // повторный вызов с коротким сроком тоже не ждёт зря
        assert!(sub.stop(Some(Duration::from_millis(10))).await);
    }

    #[tokio::test]
    async fn test_filters_mutable_after_registration() {
        let sub = Subscription::new(SubscribeOptions::new(echo()).topic_filter("A")).unwrap();
        let b = Message::new("B::C").unwrap();
        assert!(!sub.matches(&b));

        sub.add_topic_filter("B::*");
        assert!(sub.matches(&b));
        assert_eq!(sub.topic_filter_sources(), vec!["A", "B::*"]);

        assert_eq!(sub.remove_topic_filter("B::*"), 1);
        assert!(!sub.matches(&b));

        sub.set_publisher_filter("svc::**");
        let tagged = b.with_publisher("svc::orders");
        sub.add_topic_filter("B::C");
        assert!(sub.matches(&tagged));
        assert!(!sub.matches(&b));
        sub.stop(None).await;
    }
}
