use std::{
    any::Any,
    fmt,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use super::topic::{ANY_DEPTH, ANY_SEGMENT, TOPIC_DELIMITER};
use crate::{ReplyError, TopicError};

/// Непрозрачная полезная нагрузка сообщения.
///
/// Шина её не инспектирует; клонирование дешёвое (`Arc`).
#[derive(Clone)]
pub struct Payload {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl Payload {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            value: Arc::new(value),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Возвращает ссылку на значение, если оно имеет тип `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        (*self.value).downcast_ref::<T>()
    }

    pub fn is<T: Any>(&self) -> bool {
        (*self.value).is::<T>()
    }

    /// Имя исходного типа значения (для логов).
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl fmt::Debug for Payload {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        if let Some(s) = self.downcast_ref::<&'static str>() {
            write!(f, "{s:?}")
        } else if let Some(s) = self.downcast_ref::<String>() {
            write!(f, "{s:?}")
        } else if let Some(v) = self.downcast_ref::<serde_json::Value>() {
            write!(f, "{v}")
        } else if let Some(n) = self.downcast_ref::<i64>() {
            write!(f, "{n}")
        } else if let Some(b) = self.downcast_ref::<bool>() {
            write!(f, "{b}")
        } else if let Some(bytes) = self.downcast_ref::<Bytes>() {
            write!(f, "{bytes:?}")
        } else {
            write!(f, "<{}>", self.type_name)
        }
    }
}

impl From<&'static str> for Payload {
    fn from(value: &'static str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<Bytes> for Payload {
    fn from(value: Bytes) -> Self {
        Self::new(value)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Self::new(Bytes::from(value))
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Self::new(value)
    }
}

impl From<i64> for Payload {
    fn from(value: i64) -> Self {
        Self::new(value)
    }
}

impl From<bool> for Payload {
    fn from(value: bool) -> Self {
        Self::new(value)
    }
}

/// Полная форма описания сообщения: топик, нагрузка, издатель.
#[derive(Debug, Clone)]
pub struct MessageOptions {
    pub topic: String,
    pub payload: Option<Payload>,
    pub publisher: Option<String>,
}

impl MessageOptions {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: None,
            publisher: None,
        }
    }

    pub fn payload(
        mut self,
        payload: impl Into<Payload>,
    ) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn publisher(
        mut self,
        publisher: impl Into<String>,
    ) -> Self {
        self.publisher = Some(publisher.into());
        self
    }
}

/// Закрытый набор входных форм для публикации.
#[derive(Debug, Clone)]
pub enum Publishable {
    /// Только топик.
    Topic(String),
    /// Топик и нагрузка.
    WithPayload(String, Payload),
    /// Полное описание.
    Options(MessageOptions),
    /// Уже собранное сообщение (слот ответа сохраняется).
    Message(Message),
}

impl From<&str> for Publishable {
    fn from(topic: &str) -> Self {
        Self::Topic(topic.to_string())
    }
}

impl From<String> for Publishable {
    fn from(topic: String) -> Self {
        Self::Topic(topic)
    }
}

impl<S: Into<String>, P: Into<Payload>> From<(S, P)> for Publishable {
    fn from((topic, payload): (S, P)) -> Self {
        Self::WithPayload(topic.into(), payload.into())
    }
}

impl From<MessageOptions> for Publishable {
    fn from(options: MessageOptions) -> Self {
        Self::Options(options)
    }
}

impl From<Message> for Publishable {
    fn from(message: Message) -> Self {
        Self::Message(message)
    }
}

impl From<&Message> for Publishable {
    fn from(message: &Message) -> Self {
        Self::Message(message.clone())
    }
}

/// Проверяет топик публикуемого сообщения.
pub fn validate_topic(topic: &str) -> Result<(), TopicError> {
    if topic.is_empty() {
        return Err(TopicError::Empty);
    }
    for (position, segment) in topic.split(TOPIC_DELIMITER).enumerate() {
        if segment.is_empty() {
            return Err(TopicError::EmptySegment {
                topic: topic.to_string(),
                position,
            });
        }
        if segment == ANY_SEGMENT || segment == ANY_DEPTH {
            return Err(TopicError::Wildcard {
                topic: topic.to_string(),
                position,
            });
        }
    }
    Ok(())
}

struct Envelope {
    id: Uuid,
    topic: Arc<str>,
    payload: Option<Payload>,
    publisher: Option<Arc<str>>,
}

/// Блокирующий канал ответов, встроенный в каждое сообщение.
///
/// Несколько писателей, несколько читателей; каждый читатель забирает одно
/// значение.
struct ReplySlot {
    tx: mpsc::UnboundedSender<Payload>,
    rx: Mutex<mpsc::UnboundedReceiver<Payload>>,
    pending: AtomicUsize,
}

impl ReplySlot {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
            pending: AtomicUsize::new(0),
        }
    }
}

/// Неизменяемый конверт сообщения плюс слот ответа.
///
/// Все клоны разделяют один конверт и один слот ответа.
#[derive(Clone)]
pub struct Message {
    envelope: Arc<Envelope>,
    reply: Arc<ReplySlot>,
}

impl Message {
    /// Сообщение без нагрузки и издателя.
    pub fn new(topic: impl Into<String>) -> Result<Self, TopicError> {
        Self::from_options(MessageOptions::new(topic))
    }

    pub fn with_payload(
        topic: impl Into<String>,
        payload: impl Into<Payload>,
    ) -> Result<Self, TopicError> {
        Self::from_options(MessageOptions::new(topic).payload(payload))
    }

    pub fn from_options(options: MessageOptions) -> Result<Self, TopicError> {
        validate_topic(&options.topic)?;
        Ok(Self {
            envelope: Arc::new(Envelope {
                id: Uuid::new_v4(),
                topic: Arc::from(options.topic),
                payload: options.payload,
                publisher: options.publisher.map(Arc::from),
            }),
            reply: Arc::new(ReplySlot::new()),
        })
    }

    /// Единая точка нормализации входа публикации.
    pub fn from_input(input: impl Into<Publishable>) -> Result<Self, TopicError> {
        match input.into() {
            Publishable::Topic(topic) => Self::new(topic),
            Publishable::WithPayload(topic, payload) => Self::with_payload(topic, payload),
            Publishable::Options(options) => Self::from_options(options),
            Publishable::Message(message) => Ok(message),
        }
    }

    /// Тот же конверт (id, топик, нагрузка) и тот же слот ответа, но с другим
    /// издателем.
    pub fn with_publisher(
        &self,
        publisher: impl Into<String>,
    ) -> Self {
        let publisher: String = publisher.into();
        Self {
            envelope: Arc::new(Envelope {
                id: self.envelope.id,
                topic: self.envelope.topic.clone(),
                payload: self.envelope.payload.clone(),
                publisher: Some(Arc::from(publisher)),
            }),
            reply: self.reply.clone(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.envelope.id
    }

    pub fn topic(&self) -> &str {
        &self.envelope.topic
    }

    pub fn payload(&self) -> Option<&Payload> {
        self.envelope.payload.as_ref()
    }

    /// Нагрузка, приведённая к `T`, если она есть и имеет этот тип.
    pub fn payload_as<T: Any>(&self) -> Option<&T> {
        self.payload().and_then(Payload::downcast_ref::<T>)
    }

    /// Идентичность издателя; `None` — анонимная публикация.
    pub fn publisher(&self) -> Option<&str> {
        self.envelope.publisher.as_deref()
    }

    /// Кладёт значение в слот ответа.
    pub fn reply(
        &self,
        value: impl Into<Payload>,
    ) {
        // отправитель живёт в том же слоте, канал не может быть закрыт
        if self.reply.tx.send(value.into()).is_ok() {
            self.reply.pending.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Ждёт следующее значение из слота ответа.
    pub async fn recv_reply(&self) -> Option<Payload> {
        let value = self.reply.rx.lock().await.recv().await;
        if value.is_some() {
            self.reply.pending.fetch_sub(1, Ordering::AcqRel);
        }
        value
    }

    /// Ждёт ответ не дольше `timeout`.
    pub async fn recv_reply_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Payload, ReplyError> {
        match tokio::time::timeout(timeout, self.recv_reply()).await {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Err(ReplyError::Empty),
            Err(_) => Err(ReplyError::Timeout { waited: timeout }),
        }
    }

    /// Забирает ответ без ожидания.
    ///
    /// Если слот сейчас читает другой ожидающий читатель, возвращает
    /// `ReplyError::Empty`.
    pub fn try_recv_reply(&self) -> Result<Payload, ReplyError> {
        let mut rx = self.reply.rx.try_lock().map_err(|_| ReplyError::Empty)?;
        let value = rx.try_recv().map_err(|_| ReplyError::Empty)?;
        self.reply.pending.fetch_sub(1, Ordering::AcqRel);
        Ok(value)
    }

    /// Количество ответов, ещё не прочитанных из слота.
    pub fn pending_replies(&self) -> usize {
        self.reply.pending.load(Ordering::Acquire)
    }

    /// Разделяют ли два сообщения один слот ответа.
    pub fn shares_reply_slot(
        &self,
        other: &Message,
    ) -> bool {
        Arc::ptr_eq(&self.reply, &other.reply)
    }
}

impl fmt::Display for Message {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}", self.envelope.topic)
    }
}

impl fmt::Debug for Message {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.envelope.id)
            .field("topic", &self.envelope.topic)
            .field("publisher", &self.envelope.publisher)
            .field("payload", &self.envelope.payload)
            .finish()
    }
}
