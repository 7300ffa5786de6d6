use std::sync::Arc;

use tracing::info;

use super::{Bus, Handler, Message, PatternSpec, SubscribeOptions, Subscription};
use crate::ShortbusResult;

/// Подпись вместо отсутствующего издателя.
pub const ANONYMOUS_PUBLISHER: &str = "*ANONYMOUS*";

/// Параметры монитора.
#[derive(Debug, Clone)]
pub struct MonitorOptions {
    pub name: String,
    pub topic_filter: PatternSpec,
    pub publisher_filter: Option<PatternSpec>,
    pub suppress_payload: bool,
    pub suppress_publisher: bool,
    pub concurrency: usize,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            name: "shortbus-monitor".to_string(),
            topic_filter: PatternSpec::Any,
            publisher_filter: None,
            suppress_payload: false,
            suppress_publisher: false,
            concurrency: 1,
        }
    }
}

/// Подписка, которая пишет в лог каждое подходящее сообщение.
///
/// Видит и собственные переопубликации других подписок, но сама ничего не
/// публикует.
#[derive(Debug)]
pub struct Monitor {
    bus: Bus,
    subscription: Subscription,
}

impl Monitor {
    pub fn attach(
        bus: &Bus,
        options: MonitorOptions,
    ) -> ShortbusResult<Self> {
        let settings = Arc::new(options.clone());
        let handler = Handler::consumer(move |message: Message| {
            let settings = settings.clone();
            async move {
                info!(
                    target: "shortbus::monitor",
                    monitor = %settings.name,
                    message_id = %message.id(),
                    "{}",
                    render(&message, &settings)
                );
            }
        });

        let mut subscribe = SubscribeOptions::new(handler)
            .name(options.name)
            .topic_filter(options.topic_filter)
            .concurrency(options.concurrency);
        if let Some(publisher_filter) = options.publisher_filter {
            subscribe = subscribe.publisher_filter(publisher_filter);
        }

        Ok(Self {
            bus: bus.clone(),
            subscription: bus.subscribe(subscribe)?,
        })
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    /// Сколько сообщений монитор уже вывел.
    pub fn seen(&self) -> u64 {
        self.subscription.stats().runs
    }

    /// Снимает монитор с шины.
    pub async fn stop(self) -> bool {
        self.bus.unsubscribe(&self.subscription).await
    }
}

/// Строка лога для одного сообщения.
pub fn render(
    message: &Message,
    options: &MonitorOptions,
) -> String {
    let mut line = format!("[{}] message = {}", options.name, message.topic());
    if !options.suppress_payload {
        if let Some(payload) = message.payload() {
            line.push_str(&format!("  payload = {payload:?}"));
        }
    }
    if !options.suppress_publisher {
        let publisher = message.publisher().unwrap_or(ANONYMOUS_PUBLISHER);
        line.push_str(&format!("  publisher = {publisher}"));
    }
    line
}
