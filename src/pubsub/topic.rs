use std::{fmt, sync::Arc};

use globset::GlobMatcher;

/// Разделитель сегментов иерархического топика (`Orders::Created`).
pub const TOPIC_DELIMITER: &str = "::";
/// Ровно один произвольный сегмент.
pub const ANY_SEGMENT: &str = "*";
/// Ноль или больше произвольных сегментов.
pub const ANY_DEPTH: &str = "**";

type Predicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Входная спецификация шаблона топика (или издателя).
///
/// Закрытый набор форм, из которых компилируется [`TopicPattern`]:
/// - `Any` — отсутствующий шаблон, совпадает со всем;
/// - `Text` — литерал или glob с сегментами `*` / `**`;
/// - `Glob` — заранее собранный [`globset::GlobMatcher`];
/// - `Custom` — заранее собранный предикат с меткой;
/// - `Many` — набор спецификаций (рекурсивно разворачивается).
#[derive(Clone)]
pub enum PatternSpec {
    Any,
    Text(String),
    Glob(GlobMatcher),
    Custom { label: String, predicate: Predicate },
    Many(Vec<PatternSpec>),
}

impl PatternSpec {
    /// Создаёт спецификацию из произвольного предиката.
    ///
    /// `label` служит ключом для [`TopicPattern::remove`].
    pub fn custom<F>(
        label: impl Into<String>,
        predicate: F,
    ) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self::Custom {
            label: label.into(),
            predicate: Arc::new(predicate),
        }
    }
}

impl fmt::Debug for PatternSpec {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Self::Any => write!(f, "Any"),
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Glob(glob) => f.debug_tuple("Glob").field(&glob.glob().glob()).finish(),
            Self::Custom { label, .. } => f.debug_struct("Custom").field("label", label).finish(),
            Self::Many(specs) => f.debug_tuple("Many").field(specs).finish(),
        }
    }
}

impl From<&str> for PatternSpec {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for PatternSpec {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&String> for PatternSpec {
    fn from(text: &String) -> Self {
        Self::Text(text.clone())
    }
}

impl From<GlobMatcher> for PatternSpec {
    fn from(glob: GlobMatcher) -> Self {
        Self::Glob(glob)
    }
}

impl<T: Into<PatternSpec>> From<Vec<T>> for PatternSpec {
    fn from(specs: Vec<T>) -> Self {
        Self::Many(specs.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<PatternSpec>, const N: usize> From<[T; N]> for PatternSpec {
    fn from(specs: [T; N]) -> Self {
        Self::Many(specs.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<PatternSpec>> From<Option<T>> for PatternSpec {
    fn from(spec: Option<T>) -> Self {
        spec.map_or(Self::Any, Into::into)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Exact(Box<str>),
    One,
    Many,
}

#[derive(Clone)]
enum Matcher {
    Everything,
    Literal(Arc<str>),
    Segments {
        source: Arc<str>,
        segments: Arc<[Segment]>,
    },
    Glob(GlobMatcher),
    Custom {
        label: Arc<str>,
        predicate: Predicate,
    },
}

impl Matcher {
    fn compile_text(text: &str) -> Self {
        let has_wildcard = text
            .split(TOPIC_DELIMITER)
            .any(|s| s == ANY_SEGMENT || s == ANY_DEPTH);
        if !has_wildcard {
            return Self::Literal(Arc::from(text));
        }

        let segments = text
            .split(TOPIC_DELIMITER)
            .map(|s| match s {
                ANY_SEGMENT => Segment::One,
                ANY_DEPTH => Segment::Many,
                other => Segment::Exact(other.into()),
            })
            .collect();
        Self::Segments {
            source: Arc::from(text),
            segments,
        }
    }

    /// Исходный текст шаблона; по нему сравниваются matcher'ы при
    /// дедупликации и удалении.
    fn source(&self) -> &str {
        match self {
            Self::Everything => ANY_DEPTH,
            Self::Literal(text) => text.as_ref(),
            Self::Segments { source, .. } => source.as_ref(),
            Self::Glob(glob) => glob.glob().glob(),
            Self::Custom { label, .. } => label.as_ref(),
        }
    }

    fn is_match(
        &self,
        topic: &str,
    ) -> bool {
        match self {
            Self::Everything => true,
            Self::Literal(text) => **text == *topic,
            Self::Segments { segments, .. } => {
                let parts: Vec<&str> = topic.split(TOPIC_DELIMITER).collect();
                segments_match(segments, &parts)
            }
            Self::Glob(glob) => glob.is_match(topic),
            Self::Custom { predicate, .. } => predicate(topic),
        }
    }
}

/// Полное (заякоренное с обеих сторон) сопоставление сегментов.
///
/// `**` обрабатывается с откатом к последней позиции `**`, поэтому шаблон
/// может содержать несколько `**` в любых местах.
fn segments_match(
    pattern: &[Segment],
    topic: &[&str],
) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < topic.len() {
        if let Some(segment) = pattern.get(p) {
            match segment {
                Segment::Many => {
                    backtrack = Some((p, t));
                    p += 1;
                    continue;
                }
                Segment::One => {
                    p += 1;
                    t += 1;
                    continue;
                }
                Segment::Exact(expected) if **expected == *topic[t] => {
                    p += 1;
                    t += 1;
                    continue;
                }
                Segment::Exact(_) => {}
            }
        }

        // `**` поглощает ещё один сегмент топика
        match backtrack {
            Some((star_p, star_t)) => {
                p = star_p + 1;
                t = star_t + 1;
                backtrack = Some((star_p, star_t + 1));
            }
            None => return false,
        }
    }

    pattern[p..].iter().all(|s| *s == Segment::Many)
}

/// Скомпилированный набор matcher'ов топика.
///
/// Совпадение — логическое ИЛИ по всем matcher'ам. Пустой набор не совпадает
/// ни с чем, [`TopicPattern::any`] совпадает со всем.
#[derive(Clone)]
pub struct TopicPattern {
    matchers: Vec<Matcher>,
}

impl TopicPattern {
    /// Компилирует спецификацию в набор matcher'ов.
    ///
    /// Пустой набор спецификаций (`Vec::new()`) даёт шаблон, который никогда
    /// не совпадает.
    pub fn compile(spec: impl Into<PatternSpec>) -> Self {
        let mut pattern = Self::empty();
        pattern.add(spec);
        pattern
    }

    /// Шаблон, совпадающий с любым топиком.
    pub fn any() -> Self {
        Self {
            matchers: vec![Matcher::Everything],
        }
    }

    /// Шаблон, не совпадающий ни с чем.
    pub fn empty() -> Self {
        Self {
            matchers: Vec::new(),
        }
    }

    /// Проверяет, удовлетворяет ли `topic` хотя бы одному matcher'у.
    pub fn matches(
        &self,
        topic: &str,
    ) -> bool {
        self.matchers.iter().any(|m| m.is_match(topic))
    }

    /// Расширяет набор. Matcher'ы с уже известным исходным текстом
    /// пропускаются.
    pub fn add(
        &mut self,
        spec: impl Into<PatternSpec>,
    ) {
        let mut compiled = Vec::new();
        flatten(spec.into(), &mut compiled);
        for matcher in compiled {
            if !self.matchers.iter().any(|m| m.source() == matcher.source()) {
                self.matchers.push(matcher);
            }
        }
    }

    /// Удаляет matcher'ы, исходный текст которых совпадает с текстом
    /// переданной спецификации. Возвращает число удалённых.
    pub fn remove(
        &mut self,
        spec: impl Into<PatternSpec>,
    ) -> usize {
        let mut compiled = Vec::new();
        flatten(spec.into(), &mut compiled);
        let before = self.matchers.len();
        self.matchers
            .retain(|m| !compiled.iter().any(|c| c.source() == m.source()));
        before - self.matchers.len()
    }

    pub fn len(&self) -> usize {
        self.matchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }

    /// Исходные тексты всех matcher'ов в порядке добавления.
    pub fn sources(&self) -> Vec<&str> {
        self.matchers.iter().map(Matcher::source).collect()
    }
}

impl fmt::Debug for TopicPattern {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_tuple("TopicPattern").field(&self.sources()).finish()
    }
}

fn flatten(
    spec: PatternSpec,
    out: &mut Vec<Matcher>,
) {
    match spec {
        PatternSpec::Any => out.push(Matcher::Everything),
        PatternSpec::Text(text) => out.push(Matcher::compile_text(&text)),
        PatternSpec::Glob(glob) => out.push(Matcher::Glob(glob)),
        PatternSpec::Custom { label, predicate } => out.push(Matcher::Custom {
            label: Arc::from(label),
            predicate,
        }),
        PatternSpec::Many(specs) => {
            for spec in specs {
                flatten(spec, out);
            }
        }
    }
}
