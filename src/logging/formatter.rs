use tracing_subscriber::{
    fmt::{self, format::FmtSpan, MakeWriter},
    layer::Layer as LayerTrait,
    registry::LookupSpan,
};

use crate::logging::config::{LogFormat, LoggingConfig};

/// Слой форматирования по конфигурации.
/// Возвращаем boxed trait-объект, чтобы стереть конкретный тип формата
/// (json/pretty/compact).
pub fn build_formatter_from_config<S, W>(
    config: &LoggingConfig,
    writer: W,
) -> Box<dyn LayerTrait<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    match config.format {
        LogFormat::Json => {
            let json_fmt = fmt::format().json().with_current_span(true);
            Box::new(
                fmt::layer()
                    .event_format(json_fmt)
                    .fmt_fields(fmt::format::JsonFields::new())
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(config.with_target)
                    .with_thread_ids(config.with_thread_ids)
                    .with_line_number(config.with_line_numbers),
            )
        }
        LogFormat::Pretty => {
            let pretty_fmt = fmt::format().pretty();
            Box::new(
                fmt::layer()
                    .event_format(pretty_fmt)
                    .with_span_events(FmtSpan::CLOSE)
                    .with_writer(writer)
                    .with_ansi(config.ansi)
                    .with_target(config.with_target)
                    .with_thread_ids(config.with_thread_ids)
                    .with_line_number(config.with_line_numbers),
            )
        }
        LogFormat::Compact => {
            let compact_fmt = fmt::format().compact();
            Box::new(
                fmt::layer()
                    .event_format(compact_fmt)
                    .with_writer(writer)
                    .with_ansi(config.ansi)
                    .with_target(config.with_target)
                    .with_thread_ids(false)
                    .with_line_number(false),
            )
        }
    }
}
