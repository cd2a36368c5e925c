use tracing::Level;
use tracing_subscriber::{
    EnvFilter,
    fmt::{Layer, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Directives for the log filter: third-party crates at `warn`, this crate at `level`.
pub fn filter_directives(level: Level) -> String {
    format!("warn,podmetrics={level}")
}

/// Installs the global tracing subscriber. File and line are added to events
/// at `debug`, thread ids and names at `trace`.
pub fn init_tracing(level: Level) {
    let mut fmt_layer = Layer::new()
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(std::env::var("NO_COLOR").is_err());

    match level {
        Level::DEBUG => fmt_layer = fmt_layer.with_file(true).with_line_number(true),
        Level::TRACE => {
            fmt_layer = fmt_layer
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true)
        }
        _ => {}
    }

    tracing_subscriber::registry()
        .with(EnvFilter::new(filter_directives(level)))
        .with(fmt_layer)
        .init();
}
