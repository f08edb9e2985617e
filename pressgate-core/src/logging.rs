use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, writer::BoxMakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::LoggingConfig;

/// Install the global tracing subscriber.
///
/// The filter comes from `RUST_LOG` when set, otherwise from the configured
/// level. Output goes to stderr or, when `file_path` is set, to that file in
/// append mode. `format = "json"` switches to structured output.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let level = parse_log_level(&config.level)?;
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let writer = match &config.file_path {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            BoxMakeWriter::new(std::sync::Arc::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let base = fmt::layer()
        .with_writer(writer)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true);

    let registry = tracing_subscriber::registry().with(filter);
    if config.format == "json" {
        registry
            .with(
                base.json()
                    .with_current_span(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .init();
    } else {
        registry.with(base.pretty()).init();
    }

    Ok(())
}

fn parse_log_level(level: &str) -> anyhow::Result<Level> {
    match level.to_ascii_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(anyhow::anyhow!("Unknown log level: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("INFO").ok(), Some(Level::INFO));
        assert_eq!(parse_log_level("warning").ok(), Some(Level::WARN));
        assert_eq!(parse_log_level("trace").ok(), Some(Level::TRACE));
        assert!(parse_log_level("loud").is_err());
    }
}
