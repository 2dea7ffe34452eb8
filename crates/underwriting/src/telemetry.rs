use crate::config::TelemetryConfig;
use std::fmt;
use tracing_subscriber::filter::{Directive, ParseError};
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
pub enum TelemetryError {
    Filter { value: String, source: ParseError },
    Subscriber(Box<dyn std::error::Error + Send + Sync>),
}

impl fmt::Display for TelemetryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryError::Filter { value, .. } => {
                write!(f, "log filter '{}' is not a valid tracing directive", value)
            }
            TelemetryError::Subscriber(err) => {
                write!(f, "tracing subscriber already installed: {err}")
            }
        }
    }
}

impl std::error::Error for TelemetryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TelemetryError::Filter { source, .. } => Some(source),
            TelemetryError::Subscriber(err) => Some(&**err),
        }
    }
}

/// `RUST_LOG` wins when set; otherwise the configured level plus any
/// engine-specific directive.
pub fn build_filter(config: &TelemetryConfig) -> Result<EnvFilter, TelemetryError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let parse_error = |value: &str| {
        let value = value.to_string();
        move |source| TelemetryError::Filter { value, source }
    };

    let mut filter = EnvFilter::try_new(&config.log_level).map_err(parse_error(&config.log_level))?;
    if let Some(engine_level) = &config.engine_log_level {
        let directive = format!("underwriting={engine_level}");
        let parsed: Directive = directive.parse().map_err(parse_error(&directive))?;
        filter = filter.add_directive(parsed);
    }
    Ok(filter)
}

pub fn init(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let filter = build_filter(config)?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.show_targets)
        .compact()
        .with_ansi(false)
        .try_init()
        .map_err(TelemetryError::Subscriber)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn telemetry(log_level: &str, engine_log_level: Option<&str>) -> TelemetryConfig {
        TelemetryConfig {
            log_level: log_level.to_string(),
            engine_log_level: engine_log_level.map(str::to_string),
            show_targets: false,
        }
    }

    #[test]
    fn engine_directive_is_layered_on_base_level() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let filter = build_filter(&telemetry("warn", Some("debug"))).expect("filter builds");
        let rendered = filter.to_string();
        assert!(rendered.contains("underwriting=debug"), "{rendered}");
        assert!(rendered.contains("warn"), "{rendered}");
    }

    #[test]
    fn malformed_engine_level_is_rejected() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let error = build_filter(&telemetry("info", Some("verbose")))
            .expect_err("directive does not parse");
        assert!(matches!(error, TelemetryError::Filter { .. }));
    }
}
