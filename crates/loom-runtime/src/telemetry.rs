//! Tracing subscriber setup and the tracing-backed audit sink

use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use loom_core::{AuditAction, AuditRecord, Telemetry};

use crate::{LogFormat, LoggingConfig, RuntimeError, RuntimeResult};

/// Environment variable that overrides the configured filter
pub const LOG_ENV: &str = "LOOM_LOG";

/// Target used for audit events
pub const AUDIT_TARGET: &str = "loom::audit";

/// Filter from `LOOM_LOG`, falling back to the configured level
pub fn env_filter(config: &LoggingConfig) -> RuntimeResult<EnvFilter> {
    match std::env::var(LOG_ENV) {
        Ok(directive) if !directive.trim().is_empty() => EnvFilter::try_new(&directive)
            .map_err(|e| RuntimeError::Telemetry(format!("{LOG_ENV}={directive}: {e}"))),
        _ => EnvFilter::try_new(&config.level)
            .map_err(|e| RuntimeError::Telemetry(format!("level `{}`: {e}", config.level))),
    }
}

/// Install the global subscriber.
///
/// Fails if one is already installed.
pub fn init_tracing(config: &LoggingConfig) -> RuntimeResult<()> {
    let filter = env_filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.format {
        LogFormat::Pretty => registry.with(fmt::layer().with_target(true)).try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(false))
            .try_init(),
    };
    installed.map_err(|e| RuntimeError::Telemetry(e.to_string()))?;
    info!(format = ?config.format, level = %config.level, "tracing initialized");
    Ok(())
}

/// Forwards audit records as tracing events on [`AUDIT_TARGET`]
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingTelemetry;

impl Telemetry for TracingTelemetry {
    fn record(&self, record: &AuditRecord) {
        let from = record.from.map(|s| s.name()).unwrap_or("-");
        let to = record.to.map(|s| s.name()).unwrap_or("-");
        match record.action {
            AuditAction::ReleaseFailed => tracing::warn!(
                target: AUDIT_TARGET,
                component = %record.component,
                address = %record.address,
                action = ?record.action,
                from,
                to,
                detail = %record.detail,
                at = record.timestamp.as_micros(),
                "audit"
            ),
            _ => tracing::info!(
                target: AUDIT_TARGET,
                component = %record.component,
                address = %record.address,
                action = ?record.action,
                from,
                to,
                detail = %record.detail,
                at = record.timestamp.as_micros(),
                "audit"
            ),
        }
    }
}
