use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use cohort_common::config::TelemetryConfig;
use fastrace::collector::{Config, ConsoleReporter, Reporter, SpanRecord};
use log::debug;

use crate::error::{TelemetryError, TelemetryResult};

enum TelemetryStatus {
    Uninitialized,
    Initialized,
    Failed,
    Finalized,
}

static TELEMETRY_STATUS: Mutex<TelemetryStatus> = Mutex::new(TelemetryStatus::Uninitialized);

/// Installs the process-wide logger and span reporter.
/// This must be called at most once per process.
pub fn init_telemetry(config: &TelemetryConfig) -> TelemetryResult<()> {
    let mut status = TELEMETRY_STATUS
        .lock()
        .map_err(|e| TelemetryError::internal(e.to_string()))?;

    match *status {
        TelemetryStatus::Uninitialized => match init_logs(config).and_then(|()| init_traces(config))
        {
            Ok(()) => {
                debug!("telemetry initialized");
                *status = TelemetryStatus::Initialized;
                Ok(())
            }
            Err(e) => {
                *status = TelemetryStatus::Failed;
                Err(e)
            }
        },
        TelemetryStatus::Initialized => {
            Err(TelemetryError::internal("telemetry already initialized"))
        }
        TelemetryStatus::Failed => Err(TelemetryError::internal(
            "telemetry failed to initialize previously",
        )),
        TelemetryStatus::Finalized => Err(TelemetryError::internal(
            "telemetry has been finalized and cannot be re-initialized",
        )),
    }
}

/// Installs only the logger.
/// Useful for tests and small programs that do not care about spans.
pub fn init_logger(filter: &str) -> TelemetryResult<()> {
    Ok(build_logger(filter).try_init()?)
}

fn build_logger(filter: &str) -> env_logger::Builder {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter));
    builder.format(move |buf, record| {
        let level = record.level();
        let target = record.target();
        let style = buf.default_level_style(level);
        let timestamp = buf.timestamp();
        let args = record.args();
        writeln!(buf, "[{timestamp} {style}{level}{style:#} {target}] {args}")
    });
    builder
}

fn init_logs(config: &TelemetryConfig) -> TelemetryResult<()> {
    if config.log_filter.trim().is_empty() {
        return Err(TelemetryError::invalid("log filter must not be empty"));
    }
    init_logger(&config.log_filter)
}

fn init_traces(config: &TelemetryConfig) -> TelemetryResult<()> {
    if config.print_spans {
        fastrace::set_reporter(
            ConsoleReporter,
            Config::default().report_interval(Duration::from_secs(1)),
        );
    } else {
        // Spans are still created so that the trace context is propagated to the service.
        fastrace::set_reporter(
            NoOpReporter,
            Config::default().report_interval(Duration::MAX),
        );
    }
    Ok(())
}

pub fn shutdown_telemetry() {
    debug!("shutting down telemetry...");
    fastrace::flush();
    if let Ok(mut status) = TELEMETRY_STATUS.lock() {
        if let TelemetryStatus::Initialized = *status {
            *status = TelemetryStatus::Finalized;
        }
    }
}

pub struct NoOpReporter;

impl Reporter for NoOpReporter {
    fn report(&mut self, _spans: Vec<SpanRecord>) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_telemetry_rejects_empty_log_filter() {
        let config = TelemetryConfig {
            log_filter: " ".to_string(),
            print_spans: false,
        };
        assert!(matches!(
            init_telemetry(&config),
            Err(TelemetryError::InvalidArgument(_))
        ));
        assert!(matches!(
            init_telemetry(&config),
            Err(TelemetryError::InternalError(_))
        ));
    }
}
