use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use serde_json::Value;
use shared_logging::{ConsoleLogger, JsonLogger, LogLevel, LogRecord, LogSink};

/// Builder for training telemetry sinks.
pub struct TrainingTelemetryBuilder {
    module: String,
    log_path: Option<PathBuf>,
    console: Option<ConsoleLogger>,
}

impl TrainingTelemetryBuilder {
    /// Creates the builder.
    #[must_use]
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            log_path: None,
            console: None,
        }
    }

    /// Sets the JSON-lines log path.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Echoes records at or above `level` to stderr.
    #[must_use]
    pub fn console(mut self, level: LogLevel) -> Self {
        self.console = Some(ConsoleLogger::new(level));
        self
    }

    /// Builds the telemetry handle.
    pub fn build(self) -> Result<TrainingTelemetry> {
        let logger = match self.log_path {
            Some(path) => Some(JsonLogger::new(path)?),
            None => None,
        };
        Ok(TrainingTelemetry {
            inner: Arc::new(TelemetryInner {
                module: self.module,
                logger,
                console: self.console,
            }),
        })
    }
}

/// Telemetry handle shared by the trainer components.
#[derive(Clone)]
pub struct TrainingTelemetry {
    inner: Arc<TelemetryInner>,
}

impl fmt::Debug for TrainingTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrainingTelemetry")
            .field("module", &self.inner.module)
            .finish()
    }
}

struct TelemetryInner {
    module: String,
    logger: Option<JsonLogger>,
    console: Option<ConsoleLogger>,
}

impl TrainingTelemetry {
    /// Returns a builder.
    #[must_use]
    pub fn builder(module: impl Into<String>) -> TrainingTelemetryBuilder {
        TrainingTelemetryBuilder::new(module)
    }

    /// Telemetry that only forwards to `tracing`.
    #[must_use]
    pub fn silent(module: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(TelemetryInner {
                module: module.into(),
                logger: None,
                console: None,
            }),
        }
    }

    /// Logs structured metadata to the JSON log and to the console sink, or to
    /// `tracing` when no console sink is configured.
    pub fn log(&self, level: LogLevel, message: &str, metadata: Value) -> Result<()> {
        let record = LogRecord::new(&self.inner.module, level, message).with_metadata(metadata);
        if let Some(logger) = &self.inner.logger {
            logger.log(&record)?;
        }
        // Console sink replaces the tracing mirror.
        if let Some(console) = &self.inner.console {
            return console.log(&record);
        }
        match level {
            LogLevel::Debug => tracing::debug!(module = %record.module, "{}", record.console_line()),
            LogLevel::Info => tracing::info!(module = %record.module, "{}", record.console_line()),
            LogLevel::Warn => tracing::warn!(module = %record.module, "{}", record.console_line()),
            LogLevel::Error => tracing::error!(module = %record.module, "{}", record.console_line()),
        }
        Ok(())
    }

    /// Announces a training stage with a banner.
    pub fn stage(&self, name: &str) -> Result<()> {
        self.log(
            LogLevel::Info,
            &format!("############  {name}  ############"),
            Value::Null,
        )
    }

    /// Path of the JSON log, if any.
    #[must_use]
    pub fn log_file(&self) -> Option<PathBuf> {
        self.inner
            .logger
            .as_ref()
            .map(|logger| logger.path().to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn telemetry_writes_records() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("train.log.jsonl");
        let telemetry = TrainingTelemetry::builder("trainer")
            .log_path(&path)
            .build()
            .unwrap();
        telemetry
            .log(LogLevel::Info, "rmse", json!({ "rmse_train": 3.1 }))
            .unwrap();
        telemetry.stage("Training model").unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.contains("rmse_train"));
        assert!(content.contains("Training model"));
        assert_eq!(telemetry.log_file().unwrap(), path);
    }

    #[test]
    fn silent_telemetry_accepts_logs() {
        let telemetry = TrainingTelemetry::silent("trainer");
        telemetry.log(LogLevel::Debug, "noop", json!({})).unwrap();
        assert!(telemetry.log_file().is_none());
    }
}
