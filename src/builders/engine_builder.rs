//! Builder assembling a [`TaskEngine`] from configuration, a log sink and
//! initial health checks.

use std::fmt;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::core::{HealthCheckFn, LogSink, SchedulerError, TracingLogSink};
use crate::runtime::TaskEngine;

/// Step-by-step engine construction.
pub struct EngineBuilder {
    config: EngineConfig,
    sink: Arc<dyn LogSink>,
    health_checks: Vec<(String, HealthCheckFn)>,
}

impl EngineBuilder {
    /// Builder with default configuration and the `tracing` sink.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            sink: Arc::new(TracingLogSink),
            health_checks: Vec::new(),
        }
    }

    /// Builder seeded from `.env` and `TASK_ENGINE_*` variables.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidConfig` if a variable is malformed.
    pub fn from_env() -> Result<Self, SchedulerError> {
        let config = EngineConfig::from_env().map_err(SchedulerError::InvalidConfig)?;
        Ok(Self::new().with_config(config))
    }

    /// Replace the configuration.
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Shorthand for setting the worker count.
    #[must_use]
    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.config.worker_count = count;
        self
    }

    /// Route lifecycle events to `sink`.
    #[must_use]
    pub fn with_log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Register a health check at construction.
    #[must_use]
    pub fn with_health_check<F>(mut self, name: impl Into<String>, check: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.health_checks.push((name.into(), Box::new(check)));
        self
    }

    /// Configuration the engine will be built with.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Validate the configuration and start the engine.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::InvalidConfig` if validation fails
    /// - `SchedulerError::Internal` if a thread cannot be spawned
    pub fn build(self) -> Result<TaskEngine, SchedulerError> {
        self.config.validate().map_err(SchedulerError::InvalidConfig)?;
        let engine = TaskEngine::start(self.config, self.sink)?;
        for (name, check) in self.health_checks {
            engine.register_health_check(name, check);
        }
        Ok(engine)
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("config", &self.config)
            .field("health_checks", &self.health_checks.len())
            .finish_non_exhaustive()
    }
}
