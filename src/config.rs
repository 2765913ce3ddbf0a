//! Trampoline configuration: defaults + environment overrides

use std::env;
use std::time::Duration;

use crate::error::ConfigError;

const TIMEOUT_KEY: &str = "TRAMPOLINE_TIMEOUT_MS";
const DRAIN_BUDGET_KEY: &str = "TRAMPOLINE_DRAIN_BUDGET";

/// Trampoline configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrampolineConfig {
    /// Timeout applied by `Trampoline::call` (None = wait forever)
    pub default_timeout: Option<Duration>,
    /// Max calls run per drain callback (None = drain everything queued)
    pub drain_budget: Option<usize>,
}

impl TrampolineConfig {
    /// Load from process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load via key lookup; unset or `0` keeps the default
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(ms) = parse_number(TIMEOUT_KEY, lookup(TIMEOUT_KEY))?
            && ms > 0
        {
            config.default_timeout = Some(Duration::from_millis(ms));
        }

        if let Some(budget) = parse_number(DRAIN_BUDGET_KEY, lookup(DRAIN_BUDGET_KEY))?
            && budget > 0
        {
            config.drain_budget = Some(budget as usize);
        }

        Ok(config)
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    pub fn with_drain_budget(mut self, budget: usize) -> Self {
        self.drain_budget = (budget > 0).then_some(budget);
        self
    }
}

fn parse_number(key: &'static str, raw: Option<String>) -> Result<Option<u64>, ConfigError> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse::<u64>()
        .map(Some)
        .map_err(|_| ConfigError::InvalidNumber { key, value: raw })
}
