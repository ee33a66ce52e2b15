use std::{fmt, sync::Arc};

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use thiserror::Error;

/// Source of the current time. Injected so tests can pin the wall clock.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Error)]
pub enum TimestampError {
    #[error("invalid ISO-8601 timestamp '{value}': {source}")]
    Invalid {
        value: String,
        source: chrono::ParseError,
    },
}

/// Renders instants as `YYYY-MM-DDTHH:MM:SSZ`.
#[derive(Clone)]
pub struct TimestampNormalizer {
    clock: Clock,
}

impl TimestampNormalizer {
    pub fn new(clock: Clock) -> Self {
        Self { clock }
    }

    /// Normalizer backed by the system clock.
    pub fn system() -> Self {
        Self::new(Arc::new(Utc::now))
    }

    /// Converts a timestamp carrying any UTC offset (including `Z`) to UTC.
    ///
    /// Sub-second digits are dropped; values without an offset are rejected.
    pub fn normalize(&self, raw: &str) -> Result<String, TimestampError> {
        let parsed = DateTime::parse_from_rfc3339(raw.trim()).map_err(|source| {
            TimestampError::Invalid {
                value: raw.to_string(),
                source,
            }
        })?;
        Ok(render(parsed.with_timezone(&Utc)))
    }

    /// Current clock reading truncated to whole seconds.
    pub fn now(&self) -> String {
        render((self.clock)())
    }
}

impl Default for TimestampNormalizer {
    fn default() -> Self {
        Self::system()
    }
}

impl fmt::Debug for TimestampNormalizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimestampNormalizer").finish_non_exhaustive()
    }
}

fn render(value: DateTime<Utc>) -> String {
    value
        .trunc_subsecs(0)
        .to_rfc3339_opts(SecondsFormat::Secs, true)
}
