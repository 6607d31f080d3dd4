//! Artificial per-instance latency for fault and performance experiments.

use std::time::Duration;

pub const EXTRA_LATENCY_ENV: &str = "EXTRA_LATENCY";

/// Delay applied at the top of every handler call.
///
/// Parsed once at startup and handed to each handler by value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExtraLatency(Duration);

impl ExtraLatency {
    pub const NONE: ExtraLatency = ExtraLatency(Duration::ZERO);

    pub fn from_millis(ms: u64) -> Self {
        ExtraLatency(Duration::from_millis(ms))
    }

    /// Reads `EXTRA_LATENCY` from the process environment.
    pub fn from_env() -> Self {
        Self::parse(std::env::var(EXTRA_LATENCY_ENV).ok().as_deref())
    }

    /// Parses an integer millisecond value with an optional `ms` suffix.
    ///
    /// Missing values mean no delay. Negative and non-numeric values are
    /// logged and treated as no delay.
    pub fn parse(value: Option<&str>) -> Self {
        let Some(raw) = value else {
            return Self::NONE;
        };

        let trimmed = raw.trim();
        let number = trimmed.strip_suffix("ms").unwrap_or(trimmed).trim();

        match number.parse::<i64>() {
            Ok(ms) if ms < 0 => {
                tracing::warn!("{EXTRA_LATENCY_ENV} cannot be negative, setting to 0");
                Self::NONE
            }
            Ok(ms) => {
                tracing::info!("{EXTRA_LATENCY_ENV} set to {ms}ms");
                Self::from_millis(ms.unsigned_abs())
            }
            Err(_) => {
                tracing::warn!(value = raw, "Invalid {EXTRA_LATENCY_ENV} value, setting to 0");
                Self::NONE
            }
        }
    }

    pub fn duration(&self) -> Duration {
        self.0
    }

    /// Sleeps for the configured delay, if any.
    pub async fn apply(&self, req_id: i64) {
        if self.0.is_zero() {
            return;
        }
        tracing::debug!(
            req_id,
            "Adding extra latency of {}ms",
            self.0.as_millis()
        );
        tokio::time::sleep(self.0).await;
    }
}
