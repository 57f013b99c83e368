//! Configuration for the scheduler core.

use std::time::Duration;

use anyhow::{Context, Result};

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Delay before a newly pending group's first placement attempt.
    pub first_schedule_delay: Duration,

    /// Lifetime of a preemption reservation.
    pub reservation_duration: Duration,

    /// Global placement attempts per second across all groups.
    pub rate_limit: u32,

    /// Base hold time before an unmatched offer is returned.
    pub offer_return_delay: Duration,

    /// Upper bound of the random jitter added to the hold time, so a
    /// burst of offers does not expire in lockstep.
    pub offer_return_jitter: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            first_schedule_delay: Duration::from_millis(1),
            reservation_duration: Duration::from_secs(60),
            rate_limit: 100,
            offer_return_delay: Duration::from_secs(60),
            offer_return_jitter: Duration::from_secs(30),
        }
    }
}

impl SchedulerConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            first_schedule_delay: env_duration_ms(
                "CAPSTAN_FIRST_SCHEDULE_DELAY_MS",
                defaults.first_schedule_delay,
            )?,
            reservation_duration: env_duration_secs(
                "CAPSTAN_RESERVATION_DURATION_SECS",
                defaults.reservation_duration,
            )?,
            rate_limit: env_u32("CAPSTAN_RATE_LIMIT", defaults.rate_limit)?,
            offer_return_delay: env_duration_secs(
                "CAPSTAN_OFFER_RETURN_DELAY_SECS",
                defaults.offer_return_delay,
            )?,
            offer_return_jitter: env_duration_secs(
                "CAPSTAN_OFFER_RETURN_JITTER_SECS",
                defaults.offer_return_jitter,
            )?,
        })
    }
}

fn env_u32(name: &str, default: u32) -> Result<u32> {
    match std::env::var(name) {
        Ok(raw) => raw.parse().with_context(|| format!("parsing {}", name)),
        Err(_) => Ok(default),
    }
}

fn env_duration_ms(name: &str, default: Duration) -> Result<Duration> {
    Ok(Duration::from_millis(u64::from(env_u32(
        name,
        default.as_millis() as u32,
    )?)))
}

fn env_duration_secs(name: &str, default: Duration) -> Result<Duration> {
    Ok(Duration::from_secs(u64::from(env_u32(
        name,
        default.as_secs() as u32,
    )?)))
}
