use std::time::Duration;

use rand::Rng;
use uuid::Uuid;

use crate::error::{RealtimeError, Result};

/// Exponential backoff for the subscription reconnect loop.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub max: Duration,
    /// Consecutive failed attempts before the layer settles on pull-only.
    pub max_retries: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(60),
            max_retries: 8,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (1-based), with equal jitter:
    /// half of the capped exponential step is fixed, the other half is
    /// scaled by `jitter` in `[0, 1]`.
    pub fn delay_with_jitter(&self, attempt: u32, jitter: f64) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let step = self
            .base
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max)
            .min(self.max);
        let half = step / 2;
        half + half.mul_f64(jitter.clamp(0.0, 1.0))
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter: f64 = rand::rng().random();
        self.delay_with_jitter(attempt, jitter)
    }
}

/// Tunables of a realtime session.
#[derive(Debug, Clone, PartialEq)]
pub struct RealtimeConfig {
    /// Fixed pull interval. No backoff on failure.
    pub refresh_interval: Duration,
    pub toast_duration: Duration,
    /// Desktop notifications close themselves after this, task ones excepted.
    pub desktop_auto_dismiss: Duration,
    /// Message previews are cut to this many characters.
    pub preview_chars: usize,
    pub reconnect: ReconnectPolicy,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(30),
            toast_duration: Duration::from_secs(6),
            desktop_auto_dismiss: Duration::from_secs(8),
            preview_chars: 50,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Endpoints and credentials of a headless session, read from the environment.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_url: String,
    pub realtime_url: String,
    pub access_token: String,
    pub user_id: Uuid,
    pub realtime: RealtimeConfig,
}

impl ClientConfig {
    pub fn from_env() -> Result<Self> {
        let api_url = std::env::var("LOFT_API_URL").unwrap_or_else(|_| "http://127.0.0.1:3210".into());
        let realtime_url = std::env::var("LOFT_REALTIME_URL")
            .unwrap_or_else(|_| "ws://127.0.0.1:3210/realtime".into());
        let access_token = std::env::var("LOFT_ACCESS_TOKEN")
            .map_err(|_| RealtimeError::Config("LOFT_ACCESS_TOKEN is not set".into()))?;
        let user_id = std::env::var("LOFT_USER_ID")
            .map_err(|_| RealtimeError::Config("LOFT_USER_ID is not set".into()))?
            .parse::<Uuid>()
            .map_err(|e| RealtimeError::Config(format!("LOFT_USER_ID: {e}")))?;

        let mut realtime = RealtimeConfig::default();
        if let Some(secs) = env_number::<u64>("LOFT_REFRESH_SECS")? {
            if secs == 0 {
                return Err(RealtimeError::Config("LOFT_REFRESH_SECS must be positive".into()));
            }
            realtime.refresh_interval = Duration::from_secs(secs);
        }
        if let Some(retries) = env_number::<u32>("LOFT_RECONNECT_MAX_RETRIES")? {
            realtime.reconnect.max_retries = retries;
        }

        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            realtime_url,
            access_token,
            user_id,
            realtime,
        })
    }
}

fn env_number<T: std::str::FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| RealtimeError::Config(format!("{key}: {e}"))),
        Err(_) => Ok(None),
    }
}
