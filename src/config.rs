use crate::consts::{self, ChannelId};
use serde::Deserialize;
use std::fs::File;
use std::path::Path;
use std::time::Duration;

/// Configuration file contents.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// Bot token for the remote channel service.
    pub token: String,
    pub channel_id: ChannelId,

    pub press_delay_secs: u64,
    pub usb_retries: u32,
    pub retry_backoff_ms: u64,
    pub hold_confirm_ms: u64,
    pub blink_half_period_ms: u64,
    pub poll_interval_ms: u64,
    pub startup_grace_ms: u64,
    pub handshake_timeout_ms: u64,
    pub remote_timeout_ms: u64,

    pub command_bind: String,
    pub open_name: String,
    pub closed_name: String,

    // Gateway
    pub intents: u64,
    pub api_version: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            token: String::new(),
            channel_id: 0,
            press_delay_secs: 120,
            usb_retries: 5,
            retry_backoff_ms: 1000,
            hold_confirm_ms: 3000,
            blink_half_period_ms: 500,
            poll_interval_ms: 100,
            startup_grace_ms: 2000,
            handshake_timeout_ms: 10_000,
            remote_timeout_ms: 10_000,
            command_bind: consts::DEFAULT_COMMAND_BIND.to_string(),
            open_name: consts::OPEN_NAME.to_string(),
            closed_name: consts::CLOSED_NAME.to_string(),
            intents: 1,
            api_version: 10,
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(filename: P) -> anyhow::Result<Self> {
        let handle = File::open(filename)?;
        let data: Config = serde_yaml::from_reader(handle)?;
        data.validate()?;

        Ok(data)
    }

    pub fn from_yaml(data: &str) -> anyhow::Result<Self> {
        let data: Config = serde_yaml::from_str(data)?;
        data.validate()?;
        Ok(data)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.token.trim().is_empty() {
            anyhow::bail!("token is required");
        }
        if self.channel_id == 0 {
            anyhow::bail!("channel_id is required");
        }
        if !(3000..=5000).contains(&self.hold_confirm_ms) {
            anyhow::bail!(
                "hold_confirm_ms must be within 3000-5000, got {}",
                self.hold_confirm_ms
            );
        }
        if self.usb_retries == 0 {
            anyhow::bail!("usb_retries must be at least 1");
        }
        if self.poll_interval_ms == 0 || self.blink_half_period_ms == 0 {
            anyhow::bail!("poll_interval_ms and blink_half_period_ms must be nonzero");
        }
        if self.open_name == self.closed_name {
            anyhow::bail!("open_name and closed_name must differ");
        }
        Ok(())
    }

    /// Settings consumed by the device loop.
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            channel_id: self.channel_id,
            open_name: self.open_name.clone(),
            closed_name: self.closed_name.clone(),
            press_delay: Duration::from_secs(self.press_delay_secs),
            usb_retries: self.usb_retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            hold_confirm: Duration::from_millis(self.hold_confirm_ms),
            blink_half_period: Duration::from_millis(self.blink_half_period_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            startup_grace: Duration::from_millis(self.startup_grace_ms),
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            remote_timeout: Duration::from_millis(self.remote_timeout_ms),
        }
    }
}

/// Immutable settings of the synchronization core.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub channel_id: ChannelId,
    pub open_name: String,
    pub closed_name: String,
    /// Cooldown between accepted toggle presses.
    pub press_delay: Duration,
    pub usb_retries: u32,
    pub retry_backoff: Duration,
    pub hold_confirm: Duration,
    pub blink_half_period: Duration,
    pub poll_interval: Duration,
    /// Device frames younger than this after a connect are dropped.
    pub startup_grace: Duration,
    pub handshake_timeout: Duration,
    pub remote_timeout: Duration,
}

impl SyncConfig {
    pub fn name_for(&self, open: bool) -> &str {
        if open {
            &self.open_name
        } else {
            &self.closed_name
        }
    }

    pub fn is_open(&self, name: &str) -> bool {
        name == self.open_name
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Config::default().sync_config()
    }
}
