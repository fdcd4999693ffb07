use crate::error::SyncError;
use std::fmt;
use std::time::Duration;
use tracing::{error, info, warn};

/// Serial link lifecycle.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum LinkState {
    Connected,
    Reconnecting,
    /// Terminal. Retry budget exhausted.
    Failed,
}

/// Bookkeeping for the reconnect policy: fixed backoff, bounded attempts.
/// The attempt loop itself lives with the owner of the device handle.
#[derive(Debug)]
pub struct Supervisor {
    max_retries: u32,
    backoff: Duration,
    retries: u32,
    state: LinkState,
}

impl Supervisor {
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
            retries: 0,
            state: LinkState::Reconnecting,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Failed attempts in the current reconnect cycle.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Connection lost. The retry counter is kept until a connection succeeds.
    pub fn lost(&mut self, cause: &dyn fmt::Display) {
        warn!("Device connection lost: {}", cause);
        self.state = LinkState::Reconnecting;
    }

    pub fn attempting(&self) {
        info!(
            "Attempting to connect to USB... (Attempt {}/{})",
            self.retries + 1,
            self.max_retries
        );
    }

    pub fn connected(&mut self) {
        if self.retries > 0 {
            info!("Device reconnected after {} failed attempts", self.retries);
        }
        self.retries = 0;
        self.state = LinkState::Connected;
    }

    /// Record a failed attempt. Errors once the budget is used up; the
    /// caller must not try again after that.
    pub fn failed(&mut self, cause: &SyncError) -> Result<(), SyncError> {
        self.retries += 1;
        warn!(
            "Connection attempt {}/{} failed: {}",
            self.retries, self.max_retries, cause
        );
        if self.retries >= self.max_retries {
            self.state = LinkState::Failed;
            error!("Failed to reconnect to USB, giving up");
            return Err(SyncError::ReconnectExhausted {
                attempts: self.retries,
            });
        }
        Ok(())
    }
}
