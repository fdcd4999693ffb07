//! Button timing: cooldown for the toggle button and the hold-to-confirm
//! state machine for the power button.
//!
//! Both are plain state machines fed with `Instant`s, the device loop
//! decides what to write to the device based on the returned values.

use std::time::Duration;
use tokio::time::Instant;

/// Rejects toggle presses arriving too soon after the previous one.
#[derive(Debug)]
pub struct Cooldown {
    window: Duration,
    /// Last press that reached the check, accepted or not.
    last_press: Option<Instant>,
}

impl Cooldown {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_press: None,
        }
    }

    /// Check a press at `now`. On rejection returns the time left in the
    /// window. The window restarts in both cases, so spamming the button
    /// keeps it locked.
    pub fn try_accept(&mut self, now: Instant) -> Result<(), Duration> {
        let previous = self.last_press.replace(now);
        match previous {
            Some(last) if now.saturating_duration_since(last) < self.window => {
                Err(self.window - now.saturating_duration_since(last))
            }
            _ => Ok(()),
        }
    }
}

/// Output of a hold evaluation.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum HoldAction {
    /// Show this value on the LED as countdown feedback.
    Blink(bool),
    /// Hold long enough: switch the relay on.
    Confirm,
}

/// Power-on hold tracking.
#[derive(Debug)]
pub struct PowerHold {
    threshold: Duration,
    half_period: Duration,
    power_state: bool,
    /// When the current hold started.
    keyup_time: Option<Instant>,
    /// Displayed LED value during the countdown.
    blink_state: bool,
    next_blink: Option<Instant>,
    confirmed: bool,
}

impl PowerHold {
    pub fn new(threshold: Duration, half_period: Duration) -> Self {
        Self {
            threshold,
            half_period,
            power_state: false,
            keyup_time: None,
            blink_state: false,
            next_blink: None,
            confirmed: false,
        }
    }

    pub fn power_state(&self) -> bool {
        self.power_state
    }

    pub fn is_holding(&self) -> bool {
        self.keyup_time.is_some()
    }

    /// Power-on button pressed. `led` is the authoritative LED state the
    /// countdown starts from.
    pub fn press(&mut self, now: Instant, led: bool) {
        self.keyup_time = Some(now);
        self.blink_state = led;
        self.next_blink = Some(now + self.half_period);
        self.confirmed = false;
    }

    /// Power-on button released. Returns true if a hold was in progress and
    /// the LED display needs restoring.
    pub fn release(&mut self) -> bool {
        self.next_blink = None;
        self.keyup_time.take().is_some()
    }

    /// Power-off button: no hold, no debounce.
    pub fn power_off(&mut self) {
        self.power_state = false;
    }

    /// Evaluate the hold at `now`. Called on every poll tick.
    pub fn poll(&mut self, now: Instant) -> Option<HoldAction> {
        let started = self.keyup_time?;
        if self.power_state || self.confirmed {
            return None;
        }

        if now.saturating_duration_since(started) >= self.threshold {
            self.power_state = true;
            self.confirmed = true;
            self.next_blink = None;
            return Some(HoldAction::Confirm);
        }

        let due = self.next_blink?;
        if now < due {
            return None;
        }
        let mut next = due + self.half_period;
        while next <= now {
            next += self.half_period;
        }
        self.next_blink = Some(next);
        self.blink_state = !self.blink_state;
        Some(HoldAction::Blink(self.blink_state))
    }
}
