//! Active-mode timing logic.
//!
//! The controller turns per-tick motion readings into two decisions:
//! whether uploads are currently permitted ("active mode"), and whether an
//! upload is due right now. It holds three timers:
//!
//! - `last_motion_time`: last motion reading accepted as a new event (debounce anchor)
//! - `motion_start_time`: anchor of the active window's expiry
//! - `last_frame_sent`: last recorded upload (frame interval anchor)
//!
//! A reading inside the debounce interval never resets `last_motion_time`,
//! but while active it still pushes `motion_start_time` forward so the window
//! stays open for as long as the sensor keeps reporting motion.
//!
//! The controller performs no I/O and cannot fail.

use serde::Deserialize;
use std::time::Duration;

/// When a finished upload attempt advances `last_frame_sent`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendPolicy {
    /// Only a 2xx response counts as sent. Failed attempts are retried on the next tick.
    #[default]
    OnSuccess,
    /// Every attempt counts as sent, whatever its outcome.
    OnAttempt,
}

impl SendPolicy {
    /// Parse an environment value. Accepts the config spellings and their short forms.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "on_success" | "success" => Some(Self::OnSuccess),
            "on_attempt" | "attempt" => Some(Self::OnAttempt),
            _ => None,
        }
    }
}

/// Timing constants for the controller.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimingConfig {
    /// How long active mode persists without new motion.
    pub active_duration: Duration,
    /// Minimum spacing between uploads while active.
    pub frame_interval: Duration,
    /// Minimum spacing between accepted motion events.
    pub motion_debounce: Duration,
    pub send_policy: SendPolicy,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            active_duration: Duration::from_secs(120),
            frame_interval: Duration::from_secs(5),
            motion_debounce: Duration::from_secs(5),
            send_policy: SendPolicy::OnSuccess,
        }
    }
}

/// What a single tick did to the active-mode state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MotionTransition {
    /// Idle -> active on an accepted motion event.
    Activated,
    /// Accepted motion event while already active; all anchors moved to now.
    Retriggered,
    /// Motion inside the debounce interval while active; window extended only.
    Extended,
    /// Motion inside the debounce interval while idle; ignored.
    Debounced,
    /// Active window elapsed without new motion.
    Deactivated,
    Unchanged,
}

#[derive(Debug)]
pub struct ActiveModeController {
    timing: TimingConfig,
    active: bool,
    motion_start_time: Option<Duration>,
    last_motion_time: Option<Duration>,
    last_frame_sent: Option<Duration>,
}

impl ActiveModeController {
    pub fn new(timing: TimingConfig) -> Self {
        Self {
            timing,
            active: false,
            motion_start_time: None,
            last_motion_time: None,
            last_frame_sent: None,
        }
    }

    pub fn timing(&self) -> &TimingConfig {
        &self.timing
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn motion_start_time(&self) -> Option<Duration> {
        self.motion_start_time
    }

    pub fn last_motion_time(&self) -> Option<Duration> {
        self.last_motion_time
    }

    pub fn last_frame_sent(&self) -> Option<Duration> {
        self.last_frame_sent
    }

    /// Feed one motion reading taken at `now` and re-evaluate the window.
    ///
    /// `now` must not go backwards between calls; an earlier `now` is treated
    /// as zero elapsed time.
    pub fn observe(&mut self, now: Duration, motion: bool) -> MotionTransition {
        let mut transition = MotionTransition::Unchanged;

        if motion {
            if elapsed_at_least(self.last_motion_time, now, self.timing.motion_debounce) {
                transition = if self.active {
                    MotionTransition::Retriggered
                } else {
                    MotionTransition::Activated
                };
                self.active = true;
                self.motion_start_time = Some(now);
                self.last_motion_time = Some(now);
            } else if self.active {
                self.motion_start_time = Some(now);
                transition = MotionTransition::Extended;
            } else {
                transition = MotionTransition::Debounced;
            }
        }

        let expired = elapsed_at_least(self.motion_start_time, now, self.timing.active_duration);
        if self.active && expired {
            self.active = false;
            transition = MotionTransition::Deactivated;
        }

        transition
    }

    /// True when active and at least one frame interval has passed since the last recorded upload.
    pub fn upload_due(&self, now: Duration) -> bool {
        self.active && elapsed_at_least(self.last_frame_sent, now, self.timing.frame_interval)
    }

    /// Record the outcome of an upload attempt made at `now`.
    ///
    /// Returns whether `last_frame_sent` moved.
    pub fn record_upload(&mut self, now: Duration, delivered: bool) -> bool {
        let advance = match self.timing.send_policy {
            SendPolicy::OnSuccess => delivered,
            SendPolicy::OnAttempt => true,
        };
        if advance {
            self.last_frame_sent = Some(now);
        }
        advance
    }

    /// Time left before the active window closes, if active.
    pub fn remaining_active(&self, now: Duration) -> Option<Duration> {
        if !self.active {
            return None;
        }
        let start = self.motion_start_time?;
        let deadline = start + self.timing.active_duration;
        Some(deadline.saturating_sub(now))
    }
}

/// `None` means the event never happened, which satisfies every interval.
fn elapsed_at_least(since: Option<Duration>, now: Duration, interval: Duration) -> bool {
    match since {
        None => true,
        Some(at) => now.saturating_sub(at) >= interval,
    }
}
