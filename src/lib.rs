//! Motion-gated camera uplink
//!
//! This crate drives a single polling loop that watches a motion sensor and,
//! while motion is active, periodically captures a camera frame, encodes it as
//! JPEG and POSTs it to a configured HTTP endpoint.
//!
//! # Architecture
//!
//! The loop has exactly one trigger source and one sink:
//!
//! 1. **Motion signal** (`motion`): PIR sensor read through sysfs GPIO, or a synthetic source.
//! 2. **Active-mode controller** (`controller`): debounce, active window and frame interval.
//! 3. **Frame source** (`ingest`): V4L2 camera or synthetic frames, held by a release guard.
//! 4. **Uploader** (`transport`): single multipart POST with a fixed timeout, no retry.
//!
//! # Module Structure
//!
//! - `config`: file + environment configuration
//! - `controller`: the timing state machine
//! - `frame`: RGB frames, JPEG encoding and upload file names
//! - `uplink`: the polling loop tying the collaborators together

use std::cell::Cell;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub mod config;
pub mod controller;
pub mod frame;
pub mod ingest;
pub mod motion;
pub mod transport;
pub mod uplink;

pub use config::UplinkConfig;
pub use controller::{ActiveModeController, MotionTransition, SendPolicy, TimingConfig};
pub use frame::{encode_jpeg, upload_file_name, Frame};
pub use ingest::{CameraConfig, CameraSession, CameraSource, CameraStats, FrameSource};
pub use motion::{GpioMotionSensor, MotionSensor, SyntheticMotionSensor};
pub use transport::{HttpUploader, UploadReceipt, Uploader};
pub use uplink::{TickReport, Uplink, UplinkSettings, UplinkStats, UploadAttempt};

// -------------------- Clock --------------------

/// Source of "now" for the polling loop.
///
/// Timestamps are offsets from an arbitrary origin; only differences matter to
/// the controller. The wall clock is also used for upload file names, so the
/// system implementation measures from the UNIX epoch.
pub trait Clock {
    fn now(&self) -> Duration;
}

/// Wall clock, measured from the UNIX epoch.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        // A clock set before 1970 reads as the epoch itself.
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
    }
}

/// Hand-driven clock for tests and replays.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<Duration>,
}

impl ManualClock {
    pub fn new(start: Duration) -> Self {
        Self {
            now: Cell::new(start),
        }
    }

    pub fn set(&self, now: Duration) {
        self.now.set(now);
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Duration {
        (**self).now()
    }
}

/// Convert a seconds value from configuration into a `Duration`.
///
/// Rejects negative, NaN, infinite and out-of-range values.
pub fn secs_to_duration(name: &str, secs: f64) -> anyhow::Result<Duration> {
    Duration::try_from_secs_f64(secs).map_err(|_| {
        anyhow::anyhow!(
            "{} must be a finite, non-negative number of seconds (got {})",
            name,
            secs
        )
    })
}
