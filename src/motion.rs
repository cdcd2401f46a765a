//! Motion signal sources.
//!
//! The loop polls a `MotionSensor` once per tick. The sensor is expected to
//! debounce in hardware (a PIR module holds its output high for a few
//! seconds); the controller applies its own debounce on top.
//!
//! - `GpioMotionSensor`: sysfs GPIO value file (`/sys/class/gpio/gpioN/value`)
//! - `SyntheticMotionSensor`: `stub://` sources for bench runs without hardware

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};

const DEFAULT_SYNTHETIC_PERIOD: u64 = 50;

/// A synchronous "is motion detected right now" reading.
pub trait MotionSensor {
    fn motion_detected(&mut self) -> Result<bool>;

    /// Human-readable name for log lines.
    fn describe(&self) -> String;
}

impl<M: MotionSensor + ?Sized> MotionSensor for Box<M> {
    fn motion_detected(&mut self) -> Result<bool> {
        (**self).motion_detected()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Build a sensor from a configured source string.
///
/// `stub://...` selects the synthetic sensor; anything else is a GPIO value path.
pub fn open_sensor(source: &str, active_low: bool) -> Result<Box<dyn MotionSensor>> {
    if source.starts_with("stub://") {
        Ok(Box::new(SyntheticMotionSensor::from_uri(source)?))
    } else {
        Ok(Box::new(GpioMotionSensor::open(source, active_low)?))
    }
}

// ----------------------------------------------------------------------------
// sysfs GPIO
// ----------------------------------------------------------------------------

/// PIR sensor wired to a GPIO line exported through sysfs.
#[derive(Debug)]
pub struct GpioMotionSensor {
    path: PathBuf,
    active_low: bool,
}

impl GpioMotionSensor {
    /// Open a GPIO `value` file. The line must already be exported as an input.
    pub fn open(path: impl AsRef<Path>, active_low: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let sensor = Self { path, active_low };
        // Fail at startup rather than on the first tick.
        sensor.read_level()?;
        Ok(sensor)
    }

    fn read_level(&self) -> Result<bool> {
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("read gpio value {}", self.path.display()))?;
        parse_level(&raw).ok_or_else(|| {
            anyhow!(
                "unexpected gpio value {:?} in {}",
                raw.trim(),
                self.path.display()
            )
        })
    }
}

impl MotionSensor for GpioMotionSensor {
    fn motion_detected(&mut self) -> Result<bool> {
        Ok(self.read_level()? != self.active_low)
    }

    fn describe(&self) -> String {
        format!(
            "gpio:{}{}",
            self.path.display(),
            if self.active_low { " (active low)" } else { "" }
        )
    }
}

fn parse_level(raw: &str) -> Option<bool> {
    match raw.trim() {
        "1" => Some(true),
        "0" => Some(false),
        _ => None,
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://)
// ----------------------------------------------------------------------------

/// Reports motion on every `period`-th reading.
///
/// `stub://every/<n>` sets the period; any other `stub://` URI uses 50.
/// `stub://always` and `stub://never` are fixed.
#[derive(Debug)]
pub struct SyntheticMotionSensor {
    uri: String,
    period: Option<u64>,
    always: bool,
    readings: u64,
}

impl SyntheticMotionSensor {
    pub fn from_uri(uri: &str) -> Result<Self> {
        let Some(rest) = uri.strip_prefix("stub://") else {
            return Err(anyhow!(
                "synthetic motion source must start with stub:// (got {})",
                uri
            ));
        };
        let (period, always) = match rest {
            "always" => (None, true),
            "never" => (None, false),
            other => match other.strip_prefix("every/") {
                Some(n) => {
                    let n: u64 = n
                        .parse()
                        .map_err(|_| anyhow!("invalid synthetic motion period in {}", uri))?;
                    if n == 0 {
                        return Err(anyhow!("synthetic motion period must be at least 1"));
                    }
                    (Some(n), false)
                }
                None => (Some(DEFAULT_SYNTHETIC_PERIOD), false),
            },
        };
        Ok(Self {
            uri: uri.to_string(),
            period,
            always,
            readings: 0,
        })
    }
}

impl MotionSensor for SyntheticMotionSensor {
    fn motion_detected(&mut self) -> Result<bool> {
        self.readings += 1;
        Ok(match self.period {
            Some(period) => (self.readings - 1) % period == 0,
            None => self.always,
        })
    }

    fn describe(&self) -> String {
        format!("{} (synthetic)", self.uri)
    }
}
