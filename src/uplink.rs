//! The polling loop.
//!
//! Each tick:
//! 1. reads the clock and the motion sensor
//! 2. feeds both to the `ActiveModeController`
//! 3. if an upload is due, captures a frame, encodes it and hands it to the uploader
//! 4. records the outcome and logs one line for the attempt
//!
//! Nothing inside a tick is fatal. Sensor, capture, encode and upload
//! failures are logged and the next tick runs as usual; only the shutdown
//! flag ends the loop. The camera is held by a `CameraSession`, so it is
//! released whenever the `Uplink` is dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::controller::{ActiveModeController, MotionTransition};
use crate::frame::{encode_jpeg, upload_file_name, DEFAULT_JPEG_QUALITY, DEFAULT_NAME_PREFIX};
use crate::ingest::{CameraSession, FrameSource};
use crate::motion::MotionSensor;
use crate::transport::Uploader;
use crate::Clock;

/// Loop parameters outside the controller's timing.
#[derive(Clone, Debug)]
pub struct UplinkSettings {
    /// Upload file name prefix.
    pub name_prefix: String,
    pub jpeg_quality: u8,
    /// Sleep between ticks. Zero polls as fast as the blocking calls allow.
    pub poll_interval: Duration,
    /// How often to log a status line. Zero disables it.
    pub status_interval: Duration,
    /// Stop after this many delivered uploads.
    pub max_uploads: Option<u64>,
}

impl Default for UplinkSettings {
    fn default() -> Self {
        Self {
            name_prefix: DEFAULT_NAME_PREFIX.to_string(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            poll_interval: Duration::from_millis(50),
            status_interval: Duration::from_secs(60),
            max_uploads: None,
        }
    }
}

/// Running counters, logged periodically and returned when the loop ends.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UplinkStats {
    pub ticks: u64,
    pub activations: u64,
    pub uploads_delivered: u64,
    pub uploads_rejected: u64,
    pub uploads_failed: u64,
    pub capture_failures: u64,
    pub sensor_failures: u64,
}

/// What happened to an upload that was due on a tick.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UploadAttempt {
    /// 2xx response.
    Delivered { name: String, status: u16 },
    /// Non-2xx response.
    Rejected { name: String, status: u16 },
    /// No response (timeout, connection error).
    TransportFailed { name: String },
    /// The camera or encoder failed before anything was sent.
    CaptureFailed,
}

impl UploadAttempt {
    pub fn is_delivered(&self) -> bool {
        matches!(self, UploadAttempt::Delivered { .. })
    }
}

/// Result of one tick, for callers that drive the loop themselves.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TickReport {
    pub now: Duration,
    pub motion: bool,
    pub transition: MotionTransition,
    pub upload: Option<UploadAttempt>,
}

pub struct Uplink<S, M, U, C>
where
    S: FrameSource,
    M: MotionSensor,
    U: Uploader,
    C: Clock,
{
    controller: ActiveModeController,
    camera: CameraSession<S>,
    sensor: M,
    uploader: U,
    clock: C,
    settings: UplinkSettings,
    stats: UplinkStats,
    sensor_failing: bool,
    last_status_at: Option<Duration>,
}

impl<S, M, U, C> Uplink<S, M, U, C>
where
    S: FrameSource,
    M: MotionSensor,
    U: Uploader,
    C: Clock,
{
    pub fn new(
        controller: ActiveModeController,
        camera: CameraSession<S>,
        sensor: M,
        uploader: U,
        clock: C,
        settings: UplinkSettings,
    ) -> Self {
        Self {
            controller,
            camera,
            sensor,
            uploader,
            clock,
            settings,
            stats: UplinkStats::default(),
            sensor_failing: false,
            last_status_at: None,
        }
    }

    pub fn controller(&self) -> &ActiveModeController {
        &self.controller
    }

    pub fn stats(&self) -> &UplinkStats {
        &self.stats
    }

    pub fn camera(&self) -> &CameraSession<S> {
        &self.camera
    }

    /// Run ticks until `shutdown` is set or `max_uploads` deliveries are reached.
    pub fn run(&mut self, shutdown: &AtomicBool) -> UplinkStats {
        let timing = *self.controller.timing();
        log::info!(
            "uplink running: motion={} camera={} endpoint={}",
            self.sensor.describe(),
            self.camera.source().describe(),
            self.uploader.endpoint()
        );
        log::info!(
            "active_duration={:.1}s frame_interval={:.1}s motion_debounce={:.1}s send_policy={:?}",
            timing.active_duration.as_secs_f64(),
            timing.frame_interval.as_secs_f64(),
            timing.motion_debounce.as_secs_f64(),
            timing.send_policy
        );

        while !shutdown.load(Ordering::SeqCst) {
            let report = self.tick();
            self.maybe_log_status(report.now);

            if let Some(max) = self.settings.max_uploads {
                if self.stats.uploads_delivered >= max {
                    log::info!(
                        "delivered {} uploads, stopping",
                        self.stats.uploads_delivered
                    );
                    break;
                }
            }
            if !self.settings.poll_interval.is_zero() {
                std::thread::sleep(self.settings.poll_interval);
            }
        }

        log::info!("uplink stopped: {}", format_stats(&self.stats));
        self.stats.clone()
    }

    /// Evaluate one tick.
    pub fn tick(&mut self) -> TickReport {
        let now = self.clock.now();
        self.stats.ticks += 1;

        let motion = self.read_motion();
        let transition = self.controller.observe(now, motion);
        match transition {
            MotionTransition::Activated => {
                self.stats.activations += 1;
                log::info!("motion detected, active mode on");
            }
            MotionTransition::Retriggered => log::debug!("motion retriggered, window restarted"),
            MotionTransition::Extended => log::debug!("motion within debounce, window extended"),
            MotionTransition::Deactivated => log::info!("no motion, active mode off"),
            MotionTransition::Debounced | MotionTransition::Unchanged => {}
        }

        let upload = if self.controller.upload_due(now) {
            Some(self.send_frame(now))
        } else {
            None
        };

        TickReport {
            now,
            motion,
            transition,
            upload,
        }
    }

    fn read_motion(&mut self) -> bool {
        match self.sensor.motion_detected() {
            Ok(motion) => {
                if self.sensor_failing {
                    log::info!("motion sensor {} recovered", self.sensor.describe());
                    self.sensor_failing = false;
                }
                motion
            }
            Err(err) => {
                self.stats.sensor_failures += 1;
                if self.sensor_failing {
                    log::debug!("motion sensor read failed: {:#}", err);
                } else {
                    log::warn!(
                        "motion sensor read failed, treating as no motion: {:#}",
                        err
                    );
                    self.sensor_failing = true;
                }
                false
            }
        }
    }

    fn send_frame(&mut self, now: Duration) -> UploadAttempt {
        let quality = self.settings.jpeg_quality;
        let encoded = self.camera.capture().and_then(|frame| {
            let jpeg = encode_jpeg(&frame, quality)?;
            Ok((jpeg, frame.captured_at))
        });
        let (jpeg, captured_at) = match encoded {
            Ok(encoded) => encoded,
            Err(err) => {
                self.stats.capture_failures += 1;
                log::warn!("frame capture failed: {:#}", err);
                return UploadAttempt::CaptureFailed;
            }
        };

        let name = upload_file_name(&self.settings.name_prefix, now);
        let attempt = match self.uploader.upload(&jpeg, &name) {
            Ok(receipt) if receipt.is_success() => {
                self.stats.uploads_delivered += 1;
                log::info!(
                    "uploaded {} ({} bytes) status={} in {}ms, {}ms after capture",
                    name,
                    jpeg.len(),
                    receipt.status,
                    receipt.elapsed.as_millis(),
                    captured_at.elapsed().as_millis()
                );
                UploadAttempt::Delivered {
                    name,
                    status: receipt.status,
                }
            }
            Ok(receipt) => {
                self.stats.uploads_rejected += 1;
                log::warn!(
                    "upload {} rejected: status={} body={}",
                    name,
                    receipt.status,
                    receipt.body_excerpt()
                );
                UploadAttempt::Rejected {
                    name,
                    status: receipt.status,
                }
            }
            Err(err) => {
                self.stats.uploads_failed += 1;
                log::warn!("upload {} failed: {:#}", name, err);
                UploadAttempt::TransportFailed { name }
            }
        };

        self.controller.record_upload(now, attempt.is_delivered());
        attempt
    }

    fn maybe_log_status(&mut self, now: Duration) {
        if self.settings.status_interval.is_zero() {
            return;
        }
        let due = match self.last_status_at {
            None => {
                self.last_status_at = Some(now);
                false
            }
            Some(at) => now.saturating_sub(at) >= self.settings.status_interval,
        };
        if due {
            log::info!(
                "status active={} camera_health={} {}",
                self.controller.is_active(),
                self.camera.source().is_healthy(),
                format_stats(&self.stats)
            );
            self.last_status_at = Some(now);
        }
    }
}

fn format_stats(stats: &UplinkStats) -> String {
    format!(
        "ticks={} activations={} delivered={} rejected={} failed={} capture_failures={} sensor_failures={}",
        stats.ticks,
        stats.activations,
        stats.uploads_delivered,
        stats.uploads_rejected,
        stats.uploads_failed,
        stats.capture_failures,
        stats.sensor_failures
    )
}
