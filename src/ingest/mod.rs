//! Frame ingestion.
//!
//! - `CameraSource`: V4L2 device (feature: capture-v4l2) or synthetic `stub://` frames
//! - `CameraSession`: scoped ownership of an open source; releases it on drop
//!
//! Sources are pull-based: the uplink loop asks for a frame only when an
//! upload is due, so capture never runs while the system is idle.

use anyhow::Result;
use std::time::Duration;

use crate::frame::Frame;

pub mod camera;
mod normalize;

pub use camera::{CameraConfig, CameraSource, CameraStats};

/// A synchronous, pull-based producer of RGB frames.
pub trait FrameSource {
    /// Open the underlying device.
    fn connect(&mut self) -> Result<()>;

    /// Block until the next frame is available.
    fn next_frame(&mut self) -> Result<Frame>;

    /// Close the underlying device. Must be safe to call more than once.
    fn release(&mut self);

    fn is_healthy(&self) -> bool {
        true
    }

    /// Human-readable name for log lines.
    fn describe(&self) -> String;
}

/// An opened frame source.
///
/// The source is connected in `open` and released in `Drop`, so every exit
/// from the polling loop (normal break, interrupt, `?` return or panic
/// unwind) gives the camera back.
pub struct CameraSession<S: FrameSource> {
    source: S,
}

impl<S: FrameSource> CameraSession<S> {
    /// Connect `source`, then wait `warmup` for exposure and white balance to settle.
    pub fn open(mut source: S, warmup: Duration) -> Result<Self> {
        source.connect()?;
        log::info!("camera {} opened", source.describe());
        if !warmup.is_zero() {
            log::debug!("camera warm-up {}ms", warmup.as_millis());
            std::thread::sleep(warmup);
        }
        Ok(Self { source })
    }

    pub fn capture(&mut self) -> Result<Frame> {
        self.source.next_frame()
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}

impl<S: FrameSource> Drop for CameraSession<S> {
    fn drop(&mut self) {
        self.source.release();
        log::info!("camera {} released", self.source.describe());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Calls {
        connects: u32,
        releases: u32,
    }

    struct CountingSource {
        calls: Rc<RefCell<Calls>>,
        fail_connect: bool,
    }

    impl FrameSource for CountingSource {
        fn connect(&mut self) -> Result<()> {
            self.calls.borrow_mut().connects += 1;
            if self.fail_connect {
                anyhow::bail!("no such device");
            }
            Ok(())
        }

        fn next_frame(&mut self) -> Result<Frame> {
            Frame::new(vec![0u8; 3], 1, 1)
        }

        fn release(&mut self) {
            self.calls.borrow_mut().releases += 1;
        }

        fn describe(&self) -> String {
            "counting".to_string()
        }
    }

    #[test]
    fn session_releases_on_drop() -> Result<()> {
        let calls = Rc::new(RefCell::new(Calls::default()));
        {
            let mut session = CameraSession::open(
                CountingSource {
                    calls: calls.clone(),
                    fail_connect: false,
                },
                Duration::ZERO,
            )?;
            session.capture()?;
            assert_eq!(calls.borrow().releases, 0);
        }
        assert_eq!(calls.borrow().connects, 1);
        assert_eq!(calls.borrow().releases, 1);
        Ok(())
    }

    #[test]
    fn session_releases_on_panic_unwind() {
        let calls = Rc::new(RefCell::new(Calls::default()));
        let inner = calls.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _session = CameraSession::open(
                CountingSource {
                    calls: inner,
                    fail_connect: false,
                },
                Duration::ZERO,
            )
            .expect("open");
            panic!("loop blew up");
        }));
        assert!(result.is_err());
        assert_eq!(calls.borrow().releases, 1);
    }

    #[test]
    fn failed_connect_does_not_create_session() {
        let calls = Rc::new(RefCell::new(Calls::default()));
        let session = CameraSession::open(
            CountingSource {
                calls: calls.clone(),
                fail_connect: true,
            },
            Duration::ZERO,
        );
        assert!(session.is_err());
        assert_eq!(calls.borrow().connects, 1);
        // The source is dropped without a session; nothing was opened to release.
        assert_eq!(calls.borrow().releases, 0);
    }
}
