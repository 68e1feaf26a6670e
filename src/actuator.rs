//! Optional status indicator driven by the motion decision

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::pipeline::detector::MotionStatus;
use crate::IndicatorConfig;

/// Fire-and-forget hardware signal. Implementations must not block for long
/// and must swallow their own failures.
pub trait Indicator: Send {
    fn signal(&mut self, status: MotionStatus);
}

impl<I: Indicator + ?Sized> Indicator for Box<I> {
    fn signal(&mut self, status: MotionStatus) {
        (**self).signal(status)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopIndicator;

impl Indicator for NoopIndicator {
    fn signal(&mut self, _status: MotionStatus) {}
}

/// Drives a Linux LED class device, e.g. `/sys/class/leds/led0`
#[derive(Debug)]
pub struct SysfsLedIndicator {
    brightness: PathBuf,
}

impl SysfsLedIndicator {
    pub fn new(led_dir: impl AsRef<Path>) -> Self {
        Self {
            brightness: led_dir.as_ref().join("brightness"),
        }
    }

    pub fn brightness_path(&self) -> &Path {
        &self.brightness
    }
}

impl Indicator for SysfsLedIndicator {
    fn signal(&mut self, status: MotionStatus) {
        let value: &[u8] = match status {
            MotionStatus::MotionDetected => b"255",
            MotionStatus::Ready => b"0",
        };
        if let Err(e) = std::fs::write(&self.brightness, value) {
            debug!("LED write to {} failed: {}", self.brightness.display(), e);
        }
    }
}

pub fn from_config(config: &IndicatorConfig) -> Box<dyn Indicator> {
    match &config.led_path {
        Some(path) => {
            info!("Motion indicator on {}", path.display());
            Box::new(SysfsLedIndicator::new(path))
        }
        None => Box::new(NoopIndicator),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn led_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("motioncam-led-{}-{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_led_follows_status() {
        let dir = led_dir("follow");
        let mut led = SysfsLedIndicator::new(&dir);

        led.signal(MotionStatus::MotionDetected);
        assert_eq!(std::fs::read_to_string(led.brightness_path()).unwrap(), "255");
        led.signal(MotionStatus::Ready);
        assert_eq!(std::fs::read_to_string(led.brightness_path()).unwrap(), "0");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_led_is_silent() {
        let mut led = SysfsLedIndicator::new("/nonexistent/leds/led0");
        led.signal(MotionStatus::MotionDetected);
        led.signal(MotionStatus::Ready);
    }

    #[test]
    fn test_unset_path_builds_noop() {
        let mut indicator = from_config(&IndicatorConfig { led_path: None });
        indicator.signal(MotionStatus::MotionDetected);
    }
}
