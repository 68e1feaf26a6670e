#[cfg(not(any(feature = "fast-jpeg", feature = "baseline-jpeg")))]
compile_error!("enable `fast-jpeg` or `baseline-jpeg` for MJPEG decoding");

pub mod actuator;
pub mod ancillary;
pub mod capture;
pub mod error;
pub mod pipeline;
pub mod server;
pub mod utils;

use std::path::{Path, PathBuf};

use capture::frame::PixelFormat;
use serde::{Deserialize, Serialize};

pub use capture::{DecodedFrame, Frame, FrameMetadata, FrameSource};
pub use error::{Error, Result};
pub use pipeline::broadcast::{Broadcaster, EncodedFrame, ViewerHandle};
pub use pipeline::detector::{MotionResult, MotionStatus, Region};
pub use pipeline::{Pipeline, PipelineState};

use crate::utils::FoundDevice;

/// Prefix for environment overrides, e.g. `MOTIONCAM_DETECTION__MIN_AREA=5000`
pub const ENV_PREFIX: &str = "MOTIONCAM";

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub capture: CaptureConfig,
    pub background: BackgroundConfig,
    pub detection: DetectionConfig,
    pub annotate: AnnotateConfig,
    pub encoder: EncoderConfig,
    pub server: ServerConfig,
    pub pipeline: PipelineConfig,
    pub indicator: IndicatorConfig,
    /// Auxiliary model file, loaded best-effort at startup
    pub model_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub device: FoundDevice,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: PixelFormat,
    pub buffer_count: u32,
}

/// Per-pixel mixture model tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundConfig {
    pub learning_rate: f32,
    pub mixtures: usize,
    /// Squared Mahalanobis distance under which a sample matches a component
    pub var_threshold: f32,
    pub var_init: f32,
    pub var_min: f32,
    pub var_max: f32,
    /// Share of total weight that counts as background
    pub background_ratio: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Mask values at or above this are foreground
    pub binary_threshold: u8,
    /// Side of the square dilation element, odd
    pub dilate_size: u32,
    /// Contours enclosing less than this many px² are ignored
    pub min_area: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotateConfig {
    /// TrueType font for the status label, rendered with `ab_glyph`.
    /// Built-in bitmap glyphs are used when unset or unreadable.
    pub font_path: Option<PathBuf>,
    pub label_x: u32,
    pub label_y: u32,
    pub label_scale: f32,
    pub box_thickness: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderConfig {
    pub quality: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub boundary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pin the producer thread to this core
    pub pin_core: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorConfig {
    /// sysfs LED directory, e.g. `/sys/class/leds/led0`
    pub led_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture: CaptureConfig {
                device: FoundDevice::new("/dev/video0".into(), PixelFormat::Mjpeg),
                width: 640,
                height: 480,
                fps: 30,
                format: PixelFormat::Mjpeg,
                buffer_count: 4,
            },
            background: BackgroundConfig {
                learning_rate: 0.005,
                mixtures: 3,
                var_threshold: 16.0,
                var_init: 15.0,
                var_min: 4.0,
                var_max: 75.0,
                background_ratio: 0.7,
            },
            detection: DetectionConfig {
                binary_threshold: 25,
                dilate_size: 3,
                min_area: 3000.0,
            },
            annotate: AnnotateConfig {
                font_path: None,
                label_x: 10,
                label_y: 20,
                label_scale: 1.2,
                box_thickness: 2,
            },
            encoder: EncoderConfig { quality: 80 },
            server: ServerConfig {
                bind_addr: "0.0.0.0:8080".into(),
                boundary: "MOTIONCAMFRAME".into(),
            },
            pipeline: PipelineConfig { pin_core: None },
            indicator: IndicatorConfig { led_path: None },
            model_path: None,
        }
    }
}

impl CaptureConfig {
    /// Adopt a resolved device along with the format it was resolved for
    pub fn set_device(&mut self, device: FoundDevice) {
        self.format = device.format;
        self.device = device;
    }
}

impl Config {
    /// Layer defaults, an optional TOML file and `MOTIONCAM_*` environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_detection_design() {
        let config = Config::default();
        assert_eq!(config.detection.binary_threshold, 25);
        assert_eq!(config.detection.dilate_size, 3);
        assert_eq!(config.detection.min_area, 3000.0);
        assert_eq!((config.annotate.label_x, config.annotate.label_y), (10, 20));
    }

    #[test]
    fn test_load_layers_toml_over_defaults() {
        let path = std::env::temp_dir().join(format!("motioncam-config-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            "[detection]\nmin_area = 5000.0\n\n[server]\nbind_addr = \"127.0.0.1:9000\"\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.detection.min_area, 5000.0);
        assert_eq!(config.server.bind_addr, "127.0.0.1:9000");
        // Untouched sections keep their defaults
        assert_eq!(config.detection.binary_threshold, 25);
        assert_eq!(config.capture.format, PixelFormat::Mjpeg);
    }

    #[test]
    fn test_env_overrides_layer_on_top() {
        std::env::set_var("MOTIONCAM_ENCODER__QUALITY", "55");
        let config = Config::load(None);
        std::env::remove_var("MOTIONCAM_ENCODER__QUALITY");

        let config = config.unwrap();
        assert_eq!(config.encoder.quality, 55);
        assert_eq!(config.detection.binary_threshold, 25);
    }

    #[test]
    fn test_detected_device_format_is_adopted() {
        let mut capture = Config::default().capture;
        assert_eq!(capture.format, PixelFormat::Mjpeg);

        capture.set_device(FoundDevice::new("/dev/video1".into(), PixelFormat::Yuyv4));
        assert_eq!(capture.device.path, "/dev/video1");
        assert_eq!(capture.format, PixelFormat::Yuyv4);
    }

    #[test]
    fn test_missing_config_file_is_error() {
        let missing = Path::new("/nonexistent/motioncam.toml");
        assert!(matches!(Config::load(Some(missing)), Err(Error::Config(_))));
    }
}
