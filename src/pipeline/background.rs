//! Adaptive per-pixel background model
//!
//! Every pixel keeps a small mixture of Gaussians over its luma history,
//! ordered by weight. A sample that matches one of the heaviest components
//! (those whose combined weight first exceeds `background_ratio`) is
//! background; anything else is foreground. The model then moves toward the
//! sample at the configured learning rate, so a change that persists long
//! enough is eventually absorbed into the background.

use image::{GrayImage, RgbImage};

use crate::capture::DecodedFrame;
use crate::BackgroundConfig;

/// Mask value for foreground pixels
pub const FOREGROUND: u8 = 255;

/// Per-pixel deviation from the learned background, same size as its frame
#[derive(Debug, Clone)]
pub struct ForegroundMask(GrayImage);

impl ForegroundMask {
    pub fn new(image: GrayImage) -> Self {
        Self(image)
    }

    pub fn width(&self) -> u32 {
        self.0.width()
    }

    pub fn height(&self) -> u32 {
        self.0.height()
    }

    pub fn as_image(&self) -> &GrayImage {
        &self.0
    }

    pub fn into_image(self) -> GrayImage {
        self.0
    }

    pub fn foreground_pixels(&self) -> usize {
        self.0.iter().filter(|&&v| v != 0).count()
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Gaussian {
    weight: f32,
    mean: f32,
    var: f32,
}

pub struct BackgroundModel {
    config: BackgroundConfig,
    mixtures: usize,
    width: u32,
    height: u32,
    /// `mixtures` slots per pixel, heaviest first
    components: Vec<Gaussian>,
    /// Live components per pixel
    used: Vec<u8>,
    frames: u64,
}

impl BackgroundModel {
    pub fn new(config: BackgroundConfig) -> Self {
        let mixtures = config.mixtures.clamp(1, u8::MAX as usize);
        Self {
            config,
            mixtures,
            width: 0,
            height: 0,
            components: Vec::new(),
            used: Vec::new(),
            frames: 0,
        }
    }

    /// Frames absorbed since the last (re)initialization
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Drop all learned statistics; the next frame seeds a fresh model
    pub fn reset(&mut self) {
        self.components.clear();
        self.used.clear();
        self.width = 0;
        self.height = 0;
        self.frames = 0;
    }

    pub fn apply(&mut self, frame: &DecodedFrame) -> ForegroundMask {
        self.apply_luma(&luma(&frame.image))
    }

    pub fn apply_luma(&mut self, luma: &GrayImage) -> ForegroundMask {
        let (width, height) = luma.dimensions();

        if self.frames == 0 || (width, height) != (self.width, self.height) {
            self.seed(luma);
            return ForegroundMask(GrayImage::new(width, height));
        }

        let mut mask = GrayImage::new(width, height);
        let k = self.mixtures;
        let Self {
            config,
            components,
            used,
            ..
        } = self;

        for (p, (&sample, out)) in luma.iter().zip(mask.iter_mut()).enumerate() {
            let slots = &mut components[p * k..(p + 1) * k];
            if update_pixel(config, slots, &mut used[p], sample as f32) {
                *out = FOREGROUND;
            }
        }

        self.frames += 1;
        ForegroundMask(mask)
    }

    fn seed(&mut self, luma: &GrayImage) {
        let (width, height) = luma.dimensions();
        let pixels = (width * height) as usize;

        self.width = width;
        self.height = height;
        self.components = vec![Gaussian::default(); pixels * self.mixtures];
        self.used = vec![1; pixels];

        for (p, &sample) in luma.iter().enumerate() {
            self.components[p * self.mixtures] = Gaussian {
                weight: 1.0,
                mean: sample as f32,
                var: self.config.var_init,
            };
        }
        self.frames = 1;
    }
}

/// Classify one sample against its mixture, then learn from it.
/// Returns true when the sample is foreground.
fn update_pixel(config: &BackgroundConfig, slots: &mut [Gaussian], used: &mut u8, x: f32) -> bool {
    let alpha = config.learning_rate;
    let live = *used as usize;

    let mut matched = None;
    let mut background = false;
    let mut heavier = 0.0;
    for (i, g) in slots[..live].iter().enumerate() {
        let d = x - g.mean;
        if d * d < config.var_threshold * g.var {
            matched = Some(i);
            background = heavier <= config.background_ratio;
            break;
        }
        heavier += g.weight;
    }

    for g in &mut slots[..live] {
        g.weight *= 1.0 - alpha;
    }

    let live = match matched {
        Some(i) => {
            let g = &mut slots[i];
            g.weight += alpha;
            let rho = (alpha / g.weight).min(1.0);
            let d = x - g.mean;
            g.mean += rho * d;
            g.var = (g.var + rho * (d * d - g.var)).clamp(config.var_min, config.var_max);
            live
        }
        None => {
            // Evict the lightest component once all slots are taken
            let slot = live.min(slots.len() - 1);
            slots[slot] = Gaussian {
                weight: alpha,
                mean: x,
                var: config.var_init,
            };
            slot + 1
        }
    };
    *used = live as u8;

    let total: f32 = slots[..live].iter().map(|g| g.weight).sum();
    if total > 0.0 {
        for g in &mut slots[..live] {
            g.weight /= total;
        }
    }
    slots[..live].sort_by(|a, b| b.weight.total_cmp(&a.weight));

    !background
}

/// BT.601 luma with 8-bit integer weights
fn luma(image: &RgbImage) -> GrayImage {
    let (width, height) = image.dimensions();
    let pixels = image
        .pixels()
        .map(|p| {
            let [r, g, b] = p.0;
            ((77 * r as u32 + 150 * g as u32 + 29 * b as u32) >> 8) as u8
        })
        .collect();
    GrayImage::from_raw(width, height, pixels).unwrap_or_else(|| GrayImage::new(width, height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;
    use image::{Luma, Rgb};

    fn model() -> BackgroundModel {
        BackgroundModel::new(Config::default().background)
    }

    fn scene(width: u32, height: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| Luma([((x * 3 + y * 5) % 120 + 40) as u8]))
    }

    fn with_block(base: &GrayImage, x0: u32, y0: u32, side: u32) -> GrayImage {
        let mut frame = base.clone();
        for y in y0..y0 + side {
            for x in x0..x0 + side {
                frame.put_pixel(x, y, Luma([230]));
            }
        }
        frame
    }

    #[test]
    fn test_first_frame_seeds_without_foreground() {
        let mut model = model();
        let mask = model.apply_luma(&scene(32, 24));
        assert_eq!(mask.foreground_pixels(), 0);
        assert_eq!(model.frames(), 1);
    }

    #[test]
    fn test_static_scene_stays_background() {
        let mut model = model();
        let base = scene(32, 24);
        for _ in 0..40 {
            assert_eq!(model.apply_luma(&base).foreground_pixels(), 0);
        }
    }

    #[test]
    fn test_sudden_block_is_foreground() {
        let mut model = model();
        let base = scene(40, 40);
        for _ in 0..20 {
            model.apply_luma(&base);
        }

        let mask = model.apply_luma(&with_block(&base, 10, 10, 8));
        assert_eq!(mask.foreground_pixels(), 64);
        assert_eq!(mask.as_image().get_pixel(12, 12).0[0], FOREGROUND);
        assert_eq!(mask.as_image().get_pixel(0, 0).0[0], 0);
    }

    #[test]
    fn test_persistent_change_is_absorbed() {
        let mut model = model();
        let base = scene(24, 24);
        for _ in 0..10 {
            model.apply_luma(&base);
        }

        let changed = with_block(&base, 4, 4, 6);
        let mut last = usize::MAX;
        for _ in 0..150 {
            last = model.apply_luma(&changed).foreground_pixels();
        }
        assert_eq!(last, 0);
    }

    #[test]
    fn test_brief_change_leaves_background_intact() {
        let mut model = model();
        let base = scene(24, 24);
        for _ in 0..30 {
            model.apply_luma(&base);
        }
        let changed = with_block(&base, 4, 4, 6);
        for _ in 0..10 {
            assert_eq!(model.apply_luma(&changed).foreground_pixels(), 36);
        }
        assert_eq!(model.apply_luma(&base).foreground_pixels(), 0);
    }

    #[test]
    fn test_identical_inputs_are_deterministic() {
        let base = scene(16, 16);
        let changed = with_block(&base, 2, 2, 5);
        let run = || {
            let mut model = model();
            let mut masks = Vec::new();
            for i in 0..30 {
                let frame = if i % 7 == 3 { &changed } else { &base };
                masks.push(model.apply_luma(frame).into_image().into_raw());
            }
            masks
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_luma_uses_bt601_weights() {
        let mut image = RgbImage::new(4, 1);
        image.put_pixel(0, 0, Rgb([255, 0, 0]));
        image.put_pixel(1, 0, Rgb([0, 255, 0]));
        image.put_pixel(2, 0, Rgb([0, 0, 255]));
        image.put_pixel(3, 0, Rgb([90, 90, 90]));

        assert_eq!(luma(&image).into_raw(), vec![76, 149, 28, 90]);
    }

    #[test]
    fn test_resolution_change_reseeds() {
        let mut model = model();
        for _ in 0..5 {
            model.apply_luma(&scene(16, 16));
        }
        let mask = model.apply_luma(&scene(20, 10));
        assert_eq!((mask.width(), mask.height()), (20, 10));
        assert_eq!(mask.foreground_pixels(), 0);
        assert_eq!(model.frames(), 1);
    }
}
