//! Visible frame buffer and frame sinks.
//!
//! `DisplayFrame` is an RGB888 framebuffer that implements `DrawTarget`,
//! so text and primitives from embedded-graphics can be drawn onto it
//! alongside the alpha-blended fills the renderer needs.

use crate::error::SinkError;
use crate::render::Raster;
use embedded_graphics::pixelcolor::Rgb888;
use embedded_graphics::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};

/// Canvas fill behind everything else.
pub const BACKGROUND: Rgb888 = Rgb888::new(0x1f, 0x8a, 0xd2);
/// Colour of the fading trail.
pub const MARK: Rgb888 = Rgb888::new(0x00, 0x00, 0x00);
/// Fresh-sample highlight and current-frequency indicator.
pub const HIGHLIGHT: Rgb888 = Rgb888::new(0xff, 0x00, 0x00);
/// Current frequency label.
pub const LABEL_TEXT: Rgb888 = Rgb888::new(0x00, 0x00, 0x00);
/// Headline error line.
pub const ERROR_TEXT: Rgb888 = Rgb888::new(0x81, 0x1b, 0x23);

/// A composed frame ready to be presented.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayFrame {
    width: u32,
    height: u32,
    pixels: Vec<Rgb888>,
}

impl DisplayFrame {
    /// Create a frame filled with `background`.
    pub fn new(width: u32, height: u32, background: Rgb888) -> Self {
        Self {
            width,
            height,
            pixels: vec![background; width as usize * height as usize],
        }
    }

    /// Colour at a pixel, `None` outside the frame.
    pub fn pixel(&self, x: i32, y: i32) -> Option<Rgb888> {
        self.index(x, y).map(|i| self.pixels[i])
    }

    fn index(&self, x: i32, y: i32) -> Option<usize> {
        if x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 {
            return None;
        }
        Some(y as usize * self.width as usize + x as usize)
    }

    #[inline]
    fn set_pixel(&mut self, x: i32, y: i32, color: Rgb888) {
        if let Some(i) = self.index(x, y) {
            self.pixels[i] = color;
        }
    }

    /// Blend `color` at opacity `alpha` over a clipped rectangle.
    pub fn blend_rect(&mut self, x: i32, y: i32, width: i32, height: i32, color: Rgb888, alpha: f32) {
        if width <= 0 || height <= 0 {
            return;
        }
        let x0 = x.max(0);
        let y0 = y.max(0);
        let x1 = x.saturating_add(width).min(self.width as i32);
        let y1 = y.saturating_add(height).min(self.height as i32);

        for py in y0..y1 {
            for px in x0..x1 {
                let i = py as usize * self.width as usize + px as usize;
                self.pixels[i] = blend(self.pixels[i], color, alpha);
            }
        }
    }

    /// Paint a coverage raster in `color`, pixel for pixel from the origin.
    pub fn overlay_raster(&mut self, raster: &Raster, color: Rgb888) {
        let width = self.width.min(raster.width()) as i32;
        let height = self.height.min(raster.height()) as i32;

        for y in 0..height {
            for x in 0..width {
                let alpha = raster.alpha_at(x, y);
                if alpha > 0.0 {
                    let i = y as usize * self.width as usize + x as usize;
                    self.pixels[i] = blend(self.pixels[i], color, alpha);
                }
            }
        }
    }

    /// Packed RGB bytes, row-major.
    pub fn to_rgb_bytes(&self) -> Vec<u8> {
        self.pixels
            .iter()
            .flat_map(|c| [c.r(), c.g(), c.b()])
            .collect()
    }
}

fn blend(dst: Rgb888, src: Rgb888, alpha: f32) -> Rgb888 {
    let alpha = alpha.clamp(0.0, 1.0);
    let mix = |d: u8, s: u8| (f32::from(s) * alpha + f32::from(d) * (1.0 - alpha)).round() as u8;
    Rgb888::new(mix(dst.r(), src.r()), mix(dst.g(), src.g()), mix(dst.b(), src.b()))
}

impl OriginDimensions for DisplayFrame {
    fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

impl DrawTarget for DisplayFrame {
    type Color = Rgb888;
    type Error = core::convert::Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(point, color) in pixels {
            self.set_pixel(point.x, point.y, color);
        }
        Ok(())
    }
}

/// Destination for composed frames.
pub trait FrameSink {
    fn present(&mut self, frame: &DisplayFrame) -> Result<(), SinkError>;
}

/// Writes the latest frame to a PNG file.
///
/// The file is replaced atomically so viewers never read a partial image.
pub struct PngSink {
    path: PathBuf,
}

impl PngSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FrameSink for PngSink {
    fn present(&mut self, frame: &DisplayFrame) -> Result<(), SinkError> {
        let image = image::RgbImage::from_raw(frame.width, frame.height, frame.to_rgb_bytes())
            .ok_or(SinkError::BadDimensions {
                width: frame.width,
                height: frame.height,
            })?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Atomic write: encode to temp file, then rename
        let temp_path = self.path.with_extension("png.tmp");
        image.save_with_format(&temp_path, image::ImageFormat::Png)?;
        fs::rename(&temp_path, &self.path)?;

        Ok(())
    }
}
