//! Fading spectrum renderer.
//!
//! New samples are drawn into a persistent coverage raster whose opacity is
//! multiplied by [`DECAY`] on every pass, so old marks fade into a trail
//! instead of being cleared. Composition onto the visible frame lives in
//! [`FadingRenderer::compose`].

use crate::display::{DisplayFrame, BACKGROUND, ERROR_TEXT, HIGHLIGHT, LABEL_TEXT, MARK};
use crate::remote::Sample;
use embedded_graphics::mono_font::ascii::{FONT_10X20, FONT_6X12};
use embedded_graphics::mono_font::MonoTextStyle;
use embedded_graphics::prelude::*;
use embedded_graphics::text::Text;

/// Opacity kept by existing raster content on each pass.
pub const DECAY: f32 = 0.99;

/// Opacity of the bar drawn below each sample's peak.
pub const TRAIL_ALPHA: f32 = 0.1;

/// Opacity of the current-frequency indicator.
pub const INDICATOR_ALPHA: f32 = 0.2;

/// Width in pixels of bars, peaks, highlights and the indicator.
pub const MARK_WIDTH: u32 = 3;

/// Coverage below one 8-bit step is dropped so trails eventually vanish.
const ALPHA_CUTOFF: f32 = 1.0 / 255.0;

/// Frequency domain mapped onto the canvas width.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frame {
    pub min_frequency: f64,
    pub max_frequency: f64,
}

impl Frame {
    pub fn new(min_frequency: f64, max_frequency: f64) -> Self {
        Self {
            min_frequency,
            max_frequency,
        }
    }

    /// Width of the domain, or `None` when it cannot be mapped.
    ///
    /// Equal bounds and non-finite bounds are degenerate; callers skip the
    /// draw for that frame.
    pub fn span(&self) -> Option<f64> {
        let span = self.max_frequency - self.min_frequency;
        (span.is_finite() && span != 0.0).then_some(span)
    }

    /// Horizontal pixel position of `frequency` on a canvas `width` wide.
    pub fn x_for(&self, frequency: f64, width: u32) -> Option<i32> {
        let span = self.span()?;
        let x = ((frequency - self.min_frequency) / span * f64::from(width)).round();
        x.is_finite().then_some(x as i32)
    }
}

/// Persistent single-colour coverage buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    width: u32,
    height: u32,
    alpha: Vec<f32>,
}

impl Raster {
    /// Create a fully transparent raster.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            alpha: vec![0.0; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Coverage at a pixel, zero outside the raster.
    pub fn alpha_at(&self, x: i32, y: i32) -> f32 {
        self.index(x, y).map_or(0.0, |i| self.alpha[i])
    }

    /// True when nothing is drawn.
    pub fn is_clear(&self) -> bool {
        self.alpha.iter().all(|a| *a == 0.0)
    }

    fn index(&self, x: i32, y: i32) -> Option<usize> {
        if x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 {
            return None;
        }
        Some(y as usize * self.width as usize + x as usize)
    }

    /// Copy of this raster with every pixel's opacity multiplied by `factor`.
    pub fn decayed(&self, factor: f32) -> Raster {
        let alpha = self
            .alpha
            .iter()
            .map(|a| {
                let faded = a * factor;
                if faded < ALPHA_CUTOFF {
                    0.0
                } else {
                    faded
                }
            })
            .collect();

        Raster {
            width: self.width,
            height: self.height,
            alpha,
        }
    }

    /// Composite a rectangle of coverage `alpha` over the existing content.
    ///
    /// Parts outside the raster are clipped; empty or negative sizes draw nothing.
    pub fn fill_rect(&mut self, x: i32, y: i32, width: i32, height: i32, alpha: f32) {
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
                self.alpha[i] = alpha + self.alpha[i] * (1.0 - alpha);
            }
        }
    }
}

/// A full-opacity mark drawn straight onto the visible frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Highlight {
    pub x: i32,
    pub y: i32,
}

/// Output of one render pass.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderPass {
    pub raster: Raster,
    pub highlights: Vec<Highlight>,
}

/// Maps samples onto the canvas and maintains the fading trail.
#[derive(Debug, Clone)]
pub struct FadingRenderer {
    width: u32,
    height: u32,
    header_height: u32,
    strength_floor: f64,
}

impl FadingRenderer {
    /// Create a renderer for a `width` x `height` canvas.
    ///
    /// Strength 0 maps to `header_height`; `strength_floor` (negative) maps to
    /// the bottom edge.
    pub fn new(width: u32, height: u32, header_height: u32, strength_floor: f64) -> Self {
        Self {
            width,
            height,
            header_height,
            strength_floor,
        }
    }

    /// An empty raster sized for this renderer.
    pub fn blank_raster(&self) -> Raster {
        Raster::new(self.width, self.height)
    }

    /// Vertical pixel position for a signal strength.
    ///
    /// Linear, unclamped: values outside `[strength_floor, 0]` land off-canvas.
    pub fn y_for(&self, strength: f64) -> i32 {
        let header = f64::from(self.header_height);
        let drawable = f64::from(self.height) - header;
        (header + (strength / self.strength_floor) * drawable).round() as i32
    }

    /// Decay `previous` by one step and draw `samples` into the result.
    ///
    /// A degenerate frame still decays but draws nothing.
    pub fn render(&self, previous: &Raster, samples: &[Sample], frame: &Frame) -> RenderPass {
        let mut raster = previous.decayed(DECAY);
        let mut highlights = Vec::new();

        if frame.span().is_none() {
            if !samples.is_empty() {
                tracing::debug!(
                    min = frame.min_frequency,
                    max = frame.max_frequency,
                    skipped = samples.len(),
                    "degenerate frequency frame, skipping draw"
                );
            }
            return RenderPass { raster, highlights };
        }

        let width = MARK_WIDTH as i32;
        let bottom = raster.height() as i32;
        for sample in samples {
            let Some(x) = frame.x_for(sample.frequency, raster.width()) else {
                continue;
            };
            // Off-canvas peaks only need to stay off-canvas.
            let y = self
                .y_for(sample.strength)
                .clamp(-bottom, bottom.saturating_mul(2));

            raster.fill_rect(x, y, width, bottom - y, TRAIL_ALPHA);
            raster.fill_rect(x, y, width, 1, 1.0);
            highlights.push(Highlight { x, y: y - 1 });
        }

        RenderPass { raster, highlights }
    }

    /// Build the visible frame from a render pass and the live readings.
    pub fn compose(
        &self,
        raster: &Raster,
        highlights: &[Highlight],
        current_frequency: f64,
        error_message: Option<&str>,
        frame: &Frame,
    ) -> DisplayFrame {
        let mut display = DisplayFrame::new(self.width, self.height, BACKGROUND);
        let mark = MARK_WIDTH as i32;

        display.overlay_raster(raster, MARK);
        for highlight in highlights {
            display.blend_rect(highlight.x, highlight.y, mark, mark, HIGHLIGHT, 1.0);
        }

        if let Some(x) = frame.x_for(current_frequency, self.width) {
            display.blend_rect(x, 0, mark, self.height as i32, HIGHLIGHT, INDICATOR_ALPHA);
        }

        let label = format!("{} Khz", current_frequency);
        Text::new(&label, Point::new(3, 20), MonoTextStyle::new(&FONT_10X20, LABEL_TEXT))
            .draw(&mut display)
            .ok();

        if let Some(message) = error_message {
            let char_width = FONT_6X12.character_size.width;
            let max_chars = (self.width.saturating_sub(6) / char_width) as usize;
            let line: String = message.chars().take(max_chars).collect();
            let baseline = self.height as i32 - 10;
            Text::new(&line, Point::new(3, baseline), MonoTextStyle::new(&FONT_6X12, ERROR_TEXT))
                .draw(&mut display)
                .ok();
        }

        display
    }
}
