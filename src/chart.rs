use std::io::Cursor;

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

use crate::error::RenderError;
use crate::models::LabelCounts;

#[derive(Debug, Clone)]
pub struct ChartInput {
    pub counts: LabelCounts,
    pub window_label: String,
}

/// Turns per-label counts into image bytes.
pub trait ChartRenderer: Send + Sync {
    fn render(&self, input: &ChartInput) -> Result<Vec<u8>, RenderError>;
}

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const AXIS: Rgb<u8> = Rgb([60, 60, 60]);
const POSITIVE: Rgb<u8> = Rgb([46, 160, 67]);
const NEGATIVE: Rgb<u8> = Rgb([207, 34, 46]);
const UNCLASSIFIED: Rgb<u8> = Rgb([150, 150, 150]);
const GAUGE_TRACK: Rgb<u8> = Rgb([225, 225, 225]);

/// PNG bar chart: one bar per label and a trend gauge along the top edge.
#[derive(Debug, Clone, Copy)]
pub struct BarChartRenderer {
    pub width: u32,
    pub height: u32,
}

impl Default for BarChartRenderer {
    fn default() -> Self {
        Self {
            width: 480,
            height: 320,
        }
    }
}

impl BarChartRenderer {
    fn fill_rect(image: &mut RgbImage, x0: u32, y0: u32, x1: u32, y1: u32, color: Rgb<u8>) {
        let x1 = x1.min(image.width());
        let y1 = y1.min(image.height());
        for y in y0..y1 {
            for x in x0..x1 {
                image.put_pixel(x, y, color);
            }
        }
    }

    fn draw(&self, counts: &LabelCounts) -> RgbImage {
        let mut image = RgbImage::from_pixel(self.width, self.height, BACKGROUND);
        let margin = self.width / 12;
        let gauge_height = self.height / 16;
        let plot_top = margin + gauge_height * 2;
        let baseline = self.height.saturating_sub(margin);

        // Trend gauge: track across the top, filled from the center toward the sign.
        let center = self.width / 2;
        let gauge_bottom = margin + gauge_height;
        Self::fill_rect(&mut image, margin, margin, self.width - margin, gauge_bottom, GAUGE_TRACK);
        let half_span = (center - margin) as f64;
        let reach = (counts.trend().abs() * half_span).round() as u32;
        if counts.trend() >= 0.0 {
            Self::fill_rect(&mut image, center, margin, center + reach, gauge_bottom, POSITIVE);
        } else {
            Self::fill_rect(&mut image, center - reach, margin, center, gauge_bottom, NEGATIVE);
        }

        let bars = [
            (counts.positive, POSITIVE),
            (counts.negative, NEGATIVE),
            (counts.unclassified, UNCLASSIFIED),
        ];
        let tallest = bars.iter().map(|(count, _)| *count).max().unwrap_or(0).max(1);
        let plot_height = baseline.saturating_sub(plot_top) as f64;
        let slot = (self.width - 2 * margin) / bars.len() as u32;
        let bar_width = slot * 3 / 5;

        for (index, (count, color)) in bars.iter().enumerate() {
            let bar_height = (*count as f64 / tallest as f64 * plot_height).round() as u32;
            let x0 = margin + slot * index as u32 + (slot - bar_width) / 2;
            let top = baseline - bar_height;
            Self::fill_rect(&mut image, x0, top, x0 + bar_width, baseline, *color);
        }

        Self::fill_rect(&mut image, margin, baseline, self.width - margin, baseline + 2, AXIS);
        image
    }
}

impl ChartRenderer for BarChartRenderer {
    fn render(&self, input: &ChartInput) -> Result<Vec<u8>, RenderError> {
        if self.width < 48 || self.height < 48 {
            return Err(RenderError::Failed(format!(
                "chart {}x{} is too small",
                self.width, self.height
            )));
        }

        let image = self.draw(&input.counts);
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(image)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .map_err(|err| RenderError::Failed(format!("{}: {err}", input.window_label)))?;
        Ok(bytes)
    }
}
