//! Overlay rendering.
//!
//! `Renderer::render` never touches the source frame; it draws on a copy.

mod glyphs;

pub use glyphs::{draw_text, text_size};

use image::{imageops, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

use crate::detect::Detection;
use crate::frame::{Frame, Stats};

const BOX_COLOR: [u8; 3] = [0, 255, 0];
const LABEL_TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
const PANEL_BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);
const PANEL_TEXT_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const LABEL_SCALE: u32 = 2;
const PANEL_SCALE: u32 = 2;
const PANEL_LEFT: i32 = 10;
const PANEL_MIN_RIGHT: i32 = 200;
const PANEL_FIRST_BASELINE: i32 = 30;
const PANEL_LINE_STEP: i32 = 25;
/// Weight of the panel layer when blended over the frame.
pub const PANEL_WEIGHT: f32 = 0.2;

#[derive(Clone, Debug)]
pub struct RendererConfig {
    /// Backend/device shown in the metrics panel.
    pub device_label: String,
    /// Caption for the visible-count line, e.g. `PERSONS`.
    pub count_label: String,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            device_label: "CPU".to_string(),
            count_label: "PERSONS".to_string(),
        }
    }
}

impl RendererConfig {
    /// Panel captions for a detector filtered to `classes`.
    pub fn for_detector(device_label: &str, classes: &[String]) -> Self {
        let count_label = match classes {
            [only] => format!("{}S", only.to_uppercase()),
            _ => "OBJECTS".to_string(),
        };
        Self {
            device_label: device_label.to_string(),
            count_label,
        }
    }
}

pub struct Renderer {
    config: RendererConfig,
}

impl Renderer {
    pub fn new(config: RendererConfig) -> Self {
        Self { config }
    }

    /// Draw faded detections and the metrics panel onto a copy of `frame`.
    pub fn render(&self, frame: &Frame, detections: &[(Detection, f32)], stats: &Stats) -> Frame {
        let mut out = frame.clone();
        for (detection, alpha) in detections {
            draw_detection(&mut out, detection, *alpha);
        }
        self.draw_panel(&mut out, stats);
        out
    }

    /// Text lines of the metrics panel. The count line shows the visible
    /// (tracked) count, not the smoothed one.
    pub fn panel_lines(&self, stats: &Stats) -> Vec<String> {
        vec![
            format!("FPS: {:.1}", stats.fps),
            format!("{}: {}", self.config.count_label, stats.visible_detections),
            format!("LATENCY: {:.1}ms", stats.last_inference_latency_ms),
            format!("DEVICE: {}", self.config.device_label.to_uppercase()),
        ]
    }

    fn draw_panel(&self, image: &mut RgbImage, stats: &Stats) {
        let lines = self.panel_lines(stats);
        let (_, text_h) = text_size("0", PANEL_SCALE);
        let widest = lines
            .iter()
            .map(|line| text_size(line, PANEL_SCALE).0 as i32)
            .max()
            .unwrap_or(0);
        let right = PANEL_MIN_RIGHT.max(PANEL_LEFT + 5 + widest + 5);
        let top = PANEL_FIRST_BASELINE - 20;
        let bottom = PANEL_FIRST_BASELINE + (lines.len() as i32 - 1) * PANEL_LINE_STEP + 5;

        let Some((x0, y0, x1, y1)) = clip(image, PANEL_LEFT, top, right, bottom) else {
            return;
        };
        let mut layer = imageops::crop_imm(image, x0, y0, x1 - x0, y1 - y0).to_image();
        let (ox, oy) = (x0 as i32, y0 as i32);
        for (i, line) in lines.iter().enumerate() {
            let baseline = PANEL_FIRST_BASELINE + i as i32 * PANEL_LINE_STEP;
            draw_filled_rect_mut(
                &mut layer,
                Rect::at(PANEL_LEFT - ox, baseline - 20 - oy)
                    .of_size((right - PANEL_LEFT) as u32, 25),
                PANEL_BACKGROUND,
            );
            draw_text(
                &mut layer,
                PANEL_LEFT + 5 - ox,
                baseline - text_h as i32 - oy,
                line,
                PANEL_TEXT_COLOR,
                PANEL_SCALE,
            );
        }

        for (lx, ly, overlay) in layer.enumerate_pixels() {
            let base = image.get_pixel_mut(x0 + lx, y0 + ly);
            *base = mix(*base, *overlay, PANEL_WEIGHT);
        }
    }
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new(RendererConfig::default())
    }
}

/// Box color for a detection faded to `alpha`.
pub fn faded_color(alpha: f32) -> Rgb<u8> {
    let alpha = alpha.clamp(0.0, 1.0);
    Rgb(BOX_COLOR.map(|c| (c as f32 * alpha) as u8))
}

fn draw_detection(image: &mut RgbImage, detection: &Detection, alpha: f32) {
    let color = faded_color(alpha);
    // Edges past the frame are never drawn; keep one pixel of slack so a
    // box that starts outside still has no border on that side.
    let (w, h) = (image.width() as i32, image.height() as i32);
    let (x1, y1) = (
        detection.x1.min(detection.x2).clamp(-1, w),
        detection.y1.min(detection.y2).clamp(-1, h),
    );
    let (x2, y2) = (
        detection.x1.max(detection.x2).clamp(-1, w),
        detection.y1.max(detection.y2).clamp(-1, h),
    );

    // Two nested outlines for a 2px border.
    for inset in 0..2 {
        let w = x2 - x1 + 1 - 2 * inset;
        let h = y2 - y1 + 1 - 2 * inset;
        if w > 0 && h > 0 {
            let rect = Rect::at(x1 + inset, y1 + inset).of_size(w as u32, h as u32);
            draw_hollow_rect_mut(image, rect, color);
        }
    }

    let text = format!("{} {:.2}", detection.label, detection.confidence);
    let (text_w, text_h) = text_size(&text, LABEL_SCALE);
    let background_top = y1 - text_h as i32 - 10;
    blend_rect(image, x1, background_top, x1 + text_w as i32, y1, color, alpha);
    draw_text(
        image,
        x1,
        y1 - 5 - text_h as i32,
        &text,
        LABEL_TEXT_COLOR,
        LABEL_SCALE,
    );
}

/// Clip a half-open rectangle to the image. `None` when nothing remains.
fn clip(image: &RgbImage, left: i32, top: i32, right: i32, bottom: i32) -> Option<(u32, u32, u32, u32)> {
    let x0 = left.clamp(0, image.width() as i32);
    let y0 = top.clamp(0, image.height() as i32);
    let x1 = right.clamp(0, image.width() as i32);
    let y1 = bottom.clamp(0, image.height() as i32);
    if x1 <= x0 || y1 <= y0 {
        None
    } else {
        Some((x0 as u32, y0 as u32, x1 as u32, y1 as u32))
    }
}

/// Blend `color` over the rectangle at `alpha`; the frame keeps `1 - alpha`.
fn blend_rect(
    image: &mut RgbImage,
    left: i32,
    top: i32,
    right: i32,
    bottom: i32,
    color: Rgb<u8>,
    alpha: f32,
) {
    let Some((x0, y0, x1, y1)) = clip(image, left, top, right, bottom) else {
        return;
    };
    for y in y0..y1 {
        for x in x0..x1 {
            let base = image.get_pixel_mut(x, y);
            *base = mix(*base, color, alpha);
        }
    }
}

/// `base * (1 - weight) + over * weight`, rounded per channel.
fn mix(base: Rgb<u8>, over: Rgb<u8>, weight: f32) -> Rgb<u8> {
    let weight = weight.clamp(0.0, 1.0);
    let mut out = base;
    for c in 0..3 {
        let value = base.0[c] as f32 * (1.0 - weight) + over.0[c] as f32 * weight;
        out.0[c] = value.round().clamp(0.0, 255.0) as u8;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::StreamStatus;

    fn gray_frame() -> Frame {
        RgbImage::from_pixel(320, 240, Rgb([100, 100, 100]))
    }

    fn person(x1: i32, y1: i32, x2: i32, y2: i32) -> Detection {
        Detection {
            x1,
            y1,
            x2,
            y2,
            confidence: 0.87,
            label: "PERSON".to_string(),
        }
    }

    #[test]
    fn render_leaves_source_untouched() {
        let frame = gray_frame();
        let stats = Stats::default();
        let out = Renderer::default().render(&frame, &[(person(100, 100, 200, 200), 1.0)], &stats);
        assert!(frame.pixels().all(|p| p.0 == [100, 100, 100]));
        assert_ne!(out, frame);
    }

    #[test]
    fn box_color_scales_with_alpha() {
        let frame = gray_frame();
        let out = Renderer::default().render(
            &frame,
            &[(person(100, 100, 200, 200), 0.5)],
            &Stats::default(),
        );
        assert_eq!(out.get_pixel(150, 200).0, [0, 127, 0]);
        assert_eq!(out.get_pixel(100, 150).0, [0, 127, 0]);
        assert_eq!(out.get_pixel(150, 150).0, [100, 100, 100]);
    }

    #[test]
    fn label_background_lets_frame_show_through() {
        let frame = gray_frame();
        let out = Renderer::default().render(
            &frame,
            &[(person(100, 120, 200, 200), 0.5)],
            &Stats::default(),
        );
        // Row just above the box top, left of the first glyph column, is pure background.
        let p = out.get_pixel(100, 117).0;
        assert_eq!(p, mix(Rgb([100, 100, 100]), faded_color(0.5), 0.5).0);
        assert_ne!(p, faded_color(0.5).0);
    }

    #[test]
    fn panel_is_blended_at_fixed_weight() {
        let frame = RgbImage::from_pixel(320, 240, Rgb([200, 200, 200]));
        let out = Renderer::default().render(&frame, &[], &Stats::default());
        // Background corner of the first panel line: 0.8 * frame + 0.2 * black.
        assert_eq!(out.get_pixel(11, 11).0, [160, 160, 160]);
        // Far from the panel nothing changes.
        assert_eq!(out.get_pixel(300, 200).0, [200, 200, 200]);
    }

    #[test]
    fn panel_reports_visible_count_not_stable_count() {
        let renderer = Renderer::default();
        let stats = Stats {
            visible_detections: 3,
            stable_detections: 1,
            fps: 29.94,
            last_inference_latency_ms: 42.0,
            status: StreamStatus::Active,
        };
        let lines = renderer.panel_lines(&stats);
        assert_eq!(lines[0], "FPS: 29.9");
        assert_eq!(lines[1], "PERSONS: 3");
        assert_eq!(lines[2], "LATENCY: 42.0ms");
        assert_eq!(lines[3], "DEVICE: CPU");
    }

    #[test]
    fn boxes_partially_outside_frame_are_clipped() {
        let frame = gray_frame();
        let out = Renderer::default().render(
            &frame,
            &[(person(-50, -50, 400, 300), 1.0)],
            &Stats::default(),
        );
        assert_eq!(out.dimensions(), frame.dimensions());
    }

    #[test]
    fn count_label_follows_class_filter() {
        let single = RendererConfig::for_detector("cpu", &["person".to_string()]);
        assert_eq!(single.count_label, "PERSONS");
        let many = RendererConfig::for_detector("cpu", &["person".to_string(), "dog".to_string()]);
        assert_eq!(many.count_label, "OBJECTS");
    }

    #[test]
    fn extreme_box_coordinates_do_not_overflow() {
        let frame = gray_frame();
        let out = Renderer::default().render(
            &frame,
            &[(person(i32::MIN, i32::MIN, i32::MAX, i32::MAX), 1.0)],
            &Stats::default(),
        );
        assert_eq!(out.dimensions(), frame.dimensions());
    }

    #[test]
    fn panel_background_covers_each_line() {
        let frame = RgbImage::from_pixel(320, 240, Rgb([200, 200, 200]));
        let out = Renderer::default().render(&frame, &[], &Stats::default());
        // Right edge of the first line's background, clear of any text.
        assert_eq!(out.get_pixel(199, 12).0, [160, 160, 160]);
        assert_eq!(out.get_pixel(200, 12).0, [200, 200, 200]);
    }
}
