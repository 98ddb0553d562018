//! Synthetic frame shown to the backend when no video is available.
//!
//! Captions are drawn with a built-in 5x7 bitmap font (uppercase letters and
//! space; anything else renders as a blank cell).

use image::{Rgb, RgbImage};

const BACKGROUND: Rgb<u8> = Rgb([0x1e, 0x29, 0x3b]);
const FOREGROUND: Rgb<u8> = Rgb([0xff, 0xff, 0xff]);

const GLYPH_WIDTH: u32 = 5;
const GLYPH_HEIGHT: u32 = 7;

pub const TITLE: &str = "SURGICAL AGENTIC FRAMEWORK DEMO";
pub const SUBTITLE: &str = "A FRAME WILL BE CAPTURED WHEN A VIDEO IS PLAYING";

/// Rows of a 5x7 glyph, most significant of the low five bits is the left column.
fn glyph(c: char) -> [u8; 7] {
    match c.to_ascii_uppercase() {
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x0A, 0x04, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        _ => [0; 7],
    }
}

/// Width in pixels of `text` at `scale`, including one blank column between
/// glyphs.
fn text_width(text: &str, scale: u32) -> u32 {
    let n = text.chars().count() as u32;
    if n == 0 {
        return 0;
    }
    (n * (GLYPH_WIDTH + 1) - 1) * scale
}

/// Largest integer scale, at most `max_scale`, that fits `text` in `width`.
fn fit_scale(text: &str, width: u32, max_scale: u32) -> u32 {
    (1..=max_scale)
        .rev()
        .find(|&s| text_width(text, s) <= width)
        .unwrap_or(1)
}

/// Draw `text` horizontally centred with its vertical centre at `center_y`.
fn draw_centered(img: &mut RgbImage, text: &str, center_y: i64, scale: u32) {
    let origin_x = (i64::from(img.width()) - i64::from(text_width(text, scale))) / 2;
    let origin_y = center_y - i64::from(GLYPH_HEIGHT * scale) / 2;

    for (i, c) in text.chars().enumerate() {
        let cell_x = origin_x + i as i64 * i64::from((GLYPH_WIDTH + 1) * scale);
        for (row, bits) in glyph(c).iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if bits & (0x10 >> col) == 0 {
                    continue;
                }
                let px = cell_x + i64::from(col * scale);
                let py = origin_y + row as i64 * i64::from(scale);
                fill_block(img, px, py, scale);
            }
        }
    }
}

fn fill_block(img: &mut RgbImage, x: i64, y: i64, size: u32) {
    for dy in 0..i64::from(size) {
        for dx in 0..i64::from(size) {
            let (px, py) = (x + dx, y + dy);
            if px >= 0 && py >= 0 && px < i64::from(img.width()) && py < i64::from(img.height()) {
                img.put_pixel(px as u32, py as u32, FOREGROUND);
            }
        }
    }
}

/// Render the placeholder raster: dark background with a two-line caption.
pub fn render(width: u32, height: u32) -> RgbImage {
    let mut img = RgbImage::from_pixel(width, height, BACKGROUND);
    let margin = width / 16;
    let usable = width.saturating_sub(2 * margin);

    let title_scale = fit_scale(TITLE, usable, 3);
    let subtitle_scale = fit_scale(SUBTITLE, usable, 2);

    let mid = i64::from(height) / 2;
    draw_centered(&mut img, TITLE, mid - 20, title_scale);
    draw_centered(&mut img, SUBTITLE, mid + 20, subtitle_scale);
    img
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimensions_and_background() {
        let img = render(640, 360);
        assert_eq!(img.dimensions(), (640, 360));
        assert_eq!(*img.get_pixel(0, 0), BACKGROUND);
        assert_eq!(*img.get_pixel(639, 359), BACKGROUND);
    }

    #[test]
    fn test_caption_is_drawn() {
        let img = render(640, 360);
        let lit = img.pixels().filter(|p| **p == FOREGROUND).count();
        assert!(lit > 500, "expected caption pixels, got {lit}");
    }

    #[test]
    fn test_render_is_deterministic() {
        assert_eq!(render(320, 180), render(320, 180));
    }

    #[test]
    fn test_tiny_canvas_does_not_panic() {
        let img = render(8, 4);
        assert_eq!(img.dimensions(), (8, 4));
    }

    #[test]
    fn test_fit_scale_shrinks_for_narrow_canvas() {
        assert_eq!(fit_scale(TITLE, 640, 3), 3);
        assert_eq!(fit_scale(TITLE, 200, 3), 1);
    }

    #[test]
    fn test_unknown_characters_are_blank() {
        assert_eq!(glyph('?'), [0; 7]);
        assert_eq!(glyph('a'), glyph('A'));
    }
}
