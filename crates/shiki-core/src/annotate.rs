//! Captioned copies of classified images.
//!
//! An annotated copy is the source image, optionally centred on a white
//! canvas, with a white band underneath. The band carries two lines: the
//! destination label with all four season probabilities, then every
//! uncertainty score with the active metric starred.
//!
//! Text is drawn with a built-in 5x7 bitmap font, so the caption is upper
//! case ASCII; characters without a glyph render as blanks.

use std::fmt;
use std::io::Cursor;
use std::path::Path;
use std::str::FromStr;

use image::{DynamicImage, ImageFormat, ImageReader, Rgb, RgbImage};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ReorganizeError};
use crate::types::{ClassificationResult, Season};
use crate::uncertainty::Metric;

/// Height of the caption band added below the image.
pub const BAND_HEIGHT: u32 = 60;

const GLYPH_WIDTH: u32 = 5;
const GLYPH_HEIGHT: u32 = 7;
/// Pixels per font dot.
const SCALE: u32 = 2;
const MARGIN: u32 = 10;
const LINE_GAP: u32 = 25;

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const INK: Rgb<u8> = Rgb([0, 0, 0]);
const RULE: Rgb<u8> = Rgb([200, 200, 200]);

/// Minimum canvas an image is centred on before captioning, `WxH`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CanvasSize {
    pub width: u32,
    pub height: u32,
}

impl FromStr for CanvasSize {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            ConfigError::ValidationError(format!(
                "annotate size must look like 1280x720, got {s:?}"
            ))
        };
        let lowered = s.trim().to_ascii_lowercase();
        let (w, h) = lowered.split_once('x').ok_or_else(invalid)?;
        match (w.trim().parse::<u32>(), h.trim().parse::<u32>()) {
            (Ok(width), Ok(height)) if width > 0 && height > 0 => Ok(Self { width, height }),
            _ => Err(invalid()),
        }
    }
}

impl TryFrom<String> for CanvasSize {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CanvasSize> for String {
    fn from(size: CanvasSize) -> Self {
        size.to_string()
    }
}

impl fmt::Display for CanvasSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Renders captioned copies.
#[derive(Debug, Clone, Copy)]
pub struct Annotator {
    metric: Metric,
    canvas: Option<CanvasSize>,
}

impl Annotator {
    /// `metric` is the one starred in the caption.
    pub fn new(metric: Metric, canvas: Option<CanvasSize>) -> Self {
        Self { metric, canvas }
    }

    /// The two caption lines for `result`.
    pub fn caption(&self, result: &ClassificationResult) -> [String; 2] {
        let seasons = Season::ALL
            .iter()
            .map(|&s| format!("{}: {:.3}", s.as_str(), result.probabilities.get(s)))
            .collect::<Vec<_>>()
            .join(" | ");
        let scores = Metric::ALL
            .iter()
            .map(|&m| {
                let star = if m == self.metric { "*" } else { "" };
                format!("{}: {:.3}{star}", m.as_str(), m.score(&result.probabilities))
            })
            .collect::<Vec<_>>()
            .join(" | ");
        [
            format!("result: {} | {seasons}", result.folder_name()),
            format!("{scores} (*=active)"),
        ]
    }

    /// Pad `image` to the canvas (never cropping) and append the caption band.
    pub fn render(&self, image: &DynamicImage, result: &ClassificationResult) -> RgbImage {
        let body = match self.canvas {
            Some(canvas) => pad(image.to_rgb8(), canvas),
            None => image.to_rgb8(),
        };
        let (width, height) = body.dimensions();

        let mut out = RgbImage::from_pixel(width, height + BAND_HEIGHT, WHITE);
        image::imageops::replace(&mut out, &body, 0, 0);
        if width > 0 {
            draw_filled_rect_mut(&mut out, Rect::at(0, height as i32).of_size(width, 1), RULE);
        }

        let mut y = height + MARGIN;
        for line in self.caption(result) {
            draw_text(&mut out, MARGIN, y, &line);
            y += LINE_GAP;
        }
        out
    }

    /// Decode `result.path`, render it and encode it in the format named by
    /// the file extension, or the sniffed format when the extension is unknown.
    pub fn encode(&self, result: &ClassificationResult) -> Result<Vec<u8>, ReorganizeError> {
        let path = &result.path;
        let failed = |message: String| ReorganizeError::Annotate {
            path: path.to_path_buf(),
            message,
        };

        let reader = ImageReader::open(path)
            .and_then(ImageReader::with_guessed_format)
            .map_err(|e| ReorganizeError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;
        let format = output_format(path, reader.format());
        let image = reader.decode().map_err(|e| failed(e.to_string()))?;

        let rendered = DynamicImage::ImageRgb8(self.render(&image, result));
        let mut buf = Cursor::new(Vec::new());
        rendered
            .write_to(&mut buf, format)
            .map_err(|e| failed(e.to_string()))?;
        Ok(buf.into_inner())
    }
}

fn output_format(path: &Path, sniffed: Option<ImageFormat>) -> ImageFormat {
    ImageFormat::from_path(path)
        .ok()
        .or(sniffed)
        .unwrap_or(ImageFormat::Png)
}

/// Centre `image` on a white canvas at least `canvas` in each direction.
fn pad(image: RgbImage, canvas: CanvasSize) -> RgbImage {
    let (w, h) = image.dimensions();
    if w >= canvas.width && h >= canvas.height {
        return image;
    }
    let (cw, ch) = (canvas.width.max(w), canvas.height.max(h));
    let mut out = RgbImage::from_pixel(cw, ch, WHITE);
    image::imageops::replace(&mut out, &image, i64::from((cw - w) / 2), i64::from((ch - h) / 2));
    out
}

fn draw_text(img: &mut RgbImage, x: u32, y: u32, text: &str) {
    let advance = (GLYPH_WIDTH + 1) * SCALE;
    for (i, ch) in text.chars().enumerate() {
        let origin_x = x + i as u32 * advance;
        if origin_x >= img.width() {
            break;
        }
        for (row, &bits) in glyph(ch).iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if bits & (1 << (GLYPH_WIDTH - 1 - col)) == 0 {
                    continue;
                }
                let dot = Rect::at(
                    (origin_x + col * SCALE) as i32,
                    (y + row as u32 * SCALE) as i32,
                )
                .of_size(SCALE, SCALE);
                draw_filled_rect_mut(img, dot, INK);
            }
        }
    }
}

/// Row bitmaps, most significant of the low five bits leftmost.
fn glyph(ch: char) -> [u8; GLYPH_HEIGHT as usize] {
    match ch.to_ascii_uppercase() {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11110],
        'E' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'J' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b10001, 0b11001, 0b10101, 0b10011, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b10000, 0b01110, 0b00001, 0b00001, 0b11110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010],
        'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
        'Y' => [0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00110, 0b01000, 0b10000, 0b11111],
        '3' => [0b01110, 0b10001, 0b00001, 0b00110, 0b00001, 0b10001, 0b01110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b01110, 0b10000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b10000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00001, 0b01110],
        '.' => [0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b01100, 0b01100],
        ':' => [0b00000, 0b01100, 0b01100, 0b00000, 0b01100, 0b01100, 0b00000],
        '|' => [0b00100; 7],
        '*' => [0b00000, 0b00100, 0b10101, 0b01110, 0b10101, 0b00100, 0b00000],
        '_' => [0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b11111],
        '=' => [0b00000, 0b00000, 0b11111, 0b00000, 0b11111, 0b00000, 0b00000],
        '-' => [0b00000, 0b00000, 0b00000, 0b11111, 0b00000, 0b00000, 0b00000],
        '(' => [0b00010, 0b00100, 0b01000, 0b01000, 0b01000, 0b00100, 0b00010],
        ')' => [0b01000, 0b00100, 0b00010, 0b00010, 0b00010, 0b00100, 0b01000],
        _ => [0; 7],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SeasonProbabilities;
    use std::path::PathBuf;

    fn winter() -> ClassificationResult {
        ClassificationResult::evaluate(
            PathBuf::from("w.png"),
            SeasonProbabilities::from_array([0.1, 0.1, 0.1, 0.7]),
            Metric::Entropy,
            0.99,
        )
    }

    fn ink_rows(img: &RgbImage) -> Vec<u32> {
        let mut rows: Vec<u32> = img
            .enumerate_pixels()
            .filter(|(_, _, p)| **p == INK)
            .map(|(_, y, _)| y)
            .collect();
        rows.dedup();
        rows
    }

    #[test]
    fn test_canvas_size_parse() {
        assert_eq!(
            "1280X720".parse::<CanvasSize>().unwrap(),
            CanvasSize { width: 1280, height: 720 }
        );
        for bad in ["1280", "0x720", "axb", "12x-3"] {
            assert!(bad.parse::<CanvasSize>().is_err(), "{bad}");
        }
        assert_eq!(String::from(CanvasSize { width: 4, height: 3 }), "4x3");
    }

    #[test]
    fn test_caption_stars_active_metric() {
        let [first, second] = Annotator::new(Metric::Entropy, None).caption(&winter());
        assert!(first.starts_with("result: winter | spring: 0.100"));
        assert!(first.ends_with("winter: 0.700"));
        assert!(second.contains("entropy: "));
        assert_eq!(second.matches('*').count(), 2);
        let starred = second.split(" | ").find(|part| part.contains('*')).unwrap();
        assert!(starred.starts_with("entropy: "));
    }

    #[test]
    fn test_render_appends_band_with_text_below_image() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(400, 30, Rgb([10, 120, 200])));
        let out = Annotator::new(Metric::Probability, None).render(&image, &winter());

        assert_eq!(out.dimensions(), (400, 30 + BAND_HEIGHT));
        assert_eq!(*out.get_pixel(5, 5), Rgb([10, 120, 200]));
        let rows = ink_rows(&out);
        assert!(!rows.is_empty());
        assert!(rows.iter().all(|&y| y > 30));
    }

    #[test]
    fn test_render_pads_to_canvas_without_cropping() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(20, 10, Rgb([0, 200, 0])));
        let canvas = CanvasSize { width: 60, height: 40 };
        let out = Annotator::new(Metric::Entropy, Some(canvas)).render(&image, &winter());
        assert_eq!(out.dimensions(), (60, 40 + BAND_HEIGHT));
        assert_eq!(*out.get_pixel(0, 0), WHITE);
        assert_eq!(*out.get_pixel(30, 20), Rgb([0, 200, 0]));

        let wide = DynamicImage::ImageRgb8(RgbImage::from_pixel(100, 10, Rgb([0, 200, 0])));
        let out = Annotator::new(Metric::Entropy, Some(canvas)).render(&wide, &winter());
        assert_eq!(out.dimensions(), (100, 40 + BAND_HEIGHT));
    }

    #[test]
    fn test_output_format_prefers_extension() {
        assert_eq!(
            output_format(Path::new("a.jpg"), Some(ImageFormat::Png)),
            ImageFormat::Jpeg
        );
        assert_eq!(
            output_format(Path::new("a.bin"), Some(ImageFormat::Bmp)),
            ImageFormat::Bmp
        );
        assert_eq!(output_format(Path::new("a"), None), ImageFormat::Png);
    }
}
