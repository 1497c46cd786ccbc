use std::io::Cursor;
use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use crate::error::DetectError;
use crate::models::BoundingBox;

pub const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
const BOX_THICKNESS: u32 = 2;
const LABEL_SCALE: f32 = 18.0;
/// Height of the glyph-less tag drawn when no font is available.
const TAG_HEIGHT: u32 = 8;

/// Fonts tried in order when none is configured.
const SYSTEM_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/Library/Fonts/Arial.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// Font used for box labels.
pub struct LabelFont {
    font: FontVec,
    source: PathBuf,
}

impl std::fmt::Debug for LabelFont {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LabelFont").field("source", &self.source).finish()
    }
}

impl LabelFont {
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        let font = FontVec::try_from_vec(data)
            .map_err(|e| anyhow::anyhow!("Invalid font {}: {}", path.display(), e))?;
        Ok(Self {
            font,
            source: path.to_path_buf(),
        })
    }

    /// Load the configured font, falling back to common system fonts.
    pub fn discover(configured: Option<&Path>) -> Option<Self> {
        if let Some(path) = configured {
            match Self::from_file(path) {
                Ok(font) => return Some(font),
                Err(e) => tracing::warn!(error = %e, "Configured label font unusable"),
            }
        }
        SYSTEM_FONTS
            .iter()
            .map(Path::new)
            .filter(|p| p.is_file())
            .find_map(|p| Self::from_file(p).ok())
    }

    pub fn source(&self) -> &Path {
        &self.source
    }
}

/// Draw every box and its label onto a copy of `image`.
pub fn annotate(image: &RgbImage, boxes: &[BoundingBox], label: &str, font: Option<&LabelFont>) -> RgbImage {
    let mut canvas = image.clone();
    for bbox in boxes {
        draw_box(&mut canvas, bbox);
        draw_label(&mut canvas, bbox, label, font);
    }
    canvas
}

fn draw_box(canvas: &mut RgbImage, bbox: &BoundingBox) {
    for inset in 0..BOX_THICKNESS {
        let w = bbox.width().saturating_sub(2 * inset);
        let h = bbox.height().saturating_sub(2 * inset);
        if w == 0 || h == 0 {
            break;
        }
        let rect = Rect::at((bbox.x1 + inset) as i32, (bbox.y1 + inset) as i32).of_size(w, h);
        draw_hollow_rect_mut(canvas, rect, BOX_COLOR);
    }
}

/// Label sits on a filled tag just above the top-left corner, or just inside
/// the box when the box touches the top edge of the image.
fn draw_label(canvas: &mut RgbImage, bbox: &BoundingBox, label: &str, font: Option<&LabelFont>) {
    let scale = PxScale::from(LABEL_SCALE);
    let (text_w, text_h) = match font {
        Some(f) => text_size(scale, &f.font, label),
        None => (bbox.width().min(6 * label.len() as u32), TAG_HEIGHT),
    };
    let tag_w = (text_w + 4).min(canvas.width().saturating_sub(bbox.x1));
    let tag_h = text_h + 4;
    if tag_w == 0 {
        return;
    }

    let y = if bbox.y1 >= tag_h { bbox.y1 - tag_h } else { bbox.y1 };
    let tag_h = tag_h.min(canvas.height().saturating_sub(y));
    if tag_h == 0 {
        return;
    }
    draw_filled_rect_mut(canvas, Rect::at(bbox.x1 as i32, y as i32).of_size(tag_w, tag_h), BOX_COLOR);

    if let Some(f) = font {
        draw_text_mut(canvas, TEXT_COLOR, bbox.x1 as i32 + 2, y as i32 + 2, scale, &f.font, label);
    }
}

/// JPEG encode, then base64 with the standard alphabet.
pub fn encode_jpeg_base64(image: &RgbImage, quality: u8) -> Result<String, DetectError> {
    let mut buf = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut buf, quality)
        .encode_image(image)
        .map_err(|e| DetectError::Encoding(e.to_string()))?;
    Ok(STANDARD.encode(buf.into_inner()))
}
