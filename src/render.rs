use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use font8x8::{BASIC_FONTS, UnicodeFonts};
use image::{ImageBuffer, Rgba, RgbaImage};
use imageproc::drawing::draw_text_mut;
use log::{debug, info, warn};
use rusttype::{Font, Scale, point};
use serde_json::Value;
use std::fs;
use std::path::Path;

use crate::config::RenderConfig;
use crate::error::SignError;

const INK: Rgba<u8> = Rgba([0, 0, 0, 255]);
const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);
const TEXT_OFFSET_X: u32 = 10;
const TEXT_OFFSET_Y: u32 = 40;

const SYSTEM_FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// What the signer handed us: an encoded drawing or a typed name.
#[derive(Debug, Clone, PartialEq)]
pub enum SignaturePayload {
    Raster(Vec<u8>),
    Text(String),
}

impl SignaturePayload {
    /// Parses `data:<mime>;base64,<payload>` as produced by a canvas export.
    pub fn from_data_url(url: &str) -> Result<Self, SignError> {
        let rest = url
            .strip_prefix("data:")
            .ok_or_else(|| SignError::InvalidSignatureFormat("expected a data: URL".to_string()))?;
        let (header, data) = rest.split_once(',').ok_or_else(|| {
            SignError::InvalidSignatureFormat("data URL has no payload".to_string())
        })?;
        if !header.split(';').any(|part| part.eq_ignore_ascii_case("base64")) {
            return Err(SignError::InvalidSignatureFormat(
                "data URL is not base64 encoded".to_string(),
            ));
        }
        let bytes = B64
            .decode(data.trim())
            .map_err(|e| SignError::InvalidSignatureFormat(format!("bad base64 payload: {e}")))?;
        if bytes.is_empty() {
            return Err(SignError::InvalidSignatureFormat(
                "data URL payload is empty".to_string(),
            ));
        }
        Ok(SignaturePayload::Raster(bytes))
    }

    /// Accepts the two wire shapes: a data URL string, or
    /// `{"type": "text", "text": "..."}`.
    pub fn from_json(value: &Value) -> Result<Self, SignError> {
        match value {
            Value::String(url) => Self::from_data_url(url),
            Value::Object(map) if map.get("type").and_then(Value::as_str) == Some("text") => {
                let text = map.get("text").and_then(Value::as_str).unwrap_or_default();
                Ok(SignaturePayload::Text(text.to_string()))
            }
            _ => Err(SignError::InvalidSignatureFormat(
                "signature must be a data URL or a text signature object".to_string(),
            )),
        }
    }
}

/// Rendered signature: RGBA pixels with a transparent background.
#[derive(Debug, Clone)]
pub struct ImageArtifact {
    image: RgbaImage,
}

impl ImageArtifact {
    pub fn new(image: RgbaImage) -> Result<Self, SignError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(SignError::InvalidSignatureFormat(format!(
                "signature image has zero dimensions ({}x{})",
                image.width(),
                image.height()
            )));
        }
        Ok(ImageArtifact { image })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Height over width.
    pub fn aspect_ratio(&self) -> f64 {
        f64::from(self.height()) / f64::from(self.width())
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn has_ink(&self) -> bool {
        self.image.pixels().any(|p| p.0[3] > 0)
    }
}

enum Typeface {
    TrueType(Font<'static>),
    /// font8x8 glyphs, scaled up. Used when no font file can be loaded.
    Bitmap,
}

pub struct SignatureRenderer {
    typeface: Typeface,
    font_size: f32,
    canvas_width: u32,
    canvas_height: u32,
}

impl SignatureRenderer {
    /// Loads the configured font, falling back to system fonts and then to the
    /// built-in bitmap font. Never fails.
    pub fn from_config(config: &RenderConfig) -> Self {
        let configured = config.font_path.as_deref().and_then(|path| {
            let font = load_font(path);
            if font.is_none() {
                warn!(
                    "Signature font '{}' is unavailable. Falling back to a default font.",
                    path.display()
                );
            }
            font
        });
        let typeface = match configured.or_else(load_system_font) {
            Some(font) => Typeface::TrueType(font),
            None => {
                warn!("No TrueType font found. Text signatures use the built-in bitmap font.");
                Typeface::Bitmap
            }
        };
        Self::with_typeface(typeface, config)
    }

    pub fn with_builtin_font(config: &RenderConfig) -> Self {
        Self::with_typeface(Typeface::Bitmap, config)
    }

    fn with_typeface(typeface: Typeface, config: &RenderConfig) -> Self {
        SignatureRenderer {
            typeface,
            font_size: config.font_size.max(1.0),
            canvas_width: config.canvas_width.max(TEXT_OFFSET_X * 2 + 1),
            canvas_height: config.canvas_height.max(1),
        }
    }

    pub fn render(&self, payload: &SignaturePayload) -> Result<ImageArtifact, SignError> {
        match payload {
            SignaturePayload::Raster(bytes) => decode_raster(bytes),
            SignaturePayload::Text(text) => self.render_text(text),
        }
    }

    fn render_text(&self, text: &str) -> Result<ImageArtifact, SignError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SignError::EmptySignature);
        }

        let mut canvas: RgbaImage =
            ImageBuffer::from_pixel(self.canvas_width, self.canvas_height, TRANSPARENT);
        let available = (self.canvas_width - 2 * TEXT_OFFSET_X) as f32;
        match &self.typeface {
            Typeface::TrueType(font) => {
                let mut scale = Scale::uniform(self.font_size);
                let rendered_width = text_width(font, text, scale);
                if rendered_width > available {
                    // shrink uniformly so long names stay on the canvas
                    scale = Scale::uniform(self.font_size * available / rendered_width);
                }
                draw_text_mut(
                    &mut canvas,
                    INK,
                    TEXT_OFFSET_X as i32,
                    TEXT_OFFSET_Y as i32,
                    scale,
                    font,
                    text,
                );
            }
            Typeface::Bitmap => {
                if draw_bitmap_text(&mut canvas, text, self.font_size, available) {
                    warn!(
                        "Text signature of {} chars does not fit the {}px canvas and was clipped",
                        text.chars().count(),
                        self.canvas_width
                    );
                }
            }
        }
        debug!(
            "Rendered text signature ({} chars) onto {}x{} canvas",
            text.chars().count(),
            self.canvas_width,
            self.canvas_height
        );

        let artifact = ImageArtifact::new(canvas)?;
        if !artifact.has_ink() {
            return Err(SignError::EmptySignature);
        }
        Ok(artifact)
    }
}

fn decode_raster(bytes: &[u8]) -> Result<ImageArtifact, SignError> {
    if bytes.is_empty() {
        return Err(SignError::InvalidSignatureFormat(
            "signature image is empty".to_string(),
        ));
    }
    let image = image::load_from_memory(bytes)
        .map_err(|e| SignError::InvalidSignatureFormat(format!("cannot decode image: {e}")))?
        .to_rgba8();
    debug!(
        "Decoded raster signature {}x{}",
        image.width(),
        image.height()
    );
    let artifact = ImageArtifact::new(image)?;
    if !artifact.has_ink() {
        return Err(SignError::EmptySignature);
    }
    Ok(artifact)
}

fn load_font(path: &Path) -> Option<Font<'static>> {
    let data = fs::read(path).ok()?;
    Font::try_from_vec(data)
}

fn load_system_font() -> Option<Font<'static>> {
    SYSTEM_FONT_CANDIDATES.iter().find_map(|candidate| {
        let font = load_font(Path::new(candidate))?;
        info!("Using system font {candidate} for text signatures");
        Some(font)
    })
}

fn text_width(font: &Font<'_>, text: &str, scale: Scale) -> f32 {
    font.layout(text, scale, point(0.0, 0.0))
        .filter_map(|g| g.pixel_bounding_box().map(|bb| bb.max.x))
        .max()
        .unwrap_or(0) as f32
}

/// Returns `true` when the text ran past the right edge of the canvas.
fn draw_bitmap_text(canvas: &mut RgbaImage, text: &str, font_size: f32, available: f32) -> bool {
    let glyph_count = text.chars().count().max(1);
    let cell = (font_size / 8.0)
        .min(available / (glyph_count as f32 * 8.0))
        .floor()
        .max(1.0) as u32;
    let (width, height) = canvas.dimensions();

    for (index, ch) in text.chars().enumerate() {
        let Some(glyph) = BASIC_FONTS.get(ch).or_else(|| BASIC_FONTS.get('?')) else {
            continue;
        };
        let origin_x = TEXT_OFFSET_X + index as u32 * 8 * cell;
        for (row, &bits) in glyph.iter().enumerate() {
            for col in 0..8u32 {
                if bits & (1 << col) == 0 {
                    continue;
                }
                let x0 = origin_x + col * cell;
                let y0 = TEXT_OFFSET_Y + row as u32 * cell;
                for y in y0..(y0 + cell).min(height) {
                    for x in x0..(x0 + cell).min(width) {
                        canvas.put_pixel(x, y, INK);
                    }
                }
            }
        }
    }
    TEXT_OFFSET_X as usize + glyph_count * 8 * cell as usize > width as usize
}
