//! Normalized click position → absolute signature rectangle.
//!
//! Viewers report `y_pct` top-down (0 = top edge) while PDF user space has its
//! origin at the bottom-left, so the vertical fraction is flipped here.

use crate::error::SignError;

pub const DEFAULT_WIDTH_RATIO: f64 = 0.30;

/// Placement rectangle in PDF points, bottom-left origin. May extend past the page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SignatureSize {
    /// Width as a fraction of the page width, height from the aspect ratio.
    Relative(f64),
    /// Explicit size in points; a missing side follows the aspect ratio.
    Explicit {
        width: Option<f64>,
        height: Option<f64>,
    },
}

impl Default for SignatureSize {
    fn default() -> Self {
        SignatureSize::Relative(DEFAULT_WIDTH_RATIO)
    }
}

/// `aspect_ratio` is image height / image width.
pub fn compute_placement(
    page_width: f64,
    page_height: f64,
    x_pct: f64,
    y_pct: f64,
    aspect_ratio: f64,
    size: SignatureSize,
) -> Result<Rect, SignError> {
    check_fraction("x_pct", x_pct)?;
    check_fraction("y_pct", y_pct)?;
    if !(page_width.is_finite() && page_width > 0.0 && page_height.is_finite() && page_height > 0.0)
    {
        return Err(SignError::InvalidCoordinate(format!(
            "page size must be positive, got {page_width}x{page_height}"
        )));
    }

    let ratio = if aspect_ratio.is_finite() && aspect_ratio > 0.0 {
        aspect_ratio
    } else {
        1.0
    };

    let (width, height) = match size {
        SignatureSize::Relative(fraction) => {
            let fraction = positive("width ratio", fraction)?;
            let width = page_width * fraction;
            (width, width * ratio)
        }
        SignatureSize::Explicit { width, height } => {
            let width = width.map(|w| positive("width", w)).transpose()?;
            let height = height.map(|h| positive("height", h)).transpose()?;
            match (width, height) {
                (Some(w), Some(h)) => (w, h),
                (Some(w), None) => (w, w * ratio),
                (None, Some(h)) => (h / ratio, h),
                (None, None) => {
                    let width = page_width * DEFAULT_WIDTH_RATIO;
                    (width, width * ratio)
                }
            }
        }
    };

    Ok(Rect {
        x: page_width * x_pct - width / 2.0,
        y: page_height * (1.0 - y_pct) - height / 2.0,
        width,
        height,
    })
}

fn check_fraction(name: &str, value: f64) -> Result<(), SignError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(SignError::InvalidCoordinate(format!(
            "{name} must be within [0, 1], got {value}"
        )))
    }
}

fn positive(name: &str, value: f64) -> Result<f64, SignError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(SignError::InvalidCoordinate(format!(
            "signature {name} must be positive, got {value}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < EPS
    }

    #[test]
    fn letter_page_default_sizing() {
        // 800x200 text canvas -> ratio 0.25
        let rect = compute_placement(612.0, 792.0, 0.5, 0.85, 0.25, SignatureSize::default()).unwrap();

        assert!(close(rect.width, 183.6));
        assert!(close(rect.height, 45.9));
        let (cx, cy) = rect.center();
        assert!(close(cx, 306.0));
        assert!(close(cy, 118.8));
        assert!(close(rect.x, 306.0 - 91.8));
        assert!(close(rect.y, 118.8 - 22.95));
    }

    #[test]
    fn corners_anchor_the_center() {
        let top_left = compute_placement(612.0, 792.0, 0.0, 0.0, 0.5, SignatureSize::default()).unwrap();
        let (cx, cy) = top_left.center();
        assert!(close(cx, 0.0));
        assert!(close(cy, 792.0));

        let bottom_right =
            compute_placement(612.0, 792.0, 1.0, 1.0, 0.5, SignatureSize::default()).unwrap();
        let (cx, cy) = bottom_right.center();
        assert!(close(cx, 612.0));
        assert!(close(cy, 0.0));
        // not clamped to the page
        assert!(bottom_right.x + bottom_right.width > 612.0);
        assert!(bottom_right.y < 0.0);
    }

    #[test]
    fn out_of_range_fractions_are_rejected() {
        for (x, y) in [(-0.01, 0.5), (0.5, 1.01), (f64::NAN, 0.5), (0.5, f64::INFINITY)] {
            let err = compute_placement(612.0, 792.0, x, y, 1.0, SignatureSize::default()).unwrap_err();
            assert!(matches!(err, SignError::InvalidCoordinate(_)), "{x},{y}");
        }
    }

    #[test]
    fn explicit_overrides() {
        let both = SignatureSize::Explicit {
            width: Some(100.0),
            height: Some(20.0),
        };
        let rect = compute_placement(612.0, 792.0, 0.5, 0.5, 0.25, both).unwrap();
        assert!(close(rect.width, 100.0) && close(rect.height, 20.0));

        let width_only = SignatureSize::Explicit {
            width: Some(100.0),
            height: None,
        };
        let rect = compute_placement(612.0, 792.0, 0.5, 0.5, 0.25, width_only).unwrap();
        assert!(close(rect.height, 25.0));

        let bad = SignatureSize::Explicit {
            width: Some(0.0),
            height: Some(20.0),
        };
        assert!(matches!(
            compute_placement(612.0, 792.0, 0.5, 0.5, 0.25, bad),
            Err(SignError::InvalidCoordinate(_))
        ));
    }

    #[test]
    fn degenerate_aspect_ratio_falls_back_to_square() {
        let rect = compute_placement(600.0, 800.0, 0.5, 0.5, 0.0, SignatureSize::default()).unwrap();
        assert!(close(rect.width, rect.height));
    }

    #[test]
    fn placement_is_deterministic() {
        let a = compute_placement(595.0, 842.0, 0.3, 0.7, 0.4, SignatureSize::default()).unwrap();
        let b = compute_placement(595.0, 842.0, 0.3, 0.7, 0.4, SignatureSize::default()).unwrap();
        assert_eq!(a, b);
    }
}
