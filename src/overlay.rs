use flate2::Compression;
use flate2::write::ZlibEncoder;
use image::RgbaImage;
use log::debug;
use lopdf::{Document, Object, ObjectId, Stream, dictionary};
use std::io::Write;

use crate::error::SignError;
use crate::geometry::Rect;
use crate::pdf::{format_number, real};
use crate::render::ImageArtifact;

/// XObject name of the signature image inside the overlay page.
pub const SIGNATURE_XOBJECT: &str = "Sig";

/// One-page document carrying only the positioned signature image. Its page is
/// exactly the size of the page it will be composited onto.
#[derive(Debug, Clone)]
pub struct OverlayDocument {
    document: Document,
    page_width: f64,
    page_height: f64,
}

impl OverlayDocument {
    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn page_size(&self) -> (f64, f64) {
        (self.page_width, self.page_height)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, SignError> {
        let mut doc = self.document.clone();
        let mut bytes = Vec::new();
        doc.save_to(&mut bytes)
            .map_err(|e| SignError::MergeFailure(format!("cannot serialize overlay: {e}")))?;
        Ok(bytes)
    }
}

pub fn build_overlay(
    artifact: &ImageArtifact,
    page_width: f64,
    page_height: f64,
    rect: &Rect,
) -> Result<OverlayDocument, SignError> {
    if !(page_width.is_finite() && page_width > 0.0 && page_height.is_finite() && page_height > 0.0)
    {
        return Err(SignError::MergeFailure(format!(
            "overlay page must have a positive size, got {page_width}x{page_height}"
        )));
    }

    let mut doc = Document::with_version("1.5");
    let image_id = embed_image(&mut doc, artifact.image())
        .map_err(|e| SignError::MergeFailure(format!("cannot encode signature image: {e}")))?;

    let draw_ops = format!(
        "q\n{} 0 0 {} {} {} cm\n/{} Do\nQ\n",
        format_number(rect.width),
        format_number(rect.height),
        format_number(rect.x),
        format_number(rect.y),
        SIGNATURE_XOBJECT
    );
    let content_id = doc.add_object(Stream::new(dictionary! {}, draw_ops.into_bytes()));

    let pages_id = doc.new_object_id();
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), real(page_width), real(page_height)],
        "Resources" => dictionary! {
            "XObject" => dictionary! { SIGNATURE_XOBJECT => image_id },
        },
        "Contents" => content_id,
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![Object::Reference(page_id)],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    debug!(
        "Built {}x{} overlay with {}x{} px signature at ({}, {})",
        format_number(page_width),
        format_number(page_height),
        artifact.width(),
        artifact.height(),
        format_number(rect.x),
        format_number(rect.y)
    );

    Ok(OverlayDocument {
        document: doc,
        page_width,
        page_height,
    })
}

/// Adds the image as a Flate-compressed RGB XObject whose alpha channel becomes
/// an `SMask`, so transparent pixels leave the page underneath visible.
fn embed_image(doc: &mut Document, image: &RgbaImage) -> std::io::Result<ObjectId> {
    let (width, height) = image.dimensions();
    let mut rgb_buf = Vec::with_capacity((width * height * 3) as usize);
    let mut alpha_buf = Vec::with_capacity((width * height) as usize);
    for pixel in image.pixels() {
        let [r, g, b, a] = pixel.0;
        rgb_buf.extend_from_slice(&[r, g, b]);
        alpha_buf.push(a);
    }

    let smask_id = doc.add_object(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width as i64,
            "Height" => height as i64,
            "ColorSpace" => "DeviceGray",
            "BitsPerComponent" => 8,
            "Filter" => "FlateDecode",
        },
        deflate(&alpha_buf)?,
    ));

    Ok(doc.add_object(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width as i64,
            "Height" => height as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
            "Filter" => "FlateDecode",
            "SMask" => Object::Reference(smask_id),
        },
        deflate(&rgb_buf)?,
    )))
}

fn deflate(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}
