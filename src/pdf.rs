use lopdf::{Dictionary, Document, Object, ObjectId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PdfError {
    #[error("PDF parsing error (lopdf): {0}")]
    Parse(#[from] lopdf::Error),
    #[error("document has no pages")]
    NoPages,
    #[error("page {0} has no usable MediaBox")]
    MissingMediaBox(usize),
}

/// Size and origin of one page, in points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageGeometry {
    pub width: f64,
    pub height: f64,
    pub origin_x: f64,
    pub origin_y: f64,
}

/// A converted document together with its per-page dimensions.
#[derive(Debug, Clone)]
pub struct PagedDocument {
    pub bytes: Vec<u8>,
    pub pages: Vec<PageGeometry>,
}

impl PagedDocument {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, PdfError> {
        let doc = Document::load_mem(&bytes)?;
        let pages = page_geometries(&doc)?;
        Ok(PagedDocument { bytes, pages })
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

pub fn page_geometries(doc: &Document) -> Result<Vec<PageGeometry>, PdfError> {
    let pages = doc.get_pages();
    if pages.is_empty() {
        return Err(PdfError::NoPages);
    }
    pages
        .values()
        .enumerate()
        .map(|(index, &page_id)| page_geometry(doc, page_id, index))
        .collect()
}

pub fn page_geometry(doc: &Document, page_id: ObjectId, index: usize) -> Result<PageGeometry, PdfError> {
    let media_box = inherited_attribute(doc, page_id, b"MediaBox")
        .ok_or(PdfError::MissingMediaBox(index))?;
    let values = resolve(doc, &media_box)
        .as_array()
        .map_err(|_| PdfError::MissingMediaBox(index))?
        .iter()
        .map(|o| number(resolve(doc, o)))
        .collect::<Option<Vec<f64>>>()
        .ok_or(PdfError::MissingMediaBox(index))?;
    let &[llx, lly, urx, ury] = values.as_slice() else {
        return Err(PdfError::MissingMediaBox(index));
    };
    let geometry = PageGeometry {
        width: (urx - llx).abs(),
        height: (ury - lly).abs(),
        origin_x: llx.min(urx),
        origin_y: lly.min(ury),
    };
    if geometry.width <= 0.0 || geometry.height <= 0.0 {
        return Err(PdfError::MissingMediaBox(index));
    }
    Ok(geometry)
}

/// Looks `key` up on the page, then up the `Parent` chain (page attributes such
/// as `MediaBox` and `Resources` are inheritable).
pub fn inherited_attribute(doc: &Document, page_id: ObjectId, key: &[u8]) -> Option<Object> {
    let mut current = Some(page_id);
    // guards against Parent cycles in broken files
    let mut depth = 0;
    while let Some(id) = current {
        if depth > 64 {
            return None;
        }
        let dict = doc.get_object(id).and_then(Object::as_dict).ok()?;
        if let Ok(value) = dict.get(key) {
            return Some(resolve(doc, value).clone());
        }
        current = dict.get(b"Parent").and_then(Object::as_reference).ok();
        depth += 1;
    }
    None
}

pub fn resolve<'a>(doc: &'a Document, object: &'a Object) -> &'a Object {
    match object {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(object),
        other => other,
    }
}

/// Resolves a dictionary-valued entry, cloning it so the caller can own and edit it.
pub fn owned_dict(doc: &Document, object: Option<&Object>) -> Dictionary {
    object
        .map(|o| resolve(doc, o))
        .and_then(|o| o.as_dict().ok())
        .cloned()
        .unwrap_or_else(Dictionary::new)
}

pub fn number(object: &Object) -> Option<f64> {
    match object {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(f) => Some(f64::from(*f)),
        _ => None,
    }
}

pub fn real(value: f64) -> Object {
    Object::Real(value as f32)
}

/// Content-stream number formatting: fixed precision without trailing zeros.
pub fn format_number(value: f64) -> String {
    let formatted = format!("{value:.4}");
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    match trimmed {
        "" | "-" | "-0" => "0".to_string(),
        other => other.to_string(),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::dictionary;

    #[test]
    fn reads_every_page_size() {
        let bytes = fixtures::document(&[(612.0, 792.0), (595.0, 842.0), (612.0, 792.0)]);
        let paged = PagedDocument::from_bytes(bytes).unwrap();

        assert_eq!(paged.page_count(), 3);
        assert_eq!(paged.pages[1].width, 595.0);
        assert_eq!(paged.pages[1].height, 842.0);
        assert_eq!(paged.pages[0].origin_x, 0.0);
    }

    #[test]
    fn media_box_is_inherited_from_the_page_tree() {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![Object::Reference(page_id)],
                "Count" => 1,
                "MediaBox" => vec![10.into(), 20.into(), 310.into(), 420.into()],
            }),
        );

        let geometry = page_geometry(&doc, page_id, 0).unwrap();
        assert_eq!(geometry.width, 300.0);
        assert_eq!(geometry.height, 400.0);
        assert_eq!((geometry.origin_x, geometry.origin_y), (10.0, 20.0));
    }

    #[test]
    fn garbage_is_not_a_document() {
        assert!(matches!(
            PagedDocument::from_bytes(b"not a pdf".to_vec()),
            Err(PdfError::Parse(_))
        ));
    }

    #[test]
    fn numbers_are_trimmed_for_content_streams() {
        assert_eq!(format_number(183.6), "183.6");
        assert_eq!(format_number(306.0), "306");
        assert_eq!(format_number(-12.25), "-12.25");
        assert_eq!(format_number(-0.00001), "0");
    }
}
