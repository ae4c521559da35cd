//! Composites an overlay page onto one page of a base document.
//!
//! The base bytes are parsed into a fresh `Document` so the caller's copy is
//! never touched. The overlay page becomes a Form XObject on the target page;
//! every other page object is carried over as-is.

use log::{debug, info};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, dictionary};
use std::collections::BTreeSet;

use crate::error::{PageIndexError, SignError};
use crate::overlay::OverlayDocument;
use crate::pdf::{self, format_number, real};

const OVERLAY_XOBJECT_PREFIX: &str = "SigOverlay";

/// Serialized, independently valid signed document.
#[derive(Debug, Clone)]
pub struct OutputDocument {
    bytes: Vec<u8>,
    page_count: usize,
}

impl OutputDocument {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }
}

pub fn merge(
    base: &[u8],
    overlay: &OverlayDocument,
    target_page_index: usize,
) -> Result<OutputDocument, SignError> {
    let mut doc = Document::load_mem(base)
        .map_err(|e| SignError::MergeFailure(format!("base document is not readable: {e}")))?;

    let pages = doc.get_pages();
    let page_count = pages.len();
    let page_id = target_page_index
        .checked_add(1)
        .and_then(|number| u32::try_from(number).ok())
        .and_then(|number| pages.get(&number).copied())
        .ok_or(SignError::InvalidPageIndex(PageIndexError::OutOfRange {
            index: target_page_index as i64,
            page_count,
        }))?;

    let geometry = pdf::page_geometry(&doc, page_id, target_page_index).map_err(merge_failure)?;
    let form_id = import_overlay(&mut doc, overlay)?;
    let name = attach_xobject(&mut doc, page_id, form_id)?;
    wrap_contents(&mut doc, page_id, &name, geometry.origin_x, geometry.origin_y)?;

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)
        .map_err(|e| SignError::MergeFailure(format!("cannot serialize output: {e}")))?;
    info!(
        "Merged overlay onto page {} of {} ({} bytes)",
        target_page_index + 1,
        page_count,
        bytes.len()
    );
    Ok(OutputDocument { bytes, page_count })
}

/// Moves the overlay's objects into `doc` (renumbered past `doc.max_id`) and
/// wraps its single page as a Form XObject. Returns the form's id.
fn import_overlay(doc: &mut Document, overlay: &OverlayDocument) -> Result<ObjectId, SignError> {
    let mut source = overlay.document().clone();
    source.renumber_objects_with(doc.max_id + 1);

    let page_id = source
        .objects
        .iter()
        .find(|(_, object)| object.type_name().unwrap_or("") == "Page")
        .map(|(&id, _)| id)
        .ok_or_else(|| SignError::MergeFailure("overlay has no page".to_string()))?;
    let content = source.get_page_content(page_id).map_err(merge_failure)?;
    let page = source
        .get_object(page_id)
        .and_then(Object::as_dict)
        .map_err(merge_failure)?;
    let resources = pdf::owned_dict(&source, page.get(b"Resources").ok());

    let mut skip: BTreeSet<ObjectId> = BTreeSet::new();
    match page.get(b"Contents") {
        Ok(Object::Reference(id)) => {
            skip.insert(*id);
        }
        Ok(Object::Array(items)) => {
            skip.extend(items.iter().filter_map(|o| o.as_reference().ok()));
        }
        _ => {}
    }

    let mut max_id = doc.max_id;
    for (id, object) in source.objects {
        let skeleton = matches!(object.type_name().unwrap_or(""), "Catalog" | "Pages" | "Page");
        if skeleton || skip.contains(&id) {
            continue;
        }
        max_id = max_id.max(id.0);
        doc.objects.insert(id, object);
    }
    doc.max_id = max_id;

    let (width, height) = overlay.page_size();
    let form = Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Form",
            "FormType" => 1,
            "BBox" => vec![0.into(), 0.into(), real(width), real(height)],
            "Resources" => resources,
        },
        content,
    );
    Ok(doc.add_object(form))
}

/// Registers the form under a name unused by the page's resources. Shared or
/// inherited resource dictionaries are copied onto the page first, so other
/// pages keep their resources unchanged.
fn attach_xobject(doc: &mut Document, page_id: ObjectId, form_id: ObjectId) -> Result<String, SignError> {
    let inherited = pdf::inherited_attribute(doc, page_id, b"Resources");
    let mut resources = pdf::owned_dict(doc, inherited.as_ref());
    let mut xobjects = pdf::owned_dict(doc, resources.get(b"XObject").ok());

    let name = unique_name(&xobjects);
    xobjects.set(name.clone(), Object::Reference(form_id));
    resources.set("XObject", xobjects);

    page_dict_mut(doc, page_id)?.set("Resources", resources);
    Ok(name)
}

fn unique_name(xobjects: &Dictionary) -> String {
    let mut name = OVERLAY_XOBJECT_PREFIX.to_string();
    let mut n = 1;
    while xobjects.has(name.as_bytes()) {
        name = format!("{OVERLAY_XOBJECT_PREFIX}{n}");
        n += 1;
    }
    name
}

/// Brackets the existing content in `q`/`Q` and appends the overlay draw, so
/// nothing left on the graphics state stack by the page can skew the overlay.
fn wrap_contents(
    doc: &mut Document,
    page_id: ObjectId,
    name: &str,
    origin_x: f64,
    origin_y: f64,
) -> Result<(), SignError> {
    let current = page_dict_mut(doc, page_id)?.get(b"Contents").ok().cloned();
    let existing: Vec<Object> = match current {
        Some(Object::Array(items)) => items,
        Some(Object::Reference(id)) => match doc.get_object(id) {
            Ok(Object::Array(items)) => items.clone(),
            _ => vec![Object::Reference(id)],
        },
        _ => Vec::new(),
    };

    let open_id = doc.add_object(Stream::new(dictionary! {}, b"q\n".to_vec()));
    let draw_ops = format!(
        "\nQ\nq\n1 0 0 1 {} {} cm\n/{} Do\nQ\n",
        format_number(origin_x),
        format_number(origin_y),
        name
    );
    let draw_id = doc.add_object(Stream::new(dictionary! {}, draw_ops.into_bytes()));

    let mut contents = Vec::with_capacity(existing.len() + 2);
    contents.push(Object::Reference(open_id));
    contents.extend(existing);
    contents.push(Object::Reference(draw_id));
    debug!(
        "Page {:?} now has {} content streams",
        page_id,
        contents.len()
    );
    page_dict_mut(doc, page_id)?.set("Contents", contents);
    Ok(())
}

fn page_dict_mut(doc: &mut Document, page_id: ObjectId) -> Result<&mut Dictionary, SignError> {
    doc.get_object_mut(page_id)
        .and_then(Object::as_dict_mut)
        .map_err(|e| SignError::MergeFailure(format!("page object {page_id:?} is not a dictionary: {e}")))
}

fn merge_failure(e: impl std::fmt::Display) -> SignError {
    SignError::MergeFailure(e.to_string())
}
