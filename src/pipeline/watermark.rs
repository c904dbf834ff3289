//! Watermarker: overlay a rotated, translucent label on every page.
//!
//! The overlay is appended as an extra content stream per page. The original
//! content is wrapped in `q … Q` first, so a source page that leaves the
//! graphics state transformed cannot move or distort the label. Placement is
//! recomputed from each page's own visible box.
//!
//! The label is drawn in standard Helvetica, which every conforming reader
//! provides, so nothing is embedded.

use crate::config::WatermarkSpec;
use crate::error::PipelineError;
use crate::pipeline::document::{self, PageGeometry};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use tracing::{debug, info};

const FONT_KEY: &[u8] = b"PdfSealWm";
const GSTATE_KEY: &[u8] = b"PdfSealGs";

/// Watermark every page of `source` and return the new document.
///
/// # Errors
/// - decode-kind errors when `source` is not a usable PDF or has no pages
/// - [`PipelineError::EmptyLabel`] / [`PipelineError::InvalidConfig`] for a bad spec
/// - [`PipelineError::EncodeFailed`] if the result cannot be serialised
pub fn watermark(source: &[u8], spec: &WatermarkSpec) -> Result<Vec<u8>, PipelineError> {
    spec.validate()?;
    let mut doc = document::load(source)?;
    let label = to_win_ansi(&spec.label());

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let gstate_id = doc.add_object(dictionary! {
        "Type" => "ExtGState",
        "ca" => spec.opacity,
        "CA" => spec.opacity,
    });
    let save_id = doc.add_object(Stream::new(dictionary! {}, b"q\n".to_vec()));
    let restore_id = doc.add_object(Stream::new(dictionary! {}, b"\nQ\n".to_vec()));

    let pages = document::page_geometry(&doc);
    for page in &pages {
        let (font_key, gstate_key) = install_resources(&mut doc, page.id, font_id, gstate_id)?;
        let (x, y) = spec.anchor.position(&page.visible);
        let overlay = overlay_content(spec, &label, font_key, gstate_key, x, y)
            .encode()
            .map_err(|e| PipelineError::encode("watermarked", e))?;
        let overlay_id = doc.add_object(Stream::new(dictionary! {}, overlay));
        wrap_contents(&mut doc, page, save_id, restore_id, overlay_id)?;
        debug!(
            "Page {}: label at ({:.1}, {:.1}) on {:.0}x{:.0} box",
            page.index + 1,
            x,
            y,
            page.visible.width,
            page.visible.height
        );
    }

    let out = document::save(&mut doc, "watermarked")?;
    info!("Watermarked {} pages ({} bytes)", pages.len(), out.len());
    Ok(out)
}

/// Operators drawing the label with its origin at `(x, y)`.
fn overlay_content(
    spec: &WatermarkSpec,
    label: &[u8],
    font_key: Vec<u8>,
    gstate_key: Vec<u8>,
    x: f32,
    y: f32,
) -> Content {
    let (sin, cos) = spec.rotation_deg.to_radians().sin_cos();
    Content {
        operations: vec![
            Operation::new("q", vec![]),
            Operation::new("gs", vec![Object::Name(gstate_key)]),
            Operation::new("g", vec![spec.gray.into()]),
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec![Object::Name(font_key), spec.font_size.into()]),
            Operation::new(
                "Tm",
                vec![
                    cos.into(),
                    sin.into(),
                    (-sin).into(),
                    cos.into(),
                    x.into(),
                    y.into(),
                ],
            ),
            Operation::new(
                "Tj",
                vec![Object::String(label.to_vec(), StringFormat::Literal)],
            ),
            Operation::new("ET", vec![]),
            Operation::new("Q", vec![]),
        ],
    }
}

/// Give the page its own resource dictionary containing the label font and
/// graphics state, under names that do not collide with existing entries.
fn install_resources(
    doc: &mut Document,
    page_id: ObjectId,
    font_id: ObjectId,
    gstate_id: ObjectId,
) -> Result<(Vec<u8>, Vec<u8>), PipelineError> {
    let mut resources = document::inherited(doc, page_id, b"Resources")
        .and_then(|o| document::resolve_dict(doc, o))
        .cloned()
        .unwrap_or_else(Dictionary::new);
    let mut fonts = sub_dict(doc, &resources, b"Font");
    let mut gstates = sub_dict(doc, &resources, b"ExtGState");

    let font_key = unique_key(&fonts, FONT_KEY);
    let gstate_key = unique_key(&gstates, GSTATE_KEY);
    fonts.set(font_key.clone(), Object::Reference(font_id));
    gstates.set(gstate_key.clone(), Object::Reference(gstate_id));
    resources.set("Font", Object::Dictionary(fonts));
    resources.set("ExtGState", Object::Dictionary(gstates));

    page_dict_mut(doc, page_id)?.set("Resources", Object::Dictionary(resources));
    Ok((font_key, gstate_key))
}

/// Contents become `[save, original…, restore, overlay]`.
fn wrap_contents(
    doc: &mut Document,
    page: &PageGeometry,
    save_id: ObjectId,
    restore_id: ObjectId,
    overlay_id: ObjectId,
) -> Result<(), PipelineError> {
    let existing: Vec<Object> = match doc
        .get_dictionary(page.id)
        .map_err(PipelineError::corrupt)?
        .get(b"Contents")
    {
        Ok(Object::Reference(id)) => match doc.get_object(*id) {
            Ok(Object::Array(parts)) => parts.clone(),
            _ => vec![Object::Reference(*id)],
        },
        Ok(Object::Array(parts)) => parts.clone(),
        _ => Vec::new(),
    };

    let mut contents = Vec::with_capacity(existing.len() + 3);
    contents.push(Object::Reference(save_id));
    contents.extend(existing);
    contents.push(Object::Reference(restore_id));
    contents.push(Object::Reference(overlay_id));

    page_dict_mut(doc, page.id)?.set("Contents", Object::Array(contents));
    Ok(())
}

fn page_dict_mut(doc: &mut Document, page_id: ObjectId) -> Result<&mut Dictionary, PipelineError> {
    doc.get_object_mut(page_id)
        .and_then(Object::as_dict_mut)
        .map_err(PipelineError::corrupt)
}

fn sub_dict(doc: &Document, resources: &Dictionary, key: &[u8]) -> Dictionary {
    resources
        .get(key)
        .ok()
        .and_then(|o| document::resolve_dict(doc, o))
        .cloned()
        .unwrap_or_else(Dictionary::new)
}

fn unique_key(dict: &Dictionary, base: &[u8]) -> Vec<u8> {
    let mut key = base.to_vec();
    let mut n = 1;
    while dict.has(&key) {
        key = [base, n.to_string().as_bytes()].concat();
        n += 1;
    }
    key
}

/// Encode for Helvetica's WinAnsiEncoding; unmappable characters become `?`.
fn to_win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c {
            '\u{20}'..='\u{7e}' | '\u{a0}'..='\u{ff}' => c as u8,
            '€' => 0x80,
            '‚' => 0x82,
            '„' => 0x84,
            '…' => 0x85,
            '‘' => 0x91,
            '’' => 0x92,
            '“' => 0x93,
            '”' => 0x94,
            '•' => 0x95,
            '–' => 0x96,
            '—' => 0x97,
            '™' => 0x99,
            _ => b'?',
        })
        .collect()
}
