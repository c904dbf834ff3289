//! Shared document I/O: decode, encode, page geometry and inspection.
//!
//! Both stages and the subprocess backend read page boxes the same way, so
//! the rules for box inheritance and `/Rotate` live here and nowhere else.

use crate::error::PipelineError;
use crate::output::{DocumentInfo, PageInfo};
use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, ObjectId};
use tracing::debug;

/// US Letter, used when a page tree carries no usable MediaBox at all.
const DEFAULT_BOX: [f32; 4] = [0.0, 0.0, 612.0, 792.0];

/// Guard against cyclic `/Parent` chains and reference loops.
const MAX_DEPTH: usize = 32;

/// How far into the file the `%PDF` header may start. Mail gateways and
/// editors sometimes prepend a BOM or a few bytes of junk.
const HEADER_SEARCH_LIMIT: usize = 1024;

/// A page's visible rectangle in unrotated user space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageBox {
    pub x0: f32,
    pub y0: f32,
    pub width: f32,
    pub height: f32,
}

impl PageBox {
    pub fn new(x0: f32, y0: f32, width: f32, height: f32) -> Self {
        Self {
            x0,
            y0,
            width,
            height,
        }
    }

    fn from_rect(r: [f32; 4]) -> Self {
        let (x0, x1) = (r[0].min(r[2]), r[0].max(r[2]));
        let (y0, y1) = (r[1].min(r[3]), r[1].max(r[3]));
        Self::new(x0, y0, x1 - x0, y1 - y0)
    }
}

/// Geometry of one page, in document order.
#[derive(Debug, Clone, Copy)]
pub struct PageGeometry {
    /// 0-based page index.
    pub index: usize,
    pub id: ObjectId,
    /// CropBox if present, else MediaBox (both inheritable).
    pub visible: PageBox,
    /// `/Rotate` normalised to 0, 90, 180 or 270.
    pub rotation: i32,
}

impl PageGeometry {
    /// Width and height as displayed, i.e. after applying `/Rotate`.
    pub fn display_size(&self) -> (f32, f32) {
        if self.rotation % 180 == 0 {
            (self.visible.width, self.visible.height)
        } else {
            (self.visible.height, self.visible.width)
        }
    }
}

/// Offset of the `%PDF` header within the first [`HEADER_SEARCH_LIMIT`] bytes.
pub fn header_offset(bytes: &[u8]) -> Option<usize> {
    bytes[..bytes.len().min(HEADER_SEARCH_LIMIT)]
        .windows(4)
        .position(|w| w == b"%PDF")
}

/// Fail with a decode error unless a `%PDF` header appears near the start.
///
/// Returns the header offset.
pub fn check_magic(bytes: &[u8]) -> Result<usize, PipelineError> {
    header_offset(bytes).ok_or_else(|| PipelineError::NotAPdf {
        magic: bytes.iter().take(4).copied().collect(),
    })
}

/// Parse a document, rejecting non-PDFs, encrypted files and empty page trees.
pub fn load(bytes: &[u8]) -> Result<Document, PipelineError> {
    let offset = check_magic(bytes)?;
    if offset > 0 {
        debug!("Skipping {} bytes before the PDF header", offset);
    }
    let doc = match Document::load_mem(&bytes[offset..]) {
        Ok(doc) => doc,
        // lopdf may fail outright while decrypting; report what the file is.
        Err(_) if mentions_encryption(bytes) => return Err(PipelineError::Encrypted),
        Err(e) => return Err(PipelineError::corrupt(e)),
    };
    if doc.trailer.get(b"Encrypt").is_ok() {
        return Err(PipelineError::Encrypted);
    }
    if doc.get_pages().is_empty() {
        return Err(PipelineError::EmptyDocument);
    }
    debug!(
        "Decoded PDF {} with {} pages",
        doc.version,
        doc.get_pages().len()
    );
    Ok(doc)
}

fn mentions_encryption(bytes: &[u8]) -> bool {
    bytes.windows(8).any(|w| w == b"/Encrypt")
}

/// Serialise a document; `stage` names it in the error message.
pub fn save(doc: &mut Document, stage: &'static str) -> Result<Vec<u8>, PipelineError> {
    let mut out = Vec::new();
    doc.save_to(&mut out)
        .map_err(|e| PipelineError::encode(stage, e))?;
    Ok(out)
}

/// Geometry of every page, ordered by page number.
pub fn page_geometry(doc: &Document) -> Vec<PageGeometry> {
    // get_pages() is a BTreeMap keyed by 1-based page number.
    doc.get_pages()
        .into_values()
        .enumerate()
        .map(|(index, id)| {
            let rect = inherited(doc, id, b"CropBox")
                .and_then(|o| rect(doc, o))
                .or_else(|| inherited(doc, id, b"MediaBox").and_then(|o| rect(doc, o)))
                .unwrap_or(DEFAULT_BOX);
            let rotation = inherited(doc, id, b"Rotate")
                .and_then(|o| number(doc, o))
                .map(|r| normalise_rotation(r as i64))
                .unwrap_or(0);
            PageGeometry {
                index,
                id,
                visible: PageBox::from_rect(rect),
                rotation,
            }
        })
        .collect()
}

/// Display sizes (points, rotation applied) of every page in `bytes`.
pub fn page_sizes(bytes: &[u8]) -> Result<Vec<(f32, f32)>, PipelineError> {
    let doc = load(bytes)?;
    Ok(page_geometry(&doc)
        .iter()
        .map(PageGeometry::display_size)
        .collect())
}

/// Page count, page sizes and raster detection for a document.
pub fn inspect(bytes: &[u8]) -> Result<DocumentInfo, PipelineError> {
    let doc = load(bytes)?;
    let pages: Vec<PageInfo> = page_geometry(&doc)
        .iter()
        .map(|g| {
            let (width, height) = g.display_size();
            let image_size = single_image(&doc, g.id);
            PageInfo {
                page_num: g.index + 1,
                width,
                height,
                rotation: g.rotation,
                is_raster: image_size.is_some(),
                image_size,
            }
        })
        .collect();

    Ok(DocumentInfo {
        page_count: pages.len(),
        pdf_version: doc.version.clone(),
        pages,
    })
}

// ── Object helpers ───────────────────────────────────────────────────────

/// Follow indirect references until a direct object is reached.
pub(crate) fn resolve<'a>(doc: &'a Document, mut obj: &'a Object) -> Option<&'a Object> {
    for _ in 0..MAX_DEPTH {
        match obj {
            Object::Reference(id) => obj = doc.get_object(*id).ok()?,
            other => return Some(other),
        }
    }
    None
}

/// Resolve `obj` to a dictionary (a stream's dictionary counts).
pub(crate) fn resolve_dict<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Dictionary> {
    match resolve(doc, obj)? {
        Object::Dictionary(d) => Some(d),
        Object::Stream(s) => Some(&s.dict),
        _ => None,
    }
}

/// Look up an inheritable page attribute, walking `/Parent` links.
pub(crate) fn inherited<'a>(doc: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut dict = doc.get_dictionary(page_id).ok()?;
    for _ in 0..MAX_DEPTH {
        if let Ok(value) = dict.get(key) {
            return Some(value);
        }
        let parent = dict.get(b"Parent").ok()?;
        dict = resolve_dict(doc, parent)?;
    }
    None
}

fn number(doc: &Document, obj: &Object) -> Option<f32> {
    match resolve(doc, obj)? {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r),
        _ => None,
    }
}

fn rect(doc: &Document, obj: &Object) -> Option<[f32; 4]> {
    let Object::Array(arr) = resolve(doc, obj)? else {
        return None;
    };
    if arr.len() != 4 {
        return None;
    }
    let mut out = [0.0; 4];
    for (slot, item) in out.iter_mut().zip(arr) {
        *slot = number(doc, item)?;
    }
    let degenerate = (out[2] - out[0]).abs() < f32::EPSILON || (out[3] - out[1]).abs() < f32::EPSILON;
    (!degenerate).then_some(out)
}

fn normalise_rotation(r: i64) -> i32 {
    let snapped = ((r as f64 / 90.0).round() as i64) * 90;
    snapped.rem_euclid(360) as i32
}

/// Pixel size of the page's image when the page draws exactly one image
/// XObject and nothing else (only `q`, `Q` and `cm` may surround it).
fn single_image(doc: &Document, page_id: ObjectId) -> Option<(u32, u32)> {
    let raw = doc.get_page_content(page_id).ok()?;
    let content = Content::decode(&raw).ok()?;

    let mut drawn: Option<&[u8]> = None;
    for op in &content.operations {
        match op.operator.as_str() {
            "q" | "Q" | "cm" => {}
            "Do" if drawn.is_none() => {
                drawn = op.operands.first()?.as_name().ok();
            }
            _ => return None,
        }
    }
    let name = drawn?;

    let resources = resolve_dict(doc, inherited(doc, page_id, b"Resources")?)?;
    let xobjects = resolve_dict(doc, resources.get(b"XObject").ok()?)?;
    let Object::Stream(stream) = resolve(doc, xobjects.get(name).ok()?)? else {
        return None;
    };
    let is_image = stream
        .dict
        .get(b"Subtype")
        .and_then(Object::as_name)
        .map(|n| n == b"Image")
        .unwrap_or(false);
    if !is_image {
        return None;
    }
    let w = stream.dict.get(b"Width").and_then(Object::as_i64).ok()?;
    let h = stream.dict.get(b"Height").and_then(Object::as_i64).ok()?;
    Some((u32::try_from(w).ok()?, u32::try_from(h).ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{build_pdf, TestPage};
    use lopdf::dictionary;

    #[test]
    fn rejects_non_pdf_bytes() {
        let err = load(b"hello world").unwrap_err();
        assert!(matches!(err, PipelineError::NotAPdf { .. }));
    }

    #[test]
    fn rejects_truncated_pdf() {
        let err = load(b"%PDF-1.7\n%garbage").unwrap_err();
        assert!(matches!(err, PipelineError::CorruptPdf { .. }), "got {err:?}");
    }

    #[test]
    fn header_may_follow_leading_junk() {
        let pdf = build_pdf(&[TestPage::text(612.0, 792.0, "one")]);
        let mut prefixed = b"\xEF\xBB\xBF".to_vec();
        prefixed.extend_from_slice(&pdf);

        assert_eq!(check_magic(&prefixed).unwrap(), 3);
        assert_eq!(page_sizes(&prefixed).unwrap(), vec![(612.0, 792.0)]);
    }

    #[test]
    fn header_past_the_search_window_is_rejected() {
        let mut bytes = vec![b' '; HEADER_SEARCH_LIMIT];
        bytes.extend_from_slice(b"%PDF-1.7\n");
        let err = check_magic(&bytes).unwrap_err();
        assert!(matches!(err, PipelineError::NotAPdf { .. }));
    }

    #[test]
    fn encrypted_document_is_a_decode_error() {
        let pdf = build_pdf(&[TestPage::text(612.0, 792.0, "secret")]);
        let mut doc = Document::load_mem(&pdf).unwrap();
        doc.trailer.set(
            "Encrypt",
            lopdf::dictionary! {
                "Filter" => "Standard",
                "V" => 1,
                "R" => 2,
            },
        );
        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();

        let err = load(&bytes).unwrap_err();
        assert!(matches!(err, PipelineError::Encrypted), "got {err:?}");
        assert_eq!(err.kind(), crate::error::ErrorKind::Decode);
    }

    #[test]
    fn rejects_zero_page_document() {
        let bytes = build_pdf(&[]);
        let err = load(&bytes).unwrap_err();
        assert!(matches!(err, PipelineError::EmptyDocument), "got {err:?}");
    }

    #[test]
    fn reads_mixed_page_sizes_in_order() {
        let bytes = build_pdf(&[
            TestPage::text(612.0, 792.0, "one"),
            TestPage::text(1000.0, 1000.0, "two"),
            TestPage::text(612.0, 792.0, "three"),
        ]);
        let sizes = page_sizes(&bytes).unwrap();
        assert_eq!(sizes, vec![(612.0, 792.0), (1000.0, 1000.0), (612.0, 792.0)]);
    }

    #[test]
    fn rotation_swaps_display_size() {
        let mut page = TestPage::text(612.0, 792.0, "rotated");
        page.rotate = Some(90);
        let bytes = build_pdf(&[page]);
        let doc = load(&bytes).unwrap();
        let geo = page_geometry(&doc);
        assert_eq!(geo[0].rotation, 90);
        assert_eq!(geo[0].display_size(), (792.0, 612.0));
    }

    #[test]
    fn negative_rotation_is_normalised() {
        assert_eq!(normalise_rotation(-90), 270);
        assert_eq!(normalise_rotation(450), 90);
        assert_eq!(normalise_rotation(0), 0);
    }

    #[test]
    fn inherited_media_box_is_used() {
        let mut page = TestPage::text(300.0, 400.0, "inherit");
        page.inherit_media_box = true;
        let bytes = build_pdf(&[page]);
        assert_eq!(page_sizes(&bytes).unwrap(), vec![(300.0, 400.0)]);
    }

    #[test]
    fn text_pages_are_not_raster() {
        let bytes = build_pdf(&[TestPage::text(612.0, 792.0, "hello")]);
        let info = inspect(&bytes).unwrap();
        assert_eq!(info.page_count, 1);
        assert!(!info.pages[0].is_raster);
        assert!(!info.is_flattened());
    }
}
