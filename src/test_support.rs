//! Fixture documents for unit tests.

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};

pub(crate) struct TestPage {
    pub width: f32,
    pub height: f32,
    pub text: String,
    pub rotate: Option<i64>,
    /// Put the MediaBox on the page-tree node instead of the page.
    pub inherit_media_box: bool,
}

impl TestPage {
    pub fn text(width: f32, height: f32, text: &str) -> Self {
        Self {
            width,
            height,
            text: text.to_string(),
            rotate: None,
            inherit_media_box: false,
        }
    }
}

/// A text-only PDF with one page per entry (zero entries → empty page tree).
pub(crate) fn build_pdf(pages: &[TestPage]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => Object::Reference(font_id) },
    });

    let mut kids = Vec::new();
    let mut tree_media_box = None;
    for page in pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 24.into()]),
                Operation::new("Td", vec![72.into(), 72.into()]),
                Operation::new("Tj", vec![Object::string_literal(page.text.as_str())]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().unwrap_or_default(),
        ));
        let media_box: Object = vec![0.into(), 0.into(), page.width.into(), page.height.into()].into();

        let mut dict = dictionary! {
            "Type" => "Page",
            "Parent" => Object::Reference(pages_id),
            "Contents" => Object::Reference(content_id),
            "Resources" => Object::Reference(resources_id),
        };
        if page.inherit_media_box {
            tree_media_box = Some(media_box);
        } else {
            dict.set("MediaBox", media_box);
        }
        if let Some(r) = page.rotate {
            dict.set("Rotate", r);
        }
        kids.push(Object::Reference(doc.add_object(dict)));
    }

    let mut tree = dictionary! {
        "Type" => "Pages",
        "Count" => kids.len() as i64,
        "Kids" => kids,
    };
    if let Some(mb) = tree_media_box {
        tree.set("MediaBox", mb);
    }
    doc.objects.insert(pages_id, Object::Dictionary(tree));

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => Object::Reference(pages_id),
    });
    doc.trailer.set("Root", Object::Reference(catalog_id));

    let mut out = Vec::new();
    doc.save_to(&mut out).expect("fixture PDF should serialise");
    out
}
