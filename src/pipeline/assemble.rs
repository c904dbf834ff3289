//! Reassemble rasterised pages into a new image-only PDF.
//!
//! Every output page holds exactly one image XObject drawn edge to edge, so
//! nothing from the source document (text, fonts, annotations, forms,
//! metadata) survives into the result.

use crate::config::ImageQuality;
use crate::error::PipelineError;
use crate::pipeline::document;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use lopdf::{dictionary, Document, Object, Stream};
use std::io::Write;
use tracing::debug;

/// One rendered page ready for assembly.
#[derive(Debug, Clone)]
pub struct PageImage {
    pub image: DynamicImage,
    /// Display size of the source page in points.
    pub source_size: (f32, f32),
}

/// Build the output document, one page per image, in slice order.
///
/// Pages are sized 1 pt per pixel unless `preserve_page_size` is set, in
/// which case each page takes its source page's size and the image is
/// scaled to fill it.
pub fn build_pdf(
    pages: &[PageImage],
    quality: ImageQuality,
    preserve_page_size: bool,
) -> Result<Vec<u8>, PipelineError> {
    if pages.is_empty() {
        return Err(PipelineError::encode("flattened", "no pages to assemble"));
    }

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids: Vec<Object> = Vec::with_capacity(pages.len());

    for (index, page) in pages.iter().enumerate() {
        let image_stream = encode_image_stream(index + 1, &page.image, quality)?;
        let img_id = doc.add_object(image_stream);

        let (w, h) = if preserve_page_size {
            page.source_size
        } else {
            (page.image.width() as f32, page.image.height() as f32)
        };

        let content = format!("q\n{} 0 0 {} 0 0 cm\n/Im0 Do\nQ\n", w, h);
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));

        let page_dict = dictionary! {
            "Type" => "Page",
            "Parent" => Object::Reference(pages_id),
            "MediaBox" => vec![0.into(), 0.into(), w.into(), h.into()],
            "Contents" => Object::Reference(content_id),
            "Resources" => dictionary! {
                "XObject" => dictionary! {
                    "Im0" => Object::Reference(img_id),
                },
            },
        };
        kids.push(Object::Reference(doc.add_object(page_dict)));
        debug!(
            "Assembled page {} ({}x{} px on {}x{} pt)",
            index + 1,
            page.image.width(),
            page.image.height(),
            w,
            h
        );
    }

    let tree = dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => pages.len() as i64,
    };
    doc.objects.insert(pages_id, Object::Dictionary(tree));

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => Object::Reference(pages_id),
    });
    doc.trailer.set("Root", Object::Reference(catalog_id));

    document::save(&mut doc, "flattened")
}

fn encode_image_stream(
    page: usize,
    img: &DynamicImage,
    quality: ImageQuality,
) -> Result<Stream, PipelineError> {
    let rgb = img.to_rgb8();
    let (w, h) = rgb.dimensions();
    let image_err = |e: &dyn std::fmt::Display| PipelineError::ImageEncodeFailed {
        page,
        detail: e.to_string(),
    };

    let (filter, data) = match quality {
        ImageQuality::Lossless => {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(rgb.as_raw()).map_err(|e| image_err(&e))?;
            ("FlateDecode", encoder.finish().map_err(|e| image_err(&e))?)
        }
        ImageQuality::Jpeg(q) => {
            let mut buf: Vec<u8> = Vec::new();
            // JPEG has no alpha channel, so always encode the RGB copy.
            JpegEncoder::new_with_quality(&mut buf, q)
                .encode_image(&rgb)
                .map_err(|e| image_err(&e))?;
            ("DCTDecode", buf)
        }
    };

    let dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => w as i64,
        "Height" => h as i64,
        "ColorSpace" => "DeviceRGB",
        "BitsPerComponent" => 8_i64,
        "Filter" => filter,
    };
    Ok(Stream::new(dict, data))
}
