//! Document assembler: one PDF page per page slice
//!
//! The captured bitmap is embedded once as an image XObject. Every page draws
//! that image at the slice's vertical offset and clips it to the slice's band,
//! so consecutive pages show consecutive strips of the same image.

use crate::compositor::{PageGeometry, PageSlice};
use crate::rendering::Bitmap;
use crate::sink::DownloadSink;
use crate::{Error, Result};
use log::debug;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use sha2::{Digest, Sha256};
use std::path::PathBuf;

/// PDF points per millimetre
pub const PT_PER_MM: f64 = 72.0 / 25.4;

const IMAGE_NAME: &str = "Im0";

/// Summary of an emitted document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedDocument {
    /// File name including the `.pdf` suffix
    pub filename: String,
    pub page_count: usize,
    pub byte_len: usize,
    /// SHA-256 of the emitted bytes (hex)
    pub sha256: String,
    /// Where the sink saved the document, if it saves to disk
    pub location: Option<PathBuf>,
}

/// Output document under construction
///
/// Starts with one blank page. Pages are appended in order and the document
/// is finalized exactly once by [`OutputDocument::emit`], which consumes it.
pub struct OutputDocument {
    doc: Document,
    geometry: PageGeometry,
    image_id: ObjectId,
    image_height_mm: f64,
    // drawing operations of each page, in page order
    pages: Vec<Vec<Operation>>,
}

impl OutputDocument {
    /// New document with `bitmap` embedded and a single blank page
    pub fn new(bitmap: &Bitmap, geometry: PageGeometry) -> Result<Self> {
        if bitmap.width() == 0 || bitmap.height() == 0 {
            return Err(Error::EmptyContentError);
        }

        let mut doc = Document::with_version("1.5");
        let rgb = bitmap.rgb_bytes()?;
        let mut image = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => bitmap.width() as i64,
                "Height" => bitmap.height() as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
            },
            rgb,
        );
        // an uncompressed stream is still valid
        let _ = image.compress();
        let image_id = doc.add_object(image);

        Ok(Self {
            doc,
            geometry,
            image_id,
            image_height_mm: geometry.scaled_height_mm(bitmap.width(), bitmap.height()),
            pages: vec![Vec::new()],
        })
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn geometry(&self) -> &PageGeometry {
        &self.geometry
    }

    /// Append a blank page and make it current
    pub fn add_page(&mut self) {
        self.pages.push(Vec::new());
    }

    /// Draw the embedded image on the current page for `slice`
    pub fn place_slice(&mut self, slice: &PageSlice) {
        let page_w = self.geometry.page_width_mm * PT_PER_MM;
        let page_h = self.geometry.page_height_mm * PT_PER_MM;

        // PDF space grows upwards from the bottom-left corner
        let band_h = slice.rendered_height_mm * PT_PER_MM;
        let band_y = page_h - (slice.page_y_offset_mm + slice.rendered_height_mm) * PT_PER_MM;
        let image_h = self.image_height_mm * PT_PER_MM;
        let image_y = page_h - (slice.image_y_offset_mm + self.image_height_mm) * PT_PER_MM;

        if self.pages.is_empty() {
            self.pages.push(Vec::new());
        }
        let current = self.pages.len() - 1;
        let ops = &mut self.pages[current];
        ops.push(Operation::new("q", vec![]));
        ops.push(Operation::new("re", vec![real(0.0), real(band_y), real(page_w), real(band_h)]));
        ops.push(Operation::new("W", vec![]));
        ops.push(Operation::new("n", vec![]));
        ops.push(Operation::new(
            "cm",
            vec![real(page_w), real(0.0), real(0.0), real(image_h), real(0.0), real(image_y)],
        ));
        ops.push(Operation::new("Do", vec![Object::Name(IMAGE_NAME.as_bytes().to_vec())]));
        ops.push(Operation::new("Q", vec![]));
    }

    /// Serialize the document
    fn finish(mut self) -> Result<(Vec<u8>, usize)> {
        let page_count = self.pages.len();
        let pages_id = self.doc.new_object_id();
        let resources_id = self.doc.add_object(dictionary! {
            "XObject" => dictionary! {
                IMAGE_NAME => self.image_id,
            },
        });

        let media_box: Vec<Object> = vec![
            real(0.0),
            real(0.0),
            real(self.geometry.page_width_mm * PT_PER_MM),
            real(self.geometry.page_height_mm * PT_PER_MM),
        ];

        let mut kids = Vec::with_capacity(page_count);
        for operations in std::mem::take(&mut self.pages) {
            let content = Content { operations }
                .encode()
                .map_err(|e| Error::SaveError(format!("Failed to encode page content: {}", e)))?;
            let content_id = self.doc.add_object(Stream::new(dictionary! {}, content));
            let page_id = self.doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => media_box.clone(),
                "Contents" => content_id,
                "Resources" => resources_id,
            });
            kids.push(Object::Reference(page_id));
        }

        self.doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => page_count as i64,
            }),
        );
        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        self.doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        self.doc
            .save_to(&mut bytes)
            .map_err(|e| Error::SaveError(format!("Failed to serialize PDF: {}", e)))?;
        Ok((bytes, page_count))
    }

    /// Finalize the document and hand it to `sink` as `filename`
    pub fn emit(self, sink: &dyn DownloadSink, filename: &str) -> Result<GeneratedDocument> {
        let (bytes, page_count) = self.finish()?;
        debug!("emitting {} ({} pages, {} bytes)", filename, page_count, bytes.len());

        let location = sink.save(filename, &bytes).map_err(|e| match e {
            Error::SaveError(_) => e,
            other => Error::SaveError(other.to_string()),
        })?;

        Ok(GeneratedDocument {
            filename: filename.to_string(),
            page_count,
            byte_len: bytes.len(),
            sha256: hex::encode(Sha256::digest(&bytes)),
            location,
        })
    }
}

fn real(value: f64) -> Object {
    Object::Real(value as f32)
}

/// Build a document with one page per slice, in slice order.
pub fn assemble(slices: &[PageSlice], bitmap: &Bitmap, geometry: &PageGeometry) -> Result<OutputDocument> {
    if slices.is_empty() {
        return Err(Error::EmptyContentError);
    }

    let mut doc = OutputDocument::new(bitmap, *geometry)?;
    for (i, slice) in slices.iter().enumerate() {
        if i > 0 {
            doc.add_page();
        }
        doc.place_slice(slice);
    }
    debug!("assembled {} page(s)", doc.page_count());
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::paginate;
    use crate::sink::MemorySink;

    fn page_operations(bytes: &[u8]) -> Vec<Vec<Operation>> {
        let doc = Document::load_mem(bytes).unwrap();
        doc.get_pages()
            .values()
            .map(|id| {
                let raw = doc.get_page_content(*id).unwrap();
                Content::decode(&raw).unwrap().operations
            })
            .collect()
    }

    fn operand(op: &Operation, i: usize) -> f64 {
        op.operands[i].as_float().unwrap() as f64
    }

    #[test]
    fn one_page_per_slice() {
        let bitmap = Bitmap::solid(80, 120, [10, 20, 30, 255]);
        let slices = paginate(80, 120, &PageGeometry::A4_PORTRAIT).unwrap();
        let doc = assemble(&slices, &bitmap, &PageGeometry::A4_PORTRAIT).unwrap();
        assert_eq!(doc.page_count(), 2);

        let sink = MemorySink::new();
        let out = doc.emit(&sink, "two.pdf").unwrap();
        assert_eq!(out.page_count, 2);
        assert_eq!(out.location, None);

        let saved = sink.saved();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].0, "two.pdf");
        assert!(saved[0].1.starts_with(b"%PDF-1.5"));
        assert_eq!(out.byte_len, saved[0].1.len());

        let pages = page_operations(&saved[0].1);
        assert_eq!(pages.len(), 2);
        for ops in &pages {
            let names: Vec<&str> = ops.iter().map(|o| o.operator.as_str()).collect();
            assert_eq!(names, vec!["q", "re", "W", "n", "cm", "Do", "Q"]);
        }
    }

    #[test]
    fn continuation_page_shifts_image_up() {
        let bitmap = Bitmap::solid(800, 1200, [255, 255, 255, 255]);
        let slices = paginate(800, 1200, &PageGeometry::A4_PORTRAIT).unwrap();
        let sink = MemorySink::new();
        assemble(&slices, &bitmap, &PageGeometry::A4_PORTRAIT)
            .unwrap()
            .emit(&sink, "a.pdf")
            .unwrap();

        let pages = page_operations(&sink.saved()[0].1);
        let page_h = 297.0 * PT_PER_MM;
        let image_h = 315.0 * PT_PER_MM;

        // first page: image top at the page top
        let cm = &pages[0][4];
        assert!((operand(cm, 3) - image_h).abs() < 0.01);
        assert!((operand(cm, 5) - (page_h - image_h)).abs() < 0.01);

        // second page: image moved up by one page, band is the last 18mm
        let cm = &pages[1][4];
        assert!((operand(cm, 5) - (page_h + page_h - image_h)).abs() < 0.01);
        let re = &pages[1][1];
        assert!((operand(re, 3) - 18.0 * PT_PER_MM).abs() < 0.01);
        assert!((operand(re, 1) - (page_h - 18.0 * PT_PER_MM)).abs() < 0.01);
    }

    #[test]
    fn single_page_is_centred() {
        let bitmap = Bitmap::solid(800, 400, [255, 255, 255, 255]);
        let slices = paginate(800, 400, &PageGeometry::A4_PORTRAIT).unwrap();
        let sink = MemorySink::new();
        assemble(&slices, &bitmap, &PageGeometry::A4_PORTRAIT)
            .unwrap()
            .emit(&sink, "b.pdf")
            .unwrap();

        let pages = page_operations(&sink.saved()[0].1);
        assert_eq!(pages.len(), 1);
        // 96mm margin above and below the 105mm image
        let cm = &pages[0][4];
        assert!((operand(cm, 5) - 96.0 * PT_PER_MM).abs() < 0.01);
    }

    #[test]
    fn empty_slices_or_bitmap_rejected() {
        let bitmap = Bitmap::solid(10, 10, [0, 0, 0, 255]);
        assert!(matches!(
            assemble(&[], &bitmap, &PageGeometry::A4_PORTRAIT),
            Err(Error::EmptyContentError)
        ));
        let empty = Bitmap::solid(10, 0, [0, 0, 0, 255]);
        assert!(matches!(
            OutputDocument::new(&empty, PageGeometry::A4_PORTRAIT),
            Err(Error::EmptyContentError)
        ));
    }

    #[test]
    fn tainted_bitmap_cannot_be_embedded() {
        let bitmap = Bitmap::with_taint(image::RgbaImage::new(4, 4), true);
        assert!(matches!(
            OutputDocument::new(&bitmap, PageGeometry::A4_PORTRAIT),
            Err(Error::RenderCaptureError(_))
        ));
    }

    #[test]
    fn sink_failure_is_save_error() {
        struct Failing;
        impl DownloadSink for Failing {
            fn save(&self, _: &str, _: &[u8]) -> Result<Option<PathBuf>> {
                Err(Error::Other("disk full".into()))
            }
        }

        let bitmap = Bitmap::solid(10, 10, [0, 0, 0, 255]);
        let slices = paginate(10, 10, &PageGeometry::A4_PORTRAIT).unwrap();
        let doc = assemble(&slices, &bitmap, &PageGeometry::A4_PORTRAIT).unwrap();
        assert!(matches!(doc.emit(&Failing, "x.pdf"), Err(Error::SaveError(_))));
    }
}
