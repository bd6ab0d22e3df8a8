//! Page compositor: slices one tall bitmap into page-sized bands
//!
//! The bitmap is scaled so its width fills the page width. Content that fits
//! on one page is centred vertically; taller content is cut into consecutive
//! bands of one page height each, the last band keeping whatever remains.

use crate::rendering::Bitmap;
use crate::{Error, Orientation, PageFormat, Result};

/// A4 width in millimetres
pub const A4_WIDTH_MM: f64 = 210.0;
/// A4 height in millimetres
pub const A4_HEIGHT_MM: f64 = 297.0;

// Residue below this does not start another page.
const EPSILON_MM: f64 = 1e-6;

/// Physical page size
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageGeometry {
    pub page_width_mm: f64,
    pub page_height_mm: f64,
}

impl PageGeometry {
    pub const A4_PORTRAIT: PageGeometry = PageGeometry {
        page_width_mm: A4_WIDTH_MM,
        page_height_mm: A4_HEIGHT_MM,
    };

    pub fn for_format(format: PageFormat, orientation: Orientation) -> Self {
        match (format, orientation) {
            (PageFormat::A4, Orientation::Portrait) => Self::A4_PORTRAIT,
        }
    }

    /// Height of the content in millimetres once its width fills the page
    pub fn scaled_height_mm(&self, pixel_width: u32, pixel_height: u32) -> f64 {
        pixel_height as f64 * self.page_width_mm / pixel_width as f64
    }
}

impl Default for PageGeometry {
    fn default() -> Self {
        Self::A4_PORTRAIT
    }
}

/// One page's worth of the source bitmap
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSlice {
    /// Zero-based page index
    pub index: usize,
    /// First source row of the band
    pub source_y_offset_px: f64,
    /// Source rows covered by the band
    pub source_height_px: f64,
    /// Top of the visible band on the page
    pub page_y_offset_mm: f64,
    /// Height of the visible band on the page
    pub rendered_height_mm: f64,
    /// Where the top of the full image sits relative to the page top
    /// (negative on continuation pages)
    pub image_y_offset_mm: f64,
}

impl PageSlice {
    /// Top edge of the band, in millimetres from the top of the content
    pub fn content_start_mm(&self) -> f64 {
        self.page_y_offset_mm - self.image_y_offset_mm
    }

    /// Bottom edge of the band, in millimetres from the top of the content
    pub fn content_end_mm(&self) -> f64 {
        self.content_start_mm() + self.rendered_height_mm
    }
}

/// Slice `bitmap` into page bands for `geometry`.
pub fn composite(bitmap: &Bitmap, geometry: &PageGeometry) -> Result<Vec<PageSlice>> {
    paginate(bitmap.width(), bitmap.height(), geometry)
}

/// Slice a `pixel_width` x `pixel_height` bitmap into page bands.
///
/// Fails with `EmptyContentError` for zero-sized input rather than producing
/// a document without pages.
pub fn paginate(pixel_width: u32, pixel_height: u32, geometry: &PageGeometry) -> Result<Vec<PageSlice>> {
    if pixel_width == 0 || pixel_height == 0 {
        return Err(Error::EmptyContentError);
    }

    let scaled_height_mm = geometry.scaled_height_mm(pixel_width, pixel_height);
    let px_per_mm = pixel_width as f64 / geometry.page_width_mm;

    if scaled_height_mm <= geometry.page_height_mm {
        let y_offset_mm = (geometry.page_height_mm - scaled_height_mm) / 2.0;
        return Ok(vec![PageSlice {
            index: 0,
            source_y_offset_px: 0.0,
            source_height_px: pixel_height as f64,
            page_y_offset_mm: y_offset_mm,
            rendered_height_mm: scaled_height_mm,
            image_y_offset_mm: y_offset_mm,
        }]);
    }

    let mut slices = Vec::new();
    let mut position_mm = 0.0;
    while scaled_height_mm - position_mm > EPSILON_MM {
        let rendered_height_mm = (scaled_height_mm - position_mm).min(geometry.page_height_mm);
        let source_y_offset_px = position_mm * px_per_mm;
        let source_end_px = ((position_mm + rendered_height_mm) * px_per_mm).min(pixel_height as f64);

        slices.push(PageSlice {
            index: slices.len(),
            source_y_offset_px,
            source_height_px: source_end_px - source_y_offset_px,
            page_y_offset_mm: 0.0,
            rendered_height_mm,
            image_y_offset_mm: -position_mm,
        });
        position_mm += geometry.page_height_mm;
    }

    Ok(slices)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn short_content_is_centred_on_one_page() {
        let slices = paginate(800, 400, &PageGeometry::A4_PORTRAIT).unwrap();
        assert_eq!(slices.len(), 1);
        assert!(approx(slices[0].rendered_height_mm, 105.0));
        assert!(approx(slices[0].page_y_offset_mm, 96.0));
        assert!(approx(slices[0].image_y_offset_mm, 96.0));
        assert!(approx(slices[0].source_height_px, 400.0));
    }

    #[test]
    fn exactly_one_page_is_not_split() {
        // one pixel per millimetre
        let slices = paginate(210, 297, &PageGeometry::A4_PORTRAIT).unwrap();
        assert_eq!(slices.len(), 1);
        assert!(approx(slices[0].page_y_offset_mm, 0.0));
    }

    #[test]
    fn tall_content_splits_into_contiguous_pages() {
        let slices = paginate(800, 1200, &PageGeometry::A4_PORTRAIT).unwrap();
        assert_eq!(slices.len(), 2);
        assert!(approx(slices[0].rendered_height_mm, 297.0));
        assert!(approx(slices[1].rendered_height_mm, 18.0));
        assert!(approx(slices[1].image_y_offset_mm, -297.0));
        assert!(approx(
            slices[0].source_y_offset_px + slices[0].source_height_px,
            slices[1].source_y_offset_px
        ));
        assert!(approx(slices[1].source_y_offset_px + slices[1].source_height_px, 1200.0));
    }

    #[test]
    fn exact_multiple_of_page_height_has_no_sliver() {
        let slices = paginate(210, 594, &PageGeometry::A4_PORTRAIT).unwrap();
        assert_eq!(slices.len(), 2);
        assert!(approx(slices[1].rendered_height_mm, 297.0));
    }

    #[test]
    fn zero_sized_input_is_empty_content() {
        assert!(matches!(paginate(800, 0, &PageGeometry::A4_PORTRAIT), Err(Error::EmptyContentError)));
        assert!(matches!(paginate(0, 10, &PageGeometry::A4_PORTRAIT), Err(Error::EmptyContentError)));
    }

    #[test]
    fn composite_reads_bitmap_dimensions() {
        let bitmap = Bitmap::solid(80, 120, [255, 255, 255, 255]);
        let slices = composite(&bitmap, &PageGeometry::default()).unwrap();
        assert_eq!(slices.len(), 2);
    }
}
