//! Rendering: layout, paint and raster capture of staged surfaces

pub mod layout;
pub mod paint;
pub mod raster;

use crate::surface::{DocumentContext, SurfaceId};
use crate::{Error, Result};
use base64::Engine as Base64Engine;
use image::{ImageEncoder, Rgba, RgbaImage};
use sha2::{Digest, Sha256};

/// Options applied when capturing a surface
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureOptions {
    /// Device pixels per CSS pixel
    pub scale: u32,
    /// Request cross-origin resources with CORS
    pub use_cors: bool,
    /// Paint cross-origin resources lacking CORS clearance (taints the bitmap)
    pub allow_taint: bool,
    pub background: [u8; 4],
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            scale: 2,
            use_cors: true,
            allow_taint: true,
            background: [255, 255, 255, 255],
        }
    }
}

/// DOM-to-bitmap capture primitive
///
/// Implementations read the surface through the context and must not mutate
/// it. A surface that is not attached at call time is a `RenderCaptureError`.
pub trait Rasterizer: Send + Sync {
    fn rasterize(&self, context: &dyn DocumentContext, surface: SurfaceId, options: &CaptureOptions) -> Result<Bitmap>;
}

/// Rasterized pixel snapshot of a surface
///
/// Immutable once produced. A tainted bitmap (painted with a cross-origin
/// resource that had no CORS clearance) refuses to export its pixels, the
/// way a tainted canvas does.
#[derive(Debug, Clone)]
pub struct Bitmap {
    pixels: RgbaImage,
    tainted: bool,
}

impl Bitmap {
    pub fn new(pixels: RgbaImage) -> Self {
        Self { pixels, tainted: false }
    }

    pub fn with_taint(pixels: RgbaImage, tainted: bool) -> Self {
        Self { pixels, tainted }
    }

    /// A bitmap filled with one colour
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        Self::new(RgbaImage::from_pixel(width, height, Rgba(rgba)))
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn is_tainted(&self) -> bool {
        self.tainted
    }

    fn check_clean(&self) -> Result<()> {
        if self.tainted {
            return Err(Error::RenderCaptureError(
                "bitmap is tainted by a cross-origin resource without CORS clearance".into(),
            ));
        }
        Ok(())
    }

    /// Read access to the pixels
    pub fn pixels(&self) -> Result<&RgbaImage> {
        self.check_clean()?;
        Ok(&self.pixels)
    }

    /// Packed 8-bit RGB samples, alpha composited over white
    pub fn rgb_bytes(&self) -> Result<Vec<u8>> {
        self.check_clean()?;
        let mut out = Vec::with_capacity(self.pixels.width() as usize * self.pixels.height() as usize * 3);
        for Rgba([r, g, b, a]) in self.pixels.pixels() {
            let a = *a as u32;
            let blend = |c: u8| ((c as u32 * a + 255 * (255 - a)) / 255) as u8;
            out.extend_from_slice(&[blend(*r), blend(*g), blend(*b)]);
        }
        Ok(out)
    }

    /// PNG encoding of the bitmap
    pub fn encode_png(&self) -> Result<Vec<u8>> {
        self.check_clean()?;
        let mut buf = Vec::new();
        image::codecs::png::PngEncoder::new(&mut buf)
            .write_image(
                self.pixels.as_raw(),
                self.pixels.width(),
                self.pixels.height(),
                image::ExtendedColorType::Rgba8,
            )
            .map_err(|e| Error::RenderCaptureError(format!("PNG encoding failed: {}", e)))?;
        Ok(buf)
    }

    /// `data:image/png;base64,...` URL of the bitmap
    pub fn to_data_url(&self) -> Result<String> {
        let png = self.encode_png()?;
        Ok(format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(png)
        ))
    }

    /// SHA-256 (hex) over dimensions and raw pixels
    pub fn digest(&self) -> Result<String> {
        self.check_clean()?;
        let mut hasher = Sha256::new();
        hasher.update(self.pixels.width().to_be_bytes());
        hasher.update(self.pixels.height().to_be_bytes());
        hasher.update(self.pixels.as_raw());
        Ok(hex::encode(hasher.finalize()))
    }
}
