/// Software rasterizer: paints a staged surface into an RGBA bitmap

use crate::rendering::layout::{layout_fragment, GLYPH_PX};
use crate::rendering::paint::{build_display_list, PaintCommand};
use crate::rendering::{Bitmap, CaptureOptions, Rasterizer};
use crate::resources::{classify, ResourceLoader, ResourceRef, StaticResourceLoader};
use crate::surface::{DocumentContext, SurfaceId};
use crate::{Error, Result};
use image::imageops::FilterType;
use image::{Rgba, RgbaImage};
use log::{debug, warn};
use scraper::Html;
use std::sync::Arc;
use url::Url;

/// Longest side of a capture in device pixels
pub const MAX_CANVAS_SIDE_PX: u32 = 32_767;
/// Largest capture area in device pixels
pub const MAX_CANVAS_PIXELS: u64 = 16_384 * 16_384;

/// Device size of a `width` x `height` CSS pixel surface captured at `scale`,
/// or a capture error when it exceeds the canvas limits.
pub fn canvas_size(width: u32, height: u32, scale: u32) -> Result<(u32, u32)> {
    let too_large = || {
        Error::RenderCaptureError(format!(
            "content too large to capture: {}x{}px at scale {} exceeds {}px per side or {} pixels",
            width, height, scale, MAX_CANVAS_SIDE_PX, MAX_CANVAS_PIXELS
        ))
    };
    let w = width.checked_mul(scale).ok_or_else(too_large)?;
    let h = height.checked_mul(scale).ok_or_else(too_large)?;
    if w > MAX_CANVAS_SIDE_PX || h > MAX_CANVAS_SIDE_PX || w as u64 * h as u64 > MAX_CANVAS_PIXELS {
        return Err(too_large());
    }
    Ok((w, h))
}

/// Rasterizer that lays out and paints surface markup in-process
///
/// Text is painted as solid glyph cells on the layout grid; images are
/// loaded through the configured [`ResourceLoader`] and scaled into their
/// boxes. Everything is drawn at `options.scale` device pixels per CSS pixel.
pub struct SoftwareRasterizer {
    loader: Arc<dyn ResourceLoader>,
}

struct LoadedImage {
    pixels: RgbaImage,
    taints: bool,
}

impl SoftwareRasterizer {
    pub fn new(loader: Arc<dyn ResourceLoader>) -> Self {
        Self { loader }
    }

    /// A rasterizer that can only draw inline (`data:`) images
    pub fn offline() -> Self {
        Self::new(Arc::new(StaticResourceLoader::new()))
    }

    fn load_image(&self, src: &str, base: Option<&Url>, options: &CaptureOptions) -> Result<Option<LoadedImage>> {
        if src.is_empty() {
            return Ok(None);
        }

        let (bytes, taints) = match classify(src, base) {
            ResourceRef::Inline(bytes) => (bytes, false),
            ResourceRef::SameOrigin(url) => {
                let res = self
                    .loader
                    .fetch(&url, false)
                    .map_err(|e| Error::RenderCaptureError(format!("Failed to load image {}: {}", url, e)))?;
                (res.bytes, false)
            }
            ResourceRef::CrossOrigin(url) => {
                let res = self
                    .loader
                    .fetch(&url, options.use_cors)
                    .map_err(|e| Error::RenderCaptureError(format!("Failed to load image {}: {}", url, e)))?;
                if options.use_cors && res.cors_allowed {
                    (res.bytes, false)
                } else if options.allow_taint {
                    (res.bytes, true)
                } else {
                    warn!("skipping cross-origin image {} without CORS clearance", url);
                    return Ok(None);
                }
            }
            ResourceRef::Unresolvable(s) => {
                warn!("skipping image with unresolvable source {:?}", s);
                return Ok(None);
            }
        };

        match image::load_from_memory(&bytes) {
            Ok(img) => Ok(Some(LoadedImage {
                pixels: img.to_rgba8(),
                taints,
            })),
            Err(e) => {
                warn!("skipping undecodable image {:?}: {}", src, e);
                Ok(None)
            }
        }
    }
}

impl Rasterizer for SoftwareRasterizer {
    fn rasterize(&self, context: &dyn DocumentContext, surface: SurfaceId, options: &CaptureOptions) -> Result<Bitmap> {
        if options.scale == 0 {
            return Err(Error::RenderCaptureError("capture scale must be positive".into()));
        }

        let snapshot = context.snapshot(surface)?;
        let fragment = Html::parse_fragment(&snapshot.html);
        let layout = layout_fragment(&fragment, &snapshot.style);

        let s = options.scale;
        let (canvas_w, canvas_h) = canvas_size(layout.width, layout.content_height, s)?;
        let [r, g, b, a] = options.background;
        let mut canvas = RgbaImage::from_pixel(canvas_w, canvas_h, Rgba(options.background));
        let mut tainted = false;

        for cmd in build_display_list(&layout, (r, g, b, a)) {
            match cmd {
                PaintCommand::SolidRect { x, y, width, height, rgba } => {
                    fill_rect(&mut canvas, x * s as i32, y * s as i32, width * s, height * s, rgba);
                }
                PaintCommand::StrokeRect { x, y, width, height, rgba } => {
                    stroke_rect(&mut canvas, x * s as i32, y * s as i32, width * s, height * s, s, rgba);
                }
                PaintCommand::Text { x, y, text, scale, rgba } => {
                    draw_text(&mut canvas, x * s as i32, y * s as i32, &text, scale * s, rgba);
                }
                PaintCommand::Image { x, y, width, height, src } => {
                    if let Some(img) = self.load_image(&src, snapshot.base_url.as_ref(), options)? {
                        let resized = image::imageops::resize(
                            &img.pixels,
                            width.saturating_mul(s).min(canvas_w),
                            height.saturating_mul(s).min(canvas_h),
                            FilterType::Triangle,
                        );
                        image::imageops::overlay(&mut canvas, &resized, (x * s as i32) as i64, (y * s as i32) as i64);
                        tainted |= img.taints;
                    }
                }
            }
        }

        debug!(
            "rasterized {} to {}x{} (scale {}, tainted: {})",
            surface,
            canvas.width(),
            canvas.height(),
            s,
            tainted
        );
        Ok(Bitmap::with_taint(canvas, tainted))
    }
}

fn blend(dst: &mut Rgba<u8>, rgba: (u8, u8, u8, u8)) {
    let (r, g, b, a) = rgba;
    if a == 255 {
        *dst = Rgba([r, g, b, 255]);
        return;
    }
    let a = a as u32;
    let mix = |src: u8, d: u8| ((src as u32 * a + d as u32 * (255 - a)) / 255) as u8;
    let Rgba([dr, dg, db, da]) = *dst;
    *dst = Rgba([mix(r, dr), mix(g, dg), mix(b, db), da.max(a as u8)]);
}

/// Fill a device-pixel rectangle, clipped to the canvas
pub fn fill_rect(canvas: &mut RgbaImage, x: i32, y: i32, width: u32, height: u32, rgba: (u8, u8, u8, u8)) {
    let x0 = x.max(0) as u32;
    let y0 = y.max(0) as u32;
    let x1 = ((x as i64 + width as i64).max(0) as u64).min(canvas.width() as u64) as u32;
    let y1 = ((y as i64 + height as i64).max(0) as u64).min(canvas.height() as u64) as u32;
    for py in y0..y1 {
        for px in x0..x1 {
            blend(canvas.get_pixel_mut(px, py), rgba);
        }
    }
}

fn stroke_rect(canvas: &mut RgbaImage, x: i32, y: i32, width: u32, height: u32, line: u32, rgba: (u8, u8, u8, u8)) {
    fill_rect(canvas, x, y, width, line, rgba);
    fill_rect(canvas, x, y + height as i32 - line as i32, width, line, rgba);
    fill_rect(canvas, x, y, line, height, rgba);
    fill_rect(canvas, x + width as i32 - line as i32, y, line, height, rgba);
}

/// Paint `text` as glyph cells starting at device pixel (x, y). `unit` is
/// the number of device pixels per glyph grid unit.
fn draw_text(canvas: &mut RgbaImage, x: i32, y: i32, text: &str, unit: u32, rgba: (u8, u8, u8, u8)) {
    let cell = (GLYPH_PX * unit) as i32;
    let u = unit as i32;
    for (i, ch) in text.chars().enumerate() {
        if ch.is_whitespace() {
            continue;
        }
        let cx = x + i as i32 * cell;
        // (top, height) in grid units within the 8-unit cell
        let (top, h, w) = if ch.is_ascii_punctuation() {
            (5, 2, 2)
        } else if ch.is_lowercase() {
            (3, 4, 5)
        } else {
            (1, 6, 5)
        };
        fill_rect(canvas, cx + u, y + top * u, (w * u) as u32, (h * u) as u32, rgba);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::{HtmlDocument, SurfaceStyle};

    fn png_bytes(w: u32, h: u32, rgba: [u8; 4]) -> Vec<u8> {
        Bitmap::solid(w, h, rgba).encode_png().unwrap()
    }

    #[test]
    fn rasterize_scales_surface() {
        let doc = HtmlDocument::new(None).unwrap();
        let id = doc.attach("<h1>Hello</h1><p>World</p>", &SurfaceStyle::default()).unwrap();
        let natural = doc.scroll_height(id).unwrap();

        let bitmap = SoftwareRasterizer::offline()
            .rasterize(&doc, id, &CaptureOptions::default())
            .unwrap();
        assert_eq!(bitmap.width(), 1600);
        assert_eq!(bitmap.height(), natural * 2);

        let pixels = bitmap.pixels().unwrap();
        assert!(pixels.pixels().any(|p| p.0 == [0, 0, 0, 255]), "expected text pixels");
        assert!(pixels.pixels().any(|p| p.0 == [255, 255, 255, 255]), "expected background pixels");
        // capture does not touch the surface
        assert!(doc.is_attached(id));
    }

    #[test]
    fn rasterize_detached_surface_fails() {
        let doc = HtmlDocument::new(None).unwrap();
        let id = doc.attach("<p>gone</p>", &SurfaceStyle::default()).unwrap();
        doc.detach(id).unwrap();
        let err = SoftwareRasterizer::offline()
            .rasterize(&doc, id, &CaptureOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::RenderCaptureError(_)));
    }

    #[test]
    fn inline_images_are_painted() {
        use base64::Engine as _;
        let png = png_bytes(4, 4, [255, 0, 0, 255]);
        let src = format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(png)
        );
        let doc = HtmlDocument::new(None).unwrap();
        let id = doc
            .attach(&format!(r#"<img src="{}" width="20" height="20">"#, src), &SurfaceStyle::default())
            .unwrap();
        let bitmap = SoftwareRasterizer::offline()
            .rasterize(&doc, id, &CaptureOptions::default())
            .unwrap();
        // image box starts at the padding edge (40px, 2x scale)
        assert_eq!(bitmap.pixels().unwrap().get_pixel(85, 85).0, [255, 0, 0, 255]);
    }

    #[test]
    fn cross_origin_without_cors_taints_or_skips() {
        let loader = Arc::new(StaticResourceLoader::new());
        loader.insert("https://cdn.example.net/stamp.png", png_bytes(2, 2, [0, 0, 255, 255]), false);
        let rasterizer = SoftwareRasterizer::new(loader);

        let doc = HtmlDocument::new(Some("https://console.example.com/")).unwrap();
        let id = doc
            .attach(r#"<img src="https://cdn.example.net/stamp.png" width="10" height="10">"#, &SurfaceStyle::default())
            .unwrap();

        let tainted = rasterizer.rasterize(&doc, id, &CaptureOptions::default()).unwrap();
        assert!(tainted.is_tainted());

        let strict = CaptureOptions {
            allow_taint: false,
            ..Default::default()
        };
        let skipped = rasterizer.rasterize(&doc, id, &strict).unwrap();
        assert!(!skipped.is_tainted());
        assert_eq!(skipped.pixels().unwrap().get_pixel(85, 85).0, [255, 255, 255, 255]);
    }

    #[test]
    fn cross_origin_with_cors_is_clean() {
        let loader = Arc::new(StaticResourceLoader::new());
        loader.insert("https://cdn.example.net/logo.png", png_bytes(2, 2, [0, 128, 0, 255]), true);
        let doc = HtmlDocument::new(Some("https://console.example.com/")).unwrap();
        let id = doc
            .attach(r#"<img src="https://cdn.example.net/logo.png" width="10" height="10">"#, &SurfaceStyle::default())
            .unwrap();
        let bitmap = SoftwareRasterizer::new(loader)
            .rasterize(&doc, id, &CaptureOptions::default())
            .unwrap();
        assert!(!bitmap.is_tainted());
        assert_eq!(bitmap.pixels().unwrap().get_pixel(85, 85).0, [0, 128, 0, 255]);
    }

    #[test]
    fn blocked_image_is_a_capture_error() {
        let doc = HtmlDocument::new(Some("https://console.example.com/")).unwrap();
        let id = doc
            .attach(r#"<img src="https://cdn.example.net/blocked.png">"#, &SurfaceStyle::default())
            .unwrap();
        let err = SoftwareRasterizer::offline()
            .rasterize(&doc, id, &CaptureOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::RenderCaptureError(_)));
    }

    #[test]
    fn oversized_content_is_refused_before_allocating() {
        let doc = HtmlDocument::new(None).unwrap();
        let id = doc
            .attach(r#"<p>x</p><img width="10" height="300000">"#, &SurfaceStyle::default())
            .unwrap();
        let err = SoftwareRasterizer::offline()
            .rasterize(&doc, id, &CaptureOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::RenderCaptureError(msg) if msg.contains("too large")));
    }

    #[test]
    fn canvas_size_limits() {
        assert_eq!(canvas_size(800, 1200, 2).unwrap(), (1600, 2400));
        assert_eq!(canvas_size(800, 16_383, 2).unwrap(), (1600, 32_766));
        assert!(canvas_size(800, 16_384, 2).is_err());
        assert!(canvas_size(u32::MAX, 1, 2).is_err());
        assert!(canvas_size(20_000, 20_000, 1).is_err());
    }

    #[test]
    fn fill_rect_clips_to_canvas() {
        let mut canvas = RgbaImage::from_pixel(4, 4, Rgba([255, 255, 255, 255]));
        fill_rect(&mut canvas, -2, -2, 4, 4, (0, 0, 0, 255));
        assert_eq!(canvas.get_pixel(0, 0).0, [0, 0, 0, 255]);
        assert_eq!(canvas.get_pixel(1, 1).0, [0, 0, 0, 255]);
        assert_eq!(canvas.get_pixel(2, 2).0, [255, 255, 255, 255]);
        fill_rect(&mut canvas, 10, 10, 4, 4, (0, 0, 0, 255));
    }
}
