//! RFox Document Generator
//!
//! Turns HTML content (agreements fetched from the booking backend, or
//! proforma invoices rendered from a local template) into paginated A4 PDF
//! documents by staging the markup on an off-screen surface, rasterizing it,
//! slicing the bitmap into page bands and assembling the pages.
//!
//! # Pipeline
//!
//! - **Rasterizer** ([`rendering::Rasterizer`]): captures a staged surface into
//!   a [`rendering::Bitmap`] at 2x device scale
//! - **Compositor** ([`compositor::composite`]): slices the bitmap into
//!   [`compositor::PageSlice`]s
//! - **Assembler** ([`assembler::assemble`]): writes one page per slice into an
//!   [`assembler::OutputDocument`] and emits it exactly once
//! - **Generator** ([`generator::Generator`]): public entry point; the staging
//!   surface is always removed, whatever the outcome
//!
//! # Example
//!
//! ```no_run
//! use rfdocgen::{GeneratorConfig, RenderRequest};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = GeneratorConfig {
//!     output_dir: "out".into(),
//!     ..Default::default()
//! };
//!
//! let generator = rfdocgen::new_generator(config)?;
//! let doc = generator
//!     .generate(RenderRequest::html("<h1>Agreement</h1><p>...</p>", "Booking-Agreement-42"))
//!     .await?;
//! println!("{} ({} pages)", doc.filename, doc.page_count);
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::sync::Arc;

pub mod error;
pub use error::{Error, Result};

pub mod assembler;
pub mod compositor;
pub mod generator;
pub mod records;
pub mod rendering;
pub mod resources;
pub mod sink;
pub mod surface;

// Chrome DevTools backend: real browser layout and typography
#[cfg(feature = "cdp")]
pub mod cdp;

pub use compositor::{PageGeometry, PageSlice};
pub use generator::{CancelToken, GeneratedDocument, Generator};
pub use rendering::{Bitmap, CaptureOptions, Rasterizer};
pub use surface::{DocumentContext, HtmlDocument, SurfaceId, SurfaceStyle};

/// Configuration for the document generator
///
/// The defaults mirror the staging used by the console's PDF exports: an
/// 800px wide white surface with 40px padding, captured at 2x with CORS
/// requests and tainting allowed so remote logos and stamps are not dropped.
///
/// # Examples
///
/// ```
/// let cfg = rfdocgen::GeneratorConfig::default();
/// assert_eq!(cfg.staging_width_px, 800);
/// assert_eq!(cfg.device_scale, 2);
/// ```
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Width of the staging surface in CSS pixels (padding included)
    pub staging_width_px: u32,
    /// Padding applied inside the staging surface
    pub staging_padding_px: u32,
    /// Device pixels per CSS pixel used when capturing
    pub device_scale: u32,
    /// Background colour painted behind the content (RGBA)
    pub background: [u8; 4],
    /// Request cross-origin images with CORS
    pub use_cors: bool,
    /// Paint cross-origin images that lack CORS clearance (taints the bitmap)
    pub allow_taint: bool,
    /// Optional bound on a whole `generate` call in milliseconds
    pub timeout_ms: Option<u64>,
    /// Base URL used to resolve relative resource references
    pub base_url: Option<String>,
    /// Directory the default file sink writes into
    pub output_dir: PathBuf,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            staging_width_px: 800,
            staging_padding_px: 40,
            device_scale: 2,
            background: [255, 255, 255, 255],
            use_cors: true,
            allow_taint: true,
            timeout_ms: None,
            base_url: None,
            output_dir: PathBuf::from("."),
        }
    }
}

impl GeneratorConfig {
    /// Check the configuration for values the pipeline cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.staging_width_px == 0 {
            return Err(Error::ConfigError("staging width must be positive".into()));
        }
        if self.staging_padding_px.saturating_mul(2) >= self.staging_width_px {
            return Err(Error::ConfigError(format!(
                "padding {}px leaves no content width in a {}px surface",
                self.staging_padding_px, self.staging_width_px
            )));
        }
        if self.device_scale == 0 || self.device_scale > 8 {
            return Err(Error::ConfigError(format!(
                "device scale must be between 1 and 8, got {}",
                self.device_scale
            )));
        }
        if let Some(base) = &self.base_url {
            url::Url::parse(base)
                .map_err(|e| Error::ConfigError(format!("invalid base url {}: {}", base, e)))?;
        }
        Ok(())
    }

    /// Staging style derived from this configuration
    pub fn surface_style(&self) -> SurfaceStyle {
        SurfaceStyle {
            width_px: self.staging_width_px,
            padding_px: self.staging_padding_px,
            background: self.background,
            ..SurfaceStyle::default()
        }
    }

    /// Capture options derived from this configuration
    pub fn capture_options(&self) -> CaptureOptions {
        CaptureOptions {
            scale: self.device_scale,
            use_cors: self.use_cors,
            allow_taint: self.allow_taint,
            background: self.background,
        }
    }
}

/// Physical page format of the output document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PageFormat {
    #[default]
    A4,
}

/// Page orientation of the output document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Orientation {
    #[default]
    Portrait,
}

/// What to render
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    /// A trusted HTML fragment staged on a fresh surface
    Html(String),
    /// The id of an element already rendered in the live document
    Element(String),
}

/// A single generation request
///
/// `filename` is the base name; the generator appends `.pdf`.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    pub content: Content,
    pub filename: String,
    pub page_format: PageFormat,
    pub orientation: Orientation,
}

impl RenderRequest {
    /// Request rendering of an HTML fragment
    pub fn html(html: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            content: Content::Html(html.into()),
            filename: filename.into(),
            page_format: PageFormat::A4,
            orientation: Orientation::Portrait,
        }
    }

    /// Request rendering of an element of the live document by id
    pub fn element(element_id: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            content: Content::Element(element_id.into()),
            filename: filename.into(),
            page_format: PageFormat::A4,
            orientation: Orientation::Portrait,
        }
    }
}

/// Create a generator with the default in-process backend
///
/// Markup is staged on an [`HtmlDocument`], captured by the
/// [`rendering::raster::SoftwareRasterizer`] and written to
/// `config.output_dir` by a [`sink::FileSink`]. Remote images are fetched over
/// HTTP when the `fetch` feature is enabled.
pub fn new_generator(config: GeneratorConfig) -> Result<Generator> {
    config.validate()?;

    let document = HtmlDocument::new(config.base_url.as_deref())?;

    #[cfg(feature = "fetch")]
    let loader = resources::HttpResourceLoader::new(document.origin())?;
    #[cfg(not(feature = "fetch"))]
    let loader = resources::StaticResourceLoader::new();

    let rasterizer = rendering::raster::SoftwareRasterizer::new(Arc::new(loader));
    let sink = sink::FileSink::new(config.output_dir.clone());

    Ok(Generator::new(
        config,
        Arc::new(document),
        Arc::new(rasterizer),
        Arc::new(sink),
    ))
}
