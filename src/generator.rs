//! Generation orchestrator
//!
//! [`Generator`] is the public entry point. Each call stages the content on a
//! fresh surface of the document context, waits for fonts, rasterizes,
//! composites, assembles and emits `<filename>.pdf`. The staging surface is
//! removed on every exit path and every failure is reported as
//! `DocumentGenerationError` carrying the original cause.

use crate::assembler;
use crate::compositor::{self, PageGeometry};
use crate::rendering::Rasterizer;
use crate::sink::DownloadSink;
use crate::surface::{DocumentContext, StagedSurface};
use crate::{Content, Error, GeneratorConfig, RenderRequest, Result};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub use crate::assembler::GeneratedDocument;

/// Cooperative cancellation flag checked between pipeline stages
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once the token has been cancelled
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

/// Output file name for a base name: `<base>.pdf`
///
/// A trailing `.pdf` (any case) is not doubled and an empty base becomes
/// `document`.
pub fn pdf_filename(base: &str) -> String {
    let base = base.trim();
    let stem = match base.len().checked_sub(4).and_then(|i| base.get(i..).map(|ext| (i, ext))) {
        Some((i, ext)) if ext.eq_ignore_ascii_case(".pdf") => &base[..i],
        _ => base,
    };
    let stem = stem.trim();
    if stem.is_empty() {
        "document.pdf".to_string()
    } else {
        format!("{}.pdf", stem)
    }
}

/// The document generator
///
/// Cheap to clone; clones share the document context, rasterizer and sink.
/// Concurrent calls are independent: each owns its staging surface.
#[derive(Clone)]
pub struct Generator {
    config: GeneratorConfig,
    context: Arc<dyn DocumentContext>,
    rasterizer: Arc<dyn Rasterizer>,
    sink: Arc<dyn DownloadSink>,
}

impl Generator {
    pub fn new(
        config: GeneratorConfig,
        context: Arc<dyn DocumentContext>,
        rasterizer: Arc<dyn Rasterizer>,
        sink: Arc<dyn DownloadSink>,
    ) -> Self {
        Self {
            config,
            context,
            rasterizer,
            sink,
        }
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    pub fn context(&self) -> &Arc<dyn DocumentContext> {
        &self.context
    }

    pub fn sink(&self) -> &Arc<dyn DownloadSink> {
        &self.sink
    }

    /// Generate a document for `request`.
    pub async fn generate(&self, request: RenderRequest) -> Result<GeneratedDocument> {
        self.generate_with_cancel(request, CancelToken::new()).await
    }

    /// Generate a document, stopping at the next checkpoint once `cancel` is
    /// cancelled.
    ///
    /// The pipeline runs on tokio's blocking pool. With `timeout_ms` set the
    /// call fails with `Timeout` when the bound elapses and the token is
    /// cancelled so the pipeline stops and tears its surface down.
    pub async fn generate_with_cancel(
        &self,
        request: RenderRequest,
        cancel: CancelToken,
    ) -> Result<GeneratedDocument> {
        let this = self.clone();
        let token = cancel.clone();
        let task = tokio::task::spawn_blocking(move || this.generate_blocking(&request, &token));

        let joined = match self.config.timeout_ms {
            Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), task).await {
                Ok(joined) => joined,
                Err(_) => {
                    cancel.cancel();
                    warn!("generation timed out after {}ms", ms);
                    return Err(Error::Timeout(ms).into_generation_error());
                }
            },
            None => task.await,
        };

        match joined {
            Ok(result) => result,
            Err(e) => Err(Error::Other(format!("generation task failed: {}", e)).into_generation_error()),
        }
    }

    /// Synchronous variant of [`Generator::generate_with_cancel`]
    pub fn generate_blocking(&self, request: &RenderRequest, cancel: &CancelToken) -> Result<GeneratedDocument> {
        let started = Instant::now();
        match self.run(request, cancel) {
            Ok(doc) => {
                info!(
                    "generated {} ({} page(s), {} bytes) in {:?}",
                    doc.filename,
                    doc.page_count,
                    doc.byte_len,
                    started.elapsed()
                );
                Ok(doc)
            }
            Err(e) => {
                warn!("generation of {} failed: {}", request.filename, e);
                Err(e.into_generation_error())
            }
        }
    }

    fn run(&self, request: &RenderRequest, cancel: &CancelToken) -> Result<GeneratedDocument> {
        let filename = pdf_filename(&request.filename);
        cancel.check()?;

        let markup = match &request.content {
            Content::Html(html) => html.clone(),
            Content::Element(id) => self.context.element_html(id)?,
        };

        let style = self.config.surface_style();
        let surface = StagedSurface::acquire(self.context.as_ref(), &markup, &style)?;
        debug!("staged {} for {}", surface.id(), filename);

        cancel.check()?;
        self.context.fonts_ready()?;

        cancel.check()?;
        let bitmap = self
            .rasterizer
            .rasterize(self.context.as_ref(), surface.id(), &self.config.capture_options())?;
        debug!("captured {}x{} bitmap", bitmap.width(), bitmap.height());
        surface.release()?;

        cancel.check()?;
        let geometry = PageGeometry::for_format(request.page_format, request.orientation);
        let slices = compositor::composite(&bitmap, &geometry)?;
        let document = assembler::assemble(&slices, &bitmap, &geometry)?;

        cancel.check()?;
        document.emit(self.sink.as_ref(), &filename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pdf_suffix_is_appended_once() {
        assert_eq!(pdf_filename("Proforma_Invoice_PI-20240101-1234"), "Proforma_Invoice_PI-20240101-1234.pdf");
        assert_eq!(pdf_filename("Booking-Agreement-42.pdf"), "Booking-Agreement-42.pdf");
        assert_eq!(pdf_filename("report.PDF"), "report.pdf");
        assert_eq!(pdf_filename("  "), "document.pdf");
        assert_eq!(pdf_filename(".pdf"), "document.pdf");
        assert_eq!(pdf_filename("pdf"), "pdf.pdf");
        assert_eq!(pdf_filename("फ़ाइल"), "फ़ाइल.pdf");
    }

    #[test]
    fn cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(token.check().is_ok());
        clone.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(Error::Cancelled)));
    }
}
