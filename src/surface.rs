//! Staging surfaces and the live document they are attached to
//!
//! Rasterization needs laid-out, styled markup, so content is staged on a
//! detached surface appended to a [`DocumentContext`] and positioned outside
//! the visible viewport. Every surface is a fresh node; the generator acquires
//! it through [`StagedSurface`], which removes it again on every exit path.

use crate::rendering::layout;
use crate::{Error, Result};
use log::{debug, warn};
use scraper::Html;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use url::Url;

/// Identifier of a staging node attached to a document context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(u64);

impl SurfaceId {
    pub fn new(raw: u64) -> Self {
        SurfaceId(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rfdoc-surface-{}", self.0)
    }
}

/// Fixed staging dimensions and placement of a surface
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceStyle {
    /// Border-box width in CSS pixels
    pub width_px: u32,
    pub padding_px: u32,
    pub background: [u8; 4],
    /// Horizontal offset; negative values keep the node off-screen
    pub left_px: i32,
    pub top_px: i32,
}

impl Default for SurfaceStyle {
    fn default() -> Self {
        Self {
            width_px: 800,
            padding_px: 40,
            background: [255, 255, 255, 255],
            left_px: -9999,
            top_px: 0,
        }
    }
}

impl SurfaceStyle {
    /// Width available to content inside the padding
    pub fn content_width(&self) -> u32 {
        self.width_px.saturating_sub(self.padding_px.saturating_mul(2))
    }

    /// Inline CSS applied to the staging node
    pub fn css(&self) -> String {
        let [r, g, b, _] = self.background;
        format!(
            "position:absolute;left:{}px;top:{}px;width:{}px;padding:{}px;box-sizing:border-box;background-color:#{:02x}{:02x}{:02x}",
            self.left_px, self.top_px, self.width_px, self.padding_px, r, g, b
        )
    }
}

/// Read-only view of a staged surface, as seen by a rasterizer
#[derive(Debug, Clone)]
pub struct SurfaceSnapshot {
    pub id: SurfaceId,
    pub html: String,
    pub style: SurfaceStyle,
    pub base_url: Option<Url>,
}

/// The live document staging surfaces are attached to
///
/// Mutation is append/remove only: `attach` always creates a new node and
/// `detach` removes exactly that node.
pub trait DocumentContext: Send + Sync {
    /// Append a fresh off-screen node holding `html`
    fn attach(&self, html: &str, style: &SurfaceStyle) -> Result<SurfaceId>;

    /// Remove a previously attached node
    fn detach(&self, id: SurfaceId) -> Result<()>;

    /// Whether the node is currently attached
    fn is_attached(&self, id: SurfaceId) -> bool;

    /// Number of staging nodes currently attached
    fn ephemeral_count(&self) -> usize;

    /// Markup and style of an attached node. Fails with `RenderCaptureError`
    /// when the node is not attached.
    fn snapshot(&self, id: SurfaceId) -> Result<SurfaceSnapshot>;

    /// Outer markup of an element already rendered in the document
    fn element_html(&self, element_id: &str) -> Result<String>;

    /// Natural (scroll) height of an attached node in CSS pixels
    fn scroll_height(&self, id: SurfaceId) -> Result<u32>;

    /// Block until pending web fonts are loaded. Contexts without web fonts
    /// are always ready.
    fn fonts_ready(&self) -> Result<()> {
        Ok(())
    }
}

struct StagedNode {
    html: String,
    style: SurfaceStyle,
}

/// In-process document context
///
/// Holds the markup of the page currently shown (so in-page elements such as
/// `#invoice-preview` can be looked up by id) and the set of attached
/// staging nodes.
pub struct HtmlDocument {
    base_url: Option<Url>,
    body: Mutex<String>,
    surfaces: Mutex<HashMap<SurfaceId, StagedNode>>,
    next_id: AtomicU64,
}

impl HtmlDocument {
    /// Create an empty document. `base_url` resolves relative resource
    /// references and defines the document origin.
    pub fn new(base_url: Option<&str>) -> Result<Self> {
        let base_url = match base_url {
            Some(s) => Some(
                Url::parse(s).map_err(|e| Error::ConfigError(format!("invalid base url {}: {}", s, e)))?,
            ),
            None => None,
        };

        Ok(Self {
            base_url,
            body: Mutex::new(String::new()),
            surfaces: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn base_url(&self) -> Option<&Url> {
        self.base_url.as_ref()
    }

    /// Serialized origin of the document (`scheme://host:port`), if known
    pub fn origin(&self) -> Option<String> {
        self.base_url
            .as_ref()
            .map(|u| u.origin().ascii_serialization())
    }

    /// Replace the in-page markup (the view the console currently renders)
    pub fn set_body(&self, html: &str) {
        *self.body.lock().unwrap() = html.to_string();
    }

    /// Ids of the staging nodes currently attached, in attach order
    pub fn surface_ids(&self) -> Vec<SurfaceId> {
        let mut ids: Vec<SurfaceId> = self.surfaces.lock().unwrap().keys().copied().collect();
        ids.sort();
        ids
    }
}

impl DocumentContext for HtmlDocument {
    fn attach(&self, html: &str, style: &SurfaceStyle) -> Result<SurfaceId> {
        let id = SurfaceId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let node = StagedNode {
            html: html.to_string(),
            style: style.clone(),
        };
        self.surfaces.lock().unwrap().insert(id, node);
        debug!("attached {} ({} bytes of markup)", id, html.len());
        Ok(id)
    }

    fn detach(&self, id: SurfaceId) -> Result<()> {
        match self.surfaces.lock().unwrap().remove(&id) {
            Some(_) => {
                debug!("detached {}", id);
                Ok(())
            }
            None => Err(Error::SurfaceError(format!("{} is not attached", id))),
        }
    }

    fn is_attached(&self, id: SurfaceId) -> bool {
        self.surfaces.lock().unwrap().contains_key(&id)
    }

    fn ephemeral_count(&self) -> usize {
        self.surfaces.lock().unwrap().len()
    }

    fn snapshot(&self, id: SurfaceId) -> Result<SurfaceSnapshot> {
        let surfaces = self.surfaces.lock().unwrap();
        let node = surfaces
            .get(&id)
            .ok_or_else(|| Error::RenderCaptureError(format!("{} is not attached to the document", id)))?;
        Ok(SurfaceSnapshot {
            id,
            html: node.html.clone(),
            style: node.style.clone(),
            base_url: self.base_url.clone(),
        })
    }

    fn element_html(&self, element_id: &str) -> Result<String> {
        let body = self.body.lock().unwrap();
        let fragment = Html::parse_fragment(&body);
        fragment
            .root_element()
            .descendants()
            .filter_map(scraper::ElementRef::wrap)
            .find(|el| el.value().id() == Some(element_id))
            .map(|el| el.html())
            .ok_or_else(|| Error::RenderCaptureError(format!("element '{}' not found", element_id)))
    }

    fn scroll_height(&self, id: SurfaceId) -> Result<u32> {
        let snapshot = self.snapshot(id)?;
        let fragment = Html::parse_fragment(&snapshot.html);
        Ok(layout::layout_fragment(&fragment, &snapshot.style).content_height)
    }
}

/// Scoped acquisition of a staging surface
///
/// The node is detached when the guard is released or dropped, including
/// when an error propagates or a panic unwinds through the owner.
pub struct StagedSurface<'a> {
    context: &'a dyn DocumentContext,
    id: SurfaceId,
    released: bool,
}

impl<'a> StagedSurface<'a> {
    /// Attach `html` to `context` and take ownership of the new node
    pub fn acquire(context: &'a dyn DocumentContext, html: &str, style: &SurfaceStyle) -> Result<Self> {
        let id = context.attach(html, style)?;
        Ok(Self {
            context,
            id,
            released: false,
        })
    }

    pub fn id(&self) -> SurfaceId {
        self.id
    }

    /// Detach the node now, reporting a failed removal
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.context.detach(self.id)
    }
}

impl Drop for StagedSurface<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.context.detach(self.id) {
            warn!("failed to remove staging surface {}: {}", self.id, e);
        }
    }
}
