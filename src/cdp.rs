//! Chrome DevTools Protocol backend
//!
//! Staging surfaces are real DOM nodes appended to a headless Chrome tab, so
//! layout, fonts and images come from the browser. Capturing loads the
//! node's markup into a short-lived second tab and screenshots it at the
//! requested device scale.

use crate::rendering::{Bitmap, CaptureOptions, Rasterizer};
use crate::surface::{DocumentContext, SurfaceId, SurfaceSnapshot, SurfaceStyle};
use crate::{Error, Result};
use base64::Engine as Base64Engine;
use headless_chrome::browser::tab::Tab;
use headless_chrome::protocol::cdp::Page;
use headless_chrome::{Browser, LaunchOptions};
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use url::Url;

const SURFACE_ATTR: &str = "data-rfdoc-surface";

/// Document context and rasterizer backed by headless Chrome
pub struct CdpDocument {
    browser: Browser,
    tab: Arc<Tab>,
    base_url: Option<Url>,
    styles: Mutex<HashMap<SurfaceId, SurfaceStyle>>,
    next_id: AtomicU64,
}

impl CdpDocument {
    /// Launch Chrome and open the live document, optionally at `base_url`
    pub fn launch(base_url: Option<&str>) -> Result<Self> {
        let base_url = base_url
            .map(Url::parse)
            .transpose()
            .map_err(|e| Error::ConfigError(format!("invalid base url: {}", e)))?;

        let launch_options = LaunchOptions::default_builder()
            .headless(true)
            .window_size(Some((1280, 1024)))
            .build()
            .map_err(|e| Error::CdpError(format!("Failed to build launch options: {}", e)))?;
        let browser =
            Browser::new(launch_options).map_err(|e| Error::CdpError(format!("Failed to launch browser: {}", e)))?;
        let tab = browser
            .new_tab()
            .map_err(|e| Error::CdpError(format!("Failed to create tab: {}", e)))?;

        if let Some(url) = &base_url {
            tab.navigate_to(url.as_str())
                .map_err(|e| Error::CdpError(format!("Navigation failed: {}", e)))?;
            tab.wait_until_navigated()
                .map_err(|e| Error::CdpError(format!("Wait for navigation failed: {}", e)))?;
        }

        Ok(Self {
            browser,
            tab,
            base_url,
            styles: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    /// Replace the body of the live document
    pub fn set_body(&self, html: &str) -> Result<()> {
        self.eval(&format!("document.body.innerHTML = {}; true", js_string(html)), false)?;
        Ok(())
    }

    fn eval(&self, script: &str, await_promise: bool) -> Result<serde_json::Value> {
        let result = self
            .tab
            .evaluate(script, await_promise)
            .map_err(|e| Error::CdpError(format!("Evaluation failed: {}", e)))?;
        Ok(result.value.unwrap_or(serde_json::Value::Null))
    }

    fn node_expr(id: SurfaceId) -> String {
        format!("document.getElementById({})", js_string(&id.to_string()))
    }

    fn capture_page(&self, snapshot: &SurfaceSnapshot) -> String {
        let [r, g, b, _] = snapshot.style.background;
        let base = snapshot
            .base_url
            .as_ref()
            .map(|u| format!("<base href=\"{}\">", u))
            .unwrap_or_default();
        format!(
            "<!DOCTYPE html><html><head><meta charset=\"utf-8\">{}<style>html,body{{margin:0}}</style></head>\
             <body><div id=\"capture\" style=\"width:{}px;padding:{}px;box-sizing:border-box;background-color:#{:02x}{:02x}{:02x}\">{}</div></body></html>",
            base, snapshot.style.width_px, snapshot.style.padding_px, r, g, b, snapshot.html
        )
    }
}

fn js_string(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

impl DocumentContext for CdpDocument {
    fn attach(&self, html: &str, style: &SurfaceStyle) -> Result<SurfaceId> {
        let id = SurfaceId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let script = format!(
            "(function() {{ const el = document.createElement('div'); el.id = {}; el.setAttribute('{}', ''); \
             el.setAttribute('style', {}); el.innerHTML = {}; document.body.appendChild(el); return true; }})()",
            js_string(&id.to_string()),
            SURFACE_ATTR,
            js_string(&style.css()),
            js_string(html)
        );
        self.eval(&script, false)?;
        self.styles.lock().unwrap().insert(id, style.clone());
        debug!("attached {} to the browser document", id);
        Ok(id)
    }

    fn detach(&self, id: SurfaceId) -> Result<()> {
        self.styles.lock().unwrap().remove(&id);
        let removed = self.eval(
            &format!(
                "(function() {{ const el = {}; if (!el) return false; el.remove(); return true; }})()",
                Self::node_expr(id)
            ),
            false,
        )?;
        if removed.as_bool() == Some(true) {
            Ok(())
        } else {
            Err(Error::SurfaceError(format!("{} is not attached", id)))
        }
    }

    fn is_attached(&self, id: SurfaceId) -> bool {
        match self.eval(&format!("!!{}", Self::node_expr(id)), false) {
            Ok(v) => v.as_bool().unwrap_or(false),
            Err(e) => {
                warn!("attachment check for {} failed: {}", id, e);
                false
            }
        }
    }

    fn ephemeral_count(&self) -> usize {
        self.eval(&format!("document.querySelectorAll('[{}]').length", SURFACE_ATTR), false)
            .ok()
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as usize
    }

    fn snapshot(&self, id: SurfaceId) -> Result<SurfaceSnapshot> {
        let html = self.eval(
            &format!("(function() {{ const el = {}; return el ? el.innerHTML : null; }})()", Self::node_expr(id)),
            false,
        )?;
        let html = html
            .as_str()
            .ok_or_else(|| Error::RenderCaptureError(format!("{} is not attached to the document", id)))?
            .to_string();
        let style = self.styles.lock().unwrap().get(&id).cloned().unwrap_or_default();
        Ok(SurfaceSnapshot {
            id,
            html,
            style,
            base_url: self.base_url.clone(),
        })
    }

    fn element_html(&self, element_id: &str) -> Result<String> {
        let html = self.eval(
            &format!(
                "(function() {{ const el = document.getElementById({}); return el ? el.outerHTML : null; }})()",
                js_string(element_id)
            ),
            false,
        )?;
        html.as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::RenderCaptureError(format!("element '{}' not found", element_id)))
    }

    fn scroll_height(&self, id: SurfaceId) -> Result<u32> {
        let height = self.eval(
            &format!("(function() {{ const el = {}; return el ? el.scrollHeight : null; }})()", Self::node_expr(id)),
            false,
        )?;
        height
            .as_u64()
            .map(|h| h as u32)
            .ok_or_else(|| Error::RenderCaptureError(format!("{} is not attached to the document", id)))
    }

    fn fonts_ready(&self) -> Result<()> {
        self.eval("document.fonts.ready.then(() => true)", true)?;
        Ok(())
    }
}

impl Rasterizer for CdpDocument {
    fn rasterize(&self, context: &dyn DocumentContext, surface: SurfaceId, options: &CaptureOptions) -> Result<Bitmap> {
        let snapshot = context.snapshot(surface)?;
        let height = context.scroll_height(surface)?;
        if height == 0 {
            return Ok(Bitmap::solid(snapshot.style.width_px * options.scale, 0, options.background));
        }

        let page = self.capture_page(&snapshot);
        let data_url = format!(
            "data:text/html;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(page.as_bytes())
        );

        let tab = self
            .browser
            .new_tab()
            .map_err(|e| Error::RenderCaptureError(format!("Failed to open capture tab: {}", e)))?;
        let captured = capture(&tab, &data_url, snapshot.style.width_px, height, options);
        if let Err(e) = tab.close(true) {
            warn!("failed to close capture tab: {}", e);
        }
        let png = captured?;

        let pixels = image::load_from_memory(&png)
            .map_err(|e| Error::RenderCaptureError(format!("Failed to decode screenshot: {}", e)))?
            .to_rgba8();
        Ok(Bitmap::new(pixels))
    }
}

fn capture(tab: &Tab, data_url: &str, width: u32, height: u32, options: &CaptureOptions) -> Result<Vec<u8>> {
    tab.navigate_to(data_url)
        .map_err(|e| Error::RenderCaptureError(format!("Navigation failed: {}", e)))?;
    tab.wait_until_navigated()
        .map_err(|e| Error::RenderCaptureError(format!("Wait for navigation failed: {}", e)))?;
    tab.evaluate("document.fonts.ready.then(() => true)", true)
        .map_err(|e| Error::RenderCaptureError(format!("Font wait failed: {}", e)))?;

    let clip = Page::Viewport {
        x: 0.0,
        y: 0.0,
        width: width as f64,
        height: height as f64,
        scale: options.scale as f64,
    };
    tab.capture_screenshot(Page::CaptureScreenshotFormatOption::Png, None, Some(clip), true)
        .map_err(|e| Error::RenderCaptureError(format!("Screenshot failed: {}", e)))
}
