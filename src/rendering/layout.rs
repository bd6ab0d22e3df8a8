/// Block layout of a staged HTML fragment at a fixed width
///
/// This is a deliberately small flow model: block-level elements stack
/// vertically, text wraps on an 8px glyph grid, table rows split their width
/// evenly between cells, and images take their declared size (or a square
/// placeholder) clamped to the content width. Both the natural height reported
/// for a surface and the software rasterizer use it, so they always agree.
use crate::surface::SurfaceStyle;
use scraper::{ElementRef, Html, Node};

/// Width and base height of one glyph cell in CSS pixels
pub const GLYPH_PX: u32 = 8;
/// Extra vertical space between wrapped lines
pub const LINE_GAP_PX: u32 = 4;

const BLOCK_PADDING_PX: u32 = 4;
const CELL_PADDING_PX: u32 = 6;
const DEFAULT_IMAGE_PX: u32 = 100;
/// Longest length an attribute or inline style may declare
pub const MAX_LENGTH_PX: u32 = 32_767;

#[derive(Debug, Clone, PartialEq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn bottom(&self) -> i32 {
        self.y.saturating_add(i32::try_from(self.height).unwrap_or(i32::MAX))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementType {
    Heading(u8),
    Paragraph,
    ListItem,
    TableRow { header: bool },
    Image { src: String },
    Rule,
}

/// One cell of a laid-out table row
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub rect: Rect,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct LayoutNode {
    pub rect: Rect,
    pub elem_type: ElementType,
    /// Wrapped text, one line per `\n`
    pub text: String,
    pub cells: Vec<Cell>,
    /// Glyph scale (headings render at 2x)
    pub scale: u32,
}

/// Result of laying out a fragment
#[derive(Debug, Clone)]
pub struct Layout {
    pub width: u32,
    /// Natural height including padding; 0 when nothing renders
    pub content_height: u32,
    pub nodes: Vec<LayoutNode>,
}

impl Layout {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

struct Flow {
    x: i32,
    y: u32,
    width: u32,
    nodes: Vec<LayoutNode>,
}

impl Flow {
    fn top(&self) -> i32 {
        i32::try_from(self.y).unwrap_or(i32::MAX)
    }

    fn advance(&mut self, by: u32) {
        self.y = self.y.saturating_add(by);
    }
}

/// Lay out `fragment` inside a surface styled with `style`.
pub fn layout_fragment(fragment: &Html, style: &SurfaceStyle) -> Layout {
    let mut flow = Flow {
        x: style.padding_px as i32,
        y: style.padding_px,
        width: style.content_width(),
        nodes: Vec::new(),
    };

    layout_container(fragment.root_element(), &mut flow);

    let content_height = if flow.nodes.is_empty() {
        0
    } else {
        flow.y.saturating_add(style.padding_px)
    };

    Layout {
        width: style.width_px,
        content_height,
        nodes: flow.nodes,
    }
}

fn is_skipped(tag: &str) -> bool {
    matches!(tag, "script" | "style" | "head" | "title" | "template" | "noscript" | "meta" | "link")
}

fn is_inline(tag: &str) -> bool {
    matches!(
        tag,
        "span" | "strong" | "b" | "em" | "i" | "a" | "u" | "small" | "label" | "code" | "sup" | "sub" | "br" | "font"
    )
}

fn is_text_block(tag: &str) -> bool {
    matches!(
        tag,
        "p" | "pre" | "blockquote" | "address" | "figcaption" | "dt" | "dd" | "caption"
    )
}

fn heading_level(tag: &str) -> Option<u8> {
    match tag {
        "h1" => Some(1),
        "h2" => Some(2),
        "h3" => Some(3),
        "h4" => Some(4),
        "h5" => Some(5),
        "h6" => Some(6),
        _ => None,
    }
}

fn layout_container(el: ElementRef, flow: &mut Flow) {
    let mut run = String::new();

    for child in el.children() {
        match child.value() {
            Node::Text(t) => run.push_str(t),
            Node::Element(e) => {
                let tag = e.name();
                if is_skipped(tag) {
                    continue;
                }
                let child_el = match ElementRef::wrap(child) {
                    Some(c) => c,
                    None => continue,
                };
                if is_inline(tag) && !has_image(child_el) {
                    run.push_str(&block_text(child_el));
                    continue;
                }
                flush_run(&mut run, flow);
                layout_element(child_el, flow);
            }
            _ => {}
        }
    }
    flush_run(&mut run, flow);
}

fn flush_run(run: &mut String, flow: &mut Flow) {
    if !run.trim().is_empty() {
        push_text_block(flow, ElementType::Paragraph, run, 1, 6);
    }
    run.clear();
}

fn layout_element(el: ElementRef, flow: &mut Flow) {
    let tag = el.value().name();

    if let Some(level) = heading_level(tag) {
        let scale = if level <= 2 { 2 } else { 1 };
        push_text_block(flow, ElementType::Heading(level), &block_text(el), scale, 8);
        push_images(el, flow);
        return;
    }

    match tag {
        "img" => push_image(el, flow),
        "hr" => {
            flow.advance(8);
            flow.nodes.push(LayoutNode {
                rect: Rect {
                    x: flow.x,
                    y: flow.top(),
                    width: flow.width,
                    height: 1,
                },
                elem_type: ElementType::Rule,
                text: String::new(),
                cells: Vec::new(),
                scale: 1,
            });
            flow.advance(9);
        }
        "li" => {
            let text = format!("- {}", block_text(el).trim());
            push_text_block(flow, ElementType::ListItem, &text, 1, 4);
            push_images(el, flow);
        }
        "tr" => push_table_row(el, flow),
        "table" => {
            layout_container(el, flow);
            flow.advance(8);
        }
        t if is_text_block(t) => {
            push_text_block(flow, ElementType::Paragraph, &block_text(el), 1, 6);
            push_images(el, flow);
        }
        _ => layout_container(el, flow),
    }
}

fn has_image(el: ElementRef) -> bool {
    el.descendants()
        .filter_map(ElementRef::wrap)
        .any(|d| d.value().name() == "img")
}

fn push_images(el: ElementRef, flow: &mut Flow) {
    let images: Vec<ElementRef> = el
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|d| d.value().name() == "img")
        .collect();
    for img in images {
        push_image(img, flow);
    }
}

/// Text of an element with `<br>` turned into line breaks and whitespace
/// collapsed within each line.
fn block_text(el: ElementRef) -> String {
    let mut raw = String::new();
    for node in el.descendants() {
        match node.value() {
            Node::Text(t) => raw.push_str(t),
            Node::Element(e) if e.name() == "br" => raw.push('\n'),
            _ => {}
        }
    }
    raw.split('\n')
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Wrap `text` into lines of at most `chars_per_line` characters; words longer
/// than a line are split.
pub fn wrap_text(text: &str, chars_per_line: usize) -> Vec<String> {
    let limit = chars_per_line.max(1);
    let mut lines = Vec::new();

    for paragraph in text.split('\n') {
        let mut cur = String::new();
        for word in paragraph.split_whitespace() {
            let mut word = word.to_string();
            while word.chars().count() > limit {
                if !cur.is_empty() {
                    lines.push(std::mem::take(&mut cur));
                }
                let head: String = word.chars().take(limit).collect();
                word = word.chars().skip(limit).collect();
                lines.push(head);
            }
            if word.is_empty() {
                continue;
            }
            let needed = if cur.is_empty() { word.chars().count() } else { cur.chars().count() + 1 + word.chars().count() };
            if needed > limit && !cur.is_empty() {
                lines.push(std::mem::take(&mut cur));
            }
            if !cur.is_empty() {
                cur.push(' ');
            }
            cur.push_str(&word);
        }
        if !cur.is_empty() {
            lines.push(cur);
        }
    }

    lines
}

fn line_height(scale: u32) -> u32 {
    GLYPH_PX * scale + LINE_GAP_PX
}

fn push_text_block(flow: &mut Flow, elem_type: ElementType, text: &str, scale: u32, margin: u32) {
    let inner = flow.width.saturating_sub(BLOCK_PADDING_PX * 2);
    let chars_per_line = (inner / (GLYPH_PX * scale)).max(1) as usize;
    let lines = wrap_text(text, chars_per_line);
    if lines.is_empty() {
        return;
    }

    let height = u32::try_from(lines.len())
        .unwrap_or(u32::MAX)
        .saturating_mul(line_height(scale))
        .saturating_add(BLOCK_PADDING_PX * 2);
    flow.nodes.push(LayoutNode {
        rect: Rect {
            x: flow.x,
            y: flow.top(),
            width: flow.width,
            height,
        },
        elem_type,
        text: lines.join("\n"),
        cells: Vec::new(),
        scale,
    });
    flow.advance(height.saturating_add(margin));
}

fn push_table_row(row: ElementRef, flow: &mut Flow) {
    let cells: Vec<ElementRef> = row
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|c| matches!(c.value().name(), "td" | "th"))
        .collect();
    if cells.is_empty() {
        return;
    }

    let header = cells.iter().all(|c| c.value().name() == "th");
    let cell_width = flow.width / cells.len() as u32;
    let chars_per_line = (cell_width.saturating_sub(CELL_PADDING_PX * 2) / GLYPH_PX).max(1) as usize;

    let wrapped: Vec<Vec<String>> = cells
        .iter()
        .map(|c| wrap_text(&block_text(*c), chars_per_line))
        .collect();
    let max_lines = wrapped.iter().map(|l| l.len()).max().unwrap_or(0).max(1) as u32;
    let height = max_lines
        .saturating_mul(line_height(1))
        .saturating_add(CELL_PADDING_PX * 2);

    let laid_out = wrapped
        .into_iter()
        .enumerate()
        .map(|(i, lines)| Cell {
            rect: Rect {
                x: flow.x + (i as u32 * cell_width) as i32,
                y: flow.top(),
                width: cell_width,
                height,
            },
            text: lines.join("\n"),
        })
        .collect();

    flow.nodes.push(LayoutNode {
        rect: Rect {
            x: flow.x,
            y: flow.top(),
            width: cell_width * cells.len() as u32,
            height,
        },
        elem_type: ElementType::TableRow { header },
        text: String::new(),
        cells: laid_out,
        scale: 1,
    });
    flow.advance(height);
}

/// Parse a CSS/attribute pixel length such as `120`, `120px` or `120.5px`,
/// clamped to [`MAX_LENGTH_PX`].
fn parse_px(value: &str) -> Option<u32> {
    let v = value.trim().trim_end_matches("px").trim();
    v.parse::<f32>()
        .ok()
        .filter(|n| n.is_finite() && *n > 0.0)
        .map(|n| n.round().min(MAX_LENGTH_PX as f32) as u32)
}

fn style_px(style: &str, property: &str) -> Option<u32> {
    style.split(';').find_map(|decl| {
        let (name, value) = decl.split_once(':')?;
        if name.trim().eq_ignore_ascii_case(property) {
            parse_px(value)
        } else {
            None
        }
    })
}

/// Declared size of an `<img>` from its attributes or inline style
pub fn image_size(img: ElementRef) -> (u32, u32) {
    let attrs = img.value();
    let style = attrs.attr("style").unwrap_or("");
    let width = attrs
        .attr("width")
        .and_then(parse_px)
        .or_else(|| style_px(style, "width"));
    let height = attrs
        .attr("height")
        .and_then(parse_px)
        .or_else(|| style_px(style, "height"));

    match (width, height) {
        (Some(w), Some(h)) => (w, h),
        (Some(w), None) => (w, w),
        (None, Some(h)) => (h, h),
        (None, None) => (DEFAULT_IMAGE_PX, DEFAULT_IMAGE_PX),
    }
}

fn push_image(img: ElementRef, flow: &mut Flow) {
    let src = img.value().attr("src").unwrap_or("").trim().to_string();
    let (mut w, mut h) = image_size(img);
    if w > flow.width {
        h = (h as u64 * flow.width as u64 / w as u64).max(1) as u32;
        w = flow.width;
    }

    flow.nodes.push(LayoutNode {
        rect: Rect {
            x: flow.x,
            y: flow.top(),
            width: w,
            height: h,
        },
        elem_type: ElementType::Image { src },
        text: String::new(),
        cells: Vec::new(),
        scale: 1,
    });
    flow.advance(h.saturating_add(6));
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    fn layout(html: &str) -> Layout {
        layout_fragment(&Html::parse_fragment(html), &SurfaceStyle::default())
    }

    #[test]
    fn layout_stacks_heading_and_paragraphs() {
        let l = layout("<h1>Heading</h1><p>Hello world</p><p>More text</p>");
        assert_eq!(l.nodes.len(), 3);
        assert_eq!(l.nodes[0].elem_type, ElementType::Heading(1));
        assert_eq!(l.nodes[0].scale, 2);
        assert_eq!(l.nodes[1].elem_type, ElementType::Paragraph);
        assert!(l.nodes[1].rect.y > l.nodes[0].rect.y);
        assert!(l.nodes[2].rect.y >= l.nodes[1].rect.bottom());
        assert_eq!(l.nodes[0].rect.x, 40);
        assert_eq!(l.nodes[0].rect.width, 720);
        assert!(l.content_height > l.nodes[2].rect.bottom() as u32);
    }

    #[test]
    fn empty_fragment_has_no_height() {
        let l = layout("  <div>  </div> <script>var x = 1;</script>");
        assert!(l.is_empty());
        assert_eq!(l.content_height, 0);
    }

    #[test]
    fn long_paragraph_wraps() {
        let text = "word ".repeat(200);
        let l = layout(&format!("<p>{}</p>", text));
        assert_eq!(l.nodes.len(), 1);
        assert!(l.nodes[0].text.lines().count() > 5);
        for line in l.nodes[0].text.lines() {
            assert!(line.len() <= (720 - 8) / 8);
        }
    }

    #[test]
    fn wrap_splits_long_words() {
        let lines = wrap_text("abcdefghij xy", 4);
        assert_eq!(lines, vec!["abcd", "efgh", "ij", "xy"]);
        assert_eq!(wrap_text("a\nb", 10), vec!["a", "b"]);
        assert!(wrap_text("   ", 10).is_empty());
    }

    #[test]
    fn table_rows_split_cells_evenly() {
        let l = layout(
            "<table><tr><th>Description</th><th>Qty</th></tr><tr><td>Consulting</td><td>1</td></tr></table>",
        );
        assert_eq!(l.nodes.len(), 2);
        assert_eq!(l.nodes[0].elem_type, ElementType::TableRow { header: true });
        assert_eq!(l.nodes[1].elem_type, ElementType::TableRow { header: false });
        assert_eq!(l.nodes[1].cells.len(), 2);
        assert_eq!(l.nodes[1].cells[0].rect.width, 360);
        assert_eq!(l.nodes[1].cells[1].rect.x, 40 + 360);
        assert_eq!(l.nodes[1].rect.y, l.nodes[0].rect.bottom());
    }

    #[test]
    fn images_take_declared_size_clamped_to_width() {
        let l = layout(r#"<img src="logo.png" width="256" height="128"><img src="wide.png" style="width: 1440px; height: 200px">"#);
        assert_eq!(l.nodes.len(), 2);
        assert_eq!(l.nodes[0].rect.width, 256);
        assert_eq!(l.nodes[0].rect.height, 128);
        assert_eq!(l.nodes[0].elem_type, ElementType::Image { src: "logo.png".into() });
        assert_eq!(l.nodes[1].rect.width, 720);
        assert_eq!(l.nodes[1].rect.height, 100);
    }

    #[test]
    fn declared_lengths_are_clamped() {
        let l = layout(r#"<p>x</p><img width="10" height="5000000000"><img style="width: 10px; height: 1e30px"><p>after</p>"#);
        assert_eq!(l.nodes[1].rect.height, MAX_LENGTH_PX);
        assert_eq!(l.nodes[2].rect.height, MAX_LENGTH_PX);
        assert_eq!(parse_px("inf"), None);
        assert_eq!(parse_px("-4px"), None);
        assert!(l.nodes[3].rect.y > l.nodes[2].rect.y);
        assert!(l.content_height > 2 * MAX_LENGTH_PX);
    }

    #[test]
    fn flow_saturates_instead_of_overflowing() {
        let mut flow = Flow {
            x: 0,
            y: u32::MAX - 4,
            width: 720,
            nodes: Vec::new(),
        };
        flow.advance(10);
        assert_eq!(flow.y, u32::MAX);
        assert_eq!(flow.top(), i32::MAX);
        let r = Rect { x: 0, y: i32::MAX - 1, width: 1, height: 10 };
        assert_eq!(r.bottom(), i32::MAX);
    }

    #[test]
    fn inline_text_joins_the_surrounding_run() {
        let l = layout("<div>Total: <strong>1,180.00</strong> INR</div>");
        assert_eq!(l.nodes.len(), 1);
        assert_eq!(l.nodes[0].text, "Total: 1,180.00 INR");
    }

    #[test]
    fn br_breaks_lines() {
        let l = layout("<p>line one<br>line two</p>");
        assert_eq!(l.nodes[0].text, "line one\nline two");
    }
}
