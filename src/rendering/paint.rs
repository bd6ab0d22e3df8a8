/// Display list built from a layout

use crate::rendering::layout::{ElementType, Layout, GLYPH_PX, LINE_GAP_PX};

const TEXT_RGBA: (u8, u8, u8, u8) = (0, 0, 0, 255);
const RULE_RGBA: (u8, u8, u8, u8) = (156, 163, 175, 255);
const HEADER_FILL_RGBA: (u8, u8, u8, u8) = (239, 246, 255, 255);

#[derive(Debug, Clone, PartialEq)]
pub enum PaintCommand {
    SolidRect {
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        rgba: (u8, u8, u8, u8),
    },
    /// Outline of a rectangle, one CSS pixel wide
    StrokeRect {
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        rgba: (u8, u8, u8, u8),
    },
    Text {
        x: i32,
        y: i32,
        text: String,
        scale: u32,
        rgba: (u8, u8, u8, u8),
    },
    Image {
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        src: String,
    },
}

/// Build the paint commands for `layout`, background first.
pub fn build_display_list(layout: &Layout, background: (u8, u8, u8, u8)) -> Vec<PaintCommand> {
    let mut cmds = vec![PaintCommand::SolidRect {
        x: 0,
        y: 0,
        width: layout.width,
        height: layout.content_height,
        rgba: background,
    }];

    for node in &layout.nodes {
        match &node.elem_type {
            ElementType::Rule => cmds.push(PaintCommand::SolidRect {
                x: node.rect.x,
                y: node.rect.y,
                width: node.rect.width,
                height: node.rect.height,
                rgba: RULE_RGBA,
            }),
            ElementType::Image { src } => cmds.push(PaintCommand::Image {
                x: node.rect.x,
                y: node.rect.y,
                width: node.rect.width,
                height: node.rect.height,
                src: src.clone(),
            }),
            ElementType::TableRow { header } => {
                for cell in &node.cells {
                    if *header {
                        cmds.push(PaintCommand::SolidRect {
                            x: cell.rect.x,
                            y: cell.rect.y,
                            width: cell.rect.width,
                            height: cell.rect.height,
                            rgba: HEADER_FILL_RGBA,
                        });
                    }
                    cmds.push(PaintCommand::StrokeRect {
                        x: cell.rect.x,
                        y: cell.rect.y,
                        width: cell.rect.width,
                        height: cell.rect.height,
                        rgba: RULE_RGBA,
                    });
                    push_lines(&mut cmds, cell.rect.x + 6, cell.rect.y + 6, &cell.text, 1);
                }
            }
            ElementType::Heading(_) | ElementType::Paragraph | ElementType::ListItem => {
                push_lines(&mut cmds, node.rect.x + 4, node.rect.y + 4, &node.text, node.scale);
            }
        }
    }

    cmds
}

fn push_lines(cmds: &mut Vec<PaintCommand>, x: i32, y: i32, text: &str, scale: u32) {
    let step = (GLYPH_PX * scale + LINE_GAP_PX) as i32;
    for (i, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        cmds.push(PaintCommand::Text {
            x,
            y: y + i as i32 * step,
            text: line.to_string(),
            scale,
            rgba: TEXT_RGBA,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rendering::layout::layout_fragment;
    use crate::surface::SurfaceStyle;
    use scraper::Html;

    #[test]
    fn display_list_starts_with_background() {
        let layout = layout_fragment(
            &Html::parse_fragment("<h1>Title</h1><p>Body</p><hr><img src=\"x.png\">"),
            &SurfaceStyle::default(),
        );
        let cmds = build_display_list(&layout, (255, 255, 255, 255));
        match &cmds[0] {
            PaintCommand::SolidRect { width, height, rgba, .. } => {
                assert_eq!(*width, 800);
                assert_eq!(*height, layout.content_height);
                assert_eq!(*rgba, (255, 255, 255, 255));
            }
            other => panic!("unexpected first command: {other:?}"),
        }
        assert!(cmds.iter().any(|c| matches!(c, PaintCommand::Text { scale: 2, .. })));
        assert!(cmds.iter().any(|c| matches!(c, PaintCommand::Image { src, .. } if src == "x.png")));
    }

    #[test]
    fn header_cells_are_filled_and_outlined() {
        let layout = layout_fragment(
            &Html::parse_fragment("<table><tr><th>A</th><th>B</th></tr></table>"),
            &SurfaceStyle::default(),
        );
        let cmds = build_display_list(&layout, (255, 255, 255, 255));
        let strokes = cmds.iter().filter(|c| matches!(c, PaintCommand::StrokeRect { .. })).count();
        let fills = cmds
            .iter()
            .filter(|c| matches!(c, PaintCommand::SolidRect { rgba, .. } if *rgba == HEADER_FILL_RGBA))
            .count();
        assert_eq!(strokes, 2);
        assert_eq!(fills, 2);
    }
}
