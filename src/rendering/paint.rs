//! Paint command list produced from a document layout

use crate::rendering::layout::{DocumentLayout, NodeContent};

#[derive(Debug, Clone, PartialEq)]
pub enum PaintCommand {
    SolidRect {
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        rgba: (u8, u8, u8, u8),
    },
    Text {
        x: i32,
        y: i32,
        lines: Vec<String>,
        font_px: u32,
        line_height: u32,
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

/// Paint order follows layout order, so backgrounds land beneath their children.
pub fn build_display_list(layout: &DocumentLayout) -> Vec<PaintCommand> {
    layout
        .nodes
        .iter()
        .filter_map(|node| {
            let r = &node.lb.rect;
            let cmd = match &node.content {
                NodeContent::Fill(c) | NodeContent::Rule(c) => {
                    if r.width == 0 || r.height == 0 {
                        return None;
                    }
                    PaintCommand::SolidRect {
                        x: r.x,
                        y: r.y,
                        width: r.width,
                        height: r.height,
                        rgba: (c.r, c.g, c.b, c.a),
                    }
                }
                NodeContent::Text { lines, font_px, line_height, color } => PaintCommand::Text {
                    x: r.x,
                    y: r.y,
                    lines: lines.clone(),
                    font_px: *font_px,
                    line_height: *line_height,
                    rgba: (color.r, color.g, color.b, color.a),
                },
                NodeContent::Image { src } => PaintCommand::Image {
                    x: r.x,
                    y: r.y,
                    width: r.width,
                    height: r.height,
                    src: src.clone(),
                },
            };
            Some(cmd)
        })
        .collect()
}
