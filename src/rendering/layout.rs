//! Block layout of a document at a fixed width.
//!
//! Blocks stack vertically without margin collapsing; inline content is
//! word-wrapped on a fixed advance of half the font size. The result is the
//! list of positioned nodes plus the measured height of the whole document.
//!
//! Lengths come from untrusted markup, so vertical positions saturate at
//! `u32::MAX` instead of overflowing. The rasterizer rejects such heights.

use crate::rendering::resources::ResourceSet;
use crate::rendering::style::{Edges, InlineStyle, Rgba};
use scraper::{ElementRef, Html, Node};

pub const BASE_FONT_PX: u32 = 16;

#[derive(Debug, Clone, PartialEq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn bottom(&self) -> i64 {
        self.y as i64 + self.height as i64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoxModel {
    pub margin: Edges,
    pub border: u32,
    pub padding: Edges,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayoutBox {
    pub rect: Rect,
    pub box_model: BoxModel,
}

impl LayoutBox {
    pub fn content_width(&self) -> u32 {
        let total = self.box_model.padding.horizontal() + self.box_model.border * 2;
        self.rect.width.saturating_sub(total)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementType {
    Block,
    Heading(u8),
    Paragraph,
    ListItem,
    Rule,
    Image,
    Text,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeContent {
    /// A block with a painted background
    Fill(Rgba),
    /// Wrapped lines of text
    Text {
        lines: Vec<String>,
        font_px: u32,
        line_height: u32,
        color: Rgba,
    },
    /// A replaced image box
    Image { src: String },
    /// Horizontal rule or list marker
    Rule(Rgba),
}

#[derive(Debug, Clone)]
pub struct LayoutNode {
    pub lb: LayoutBox,
    pub elem_type: ElementType,
    pub content: NodeContent,
}

/// Positioned nodes and the measured size of the document.
#[derive(Debug, Clone, Default)]
pub struct DocumentLayout {
    pub width: u32,
    pub height: u32,
    pub nodes: Vec<LayoutNode>,
}

pub fn line_height_for(font_px: u32) -> u32 {
    font_px.saturating_mul(14).div_ceil(10).max(1)
}

pub fn advance_for(font_px: u32) -> u32 {
    (font_px / 2).max(1)
}

#[derive(Debug, Clone, Copy)]
struct Inherited {
    color: Rgba,
    font_px: u32,
}

/// Tag-level defaults before inline styles are applied.
struct TagDefaults {
    elem_type: ElementType,
    font_px: Option<u32>,
    margin: Edges,
    padding: Edges,
}

fn tag_defaults(tag: &str, inherited_font: u32) -> TagDefaults {
    let heading = |level: u8, px: u32| TagDefaults {
        elem_type: ElementType::Heading(level),
        font_px: Some(px),
        margin: Edges::vertical(px * 67 / 100),
        padding: Edges::default(),
    };
    match tag {
        "h1" => heading(1, 32),
        "h2" => heading(2, 24),
        "h3" => heading(3, 19),
        "h4" => heading(4, 16),
        "h5" => heading(5, 13),
        "h6" => heading(6, 11),
        "p" => TagDefaults {
            elem_type: ElementType::Paragraph,
            font_px: None,
            margin: Edges::vertical(inherited_font * 3 / 4),
            padding: Edges::default(),
        },
        "ul" | "ol" => TagDefaults {
            elem_type: ElementType::Block,
            font_px: None,
            margin: Edges::vertical(inherited_font * 3 / 4),
            padding: Edges { left: 24, ..Default::default() },
        },
        "li" => TagDefaults {
            elem_type: ElementType::ListItem,
            font_px: None,
            margin: Edges::default(),
            padding: Edges::default(),
        },
        "blockquote" => TagDefaults {
            elem_type: ElementType::Block,
            font_px: None,
            margin: Edges { top: 16, right: 40, bottom: 16, left: 40 },
            padding: Edges::default(),
        },
        "hr" => TagDefaults {
            elem_type: ElementType::Rule,
            font_px: None,
            margin: Edges::vertical(8),
            padding: Edges::default(),
        },
        "img" => TagDefaults {
            elem_type: ElementType::Image,
            font_px: None,
            margin: Edges::default(),
            padding: Edges::default(),
        },
        _ => TagDefaults {
            elem_type: ElementType::Block,
            font_px: None,
            margin: Edges::default(),
            padding: Edges::default(),
        },
    }
}

fn is_block(tag: &str) -> bool {
    matches!(
        tag,
        "html" | "body" | "div" | "section" | "header" | "footer" | "article" | "main" | "aside" | "nav"
            | "p" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "ul" | "ol" | "li" | "table" | "thead"
            | "tbody" | "tfoot" | "tr" | "td" | "th" | "blockquote" | "hr" | "img" | "figure"
            | "figcaption" | "address" | "dl" | "dt" | "dd" | "pre"
    )
}

fn is_skipped(tag: &str) -> bool {
    matches!(tag, "script" | "style" | "head" | "title" | "template" | "noscript" | "meta" | "link")
}

/// Inline content accumulated between blocks; `br` starts a new segment.
#[derive(Default)]
struct InlineRun {
    segments: Vec<String>,
}

impl InlineRun {
    fn push_text(&mut self, text: &str) {
        if self.segments.is_empty() {
            self.segments.push(String::new());
        }
        if let Some(last) = self.segments.last_mut() {
            last.push(' ');
            last.push_str(text);
        }
    }

    fn line_break(&mut self) {
        if self.segments.is_empty() {
            self.segments.push(String::new());
        }
        self.segments.push(String::new());
    }

    fn push_inline_element(&mut self, el: ElementRef<'_>) {
        for child in el.children() {
            match child.value() {
                Node::Text(t) => self.push_text(&t.text),
                Node::Element(e) if e.name() == "br" => self.line_break(),
                Node::Element(e) if is_skipped(e.name()) => {}
                Node::Element(_) => {
                    if let Some(inner) = ElementRef::wrap(child) {
                        self.push_inline_element(inner);
                    }
                }
                _ => {}
            }
        }
    }

    fn is_blank(&self) -> bool {
        self.segments.iter().all(|s| s.trim().is_empty())
    }

    /// Word-wrap every segment to `chars_per_line`.
    fn wrap(&self, chars_per_line: usize) -> Vec<String> {
        let mut lines = Vec::new();
        for seg in &self.segments {
            let mut cur = String::new();
            for word in seg.split_whitespace() {
                let cur_len = cur.chars().count();
                let word_len = word.chars().count();
                if cur_len + word_len + 1 > chars_per_line && !cur.is_empty() {
                    lines.push(std::mem::take(&mut cur));
                    cur.push_str(word);
                } else {
                    if !cur.is_empty() {
                        cur.push(' ');
                    }
                    cur.push_str(word);
                }
            }
            lines.push(cur);
        }
        // A trailing `br` does not add an empty line
        while lines.last().is_some_and(|l| l.is_empty()) && lines.len() > 1 {
            lines.pop();
        }
        lines
    }
}

struct LayoutCtx<'a> {
    nodes: Vec<LayoutNode>,
    resources: &'a ResourceSet,
}

impl LayoutCtx<'_> {
    /// Emit the pending inline run as a text node; returns the new cursor.
    fn flush_inline(&mut self, run: &mut InlineRun, x: i32, y: u32, width: u32, inh: Inherited) -> u32 {
        let pending = std::mem::take(run);
        if pending.is_blank() {
            return y;
        }
        let advance = advance_for(inh.font_px);
        let chars_per_line = ((width / advance) as usize).max(1);
        let lines = pending.wrap(chars_per_line);
        let line_height = line_height_for(inh.font_px);
        let height = u32::try_from(lines.len()).unwrap_or(u32::MAX).saturating_mul(line_height);
        self.nodes.push(LayoutNode {
            lb: LayoutBox {
                rect: Rect { x, y: y as i32, width, height },
                box_model: BoxModel { margin: Edges::default(), border: 0, padding: Edges::default() },
            },
            elem_type: ElementType::Text,
            content: NodeContent::Text {
                lines,
                font_px: inh.font_px,
                line_height,
                color: inh.color,
            },
        });
        y.saturating_add(height)
    }

    /// Lay out the children of `el` starting at `y`; returns the cursor after them.
    fn layout_children(&mut self, el: ElementRef<'_>, x: i32, y: u32, width: u32, inh: Inherited) -> u32 {
        let mut cursor = y;
        let mut run = InlineRun::default();
        for child in el.children() {
            match child.value() {
                Node::Text(t) => run.push_text(&t.text),
                Node::Element(e) => {
                    let tag = e.name();
                    if is_skipped(tag) {
                        continue;
                    }
                    if tag == "br" {
                        run.line_break();
                        continue;
                    }
                    let Some(child_el) = ElementRef::wrap(child) else { continue };
                    if is_block(tag) {
                        cursor = self.flush_inline(&mut run, x, cursor, width, inh);
                        cursor = self.layout_block(child_el, x, cursor, width, inh);
                    } else {
                        let hidden = e.attr("style").map(|s| InlineStyle::parse(s).hidden).unwrap_or(false);
                        if !hidden {
                            run.push_inline_element(child_el);
                        }
                    }
                }
                _ => {}
            }
        }
        self.flush_inline(&mut run, x, cursor, width, inh)
    }

    /// Lay out one block element at `y`; returns the cursor below its bottom margin.
    fn layout_block(&mut self, el: ElementRef<'_>, x: i32, y: u32, avail: u32, inh: Inherited) -> u32 {
        let tag = el.value().name();
        let style = el.value().attr("style").map(InlineStyle::parse).unwrap_or_default();
        if style.hidden {
            return y;
        }
        let defaults = tag_defaults(tag, inh.font_px);
        let font_px = style.font_px.or(defaults.font_px).unwrap_or(inh.font_px).max(1);
        let color = style.color.unwrap_or(inh.color);
        let mut margin = style.margin.unwrap_or(defaults.margin);
        if let Some(t) = style.margin_top {
            margin.top = t;
        }
        if let Some(b) = style.margin_bottom {
            margin.bottom = b;
        }
        let padding = style.padding.unwrap_or(defaults.padding);

        let box_x = x.saturating_add(margin.left as i32);
        let box_w = avail.saturating_sub(margin.horizontal());
        let top = y.saturating_add(margin.top);
        let content_x = box_x.saturating_add(padding.left as i32);
        let content_w = box_w.saturating_sub(padding.horizontal());
        let content_top = top.saturating_add(padding.top);
        let child_inh = Inherited { color, font_px };

        // Background goes first so it paints beneath the children; its height is patched below
        let fill_idx = style.background.filter(|c| c.a > 0).map(|bg| {
            self.nodes.push(LayoutNode {
                lb: LayoutBox {
                    rect: Rect { x: box_x, y: top as i32, width: box_w, height: 0 },
                    box_model: BoxModel { margin, border: 0, padding },
                },
                elem_type: defaults.elem_type.clone(),
                content: NodeContent::Fill(bg),
            });
            self.nodes.len() - 1
        });

        let content_h = match defaults.elem_type {
            ElementType::Rule => {
                self.nodes.push(LayoutNode {
                    lb: LayoutBox {
                        rect: Rect { x: content_x, y: content_top as i32, width: content_w, height: 1 },
                        box_model: BoxModel { margin, border: 0, padding },
                    },
                    elem_type: ElementType::Rule,
                    content: NodeContent::Rule(Rgba::rgb(192, 192, 192)),
                });
                1
            }
            ElementType::Image => self.layout_image(el, &style, content_x, content_top, content_w, margin, padding),
            ElementType::ListItem => {
                let marker = (font_px / 4).max(2);
                let line_h = line_height_for(font_px);
                self.nodes.push(LayoutNode {
                    lb: LayoutBox {
                        rect: Rect {
                            x: content_x.saturating_sub((marker as i32).saturating_mul(3)),
                            y: content_top.saturating_add(line_h.saturating_sub(marker) / 2) as i32,
                            width: marker,
                            height: marker,
                        },
                        box_model: BoxModel { margin, border: 0, padding },
                    },
                    elem_type: ElementType::ListItem,
                    content: NodeContent::Rule(color),
                });
                self.layout_children(el, content_x, content_top, content_w, child_inh)
                    .saturating_sub(content_top)
            }
            _ => self
                .layout_children(el, content_x, content_top, content_w, child_inh)
                .saturating_sub(content_top),
        };

        let inner = match style.height {
            Some(h) => h,
            None => content_h,
        }
        .max(style.min_height.unwrap_or(0));
        let height = padding.top.saturating_add(inner).saturating_add(padding.bottom);

        if let Some(idx) = fill_idx {
            self.nodes[idx].lb.rect.height = height;
        }
        top.saturating_add(height).saturating_add(margin.bottom)
    }

    #[allow(clippy::too_many_arguments)]
    fn layout_image(
        &mut self,
        el: ElementRef<'_>,
        style: &InlineStyle,
        x: i32,
        y: u32,
        avail: u32,
        margin: Edges,
        padding: Edges,
    ) -> u32 {
        let src = el.value().attr("src").unwrap_or_default().trim().to_string();
        let attr_w = el.value().attr("width").and_then(crate::rendering::style::parse_px);
        let attr_h = el
            .value()
            .attr("height")
            .and_then(crate::rendering::style::parse_px)
            .or(style.height);
        let intrinsic = self.resources.dimensions(&src);

        let (mut w, mut h) = match (attr_w, attr_h, intrinsic) {
            (Some(w), Some(h), _) => (w, h),
            (Some(w), None, Some((iw, ih))) if iw > 0 => (w, (ih as u64 * w as u64 / iw as u64) as u32),
            (None, Some(h), Some((iw, ih))) if ih > 0 => ((iw as u64 * h as u64 / ih as u64) as u32, h),
            (None, None, Some((iw, ih))) => (iw, ih),
            (w, Some(h), None) => (w.unwrap_or(avail), h),
            _ => (0, 0),
        };
        if w > avail && w > 0 {
            h = (h as u64 * avail as u64 / w as u64) as u32;
            w = avail;
        }
        if h == 0 || w == 0 {
            return 0;
        }
        self.nodes.push(LayoutNode {
            lb: LayoutBox {
                rect: Rect { x, y: y as i32, width: w, height: h },
                box_model: BoxModel { margin, border: 0, padding },
            },
            elem_type: ElementType::Image,
            content: NodeContent::Image { src },
        });
        h
    }
}

/// The element the document is laid out from: `<body>` when present.
pub fn layout_root(document: &Html) -> ElementRef<'_> {
    let html = document.root_element();
    html.children()
        .filter_map(ElementRef::wrap)
        .find(|e| e.value().name() == "body")
        .unwrap_or(html)
}

/// Compute the block layout of `document` at `width` px.
pub fn layout_document(document: &Html, width: u32, resources: &ResourceSet) -> DocumentLayout {
    let mut ctx = LayoutCtx { nodes: Vec::new(), resources };
    let inh = Inherited { color: Rgba::BLACK, font_px: BASE_FONT_PX };
    let root = layout_root(document);
    let bottom = ctx.layout_block(root, 0, 0, width, inh);

    // Overflowing children (explicit heights smaller than content) still count
    let overflow = ctx.nodes.iter().map(|n| n.lb.rect.bottom()).max().unwrap_or(0).max(0) as u32;
    let height = if ctx.nodes.is_empty() && bottom == 0 { 0 } else { bottom.max(overflow) };
    DocumentLayout { width, height, nodes: ctx.nodes }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    fn layout(html: &str) -> DocumentLayout {
        layout_document(&Html::parse_document(html), 850, &ResourceSet::default())
    }

    #[test]
    fn layout_document_places_heading_and_paragraphs() {
        let l = layout("<div><h1>Jane Doe</h1><p>Hello world</p><p>More text</p></div>");
        let texts: Vec<_> = l.nodes.iter().filter(|n| n.elem_type == ElementType::Text).collect();
        assert_eq!(texts.len(), 3);
        assert!(texts[0].lb.rect.y < texts[1].lb.rect.y);
        assert!(texts[1].lb.rect.y < texts[2].lb.rect.y);
        assert!(l.height > 0);
        match &texts[0].content {
            NodeContent::Text { font_px, .. } => assert_eq!(*font_px, 32),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn explicit_height_sets_measured_height() {
        let l = layout(r#"<div style="height:3300px; background:#eee"></div>"#);
        assert_eq!(l.height, 3300);
        assert!(matches!(l.nodes[0].content, NodeContent::Fill(_)));
        assert_eq!(l.nodes[0].lb.rect.height, 3300);
    }

    #[test]
    fn empty_and_hidden_documents_measure_zero() {
        assert_eq!(layout("").height, 0);
        assert_eq!(layout("<div>   </div>").height, 0);
        assert_eq!(layout(r#"<div style="display:none"><p>secret</p></div>"#).height, 0);
    }

    #[test]
    fn long_text_wraps_to_width() {
        let words = "word ".repeat(400);
        let l = layout(&format!("<p style=\"margin:0\">{}</p>", words));
        let NodeContent::Text { lines, line_height, .. } = &l.nodes[0].content else {
            panic!("expected text");
        };
        // 850px at an 8px advance fits 106 chars, i.e. 21 five-char words per line
        assert!(lines.iter().all(|line| line.chars().count() <= 106));
        assert_eq!(l.height, lines.len() as u32 * line_height);
    }

    #[test]
    fn br_splits_lines_and_scripts_are_ignored() {
        let l = layout("<p style=\"margin:0\">one<br>two<script>var x = 1;</script></p>");
        let NodeContent::Text { lines, .. } = &l.nodes[0].content else {
            panic!("expected text");
        };
        assert_eq!(lines, &vec!["one".to_string(), "two".to_string()]);
    }

    #[test]
    fn list_items_get_markers() {
        let l = layout("<ul><li>Led a team</li><li>Grew revenue</li></ul>");
        let markers = l.nodes.iter().filter(|n| n.elem_type == ElementType::ListItem).count();
        assert_eq!(markers, 2);
    }

    #[test]
    fn sized_image_without_resource_keeps_its_box() {
        let l = layout(r#"<img src="missing.png" width="100" height="50">"#);
        let img = l.nodes.iter().find(|n| n.elem_type == ElementType::Image).unwrap();
        assert_eq!((img.lb.rect.width, img.lb.rect.height), (100, 50));
        assert_eq!(l.height, 50);
    }

    #[test]
    fn oversized_lengths_saturate_instead_of_overflowing() {
        let l = layout(r#"<p>x</p><div style="height:9999999999px"></div><div style="height:4000000px"></div>"#);
        assert!(l.height >= 1_000_000);
        let big_font = "<div style=\"font-size:999999999px\">word</div>".repeat(5000);
        let l = layout(&big_font);
        assert_eq!(l.height, u32::MAX);
        assert_eq!(line_height_for(u32::MAX), u32::MAX / 10 + 1);
    }
}
