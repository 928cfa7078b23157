//! Inline `style="..."` support for the capture renderer.
//!
//! Only the handful of properties that affect block geometry and fill color
//! are understood; everything else is ignored.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const WHITE: Rgba = Rgba::rgb(255, 255, 255);
    pub const BLACK: Rgba = Rgba::rgb(0, 0, 0);
    pub const TRANSPARENT: Rgba = Rgba { r: 0, g: 0, b: 0, a: 0 };

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub fn opaque(self) -> Self {
        Self { a: 255, ..self }
    }

    pub fn to_array(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

/// Parse a CSS color: `#rgb`, `#rrggbb`, `rgb()`, `rgba()` or a named color.
pub fn parse_color(value: &str) -> Option<Rgba> {
    let v = value.trim().to_ascii_lowercase();
    if let Some(hex) = v.strip_prefix('#') {
        return parse_hex(hex);
    }
    if let Some(args) = v.strip_prefix("rgba(").or_else(|| v.strip_prefix("rgb(")) {
        let args = args.strip_suffix(')')?;
        let parts: Vec<&str> = args.split(',').map(str::trim).collect();
        if parts.len() != 3 && parts.len() != 4 {
            return None;
        }
        let channel = |s: &str| s.parse::<f32>().ok().map(|n| n.clamp(0.0, 255.0).round() as u8);
        let a = match parts.get(3) {
            Some(s) => (s.parse::<f32>().ok()?.clamp(0.0, 1.0) * 255.0).round() as u8,
            None => 255,
        };
        return Some(Rgba {
            r: channel(parts[0])?,
            g: channel(parts[1])?,
            b: channel(parts[2])?,
            a,
        });
    }
    named_color(&v)
}

fn parse_hex(hex: &str) -> Option<Rgba> {
    if !hex.is_ascii() {
        return None;
    }
    let nibble = |c: u8| (c as char).to_digit(16).map(|d| d as u8);
    let bytes = hex.as_bytes();
    match bytes.len() {
        3 => {
            let r = nibble(bytes[0])?;
            let g = nibble(bytes[1])?;
            let b = nibble(bytes[2])?;
            Some(Rgba::rgb(r * 17, g * 17, b * 17))
        }
        6 => {
            let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
            let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
            let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
            Some(Rgba::rgb(r, g, b))
        }
        _ => None,
    }
}

fn named_color(name: &str) -> Option<Rgba> {
    let c = match name {
        "white" => Rgba::WHITE,
        "black" => Rgba::BLACK,
        "transparent" => Rgba::TRANSPARENT,
        "red" => Rgba::rgb(255, 0, 0),
        "green" => Rgba::rgb(0, 128, 0),
        "blue" => Rgba::rgb(0, 0, 255),
        "gray" | "grey" => Rgba::rgb(128, 128, 128),
        "silver" => Rgba::rgb(192, 192, 192),
        "navy" => Rgba::rgb(0, 0, 128),
        "gold" => Rgba::rgb(255, 215, 0),
        "slategray" | "slategrey" => Rgba::rgb(112, 128, 144),
        _ => return None,
    };
    Some(c)
}

/// Largest length accepted from markup; anything beyond is clamped.
pub const MAX_LENGTH_PX: u32 = 1_000_000;

/// Parse a pixel length (`12px`, `12`, `0`). Other units are not supported.
pub fn parse_px(value: &str) -> Option<u32> {
    let v = value.trim();
    let num = v.strip_suffix("px").unwrap_or(v).trim();
    let n: f32 = num.parse().ok()?;
    if !n.is_finite() {
        return None;
    }
    Some((n.max(0.0).round() as u32).min(MAX_LENGTH_PX))
}

/// Vertical and horizontal box spacing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Edges {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

impl Edges {
    pub fn uniform(v: u32) -> Self {
        Self { top: v, right: v, bottom: v, left: v }
    }

    pub fn vertical(v: u32) -> Self {
        Self { top: v, bottom: v, ..Default::default() }
    }

    pub fn horizontal(&self) -> u32 {
        self.left + self.right
    }
}

/// CSS shorthand with one to four px values.
fn parse_edges(value: &str) -> Option<Edges> {
    let vals: Option<Vec<u32>> = value.split_whitespace().map(parse_px).collect();
    let vals = vals?;
    let e = match vals.as_slice() {
        [a] => Edges::uniform(*a),
        [v, h] => Edges { top: *v, right: *h, bottom: *v, left: *h },
        [t, h, b] => Edges { top: *t, right: *h, bottom: *b, left: *h },
        [t, r, b, l] => Edges { top: *t, right: *r, bottom: *b, left: *l },
        _ => return None,
    };
    Some(e)
}

/// Declarations recognised in an inline style attribute.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InlineStyle {
    pub color: Option<Rgba>,
    pub background: Option<Rgba>,
    pub font_px: Option<u32>,
    pub height: Option<u32>,
    pub min_height: Option<u32>,
    pub margin: Option<Edges>,
    pub margin_top: Option<u32>,
    pub margin_bottom: Option<u32>,
    pub padding: Option<Edges>,
    pub hidden: bool,
}

impl InlineStyle {
    pub fn parse(attr: &str) -> Self {
        let mut style = InlineStyle::default();
        for decl in attr.split(';') {
            let Some((prop, value)) = decl.split_once(':') else { continue };
            let prop = prop.trim().to_ascii_lowercase();
            let value = value.trim();
            match prop.as_str() {
                "color" => style.color = parse_color(value),
                "background" | "background-color" => {
                    // `background` may carry more than a color; take the first token that parses
                    style.background = parse_color(value)
                        .or_else(|| value.split_whitespace().find_map(parse_color));
                }
                "font-size" => style.font_px = parse_px(value),
                "height" => style.height = parse_px(value),
                "min-height" => style.min_height = parse_px(value),
                "margin" => style.margin = parse_edges(value),
                "margin-top" => style.margin_top = parse_px(value),
                "margin-bottom" => style.margin_bottom = parse_px(value),
                "padding" => style.padding = parse_edges(value),
                "display" => style.hidden = value.eq_ignore_ascii_case("none"),
                _ => {}
            }
        }
        style
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_color_forms() {
        assert_eq!(parse_color("#fff"), Some(Rgba::WHITE));
        assert_eq!(parse_color("#1E3A8A"), Some(Rgba::rgb(0x1e, 0x3a, 0x8a)));
        assert_eq!(parse_color("rgb(1, 2, 3)"), Some(Rgba::rgb(1, 2, 3)));
        assert_eq!(parse_color("rgba(1,2,3,0)").map(|c| c.a), Some(0));
        assert_eq!(parse_color("Navy"), Some(Rgba::rgb(0, 0, 128)));
        assert_eq!(parse_color("#12345"), None);
        assert_eq!(parse_color("hsl(0, 0%, 0%)"), None);
    }

    #[test]
    fn parses_inline_declarations() {
        let s = InlineStyle::parse("height: 3300px; background: #f0f0f0 no-repeat; padding: 10px 20px; color:red");
        assert_eq!(s.height, Some(3300));
        assert_eq!(s.background, Some(Rgba::rgb(0xf0, 0xf0, 0xf0)));
        assert_eq!(s.padding, Some(Edges { top: 10, right: 20, bottom: 10, left: 20 }));
        assert_eq!(s.color, Some(Rgba::rgb(255, 0, 0)));
        assert!(!s.hidden);
        assert!(InlineStyle::parse("display:none").hidden);
    }

    #[test]
    fn px_lengths() {
        assert_eq!(parse_px("12px"), Some(12));
        assert_eq!(parse_px(" 7 "), Some(7));
        assert_eq!(parse_px("-4px"), Some(0));
        assert_eq!(parse_px("2em"), None);
        assert_eq!(parse_px("9999999999px"), Some(MAX_LENGTH_PX));
    }
}
