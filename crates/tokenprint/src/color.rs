//! Color parsing, perceptual distance, and WCAG contrast.
//!
//! Colors are kept as opaque 8-bit sRGB. Translucent values are composited
//! over white before they become evidence; fully transparent values are
//! dropped by [`parse_color`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Minimum ratio for body text.
pub const WCAG_AA_BODY: f64 = 4.5;

/// Minimum ratio for large text (≥ 24px, or ≥ 18.66px bold).
pub const WCAG_AA_LARGE: f64 = 3.0;

/// An opaque sRGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const WHITE: Rgb = Rgb::new(255, 255, 255);
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    /// WCAG relative luminance.
    pub fn relative_luminance(&self) -> f64 {
        fn channel(c: u8) -> f64 {
            let c = c as f64 / 255.0;
            if c <= 0.04045 {
                c / 12.92
            } else {
                ((c + 0.055) / 1.055).powf(2.4)
            }
        }
        0.2126 * channel(self.r) + 0.7152 * channel(self.g) + 0.0722 * channel(self.b)
    }

    /// CIE L*a*b* under D65.
    pub fn to_lab(&self) -> (f64, f64, f64) {
        fn linear(c: u8) -> f64 {
            let c = c as f64 / 255.0;
            if c <= 0.04045 {
                c / 12.92
            } else {
                ((c + 0.055) / 1.055).powf(2.4)
            }
        }
        fn f(t: f64) -> f64 {
            if t > 216.0 / 24389.0 {
                t.cbrt()
            } else {
                (24389.0 / 27.0 * t + 16.0) / 116.0
            }
        }
        let (r, g, b) = (linear(self.r), linear(self.g), linear(self.b));
        let x = (0.4124 * r + 0.3576 * g + 0.1805 * b) / 0.95047;
        let y = 0.2126 * r + 0.7152 * g + 0.0722 * b;
        let z = (0.0193 * r + 0.1192 * g + 0.9505 * b) / 1.08883;
        let (fx, fy, fz) = (f(x), f(y), f(z));
        (116.0 * fy - 16.0, 500.0 * (fx - fy), 200.0 * (fy - fz))
    }

    pub fn to_hsl(&self) -> Hsl {
        let r = self.r as f64 / 255.0;
        let g = self.g as f64 / 255.0;
        let b = self.b as f64 / 255.0;
        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        let l = (max + min) / 2.0;
        let d = max - min;
        if d.abs() < f64::EPSILON {
            return Hsl { h: 0.0, s: 0.0, l };
        }
        let s = if l > 0.5 {
            d / (2.0 - max - min)
        } else {
            d / (max + min)
        };
        let h = if (max - r).abs() < f64::EPSILON {
            ((g - b) / d).rem_euclid(6.0)
        } else if (max - g).abs() < f64::EPSILON {
            (b - r) / d + 2.0
        } else {
            (r - g) / d + 4.0
        };
        Hsl { h: h * 60.0, s, l }
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Rgb {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_color(s).ok_or_else(|| format!("unrecognized color: {s}"))
    }
}

impl Serialize for Rgb {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Rgb {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Hue in degrees, saturation and lightness in [0,1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hsl {
    pub h: f64,
    pub s: f64,
    pub l: f64,
}

impl Hsl {
    pub fn to_rgb(&self) -> Rgb {
        let c = (1.0 - (2.0 * self.l - 1.0).abs()) * self.s;
        let hp = self.h.rem_euclid(360.0) / 60.0;
        let x = c * (1.0 - (hp.rem_euclid(2.0) - 1.0).abs());
        let (r1, g1, b1) = match hp as u32 {
            0 => (c, x, 0.0),
            1 => (x, c, 0.0),
            2 => (0.0, c, x),
            3 => (0.0, x, c),
            4 => (x, 0.0, c),
            _ => (c, 0.0, x),
        };
        let m = self.l - c / 2.0;
        let to_u8 = |v: f64| ((v + m) * 255.0).round().clamp(0.0, 255.0) as u8;
        Rgb::new(to_u8(r1), to_u8(g1), to_u8(b1))
    }
}

/// WCAG contrast ratio, always ≥ 1.
pub fn contrast_ratio(a: Rgb, b: Rgb) -> f64 {
    let la = a.relative_luminance();
    let lb = b.relative_luminance();
    let (hi, lo) = if la >= lb { (la, lb) } else { (lb, la) };
    (hi + 0.05) / (lo + 0.05)
}

/// CIE76 ΔE between two colors.
pub fn delta_e(a: Rgb, b: Rgb) -> f64 {
    let (l1, a1, b1) = a.to_lab();
    let (l2, a2, b2) = b.to_lab();
    ((l1 - l2).powi(2) + (a1 - a2).powi(2) + (b1 - b2).powi(2)).sqrt()
}

/// Circular hue difference in degrees.
pub fn hue_distance(a: f64, b: f64) -> f64 {
    let d = (a - b).rem_euclid(360.0);
    d.min(360.0 - d)
}

/// True when two colors share a hue family. Near-greys have no meaningful
/// hue and always match.
pub fn same_hue_family(a: Rgb, b: Rgb, tolerance_deg: f64) -> bool {
    let ha = a.to_hsl();
    let hb = b.to_hsl();
    if ha.s < 0.08 || hb.s < 0.08 {
        return true;
    }
    hue_distance(ha.h, hb.h) <= tolerance_deg
}

/// Shift `fg` lightness, keeping hue and saturation, until it reaches
/// `required` contrast against `bg`. Tries the direction away from the
/// background first. Returns `None` if no lightness satisfies the ratio.
pub fn adjust_lightness_for_contrast(fg: Rgb, bg: Rgb, required: f64) -> Option<Rgb> {
    if contrast_ratio(fg, bg) >= required {
        return Some(fg);
    }
    let hsl = fg.to_hsl();
    let darken_first = bg.relative_luminance() > 0.18;
    let directions: [f64; 2] = if darken_first { [-1.0, 1.0] } else { [1.0, -1.0] };

    for dir in directions {
        let mut l = hsl.l;
        loop {
            l += dir * 0.005;
            if !(0.0..=1.0).contains(&l) {
                break;
            }
            let candidate = Hsl { l, ..hsl }.to_rgb();
            if contrast_ratio(candidate, bg) >= required {
                return Some(candidate);
            }
        }
    }
    None
}

/// Parse a CSS color value. Returns `None` for unrecognized or fully
/// transparent values.
pub fn parse_color(value: &str) -> Option<Rgb> {
    let v = value.trim().trim_end_matches("!important").trim().to_ascii_lowercase();
    if let Some(hex) = v.strip_prefix('#') {
        return parse_hex(hex);
    }
    if let Some(args) = v
        .strip_prefix("rgba(")
        .or_else(|| v.strip_prefix("rgb("))
        .and_then(|s| s.strip_suffix(')'))
    {
        return parse_rgb_args(args);
    }
    if let Some(args) = v
        .strip_prefix("hsla(")
        .or_else(|| v.strip_prefix("hsl("))
        .and_then(|s| s.strip_suffix(')'))
    {
        return parse_hsl_args(args);
    }
    named_color(&v)
}

fn parse_hex(hex: &str) -> Option<Rgb> {
    if !hex.is_ascii() {
        return None;
    }
    let expand = |c: char| c.to_digit(16).map(|d| (d * 17) as u8);
    let chars: Vec<char> = hex.chars().collect();
    match chars.len() {
        3 | 4 => {
            if chars.len() == 4 && expand(chars[3])? == 0 {
                return None;
            }
            Some(Rgb::new(expand(chars[0])?, expand(chars[1])?, expand(chars[2])?))
        }
        6 | 8 => {
            let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
            let rgb = Rgb::new(byte(0)?, byte(2)?, byte(4)?);
            if chars.len() == 8 {
                let alpha = byte(6)? as f64 / 255.0;
                return composite(rgb, alpha);
            }
            Some(rgb)
        }
        _ => None,
    }
}

fn split_args(args: &str) -> Vec<&str> {
    args.split(|c: char| c == ',' || c == '/' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_alpha(part: Option<&&str>) -> Option<f64> {
    match part {
        None => Some(1.0),
        Some(a) => {
            if let Some(pct) = a.strip_suffix('%') {
                pct.parse::<f64>().ok().map(|p| p / 100.0)
            } else {
                a.parse::<f64>().ok()
            }
        }
    }
}

fn parse_rgb_args(args: &str) -> Option<Rgb> {
    let parts = split_args(args);
    if parts.len() < 3 {
        return None;
    }
    let channel = |s: &str| -> Option<u8> {
        let v = if let Some(pct) = s.strip_suffix('%') {
            pct.parse::<f64>().ok()? * 2.55
        } else {
            s.parse::<f64>().ok()?
        };
        Some(v.round().clamp(0.0, 255.0) as u8)
    };
    let rgb = Rgb::new(channel(parts[0])?, channel(parts[1])?, channel(parts[2])?);
    composite(rgb, parse_alpha(parts.get(3))?)
}

fn parse_hsl_args(args: &str) -> Option<Rgb> {
    let parts = split_args(args);
    if parts.len() < 3 {
        return None;
    }
    let h = parts[0].trim_end_matches("deg").parse::<f64>().ok()?;
    let s = parts[1].strip_suffix('%')?.parse::<f64>().ok()? / 100.0;
    let l = parts[2].strip_suffix('%')?.parse::<f64>().ok()? / 100.0;
    let rgb = Hsl {
        h,
        s: s.clamp(0.0, 1.0),
        l: l.clamp(0.0, 1.0),
    }
    .to_rgb();
    composite(rgb, parse_alpha(parts.get(3))?)
}

/// Composite over white; `None` when effectively invisible.
fn composite(rgb: Rgb, alpha: f64) -> Option<Rgb> {
    let alpha = alpha.clamp(0.0, 1.0);
    if alpha < 0.05 {
        return None;
    }
    let mix = |c: u8| (c as f64 * alpha + 255.0 * (1.0 - alpha)).round() as u8;
    Some(Rgb::new(mix(rgb.r), mix(rgb.g), mix(rgb.b)))
}

fn named_color(name: &str) -> Option<Rgb> {
    let rgb = match name {
        "black" => Rgb::new(0, 0, 0),
        "white" => Rgb::new(255, 255, 255),
        "red" => Rgb::new(255, 0, 0),
        "green" => Rgb::new(0, 128, 0),
        "blue" => Rgb::new(0, 0, 255),
        "navy" => Rgb::new(0, 0, 128),
        "gray" | "grey" => Rgb::new(128, 128, 128),
        "silver" => Rgb::new(192, 192, 192),
        "orange" => Rgb::new(255, 165, 0),
        "purple" => Rgb::new(128, 0, 128),
        "teal" => Rgb::new(0, 128, 128),
        "yellow" => Rgb::new(255, 255, 0),
        "maroon" => Rgb::new(128, 0, 0),
        "olive" => Rgb::new(128, 128, 0),
        "lime" => Rgb::new(0, 255, 0),
        "aqua" | "cyan" => Rgb::new(0, 255, 255),
        "fuchsia" | "magenta" => Rgb::new(255, 0, 255),
        "whitesmoke" => Rgb::new(245, 245, 245),
        "gainsboro" => Rgb::new(220, 220, 220),
        "lightgray" | "lightgrey" => Rgb::new(211, 211, 211),
        "darkgray" | "darkgrey" => Rgb::new(169, 169, 169),
        "dimgray" | "dimgrey" => Rgb::new(105, 105, 105),
        "crimson" => Rgb::new(220, 20, 60),
        "tomato" => Rgb::new(255, 99, 71),
        "rebeccapurple" => Rgb::new(102, 51, 153),
        _ => return None,
    };
    Some(rgb)
}
