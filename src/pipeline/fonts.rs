//! Standard Type 1 Helvetica metrics and WinAnsi text encoding.
//!
//! The four Helvetica faces are built into every PDF reader, so nothing is
//! embedded. Widths come from the Adobe AFM files in units of 1/1000 em;
//! the oblique faces share the upright widths. Characters outside
//! WinAnsiEncoding are folded to a close ASCII form or rendered as `?`.

/// One of the four Helvetica faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FontStyle {
    Regular,
    Bold,
    Italic,
    BoldItalic,
}

impl FontStyle {
    pub const ALL: [FontStyle; 4] = [
        FontStyle::Regular,
        FontStyle::Bold,
        FontStyle::Italic,
        FontStyle::BoldItalic,
    ];

    pub fn from_flags(bold: bool, italic: bool) -> Self {
        match (bold, italic) {
            (false, false) => FontStyle::Regular,
            (true, false) => FontStyle::Bold,
            (false, true) => FontStyle::Italic,
            (true, true) => FontStyle::BoldItalic,
        }
    }

    /// PostScript name used as `/BaseFont`.
    pub fn base_font(&self) -> &'static str {
        match self {
            FontStyle::Regular => "Helvetica",
            FontStyle::Bold => "Helvetica-Bold",
            FontStyle::Italic => "Helvetica-Oblique",
            FontStyle::BoldItalic => "Helvetica-BoldOblique",
        }
    }

    /// Name of the font in every page's resource dictionary.
    pub fn resource_name(&self) -> &'static str {
        match self {
            FontStyle::Regular => "F1",
            FontStyle::Bold => "F2",
            FontStyle::Italic => "F3",
            FontStyle::BoldItalic => "F4",
        }
    }

    fn is_bold(&self) -> bool {
        matches!(self, FontStyle::Bold | FontStyle::BoldItalic)
    }
}

/// Ascender and descender of Helvetica, 1/1000 em.
pub const ASCENT: f32 = 718.0;
pub const DESCENT: f32 = -207.0;

/// Map one character to its WinAnsi byte, if it has one.
pub fn winansi_byte(c: char) -> Option<u8> {
    let cp = c as u32;
    match cp {
        0x20..=0x7E | 0xA0..=0xFF => Some(cp as u8),
        _ => match c {
            '\u{20AC}' => Some(0x80),
            '\u{201A}' => Some(0x82),
            '\u{0192}' => Some(0x83),
            '\u{201E}' => Some(0x84),
            '\u{2026}' => Some(0x85),
            '\u{2020}' => Some(0x86),
            '\u{2021}' => Some(0x87),
            '\u{02C6}' => Some(0x88),
            '\u{2030}' => Some(0x89),
            '\u{0160}' => Some(0x8A),
            '\u{2039}' => Some(0x8B),
            '\u{0152}' => Some(0x8C),
            '\u{017D}' => Some(0x8E),
            '\u{2018}' => Some(0x91),
            '\u{2019}' => Some(0x92),
            '\u{201C}' => Some(0x93),
            '\u{201D}' => Some(0x94),
            '\u{2022}' => Some(0x95),
            '\u{2013}' => Some(0x96),
            '\u{2014}' => Some(0x97),
            '\u{02DC}' => Some(0x98),
            '\u{2122}' => Some(0x99),
            '\u{0161}' => Some(0x9A),
            '\u{203A}' => Some(0x9B),
            '\u{0153}' => Some(0x9C),
            '\u{017E}' => Some(0x9E),
            '\u{0178}' => Some(0x9F),
            _ => None,
        },
    }
}

/// Fold characters WinAnsi lacks onto ones it has.
fn fold(c: char) -> &'static str {
    match c {
        '\t' | '\n' | '\r' | '\u{2002}'..='\u{200A}' | '\u{202F}' | '\u{3000}' => " ",
        '\u{2010}' | '\u{2011}' | '\u{2012}' | '\u{2212}' => "-",
        '\u{2015}' => "\u{2014}",
        '\u{2032}' | '\u{02BC}' => "'",
        '\u{2033}' => "\"",
        '\u{2044}' | '\u{2215}' => "/",
        '\u{2192}' => "->",
        '\u{2190}' => "<-",
        '\u{2264}' => "<=",
        '\u{2265}' => ">=",
        '\u{2260}' => "!=",
        _ => "?",
    }
}

/// Encode text as WinAnsi bytes for a PDF string operand.
pub fn encode(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    for c in text.chars() {
        if let Some(b) = winansi_byte(c) {
            out.push(b);
            continue;
        }
        if is_zero_width(c) {
            continue;
        }
        for f in fold(c).chars() {
            out.push(winansi_byte(f).unwrap_or(b'?'));
        }
    }
    out
}

fn is_zero_width(c: char) -> bool {
    matches!(c, '\u{200B}'..='\u{200D}' | '\u{FEFF}' | '\u{00AD}' | '\u{0300}'..='\u{036F}')
}

/// Width of one encoded byte in 1/1000 em.
pub fn byte_width(b: u8, style: FontStyle) -> u16 {
    if b < 0x20 {
        return 0;
    }
    let table = if style.is_bold() {
        &HELVETICA_BOLD
    } else {
        &HELVETICA
    };
    table[(b - 0x20) as usize]
}

/// Width of `text` in points at `size`.
pub fn text_width(text: &str, style: FontStyle, size: f32) -> f32 {
    let units: u32 = encode(text)
        .into_iter()
        .map(|b| u32::from(byte_width(b, style)))
        .sum();
    units as f32 * size / 1000.0
}

// ── Width tables (bytes 0x20..=0xFF) ─────────────────────────────────────

#[rustfmt::skip]
const HELVETICA: [u16; 224] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278,
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556,
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778,
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556,
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556,
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584, 0,
    556, 0, 222, 556, 333, 1000, 556, 556, 333, 1000, 667, 333, 1000, 0, 611, 0,
    0, 222, 222, 333, 333, 350, 556, 1000, 333, 1000, 500, 333, 944, 0, 500, 667,
    278, 333, 556, 556, 556, 556, 260, 556, 333, 737, 370, 556, 584, 333, 737, 333,
    400, 584, 333, 333, 333, 556, 537, 278, 333, 333, 365, 556, 834, 834, 834, 611,
    667, 667, 667, 667, 667, 667, 1000, 722, 667, 667, 667, 667, 278, 278, 278, 278,
    722, 722, 778, 778, 778, 778, 778, 584, 778, 722, 722, 722, 722, 667, 667, 611,
    556, 556, 556, 556, 556, 556, 889, 500, 556, 556, 556, 556, 278, 278, 278, 278,
    556, 556, 556, 556, 556, 556, 556, 584, 611, 556, 556, 556, 556, 500, 556, 500,
];

#[rustfmt::skip]
const HELVETICA_BOLD: [u16; 224] = [
    278, 333, 474, 556, 556, 889, 722, 238, 333, 333, 389, 584, 278, 333, 278, 278,
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 333, 333, 584, 584, 584, 611,
    975, 722, 722, 722, 722, 667, 611, 778, 722, 278, 556, 722, 611, 833, 722, 778,
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 333, 278, 333, 584, 556,
    333, 556, 611, 556, 611, 556, 333, 611, 611, 278, 278, 556, 278, 889, 611, 611,
    611, 611, 389, 556, 333, 611, 556, 778, 556, 556, 500, 389, 280, 389, 584, 0,
    556, 0, 278, 556, 500, 1000, 556, 556, 333, 1000, 667, 333, 1000, 0, 611, 0,
    0, 278, 278, 500, 500, 350, 556, 1000, 333, 1000, 556, 333, 944, 0, 500, 667,
    278, 333, 556, 556, 556, 556, 280, 556, 333, 737, 370, 556, 584, 333, 737, 333,
    400, 584, 333, 333, 333, 611, 556, 278, 333, 333, 365, 556, 834, 834, 834, 611,
    722, 722, 722, 722, 722, 722, 1000, 722, 667, 667, 667, 667, 278, 278, 278, 278,
    722, 722, 778, 778, 778, 778, 778, 584, 778, 722, 722, 722, 722, 667, 667, 611,
    556, 556, 556, 556, 556, 556, 889, 556, 556, 556, 556, 556, 278, 278, 278, 278,
    611, 611, 611, 611, 611, 611, 611, 584, 611, 611, 611, 611, 611, 556, 611, 556,
];


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_passes_through() {
        assert_eq!(encode("Hello (1)"), b"Hello (1)".to_vec());
    }

    #[test]
    fn typographic_quotes_and_bullets() {
        assert_eq!(encode("\u{201C}a\u{201D} \u{2022}"), vec![0x93, b'a', 0x94, b' ', 0x95]);
        assert_eq!(encode("caf\u{e9}"), vec![b'c', b'a', b'f', 0xE9]);
    }

    #[test]
    fn unencodable_becomes_question_mark() {
        assert_eq!(encode("\u{4E2D}"), b"?".to_vec());
        assert_eq!(encode("a\u{2192}b"), b"a->b".to_vec());
        assert_eq!(encode("zero\u{200B}width"), b"zerowidth".to_vec());
    }

    #[test]
    fn widths_match_afm() {
        assert_eq!(byte_width(b' ', FontStyle::Regular), 278);
        assert_eq!(byte_width(b'W', FontStyle::Regular), 944);
        assert_eq!(byte_width(b'i', FontStyle::Regular), 222);
        assert_eq!(byte_width(b'i', FontStyle::BoldItalic), 278);
        assert_eq!(byte_width(0x95, FontStyle::Regular), 350);
        let w = text_width("ab", FontStyle::Regular, 10.0);
        assert!((w - 11.12).abs() < 1e-3, "got {w}");
    }

    #[test]
    fn bold_is_wider() {
        let s = "The quick brown fox";
        assert!(text_width(s, FontStyle::Bold, 12.0) > text_width(s, FontStyle::Regular, 12.0));
        assert_eq!(
            text_width(s, FontStyle::Italic, 12.0),
            text_width(s, FontStyle::Regular, 12.0)
        );
    }
}
