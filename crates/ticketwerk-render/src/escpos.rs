// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// ESC/POS command builder.
//
// All text goes through the code page encoder first, so layout works on
// encoded bytes: one byte is one column at normal size.

use serde::Deserialize;
use ticketwerk_core::CodePage;

use crate::codepage;

const ESC: u8 = 0x1B;
const GS: u8 = 0x1D;
const LF: u8 = 0x0A;

/// Horizontal alignment (`ESC a n`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum Align {
    #[default]
    Left,
    Center,
    Right,
}

impl From<String> for Align {
    fn from(value: String) -> Self {
        match value.as_str() {
            "c" | "center" | "centre" => Self::Center,
            "r" | "right" => Self::Right,
            _ => Self::Left,
        }
    }
}

impl Align {
    fn code(self) -> u8 {
        match self {
            Self::Left => 0,
            Self::Center => 1,
            Self::Right => 2,
        }
    }
}

/// Character size (`GS ! n`).
///
/// Template sizes `xs`, `sm` and `md` all print at normal size; `lg` is
/// double width and `xl` double width and height.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum TextSize {
    #[default]
    Normal,
    DoubleHeight,
    DoubleWidth,
    DoubleBoth,
}

impl From<String> for TextSize {
    fn from(value: String) -> Self {
        match value.as_str() {
            "lg" => Self::DoubleWidth,
            "xl" => Self::DoubleBoth,
            "tall" => Self::DoubleHeight,
            _ => Self::Normal,
        }
    }
}

impl TextSize {
    fn mode(self) -> u8 {
        match self {
            Self::Normal => 0x00,
            Self::DoubleHeight => 0x01,
            Self::DoubleWidth => 0x10,
            Self::DoubleBoth => 0x11,
        }
    }

    fn is_double_width(self) -> bool {
        matches!(self, Self::DoubleWidth | Self::DoubleBoth)
    }
}

/// Paper cut mode (`GS V m`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cut {
    Full,
    /// Leaves a small connection so the ticket does not fall.
    Partial,
}

/// Cash drawer connector pin for the kick pulse (`ESC p m t1 t2`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DrawerPin {
    #[default]
    Pin2,
    Pin5,
}

/// Incremental ESC/POS byte stream for one ticket.
#[derive(Debug, Clone)]
pub struct EscPosBuilder {
    buf: Vec<u8>,
    /// Columns per line at normal size.
    width: usize,
    code_page: CodePage,
    size: TextSize,
}

impl EscPosBuilder {
    pub fn new(width: usize, code_page: CodePage) -> Self {
        Self {
            buf: Vec::with_capacity(1024),
            width,
            code_page,
            size: TextSize::Normal,
        }
    }

    /// Reset the printer (`ESC @`) and select character table `table`
    /// (`ESC t n`).
    pub fn init(&mut self, table: u8) -> &mut Self {
        self.buf.extend_from_slice(&[ESC, b'@', ESC, b't', table]);
        self.size = TextSize::Normal;
        self
    }

    /// Columns available at the current character size.
    pub fn columns(&self) -> usize {
        if self.size.is_double_width() {
            self.width / 2
        } else {
            self.width
        }
    }

    // === Text ===

    /// Append encoded text without a line break.
    pub fn text(&mut self, text: &str) -> &mut Self {
        codepage::encode_into(self.code_page, text, &mut self.buf);
        self
    }

    /// Append encoded text followed by a line feed.
    pub fn line(&mut self, text: &str) -> &mut Self {
        self.text(text).newline()
    }

    pub fn newline(&mut self) -> &mut Self {
        self.buf.push(LF);
        self
    }

    /// Print and feed `lines` lines (`ESC d n`).
    pub fn feed(&mut self, lines: u8) -> &mut Self {
        self.buf.extend_from_slice(&[ESC, b'd', lines]);
        self
    }

    // === Style ===

    pub fn align(&mut self, align: Align) -> &mut Self {
        self.buf.extend_from_slice(&[ESC, b'a', align.code()]);
        self
    }

    pub fn bold(&mut self, on: bool) -> &mut Self {
        self.buf.extend_from_slice(&[ESC, b'E', u8::from(on)]);
        self
    }

    pub fn size(&mut self, size: TextSize) -> &mut Self {
        self.buf.extend_from_slice(&[GS, b'!', size.mode()]);
        self.size = size;
        self
    }

    // === Layout ===

    /// A full-width line of `fill`.
    pub fn separator(&mut self, fill: char) -> &mut Self {
        let mut unit = Vec::new();
        codepage::encode_char(self.code_page, fill, &mut unit);
        if unit.is_empty() {
            unit.push(b'-');
        }
        let columns = self.columns();
        self.buf.extend(unit.iter().copied().cycle().take(columns));
        self.newline()
    }

    /// `left` flush left and `right` flush right on one line.
    ///
    /// When both do not fit with at least one space between them, `left`
    /// gets its own line and `right` is pushed right-aligned onto the next.
    pub fn line_lr(&mut self, left: &str, right: &str) -> &mut Self {
        let left = codepage::encode(self.code_page, left);
        let right = codepage::encode(self.code_page, right);
        let columns = self.columns();

        self.buf.extend_from_slice(&left);
        if left.len() + right.len() < columns {
            let gap = columns - left.len() - right.len();
            self.buf.resize(self.buf.len() + gap, b' ');
        } else {
            self.buf.push(LF);
            let gap = columns.saturating_sub(right.len());
            self.buf.resize(self.buf.len() + gap, b' ');
        }
        self.buf.extend_from_slice(&right);
        self.newline()
    }

    // === Paper and peripherals ===

    pub fn cut(&mut self, mode: Cut) -> &mut Self {
        let m = match mode {
            Cut::Full => 0x00,
            Cut::Partial => 0x01,
        };
        self.buf.extend_from_slice(&[GS, b'V', m]);
        self
    }

    /// Pulse the cash drawer kick connector.
    pub fn open_drawer(&mut self, pin: DrawerPin) -> &mut Self {
        let m = match pin {
            DrawerPin::Pin2 => 0x00,
            DrawerPin::Pin5 => 0x01,
        };
        self.buf.extend_from_slice(&[ESC, b'p', m, 25, 250]);
        self
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn build(self) -> Vec<u8> {
        self.buf
    }
}
