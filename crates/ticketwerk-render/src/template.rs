// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Template rules: the element list the backend ships alongside each job.
//
// ```json
// { "width": 48, "required": ["orderNumber"],
//   "elements": [ { "t": "text", "v": "#{{orderNumber}}", "a": "c", "s": "xl", "b": true },
//                 { "t": "items", "showPrice": true },
//                 { "t": "cut", "partial": true } ] }
// ```

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use ticketwerk_core::{Result, TicketwerkError};

use crate::escpos::{Align, Cut, DrawerPin, TextSize};

/// Parsed template rules.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateRules {
    /// Overrides the printer's paper width for this template.
    pub width: Option<usize>,
    /// Dotted payload paths that must be present and non-null.
    pub required: Vec<String>,
    pub elements: Vec<Element>,
}

/// One template element plus its optional condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    /// Dotted payload path; the element is skipped unless it is truthy.
    pub cond: Option<String>,
    pub kind: ElementKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ElementKind {
    Text(TextElement),
    /// Full-width separator made of one repeated character.
    Line { fill: char },
    Row(RowElement),
    Feed { lines: u8 },
    Items(ItemsElement),
    Cut(Cut),
    Drawer(DrawerPin),
    /// Element type this agent does not know; skipped at render time.
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TextElement {
    #[serde(default, rename = "v")]
    pub value: String,
    #[serde(default, rename = "a")]
    pub align: Align,
    #[serde(default, rename = "s")]
    pub size: TextSize,
    #[serde(default, rename = "b")]
    pub bold: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RowElement {
    #[serde(default, rename = "l")]
    pub left: String,
    #[serde(default, rename = "r")]
    pub right: String,
    #[serde(default, rename = "s")]
    pub size: TextSize,
    #[serde(default, rename = "b")]
    pub bold: bool,
}

/// Order line items with per-section visibility flags.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemsElement {
    /// Dotted payload path of the item array.
    #[serde(default = "default_items_source")]
    pub source: String,
    #[serde(default = "yes")]
    pub show_quantity: bool,
    #[serde(default = "yes")]
    pub show_price: bool,
    #[serde(default = "yes")]
    pub show_selected_option: bool,
    #[serde(default)]
    pub show_removed_ingredients: bool,
    #[serde(default = "yes")]
    pub show_addons: bool,
    #[serde(default = "yes")]
    pub show_sub_items: bool,
    #[serde(default = "yes")]
    pub show_notes: bool,
    #[serde(default)]
    pub font_size: TextSize,
    #[serde(default = "default_addon_prefix")]
    pub addon_prefix: String,
    #[serde(default = "default_sub_item_prefix")]
    pub sub_item_prefix: String,
    #[serde(default = "default_note_prefix")]
    pub note_prefix: String,
    #[serde(default = "default_removed_prefix")]
    pub removed_prefix: String,
}

impl Default for ItemsElement {
    fn default() -> Self {
        Self {
            source: default_items_source(),
            show_quantity: true,
            show_price: true,
            show_selected_option: true,
            show_removed_ingredients: false,
            show_addons: true,
            show_sub_items: true,
            show_notes: true,
            font_size: TextSize::Normal,
            addon_prefix: default_addon_prefix(),
            sub_item_prefix: default_sub_item_prefix(),
            note_prefix: default_note_prefix(),
            removed_prefix: default_removed_prefix(),
        }
    }
}

fn yes() -> bool {
    true
}

fn default_items_source() -> String {
    "items".into()
}

fn default_addon_prefix() -> String {
    "  + ".into()
}

fn default_sub_item_prefix() -> String {
    "  > ".into()
}

fn default_note_prefix() -> String {
    "  * ".into()
}

fn default_removed_prefix() -> String {
    "  - CIKART: ".into()
}

#[derive(Deserialize)]
struct RawTemplate {
    #[serde(default)]
    width: Option<usize>,
    #[serde(default)]
    required: Vec<String>,
    #[serde(default)]
    elements: Vec<Value>,
}

#[derive(Deserialize)]
struct LineFields {
    #[serde(default = "default_fill", rename = "c")]
    fill: String,
}

fn default_fill() -> String {
    "-".into()
}

#[derive(Deserialize)]
struct FeedFields {
    #[serde(default = "one", rename = "n")]
    lines: u8,
}

fn one() -> u8 {
    1
}

#[derive(Deserialize)]
struct CutFields {
    #[serde(default)]
    partial: bool,
}

#[derive(Deserialize)]
struct DrawerFields {
    #[serde(default = "default_pin")]
    pin: u8,
}

fn default_pin() -> u8 {
    2
}

impl TemplateRules {
    /// Parse a template body.
    ///
    /// Structural problems (wrong types, a non-object element) are
    /// `InvalidTemplate`. Unknown element types are kept and skipped at
    /// render time so newer backends can ship newer templates.
    pub fn parse(body: &Value) -> Result<Self> {
        if !body.is_object() {
            return Err(invalid("template body is not an object"));
        }
        let raw: RawTemplate = serde_json::from_value(body.clone())
            .map_err(|e| invalid(format!("template: {e}")))?;
        if raw.width == Some(0) {
            return Err(invalid("template width must be > 0"));
        }

        let elements = raw
            .elements
            .iter()
            .enumerate()
            .map(|(idx, value)| parse_element(idx, value))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            width: raw.width,
            required: raw.required,
            elements,
        })
    }
}

fn parse_element(idx: usize, value: &Value) -> Result<Element> {
    let Some(fields) = value.as_object() else {
        return Err(invalid(format!("element {idx} is not an object")));
    };
    let cond = match fields.get("cond") {
        None | Some(Value::Null) => None,
        Some(Value::String(path)) if path.is_empty() => None,
        Some(Value::String(path)) => Some(path.clone()),
        Some(_) => return Err(invalid(format!("element {idx}: cond must be a string"))),
    };
    let kind_name = match fields.get("t") {
        None => "text",
        Some(Value::String(name)) => name.as_str(),
        Some(_) => return Err(invalid(format!("element {idx}: t must be a string"))),
    };

    let kind = match kind_name {
        "text" => ElementKind::Text(fields_as(idx, value)?),
        "line" => {
            let line: LineFields = fields_as(idx, value)?;
            ElementKind::Line {
                fill: line.fill.chars().next().unwrap_or('-'),
            }
        }
        "row" => ElementKind::Row(fields_as(idx, value)?),
        "feed" => {
            let feed: FeedFields = fields_as(idx, value)?;
            ElementKind::Feed { lines: feed.lines }
        }
        "items" => ElementKind::Items(fields_as(idx, value)?),
        "cut" => {
            let cut: CutFields = fields_as(idx, value)?;
            ElementKind::Cut(if cut.partial { Cut::Partial } else { Cut::Full })
        }
        "drawer" => {
            let drawer: DrawerFields = fields_as(idx, value)?;
            ElementKind::Drawer(match drawer.pin {
                2 => DrawerPin::Pin2,
                5 => DrawerPin::Pin5,
                other => {
                    return Err(invalid(format!(
                        "element {idx}: drawer pin {other} (expected 2 or 5)"
                    )));
                }
            })
        }
        other => {
            warn!(element = idx, kind = other, "unknown template element type");
            ElementKind::Unknown(other.to_owned())
        }
    };

    Ok(Element { cond, kind })
}

fn fields_as<T: DeserializeOwned>(idx: usize, value: &Value) -> Result<T> {
    serde_json::from_value(value.clone()).map_err(|e| invalid(format!("element {idx}: {e}")))
}

pub(crate) fn invalid(detail: impl Into<String>) -> TicketwerkError {
    TicketwerkError::InvalidTemplate(detail.into())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_every_element_type() {
        let rules = TemplateRules::parse(&json!({
            "width": 32,
            "required": ["orderNumber"],
            "elements": [
                { "v": "Hello", "a": "c", "s": "lg", "b": true },
                { "t": "line", "c": "=" },
                { "t": "row", "l": "Total", "r": "{{total}}", "cond": "total" },
                { "t": "feed", "n": 3 },
                { "t": "items", "showPrice": false, "addonPrefix": " + " },
                { "t": "cut", "partial": true },
                { "t": "drawer", "pin": 5 }
            ]
        }))
        .expect("parse");

        assert_eq!(rules.width, Some(32));
        assert_eq!(rules.required, vec!["orderNumber".to_owned()]);
        assert_eq!(rules.elements.len(), 7);
        assert_eq!(
            rules.elements[0].kind,
            ElementKind::Text(TextElement {
                value: "Hello".into(),
                align: Align::Center,
                size: TextSize::DoubleWidth,
                bold: true,
            })
        );
        assert_eq!(rules.elements[1].kind, ElementKind::Line { fill: '=' });
        assert_eq!(rules.elements[2].cond.as_deref(), Some("total"));
        assert_eq!(rules.elements[3].kind, ElementKind::Feed { lines: 3 });
        match &rules.elements[4].kind {
            ElementKind::Items(items) => {
                assert!(!items.show_price);
                assert!(items.show_quantity);
                assert_eq!(items.addon_prefix, " + ");
                assert_eq!(items.source, "items");
            }
            other => panic!("expected items, got {other:?}"),
        }
        assert_eq!(rules.elements[5].kind, ElementKind::Cut(Cut::Partial));
        assert_eq!(rules.elements[6].kind, ElementKind::Drawer(DrawerPin::Pin5));
    }

    #[test]
    fn unknown_element_types_are_kept_for_skipping() {
        let rules = TemplateRules::parse(&json!({
            "elements": [{ "t": "qrcode", "v": "https://example.com" }]
        }))
        .expect("parse");
        assert_eq!(rules.elements[0].kind, ElementKind::Unknown("qrcode".into()));
    }

    #[test]
    fn wrongly_typed_fields_are_invalid() {
        let err = TemplateRules::parse(&json!({
            "elements": [{ "t": "feed", "n": "three" }]
        }))
        .expect_err("bad feed");
        assert!(matches!(err, TicketwerkError::InvalidTemplate(_)));
    }

    #[test]
    fn non_object_body_is_invalid() {
        assert!(TemplateRules::parse(&json!([1, 2, 3])).is_err());
        assert!(TemplateRules::parse(&json!({ "elements": [42] })).is_err());
    }

    #[test]
    fn drawer_pin_must_exist() {
        assert!(TemplateRules::parse(&json!({ "elements": [{ "t": "drawer", "pin": 3 }] })).is_err());
    }
}
