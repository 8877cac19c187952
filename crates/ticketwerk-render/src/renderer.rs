// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Payload + template rules → ESC/POS ticket.
//
// Rendering is a pure function of (payload, template, charset, width,
// table): no clock, no randomness, no I/O. The same inputs always give
// the same bytes, so a ticket never needs to be stored.

use serde_json::{Value, json};
use tracing::debug;

use ticketwerk_core::config::PrinterConfig;
use ticketwerk_core::{CodePage, RenderedTicket, Result, TemplateDocument};

use crate::codepage::letter_sample;
use crate::escpos::{Align, EscPosBuilder, TextSize};
use crate::integrity::payload_hash;
use crate::template::{
    ElementKind, ItemsElement, RowElement, TemplateRules, TextElement, invalid,
};

/// Paper width used when neither the printer nor the template sets one.
pub const DEFAULT_WIDTH: usize = 48;

/// Renders jobs for one printer setup.
#[derive(Debug, Clone)]
pub struct Renderer {
    paper_width: usize,
    /// `ESC t` override; `None` uses the code page's default table.
    code_table: Option<u8>,
}

impl Default for Renderer {
    fn default() -> Self {
        Self {
            paper_width: DEFAULT_WIDTH,
            code_table: None,
        }
    }
}

impl Renderer {
    pub fn new(paper_width: usize, code_table: Option<u8>) -> Self {
        Self {
            paper_width,
            code_table,
        }
    }

    pub fn from_config(config: &PrinterConfig) -> Self {
        Self::new(config.paper_width, config.code_table)
    }

    /// Render `payload` with `template` for a printer using `charset`.
    ///
    /// Fails only with `InvalidTemplate`: malformed rules, a non-object
    /// payload, a missing required field, or an item without name or
    /// price. Unmappable characters are substituted, never rejected.
    pub fn render(
        &self,
        payload: &Value,
        template: &TemplateDocument,
        charset: CodePage,
    ) -> Result<RenderedTicket> {
        if !payload.is_object() {
            return Err(invalid("payload is not an object"));
        }
        let rules = TemplateRules::parse(&template.body)?;
        for path in &rules.required {
            if lookup(payload, path).is_none_or(Value::is_null) {
                return Err(invalid(format!("required field '{path}' is missing")));
            }
        }

        let width = rules.width.unwrap_or(self.paper_width);
        let table = self.code_table.unwrap_or_else(|| charset.escpos_table());
        let mut out = EscPosBuilder::new(width, charset);
        out.init(table);

        for element in &rules.elements {
            if let Some(path) = &element.cond {
                if !is_truthy(lookup(payload, path)) {
                    continue;
                }
            }
            match &element.kind {
                ElementKind::Text(text) => render_text(&mut out, text, payload),
                ElementKind::Line { fill } => {
                    out.separator(*fill);
                }
                ElementKind::Row(row) => render_row(&mut out, row, payload),
                ElementKind::Feed { lines } => {
                    out.feed(*lines);
                }
                ElementKind::Items(items) => render_items(&mut out, items, payload)?,
                ElementKind::Cut(mode) => {
                    out.cut(*mode);
                }
                ElementKind::Drawer(pin) => {
                    out.open_drawer(*pin);
                }
                ElementKind::Unknown(_) => {}
            }
        }

        let bytes = out.build();
        debug!(
            bytes = bytes.len(),
            template_version = template.version,
            charset = charset.label(),
            "ticket rendered"
        );
        Ok(RenderedTicket::new(
            bytes,
            payload_hash(payload),
            template.version,
        ))
    }
}

/// Render with the default 48-column layout.
pub fn render(
    payload: &Value,
    template: &TemplateDocument,
    charset: CodePage,
) -> Result<RenderedTicket> {
    Renderer::default().render(payload, template, charset)
}

/// A self-describing ticket for checking a freshly attached printer.
///
/// Prints the model, the code page and a line of accented letters so an
/// operator can see at a glance whether the table selection is right.
pub fn test_ticket(
    renderer: &Renderer,
    charset: CodePage,
    model: &str,
    device: &str,
) -> Result<RenderedTicket> {
    let template = TemplateDocument {
        version: 0,
        body: json!({
            "elements": [
                { "t": "text", "v": "TICKETWERK", "a": "c", "s": "xl", "b": true },
                { "t": "text", "v": "Test print", "a": "c" },
                { "t": "line", "c": "=" },
                { "t": "row", "l": "Model", "r": "{{model}}" },
                { "t": "row", "l": "Device", "r": "{{device}}" },
                { "t": "row", "l": "Code page", "r": "{{charset}}" },
                { "t": "line" },
                { "t": "text", "v": "ÇĞİÖŞÜ çğıöşü ÄÖÜ äöüß éèà ñ" },
                { "t": "text", "v": "{{sample}}" },
                { "t": "text", "v": "0123456789 !\"#$%&'()*+,-./" },
                { "t": "line" },
                { "t": "items" },
                { "t": "feed", "n": 3 },
                { "t": "cut", "partial": true }
            ]
        }),
    };
    let payload = json!({
        "model": model,
        "device": device,
        "charset": charset.label(),
        "sample": letter_sample(charset),
        "items": [
            { "quantity": 2, "productName": "Sample item", "unitPrice": 12.5,
              "addons": [{ "addonName": "Extra", "unitPrice": 1.0 }],
              "note": "Alignment check" }
        ]
    });
    renderer.render(&payload, &template, charset)
}

fn render_text(out: &mut EscPosBuilder, text: &TextElement, payload: &Value) {
    out.align(text.align).size(text.size);
    if text.bold {
        out.bold(true);
    }
    out.line(&fill_placeholders(&text.value, payload));
    if text.bold {
        out.bold(false);
    }
    out.size(TextSize::Normal).align(Align::Left);
}

fn render_row(out: &mut EscPosBuilder, row: &RowElement, payload: &Value) {
    out.size(row.size);
    if row.bold {
        out.bold(true);
    }
    let left = fill_placeholders(&row.left, payload);
    let right = fill_placeholders(&row.right, payload);
    out.line_lr(&left, &right);
    if row.bold {
        out.bold(false);
    }
    out.size(TextSize::Normal);
}

fn render_items(out: &mut EscPosBuilder, opts: &ItemsElement, payload: &Value) -> Result<()> {
    let items = match lookup(payload, &opts.source) {
        None | Some(Value::Null) => return Ok(()),
        Some(Value::Array(items)) => items,
        Some(_) => return Err(invalid(format!("'{}' is not a list", opts.source))),
    };

    out.size(opts.font_size);
    for (idx, item) in items.iter().enumerate() {
        let name = text_field(item, &["productName", "name"])
            .ok_or_else(|| invalid(format!("item {idx} has no name")))?;
        let quantity = quantity(item, idx)?;

        out.bold(true);
        match (opts.show_quantity, opts.show_price) {
            (true, true) => {
                let price = item_price(item, idx)?;
                out.line_lr(&format!("{quantity}x {name}"), &money(price));
            }
            (true, false) => {
                out.line(&format!("{quantity}x {name}"));
            }
            (false, true) => {
                let price = item_price(item, idx)?;
                out.line(&format!("{name}  {}", money(price)));
            }
            (false, false) => {
                out.line(&name);
            }
        }
        out.bold(false);

        if opts.show_selected_option {
            render_selected_option(out, item, opts.show_price);
        }
        if opts.show_removed_ingredients {
            render_removed(out, item, "  ", "", &opts.removed_prefix);
        }
        if opts.show_addons {
            for addon in array_field(item, "addons") {
                render_addon(out, addon, "", opts, AddonScope::Item);
            }
        }
        if opts.show_sub_items {
            for sub in array_field(item, "subItems") {
                render_sub_item(out, sub, opts);
            }
        }
        if opts.show_notes {
            if let Some(note) = text_field(item, &["note"]) {
                out.line(&format!("{}{note}", opts.note_prefix));
            }
        }
        out.newline();
    }
    out.size(TextSize::Normal);
    Ok(())
}

fn render_selected_option(out: &mut EscPosBuilder, item: &Value, show_price: bool) {
    let mut price = number(item.get("selectedOptionPrice")).unwrap_or(0.0);
    let name = match item.get("selectedOption") {
        Some(Value::Object(option)) => {
            if let Some(modifier) = number(option.get("priceModifier")) {
                price = modifier;
            }
            option
                .get("optionName")
                .map(display_value)
                .unwrap_or_default()
        }
        Some(value) if !value.is_null() => display_value(value),
        _ => String::new(),
    };
    if name.is_empty() {
        return;
    }
    if show_price && price != 0.0 {
        let sign = if price > 0.0 { "+" } else { "" };
        out.line(&format!("  ({name} {sign}{})", money(price)));
    } else {
        out.line(&format!("  ({name})"));
    }
}

/// Removed ingredients, preferring the backend's preformatted text.
fn render_removed(
    out: &mut EscPosBuilder,
    item: &Value,
    text_indent: &str,
    list_indent: &str,
    prefix: &str,
) {
    if let Some(text) = text_field(item, &["removedIngredientsText"]) {
        out.bold(true).line(&format!("{text_indent}{text}")).bold(false);
        return;
    }
    let names: Vec<String> = array_field(item, "removedIngredients")
        .iter()
        .map(|ingredient| match ingredient {
            Value::Object(_) => {
                text_field(ingredient, &["ingredientName", "name"]).unwrap_or_default()
            }
            other => display_value(other),
        })
        .filter(|name| !name.is_empty())
        .collect();
    if !names.is_empty() {
        out.bold(true)
            .line(&format!("{list_indent}{prefix}{}", names.join(", ")))
            .bold(false);
    }
}

/// Where an add-on hangs. Without a `lineTotal`, an item's add-on is
/// priced unit × quantity; a set-menu component's add-on shows its unit
/// price.
#[derive(Clone, Copy)]
enum AddonScope {
    Item,
    SubItem,
}

fn render_addon(
    out: &mut EscPosBuilder,
    addon: &Value,
    indent: &str,
    opts: &ItemsElement,
    scope: AddonScope,
) {
    let name = text_field(addon, &["addonName", "name"]).unwrap_or_default();
    let qty = number(addon.get("quantity"))
        .or_else(|| number(addon.get("quantityPerParent")))
        .unwrap_or(1.0);
    let total = number(addon.get("lineTotal")).unwrap_or_else(|| match scope {
        AddonScope::Item => {
            number(addon.get("unitPrice"))
                .or_else(|| number(addon.get("price")))
                .unwrap_or(0.0)
                * qty
        }
        AddonScope::SubItem => number(addon.get("unitPrice")).unwrap_or(0.0),
    });

    let mut line = if qty > 1.0 {
        format!("{indent}{}{}x {name}", opts.addon_prefix, format_quantity(qty))
    } else {
        format!("{indent}{}{name}", opts.addon_prefix)
    };
    if let Some(option) = text_field(addon, &["relatedOptionName"]) {
        line.push_str(&format!(" ({option})"));
    }
    if opts.show_price && total > 0.0 {
        line.push_str(&format!("  +{}", money(total)));
    }
    out.line(&line);
}

fn render_sub_item(out: &mut EscPosBuilder, sub: &Value, opts: &ItemsElement) {
    let title = text_field(sub, &["displayTitle"]);
    let name = text_field(sub, &["itemName", "name"]).unwrap_or_default();
    let qty = number(sub.get("quantity"))
        .or_else(|| number(sub.get("quantityPerParent")))
        .unwrap_or(1.0);
    let extra = number(sub.get("additionalPrice")).unwrap_or(0.0);

    let mut line = opts.sub_item_prefix.clone();
    if let Some(title) = title {
        line.push_str(&format!("{title}: "));
    }
    if qty > 1.0 {
        line.push_str(&format!("{}x ", format_quantity(qty)));
    }
    line.push_str(&name);
    if opts.show_price && extra > 0.0 {
        line.push_str(&format!("  +{}", money(extra)));
    }
    out.line(&line);

    if opts.show_removed_ingredients {
        render_removed(out, sub, "    ", "    ", &opts.removed_prefix);
    }
    if opts.show_addons {
        for addon in array_field(sub, "addons") {
            render_addon(out, addon, "    ", opts, AddonScope::SubItem);
        }
    }
}

// --- payload access ------------------------------------------------------

/// Resolve a dotted path (`order.customer.name`, `items.0.name`).
pub fn lookup<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(data, |value, key| match value {
        Value::Object(map) => map.get(key),
        Value::Array(list) => key.parse::<usize>().ok().and_then(|i| list.get(i)),
        _ => None,
    })
}

/// Condition semantics: missing, null, false, zero, "" and [] are false.
fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(list)) => !list.is_empty(),
        Some(Value::Object(_)) => true,
    }
}

/// Replace `{{dotted.path}}` with payload values. Missing values become
/// empty; anything that is not a well-formed placeholder stays literal.
pub fn fill_placeholders(text: &str, payload: &Value) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let key = &after[..end];
        if is_placeholder_key(key) {
            if let Some(value) = lookup(payload, key) {
                out.push_str(&display_value(value));
            }
        } else {
            out.push_str(&rest[start..start + 2 + end + 2]);
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

fn is_placeholder_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .split('.')
            .all(|seg| !seg.is_empty() && seg.chars().all(|c| c.is_alphanumeric() || c == '_'))
}

fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn text_field(item: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| item.get(*key))
        .find(|value| !value.is_null())
        .map(display_value)
        .filter(|s| !s.is_empty())
}

fn array_field<'a>(item: &'a Value, key: &str) -> &'a [Value] {
    item.get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn item_price(item: &Value, idx: usize) -> Result<f64> {
    number(item.get("unitPrice"))
        .or_else(|| number(item.get("price")))
        .ok_or_else(|| invalid(format!("item {idx} has no price")))
}

fn quantity(item: &Value, idx: usize) -> Result<String> {
    match item.get("quantity") {
        None | Some(Value::Null) => Ok("1".into()),
        Some(Value::Number(n)) => Ok(n.as_f64().map(format_quantity).unwrap_or_default()),
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_owned()),
        Some(_) => Err(invalid(format!("item {idx} has an unreadable quantity"))),
    }
}

fn format_quantity(qty: f64) -> String {
    if qty.fract() == 0.0 {
        format!("{}", qty as i64)
    } else {
        format!("{qty}")
    }
}

fn money(amount: f64) -> String {
    format!("{amount:.2}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use ticketwerk_core::TicketwerkError;

    fn template(body: Value) -> TemplateDocument {
        TemplateDocument { version: 3, body }
    }

    fn order() -> Value {
        json!({
            "orderNumber": 42,
            "table": { "name": "Bahçe 4" },
            "note": "",
            "total": "31.50",
            "items": [
                { "quantity": 2, "productName": "Lahmacun", "unitPrice": 9.5,
                  "selectedOption": { "optionName": "Acılı", "priceModifier": 1.0 },
                  "addons": [{ "addonName": "Ayran", "quantity": 2, "unitPrice": 2.0 }],
                  "removedIngredients": ["Soğan"],
                  "note": "İyi pişmiş" },
                { "quantity": 1, "name": "Çay", "price": 3 }
            ]
        })
    }

    fn kitchen_template() -> TemplateDocument {
        template(json!({
            "width": 32,
            "required": ["orderNumber"],
            "elements": [
                { "v": "#{{orderNumber}}", "a": "c", "s": "xl", "b": true },
                { "v": "{{table.name}}", "a": "c" },
                { "v": "Note: {{note}}", "cond": "note" },
                { "t": "line" },
                { "t": "items", "showRemovedIngredients": true },
                { "t": "row", "l": "TOTAL", "r": "{{total}}", "b": true },
                { "t": "feed", "n": 2 },
                { "t": "cut" }
            ]
        }))
    }

    fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|w| w == needle)
    }

    #[test]
    fn rendering_is_deterministic() {
        let a = render(&order(), &kitchen_template(), CodePage::Pc857).expect("render");
        let b = render(&order(), &kitchen_template(), CodePage::Pc857).expect("render");
        assert_eq!(a, b);
        assert_eq!(a.template_version(), 3);
        assert_eq!(a.payload_hash().len(), 64);
    }

    #[test]
    fn ticket_starts_with_init_and_table_select() {
        let ticket = render(&order(), &kitchen_template(), CodePage::Pc857).expect("render");
        assert_eq!(&ticket.bytes()[..5], &[0x1B, b'@', 0x1B, b't', 18]);
    }

    #[test]
    fn code_table_override_is_honoured() {
        let renderer = Renderer::new(48, Some(13));
        let ticket = renderer
            .render(&order(), &kitchen_template(), CodePage::Pc857)
            .expect("render");
        assert_eq!(ticket.bytes()[4], 13);
    }

    #[test]
    fn item_lines_are_laid_out_in_columns() {
        let ticket = render(&order(), &kitchen_template(), CodePage::Pc857).expect("render");
        let bytes = ticket.bytes();
        // 32 columns: "2x Lahmacun" + padding + "9.50"
        let mut expected = b"2x Lahmacun".to_vec();
        expected.resize(28, b' ');
        expected.extend_from_slice(b"9.50\n");
        assert!(contains(bytes, &expected));
        assert!(contains(bytes, b"  + 2x Ayran  +4.00\n"));
        assert!(contains(bytes, &[b'1', b'x', b' ', 0x80, b'a', b'y']));
        assert!(contains(bytes, b"3.00\n"));
    }

    #[test]
    fn selected_option_and_removed_ingredients_are_printed() {
        let ticket = render(&order(), &kitchen_template(), CodePage::Pc857).expect("render");
        let bytes = ticket.bytes();
        assert!(contains(bytes, &[b' ', b' ', b'(', b'A', b'c', 0x8D, b'l', 0x8D, b' ', b'+']));
        assert!(contains(bytes, b"  - CIKART: So"));
    }

    #[test]
    fn set_menu_addons_show_line_total_or_unit_price() {
        let payload = json!({
            "items": [{
                "quantity": 1, "productName": "Menu", "unitPrice": 10,
                "subItems": [{
                    "itemName": "Burger",
                    "addons": [
                        { "addonName": "Sos", "quantity": 2, "unitPrice": 1.5 },
                        { "addonName": "Peynir", "quantity": 2, "unitPrice": 1, "lineTotal": 2.5 }
                    ]
                }]
            }]
        });
        let rules = template(json!({ "elements": [{ "t": "items" }] }));
        let ticket = render(&payload, &rules, CodePage::Pc437).expect("render");
        let bytes = ticket.bytes();
        assert!(contains(bytes, b"  > Burger\n"));
        assert!(contains(bytes, b"      + 2x Sos  +1.50\n"));
        assert!(contains(bytes, b"      + 2x Peynir  +2.50\n"));
    }

    #[test]
    fn falsy_condition_skips_element() {
        let ticket = render(&order(), &kitchen_template(), CodePage::Pc857).expect("render");
        assert!(!contains(ticket.bytes(), b"Note:"));
    }

    #[test]
    fn missing_price_is_invalid_template() {
        let payload = json!({
            "orderNumber": 7,
            "items": [{ "quantity": 1, "productName": "Mystery" }]
        });
        let err = render(&payload, &kitchen_template(), CodePage::Pc857).expect_err("no price");
        match err {
            TicketwerkError::InvalidTemplate(detail) => assert!(detail.contains("price")),
            other => panic!("expected InvalidTemplate, got {other:?}"),
        }
    }

    #[test]
    fn price_is_optional_when_hidden() {
        let payload = json!({ "items": [{ "productName": "Mystery" }] });
        let rules = template(json!({ "elements": [{ "t": "items", "showPrice": false }] }));
        let ticket = render(&payload, &rules, CodePage::Pc437).expect("render");
        assert!(contains(ticket.bytes(), b"1x Mystery\n"));
    }

    #[test]
    fn missing_required_field_is_invalid_template() {
        let payload = json!({ "items": [] });
        assert!(matches!(
            render(&payload, &kitchen_template(), CodePage::Pc857),
            Err(TicketwerkError::InvalidTemplate(_))
        ));
    }

    #[test]
    fn non_object_payload_is_invalid_template() {
        assert!(matches!(
            render(&json!("hello"), &kitchen_template(), CodePage::Pc857),
            Err(TicketwerkError::InvalidTemplate(_))
        ));
    }

    #[test]
    fn unmappable_text_never_fails() {
        let payload = json!({ "orderNumber": "☃ 🍕 漢字" });
        let ticket = render(&payload, &kitchen_template(), CodePage::Pc437).expect("render");
        assert!(contains(ticket.bytes(), b"#? ? ??\n"));
    }

    #[test]
    fn placeholders_resolve_dotted_paths() {
        let payload = json!({ "a": { "b": [ { "c": 5 } ] }, "s": "x" });
        assert_eq!(fill_placeholders("{{a.b.0.c}}-{{s}}", &payload), "5-x");
        assert_eq!(fill_placeholders("[{{missing}}]", &payload), "[]");
        assert_eq!(fill_placeholders("{{ not a key }}", &payload), "{{ not a key }}");
        assert_eq!(fill_placeholders("open {{s", &payload), "open {{s");
    }

    #[test]
    fn truthiness_follows_json_emptiness() {
        assert!(!is_truthy(None));
        assert!(!is_truthy(Some(&json!(0))));
        assert!(!is_truthy(Some(&json!([]))));
        assert!(is_truthy(Some(&json!({}))));
        assert!(is_truthy(Some(&json!("x"))));
    }

    #[test]
    fn test_ticket_names_the_setup() {
        let ticket = test_ticket(&Renderer::default(), CodePage::Pc857, "Epson TM-T20", "/dev/usb/lp0")
            .expect("render");
        assert!(contains(ticket.bytes(), b"Epson TM-T20"));
        assert!(contains(ticket.bytes(), b"PC857"));
        // Ç ü é â: the start of the code page's letter sample.
        assert!(contains(ticket.bytes(), &[0x80, 0x81, 0x82, 0x83]));
        assert!(ticket.bytes().ends_with(&[0x1D, b'V', 1]));
    }
}
