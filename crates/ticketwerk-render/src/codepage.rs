// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Code page transcoding.
//
// Thermal printers print one 8-bit code per column. Every character is
// either mapped to its byte in the selected page, replaced by a close
// ASCII look-alike, or printed as `?`. Encoding never fails.

use encoding_rs::Encoding;
use ticketwerk_core::CodePage;

// Upper halves (0x80..=0xFF) of the DOS pages. `'\0'` marks unassigned
// slots. PC866 and WPC1252 come from encoding_rs.
const CP437_HIGH: [char; 128] = [
    'Ç', 'ü', 'é', 'â', 'ä', 'à', 'å', 'ç', 'ê', 'ë', 'è', 'ï', 'î', 'ì', 'Ä', 'Å',
    'É', 'æ', 'Æ', 'ô', 'ö', 'ò', 'û', 'ù', 'ÿ', 'Ö', 'Ü', '¢', '£', '¥', '₧', 'ƒ',
    'á', 'í', 'ó', 'ú', 'ñ', 'Ñ', 'ª', 'º', '¿', '⌐', '¬', '½', '¼', '¡', '«', '»',
    '░', '▒', '▓', '│', '┤', '╡', '╢', '╖', '╕', '╣', '║', '╗', '╝', '╜', '╛', '┐',
    '└', '┴', '┬', '├', '─', '┼', '╞', '╟', '╚', '╔', '╩', '╦', '╠', '═', '╬', '╧',
    '╨', '╤', '╥', '╙', '╘', '╒', '╓', '╫', '╪', '┘', '┌', '█', '▄', '▌', '▐', '▀',
    'α', 'ß', 'Γ', 'π', 'Σ', 'σ', 'µ', 'τ', 'Φ', 'Θ', 'Ω', 'δ', '∞', 'φ', 'ε', '∩',
    '≡', '±', '≥', '≤', '⌠', '⌡', '÷', '≈', '°', '∙', '·', '√', 'ⁿ', '²', '■', '\u{00a0}',
];

const CP850_HIGH: [char; 128] = [
    'Ç', 'ü', 'é', 'â', 'ä', 'à', 'å', 'ç', 'ê', 'ë', 'è', 'ï', 'î', 'ì', 'Ä', 'Å',
    'É', 'æ', 'Æ', 'ô', 'ö', 'ò', 'û', 'ù', 'ÿ', 'Ö', 'Ü', 'ø', '£', 'Ø', '×', 'ƒ',
    'á', 'í', 'ó', 'ú', 'ñ', 'Ñ', 'ª', 'º', '¿', '®', '¬', '½', '¼', '¡', '«', '»',
    '░', '▒', '▓', '│', '┤', 'Á', 'Â', 'À', '©', '╣', '║', '╗', '╝', '¢', '¥', '┐',
    '└', '┴', '┬', '├', '─', '┼', 'ã', 'Ã', '╚', '╔', '╩', '╦', '╠', '═', '╬', '¤',
    'ð', 'Ð', 'Ê', 'Ë', 'È', 'ı', 'Í', 'Î', 'Ï', '┘', '┌', '█', '▄', '¦', 'Ì', '▀',
    'Ó', 'ß', 'Ô', 'Ò', 'õ', 'Õ', 'µ', 'þ', 'Þ', 'Ú', 'Û', 'Ù', 'ý', 'Ý', '¯', '´',
    '\u{00ad}', '±', '‗', '¾', '¶', '§', '÷', '¸', '°', '¨', '·', '¹', '³', '²', '■', '\u{00a0}',
];

const CP857_HIGH: [char; 128] = [
    'Ç', 'ü', 'é', 'â', 'ä', 'à', 'å', 'ç', 'ê', 'ë', 'è', 'ï', 'î', 'ı', 'Ä', 'Å',
    'É', 'æ', 'Æ', 'ô', 'ö', 'ò', 'û', 'ù', 'İ', 'Ö', 'Ü', 'ø', '£', 'Ø', 'Ş', 'ş',
    'á', 'í', 'ó', 'ú', 'ñ', 'Ñ', 'Ğ', 'ğ', '¿', '®', '¬', '½', '¼', '¡', '«', '»',
    '░', '▒', '▓', '│', '┤', 'Á', 'Â', 'À', '©', '╣', '║', '╗', '╝', '¢', '¥', '┐',
    '└', '┴', '┬', '├', '─', '┼', 'ã', 'Ã', '╚', '╔', '╩', '╦', '╠', '═', '╬', '¤',
    'º', 'ª', 'Ê', 'Ë', 'È', '\0', 'Í', 'Î', 'Ï', '┘', '┌', '█', '▄', '¦', 'Ì', '▀',
    'Ó', 'ß', 'Ô', 'Ò', 'õ', 'Õ', 'µ', '\0', '×', 'Ú', 'Û', 'Ù', 'ì', 'ÿ', '¯', '´',
    '\u{00ad}', '±', '\0', '¾', '¶', '§', '÷', '¸', '°', '¨', '·', '¹', '³', '²', '■', '\u{00a0}',
];

const CP858_HIGH: [char; 128] = [
    'Ç', 'ü', 'é', 'â', 'ä', 'à', 'å', 'ç', 'ê', 'ë', 'è', 'ï', 'î', 'ì', 'Ä', 'Å',
    'É', 'æ', 'Æ', 'ô', 'ö', 'ò', 'û', 'ù', 'ÿ', 'Ö', 'Ü', 'ø', '£', 'Ø', '×', 'ƒ',
    'á', 'í', 'ó', 'ú', 'ñ', 'Ñ', 'ª', 'º', '¿', '®', '¬', '½', '¼', '¡', '«', '»',
    '░', '▒', '▓', '│', '┤', 'Á', 'Â', 'À', '©', '╣', '║', '╗', '╝', '¢', '¥', '┐',
    '└', '┴', '┬', '├', '─', '┼', 'ã', 'Ã', '╚', '╔', '╩', '╦', '╠', '═', '╬', '¤',
    'ð', 'Ð', 'Ê', 'Ë', 'È', '€', 'Í', 'Î', 'Ï', '┘', '┌', '█', '▄', '¦', 'Ì', '▀',
    'Ó', 'ß', 'Ô', 'Ò', 'õ', 'Õ', 'µ', 'þ', 'Þ', 'Ú', 'Û', 'Ù', 'ý', 'Ý', '¯', '´',
    '\u{00ad}', '±', '‗', '¾', '¶', '§', '÷', '¸', '°', '¨', '·', '¹', '³', '²', '■', '\u{00a0}',
];


/// Byte printed for a character with no mapping and no look-alike.
pub const REPLACEMENT: u8 = b'?';

/// Encode `text` for `page`, one byte per printed column.
pub fn encode(page: CodePage, text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    encode_into(page, text, &mut out);
    out
}

/// Append the encoding of `text` to `out`.
pub fn encode_into(page: CodePage, text: &str, out: &mut Vec<u8>) {
    for c in text.chars() {
        encode_char(page, c, out);
    }
}

/// Append the encoding of a single character.
///
/// Control characters (including line breaks inside field values) print
/// as a space so that payload data can never inject printer commands.
pub fn encode_char(page: CodePage, c: char, out: &mut Vec<u8>) {
    if c.is_control() {
        out.push(b' ');
        return;
    }
    if let Some(byte) = lookup(page, c) {
        out.push(byte);
        return;
    }
    match substitute(c) {
        Some(ascii) => out.extend_from_slice(ascii.as_bytes()),
        None => out.push(REPLACEMENT),
    }
}

/// Byte assigned to `c` in `page`, if any.
pub fn lookup(page: CodePage, c: char) -> Option<u8> {
    if (' '..='~').contains(&c) {
        return Some(c as u8);
    }
    match page {
        CodePage::Pc437 => upper_half(&CP437_HIGH, c),
        CodePage::Pc850 => upper_half(&CP850_HIGH, c),
        CodePage::Pc857 => upper_half(&CP857_HIGH, c),
        CodePage::Pc858 => upper_half(&CP858_HIGH, c),
        CodePage::Pc866 => single_byte(encoding_rs::IBM866, c),
        CodePage::Wpc1252 => single_byte(encoding_rs::WINDOWS_1252, c),
    }
}

/// Character printed for `byte` in `page`, if the slot is assigned.
pub fn decode_byte(page: CodePage, byte: u8) -> Option<char> {
    if byte < 0x80 {
        return Some(byte as char);
    }
    let idx = usize::from(byte - 0x80);
    let c = match page {
        CodePage::Pc437 => CP437_HIGH[idx],
        CodePage::Pc850 => CP850_HIGH[idx],
        CodePage::Pc857 => CP857_HIGH[idx],
        CodePage::Pc858 => CP858_HIGH[idx],
        CodePage::Pc866 => return decode_single(encoding_rs::IBM866, byte),
        CodePage::Wpc1252 => return decode_single(encoding_rs::WINDOWS_1252, byte),
    };
    (c != '\0').then_some(c)
}

/// Letters assigned in the upper half of `page`, in byte order. The
/// self-test ticket prints them to show which table the printer selected.
pub fn letter_sample(page: CodePage) -> String {
    (0x80..=0xFFu8)
        .filter_map(|byte| decode_byte(page, byte))
        .filter(|c| c.is_alphabetic())
        .collect()
}

fn upper_half(table: &[char; 128], c: char) -> Option<u8> {
    table
        .iter()
        .position(|&t| t == c && t != '\0')
        .map(|idx| 0x80 + idx as u8)
}

fn single_byte(encoding: &'static Encoding, c: char) -> Option<u8> {
    let mut buf = [0u8; 4];
    let (bytes, _, had_errors) = encoding.encode(c.encode_utf8(&mut buf));
    match (had_errors, bytes.as_ref()) {
        (false, [byte]) => Some(*byte),
        _ => None,
    }
}

fn decode_single(encoding: &'static Encoding, byte: u8) -> Option<char> {
    let bytes = [byte];
    let (text, had_errors) = encoding.decode_without_bom_handling(&bytes);
    let mut chars = text.chars();
    match (had_errors, chars.next(), chars.next()) {
        (false, Some(c), None) if !c.is_control() => Some(c),
        _ => None,
    }
}

// Accented Latin letters folded to their base letter(s).
const FOLDS: &[(&str, &str)] = &[
    ("ÀÁÂÃÄÅĀĂĄǍ", "A"),
    ("àáâãäåāăąǎ", "a"),
    ("ÇĆĈĊČ", "C"),
    ("çćĉċč", "c"),
    ("ĎĐÐ", "D"),
    ("ďđð", "d"),
    ("ÈÉÊËĒĔĖĘĚ", "E"),
    ("èéêëēĕėęě", "e"),
    ("ĜĞĠĢ", "G"),
    ("ĝğġģ", "g"),
    ("ĤĦ", "H"),
    ("ĥħ", "h"),
    ("ÌÍÎÏĨĪĬĮİ", "I"),
    ("ìíîïĩīĭįı", "i"),
    ("Ĵ", "J"),
    ("ĵ", "j"),
    ("Ķ", "K"),
    ("ķ", "k"),
    ("ĹĻĽĿŁ", "L"),
    ("ĺļľŀł", "l"),
    ("ÑŃŅŇ", "N"),
    ("ñńņňŉ", "n"),
    ("ÒÓÔÕÖØŌŎŐ", "O"),
    ("òóôõöøōŏő", "o"),
    ("ŔŖŘ", "R"),
    ("ŕŗř", "r"),
    ("ŚŜŞŠȘ", "S"),
    ("śŝşšș", "s"),
    ("ŢŤŦȚ", "T"),
    ("ţťŧț", "t"),
    ("ÙÚÛÜŨŪŬŮŰŲ", "U"),
    ("ùúûüũūŭůűų", "u"),
    ("Ŵ", "W"),
    ("ŵ", "w"),
    ("ÝŸŶ", "Y"),
    ("ýÿŷ", "y"),
    ("ŹŻŽ", "Z"),
    ("źżž", "z"),
    ("Æ", "AE"),
    ("æ", "ae"),
    ("Œ", "OE"),
    ("œ", "oe"),
    ("ß", "ss"),
    ("Þ", "Th"),
    ("þ", "th"),
];

/// ASCII look-alike for a character the page cannot print.
///
/// Always ASCII, so the result is valid in every supported page.
pub fn substitute(c: char) -> Option<&'static str> {
    let punct = match c {
        '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}' | '\u{2032}' | '\u{00B4}' => "'",
        '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{201F}' | '\u{2033}' | '«' | '»' => "\"",
        '\u{2010}' | '\u{2011}' | '\u{2012}' | '\u{2013}' | '\u{2014}' | '\u{2015}'
        | '\u{2212}' | '\u{00AD}' => "-",
        '\u{2026}' => "...",
        '\u{2022}' | '\u{00B7}' | '\u{2219}' => "*",
        '\u{00A0}' | '\u{2000}'..='\u{200A}' | '\u{202F}' | '\u{205F}' | '\u{3000}' => " ",
        '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}' | '\u{FEFF}' => "",
        '€' => "EUR",
        '₺' => "TL",
        '₽' => "RUB",
        '£' => "GBP",
        '¥' => "JPY",
        '¢' => "c",
        '™' => "TM",
        '©' => "(C)",
        '®' => "(R)",
        '°' => "o",
        '×' => "x",
        '÷' => "/",
        '±' => "+/-",
        '½' => "1/2",
        '¼' => "1/4",
        '¾' => "3/4",
        '¹' => "1",
        '²' => "2",
        '³' => "3",
        'ª' => "a",
        'º' => "o",
        '¡' => "!",
        '¿' => "?",
        '§' => "S",
        '¦' => "|",
        '─' | '━' | '═' => "-",
        '│' | '┃' | '║' => "|",
        _ => "",
    };
    if !punct.is_empty() || is_zero_width(c) {
        return Some(punct);
    }
    FOLDS
        .iter()
        .find(|(from, _)| from.contains(c))
        .map(|(_, to)| *to)
}

fn is_zero_width(c: char) -> bool {
    matches!(
        c,
        '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}' | '\u{FEFF}'
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_PAGES: [CodePage; 6] = [
        CodePage::Pc437,
        CodePage::Pc850,
        CodePage::Pc857,
        CodePage::Pc858,
        CodePage::Pc866,
        CodePage::Wpc1252,
    ];

    #[test]
    fn printable_ascii_is_identity_in_every_page() {
        let ascii: String = (' '..='~').collect();
        for page in ALL_PAGES {
            assert_eq!(encode(page, &ascii), ascii.as_bytes(), "{page:?}");
        }
    }

    #[test]
    fn every_assigned_character_encodes_to_its_byte() {
        for page in ALL_PAGES {
            for byte in 0x80..=0xFFu8 {
                let Some(c) = decode_byte(page, byte) else {
                    continue;
                };
                assert_eq!(
                    encode(page, &c.to_string()),
                    vec![byte],
                    "{page:?} byte {byte:#04x} ({c:?})"
                );
            }
        }
    }

    #[test]
    fn letter_sample_lists_national_letters_only() {
        let turkish = letter_sample(CodePage::Pc857);
        assert!(turkish.contains('ş'));
        assert!(turkish.contains('İ'));
        assert!(!turkish.contains('─'));
        assert!(letter_sample(CodePage::Pc866).contains('Ж'));
    }

    #[test]
    fn single_byte_pages_decode_through_encoding_rs() {
        assert_eq!(decode_byte(CodePage::Wpc1252, 0x80), Some('€'));
        assert_eq!(decode_byte(CodePage::Pc866, 0x99), Some('Щ'));
        // Unassigned in windows-1252; encoding_rs yields a C1 control.
        assert_eq!(decode_byte(CodePage::Wpc1252, 0x81), None);
    }

    #[test]
    fn turkish_letters_use_pc857_slots() {
        assert_eq!(encode(CodePage::Pc857, "ğĞşŞıİ"), vec![0xA7, 0xA6, 0x9F, 0x9E, 0x8D, 0x98]);
        assert_eq!(encode(CodePage::Pc857, "çÇöÖüÜ"), vec![0x87, 0x80, 0x94, 0x99, 0x81, 0x9A]);
    }

    #[test]
    fn unmappable_letters_fold_to_base_letters() {
        assert_eq!(encode(CodePage::Pc437, "Işık"), b"Isik".to_vec());
        assert_eq!(encode(CodePage::Pc866, "Café"), b"Cafe".to_vec());
        assert_eq!(encode(CodePage::Pc437, "Łódź"), vec![b'L', 0xA2, b'd', b'z']);
    }

    #[test]
    fn euro_sign_substitutes_where_missing() {
        assert_eq!(encode(CodePage::Pc437, "5€"), b"5EUR".to_vec());
        assert_eq!(encode(CodePage::Pc858, "€"), vec![0xD5]);
        assert_eq!(encode(CodePage::Wpc1252, "€"), vec![0x80]);
    }

    #[test]
    fn typographic_punctuation_has_ascii_look_alikes() {
        assert_eq!(
            encode(CodePage::Pc857, "\u{201C}Hi\u{201D} \u{2013} it\u{2019}s\u{2026}"),
            b"\"Hi\" - it's...".to_vec()
        );
    }

    #[test]
    fn characters_without_look_alike_become_question_marks() {
        assert_eq!(encode(CodePage::Pc857, "\u{2603}\u{1F355}"), b"??".to_vec());
        assert_eq!(encode(CodePage::Pc437, "漢"), b"?".to_vec());
    }

    #[test]
    fn control_characters_cannot_inject_commands() {
        assert_eq!(encode(CodePage::Pc857, "a\x1b@b\nc\td"), b"a @b c d".to_vec());
    }

    #[test]
    fn zero_width_characters_disappear() {
        assert_eq!(encode(CodePage::Pc437, "a\u{200B}b\u{FEFF}"), b"ab".to_vec());
    }

    #[test]
    fn substitutes_are_ascii() {
        for c in ['€', '…', '™', '½', 'Œ', 'ß', '\u{2014}', '\u{00A0}', 'İ'] {
            let s = substitute(c).expect("has substitute");
            assert!(s.is_ascii(), "{c:?} -> {s:?}");
        }
    }

    #[test]
    fn cyrillic_is_native_in_pc866() {
        assert_eq!(encode(CodePage::Pc866, "Щи"), vec![0x99, 0xA8]);
        assert_eq!(encode(CodePage::Pc857, "Щи"), b"??".to_vec());
    }
}
