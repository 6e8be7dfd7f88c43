//! EBU Latin based character set decoding (ETSI TS 101 756 Annex C).
//!
//! DAB labels are 16 bytes in the EBU Latin based repertoire. Code points
//! 0x00-0x7F coincide with ASCII; 0x80-0xFF map through the table below.

/// EBU Latin mapping for the 0x80-0xFF range.
#[rustfmt::skip]
const EBU_LATIN_HIGH: [char; 128] = [
    // 0x80
    'á', 'à', 'é', 'è', 'í', 'ì', 'ó', 'ò', 'ú', 'ù', 'Ñ', 'Ç', 'Ş', 'ß', '¡', 'Ĳ',
    // 0x90
    'â', 'ä', 'ê', 'ë', 'î', 'ï', 'ô', 'ö', 'û', 'ü', 'ñ', 'ç', 'ş', 'ǧ', 'ı', 'ĳ',
    // 0xA0
    'ª', 'α', '©', '‰', 'Ǧ', 'ě', 'ň', 'ő', 'π', '€', '£', '$', '←', '↑', '→', '↓',
    // 0xB0
    'º', '¹', '²', '³', '±', 'İ', 'ń', 'ű', 'µ', '¿', '÷', '°', '¼', '½', '¾', '§',
    // 0xC0
    'Á', 'À', 'É', 'È', 'Í', 'Ì', 'Ó', 'Ò', 'Ú', 'Ù', 'Ř', 'Č', 'Š', 'Ž', 'Ð', 'Ŀ',
    // 0xD0
    'Â', 'Ä', 'Ê', 'Ë', 'Î', 'Ï', 'Ô', 'Ö', 'Û', 'Ü', 'ř', 'č', 'š', 'ž', 'đ', 'ŀ',
    // 0xE0
    'Ã', 'Å', 'Æ', 'Œ', 'ŷ', 'ý', 'Õ', 'Ø', 'Þ', 'Ŋ', 'Ŕ', 'Ć', 'Ś', 'Ź', 'Ť', 'ð',
    // 0xF0
    'ã', 'å', 'æ', 'œ', 'ŵ', 'ỳ', 'õ', 'ø', 'þ', 'ŋ', 'ŕ', 'ć', 'ś', 'ź', 'ť', 'ħ',
];

/// Map a single EBU Latin byte to a Unicode character.
///
/// The low half coincides with ASCII and passes through unchanged.
pub fn ebu_latin_char(byte: u8) -> char {
    match byte {
        0x00..=0x7F => byte as char,
        _ => EBU_LATIN_HIGH[(byte - 0x80) as usize],
    }
}

/// Decode a fixed-size DAB label field to UTF-8.
///
/// Trailing spaces and NULs are trimmed; decoding stops at the first
/// embedded NUL.
pub fn decode_label(raw: &[u8]) -> String {
    let mut end = raw.len();
    while end > 0 && (raw[end - 1] == b' ' || raw[end - 1] == 0) {
        end -= 1;
    }

    let mut out = String::with_capacity(end);
    for &b in &raw[..end] {
        if b == 0 {
            break;
        }
        out.push(ebu_latin_char(b));
    }
    out
}
