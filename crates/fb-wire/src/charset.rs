//! Firebird character set names mapped to `encoding_rs` encodings.
//!
//! Used to encode event names and to decode strings carried in status
//! vectors when the connection character set is not UTF-8.

use encoding_rs::Encoding;

/// Get the encoding for a Firebird character set name.
///
/// Names are matched case-insensitively. `NONE` and `OCTETS` have no
/// encoding and return `None`, as do character sets without an
/// `encoding_rs` counterpart.
#[must_use]
pub fn encoding_for_charset(name: &str) -> Option<&'static Encoding> {
    let upper = name.trim().to_ascii_uppercase();
    match upper.as_str() {
        "UTF8" | "UNICODE_FSS" => Some(encoding_rs::UTF_8),
        "ISO8859_1" | "WIN1252" => Some(encoding_rs::WINDOWS_1252),
        "ISO8859_2" => Some(encoding_rs::ISO_8859_2),
        "ISO8859_3" => Some(encoding_rs::ISO_8859_3),
        "ISO8859_4" => Some(encoding_rs::ISO_8859_4),
        "ISO8859_5" => Some(encoding_rs::ISO_8859_5),
        "ISO8859_6" => Some(encoding_rs::ISO_8859_6),
        "ISO8859_7" => Some(encoding_rs::ISO_8859_7),
        "ISO8859_8" => Some(encoding_rs::ISO_8859_8),
        "ISO8859_13" => Some(encoding_rs::ISO_8859_13),
        "WIN1250" => Some(encoding_rs::WINDOWS_1250),
        "WIN1251" => Some(encoding_rs::WINDOWS_1251),
        "WIN1253" => Some(encoding_rs::WINDOWS_1253),
        "WIN1254" => Some(encoding_rs::WINDOWS_1254),
        "WIN1255" => Some(encoding_rs::WINDOWS_1255),
        "WIN1256" => Some(encoding_rs::WINDOWS_1256),
        "WIN1257" => Some(encoding_rs::WINDOWS_1257),
        "WIN1258" => Some(encoding_rs::WINDOWS_1258),
        "KOI8R" => Some(encoding_rs::KOI8_R),
        "KOI8U" => Some(encoding_rs::KOI8_U),
        "SJIS_0208" => Some(encoding_rs::SHIFT_JIS),
        "EUCJ_0208" => Some(encoding_rs::EUC_JP),
        "KSC_5601" => Some(encoding_rs::EUC_KR),
        "BIG_5" => Some(encoding_rs::BIG5),
        "GB_2312" | "GBK" => Some(encoding_rs::GBK),
        "GB18030" => Some(encoding_rs::GB18030),
        "DOS866" => Some(encoding_rs::IBM866),
        _ => None,
    }
}

/// Encode text for the wire using a Firebird character set.
///
/// Unknown character sets, `NONE` and `OCTETS` fall back to UTF-8 bytes.
#[must_use]
pub fn encode(charset: &str, text: &str) -> Vec<u8> {
    match encoding_for_charset(charset) {
        Some(encoding) => encoding.encode(text).0.into_owned(),
        None => text.as_bytes().to_vec(),
    }
}

/// Decode wire bytes using a Firebird character set, replacing invalid
/// sequences.
#[must_use]
pub fn decode(charset: &str, bytes: &[u8]) -> String {
    match encoding_for_charset(charset) {
        Some(encoding) => encoding.decode_without_bom_handling(bytes).0.into_owned(),
        None => String::from_utf8_lossy(bytes).into_owned(),
    }
}
