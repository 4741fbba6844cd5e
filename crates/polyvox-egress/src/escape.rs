//! JSON string escape helpers
//!
//! Request bodies are assembled with serde, so escaping is never hand
//! rolled; these helpers exist for the places that splice text into JSON
//! templates (and to make the escape/unescape identity testable).

use polyvox_core::error::{Error, ErrorKind, Result};

/// Escape `text` as the contents of a JSON string literal, without the
/// surrounding quotes.
pub fn escape_json_string(text: &str) -> String {
    let quoted = serde_json::to_string(text).expect("string serialization is infallible");
    quoted[1..quoted.len() - 1].to_string()
}

/// Inverse of [`escape_json_string`].
pub fn unescape_json_string(escaped: &str) -> Result<String> {
    serde_json::from_str(&format!("\"{escaped}\""))
        .map_err(|e| Error::new(ErrorKind::Unknown, format!("invalid JSON string escape: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escapes_control_characters() {
        assert_eq!(escape_json_string("a\nb"), "a\\nb");
        assert_eq!(escape_json_string("a\tb"), "a\\tb");
        assert_eq!(escape_json_string("a\rb"), "a\\rb");
        assert_eq!(escape_json_string(r#"say "hi""#), r#"say \"hi\""#);
        assert_eq!(escape_json_string(r"back\slash"), r"back\\slash");
    }

    #[test]
    fn test_unescape_rejects_garbage() {
        assert!(unescape_json_string("\\q").is_err());
        assert!(unescape_json_string("\"").is_err());
    }

    #[test]
    fn test_round_trip_identity() {
        let corpus = [
            "",
            "plain ascii",
            "line\nbreaks\r\nand\ttabs",
            r#"quotes "inside" and \ slashes"#,
            "unicode: héllo wörld — 日本語 🙂",
            "nested {\"json\": [1, 2, 3]}",
            "\u{0} null byte and \u{1b} escape",
        ];
        for text in corpus {
            let escaped = escape_json_string(text);
            let restored = unescape_json_string(&escaped).unwrap();
            assert_eq!(restored, text);
        }
    }
}
