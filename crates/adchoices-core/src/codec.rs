//! Transport codec — item lists as compact base64 tokens
//!
//! A token is the base64 (standard alphabet, padded) of the JSON array of
//! items. Tokens travel inside window names as `<prefix>-<token>`, where the
//! prefix contains no hyphen. That channel is read-only best effort: anything
//! that does not decode yields an empty list.

use crate::error::{Error, Result};
use crate::types::RawItem;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use regex::Regex;
use std::sync::OnceLock;

fn window_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[^-]+-([A-Za-z0-9+/]+={0,3})$").expect("window name pattern is valid")
    })
}

/// JSON-serialize then base64-encode.
pub fn encode(items: &[RawItem]) -> Result<String> {
    let json = serde_json::to_vec(items)?;
    Ok(STANDARD.encode(json))
}

/// Strict inverse of [`encode`].
pub fn try_decode(token: &str) -> Result<Vec<RawItem>> {
    let bytes = STANDARD
        .decode(token.trim())
        .map_err(|e| Error::codec(format!("bad base64: {}", e)))?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Lenient decode: malformed input is an empty list.
pub fn decode(token: &str) -> Vec<RawItem> {
    match try_decode(token) {
        Ok(items) => items,
        Err(e) => {
            tracing::debug!("Discarding undecodable token: {}", e);
            Vec::new()
        }
    }
}

/// Trailing token of a `<prefix>-<token>` window name, if it has that shape.
pub fn token_from_window_name(name: &str) -> Option<&str> {
    window_name_pattern()
        .captures(name)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Items carried in a window name; empty when there are none.
pub fn items_from_window_name(name: &str) -> Vec<RawItem> {
    token_from_window_name(name).map(decode).unwrap_or_default()
}

/// Build a window name carrying `token`. Hyphens in the prefix are dropped so
/// the result still matches the read pattern.
pub fn compose_window_name(prefix: &str, token: &str) -> String {
    let prefix: String = prefix.chars().filter(|c| *c != '-').collect();
    let prefix = if prefix.is_empty() { "adp".to_string() } else { prefix };
    format!("{}-{}", prefix, token)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<RawItem> {
        vec![
            RawItem::new("Adition", "Opt out", "http://adition.example/optout")
                .with_text("Behavioural targeting"),
            RawItem {
                header: Some("Ünïcödé header".into()),
                use_popup: Some(false),
                ..RawItem::default()
            },
        ]
    }

    #[test]
    fn decode_reverses_encode() {
        let items = sample();
        let token = encode(&items).unwrap();
        assert_eq!(decode(&token), items);
    }

    #[test]
    fn garbage_decodes_to_empty() {
        assert!(decode("!!!not base64!!!").is_empty());
        assert!(decode("").is_empty());
        // valid base64, not JSON
        assert!(decode("aGVsbG8=").is_empty());
        // valid JSON, wrong shape
        assert!(decode(&STANDARD.encode(br#"{"a":1}"#)).is_empty());
    }

    #[test]
    fn token_is_extracted_from_window_name() {
        let token = encode(&sample()).unwrap();
        let name = compose_window_name("adpframe", &token);
        assert_eq!(token_from_window_name(&name), Some(token.as_str()));
        assert_eq!(items_from_window_name(&name), sample());
    }

    #[test]
    fn names_without_token_yield_nothing() {
        assert_eq!(token_from_window_name("plain"), None);
        assert_eq!(token_from_window_name("a-b-c"), None);
        assert!(items_from_window_name("google_ads_iframe_1").is_empty());
    }

    #[test]
    fn hyphenated_prefix_is_sanitised() {
        let name = compose_window_name("my-frame", "QUJD");
        assert_eq!(name, "myframe-QUJD");
        assert_eq!(token_from_window_name(&name), Some("QUJD"));
    }
}
