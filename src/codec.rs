//! Reversible URL-safe token codec for proxied target URLs
//!
//! Tokens are padding-free base64 over the URL-safe alphabet. Decoding is
//! total: anything that is not a token carrying an http(s) URL falls back to
//! percent-decoding and finally to the input itself.

use base64::{
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine,
};

/// URL-safe alphabet, no padding on encode, padding tolerated on decode
const TOKEN_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Standard alphabet, for tokens minted by older clients
const LEGACY_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// True when `s` begins with `http://` or `https://` (ASCII case-insensitive)
pub fn has_http_scheme(s: &str) -> bool {
    let lower = s
        .get(..8)
        .unwrap_or(s)
        .to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Encode an absolute URL into an opaque token
pub fn encode(url: &str) -> String {
    TOKEN_ENGINE.encode(url.as_bytes())
}

/// Decode a token if it carries an http(s) URL
pub fn decode_token(token: &str) -> Option<String> {
    let bytes = TOKEN_ENGINE
        .decode(token)
        .or_else(|_| LEGACY_ENGINE.decode(token))
        .ok()?;
    String::from_utf8(bytes)
        .ok()
        .filter(|decoded| has_http_scheme(decoded))
}

/// Decode anything: token, percent-encoded text, or plain text. Never fails.
pub fn decode(input: &str) -> String {
    if let Some(url) = decode_token(input) {
        return url;
    }
    match urlencoding::decode(input) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => input.to_string(),
    }
}
