//! Structural text recovery over beacon-shaped JSON.
//!
//! Encoding is lossy, so the source text may or may not travel with a
//! beacon. The chain below probes the places it tends to end up, cheapest
//! first, and reports `None` when nothing structural is left to try.

use super::wire::bytes_from_value;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{Map, Value};
use tracing::trace;

/// Largest length prefix accepted for signature-embedded text
pub const SIGNATURE_TEXT_LIMIT: usize = 10_000;

/// Keys the heuristic scan never treats as text
const STRUCTURAL_KEYS: &[&str] = &[
    "beacon_id",
    "beaconId",
    "id",
    "beacon_type",
    "beaconType",
    "type",
    "author_id",
    "authorId",
    "fingerprint",
    "signature",
    "epoch",
    "prime_indices",
    "primeIndices",
    "created_at",
    "createdAt",
];

/// Keys already probed by an earlier attempt
const PROBED_KEYS: &[&str] = &["originalText", "metadata", "content", "data", "content_base64"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeAttempt {
    ExactText,
    MetadataText,
    ContentField,
    Base64Content,
    SignatureText,
    HeuristicScan,
}

impl DecodeAttempt {
    /// Evaluation order of the chain
    pub const CHAIN: [DecodeAttempt; 6] = [
        DecodeAttempt::ExactText,
        DecodeAttempt::MetadataText,
        DecodeAttempt::ContentField,
        DecodeAttempt::Base64Content,
        DecodeAttempt::SignatureText,
        DecodeAttempt::HeuristicScan,
    ];

    pub fn run(self, fields: &Map<String, Value>) -> Option<String> {
        match self {
            DecodeAttempt::ExactText => text_field(fields, "originalText"),
            DecodeAttempt::MetadataText => metadata_text(fields.get("metadata")?),
            DecodeAttempt::ContentField => {
                text_field(fields, "content").or_else(|| text_field(fields, "data"))
            }
            DecodeAttempt::Base64Content => base64_text(fields.get("content_base64")?),
            DecodeAttempt::SignatureText => {
                signature_text(&bytes_from_value(fields.get("signature")?)?)
            }
            DecodeAttempt::HeuristicScan => heuristic_scan(fields),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackDecoder;

impl FallbackDecoder {
    pub fn new() -> Self {
        Self
    }

    pub fn decode(&self, value: &Value) -> Option<String> {
        self.decode_traced(value).map(|(_, text)| text)
    }

    /// Like [`FallbackDecoder::decode`], also naming the attempt that succeeded
    pub fn decode_traced(&self, value: &Value) -> Option<(DecodeAttempt, String)> {
        let fields = value.as_object()?;
        let found = DecodeAttempt::CHAIN
            .iter()
            .find_map(|&attempt| attempt.run(fields).map(|text| (attempt, text)));
        if let Some((attempt, text)) = &found {
            trace!(?attempt, chars = text.chars().count(), "Fallback decode hit");
        }
        found
    }
}

fn text_field(fields: &Map<String, Value>, key: &str) -> Option<String> {
    match fields.get(key)? {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        _ => None,
    }
}

fn metadata_text(metadata: &Value) -> Option<String> {
    let parsed;
    let object = match metadata {
        Value::String(raw) => {
            parsed = serde_json::from_str::<Value>(raw).ok()?;
            parsed.as_object()?
        }
        Value::Object(object) => object,
        _ => return None,
    };
    text_field(object, "originalText")
}

fn base64_text(encoded: &Value) -> Option<String> {
    let bytes = STANDARD.decode(encoded.as_str()?.trim()).ok()?;
    let text = String::from_utf8(bytes).ok()?;
    (!text.is_empty()).then_some(text)
}

/// Text behind a little-endian `u32` length prefix, or the whole signature
/// when it is entirely printable.
pub fn signature_text(signature: &[u8]) -> Option<String> {
    if signature.len() >= 4 {
        let (prefix, rest) = signature.split_at(4);
        let len = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
        if len > 0 && len <= rest.len() && len < SIGNATURE_TEXT_LIMIT {
            if let Ok(text) = std::str::from_utf8(&rest[..len]) {
                return Some(text.to_string());
            }
        }
    }

    let whole = std::str::from_utf8(signature).ok()?;
    let printable = whole
        .chars()
        .all(|c| c.is_ascii_graphic() || c.is_ascii_whitespace());
    (printable && !whole.trim().is_empty()).then(|| whole.to_string())
}

fn heuristic_scan(fields: &Map<String, Value>) -> Option<String> {
    fields
        .iter()
        .filter(|(key, _)| {
            !STRUCTURAL_KEYS.contains(&key.as_str()) && !PROBED_KEYS.contains(&key.as_str())
        })
        .filter_map(|(_, value)| value.as_str())
        .find(|candidate| looks_like_text(candidate))
        .map(str::to_string)
}

fn looks_like_text(candidate: &str) -> bool {
    let trimmed = candidate.trim();
    if (trimmed.starts_with('{') || trimmed.starts_with('['))
        && serde_json::from_str::<Value>(trimmed).is_ok()
    {
        return true;
    }

    candidate.chars().count() > 10
        && candidate.contains([' ', '"', ':'])
        && !is_bare_identifier(candidate)
        && !is_long_hex(candidate)
}

fn is_bare_identifier(candidate: &str) -> bool {
    let mut chars = candidate.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

fn is_long_hex(candidate: &str) -> bool {
    candidate.len() >= 16 && candidate.chars().all(|c| c.is_ascii_hexdigit())
}
