//! Core type definitions for the provenance ledger
//!
//! Identity and content-address types shared by every component.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::infra::ProvenanceError;

/// 32-byte hash (SHA-256)
pub type Hash256 = [u8; 32];

/// Content address of a document version: SHA-256 of its canonical bytes.
///
/// Two documents with identical canonical bytes share a fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(#[serde(with = "hash256_hex")] pub Hash256);

impl Fingerprint {
    pub fn from_bytes(bytes: Hash256) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &Hash256 {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a 64-character hex string (optional `0x` prefix, any case).
    pub fn from_hex(s: &str) -> Result<Self, ProvenanceError> {
        let trimmed = s.trim();
        let hex_str = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let bytes = hex::decode(hex_str)
            .map_err(|e| ProvenanceError::InvalidFingerprint(format!("{s}: {e}")))?;
        let arr: Hash256 = bytes
            .try_into()
            .map_err(|_| ProvenanceError::InvalidFingerprint(format!("{s}: expected 32 bytes")))?;
        Ok(Self(arr))
    }

    /// Short form used in log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for Fingerprint {
    type Err = ProvenanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

/// Logical document identity, e.g. `"Principle-VII v1.0"`.
///
/// Stable across content edits; the lookup key of the mapping table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentIdentity(pub String);

impl DocumentIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// URL/path-safe slug: lowercase, accents folded, runs of other
    /// characters collapsed to a single `-`.
    pub fn slug(&self) -> String {
        slugify(&self.0)
    }

    /// Slug without the version token: `"Principle-VII v1.0"` gives `principle-vii`.
    pub fn base_slug(&self) -> String {
        base_slug(&self.0)
    }

    /// Version token found in the name (`v1.0` becomes `v1-0`), `v1-0` if none.
    pub fn version_label(&self) -> String {
        parse_version_label(&self.0).unwrap_or_else(|| DEFAULT_VERSION_LABEL.to_string())
    }
}

impl fmt::Display for DocumentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DocumentIdentity {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for DocumentIdentity {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Version label used when a name carries no `vN` token.
pub const DEFAULT_VERSION_LABEL: &str = "v1-0";

/// Slugify a free-form name.
pub fn slugify(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_dash = false;

    for c in name.chars().flat_map(char::to_lowercase) {
        let c = fold_accent(c);
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c);
        } else {
            pending_dash = true;
        }
    }

    out
}

fn fold_accent(c: char) -> char {
    match c {
        'à' | 'â' | 'ä' => 'a',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'ï' | 'î' => 'i',
        'ô' | 'ö' => 'o',
        'ù' | 'û' | 'ü' => 'u',
        'ç' => 'c',
        other => other,
    }
}

/// Find the first `vN(.N)*` token that starts the name or follows `_`, `-`
/// or whitespace. Returned lowercased with dots replaced by dashes.
pub fn parse_version_label(name: &str) -> Option<String> {
    let chars: Vec<char> = name.chars().collect();
    let (start, end) = version_span(&chars)?;
    let token: String = chars[start..end].iter().collect();
    Some(token.to_lowercase().replace('.', "-"))
}

/// Slug of a name with its version token removed.
pub fn base_slug(name: &str) -> String {
    slugify(&without_version(name))
}

/// The name with its version token removed and separators trimmed:
/// `"Principle-VII v1.0"` gives `"Principle-VII"`.
pub fn without_version(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let stripped: String = match version_span(&chars) {
        Some((start, end)) => chars[..start].iter().chain(&chars[end..]).collect(),
        None => name.to_string(),
    };
    stripped
        .trim_matches(|c: char| c == '_' || c == '-' || c.is_whitespace())
        .to_string()
}

fn version_span(chars: &[char]) -> Option<(usize, usize)> {
    for i in 0..chars.len() {
        if !matches!(chars[i], 'v' | 'V') {
            continue;
        }
        if i > 0 {
            let prev = chars[i - 1];
            if !(prev == '_' || prev == '-' || prev.is_whitespace()) {
                continue;
            }
        }

        let mut j = i + 1;
        let digits_start = j;
        while j < chars.len() && chars[j].is_ascii_digit() {
            j += 1;
        }
        if j == digits_start {
            continue;
        }

        // (\.\d+)*
        while j + 1 < chars.len() && chars[j] == '.' && chars[j + 1].is_ascii_digit() {
            j += 1;
            while j < chars.len() && chars[j].is_ascii_digit() {
                j += 1;
            }
        }

        return Some((i, j));
    }

    None
}

/// Declared format of submitted bytes; drives canonicalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentFormat {
    Pdf,
    Binary,
    Text,
    Markdown,
    Json,
}

impl DocumentFormat {
    /// Parse a format tag (short name, extension or MIME type).
    pub fn from_tag(tag: &str) -> Result<Self, ProvenanceError> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "pdf" | "application/pdf" => Ok(Self::Pdf),
            "bin" | "binary" | "application/octet-stream" => Ok(Self::Binary),
            "txt" | "text" | "text/plain" => Ok(Self::Text),
            "md" | "markdown" | "text/markdown" => Ok(Self::Markdown),
            "json" | "application/json" => Ok(Self::Json),
            _ => Err(ProvenanceError::UnsupportedFormat(tag.to_string())),
        }
    }

    /// Guess the format from a file extension.
    pub fn from_extension(ext: &str) -> Result<Self, ProvenanceError> {
        Self::from_tag(ext.trim_start_matches('.'))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Binary => "binary",
            Self::Text => "text",
            Self::Markdown => "markdown",
            Self::Json => "json",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Binary => "application/octet-stream",
            Self::Text => "text/plain",
            Self::Markdown => "text/markdown",
            Self::Json => "application/json",
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentFormat {
    type Err = ProvenanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_tag(s)
    }
}

/// Serde module for serializing Hash256 as hex strings
pub mod hash256_hex {
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let hex_str = s.strip_prefix("0x").unwrap_or(&s);
        let bytes = hex::decode(hex_str).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 32 bytes for Hash256"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_hex_roundtrip() {
        let fp = Fingerprint([0xab; 32]);
        let hex_str = fp.to_hex();
        assert_eq!(hex_str.len(), 64);
        assert_eq!(Fingerprint::from_hex(&hex_str).unwrap(), fp);
        assert_eq!(
            Fingerprint::from_hex(&format!("0x{}", hex_str.to_uppercase())).unwrap(),
            fp
        );
    }

    #[test]
    fn test_fingerprint_rejects_bad_length() {
        assert!(matches!(
            Fingerprint::from_hex("abcd"),
            Err(ProvenanceError::InvalidFingerprint(_))
        ));
        assert!(Fingerprint::from_hex("zz").is_err());
    }

    #[test]
    fn test_fingerprint_serializes_as_hex_string() {
        let fp = Fingerprint([1u8; 32]);
        let json = serde_json::to_string(&fp).unwrap();
        assert_eq!(json, format!("\"{}\"", "01".repeat(32)));
        let back: Fingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fp);
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Principle VII — Éthique"), "principle-vii-ethique");
        assert_eq!(slugify("  --Hello__World--  "), "hello-world");
        assert_eq!(slugify("Façade v1.0"), "facade-v1-0");
        assert_eq!(slugify(""), "");
    }

    #[test]
    fn test_version_label() {
        assert_eq!(
            DocumentIdentity::new("Principle-VII v1.0").version_label(),
            "v1-0"
        );
        assert_eq!(
            DocumentIdentity::new("charter_V2.3.1_final").version_label(),
            "v2-3-1"
        );
        assert_eq!(DocumentIdentity::new("Manifesto").version_label(), "v1-0");
        // `v` must start a token
        assert_eq!(DocumentIdentity::new("overview2").version_label(), "v1-0");
        assert_eq!(parse_version_label("v3."), Some("v3".to_string()));
    }

    #[test]
    fn test_base_slug_strips_version() {
        assert_eq!(DocumentIdentity::new("Principle-VII v1.0").base_slug(), "principle-vii");
        assert_eq!(base_slug("charter_V2.3.1_final"), "charter-final");
        assert_eq!(base_slug("Manifesto"), "manifesto");
        assert_eq!(without_version("Principle-VII v1.0"), "Principle-VII");
        assert_eq!(without_version("v2_charter"), "charter");
    }

    #[test]
    fn test_document_format_tags() {
        assert_eq!(DocumentFormat::from_tag("PDF").unwrap(), DocumentFormat::Pdf);
        assert_eq!(
            DocumentFormat::from_tag("text/markdown").unwrap(),
            DocumentFormat::Markdown
        );
        assert_eq!(
            DocumentFormat::from_extension(".json").unwrap(),
            DocumentFormat::Json
        );
        assert!(matches!(
            DocumentFormat::from_tag("docx"),
            Err(ProvenanceError::UnsupportedFormat(tag)) if tag == "docx"
        ));
    }
}
