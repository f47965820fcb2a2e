//! Deterministic canonicalization of document bytes
//!
//! Canonical bytes are what gets fingerprinted. The transformation only
//! removes representation noise (byte-order marks, line endings, volatile
//! generator metadata) and never touches substantive content:
//!
//! - `pdf`, `binary`: unchanged. Authorities hash the published file as-is.
//! - `text`: BOM stripped, `\r\n` and lone `\r` become `\n`.
//! - `markdown`: as `text`, plus volatile keys removed from a leading YAML
//!   front-matter block.
//! - `json`: volatile top-level keys removed, then RFC 8785 (JCS) output.

use crate::domain::DocumentFormat;
use crate::infra::{ProvenanceError, Result};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Front-matter keys written by site generators and export tools.
const VOLATILE_FRONT_MATTER_KEYS: &[&str] = &[
    "generated",
    "generated_at",
    "generated_on",
    "build_date",
    "last_generated",
];

/// Top-level JSON keys carrying generation timestamps.
const VOLATILE_JSON_KEYS: &[&str] = &["generated_at", "generatedAt", "generated", "build_date"];

/// Canonicalize bytes according to their declared format.
pub fn canonicalize(bytes: &[u8], format: DocumentFormat) -> Result<Vec<u8>> {
    match format {
        DocumentFormat::Pdf | DocumentFormat::Binary => Ok(bytes.to_vec()),
        DocumentFormat::Text => Ok(normalize_text(bytes)),
        DocumentFormat::Markdown => Ok(strip_front_matter_keys(&normalize_text(bytes))),
        DocumentFormat::Json => canonicalize_json_bytes(bytes),
    }
}

/// Strip a leading BOM and normalize line endings to `\n`.
fn normalize_text(bytes: &[u8]) -> Vec<u8> {
    let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let mut out = Vec::with_capacity(body.len());
    let mut iter = body.iter().peekable();

    while let Some(&b) = iter.next() {
        if b == b'\r' {
            if iter.peek() == Some(&&b'\n') {
                iter.next();
            }
            out.push(b'\n');
        } else {
            out.push(b);
        }
    }

    out
}

/// Remove volatile keys (and their indented continuation lines) from a
/// leading `---` front-matter block. Input must already use `\n` endings.
fn strip_front_matter_keys(text: &[u8]) -> Vec<u8> {
    let lines: Vec<&[u8]> = text.split(|&b| b == b'\n').collect();
    if lines.first().map(|l| *l != b"---").unwrap_or(true) {
        return text.to_vec();
    }

    let close = match lines
        .iter()
        .enumerate()
        .skip(1)
        .find(|(_, l)| **l == b"---" || **l == b"...")
    {
        Some((i, _)) => i,
        None => return text.to_vec(),
    };

    let mut kept: Vec<&[u8]> = Vec::with_capacity(lines.len());
    kept.push(lines[0]);

    let mut dropping = false;
    for line in &lines[1..close] {
        let indented = line.first().map(|b| *b == b' ' || *b == b'\t').unwrap_or(false);
        if indented && dropping {
            continue;
        }
        dropping = !indented && is_volatile_key_line(line);
        if !dropping {
            kept.push(line);
        }
    }
    kept.extend_from_slice(&lines[close..]);

    kept.join(&b'\n')
}

fn is_volatile_key_line(line: &[u8]) -> bool {
    let Some(colon) = line.iter().position(|&b| b == b':') else {
        return false;
    };
    let key = String::from_utf8_lossy(&line[..colon]);
    VOLATILE_FRONT_MATTER_KEYS.contains(&key.trim())
}

fn canonicalize_json_bytes(bytes: &[u8]) -> Result<Vec<u8>> {
    let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let mut value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| ProvenanceError::UnsupportedFormat(format!("json (invalid document: {e})")))?;

    if let Some(obj) = value.as_object_mut() {
        for key in VOLATILE_JSON_KEYS {
            obj.remove(*key);
        }
    }

    serde_json_canonicalizer::to_vec(&value)
        .map_err(|e| ProvenanceError::Internal(format!("JCS serialization failed: {e}")))
}
