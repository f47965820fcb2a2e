//! Receipt validation and parsing
//!
//! Validation follows the public rule any third party can apply without
//! trusting the ledger's database: the Merkle path from the fingerprint must
//! reach the root, and the root must be what the blockchain transactions
//! commit to.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};

use crate::crypto::fold_path;
use crate::domain::{AnchorPoint, AnchorReceipt, Fingerprint, Hash256, ProofStep};
use crate::infra::{ProvenanceError, Result};

/// Network recorded for anchors that do not name one.
const DEFAULT_NETWORK: &str = "bitcoin-mainnet";

/// Validate a receipt for `fingerprint`; returns the confirmation time.
pub fn verify_receipt(receipt: &AnchorReceipt, fingerprint: &Fingerprint) -> Result<DateTime<Utc>> {
    if receipt.target_hash != *fingerprint {
        return Err(ProvenanceError::TamperedAnchor(format!(
            "receipt targets {}, not {}",
            receipt.target_hash, fingerprint
        )));
    }

    let computed = fold_path(fingerprint.as_bytes(), &receipt.proof);
    if computed != receipt.merkle_root {
        return Err(ProvenanceError::TamperedAnchor(format!(
            "merkle path yields {}, receipt claims root {}",
            hex::encode(computed),
            hex::encode(receipt.merkle_root)
        )));
    }

    let root_hex = hex::encode(receipt.merkle_root);
    for anchor in &receipt.anchors {
        if let Some(op_return) = &anchor.op_return {
            if !op_return.eq_ignore_ascii_case(&root_hex) {
                return Err(ProvenanceError::TamperedAnchor(format!(
                    "transaction {} commits to {}, not to the receipt root",
                    anchor.tx_id, op_return
                )));
            }
        }
    }

    receipt.confirmed_at().ok_or_else(|| {
        ProvenanceError::TamperedAnchor("receipt carries no blockchain anchor".to_string())
    })
}

fn first_str<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find_map(|v| v.as_str().filter(|s| !s.is_empty()))
}

fn first_value<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find(|v| !v.is_null())
}

/// Parse an RFC 3339 string, a naive ISO timestamp (taken as UTC) or a Unix
/// time in seconds or milliseconds.
fn parse_time(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|naive| naive.and_utc())
            }),
        Value::Number(n) => {
            let raw = n.as_i64()?;
            if raw.abs() >= 100_000_000_000 {
                Utc.timestamp_millis_opt(raw).single()
            } else {
                Utc.timestamp_opt(raw, 0).single()
            }
        }
        _ => None,
    }
}

fn parse_hash(s: &str, what: &str) -> Result<Hash256> {
    Fingerprint::from_hex(s)
        .map(|fp| fp.0)
        .map_err(|e| ProvenanceError::InvalidReceipt(format!("{what}: {e}")))
}

fn is_bitcoin_anchor(kind: &str) -> bool {
    let kind = kind.to_ascii_lowercase();
    kind.is_empty()
        || kind.contains("btc")
        || kind.contains("bitcoin")
        || matches!(kind.as_str(), "opreturn" | "op-return" | "op_return")
}

fn parse_anchor(
    anchor: &Map<String, Value>,
    fallback_time: Option<DateTime<Utc>>,
) -> Result<Option<AnchorPoint>> {
    let kind = first_str(anchor, &["type"]).unwrap_or_default();
    if !is_bitcoin_anchor(kind) {
        return Ok(None);
    }
    let Some(tx_id) = first_str(anchor, &["txId", "txid", "sourceId"]) else {
        return Ok(None);
    };

    let confirmed_at = first_value(anchor, &["time", "timestamp", "confirmedAt"])
        .and_then(parse_time)
        .or(fallback_time)
        .ok_or_else(|| {
            ProvenanceError::InvalidReceipt(format!("anchor {tx_id} has no block time"))
        })?;

    let block_height = first_value(anchor, &["blockHeight", "block_height"]).and_then(|v| {
        v.as_u64()
            .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
    });

    Ok(Some(AnchorPoint {
        network: first_str(anchor, &["network"])
            .unwrap_or(DEFAULT_NETWORK)
            .to_string(),
        tx_id: tx_id.to_ascii_lowercase(),
        block_height,
        confirmed_at,
        op_return: first_str(anchor, &["opReturn", "op_return"]).map(str::to_ascii_lowercase),
    }))
}

/// Parse a Woleet/Chainpoint style receipt, tolerating the key variants
/// found in the wild.
///
/// A receipt without a bitcoin anchor parses with an empty anchor list; it
/// proves submission only.
pub fn parse_woleet_receipt(value: &Value) -> Result<AnchorReceipt> {
    let obj = value
        .as_object()
        .ok_or_else(|| ProvenanceError::InvalidReceipt("receipt is not a JSON object".into()))?;

    let target = first_str(obj, &["targetHash", "hash"])
        .ok_or_else(|| ProvenanceError::InvalidReceipt("missing targetHash".into()))?;
    let target_hash = Fingerprint(parse_hash(target, "targetHash")?);

    let mut proof = Vec::new();
    if let Some(steps) = obj.get("proof").and_then(Value::as_array) {
        for step in steps {
            let step = step
                .as_object()
                .ok_or_else(|| {
                    ProvenanceError::InvalidReceipt("proof step is not an object".into())
                })?;
            if let Some(left) = first_str(step, &["left"]) {
                proof.push(ProofStep::Left(parse_hash(left, "proof.left")?));
            } else if let Some(right) = first_str(step, &["right"]) {
                proof.push(ProofStep::Right(parse_hash(right, "proof.right")?));
            } else {
                return Err(ProvenanceError::InvalidReceipt(
                    "proof step without left or right".into(),
                ));
            }
        }
    }

    let merkle_root = match first_str(obj, &["merkleRoot", "merkle_root"]) {
        Some(root) => parse_hash(root, "merkleRoot")?,
        None => fold_path(target_hash.as_bytes(), &proof),
    };

    let fallback_time =
        first_value(obj, &["blockTime", "anchoredOn", "created"]).and_then(parse_time);

    let raw_anchors: Vec<&Map<String, Value>> = match first_value(obj, &["anchors", "anchor"]) {
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_object).collect(),
        Some(Value::Object(single)) => vec![single],
        _ => Vec::new(),
    };

    let mut anchors = Vec::new();
    for raw in raw_anchors {
        if let Some(anchor) = parse_anchor(raw, fallback_time)? {
            anchors.push(anchor);
        }
    }

    if anchors.is_empty() {
        if let Some(tx_id) = first_str(obj, &["txid", "txId"]) {
            if let Some(confirmed_at) = fallback_time {
                anchors.push(AnchorPoint {
                    network: DEFAULT_NETWORK.to_string(),
                    tx_id: tx_id.to_ascii_lowercase(),
                    block_height: None,
                    confirmed_at,
                    op_return: None,
                });
            }
        }
    }

    Ok(AnchorReceipt {
        target_hash,
        proof,
        merkle_root,
        anchors,
        proof_id: first_str(obj, &["id", "proof_id", "proofId"]).map(str::to_string),
        link: first_str(obj, &["receiptUrl", "url"]).map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{hash_pair, sha256};
    use serde_json::json;

    fn two_leaf_receipt() -> (Fingerprint, AnchorReceipt) {
        let fp = Fingerprint(sha256(b"Principle-VII v1.0"));
        let sibling = sha256(b"other");
        let root = hash_pair(&fp.0, &sibling);
        let receipt = AnchorReceipt {
            target_hash: fp,
            proof: vec![ProofStep::Right(sibling)],
            merkle_root: root,
            anchors: vec![AnchorPoint {
                network: "bitcoin-mainnet".into(),
                tx_id: "ab".repeat(32),
                block_height: Some(880_000),
                confirmed_at: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
                op_return: Some(hex::encode(root)),
            }],
            proof_id: None,
            link: None,
        };
        (fp, receipt)
    }

    #[test]
    fn test_valid_receipt_returns_anchor_time() {
        let (fp, receipt) = two_leaf_receipt();
        let at = verify_receipt(&receipt, &fp).unwrap();
        assert_eq!(at, Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_wrong_target_is_tampered() {
        let (_, receipt) = two_leaf_receipt();
        assert!(matches!(
            verify_receipt(&receipt, &Fingerprint([0u8; 32])),
            Err(ProvenanceError::TamperedAnchor(_))
        ));
    }

    #[test]
    fn test_mutated_sibling_is_tampered() {
        let (fp, mut receipt) = two_leaf_receipt();
        receipt.proof = vec![ProofStep::Right(sha256(b"forged"))];
        assert!(matches!(
            verify_receipt(&receipt, &fp),
            Err(ProvenanceError::TamperedAnchor(_))
        ));
    }

    #[test]
    fn test_swapped_side_is_tampered() {
        let (fp, mut receipt) = two_leaf_receipt();
        if let ProofStep::Right(h) = receipt.proof[0] {
            receipt.proof[0] = ProofStep::Left(h);
        }
        assert!(verify_receipt(&receipt, &fp).is_err());
    }

    #[test]
    fn test_op_return_must_commit_to_root() {
        let (fp, mut receipt) = two_leaf_receipt();
        receipt.anchors[0].op_return = Some("00".repeat(32));
        assert!(matches!(
            verify_receipt(&receipt, &fp),
            Err(ProvenanceError::TamperedAnchor(_))
        ));
    }

    #[test]
    fn test_receipt_without_anchor_is_tampered() {
        let (fp, mut receipt) = two_leaf_receipt();
        receipt.anchors.clear();
        assert!(matches!(
            verify_receipt(&receipt, &fp),
            Err(ProvenanceError::TamperedAnchor(_))
        ));
    }

    #[test]
    fn test_parse_chainpoint_style() {
        let (fp, receipt) = two_leaf_receipt();
        let raw = json!({
            "targetHash": fp.to_hex(),
            "merkleRoot": hex::encode(receipt.merkle_root),
            "proof": [{"right": hex::encode(sha256(b"other"))}],
            "anchors": [{"type": "BTCOpReturn", "sourceId": "AB".repeat(32), "time": "2025-03-01T12:00:00Z"}],
            "id": "c0ffee",
            "receiptUrl": "https://example.org/receipt/c0ffee"
        });
        let parsed = parse_woleet_receipt(&raw).unwrap();
        assert_eq!(parsed.target_hash, fp);
        assert_eq!(parsed.anchors[0].tx_id, "ab".repeat(32));
        assert_eq!(parsed.proof_id.as_deref(), Some("c0ffee"));
        assert_eq!(
            verify_receipt(&parsed, &fp).unwrap(),
            Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_parse_woleet_flat_variant() {
        let fp = Fingerprint(sha256(b"pdf bytes"));
        let raw = json!({
            "hash": fp.to_hex().to_uppercase(),
            "anchor": {"type": "bitcoin", "txid": "CD".repeat(32), "blockHeight": "812345", "timestamp": 1_700_000_000_000i64},
            "proofId": "p-1",
            "url": "https://example.org/p-1"
        });
        let parsed = parse_woleet_receipt(&raw).unwrap();
        assert!(parsed.proof.is_empty());
        assert_eq!(parsed.merkle_root, fp.0);
        assert_eq!(parsed.anchors[0].block_height, Some(812_345));
        assert_eq!(parsed.anchors[0].confirmed_at.timestamp(), 1_700_000_000);
        assert!(verify_receipt(&parsed, &fp).is_ok());
    }

    #[test]
    fn test_parse_top_level_txid_with_block_time() {
        let fp = Fingerprint(sha256(b"doc"));
        let raw = json!({
            "targetHash": fp.to_hex(),
            "txId": "EF".repeat(32),
            "blockTime": "2024-11-05T08:30:00"
        });
        let parsed = parse_woleet_receipt(&raw).unwrap();
        assert_eq!(parsed.anchors.len(), 1);
        assert_eq!(parsed.anchors[0].tx_id, "ef".repeat(32));
    }

    #[test]
    fn test_parse_unanchored_receipt() {
        let fp = Fingerprint(sha256(b"doc"));
        let parsed = parse_woleet_receipt(&json!({"targetHash": fp.to_hex()})).unwrap();
        assert!(parsed.anchors.is_empty());
    }

    #[test]
    fn test_parse_rejects_missing_target() {
        assert!(matches!(
            parse_woleet_receipt(&json!({"anchors": []})),
            Err(ProvenanceError::InvalidReceipt(_))
        ));
        assert!(matches!(
            parse_woleet_receipt(&json!({"targetHash": "zz"})),
            Err(ProvenanceError::InvalidReceipt(_))
        ));
    }
}
