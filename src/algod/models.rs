//! Wire models for algod responses and block payloads.
//!
//! Blocks are fetched in the node's JSON rendering of the block msgpack,
//! which uses the short canonical field names (`rnd`, `gh`, `txns`, `apid`,
//! `apaa`, `dt`/`itx`). Byte fields arrive base64-encoded.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use data_encoding::BASE32_NOPAD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512_256};

use crate::constants::TXN_TYPE_APPL;

// ============================================================================
// Application state
// ============================================================================

/// TEAL value type tag for byte slices.
pub const TEAL_TYPE_BYTES: u64 = 1;
/// TEAL value type tag for uints.
pub const TEAL_TYPE_UINT: u64 = 2;

/// A single TEAL value from global or local application state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TealValue {
    #[serde(rename = "type", default)]
    pub value_type: u64,
    #[serde(default)]
    pub bytes: String,
    #[serde(default)]
    pub uint: u64,
}

impl TealValue {
    /// The decoded byte payload; empty for uint values.
    pub fn byte_value(&self) -> Vec<u8> {
        B64.decode(&self.bytes).unwrap_or_default()
    }
}

/// One application state entry. The key is base64-encoded on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TealKeyValue {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: TealValue,
}

impl TealKeyValue {
    /// The raw decoded key bytes. State ordering is defined over these.
    pub fn key_bytes(&self) -> Vec<u8> {
        B64.decode(&self.key).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApplicationParams {
    #[serde(rename = "global-state", default)]
    pub global_state: Vec<TealKeyValue>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Application {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub params: ApplicationParams,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BoxDescriptor {
    /// Base64-encoded box name.
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BoxesResponse {
    #[serde(default)]
    pub boxes: Vec<BoxDescriptor>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BoxValue {
    #[serde(default)]
    pub name: String,
    /// Base64-encoded box contents.
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppLocalState {
    #[serde(rename = "key-value", default)]
    pub key_value: Vec<TealKeyValue>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccountApplicationResponse {
    #[serde(rename = "app-local-state", default)]
    pub app_local_state: Option<AppLocalState>,
}

// ============================================================================
// Blocks and transactions
// ============================================================================

/// A transaction as it appears in the block payset. Only the fields the
/// dispatcher inspects are modeled; everything else is ignored on decode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub txn_type: String,
    #[serde(rename = "apid", default, skip_serializing_if = "is_zero")]
    pub application_id: u64,
    /// Application arguments, base64-encoded.
    #[serde(rename = "apaa", default, skip_serializing_if = "Vec::is_empty")]
    pub application_args: Vec<String>,
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}

impl Transaction {
    pub fn is_app_call(&self) -> bool {
        self.txn_type == TXN_TYPE_APPL
    }

    /// The first application argument, decoded.
    pub fn first_app_arg(&self) -> Option<Vec<u8>> {
        self.application_args
            .first()
            .map(|arg| B64.decode(arg).unwrap_or_default())
    }
}

/// Apply data attached to a transaction; carries the inner transactions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplyData {
    #[serde(rename = "itx", default, skip_serializing_if = "Vec::is_empty")]
    pub inner_txns: Vec<SignedTxnInBlock>,
}

/// A signed transaction in a block together with its apply data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignedTxnInBlock {
    #[serde(default)]
    pub txn: Transaction,
    #[serde(rename = "dt", default, skip_serializing_if = "Option::is_none")]
    pub apply_data: Option<ApplyData>,
}

impl SignedTxnInBlock {
    /// The transaction's direct inner transactions, in order.
    pub fn inner_txns(&self) -> &[SignedTxnInBlock] {
        self.apply_data
            .as_ref()
            .map(|dt| dt.inner_txns.as_slice())
            .unwrap_or(&[])
    }

    /// This transaction followed by every inner transaction, depth-first,
    /// parents before children.
    pub fn flattened(&self) -> Vec<&SignedTxnInBlock> {
        let mut out = vec![self];
        self.collect_inner(&mut out);
        out
    }

    fn collect_inner<'a>(&'a self, out: &mut Vec<&'a SignedTxnInBlock>) {
        for inner in self.inner_txns() {
            out.push(inner);
            inner.collect_inner(out);
        }
    }
}

/// The subset of the block we consume.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Block {
    #[serde(rename = "rnd", default)]
    pub round: u64,
    /// Base64-encoded genesis hash.
    #[serde(rename = "gh", default)]
    pub genesis_hash: String,
    #[serde(rename = "ts", default)]
    pub timestamp: u64,
    #[serde(rename = "txns", default)]
    pub payset: Vec<SignedTxnInBlock>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BlockResponse {
    #[serde(default)]
    pub block: Block,
}

/// Deterministic transaction id used for log attribution.
///
/// SHA-512/256 over a `"TX"` domain tag, the decoded genesis hash, the round
/// and the canonical JSON of the transaction body, rendered in unpadded
/// base32 like native transaction ids.
pub fn transaction_id(block: &Block, stxn: &SignedTxnInBlock) -> String {
    let mut hasher = Sha512_256::new();
    hasher.update(b"TX");
    hasher.update(B64.decode(&block.genesis_hash).unwrap_or_default());
    hasher.update(block.round.to_be_bytes());
    if let Ok(body) = serde_json::to_vec(&stxn.txn) {
        hasher.update(&body);
    }
    BASE32_NOPAD.encode(&hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app_call(app_id: u64, inner: Vec<SignedTxnInBlock>) -> SignedTxnInBlock {
        SignedTxnInBlock {
            txn: Transaction {
                txn_type: TXN_TYPE_APPL.to_string(),
                application_id: app_id,
                application_args: Vec::new(),
            },
            apply_data: (!inner.is_empty()).then_some(ApplyData { inner_txns: inner }),
        }
    }

    #[test]
    fn test_flattened_is_depth_first_parent_before_children() {
        let stxn = app_call(
            1,
            vec![
                app_call(2, vec![app_call(3, vec![])]),
                app_call(4, vec![]),
            ],
        );
        let order: Vec<u64> = stxn
            .flattened()
            .iter()
            .map(|t| t.txn.application_id)
            .collect();
        assert_eq!(order, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_block_decoding_short_names() {
        let raw = serde_json::json!({
            "block": {
                "rnd": 100,
                "gh": "SGO1GKSzyE7IEPItTxCByw9x8FmnrCDexi9/cOUJOiI=",
                "ts": 1700000000,
                "txns": [
                    {
                        "txn": {
                            "type": "appl",
                            "apid": 760937186,
                            "apaa": ["bWludA=="]
                        },
                        "dt": {
                            "itx": [
                                { "txn": { "type": "pay" } },
                                { "txn": { "type": "appl", "apid": 1000001 } }
                            ]
                        }
                    }
                ]
            }
        });
        let resp: BlockResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(resp.block.round, 100);
        let stxn = &resp.block.payset[0];
        assert_eq!(stxn.txn.application_id, 760937186);
        assert_eq!(stxn.txn.first_app_arg().unwrap(), b"mint");
        assert_eq!(stxn.inner_txns().len(), 2);
        assert!(stxn.inner_txns()[1].txn.is_app_call());
    }

    #[test]
    fn test_transaction_id_is_deterministic_and_distinct() {
        let block = Block {
            round: 100,
            genesis_hash: "SGO1GKSzyE7IEPItTxCByw9x8FmnrCDexi9/cOUJOiI=".to_string(),
            ..Default::default()
        };
        let a = app_call(1, vec![]);
        let b = app_call(2, vec![]);
        assert_eq!(transaction_id(&block, &a), transaction_id(&block, &a));
        assert_ne!(transaction_id(&block, &a), transaction_id(&block, &b));
        assert_eq!(transaction_id(&block, &a).len(), 52);
    }

    #[test]
    fn test_teal_key_value_decodes() {
        let kv: TealKeyValue = serde_json::from_value(serde_json::json!({
            "key": "dS5uYW1l",
            "value": { "type": 1, "bytes": "aGVsbG8=", "uint": 0 }
        }))
        .unwrap();
        assert_eq!(kv.key_bytes(), b"u.name");
        assert_eq!(kv.value.byte_value(), b"hello");
        assert_eq!(kv.value.value_type, TEAL_TYPE_BYTES);
    }
}
