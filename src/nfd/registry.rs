//! Registry resolution: name ↔ app id and address ↔ app ids.
//!
//! Two paths per query. V2 stores lookups in registry boxes keyed by a
//! SHA-256 of the query; V1 stores them in the local state of a template
//! logic-sig account derived from the registry app id and the query string.
//! V2 is tried first; any failure falls back to V1.

use sha2::{Digest, Sha256};

use crate::algod::NodeClient;
use crate::algod::address::{decode_address, logic_sig_address};
use crate::error::{Result, ResultExt, WatcherError};

use super::state::{u64_from_state, u64s_from_packed, u64s_from_state};

/// V2 name box value: `[asa id u64be || app id u64be]`.
const NAME_BOX_LEN: usize = 16;

/// V1 reverse-address local state spreads app ids over `i.apps0..i.apps15`.
const REV_ADDRESS_KEYS: usize = 16;

/// The lookup template program. Bytes 6..14 hold placeholder bytes that are
/// replaced with the registry app id; a single-value bytecblock follows at
/// the tail (opcode 0x26 0x01) and receives the query string.
const LOOKUP_TEMPLATE: [u8; 47] = [
    0x05, 0x20, 0x01, 0x01, 0x80, 0x08, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06,
    0x07, 0x08, 0x17, 0x35, 0x00, 0x31, 0x18, 0x34, 0x00, 0x12, 0x31, 0x10,
    0x81, 0x06, 0x12, 0x10, 0x31, 0x19, 0x22, 0x12, 0x31, 0x19, 0x81, 0x00,
    0x12, 0x11, 0x10, 0x40, 0x00, 0x01, 0x00, 0x22, 0x43, 0x26, 0x01,
];

const PLACEHOLDER: [u8; 8] = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];

/// The registry box name indexing an NFD name.
pub fn registry_box_name_for_nfd(nfd_name: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"name/");
    hasher.update(nfd_name.as_bytes());
    hasher.finalize().into()
}

/// The registry box name indexing a raw account public key.
pub fn registry_box_name_for_address(pk: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"addr/algo/");
    hasher.update(pk);
    hasher.finalize().into()
}

/// Compose the V1 lookup logic-sig program for a `prefix + lookup` query and
/// return its escrow account address.
fn lookup_lsig_address(prefix: &str, lookup: &str, registry_app_id: u64) -> Result<String> {
    const OP: &str = "nfd:lookup_lsig";

    if LOOKUP_TEMPLATE[6..14] != PLACEHOLDER {
        return Err(WatcherError::invalid_argument(
            OP,
            "lookup template doesn't match expectation",
        ));
    }

    let mut program = LOOKUP_TEMPLATE.to_vec();
    program[6..14].copy_from_slice(&registry_app_id.to_be_bytes());

    let mut query = Vec::with_capacity(prefix.len() + lookup.len());
    query.extend_from_slice(prefix.as_bytes());
    query.extend_from_slice(lookup.as_bytes());
    program.extend_from_slice(&uvarint(query.len() as u64));
    program.extend_from_slice(&query);

    Ok(logic_sig_address(&program))
}

fn uvarint(mut value: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(2);
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
    out
}

/// Resolve an NFD name to its application id.
pub async fn find_app_id_by_name(
    client: &dyn NodeClient,
    registry_app_id: u64,
    nfd_name: &str,
) -> Result<u64> {
    const OP: &str = "nfd:find_app_id_by_name";

    let box_name = registry_box_name_for_nfd(nfd_name);
    match client.get_application_box(registry_app_id, &box_name).await {
        Ok(value) => {
            if value.len() != NAME_BOX_LEN {
                return Err(WatcherError::upstream(
                    OP,
                    format!(
                        "box data is invalid - length:{} but should be {NAME_BOX_LEN} for nfd name:{nfd_name}",
                        value.len()
                    ),
                ));
            }
            Ok(u64::from_be_bytes(value[8..16].try_into().unwrap()))
        }
        Err(_) => {
            // V2 miss, fall back to the V1 logic-sig local state.
            let address = lookup_lsig_address("name/", nfd_name, registry_app_id).op(OP)?;
            let local_state = client
                .get_account_app_local_state(&address, registry_app_id)
                .await
                .op(OP)?;
            match u64_from_state(&local_state, "i.appid") {
                Some(app_id) if app_id != 0 => Ok(app_id),
                _ => Err(WatcherError::not_found(OP, "no NFD found by that name")),
            }
        }
    }
}

/// Resolve a verified address to every NFD application id linked to it.
pub async fn find_app_ids_by_address(
    client: &dyn NodeClient,
    registry_app_id: u64,
    lookup_address: &str,
) -> Result<Vec<u64>> {
    const OP: &str = "nfd:find_app_ids_by_address";

    let pk = decode_address(lookup_address).op(OP)?;

    let box_name = registry_box_name_for_address(&pk);
    let app_ids = match client.get_application_box(registry_app_id, &box_name).await {
        Ok(value) => u64s_from_packed(&value).op(OP)?,
        Err(_) => {
            let address =
                lookup_lsig_address("address/", lookup_address, registry_app_id).op(OP)?;
            let local_state = client
                .get_account_app_local_state(&address, registry_app_id)
                .await
                .op(OP)?;

            let mut collected = Vec::new();
            for idx in 0..REV_ADDRESS_KEYS {
                let key = format!("i.apps{idx}");
                match u64s_from_state(&local_state, &key).op(OP)? {
                    Some(ids) => collected.extend(ids),
                    None => break,
                }
            }
            collected
        }
    };

    if app_ids.is_empty() {
        return Err(WatcherError::not_found(OP, "no NFDs found for this address"));
    }
    Ok(app_ids)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD as B64;

    use super::*;
    use crate::algod::address::encode_address;
    use crate::algod::models::{TEAL_TYPE_BYTES, TealKeyValue, TealValue};

    /// Mock node: one optional box plus optional logic-sig local state.
    /// Counts V1 local-state reads to assert fallback behavior.
    struct MockNode {
        box_value: Option<Vec<u8>>,
        local_state: Vec<TealKeyValue>,
        local_state_reads: Mutex<u32>,
    }

    impl MockNode {
        fn with_box(value: Vec<u8>) -> Self {
            Self {
                box_value: Some(value),
                local_state: Vec::new(),
                local_state_reads: Mutex::new(0),
            }
        }

        fn with_local_state(state: Vec<TealKeyValue>) -> Self {
            Self {
                box_value: None,
                local_state: state,
                local_state_reads: Mutex::new(0),
            }
        }

        fn reads(&self) -> u32 {
            *self.local_state_reads.lock().unwrap()
        }
    }

    #[async_trait]
    impl NodeClient for MockNode {
        async fn get_application_state(&self, _app_id: u64) -> Result<Vec<TealKeyValue>> {
            Ok(Vec::new())
        }

        async fn get_application_boxes(&self, _app_id: u64) -> Result<Vec<Vec<u8>>> {
            Ok(Vec::new())
        }

        async fn get_application_box(&self, _app_id: u64, _name: &[u8]) -> Result<Vec<u8>> {
            self.box_value
                .clone()
                .ok_or_else(|| WatcherError::upstream("mock:get_box", "box not found"))
        }

        async fn get_account_app_local_state(
            &self,
            _address: &str,
            _app_id: u64,
        ) -> Result<Vec<TealKeyValue>> {
            *self.local_state_reads.lock().unwrap() += 1;
            Ok(self.local_state.clone())
        }
    }

    fn bytes_kv(key: &str, value: &[u8]) -> TealKeyValue {
        TealKeyValue {
            key: B64.encode(key),
            value: TealValue {
                value_type: TEAL_TYPE_BYTES,
                bytes: B64.encode(value),
                uint: 0,
            },
        }
    }

    const REGISTRY: u64 = 760937186;

    #[test]
    fn test_box_names_are_sha256_of_tagged_query() {
        let name_box = registry_box_name_for_nfd("patrick.algo");
        assert_eq!(
            name_box.as_slice(),
            Sha256::digest(b"name/patrick.algo").as_slice()
        );

        let pk = [9u8; 32];
        let mut tagged = b"addr/algo/".to_vec();
        tagged.extend_from_slice(&pk);
        assert_eq!(
            registry_box_name_for_address(&pk).as_slice(),
            Sha256::digest(&tagged).as_slice()
        );
    }

    #[test]
    fn test_lookup_lsig_embeds_registry_app_id() {
        let a = lookup_lsig_address("name/", "patrick.algo", REGISTRY).unwrap();
        let b = lookup_lsig_address("name/", "patrick.algo", REGISTRY).unwrap();
        let other_registry = lookup_lsig_address("name/", "patrick.algo", 1).unwrap();
        let other_name = lookup_lsig_address("name/", "other.algo", REGISTRY).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, other_registry);
        assert_ne!(a, other_name);
    }

    #[test]
    fn test_uvarint() {
        assert_eq!(uvarint(0), vec![0x00]);
        assert_eq!(uvarint(17), vec![0x11]);
        assert_eq!(uvarint(300), vec![0xac, 0x02]);
    }

    #[tokio::test]
    async fn test_v2_name_box_parses_second_u64() {
        let mut value = Vec::new();
        value.extend_from_slice(&555u64.to_be_bytes()); // asa id
        value.extend_from_slice(&1000001u64.to_be_bytes()); // app id
        let node = MockNode::with_box(value);

        let app_id = find_app_id_by_name(&node, REGISTRY, "patrick.algo")
            .await
            .unwrap();
        assert_eq!(app_id, 1000001);
        assert_eq!(node.reads(), 0, "V1 must not run on a V2 hit");
    }

    #[tokio::test]
    async fn test_v2_name_box_rejects_bad_length() {
        let node = MockNode::with_box(vec![0u8; 15]);
        assert!(
            find_app_id_by_name(&node, REGISTRY, "patrick.algo")
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_v2_miss_falls_back_to_v1_exactly_once() {
        let node = MockNode::with_local_state(vec![bytes_kv(
            "i.appid",
            &1000002u64.to_be_bytes(),
        )]);

        let app_id = find_app_id_by_name(&node, REGISTRY, "patrick.algo")
            .await
            .unwrap();
        assert_eq!(app_id, 1000002);
        assert_eq!(node.reads(), 1);
    }

    #[tokio::test]
    async fn test_v1_zero_app_id_is_not_found() {
        let node = MockNode::with_local_state(Vec::new());
        let err = find_app_id_by_name(&node, REGISTRY, "ghost.algo")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_address_lookup_v2_packed_values() {
        let mut value = Vec::new();
        value.extend_from_slice(&11u64.to_be_bytes());
        value.extend_from_slice(&0u64.to_be_bytes());
        value.extend_from_slice(&22u64.to_be_bytes());
        let node = MockNode::with_box(value);

        let address = encode_address(&[3u8; 32]);
        let ids = find_app_ids_by_address(&node, REGISTRY, &address)
            .await
            .unwrap();
        assert_eq!(ids, vec![11, 22]);
    }

    #[tokio::test]
    async fn test_address_lookup_v1_stops_at_first_absent_key() {
        let mut apps0 = Vec::new();
        apps0.extend_from_slice(&7u64.to_be_bytes());
        let mut apps1 = Vec::new();
        apps1.extend_from_slice(&8u64.to_be_bytes());
        // i.apps2 is absent, i.apps3 must never be reached.
        let mut apps3 = Vec::new();
        apps3.extend_from_slice(&9u64.to_be_bytes());

        let node = MockNode::with_local_state(vec![
            bytes_kv("i.apps0", &apps0),
            bytes_kv("i.apps1", &apps1),
            bytes_kv("i.apps3", &apps3),
        ]);

        let address = encode_address(&[4u8; 32]);
        let ids = find_app_ids_by_address(&node, REGISTRY, &address)
            .await
            .unwrap();
        assert_eq!(ids, vec![7, 8]);
    }

    #[tokio::test]
    async fn test_address_lookup_rejects_invalid_address() {
        let node = MockNode::with_box(Vec::new());
        assert!(
            find_app_ids_by_address(&node, REGISTRY, "not-an-address")
                .await
                .is_err()
        );
    }
}
