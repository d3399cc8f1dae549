//! NFD state materialization.
//!
//! Reads an application's global state and box storage and folds both into a
//! structured property bag with internal (`i.`), user-defined (`u.`) and
//! verified (`v.`) sections. Values arrive TEAL-encoded: packed address
//! arrays, single 32-byte addresses, big-endian u64s or plain strings.

use std::collections::BTreeMap;

use crate::algod::NodeClient;
use crate::algod::address::{PUBLIC_KEY_LEN, encode_address, is_zero};
use crate::algod::models::{TEAL_TYPE_BYTES, TEAL_TYPE_UINT, TealKeyValue};
use crate::error::{Result, ResultExt, WatcherError};

/// The materialized on-chain properties of one NFD.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct NfdProperties {
    #[serde(rename = "appID")]
    pub app_id: u64,
    pub internal: BTreeMap<String, String>,
    #[serde(rename = "userDefined")]
    pub user_defined: BTreeMap<String, String>,
    pub verified: BTreeMap<String, String>,
}

/// Fetch and decode the full on-chain state of an NFD.
pub async fn get_nfd_data(client: &dyn NodeClient, app_id: u64) -> Result<NfdProperties> {
    const OP: &str = "nfd:get_nfd_data";

    let state = client.get_application_state(app_id).await.op(OP)?;
    let boxes = get_application_boxes(client, app_id).await.op(OP)?;

    let mut properties = decode_state(&state, &boxes);
    properties.app_id = app_id;
    properties.user_defined = merge_split_values(&properties.user_defined);
    Ok(properties)
}

/// Fetch every box of an application, bodies in parallel. Errors collapse to
/// the first one encountered.
pub async fn get_application_boxes(
    client: &dyn NodeClient,
    app_id: u64,
) -> Result<BTreeMap<Vec<u8>, Vec<u8>>> {
    const OP: &str = "nfd:get_application_boxes";

    let names = client.get_application_boxes(app_id).await.op(OP)?;
    let fetches = names.into_iter().map(|name| async move {
        let value = client.get_application_box(app_id, &name).await.op(OP)?;
        Ok::<_, WatcherError>((name, value))
    });
    let pairs = futures::future::try_join_all(fetches).await?;
    Ok(pairs.into_iter().collect())
}

/// Decode global state entries plus box contents into an [`NfdProperties`].
///
/// State entries are processed in ascending raw-key-byte order so enumerated
/// keys (`v.caAlgo.0.as`, `v.caAlgo.1.as`, ...) aggregate correctly; the box
/// map iterates in the same order by construction.
pub fn decode_state(
    state: &[TealKeyValue],
    boxes: &BTreeMap<Vec<u8>, Vec<u8>>,
) -> NfdProperties {
    let mut properties = NfdProperties::default();
    let mut algo_addresses: Vec<String> = Vec::new();

    let mut sorted: Vec<&TealKeyValue> = state.iter().collect();
    sorted.sort_by(|a, b| a.key_bytes().cmp(&b.key_bytes()));

    for kv in sorted {
        let key = String::from_utf8_lossy(&kv.key_bytes()).into_owned();
        match kv.value.value_type {
            TEAL_TYPE_BYTES => process_bytes_entry(
                &mut properties,
                &mut algo_addresses,
                key,
                &kv.value.byte_value(),
            ),
            TEAL_TYPE_UINT => route_value(&mut properties, key, kv.value.uint.to_string()),
            _ => {}
        }
    }

    for (name, value) in boxes {
        let key = String::from_utf8_lossy(name).into_owned();
        process_bytes_entry(&mut properties, &mut algo_addresses, key, value);
    }

    if !algo_addresses.is_empty() {
        properties
            .verified
            .insert("caAlgo".to_string(), algo_addresses.join(","));
    }
    properties
}

fn process_bytes_entry(
    properties: &mut NfdProperties,
    algo_addresses: &mut Vec<String>,
    mut key: String,
    value: &[u8],
) {
    let rendered;
    if key.ends_with(".as") {
        // Packed sets of 32-byte addresses (caAlgo.##.as). Collected into a
        // single comma-joined caAlgo entry once everything is processed.
        match addresses_from_packed(value) {
            Ok(addresses) => {
                algo_addresses.extend(addresses);
                return;
            }
            Err(e) => rendered = e.to_string(),
        }
    } else if value.len() == PUBLIC_KEY_LEN && key.ends_with(".a") {
        let mut pk = [0u8; PUBLIC_KEY_LEN];
        pk.copy_from_slice(value);
        rendered = encode_address(&pk);
        key.truncate(key.len() - 2);
    } else if value.len() == 8 && !is_printable(value) {
        rendered = u64::from_be_bytes(value.try_into().unwrap_or_default()).to_string();
    } else {
        rendered = String::from_utf8_lossy(value).into_owned();
    }
    route_value(properties, key, rendered);
}

fn route_value(properties: &mut NfdProperties, key: String, value: String) {
    let Some(stripped) = key.get(2..) else { return };
    let section = match &key[..2] {
        "i." => &mut properties.internal,
        "u." => &mut properties.user_defined,
        "v." => &mut properties.verified,
        _ => return,
    };
    section.insert(stripped.to_string(), value);
}

fn is_printable(bytes: &[u8]) -> bool {
    String::from_utf8_lossy(bytes)
        .chars()
        .all(|c| c == ' ' || (!c.is_control() && !c.is_whitespace()))
}

/// All non-zero big-endian u64s packed into a byte slice.
pub fn u64s_from_packed(data: &[u8]) -> Result<Vec<u64>> {
    const OP: &str = "nfd:u64s_from_packed";

    if data.len() % 8 != 0 {
        return Err(WatcherError::invalid_argument(
            OP,
            format!("data length {} is not a multiple of 8", data.len()),
        ));
    }
    Ok(data
        .chunks_exact(8)
        .map(|chunk| u64::from_be_bytes(chunk.try_into().unwrap()))
        .filter(|&v| v != 0)
        .collect())
}

/// All non-zero 32-byte public keys packed into a byte slice, encoded as
/// address strings in packing order.
pub fn addresses_from_packed(data: &[u8]) -> Result<Vec<String>> {
    const OP: &str = "nfd:addresses_from_packed";

    if data.len() % PUBLIC_KEY_LEN != 0 {
        return Err(WatcherError::invalid_argument(
            OP,
            format!("data length {} is not a multiple of 32", data.len()),
        ));
    }
    Ok(data
        .chunks_exact(PUBLIC_KEY_LEN)
        .filter(|chunk| !is_zero(chunk))
        .map(|chunk| {
            let mut pk = [0u8; PUBLIC_KEY_LEN];
            pk.copy_from_slice(chunk);
            encode_address(&pk)
        })
        .collect())
}

/// Read a single key from state as a big-endian u64.
pub fn u64_from_state(state: &[TealKeyValue], key: &str) -> Option<u64> {
    state
        .iter()
        .find(|kv| kv.key_bytes() == key.as_bytes())
        .filter(|kv| kv.value.value_type == TEAL_TYPE_BYTES)
        .map(|kv| {
            let bytes = kv.value.byte_value();
            u64::from_be_bytes(bytes.as_slice().try_into().unwrap_or_default())
        })
}

/// Read a single key from state as a packed set of u64s. `None` when the key
/// is absent or not byte-typed.
pub fn u64s_from_state(state: &[TealKeyValue], key: &str) -> Result<Option<Vec<u64>>> {
    match state.iter().find(|kv| kv.key_bytes() == key.as_bytes()) {
        Some(kv) if kv.value.value_type == TEAL_TYPE_BYTES => {
            u64s_from_packed(&kv.value.byte_value()).map(Some)
        }
        _ => Ok(None),
    }
}

/// Reassemble split user-defined values.
///
/// Keys like `address_00`, `address_01` carry fragments of a single logical
/// value; they are concatenated in ascending suffix order under the base key.
/// Everything else passes through untouched.
pub fn merge_split_values(properties: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut merged: BTreeMap<String, String> = BTreeMap::new();

    for (key, value) in properties {
        let bytes = key.as_bytes();
        let base = if bytes.len() > 3
            && bytes[bytes.len() - 3] == b'_'
            && bytes[bytes.len() - 2].is_ascii_digit()
            && bytes[bytes.len() - 1].is_ascii_digit()
        {
            &key[..key.len() - 3]
        } else {
            key.as_str()
        };

        merged
            .entry(base.to_string())
            .and_modify(|existing| existing.push_str(value))
            .or_insert_with(|| value.clone());
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD as B64;
    use rstest::rstest;

    use crate::algod::models::TealValue;

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

    fn uint_kv(key: &str, value: u64) -> TealKeyValue {
        TealKeyValue {
            key: B64.encode(key),
            value: TealValue {
                value_type: TEAL_TYPE_UINT,
                bytes: String::new(),
                uint: value,
            },
        }
    }

    fn pk(fill: u8) -> [u8; 32] {
        [fill; 32]
    }

    #[test]
    fn test_prefix_routing_and_strip() {
        let state = vec![
            bytes_kv("i.name", b"silvio.algo"),
            bytes_kv("u.website", b"https://example.com"),
            bytes_kv("v.twitter", b"@algorand"),
            bytes_kv("x.ignored", b"dropped"),
        ];
        let props = decode_state(&state, &BTreeMap::new());
        assert_eq!(props.internal["name"], "silvio.algo");
        assert_eq!(props.user_defined["website"], "https://example.com");
        assert_eq!(props.verified["twitter"], "@algorand");
        assert!(props.internal.len() == 1 && props.user_defined.len() == 1);
    }

    #[test]
    fn test_address_suffix_is_decoded_and_stripped() {
        let owner = pk(7);
        let state = vec![bytes_kv("i.owner.a", &owner)];
        let props = decode_state(&state, &BTreeMap::new());
        assert_eq!(props.internal["owner"], encode_address(&owner));
        assert!(!props.internal.contains_key("owner.a"));
    }

    #[test]
    fn test_eight_nonprintable_bytes_become_decimal() {
        let state = vec![
            bytes_kv("i.ver", &42u64.to_be_bytes()),
            bytes_kv("u.word", b"verbatim"),
            uint_kv("i.count", 9),
        ];
        let props = decode_state(&state, &BTreeMap::new());
        assert_eq!(props.internal["ver"], "42");
        assert_eq!(props.user_defined["word"], "verbatim");
        assert_eq!(props.internal["count"], "9");
    }

    #[test]
    fn test_eight_printable_bytes_stay_verbatim() {
        let state = vec![bytes_kv("u.tag", b"12345678")];
        let props = decode_state(&state, &BTreeMap::new());
        assert_eq!(props.user_defined["tag"], "12345678");
    }

    #[test]
    fn test_ca_algo_aggregates_in_ascending_key_order() {
        let (a, b, c) = (pk(1), pk(2), pk(3));
        let mut packed_01 = Vec::new();
        packed_01.extend_from_slice(&a);
        packed_01.extend_from_slice(&[0u8; 32]); // zero entries are skipped
        packed_01.extend_from_slice(&b);

        // Delivered out of order; decoding must sort by raw key bytes.
        let state = vec![
            bytes_kv("v.caAlgo.1.as", &c),
            bytes_kv("v.caAlgo.0.as", &packed_01),
        ];
        let props = decode_state(&state, &BTreeMap::new());
        let expected = [a, b, c].iter().map(encode_address).collect::<Vec<_>>();
        assert_eq!(props.verified["caAlgo"], expected.join(","));
        assert!(!props.verified.contains_key("caAlgo.0.as"));
    }

    #[test]
    fn test_box_values_processed_like_state_bytes() {
        let mut boxes = BTreeMap::new();
        boxes.insert(b"u.bio".to_vec(), b"box-backed bio".to_vec());
        let props = decode_state(&[], &boxes);
        assert_eq!(props.user_defined["bio"], "box-backed bio");
    }

    #[test]
    fn test_merge_split_values_concatenates_in_suffix_order() {
        let mut input = BTreeMap::new();
        input.insert("avatar_01".to_string(), "second".to_string());
        input.insert("avatar_00".to_string(), "first-".to_string());
        input.insert("plain".to_string(), "kept".to_string());

        let merged = merge_split_values(&input);
        assert_eq!(merged["avatar"], "first-second");
        assert_eq!(merged["plain"], "kept");
        assert!(!merged.contains_key("avatar_00"));
    }

    #[rstest]
    #[case("_00", "_00")] // exactly 3 bytes, no base to strip
    #[case("key_0x", "key_0x")] // non-digit suffix passes through
    #[case("key_000", "key_000")] // underscore must sit third from the end
    #[case("a_00", "a")] // single-char base still merges
    fn test_merge_suffix_edge_cases(#[case] key: &str, #[case] expected: &str) {
        let mut input = BTreeMap::new();
        input.insert(key.to_string(), "v".to_string());
        let merged = merge_split_values(&input);
        assert_eq!(merged[expected], "v");
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn test_u64s_from_packed() {
        let mut data = Vec::new();
        data.extend_from_slice(&5u64.to_be_bytes());
        data.extend_from_slice(&0u64.to_be_bytes());
        data.extend_from_slice(&9u64.to_be_bytes());
        assert_eq!(u64s_from_packed(&data).unwrap(), vec![5, 9]);
        assert!(u64s_from_packed(&data[..7]).is_err());
    }

    #[test]
    fn test_u64_from_state() {
        let state = vec![bytes_kv("i.appid", &1000001u64.to_be_bytes())];
        assert_eq!(u64_from_state(&state, "i.appid"), Some(1000001));
        assert_eq!(u64_from_state(&state, "i.other"), None);
    }
}
