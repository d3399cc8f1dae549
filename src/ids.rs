//! Prefix-typed entity identifiers.
//!
//! Collections and properties carry opaque ids of the form
//! `<prefix>_<20-char id>` where the id part is a 12-byte value (4-byte
//! big-endian unix seconds, 3-byte machine id, 2-byte pid, 3-byte counter)
//! rendered in lowercase base32-hex. Ids created later in time sort after
//! ids created earlier, which keeps surrogate keys roughly insertion-ordered.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::error::{Result, WatcherError};

/// Entity families that own prefixed ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prefix {
    Collection,
    Property,
}

impl Prefix {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Collection => "col",
            Self::Property => "prp",
        }
    }
}

const ENCODED_LEN: usize = 20;
const ALPHABET: &[u8; 32] = b"0123456789abcdefghijklmnopqrstuv";

static MACHINE_ID: OnceLock<[u8; 3]> = OnceLock::new();
static COUNTER: OnceLock<AtomicU32> = OnceLock::new();

fn machine_id() -> [u8; 3] {
    *MACHINE_ID.get_or_init(|| {
        let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        let digest = Sha256::digest(host.as_bytes());
        [digest[0], digest[1], digest[2]]
    })
}

fn next_count() -> u32 {
    let counter = COUNTER.get_or_init(|| AtomicU32::new(Utc::now().timestamp_subsec_nanos()));
    counter.fetch_add(1, Ordering::Relaxed)
}

fn encode(raw: &[u8; 12]) -> String {
    let mut out = String::with_capacity(ENCODED_LEN);
    let mut acc: u32 = 0;
    let mut bits = 0;
    for &byte in raw {
        acc = (acc << 8) | u32::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(ALPHABET[(acc >> bits) as usize & 0x1f] as char);
        }
    }
    // 96 bits leave a 1-bit tail, padded with zeros like the wire format.
    out.push(ALPHABET[(acc << (5 - bits)) as usize & 0x1f] as char);
    out
}

/// Mint a new id for the given entity family.
pub fn new(prefix: Prefix) -> String {
    let secs = Utc::now().timestamp().max(0) as u32;
    let machine = machine_id();
    let pid = std::process::id() as u16;
    let count = next_count();

    let mut raw = [0u8; 12];
    raw[0..4].copy_from_slice(&secs.to_be_bytes());
    raw[4..7].copy_from_slice(&machine);
    raw[7..9].copy_from_slice(&pid.to_be_bytes());
    raw[9..12].copy_from_slice(&count.to_be_bytes()[1..4]);

    format!("{}_{}", prefix.as_str(), encode(&raw))
}

/// Recover the entity family from an id.
///
/// Splits on `_`, drops the trailing id segment and maps the rest back to a
/// known prefix. Unknown prefixes are an [`crate::error::Kind::InvalidArgument`]
/// error.
pub fn parse_prefix(id: &str) -> Result<Prefix> {
    const OP: &str = "ids:parse_prefix";

    let parts: Vec<&str> = id.split('_').collect();
    if parts.len() < 2 {
        return Err(WatcherError::invalid_argument(
            OP,
            format!("id {id:?} has no prefix"),
        ));
    }
    let prefix = parts[..parts.len() - 1].join("_");
    match prefix.as_str() {
        "col" => Ok(Prefix::Collection),
        "prp" => Ok(Prefix::Property),
        other => Err(WatcherError::invalid_argument(
            OP,
            format!("unknown id prefix {other:?}"),
        )),
    }
}

/// Whether `id` belongs to the given entity family.
pub fn has_prefix(id: &str, prefix: Prefix) -> bool {
    parse_prefix(id).map(|p| p == prefix).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_id_shape() {
        let id = new(Prefix::Collection);
        assert!(id.starts_with("col_"));
        assert_eq!(id.len(), "col_".len() + ENCODED_LEN);
        assert!(
            id["col_".len()..]
                .bytes()
                .all(|b| ALPHABET.contains(&b))
        );
    }

    #[test]
    fn test_ids_are_unique_and_sortable() {
        let a = new(Prefix::Property);
        let b = new(Prefix::Property);
        assert_ne!(a, b);
        // Later mint sorts after the earlier one: same machine/pid, the
        // second either shares the timestamp with a larger counter or has a
        // larger timestamp.
        assert!(a < b);
    }

    #[rstest]
    #[case("col_9m4e2mr0ui3e8a215n4g", Prefix::Collection)]
    #[case("prp_9m4e2mr0ui3e8a215n4g", Prefix::Property)]
    fn test_parse_prefix(#[case] id: &str, #[case] expected: Prefix) {
        assert_eq!(parse_prefix(id).unwrap(), expected);
    }

    #[test]
    fn test_parse_prefix_rejects_unknown() {
        assert!(parse_prefix("usr_9m4e2mr0ui3e8a215n4g").is_err());
        assert!(parse_prefix("nounderscore").is_err());
    }

    #[test]
    fn test_has_prefix() {
        let id = new(Prefix::Collection);
        assert!(has_prefix(&id, Prefix::Collection));
        assert!(!has_prefix(&id, Prefix::Property));
    }

    #[test]
    fn test_encode_is_order_preserving() {
        let lo = [0u8; 12];
        let mut hi = [0u8; 12];
        hi[11] = 1;
        assert!(encode(&lo) < encode(&hi));
        assert_eq!(encode(&lo).len(), ENCODED_LEN);
    }
}
