//! Algorand address encoding.
//!
//! An address is a 32-byte ed25519 public key rendered as unpadded base32 of
//! `pk || checksum`, where the checksum is the last 4 bytes of
//! SHA-512/256(pk). Logic-sig escrow accounts hash the program bytes under a
//! `"Program"` domain tag instead.

use data_encoding::BASE32_NOPAD;
use sha2::{Digest, Sha512_256};

use crate::error::{Result, WatcherError};

pub const PUBLIC_KEY_LEN: usize = 32;
const CHECKSUM_LEN: usize = 4;
const ADDRESS_LEN: usize = 58;

/// Encode a raw 32-byte public key as a checksummed address string.
pub fn encode_address(pk: &[u8; PUBLIC_KEY_LEN]) -> String {
    let digest = Sha512_256::digest(pk);
    let mut body = Vec::with_capacity(PUBLIC_KEY_LEN + CHECKSUM_LEN);
    body.extend_from_slice(pk);
    body.extend_from_slice(&digest[digest.len() - CHECKSUM_LEN..]);
    BASE32_NOPAD.encode(&body)
}

/// Decode an address string back to its raw public key, verifying length and
/// checksum.
pub fn decode_address(address: &str) -> Result<[u8; PUBLIC_KEY_LEN]> {
    const OP: &str = "algod:decode_address";

    if address.len() != ADDRESS_LEN {
        return Err(WatcherError::invalid_argument(
            OP,
            format!("address length {} != {ADDRESS_LEN}", address.len()),
        ));
    }
    let body = BASE32_NOPAD
        .decode(address.as_bytes())
        .map_err(|e| WatcherError::invalid_argument(OP, e.to_string()))?;
    if body.len() != PUBLIC_KEY_LEN + CHECKSUM_LEN {
        return Err(WatcherError::invalid_argument(
            OP,
            format!("decoded length {} is not {}", body.len(), PUBLIC_KEY_LEN + CHECKSUM_LEN),
        ));
    }

    let mut pk = [0u8; PUBLIC_KEY_LEN];
    pk.copy_from_slice(&body[..PUBLIC_KEY_LEN]);
    let digest = Sha512_256::digest(pk);
    if body[PUBLIC_KEY_LEN..] != digest[digest.len() - CHECKSUM_LEN..] {
        return Err(WatcherError::invalid_argument(OP, "checksum mismatch"));
    }
    Ok(pk)
}

/// Whether the raw public key is the all-zero sentinel.
pub fn is_zero(pk: &[u8]) -> bool {
    pk.iter().all(|&b| b == 0)
}

/// The escrow account address of a TEAL program.
pub fn logic_sig_address(program: &[u8]) -> String {
    let mut hasher = Sha512_256::new();
    hasher.update(b"Program");
    hasher.update(program);
    let digest = hasher.finalize();
    let mut pk = [0u8; PUBLIC_KEY_LEN];
    pk.copy_from_slice(&digest);
    encode_address(&pk)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The protocol's well-known zero address.
    const ZERO_ADDRESS: &str =
        "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAY5HFKQ";

    #[test]
    fn test_zero_address_round_trip() {
        let pk = [0u8; PUBLIC_KEY_LEN];
        assert_eq!(encode_address(&pk), ZERO_ADDRESS);
        assert_eq!(decode_address(ZERO_ADDRESS).unwrap(), pk);
    }

    #[test]
    fn test_round_trip_arbitrary_key() {
        let mut pk = [0u8; PUBLIC_KEY_LEN];
        for (i, b) in pk.iter_mut().enumerate() {
            *b = i as u8;
        }
        let encoded = encode_address(&pk);
        assert_eq!(encoded.len(), ADDRESS_LEN);
        assert_eq!(decode_address(&encoded).unwrap(), pk);
    }

    #[test]
    fn test_decode_rejects_corruption() {
        let mut corrupted = ZERO_ADDRESS.to_string();
        corrupted.replace_range(0..1, "B");
        assert!(decode_address(&corrupted).is_err());
        assert!(decode_address("TOOSHORT").is_err());
    }

    #[test]
    fn test_is_zero() {
        assert!(is_zero(&[0u8; 32]));
        assert!(!is_zero(&[1u8; 32]));
    }

    #[test]
    fn test_logic_sig_address_is_stable() {
        let program = [0x05u8, 0x20, 0x01, 0x01, 0x22, 0x43];
        let a = logic_sig_address(&program);
        let b = logic_sig_address(&program);
        assert_eq!(a, b);
        assert_eq!(a.len(), ADDRESS_LEN);
        assert!(decode_address(&a).is_ok());
    }
}
