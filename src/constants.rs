//! Shared constants: well-known application ids, endpoints and state keys.

use std::time::Duration;

/// The NFD registry application on MainNet. Mint transactions are
/// application calls against this app whose first argument is `"mint"`.
pub const NFD_MAINNET_REGISTRY_APP_ID: u64 = 760937186;

/// The NFD registry application on TestNet.
pub const NFD_TESTNET_REGISTRY_APP_ID: u64 = 84366825;

/// Gateway used to resolve `ipfs://` community pointers.
pub const IPFS_GATEWAY: &str = "https://ipfs.algonode.xyz/ipfs/";

/// User-defined NFD keys whose value points at a community document.
pub const COMMUNITY_POINTER_KEYS: [&str; 2] = ["akitacommunity", "project"];

/// First application argument of a registry mint call.
pub const MINT_ARG: &[u8] = b"mint";

/// How long the streamer sleeps before retrying after an upstream error.
pub const STREAM_RETRY_DELAY: Duration = Duration::from_secs(3);

/// Transaction type tag for application calls in the block payset encoding.
pub const TXN_TYPE_APPL: &str = "appl";
