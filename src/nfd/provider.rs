//! The NFD provider: per-transaction dispatch and the full sync
//! orchestrator.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sqlx::MySqlPool;

use crate::algod::NodeClient;
use crate::algod::models::SignedTxnInBlock;
use crate::constants::{COMMUNITY_POINTER_KEYS, IPFS_GATEWAY, MINT_ARG};
use crate::db::community::get_community;
use crate::db::compound;
use crate::db::provider::{
    Provider as ProviderRow, ProviderAddress, get_all_providers_by_type, get_provider,
    get_provider_addresses, delete_provider_address_not_in,
};
use crate::db::store::insert;
use crate::error::{Result, ResultExt, WatcherError};
use crate::providers::{AppIdSet, Provider};

use super::reconcile;
use super::state;

/// Outcome of scanning one top-level transaction. At most one sync per
/// originating transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dispatch {
    /// A flattened txn touched a known NFD application.
    Sync(u64),
    /// A registry mint; the payload is the newly minted NFD app id.
    Mint(u64),
    Skip,
}

/// Scan the transaction and its inner transactions (depth-first, parents
/// first) and decide what, if anything, to synchronize.
pub(crate) fn dispatch(
    stxn: &SignedTxnInBlock,
    known: &AppIdSet,
    registry_app_id: u64,
) -> Dispatch {
    for txn in stxn.flattened() {
        let app_id = txn.txn.application_id;

        if known.contains(app_id) {
            return Dispatch::Sync(app_id);
        }

        let is_mint = txn.txn.is_app_call()
            && app_id == registry_app_id
            && txn.txn.first_app_arg().as_deref() == Some(MINT_ARG);
        if is_mint {
            // The minted NFD is the first application call among the
            // top-level transaction's inner transactions, in order.
            for inner in stxn.inner_txns() {
                if inner.txn.is_app_call() {
                    return Dispatch::Mint(inner.txn.application_id);
                }
            }
        }
    }
    Dispatch::Skip
}

/// Per-app-id async locks serializing concurrent syncs (the ingest loop vs.
/// the fire-and-forget HTTP resync).
#[derive(Debug, Default)]
struct SyncLocks {
    locks: Mutex<HashMap<u64, Arc<tokio::sync::Mutex<()>>>>,
}

impl SyncLocks {
    fn for_app(&self, app_id: u64) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().expect("sync locks poisoned");
        Arc::clone(locks.entry(app_id).or_default())
    }
}

pub struct NfdProvider {
    pool: MySqlPool,
    node: Arc<dyn NodeClient>,
    http: reqwest::Client,
    registry_app_id: u64,
    known_apps: AppIdSet,
    sync_locks: SyncLocks,
}

impl NfdProvider {
    pub fn new(pool: MySqlPool, node: Arc<dyn NodeClient>, registry_app_id: u64) -> Self {
        Self {
            pool,
            node,
            http: reqwest::Client::new(),
            registry_app_id,
            known_apps: AppIdSet::new(),
            sync_locks: SyncLocks::default(),
        }
    }

    /// Resolve a community pointer to document bytes. `ipfs://` pointers are
    /// rewritten to the gateway and fetched; anything else is taken as the
    /// document itself.
    async fn fetch_community_pointer(&self, value: &str) -> Result<Vec<u8>> {
        const OP: &str = "nfd:fetch_community_pointer";

        let Some(cid) = value.strip_prefix("ipfs://") else {
            return Ok(value.as_bytes().to_vec());
        };

        let url = format!("{IPFS_GATEWAY}{cid}");
        let response = self.http.get(&url).send().await.map_err(|e| {
            WatcherError::with_source(crate::error::Kind::Upstream, OP, e)
        })?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| WatcherError::with_source(crate::error::Kind::Upstream, OP, e))?;

        if !status.is_success() || body.is_empty() {
            return Err(WatcherError::upstream(
                OP,
                format!("ipfs request failed: {status}"),
            ));
        }
        Ok(body.to_vec())
    }

    /// Full synchronization of one NFD: materialize on-chain state, apply
    /// the community document, reconcile verified addresses and record the
    /// provider row, all inside a single transaction.
    pub async fn sync_nfd_by_app_id(&self, app_id: u64, round: u64) -> Result<()> {
        const OP: &str = "nfd:sync_nfd_by_app_id";

        let app_lock = self.sync_locks.for_app(app_id);
        let _guard = app_lock.lock().await;

        tracing::info!(app_id, round, "syncing NFD");

        let is_new = match get_provider(&self.pool, app_id).await {
            Ok(_) => false,
            Err(e) if e.is_not_found() => true,
            Err(e) => return Err(e.op(OP)),
        };

        let properties = state::get_nfd_data(self.node.as_ref(), app_id).await.op(OP)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| WatcherError::database(OP, e))?;

        let mut known_addresses: HashMap<String, ProviderAddress> = HashMap::new();
        if !is_new {
            match get_provider_addresses(&self.pool, app_id).await {
                Ok(rows) => {
                    for row in rows {
                        known_addresses.insert(row.address.clone(), row);
                    }
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.op(OP)),
            }
        }

        let mut community_set = false;
        for key in COMMUNITY_POINTER_KEYS {
            if let Some(value) = properties.user_defined.get(key) {
                community_set = true;
                let data = self.fetch_community_pointer(value).await.op(OP)?;
                reconcile::process_community(&self.pool, &mut tx, app_id, &data)
                    .await
                    .op(OP)?;
            }
        }

        let mut seen_addresses: Vec<String> = Vec::new();
        if let Some(value) = properties.verified.get("caAlgo") {
            for address in value.split(',') {
                if address.is_empty() || seen_addresses.iter().any(|a| a == address) {
                    continue;
                }
                seen_addresses.push(address.to_string());
                if !known_addresses.contains_key(address) {
                    let row = ProviderAddress {
                        id: app_id,
                        address: address.to_string(),
                    };
                    insert(&mut *tx, &row).await.op(OP)?;
                }
            }
        }
        delete_provider_address_not_in(&mut *tx, app_id, &seen_addresses)
            .await
            .op(OP)?;

        if !community_set {
            match get_community(&self.pool, app_id).await {
                Ok(_) => compound::delete_community(&mut tx, app_id).await.op(OP)?,
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.op(OP)),
            }
        }

        if is_new {
            let row = ProviderRow {
                id: app_id,
                kind: self.kind().to_string(),
                round,
            };
            insert(&mut *tx, &row).await.op(OP)?;
        }

        tx.commit()
            .await
            .map_err(|e| WatcherError::database(OP, e))?;

        tracing::info!(app_id, "sync committed");
        Ok(())
    }
}

#[async_trait]
impl Provider for NfdProvider {
    fn kind(&self) -> &'static str {
        "nfd"
    }

    async fn init(&self) -> Result<()> {
        const OP: &str = "nfd:init";

        let providers = match get_all_providers_by_type(&self.pool, self.kind()).await {
            Ok(rows) => rows,
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => return Err(e.op(OP)),
        };
        for provider in providers {
            self.known_apps.insert(provider.id);
        }
        tracing::info!(count = self.known_apps.len(), "seeded known NFD apps");
        Ok(())
    }

    async fn process(&self, stxn: &SignedTxnInBlock, round: u64) -> Result<()> {
        match dispatch(stxn, &self.known_apps, self.registry_app_id) {
            Dispatch::Sync(app_id) => self.sync_nfd_by_app_id(app_id, round).await,
            Dispatch::Mint(app_id) => {
                self.known_apps.insert(app_id);
                self.sync_nfd_by_app_id(app_id, round).await
            }
            Dispatch::Skip => Ok(()),
        }
    }

    async fn sync(&self, app_id: u64, round: u64) -> Result<()> {
        self.sync_nfd_by_app_id(app_id, round).await
    }
}

#[cfg(test)]
mod tests {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD as B64;

    use super::*;
    use crate::algod::models::{ApplyData, Transaction};
    use crate::constants::{NFD_MAINNET_REGISTRY_APP_ID, TXN_TYPE_APPL};

    fn app_call(app_id: u64, args: &[&[u8]]) -> Transaction {
        Transaction {
            txn_type: TXN_TYPE_APPL.to_string(),
            application_id: app_id,
            application_args: args.iter().map(|a| B64.encode(a)).collect(),
        }
    }

    fn wrap(txn: Transaction, inner: Vec<SignedTxnInBlock>) -> SignedTxnInBlock {
        SignedTxnInBlock {
            txn,
            apply_data: (!inner.is_empty()).then_some(ApplyData { inner_txns: inner }),
        }
    }

    fn payment() -> SignedTxnInBlock {
        wrap(
            Transaction {
                txn_type: "pay".to_string(),
                ..Default::default()
            },
            Vec::new(),
        )
    }

    #[test]
    fn test_known_app_dispatches_sync() {
        let known = AppIdSet::new();
        known.insert(1000001);

        let stxn = wrap(app_call(1000001, &[]), Vec::new());
        assert_eq!(
            dispatch(&stxn, &known, NFD_MAINNET_REGISTRY_APP_ID),
            Dispatch::Sync(1000001)
        );
    }

    #[test]
    fn test_mint_takes_first_inner_app_call() {
        // Registry mint whose inner txns are [payment, app-call A, app-call B]:
        // the minted NFD is A.
        let known = AppIdSet::new();
        let stxn = wrap(
            app_call(NFD_MAINNET_REGISTRY_APP_ID, &[MINT_ARG]),
            vec![
                payment(),
                wrap(app_call(1000001, &[]), Vec::new()),
                wrap(app_call(1000002, &[]), Vec::new()),
            ],
        );
        assert_eq!(
            dispatch(&stxn, &known, NFD_MAINNET_REGISTRY_APP_ID),
            Dispatch::Mint(1000001)
        );
    }

    #[test]
    fn test_registry_call_without_mint_arg_is_skipped() {
        let known = AppIdSet::new();
        let stxn = wrap(
            app_call(NFD_MAINNET_REGISTRY_APP_ID, &[b"renew"]),
            vec![wrap(app_call(1000001, &[]), Vec::new())],
        );
        assert_eq!(
            dispatch(&stxn, &known, NFD_MAINNET_REGISTRY_APP_ID),
            Dispatch::Skip
        );
    }

    #[test]
    fn test_known_inner_txn_triggers_sync() {
        // The known app is touched by an inner transaction of an unrelated
        // outer call.
        let known = AppIdSet::new();
        known.insert(1000001);

        let stxn = wrap(
            app_call(555, &[]),
            vec![wrap(app_call(1000001, &[]), Vec::new())],
        );
        assert_eq!(
            dispatch(&stxn, &known, NFD_MAINNET_REGISTRY_APP_ID),
            Dispatch::Sync(1000001)
        );
    }

    #[test]
    fn test_at_most_one_action_per_top_level_txn() {
        // Two known apps in one bundle: the first flattened hit wins.
        let known = AppIdSet::new();
        known.insert(1000001);
        known.insert(1000002);

        let stxn = wrap(
            app_call(1000001, &[]),
            vec![wrap(app_call(1000002, &[]), Vec::new())],
        );
        assert_eq!(
            dispatch(&stxn, &known, NFD_MAINNET_REGISTRY_APP_ID),
            Dispatch::Sync(1000001)
        );
    }

    #[test]
    fn test_mint_without_inner_app_call_is_skipped() {
        let known = AppIdSet::new();
        let stxn = wrap(
            app_call(NFD_MAINNET_REGISTRY_APP_ID, &[MINT_ARG]),
            vec![payment()],
        );
        assert_eq!(
            dispatch(&stxn, &known, NFD_MAINNET_REGISTRY_APP_ID),
            Dispatch::Skip
        );
    }

    #[test]
    fn test_non_app_transactions_are_skipped() {
        let known = AppIdSet::new();
        assert_eq!(
            dispatch(&payment(), &known, NFD_MAINNET_REGISTRY_APP_ID),
            Dispatch::Skip
        );
    }
}
