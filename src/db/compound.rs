//! Nested read models over the flat schema, plus the wholesale community
//! cascade delete.
//!
//! Child relations are fetched in parallel and joined through a bounded
//! channel: one tagged message per enabled fetch, drained exactly N times.
//! The schema has no declared foreign keys, so the cascade delete here and
//! the reconciler are the only authorities on referential integrity.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sqlx::{MySqlConnection, MySqlPool};
use tokio::sync::mpsc;

use crate::error::{Result, ResultExt, WatcherError};

use super::collection::{
    self, CollectionAddress, CollectionArtist, CollectionAsset, CollectionExcludedAsset,
    CollectionExtras, CollectionPrefix,
};
use super::community::{
    self, CommunityAssociate, CommunityExtras, CommunityFaq, CommunitySettings, CommunityToken,
    DEFAULT_COMMUNITY_TAB,
};
use super::property;

/// A community with every child relation attached. Shared by the HTTP read
/// model and the community-document parser.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Community {
    #[serde(flatten)]
    pub community: community::Community,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<CommunitySettings>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tokens: Vec<CommunityToken>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub associates: Vec<CommunityAssociate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub collections: Vec<Collection>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub faq: Vec<CommunityFaq>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extras: Vec<CommunityExtras>,
}

/// A collection with its match rules, properties and extras.
///
/// The `*_url`/`*_mime` fields only exist in documents (the on-chain form
/// carries display assets inline); they are never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    #[serde(flatten)]
    pub collection: collection::Collection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banner_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banner_mime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_mime: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prefixes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assets: Vec<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_assets: Vec<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artists: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<Property>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extras: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Property {
    #[serde(flatten)]
    pub property: property::Property,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<PropertyValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyValue {
    #[serde(flatten)]
    pub value: property::PropertyValue,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extras: BTreeMap<String, String>,
}

/// Tagged results drained from the collection fan-out.
enum CollectionFetch {
    Prefixes(Vec<CollectionPrefix>),
    Addresses(Vec<CollectionAddress>),
    Assets(Vec<CollectionAsset>),
    ExcludedAssets(Vec<CollectionExcludedAsset>),
    Artists(Vec<CollectionArtist>),
    Properties(Vec<Property>),
    Extras(Vec<CollectionExtras>),
    Failed(WatcherError),
}

const COLLECTION_FETCHES: usize = 7;

fn child_result<T>(result: Result<Vec<T>>, tag: fn(Vec<T>) -> CollectionFetch) -> CollectionFetch {
    match result {
        Ok(rows) => tag(rows),
        Err(e) if e.is_not_found() => tag(Vec::new()),
        Err(e) => CollectionFetch::Failed(e),
    }
}

/// Assemble every collection of a provider with all children attached.
pub async fn get_collections_by_provider_id(
    pool: &MySqlPool,
    provider_id: u64,
) -> Result<Vec<Collection>> {
    const OP: &str = "compound:get_collections_by_provider_id";

    let base = collection::get_collections_by_provider_id(pool, provider_id)
        .await
        .op(OP)?;
    if base.is_empty() {
        return Err(WatcherError::not_found(OP, "collections not found"));
    }

    let mut collections = Vec::with_capacity(base.len());
    for col in base {
        let mut compound = Collection {
            collection: col,
            ..Default::default()
        };
        fill_collection_children(pool, &mut compound).await.op(OP)?;
        collections.push(compound);
    }
    Ok(collections)
}

/// Fan out the seven child fetches of one collection and join them through a
/// channel sized to the number of pending fetches.
async fn fill_collection_children(pool: &MySqlPool, compound: &mut Collection) -> Result<()> {
    const OP: &str = "compound:fill_collection_children";

    let (tx, mut rx) = mpsc::channel::<CollectionFetch>(COLLECTION_FETCHES);
    let id = compound.collection.id.clone();

    {
        let (pool, id, tx) = (pool.clone(), id.clone(), tx.clone());
        tokio::spawn(async move {
            let result = collection::get_collection_prefixes(&pool, &id).await;
            let _ = tx.send(child_result(result, CollectionFetch::Prefixes)).await;
        });
    }
    {
        let (pool, id, tx) = (pool.clone(), id.clone(), tx.clone());
        tokio::spawn(async move {
            let result = collection::get_collection_addresses(&pool, &id).await;
            let _ = tx.send(child_result(result, CollectionFetch::Addresses)).await;
        });
    }
    {
        let (pool, id, tx) = (pool.clone(), id.clone(), tx.clone());
        tokio::spawn(async move {
            let result = collection::get_collection_assets(&pool, &id).await;
            let _ = tx.send(child_result(result, CollectionFetch::Assets)).await;
        });
    }
    {
        let (pool, id, tx) = (pool.clone(), id.clone(), tx.clone());
        tokio::spawn(async move {
            let result = collection::get_collection_excluded_assets(&pool, &id).await;
            let _ = tx
                .send(child_result(result, CollectionFetch::ExcludedAssets))
                .await;
        });
    }
    {
        let (pool, id, tx) = (pool.clone(), id.clone(), tx.clone());
        tokio::spawn(async move {
            let result = collection::get_collection_artists(&pool, &id).await;
            let _ = tx.send(child_result(result, CollectionFetch::Artists)).await;
        });
    }
    {
        let (pool, id, tx) = (pool.clone(), id.clone(), tx.clone());
        tokio::spawn(async move {
            let result = get_properties(&pool, &id).await;
            let _ = tx
                .send(child_result(result, CollectionFetch::Properties))
                .await;
        });
    }
    {
        let (pool, tx) = (pool.clone(), tx.clone());
        tokio::spawn(async move {
            let result = collection::get_collection_extras(&pool, &id).await;
            let _ = tx.send(child_result(result, CollectionFetch::Extras)).await;
        });
    }
    drop(tx);

    // Drain exactly one message per fetch; every result is collected before
    // the first error is surfaced.
    let mut first_error: Option<WatcherError> = None;
    for _ in 0..COLLECTION_FETCHES {
        let Some(message) = rx.recv().await else { break };
        match message {
            CollectionFetch::Prefixes(rows) => {
                compound.prefixes = rows.into_iter().map(|p| p.prefix).collect();
            }
            CollectionFetch::Addresses(rows) => {
                compound.addresses = rows.into_iter().map(|a| a.address).collect();
            }
            CollectionFetch::Assets(rows) => {
                compound.assets = rows.into_iter().map(|a| a.asa_id).collect();
            }
            CollectionFetch::ExcludedAssets(rows) => {
                compound.excluded_assets = rows.into_iter().map(|a| a.asa_id).collect();
            }
            CollectionFetch::Artists(rows) => {
                compound.artists = rows.into_iter().map(|a| a.address).collect();
            }
            CollectionFetch::Properties(rows) => compound.properties = rows,
            CollectionFetch::Extras(rows) => {
                compound.extras = rows.into_iter().map(|e| (e.key, e.value)).collect();
            }
            CollectionFetch::Failed(e) => {
                first_error.get_or_insert(e.op(OP));
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Assemble a collection's properties with their values and value extras.
pub async fn get_properties(pool: &MySqlPool, collection_id: &str) -> Result<Vec<Property>> {
    const OP: &str = "compound:get_properties";

    let base = property::get_properties(pool, collection_id).await.op(OP)?;

    let mut properties = Vec::with_capacity(base.len());
    for prop in base {
        let values_pool = pool.clone();
        let extras_pool = pool.clone();
        let values_id = prop.id.clone();
        let extras_id = prop.id.clone();

        let values_task =
            tokio::spawn(async move { property::get_property_values(&values_pool, &values_id).await });
        let extras_task = tokio::spawn(async move {
            property::get_property_value_extras(&extras_pool, &extras_id).await
        });

        let values = values_task
            .await
            .map_err(|e| WatcherError::upstream(OP, e.to_string()))?
            .op(OP)?;
        let extras = extras_task
            .await
            .map_err(|e| WatcherError::upstream(OP, e.to_string()))?
            .op(OP)?;

        let values = values
            .into_iter()
            .map(|value| {
                let extras = extras
                    .iter()
                    .filter(|e| e.name == value.name)
                    .map(|e| (e.key.clone(), e.value.clone()))
                    .collect();
                PropertyValue { value, extras }
            })
            .collect();

        properties.push(Property {
            property: prop,
            values,
        });
    }
    Ok(properties)
}

/// Tagged results drained from the community fan-out.
enum CommunityFetch {
    Root(community::Community),
    Settings(CommunitySettings),
    Tokens(Vec<CommunityToken>),
    Associates(Vec<CommunityAssociate>),
    Collections(Vec<Collection>),
    Faq(Vec<CommunityFaq>),
    Extras(Vec<CommunityExtras>),
    Failed(WatcherError),
}

const COMMUNITY_FETCHES: usize = 7;

fn list_result<T>(result: Result<Vec<T>>, tag: fn(Vec<T>) -> CommunityFetch) -> CommunityFetch {
    match result {
        Ok(rows) => tag(rows),
        Err(e) if e.is_not_found() => tag(Vec::new()),
        Err(e) => CommunityFetch::Failed(e),
    }
}

/// The full community subgraph of a provider. Not-found when no community
/// row exists. FAQ reads are paged to the first ten entries.
pub async fn get_community(pool: &MySqlPool, provider_id: u64) -> Result<Community> {
    const OP: &str = "compound:get_community";

    let (tx, mut rx) = mpsc::channel::<CommunityFetch>(COMMUNITY_FETCHES);

    {
        let (pool, tx) = (pool.clone(), tx.clone());
        tokio::spawn(async move {
            let message = match community::get_community(&pool, provider_id).await {
                Ok(row) => CommunityFetch::Root(row),
                Err(e) => CommunityFetch::Failed(e),
            };
            let _ = tx.send(message).await;
        });
    }
    {
        let (pool, tx) = (pool.clone(), tx.clone());
        tokio::spawn(async move {
            let message = match community::get_community_settings(&pool, provider_id).await {
                Ok(row) => CommunityFetch::Settings(row),
                // Missing settings fall back to the default tab.
                Err(_) => CommunityFetch::Settings(CommunitySettings {
                    id: provider_id,
                    default_tab: DEFAULT_COMMUNITY_TAB.to_string(),
                }),
            };
            let _ = tx.send(message).await;
        });
    }
    {
        let (pool, tx) = (pool.clone(), tx.clone());
        tokio::spawn(async move {
            let result = community::get_community_tokens(&pool, provider_id).await;
            let _ = tx.send(list_result(result, CommunityFetch::Tokens)).await;
        });
    }
    {
        let (pool, tx) = (pool.clone(), tx.clone());
        tokio::spawn(async move {
            let result = community::get_community_associates(&pool, provider_id).await;
            let _ = tx
                .send(list_result(result, CommunityFetch::Associates))
                .await;
        });
    }
    {
        let (pool, tx) = (pool.clone(), tx.clone());
        tokio::spawn(async move {
            let result = get_collections_by_provider_id(&pool, provider_id).await;
            let _ = tx
                .send(list_result(result, CommunityFetch::Collections))
                .await;
        });
    }
    {
        let (pool, tx) = (pool.clone(), tx.clone());
        tokio::spawn(async move {
            let result = community::get_community_faq(&pool, provider_id, 0, 10).await;
            let _ = tx.send(list_result(result, CommunityFetch::Faq)).await;
        });
    }
    {
        let (pool, tx) = (pool.clone(), tx.clone());
        tokio::spawn(async move {
            let result = community::get_community_extras(&pool, provider_id).await;
            let _ = tx.send(list_result(result, CommunityFetch::Extras)).await;
        });
    }
    drop(tx);

    let mut community = Community::default();
    let mut first_error: Option<WatcherError> = None;
    let mut root_missing: Option<WatcherError> = None;

    for _ in 0..COMMUNITY_FETCHES {
        let Some(message) = rx.recv().await else { break };
        match message {
            CommunityFetch::Root(row) => community.community = row,
            CommunityFetch::Settings(row) => community.settings = Some(row),
            CommunityFetch::Tokens(rows) => community.tokens = rows,
            CommunityFetch::Associates(rows) => community.associates = rows,
            CommunityFetch::Collections(rows) => community.collections = rows,
            CommunityFetch::Faq(rows) => community.faq = rows,
            CommunityFetch::Extras(rows) => community.extras = rows,
            CommunityFetch::Failed(e) if e.is_not_found() => {
                root_missing.get_or_insert(e.op(OP));
            }
            CommunityFetch::Failed(e) => {
                first_error.get_or_insert(e.op(OP));
            }
        }
    }

    if let Some(e) = root_missing {
        return Err(e);
    }
    if let Some(e) = first_error {
        return Err(e);
    }
    Ok(community)
}

/// Delete a provider's entire community subgraph: the community row, raw
/// JSON, tokens, faq, extras, and every collection with all of its children
/// and properties.
pub async fn delete_community(conn: &mut MySqlConnection, provider_id: u64) -> Result<()> {
    const OP: &str = "compound:delete_community";

    community::delete_community(&mut *conn, provider_id).await.op(OP)?;
    community::delete_community_json(&mut *conn, provider_id).await.op(OP)?;
    community::delete_community_tokens(&mut *conn, provider_id).await.op(OP)?;
    community::delete_community_faq(&mut *conn, provider_id).await.op(OP)?;
    community::delete_community_extras(&mut *conn, provider_id).await.op(OP)?;

    let collections = collection::get_collections_by_provider_id(&mut *conn, provider_id)
        .await
        .op(OP)?;

    for col in &collections {
        collection::delete_collection_prefixes(&mut *conn, &col.id).await.op(OP)?;
        collection::delete_collection_artists(&mut *conn, &col.id).await.op(OP)?;
        collection::delete_collection_assets(&mut *conn, &col.id).await.op(OP)?;
        collection::delete_collection_excluded_assets(&mut *conn, &col.id).await.op(OP)?;
        collection::delete_collection_addresses(&mut *conn, &col.id).await.op(OP)?;
        collection::delete_collection_extras(&mut *conn, &col.id).await.op(OP)?;

        let properties = property::get_properties(&mut *conn, &col.id).await.op(OP)?;
        for prop in &properties {
            property::delete_property_values(&mut *conn, &prop.id).await.op(OP)?;
            property::delete_property_value_extras(&mut *conn, &prop.id).await.op(OP)?;
        }
        property::delete_collection_properties(&mut *conn, &col.id).await.op(OP)?;
    }

    collection::delete_collections_by_provider_id(&mut *conn, provider_id)
        .await
        .op(OP)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_collection() -> Collection {
        Collection {
            collection: collection::Collection {
                id: "col_9m4e2mr0ui3e8a215n4g".to_string(),
                provider_id: 1000001,
                name: "Gems".to_string(),
                description: Some("shiny".to_string()),
                ..Default::default()
            },
            prefixes: vec!["GEM".to_string()],
            assets: vec![42],
            extras: BTreeMap::from([("site".to_string(), "https://gems.example".to_string())]),
            ..Default::default()
        }
    }

    #[test]
    fn test_canonical_serialization_is_deterministic() {
        let a = serde_json::to_string(&sample_collection()).unwrap();
        let b = serde_json::to_string(&sample_collection()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_flattened_collection_fields_inline() {
        let json = serde_json::to_value(sample_collection()).unwrap();
        assert_eq!(json["name"], "Gems");
        assert_eq!(json["id"], "col_9m4e2mr0ui3e8a215n4g");
        assert_eq!(json["prefixes"][0], "GEM");
        // Empty children are omitted entirely.
        assert!(json.get("addresses").is_none());
        assert!(json.get("properties").is_none());
    }

    #[test]
    fn test_document_parse_into_compound_community() {
        let raw = r#"{
            "version": "1.0",
            "tokens": [{"asset_id": 123}],
            "associates": [{"address": "AAAA", "role": "admin"}],
            "collections": [{
                "name": "Gems",
                "prefixes": ["GEM"],
                "properties": [{
                    "name": "Background",
                    "values": [{"name": "Gold", "extras": {"rarity": "rare"}}]
                }],
                "extras": {"site": "https://gems.example"}
            }],
            "faq": [{"q": "what?", "a": "that."}],
            "extras": [{"key": "discord", "value": "https://discord.gg/x"}]
        }"#;
        let doc: Community = serde_json::from_str(raw).unwrap();
        assert_eq!(doc.community.version, "1.0");
        assert_eq!(doc.tokens[0].asset_id, 123);
        assert_eq!(doc.collections[0].collection.name, "Gems");
        assert_eq!(doc.collections[0].properties[0].values[0].extras["rarity"], "rare");
        assert_eq!(doc.faq[0].question, "what?");
        assert_eq!(doc.extras[0].key, "discord");
        // Document collections carry no ids until the reconciler assigns one.
        assert!(doc.collections[0].collection.id.is_empty());
    }
}
