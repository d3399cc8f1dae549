//! Differential reconciliation of a community document into the store.
//!
//! One transaction per NFD. The stored raw JSON short-circuits unchanged
//! documents; a failed parse is recorded as malformed and the sync still
//! succeeds. Every child level applies delete-not-in semantics so the
//! relational shape always equals the last-seen document.

use std::collections::BTreeMap;

use sqlx::{MySqlConnection, MySqlPool};

use crate::db::community::{
    self, CommunityAssociate, CommunityExtras, CommunityFaq, CommunityJson, CommunityToken,
};
use crate::db::compound;
use crate::db::entity::SqlValue;
use crate::db::property::{self, Property, PropertyValue, PropertyValueExtras};
use crate::db::store::{insert, update};
use crate::db::collection::{
    self, CollectionAddress, CollectionArtist, CollectionAsset, CollectionExcludedAsset,
    CollectionExtras, CollectionPrefix,
};
use crate::error::{Result, ResultExt};
use crate::ids;

/// Apply a community document (raw bytes) for one NFD inside the caller's
/// open transaction. Reads run against the pool, writes against `conn`.
pub async fn process_community(
    pool: &MySqlPool,
    conn: &mut MySqlConnection,
    nfd_id: u64,
    data: &[u8],
) -> Result<()> {
    const OP: &str = "nfd:process_community";

    let data_str = String::from_utf8_lossy(data).into_owned();
    let json_row = CommunityJson {
        id: nfd_id,
        data: data_str.clone(),
        malformed: None,
    };

    match community::get_community_json(pool, nfd_id).await {
        Err(e) if e.is_not_found() => {
            insert(&mut *conn, &json_row).await.op(OP)?;
        }
        Err(e) => return Err(e.op(OP)),
        Ok(previous) => {
            // Byte-identical document: nothing can have changed downstream.
            if previous.data == data_str {
                return Ok(());
            }
            update(&mut *conn, &json_row, &[("id", SqlValue::U64(nfd_id))])
                .await
                .op(OP)?;
        }
    }

    let document: compound::Community = match serde_json::from_slice(data) {
        Ok(doc) => doc,
        Err(e) => {
            tracing::warn!(app_id = nfd_id, "community document failed to parse: {e}");
            let malformed = CommunityJson {
                malformed: Some(true),
                ..json_row
            };
            update(&mut *conn, &malformed, &[("id", SqlValue::U64(nfd_id))])
                .await
                .op(OP)?;
            return Ok(());
        }
    };

    let mut root = document.community.clone();
    root.id = nfd_id;
    match community::get_community(pool, nfd_id).await {
        Err(e) if e.is_not_found() => {
            insert(&mut *conn, &root).await.op(OP)?;
        }
        Err(e) => return Err(e.op(OP)),
        Ok(_) => {}
    }

    process_tokens(pool, conn, nfd_id, &document.tokens).await.op(OP)?;
    process_associates(pool, conn, nfd_id, &document.associates).await.op(OP)?;
    process_collections(pool, conn, nfd_id, &document.collections).await.op(OP)?;
    process_faq(conn, nfd_id, &document.faq).await.op(OP)?;
    process_extras(pool, conn, nfd_id, &document.extras).await.op(OP)?;

    Ok(())
}

async fn process_tokens(
    pool: &MySqlPool,
    conn: &mut MySqlConnection,
    nfd_id: u64,
    tokens: &[CommunityToken],
) -> Result<()> {
    const OP: &str = "nfd:process_tokens";

    let existing = match community::get_community_tokens(pool, nfd_id).await {
        Ok(rows) => rows,
        Err(e) if e.is_not_found() => Vec::new(),
        Err(e) => return Err(e.op(OP)),
    };
    let known: BTreeMap<u64, &CommunityToken> =
        existing.iter().map(|t| (t.asset_id, t)).collect();

    let mut seen = Vec::with_capacity(tokens.len());
    for token in tokens {
        seen.push(token.asset_id);
        let row = CommunityToken {
            id: nfd_id,
            ..token.clone()
        };
        if known.contains_key(&token.asset_id) {
            update(
                &mut *conn,
                &row,
                &[
                    ("id", SqlValue::U64(nfd_id)),
                    ("asset_id", SqlValue::U64(token.asset_id)),
                ],
            )
            .await
            .op(OP)?;
        } else {
            insert(&mut *conn, &row).await.op(OP)?;
        }
    }

    community::delete_community_tokens_not_in(&mut *conn, nfd_id, &seen)
        .await
        .op(OP)
        .map(|_| ())
}

async fn process_associates(
    pool: &MySqlPool,
    conn: &mut MySqlConnection,
    nfd_id: u64,
    associates: &[CommunityAssociate],
) -> Result<()> {
    const OP: &str = "nfd:process_associates";

    let existing = match community::get_community_associates(pool, nfd_id).await {
        Ok(rows) => rows,
        Err(e) if e.is_not_found() => Vec::new(),
        Err(e) => return Err(e.op(OP)),
    };
    let known: BTreeMap<&str, &CommunityAssociate> =
        existing.iter().map(|a| (a.address.as_str(), a)).collect();

    let mut seen = Vec::with_capacity(associates.len());
    for associate in associates {
        seen.push(associate.address.clone());
        // Role, confirmation and txn are write-once; no update path.
        if !known.contains_key(associate.address.as_str()) {
            let row = CommunityAssociate {
                id: nfd_id,
                ..associate.clone()
            };
            insert(&mut *conn, &row).await.op(OP)?;
        }
    }

    community::delete_community_associates_not_in(&mut *conn, nfd_id, &seen)
        .await
        .op(OP)
        .map(|_| ())
}

/// Canonical serialization used for the collection equality short-circuit.
/// Field order is fixed by the struct declarations and extras maps are
/// ordered, so equal values always serialize identically.
fn canonical_json(collection: &compound::Collection) -> Result<String> {
    serde_json::to_string(collection)
        .map_err(|e| crate::error::WatcherError::malformed("nfd:canonical_json", e.to_string()))
}

async fn process_collections(
    pool: &MySqlPool,
    conn: &mut MySqlConnection,
    nfd_id: u64,
    collections: &[compound::Collection],
) -> Result<()> {
    const OP: &str = "nfd:process_collections";

    let existing = match compound::get_collections_by_provider_id(pool, nfd_id).await {
        Ok(rows) => rows,
        Err(e) if e.is_not_found() => Vec::new(),
        Err(e) => return Err(e.op(OP)),
    };
    let known: BTreeMap<&str, &compound::Collection> = existing
        .iter()
        .map(|c| (c.collection.name.as_str(), c))
        .collect();

    let mut seen = Vec::with_capacity(collections.len());
    for incoming in collections {
        match known.get(incoming.collection.name.as_str()) {
            Some(pre) => {
                seen.push(pre.collection.id.clone());
                reconcile_matched_collection(conn, pre, incoming).await.op(OP)?;
            }
            None => {
                let id = insert_new_collection(conn, nfd_id, incoming).await.op(OP)?;
                seen.push(id);
            }
        }
    }

    // Children of collections about to fall to the delete-not-in are removed
    // here; the schema has no cascading foreign keys.
    for pre in &existing {
        if !seen.contains(&pre.collection.id) {
            delete_collection_children(conn, pre).await.op(OP)?;
        }
    }

    collection::delete_collection_not_in(&mut *conn, nfd_id, &seen)
        .await
        .op(OP)
        .map(|_| ())
}

async fn reconcile_matched_collection(
    conn: &mut MySqlConnection,
    pre: &compound::Collection,
    incoming: &compound::Collection,
) -> Result<()> {
    const OP: &str = "nfd:reconcile_matched_collection";

    let collection_id = pre.collection.id.clone();

    // Structural equality short-circuit: normalize the incoming document
    // collection with the stored identity, then compare canonical JSON.
    let mut normalized = incoming.clone();
    normalized.collection.id = collection_id.clone();
    normalized.collection.provider_id = pre.collection.provider_id;
    if canonical_json(pre)? == canonical_json(&normalized)? {
        return Ok(());
    }

    update(
        &mut *conn,
        &incoming.collection,
        &[("id", SqlValue::Str(collection_id.clone()))],
    )
    .await
    .op(OP)?;

    // Prefixes.
    let mut seen = Vec::with_capacity(incoming.prefixes.len());
    for prefix in &incoming.prefixes {
        seen.push(prefix.clone());
        if !pre.prefixes.contains(prefix) {
            let row = CollectionPrefix {
                id: collection_id.clone(),
                prefix: prefix.clone(),
            };
            insert(&mut *conn, &row).await.op(OP)?;
        }
    }
    collection::delete_collection_prefixes_not_in(&mut *conn, &collection_id, &seen)
        .await
        .op(OP)?;

    // Addresses.
    let mut seen = Vec::with_capacity(incoming.addresses.len());
    for address in &incoming.addresses {
        seen.push(address.clone());
        if !pre.addresses.contains(address) {
            let row = CollectionAddress {
                id: collection_id.clone(),
                address: address.clone(),
            };
            insert(&mut *conn, &row).await.op(OP)?;
        }
    }
    collection::delete_collection_addresses_not_in(&mut *conn, &collection_id, &seen)
        .await
        .op(OP)?;

    // Assets.
    let mut seen = Vec::with_capacity(incoming.assets.len());
    for &asset in &incoming.assets {
        seen.push(asset);
        if !pre.assets.contains(&asset) {
            let row = CollectionAsset {
                id: collection_id.clone(),
                asa_id: asset,
            };
            insert(&mut *conn, &row).await.op(OP)?;
        }
    }
    collection::delete_collection_assets_not_in(&mut *conn, &collection_id, &seen)
        .await
        .op(OP)?;

    // Excluded assets.
    let mut seen = Vec::with_capacity(incoming.excluded_assets.len());
    for &asset in &incoming.excluded_assets {
        seen.push(asset);
        if !pre.excluded_assets.contains(&asset) {
            let row = CollectionExcludedAsset {
                id: collection_id.clone(),
                asa_id: asset,
            };
            insert(&mut *conn, &row).await.op(OP)?;
        }
    }
    collection::delete_collection_excluded_assets_not_in(&mut *conn, &collection_id, &seen)
        .await
        .op(OP)?;

    // Artists.
    let mut seen = Vec::with_capacity(incoming.artists.len());
    for artist in &incoming.artists {
        seen.push(artist.clone());
        if !pre.artists.contains(artist) {
            let row = CollectionArtist {
                id: collection_id.clone(),
                address: artist.clone(),
            };
            insert(&mut *conn, &row).await.op(OP)?;
        }
    }
    collection::delete_collection_artists_not_in(&mut *conn, &collection_id, &seen)
        .await
        .op(OP)?;

    reconcile_properties(conn, pre, incoming).await.op(OP)?;

    // Collection extras.
    let mut seen = Vec::with_capacity(incoming.extras.len());
    for (key, value) in &incoming.extras {
        seen.push(key.clone());
        let row = CollectionExtras {
            id: collection_id.clone(),
            key: key.clone(),
            value: value.clone(),
        };
        if pre.extras.contains_key(key) {
            update(
                &mut *conn,
                &row,
                &[
                    ("id", SqlValue::Str(collection_id.clone())),
                    ("mkey", SqlValue::Str(key.clone())),
                ],
            )
            .await
            .op(OP)?;
        } else {
            insert(&mut *conn, &row).await.op(OP)?;
        }
    }
    collection::delete_collection_extras_not_in(&mut *conn, &collection_id, &seen)
        .await
        .op(OP)?;

    Ok(())
}

async fn reconcile_properties(
    conn: &mut MySqlConnection,
    pre: &compound::Collection,
    incoming: &compound::Collection,
) -> Result<()> {
    const OP: &str = "nfd:reconcile_properties";

    let collection_id = pre.collection.id.clone();
    let known: BTreeMap<&str, &compound::Property> = pre
        .properties
        .iter()
        .map(|p| (p.property.name.as_str(), p))
        .collect();

    let mut seen_ids = Vec::with_capacity(incoming.properties.len());
    for prop in &incoming.properties {
        match known.get(prop.property.name.as_str()) {
            Some(pre_prop) => {
                let property_id = pre_prop.property.id.clone();
                seen_ids.push(property_id.clone());

                let row = Property {
                    id: property_id.clone(),
                    collection_id: pre_prop.property.collection_id.clone(),
                    name: prop.property.name.clone(),
                };
                update(&mut *conn, &row, &[("id", SqlValue::Str(property_id.clone()))])
                    .await
                    .op(OP)?;

                let pre_value_names: Vec<&str> = pre_prop
                    .values
                    .iter()
                    .map(|v| v.value.name.as_str())
                    .collect();

                let mut seen_values = Vec::with_capacity(prop.values.len());
                for value in &prop.values {
                    seen_values.push(value.value.name.clone());
                    let value_row = PropertyValue {
                        id: property_id.clone(),
                        ..value.value.clone()
                    };
                    if pre_value_names.contains(&value.value.name.as_str()) {
                        update(
                            &mut *conn,
                            &value_row,
                            &[
                                ("id", SqlValue::Str(property_id.clone())),
                                ("name", SqlValue::Str(value.value.name.clone())),
                            ],
                        )
                        .await
                        .op(OP)?;
                    } else {
                        insert(&mut *conn, &value_row).await.op(OP)?;
                    }

                    let pre_extra_keys: Vec<&str> = pre_prop
                        .values
                        .iter()
                        .filter(|v| v.value.name == value.value.name)
                        .flat_map(|v| v.extras.keys().map(String::as_str))
                        .collect();

                    let mut seen_extras = Vec::with_capacity(value.extras.len());
                    for (key, extra_value) in &value.extras {
                        seen_extras.push(key.clone());
                        let extra_row = PropertyValueExtras {
                            id: property_id.clone(),
                            name: value.value.name.clone(),
                            key: key.clone(),
                            value: extra_value.clone(),
                        };
                        if pre_extra_keys.contains(&key.as_str()) {
                            update(
                                &mut *conn,
                                &extra_row,
                                &[
                                    ("id", SqlValue::Str(property_id.clone())),
                                    ("name", SqlValue::Str(value.value.name.clone())),
                                    ("mkey", SqlValue::Str(key.clone())),
                                ],
                            )
                            .await
                            .op(OP)?;
                        } else {
                            insert(&mut *conn, &extra_row).await.op(OP)?;
                        }
                    }
                    property::delete_property_value_extras_not_in(
                        &mut *conn,
                        &property_id,
                        &value.value.name,
                        &seen_extras,
                    )
                    .await
                    .op(OP)?;
                }
                property::delete_property_value_not_in(&mut *conn, &property_id, &seen_values)
                    .await
                    .op(OP)?;
            }
            None => {
                let property_id =
                    insert_new_property(conn, &collection_id, prop).await.op(OP)?;
                seen_ids.push(property_id);
            }
        }
    }

    // Disappeared properties lose their values and value extras explicitly
    // before the delete-not-in removes the property rows.
    for pre_prop in &pre.properties {
        if !seen_ids.contains(&pre_prop.property.id) {
            property::delete_property_values(&mut *conn, &pre_prop.property.id)
                .await
                .op(OP)?;
            property::delete_property_value_extras(&mut *conn, &pre_prop.property.id)
                .await
                .op(OP)?;
        }
    }

    property::delete_property_not_in(&mut *conn, &collection_id, &seen_ids)
        .await
        .op(OP)
        .map(|_| ())
}

async fn insert_new_property(
    conn: &mut MySqlConnection,
    collection_id: &str,
    prop: &compound::Property,
) -> Result<String> {
    const OP: &str = "nfd:insert_new_property";

    let property_id = ids::new(ids::Prefix::Property);
    let row = Property {
        id: property_id.clone(),
        collection_id: collection_id.to_string(),
        name: prop.property.name.clone(),
    };
    insert(&mut *conn, &row).await.op(OP)?;

    for value in &prop.values {
        let value_row = PropertyValue {
            id: property_id.clone(),
            ..value.value.clone()
        };
        insert(&mut *conn, &value_row).await.op(OP)?;

        for (key, extra_value) in &value.extras {
            let extra_row = PropertyValueExtras {
                id: property_id.clone(),
                name: value.value.name.clone(),
                key: key.clone(),
                value: extra_value.clone(),
            };
            insert(&mut *conn, &extra_row).await.op(OP)?;
        }
    }
    Ok(property_id)
}

async fn insert_new_collection(
    conn: &mut MySqlConnection,
    nfd_id: u64,
    incoming: &compound::Collection,
) -> Result<String> {
    const OP: &str = "nfd:insert_new_collection";

    let collection_id = ids::new(ids::Prefix::Collection);
    let mut row = incoming.collection.clone();
    row.id = collection_id.clone();
    row.provider_id = nfd_id;
    insert(&mut *conn, &row).await.op(OP)?;

    for prefix in &incoming.prefixes {
        let row = CollectionPrefix {
            id: collection_id.clone(),
            prefix: prefix.clone(),
        };
        insert(&mut *conn, &row).await.op(OP)?;
    }
    for address in &incoming.addresses {
        let row = CollectionAddress {
            id: collection_id.clone(),
            address: address.clone(),
        };
        insert(&mut *conn, &row).await.op(OP)?;
    }
    for &asset in &incoming.assets {
        let row = CollectionAsset {
            id: collection_id.clone(),
            asa_id: asset,
        };
        insert(&mut *conn, &row).await.op(OP)?;
    }
    for &asset in &incoming.excluded_assets {
        let row = CollectionExcludedAsset {
            id: collection_id.clone(),
            asa_id: asset,
        };
        insert(&mut *conn, &row).await.op(OP)?;
    }
    for artist in &incoming.artists {
        let row = CollectionArtist {
            id: collection_id.clone(),
            address: artist.clone(),
        };
        insert(&mut *conn, &row).await.op(OP)?;
    }
    for prop in &incoming.properties {
        insert_new_property(conn, &collection_id, prop).await.op(OP)?;
    }
    for (key, value) in &incoming.extras {
        let row = CollectionExtras {
            id: collection_id.clone(),
            key: key.clone(),
            value: value.clone(),
        };
        insert(&mut *conn, &row).await.op(OP)?;
    }
    Ok(collection_id)
}

async fn delete_collection_children(
    conn: &mut MySqlConnection,
    pre: &compound::Collection,
) -> Result<()> {
    const OP: &str = "nfd:delete_collection_children";

    let id = &pre.collection.id;
    collection::delete_collection_prefixes(&mut *conn, id).await.op(OP)?;
    collection::delete_collection_addresses(&mut *conn, id).await.op(OP)?;
    collection::delete_collection_assets(&mut *conn, id).await.op(OP)?;
    collection::delete_collection_excluded_assets(&mut *conn, id).await.op(OP)?;
    collection::delete_collection_artists(&mut *conn, id).await.op(OP)?;
    collection::delete_collection_extras(&mut *conn, id).await.op(OP)?;
    for prop in &pre.properties {
        property::delete_property_values(&mut *conn, &prop.property.id).await.op(OP)?;
        property::delete_property_value_extras(&mut *conn, &prop.property.id)
            .await
            .op(OP)?;
    }
    property::delete_collection_properties(&mut *conn, id).await.op(OP)?;
    Ok(())
}

/// Replace the FAQ wholesale, stamping `ordering` from document position.
async fn process_faq(
    conn: &mut MySqlConnection,
    nfd_id: u64,
    faq: &[CommunityFaq],
) -> Result<()> {
    const OP: &str = "nfd:process_faq";

    community::delete_community_faq(&mut *conn, nfd_id).await.op(OP)?;

    for (index, entry) in faq.iter().enumerate() {
        let row = CommunityFaq {
            id: nfd_id,
            ordering: Some(index as u64),
            ..entry.clone()
        };
        insert(&mut *conn, &row).await.op(OP)?;
    }
    Ok(())
}

async fn process_extras(
    pool: &MySqlPool,
    conn: &mut MySqlConnection,
    nfd_id: u64,
    extras: &[CommunityExtras],
) -> Result<()> {
    const OP: &str = "nfd:process_extras";

    let existing = match community::get_community_extras(pool, nfd_id).await {
        Ok(rows) => rows,
        Err(e) if e.is_not_found() => Vec::new(),
        Err(e) => return Err(e.op(OP)),
    };
    let known: Vec<&str> = existing.iter().map(|e| e.key.as_str()).collect();

    let mut seen = Vec::with_capacity(extras.len());
    for extra in extras {
        seen.push(extra.key.clone());
        let row = CommunityExtras {
            id: nfd_id,
            ..extra.clone()
        };
        if known.contains(&extra.key.as_str()) {
            update(
                &mut *conn,
                &row,
                &[
                    ("id", SqlValue::U64(nfd_id)),
                    ("mkey", SqlValue::Str(extra.key.clone())),
                ],
            )
            .await
            .op(OP)?;
        } else {
            insert(&mut *conn, &row).await.op(OP)?;
        }
    }

    community::delete_community_extras_not_in(&mut *conn, nfd_id, &seen)
        .await
        .op(OP)
        .map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_collection(name: &str) -> compound::Collection {
        compound::Collection {
            collection: collection::Collection {
                name: name.to_string(),
                description: Some("shiny".to_string()),
                ..Default::default()
            },
            prefixes: vec!["GEM".to_string()],
            extras: BTreeMap::from([("a".to_string(), "1".to_string())]),
            ..Default::default()
        }
    }

    #[test]
    fn test_equality_short_circuit_requires_identity_normalization() {
        // A stored collection always carries id + provider_id; the incoming
        // document never does. Normalization makes equal content compare
        // equal.
        let mut stored = doc_collection("Gems");
        stored.collection.id = "col_9m4e2mr0ui3e8a215n4g".to_string();
        stored.collection.provider_id = 1000001;

        let incoming = doc_collection("Gems");
        assert_ne!(
            canonical_json(&stored).unwrap(),
            canonical_json(&incoming).unwrap()
        );

        let mut normalized = incoming.clone();
        normalized.collection.id = stored.collection.id.clone();
        normalized.collection.provider_id = stored.collection.provider_id;
        assert_eq!(
            canonical_json(&stored).unwrap(),
            canonical_json(&normalized).unwrap()
        );
    }

    #[test]
    fn test_canonical_json_detects_child_changes() {
        let a = doc_collection("Gems");
        let mut b = doc_collection("Gems");
        b.prefixes.push("RUBY".to_string());
        assert_ne!(canonical_json(&a).unwrap(), canonical_json(&b).unwrap());

        let mut c = doc_collection("Gems");
        c.extras.insert("b".to_string(), "2".to_string());
        assert_ne!(canonical_json(&a).unwrap(), canonical_json(&c).unwrap());
    }

    #[test]
    fn test_canonical_json_is_insensitive_to_extras_insertion_order() {
        let mut a = doc_collection("Gems");
        a.extras.insert("z".to_string(), "26".to_string());
        a.extras.insert("b".to_string(), "2".to_string());

        let mut b = doc_collection("Gems");
        b.extras.insert("b".to_string(), "2".to_string());
        b.extras.insert("z".to_string(), "26".to_string());

        assert_eq!(canonical_json(&a).unwrap(), canonical_json(&b).unwrap());
    }
}
