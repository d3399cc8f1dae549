//! Collection rows and their match-rule child tables.

use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, MySql};

use crate::error::Result;

use super::database;
use super::entity::{
    Entity, FieldVec, SqlValue, push_opt_bool, push_opt_str, push_opt_u64, push_str, push_u64,
};
use super::store::{execute, get_row, get_rows, not_in_suffix};

/// A curated collection owned by a provider. Ids are `col_`-prefixed,
/// time-sortable strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Collection {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "super::provider::is_zero_u64")]
    pub provider_id: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banner: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explicit: Option<bool>,
}

const COLLECTION_KEYS: [&str; 8] = [
    "id",
    "provider_id",
    "name",
    "description",
    "banner",
    "avatar",
    "network",
    "explicit",
];

impl Entity for Collection {
    const TABLE: &'static str = "collection";

    fn fields(&self) -> FieldVec {
        let mut fields = FieldVec::new();
        push_str(&mut fields, "id", &self.id);
        push_u64(&mut fields, "provider_id", self.provider_id);
        push_str(&mut fields, "name", &self.name);
        push_opt_str(&mut fields, "description", self.description.as_deref());
        push_opt_u64(&mut fields, "banner", self.banner);
        push_opt_u64(&mut fields, "avatar", self.avatar);
        push_opt_str(&mut fields, "network", self.network.as_deref());
        push_opt_bool(&mut fields, "explicit", self.explicit);
        fields
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow)]
pub struct CollectionSettings {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hide_blanks: Option<String>,
}

const COLLECTION_SETTINGS_KEYS: [&str; 2] = ["id", "hide_blanks"];

impl Entity for CollectionSettings {
    const TABLE: &'static str = "collection_settings";

    fn fields(&self) -> FieldVec {
        let mut fields = FieldVec::new();
        push_str(&mut fields, "id", &self.id);
        push_opt_str(&mut fields, "hide_blanks", self.hide_blanks.as_deref());
        fields
    }
}

/// Unit-name prefix match rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow)]
pub struct CollectionPrefix {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub prefix: String,
}

impl Entity for CollectionPrefix {
    const TABLE: &'static str = "collection_prefix";

    fn fields(&self) -> FieldVec {
        let mut fields = FieldVec::new();
        push_str(&mut fields, "id", &self.id);
        push_str(&mut fields, "prefix", &self.prefix);
        fields
    }
}

/// Allowed creator address in addition to the provider's verified ones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow)]
pub struct CollectionAddress {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub address: String,
}

impl Entity for CollectionAddress {
    const TABLE: &'static str = "collection_address";

    fn fields(&self) -> FieldVec {
        let mut fields = FieldVec::new();
        push_str(&mut fields, "id", &self.id);
        push_str(&mut fields, "address", &self.address);
        fields
    }
}

/// Explicit asset inclusion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow)]
pub struct CollectionAsset {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default)]
    pub asa_id: u64,
}

impl Entity for CollectionAsset {
    const TABLE: &'static str = "collection_asset";

    fn fields(&self) -> FieldVec {
        let mut fields = FieldVec::new();
        push_str(&mut fields, "id", &self.id);
        push_u64(&mut fields, "asa_id", self.asa_id);
        fields
    }
}

/// Explicit asset exclusion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow)]
pub struct CollectionExcludedAsset {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default)]
    pub asa_id: u64,
}

impl Entity for CollectionExcludedAsset {
    const TABLE: &'static str = "collection_excluded_asset";

    fn fields(&self) -> FieldVec {
        let mut fields = FieldVec::new();
        push_str(&mut fields, "id", &self.id);
        push_u64(&mut fields, "asa_id", self.asa_id);
        fields
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow)]
pub struct CollectionArtist {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub address: String,
}

impl Entity for CollectionArtist {
    const TABLE: &'static str = "collection_artist";

    fn fields(&self) -> FieldVec {
        let mut fields = FieldVec::new();
        push_str(&mut fields, "id", &self.id);
        push_str(&mut fields, "address", &self.address);
        fields
    }
}

/// Free-form key/value attached to a collection, keyed by `(id, mkey)`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow)]
pub struct CollectionExtras {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(rename = "key", default, skip_serializing_if = "String::is_empty")]
    #[sqlx(rename = "mkey")]
    pub key: String,
    #[serde(rename = "value", default, skip_serializing_if = "String::is_empty")]
    #[sqlx(rename = "mvalue")]
    pub value: String,
}

impl Entity for CollectionExtras {
    const TABLE: &'static str = "collection_extras";

    fn fields(&self) -> FieldVec {
        let mut fields = FieldVec::new();
        push_str(&mut fields, "id", &self.id);
        push_str(&mut fields, "mkey", &self.key);
        push_str(&mut fields, "mvalue", &self.value);
        fields
    }
}

// ============================================================================
// Queries
// ============================================================================

pub async fn get_collection<'e, E>(exec: E, id: &str) -> Result<Collection>
where
    E: Executor<'e, Database = MySql>,
{
    const OP: &str = "db:get_collection";
    let sql = format!(
        "select {} from {}.collection where id = ?",
        COLLECTION_KEYS.join(","),
        database()
    );
    get_row(exec, OP, &sql, &[SqlValue::Str(id.to_string())]).await
}

pub async fn get_collections_by_provider_id<'e, E>(
    exec: E,
    provider_id: u64,
) -> Result<Vec<Collection>>
where
    E: Executor<'e, Database = MySql>,
{
    const OP: &str = "db:get_collections_by_provider_id";
    let sql = format!(
        "select {} from {}.collection where provider_id = ?",
        COLLECTION_KEYS.join(","),
        database()
    );
    get_rows(exec, OP, &sql, &[SqlValue::U64(provider_id)]).await
}

/// Reverse lookup: the collection an asset belongs to, by creator address
/// plus either a unit-name prefix rule (minus exclusions) or an explicit
/// inclusion.
pub async fn get_collection_by_asset_id<'e, E>(
    exec: E,
    asset_id: u64,
    creator: &str,
    unit_name: &str,
) -> Result<Collection>
where
    E: Executor<'e, Database = MySql>,
{
    const OP: &str = "db:get_collection_by_asset_id";
    let db = database();
    let sql = format!(
        "select {cols} from {db}.collection \
         where provider_id in (select id from {db}.provider_address where address = ?) \
         and ((exists(select id from {db}.collection_prefix where {db}.collection.id = id \
             and left(?, char_length(prefix)) = prefix) \
           and not exists(select id from {db}.collection_excluded_asset where {db}.collection.id = id and asa_id = ?)) \
          or (exists(select id from {db}.collection_asset where {db}.collection.id = id and asa_id = ?)))",
        cols = COLLECTION_KEYS.join(","),
    );
    get_row(
        exec,
        OP,
        &sql,
        &[
            SqlValue::Str(creator.to_string()),
            SqlValue::Str(unit_name.to_string()),
            SqlValue::U64(asset_id),
            SqlValue::U64(asset_id),
        ],
    )
    .await
}

pub async fn delete_collections_by_provider_id<'e, E>(exec: E, provider_id: u64) -> Result<u64>
where
    E: Executor<'e, Database = MySql>,
{
    const OP: &str = "db:delete_collections_by_provider_id";
    let sql = format!("delete from {}.collection where provider_id = ?", database());
    execute(exec, OP, &sql, &[SqlValue::U64(provider_id)]).await
}

pub async fn delete_collection_not_in<'e, E>(
    exec: E,
    provider_id: u64,
    ids: &[String],
) -> Result<u64>
where
    E: Executor<'e, Database = MySql>,
{
    const OP: &str = "db:delete_collection_not_in";
    let sql = format!(
        "delete from {}.collection where provider_id = ?{}",
        database(),
        not_in_suffix("id", ids.len())
    );
    let mut binds = vec![SqlValue::U64(provider_id)];
    binds.extend(ids.iter().map(|i| SqlValue::Str(i.clone())));
    execute(exec, OP, &sql, &binds).await
}

pub async fn get_collection_settings<'e, E>(exec: E, id: &str) -> Result<CollectionSettings>
where
    E: Executor<'e, Database = MySql>,
{
    const OP: &str = "db:get_collection_settings";
    let sql = format!(
        "select {} from {}.collection_settings where id = ?",
        COLLECTION_SETTINGS_KEYS.join(","),
        database()
    );
    get_row(exec, OP, &sql, &[SqlValue::Str(id.to_string())]).await
}

macro_rules! child_queries {
    (
        $entity:ty,
        $table:literal,
        $key_col:literal,
        $key_ty:ident,
        $get:ident,
        $delete_all:ident,
        $delete_not_in:ident,
        $cols:expr
    ) => {
        pub async fn $get<'e, E>(exec: E, id: &str) -> Result<Vec<$entity>>
        where
            E: Executor<'e, Database = MySql>,
        {
            const OP: &str = concat!("db:", stringify!($get));
            let sql = format!(
                "select {} from {}.{} where id = ?",
                $cols.join(","),
                database(),
                $table
            );
            get_rows(exec, OP, &sql, &[SqlValue::Str(id.to_string())]).await
        }

        pub async fn $delete_all<'e, E>(exec: E, id: &str) -> Result<u64>
        where
            E: Executor<'e, Database = MySql>,
        {
            const OP: &str = concat!("db:", stringify!($delete_all));
            let sql = format!("delete from {}.{} where id = ?", database(), $table);
            execute(exec, OP, &sql, &[SqlValue::Str(id.to_string())]).await
        }

        pub async fn $delete_not_in<'e, E>(
            exec: E,
            id: &str,
            keep: &[child_queries!(@keyty $key_ty)],
        ) -> Result<u64>
        where
            E: Executor<'e, Database = MySql>,
        {
            const OP: &str = concat!("db:", stringify!($delete_not_in));
            let sql = format!(
                "delete from {}.{} where id = ?{}",
                database(),
                $table,
                not_in_suffix($key_col, keep.len())
            );
            let mut binds = vec![SqlValue::Str(id.to_string())];
            binds.extend(keep.iter().map(|k| child_queries!(@bind $key_ty, k)));
            execute(exec, OP, &sql, &binds).await
        }
    };
    (@keyty str) => { String };
    (@keyty u64) => { u64 };
    (@bind str, $k:expr) => { SqlValue::Str($k.clone()) };
    (@bind u64, $k:expr) => { SqlValue::U64(*$k) };
}

child_queries!(
    CollectionPrefix,
    "collection_prefix",
    "prefix",
    str,
    get_collection_prefixes,
    delete_collection_prefixes,
    delete_collection_prefixes_not_in,
    ["id", "prefix"]
);

child_queries!(
    CollectionAddress,
    "collection_address",
    "address",
    str,
    get_collection_addresses,
    delete_collection_addresses,
    delete_collection_addresses_not_in,
    ["id", "address"]
);

child_queries!(
    CollectionAsset,
    "collection_asset",
    "asa_id",
    u64,
    get_collection_assets,
    delete_collection_assets,
    delete_collection_assets_not_in,
    ["id", "asa_id"]
);

child_queries!(
    CollectionExcludedAsset,
    "collection_excluded_asset",
    "asa_id",
    u64,
    get_collection_excluded_assets,
    delete_collection_excluded_assets,
    delete_collection_excluded_assets_not_in,
    ["id", "asa_id"]
);

child_queries!(
    CollectionArtist,
    "collection_artist",
    "address",
    str,
    get_collection_artists,
    delete_collection_artists,
    delete_collection_artists_not_in,
    ["id", "address"]
);

child_queries!(
    CollectionExtras,
    "collection_extras",
    "mkey",
    str,
    get_collection_extras,
    delete_collection_extras,
    delete_collection_extras_not_in,
    ["id", "mkey", "mvalue"]
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_optional_fields_bind_only_when_set() {
        let collection = Collection {
            id: "col_9m4e2mr0ui3e8a215n4g".to_string(),
            provider_id: 1000001,
            name: "Gems".to_string(),
            description: None,
            banner: Some(12),
            avatar: None,
            network: Some("algorand".to_string()),
            explicit: Some(false),
        };
        let columns: Vec<&str> = collection.fields().iter().map(|(c, _)| *c).collect();
        assert_eq!(
            columns,
            vec!["id", "provider_id", "name", "banner", "network", "explicit"]
        );
    }

    #[test]
    fn test_document_collection_parses_without_ids() {
        let raw = r#"{"name":"Gems","description":"shiny","explicit":false}"#;
        let collection: Collection = serde_json::from_str(raw).unwrap();
        assert!(collection.id.is_empty());
        assert_eq!(collection.provider_id, 0);
        assert_eq!(collection.name, "Gems");
        assert_eq!(collection.explicit, Some(false));
    }
}
