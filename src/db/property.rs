//! The 3-level property schema nested under a collection.

use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, MySql};

use crate::error::Result;

use super::database;
use super::entity::{Entity, FieldVec, SqlValue, push_opt_str, push_str};
use super::store::{execute, get_rows, not_in_suffix, placeholders};

/// A named trait of a collection. Ids are `prp_`-prefixed strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Property {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub collection_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

const PROPERTY_KEYS: [&str; 3] = ["id", "collection_id", "name"];

impl Entity for Property {
    const TABLE: &'static str = "property";

    fn fields(&self) -> FieldVec {
        let mut fields = FieldVec::new();
        push_str(&mut fields, "id", &self.id);
        push_str(&mut fields, "collection_id", &self.collection_id);
        push_str(&mut fields, "name", &self.name);
        fields
    }
}

/// One value of a property; the id column repeats the property id and the
/// pair `(id, name)` is the key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow)]
pub struct PropertyValue {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_integrity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_mimetype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub animation_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub animation_url_integrity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub animation_url_mimetype: Option<String>,
}

const PROPERTY_VALUE_KEYS: [&str; 8] = [
    "id",
    "name",
    "image",
    "image_integrity",
    "image_mimetype",
    "animation_url",
    "animation_url_integrity",
    "animation_url_mimetype",
];

impl Entity for PropertyValue {
    const TABLE: &'static str = "property_value";

    fn fields(&self) -> FieldVec {
        let mut fields = FieldVec::new();
        push_str(&mut fields, "id", &self.id);
        push_str(&mut fields, "name", &self.name);
        push_opt_str(&mut fields, "image", self.image.as_deref());
        push_opt_str(&mut fields, "image_integrity", self.image_integrity.as_deref());
        push_opt_str(&mut fields, "image_mimetype", self.image_mimetype.as_deref());
        push_opt_str(&mut fields, "animation_url", self.animation_url.as_deref());
        push_opt_str(
            &mut fields,
            "animation_url_integrity",
            self.animation_url_integrity.as_deref(),
        );
        push_opt_str(
            &mut fields,
            "animation_url_mimetype",
            self.animation_url_mimetype.as_deref(),
        );
        fields
    }
}

/// Free-form key/value of a property value, keyed by `(id, name, mkey)`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow)]
pub struct PropertyValueExtras {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(rename = "key", default, skip_serializing_if = "String::is_empty")]
    #[sqlx(rename = "mkey")]
    pub key: String,
    #[serde(rename = "value", default, skip_serializing_if = "String::is_empty")]
    #[sqlx(rename = "mvalue")]
    pub value: String,
}

const PROPERTY_VALUE_EXTRAS_KEYS: [&str; 4] = ["id", "name", "mkey", "mvalue"];

impl Entity for PropertyValueExtras {
    const TABLE: &'static str = "property_value_extras";

    fn fields(&self) -> FieldVec {
        let mut fields = FieldVec::new();
        push_str(&mut fields, "id", &self.id);
        push_str(&mut fields, "name", &self.name);
        push_str(&mut fields, "mkey", &self.key);
        push_str(&mut fields, "mvalue", &self.value);
        fields
    }
}

// ============================================================================
// Queries
// ============================================================================

pub async fn get_properties<'e, E>(exec: E, collection_id: &str) -> Result<Vec<Property>>
where
    E: Executor<'e, Database = MySql>,
{
    const OP: &str = "db:get_properties";
    let sql = format!(
        "select {} from {}.property where collection_id = ?",
        PROPERTY_KEYS.join(","),
        database()
    );
    get_rows(exec, OP, &sql, &[SqlValue::Str(collection_id.to_string())]).await
}

pub async fn get_properties_where_name_in<'e, E>(
    exec: E,
    collection_id: &str,
    names: &[String],
) -> Result<Vec<Property>>
where
    E: Executor<'e, Database = MySql>,
{
    const OP: &str = "db:get_properties_where_name_in";
    let sql = format!(
        "select {} from {}.property where collection_id = ? and name in ({})",
        PROPERTY_KEYS.join(","),
        database(),
        placeholders(names.len())
    );
    let mut binds = vec![SqlValue::Str(collection_id.to_string())];
    binds.extend(names.iter().map(|n| SqlValue::Str(n.clone())));
    get_rows(exec, OP, &sql, &binds).await
}

pub async fn delete_collection_properties<'e, E>(exec: E, collection_id: &str) -> Result<u64>
where
    E: Executor<'e, Database = MySql>,
{
    const OP: &str = "db:delete_collection_properties";
    let sql = format!(
        "delete from {}.property where collection_id = ?",
        database()
    );
    execute(exec, OP, &sql, &[SqlValue::Str(collection_id.to_string())]).await
}

pub async fn delete_property_not_in<'e, E>(
    exec: E,
    collection_id: &str,
    ids: &[String],
) -> Result<u64>
where
    E: Executor<'e, Database = MySql>,
{
    const OP: &str = "db:delete_property_not_in";
    let sql = format!(
        "delete from {}.property where collection_id = ?{}",
        database(),
        not_in_suffix("id", ids.len())
    );
    let mut binds = vec![SqlValue::Str(collection_id.to_string())];
    binds.extend(ids.iter().map(|i| SqlValue::Str(i.clone())));
    execute(exec, OP, &sql, &binds).await
}

pub async fn get_property_values<'e, E>(exec: E, id: &str) -> Result<Vec<PropertyValue>>
where
    E: Executor<'e, Database = MySql>,
{
    const OP: &str = "db:get_property_values";
    let sql = format!(
        "select {} from {}.property_value where id = ?",
        PROPERTY_VALUE_KEYS.join(","),
        database()
    );
    get_rows(exec, OP, &sql, &[SqlValue::Str(id.to_string())]).await
}

pub async fn delete_property_values<'e, E>(exec: E, id: &str) -> Result<u64>
where
    E: Executor<'e, Database = MySql>,
{
    const OP: &str = "db:delete_property_values";
    let sql = format!("delete from {}.property_value where id = ?", database());
    execute(exec, OP, &sql, &[SqlValue::Str(id.to_string())]).await
}

pub async fn delete_property_value_not_in<'e, E>(
    exec: E,
    id: &str,
    names: &[String],
) -> Result<u64>
where
    E: Executor<'e, Database = MySql>,
{
    const OP: &str = "db:delete_property_value_not_in";
    let sql = format!(
        "delete from {}.property_value where id = ?{}",
        database(),
        not_in_suffix("name", names.len())
    );
    let mut binds = vec![SqlValue::Str(id.to_string())];
    binds.extend(names.iter().map(|n| SqlValue::Str(n.clone())));
    execute(exec, OP, &sql, &binds).await
}

pub async fn get_property_value_extras<'e, E>(exec: E, id: &str) -> Result<Vec<PropertyValueExtras>>
where
    E: Executor<'e, Database = MySql>,
{
    const OP: &str = "db:get_property_value_extras";
    let sql = format!(
        "select {} from {}.property_value_extras where id = ?",
        PROPERTY_VALUE_EXTRAS_KEYS.join(","),
        database()
    );
    get_rows(exec, OP, &sql, &[SqlValue::Str(id.to_string())]).await
}

pub async fn delete_property_value_extras<'e, E>(exec: E, id: &str) -> Result<u64>
where
    E: Executor<'e, Database = MySql>,
{
    const OP: &str = "db:delete_property_value_extras";
    let sql = format!(
        "delete from {}.property_value_extras where id = ?",
        database()
    );
    execute(exec, OP, &sql, &[SqlValue::Str(id.to_string())]).await
}

pub async fn delete_property_value_extras_not_in<'e, E>(
    exec: E,
    id: &str,
    name: &str,
    keys: &[String],
) -> Result<u64>
where
    E: Executor<'e, Database = MySql>,
{
    const OP: &str = "db:delete_property_value_extras_not_in";
    let sql = format!(
        "delete from {}.property_value_extras where id = ? and name = ?{}",
        database(),
        not_in_suffix("mkey", keys.len())
    );
    let mut binds = vec![
        SqlValue::Str(id.to_string()),
        SqlValue::Str(name.to_string()),
    ];
    binds.extend(keys.iter().map(|k| SqlValue::Str(k.clone())));
    execute(exec, OP, &sql, &binds).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_value_field_order_is_stable() {
        let value = PropertyValue {
            id: "prp_9m4e2mr0ui3e8a215n4g".to_string(),
            name: "Gold".to_string(),
            image: Some("ipfs://img".to_string()),
            animation_url_mimetype: Some("video/mp4".to_string()),
            ..Default::default()
        };
        let columns: Vec<&str> = value.fields().iter().map(|(c, _)| *c).collect();
        assert_eq!(
            columns,
            vec!["id", "name", "image", "animation_url_mimetype"]
        );
    }

    #[test]
    fn test_value_extras_parse_document_key_value_names() {
        let raw = r#"{"key":"rarity","value":"legendary"}"#;
        let extra: PropertyValueExtras = serde_json::from_str(raw).unwrap();
        assert_eq!(extra.key, "rarity");
        assert_eq!(extra.value, "legendary");
    }
}
