//! Community rows and their flat child tables.

use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, MySql};

use crate::error::Result;

use super::database;
use super::entity::{
    Entity, FieldVec, SqlValue, push_opt_bool, push_opt_str, push_opt_u64, push_str, push_u64,
};
use super::provider::is_zero_u64;
use super::store::{execute, get_row, get_rows, not_in_suffix};

/// Tab shown when a community has no stored settings row.
pub const DEFAULT_COMMUNITY_TAB: &str = "collections";

/// A provider whose NFD exposed a community document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Community {
    #[serde(default, skip_serializing_if = "is_zero_u64")]
    pub id: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
}

const COMMUNITY_KEYS: [&str; 2] = ["id", "version"];

impl Entity for Community {
    const TABLE: &'static str = "community";

    fn fields(&self) -> FieldVec {
        let mut fields = FieldVec::new();
        push_u64(&mut fields, "id", self.id);
        push_str(&mut fields, "version", &self.version);
        fields
    }
}

/// Last-seen raw community JSON for a provider. `malformed` is set when the
/// stored bytes failed to decode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow)]
pub struct CommunityJson {
    #[serde(default, skip_serializing_if = "is_zero_u64")]
    pub id: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub malformed: Option<bool>,
}

const COMMUNITY_JSON_KEYS: [&str; 3] = ["id", "data", "malformed"];

impl Entity for CommunityJson {
    const TABLE: &'static str = "community_json";

    fn fields(&self) -> FieldVec {
        let mut fields = FieldVec::new();
        push_u64(&mut fields, "id", self.id);
        push_str(&mut fields, "data", &self.data);
        push_opt_bool(&mut fields, "malformed", self.malformed);
        fields
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow)]
pub struct CommunitySettings {
    #[serde(default, skip_serializing_if = "is_zero_u64")]
    pub id: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub default_tab: String,
}

const COMMUNITY_SETTINGS_KEYS: [&str; 2] = ["id", "default_tab"];

impl Entity for CommunitySettings {
    const TABLE: &'static str = "community_settings";

    fn fields(&self) -> FieldVec {
        let mut fields = FieldVec::new();
        push_u64(&mut fields, "id", self.id);
        push_str(&mut fields, "default_tab", &self.default_tab);
        fields
    }
}

/// A token the community exposes, keyed by `(id, asset_id)`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow)]
pub struct CommunityToken {
    #[serde(default, skip_serializing_if = "is_zero_u64")]
    pub id: u64,
    #[serde(default)]
    pub asset_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_integrity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_mimetype: Option<String>,
}

const COMMUNITY_TOKEN_KEYS: [&str; 5] =
    ["id", "asset_id", "image", "image_integrity", "image_mimetype"];

impl Entity for CommunityToken {
    const TABLE: &'static str = "community_token";

    fn fields(&self) -> FieldVec {
        let mut fields = FieldVec::new();
        push_u64(&mut fields, "id", self.id);
        push_u64(&mut fields, "asset_id", self.asset_id);
        push_opt_str(&mut fields, "image", self.image.as_deref());
        push_opt_str(&mut fields, "image_integrity", self.image_integrity.as_deref());
        push_opt_str(&mut fields, "image_mimetype", self.image_mimetype.as_deref());
        fields
    }
}

/// An associated account, keyed by `(id, address)`. Role, confirmation and
/// the confirming transaction are set only at insert.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow)]
pub struct CommunityAssociate {
    #[serde(default, skip_serializing_if = "is_zero_u64")]
    pub id: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub address: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txn: Option<String>,
}

const COMMUNITY_ASSOCIATE_KEYS: [&str; 5] = ["id", "address", "role", "confirmed", "txn"];

impl Entity for CommunityAssociate {
    const TABLE: &'static str = "community_associate";

    fn fields(&self) -> FieldVec {
        let mut fields = FieldVec::new();
        push_u64(&mut fields, "id", self.id);
        push_str(&mut fields, "address", &self.address);
        push_str(&mut fields, "role", &self.role);
        push_opt_bool(&mut fields, "confirmed", self.confirmed);
        push_opt_str(&mut fields, "txn", self.txn.as_deref());
        fields
    }
}

/// One FAQ entry; the whole list is replaced per sync with `ordering` set
/// from the document position.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow)]
pub struct CommunityFaq {
    #[serde(default, skip_serializing_if = "is_zero_u64")]
    pub id: u64,
    #[serde(rename = "q", default, skip_serializing_if = "String::is_empty")]
    #[sqlx(rename = "q")]
    pub question: String,
    #[serde(rename = "a", default, skip_serializing_if = "String::is_empty")]
    #[sqlx(rename = "a")]
    pub answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ordering: Option<u64>,
}

const COMMUNITY_FAQ_KEYS: [&str; 4] = ["id", "q", "a", "ordering"];

impl Entity for CommunityFaq {
    const TABLE: &'static str = "community_faq";

    fn fields(&self) -> FieldVec {
        let mut fields = FieldVec::new();
        push_u64(&mut fields, "id", self.id);
        push_str(&mut fields, "q", &self.question);
        push_str(&mut fields, "a", &self.answer);
        push_opt_u64(&mut fields, "ordering", self.ordering);
        fields
    }
}

/// Free-form key/value attached to a community, keyed by `(id, mkey)`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow)]
pub struct CommunityExtras {
    #[serde(default, skip_serializing_if = "is_zero_u64")]
    pub id: u64,
    #[serde(rename = "key", default, skip_serializing_if = "String::is_empty")]
    #[sqlx(rename = "mkey")]
    pub key: String,
    #[serde(rename = "value", default, skip_serializing_if = "String::is_empty")]
    #[sqlx(rename = "mvalue")]
    pub value: String,
}

const COMMUNITY_EXTRAS_KEYS: [&str; 3] = ["id", "mkey", "mvalue"];

impl Entity for CommunityExtras {
    const TABLE: &'static str = "community_extras";

    fn fields(&self) -> FieldVec {
        let mut fields = FieldVec::new();
        push_u64(&mut fields, "id", self.id);
        push_str(&mut fields, "mkey", &self.key);
        push_str(&mut fields, "mvalue", &self.value);
        fields
    }
}

// ============================================================================
// Queries
// ============================================================================

pub async fn get_community<'e, E>(exec: E, id: u64) -> Result<Community>
where
    E: Executor<'e, Database = MySql>,
{
    const OP: &str = "db:get_community";
    let sql = format!(
        "select {} from {}.community where id = ?",
        COMMUNITY_KEYS.join(","),
        database()
    );
    get_row(exec, OP, &sql, &[SqlValue::U64(id)]).await
}

pub async fn delete_community<'e, E>(exec: E, id: u64) -> Result<u64>
where
    E: Executor<'e, Database = MySql>,
{
    const OP: &str = "db:delete_community";
    let sql = format!("delete from {}.community where id = ?", database());
    execute(exec, OP, &sql, &[SqlValue::U64(id)]).await
}

pub async fn get_community_json<'e, E>(exec: E, id: u64) -> Result<CommunityJson>
where
    E: Executor<'e, Database = MySql>,
{
    const OP: &str = "db:get_community_json";
    let sql = format!(
        "select {} from {}.community_json where id = ?",
        COMMUNITY_JSON_KEYS.join(","),
        database()
    );
    get_row(exec, OP, &sql, &[SqlValue::U64(id)]).await
}

pub async fn delete_community_json<'e, E>(exec: E, id: u64) -> Result<u64>
where
    E: Executor<'e, Database = MySql>,
{
    const OP: &str = "db:delete_community_json";
    let sql = format!("delete from {}.community_json where id = ?", database());
    execute(exec, OP, &sql, &[SqlValue::U64(id)]).await
}

pub async fn get_community_settings<'e, E>(exec: E, id: u64) -> Result<CommunitySettings>
where
    E: Executor<'e, Database = MySql>,
{
    const OP: &str = "db:get_community_settings";
    let sql = format!(
        "select {} from {}.community_settings where id = ?",
        COMMUNITY_SETTINGS_KEYS.join(","),
        database()
    );
    get_row(exec, OP, &sql, &[SqlValue::U64(id)]).await
}

pub async fn get_community_tokens<'e, E>(exec: E, id: u64) -> Result<Vec<CommunityToken>>
where
    E: Executor<'e, Database = MySql>,
{
    const OP: &str = "db:get_community_tokens";
    let sql = format!(
        "select {} from {}.community_token where id = ?",
        COMMUNITY_TOKEN_KEYS.join(","),
        database()
    );
    get_rows(exec, OP, &sql, &[SqlValue::U64(id)]).await
}

pub async fn delete_community_tokens<'e, E>(exec: E, id: u64) -> Result<u64>
where
    E: Executor<'e, Database = MySql>,
{
    const OP: &str = "db:delete_community_tokens";
    let sql = format!("delete from {}.community_token where id = ?", database());
    execute(exec, OP, &sql, &[SqlValue::U64(id)]).await
}

pub async fn delete_community_tokens_not_in<'e, E>(
    exec: E,
    id: u64,
    asset_ids: &[u64],
) -> Result<u64>
where
    E: Executor<'e, Database = MySql>,
{
    const OP: &str = "db:delete_community_tokens_not_in";
    let sql = format!(
        "delete from {}.community_token where id = ?{}",
        database(),
        not_in_suffix("asset_id", asset_ids.len())
    );
    let mut binds = vec![SqlValue::U64(id)];
    binds.extend(asset_ids.iter().map(|&a| SqlValue::U64(a)));
    execute(exec, OP, &sql, &binds).await
}

pub async fn get_community_associates<'e, E>(exec: E, id: u64) -> Result<Vec<CommunityAssociate>>
where
    E: Executor<'e, Database = MySql>,
{
    const OP: &str = "db:get_community_associates";
    let sql = format!(
        "select {} from {}.community_associate where id = ?",
        COMMUNITY_ASSOCIATE_KEYS.join(","),
        database()
    );
    get_rows(exec, OP, &sql, &[SqlValue::U64(id)]).await
}

pub async fn delete_community_associates_not_in<'e, E>(
    exec: E,
    id: u64,
    addresses: &[String],
) -> Result<u64>
where
    E: Executor<'e, Database = MySql>,
{
    const OP: &str = "db:delete_community_associates_not_in";
    let sql = format!(
        "delete from {}.community_associate where id = ?{}",
        database(),
        not_in_suffix("address", addresses.len())
    );
    let mut binds = vec![SqlValue::U64(id)];
    binds.extend(addresses.iter().map(|a| SqlValue::Str(a.clone())));
    execute(exec, OP, &sql, &binds).await
}

/// FAQ page ordered by `ordering`.
pub async fn get_community_faq<'e, E>(
    exec: E,
    id: u64,
    start: u64,
    limit: u64,
) -> Result<Vec<CommunityFaq>>
where
    E: Executor<'e, Database = MySql>,
{
    const OP: &str = "db:get_community_faq";
    let sql = format!(
        "select {} from {}.community_faq where id = ? order by ordering asc limit ?, ?",
        COMMUNITY_FAQ_KEYS.join(","),
        database()
    );
    get_rows(
        exec,
        OP,
        &sql,
        &[SqlValue::U64(id), SqlValue::U64(start), SqlValue::U64(limit)],
    )
    .await
}

pub async fn delete_community_faq<'e, E>(exec: E, id: u64) -> Result<u64>
where
    E: Executor<'e, Database = MySql>,
{
    const OP: &str = "db:delete_community_faq";
    let sql = format!("delete from {}.community_faq where id = ?", database());
    execute(exec, OP, &sql, &[SqlValue::U64(id)]).await
}

pub async fn get_community_extras<'e, E>(exec: E, id: u64) -> Result<Vec<CommunityExtras>>
where
    E: Executor<'e, Database = MySql>,
{
    const OP: &str = "db:get_community_extras";
    let sql = format!(
        "select {} from {}.community_extras where id = ?",
        COMMUNITY_EXTRAS_KEYS.join(","),
        database()
    );
    get_rows(exec, OP, &sql, &[SqlValue::U64(id)]).await
}

pub async fn delete_community_extras<'e, E>(exec: E, id: u64) -> Result<u64>
where
    E: Executor<'e, Database = MySql>,
{
    const OP: &str = "db:delete_community_extras";
    let sql = format!("delete from {}.community_extras where id = ?", database());
    execute(exec, OP, &sql, &[SqlValue::U64(id)]).await
}

pub async fn delete_community_extras_not_in<'e, E>(
    exec: E,
    id: u64,
    keys: &[String],
) -> Result<u64>
where
    E: Executor<'e, Database = MySql>,
{
    const OP: &str = "db:delete_community_extras_not_in";
    let sql = format!(
        "delete from {}.community_extras where id = ?{}",
        database(),
        not_in_suffix("mkey", keys.len())
    );
    let mut binds = vec![SqlValue::U64(id)];
    binds.extend(keys.iter().map(|k| SqlValue::Str(k.clone())));
    execute(exec, OP, &sql, &binds).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_faq_keeps_explicit_zero_ordering() {
        let faq = CommunityFaq {
            id: 1,
            question: "q?".to_string(),
            answer: "a.".to_string(),
            ordering: Some(0),
        };
        assert!(
            faq.fields()
                .contains(&(("ordering"), SqlValue::U64(0)))
        );
    }

    #[test]
    fn test_extras_columns_use_mkey_mvalue() {
        let extra = CommunityExtras {
            id: 1,
            key: "discord".to_string(),
            value: "https://discord.gg/x".to_string(),
        };
        let columns: Vec<&str> = extra.fields().iter().map(|(c, _)| *c).collect();
        assert_eq!(columns, vec!["id", "mkey", "mvalue"]);
    }

    #[test]
    fn test_document_shape_round_trips() {
        let raw = r#"{"address":"ADDR","role":"admin","confirmed":true}"#;
        let associate: CommunityAssociate = serde_json::from_str(raw).unwrap();
        assert_eq!(associate.address, "ADDR");
        assert_eq!(associate.confirmed, Some(true));
        assert!(associate.txn.is_none());
    }
}
