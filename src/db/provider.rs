//! Provider rows and their verified on-chain addresses.

use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, MySql};

use crate::error::{Result, WatcherError};

use super::database;
use super::entity::{Entity, FieldVec, SqlValue, push_str, push_u64};
use super::store::{execute, get_row, get_rows, not_in_suffix};

/// One row per indexed on-chain application. `round` is the round at which
/// the provider was first materialized.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Provider {
    #[serde(default, skip_serializing_if = "is_zero_u64")]
    pub id: u64,
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    #[sqlx(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "is_zero_u64")]
    pub round: u64,
}

pub(crate) fn is_zero_u64(v: &u64) -> bool {
    *v == 0
}

const PROVIDER_KEYS: [&str; 3] = ["id", "type", "round"];

impl Entity for Provider {
    const TABLE: &'static str = "provider";

    fn fields(&self) -> FieldVec {
        let mut fields = FieldVec::new();
        push_u64(&mut fields, "id", self.id);
        push_str(&mut fields, "type", &self.kind);
        push_u64(&mut fields, "round", self.round);
        fields
    }
}

/// A verified address of a provider. The id is the provider's app id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ProviderAddress {
    #[serde(default, skip_serializing_if = "is_zero_u64")]
    pub id: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub address: String,
}

const PROVIDER_ADDRESS_KEYS: [&str; 2] = ["id", "address"];

impl Entity for ProviderAddress {
    const TABLE: &'static str = "provider_address";

    fn fields(&self) -> FieldVec {
        let mut fields = FieldVec::new();
        push_u64(&mut fields, "id", self.id);
        push_str(&mut fields, "address", &self.address);
        fields
    }
}

pub async fn get_provider<'e, E>(exec: E, id: u64) -> Result<Provider>
where
    E: Executor<'e, Database = MySql>,
{
    const OP: &str = "db:get_provider";
    let sql = format!(
        "select {} from {}.provider where id = ?",
        PROVIDER_KEYS.join(","),
        database()
    );
    get_row(exec, OP, &sql, &[SqlValue::U64(id)]).await
}

/// Every provider of a type. Empty is the semantic not-found.
pub async fn get_all_providers_by_type<'e, E>(exec: E, kind: &str) -> Result<Vec<Provider>>
where
    E: Executor<'e, Database = MySql>,
{
    const OP: &str = "db:get_all_providers_by_type";
    let sql = format!(
        "select {} from {}.provider where type = ?",
        PROVIDER_KEYS.join(","),
        database()
    );
    let list: Vec<Provider> = get_rows(exec, OP, &sql, &[SqlValue::Str(kind.to_string())]).await?;
    if list.is_empty() {
        return Err(WatcherError::not_found(OP, "providers not found"));
    }
    Ok(list)
}

/// The greatest round stored on any provider of a type. Feeds the stream
/// start-round derivation.
pub async fn get_latest_provider_round<'e, E>(exec: E, kind: &str) -> Result<Option<u64>>
where
    E: Executor<'e, Database = MySql>,
{
    const OP: &str = "db:get_latest_provider_round";
    let sql = format!(
        "select max(round) from {}.provider where type = ?",
        database()
    );
    let round: (Option<u64>,) =
        get_row(exec, OP, &sql, &[SqlValue::Str(kind.to_string())]).await?;
    Ok(round.0)
}

pub async fn get_provider_addresses<'e, E>(exec: E, id: u64) -> Result<Vec<ProviderAddress>>
where
    E: Executor<'e, Database = MySql>,
{
    const OP: &str = "db:get_provider_addresses";
    let sql = format!(
        "select {} from {}.provider_address where id = ?",
        PROVIDER_ADDRESS_KEYS.join(","),
        database()
    );
    let list: Vec<ProviderAddress> = get_rows(exec, OP, &sql, &[SqlValue::U64(id)]).await?;
    if list.is_empty() {
        return Err(WatcherError::not_found(OP, "wallets not found"));
    }
    Ok(list)
}

/// Delete a provider's addresses that are not in the given list; an empty
/// list deletes them all.
pub async fn delete_provider_address_not_in<'e, E>(
    exec: E,
    id: u64,
    addresses: &[String],
) -> Result<u64>
where
    E: Executor<'e, Database = MySql>,
{
    const OP: &str = "db:delete_provider_address_not_in";
    let sql = format!(
        "delete from {}.provider_address where id = ?{}",
        database(),
        not_in_suffix("address", addresses.len())
    );
    let mut binds = vec![SqlValue::U64(id)];
    binds.extend(addresses.iter().map(|a| SqlValue::Str(a.clone())));
    execute(exec, OP, &sql, &binds).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_fields_follow_declaration_order() {
        let provider = Provider {
            id: 1000001,
            kind: "nfd".to_string(),
            round: 100,
        };
        assert_eq!(
            provider.fields(),
            vec![
                ("id", SqlValue::U64(1000001)),
                ("type", SqlValue::Str("nfd".to_string())),
                ("round", SqlValue::U64(100)),
            ]
        );
    }

    #[test]
    fn test_zero_round_is_omitted() {
        let provider = Provider {
            id: 1,
            kind: "nfd".to_string(),
            round: 0,
        };
        assert!(!provider.fields().iter().any(|(c, _)| *c == "round"));
    }
}
