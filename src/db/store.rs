//! Generic CRUD over the relational schema.
//!
//! Every operation is generic over `sqlx::Executor`, so the same function
//! runs against the pool or an open transaction. SQL text is assembled from
//! the entity's non-empty fields; callers never write per-table INSERT or
//! UPDATE statements.

use sqlx::{Executor, MySql};

use crate::error::{Result, WatcherError};

use super::database;
use super::entity::{Entity, SqlValue, bind_value};

pub(crate) fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

/// `" and <column> not in (?, ...)"`, or nothing when the list is empty:
/// delete-not-in with an empty list removes every child of the parent.
pub(crate) fn not_in_suffix(column: &str, count: usize) -> String {
    if count == 0 {
        String::new()
    } else {
        format!(" and {column} not in ({})", placeholders(count))
    }
}

fn insert_sql<T: Entity>(fields: &[(&'static str, SqlValue)]) -> String {
    let columns: Vec<&str> = fields.iter().map(|(c, _)| *c).collect();
    format!(
        "insert into {}.{} ({}) values ({})",
        database(),
        T::TABLE,
        columns.join(", "),
        placeholders(fields.len())
    )
}

fn update_sql<T: Entity>(
    fields: &[(&'static str, SqlValue)],
    predicate: &[(&'static str, SqlValue)],
) -> String {
    let assignments: Vec<String> = fields.iter().map(|(c, _)| format!("{c}=?")).collect();
    let conditions: Vec<String> = predicate.iter().map(|(c, _)| format!("{c}=?")).collect();
    format!(
        "update {}.{} set {} where {}",
        database(),
        T::TABLE,
        assignments.join(", "),
        conditions.join(" and ")
    )
}

fn upsert_sql<T: Entity>(fields: &[(&'static str, SqlValue)]) -> String {
    let columns: Vec<&str> = fields.iter().map(|(c, _)| *c).collect();
    let dupes: Vec<String> = fields
        .iter()
        .map(|(c, _)| format!("{c} = VALUES({c})"))
        .collect();
    format!(
        "insert into {}.{} ({}) values ({}) on duplicate key update id=LAST_INSERT_ID(id), {}",
        database(),
        T::TABLE,
        columns.join(", "),
        placeholders(fields.len()),
        dupes.join(", ")
    )
}

/// Insert the entity's non-empty fields. Returns the last inserted id, which
/// is only meaningful for surrogate-keyed tables.
pub async fn insert<'e, E, T>(exec: E, entity: &T) -> Result<u64>
where
    E: Executor<'e, Database = MySql>,
    T: Entity,
{
    const OP: &str = "db:insert";

    let fields = entity.fields();
    if fields.is_empty() {
        return Err(WatcherError::invalid_argument(OP, "no fields to insert"));
    }

    let sql = insert_sql::<T>(&fields);
    let mut query = sqlx::query(&sql);
    for (_, value) in &fields {
        query = bind_value(query, value);
    }
    let result = query
        .execute(exec)
        .await
        .map_err(|e| WatcherError::database(OP, e))?;
    Ok(result.last_insert_id())
}

/// Update the entity's non-empty fields on rows matching the equality
/// predicate. Returns the number of affected rows.
pub async fn update<'e, E, T>(
    exec: E,
    entity: &T,
    predicate: &[(&'static str, SqlValue)],
) -> Result<u64>
where
    E: Executor<'e, Database = MySql>,
    T: Entity,
{
    const OP: &str = "db:update";

    let fields = entity.fields();
    if fields.is_empty() {
        return Err(WatcherError::invalid_argument(OP, "no fields to update"));
    }
    if predicate.is_empty() {
        return Err(WatcherError::invalid_argument(OP, "empty update predicate"));
    }

    let sql = update_sql::<T>(&fields, predicate);
    let mut query = sqlx::query(&sql);
    for (_, value) in fields.iter().chain(predicate.iter()) {
        query = bind_value(query, value);
    }
    let result = query
        .execute(exec)
        .await
        .map_err(|e| WatcherError::database(OP, e))?;
    Ok(result.rows_affected())
}

/// Insert-or-update with surrogate id preservation
/// (`on duplicate key update id=LAST_INSERT_ID(id), ...`).
///
/// Rejected when the caller pre-set the surrogate `id` field: a preset id
/// would fight the `LAST_INSERT_ID` round-trip.
pub async fn upsert<'e, E, T>(exec: E, entity: &T) -> Result<u64>
where
    E: Executor<'e, Database = MySql>,
    T: Entity,
{
    const OP: &str = "db:upsert";

    let fields = entity.fields();
    if fields.is_empty() {
        return Err(WatcherError::invalid_argument(OP, "no fields to upsert"));
    }
    if fields.iter().any(|(c, _)| *c == "id") {
        return Err(WatcherError::invalid_argument(
            OP,
            "dont use upsert with preset ids",
        ));
    }

    let sql = upsert_sql::<T>(&fields);
    let mut query = sqlx::query(&sql);
    for (_, value) in &fields {
        query = bind_value(query, value);
    }
    let result = query
        .execute(exec)
        .await
        .map_err(|e| WatcherError::database(OP, e))?;
    Ok(result.last_insert_id())
}

/// Delete by the entity's `id` field.
pub async fn delete<'e, E, T>(exec: E, entity: &T) -> Result<u64>
where
    E: Executor<'e, Database = MySql>,
    T: Entity,
{
    const OP: &str = "db:delete";

    let fields = entity.fields();
    let id = fields
        .iter()
        .find(|(c, _)| *c == "id")
        .map(|(_, v)| v.clone())
        .ok_or_else(|| {
            WatcherError::invalid_argument(OP, "an object id is required to delete by object")
        })?;

    let sql = format!("delete from {}.{} where id = ?", database(), T::TABLE);
    let result = bind_value(sqlx::query(&sql), &id)
        .execute(exec)
        .await
        .map_err(|e| WatcherError::database(OP, e))?;
    Ok(result.rows_affected())
}

/// Bind a [`SqlValue`] onto a typed `query_as`.
fn bind_value_as<'q, T>(
    query: sqlx::query::QueryAs<'q, MySql, T, sqlx::mysql::MySqlArguments>,
    value: &SqlValue,
) -> sqlx::query::QueryAs<'q, MySql, T, sqlx::mysql::MySqlArguments> {
    match value {
        SqlValue::U64(v) => query.bind(*v),
        SqlValue::Str(v) => query.bind(v.clone()),
        SqlValue::Bool(v) => query.bind(*v),
    }
}

/// Fetch a single row, mapping `RowNotFound` to the not-found kind.
pub(crate) async fn get_row<'e, E, T>(
    exec: E,
    op: &'static str,
    sql: &str,
    binds: &[SqlValue],
) -> Result<T>
where
    E: Executor<'e, Database = MySql>,
    T: for<'r> sqlx::FromRow<'r, sqlx::mysql::MySqlRow> + Send + Unpin,
{
    let mut query = sqlx::query_as::<_, T>(sql);
    for value in binds {
        query = bind_value_as(query, value);
    }
    query
        .fetch_one(exec)
        .await
        .map_err(|e| WatcherError::database(op, e))
}

/// Fetch every matching row; an empty result is an empty `Vec`.
pub(crate) async fn get_rows<'e, E, T>(
    exec: E,
    op: &'static str,
    sql: &str,
    binds: &[SqlValue],
) -> Result<Vec<T>>
where
    E: Executor<'e, Database = MySql>,
    T: for<'r> sqlx::FromRow<'r, sqlx::mysql::MySqlRow> + Send + Unpin,
{
    let mut query = sqlx::query_as::<_, T>(sql);
    for value in binds {
        query = bind_value_as(query, value);
    }
    query
        .fetch_all(exec)
        .await
        .map_err(|e| WatcherError::database(op, e))
}

/// Execute a statement built by a query module.
pub(crate) async fn execute<'e, E>(
    exec: E,
    op: &'static str,
    sql: &str,
    binds: &[SqlValue],
) -> Result<u64>
where
    E: Executor<'e, Database = MySql>,
{
    let mut query = sqlx::query(sql);
    for value in binds {
        query = bind_value(query, value);
    }
    let result = query
        .execute(exec)
        .await
        .map_err(|e| WatcherError::database(op, e))?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::entity::{FieldVec, push_str, push_u64};

    struct Widget {
        id: u64,
        name: String,
    }

    impl Entity for Widget {
        const TABLE: &'static str = "widget";

        fn fields(&self) -> FieldVec {
            let mut fields = FieldVec::new();
            push_u64(&mut fields, "id", self.id);
            push_str(&mut fields, "name", &self.name);
            fields
        }
    }

    #[test]
    fn test_insert_sql_shape() {
        let widget = Widget {
            id: 3,
            name: "w".to_string(),
        };
        let sql = insert_sql::<Widget>(&widget.fields());
        assert_eq!(
            sql,
            "insert into arc53_test.widget (id, name) values (?, ?)"
        );
    }

    #[test]
    fn test_insert_sql_omits_empty_fields() {
        let widget = Widget {
            id: 3,
            name: String::new(),
        };
        let sql = insert_sql::<Widget>(&widget.fields());
        assert_eq!(sql, "insert into arc53_test.widget (id) values (?)");
    }

    #[test]
    fn test_update_sql_shape() {
        let widget = Widget {
            id: 0,
            name: "w".to_string(),
        };
        let sql = update_sql::<Widget>(
            &widget.fields(),
            &[
                ("id", SqlValue::U64(3)),
                ("name", SqlValue::Str("w".to_string())),
            ],
        );
        assert_eq!(
            sql,
            "update arc53_test.widget set name=? where id=? and name=?"
        );
    }

    #[test]
    fn test_upsert_sql_preserves_surrogate_id() {
        let widget = Widget {
            id: 0,
            name: "w".to_string(),
        };
        let sql = upsert_sql::<Widget>(&widget.fields());
        assert_eq!(
            sql,
            "insert into arc53_test.widget (name) values (?) \
             on duplicate key update id=LAST_INSERT_ID(id), name = VALUES(name)"
        );
    }

    #[test]
    fn test_not_in_suffix() {
        assert_eq!(not_in_suffix("address", 0), "");
        assert_eq!(not_in_suffix("address", 1), " and address not in (?)");
        assert_eq!(not_in_suffix("asa_id", 3), " and asa_id not in (?, ?, ?)");
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(placeholders(1), "?");
        assert_eq!(placeholders(3), "?, ?, ?");
    }

    // Argument validation happens before any connection is touched, so a
    // lazy pool is enough to exercise the rejection paths.
    fn lazy_pool() -> sqlx::MySqlPool {
        sqlx::MySqlPool::connect_lazy("mysql://root@127.0.0.1/arc53_test").unwrap()
    }

    #[tokio::test]
    async fn test_upsert_rejects_preset_id() {
        let widget = Widget {
            id: 3,
            name: "w".to_string(),
        };
        let err = upsert(&lazy_pool(), &widget).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::Kind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_update_rejects_empty_predicate() {
        let widget = Widget {
            id: 3,
            name: "w".to_string(),
        };
        let err = update(&lazy_pool(), &widget, &[]).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::Kind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_delete_requires_id_field() {
        let widget = Widget {
            id: 0,
            name: "w".to_string(),
        };
        let err = delete(&lazy_pool(), &widget).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::Kind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_insert_rejects_fieldless_entity() {
        let widget = Widget {
            id: 0,
            name: String::new(),
        };
        let err = insert(&lazy_pool(), &widget).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::Kind::InvalidArgument);
    }
}
