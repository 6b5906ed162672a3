use chrono::Utc;
use serde_json::{Map, Value};
use sqlx::{postgres::PgArguments, PgPool, Row};
use uuid::Uuid;

use crate::database::manager::{DatabaseError, DatabaseManager};
use crate::filter::{Filter, SqlResult};

/// Dynamic storage handle for one resource table. Rows enter and leave as
/// JSON: reads wrap the select in row_to_json, writes go through
/// jsonb_populate_record so Postgres performs the text-to-column-type
/// conversion for dates, uuids and numerics.
pub struct Repository {
    table_name: String,
    pool: PgPool,
}

impl Repository {
    pub fn new(table_name: impl Into<String>, pool: PgPool) -> Result<Self, DatabaseError> {
        let table_name = table_name.into();
        if !DatabaseManager::is_valid_identifier(&table_name) {
            return Err(DatabaseError::InvalidIdentifier(table_name));
        }
        Ok(Self { table_name, pool })
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Insert a validated record. Identity and audit timestamps are stamped
    /// here, server-side; caller-supplied values for them are discarded.
    pub async fn insert(&self, mut record: Map<String, Value>) -> Result<Value, DatabaseError> {
        stamp_insert(&mut record);
        let sql = insert_sql(&self.table_name);

        let row = sqlx::query(&sql)
            .bind(Value::Object(record))
            .fetch_one(&self.pool)
            .await?;
        let value: Value = row.try_get("row")?;
        Ok(value)
    }

    /// Fetch rows matching a composed filter
    pub async fn select_any(&self, filter: &Filter) -> Result<Vec<Value>, DatabaseError> {
        let SqlResult { query, params } = filter.to_sql();
        let mut q = sqlx::query(&query);
        for p in &params {
            q = bind_param(q, p);
        }
        let rows = q.fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| row.try_get::<Value, _>("row").map_err(DatabaseError::from))
            .collect()
    }

    /// Single-row lookup by id. An unparseable id can never match a row, so
    /// it reports as absent rather than as a query error.
    pub async fn select_by_id(&self, id: &str) -> Result<Option<Value>, DatabaseError> {
        let Some(id) = parse_id(id) else {
            return Ok(None);
        };
        let table = DatabaseManager::quote_identifier(&self.table_name);
        let sql = format!(
            "SELECT row_to_json(t) AS row FROM (SELECT * FROM {table} WHERE \"id\" = $1) t"
        );
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.map(|r| r.try_get::<Value, _>("row").map_err(DatabaseError::from))
            .transpose()
    }

    /// Apply a partial change set to one row. Only the supplied columns are
    /// written; updated_at is always refreshed. Returns None when the id
    /// matches nothing.
    pub async fn update_by_id(
        &self,
        id: &str,
        mut changes: Map<String, Value>,
    ) -> Result<Option<Value>, DatabaseError> {
        let Some(id) = parse_id(id) else {
            return Ok(None);
        };
        stamp_update(&mut changes);
        let sql = update_sql(&self.table_name, &changes)?;

        let row = sqlx::query(&sql)
            .bind(id)
            .bind(Value::Object(changes))
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| r.try_get::<Value, _>("row").map_err(DatabaseError::from))
            .transpose()
    }

    /// Remove one row, returning the pre-deletion snapshot
    pub async fn delete_by_id(&self, id: &str) -> Result<Option<Value>, DatabaseError> {
        let Some(id) = parse_id(id) else {
            return Ok(None);
        };
        let sql = delete_sql(&self.table_name);
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.map(|r| r.try_get::<Value, _>("row").map_err(DatabaseError::from))
            .transpose()
    }

    pub async fn count(&self, filter: &Filter) -> Result<i64, DatabaseError> {
        let SqlResult { query, params } = filter.to_count_sql();
        let mut q = sqlx::query(&query);
        for p in &params {
            q = bind_param(q, p);
        }
        let row = q.fetch_one(&self.pool).await?;
        let count: i64 = row.try_get("count")?;
        Ok(count)
    }
}

fn parse_id(id: &str) -> Option<Uuid> {
    Uuid::parse_str(id).ok()
}

/// Assign identity and audit timestamps server-side. Whatever the caller
/// sent for these columns is replaced.
fn stamp_insert(record: &mut Map<String, Value>) {
    let now = Utc::now().to_rfc3339();
    record.insert("id".to_string(), Value::String(Uuid::new_v4().to_string()));
    record.insert("created_at".to_string(), Value::String(now.clone()));
    record.insert("updated_at".to_string(), Value::String(now));
}

/// Every update refreshes updated_at, whether or not the caller mentioned it
fn stamp_update(changes: &mut Map<String, Value>) {
    changes.insert(
        "updated_at".to_string(),
        Value::String(Utc::now().to_rfc3339()),
    );
}

fn insert_sql(table_name: &str) -> String {
    let table = DatabaseManager::quote_identifier(table_name);
    format!(
        "INSERT INTO {table} SELECT * FROM jsonb_populate_record(NULL::{table}, $1) \
         RETURNING row_to_json({table}.*) AS row",
    )
}

fn update_sql(table_name: &str, changes: &Map<String, Value>) -> Result<String, DatabaseError> {
    let mut assignments = vec![];
    for column in changes.keys() {
        if !DatabaseManager::is_valid_identifier(column) {
            return Err(DatabaseError::InvalidIdentifier(column.clone()));
        }
        let quoted = DatabaseManager::quote_identifier(column);
        assignments.push(format!("{quoted} = p.{quoted}"));
    }

    let table = DatabaseManager::quote_identifier(table_name);
    Ok(format!(
        "UPDATE {table} SET {} FROM jsonb_populate_record(NULL::{table}, $2) p \
         WHERE {table}.\"id\" = $1 RETURNING row_to_json({table}.*) AS row",
        assignments.join(", "),
    ))
}

fn delete_sql(table_name: &str) -> String {
    let table = DatabaseManager::quote_identifier(table_name);
    format!("DELETE FROM {table} WHERE \"id\" = $1 RETURNING row_to_json({table}.*) AS row")
}

fn bind_param<'q>(
    q: sqlx::query::Query<'q, sqlx::Postgres, PgArguments>,
    v: &'q Value,
) -> sqlx::query::Query<'q, sqlx::Postgres, PgArguments> {
    match v {
        Value::Null => {
            let none: Option<String> = None;
            q.bind(none)
        }
        Value::Bool(b) => q.bind(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                q.bind(i)
            } else if let Some(f) = n.as_f64() {
                q.bind(f)
            } else {
                q.bind(n.to_string())
            }
        }
        Value::String(s) => q.bind(s),
        // Arrays/objects bind as JSONB
        _ => q.bind(v.clone()),
    }
}
