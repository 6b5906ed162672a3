use serde_json::Value;
use thiserror::Error;

use crate::database::manager::DatabaseManager;

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("Invalid table name: {0}")]
    InvalidTableName(String),

    #[error("Invalid column name: {0}")]
    InvalidColumn(String),

    #[error("Invalid limit: {0}")]
    InvalidLimit(i64),
}

/// Postgres cast applied to bound parameters whose column type cannot be
/// inferred from the JSON value (dates and timestamps arrive as text).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamCast {
    None,
    Date,
    Timestamp,
}

impl ParamCast {
    fn suffix(&self) -> &'static str {
        match self {
            ParamCast::None => "",
            ParamCast::Date => "::date",
            ParamCast::Timestamp => "::timestamptz",
        }
    }
}

#[derive(Debug, Clone)]
enum Condition {
    Eq {
        column: String,
        value: Value,
        cast: ParamCast,
    },
    /// Closed range: column BETWEEN low AND high (inclusive on both ends)
    Between {
        column: String,
        low: Value,
        high: Value,
        cast: ParamCast,
    },
}

#[derive(Debug, Clone)]
pub struct SqlResult {
    pub query: String,
    pub params: Vec<Value>,
}

/// Composes the WHERE / ORDER BY / LIMIT clauses for the list-by-owner route.
/// All identifiers are validated before they reach the SQL text; values are
/// always bound as numbered parameters.
pub struct Filter {
    table_name: String,
    conditions: Vec<Condition>,
    order_desc: Option<String>,
    limit: Option<i64>,
}

impl Filter {
    pub fn new(table_name: impl Into<String>) -> Result<Self, FilterError> {
        let table_name = table_name.into();
        if !DatabaseManager::is_valid_identifier(&table_name) {
            return Err(FilterError::InvalidTableName(table_name));
        }
        Ok(Self {
            table_name,
            conditions: vec![],
            order_desc: None,
            limit: None,
        })
    }

    pub fn eq(mut self, column: &str, value: Value) -> Result<Self, FilterError> {
        Self::validate_column(column)?;
        self.conditions.push(Condition::Eq {
            column: column.to_string(),
            value,
            cast: ParamCast::None,
        });
        Ok(self)
    }

    pub fn eq_cast(mut self, column: &str, value: Value, cast: ParamCast) -> Result<Self, FilterError> {
        Self::validate_column(column)?;
        self.conditions.push(Condition::Eq {
            column: column.to_string(),
            value,
            cast,
        });
        Ok(self)
    }

    pub fn between(
        mut self,
        column: &str,
        low: Value,
        high: Value,
        cast: ParamCast,
    ) -> Result<Self, FilterError> {
        Self::validate_column(column)?;
        self.conditions.push(Condition::Between {
            column: column.to_string(),
            low,
            high,
            cast,
        });
        Ok(self)
    }

    pub fn order_desc(mut self, column: &str) -> Result<Self, FilterError> {
        Self::validate_column(column)?;
        self.order_desc = Some(column.to_string());
        Ok(self)
    }

    /// Caps at the configured maximum
    pub fn limit(mut self, limit: i64) -> Result<Self, FilterError> {
        if limit < 0 {
            return Err(FilterError::InvalidLimit(limit));
        }
        let max = crate::config::CONFIG.list.max_limit;
        self.limit = Some(limit.min(max));
        Ok(self)
    }

    /// Full row query. Rows come back as JSON via row_to_json so the same
    /// handler serves every resource table.
    pub fn to_sql(&self) -> SqlResult {
        let (where_clause, params) = self.build_where();

        let mut inner = format!(
            "SELECT * FROM {}",
            DatabaseManager::quote_identifier(&self.table_name)
        );
        if !where_clause.is_empty() {
            inner.push_str(&format!(" WHERE {}", where_clause));
        }
        if let Some(col) = &self.order_desc {
            inner.push_str(&format!(" ORDER BY {} DESC", DatabaseManager::quote_identifier(col)));
        }
        if let Some(limit) = self.limit {
            inner.push_str(&format!(" LIMIT {}", limit));
        }

        SqlResult {
            query: format!("SELECT row_to_json(t) AS row FROM ({}) t", inner),
            params,
        }
    }

    /// COUNT(*) variant sharing the WHERE clause
    pub fn to_count_sql(&self) -> SqlResult {
        let (where_clause, params) = self.build_where();
        let mut query = format!(
            "SELECT COUNT(*) AS count FROM {}",
            DatabaseManager::quote_identifier(&self.table_name)
        );
        if !where_clause.is_empty() {
            query.push_str(&format!(" WHERE {}", where_clause));
        }
        SqlResult { query, params }
    }

    fn build_where(&self) -> (String, Vec<Value>) {
        let mut parts = vec![];
        let mut params = vec![];
        for condition in &self.conditions {
            match condition {
                Condition::Eq { column, value, cast } => {
                    params.push(value.clone());
                    parts.push(format!(
                        "{} = ${}{}",
                        DatabaseManager::quote_identifier(column),
                        params.len(),
                        cast.suffix()
                    ));
                }
                Condition::Between { column, low, high, cast } => {
                    params.push(low.clone());
                    let low_idx = params.len();
                    params.push(high.clone());
                    parts.push(format!(
                        "{} BETWEEN ${}{} AND ${}{}",
                        DatabaseManager::quote_identifier(column),
                        low_idx,
                        cast.suffix(),
                        params.len(),
                        cast.suffix()
                    ));
                }
            }
        }
        (parts.join(" AND "), params)
    }

    fn validate_column(column: &str) -> Result<(), FilterError> {
        if !DatabaseManager::is_valid_identifier(column) {
            return Err(FilterError::InvalidColumn(column.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn owner_equality_with_order_and_limit() {
        let sql = Filter::new("visit_reports")
            .unwrap()
            .eq("agent_id", json!("agent-7"))
            .unwrap()
            .order_desc("visit_date")
            .unwrap()
            .limit(50)
            .unwrap()
            .to_sql();

        assert_eq!(
            sql.query,
            "SELECT row_to_json(t) AS row FROM (SELECT * FROM \"visit_reports\" \
             WHERE \"agent_id\" = $1 ORDER BY \"visit_date\" DESC LIMIT 50) t"
        );
        assert_eq!(sql.params, vec![json!("agent-7")]);
    }

    #[test]
    fn date_range_is_inclusive_between_with_cast() {
        let sql = Filter::new("attendance")
            .unwrap()
            .eq("agent_id", json!("a1"))
            .unwrap()
            .between(
                "punch_date",
                json!("2026-01-01"),
                json!("2026-01-31"),
                ParamCast::Date,
            )
            .unwrap()
            .to_sql();

        assert!(sql
            .query
            .contains("\"punch_date\" BETWEEN $2::date AND $3::date"));
        assert_eq!(sql.params.len(), 3);
    }

    #[test]
    fn limit_is_capped_at_config_max() {
        let max = crate::config::CONFIG.list.max_limit;
        let sql = Filter::new("dealers")
            .unwrap()
            .limit(max + 1000)
            .unwrap()
            .to_sql();
        assert!(sql.query.contains(&format!("LIMIT {}", max)));
    }

    #[test]
    fn rejects_bad_identifiers() {
        assert!(Filter::new("visit; DROP TABLE x").is_err());
        assert!(Filter::new("dealers")
            .unwrap()
            .eq("bad column", json!(1))
            .is_err());
    }

    #[test]
    fn count_sql_shares_where_clause() {
        let sql = Filter::new("dealers")
            .unwrap()
            .eq("region", json!("north"))
            .unwrap()
            .to_count_sql();
        assert_eq!(
            sql.query,
            "SELECT COUNT(*) AS count FROM \"dealers\" WHERE \"region\" = $1"
        );
    }
}
