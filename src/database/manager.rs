use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Errors from the storage layer
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Missing configuration: {0}")]
    ConfigMissing(&'static str),

    #[error("Invalid database URL")]
    InvalidDatabaseUrl,

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Query error: {0}")]
    QueryError(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Connection pool construction and health checks
pub struct DatabaseManager;

impl DatabaseManager {
    /// Build the application pool from DATABASE_URL
    pub async fn connect() -> Result<PgPool, DatabaseError> {
        let database_url =
            std::env::var("DATABASE_URL").map_err(|_| DatabaseError::ConfigMissing("DATABASE_URL"))?;

        // Validate the URL up front so a typo fails at startup, not first query
        url::Url::parse(&database_url).map_err(|_| DatabaseError::InvalidDatabaseUrl)?;

        let config = &crate::config::CONFIG.database;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&database_url)
            .await?;

        info!("Database pool established ({} max connections)", config.max_connections);
        Ok(pool)
    }

    /// Pings the pool to ensure connectivity
    pub async fn health_check(pool: &PgPool) -> Result<(), DatabaseError> {
        sqlx::query("SELECT 1").execute(pool).await?;
        Ok(())
    }

    /// Validate table/column names used in dynamic SQL. Accepts snake_case
    /// identifiers starting with a letter or underscore.
    pub fn is_valid_identifier(name: &str) -> bool {
        let mut chars = name.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
            _ => return false,
        }
        name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    }

    /// Quote an already-validated SQL identifier
    pub fn quote_identifier(name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_identifiers() {
        assert!(DatabaseManager::is_valid_identifier("visit_reports"));
        assert!(DatabaseManager::is_valid_identifier("_private"));
        assert!(DatabaseManager::is_valid_identifier("col9"));
        assert!(!DatabaseManager::is_valid_identifier(""));
        assert!(!DatabaseManager::is_valid_identifier("9col"));
        assert!(!DatabaseManager::is_valid_identifier("drop table"));
        assert!(!DatabaseManager::is_valid_identifier("a;b"));
    }

    #[test]
    fn quotes_identifiers() {
        assert_eq!(DatabaseManager::quote_identifier("dealers"), "\"dealers\"");
    }
}
