//! Registers the secondary database as a DataFusion table.
//!
//! Only compiled with the `postgres` or `sqlite` feature. The connection
//! string comes from `DATABASE_URL`: `postgres://` / `postgresql://` URLs go
//! to PostgreSQL, anything else (optionally prefixed `sqlite://`) is a SQLite
//! file path.

use std::sync::Arc;

use datafusion::prelude::SessionContext;
use datafusion::sql::TableReference;
use tracing::{info, instrument};

use crate::error::{MirrorError, Result};
use crate::security::SecureString;

#[cfg(feature = "postgres")]
use datafusion_table_providers::{
    postgres::PostgresTableFactory, sql::db_connection_pool::postgrespool::PostgresConnectionPool,
    util::secrets::to_secret_map,
};

#[cfg(feature = "sqlite")]
use datafusion_table_providers::{
    sql::db_connection_pool::{sqlitepool::SqliteConnectionPoolFactory, Mode},
    sqlite::SqliteTableFactory,
};

/// Connection parameters for a supported backend.
#[derive(Debug, Clone)]
pub enum DatabaseConfig {
    #[cfg(feature = "postgres")]
    PostgreSQL {
        host: String,
        port: u16,
        database: String,
        username: String,
        password: SecureString,
        sslmode: Option<String>,
    },
    #[cfg(feature = "sqlite")]
    SQLite(String),
}

impl DatabaseConfig {
    /// Parses a connection string.
    pub fn from_url(connection: &SecureString) -> Result<Self> {
        let raw = connection.expose();
        if raw.starts_with("postgres://") || raw.starts_with("postgresql://") {
            #[cfg(feature = "postgres")]
            return Self::parse_postgres(raw);
            #[cfg(not(feature = "postgres"))]
            return Err(MirrorError::Configuration(
                "PostgreSQL connection strings require the `postgres` feature".to_string(),
            ));
        }

        let path = raw.strip_prefix("sqlite://").unwrap_or(raw);
        if path.is_empty() {
            return Err(MirrorError::Configuration(
                "Database connection string is empty".to_string(),
            ));
        }
        #[cfg(feature = "sqlite")]
        return Ok(Self::SQLite(path.to_string()));
        #[cfg(not(feature = "sqlite"))]
        return Err(MirrorError::Configuration(format!(
            "SQLite database '{path}' requires the `sqlite` feature"
        )));
    }

    #[cfg(feature = "postgres")]
    fn parse_postgres(raw: &str) -> Result<Self> {
        let url = url::Url::parse(raw).map_err(|e| {
            MirrorError::Configuration(format!("Invalid PostgreSQL connection string: {e}"))
        })?;
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| {
                MirrorError::Configuration("PostgreSQL connection string has no host".to_string())
            })?
            .to_string();
        let database = url.path().trim_start_matches('/').to_string();
        if database.is_empty() {
            return Err(MirrorError::Configuration(
                "PostgreSQL connection string has no database name".to_string(),
            ));
        }
        let sslmode = url
            .query_pairs()
            .find(|(k, _)| k == "sslmode")
            .map(|(_, v)| v.into_owned());

        Ok(Self::PostgreSQL {
            host,
            port: url.port().unwrap_or(5432),
            database,
            username: url.username().to_string(),
            password: SecureString::new(url.password().unwrap_or_default()),
            sslmode,
        })
    }

    pub fn database_type(&self) -> &'static str {
        match self {
            #[cfg(feature = "postgres")]
            Self::PostgreSQL { .. } => "PostgreSQL",
            #[cfg(feature = "sqlite")]
            Self::SQLite(_) => "SQLite",
        }
    }
}

/// A database table exposed to DataFusion.
#[derive(Debug, Clone)]
pub struct DatabaseSource {
    config: DatabaseConfig,
    table_name: String,
}

impl DatabaseSource {
    pub fn new(config: DatabaseConfig, table_name: impl Into<String>) -> Self {
        Self {
            config,
            table_name: table_name.into(),
        }
    }

    fn error(&self, message: String) -> MirrorError {
        MirrorError::data_source(self.config.database_type(), message)
    }

    async fn create_table_provider(&self) -> Result<Arc<dyn datafusion::catalog::TableProvider>> {
        let table = TableReference::bare(self.table_name.as_str());
        match &self.config {
            #[cfg(feature = "postgres")]
            DatabaseConfig::PostgreSQL {
                host,
                port,
                database,
                username,
                password,
                sslmode,
            } => {
                let mut params = std::collections::HashMap::new();
                params.insert("host".to_string(), host.clone());
                params.insert("port".to_string(), port.to_string());
                params.insert("db".to_string(), database.clone());
                params.insert("user".to_string(), username.clone());
                params.insert("pass".to_string(), password.expose().to_string());
                if let Some(ssl) = sslmode {
                    params.insert("sslmode".to_string(), ssl.clone());
                }

                let pool = PostgresConnectionPool::new(to_secret_map(params))
                    .await
                    .map_err(|e| self.error(format!("Failed to create connection pool: {e}")))?;
                PostgresTableFactory::new(Arc::new(pool))
                    .table_provider(table)
                    .await
                    .map_err(|e| {
                        self.error(format!("Failed to open table '{}': {e}", self.table_name))
                    })
            }
            #[cfg(feature = "sqlite")]
            DatabaseConfig::SQLite(path) => {
                let pool = SqliteConnectionPoolFactory::new(
                    path,
                    Mode::File,
                    std::time::Duration::from_millis(5000),
                )
                .build()
                .await
                .map_err(|e| self.error(format!("Failed to create connection pool: {e}")))?;
                SqliteTableFactory::new(Arc::new(pool))
                    .table_provider(table)
                    .await
                    .map_err(|e| {
                        self.error(format!("Failed to open table '{}': {e}", self.table_name))
                    })
            }
        }
    }

    /// Registers the table in `ctx` under its own name.
    #[instrument(skip(self, ctx), fields(db_type = %self.config.database_type(), table = %self.table_name))]
    pub async fn register(&self, ctx: &SessionContext) -> Result<()> {
        let provider = self.create_table_provider().await?;
        ctx.register_table(self.table_name.as_str(), provider)
            .map_err(|e| {
                self.error(format!("Failed to register table '{}': {e}", self.table_name))
            })?;
        info!("Registered database table");
        Ok(())
    }
}
