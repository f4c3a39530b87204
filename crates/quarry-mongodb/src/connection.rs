//! MongoDB connection bootstrap with pool configuration

use bson::doc;
use mongodb::{
    options::{ClientOptions, ServerApi, ServerApiVersion},
    Client, Database,
};
use quarry_common::{QuarryError, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

use crate::store::MongoStore;

/// Connection pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Minimum number of connections in the pool
    pub min_pool_size: Option<u32>,
    /// Maximum number of connections in the pool
    pub max_pool_size: Option<u32>,
    /// Maximum time a connection can remain idle before being closed (default: none)
    pub max_idle_time: Option<Duration>,
    /// Connection timeout (default: 10s)
    pub connect_timeout: Option<Duration>,
    /// Server selection timeout (default: 30s)
    pub server_selection_timeout: Option<Duration>,
    /// Application name for server logs
    pub app_name: Option<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_pool_size: Some(5),
            max_pool_size: Some(20),
            max_idle_time: None,
            connect_timeout: Some(Duration::from_secs(10)),
            server_selection_timeout: Some(Duration::from_secs(30)),
            app_name: Some("quarry".to_string()),
        }
    }
}

impl PoolConfig {
    fn apply(self, options: &mut ClientOptions) {
        if let Some(min) = self.min_pool_size {
            options.min_pool_size = Some(min);
        }
        if let Some(max) = self.max_pool_size {
            options.max_pool_size = Some(max);
        }
        if let Some(idle) = self.max_idle_time {
            options.max_idle_time = Some(idle);
        }
        if let Some(connect) = self.connect_timeout {
            options.connect_timeout = Some(connect);
        }
        if let Some(server_sel) = self.server_selection_timeout {
            options.server_selection_timeout = Some(server_sel);
        }
        if let Some(app) = self.app_name {
            options.app_name = Some(app);
        }
    }
}

/// Connected client handle shared by every schema
///
/// Cloning is cheap; the underlying client is reference counted by the driver.
#[derive(Debug, Clone)]
pub struct Connection {
    client: Client,
    default_database: Option<String>,
}

impl Connection {
    /// Connect with default pool settings
    pub async fn connect(connection_string: &str) -> Result<Self> {
        Self::with_config(connection_string, PoolConfig::default()).await
    }

    /// Connect with a custom pool configuration.
    ///
    /// The server is pinged before returning; every failure is reported as a
    /// connection error.
    #[instrument(skip(connection_string, config), fields(app_name = ?config.app_name))]
    pub async fn with_config(connection_string: &str, config: PoolConfig) -> Result<Self> {
        if connection_string.is_empty() {
            return Err(QuarryError::Connection(
                "Connection string cannot be empty".to_string(),
            ));
        }

        info!("Connecting to MongoDB");
        let mut client_options = ClientOptions::parse(connection_string)
            .await
            .map_err(|e| QuarryError::Connection(format!("Invalid connection string: {}", e)))?;

        config.apply(&mut client_options);

        // Set stable API version for compatibility
        let server_api = ServerApi::builder().version(ServerApiVersion::V1).build();
        client_options.server_api = Some(server_api);

        let default_database = client_options.default_database.clone();
        let client = Client::with_options(client_options)
            .map_err(|e| QuarryError::from(e).into_connection_error())?;

        let connection = Self {
            client,
            default_database,
        };
        connection.ping().await?;

        info!("MongoDB connection established");
        Ok(connection)
    }

    /// Get a reference to the client
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Database named in the connection string, if any
    pub fn default_database_name(&self) -> Option<&str> {
        self.default_database.as_deref()
    }

    pub fn database(&self, name: &str) -> Database {
        self.client.database(name)
    }

    /// Store bound to database `name`
    pub fn store(&self, name: &str) -> Arc<MongoStore> {
        Arc::new(MongoStore::new(self.database(name)))
    }

    /// Store bound to the database named in the connection string
    pub fn default_store(&self) -> Result<Arc<MongoStore>> {
        let name = self.default_database.as_deref().ok_or_else(|| {
            QuarryError::Connection(
                "No default database specified in connection string".to_string(),
            )
        })?;
        Ok(self.store(name))
    }

    /// Check the server is reachable
    pub async fn ping(&self) -> Result<()> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| QuarryError::Connection(format!("Ping failed: {}", e)))?;
        Ok(())
    }

    /// List all database names on the server
    pub async fn list_database_names(&self) -> Result<Vec<String>> {
        Ok(self.client.list_database_names().await?)
    }
}
