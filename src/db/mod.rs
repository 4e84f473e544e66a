pub mod indexes;
pub mod postgres;
pub mod sql;
pub mod statements;

#[cfg(test)]
pub mod memory;

use async_trait::async_trait;

use crate::dates::DateStatus;
use crate::error::Result;
use indexes::{GeometryColumns, IndexInventory};
use sql::Statement;

/// Operations on a Postgres cluster.  Cluster level operations connect to the
/// maintenance database, the others to the named database.
#[async_trait]
pub trait Cluster: Send + Sync {
    async fn database_exists(&self, name: &str) -> Result<bool>;

    /// When the database was created, from the modification time of its
    /// `PG_VERSION` file.
    async fn database_created(&self, name: &str) -> Result<DateStatus>;

    async fn database_names(&self) -> Result<Vec<String>>;

    async fn create_database(&self, name: &str) -> Result<()>;

    async fn drop_database(&self, name: &str) -> Result<()>;

    async fn rename_database(&self, from: &str, to: &str) -> Result<()>;

    async fn comment_on_database(&self, name: &str, comment: &str) -> Result<()>;

    async fn create_extension(&self, db: &str, extension: &str) -> Result<()>;

    async fn create_schema(&self, db: &str, schema: &str) -> Result<()>;

    async fn schema_names(&self, db: &str) -> Result<Vec<String>>;

    async fn rename_schema(&self, db: &str, from: &str, to: &str) -> Result<()>;

    async fn role_exists(&self, role: &str) -> Result<bool>;

    async fn create_role(&self, role: &str, password: &str) -> Result<()>;

    async fn drop_role(&self, role: &str) -> Result<()>;

    /// Backend pids connected to `db`.
    async fn active_connections(&self, db: &str) -> Result<Vec<i32>>;

    async fn terminate_backend(&self, pid: i32) -> Result<()>;

    async fn index_inventory(&self, db: &str, schemas: &[String]) -> Result<IndexInventory>;

    async fn geometry_columns(&self, db: &str, schema: &str, tables: &[String]) -> Result<GeometryColumns>;

    /// Run one autocommitted statement.  `intent` ends up in the error.
    async fn execute(&self, db: &str, statement: &Statement, intent: &str) -> Result<()>;

    /// Run all statements in one transaction, committing only if all succeed.
    async fn execute_in_transaction(&self, db: &str, statements: &[Statement], intent: &str) -> Result<()>;
}
