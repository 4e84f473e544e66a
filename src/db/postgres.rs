use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    postgres::{PgArguments, PgConnectOptions, PgRow},
    query::Query,
    Connection, Executor, PgConnection, Postgres, Row,
};

use super::{
    indexes::{GeometryColumns, IndexInfo, IndexInventory},
    sql::{Param, Statement},
    statements::{self, MAINTENANCE_DB},
    Cluster,
};
use crate::{
    config::PgSettings,
    dates::DateStatus,
    error::{Result, SyncError},
};

/// A Postgres cluster reached over sqlx.  Opens a short lived connection
/// per operation, to the maintenance database for cluster level statements.
#[derive(Clone)]
pub struct PgCluster {
    options: PgConnectOptions,
}

impl PgCluster {
    pub fn new(settings: &PgSettings) -> Self {
        let mut options = PgConnectOptions::new()
            .port(settings.port)
            .username(&settings.user);
        if let Some(host) = &settings.host {
            options = options.host(host);
        }
        if let Some(password) = &settings.password {
            options = options.password(password);
        }
        PgCluster { options }
    }

    async fn connect(&self, db: &str, intent: &str) -> Result<PgConnection> {
        PgConnection::connect_with(&self.options.clone().database(db))
            .await
            .map_err(|e| SyncError::database(format!("{} (connecting to {})", intent, db), e))
    }

    async fn fetch_all(&self, db: &str, statement: &Statement, intent: &str) -> Result<Vec<PgRow>> {
        let mut conn = self.connect(db, intent).await?;
        let rows = bind_params(statement)
            .fetch_all(&mut conn)
            .await
            .map_err(|e| SyncError::database(intent, e))?;
        let _ = conn.close().await;
        Ok(rows)
    }

    async fn fetch_optional(&self, db: &str, statement: &Statement, intent: &str) -> Result<Option<PgRow>> {
        let mut conn = self.connect(db, intent).await?;
        let row = bind_params(statement)
            .fetch_optional(&mut conn)
            .await
            .map_err(|e| SyncError::database(intent, e))?;
        let _ = conn.close().await;
        Ok(row)
    }

    async fn fetch_strings(&self, db: &str, statement: &Statement, intent: &str) -> Result<Vec<String>> {
        self.fetch_all(db, statement, intent)
            .await?
            .iter()
            .map(|row| row.try_get::<String, _>(0))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| SyncError::database(intent, e))
    }
}

fn bind_params(statement: &Statement) -> Query<'_, Postgres, PgArguments> {
    let mut query = sqlx::query(&statement.sql);
    for param in &statement.params {
        query = match param {
            Param::Int(v) => query.bind(*v),
            Param::Text(v) => query.bind(v.as_str()),
            Param::TextArray(v) => query.bind(v.clone()),
        };
    }
    query
}

/// Statements without parameters go over the simple query protocol, which
/// `CREATE DATABASE` and friends require.
async fn run(conn: &mut PgConnection, statement: &Statement) -> std::result::Result<(), sqlx::Error> {
    if statement.params.is_empty() {
        conn.execute(sqlx::raw_sql(&statement.sql)).await?;
    } else {
        bind_params(statement).execute(conn).await?;
    }
    Ok(())
}

#[async_trait]
impl Cluster for PgCluster {
    async fn database_exists(&self, name: &str) -> Result<bool> {
        let row = self
            .fetch_optional(
                MAINTENANCE_DB,
                &statements::database_exists(name),
                "checking database existence",
            )
            .await?;
        Ok(row.is_some())
    }

    async fn database_created(&self, name: &str) -> Result<DateStatus> {
        let intent = "getting database creation date";
        let row = self
            .fetch_optional(MAINTENANCE_DB, &statements::database_created(name), intent)
            .await?;
        match row {
            Some(row) => {
                let modified: Option<DateTime<Utc>> =
                    row.try_get(0).map_err(|e| SyncError::database(intent, e))?;
                Ok(DateStatus::from_timestamp(modified))
            }
            None => Ok(DateStatus::Unknown),
        }
    }

    async fn database_names(&self) -> Result<Vec<String>> {
        self.fetch_strings(MAINTENANCE_DB, &statements::database_names(), "listing databases")
            .await
    }

    async fn create_database(&self, name: &str) -> Result<()> {
        self.execute(MAINTENANCE_DB, &statements::create_database(name), "creating database")
            .await
    }

    async fn drop_database(&self, name: &str) -> Result<()> {
        self.execute(MAINTENANCE_DB, &statements::drop_database(name), "deleting database")
            .await
    }

    async fn rename_database(&self, from: &str, to: &str) -> Result<()> {
        self.execute(
            MAINTENANCE_DB,
            &statements::rename_database(from, to),
            "renaming database",
        )
        .await
    }

    async fn comment_on_database(&self, name: &str, comment: &str) -> Result<()> {
        self.execute(
            MAINTENANCE_DB,
            &statements::comment_on_database(name, comment),
            "setting database comment",
        )
        .await
    }

    async fn create_extension(&self, db: &str, extension: &str) -> Result<()> {
        self.execute(db, &statements::create_extension(extension), "creating extension")
            .await
    }

    async fn create_schema(&self, db: &str, schema: &str) -> Result<()> {
        self.execute(db, &statements::create_schema(schema), "creating schema")
            .await
    }

    async fn schema_names(&self, db: &str) -> Result<Vec<String>> {
        self.fetch_strings(db, &statements::schema_names(), "getting schema names")
            .await
    }

    async fn rename_schema(&self, db: &str, from: &str, to: &str) -> Result<()> {
        self.execute(db, &statements::rename_schema(from, to), "renaming schema")
            .await
    }

    async fn role_exists(&self, role: &str) -> Result<bool> {
        let row = self
            .fetch_optional(
                MAINTENANCE_DB,
                &statements::role_exists(role),
                "checking role existence",
            )
            .await?;
        Ok(row.is_some())
    }

    async fn create_role(&self, role: &str, password: &str) -> Result<()> {
        self.execute(
            MAINTENANCE_DB,
            &statements::create_role(role, password),
            "creating role",
        )
        .await
    }

    async fn drop_role(&self, role: &str) -> Result<()> {
        self.execute(MAINTENANCE_DB, &statements::drop_role(role), "deleting role")
            .await
    }

    async fn active_connections(&self, db: &str) -> Result<Vec<i32>> {
        let intent = "getting active connections";
        self.fetch_all(MAINTENANCE_DB, &statements::active_connections(db), intent)
            .await?
            .iter()
            .map(|row| row.try_get::<i32, _>(0))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| SyncError::database(intent, e))
    }

    async fn terminate_backend(&self, pid: i32) -> Result<()> {
        self.execute(
            MAINTENANCE_DB,
            &statements::terminate_backend(pid),
            "closing active connection",
        )
        .await
    }

    async fn index_inventory(&self, db: &str, schemas: &[String]) -> Result<IndexInventory> {
        let intent = "getting indexes";
        let rows = self
            .fetch_all(db, &statements::index_inventory(schemas), intent)
            .await?;
        let indexes = rows
            .iter()
            .map(|row| -> std::result::Result<IndexInfo, sqlx::Error> {
                Ok(IndexInfo {
                    schema: row.try_get("schema_name")?,
                    table: row.try_get("table_name")?,
                    name: row.try_get("index_name")?,
                    access_method: row.try_get("index_type")?,
                    is_unique: row.try_get("is_unique")?,
                    is_primary: row.try_get("is_primary")?,
                    columns: row.try_get("indexed_columns")?,
                })
            })
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| SyncError::database(intent, e))?;
        Ok(IndexInventory::new(indexes))
    }

    async fn geometry_columns(&self, db: &str, schema: &str, tables: &[String]) -> Result<GeometryColumns> {
        let intent = "getting geometry column names";
        let rows = self
            .fetch_all(db, &statements::geometry_columns(schema, tables), intent)
            .await?;
        let mut columns = GeometryColumns::default();
        for row in rows {
            let table: String = row.try_get(0).map_err(|e| SyncError::database(intent, e))?;
            let column: String = row.try_get(1).map_err(|e| SyncError::database(intent, e))?;
            columns.insert(schema, &table, &column);
        }
        Ok(columns)
    }

    async fn execute(&self, db: &str, statement: &Statement, intent: &str) -> Result<()> {
        let mut conn = self.connect(db, intent).await?;
        run(&mut conn, statement)
            .await
            .map_err(|e| SyncError::database(intent, e))?;
        let _ = conn.close().await;
        Ok(())
    }

    async fn execute_in_transaction(&self, db: &str, statements: &[Statement], intent: &str) -> Result<()> {
        let mut conn = self.connect(db, intent).await?;
        let mut tx = conn
            .begin()
            .await
            .map_err(|e| SyncError::database(intent, e))?;
        for statement in statements {
            // dropping the transaction on error rolls it back
            run(&mut *tx, statement)
                .await
                .map_err(|e| SyncError::database(intent, e))?;
        }
        tx.commit().await.map_err(|e| SyncError::database(intent, e))?;
        let _ = conn.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::*;

    fn settings() -> PgSettings {
        PgSettings {
            host: Some("localhost".to_string()),
            port: 5432,
            user: "postgres".to_string(),
            password: std::env::var("PGPASSWORD").ok(),
        }
    }

    #[ignore]
    #[tokio::test]
    async fn create_and_drop_database() -> std::result::Result<(), Box<dyn Error>> {
        let cluster = PgCluster::new(&settings());
        let name = "tmp_cluster_test";
        cluster.create_database(name).await?;
        assert!(cluster.database_exists(name).await?);
        assert!(cluster.database_created(name).await?.known().is_some());
        cluster.drop_database(name).await?;
        assert!(!cluster.database_exists(name).await?);
        Ok(())
    }

    #[ignore]
    #[tokio::test]
    async fn read_inventory() -> std::result::Result<(), Box<dyn Error>> {
        let cluster = PgCluster::new(&settings());
        let inventory = cluster
            .index_inventory("postgres", &["public".to_string()])
            .await?;
        println!("{:?}", inventory);
        Ok(())
    }
}
