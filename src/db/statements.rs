//! The statements issued against the cluster.  Cluster level statements run
//! on the maintenance database, the rest on the database they modify.

use super::sql::{ident_list, Ident, Literal, Param, QualifiedName, Statement};

pub const MAINTENANCE_DB: &str = "postgres";

pub fn create_database(name: &str) -> Statement {
    Statement::new(format!("CREATE DATABASE {}", Ident(name)))
}

/// Disconnects remaining sessions before dropping.
pub fn drop_database(name: &str) -> Statement {
    Statement::new(format!("DROP DATABASE IF EXISTS {} WITH (FORCE)", Ident(name)))
}

pub fn rename_database(from: &str, to: &str) -> Statement {
    Statement::new(format!(
        "ALTER DATABASE {} RENAME TO {}",
        Ident(from),
        Ident(to)
    ))
}

pub fn comment_on_database(name: &str, comment: &str) -> Statement {
    Statement::new(format!(
        "COMMENT ON DATABASE {} IS {}",
        Ident(name),
        Literal(comment)
    ))
}

pub fn create_extension(extension: &str) -> Statement {
    Statement::new(format!("CREATE EXTENSION IF NOT EXISTS {}", Ident(extension)))
}

pub fn create_schema(schema: &str) -> Statement {
    Statement::new(format!("CREATE SCHEMA {}", Ident(schema)))
}

pub fn rename_schema(from: &str, to: &str) -> Statement {
    Statement::new(format!(
        "ALTER SCHEMA {} RENAME TO {}",
        Ident(from),
        Ident(to)
    ))
}

pub fn create_role(role: &str, password: &str) -> Statement {
    Statement::new(format!(
        "CREATE ROLE {} WITH LOGIN PASSWORD {}",
        Ident(role),
        Literal(password)
    ))
}

pub fn drop_role(role: &str) -> Statement {
    Statement::new(format!("DROP ROLE IF EXISTS {}", Ident(role)))
}

/// The three steps of a surrogate primary key.  Must run in one transaction.
pub fn primary_key(schema: &str, table: &str, column: &str) -> Vec<Statement> {
    let table = QualifiedName {
        schema,
        name: table,
    };
    vec![
        Statement::new(format!(
            "ALTER TABLE {} ALTER COLUMN {} SET NOT NULL",
            table,
            Ident(column)
        )),
        Statement::new(format!(
            "ALTER TABLE {} ALTER COLUMN {} ADD GENERATED BY DEFAULT AS IDENTITY",
            table,
            Ident(column)
        )),
        Statement::new(format!(
            "ALTER TABLE {} ADD PRIMARY KEY ({})",
            table,
            Ident(column)
        )),
    ]
}

pub fn create_index(index_name: &str, schema: &str, table: &str, columns: &[String]) -> Statement {
    Statement::new(format!(
        "CREATE INDEX {} ON {} ({})",
        Ident(index_name),
        QualifiedName {
            schema,
            name: table
        },
        ident_list(columns)
    ))
}

pub fn create_spatial_index(index_name: &str, schema: &str, table: &str, column: &str) -> Statement {
    Statement::new(format!(
        "CREATE INDEX {} ON {} USING GIST ({})",
        Ident(index_name),
        QualifiedName {
            schema,
            name: table
        },
        Ident(column)
    ))
}

pub fn terminate_backend(pid: i32) -> Statement {
    Statement::new("SELECT pg_terminate_backend($1)").bind(Param::Int(pid))
}

pub fn database_exists(name: &str) -> Statement {
    Statement::new("SELECT 1 FROM pg_database WHERE datname = $1").bind(Param::Text(name.to_string()))
}

/// Modification time of `PG_VERSION`, written once when the database is created.
pub fn database_created(name: &str) -> Statement {
    Statement::new(
        r"
SELECT (pg_stat_file('base/' || oid || '/PG_VERSION')).modification
FROM pg_database
WHERE datname = $1",
    )
    .bind(Param::Text(name.to_string()))
}

pub fn database_names() -> Statement {
    Statement::new("SELECT datname::text FROM pg_database WHERE NOT datistemplate")
}

pub fn role_exists(role: &str) -> Statement {
    Statement::new("SELECT 1 FROM pg_roles WHERE rolname = $1").bind(Param::Text(role.to_string()))
}

pub fn active_connections(name: &str) -> Statement {
    Statement::new(
        r"
SELECT pid
FROM pg_stat_activity
WHERE datname = $1
    AND backend_type != 'autovacuum worker'
    AND pid <> pg_backend_pid()",
    )
    .bind(Param::Text(name.to_string()))
}

pub fn schema_names() -> Statement {
    Statement::new("SELECT nspname::text FROM pg_namespace")
}

/// One row per index on ordinary tables in the given schemas, columns in
/// index order.  Expression columns come back as empty strings.
pub fn index_inventory(schemas: &[String]) -> Statement {
    Statement::new(
        r"
SELECT
    n.nspname::text AS schema_name,
    t.relname::text AS table_name,
    i.relname::text AS index_name,
    am.amname::text AS index_type,
    ix.indisunique AS is_unique,
    ix.indisprimary AS is_primary,
    array_agg(COALESCE(a.attname::text, '') ORDER BY x.ord) AS indexed_columns
FROM pg_class t
    JOIN pg_namespace n ON n.oid = t.relnamespace
    JOIN pg_index ix ON t.oid = ix.indrelid
    JOIN pg_class i ON i.oid = ix.indexrelid
    JOIN pg_am am ON am.oid = i.relam
    JOIN unnest(ix.indkey) WITH ORDINALITY AS x (attnum, ord) ON TRUE
    LEFT JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = x.attnum
WHERE t.relkind = 'r'
    AND n.nspname = ANY($1)
GROUP BY n.nspname, t.relname, i.relname, am.amname, ix.indisunique, ix.indisprimary
ORDER BY schema_name, table_name, index_name",
    )
    .bind(Param::TextArray(schemas.to_vec()))
}

pub fn geometry_columns(schema: &str, tables: &[String]) -> Statement {
    Statement::new(
        r"
SELECT f_table_name::text, f_geometry_column::text
FROM geometry_columns
WHERE f_table_schema = $1
    AND f_table_name = ANY($2)",
    )
    .bind(Param::Text(schema.to_string()))
    .bind(Param::TextArray(tables.to_vec()))
}
