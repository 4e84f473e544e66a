use std::collections::BTreeMap;

use itertools::Itertools;

use super::{sql::Statement, statements};
use crate::config::IndexingConfig;

pub const SPATIAL_ACCESS_METHOD: &str = "gist";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexInfo {
    pub schema: String,
    pub table: String,
    pub name: String,
    pub access_method: String,
    pub is_unique: bool,
    pub is_primary: bool,
    pub columns: Vec<String>,
}

/// Existing indexes of a set of schemas, as read from the catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexInventory {
    pub indexes: Vec<IndexInfo>,
}

impl IndexInventory {
    pub fn new(indexes: Vec<IndexInfo>) -> Self {
        IndexInventory { indexes }
    }

    fn on_table<'a>(&'a self, schema: &'a str, table: &'a str) -> impl Iterator<Item = &'a IndexInfo> {
        self.indexes
            .iter()
            .filter(move |ix| ix.schema == schema && ix.table == table)
    }

    pub fn has_primary_key(&self, schema: &str, table: &str) -> bool {
        self.on_table(schema, table).any(|ix| ix.is_primary)
    }

    /// A spatial index counts only if `column` is its sole column.
    pub fn has_spatial_index(&self, schema: &str, table: &str, column: &str) -> bool {
        self.on_table(schema, table).any(|ix| {
            ix.access_method == SPATIAL_ACCESS_METHOD && ix.columns.len() == 1 && ix.columns[0] == column
        })
    }

    /// Any index over exactly these columns, in any order.
    pub fn has_index(&self, schema: &str, table: &str, columns: &[String]) -> bool {
        let wanted: Vec<&String> = columns.iter().sorted().collect();
        self.on_table(schema, table)
            .any(|ix| ix.columns.iter().sorted().collect::<Vec<_>>() == wanted)
    }
}

/// Geometry columns per (schema, table).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeometryColumns(BTreeMap<(String, String), Vec<String>>);

impl GeometryColumns {
    pub fn insert(&mut self, schema: &str, table: &str, column: &str) {
        self.0
            .entry((schema.to_string(), table.to_string()))
            .or_default()
            .push(column.to_string());
    }

    pub fn columns(&self, schema: &str, table: &str) -> &[String] {
        self.0
            .get(&(schema.to_string(), table.to_string()))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn merge(&mut self, other: GeometryColumns) {
        for (key, columns) in other.0 {
            self.0.entry(key).or_default().extend(columns);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexAction {
    PrimaryKey {
        schema: String,
        table: String,
        column: String,
    },
    SpatialIndex {
        schema: String,
        table: String,
        column: String,
    },
    CompositeIndex {
        schema: String,
        table: String,
        columns: Vec<String>,
    },
}

impl IndexAction {
    /// Deterministic, so a rerun computes the same name.
    pub fn index_name(&self) -> String {
        use IndexAction::*;
        match self {
            PrimaryKey { table, .. } => format!("{}_pkey", table),
            SpatialIndex { table, column, .. } => format!("{}_{}_geom_idx", table, column),
            CompositeIndex { table, columns, .. } => {
                format!("{}_{}_idx", table, columns.join("_"))
            }
        }
    }

    pub fn statements(&self) -> Vec<Statement> {
        use IndexAction::*;
        match self {
            PrimaryKey {
                schema,
                table,
                column,
            } => statements::primary_key(schema, table, column),
            SpatialIndex {
                schema,
                table,
                column,
            } => vec![statements::create_spatial_index(
                &self.index_name(),
                schema,
                table,
                column,
            )],
            CompositeIndex {
                schema,
                table,
                columns,
            } => vec![statements::create_index(
                &self.index_name(),
                schema,
                table,
                columns,
            )],
        }
    }

    /// The primary key takes several statements that must commit together.
    pub fn is_transactional(&self) -> bool {
        matches!(self, IndexAction::PrimaryKey { .. })
    }

    pub fn describe(&self) -> String {
        use IndexAction::*;
        match self {
            PrimaryKey {
                schema,
                table,
                column,
            } => format!(
                "creating primary key on column {} in table {}.{}",
                column, schema, table
            ),
            SpatialIndex {
                schema,
                table,
                column,
            } => format!(
                "creating geometry index on column {} in table {}.{}",
                column, schema, table
            ),
            CompositeIndex {
                schema,
                table,
                columns,
            } => format!(
                "creating index on column(s) {} in table {}.{}",
                columns.join(", "),
                schema,
                table
            ),
        }
    }

    /// What the catalog will report once this action has run.
    pub fn resulting_index(&self) -> IndexInfo {
        use IndexAction::*;
        let (schema, table, access_method, is_primary, columns) = match self {
            PrimaryKey {
                schema,
                table,
                column,
            } => (schema, table, "btree", true, vec![column.clone()]),
            SpatialIndex {
                schema,
                table,
                column,
            } => (schema, table, SPATIAL_ACCESS_METHOD, false, vec![column.clone()]),
            CompositeIndex {
                schema,
                table,
                columns,
            } => (schema, table, "btree", false, columns.clone()),
        };
        IndexInfo {
            schema: schema.clone(),
            table: table.clone(),
            name: self.index_name(),
            access_method: access_method.to_string(),
            is_unique: is_primary,
            is_primary,
            columns,
        }
    }
}

/// Minimal list of actions that makes the indexes of `spec`'s tables match
/// it.  Matching is structural, never by index name.
pub fn reconcile(
    spec: &IndexingConfig,
    inventory: &IndexInventory,
    geometry: &GeometryColumns,
) -> Vec<IndexAction> {
    let mut working = inventory.clone();
    let mut actions: Vec<IndexAction> = Vec::new();
    let mut emit = |action: IndexAction, working: &mut IndexInventory| {
        working.indexes.push(action.resulting_index());
        actions.push(action);
    };

    for schema in &spec.schemas {
        for table in &spec.tables {
            if let Some(column) = &spec.id_column {
                if !working.has_primary_key(schema, table) {
                    emit(
                        IndexAction::PrimaryKey {
                            schema: schema.clone(),
                            table: table.clone(),
                            column: column.clone(),
                        },
                        &mut working,
                    );
                }
            }

            if spec.geom_index {
                for column in geometry.columns(schema, table) {
                    if !working.has_spatial_index(schema, table, column) {
                        emit(
                            IndexAction::SpatialIndex {
                                schema: schema.clone(),
                                table: table.clone(),
                                column: column.clone(),
                            },
                            &mut working,
                        );
                    }
                }
            }

            for columns in spec.indexes.iter().filter(|c| !c.is_empty()) {
                if !working.has_index(schema, table, columns) {
                    emit(
                        IndexAction::CompositeIndex {
                            schema: schema.clone(),
                            table: table.clone(),
                            columns: columns.clone(),
                        },
                        &mut working,
                    );
                }
            }
        }
    }

    actions
}
