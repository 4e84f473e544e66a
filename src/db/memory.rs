//! In-memory cluster used by the tests.  Keeps a journal of every mutating
//! operation so tests can check ordering.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Mutex,
};

use async_trait::async_trait;
use chrono::NaiveDate;

use super::{
    indexes::{GeometryColumns, IndexInfo, IndexInventory},
    sql::Statement,
    Cluster,
};
use crate::{
    dates::DateStatus,
    error::{Result, SyncError},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    CreateDatabase(String),
    DropDatabase(String),
    RenameDatabase(String, String),
    Comment(String, String),
    CreateExtension(String, String),
    CreateSchema(String, String),
    RenameSchema(String, String, String),
    CreateRole(String),
    DropRole(String),
    Terminate(i32),
    Execute(String, String),
    Transaction(String, Vec<String>),
}

#[derive(Debug, Clone)]
pub struct FakeDatabase {
    pub created: DateStatus,
    pub comment: Option<String>,
    pub schemas: Vec<String>,
    pub extensions: Vec<String>,
}

impl FakeDatabase {
    fn new(created: DateStatus) -> Self {
        FakeDatabase {
            created,
            comment: None,
            schemas: vec!["public".to_string()],
            extensions: Vec::new(),
        }
    }
}

type FailureRule = Box<dyn Fn(&Op) -> bool + Send>;

#[derive(Default)]
struct State {
    databases: BTreeMap<String, FakeDatabase>,
    roles: BTreeSet<String>,
    connections: BTreeMap<String, Vec<i32>>,
    journal: Vec<Op>,
    failures: Vec<FailureRule>,
    indexes: Vec<IndexInfo>,
    geometry: GeometryColumns,
    restored_schemas: Vec<String>,
}

pub struct MemoryCluster {
    state: Mutex<State>,
    today: NaiveDate,
}

impl MemoryCluster {
    pub fn new(today: NaiveDate) -> Self {
        MemoryCluster {
            state: Mutex::new(State::default()),
            today,
        }
    }

    pub fn with_database(self, name: &str, created: DateStatus) -> Self {
        self.lock()
            .databases
            .insert(name.to_string(), FakeDatabase::new(created));
        self
    }

    pub fn with_role(self, role: &str) -> Self {
        self.lock().roles.insert(role.to_string());
        self
    }

    /// Create a role outside any run.
    pub fn add_role(&self, role: &str) {
        self.lock().roles.insert(role.to_string());
    }

    pub fn with_connections(self, db: &str, pids: &[i32]) -> Self {
        self.lock()
            .connections
            .insert(db.to_string(), pids.to_vec());
        self
    }

    /// Indexes and geometry columns every staging database reports.
    pub fn with_catalog(self, indexes: Vec<IndexInfo>, geometry: GeometryColumns) -> Self {
        {
            let mut state = self.lock();
            state.indexes = indexes;
            state.geometry = geometry;
        }
        self
    }

    /// Schemas a restored dump leaves behind in every new database.
    pub fn with_restored_schemas(self, schemas: &[&str]) -> Self {
        self.lock().restored_schemas = schemas.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Make every operation matching `rule` fail.
    pub fn fail_when<F>(self, rule: F) -> Self
    where
        F: Fn(&Op) -> bool + Send + 'static,
    {
        self.lock().failures.push(Box::new(rule));
        self
    }

    pub fn journal(&self) -> Vec<Op> {
        self.lock().journal.clone()
    }

    pub fn database_list(&self) -> Vec<String> {
        self.lock().databases.keys().cloned().collect()
    }

    pub fn database(&self, name: &str) -> Option<FakeDatabase> {
        self.lock().databases.get(name).cloned()
    }

    pub fn roles(&self) -> Vec<String> {
        self.lock().roles.iter().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Journal the operation, failing it if a rule says so.
    fn record(state: &mut State, op: Op) -> Result<()> {
        if state.failures.iter().any(|rule| rule(&op)) {
            return Err(SyncError::database(format!("{:?}", op), "injected failure"));
        }
        state.journal.push(op);
        Ok(())
    }

    fn missing(what: &str, name: &str) -> SyncError {
        SyncError::database(what, format!("\"{}\" does not exist", name))
    }
}

#[async_trait]
impl Cluster for MemoryCluster {
    async fn database_exists(&self, name: &str) -> Result<bool> {
        Ok(self.lock().databases.contains_key(name))
    }

    async fn database_created(&self, name: &str) -> Result<DateStatus> {
        Ok(self
            .lock()
            .databases
            .get(name)
            .map(|db| db.created)
            .unwrap_or(DateStatus::Unknown))
    }

    async fn database_names(&self) -> Result<Vec<String>> {
        Ok(self.database_list())
    }

    async fn create_database(&self, name: &str) -> Result<()> {
        let mut state = self.lock();
        if state.databases.contains_key(name) {
            return Err(SyncError::database("creating database", "already exists"));
        }
        Self::record(&mut state, Op::CreateDatabase(name.to_string()))?;
        let mut db = FakeDatabase::new(DateStatus::Known(self.today));
        db.schemas.extend(state.restored_schemas.iter().cloned());
        state.databases.insert(name.to_string(), db);
        Ok(())
    }

    async fn drop_database(&self, name: &str) -> Result<()> {
        let mut state = self.lock();
        Self::record(&mut state, Op::DropDatabase(name.to_string()))?;
        state.databases.remove(name);
        state.connections.remove(name);
        Ok(())
    }

    async fn rename_database(&self, from: &str, to: &str) -> Result<()> {
        let mut state = self.lock();
        if state.databases.contains_key(to) {
            return Err(SyncError::database("renaming database", "target exists"));
        }
        if state.connections.get(from).is_some_and(|c| !c.is_empty()) {
            return Err(SyncError::database(
                "renaming database",
                "database is being accessed by other users",
            ));
        }
        let db = state
            .databases
            .remove(from)
            .ok_or_else(|| Self::missing("renaming database", from))?;
        if let Err(e) = Self::record(&mut state, Op::RenameDatabase(from.to_string(), to.to_string())) {
            state.databases.insert(from.to_string(), db);
            return Err(e);
        }
        state.databases.insert(to.to_string(), db);
        Ok(())
    }

    async fn comment_on_database(&self, name: &str, comment: &str) -> Result<()> {
        let mut state = self.lock();
        Self::record(&mut state, Op::Comment(name.to_string(), comment.to_string()))?;
        let db = state
            .databases
            .get_mut(name)
            .ok_or_else(|| Self::missing("setting database comment", name))?;
        db.comment = Some(comment.to_string());
        Ok(())
    }

    async fn create_extension(&self, db: &str, extension: &str) -> Result<()> {
        let mut state = self.lock();
        Self::record(&mut state, Op::CreateExtension(db.to_string(), extension.to_string()))?;
        let fake = state
            .databases
            .get_mut(db)
            .ok_or_else(|| Self::missing("creating extension", db))?;
        fake.extensions.push(extension.to_string());
        Ok(())
    }

    async fn create_schema(&self, db: &str, schema: &str) -> Result<()> {
        let mut state = self.lock();
        Self::record(&mut state, Op::CreateSchema(db.to_string(), schema.to_string()))?;
        let fake = state
            .databases
            .get_mut(db)
            .ok_or_else(|| Self::missing("creating schema", db))?;
        fake.schemas.push(schema.to_string());
        Ok(())
    }

    async fn schema_names(&self, db: &str) -> Result<Vec<String>> {
        self.lock()
            .databases
            .get(db)
            .map(|d| d.schemas.clone())
            .ok_or_else(|| Self::missing("getting schema names", db))
    }

    async fn rename_schema(&self, db: &str, from: &str, to: &str) -> Result<()> {
        let mut state = self.lock();
        Self::record(
            &mut state,
            Op::RenameSchema(db.to_string(), from.to_string(), to.to_string()),
        )?;
        let fake = state
            .databases
            .get_mut(db)
            .ok_or_else(|| Self::missing("renaming schema", db))?;
        for schema in fake.schemas.iter_mut().filter(|s| s.as_str() == from) {
            *schema = to.to_string();
        }
        Ok(())
    }

    async fn role_exists(&self, role: &str) -> Result<bool> {
        Ok(self.lock().roles.contains(role))
    }

    async fn create_role(&self, role: &str, _password: &str) -> Result<()> {
        let mut state = self.lock();
        Self::record(&mut state, Op::CreateRole(role.to_string()))?;
        state.roles.insert(role.to_string());
        Ok(())
    }

    async fn drop_role(&self, role: &str) -> Result<()> {
        let mut state = self.lock();
        Self::record(&mut state, Op::DropRole(role.to_string()))?;
        state.roles.remove(role);
        Ok(())
    }

    async fn active_connections(&self, db: &str) -> Result<Vec<i32>> {
        Ok(self.lock().connections.get(db).cloned().unwrap_or_default())
    }

    async fn terminate_backend(&self, pid: i32) -> Result<()> {
        let mut state = self.lock();
        Self::record(&mut state, Op::Terminate(pid))?;
        for pids in state.connections.values_mut() {
            pids.retain(|p| *p != pid);
        }
        Ok(())
    }

    async fn index_inventory(&self, db: &str, schemas: &[String]) -> Result<IndexInventory> {
        let state = self.lock();
        if !state.databases.contains_key(db) {
            return Err(Self::missing("getting indexes", db));
        }
        Ok(IndexInventory::new(
            state
                .indexes
                .iter()
                .filter(|ix| schemas.contains(&ix.schema))
                .cloned()
                .collect(),
        ))
    }

    async fn geometry_columns(&self, _db: &str, schema: &str, tables: &[String]) -> Result<GeometryColumns> {
        let state = self.lock();
        let mut out = GeometryColumns::default();
        for table in tables {
            for column in state.geometry.columns(schema, table) {
                out.insert(schema, table, column);
            }
        }
        Ok(out)
    }

    async fn execute(&self, db: &str, statement: &Statement, _intent: &str) -> Result<()> {
        let mut state = self.lock();
        Self::record(&mut state, Op::Execute(db.to_string(), statement.sql.clone()))
    }

    async fn execute_in_transaction(&self, db: &str, statements: &[Statement], _intent: &str) -> Result<()> {
        let mut state = self.lock();
        Self::record(
            &mut state,
            Op::Transaction(
                db.to_string(),
                statements.iter().map(|s| s.sql.clone()).collect(),
            ),
        )
    }
}
