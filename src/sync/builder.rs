use std::{path::Path, time::Instant};

use chrono::NaiveDate;
use log::info;
use uuid::Uuid;

use super::ledger::ResourceLedger;
use crate::{
    config::{Config, FileMap, Format, IndexingConfig},
    convert::Converter,
    dataset::archive::resolve_resource,
    db::{
        indexes::{reconcile, GeometryColumns},
        Cluster,
    },
    error::{Result, SyncError},
};

pub const STAGING_PREFIX: &str = "tmp_";
const POSTGIS_EXTENSION: &str = "postgis";
const PUBLIC_SCHEMA: &str = "public";

pub fn staging_name() -> String {
    format!("{}{}", STAGING_PREFIX, Uuid::new_v4().simple())
}

/// Name a restored schema should get, if it is `<schema>_<suffix>` with an
/// alphanumeric suffix.  The suffix is everything after the last underscore.
pub fn restored_schema_target(name: &str, schema: &str) -> Option<String> {
    let suffix = name.strip_prefix(schema)?.strip_prefix('_')?;
    if suffix.is_empty() || !suffix.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    name.rfind('_').map(|i| name[..i].to_string())
}

pub fn version_comment(date: NaiveDate) -> String {
    format!("Version: {}", date.format("%d.%m.%Y"))
}

/// Builds fully populated and indexed staging databases.
pub struct StagingBuilder<'a> {
    pub cluster: &'a dyn Cluster,
    pub converter: &'a dyn Converter,
    pub config: &'a Config,
    /// Used for roles configured without a password.
    pub default_role_password: Option<&'a str>,
}

impl StagingBuilder<'_> {
    /// Build the staging database for `target` from the extracted archive in
    /// `resource_root`.  Every object created is put in the ledger as soon as
    /// it exists.  Returns the staging database name.
    pub async fn build(
        &self,
        resource_root: &Path,
        target: &FileMap,
        version: NaiveDate,
        ledger: &mut ResourceLedger,
    ) -> Result<String> {
        let resource = resolve_resource(resource_root, target.glob.as_deref())?;
        info!("Loading {} into {}", resource.display(), target.db_name);

        let staging = staging_name();
        self.cluster.create_database(&staging).await?;
        ledger.record_database(&staging, &target.db_name);
        info!("Database created: {}", staging);

        self.cluster
            .create_extension(&staging, POSTGIS_EXTENSION)
            .await?;
        info!("Extension created: {}", POSTGIS_EXTENSION);

        if let Some(role) = &target.db_role {
            self.ensure_role(role, target, ledger).await?;
        }

        let schema = target.schema();
        match self.config.dataset.format {
            Format::Fgdb => {
                if schema != PUBLIC_SCHEMA {
                    self.cluster.create_schema(&staging, schema).await?;
                    info!("Schema created: {}", schema);
                }
                self.converter
                    .load_file_geodatabase(&resource, &staging, schema)
                    .await?;
            }
            Format::PostGis => {
                self.converter.restore_dump(&resource, &staging).await?;
                self.rename_restored_schemas(&staging, schema).await?;
            }
        }

        let specs: Vec<&IndexingConfig> = self.config.indexing_for(&target.db_name).collect();
        self.create_indexes(&staging, &specs).await?;

        self.cluster
            .comment_on_database(&staging, &version_comment(version))
            .await?;
        info!("Database version date set");
        Ok(staging)
    }

    async fn ensure_role(&self, role: &str, target: &FileMap, ledger: &mut ResourceLedger) -> Result<()> {
        if self.cluster.role_exists(role).await? {
            return Ok(());
        }
        let password = target
            .db_role_pwd
            .as_deref()
            .or(self.default_role_password)
            .ok_or_else(|| {
                SyncError::configuration(format!(
                    "No password for role \"{}\" and PGPASSWORD is not set",
                    role
                ))
            })?;
        self.cluster.create_role(role, password).await?;
        ledger.record_role(role, &target.db_name);
        info!("Role created: {}", role);
        Ok(())
    }

    async fn rename_restored_schemas(&self, db: &str, schema: &str) -> Result<()> {
        let mut renamed = 0;
        for name in self.cluster.schema_names(db).await? {
            if let Some(to) = restored_schema_target(&name, schema) {
                self.cluster.rename_schema(db, &name, &to).await?;
                renamed += 1;
            }
        }
        if renamed > 0 {
            info!("{} schema(s) renamed", renamed);
        }
        Ok(())
    }

    /// Reconcile each spec against a fresh read of the catalog and run the
    /// resulting actions.
    async fn create_indexes(&self, db: &str, specs: &[&IndexingConfig]) -> Result<usize> {
        if specs.is_empty() {
            return Ok(0);
        }
        let start = Instant::now();
        let mut created = 0;
        for spec in specs {
            let inventory = self.cluster.index_inventory(db, &spec.schemas).await?;
            let mut geometry = GeometryColumns::default();
            if spec.geom_index {
                for schema in &spec.schemas {
                    geometry.merge(self.cluster.geometry_columns(db, schema, &spec.tables).await?);
                }
            }

            for action in reconcile(spec, &inventory, &geometry) {
                let statements = action.statements();
                let intent = action.describe();
                if action.is_transactional() {
                    self.cluster
                        .execute_in_transaction(db, &statements, &intent)
                        .await?;
                } else {
                    for statement in &statements {
                        self.cluster.execute(db, statement, &intent).await?;
                    }
                }
                created += 1;
            }
        }
        info!(
            "{} indexes created in {:.2} sec.",
            created,
            start.elapsed().as_secs_f64()
        );
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use std::{error::Error, fs, sync::Mutex};

    use async_trait::async_trait;

    use super::*;
    use crate::{
        dates::DateStatus,
        db::memory::{MemoryCluster, Op},
    };

    #[derive(Default)]
    struct RecordingConverter {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Converter for RecordingConverter {
        async fn load_file_geodatabase(&self, resource: &Path, db: &str, schema: &str) -> Result<()> {
            self.calls.lock().unwrap().push(format!(
                "fgdb {} {} {}",
                resource.file_name().unwrap().to_string_lossy(),
                db,
                schema
            ));
            Ok(())
        }

        async fn restore_dump(&self, resource: &Path, db: &str) -> Result<()> {
            self.calls.lock().unwrap().push(format!(
                "dump {} {}",
                resource.file_name().unwrap().to_string_lossy(),
                db
            ));
            Ok(())
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 10).unwrap()
    }

    fn config(format: &str, files: &str) -> Config {
        let yaml = format!(
            r#"
dataset:
  metadata_id: 041f1e6e-bdbc-4091-b48f-8a5990f3cc5b
  area_code: "0000"
  area_type: landsdekkende
  epsg: 25833
  format: {}
  files:
{}
"#,
            format, files
        );
        Config::from_yaml(&yaml).unwrap()
    }

    #[test]
    fn staging_names_are_unique() {
        let a = staging_name();
        assert!(a.starts_with("tmp_"));
        assert_eq!(a.len(), 4 + 32);
        assert_ne!(a, staging_name());
    }

    #[test]
    fn restored_schema_names() {
        assert_eq!(
            restored_schema_target("adresser_a1b2c3", "adresser").as_deref(),
            Some("adresser")
        );
        assert_eq!(
            restored_schema_target("stedsnavn_vs_20240101", "stedsnavn_vs").as_deref(),
            Some("stedsnavn_vs")
        );
        assert_eq!(restored_schema_target("adresser", "adresser"), None);
        assert_eq!(restored_schema_target("adresser_", "adresser"), None);
        assert_eq!(restored_schema_target("adresser_x_y", "adresser"), None);
        assert_eq!(restored_schema_target("adresserx_1", "adresser"), None);
        assert_eq!(restored_schema_target("public", "adresser"), None);
    }

    #[test]
    fn comment_format() {
        assert_eq!(version_comment(today()), "Version: 10.01.2024");
    }

    #[tokio::test]
    async fn build_file_geodatabase() -> std::result::Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        fs::create_dir_all(dir.path().join("Basisdata_0000_Kommuner.gdb"))?;
        let config = config("FGDB", "    - db_name: kommune_2023\n      glob: \"*.gdb\"");
        let cluster = MemoryCluster::new(today());
        let converter = RecordingConverter::default();
        let builder = StagingBuilder {
            cluster: &cluster,
            converter: &converter,
            config: &config,
            default_role_password: None,
        };
        let mut ledger = ResourceLedger::new();

        let staging = builder
            .build(dir.path(), &config.dataset.files[0], today(), &mut ledger)
            .await?;

        assert_eq!(ledger.pending_databases(), vec![staging.clone()]);
        assert_eq!(
            cluster.journal(),
            vec![
                Op::CreateDatabase(staging.clone()),
                Op::CreateExtension(staging.clone(), "postgis".to_string()),
                Op::CreateSchema(staging.clone(), "kommune_2023".to_string()),
                Op::Comment(staging.clone(), "Version: 10.01.2024".to_string()),
            ]
        );
        assert_eq!(
            *converter.calls.lock().unwrap(),
            vec![format!("fgdb Basisdata_0000_Kommuner.gdb {} kommune_2023", staging)]
        );
        Ok(())
    }

    #[tokio::test]
    async fn build_from_dump_renames_schemas() -> std::result::Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("adresser.backup"), "x")?;
        let config = config(
            "PostGIS",
            "    - db_name: adresser\n      db_role: reader\n      db_role_pwd: secret",
        );
        let cluster = MemoryCluster::new(today())
            .with_restored_schemas(&["adresser_a1b2c3", "other_abc"]);
        let converter = RecordingConverter::default();
        let builder = StagingBuilder {
            cluster: &cluster,
            converter: &converter,
            config: &config,
            default_role_password: None,
        };
        let mut ledger = ResourceLedger::new();

        let staging = builder
            .build(dir.path(), &config.dataset.files[0], today(), &mut ledger)
            .await?;

        let journal = cluster.journal();
        assert!(journal.contains(&Op::CreateRole("reader".to_string())));
        assert!(journal.contains(&Op::RenameSchema(
            staging.clone(),
            "adresser_a1b2c3".to_string(),
            "adresser".to_string()
        )));
        assert!(!journal
            .iter()
            .any(|op| matches!(op, Op::RenameSchema(_, from, _) if from.as_str() == "other_abc")));
        assert!(!journal.iter().any(|op| matches!(op, Op::CreateSchema(..))));
        assert_eq!(ledger.pending_roles(), vec!["reader"]);
        assert_eq!(
            *converter.calls.lock().unwrap(),
            vec![format!("dump adresser.backup {}", staging)]
        );
        Ok(())
    }

    #[tokio::test]
    async fn existing_role_is_not_ledgered() -> std::result::Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("adresser.sql"), "x")?;
        let config = config("PostGIS", "    - db_name: adresser\n      db_role: reader");
        let cluster = MemoryCluster::new(today()).with_role("reader");
        let converter = RecordingConverter::default();
        let builder = StagingBuilder {
            cluster: &cluster,
            converter: &converter,
            config: &config,
            default_role_password: None,
        };
        let mut ledger = ResourceLedger::new();
        builder
            .build(dir.path(), &config.dataset.files[0], today(), &mut ledger)
            .await?;
        assert!(ledger.pending_roles().is_empty());
        assert!(!cluster.journal().contains(&Op::CreateRole("reader".to_string())));
        Ok(())
    }

    #[tokio::test]
    async fn role_without_password() -> std::result::Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("adresser.sql"), "x")?;
        let config = config("PostGIS", "    - db_name: adresser\n      db_role: reader");
        let cluster = MemoryCluster::new(today());
        let converter = RecordingConverter::default();
        let builder = StagingBuilder {
            cluster: &cluster,
            converter: &converter,
            config: &config,
            default_role_password: None,
        };
        let mut ledger = ResourceLedger::new();
        let err = builder
            .build(dir.path(), &config.dataset.files[0], today(), &mut ledger)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Configuration(_)));
        // the staging database was created first and must be cleaned up
        assert_eq!(ledger.pending_databases().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn missing_resource() -> std::result::Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let config = config("FGDB", "    - db_name: kommune_2023\n      glob: \"*.gdb\"");
        let cluster = MemoryCluster::new(today()).with_database("kommune_2023", DateStatus::Unknown);
        let converter = RecordingConverter::default();
        let builder = StagingBuilder {
            cluster: &cluster,
            converter: &converter,
            config: &config,
            default_role_password: None,
        };
        let mut ledger = ResourceLedger::new();
        let err = builder
            .build(dir.path(), &config.dataset.files[0], today(), &mut ledger)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::ResourceNotFound { .. }));
        assert!(ledger.is_empty());
        assert!(cluster.journal().is_empty());
        Ok(())
    }
}
