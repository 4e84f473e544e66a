use std::{
    env,
    fmt::Display,
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::{Result, SyncError};

pub const CONFIG_FILE_NAME: &str = "config.yml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AreaType {
    Landsdekkende,
    Fylke,
    Kommune,
}

impl Display for AreaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use AreaType::*;
        match self {
            Landsdekkende => write!(f, "landsdekkende"),
            Fylke => write!(f, "fylke"),
            Kommune => write!(f, "kommune"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Format {
    /// Esri file geodatabase, loaded with ogr2ogr
    #[serde(rename = "FGDB")]
    Fgdb,
    /// PostgreSQL dump, restored with pg_restore or psql
    #[serde(rename = "PostGIS")]
    PostGis,
}

impl Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Format::Fgdb => write!(f, "FGDB"),
            Format::PostGis => write!(f, "PostGIS"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub dataset: DatasetConfig,
    #[serde(default, deserialize_with = "null_as_default")]
    pub indexing: Vec<IndexingConfig>,
}

/// The upstream dataset and the databases it feeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub metadata_id: Uuid,
    #[serde(deserialize_with = "string_or_number")]
    pub area_code: String,
    pub area_type: AreaType,
    #[serde(deserialize_with = "string_or_number")]
    pub epsg: String,
    pub format: Format,
    pub files: Vec<FileMap>,
}

/// Maps one resource of the extracted archive to one production database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMap {
    #[serde(default)]
    pub glob: Option<String>,
    pub db_name: String,
    #[serde(default)]
    pub db_schema: Option<String>,
    #[serde(default)]
    pub db_role: Option<String>,
    #[serde(default)]
    pub db_role_pwd: Option<String>,
}

impl FileMap {
    /// The schema the data is loaded into, defaults to the database name.
    pub fn schema(&self) -> &str {
        self.db_schema.as_deref().unwrap_or(&self.db_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    pub dbs: Vec<String>,
    #[serde(default = "default_schemas")]
    pub schemas: Vec<String>,
    pub tables: Vec<String>,
    #[serde(default)]
    pub id_column: Option<String>,
    #[serde(default = "default_true")]
    pub geom_index: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub indexes: Vec<Vec<String>>,
}

impl IndexingConfig {
    pub fn applies_to(&self, db_name: &str) -> bool {
        self.dbs.iter().any(|db| db == db_name)
    }
}

fn default_schemas() -> Vec<String> {
    vec!["public".to_string()]
}

fn default_true() -> bool {
    true
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Area codes like `0301` and EPSG codes like `25833` are often written
/// unquoted in the YAML file.
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrNumber {
        String(String),
        Int(i64),
    }

    Ok(match StringOrNumber::deserialize(deserializer)? {
        StringOrNumber::String(s) => s,
        StringOrNumber::Int(n) => n.to_string(),
    })
}

impl Config {
    pub fn from_yaml(contents: &str) -> Result<Config> {
        let config: Config = serde_yaml::from_str(contents)
            .map_err(|e| SyncError::configuration(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.dataset.files.is_empty() {
            return Err(SyncError::configuration("No files configured for the dataset"));
        }
        for file in &self.dataset.files {
            if file.db_name.trim().is_empty() {
                return Err(SyncError::configuration("Empty database name in files"));
            }
        }
        for (i, file) in self.dataset.files.iter().enumerate() {
            if self.dataset.files[..i]
                .iter()
                .any(|other| other.db_name == file.db_name)
            {
                return Err(SyncError::configuration(format!(
                    "Database \"{}\" is configured more than once",
                    file.db_name
                )));
            }
        }
        Ok(())
    }

    /// Indexing specifications that apply to a production database.
    pub fn indexing_for<'a>(&'a self, db_name: &'a str) -> impl Iterator<Item = &'a IndexingConfig> {
        self.indexing.iter().filter(move |c| c.applies_to(db_name))
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(SyncError::configuration(format!(
            "Configuration file \"{}\" not found",
            path.display()
        )));
    }
    let contents = fs::read_to_string(path)?;
    Config::from_yaml(&contents)
}

#[derive(Debug, Clone)]
pub struct PgSettings {
    pub host: Option<String>,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ToolPaths {
    pub ogr2ogr: PathBuf,
    pub pg_restore: PathBuf,
    pub psql: PathBuf,
}

/// Everything that comes from the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    pub app_files_dir: PathBuf,
    pub pg: PgSettings,
    pub api_username: Option<String>,
    pub api_password: Option<String>,
    pub tools: ToolPaths,
}

impl Settings {
    pub fn from_env() -> Result<Settings> {
        Settings::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Settings>
    where
        F: Fn(&str) -> Option<String>,
    {
        let app_files_dir = lookup("APP_FILES_DIR").ok_or_else(|| {
            SyncError::configuration("Environment variable \"APP_FILES_DIR\" is not set")
        })?;
        let port = match lookup("PGPORT") {
            Some(port) => port.parse::<u16>().map_err(|_| {
                SyncError::configuration(format!("Invalid PGPORT value \"{}\"", port))
            })?,
            None => 5432,
        };
        let tool = |key: &str, default: &str| PathBuf::from(lookup(key).unwrap_or(default.to_string()));

        Ok(Settings {
            app_files_dir: PathBuf::from(app_files_dir),
            pg: PgSettings {
                host: lookup("PGHOST"),
                port,
                user: lookup("PGUSER").unwrap_or("postgres".to_string()),
                password: lookup("PGPASSWORD"),
            },
            api_username: lookup("API_USERNAME"),
            api_password: lookup("API_PASSWORD"),
            tools: ToolPaths {
                ogr2ogr: tool("OGR2OGR_BIN", "/usr/bin/ogr2ogr"),
                pg_restore: tool("PG_RESTORE_BIN", "/usr/bin/pg_restore"),
                psql: tool("PSQL_BIN", "/usr/bin/psql"),
            },
        })
    }

    pub fn config_path(&self) -> PathBuf {
        self.app_files_dir.join(CONFIG_FILE_NAME)
    }

    /// A fresh directory for one run's download, not created yet.
    pub fn new_download_dir(&self) -> PathBuf {
        self.app_files_dir
            .join("download")
            .join(Uuid::new_v4().to_string())
    }

    /// Password for roles configured without one.
    pub fn default_role_password(&self) -> Result<String> {
        self.pg.password.clone().ok_or_else(|| {
            SyncError::configuration("Environment variable \"PGPASSWORD\" is not set")
        })
    }

    pub fn api_credentials(&self) -> Result<(String, String)> {
        match (&self.api_username, &self.api_password) {
            (Some(user), Some(password)) => Ok((user.clone(), password.clone())),
            _ => Err(SyncError::configuration(
                "Environment variables \"API_USERNAME\" and \"API_PASSWORD\" must be set",
            )),
        }
    }
}
