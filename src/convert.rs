use std::{
    path::{Path, PathBuf},
    process::Output,
    time::Instant,
};

use async_trait::async_trait;
use log::info;
use tokio::process::Command;

use crate::{
    config::{PgSettings, ToolPaths},
    error::{Result, SyncError},
};

/// Loads a downloaded resource into a database.
#[async_trait]
pub trait Converter: Send + Sync {
    /// Load every layer of a file geodatabase into `schema`.
    async fn load_file_geodatabase(&self, resource: &Path, db: &str, schema: &str) -> Result<()>;

    /// Restore a `.backup` or `.sql` dump into `db`.
    async fn restore_dump(&self, resource: &Path, db: &str) -> Result<()>;
}

/// How a dump file is restored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpKind {
    /// custom format, through pg_restore
    Backup,
    /// plain SQL, through psql
    Sql,
}

impl DumpKind {
    pub fn from_path(path: &Path) -> Result<DumpKind> {
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "backup" => Ok(DumpKind::Backup),
            "sql" => Ok(DumpKind::Sql),
            _ => Err(SyncError::Conversion {
                tool: "restore".to_string(),
                status: "not started".to_string(),
                stderr: format!("Unsupported dump file \"{}\"", path.display()),
            }),
        }
    }
}

/// ogr2ogr, pg_restore and psql run as child processes.
pub struct CommandLineTools {
    tools: ToolPaths,
    pg: PgSettings,
}

impl CommandLineTools {
    pub fn new(tools: ToolPaths, pg: PgSettings) -> Self {
        CommandLineTools { tools, pg }
    }

    /// `PG:` connection string understood by GDAL.
    fn pg_datasource(&self, db: &str) -> String {
        let mut parts = Vec::new();
        if let Some(host) = &self.pg.host {
            parts.push(format!("host={}", host));
        }
        parts.push(format!("port={}", self.pg.port));
        parts.push(format!("dbname={}", db));
        parts.push(format!("user={}", self.pg.user));
        if let Some(password) = &self.pg.password {
            parts.push(format!("password={}", password));
        }
        format!("PG:{}", parts.join(" "))
    }

    pub fn ogr2ogr_args(&self, resource: &Path, db: &str, schema: &str) -> Vec<String> {
        vec![
            "-f".to_string(),
            "PostgreSQL".to_string(),
            self.pg_datasource(db),
            resource.to_string_lossy().to_string(),
            "-lco".to_string(),
            format!("SCHEMA={}", schema),
            "-lco".to_string(),
            "GEOMETRY_NAME=shape".to_string(),
            "-lco".to_string(),
            "FID=objectid".to_string(),
            "--config".to_string(),
            "OGR_ORGANIZE_POLYGONS".to_string(),
            "ONLY_CCW".to_string(),
            "-nlt".to_string(),
            "CONVERT_TO_LINEAR".to_string(),
            "-overwrite".to_string(),
        ]
    }

    fn connection_args(&self, db: &str) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(host) = &self.pg.host {
            args.extend(["-h".to_string(), host.clone()]);
        }
        args.extend([
            "-p".to_string(),
            self.pg.port.to_string(),
            "-U".to_string(),
            self.pg.user.clone(),
            "-d".to_string(),
            db.to_string(),
        ]);
        args
    }

    /// Program and arguments restoring `resource` into `db`.
    pub fn restore_command(&self, resource: &Path, db: &str) -> Result<(PathBuf, Vec<String>)> {
        let mut args = self.connection_args(db);
        match DumpKind::from_path(resource)? {
            DumpKind::Backup => {
                args.push(resource.to_string_lossy().to_string());
                Ok((self.tools.pg_restore.clone(), args))
            }
            DumpKind::Sql => {
                args.extend([
                    "-v".to_string(),
                    "ON_ERROR_STOP=1".to_string(),
                    "-f".to_string(),
                    resource.to_string_lossy().to_string(),
                ]);
                Ok((self.tools.psql.clone(), args))
            }
        }
    }

    async fn run(&self, program: &Path, args: &[String]) -> Result<()> {
        let tool = program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| program.display().to_string());
        let start = Instant::now();
        let mut command = Command::new(program);
        command.args(args);
        if let Some(password) = &self.pg.password {
            command.env("PGPASSWORD", password);
        }
        let output = command.output().await.map_err(|e| SyncError::Conversion {
            tool: tool.clone(),
            status: "not started".to_string(),
            stderr: e.to_string(),
        })?;
        check_output(&tool, output)?;
        info!("{} finished in {:.2} sec.", tool, start.elapsed().as_secs_f64());
        Ok(())
    }
}

fn check_output(tool: &str, output: Output) -> Result<()> {
    if output.status.success() {
        return Ok(());
    }
    Err(SyncError::Conversion {
        tool: tool.to_string(),
        status: output.status.to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

#[async_trait]
impl Converter for CommandLineTools {
    async fn load_file_geodatabase(&self, resource: &Path, db: &str, schema: &str) -> Result<()> {
        let args = self.ogr2ogr_args(resource, db, schema);
        self.run(&self.tools.ogr2ogr, &args).await
    }

    async fn restore_dump(&self, resource: &Path, db: &str) -> Result<()> {
        let (program, args) = self.restore_command(resource, db)?;
        self.run(&program, &args).await
    }
}
