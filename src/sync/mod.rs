//! The refresh and swap workflow.  Decides which production databases are
//! stale, builds a staging database for each, swaps it into the production
//! name and cleans up whatever a failed run leaves behind.

pub mod builder;
pub mod handover;
pub mod ledger;
pub mod staleness;

use std::{
    fmt::Display,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::{Local, NaiveDateTime};
use lazy_static::lazy_static;
use log::{error, info, warn};
use regex::Regex;
use uuid::Uuid;

use crate::{
    config::{Config, FileMap},
    convert::Converter,
    dataset::{
        archive::{delete_file_or_dir, extract_archive},
        DatasetSource,
    },
    db::Cluster,
    error::{Result, SyncError},
};
use builder::StagingBuilder;
use ledger::ResourceLedger;

lazy_static! {
    static ref LEFTOVER_STAGING: Regex = Regex::new(r"^tmp_[0-9a-f]{32}$").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Evaluating,
    /// Building the staging database of the n-th stale target.
    Building(usize),
    /// Swapping the n-th stale target into production.
    Swapping(usize),
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    UpToDate,
    Refreshed { backup: Option<String> },
    Failed(String),
}

impl Display for RefreshOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefreshOutcome::UpToDate => write!(f, "up to date"),
            RefreshOutcome::Refreshed { .. } => write!(f, "refreshed"),
            RefreshOutcome::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetOutcome {
    pub db_name: String,
    pub outcome: RefreshOutcome,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcomes: Vec<TargetOutcome>,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn refreshed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.outcome, RefreshOutcome::Refreshed { .. }))
            .count()
    }

    /// 0 when something was refreshed, 2 when there was nothing to do.
    pub fn exit_code(&self) -> i32 {
        if self.refreshed() > 0 {
            0
        } else {
            2
        }
    }
}

pub struct SwapCoordinator {
    cluster: Arc<dyn Cluster>,
    source: Arc<dyn DatasetSource>,
    converter: Arc<dyn Converter>,
    config: Config,
    download_dir: PathBuf,
    default_role_password: Option<String>,
    now: fn() -> NaiveDateTime,
    state: RunState,
    ledger: ResourceLedger,
    outcomes: Vec<TargetOutcome>,
}

fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

impl SwapCoordinator {
    pub fn new(
        cluster: Arc<dyn Cluster>,
        source: Arc<dyn DatasetSource>,
        converter: Arc<dyn Converter>,
        config: Config,
        download_dir: PathBuf,
        default_role_password: Option<String>,
    ) -> Self {
        SwapCoordinator {
            cluster,
            source,
            converter,
            config,
            download_dir,
            default_role_password,
            now: local_now,
            state: RunState::Idle,
            ledger: ResourceLedger::new(),
            outcomes: Vec::new(),
        }
    }

    /// Replace the clock used for backup names and version comments.
    pub fn with_clock(mut self, now: fn() -> NaiveDateTime) -> Self {
        self.now = now;
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Per target outcomes so far, also after a failed run.
    pub fn outcomes(&self) -> &[TargetOutcome] {
        &self.outcomes
    }

    pub fn ledger(&self) -> &ResourceLedger {
        &self.ledger
    }

    /// Refresh every stale target.  On failure the unpromoted staging
    /// databases and roles created by this run are dropped before the error
    /// is returned; targets swapped earlier in the run stay swapped.
    pub async fn run(&mut self) -> Result<RunReport> {
        let start = Instant::now();
        self.outcomes.clear();
        self.ledger.clear();

        self.state = RunState::Evaluating;
        let stale = match self.evaluate().await {
            Ok(stale) => stale,
            Err(e) => {
                self.state = RunState::Failed;
                return Err(e);
            }
        };

        if stale.is_empty() {
            info!("No need to refresh database(s)");
            self.state = RunState::Done;
            return Ok(self.report(start));
        }

        match self.refresh(&stale).await {
            Ok(()) => {
                if let Err(e) = delete_file_or_dir(&self.download_dir) {
                    warn!("Could not delete {}: {}", self.download_dir.display(), e);
                }
                self.ledger.clear();
                self.state = RunState::Done;
                let report = self.report(start);
                info!("Job finished in {:.2} sec.", report.elapsed.as_secs_f64());
                Ok(report)
            }
            Err(e) => {
                self.state = RunState::Failed;
                error!("Refresh failed: {}", e);
                let reason = e.to_string();
                let done: Vec<String> = self.outcomes.iter().map(|o| o.db_name.clone()).collect();
                for target in stale.iter().filter(|t| !done.contains(&t.db_name)) {
                    self.outcomes.push(TargetOutcome {
                        db_name: target.db_name.clone(),
                        outcome: RefreshOutcome::Failed(reason.clone()),
                    });
                }
                self.cleanup().await;
                Err(e)
            }
        }
    }

    fn report(&self, start: Instant) -> RunReport {
        RunReport {
            outcomes: self.outcomes.clone(),
            elapsed: start.elapsed(),
        }
    }

    /// Targets whose production database needs a refresh.  The up to date
    /// ones are recorded as such.
    async fn evaluate(&mut self) -> Result<Vec<FileMap>> {
        let upstream = self.source.resolve_update_date(&self.config.dataset).await?;
        let mut stale = Vec::new();
        for target in &self.config.dataset.files {
            if staleness::needs_refresh(self.cluster.as_ref(), &target.db_name, upstream).await? {
                stale.push(target.clone());
            } else {
                self.outcomes.push(TargetOutcome {
                    db_name: target.db_name.clone(),
                    outcome: RefreshOutcome::UpToDate,
                });
            }
        }
        Ok(stale)
    }

    /// Download and extract the dataset into the run's download directory.
    async fn acquire(&self) -> Result<PathBuf> {
        let url = self.source.place_order(&self.config.dataset).await?;
        tokio::fs::create_dir_all(&self.download_dir).await?;
        let archive = self.download_dir.join(format!("{}.zip", Uuid::new_v4()));
        self.source.download(&url, &archive).await?;
        extract_archive(&archive, &self.download_dir)
    }

    async fn refresh(&mut self, stale: &[FileMap]) -> Result<()> {
        let root = self.acquire().await?;
        for (n, target) in stale.iter().enumerate() {
            self.state = RunState::Building(n);
            let staging = self.build(&root, target).await?;

            self.state = RunState::Swapping(n);
            let promoted =
                handover::promote(self.cluster.as_ref(), &staging, &target.db_name, (self.now)())
                    .await;
            let backup = match promoted {
                Ok(backup) => backup,
                Err(e) => {
                    if matches!(e, SyncError::ProductionMissing { .. }) {
                        self.ledger.retain(&target.db_name);
                    }
                    return Err(e);
                }
            };
            self.ledger.mark_promoted(&target.db_name);
            self.outcomes.push(TargetOutcome {
                db_name: target.db_name.clone(),
                outcome: RefreshOutcome::Refreshed { backup },
            });
        }
        Ok(())
    }

    async fn build(&mut self, root: &Path, target: &FileMap) -> Result<String> {
        let builder = StagingBuilder {
            cluster: self.cluster.as_ref(),
            converter: self.converter.as_ref(),
            config: &self.config,
            default_role_password: self.default_role_password.as_deref(),
        };
        builder
            .build(root, target, (self.now)().date(), &mut self.ledger)
            .await
    }

    /// Best effort removal of the download tree and of every staging
    /// database and role whose target was not promoted.
    pub async fn cleanup(&mut self) {
        if let Err(e) = delete_file_or_dir(&self.download_dir) {
            error!("Error deleting {}: {}", self.download_dir.display(), e);
        }
        for db in self.ledger.pending_databases() {
            match self.cluster.drop_database(&db).await {
                Ok(()) => info!("Database deleted: {}", db),
                Err(e) => error!("{}", e),
            }
        }
        for role in self.ledger.pending_roles() {
            match self.cluster.drop_role(&role).await {
                Ok(()) => info!("Role deleted: {}", role),
                Err(e) => error!("{}", e),
            }
        }
    }

    /// Drop staging databases left behind by earlier runs that crashed.
    /// Only names of the form `tmp_` followed by 32 hex digits are touched.
    pub async fn sweep_stale_staging(&self) -> Result<Vec<String>> {
        let mut dropped = Vec::new();
        for name in self.cluster.database_names().await? {
            if !LEFTOVER_STAGING.is_match(&name) {
                continue;
            }
            match self.cluster.drop_database(&name).await {
                Ok(()) => {
                    info!("Leftover staging database deleted: {}", name);
                    dropped.push(name);
                }
                Err(e) => error!("{}", e),
            }
        }
        Ok(dropped)
    }
}
