use chrono::NaiveDateTime;
use log::{error, info};

use crate::{
    db::Cluster,
    error::{Result, SyncError},
};

pub fn backup_name(name: &str, now: NaiveDateTime) -> String {
    format!("{}_bak_{}", name, now.format("%Y%m%d%H%M%S"))
}

/// Terminate every backend connected to `db`.  A backend that cannot be
/// terminated is logged and skipped.  Returns the number terminated.
pub async fn close_active_connections(cluster: &dyn Cluster, db: &str) -> Result<usize> {
    let pids = cluster.active_connections(db).await?;
    let mut count = 0;
    for pid in pids {
        match cluster.terminate_backend(pid).await {
            Ok(()) => count += 1,
            Err(e) => error!("Error closing active connection {}: {}", pid, e),
        }
    }
    if count > 0 {
        info!("{} active connection(s) to {} closed", count, db);
    }
    Ok(count)
}

/// Swap `staging` into the `production` name, keeping the current production
/// database as a backup.  Returns the backup name if there was one.
///
/// The production name is missing only between the two renames.  If the
/// second rename fails the backup is renamed back before the error is
/// returned.  If that fails too, `ProductionMissing` names the backup.
pub async fn promote(
    cluster: &dyn Cluster,
    staging: &str,
    production: &str,
    now: NaiveDateTime,
) -> Result<Option<String>> {
    close_active_connections(cluster, production).await?;

    let backup = if cluster.database_exists(production).await? {
        let backup = backup_name(production, now);
        cluster.rename_database(production, &backup).await?;
        info!("Database renamed from {} to {}", production, backup);
        Some(backup)
    } else {
        None
    };

    let result = match close_active_connections(cluster, staging).await {
        Ok(_) => cluster.rename_database(staging, production).await,
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        if let Some(backup) = &backup {
            match cluster.rename_database(backup, production).await {
                Ok(()) => info!("Database {} restored from {}", production, backup),
                Err(restore) => {
                    error!("Could not restore {} from {}: {}", production, backup, restore);
                    return Err(SyncError::ProductionMissing {
                        production: production.to_string(),
                        backup: backup.clone(),
                        staging: staging.to_string(),
                        source: Box::new(e),
                    });
                }
            }
        }
        return Err(e);
    }
    info!("Database renamed from {} to {}", staging, production);
    Ok(backup)
}
