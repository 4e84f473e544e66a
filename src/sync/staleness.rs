use log::info;

use crate::{db::Cluster, dates::DateStatus, error::Result};

/// A database is stale when it is missing, when either date is unknown, or
/// when the upstream dataset was updated on or after the day it was created.
pub fn is_stale(exists: bool, created: DateStatus, upstream: DateStatus) -> bool {
    if !exists {
        return true;
    }
    match (upstream, created) {
        (DateStatus::Known(updated), DateStatus::Known(created)) => updated >= created,
        _ => true,
    }
}

pub async fn needs_refresh(cluster: &dyn Cluster, name: &str, upstream: DateStatus) -> Result<bool> {
    if !cluster.database_exists(name).await? {
        info!("Database {} does not exist", name);
        return Ok(true);
    }
    let created = cluster.database_created(name).await?;
    let stale = is_stale(true, created, upstream);
    info!(
        "Database {} created: {}, dataset updated: {}, refresh: {}",
        name, created, upstream, stale
    );
    Ok(stale)
}
