use std::{
    fs::{self, File},
    path::{Path, PathBuf},
    time::Instant,
};

use glob::{glob_with, MatchOptions, Pattern};
use log::{info, warn};

use crate::error::{Result, SyncError};

/// Extract a zip archive into `out_dir`.  The archive is deleted afterwards,
/// whether extraction succeeded or not.
pub fn extract_archive(archive: &Path, out_dir: &Path) -> Result<PathBuf> {
    let start = Instant::now();
    let result = unzip(archive, out_dir);
    if let Err(e) = delete_file_or_dir(archive) {
        warn!("Could not delete archive {}: {}", archive.display(), e);
    }
    result?;
    info!(
        "Archive \"{}\" extracted in {:.2} sec.",
        archive.display(),
        start.elapsed().as_secs_f64()
    );
    Ok(out_dir.to_path_buf())
}

fn unzip(archive: &Path, out_dir: &Path) -> Result<()> {
    let file = File::open(archive)
        .map_err(|e| SyncError::acquisition("Error extracting archive", e))?;
    let mut zip = zip::ZipArchive::new(file)
        .map_err(|e| SyncError::acquisition("Error extracting archive", e))?;
    fs::create_dir_all(out_dir)?;
    zip.extract(out_dir)
        .map_err(|e| SyncError::acquisition("Error extracting archive", e))
}

/// The one resource in `root` to load.  With a pattern, search recursively
/// and case-insensitively, otherwise take the entries of `root` itself.
pub fn resolve_resource(root: &Path, pattern: Option<&str>) -> Result<PathBuf> {
    let mut paths: Vec<PathBuf> = match pattern {
        Some(pattern) => {
            let full = format!(
                "{}/**/{}",
                Pattern::escape(&root.to_string_lossy()),
                pattern
            );
            let options = MatchOptions {
                case_sensitive: false,
                require_literal_separator: false,
                require_literal_leading_dot: false,
            };
            glob_with(&full, options)
                .map_err(|e| SyncError::configuration(format!("Invalid glob \"{}\": {}", pattern, e)))?
                .filter_map(|entry| entry.ok())
                .collect()
        }
        None => fs::read_dir(root)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .collect(),
    };

    if paths.len() != 1 {
        return Err(SyncError::ResourceNotFound {
            dir: root.to_path_buf(),
            pattern: pattern.map(|p| p.to_string()),
            matches: paths.len(),
        });
    }
    Ok(paths.remove(0))
}

pub fn delete_file_or_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        return Ok(());
    }
    if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}
