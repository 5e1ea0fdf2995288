//! Scan directory lifecycle helpers: a scan's result chunks live under
//! `<data_dir>/measurements/<epoch_seconds>.running/` while the scan is
//! active and lose the `.running` suffix atomically once every in-flight
//! task has completed and the sink has flushed.

use std::path::{Path, PathBuf};

/// Starts a new scan directory named after the current epoch second,
/// bearing the `.running` suffix, and returns its path.
pub fn start_scan_dir(data_dir: impl AsRef<Path>, epoch_seconds: u64) -> std::io::Result<PathBuf> {
    let dir = data_dir
        .as_ref()
        .join("measurements")
        .join(format!("{epoch_seconds}.running"));
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Strips the `.running` suffix from `dir`, renaming it in place. Called
/// once the orchestrator has awaited every in-flight task and flushed the
/// sink; fails loudly if `dir` does not actually bear the suffix, since that
/// would indicate the caller raced a previous completion.
pub fn finish_scan_dir(dir: &Path) -> std::io::Result<PathBuf> {
    let name = dir
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.strip_suffix(".running"))
        .ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is not a .running scan directory", dir.display()),
            )
        })?;
    let finished = dir.with_file_name(name);
    std::fs::rename(dir, &finished)?;
    Ok(finished)
}

/// One entry under `<data_dir>/measurements/`, used by the `list` CLI
/// subcommand, mirroring the original `scanner.py` click group's
/// directory listing.
#[derive(Debug, Clone)]
pub struct ScanDirEntry {
    pub path: PathBuf,
    pub epoch_seconds: u64,
    pub running: bool,
}

/// Lists every scan directory under `<data_dir>/measurements/`, oldest
/// first. Directories whose name does not parse as `<epoch>` or
/// `<epoch>.running` are skipped rather than erroring, since a data
/// directory may accumulate unrelated files over time.
pub fn list_scan_dirs(data_dir: impl AsRef<Path>) -> std::io::Result<Vec<ScanDirEntry>> {
    let measurements = data_dir.as_ref().join("measurements");
    let mut entries = Vec::new();
    let read_dir = match std::fs::read_dir(&measurements) {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
        Err(e) => return Err(e),
    };
    for item in read_dir {
        let item = item?;
        if !item.file_type()?.is_dir() {
            continue;
        }
        let name = item.file_name();
        let Some(name) = name.to_str() else { continue };
        let (stem, running) = match name.strip_suffix(".running") {
            Some(stem) => (stem, true),
            None => (name, false),
        };
        let Ok(epoch_seconds) = stem.parse::<u64>() else {
            continue;
        };
        entries.push(ScanDirEntry {
            path: item.path(),
            epoch_seconds,
            running,
        });
    }
    entries.sort_by_key(|e| e.epoch_seconds);
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn start_then_finish_strips_suffix() {
        let root = tempdir().unwrap();
        let running = start_scan_dir(root.path(), 1000).unwrap();
        assert!(running.ends_with("1000.running"));
        let finished = finish_scan_dir(&running).unwrap();
        assert!(finished.ends_with("1000"));
        assert!(finished.exists());
        assert!(!running.exists());
    }

    #[test]
    fn finish_rejects_non_running_dir() {
        let root = tempdir().unwrap();
        let dir = root.path().join("measurements").join("1000");
        std::fs::create_dir_all(&dir).unwrap();
        assert!(finish_scan_dir(&dir).is_err());
    }

    #[test]
    fn list_scan_dirs_sorts_and_flags_running() {
        let root = tempdir().unwrap();
        start_scan_dir(root.path(), 200).unwrap();
        let finished = start_scan_dir(root.path(), 100).unwrap();
        finish_scan_dir(&finished).unwrap();

        let entries = list_scan_dirs(root.path()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].epoch_seconds, 100);
        assert!(!entries[0].running);
        assert_eq!(entries[1].epoch_seconds, 200);
        assert!(entries[1].running);
    }

    #[test]
    fn list_scan_dirs_on_missing_data_dir_is_empty() {
        let root = tempdir().unwrap();
        let entries = list_scan_dirs(root.path().join("does-not-exist")).unwrap();
        assert!(entries.is_empty());
    }
}
