//! Log file retention management
//!
//! Deletes the oldest log files once the directory grows past its size budget.
//! Runs on the writer thread right after a rotation, so it must not log through
//! the pipeline: progress goes out through `raw_write`, failures to the original
//! stderr.

use std::fs;
use std::path::Path;
use std::time::SystemTime;

use crate::naming::LogFile;
use crate::redirect::StreamRedirector;
use crate::Result;

struct Candidate {
    file: LogFile,
    size: u64,
    modified: SystemTime,
}

fn list_candidates(logs_dir: &Path) -> Result<Vec<Candidate>> {
    let mut candidates = Vec::new();
    for entry in fs::read_dir(logs_dir)? {
        let entry = entry?;

        // Only regular files named like ours; "latest" is a symlink
        match entry.file_type() {
            Ok(ft) if ft.is_file() => {}
            _ => continue,
        }
        let Some(file) = LogFile::from_path(&entry.path()) else {
            continue;
        };

        if let Ok(metadata) = entry.metadata() {
            candidates.push(Candidate {
                file,
                size: metadata.len(),
                modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }
    }
    Ok(candidates)
}

/// Delete the oldest log files until the directory is within `max_dir_size`
///
/// `active` is never deleted. Returns the number of files deleted.
pub fn recycle_old_logs(
    logs_dir: &Path,
    active: &Path,
    max_dir_size: u64,
    out: &mut dyn StreamRedirector,
) -> Result<usize> {
    let mut candidates = list_candidates(logs_dir)?;
    let mut dir_size: u64 = candidates.iter().map(|c| c.size).sum();
    if dir_size <= max_dir_size {
        return Ok(0);
    }

    // Same mtime: fall back to the order encoded in the name
    candidates.sort_by(|a, b| {
        a.modified
            .cmp(&b.modified)
            .then_with(|| LogFile::newest_first(&b.file, &a.file))
    });
    let _ = out.raw_write(
        format!(
            "Trying to recycle old log files from '{}' ({}>{})...\n",
            logs_dir.display(),
            dir_size,
            max_dir_size
        )
        .as_bytes(),
    );

    let active_name = active.file_name();
    let mut deleted_count = 0;
    for candidate in candidates {
        let path = &candidate.file.path;
        if path.file_name() == active_name {
            continue;
        }
        let _ = out.raw_write(
            format!(
                "Deleting '{}' ({}-{})...\n",
                path.display(),
                dir_size,
                candidate.size
            )
            .as_bytes(),
        );
        if let Err(e) = fs::remove_file(path) {
            let _ = out.write_original_stderr(
                format!("Failed to delete '{}': {}\n", path.display(), e).as_bytes(),
            );
            continue;
        }
        deleted_count += 1;
        dir_size = dir_size.saturating_sub(candidate.size);
        if dir_size <= max_dir_size {
            break;
        }
    }

    Ok(deleted_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redirect::{FileRedirector, SharedBuffer};
    use std::fs::File;
    use std::io::Write;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;

    fn write_log(dir: &Path, name: &str, size: usize, age_secs: u64) -> PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(&vec![b'x'; size]).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(age_secs))
            .unwrap();
        path
    }

    fn redirector(dir: &Path) -> (FileRedirector, SharedBuffer) {
        let err = SharedBuffer::default();
        let mut redirector =
            FileRedirector::with_original_streams(Box::new(std::io::sink()), Box::new(err.clone()));
        redirector.redirect(&dir.join("active-target.txt")).unwrap();
        (redirector, err)
    }

    #[test]
    fn test_recycle_under_budget() {
        let temp_dir = TempDir::new().unwrap();
        let active = write_log(temp_dir.path(), "20240101-000000_20240101-000000_1.log", 100, 0);
        let (mut out, _) = redirector(temp_dir.path());

        let count = recycle_old_logs(temp_dir.path(), &active, 1000, &mut out).unwrap();
        assert_eq!(count, 0);
        assert!(active.exists());
    }

    #[test]
    fn test_recycle_deletes_oldest_first() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        let t1 = write_log(dir, "20240101-000000_20240101-000000_1.log", 400, 300);
        let t2 = write_log(dir, "20240101-000000_20240101-000100_2.log", 400, 200);
        let t3 = write_log(dir, "20240101-000000_20240101-000200_3.log", 400, 100);
        let (mut out, _) = redirector(dir);

        // 1200 bytes against a 900 byte budget: dropping t1 is enough
        let count = recycle_old_logs(dir, &t3, 900, &mut out).unwrap();
        assert_eq!(count, 1);
        assert!(!t1.exists());
        assert!(t2.exists());
        assert!(t3.exists());

        let progress = std::fs::read_to_string(dir.join("active-target.txt")).unwrap();
        assert!(progress.contains("Trying to recycle old log files"));
        assert!(progress.contains("(1200>900)"));
        assert!(progress.contains("Deleting"));
    }

    #[test]
    fn test_recycle_never_deletes_active() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        // The active file is the oldest by mtime
        let active = write_log(dir, "20240101-000000_20240101-000000_1.log", 500, 300);
        let older = write_log(dir, "20240101-000000_20240101-000100_2.log", 500, 200);
        let newer = write_log(dir, "20240101-000000_20240101-000200_3.log", 500, 100);
        let (mut out, _) = redirector(dir);

        let count = recycle_old_logs(dir, &active, 100, &mut out).unwrap();
        assert_eq!(count, 2);
        assert!(active.exists());
        assert!(!older.exists());
        assert!(!newer.exists());
    }

    #[test]
    fn test_recycle_ignores_foreign_files() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        let active = write_log(dir, "20240101-000000_20240101-000200_3.log", 10, 0);
        let foreign = write_log(dir, "notes.txt", 10_000, 1000);
        let (mut out, _) = redirector(dir);

        let count = recycle_old_logs(dir, &active, 100, &mut out).unwrap();
        assert_eq!(count, 0);
        assert!(foreign.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_recycle_skips_latest_symlink() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        let old = write_log(dir, "20240101-000000_20240101-000000_1.log", 300, 200);
        let active = write_log(dir, "20240101-000000_20240101-000100_2.log", 300, 100);
        std::os::unix::fs::symlink("20240101-000000_20240101-000100_2.log", dir.join("latest"))
            .unwrap();
        let (mut out, _) = redirector(dir);

        let count = recycle_old_logs(dir, &active, 400, &mut out).unwrap();
        assert_eq!(count, 1);
        assert!(!old.exists());
        assert!(dir.join("latest").exists());
    }

    #[test]
    fn test_recycle_nonexistent_dir() {
        let temp_dir = TempDir::new().unwrap();
        let (mut out, _) = redirector(temp_dir.path());
        let missing = temp_dir.path().join("missing");
        assert!(recycle_old_logs(&missing, &missing.join("a.log"), 1, &mut out).is_err());
    }
}
