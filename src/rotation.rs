//! Active log file ownership and size-based rotation
//!
//! The rotation manager lives on the writer thread. It receives already
//! formatted chunks from the pipeline, coalesces whatever is queued into one
//! write, and checks the active file's size every `max_file_size / 10` bytes.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tokio::sync::mpsc;

use crate::config::{friendly_io_error_message, Config};
use crate::error::Error;
use crate::naming::{log_file_name, LATEST_LINK};
use crate::redirect::StreamRedirector;
use crate::retention::recycle_old_logs;

/// Sender half of the writer queue
pub type ChunkSender = mpsc::Sender<Vec<u8>>;

/// Receiver half of the writer queue
pub type ChunkReceiver = mpsc::Receiver<Vec<u8>>;

#[cfg(unix)]
fn make_link(target: &str, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn make_link(target: &str, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}

#[cfg(not(any(unix, windows)))]
fn make_link(_target: &str, _link: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "symlinks are not supported on this platform",
    ))
}

/// Owns the active log file
pub struct RotationManager {
    logs_dir: PathBuf,
    start_time: DateTime<Local>,
    current: Option<PathBuf>,
    bytes_written: u64,
    num_log_files: u32,
    max_file_size: u64,
    check_block: u64,
    max_dir_size: u64,
    also_log_to_stdout: bool,
    redirector: Box<dyn StreamRedirector>,
}

impl RotationManager {
    pub fn new(config: &Config, redirector: Box<dyn StreamRedirector>) -> Self {
        Self {
            logs_dir: config.log_dir.clone(),
            start_time: Local::now(),
            current: None,
            bytes_written: 0,
            num_log_files: 0,
            max_file_size: config.max_file_size,
            check_block: config.check_block().max(1),
            max_dir_size: config.max_dir_size,
            also_log_to_stdout: config.also_log_to_stdout,
            redirector,
        }
    }

    /// Redirect to the first log file of this process
    pub fn open_initial(&mut self) -> crate::Result<()> {
        let base = self.next_file_name();
        let path = self.logs_dir.join(&base);
        self.switch_to(&base)
            .map_err(|source| Error::Redirect { path, source })
    }

    /// Path of the active log file
    pub fn current_file(&self) -> Option<&Path> {
        self.current.as_deref()
    }

    /// Sequence number of the most recent file
    pub fn seq(&self) -> u32 {
        self.num_log_files
    }

    /// Bytes written since the last rotation
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    fn next_file_name(&mut self) -> String {
        self.num_log_files += 1;
        log_file_name(self.start_time, Local::now(), self.num_log_files)
    }

    fn report(&mut self, msg: &str) {
        let _ = self
            .redirector
            .write_original_stderr(format!("{}\n", msg).as_bytes());
    }

    fn switch_to(&mut self, base: &str) -> io::Result<()> {
        let path = self.logs_dir.join(base);
        if self.current.is_some() {
            let _ = self
                .redirector
                .raw_write(format!("Redirecting log to '{}'.\n", base).as_bytes());
        }
        self.redirector.redirect(&path)?;
        self.current = Some(path);
        self.bytes_written = 0;

        self.update_latest(base);
        if self.also_log_to_stdout {
            let _ = self
                .redirector
                .write_original_stdout(format!("Redirecting log to '{}'.\n", base).as_bytes());
        }
        Ok(())
    }

    fn update_latest(&mut self, base: &str) {
        let link = self.logs_dir.join(LATEST_LINK);
        match fs::remove_file(&link) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => self.report(&format!("Failed to remove '{}': {}", link.display(), e)),
        }
        if let Err(e) = make_link(base, &link) {
            self.report(&format!("Failed to link '{}': {}", link.display(), e));
        }
    }

    /// Close the active file, open the next one and recycle old files
    pub fn rotate(&mut self) {
        let base = self.next_file_name();
        if let Err(e) = self.switch_to(&base) {
            self.report(&format!(
                "Failed to redirect log to '{}': {}",
                self.logs_dir.join(&base).display(),
                e
            ));
            return;
        }

        let Some(active) = self.current.clone() else {
            return;
        };
        if let Err(e) = recycle_old_logs(
            &self.logs_dir,
            &active,
            self.max_dir_size,
            self.redirector.as_mut(),
        ) {
            self.report(&format!(
                "Failed to recycle log files in '{}': {}",
                self.logs_dir.display(),
                e
            ));
        }
    }

    fn mirror(&mut self, data: &[u8]) {
        if self.also_log_to_stdout {
            let _ = self.redirector.write_original_stdout(data);
        }
    }

    /// Write one combined chunk and rotate if a size checkpoint says so
    pub fn write_chunk(&mut self, data: &[u8]) {
        if self.current.is_none() || data.is_empty() {
            return;
        }
        match self.redirector.raw_write(data) {
            Ok(n) if n == data.len() => self.account(n as u64),
            Ok(n) => self.report(&format!("Failed to write log: {} != {}", n, data.len())),
            Err(e) => {
                let msg = friendly_io_error_message(&e, "Failed to write log");
                self.report(&msg);
            }
        }
    }

    fn account(&mut self, n: u64) {
        let old = self.bytes_written / self.check_block;
        self.bytes_written += n;
        if self.bytes_written / self.check_block == old {
            return;
        }

        let Some(path) = self.current.clone() else {
            return;
        };
        match fs::metadata(&path) {
            Ok(metadata) if metadata.len() >= self.max_file_size => self.rotate(),
            Ok(_) => {}
            Err(e) => self.report(&format!("Failed to stat '{}': {}", path.display(), e)),
        }
    }

    /// Writer loop; returns once every sender is gone and the queue is drained
    pub fn run(mut self, mut rx: ChunkReceiver) {
        while let Some(chunk) = rx.blocking_recv() {
            self.mirror(&chunk);
            let mut data = chunk;
            while let Ok(more) = rx.try_recv() {
                self.mirror(&more);
                data.extend_from_slice(&more);
            }
            self.write_chunk(&data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::{is_log_file_name, LogFile};
    use crate::redirect::{FileRedirector, SharedBuffer};
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn config(dir: &Path, max_file_size: u64) -> Config {
        let mut config = Config::with_log_dir(dir);
        config.max_file_size = max_file_size;
        config
    }

    fn log_files(dir: &Path) -> Vec<LogFile> {
        let mut files: Vec<LogFile> = fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| LogFile::from_path(&e.unwrap().path()))
            .collect();
        files.sort_by_key(|f| f.seq);
        files
    }

    /// Counts raw writes and optionally fails writes or later redirects
    struct CountingRedirector {
        inner: FileRedirector,
        writes: Arc<AtomicUsize>,
        fail_writes: bool,
        redirects: usize,
        fail_redirect_after: usize,
    }

    impl CountingRedirector {
        fn new(inner: FileRedirector) -> Self {
            Self {
                inner,
                writes: Arc::new(AtomicUsize::new(0)),
                fail_writes: false,
                redirects: 0,
                fail_redirect_after: usize::MAX,
            }
        }
    }

    impl StreamRedirector for CountingRedirector {
        fn redirect(&mut self, path: &Path) -> io::Result<()> {
            if self.redirects >= self.fail_redirect_after {
                return Err(io::Error::from(io::ErrorKind::PermissionDenied));
            }
            self.redirects += 1;
            self.inner.redirect(path)
        }

        fn raw_write(&mut self, data: &[u8]) -> io::Result<usize> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            if self.fail_writes {
                return Err(io::Error::from(io::ErrorKind::PermissionDenied));
            }
            self.inner.raw_write(data)
        }

        fn write_original_stdout(&mut self, data: &[u8]) -> io::Result<()> {
            self.inner.write_original_stdout(data)
        }

        fn write_original_stderr(&mut self, data: &[u8]) -> io::Result<()> {
            self.inner.write_original_stderr(data)
        }
    }

    #[test]
    fn test_open_initial() {
        let temp_dir = TempDir::new().unwrap();
        let mut manager =
            RotationManager::new(&config(temp_dir.path(), 100), Box::new(FileRedirector::new()));
        manager.open_initial().unwrap();

        let current = manager.current_file().unwrap().to_path_buf();
        let name = current.file_name().unwrap().to_str().unwrap();
        assert!(is_log_file_name(name));
        assert!(name.ends_with("_1.log"));
        assert!(current.exists());
        assert_eq!(manager.seq(), 1);

        #[cfg(unix)]
        assert_eq!(
            fs::read_link(temp_dir.path().join(LATEST_LINK)).unwrap(),
            PathBuf::from(name)
        );
    }

    #[test]
    fn test_open_initial_failure() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing");
        let mut manager =
            RotationManager::new(&config(&missing, 100), Box::new(FileRedirector::new()));

        let err = manager.open_initial().unwrap_err();
        assert!(matches!(err, Error::Redirect { .. }));
        assert!(manager.current_file().is_none());
    }

    #[test]
    fn test_rotates_when_size_reached() {
        let temp_dir = TempDir::new().unwrap();
        let mut manager =
            RotationManager::new(&config(temp_dir.path(), 100), Box::new(FileRedirector::new()));
        manager.open_initial().unwrap();
        let first = manager.current_file().unwrap().to_path_buf();

        for _ in 0..9 {
            manager.write_chunk(b"123456789\n");
        }
        assert_eq!(manager.seq(), 1);

        manager.write_chunk(b"123456789\n");
        assert_eq!(manager.seq(), 2);
        assert_eq!(manager.bytes_written(), 0);

        let second = manager.current_file().unwrap().to_path_buf();
        assert_ne!(first, second);
        let old = fs::read_to_string(&first).unwrap();
        assert!(old.starts_with("123456789\n"));
        assert!(old.ends_with(&format!(
            "Redirecting log to '{}'.\n",
            second.file_name().unwrap().to_str().unwrap()
        )));

        #[cfg(unix)]
        assert_eq!(
            fs::read_link(temp_dir.path().join(LATEST_LINK)).unwrap(),
            PathBuf::from(second.file_name().unwrap())
        );
    }

    #[test]
    fn test_size_checked_only_at_checkpoints() {
        let temp_dir = TempDir::new().unwrap();
        let mut manager =
            RotationManager::new(&config(temp_dir.path(), 100), Box::new(FileRedirector::new()));
        manager.open_initial().unwrap();
        let first = manager.current_file().unwrap().to_path_buf();

        manager.write_chunk(b"abcd");

        // Grow the file past the limit behind the manager's back
        OpenOptions::new()
            .append(true)
            .open(&first)
            .unwrap()
            .write_all(&[b'z'; 200])
            .unwrap();

        // 8 bytes written: no checkpoint crossed, no stat, no rotation
        manager.write_chunk(b"efgh");
        assert_eq!(manager.seq(), 1);

        // 12 bytes written: crosses the 10 byte checkpoint
        manager.write_chunk(b"ijkl");
        assert_eq!(manager.seq(), 2);
    }

    #[test]
    fn test_checkpoint_without_rotation() {
        let temp_dir = TempDir::new().unwrap();
        let mut manager =
            RotationManager::new(&config(temp_dir.path(), 1000), Box::new(FileRedirector::new()));
        manager.open_initial().unwrap();

        // Crosses several checkpoints but the file stays below 1000 bytes
        manager.write_chunk(&[b'a'; 450]);
        assert_eq!(manager.seq(), 1);
        assert_eq!(manager.bytes_written(), 450);
    }

    #[test]
    fn test_rotation_recycles_old_files() {
        let temp_dir = TempDir::new().unwrap();
        let mut cfg = config(temp_dir.path(), 100);
        cfg.max_dir_size = 250;
        let mut manager = RotationManager::new(&cfg, Box::new(FileRedirector::new()));
        manager.open_initial().unwrap();

        for _ in 0..60 {
            manager.write_chunk(b"123456789\n");
        }
        assert!(manager.seq() >= 5);

        // The active file was empty when the last recycle ran; everything else
        // had to fit the budget then and has not grown since.
        let files = log_files(temp_dir.path());
        let inactive: u64 = files
            .iter()
            .filter(|f| Some(f.path.as_path()) != manager.current_file())
            .map(|f| fs::metadata(&f.path).unwrap().len())
            .sum();
        assert!(inactive <= 250, "inactive files hold {} bytes", inactive);
        assert!(files
            .iter()
            .any(|f| Some(f.path.as_path()) == manager.current_file()));
        assert!(files.iter().all(|f| f.seq > 1));
    }

    #[test]
    fn test_write_failure_reported_to_original_stderr() {
        let temp_dir = TempDir::new().unwrap();
        let err = SharedBuffer::default();
        let mut redirector = CountingRedirector::new(FileRedirector::with_original_streams(
            Box::new(io::sink()),
            Box::new(err.clone()),
        ));
        redirector.fail_writes = true;
        let mut manager = RotationManager::new(&config(temp_dir.path(), 100), Box::new(redirector));
        manager.open_initial().unwrap();

        manager.write_chunk(b"lost line\n");
        manager.write_chunk(b"another\n");

        let reported = err.contents();
        assert_eq!(reported.matches("Failed to write log").count(), 2);
        assert!(reported.contains("permission denied"));
        assert_eq!(manager.bytes_written(), 0);
    }

    #[test]
    fn test_run_coalesces_queued_chunks() {
        let temp_dir = TempDir::new().unwrap();
        let redirector = CountingRedirector::new(FileRedirector::new());
        let writes = Arc::clone(&redirector.writes);
        let mut manager =
            RotationManager::new(&config(temp_dir.path(), 10_000), Box::new(redirector));
        manager.open_initial().unwrap();
        let path = manager.current_file().unwrap().to_path_buf();

        let (tx, rx) = mpsc::channel(16);
        tx.try_send(b"one\n".to_vec()).unwrap();
        tx.try_send(b"two\n".to_vec()).unwrap();
        tx.try_send(b"three\n".to_vec()).unwrap();
        drop(tx);

        manager.run(rx);

        assert_eq!(writes.load(Ordering::SeqCst), 1);
        assert_eq!(fs::read_to_string(&path).unwrap(), "one\ntwo\nthree\n");
    }

    #[test]
    fn test_mirror_to_stdout() {
        let temp_dir = TempDir::new().unwrap();
        let out = SharedBuffer::default();
        let redirector =
            FileRedirector::with_original_streams(Box::new(out.clone()), Box::new(io::sink()));
        let mut cfg = config(temp_dir.path(), 10_000);
        cfg.also_log_to_stdout = true;
        let mut manager = RotationManager::new(&cfg, Box::new(redirector));
        manager.open_initial().unwrap();

        let (tx, rx) = mpsc::channel(4);
        tx.try_send(b"mirrored\n".to_vec()).unwrap();
        drop(tx);
        manager.run(rx);

        let mirrored = out.contents();
        assert!(mirrored.contains("Redirecting log to '"));
        assert!(mirrored.ends_with("mirrored\n"));
    }

    #[test]
    fn test_failed_rotation_keeps_previous_file() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        let old = dir.join("20000101-000000_20000101-000000_1.log");
        fs::write(&old, [b'o'; 500]).unwrap();

        let err = SharedBuffer::default();
        let mut redirector = CountingRedirector::new(FileRedirector::with_original_streams(
            Box::new(io::sink()),
            Box::new(err.clone()),
        ));
        redirector.fail_redirect_after = 1;
        let mut cfg = config(dir, 100);
        cfg.max_dir_size = 10;
        let mut manager = RotationManager::new(&cfg, Box::new(redirector));
        manager.open_initial().unwrap();
        let first = manager.current_file().unwrap().to_path_buf();

        for _ in 0..10 {
            manager.write_chunk(b"123456789\n");
        }
        assert_eq!(manager.seq(), 2);
        assert_eq!(manager.current_file(), Some(first.as_path()));
        assert!(err.contents().contains("Failed to redirect log to"));

        manager.write_chunk(b"after\n");
        assert!(fs::read_to_string(&first).unwrap().ends_with("after\n"));

        // No recycling without a successful rotation
        assert!(old.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_latest_update_failure_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join(LATEST_LINK);
        fs::create_dir(&blocker).unwrap();
        fs::write(blocker.join("keep"), "x").unwrap();

        let err = SharedBuffer::default();
        let redirector =
            FileRedirector::with_original_streams(Box::new(io::sink()), Box::new(err.clone()));
        let mut manager = RotationManager::new(&config(temp_dir.path(), 100), Box::new(redirector));
        manager.open_initial().unwrap();

        let reported = err.contents();
        assert!(reported.contains("Failed to remove"));
        assert!(reported.contains("Failed to link"));

        manager.write_chunk(b"still logging\n");
        let current = manager.current_file().unwrap();
        assert_eq!(fs::read_to_string(current).unwrap(), "still logging\n");
    }
}
