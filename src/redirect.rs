//! Standard stream redirection
//!
//! The sink never writes log files through ordinary handles. Instead it points
//! the process's stdout and stderr at the active file, so output printed by
//! anything in the process lands in the log too. Before the first switch the
//! original streams are duplicated; writer failures are reported there.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// Platform capability used by the rotation manager
pub trait StreamRedirector: Send {
    /// Point the output target at `path`, truncating it
    ///
    /// The original streams are captured on the first call only.
    fn redirect(&mut self, path: &Path) -> io::Result<()>;

    /// Write to the current target and flush, bypassing the pipeline
    fn raw_write(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Write to the stdout the process had before redirection
    fn write_original_stdout(&mut self, data: &[u8]) -> io::Result<()>;

    /// Write to the stderr the process had before redirection
    fn write_original_stderr(&mut self, data: &[u8]) -> io::Result<()>;
}

fn write_flush(w: &mut dyn Write, data: &[u8]) -> io::Result<()> {
    w.write_all(data)?;
    w.flush()
}

/// Repoints file descriptors 1 and 2 at the log file
#[cfg(unix)]
#[derive(Default)]
pub struct FdRedirector {
    old_stdout: Option<File>,
    old_stderr: Option<File>,
}

#[cfg(unix)]
impl FdRedirector {
    pub fn new() -> Self {
        Self::default()
    }

    fn dup_fd(fd: libc::c_int) -> io::Result<File> {
        use std::os::unix::io::FromRawFd;

        let new_fd = unsafe { libc::dup(fd) };
        if new_fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(unsafe { File::from_raw_fd(new_fd) })
    }

    fn dup2(src: libc::c_int, dst: libc::c_int) -> io::Result<()> {
        if unsafe { libc::dup2(src, dst) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

#[cfg(unix)]
impl StreamRedirector for FdRedirector {
    fn redirect(&mut self, path: &Path) -> io::Result<()> {
        use std::os::unix::io::AsRawFd;

        if self.old_stdout.is_none() {
            self.old_stdout = Some(Self::dup_fd(libc::STDOUT_FILENO)?);
        }
        if self.old_stderr.is_none() {
            self.old_stderr = Some(Self::dup_fd(libc::STDERR_FILENO)?);
        }

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        // Anything still buffered belongs to the previous target.
        let _ = io::stdout().flush();
        Self::dup2(file.as_raw_fd(), libc::STDOUT_FILENO)?;
        Self::dup2(libc::STDOUT_FILENO, libc::STDERR_FILENO)?;
        Ok(())
    }

    fn raw_write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut out = io::stdout().lock();
        write_flush(&mut out, data)?;
        Ok(data.len())
    }

    fn write_original_stdout(&mut self, data: &[u8]) -> io::Result<()> {
        match self.old_stdout.as_mut() {
            Some(file) => write_flush(file, data),
            None => write_flush(&mut io::stdout().lock(), data),
        }
    }

    fn write_original_stderr(&mut self, data: &[u8]) -> io::Result<()> {
        match self.old_stderr.as_mut() {
            Some(file) => write_flush(file, data),
            None => write_flush(&mut io::stderr().lock(), data),
        }
    }
}

/// Writes log files through a plain file handle
///
/// The process streams are left alone, so this works on every platform and
/// inside test harnesses. Original streams default to the process stdout and
/// stderr but can be replaced.
pub struct FileRedirector {
    target: Option<File>,
    stdout: Box<dyn Write + Send>,
    stderr: Box<dyn Write + Send>,
}

impl Default for FileRedirector {
    fn default() -> Self {
        Self::new()
    }
}

impl FileRedirector {
    pub fn new() -> Self {
        Self::with_original_streams(Box::new(io::stdout()), Box::new(io::stderr()))
    }

    pub fn with_original_streams(
        stdout: Box<dyn Write + Send>,
        stderr: Box<dyn Write + Send>,
    ) -> Self {
        Self {
            target: None,
            stdout,
            stderr,
        }
    }
}

impl StreamRedirector for FileRedirector {
    fn redirect(&mut self, path: &Path) -> io::Result<()> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        self.target = Some(file);
        Ok(())
    }

    fn raw_write(&mut self, data: &[u8]) -> io::Result<usize> {
        match self.target.as_mut() {
            Some(file) => {
                write_flush(file, data)?;
                Ok(data.len())
            }
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "no redirect target",
            )),
        }
    }

    fn write_original_stdout(&mut self, data: &[u8]) -> io::Result<()> {
        write_flush(self.stdout.as_mut(), data)
    }

    fn write_original_stderr(&mut self, data: &[u8]) -> io::Result<()> {
        write_flush(self.stderr.as_mut(), data)
    }
}

/// The redirector a sink uses when none is supplied
pub fn platform_redirector() -> Box<dyn StreamRedirector> {
    #[cfg(unix)]
    {
        Box::new(FdRedirector::new())
    }
    #[cfg(not(unix))]
    {
        Box::new(FileRedirector::new())
    }
}

/// In-memory writer shared between a test and a redirector
#[cfg(test)]
#[derive(Clone, Default)]
pub(crate) struct SharedBuffer(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

#[cfg(test)]
impl SharedBuffer {
    pub(crate) fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

#[cfg(test)]
impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
