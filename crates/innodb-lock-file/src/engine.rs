//! File system lock engine.

use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use fs2::FileExt;
use tracing::{debug, instrument, warn};

use innodb_lock_core::error::{LockError, LockResult};
use innodb_lock_core::options::{AcquireOptions, RetryBudget};
use innodb_lock_core::process;
use innodb_lock_core::traits::LockEngine;

use crate::holder::HolderInfo;
use crate::name::{lock_file_path, EXTENSION};

/// Age after which an unheld lock file is removed by housekeeping.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Builder for [`FileSystemEngine`].
pub struct FileSystemEngineBuilder {
    directory: Option<PathBuf>,
    retention: Duration,
}

impl FileSystemEngineBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self {
            directory: None,
            retention: DEFAULT_RETENTION,
        }
    }

    /// Sets the directory for lock files.
    ///
    /// The directory will be created if it doesn't exist.
    pub fn directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.directory = Some(path.into());
        self
    }

    /// Sets the age after which unheld lock files are removed.
    pub fn retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Builds the engine.
    ///
    /// # Errors
    ///
    /// Returns an error if no directory is specified or if the directory
    /// cannot be created.
    pub fn build(self) -> LockResult<FileSystemEngine> {
        let directory = self
            .directory
            .ok_or_else(|| LockError::Config("locks directory not specified".to_string()))?;

        std::fs::create_dir_all(&directory).map_err(|e| {
            LockError::Config(format!(
                "failed to create locks directory '{}': {e}",
                directory.display()
            ))
        })?;

        Ok(FileSystemEngine {
            directory,
            retention: self.retention,
            held: Vec::new(),
        })
    }
}

impl Default for FileSystemEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct HeldFile {
    name: String,
    path: PathBuf,
    file: File,
}

/// Advisory lock engine over local files.
///
/// Each lock name maps to one `.lock` file in the engine's directory, held
/// with an exclusive OS lock. The file content describes the holder
/// ([`HolderInfo`]) for operators.
///
/// Suitable for single-instance-per-machine guards, or as the inner layer of
/// a database engine. It does not coordinate across hosts.
pub struct FileSystemEngine {
    directory: PathBuf,
    retention: Duration,
    /// Held locks in acquisition order.
    held: Vec<HeldFile>,
}

impl FileSystemEngine {
    /// Returns a new builder for configuring the engine.
    pub fn builder() -> FileSystemEngineBuilder {
        FileSystemEngineBuilder::new()
    }

    /// Creates an engine storing lock files in `directory`.
    pub fn new(directory: impl Into<PathBuf>) -> LockResult<Self> {
        Self::builder().directory(directory).build()
    }

    /// Returns the directory where lock files are stored.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Returns the path of the file backing `name`.
    pub fn lock_file(&self, name: &str) -> LockResult<PathBuf> {
        lock_file_path(&self.directory, name)
    }

    /// Removes lock files last modified more than `age` ago that no process
    /// holds. Files held by this engine are never touched.
    ///
    /// Returns the number of removed files.
    #[instrument(skip(self), fields(directory = %self.directory.display(), backend = "file"))]
    pub fn remove_unused_older_than(&self, age: Duration) -> LockResult<usize> {
        let entries = match std::fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(source) => {
                return Err(LockError::Io {
                    name: String::new(),
                    source,
                })
            }
        };

        let now = SystemTime::now();
        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            let is_lock_file = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(EXTENSION));
            if !is_lock_file || self.held.iter().any(|h| h.path == path) {
                continue;
            }

            let modified = match entry.metadata().and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(_) => continue,
            };
            if now.duration_since(modified).unwrap_or_default() < age {
                continue;
            }

            match remove_if_unheld(&path) {
                Ok(true) => {
                    debug!(path = %path.display(), "removed unused lock file");
                    removed += 1;
                }
                Ok(false) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove lock file"),
            }
        }

        Ok(removed)
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.held.iter().position(|h| h.name == name)
    }

    /// Diagnostic context; includes the current holder record when `path`
    /// is given and readable.
    fn process_info(&self, path: Option<&Path>) -> String {
        let mut info = format!(
            "{} Locks directory: {}",
            process::describe(),
            self.directory.display()
        );
        if let Some(contents) = path
            .and_then(|p| std::fs::read_to_string(p).ok())
            .filter(|c| !c.trim().is_empty())
        {
            info.push_str("\n ***Lock holder***: ");
            info.push_str(&contents);
        }
        info
    }

    /// Opens (creating if needed) the lock file, retrying once on error.
    fn open_lock_file(&self, name: &str, path: &Path) -> LockResult<File> {
        match open_or_create(path) {
            Ok(file) => Ok(file),
            Err(e) => {
                warn!(lock.name = %name, error = %e, "opening lock file failed, retrying once");
                open_or_create(path).map_err(|source| LockError::Io {
                    name: name.to_string(),
                    source,
                })
            }
        }
    }

    /// Checks that `path` still names the file we locked.
    ///
    /// Housekeeping in another process may have removed the file between our
    /// open and our lock; holding a lock on an unlinked file protects nothing.
    fn verify_locked(&self, name: &str, path: &Path, file: &File) -> LockResult<()> {
        let probe = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| {
                LockError::Config(format!(
                    "Reopening the file after acquiring the FileSystem lock {name:?} failed with: {e}. \
                     This is probably due to a race condition with the lock file deletion system. {}",
                    self.process_info(None)
                ))
            })?;

        if !same_file(file, &probe) {
            return Err(LockError::Config(format!(
                "FileSystem lock file for {name:?} was replaced while acquiring. {}",
                self.process_info(None)
            )));
        }

        if probe.try_lock_exclusive().is_ok() {
            let _ = FileExt::unlock(&probe);
            return Err(LockError::integrity(
                name,
                "Failed to acquire FileSystem lock. Unknown reason",
                self.process_info(None),
            ));
        }

        Ok(())
    }
}

impl LockEngine for FileSystemEngine {
    #[instrument(skip(self, options), fields(lock.name = %name, blocking = options.is_blocking(), backend = "file"))]
    async fn acquire(&mut self, name: &str, options: AcquireOptions) -> LockResult<()> {
        let path = self.lock_file(name)?;

        if self.is_held(name) {
            return Err(LockError::deadlock(
                name,
                "Deadlock detected. Thread tried to acquire the same FileSystem lock without releasing first",
                self.process_info(None),
            ));
        }

        let file = self.open_lock_file(name, &path)?;

        let mut file = if options.is_blocking() {
            let lock_name = name.to_string();
            tokio::task::spawn_blocking(move || file.lock_exclusive().map(|()| file))
                .await
                .map_err(|e| LockError::Backend(Box::new(e)))?
                .map_err(|source| LockError::Io {
                    name: lock_name,
                    source,
                })?
        } else {
            let mut budget = RetryBudget::new(&options);
            loop {
                match file.try_lock_exclusive() {
                    Ok(()) => break file,
                    Err(e) if is_contended(&e) => match budget.next_delay() {
                        Some(delay) => tokio::time::sleep(delay).await,
                        None => {
                            return Err(LockError::non_blocking(
                                name,
                                "Non-blocking FileSystem lock",
                                self.process_info(Some(&path)),
                            )
                            .with_source(e))
                        }
                    },
                    Err(source) => {
                        return Err(LockError::Io {
                            name: name.to_string(),
                            source,
                        })
                    }
                }
            }
        };

        if let Err(e) = self.verify_locked(name, &path, &file) {
            let _ = FileExt::unlock(&file);
            return Err(e);
        }

        if let Err(source) = write_holder(&mut file) {
            let _ = FileExt::unlock(&file);
            return Err(LockError::Io {
                name: name.to_string(),
                source,
            });
        }

        self.held.push(HeldFile {
            name: name.to_string(),
            path,
            file,
        });
        Ok(())
    }

    #[instrument(skip(self), fields(lock.name = %name, backend = "file"))]
    async fn release(&mut self, name: &str) -> LockResult<()> {
        // Housekeeping may race with release; an unknown name is not fatal here.
        let Some(index) = self.position(name) else {
            warn!(
                lock.name = %name,
                "FileSystem lock handle not found. {}",
                self.process_info(None)
            );
            return Ok(());
        };

        let held = self.held.remove(index);
        FileExt::unlock(&held.file).map_err(|source| LockError::Io {
            name: held.name.clone(),
            source,
        })
    }

    async fn release_all(&mut self) -> LockResult<()> {
        let mut first_error = None;
        for name in self.held_locks() {
            if let Err(e) = self.release(&name).await {
                warn!(lock.name = %name, error = %e, "release failed while releasing all");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn unused_locks_remove(&mut self) -> LockResult<()> {
        self.remove_unused_older_than(self.retention).map(|_| ())
    }

    async fn disconnect(&mut self) -> LockResult<()> {
        self.release_all().await
    }

    fn is_held(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    fn held_locks(&self) -> Vec<String> {
        self.held.iter().map(|h| h.name.clone()).collect()
    }

    fn locks_path(&self) -> PathBuf {
        self.directory.clone()
    }
}

// ============================================================================
// File helpers
// ============================================================================

/// Opens without truncating: truncating a file another process holds would
/// wipe its holder record.
fn open_or_create(path: &Path) -> io::Result<File> {
    let existed = path.exists();
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    if !existed {
        make_shared(path)?;
    }
    Ok(file)
}

/// Lets every local user contend on a freshly created lock file.
#[cfg(unix)]
fn make_shared(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    match std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o666)) {
        // Some network mounts refuse chmod.
        Err(e) if e.kind() == ErrorKind::PermissionDenied => Ok(()),
        other => other,
    }
}

#[cfg(not(unix))]
fn make_shared(_path: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn same_file(a: &File, b: &File) -> bool {
    use std::os::unix::fs::MetadataExt;

    match (a.metadata(), b.metadata()) {
        (Ok(a), Ok(b)) => a.dev() == b.dev() && a.ino() == b.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn same_file(_a: &File, _b: &File) -> bool {
    true
}

fn is_contended(e: &io::Error) -> bool {
    e.kind() == ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

fn write_holder(file: &mut File) -> io::Result<()> {
    let holder = serde_json::to_vec(&HolderInfo::current())?;
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&holder)?;
    file.flush()
}

/// Removes `path` if no process holds its lock. Returns whether it did.
fn remove_if_unheld(path: &Path) -> io::Result<bool> {
    let file = File::open(path)?;
    match file.try_lock_exclusive() {
        Ok(()) => {
            std::fs::remove_file(path)?;
            let _ = FileExt::unlock(&file);
            Ok(true)
        }
        Err(e) if is_contended(&e) => Ok(false),
        Err(e) => Err(e),
    }
}
