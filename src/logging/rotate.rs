//! Size-bounded log file with numbered backups

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Append-only log file that rotates to `<path>.1`, `<path>.2`, ... when a
/// write would push it past `max_size` bytes.
#[derive(Debug)]
pub struct RotatingFile {
    path: PathBuf,
    max_size: u64,
    backup_count: usize,
    file: Option<File>,
    size: u64,
}

impl RotatingFile {
    /// Open (or create) the active file, creating its directory if needed
    pub fn open(path: impl Into<PathBuf>, max_size: u64, backup_count: usize) -> io::Result<Self> {
        let path = path.into();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }

        let file = open_append(&path)?;
        let size = file.metadata()?.len();

        Ok(Self {
            path,
            max_size,
            backup_count,
            file: Some(file),
            size,
        })
    }

    /// Write one complete record, rotating first if it would not fit
    pub fn write_record(&mut self, record: &[u8]) -> io::Result<()> {
        let len = record.len() as u64;
        if self.size > 0 && self.size + len > self.max_size {
            self.rotate()?;
        }

        let file = match self.file.take() {
            Some(file) => file,
            None => open_append(&self.path)?,
        };
        self.file.insert(file).write_all(record)?;
        self.size += len;
        Ok(())
    }

    fn rotate(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }

        if self.backup_count == 0 {
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&self.path)?;
            self.file = Some(file);
            self.size = 0;
            return Ok(());
        }

        remove_if_exists(&backup_path(&self.path, self.backup_count))?;
        for n in (1..self.backup_count).rev() {
            rename_if_exists(&backup_path(&self.path, n), &backup_path(&self.path, n + 1))?;
        }
        rename_if_exists(&self.path, &backup_path(&self.path, 1))?;

        self.file = Some(open_append(&self.path)?);
        self.size = 0;
        Ok(())
    }
}

/// `<path>.<n>`
pub fn backup_path(path: &Path, n: usize) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(format!(".{}", n));
    PathBuf::from(name)
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

fn rename_if_exists(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
