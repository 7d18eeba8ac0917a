//! Size-rotated CSV log file

use super::{LogRecord, LogSink, SinkError, HEADER};
use async_trait::async_trait;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const FILE_NAME: &str = "assessment.log";
const MAX_BYTES: u64 = 1024 * 1024;
const BACKUP_COUNT: usize = 5;

/// Appends records to `{dir}/assessment.log`, rolling it over to
/// `assessment.log.1` .. `.N` once it would exceed the size limit.
pub struct RotatingFileSink {
    path: PathBuf,
    max_bytes: u64,
    backup_count: usize,
    lock: Mutex<()>,
}

impl RotatingFileSink {
    pub fn new(dir: &Path) -> Result<Self, SinkError> {
        Self::with_limits(dir, MAX_BYTES, BACKUP_COUNT)
    }

    pub fn with_limits(dir: &Path, max_bytes: u64, backup_count: usize) -> Result<Self, SinkError> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            path: dir.join(FILE_NAME),
            max_bytes,
            backup_count,
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn backup_path(&self, index: usize) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(format!(".{index}"));
        PathBuf::from(name)
    }

    fn rotate(&self) -> io::Result<()> {
        if self.backup_count == 0 {
            return fs::remove_file(&self.path);
        }
        let oldest = self.backup_path(self.backup_count);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for index in (1..self.backup_count).rev() {
            let from = self.backup_path(index);
            if from.exists() {
                fs::rename(&from, self.backup_path(index + 1))?;
            }
        }
        fs::rename(&self.path, self.backup_path(1))
    }

    fn write_record(&self, record: &LogRecord) -> Result<(), SinkError> {
        let row = encode_row(record.row())?;

        let _guard = self
            .lock
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))?;

        let size = fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        if size > 0 && size + row.len() as u64 > self.max_bytes {
            self.rotate()?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        if file.metadata()?.len() == 0 {
            file.write_all(&encode_row(HEADER)?)?;
        }
        file.write_all(&row)?;
        file.flush()?;
        Ok(())
    }
}

fn encode_row(row: [&str; 4]) -> Result<Vec<u8>, SinkError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(row)?;
    writer
        .into_inner()
        .map_err(|e| SinkError::Io(e.into_error()))
}

#[async_trait]
impl LogSink for RotatingFileSink {
    fn name(&self) -> &str {
        "file"
    }

    async fn append(&self, record: &LogRecord) -> Result<(), SinkError> {
        self.write_record(record)
    }
}
