use async_trait::async_trait;
use parking_lot::Mutex;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::app::ports::QuarantineSink;
use crate::error::Result;
use crate::pipeline::processing::quality_gate::QuarantinedRow;

/// Writes quarantined rows to `<dir>/quarantine_<year>.jsonl`.
///
/// Each call replaces the year's file, so a retried batch leaves exactly the
/// rows of its last attempt.
pub struct FileQuarantineAdapter {
    dir: PathBuf,
}

impl FileQuarantineAdapter {
    pub fn new(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn path_for(&self, year: i32) -> PathBuf {
        self.dir.join(format!("quarantine_{year}.jsonl"))
    }
}

#[async_trait]
impl QuarantineSink for FileQuarantineAdapter {
    async fn write_quarantined(&self, year: i32, rows: &[QuarantinedRow]) -> Result<()> {
        let path = self.path_for(year);
        if rows.is_empty() {
            // Left over from an earlier attempt at this year
            if path.exists() {
                fs::remove_file(&path)?;
            }
            return Ok(());
        }

        let tmp = self.dir.join(format!(".quarantine_{year}.jsonl.tmp"));
        let mut writer = BufWriter::new(File::create(&tmp)?);
        for row in rows {
            serde_json::to_writer(&mut writer, row)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        drop(writer);
        fs::rename(&tmp, &path)?;
        info!(year, rows = rows.len(), path = %path.display(), "Wrote quarantined rows");
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryQuarantineAdapter {
    rows: Mutex<Vec<(i32, QuarantinedRow)>>,
}

impl InMemoryQuarantineAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> Vec<(i32, QuarantinedRow)> {
        self.rows.lock().clone()
    }
}

#[async_trait]
impl QuarantineSink for InMemoryQuarantineAdapter {
    async fn write_quarantined(&self, year: i32, rows: &[QuarantinedRow]) -> Result<()> {
        let mut stored = self.rows.lock();
        stored.retain(|(y, _)| *y != year);
        stored.extend(rows.iter().cloned().map(|row| (year, row)));
        Ok(())
    }
}
