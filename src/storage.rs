use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, Utc};
use csv::Writer;
use log::info;

use crate::error::AppError;

/// Append-only CSV sink writing one dated file per UTC day. Every row is
/// flushed and fsynced before `append` returns.
pub struct CsvSink {
    root: PathBuf,
    device_id: String,
    header: Vec<String>,
    writer: Writer<File>,
    // same file description as the writer's handle, kept for fsync
    sync_handle: File,
    path: PathBuf,
    date: NaiveDate,
}

impl CsvSink {
    pub fn open(root: &Path, device_id: &str, header: Vec<String>) -> Result<Self, AppError> {
        std::fs::create_dir_all(root)
            .map_err(|e| AppError::Storage(format!("create {}: {e}", root.display())))?;
        let date = Utc::now().date_naive();
        let opened = open_writer(root, device_id, date, &header)?;
        info!("writing CSV to {}", opened.path.display());
        Ok(Self {
            root: root.to_path_buf(),
            device_id: device_id.to_string(),
            header,
            writer: opened.writer,
            sync_handle: opened.sync_handle,
            path: opened.path,
            date,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, row: &[String]) -> Result<(), AppError> {
        let today = Utc::now().date_naive();
        if today != self.date {
            self.sync()?;
            let opened = open_writer(&self.root, &self.device_id, today, &self.header)?;
            info!("rotated CSV to {}", opened.path.display());
            self.writer = opened.writer;
            self.sync_handle = opened.sync_handle;
            self.path = opened.path;
            self.date = today;
        }
        self.writer
            .write_record(row)
            .map_err(|e| AppError::Storage(format!("write {}: {e}", self.path.display())))?;
        self.sync()
    }

    fn sync(&mut self) -> Result<(), AppError> {
        self.writer
            .flush()
            .map_err(|e| AppError::Storage(format!("flush {}: {e}", self.path.display())))?;
        self.sync_handle
            .sync_all()
            .map_err(|e| AppError::Storage(format!("fsync {}: {e}", self.path.display())))
    }
}

struct OpenedFile {
    writer: Writer<File>,
    sync_handle: File,
    path: PathBuf,
}

fn open_writer(
    root: &Path,
    device_id: &str,
    date: NaiveDate,
    header: &[String],
) -> Result<OpenedFile, AppError> {
    let path = root.join(format!("{date}_{device_id}.csv"));
    let is_new = !path.exists();
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| AppError::Storage(format!("open {}: {e}", path.display())))?;
    let sync_handle = file
        .try_clone()
        .map_err(|e| AppError::Storage(format!("clone handle {}: {e}", path.display())))?;
    let mut writer = Writer::from_writer(file);
    if is_new {
        writer
            .write_record(header)
            .map_err(|e| AppError::Storage(format!("header {}: {e}", path.display())))?;
        writer
            .flush()
            .map_err(|e| AppError::Storage(format!("flush {}: {e}", path.display())))?;
    }
    Ok(OpenedFile {
        writer,
        sync_handle,
        path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_root(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("edgesense-{tag}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn header_written_once_across_reopens() {
        let root = temp_root("sink");
        let header = vec!["timestamp_utc".to_string(), "pulse_flow_count".to_string()];

        let mut sink = CsvSink::open(&root, "dev-1", header.clone()).unwrap();
        sink.append(&["t0".to_string(), "5".to_string()]).unwrap();
        let path = sink.path().to_path_buf();
        drop(sink);

        let mut sink = CsvSink::open(&root, "dev-1", header).unwrap();
        sink.append(&["t1".to_string(), "0".to_string()]).unwrap();
        drop(sink);

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(
            lines,
            vec!["timestamp_utc,pulse_flow_count", "t0,5", "t1,0"]
        );
        let _ = std::fs::remove_dir_all(&root);
    }
}
