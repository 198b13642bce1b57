use crate::firmware;
use crate::protocol::GloveFrame;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

// Every call opens and closes the file; nothing is held between rows.
#[derive(Clone, Debug)]
pub struct CsvSink {
    path: PathBuf,
}

impl CsvSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the header if the file is missing or empty. Returns whether it did.
    ///
    /// A file that already has content is assumed to start with a header and
    /// is left alone.
    pub async fn ensure_header(&self) -> std::io::Result<bool> {
        match fs::metadata(&self.path).await {
            Ok(meta) if meta.len() > 0 => return Ok(false),
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)
            .await?;
        file.write_all(header_line().as_bytes()).await?;
        file.flush().await?;
        Ok(true)
    }

    pub async fn append_row(&self, frame: &GloveFrame) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .await?;
        file.write_all(row_line(frame).as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

pub fn header_line() -> String {
    format!("{}\n", firmware::CSV_HEADER.join(","))
}

pub fn row_line(frame: &GloveFrame) -> String {
    let fields = frame
        .fields()
        .iter()
        .map(|n| n.to_string())
        .collect::<Vec<String>>()
        .join(",");
    format!("{fields}\n")
}
