use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{PlotterError, Result};

/// Sequential append-only writer for one plot file.
///
/// The scheduler admits one writer at a time, so appends from this handle are
/// totally ordered.
#[derive(Debug)]
pub struct PlotSink {
    path: PathBuf,
    file: File,
}

impl PlotSink {
    /// Opens the file in create-or-append mode.
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| PlotterError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        self.file
            .write_all(bytes)
            .map_err(|source| PlotterError::Io {
                path: self.path.clone(),
                source,
            })
    }

    /// Forces written staggers to stable storage; called once per completed
    /// file.
    pub fn flush(&mut self) -> Result<()> {
        self.file.sync_all().map_err(|source| PlotterError::Io {
            path: self.path.clone(),
            source,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
