//! Persistence of partial and complete result sets.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::logging;
use crate::render;
use crate::visualize::FilterVisualization;

/// Receives the full result set accumulated so far after each filter.
pub trait ResultSink {
    fn persist(&mut self, results: &[FilterVisualization]) -> Result<()>;
}

/// Writes `filter_<index>.png` for each new result and refreshes
/// `contact_sheet.png` with every result so far.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
    margin: u32,
    written: usize,
}

impl DirectorySink {
    pub const SHEET_NAME: &'static str = "contact_sheet.png";

    pub fn new<P: AsRef<Path>>(dir: P, margin: u32) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            margin,
            written: 0,
        })
    }

    pub fn filter_path(&self, filter_index: usize) -> PathBuf {
        self.dir.join(format!("filter_{filter_index:03}.png"))
    }

    pub fn sheet_path(&self) -> PathBuf {
        self.dir.join(Self::SHEET_NAME)
    }
}

impl ResultSink for DirectorySink {
    fn persist(&mut self, results: &[FilterVisualization]) -> Result<()> {
        for result in results.iter().skip(self.written) {
            result.image.save(self.filter_path(result.filter_index))?;
        }
        self.written = results.len();

        if results.is_empty() {
            return Ok(());
        }
        let tiles: Vec<_> = results.iter().map(|r| r.image.clone()).collect();
        let sheet = render::contact_sheet(&tiles, self.margin)?;
        sheet.save(self.sheet_path())?;

        if let Err(err) = logging::log_operation(
            "persist",
            &serde_json::json!({
                "dir": self.dir.display().to_string(),
                "filters": results.iter().map(|r| r.filter_index).collect::<Vec<_>>(),
            }),
        ) {
            eprintln!("failed to log persist: {err}");
        }
        Ok(())
    }
}

/// Keeps a copy of every persisted result set; useful for inspection and
/// for embedding the driver in other tools.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    pub snapshots: Vec<Vec<usize>>,
    pub latest: Vec<FilterVisualization>,
}

impl ResultSink for MemorySink {
    fn persist(&mut self, results: &[FilterVisualization]) -> Result<()> {
        self.snapshots
            .push(results.iter().map(|r| r.filter_index).collect());
        self.latest = results.to_vec();
        Ok(())
    }
}
