// Monthly electricity interval usage, one MessagePack file per month.
// The file names are the only index: <YYYY-MM>.msgpack

use std::fs;
use std::path::{Path, PathBuf};

use itertools::Itertools;
use log::info;

use crate::db::readings;
use crate::error::SyncError;
use crate::interval::month::Month;

pub const EXTENSION: &str = "msgpack";

#[derive(Clone, Debug)]
pub struct IntervalUsageArchive {
    pub base_dir: PathBuf,
}

impl IntervalUsageArchive {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        IntervalUsageArchive {
            base_dir: base_dir.into(),
        }
    }

    /// Return the file for the month.  Does not check if the file exists.
    pub fn filename(&self, month: &Month) -> PathBuf {
        self.base_dir.join(format!("{}.{}", month, EXTENSION))
    }

    pub fn ensure_dir(&self) -> Result<(), SyncError> {
        fs::create_dir_all(&self.base_dir)?;
        Ok(())
    }

    /// All the months with a file in the archive, sorted.
    /// Fails on any entry that is not a month file, so a gap can't go unnoticed.
    pub fn months(&self) -> Result<Vec<Month>, SyncError> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.base_dir)? {
            let name = entry?.file_name();
            let name = name.to_str().ok_or_else(|| SyncError::MalformedArtifact {
                name: name.to_string_lossy().into_owned(),
                dir: self.base_dir.clone(),
                reason: "not valid UTF-8".to_string(),
            })?;
            names.push(name.to_string());
        }
        parse_months(&names, &self.base_dir)
    }

    /// The month to start downloading from.  The last month on disk is
    /// downloaded again because it is usually incomplete.
    pub fn resume_point(&self, epoch: Month) -> Result<Month, SyncError> {
        Ok(resume_point(&self.months()?, epoch))
    }

    /// Write the readings for the month, replacing any existing file.
    pub async fn write_month(&self, month: &Month, readings: &[f64]) -> Result<(), SyncError> {
        let path = self.filename(month);
        let bytes = readings::encode(readings)?;
        info!("writing {}", path.display());
        tokio::fs::write(&path, bytes).await?;
        Ok(())
    }

    pub async fn read_month(&self, month: &Month) -> Result<Vec<f64>, SyncError> {
        let bytes = tokio::fs::read(self.filename(month)).await?;
        readings::decode(&bytes)
    }
}

/// Parse artifact file names into months, sorted chronologically.
pub fn parse_months(names: &[String], dir: &Path) -> Result<Vec<Month>, SyncError> {
    names
        .iter()
        .map(|name| {
            let malformed = |reason: String| SyncError::MalformedArtifact {
                name: name.clone(),
                dir: dir.to_path_buf(),
                reason,
            };
            let stem = name
                .strip_suffix(&format!(".{}", EXTENSION))
                .ok_or_else(|| malformed(format!("missing .{} extension", EXTENSION)))?;
            stem.parse::<Month>().map_err(|e| malformed(e.to_string()))
        })
        .collect::<Result<Vec<Month>, SyncError>>()
        .map(|months| months.into_iter().sorted().collect())
}

/// Latest of the existing months, or `epoch` when there are none.
pub fn resume_point(existing: &[Month], epoch: Month) -> Month {
    existing.iter().max().copied().unwrap_or(epoch)
}
