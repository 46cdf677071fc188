//! On-disk copy of fetched payloads: `{root}/{YYYY-MM-DD}/{country}/{code}.json`.

use chrono::NaiveDate;
use std::io::{Error, ErrorKind};
use std::path::{Path, PathBuf};

/// One path component: no separators, not `.` or `..`.
fn segment(value: &str) -> std::io::Result<&str> {
    let invalid = value.is_empty()
        || value == "."
        || value == ".."
        || value.contains(['/', '\\', '\0']);
    if invalid {
        return Err(Error::new(ErrorKind::InvalidInput, format!("unsafe archive path segment: {value:?}")));
    }
    Ok(value)
}

#[derive(Debug, Clone)]
pub struct PayloadArchive {
    root: PathBuf,
}

impl PayloadArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// # Errors
    /// `InvalidInput` when `country` or `code` would leave the archive root.
    pub fn path_for(&self, date: NaiveDate, country: &str, code: &str) -> std::io::Result<PathBuf> {
        Ok(self
            .root
            .join(date.format("%Y-%m-%d").to_string())
            .join(segment(country)?)
            .join(format!("{}.json", segment(code)?)))
    }

    /// Write `payload` pretty-printed, creating directories as needed.
    pub async fn write(
        &self,
        date: NaiveDate,
        country: &str,
        code: &str,
        payload: &serde_json::Value,
    ) -> std::io::Result<PathBuf> {
        let path = self.path_for(date, country, code)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let pretty = serde_json::to_string_pretty(payload).map_err(std::io::Error::other)?;
        tokio::fs::write(&path, pretty).await?;
        Ok(path)
    }
}
