use chrono::NaiveDate;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::models::Package;
use crate::store::PackageStore;
use crate::{Error, Result};

/// Moves the active package list in and out of JSON files
pub struct Exporter;

impl Exporter {
    /// Active packages as a pretty-printed JSON array. Archived ones stay home.
    pub fn to_json(store: &PackageStore) -> Result<String> {
        Self::packages_to_json(store.active())
    }

    pub fn packages_to_json(packages: &[Package]) -> Result<String> {
        Ok(serde_json::to_string_pretty(packages)?)
    }

    /// `packages-<YYYY-MM-DD>.json`
    pub fn export_file_name(date: NaiveDate) -> String {
        format!("packages-{}.json", date.format("%Y-%m-%d"))
    }

    /// Write today's export into `dir` and return the file path
    pub fn export_to_dir<P: AsRef<Path>>(store: &PackageStore, dir: P, date: NaiveDate) -> Result<PathBuf> {
        let path = dir.as_ref().join(Self::export_file_name(date));
        let content = Self::to_json(store)?;

        let mut file = File::create(&path)?;
        file.write_all(content.as_bytes())?;

        info!(
            "Exported {} packages to {}",
            store.active().len(),
            path.display()
        );
        Ok(path)
    }

    /// Decode an import document.
    ///
    /// Anything but a JSON array of package objects is rejected as a whole,
    /// before the store ever sees it.
    pub fn parse_import(content: &str) -> Result<Vec<Package>> {
        let value: serde_json::Value =
            serde_json::from_str(content).map_err(|_| Error::InvalidFormat)?;
        if !value.is_array() {
            return Err(Error::InvalidFormat);
        }
        serde_json::from_value(value).map_err(|_| Error::InvalidFormat)
    }

    /// Read `path`, decode it and merge the packages into `store`.
    /// Returns how many new packages were added.
    pub fn import_file<P: AsRef<Path>>(store: &mut PackageStore, path: P) -> Result<usize> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let packages = Self::parse_import(&content)?;
        let candidates = packages.len();
        let added = store.import(packages);

        info!(
            "Imported {} of {} packages from {}",
            added,
            candidates,
            path.as_ref().display()
        );
        Ok(added)
    }
}
