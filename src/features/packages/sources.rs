//! Package manager databases the packages dataset knows how to read.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use which::which;

use crate::features::packages::models::{
    parse_apk_installed, parse_dpkg_status, parse_rpm_output, Package, RPM_QUERY_FORMAT,
};
use crate::shared::error::CollectionError;
use crate::shared::traits::CollectContext;

/// Modification state of one watched path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStamp {
    pub path: PathBuf,
    pub modified: Option<SystemTime>,
    pub len: u64,
}

impl FileStamp {
    /// `None` when the path does not exist.
    pub fn of(path: &Path) -> Option<Self> {
        let meta = fs::metadata(path).ok()?;
        Some(Self {
            path: path.to_path_buf(),
            modified: meta.modified().ok(),
            len: meta.len(),
        })
    }
}

pub trait PackageSource: Send {
    fn name(&self) -> &str;

    /// Stamps of every path whose change means the list must be re-read.
    /// Empty when the package manager is absent.
    fn signature(&self) -> Vec<FileStamp>;

    fn list(&self, ctx: &CollectContext) -> Result<Vec<Package>, CollectionError>;
}

pub struct DpkgSource {
    status_path: PathBuf,
}

impl DpkgSource {
    pub fn new(status_path: impl Into<PathBuf>) -> Self {
        Self {
            status_path: status_path.into(),
        }
    }
}

impl Default for DpkgSource {
    fn default() -> Self {
        Self::new("/var/lib/dpkg/status")
    }
}

impl PackageSource for DpkgSource {
    fn name(&self) -> &str {
        "dpkg"
    }

    fn signature(&self) -> Vec<FileStamp> {
        FileStamp::of(&self.status_path).into_iter().collect()
    }

    fn list(&self, _ctx: &CollectContext) -> Result<Vec<Package>, CollectionError> {
        if !self.status_path.exists() {
            return Ok(Vec::new());
        }
        parse_dpkg_status(&fs::read_to_string(&self.status_path)?)
    }
}

pub struct ApkSource {
    installed_path: PathBuf,
}

impl ApkSource {
    pub fn new(installed_path: impl Into<PathBuf>) -> Self {
        Self {
            installed_path: installed_path.into(),
        }
    }
}

impl Default for ApkSource {
    fn default() -> Self {
        Self::new("/lib/apk/db/installed")
    }
}

impl PackageSource for ApkSource {
    fn name(&self) -> &str {
        "apk"
    }

    fn signature(&self) -> Vec<FileStamp> {
        FileStamp::of(&self.installed_path).into_iter().collect()
    }

    fn list(&self, _ctx: &CollectContext) -> Result<Vec<Package>, CollectionError> {
        if !self.installed_path.exists() {
            return Ok(Vec::new());
        }
        parse_apk_installed(&fs::read_to_string(&self.installed_path)?)
    }
}

/// Queries the rpm database through the `rpm` binary.
pub struct RpmSource {
    db_dir: PathBuf,
}

impl RpmSource {
    pub fn new(db_dir: impl Into<PathBuf>) -> Self {
        Self { db_dir: db_dir.into() }
    }
}

impl Default for RpmSource {
    fn default() -> Self {
        Self::new("/var/lib/rpm")
    }
}

impl PackageSource for RpmSource {
    fn name(&self) -> &str {
        "rpm"
    }

    fn signature(&self) -> Vec<FileStamp> {
        let mut stamps: Vec<_> = FileStamp::of(&self.db_dir).into_iter().collect();
        if let Ok(entries) = fs::read_dir(&self.db_dir) {
            for entry in entries.flatten() {
                if let Some(stamp) = FileStamp::of(&entry.path()) {
                    stamps.push(stamp);
                }
            }
        }
        stamps.sort_by(|a, b| a.path.cmp(&b.path));
        stamps
    }

    fn list(&self, _ctx: &CollectContext) -> Result<Vec<Package>, CollectionError> {
        if !self.db_dir.exists() {
            return Ok(Vec::new());
        }
        let rpm = match which("rpm") {
            Ok(path) => path,
            Err(_) => {
                warn!("rpm database found at {} but rpm command not found", self.db_dir.display());
                return Ok(Vec::new());
            }
        };
        let output = Command::new(rpm)
            .args(["-qa", "--qf", RPM_QUERY_FORMAT])
            .output()
            .map_err(|e| CollectionError::SystemApi(format!("Failed to execute rpm: {}", e)))?;
        if !output.status.success() {
            return Err(CollectionError::SystemApi(format!(
                "rpm exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        parse_rpm_output(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Homebrew keeps one directory per formula and one subdirectory per version.
pub struct HomebrewSource {
    cellars: Vec<PathBuf>,
}

impl HomebrewSource {
    pub fn new(cellars: Vec<PathBuf>) -> Self {
        Self { cellars }
    }
}

impl Default for HomebrewSource {
    fn default() -> Self {
        Self::new(vec![
            PathBuf::from("/usr/local/Cellar"),
            PathBuf::from("/opt/homebrew/Cellar"),
        ])
    }
}

impl PackageSource for HomebrewSource {
    fn name(&self) -> &str {
        "brew"
    }

    fn signature(&self) -> Vec<FileStamp> {
        let mut stamps = Vec::new();
        for cellar in &self.cellars {
            stamps.extend(FileStamp::of(cellar));
            if let Ok(entries) = fs::read_dir(cellar) {
                for entry in entries.flatten() {
                    stamps.extend(FileStamp::of(&entry.path()));
                }
            }
        }
        stamps.sort_by(|a, b| a.path.cmp(&b.path));
        stamps
    }

    fn list(&self, ctx: &CollectContext) -> Result<Vec<Package>, CollectionError> {
        let mut packages = Vec::new();
        for cellar in self.cellars.iter().filter(|c| c.is_dir()) {
            for formula in fs::read_dir(cellar)?.flatten() {
                ctx.checkpoint()?;
                if !formula.path().is_dir() {
                    continue;
                }
                let name = formula.file_name().to_string_lossy().into_owned();
                for version in fs::read_dir(formula.path())?.flatten() {
                    if !version.path().is_dir() {
                        continue;
                    }
                    let mut package =
                        Package::new(name.clone(), version.file_name().to_string_lossy(), "brew");
                    package.install_time = version
                        .metadata()
                        .and_then(|m| m.modified())
                        .ok()
                        .map(DateTime::<Utc>::from);
                    packages.push(package);
                }
            }
        }
        debug!("Found {} Homebrew packages", packages.len());
        Ok(packages)
    }
}

/// Every source the dataset checks by default.
pub fn default_sources() -> Vec<Box<dyn PackageSource>> {
    vec![
        Box::new(DpkgSource::default()),
        Box::new(RpmSource::default()),
        Box::new(ApkSource::default()),
        Box::new(HomebrewSource::default()),
    ]
}
